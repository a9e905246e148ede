use std::collections::VecDeque;
use std::str::Chars;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::config::TypingConfig;
use crate::keyboard::{self, Key};
use crate::runtime::CancelToken;
use crate::session::TypingStyle;

/// Characters per word used to convert wpm into a per-key delay
const CHARS_PER_WORD: f64 = 5.0;
const MIN_KEY_DELAY: f64 = 0.01;

/// Waits around the forced newline sequence, in seconds
const AFTER_RETURN: f64 = 0.05;
const AFTER_HOME: f64 = 0.02;
const AFTER_SELECT: f64 = 0.02;

/// Dwell before noticing a typo and the gap before retyping, in seconds
const NOTICE_TYPO: (f64, f64) = (0.1, 0.3);
const RETYPE_GAP: (f64, f64) = (0.05, 0.1);

const FILE_SWITCH_PAUSE: (f64, f64) = (1.0, 3.0);

/// One thing an actuator should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keystroke {
    Char(char),
    Backspace,
    Key(Key),
    Combo(Vec<Key>),
}

/// A keystroke and how long to wait before performing it
#[derive(Debug, Clone, PartialEq)]
pub struct KeystrokeEvent {
    pub delay: Duration,
    pub action: Keystroke,
}

impl KeystrokeEvent {
    fn after(secs: f64, action: Keystroke) -> Self {
        Self {
            delay: secs_to_duration(secs),
            action,
        }
    }
}

/// Settings that apply to a single `type_content` call only
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CallOverrides {
    pub wpm: Option<f64>,
    pub typo_probability: Option<f64>,
}

impl TypingStyle {
    /// Call overrides this style implies on top of `cfg`
    pub fn overrides(self, cfg: &TypingConfig) -> CallOverrides {
        match self {
            TypingStyle::Fast => CallOverrides {
                wpm: Some(cfg.base_wpm * 1.5),
                typo_probability: Some(cfg.typo_probability * 0.5),
            },
            TypingStyle::Slow => CallOverrides {
                wpm: Some(cfg.base_wpm * 0.7),
                typo_probability: Some((cfg.typo_probability * 1.5).min(1.0)),
            },
            TypingStyle::Precise => CallOverrides {
                wpm: None,
                typo_probability: Some(0.0),
            },
        }
    }
}

/// Stateful source of human-like keystroke timing.
///
/// Owns its random source, so a seeded generator reproduces the exact same
/// events, typos and pauses. Fatigue accumulates over every character typed
/// until [`TypingSimulator::reset`] is called.
#[derive(Debug)]
pub struct TypingSimulator<R: Rng> {
    rng: R,
    config: TypingConfig,
    chars_typed: u64,
    cancel: CancelToken,
}

impl<R: Rng> TypingSimulator<R> {
    pub fn new(rng: R, config: TypingConfig) -> Self {
        Self {
            rng,
            config,
            chars_typed: 0,
            cancel: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &TypingConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut TypingConfig {
        &mut self.config
    }

    pub fn set_config(&mut self, config: TypingConfig) {
        self.config = config;
    }

    /// Handle other threads can use to stop typing
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn chars_typed(&self) -> u64 {
        self.chars_typed
    }

    /// Clear fatigue and re-arm cancellation
    pub fn reset(&mut self) {
        self.chars_typed = 0;
        self.cancel.reset();
    }

    /// Pause taken before switching to another file, if pauses are enabled
    pub fn file_switch_pause(&mut self) -> Option<Duration> {
        if !self.config.thinking_pauses_enabled {
            return None;
        }
        let (lo, hi) = FILE_SWITCH_PAUSE;
        Some(secs_to_duration(uniform(&mut self.rng, lo, hi)))
    }

    /// Lazily produce the keystrokes that type `text`.
    ///
    /// The stream stops at the next character boundary once the cancel token
    /// fires; events already scheduled for the current character still come out.
    pub fn type_content<'a>(
        &'a mut self,
        text: &'a str,
        overrides: CallOverrides,
    ) -> Keystrokes<'a, R> {
        let wpm = overrides
            .wpm
            .filter(|w| w.is_finite() && *w > 0.0)
            .unwrap_or(self.config.base_wpm);
        let typo_probability = overrides
            .typo_probability
            .map(|p| p.clamp(0.0, 1.0))
            .unwrap_or(self.config.typo_probability);

        Keystrokes {
            sim: self,
            chars: text.chars(),
            prev: None,
            wpm,
            typo_probability,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn key_delay(&mut self, c: char, prev: Option<char>, wpm: f64) -> f64 {
        let base = 60.0 / (wpm * CHARS_PER_WORD);
        let raw = match Normal::new(base, base * self.config.wpm_variance) {
            Ok(normal) => normal.sample(&mut self.rng),
            Err(_) => base,
        };
        let mut delay = raw.clamp(MIN_KEY_DELAY, (3.0 * base).max(MIN_KEY_DELAY));

        if self.config.bigram_acceleration {
            if let Some(p) = prev {
                if keyboard::is_fast_bigram(p, c) {
                    delay *= self.config.bigram_factor;
                }
            }
        }

        delay * (1.0 + self.chars_typed as f64 * self.config.fatigue_factor)
    }

    /// Effective pause probability after `prev`; may exceed 1
    fn pause_probability(&self, prev: char) -> f64 {
        let mut p = self.config.thinking_pause_probability;
        if keyboard::is_pause_boundary(prev) {
            p *= 2.0;
        }
        if prev.is_alphanumeric() {
            p *= 0.5;
        }
        p
    }

    fn thinking_pause(&mut self, prev: Option<char>) -> Option<f64> {
        if !self.config.thinking_pauses_enabled {
            return None;
        }
        let p = self.pause_probability(prev?);
        if self.rng.gen::<f64>() < p {
            let secs = uniform(
                &mut self.rng,
                self.config.thinking_pause_min,
                self.config.thinking_pause_max,
            );
            debug!(secs, "thinking pause");
            Some(secs)
        } else {
            None
        }
    }

    fn typo_for(&mut self, c: char) -> char {
        let candidates: Vec<char> = keyboard::typo_candidates(c).chars().collect();
        let typo = candidates.choose(&mut self.rng).copied().unwrap_or('e');
        if c.is_uppercase() {
            typo.to_ascii_uppercase()
        } else {
            typo
        }
    }

    /// Schedule every event for one intended character
    fn schedule(
        &mut self,
        c: char,
        prev: Option<char>,
        wpm: f64,
        typo_probability: f64,
        out: &mut VecDeque<KeystrokeEvent>,
    ) {
        let mut delay = self.key_delay(c, prev, wpm);
        if let Some(pause) = self.thinking_pause(prev) {
            delay += pause;
        }

        if c.is_alphanumeric() && self.rng.gen::<f64>() < typo_probability {
            let typo = self.typo_for(c);
            debug!(intended = %c, typed = %typo, "typo");
            push_char(out, typo, delay);
            self.chars_typed += 1;

            if self.rng.gen::<f64>() < self.config.typo_correction_probability {
                let notice = uniform(&mut self.rng, NOTICE_TYPO.0, NOTICE_TYPO.1);
                out.push_back(KeystrokeEvent::after(notice, Keystroke::Backspace));
                let gap = uniform(&mut self.rng, RETYPE_GAP.0, RETYPE_GAP.1);
                push_char(out, c, gap);
            }
        } else {
            push_char(out, c, delay);
        }

        self.chars_typed += 1;
    }
}

/// Keystrokes for one character, `delay` seconds after the previous event
fn push_char(out: &mut VecDeque<KeystrokeEvent>, c: char, delay: f64) {
    match c {
        '\n' => {
            out.push_back(KeystrokeEvent::after(delay, Keystroke::Key(Key::Return)));
            // clear whatever indentation the editor inserted
            out.push_back(KeystrokeEvent::after(AFTER_RETURN, Keystroke::Key(Key::Home)));
            out.push_back(KeystrokeEvent::after(
                AFTER_HOME,
                Keystroke::Combo(vec![Key::Shift, Key::End]),
            ));
            out.push_back(KeystrokeEvent::after(AFTER_SELECT, Keystroke::Key(Key::Delete)));
        }
        '\t' => out.push_back(KeystrokeEvent::after(delay, Keystroke::Key(Key::Tab))),
        c => out.push_back(KeystrokeEvent::after(delay, Keystroke::Char(c))),
    }
}

fn uniform<R: Rng>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    if hi > lo {
        rng.gen_range(lo..=hi)
    } else {
        lo
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Lazy keystroke stream returned by [`TypingSimulator::type_content`]
pub struct Keystrokes<'a, R: Rng> {
    sim: &'a mut TypingSimulator<R>,
    chars: Chars<'a>,
    prev: Option<char>,
    wpm: f64,
    typo_probability: f64,
    pending: VecDeque<KeystrokeEvent>,
    finished: bool,
}

impl<R: Rng> Iterator for Keystrokes<'_, R> {
    type Item = KeystrokeEvent;

    fn next(&mut self) -> Option<KeystrokeEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }
            if self.sim.cancel.is_cancelled() {
                debug!(typed = self.sim.chars_typed, "typing cancelled");
                self.finished = true;
                return None;
            }

            let Some(c) = self.chars.next() else {
                self.finished = true;
                return None;
            };
            // the editor owns line endings
            if c == '\r' {
                continue;
            }

            let prev = self.prev.replace(c);
            self.sim
                .schedule(c, prev, self.wpm, self.typo_probability, &mut self.pending);
        }
    }
}
