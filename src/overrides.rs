use std::ops::{Deref, DerefMut};

use rand::Rng;
use tracing::debug;

use crate::config::TypingConfig;
use crate::error::ConfigError;
use crate::session::ReplayConfig;
use crate::typing::TypingSimulator;

/// A single typing setting together with its value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Setting {
    BaseWpm(f64),
    WpmVariance(f64),
    TypoProbability(f64),
    TypoCorrectionProbability(f64),
    ThinkingPauseProbability(f64),
    ThinkingPauseMin(f64),
    ThinkingPauseMax(f64),
    FatigueFactor(f64),
    BigramAcceleration(bool),
    BigramFactor(f64),
    ThinkingPausesEnabled(bool),
}

impl Setting {
    /// Write this setting into `cfg`, returning the value it replaced
    fn swap_into(self, cfg: &mut TypingConfig) -> Setting {
        match self {
            Setting::BaseWpm(v) => Setting::BaseWpm(std::mem::replace(&mut cfg.base_wpm, v)),
            Setting::WpmVariance(v) => {
                Setting::WpmVariance(std::mem::replace(&mut cfg.wpm_variance, v))
            }
            Setting::TypoProbability(v) => {
                Setting::TypoProbability(std::mem::replace(&mut cfg.typo_probability, v))
            }
            Setting::TypoCorrectionProbability(v) => Setting::TypoCorrectionProbability(
                std::mem::replace(&mut cfg.typo_correction_probability, v),
            ),
            Setting::ThinkingPauseProbability(v) => Setting::ThinkingPauseProbability(
                std::mem::replace(&mut cfg.thinking_pause_probability, v),
            ),
            Setting::ThinkingPauseMin(v) => {
                Setting::ThinkingPauseMin(std::mem::replace(&mut cfg.thinking_pause_min, v))
            }
            Setting::ThinkingPauseMax(v) => {
                Setting::ThinkingPauseMax(std::mem::replace(&mut cfg.thinking_pause_max, v))
            }
            Setting::FatigueFactor(v) => {
                Setting::FatigueFactor(std::mem::replace(&mut cfg.fatigue_factor, v))
            }
            Setting::BigramAcceleration(v) => {
                Setting::BigramAcceleration(std::mem::replace(&mut cfg.bigram_acceleration, v))
            }
            Setting::BigramFactor(v) => {
                Setting::BigramFactor(std::mem::replace(&mut cfg.bigram_factor, v))
            }
            Setting::ThinkingPausesEnabled(v) => Setting::ThinkingPausesEnabled(
                std::mem::replace(&mut cfg.thinking_pauses_enabled, v),
            ),
        }
    }
}

fn requested(overrides: &ReplayConfig) -> Vec<Setting> {
    let ReplayConfig {
        base_wpm,
        wpm_variance,
        typo_probability,
        typo_correction_probability,
        thinking_pause_probability,
        thinking_pause_min,
        thinking_pause_max,
        fatigue_factor,
        bigram_acceleration,
        bigram_factor,
        thinking_pauses_enabled,
    } = overrides;

    [
        base_wpm.map(Setting::BaseWpm),
        wpm_variance.map(Setting::WpmVariance),
        typo_probability.map(Setting::TypoProbability),
        typo_correction_probability.map(Setting::TypoCorrectionProbability),
        thinking_pause_probability.map(Setting::ThinkingPauseProbability),
        thinking_pause_min.map(Setting::ThinkingPauseMin),
        thinking_pause_max.map(Setting::ThinkingPauseMax),
        fatigue_factor.map(Setting::FatigueFactor),
        bigram_acceleration.map(Setting::BigramAcceleration),
        bigram_factor.map(Setting::BigramFactor),
        thinking_pauses_enabled.map(Setting::ThinkingPausesEnabled),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Overlay the explicitly set session fields onto `base`.
///
/// Returns the merged configuration and the undo list: the previous value of
/// every field that was overridden, in the order they were applied.
pub fn merge(base: &TypingConfig, overrides: &ReplayConfig) -> (TypingConfig, Vec<Setting>) {
    let mut merged = base.clone();
    let undo = requested(overrides)
        .into_iter()
        .map(|setting| setting.swap_into(&mut merged))
        .collect();
    (merged, undo)
}

/// Replay an undo list produced by [`merge`]
pub fn restore(cfg: &mut TypingConfig, undo: Vec<Setting>) {
    for setting in undo.into_iter().rev() {
        setting.swap_into(cfg);
    }
}

/// Session overrides installed on a simulator for as long as this guard
/// lives. Dropping it restores every overridden field, whichever way the
/// scope is left.
pub struct ScopedOverride<'a, R: Rng> {
    simulator: &'a mut TypingSimulator<R>,
    undo: Vec<Setting>,
}

impl<'a, R: Rng> ScopedOverride<'a, R> {
    pub fn apply(
        simulator: &'a mut TypingSimulator<R>,
        overrides: &ReplayConfig,
    ) -> Result<Self, ConfigError> {
        let (merged, undo) = merge(simulator.config(), overrides);
        merged.validate()?;
        debug!(overridden = undo.len(), "applying session overrides");
        simulator.set_config(merged);
        Ok(Self { simulator, undo })
    }
}

impl<R: Rng> Deref for ScopedOverride<'_, R> {
    type Target = TypingSimulator<R>;

    fn deref(&self) -> &Self::Target {
        &*self.simulator
    }
}

impl<R: Rng> DerefMut for ScopedOverride<'_, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.simulator
    }
}

impl<R: Rng> Drop for ScopedOverride<'_, R> {
    fn drop(&mut self) {
        let undo = std::mem::take(&mut self.undo);
        restore(self.simulator.config_mut(), undo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn merge_only_touches_set_fields() {
        let base = TypingConfig::default();
        let overrides = ReplayConfig {
            base_wpm: Some(40.0),
            thinking_pauses_enabled: Some(false),
            ..ReplayConfig::default()
        };
        let (merged, undo) = merge(&base, &overrides);

        assert_eq!(merged.base_wpm, 40.0);
        assert!(!merged.thinking_pauses_enabled);
        assert_eq!(merged.typo_probability, base.typo_probability);
        assert_eq!(
            undo,
            vec![Setting::BaseWpm(85.0), Setting::ThinkingPausesEnabled(true)]
        );
    }

    #[test]
    fn empty_overrides_produce_empty_undo() {
        let base = TypingConfig::default();
        let (merged, undo) = merge(&base, &ReplayConfig::default());
        assert_eq!(merged, base);
        assert!(undo.is_empty());
    }

    #[test]
    fn restore_returns_to_base() {
        let base = TypingConfig::default();
        let overrides = ReplayConfig {
            typo_probability: Some(0.5),
            fatigue_factor: Some(0.01),
            bigram_acceleration: Some(false),
            ..ReplayConfig::default()
        };
        let (mut merged, undo) = merge(&base, &overrides);
        restore(&mut merged, undo);
        assert_eq!(merged, base);
    }

    #[test]
    fn guard_restores_on_drop() {
        let mut sim = TypingSimulator::new(StdRng::seed_from_u64(1), TypingConfig::default());
        {
            let scoped = ScopedOverride::apply(
                &mut sim,
                &ReplayConfig {
                    base_wpm: Some(200.0),
                    ..ReplayConfig::default()
                },
            )
            .unwrap();
            assert_eq!(scoped.config().base_wpm, 200.0);
        }
        assert_eq!(sim.config(), &TypingConfig::default());
    }

    #[test]
    fn guard_rejects_invalid_merge_without_touching_simulator() {
        let mut sim = TypingSimulator::new(StdRng::seed_from_u64(1), TypingConfig::default());
        // Only the minimum is overridden; it ends up above the default maximum
        let err = ScopedOverride::apply(
            &mut sim,
            &ReplayConfig {
                thinking_pause_min: Some(20.0),
                ..ReplayConfig::default()
            },
        )
        .err();
        assert!(matches!(err, Some(ConfigError::PauseRange { .. })));
        assert_eq!(sim.config(), &TypingConfig::default());
    }
}
