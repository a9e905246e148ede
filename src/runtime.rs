use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event as CtEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tracing::{debug, info};

/// Shared stop flag, checked cooperatively by the replay loop
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Re-arm the token for another run
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Blocking waits between replay steps
pub trait Sleeper {
    /// Wait for `duration`, returning early if `cancel` fires
    fn sleep(&self, duration: Duration, cancel: &CancelToken);
}

/// Real waits on the current thread, in slices short enough to notice
/// cancellation within one slice
#[derive(Clone, Copy, Debug)]
pub struct ThreadSleeper {
    slice: Duration,
}

impl ThreadSleeper {
    pub fn new(slice: Duration) -> Self {
        Self { slice }
    }
}

impl Default for ThreadSleeper {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) {
        // unrepresentable deadlines wait until cancelled
        let deadline = Instant::now().checked_add(duration);
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let step = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return;
                    }
                    self.slice.min(deadline - now)
                }
                None => self.slice,
            };
            std::thread::sleep(step);
        }
    }
}

/// Records requested waits without sleeping
#[derive(Clone, Debug, Default)]
pub struct RecordingSleeper {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Sum of every recorded wait, saturating at `Duration::MAX`
    pub fn total(&self) -> Duration {
        self.waits()
            .into_iter()
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, _cancel: &CancelToken) {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
    }
}

/// Source of terminal key presses
pub trait KeySource: Send + 'static {
    /// Block for up to `timeout` waiting for a key
    fn recv_timeout(&self, timeout: Duration) -> Result<KeyEvent, RecvTimeoutError>;
}

/// Key presses read from the terminal by a background thread
pub struct CrosstermKeySource {
    rx: Receiver<KeyEvent>,
}

impl CrosstermKeySource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || loop {
            match event::read() {
                Ok(CtEvent::Key(key)) => {
                    if tx.send(key).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        });

        Self { rx }
    }
}

impl Default for CrosstermKeySource {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySource for CrosstermKeySource {
    fn recv_timeout(&self, timeout: Duration) -> Result<KeyEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Key presses fed through a channel, for tests
pub struct ChannelKeySource {
    rx: Receiver<KeyEvent>,
}

impl ChannelKeySource {
    pub fn new(rx: Receiver<KeyEvent>) -> Self {
        Self { rx }
    }
}

impl KeySource for ChannelKeySource {
    fn recv_timeout(&self, timeout: Duration) -> Result<KeyEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

fn is_abort_key(key: &KeyEvent) -> bool {
    if key.kind == KeyEventKind::Release {
        return false;
    }
    match key.code {
        KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Background thread that cancels a token when the user presses Esc or
/// Ctrl+C. Stops when dropped or when its key source disconnects.
pub struct KeyWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl KeyWatcher {
    pub fn spawn<S: KeySource>(source: S, token: CancelToken) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let poll = Duration::from_millis(50);

        let handle = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                match source.recv_timeout(poll) {
                    Ok(key) if is_abort_key(&key) => {
                        info!("cancel requested from keyboard");
                        token.cancel();
                        break;
                    }
                    Ok(key) => debug!(code = ?key.code, "ignoring key"),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for KeyWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
