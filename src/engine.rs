use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::actuator::Actuator;
use crate::config::EngineSettings;
use crate::error::{ActuatorError, FailureKind, ReplayError};
use crate::keyboard::Key;
use crate::overrides::ScopedOverride;
use crate::runtime::{CancelToken, Sleeper};
use crate::session::{FileChange, LineShift, Operation, OperationKind, ReplaySession, TypingStyle};
use crate::typing::{Keystroke, TypingSimulator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ReplayState {
    NotStarted,
    Running,
    Completed,
    Aborted,
    Failed,
}

/// How a replay that did not fail ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ReplayOutcome {
    Completed,
    Cancelled,
}

impl ReplayOutcome {
    pub fn failure_kind(self) -> Option<FailureKind> {
        match self {
            ReplayOutcome::Completed => None,
            ReplayOutcome::Cancelled => Some(FailureKind::Cancelled),
        }
    }
}

/// Snapshot handed to the progress callback before each operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub message: String,
    pub current: usize,
    pub total: usize,
}

/// Why a run stopped early
enum Halt {
    Cancelled,
    Failed(ReplayError),
}

impl From<ReplayError> for Halt {
    fn from(err: ReplayError) -> Self {
        Halt::Failed(err)
    }
}

impl From<ActuatorError> for Halt {
    fn from(err: ActuatorError) -> Self {
        Halt::Failed(err.into())
    }
}

/// Drives replay sessions against an actuator, one session at a time
pub struct ReplayEngine<A: Actuator, R: Rng, S: Sleeper> {
    actuator: A,
    simulator: TypingSimulator<R>,
    sleeper: S,
    settings: EngineSettings,
    state: ReplayState,
}

impl<A: Actuator, R: Rng, S: Sleeper> ReplayEngine<A, R, S> {
    pub fn new(actuator: A, simulator: TypingSimulator<R>, sleeper: S) -> Self {
        Self {
            actuator,
            simulator,
            sleeper,
            settings: EngineSettings::default(),
            state: ReplayState::NotStarted,
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn simulator(&self) -> &TypingSimulator<R> {
        &self.simulator
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.simulator.cancel_token()
    }

    /// Replay every file of `session` in order.
    ///
    /// Session overrides are installed for this call only and are restored
    /// before returning, whether the run completes, fails or is cancelled.
    pub fn execute(
        &mut self,
        session: &ReplaySession,
        progress: Option<&mut dyn FnMut(&Progress)>,
    ) -> Result<ReplayOutcome, ReplayError> {
        info!(
            id = %session.id,
            files = session.files.len(),
            operations = session.total_operations(),
            "starting replay"
        );
        self.simulator.reset();
        self.actuator.reset_cancel();
        self.state = ReplayState::Running;

        let result = match session.validate().into_iter().next() {
            Some(violation) => Err(Halt::Failed(ReplayError::Validation(violation.to_string()))),
            None => match ScopedOverride::apply(&mut self.simulator, &session.config) {
                Err(err) => Err(Halt::Failed(err.into())),
                Ok(simulator) => {
                    let cancel = simulator.cancel_token();
                    let mut run = Run {
                        actuator: &mut self.actuator,
                        simulator,
                        sleeper: &self.sleeper,
                        settings: &self.settings,
                        cancel,
                        progress,
                        done: 0,
                        total: session.total_operations(),
                    };
                    run.session(session)
                }
            },
        };

        match result {
            Ok(()) => {
                self.state = ReplayState::Completed;
                info!(id = %session.id, "replay completed");
                Ok(ReplayOutcome::Completed)
            }
            Err(Halt::Cancelled) => {
                self.actuator.request_cancel();
                self.state = ReplayState::Aborted;
                info!(id = %session.id, "replay cancelled");
                Ok(ReplayOutcome::Cancelled)
            }
            Err(Halt::Failed(err)) => {
                self.state = ReplayState::Failed;
                error!(id = %session.id, kind = %err.kind(), %err, "replay failed");
                Err(err)
            }
        }
    }
}

/// Borrowed state of one `execute` call
struct Run<'e, 'p, A, R: Rng, S> {
    actuator: &'e mut A,
    simulator: ScopedOverride<'e, R>,
    sleeper: &'e S,
    settings: &'e EngineSettings,
    cancel: CancelToken,
    progress: Option<&'p mut dyn FnMut(&Progress)>,
    done: usize,
    total: usize,
}

impl<A: Actuator, R: Rng, S: Sleeper> Run<'_, '_, A, R, S> {
    fn checkpoint(&self) -> Result<(), Halt> {
        if self.cancel.is_cancelled() {
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    fn wait(&self, duration: std::time::Duration) -> Result<(), Halt> {
        self.sleeper.sleep(duration, &self.cancel);
        self.checkpoint()
    }

    fn report(&mut self, message: String) {
        self.done += 1;
        if let Some(callback) = self.progress.as_deref_mut() {
            callback(&Progress {
                message,
                current: self.done,
                total: self.total,
            });
        }
    }

    fn session(&mut self, session: &ReplaySession) -> Result<(), Halt> {
        let mut open: Option<&str> = None;

        for file in &session.files {
            self.checkpoint()?;
            if open != Some(file.path.as_str()) {
                if open.is_some() {
                    if let Some(pause) = self.simulator.file_switch_pause() {
                        debug!(secs = pause.as_secs_f64(), "pausing before next file");
                        self.wait(pause)?;
                    }
                }
                self.open_with_retry(&file.path)?;
                open = Some(file.path.as_str());
            }

            self.file(file)?;

            if !self.actuator.save()? {
                let message = format!("save of `{}` refused", file.path);
                return Err(ReplayError::operation(message).into());
            }
            debug!(path = %file.path, "saved");
        }
        Ok(())
    }

    fn open_with_retry(&mut self, path: &str) -> Result<(), Halt> {
        let attempts = self.settings.file_open_retries + 1;
        for attempt in 1..=attempts {
            self.checkpoint()?;
            match self.actuator.open_file(path) {
                Ok(true) => {
                    info!(path, attempt, "opened file");
                    return Ok(());
                }
                Ok(false) => warn!(path, attempt, attempts, "editor did not open file"),
                Err(err) => warn!(path, attempt, attempts, %err, "error opening file"),
            }
            if attempt < attempts {
                self.wait(self.settings.file_open_backoff())?;
            }
        }
        Err(ReplayError::FileOpen {
            path: path.to_string(),
            attempts,
        }
        .into())
    }

    fn file(&mut self, file: &FileChange) -> Result<(), Halt> {
        info!(path = %file.path, operations = file.operations.len(), "replaying file");
        let mut shift = LineShift::new();

        for op in &file.operations {
            self.checkpoint()?;
            self.report(format!("{} line {} of {}", op.kind, op.line, file.path));

            match op.kind {
                OperationKind::Navigate => self.goto(op.line)?,
                OperationKind::Delete => {
                    let (start, end) = shift.rebase_delete(op).ok_or_else(|| {
                        ReplayError::operation(format!(
                            "delete of lines {}-{} in `{}` falls before the document start",
                            op.line,
                            op.end_line(),
                            file.path
                        ))
                    })?;
                    debug!(start, end, "deleting lines");
                    if !self.actuator.delete_lines(start, end)? {
                        return Err(ReplayError::operation(format!(
                            "delete of lines {start}-{end} in `{}` refused",
                            file.path
                        ))
                        .into());
                    }
                }
                OperationKind::Insert => self.insert(op, &file.path, &mut shift)?,
            }
        }
        Ok(())
    }

    fn goto(&mut self, line: usize) -> Result<(), Halt> {
        if self.actuator.goto_line(line)? {
            Ok(())
        } else {
            Err(ReplayError::operation(format!("go to line {line} refused")).into())
        }
    }

    fn insert(&mut self, op: &Operation, path: &str, shift: &mut LineShift) -> Result<(), Halt> {
        let content = op.content.as_deref().unwrap_or_default();
        if content.is_empty() {
            warn!(path, line = op.line, "skipping insert without content");
            return Ok(());
        }

        self.goto(op.line)?;
        self.wait(self.settings.insert_settle())?;
        debug!(line = op.line, chars = content.chars().count(), style = ?op.style, "typing");
        self.type_text(content, op.style)?;
        shift.record_insert(op);
        Ok(())
    }

    fn type_text(&mut self, content: &str, style: Option<TypingStyle>) -> Result<(), Halt> {
        let overrides = style
            .map(|s| s.overrides(self.simulator.config()))
            .unwrap_or_default();

        for event in self.simulator.type_content(content, overrides) {
            // keep emitting what the simulator already scheduled
            self.sleeper.sleep(event.delay, &self.cancel);
            match event.action {
                Keystroke::Char(c) => self.actuator.emit_char(c)?,
                Keystroke::Backspace => self.actuator.emit_control_key(Key::BackSpace)?,
                Keystroke::Key(key) => self.actuator.emit_control_key(key)?,
                Keystroke::Combo(keys) => self.actuator.emit_combo(&keys)?,
            }
        }
        self.checkpoint()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::actuator::{ActuatorCall, RecordingActuator};
    use crate::config::TypingConfig;
    use crate::runtime::RecordingSleeper;
    use crate::session::{ReplayConfig, SessionBuilder};

    type TestEngine = ReplayEngine<RecordingActuator, StdRng, RecordingSleeper>;

    fn engine(actuator: RecordingActuator) -> (TestEngine, RecordingSleeper) {
        let sleeper = RecordingSleeper::new();
        let sim = TypingSimulator::new(StdRng::seed_from_u64(42), TypingConfig::default());
        (ReplayEngine::new(actuator, sim, sleeper.clone()), sleeper)
    }

    fn quiet() -> ReplayConfig {
        ReplayConfig {
            typo_probability: Some(0.0),
            thinking_pauses_enabled: Some(false),
            ..ReplayConfig::default()
        }
    }

    fn session(files: Vec<FileChange>) -> ReplaySession {
        SessionBuilder::new("tester", "engine test")
            .id("session_test")
            .config(quiet())
            .build(files)
    }

    fn file(path: &str, ops: Vec<Operation>) -> FileChange {
        FileChange {
            path: path.to_string(),
            operations: ops,
        }
    }

    #[test]
    fn replays_files_in_order() {
        let (mut engine, _) = engine(RecordingActuator::new());
        let s = session(vec![
            file(
                "a.rs",
                vec![Operation::delete(2, 3), Operation::insert(2, "x\n")],
            ),
            file("b.rs", vec![Operation::insert(1, "y")]),
        ]);

        let outcome = engine.execute(&s, None).unwrap();
        assert_eq!(outcome, ReplayOutcome::Completed);
        assert_eq!(engine.state(), ReplayState::Completed);
        assert_eq!(
            engine.actuator().calls,
            vec![
                ActuatorCall::ResetCancel,
                ActuatorCall::Open("a.rs".into()),
                ActuatorCall::Delete(2, 3),
                ActuatorCall::Goto(2),
                ActuatorCall::Char('x'),
                ActuatorCall::Control(Key::Return),
                ActuatorCall::Control(Key::Home),
                ActuatorCall::Combo(vec![Key::Shift, Key::End]),
                ActuatorCall::Control(Key::Delete),
                ActuatorCall::Save,
                ActuatorCall::Open("b.rs".into()),
                ActuatorCall::Goto(1),
                ActuatorCall::Char('y'),
                ActuatorCall::Save,
            ]
        );
    }

    #[test]
    fn later_deletes_are_rebased_by_earlier_edits() {
        let (mut engine, _) = engine(RecordingActuator::new());
        let s = session(vec![file(
            "a.rs",
            vec![
                Operation::delete(2, 2),
                Operation::insert(2, "a\nb\n"),
                Operation::delete(10, 11),
                Operation::navigate(4),
            ],
        )]);
        engine.execute(&s, None).unwrap();
        let calls = &engine.actuator().calls;
        assert!(calls.contains(&ActuatorCall::Delete(2, 2)));
        assert!(calls.contains(&ActuatorCall::Delete(11, 12)));
        assert!(calls.contains(&ActuatorCall::Goto(4)));
    }

    #[test]
    fn overrides_are_restored_after_completion() {
        let (mut engine, _) = engine(RecordingActuator::new());
        let mut s = session(vec![file("a.rs", vec![Operation::insert(1, "abc")])]);
        s.config.base_wpm = Some(300.0);

        engine.execute(&s, None).unwrap();
        assert_eq!(engine.simulator().config(), &TypingConfig::default());
    }

    #[test]
    fn open_retries_then_succeeds() {
        let (mut engine, sleeper) = engine(RecordingActuator::new().failing_opens("a.rs", 1));
        let s = session(vec![file("a.rs", vec![Operation::navigate(1)])]);

        assert_eq!(engine.execute(&s, None).unwrap(), ReplayOutcome::Completed);
        assert_eq!(
            engine
                .actuator()
                .count(|c| matches!(c, ActuatorCall::Open(_))),
            2
        );
        assert_eq!(sleeper.waits(), vec![Duration::from_millis(500)]);
    }

    #[test]
    fn exhausted_opens_fail_the_session() {
        let (mut engine, _) = engine(RecordingActuator::new().failing_opens("a.rs", 5));
        let mut s = session(vec![
            file("a.rs", vec![Operation::insert(1, "x")]),
            file("b.rs", vec![Operation::insert(1, "y")]),
        ]);
        s.config.base_wpm = Some(30.0);

        let err = engine.execute(&s, None).unwrap_err();
        assert_eq!(err.kind(), FailureKind::FileOpenExhausted);
        assert!(matches!(err, ReplayError::FileOpen { attempts: 2, .. }));
        assert_eq!(engine.state(), ReplayState::Failed);
        assert!(!engine.actuator().calls.contains(&ActuatorCall::Save));
        assert!(!engine
            .actuator()
            .calls
            .contains(&ActuatorCall::Open("b.rs".into())));
        assert_eq!(engine.simulator().config(), &TypingConfig::default());
    }

    #[test]
    fn open_errors_are_retried_like_refusals() {
        let s = session(vec![file("a.rs", vec![Operation::navigate(1)])]);

        let (mut recovering, sleeper) =
            engine(RecordingActuator::new().erroring_opens("a.rs", 1));
        assert_eq!(recovering.execute(&s, None).unwrap(), ReplayOutcome::Completed);
        assert_eq!(sleeper.waits(), vec![Duration::from_millis(500)]);

        let (mut failing, sleeper) = engine(RecordingActuator::new().erroring_opens("a.rs", 5));
        let err = failing.execute(&s, None).unwrap_err();
        assert_eq!(err.kind(), FailureKind::FileOpenExhausted);
        assert!(matches!(err, ReplayError::FileOpen { attempts: 2, .. }));
        assert_eq!(
            failing
                .actuator()
                .count(|c| matches!(c, ActuatorCall::Open(_))),
            2
        );
        assert_eq!(sleeper.waits(), vec![Duration::from_millis(500)]);
        assert_eq!(failing.state(), ReplayState::Failed);
    }

    #[test]
    fn cancellation_mid_insert_stops_within_a_character() {
        let sim = TypingSimulator::new(StdRng::seed_from_u64(1), TypingConfig::default());
        let token = sim.cancel_token();
        let sleeper = RecordingSleeper::new();
        let actuator = RecordingActuator::new().cancelling_after(3, token);
        let mut engine = ReplayEngine::new(actuator, sim, sleeper);

        let mut s = session(vec![
            file("a.rs", vec![Operation::insert(1, "abcdefgh\n")]),
            file("b.rs", vec![Operation::insert(1, "never")]),
        ]);
        s.config.wpm_variance = Some(0.5);

        let outcome = engine.execute(&s, None).unwrap();
        assert_eq!(outcome, ReplayOutcome::Cancelled);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(engine.state(), ReplayState::Aborted);
        assert_eq!(engine.actuator().typed(), "abc");
        assert_eq!(
            engine.actuator().calls.last(),
            Some(&ActuatorCall::RequestCancel)
        );
        assert!(!engine.actuator().calls.contains(&ActuatorCall::Save));
        assert_eq!(engine.simulator().config(), &TypingConfig::default());
    }

    #[test]
    fn engine_can_run_again_after_cancellation() {
        let sim = TypingSimulator::new(StdRng::seed_from_u64(1), TypingConfig::default());
        let token = sim.cancel_token();
        let mut engine = ReplayEngine::new(RecordingActuator::new(), sim, RecordingSleeper::new());
        token.cancel();

        let s = session(vec![file("a.rs", vec![Operation::insert(1, "ok")])]);
        assert_eq!(engine.execute(&s, None).unwrap(), ReplayOutcome::Completed);
        assert_eq!(engine.actuator().typed(), "ok");
    }

    #[test]
    fn empty_insert_is_skipped() {
        let (mut engine, _) = engine(RecordingActuator::new());
        let s = session(vec![file(
            "a.rs",
            vec![Operation::insert(3, ""), Operation::navigate(1)],
        )]);
        engine.execute(&s, None).unwrap();
        assert!(!engine.actuator().calls.contains(&ActuatorCall::Goto(3)));
        assert!(engine.actuator().calls.contains(&ActuatorCall::Goto(1)));
    }

    #[test]
    fn refused_save_is_an_operation_error() {
        let (mut engine, _) = engine(RecordingActuator::new().refusing_save());
        let s = session(vec![file("a.rs", vec![Operation::navigate(1)])]);
        let err = engine.execute(&s, None).unwrap_err();
        assert_eq!(err.kind(), FailureKind::OperationExecution);
    }

    #[test]
    fn refused_goto_is_an_operation_error() {
        let (mut engine, _) = engine(RecordingActuator::new().refusing_goto());
        let s = session(vec![file("a.rs", vec![Operation::insert(1, "x")])]);
        let err = engine.execute(&s, None).unwrap_err();
        assert_eq!(err.kind(), FailureKind::OperationExecution);
        assert_eq!(engine.actuator().typed(), "");
    }

    #[test]
    fn invalid_merged_config_is_a_validation_error() {
        let (mut engine, _) = engine(RecordingActuator::new());
        let mut s = session(vec![file("a.rs", vec![Operation::navigate(1)])]);
        s.config.thinking_pause_min = Some(20.0);

        let err = engine.execute(&s, None).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);
        assert!(!engine
            .actuator()
            .calls
            .contains(&ActuatorCall::Open("a.rs".into())));
        assert_eq!(engine.simulator().config(), &TypingConfig::default());
    }

    #[test]
    fn file_switch_pause_only_between_files() {
        let (mut engine, sleeper) = engine(RecordingActuator::new());
        let mut s = session(vec![
            file("a.rs", vec![Operation::insert(1, "x")]),
            file("b.rs", vec![Operation::insert(1, "y")]),
        ]);
        s.config.thinking_pauses_enabled = Some(true);
        s.config.thinking_pause_probability = Some(0.0);

        engine.execute(&s, None).unwrap();
        let long: Vec<_> = sleeper
            .waits()
            .into_iter()
            .filter(|w| *w >= Duration::from_secs(1))
            .collect();
        assert_eq!(long.len(), 1);
        assert!(long[0] <= Duration::from_secs(3));
    }

    #[test]
    fn progress_reports_every_operation() {
        let (mut engine, _) = engine(RecordingActuator::new());
        let s = session(vec![
            file("a.rs", vec![Operation::delete(1, 1), Operation::navigate(2)]),
            file("b.rs", vec![Operation::insert(1, "z")]),
        ]);
        let mut seen = Vec::new();
        let mut callback = |p: &Progress| seen.push((p.current, p.total));
        engine.execute(&s, Some(&mut callback)).unwrap();
        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn styles_change_typing_speed() {
        let (mut engine, sleeper) = engine(RecordingActuator::new());
        let mut s = session(vec![file(
            "a.rs",
            vec![Operation::insert(1, "aaaa").with_style(TypingStyle::Slow)],
        )]);
        s.config.wpm_variance = Some(0.0);
        s.config.fatigue_factor = Some(0.0);
        engine.execute(&s, None).unwrap();

        let slow_key = 60.0 / (85.0 * 0.7 * 5.0);
        let waits = sleeper.waits();
        // settle delay first, then one wait per key
        assert_eq!(waits[0], Duration::from_millis(100));
        for w in &waits[1..] {
            assert!((w.as_secs_f64() - slow_key).abs() < 1e-6);
        }
    }
}
