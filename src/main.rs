use std::error::Error;
use std::fs;
use std::io::{self, stdin, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::tty::IsTty;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use retype::app_dirs::AppDirs;
use retype::compiler::DiffCompiler;
use retype::config::{Config, ConfigStore, FileConfigStore};
use retype::engine::{ReplayEngine, ReplayOutcome};
use retype::error::{FailureKind, ReplayError};
use retype::git;
use retype::overrides;
use retype::runtime::{CrosstermKeySource, KeyWatcher, RecordingSleeper, Sleeper, ThreadSleeper};
use retype::session::{
    load_session, FileChange, OperationKind, ReplayConfig, ReplaySession, SessionBuilder,
    TypingStyle,
};
use retype::terminal::TerminalActuator;
use retype::typing::TypingSimulator;
use retype::util::{format_duration, DelayStats};

/// compile unified diffs into edit sessions and replay them with human-like typing
#[derive(Parser, Debug)]
#[clap(version, about)]
struct Cli {
    /// log debug output to stderr
    #[clap(short, long, global = true)]
    verbose: bool,

    /// config file to use instead of the platform default
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// compile a diff into a session file
    Capture(CaptureArgs),
    /// list every problem in a session file
    Validate {
        session: PathBuf,
    },
    /// summarize a session and estimate how long replaying it takes
    Preview {
        session: PathBuf,
        /// seed for the timing estimate
        #[clap(long, default_value_t = 0)]
        seed: u64,
    },
    /// replay a session in the terminal; Esc cancels
    Replay {
        session: PathBuf,
        /// seed for reproducible timing and typos
        #[clap(long)]
        seed: Option<u64>,
        /// skip every wait
        #[clap(long)]
        instant: bool,
    },
}

#[derive(clap::Args, Debug)]
#[clap(group(ArgGroup::new("source").required(true).args(["diff", "commit"])))]
struct CaptureArgs {
    /// diff to read, `-` for stdin
    #[clap(short, long)]
    diff: Option<String>,

    /// git commit (`git show`) or range `A..B` (`git diff`) to capture
    #[clap(short, long)]
    commit: Option<String>,

    /// repository to run git in (default: current directory)
    #[clap(long, requires = "commit")]
    repo: Option<PathBuf>,

    /// owner tag stored in the session
    #[clap(long)]
    owner: String,

    /// free-form memo stored in the session
    #[clap(short, long)]
    memo: String,

    /// session id (default: session_<UTC timestamp>)
    #[clap(long)]
    id: Option<String>,

    /// output file (default: .replay/<id>.json)
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// print the session instead of writing it
    #[clap(long)]
    dry_run: bool,

    /// typing speed written into the session
    #[clap(long)]
    wpm: Option<f64>,

    /// typo probability written into the session (0.0-1.0)
    #[clap(long)]
    typo_prob: Option<f64>,

    /// disable thinking pauses during replay
    #[clap(long)]
    no_pauses: bool,

    /// typing style for every insert
    #[clap(long, value_enum)]
    style: Option<CliStyle>,

    /// pre-image to apply the compiled operations to
    #[clap(long, requires = "file")]
    check: Option<PathBuf>,

    /// session path whose on-disk content the checked result must match
    #[clap(long, requires = "check")]
    file: Option<String>,
}

#[derive(Debug, Copy, Clone, ValueEnum, strum_macros::Display)]
enum CliStyle {
    Fast,
    Slow,
    Precise,
}

impl CliStyle {
    fn as_style(self) -> TypingStyle {
        match self {
            CliStyle::Fast => TypingStyle::Fast,
            CliStyle::Slow => TypingStyle::Slow,
            CliStyle::Precise => TypingStyle::Precise,
        }
    }
}

type CliResult = Result<ExitCode, Box<dyn Error>>;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "retype=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    let store = match &cli.config {
        Some(path) => FileConfigStore::with_path(path),
        None => FileConfigStore::new(),
    };

    let result = match cli.command {
        Command::Capture(args) => capture(args),
        Command::Validate { session } => validate(&session),
        Command::Preview { session, seed } => preview(&session, seed, &store.load()),
        Command::Replay {
            session,
            seed,
            instant,
        } => replay(&session, seed, instant, &store.load()),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn exit_code(kind: FailureKind) -> ExitCode {
    match kind {
        FailureKind::SessionNotFound | FailureKind::Parse | FailureKind::Validation => {
            ExitCode::from(2)
        }
        FailureKind::FileOpenExhausted | FailureKind::OperationExecution => ExitCode::FAILURE,
        FailureKind::Cancelled => ExitCode::from(130),
    }
}

fn read_diff(args: &CaptureArgs) -> Result<String, Box<dyn Error>> {
    match (&args.diff, &args.commit) {
        (Some(source), _) if source == "-" => {
            let mut text = String::new();
            stdin().read_to_string(&mut text)?;
            Ok(text)
        }
        (Some(source), _) => Ok(fs::read_to_string(source)?),
        (None, Some(rev)) => Ok(git::diff_for(rev, args.repo.as_deref())?),
        (None, None) => Err("either --diff or --commit is required".into()),
    }
}

fn capture_config(args: &CaptureArgs) -> Result<ReplayConfig, String> {
    if let Some(wpm) = args.wpm {
        if !(1.0..=300.0).contains(&wpm) {
            warn!(wpm, "unusual wpm value");
        }
    }
    if let Some(p) = args.typo_prob {
        if !(0.0..=1.0).contains(&p) {
            return Err(format!("--typo-prob must be between 0 and 1, got {p}"));
        }
    }
    Ok(ReplayConfig {
        base_wpm: args.wpm,
        typo_probability: args.typo_prob,
        thinking_pauses_enabled: args.no_pauses.then_some(false),
        ..ReplayConfig::default()
    })
}

fn check_round_trip(
    files: &[FileChange],
    pre: &Path,
    path: &str,
) -> Result<bool, Box<dyn Error>> {
    let change = files
        .iter()
        .find(|f| f.path == path)
        .ok_or_else(|| format!("no compiled changes for `{path}`"))?;
    let produced = change.apply_to(&fs::read_to_string(pre)?)?;
    let expected = fs::read_to_string(path)?;
    Ok(produced == expected)
}

fn print_summary(session: &ReplaySession) {
    println!("Session summary:");
    println!("  id:         {}", session.id);
    println!("  owner:      {}", session.owner_tag);
    println!("  memo:       {}", session.memo);
    println!("  files:      {}", session.files.len());
    println!("  operations: {}", session.total_operations());
    for file in &session.files {
        let counts = file.operations.iter().counts_by(|op| op.kind);
        println!(
            "  {}: +{} -{}",
            file.path,
            counts.get(&OperationKind::Insert).unwrap_or(&0),
            counts.get(&OperationKind::Delete).unwrap_or(&0)
        );
    }
}

fn capture(args: CaptureArgs) -> CliResult {
    let text = read_diff(&args)?;
    let compilation = DiffCompiler::compile(&text)?;
    for warning in &compilation.warnings {
        eprintln!("warning: {warning}");
    }
    if compilation.files.is_empty() {
        eprintln!("no file changes to capture");
        return Ok(ExitCode::FAILURE);
    }

    if let (Some(pre), Some(path)) = (&args.check, &args.file) {
        if !check_round_trip(&compilation.files, pre, path)? {
            eprintln!(
                "check failed: replaying onto {} does not reproduce `{path}`",
                pre.display()
            );
            return Ok(ExitCode::FAILURE);
        }
        eprintln!("check passed for `{path}`");
    }

    let mut files = compilation.files;
    if let Some(style) = args.style {
        for op in files.iter_mut().flat_map(|f| f.operations.iter_mut()) {
            if op.kind == OperationKind::Insert {
                op.style = Some(style.as_style());
            }
        }
    }

    let mut builder =
        SessionBuilder::new(&args.owner, &args.memo).config(capture_config(&args)?);
    if let Some(id) = &args.id {
        builder = builder.id(id);
    }
    let session = builder.build(files);

    let violations = session.validate();
    if !violations.is_empty() {
        eprintln!("session validation errors:");
        for violation in &violations {
            eprintln!("  - {violation}");
        }
        return Ok(ExitCode::FAILURE);
    }

    let json = session.to_json_pretty()?;
    print_summary(&session);

    if args.dry_run {
        println!("{json}");
        return Ok(ExitCode::SUCCESS);
    }

    let output = match args.output {
        Some(path) => path,
        None => AppDirs::session_path(&std::env::current_dir()?, &session.id),
    };
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&output, json)?;
    info!(path = %output.display(), "session written");
    println!("Session written to {}", output.display());
    Ok(ExitCode::SUCCESS)
}

fn validate(path: &Path) -> CliResult {
    if !path.exists() {
        let err = ReplayError::SessionNotFound {
            path: path.to_path_buf(),
        };
        eprintln!("error: {err}");
        return Ok(exit_code(err.kind()));
    }
    let text = fs::read_to_string(path)?;
    let session: ReplaySession = match serde_json::from_str(&text) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("error: {err}");
            return Ok(exit_code(FailureKind::Parse));
        }
    };

    let violations = session.validate();
    if violations.is_empty() {
        println!("{}: ok ({} operations)", path.display(), session.total_operations());
        return Ok(ExitCode::SUCCESS);
    }
    println!("{}: {} problem(s)", path.display(), violations.len());
    for violation in &violations {
        println!("  - {violation}");
    }
    Ok(exit_code(FailureKind::Validation))
}

fn preview(path: &Path, seed: u64, config: &Config) -> CliResult {
    let session = match load_session(path) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("error: {err}");
            return Ok(exit_code(err.kind()));
        }
    };
    print_summary(&session);

    let (typing, _) = overrides::merge(&config.typing, &session.config);
    if let Err(err) = typing.validate() {
        eprintln!("error: invalid typing configuration: {err}");
        return Ok(exit_code(FailureKind::Validation));
    }
    let mut sim = TypingSimulator::new(StdRng::seed_from_u64(seed), typing);
    let settle = config.engine.insert_settle();

    let mut total = Duration::ZERO;
    let mut key_delays = Vec::new();
    for (i, file) in session.files.iter().enumerate() {
        if i > 0 {
            total = total.saturating_add(sim.file_switch_pause().unwrap_or_default());
        }
        for op in &file.operations {
            let Some(content) = op.content.as_deref().filter(|c| !c.is_empty()) else {
                continue;
            };
            total = total.saturating_add(settle);
            let call = op
                .style
                .map(|s| s.overrides(sim.config()))
                .unwrap_or_default();
            key_delays.extend(sim.type_content(content, call).map(|event| event.delay));
        }
    }

    let stats = DelayStats::of(&key_delays);
    if let Some(stats) = &stats {
        total = total.saturating_add(stats.total);
    }
    println!();
    println!("Estimated replay time: {}", format_duration(total));
    if let Some(stats) = stats {
        println!(
            "  {} keystrokes, {:.0} ms ± {:.0} ms each",
            stats.count,
            stats.mean * 1000.0,
            stats.std_dev * 1000.0
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn replay(path: &Path, seed: Option<u64>, instant: bool, config: &Config) -> CliResult {
    let session = match load_session(path) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("error: {err}");
            return Ok(exit_code(err.kind()));
        }
    };

    if instant {
        let sleeper = RecordingSleeper::new();
        let code = run_replay(&session, seed, sleeper.clone(), config)?;
        eprintln!("simulated typing time: {}", format_duration(sleeper.total()));
        Ok(code)
    } else {
        run_replay(&session, seed, ThreadSleeper::default(), config)
    }
}

fn run_replay<S: Sleeper>(
    session: &ReplaySession,
    seed: Option<u64>,
    sleeper: S,
    config: &Config,
) -> CliResult {
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let simulator = TypingSimulator::new(rng, config.typing.clone());
    let actuator = TerminalActuator::new(io::stdout());
    let mut engine =
        ReplayEngine::new(actuator, simulator, sleeper).with_settings(config.engine.clone());

    let interactive = stdin().is_tty();
    let watcher = if interactive {
        enable_raw_mode()?;
        Some(KeyWatcher::spawn(
            CrosstermKeySource::new(),
            engine.cancel_token(),
        ))
    } else {
        None
    };

    let result = engine.execute(session, None);

    drop(watcher);
    if interactive {
        disable_raw_mode()?;
    }
    println!();

    match result {
        Ok(ReplayOutcome::Completed) => {
            eprintln!("replay completed");
            Ok(ExitCode::SUCCESS)
        }
        Ok(ReplayOutcome::Cancelled) => {
            eprintln!("replay cancelled");
            Ok(exit_code(FailureKind::Cancelled))
        }
        Err(err) => {
            eprintln!("replay failed ({}): {err}", err.kind());
            Ok(exit_code(err.kind()))
        }
    }
}
