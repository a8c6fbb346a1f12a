//! Command-line entry point for the PDF unlock utility.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use pdf_unlock::{
    PasswordCandidate, SweepObserver, UnlockAttemptResult, UnlockConfig, UnlockEngine,
    UnlockOutcome, UnlockPool, UnlockRequest, UnlockedDocument,
};

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;
use std::time::{Duration, Instant};

const EXIT_USAGE: i32 = 1;
const EXIT_EXHAUSTED: i32 = 2;
const EXIT_STRUCTURAL: i32 = 3;
const EXIT_NEEDS_PASSWORD: i32 = 4;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
/// CLI arguments supported by pdf-unlock.
struct Cli {
    /// PDF files to unlock
    #[arg(short = 'i', long = "input", value_name = "PDF", required = true, num_args = 1..)]
    inputs: Vec<PathBuf>,

    /// Directory for unlocked copies
    #[arg(
        short = 'o',
        long = "output-dir",
        value_name = "DIR",
        default_value = ".",
        env = "PDF_UNLOCK_OUTPUT_DIR"
    )]
    output_dir: PathBuf,

    /// Password to open the documents with
    #[arg(short = 'p', long = "password", env = "PDF_UNLOCK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Try common and derived passwords when none works
    #[arg(short = 's', long = "sweep", action = ArgAction::SetTrue, env = "PDF_UNLOCK_SWEEP")]
    sweep: bool,

    /// Maximum number of candidate passwords per document
    #[arg(long = "max-candidates", default_value_t = 2_000, env = "PDF_UNLOCK_MAX_CANDIDATES")]
    max_candidates: usize,

    /// Wall-clock budget for the candidate sweep, in seconds
    #[arg(long = "time-budget-secs", default_value_t = 5, env = "PDF_UNLOCK_TIME_BUDGET_SECS")]
    time_budget_secs: u64,

    /// Number of documents processed concurrently
    #[arg(short = 't', long = "threads", default_value_t = 1, env = "PDF_UNLOCK_THREADS")]
    threads: usize,

    /// Log strategy attempts
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    verbose: bool,
}

/// Advances the progress bar once per candidate tried.
struct ProgressObserver {
    progress: ProgressBar,
}

impl SweepObserver for ProgressObserver {
    fn on_candidate(&self, _candidate: &PasswordCandidate) {
        self.progress.inc(1);
    }
}

fn main() {
    let args = Cli::parse();

    let default_filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if args.threads == 0 {
        eprintln!("Error: --threads must be at least 1.");
        exit(EXIT_USAGE);
    }
    if args.max_candidates == 0 {
        eprintln!("Error: --max-candidates must be at least 1.");
        exit(EXIT_USAGE);
    }

    match run(&args) {
        Ok(code) => exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit(EXIT_USAGE);
        }
    }
}

fn run(args: &Cli) -> Result<i32> {
    let start = Instant::now();

    let config = UnlockConfig::default().with_budget(
        args.max_candidates,
        Duration::from_secs(args.time_budget_secs),
    );
    let pool = UnlockPool::new(args.threads, UnlockEngine::new(config))?;
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let progress = if args.sweep {
        let total = (args.max_candidates * args.inputs.len()) as u64;
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} {pos}/{len} candidates [{wide_bar:.cyan/blue}] {elapsed}",
            )?,
        );
        bar
    } else {
        ProgressBar::hidden()
    };
    let observer: Arc<dyn SweepObserver> = Arc::new(ProgressObserver {
        progress: progress.clone(),
    });

    let mut handles = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        let bytes =
            std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
        let mut request = UnlockRequest::new(bytes).with_sweep(args.sweep);
        if let Some(password) = &args.password {
            request = request.with_password(password.as_str());
        }
        if let Some(name) = input.file_name() {
            request = request.with_filename(name.to_string_lossy());
        }
        handles.push((input, pool.submit_observed(request, Arc::clone(&observer))));
    }

    let mut exit_code = 0;
    for (input, handle) in handles {
        let outcome = handle.wait()?;
        progress.suspend(|| println!("PDF: {}", input.display()));
        let code = report(input, outcome, &args.output_dir, &progress)?;
        exit_code = exit_code.max(code);
    }

    progress.finish_and_clear();
    println!("Elapsed: {:.2?}", start.elapsed());
    Ok(exit_code)
}

/// Print one outcome, writing the unlocked copy if there is one.
fn report(
    input: &Path,
    outcome: UnlockOutcome,
    output_dir: &Path,
    progress: &ProgressBar,
) -> Result<i32> {
    let (message, code) = match outcome.result {
        UnlockAttemptResult::Success(document) => {
            let path = write_output(input, &document, output_dir)?;
            let mut message = format!(
                "Unlocked via {} ({} pages) -> {}",
                document.strategy,
                document.pages_recovered,
                path.display()
            );
            if let Some(candidate) = &document.password {
                message.push_str(&format!(
                    "\n  password: {} ({} candidate #{})",
                    candidate.as_str(),
                    candidate.source(),
                    candidate.ordinal()
                ));
            }
            if let Some(note) = document.recovery_note() {
                message.push_str(&format!("\n  {note}"));
            }
            if document.best_effort() {
                message.push_str("\n  found by sampling; this says nothing about password strength");
            }
            (message, 0)
        }
        UnlockAttemptResult::NeedsPassword => (
            "Password required; pass --password or --sweep.".to_string(),
            EXIT_NEEDS_PASSWORD,
        ),
        UnlockAttemptResult::IncorrectPassword => {
            ("Incorrect password.".to_string(), EXIT_EXHAUSTED)
        }
        UnlockAttemptResult::Exhausted => (
            format!(
                "Password not found after {} candidates.",
                outcome.candidates_tried
            ),
            EXIT_EXHAUSTED,
        ),
        UnlockAttemptResult::StructuralFailure(reason) => {
            (format!("Cannot unlock: {reason}"), EXIT_STRUCTURAL)
        }
    };

    progress.suspend(|| {
        if code == 0 {
            println!("{message}");
        } else {
            eprintln!("{message}");
        }
    });
    Ok(code)
}

/// Write `unlocked_<name>.pdf` through a temp file so a partial write never
/// lands under the final name.
fn write_output(input: &Path, document: &UnlockedDocument, output_dir: &Path) -> Result<PathBuf> {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let path = output_dir.join(format!("unlocked_{stem}.pdf"));

    let mut file = tempfile::NamedTempFile::new_in(output_dir)
        .with_context(|| format!("creating temp file in {}", output_dir.display()))?;
    file.write_all(&document.bytes)?;
    file.persist(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
