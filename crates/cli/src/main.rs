//! remake: a build system bridging the gap between make and redo.
//!
//! The same binary serves two roles. Run by a user it becomes the build
//! coordinator: it parses the rule file, computes obsolescence, and
//! schedules shell jobs. Run from inside a job script (detected through
//! `REMAKE_SOCKET` in the environment) it becomes a client that asks
//! the coordinator for sub-builds and exits with the verdict.

use std::io::Read;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use remake_lib::consts::{ENV_JOB_ID, ENV_SOCKET, RULE_FILE};
use remake_lib::deps::DepStore;
use remake_lib::path::PathContext;
use remake_lib::request;
use remake_lib::sched::{self, BuildOptions};

#[derive(Parser)]
#[command(name = "remake")]
#[command(version, about = "A build system bridging the gap between make and redo")]
struct Cli {
  /// Echo script commands; given twice, print debugging information
  #[arg(short = 'd', action = clap::ArgAction::Count)]
  debug: u8,

  /// Rule file to read
  #[arg(short = 'f', long = "file", value_name = "FILE", default_value = RULE_FILE)]
  file: String,

  /// Allow N jobs at once; infinite jobs with no argument
  #[arg(
    short = 'j',
    long = "jobs",
    value_name = "N",
    num_args = 0..=1,
    default_value_t = 1,
    default_missing_value = "0"
  )]
  jobs: i32,

  /// Keep going when some targets cannot be made
  #[arg(short = 'k', long = "keep-going")]
  keep_going: bool,

  /// Look up targets from the dependencies on standard input
  #[arg(short = 'r')]
  indirect: bool,

  /// Do not echo targets
  #[arg(short = 's', long = "silent", alias = "quiet")]
  silent: bool,

  /// Targets to build
  #[arg(value_name = "target")]
  targets: Vec<String>,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let level = if cli.debug >= 2 { Level::DEBUG } else { Level::WARN };
  FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .without_time()
    .with_writer(std::io::stderr)
    .init();

  match run(cli) {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::FAILURE,
    Err(err) => {
      eprintln!("remake: {err:#}");
      ExitCode::FAILURE
    }
  }
}

fn run(cli: Cli) -> Result<bool> {
  let paths = PathContext::current().context("failed to get working directory")?;
  let mut targets: Vec<String> = cli.targets.iter().map(|t| paths.normalize(t)).collect();

  if cli.indirect {
    targets = indirect_targets(&paths, targets)?;
  }

  // A remake spawned by a job script delegates to the coordinator.
  if let Ok(socket) = std::env::var(ENV_SOCKET) {
    let job_id = std::env::var(ENV_JOB_ID)
      .ok()
      .and_then(|id| id.parse::<i32>().ok())
      .unwrap_or(-1);
    return Ok(request::request(&socket, job_id, &targets)?);
  }

  let options = BuildOptions {
    rule_file: cli.file,
    max_jobs: cli.jobs,
    keep_going: cli.keep_going,
    echo_scripts: cli.debug >= 1,
    show_targets: !cli.silent,
  };

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .context("failed to create async runtime")?;
  let success = runtime.block_on(sched::run(options, targets))?;
  Ok(success)
}

/// Expand `-r` targets: parse dependency-file syntax from standard
/// input and replace each listed target with the union of its recorded
/// prerequisites. With no targets listed, the first stored record
/// provides the implicit target.
fn indirect_targets(paths: &PathContext, targets: Vec<String>) -> Result<Vec<String>> {
  let mut input = Vec::new();
  std::io::stdin()
    .read_to_end(&mut input)
    .context("failed to read standard input")?;
  let mut store = DepStore::default();
  store
    .load(&input)
    .context("failed to parse dependencies on standard input")?;

  let listed = if targets.is_empty() {
    store.first_record().map(|rec| rec.targets[0].clone()).into_iter().collect()
  } else {
    targets
  };

  let mut expanded = Vec::new();
  for target in &listed {
    let Some(rec) = store.lookup(target) else { continue };
    for dep in &rec.deps {
      expanded.push(paths.normalize(dep));
    }
  }
  Ok(expanded)
}
