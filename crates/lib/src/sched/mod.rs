//! The scheduler and IPC server.
//!
//! A single-threaded cooperative loop drives the whole build. The only
//! suspension point is the wait on {socket accept, child exit,
//! interrupt}; everything else is in-process bookkeeping over the
//! client queue. Concurrency is exclusively the set of live shell
//! subprocesses, bounded by the job slot budget.
//!
//! Clients are pending build requests: the user's original request, a
//! dependency gate created for a rule with static prerequisites, or a
//! recursive sub-request from a running script. Dependency clients are
//! inserted *before* the client that spawned them, which makes the
//! queue drain depth-first: the innermost prerequisites of a request
//! resolve before their dependents.

mod proto;
mod script;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use remake_platform::{Listener, PlatformError, SocketAddress, Stream, shell_args, shell_program};

use crate::consts;
use crate::deps::{DepStore, DepsError};
use crate::parse::{self, ParseError, Rule, RuleSet, Variables};
use crate::path::PathContext;
use crate::resolve;
use crate::status::{Status, StatusMap};

pub use proto::{REPLY_FAILED, REPLY_OK, decode_request, encode_request};

/// Errors that abort the coordinator before or outside any build.
#[derive(Debug, Error)]
pub enum ServerError {
  #[error("no rule file {0} found")]
  MissingRuleFile(String),

  #[error("failed to load rules: {0}")]
  Parse(#[from] ParseError),

  #[error("failed to load dependency database: {0}")]
  Deps(#[from] DepsError),

  #[error("platform error: {0}")]
  Platform(#[from] PlatformError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Options controlling one coordinator run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
  /// Rule file to load, relative to the working directory.
  pub rule_file: String,
  /// Maximum number of simultaneously active jobs; unbounded when
  /// non-positive.
  pub max_jobs: i32,
  /// Keep building other targets after a failure.
  pub keep_going: bool,
  /// Pass `-v` to job shells so they echo script lines.
  pub echo_scripts: bool,
  /// Announce each spawned script on stdout.
  pub show_targets: bool,
}

impl Default for BuildOptions {
  fn default() -> Self {
    BuildOptions {
      rule_file: consts::RULE_FILE.to_string(),
      max_jobs: 1,
      keep_going: false,
      echo_scripts: false,
      show_targets: true,
    }
  }
}

/// Identifier of a shell job. Ids increase monotonically and are never
/// recycled within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u32);

/// A pending build request.
struct Client {
  /// Reply connection for recursive sub-requests; pseudo clients have
  /// none.
  reply: Option<Stream>,
  /// Job whose script spawned this client; `None` for original
  /// clients (user targets, bootstrap).
  job: Option<JobId>,
  /// Sticky failure under `-k`.
  failed: bool,
  /// Targets not yet started, drained in insertion order.
  pending: VecDeque<String>,
  /// Targets currently being built.
  running: HashSet<String>,
  /// For dependency clients: the rule to run once the prerequisites
  /// resolve, and whether its targets were merely Recheck at start.
  deferred: Option<(Rule, bool)>,
}

impl Client {
  fn original(pending: Vec<String>) -> Self {
    Client {
      reply: None,
      job: None,
      failed: false,
      pending: pending.into(),
      running: HashSet::new(),
      deferred: None,
    }
  }

  fn dependency(job: JobId, rule: Rule, was_recheck: bool) -> Self {
    Client {
      reply: None,
      job: Some(job),
      failed: false,
      pending: rule.prereqs.iter().cloned().collect(),
      running: HashSet::new(),
      deferred: Some((rule, was_recheck)),
    }
  }

  fn request(stream: Stream, job: JobId, targets: VecDeque<String>) -> Self {
    Client {
      reply: Some(stream),
      job: Some(job),
      failed: false,
      pending: targets,
      running: HashSet::new(),
      deferred: None,
    }
  }
}

/// Whether a new shell may start under the slot budget.
///
/// A job waiting for a sub-request reply holds no effective slot;
/// otherwise a chain of waiting parents could consume the whole budget
/// and deadlock the build.
fn slots_available(running: usize, waiting: usize, max_jobs: i32) -> bool {
  if max_jobs <= 0 {
    return true;
  }
  running.saturating_sub(waiting) < max_jobs as usize
}

enum StartResult {
  /// A shell was spawned.
  Spawned,
  /// A dependency client was inserted before the current one.
  Deferred,
  /// The target cannot be built.
  Failed,
}

/// Interrupt sources, folded into the event wait.
struct Interrupts {
  #[cfg(unix)]
  int: tokio::signal::unix::Signal,
  #[cfg(unix)]
  term: tokio::signal::unix::Signal,
}

impl Interrupts {
  fn new() -> std::io::Result<Self> {
    #[cfg(unix)]
    {
      use tokio::signal::unix::{SignalKind, signal};
      Ok(Interrupts {
        int: signal(SignalKind::interrupt())?,
        term: signal(SignalKind::terminate())?,
      })
    }

    #[cfg(windows)]
    {
      Ok(Interrupts {})
    }
  }

  async fn recv(&mut self) {
    #[cfg(unix)]
    {
      tokio::select! {
        _ = self.int.recv() => {}
        _ = self.term.recv() => {}
      }
    }

    #[cfg(windows)]
    {
      let _ = tokio::signal::ctrl_c().await;
    }
  }
}

/// The build coordinator: every piece of per-run state, owned by the
/// event loop. One instance per working directory.
struct Coordinator {
  opts: BuildOptions,
  paths: PathContext,
  addr: SocketAddress,
  vars: Variables,
  rules: RuleSet,
  deps: DepStore,
  status: StatusMap,
  clients: Vec<Client>,
  jobs: HashMap<JobId, Vec<String>>,
  next_job: u32,
  running: usize,
  waiting: usize,
  failure: bool,
  interrupted: bool,
  exits_tx: mpsc::UnboundedSender<(JobId, bool)>,
}

/// Run the coordinator: load state, service the given targets (or the
/// default target), persist dependencies, and report overall success.
///
/// If the rule file itself is out of date, a bootstrap pass rebuilds it
/// first and all parser state is reloaded before the user's targets are
/// serviced.
pub async fn run(opts: BuildOptions, targets: Vec<String>) -> Result<bool, ServerError> {
  let paths = PathContext::current()?;
  let rule_file = paths.normalize(&opts.rule_file);

  let mut deps = DepStore::default();
  deps.load_file(Path::new(consts::DEPS_FILE))?;

  let mut vars = Variables::default();
  let rules = read_rule_file(&rule_file, &paths, &mut vars, &mut deps)?;

  let (listener, addr) = Listener::bind().await?;
  let (exits_tx, mut exits_rx) = mpsc::unbounded_channel();
  let mut interrupts = Interrupts::new()?;

  let mut co = Coordinator {
    opts,
    paths,
    addr: addr.clone(),
    vars,
    rules,
    deps,
    status: StatusMap::default(),
    clients: Vec::new(),
    jobs: HashMap::new(),
    next_job: 0,
    running: 0,
    waiting: 0,
    failure: false,
    interrupted: false,
    exits_tx,
  };

  let driven = co
    .drive(&rule_file, targets, &listener, &mut exits_rx, &mut interrupts)
    .await;

  drop(listener);
  addr.remove();
  co.deps.save_file(Path::new(consts::DEPS_FILE))?;
  driven?;
  Ok(!co.failure)
}

fn read_rule_file(
  rule_file: &str,
  paths: &PathContext,
  vars: &mut Variables,
  deps: &mut DepStore,
) -> Result<RuleSet, ServerError> {
  let input = match std::fs::read(rule_file) {
    Ok(bytes) => bytes,
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
      return Err(ServerError::MissingRuleFile(rule_file.to_string()));
    }
    Err(err) => return Err(err.into()),
  };
  let rules = parse::load_rules(&input, paths, vars, deps)?;
  debug!(
    generic = rules.generic.len(),
    specific = rules.scripted.len() + rules.transparent.len(),
    "rules loaded"
  );
  Ok(rules)
}

impl Coordinator {
  /// Bootstrap the rule file if needed, then service the requested
  /// targets (or the default target).
  async fn drive(
    &mut self,
    rule_file: &str,
    targets: Vec<String>,
    listener: &Listener,
    exits: &mut mpsc::UnboundedReceiver<(JobId, bool)>,
    interrupts: &mut Interrupts,
  ) -> Result<(), ServerError> {
    if self.status.status(&self.deps, rule_file).status != Status::Uptodate {
      info!(rule_file, "rule file out of date, regenerating it first");
      self.clients.push(Client::original(vec![rule_file.to_string()]));
      self.event_loop(listener, exits, interrupts).await;
      if self.failure {
        return Ok(());
      }
      // The rebuilt rule file supersedes all parser state.
      self.vars = Variables::default();
      self.rules = read_rule_file(rule_file, &self.paths, &mut self.vars, &mut self.deps)?;
    }

    let pending = if targets.is_empty() {
      self.rules.default_target.iter().cloned().collect()
    } else {
      targets
    };
    self.clients.push(Client::original(pending));
    self.event_loop(listener, exits, interrupts).await;
    Ok(())
  }

  fn has_free_slots(&self) -> bool {
    slots_available(self.running, self.waiting, self.opts.max_jobs)
  }

  /// No event can arrive and no client can progress: every live shell
  /// is itself blocked waiting on a reply from us.
  fn stalled(&self) -> bool {
    !self.clients.is_empty()
      && self.running == self.waiting
      && self.clients.iter().all(|c| c.pending.is_empty())
  }

  /// Loop until every client of the current pass has been answered.
  async fn event_loop(
    &mut self,
    listener: &Listener,
    exits: &mut mpsc::UnboundedReceiver<(JobId, bool)>,
    interrupts: &mut Interrupts,
  ) {
    loop {
      self.update_clients().await;
      if self.running == 0 {
        if self.clients.is_empty() {
          break;
        }
        // No child is alive, so no sub-request or exit can arrive.
        self.break_deadlock().await;
        continue;
      }
      if self.stalled() {
        self.break_deadlock().await;
        continue;
      }
      tokio::select! {
        accepted = listener.accept() => match accepted {
          Ok(stream) => self.accept_client(stream).await,
          Err(err) => warn!(error = %err, "failed to accept client"),
        },
        exit = exits.recv() => {
          if let Some((job, success)) = exit {
            debug!(job = job.0, success, "job exited");
            self.running -= 1;
            self.complete_job(job, success);
          }
        }
        _ = interrupts.recv() => {
          if !self.interrupted {
            eprintln!("remake: interrupted, not starting new jobs");
          }
          self.interrupted = true;
        }
      }
    }
  }

  /// Fail the frontmost client to guarantee forward progress.
  async fn break_deadlock(&mut self) {
    let client = self.clients.remove(0);
    if !self.interrupted {
      let mut stuck: Vec<&String> = client.running.iter().collect();
      stuck.sort();
      let stuck = stuck.into_iter().cloned().collect::<Vec<_>>().join(" ");
      eprintln!("remake: circular dependency, failing {stuck}");
    }
    self.complete_request(client, false).await;
  }

  /// Service every client as far as the slot budget allows:
  /// drop running targets that finished, start pending ones, and
  /// answer requests with neither left.
  async fn update_clients(&mut self) {
    let mut i = 0;
    'clients: while i < self.clients.len() && self.has_free_slots() {
      // Remove running targets that have finished.
      let running: Vec<String> = self.clients[i].running.iter().cloned().collect();
      for target in running {
        match self.status.get(&target).map(|s| s.status) {
          Some(Status::Running) => {}
          Some(Status::Uptodate) | Some(Status::Remade) => {
            self.clients[i].running.remove(&target);
          }
          _ => {
            if !self.opts.keep_going {
              let client = self.clients.remove(i);
              self.complete_request(client, false).await;
              continue 'clients;
            }
            self.clients[i].failed = true;
            self.clients[i].running.remove(&target);
          }
        }
      }

      // Start pending targets.
      while let Some(target) = self.clients[i].pending.pop_front() {
        let state = self.status.status(&self.deps, &target);
        match state.status {
          Status::Running => {
            self.clients[i].running.insert(target);
          }
          Status::Uptodate | Status::Remade => {}
          Status::Failed => {
            if !self.opts.keep_going {
              let client = self.clients.remove(i);
              self.complete_request(client, false).await;
              continue 'clients;
            }
            self.clients[i].failed = true;
          }
          Status::Todo | Status::Recheck => {
            let was_recheck = state.status == Status::Recheck;
            match self.start(&target, i, was_recheck).await {
              StartResult::Failed => {
                if !self.opts.keep_going {
                  let client = self.clients.remove(i);
                  self.complete_request(client, false).await;
                  continue 'clients;
                }
                self.clients[i].failed = true;
              }
              StartResult::Spawned => {
                self.clients[i].running.insert(target);
                if !self.has_free_slots() {
                  return;
                }
              }
              StartResult::Deferred => {
                // The new dependency client sits at `i`; the client
                // that requested the target moved to `i + 1`. Draining
                // continues with the dependency client: depth-first.
                self.clients[i + 1].running.insert(target);
                if !self.has_free_slots() {
                  return;
                }
              }
            }
          }
        }
      }

      // Answer the request when nothing is pending or running.
      if self.clients[i].running.is_empty() {
        let client = self.clients.remove(i);
        let success = !client.failed;
        self.complete_request(client, success).await;
        continue 'clients;
      }
      i += 1;
    }
  }

  /// Create a job for `target` from the loaded rules.
  ///
  /// All targets of the rule become Running and their job is recorded.
  /// A rule with static prerequisites becomes a dependency client
  /// inserted at `at`, owning the deferred rule; otherwise the shell is
  /// spawned directly.
  async fn start(&mut self, target: &str, at: usize, was_recheck: bool) -> StartResult {
    if self.interrupted {
      self.status.set(target, Status::Failed);
      return StartResult::Failed;
    }
    let rule = match resolve::find_rule(&self.rules, target) {
      Ok(rule) => rule,
      Err(err) => {
        eprintln!("remake: {err}");
        self.status.set(target, Status::Failed);
        return StartResult::Failed;
      }
    };
    for t in &rule.targets {
      self.status.set(t, Status::Running);
    }
    let job = JobId(self.next_job);
    self.next_job += 1;
    debug!(job = job.0, target, "starting job");
    self.jobs.insert(job, rule.targets.clone());

    if !rule.prereqs.is_empty() {
      self.clients.insert(at, Client::dependency(job, rule, was_recheck));
      StartResult::Deferred
    } else {
      match self.spawn_script(job, &rule).await {
        Ok(()) => StartResult::Spawned,
        Err(err) => {
          eprintln!("remake: {err}");
          self.complete_job(job, false);
          StartResult::Failed
        }
      }
    }
  }

  /// Pipe the prepared script to a fresh shell child.
  ///
  /// The shared dependency record of the rule's targets is reset to the
  /// static prerequisites (plus anything previously recorded) so that
  /// dynamic edges contributed by this run land in a clean record.
  async fn spawn_script(&mut self, job: JobId, rule: &Rule) -> Result<(), ServerError> {
    if self.opts.show_targets {
      println!("Building {}", rule.targets.join(" "));
    }
    self.deps.replace_for_rule(&rule.targets, &rule.prereqs);
    let script = script::prepare(rule, &self.vars)?;

    let mut command = Command::new(shell_program());
    command
      .args(shell_args(self.opts.echo_scripts))
      .args(&rule.targets)
      .env(consts::ENV_JOB_ID, job.0.to_string())
      .env(consts::ENV_SOCKET, self.addr.env_value())
      .stdin(Stdio::piped());
    let mut child = command.spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
      if let Err(err) = stdin.write_all(script.as_bytes()).await {
        warn!(job = job.0, error = %err, "failed to pipe script to shell");
      }
    }

    self.running += 1;
    let tx = self.exits_tx.clone();
    tokio::spawn(async move {
      let success = child.wait().await.map(|s| s.success()).unwrap_or(false);
      let _ = tx.send((job, success));
    });
    Ok(())
  }

  /// Handle a finished shell: update or fail its declared targets.
  fn complete_job(&mut self, job: JobId, success: bool) {
    let Some(targets) = self.jobs.remove(&job) else {
      debug_assert!(false, "unknown job {}", job.0);
      return;
    };
    if success {
      for t in &targets {
        self.status.update_after_run(t);
      }
    } else {
      eprintln!("remake: failed to build {}", targets.join(" "));
      for t in &targets {
        self.status.set(t, Status::Failed);
        let _ = std::fs::remove_file(t);
      }
    }
  }

  /// Answer a finished client.
  ///
  /// A dependency client either spawns its deferred script (unless the
  /// Recheck downgrade shows the rebuild became unnecessary) or fails
  /// its job. A sub-request client gets its one-byte reply. A failed
  /// original client marks the whole build failed.
  async fn complete_request(&mut self, mut client: Client, success: bool) {
    debug!(job = client.job.map(|j| j.0), success, "completing request");
    if let Some((rule, was_recheck)) = client.deferred.take() {
      if let Some(job) = client.job {
        if !success {
          self.complete_job(job, false);
        } else if self.status.still_need_rebuild(&self.deps, &rule.targets[0], was_recheck) {
          if let Err(err) = self.spawn_script(job, &rule).await {
            eprintln!("remake: {err}");
            self.complete_job(job, false);
          }
        } else {
          self.complete_job(job, true);
        }
      }
    } else if let Some(mut stream) = client.reply.take() {
      let reply = if success { REPLY_OK } else { REPLY_FAILED };
      if let Err(err) = stream.write_all(&[reply]).await {
        debug!(error = %err, "client went away before the reply");
      }
      self.waiting -= 1;
    }
    if client.job.is_none() && !success {
      self.failure = true;
    }
  }

  /// Accept one sub-request: read the frame, record the dynamic edges
  /// on the requesting job's record, and queue a client for its
  /// targets.
  async fn accept_client(&mut self, mut stream: Stream) {
    let (job_raw, raw_targets) = match proto::read_request(&mut stream).await {
      Ok(request) => request,
      Err(err) => {
        eprintln!("remake: ill-formed client message: {err}");
        return;
      }
    };
    let job = JobId(job_raw.max(0) as u32);
    let job_targets = if job_raw >= 0 { self.jobs.get(&job) } else { None };
    let Some(job_targets) = job_targets else {
      eprintln!("remake: build request from unknown job {job_raw}");
      let _ = stream.write_all(&[REPLY_FAILED]).await;
      return;
    };
    debug!(job = job_raw, targets = raw_targets.len(), "sub-request");

    let record_target = job_targets[0].clone();
    let mut pending = VecDeque::with_capacity(raw_targets.len());
    for raw in raw_targets {
      let target = self.paths.normalize(&raw);
      self.deps.add_dynamic(&record_target, target.clone());
      pending.push_back(target);
    }
    self.clients.insert(0, Client::request(stream, job, pending));
    self.waiting += 1;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unbounded_budget_always_has_slots() {
    assert!(slots_available(100, 0, 0));
    assert!(slots_available(100, 0, -1));
  }

  #[test]
  fn waiting_jobs_release_their_slot() {
    assert!(!slots_available(2, 0, 2));
    assert!(slots_available(2, 1, 2));
    assert!(slots_available(1, 0, 2));
  }

  #[test]
  fn default_options_match_cli_defaults() {
    let opts = BuildOptions::default();
    assert_eq!(opts.rule_file, "Remakefile");
    assert_eq!(opts.max_jobs, 1);
    assert!(!opts.keep_going);
    assert!(opts.show_targets);
  }
}
