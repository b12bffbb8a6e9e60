//! Process-isolated runner execution.
//!
//! `cellophane.__init__._main` spawns each runner as an `mp.Process` and
//! drains results from an `mp.Queue`. Rust has no safe `fork()` and no
//! cross-process queue in std, so this crate substitutes the standard
//! sandboxing idiom instead: the supervisor re-execs its own binary
//! (`Command::new(current_exe())`) with a hidden subcommand, and the child
//! and parent exchange a payload file and a result file rather than a
//! shared queue. Polling and timeout handling follow
//! `shipper::process::run_command_with_timeout`'s `try_wait` loop.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pipeweave_registry::{ExtensionSource, LoadOutcome, Loader};
use pipeweave_types::api::ExtensionRegistry;
use pipeweave_types::{RunContext, RunnerDescriptor, Samples};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const INTERNAL_RUNNER_SUBCOMMAND: &str = "--internal-run-runner";

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn runner process for {runner}: {source}")]
    Spawn {
        runner: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write payload file {0}: {1}")]
    WritePayload(PathBuf, std::io::Error),
    #[error("failed to read result file {0}: {1}")]
    ReadResult(PathBuf, std::io::Error),
    #[error("extension library {0} did not register runner {1}")]
    RunnerNotFound(PathBuf, String),
}

/// One group of samples bound to one runner, about to become a child
/// process. Built by fanning `Samples::split` out over every registered
/// runner, before any process is spawned — so the pending set below exists
/// even if every process fails to launch.
#[derive(Clone)]
pub struct RunnerInstance {
    pub id: Uuid,
    pub runner_name: String,
    pub extension_library: PathBuf,
    pub samples: Samples,
}

/// Tracks, for every sample id, which runner instances still owe a result.
/// An id drops out of its set as each owning instance reports in; anything
/// left outstanding at teardown is classified failed.
#[derive(Debug, Default)]
pub struct PendingSet(HashMap<String, HashSet<Uuid>>);

impl PendingSet {
    pub fn build(instances: &[RunnerInstance]) -> Self {
        let mut map: HashMap<String, HashSet<Uuid>> = HashMap::new();
        for instance in instances {
            for sample in instance.samples.iter() {
                map.entry(sample.id.clone()).or_default().insert(instance.id);
            }
        }
        PendingSet(map)
    }

    pub fn resolve(&mut self, instance_id: Uuid, sample_id: &str) {
        if let Some(set) = self.0.get_mut(sample_id) {
            set.remove(&instance_id);
        }
    }

    pub fn is_outstanding(&self, sample_id: &str) -> bool {
        self.0.get(sample_id).is_some_and(|s| !s.is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    config: serde_json::Value,
    samples: Samples,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum RunnerOutcome {
    /// The samples to report for this instance, plus whether the runner's
    /// `main` returned `None` despite mutating its input (a warning-worthy
    /// but non-fatal condition per the return-value semantics table).
    Samples { samples: Samples, warned: bool },
}

/// Pure resolution of a runner's return value against its pre-call and
/// post-call snapshots, independent of process boundaries so it can be
/// unit tested directly.
///
/// `pre_call` is the sample set before `main` ran, `post_call` is the same
/// binding after `main` returned (which may have been mutated in place even
/// if `returned` is `None`), and `returned` is `main`'s actual return value.
pub fn resolve_outcome(pre_call: &Samples, post_call: &Samples, returned: Option<Samples>) -> RunnerOutcome {
    match returned {
        Some(samples) => RunnerOutcome::Samples {
            samples,
            warned: false,
        },
        None => {
            let mutated = pre_call.len() != post_call.len()
                || pre_call
                    .iter()
                    .zip(post_call.iter())
                    .any(|(a, b)| a.id != b.id || a.done != b.done);
            let mut samples = pre_call.clone();
            for sample in samples.iter_mut() {
                sample.done = true;
            }
            RunnerOutcome::Samples {
                samples,
                warned: mutated,
            }
        }
    }
}

/// Supervises one wave of runner instances to completion, re-execing the
/// current binary once per instance for OS-level process isolation.
pub struct Supervisor {
    current_exe: PathBuf,
    cancel: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl Supervisor {
    pub fn new(current_exe: PathBuf) -> Self {
        Self {
            current_exe,
            cancel: Arc::new(AtomicBool::new(false)),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Install a `ctrlc` handler that flips the shared cancellation flag.
    /// Cooperative: the drain loop checks it once per poll tick rather than
    /// the signal tearing anything down directly.
    pub fn install_cancel_handler(&self) -> Result<(), ctrlc::Error> {
        let flag = Arc::clone(&self.cancel);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Spawn every instance as a re-exec'd child, write its payload file,
    /// and drain results as children exit. Returns one outcome per
    /// instance that actually reported a result (a crashed or
    /// never-reporting child is simply absent from the map; the caller's
    /// aggregator treats that as failure at teardown).
    #[allow(unsafe_code)]
    pub fn execute(
        &self,
        instances: Vec<RunnerInstance>,
        config: &serde_json::Value,
        work_dir: &Path,
    ) -> Result<HashMap<Uuid, RunnerOutcome>, ProcessError> {
        std::fs::create_dir_all(work_dir).ok();

        struct Running {
            id: Uuid,
            child: Child,
            result_path: PathBuf,
        }

        let mut running = Vec::new();
        for instance in &instances {
            let payload_path = work_dir.join(format!("{}.payload.json", instance.id));
            let result_path = work_dir.join(format!("{}.result.json", instance.id));

            let payload = Payload {
                config: config.clone(),
                samples: instance.samples.clone(),
            };
            let data = serde_json::to_vec(&payload).expect("payload is always serializable");
            std::fs::write(&payload_path, data)
                .map_err(|e| ProcessError::WritePayload(payload_path.clone(), e))?;

            let mut command = Command::new(&self.current_exe);
            command
                .arg(INTERNAL_RUNNER_SUBCOMMAND)
                .arg(&instance.extension_library)
                .arg(&instance.runner_name)
                .arg(&payload_path)
                .arg(&result_path)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());

            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt;
                // SAFETY: this closure only calls async-signal-safe libc
                // functions before exec, the documented contract for
                // `pre_exec`. Placing the child in its own process group
                // lets the supervisor signal its whole descendant tree on
                // cancellation without also signaling itself.
                unsafe {
                    command.pre_exec(|| {
                        nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                            .map_err(std::io::Error::from)
                    });
                }
            }

            let child = command.spawn().map_err(|source| ProcessError::Spawn {
                runner: instance.runner_name.clone(),
                source,
            })?;

            running.push(Running {
                id: instance.id,
                child,
                result_path,
            });
        }

        let mut outcomes = HashMap::new();
        while !running.is_empty() {
            if self.cancel.load(Ordering::SeqCst) {
                for r in &mut running {
                    terminate_group(&r.child);
                }
            }

            let mut still_running = Vec::new();
            for mut r in running {
                match r.child.try_wait() {
                    Ok(Some(_status)) => {
                        if let Ok(raw) = std::fs::read(&r.result_path) {
                            if let Ok(outcome) = serde_json::from_slice::<RunnerOutcome>(&raw) {
                                outcomes.insert(r.id, outcome);
                            }
                        }
                    }
                    Ok(None) => still_running.push(r),
                    Err(_) => {}
                }
            }
            running = still_running;

            if !running.is_empty() {
                std::thread::sleep(self.poll_interval);
            }
        }

        Ok(outcomes)
    }
}

#[cfg(unix)]
fn terminate_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;
    let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
fn terminate_group(child: &Child) {
    let _ = child.id();
}

/// Entry point invoked when the binary re-execs itself as
/// `--internal-run-runner <extension-lib> <runner-name> <payload> <result>`.
/// Loads exactly one extension, looks up the named runner, and runs it to
/// completion, writing [`RunnerOutcome`] to `result_path`.
pub fn run_internal_runner(
    extension_library: &Path,
    runner_name: &str,
    payload_path: &Path,
    result_path: &Path,
    root: &Path,
) -> anyhow::Result<()> {
    let source = ExtensionSource {
        name: runner_name.to_string(),
        library_path: extension_library.to_path_buf(),
        schema_path: None,
    };
    let mut registry = ExtensionRegistry::new();
    if let LoadOutcome::Skipped { reason } = Loader::load(&source, &mut registry) {
        anyhow::bail!("failed to load extension {}: {reason}", extension_library.display());
    }

    let (_, runners, _) = registry.into_parts();
    let descriptor: &RunnerDescriptor = runners
        .iter()
        .find(|r| r.name == runner_name)
        .ok_or_else(|| ProcessError::RunnerNotFound(extension_library.to_path_buf(), runner_name.to_string()))?;

    let raw = std::fs::read(payload_path)?;
    let payload: Payload = serde_json::from_slice(&raw)?;
    let mut samples = payload.samples;
    let original = samples.clone();

    let config = pipeweave_types::Container::from_map(
        payload.config.as_object().cloned().unwrap_or_default(),
    );
    let ctx = RunContext {
        config: &config,
        timestamp: "",
        root,
        retry: &descriptor.retry,
    };

    let returned = (descriptor.main)(&ctx, &mut samples)?;
    let outcome = resolve_outcome(&original, &samples, returned);
    std::fs::write(result_path, serde_json::to_vec(&outcome)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeweave_types::Sample;

    fn instance(name: &str, sample_ids: &[&str]) -> RunnerInstance {
        RunnerInstance {
            id: Uuid::new_v4(),
            runner_name: name.to_string(),
            extension_library: PathBuf::from("lib.so"),
            samples: Samples::new(sample_ids.iter().map(|id| Sample::new(*id)).collect()),
        }
    }

    #[test]
    fn pending_set_tracks_every_sample_per_instance() {
        let instances = vec![instance("a", &["s1", "s2"]), instance("b", &["s2"])];
        let mut pending = PendingSet::build(&instances);
        assert!(pending.is_outstanding("s1"));
        assert!(pending.is_outstanding("s2"));

        pending.resolve(instances[0].id, "s1");
        assert!(!pending.is_outstanding("s1"));
        assert!(pending.is_outstanding("s2"));

        pending.resolve(instances[0].id, "s2");
        assert!(pending.is_outstanding("s2"), "instance b still owes s2");
        pending.resolve(instances[1].id, "s2");
        assert!(!pending.is_outstanding("s2"));
    }

    #[test]
    fn resolve_outcome_returns_explicit_samples_verbatim() {
        let original = Samples::new(vec![Sample::new("a")]);
        let mut returned = original.clone();
        returned[0].done = true;
        let outcome = resolve_outcome(&original, &original, Some(returned));
        match outcome {
            RunnerOutcome::Samples { samples, warned } => {
                assert!(samples[0].done);
                assert!(!warned);
            }
        }
    }

    #[test]
    fn resolve_outcome_warns_when_none_but_mutated() {
        let original = Samples::new(vec![Sample::new("a")]);
        let mut mutated_in_place = original.clone();
        mutated_in_place[0].done = true;
        let outcome = resolve_outcome(&original, &mutated_in_place, None);
        match outcome {
            RunnerOutcome::Samples { samples, warned } => {
                assert!(warned);
                assert!(samples[0].done, "a None return still marks its samples done");
            }
        }
    }

    #[test]
    fn resolve_outcome_is_quiet_when_none_and_unmodified() {
        let original = Samples::new(vec![Sample::new("a")]);
        let outcome = resolve_outcome(&original, &original, None);
        match outcome {
            RunnerOutcome::Samples { samples, warned } => {
                assert!(!warned);
                assert!(samples[0].done, "None and unmodified input is emitted with done=true");
            }
        }
    }
}
