//! Facade crate: wires extension discovery, hook scheduling, runner
//! supervision, and output aggregation into a single [`run`] entrypoint.
//!
//! Grounded on `shipper`'s pipeline shape ("plan → preflight → publish",
//! `lib.rs` doc comment) — here "discover → schedule → pre-hooks → execute →
//! aggregate → post-hooks" plays the same role of a thin orchestration layer
//! over independently testable crates.

pub mod aggregate;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use pipeweave_cache::{CacheDir, Fingerprint};
use pipeweave_config::Config;
use pipeweave_registry::Loader;
use pipeweave_process::{PendingSet, RunnerInstance, Supervisor};
use pipeweave_schedule::resolve as schedule_resolve;
use pipeweave_types::api::ExtensionRegistry;
use pipeweave_types::{
    HookDescriptor, MixinRegistry, PostCondition, RunContext, RunnerDescriptor, Samples, When,
};
use uuid::Uuid;

pub use aggregate::Aggregator;

pub struct RunOptions {
    pub modules_dir: PathBuf,
    pub outdir: PathBuf,
    pub current_exe: PathBuf,
    pub use_cache: bool,
}

pub struct RunSummary {
    pub samples: Samples,
    pub complete: Vec<String>,
    pub partial: Vec<String>,
    pub failed: Vec<String>,
    pub cancelled: bool,
}

/// One extension's contributions, tagged with the library path the
/// supervisor needs later to re-exec just that extension's runners in
/// isolation.
struct LoadedExtension {
    library_path: PathBuf,
    hooks: Vec<HookDescriptor>,
    runners: Vec<RunnerDescriptor>,
    mixins: Vec<(Box<dyn pipeweave_types::SamplesMixin>, Option<Box<dyn pipeweave_types::SampleMixin>>)>,
}

fn load_all_extensions(modules_dir: &Path) -> anyhow::Result<Vec<LoadedExtension>> {
    let sources = Loader::discover(modules_dir)?;
    let mut loaded = Vec::new();
    for source in sources {
        let mut registry = ExtensionRegistry::new();
        let outcome = Loader::load(&source, &mut registry);
        if let pipeweave_registry::LoadOutcome::Skipped { reason } = outcome {
            tracing::debug!(extension = %source.name, reason, "skipped extension");
            continue;
        }
        let (hooks, runners, mixins) = registry.into_parts();
        loaded.push(LoadedExtension {
            library_path: source.library_path,
            hooks,
            runners,
            mixins,
        });
    }
    Ok(loaded)
}

/// Drive one full pipeline run: discover extensions, apply mixins, run
/// pre-hooks, fan out runners under process isolation, aggregate their
/// results, and run post-hooks.
pub fn run(config: &Config, mut samples: Samples, options: &RunOptions) -> anyhow::Result<RunSummary> {
    let extensions = load_all_extensions(&options.modules_dir)?;

    let mut mixin_registry = MixinRegistry::new();
    let mut all_hooks = Vec::new();
    let mut runner_library: HashMap<String, PathBuf> = HashMap::new();
    let mut all_runners = Vec::new();
    for ext in extensions {
        all_hooks.extend(ext.hooks);
        for runner in ext.runners {
            runner_library.insert(runner.name.clone(), ext.library_path.clone());
            all_runners.push(runner);
        }
        for (samples_mixin, sample_mixin) in ext.mixins {
            mixin_registry.register(samples_mixin, sample_mixin);
        }
    }
    mixin_registry.install(&mut samples);

    let invalid = samples.validate();
    if !invalid.is_empty() {
        tracing::warn!(count = invalid.len(), "dropped invalid samples before run");
    }

    let config_value = config.as_container().to_value();
    let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    run_hooks(When::Pre, &all_hooks, config, &root, &mut samples)?;

    let full_input = samples.clone();
    let mut instances = Vec::new();
    for runner in &all_runners {
        let Some(library) = runner_library.get(&runner.name) else {
            continue;
        };
        let groups = if runner.individual_samples {
            samples.split(runner.link_by.as_deref())
        } else {
            vec![samples.clone()]
        };
        for group in groups {
            instances.push(RunnerInstance {
                id: Uuid::new_v4(),
                runner_name: runner.name.clone(),
                extension_library: library.clone(),
                samples: group,
            });
        }
    }

    let pending = PendingSet::build(&instances);
    let all_ids: Vec<String> = samples.unique_ids().into_iter().map(String::from).collect();
    let mut aggregator = Aggregator::new(pending, all_ids);

    let (cached, to_run): (Vec<_>, Vec<_>) = if options.use_cache {
        instances.into_iter().partition(|instance| {
            let main_source = all_runners
                .iter()
                .find(|r| r.name == instance.runner_name)
                .map(|r| r.main_source)
                .unwrap_or_default();
            Fingerprint::compute(&config_value, main_source, &instance.samples)
                .ok()
                .map(|fp| CacheDir::locate(&options.outdir, &instance.runner_name, fp).try_load().is_some())
                .unwrap_or(false)
        })
    } else {
        (Vec::new(), instances)
    };

    for instance in &cached {
        let main_source = all_runners
            .iter()
            .find(|r| r.name == instance.runner_name)
            .map(|r| r.main_source)
            .unwrap_or_default();
        if let Ok(fp) = Fingerprint::compute(&config_value, main_source, &instance.samples) {
            let cache_dir = CacheDir::locate(&options.outdir, &instance.runner_name, fp);
            if let Some(cached_samples) = cache_dir.try_load() {
                aggregator.record(instance.id, &cached_samples);
            }
        }
    }

    let mut cancelled = false;
    if !to_run.is_empty() {
        let supervisor = Supervisor::new(options.current_exe.clone());
        supervisor.install_cancel_handler().ok();
        let work_dir = options.outdir.join(".pipeweave-run");
        let outcomes = supervisor.execute(to_run.clone(), &config_value, &work_dir)?;
        cancelled = supervisor.cancel_flag().load(std::sync::atomic::Ordering::SeqCst);
        if cancelled {
            tracing::warn!("received SIGINT, running post-hooks with partial results");
        }

        for instance in &to_run {
            match outcomes.get(&instance.id) {
                Some(pipeweave_process::RunnerOutcome::Samples { samples, warned }) => {
                    if *warned {
                        tracing::warn!(runner = %instance.runner_name, "runner returned None but samples were modified");
                    }
                    aggregator.record(instance.id, samples);
                    if options.use_cache {
                        let main_source = all_runners
                            .iter()
                            .find(|r| r.name == instance.runner_name)
                            .map(|r| r.main_source)
                            .unwrap_or_default();
                        if let Ok(fp) = Fingerprint::compute(&config_value, main_source, &instance.samples) {
                            let cache_dir = CacheDir::locate(&options.outdir, &instance.runner_name, fp);
                            let _ = cache_dir.store(samples);
                        }
                    }
                }
                None => {
                    tracing::error!(runner = %instance.runner_name, "runner never reported a result");
                }
            }
        }
    }

    aggregator.finalize();

    let post_hooks: Vec<HookDescriptor> = all_hooks.iter().filter(|h| h.when == When::Post).cloned().collect();
    let order = schedule_resolve(&post_hooks)?;
    for idx in order {
        let hook = &post_hooks[idx];
        let condition = hook.condition.unwrap_or(PostCondition::Always);
        let mut subset = aggregator.filter_for(condition, &full_input);
        let default_retry = pipeweave_retry::RetryConfig::default();
        let ctx = RunContext {
            config: config.as_container(),
            timestamp: "",
            root: &root,
            retry: &default_retry,
        };
        if let Err(err) = (hook.func)(&ctx, &mut subset) {
            tracing::error!(hook = %hook.name, error = %err, "post-hook failed");
        }
    }

    let complete = aggregator.complete().into_iter().map(String::from).collect();
    let partial = aggregator.partial().into_iter().map(String::from).collect();
    let failed = aggregator.failed().into_iter().map(String::from).collect();

    Ok(RunSummary {
        samples: full_input,
        complete,
        partial,
        failed,
        cancelled,
    })
}

fn run_hooks(
    when: When,
    all_hooks: &[HookDescriptor],
    config: &Config,
    root: &Path,
    samples: &mut Samples,
) -> anyhow::Result<()> {
    let phase_hooks: Vec<HookDescriptor> = all_hooks.iter().filter(|h| h.when == when).cloned().collect();
    let order = schedule_resolve(&phase_hooks)?;
    let default_retry = pipeweave_retry::RetryConfig::default();
    let ctx = RunContext {
        config: config.as_container(),
        timestamp: "",
        root,
        retry: &default_retry,
    };
    for idx in order {
        let hook = &phase_hooks[idx];
        (hook.func)(&ctx, samples)?;
    }
    Ok(())
}

pub use pipeweave_process::RunnerOutcome;

#[cfg(test)]
mod tests {
    use super::*;
    use pipeweave_schema::Schema;
    use pipeweave_types::Sample;

    #[test]
    fn run_hooks_executes_in_schedule_order() {
        fn tag(ctx: &RunContext, samples: &mut Samples) -> anyhow::Result<()> {
            let _ = ctx;
            for s in samples.iter_mut() {
                s.extra.set_path("touched", serde_json::json!(true));
            }
            Ok(())
        }

        let hook = HookDescriptor::new("tag", When::Pre, tag);
        let schema = Schema::default();
        let config = pipeweave_config::ConfigBuilder::new(&schema).build().unwrap();
        let mut samples = Samples::new(vec![Sample::new("a")]);
        run_hooks(When::Pre, &[hook], &config, Path::new("."), &mut samples).unwrap();
        assert_eq!(samples[0].extra.get_path("touched"), Some(&serde_json::json!(true)));
    }
}
