//! Hook and runner descriptors: the data the loader collects from an
//! extension and the scheduler/supervisor consume.

use std::collections::HashSet;
use std::path::Path;

use crate::container::Container;
use crate::sample::Samples;

/// The sentinel name meaning "every other hook in the same phase".
pub const ALL: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
    Pre,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCondition {
    Always,
    Complete,
    Failed,
}

/// Read-only context handed to a hook or runner invocation. Holds a
/// [`Container`] (the effective config) rather than a `Config` wrapper type
/// to avoid a dependency cycle between `pipeweave-types` and
/// `pipeweave-config`; `Config::as_container` bridges the two at call sites.
///
/// `retry` carries the invoked runner's backoff policy (or a default, for
/// hooks, which have none of their own) so a `main` that shells out to a
/// batch scheduler or submission API can retry with
/// `pipeweave_retry::retry(ctx.retry, ...)` instead of reimplementing
/// backoff itself.
pub struct RunContext<'a> {
    pub config: &'a Container,
    pub timestamp: &'a str,
    pub root: &'a Path,
    pub retry: &'a pipeweave_retry::RetryConfig,
}

/// A hook's function body. Takes `&mut Samples` so a pre-hook can transform
/// the collection in place, matching `cellophane`'s `func(config, samples,
/// logger, root) -> Samples` by mutation rather than return (the pre-hook
/// loop in the orchestrator still decides whether to keep the mutated value,
/// since a hook may also choose to leave samples untouched).
pub type HookFn = fn(&RunContext, &mut Samples) -> anyhow::Result<()>;

#[derive(Clone)]
pub struct HookDescriptor {
    pub name: String,
    pub label: String,
    pub when: When,
    pub condition: Option<PostCondition>,
    pub before: HashSet<String>,
    pub after: HashSet<String>,
    pub priority: f64,
    pub func: HookFn,
}

impl HookDescriptor {
    pub fn new(name: impl Into<String>, when: When, func: HookFn) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            when,
            condition: if when == When::Post {
                Some(PostCondition::Complete)
            } else {
                None
            },
            before: HashSet::new(),
            after: HashSet::new(),
            priority: f64::INFINITY,
            func,
        }
    }
}

/// A runner's function body. Returning `Ok(None)` means "no explicit
/// `Samples` value returned"; the supervisor diffs the post-call `samples`
/// against its pre-call snapshot to decide whether a warning is owed, per
/// the return-value semantics table in the specification.
pub type RunnerMain = fn(&RunContext, &mut Samples) -> anyhow::Result<Option<Samples>>;

#[derive(Debug, Clone)]
pub enum OutputDest {
    Dir(String),
    Name(String),
}

#[derive(Debug, Clone)]
pub struct OutputRule {
    pub glob: String,
    pub dest: OutputDest,
}

#[derive(Clone)]
pub struct RunnerDescriptor {
    pub name: String,
    pub label: String,
    pub individual_samples: bool,
    pub link_by: Option<String>,
    /// Source text of `main`, captured at registration time (Rust has no
    /// `inspect.getsource`) so the run cache can fingerprint it.
    pub main_source: &'static str,
    pub main: RunnerMain,
    pub output_rules: Vec<OutputRule>,
    /// Backoff policy this runner's `main` can retry blocking external
    /// submissions under, via the `ctx.retry` handed to it at call time.
    pub retry: pipeweave_retry::RetryConfig,
}

impl RunnerDescriptor {
    pub fn new(name: impl Into<String>, main_source: &'static str, main: RunnerMain) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            individual_samples: false,
            link_by: None,
            main_source,
            main,
            output_rules: Vec::new(),
            retry: pipeweave_retry::RetryConfig::default(),
        }
    }
}
