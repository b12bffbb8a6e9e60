//! The builder-pattern surface extensions use to register hooks, runners,
//! and mixins. Stands in for `cellophane`'s `@pre_hook`/`@post_hook`/
//! `@runner`/`Mixin[sample_mixin=...]` decorators — Rust has no decorator
//! syntax, so a function/descriptor pair is appended to a registry instead
//! (design note: "decorator-based registration maps to a builder pattern").

use std::collections::HashSet;

use crate::descriptors::{HookDescriptor, OutputDest, OutputRule, PostCondition, RunnerDescriptor, When};
use crate::mixin::{SampleMixin, SamplesMixin};

#[derive(Default)]
pub struct ExtensionRegistry {
    pub(crate) hooks: Vec<HookDescriptor>,
    pub(crate) runners: Vec<RunnerDescriptor>,
    pub(crate) mixins: Vec<(Box<dyn SamplesMixin>, Option<Box<dyn SampleMixin>>)>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pre_hook(&mut self, descriptor: HookDescriptor) -> &mut Self {
        debug_assert_eq!(descriptor.when, When::Pre, "pre_hook descriptor must have when=Pre");
        self.hooks.push(descriptor);
        self
    }

    pub fn post_hook(&mut self, descriptor: HookDescriptor) -> &mut Self {
        debug_assert_eq!(descriptor.when, When::Post, "post_hook descriptor must have when=Post");
        self.hooks.push(descriptor);
        self
    }

    pub fn runner(&mut self, descriptor: RunnerDescriptor) -> &mut Self {
        self.runners.push(descriptor);
        self
    }

    pub fn samples_mixin(
        &mut self,
        samples_mixin: Box<dyn SamplesMixin>,
        sample_mixin: Option<Box<dyn SampleMixin>>,
    ) -> &mut Self {
        self.mixins.push((samples_mixin, sample_mixin));
        self
    }

    pub fn into_parts(
        self,
    ) -> (
        Vec<HookDescriptor>,
        Vec<RunnerDescriptor>,
        Vec<(Box<dyn SamplesMixin>, Option<Box<dyn SampleMixin>>)>,
    ) {
        (self.hooks, self.runners, self.mixins)
    }
}

/// Fluent builder for [`HookDescriptor`], covering the `before`/`after`/
/// `priority`/`condition` knobs spec §3 attaches to a hook.
pub struct HookBuilder(HookDescriptor);

impl HookBuilder {
    pub fn pre(name: impl Into<String>, func: crate::descriptors::HookFn) -> Self {
        Self(HookDescriptor::new(name, When::Pre, func))
    }

    pub fn post(name: impl Into<String>, func: crate::descriptors::HookFn) -> Self {
        Self(HookDescriptor::new(name, When::Post, func))
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.0.label = label.into();
        self
    }

    pub fn before(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.0.before = names.into_iter().map(Into::into).collect::<HashSet<_>>();
        self
    }

    pub fn after(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.0.after = names.into_iter().map(Into::into).collect::<HashSet<_>>();
        self
    }

    pub fn priority(mut self, priority: f64) -> Self {
        self.0.priority = priority;
        self
    }

    pub fn condition(mut self, condition: PostCondition) -> Self {
        self.0.condition = Some(condition);
        self
    }

    pub fn build(self) -> HookDescriptor {
        self.0
    }
}

/// Fluent builder for [`RunnerDescriptor`].
pub struct RunnerBuilder(RunnerDescriptor);

impl RunnerBuilder {
    pub fn new(
        name: impl Into<String>,
        main_source: &'static str,
        main: crate::descriptors::RunnerMain,
    ) -> Self {
        Self(RunnerDescriptor::new(name, main_source, main))
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.0.label = label.into();
        self
    }

    pub fn individual_samples(mut self, value: bool) -> Self {
        self.0.individual_samples = value;
        self
    }

    pub fn link_by(mut self, key: impl Into<String>) -> Self {
        self.0.link_by = Some(key.into());
        self
    }

    /// Backoff policy for blocking external submissions this runner's
    /// `main` performs (e.g. a batch scheduler API call), one of the named
    /// presets in `pipeweave_retry::Policy`.
    pub fn retry(mut self, policy: pipeweave_retry::Policy) -> Self {
        self.0.retry = policy.to_config();
        self
    }

    /// A fully custom backoff policy, for a runner whose submission target
    /// doesn't fit one of the named presets.
    pub fn retry_config(mut self, config: pipeweave_retry::RetryConfig) -> Self {
        self.0.retry = config;
        self
    }

    /// Rust analogue of the `@output(glob, dst_dir|dst_name)` decorator:
    /// accumulates a declarative copy rule on the runner's descriptor. The
    /// core only stores and forwards these; an external collaborator
    /// performs the copy.
    pub fn with_output_dir(mut self, glob: impl Into<String>, dst_dir: impl Into<String>) -> Self {
        self.0.output_rules.push(OutputRule {
            glob: glob.into(),
            dest: OutputDest::Dir(dst_dir.into()),
        });
        self
    }

    pub fn with_output_name(mut self, glob: impl Into<String>, dst_name: impl Into<String>) -> Self {
        self.0.output_rules.push(OutputRule {
            glob: glob.into(),
            dest: OutputDest::Name(dst_name.into()),
        });
        self
    }

    pub fn build(self) -> RunnerDescriptor {
        self.0
    }
}
