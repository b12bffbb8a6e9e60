//! Mixin composition: the Rust-native substitute for `cellophane`'s runtime
//! base-class injection (`data.Samples.__bases__ = (*bases, mixin)`).
//!
//! Design note from the specification: "do not attempt runtime inheritance
//! surgery; build the effective type at startup from a list of contributed
//! fields." Here that list is a set of trait objects applied once, in
//! registration order, before any pre-hook runs.

use crate::sample::{Sample, Samples};

/// A samples-level augmentation contributed by an extension.
pub trait SamplesMixin: Send + Sync {
    fn augment(&self, samples: &mut Samples);
}

/// An optional paired per-sample augmentation.
pub trait SampleMixin: Send + Sync {
    fn augment(&self, sample: &mut Sample);
}

#[derive(Default)]
pub struct MixinRegistry {
    entries: Vec<(Box<dyn SamplesMixin>, Option<Box<dyn SampleMixin>>)>,
}

impl MixinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mixin pair. Fusion order is insertion order.
    pub fn register(
        &mut self,
        samples_mixin: Box<dyn SamplesMixin>,
        sample_mixin: Option<Box<dyn SampleMixin>>,
    ) {
        self.entries.push((samples_mixin, sample_mixin));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply every registered mixin, in registration order, to `samples` and
    /// then to each sample within it.
    pub fn install(&self, samples: &mut Samples) {
        for (samples_mixin, _) in &self.entries {
            samples_mixin.augment(samples);
        }
        for (_, sample_mixin) in &self.entries {
            if let Some(sample_mixin) = sample_mixin {
                for sample in samples.iter_mut() {
                    sample_mixin.augment(sample);
                }
            }
        }
    }
}
