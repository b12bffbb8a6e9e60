//! Core data model shared across the pipeweave workspace: the
//! path-addressable [`Container`], the [`sample`] collection, mixin
//! composition, and the descriptor/builder types extensions register
//! through.

pub mod api;
pub mod container;
pub mod descriptors;
pub mod mixin;
pub mod sample;

pub use container::{Container, Key};
pub use descriptors::{
    HookDescriptor, HookFn, OutputDest, OutputRule, PostCondition, RunContext, RunnerDescriptor,
    RunnerMain, When, ALL,
};
pub use mixin::{MixinRegistry, SampleMixin, SamplesMixin};
pub use sample::{RawFiles, Sample, SampleError, Samples};
