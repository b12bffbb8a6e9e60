//! Collects `(samples, runner-id)` results into the complete/partial/failed
//! views post-hooks select over.
//!
//! Implements the specification's standardized reduction: a sample is
//! complete iff every runner covering it returned it with `done=true`;
//! partial is reserved for samples with at least one `done=true` return but
//! an unresolved runner set, or mixed `done`/`!done` duplicates, at
//! observation time; anything else — never returned, returned `done=false`,
//! or a crashed runner — is failed. `finalize` folds any remaining partial
//! view into failed, since nothing is still "in flight" once the supervisor
//! has torn down.

use std::collections::HashSet;

use pipeweave_process::PendingSet;
use pipeweave_types::{PostCondition, Samples};
use uuid::Uuid;

pub struct Aggregator {
    pending: PendingSet,
    all_ids: HashSet<String>,
    seen_done_true: HashSet<String>,
    seen_done_false: HashSet<String>,
    finalized: bool,
}

impl Aggregator {
    pub fn new(pending: PendingSet, all_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            pending,
            all_ids: all_ids.into_iter().collect(),
            seen_done_true: HashSet::new(),
            seen_done_false: HashSet::new(),
            finalized: false,
        }
    }

    /// Record one runner instance's reported samples.
    pub fn record(&mut self, runner_id: Uuid, samples: &Samples) {
        for sample in samples.iter() {
            self.pending.resolve(runner_id, &sample.id);
            if sample.done {
                self.seen_done_true.insert(sample.id.clone());
            } else {
                self.seen_done_false.insert(sample.id.clone());
            }
        }
    }

    fn is_complete(&self, id: &str) -> bool {
        !self.pending.is_outstanding(id) && self.seen_done_true.contains(id) && !self.seen_done_false.contains(id)
    }

    fn is_partial(&self, id: &str) -> bool {
        !self.finalized
            && self.seen_done_true.contains(id)
            && (self.pending.is_outstanding(id) || self.seen_done_false.contains(id))
    }

    pub fn complete(&self) -> HashSet<&str> {
        self.all_ids.iter().map(String::as_str).filter(|id| self.is_complete(id)).collect()
    }

    pub fn partial(&self) -> HashSet<&str> {
        self.all_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !self.is_complete(id) && self.is_partial(id))
            .collect()
    }

    pub fn failed(&self) -> HashSet<&str> {
        self.all_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !self.is_complete(id) && !self.is_partial(id))
            .collect()
    }

    /// Sweep every sample never reported at all, or still partial, into
    /// failed: there is no "still running" state once the supervisor has
    /// finished draining.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Select the subset of `full_input` that `condition` passes to a
    /// post-hook.
    pub fn filter_for(&self, condition: PostCondition, full_input: &Samples) -> Samples {
        let allowed: HashSet<&str> = match condition {
            PostCondition::Complete => self.complete(),
            PostCondition::Failed => self.failed(),
            PostCondition::Always => self
                .complete()
                .into_iter()
                .chain(self.partial())
                .chain(self.failed())
                .collect(),
        };
        full_input.iter().filter(|s| allowed.contains(s.id.as_str())).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeweave_process::RunnerInstance;
    use pipeweave_types::Sample;
    use std::path::PathBuf;

    fn instance(sample_ids: &[&str]) -> RunnerInstance {
        RunnerInstance {
            id: Uuid::new_v4(),
            runner_name: "r".to_string(),
            extension_library: PathBuf::from("lib.so"),
            samples: Samples::new(sample_ids.iter().map(|id| Sample::new(*id)).collect()),
        }
    }

    fn done(id: &str, value: bool) -> Samples {
        let mut s = Sample::new(id);
        s.done = value;
        Samples::new(vec![s])
    }

    #[test]
    fn scenario_s3_fan_out_completion() {
        let r1 = instance(&["s1", "s2", "s3"]);
        let r2 = instance(&["s1", "s2", "s3"]);
        let pending = PendingSet::build(&[r1.clone(), r2.clone()]);
        let mut agg = Aggregator::new(pending, ["s1", "s2", "s3"].map(String::from));

        agg.record(r1.id, &done("s1", true));
        agg.record(r1.id, &done("s2", true));
        agg.record(r1.id, &done("s3", true));
        agg.record(r2.id, &done("s1", true));
        agg.record(r2.id, &done("s2", false));
        agg.record(r2.id, &done("s3", true));
        agg.finalize();

        assert_eq!(agg.complete(), HashSet::from(["s1", "s3"]));
        assert_eq!(agg.failed(), HashSet::from(["s2"]));
        assert!(agg.partial().is_empty());
    }

    #[test]
    fn every_input_sample_lands_in_exactly_one_view() {
        let r1 = instance(&["s1", "s2"]);
        let pending = PendingSet::build(&[r1.clone()]);
        let mut agg = Aggregator::new(pending, ["s1", "s2"].map(String::from));
        agg.record(r1.id, &done("s1", true));
        agg.finalize();

        let c = agg.complete();
        let p = agg.partial();
        let f = agg.failed();
        assert!(c.is_disjoint(&p));
        assert!(c.is_disjoint(&f));
        assert!(p.is_disjoint(&f));
        let union: HashSet<&str> = c.union(&p).cloned().collect::<HashSet<_>>().union(&f).cloned().collect();
        assert_eq!(union, HashSet::from(["s1", "s2"]));
    }

    #[test]
    fn never_reported_sample_is_failed_after_finalize() {
        let r1 = instance(&["s1"]);
        let pending = PendingSet::build(&[r1.clone()]);
        let mut agg = Aggregator::new(pending, ["s1"].map(String::from));
        agg.finalize();
        assert_eq!(agg.failed(), HashSet::from(["s1"]));
    }

    #[test]
    fn filter_for_always_covers_complete_partial_and_failed() {
        let r1 = instance(&["s1", "s2"]);
        let pending = PendingSet::build(&[r1.clone()]);
        let mut agg = Aggregator::new(pending, ["s1", "s2"].map(String::from));
        agg.record(r1.id, &done("s1", true));
        agg.finalize();

        let full = Samples::new(vec![Sample::new("s1"), Sample::new("s2")]);
        let always = agg.filter_for(PostCondition::Always, &full);
        assert_eq!(always.len(), 2);
    }
}
