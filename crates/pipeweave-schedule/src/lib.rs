//! Deterministic topological ordering of pre/post hooks.
//!
//! Ported from the `before`/`after`/priority model of
//! `cellophane.src.modules.Hook`, which Python resolves with
//! `graphlib.TopologicalSorter`. Rust's standard library has no equivalent,
//! so the ordering is computed with the same indegree-map Kahn's algorithm
//! `shipper::plan::topo_sort` uses for publish ordering, with the tiebreak
//! key changed from `(name, id)` to `(priority, declaration_index, name)` to
//! match hooks' declared-priority semantics.

use std::collections::{BTreeSet, HashMap, HashSet};

use pipeweave_types::{HookDescriptor, ALL};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Circular dependency among hooks: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Resolve hooks of a single phase (`pre` or `post`, already filtered by
/// caller) into execution order. Returns indices into `hooks`.
pub fn resolve(hooks: &[HookDescriptor]) -> Result<Vec<usize>, ScheduleError> {
    let declared: HashMap<&str, usize> = hooks
        .iter()
        .enumerate()
        .map(|(i, h)| (h.name.as_str(), i))
        .collect();

    // Node set: every declared hook plus every name referenced in a
    // before/after edge (so an unresolved reference is satisfied vacuously
    // rather than rejected at this layer).
    let mut nodes: HashSet<String> = hooks.iter().map(|h| h.name.clone()).collect();
    for hook in hooks {
        for name in hook.before.iter().chain(hook.after.iter()) {
            if name != ALL {
                nodes.insert(name.clone());
            }
        }
    }

    // edges[a] = { b } meaning "a must run before b".
    let mut edges: HashMap<String, BTreeSet<String>> =
        nodes.iter().map(|n| (n.clone(), BTreeSet::new())).collect();

    for hook in hooks {
        for before in &hook.before {
            if before == ALL {
                for other in hooks {
                    if other.name != hook.name {
                        edges.get_mut(&hook.name).unwrap().insert(other.name.clone());
                    }
                }
            } else {
                edges.get_mut(&hook.name).unwrap().insert(before.clone());
            }
        }
        for after in &hook.after {
            if after == ALL {
                for other in hooks {
                    if other.name != hook.name {
                        edges.get_mut(&other.name).unwrap().insert(hook.name.clone());
                    }
                }
            } else {
                edges.get_mut(after).unwrap().insert(hook.name.clone());
            }
        }
    }

    let mut indegree: HashMap<String, usize> = nodes.iter().map(|n| (n.clone(), 0)).collect();
    for targets in edges.values() {
        for target in targets {
            *indegree.get_mut(target).unwrap() += 1;
        }
    }

    let tiebreak = |name: &str| -> (f64, usize, String) {
        match declared.get(name) {
            Some(&i) => (hooks[i].priority, i, name.to_string()),
            None => (f64::INFINITY, usize::MAX, name.to_string()),
        }
    };

    let mut ready: BTreeSet<(OrderedFloat, usize, String)> = nodes
        .iter()
        .filter(|n| indegree[*n] == 0)
        .map(|n| {
            let (p, i, name) = tiebreak(n);
            (OrderedFloat(p), i, name)
        })
        .collect();

    let mut order: Vec<usize> = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();

    while let Some(entry) = ready.iter().next().cloned() {
        ready.remove(&entry);
        let name = entry.2;
        visited.insert(name.clone());
        if let Some(&i) = declared.get(name.as_str()) {
            order.push(i);
        }

        if let Some(targets) = edges.get(&name) {
            for target in targets {
                let deg = indegree.get_mut(target).unwrap();
                *deg = deg.saturating_sub(1);
                if *deg == 0 {
                    let (p, i, n) = tiebreak(target);
                    ready.insert((OrderedFloat(p), i, n));
                }
            }
        }
    }

    if visited.len() != nodes.len() {
        let stuck: Vec<String> = nodes.difference(&visited).cloned().collect();
        return Err(ScheduleError::Cycle(find_cycle(&edges, &stuck)));
    }

    Ok(order)
}

fn find_cycle(edges: &HashMap<String, BTreeSet<String>>, candidates: &[String]) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut colors: HashMap<&str, Color> = edges.keys().map(|k| (k.as_str(), Color::White)).collect();
    let mut stack: Vec<String> = Vec::new();

    fn visit<'a>(
        node: &'a str,
        edges: &'a HashMap<String, BTreeSet<String>>,
        colors: &mut HashMap<&'a str, Color>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        colors.insert(node, Color::Gray);
        stack.push(node.to_string());
        if let Some(targets) = edges.get(node) {
            for target in targets {
                match colors.get(target.as_str()) {
                    Some(Color::Gray) => {
                        let start = stack.iter().position(|n| n == target).unwrap();
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(target.clone());
                        return Some(cycle);
                    }
                    Some(Color::Black) | None => {}
                    Some(Color::White) => {
                        if let Some(cycle) = visit(target, edges, colors, stack) {
                            return Some(cycle);
                        }
                    }
                }
            }
        }
        stack.pop();
        colors.insert(node, Color::Black);
        None
    }

    for candidate in candidates {
        if colors.get(candidate.as_str()) == Some(&Color::White) {
            if let Some(cycle) = visit(candidate, edges, &mut colors, &mut stack) {
                return cycle;
            }
        }
    }
    candidates.to_vec()
}

/// `f64` wrapper giving hook priorities a total order for `BTreeSet`
/// ordering; priorities are never `NaN` in practice (they come from a
/// builder default of `f64::INFINITY` or a literal).
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedFloat(f64);

impl Eq for OrderedFloat {}
impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeweave_types::{RunContext, Samples, When};

    fn noop(_ctx: &RunContext, _samples: &mut Samples) -> anyhow::Result<()> {
        Ok(())
    }

    fn hook(name: &str) -> HookDescriptor {
        HookDescriptor::new(name, When::Pre, noop)
    }

    #[test]
    fn resolves_simple_chain_in_declared_order() {
        let mut a = hook("a");
        a.before.insert("b".to_string());
        let b = hook("b");
        let order = resolve(&[a, b]).unwrap();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn all_sentinel_in_before_runs_hook_first() {
        let mut first = hook("first");
        first.before.insert(ALL.to_string());
        let middle = hook("middle");
        let last = hook("last");
        let order = resolve(&[middle, last, first]).unwrap();
        assert_eq!(order[0], 2, "hook declaring before=all must run first");
    }

    #[test]
    fn all_sentinel_in_after_runs_hook_last() {
        let first = hook("first");
        let middle = hook("middle");
        let mut last = hook("last");
        last.after.insert(ALL.to_string());
        let order = resolve(&[first, middle, last]).unwrap();
        assert_eq!(*order.last().unwrap(), 2);
    }

    #[test]
    fn unresolved_reference_is_satisfied_vacuously() {
        let mut a = hook("a");
        a.after.insert("nonexistent".to_string());
        let order = resolve(&[a]).unwrap();
        assert_eq!(order, vec![0]);
    }

    #[test]
    fn cycle_is_detected_and_named() {
        let mut a = hook("a");
        a.after.insert("b".to_string());
        let mut b = hook("b");
        b.after.insert("a".to_string());
        let err = resolve(&[a, b]).unwrap_err();
        match err {
            ScheduleError::Cycle(names) => {
                assert!(names.contains(&"a".to_string()));
                assert!(names.contains(&"b".to_string()));
            }
        }
    }

    #[test]
    fn priority_breaks_ties_among_otherwise_ready_hooks() {
        let mut low = hook("low");
        low.priority = 10.0;
        let mut high = hook("high");
        high.priority = 1.0;
        let order = resolve(&[low, high]).unwrap();
        assert_eq!(order, vec![1, 0]);
    }
}
