//! The canonical per-sample record and the ordered collection operations the
//! supervisor and post-hooks need (split/filter/validate).
//!
//! Grounded on `cellophane.src.data.Sample`/`Samples`: a sample is an `id`
//! plus an optional file list plus a `done` flag plus arbitrary extension
//! fields, and a `Samples` collection is an ordered list with set-like
//! completion views layered on top.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::container::Container;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("failed to read samples file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse samples file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("sample entry is missing required field `id`")]
    MissingId,
}

/// A raw `files` entry as it appears on disk: YAML permits a `null` in the
/// sequence (as the Python source's `None in sample.files` check implies),
/// so the deserialized shape must be able to represent that before
/// [`Sample::is_valid`] rejects it.
pub type RawFiles = Vec<Option<PathBuf>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    #[serde(default)]
    pub files: Option<RawFiles>,
    #[serde(default)]
    pub done: bool,
    #[serde(flatten)]
    pub extra: Container,
}

impl Sample {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            files: None,
            done: false,
            extra: Container::new(),
        }
    }

    /// A sample is valid iff `files` is present and contains no null entries.
    pub fn is_valid(&self) -> bool {
        match &self.files {
            Some(files) => files.iter().all(Option::is_some),
            None => false,
        }
    }

    /// `files` with the null-entry invariant already upheld; only meaningful
    /// once [`Sample::is_valid`] returns true.
    pub fn resolved_files(&self) -> Vec<&PathBuf> {
        self.files
            .iter()
            .flatten()
            .filter_map(|f| f.as_ref())
            .collect()
    }

    fn link_value(&self, link_by: &str) -> Option<Value> {
        if link_by == "id" {
            return Some(Value::String(self.id.clone()));
        }
        self.extra.get(link_by).cloned()
    }
}

/// An ordered collection of [`Sample`]s.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Samples(pub Vec<Sample>);

impl std::ops::Deref for Samples {
    type Target = Vec<Sample>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for Samples {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl IntoIterator for Samples {
    type Item = Sample;
    type IntoIter = std::vec::IntoIter<Sample>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Samples {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Sample> for Samples {
    fn from_iter<T: IntoIterator<Item = Sample>>(iter: T) -> Self {
        Samples(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawSampleEntry {
    id: Value,
    #[serde(default)]
    files: Option<RawFiles>,
    #[serde(default)]
    done: bool,
    #[serde(flatten)]
    extra: Container,
}

impl Samples {
    pub fn new(samples: Vec<Sample>) -> Self {
        Samples(samples)
    }

    /// Load an ordered sample collection from a YAML sequence of mappings.
    /// `id` is coerced to a string (YAML ints/bools stringify) per spec.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Samples, SampleError> {
        let path_ref = path.as_ref();
        let text = std::fs::read_to_string(path_ref).map_err(|source| SampleError::Read {
            path: path_ref.display().to_string(),
            source,
        })?;
        let raw: Vec<RawSampleEntry> =
            serde_yaml::from_str(&text).map_err(|source| SampleError::Parse {
                path: path_ref.display().to_string(),
                source,
            })?;

        let mut samples = Vec::with_capacity(raw.len());
        for entry in raw {
            let id = match entry.id {
                Value::String(s) => s,
                Value::Null => return Err(SampleError::MissingId),
                other => other.to_string(),
            };
            samples.push(Sample {
                id,
                files: entry.files,
                done: entry.done,
                extra: entry.extra,
            });
        }
        Ok(Samples(samples))
    }

    /// Remove and return every invalid sample (non-`files` or a file list
    /// containing a null entry).
    pub fn validate(&mut self) -> Vec<Sample> {
        let (valid, invalid): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.0).into_iter().partition(Sample::is_valid);
        self.0 = valid;
        invalid
    }

    /// Partition into groups sharing an equal value at `link_by`; singleton
    /// groups if `link_by` is `None`. Groups are ordered by first
    /// appearance of their key for determinism across runs.
    pub fn split(&self, link_by: Option<&str>) -> Vec<Samples> {
        let Some(link_by) = link_by else {
            return self.0.iter().cloned().map(|s| Samples(vec![s])).collect();
        };

        let mut order: Vec<String> = Vec::new();
        let mut groups: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
        let mut key_of = |sample: &Sample| -> String {
            sample
                .link_value(link_by)
                .map(|v| v.to_string())
                .unwrap_or_else(|| format!("__ungrouped__:{}", sample.id))
        };

        for sample in &self.0 {
            let key = key_of(sample);
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(sample.clone());
        }

        order
            .into_iter()
            .map(|key| Samples(groups.remove(&key).unwrap_or_default()))
            .collect()
    }

    pub fn unique_ids(&self) -> Vec<&str> {
        let mut seen = std::collections::BTreeSet::new();
        for s in &self.0 {
            seen.insert(s.id.as_str());
        }
        seen.into_iter().collect()
    }

    /// Ids for which every sample sharing that id has `done == true`.
    pub fn complete(&self) -> Vec<&str> {
        self.grouped_by_id()
            .into_iter()
            .filter(|(_, group)| group.iter().all(|s| s.done))
            .map(|(id, _)| id)
            .collect()
    }

    /// The complement of `complete`.
    pub fn failed(&self) -> Vec<&str> {
        let complete: std::collections::BTreeSet<&str> = self.complete().into_iter().collect();
        self.unique_ids()
            .into_iter()
            .filter(|id| !complete.contains(id))
            .collect()
    }

    fn grouped_by_id(&self) -> BTreeMap<&str, Vec<&Sample>> {
        let mut groups: BTreeMap<&str, Vec<&Sample>> = BTreeMap::new();
        for sample in &self.0 {
            groups.entry(sample.id.as_str()).or_default().push(sample);
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_with(id: &str, files: Option<RawFiles>, done: bool) -> Sample {
        Sample {
            id: id.to_string(),
            files,
            done,
            extra: Container::new(),
        }
    }

    #[test]
    fn is_valid_requires_files_with_no_null_entries() {
        assert!(!sample_with("a", None, false).is_valid());
        assert!(!sample_with("a", Some(vec![None]), false).is_valid());
        assert!(sample_with("a", Some(vec![Some(PathBuf::from("x"))]), false).is_valid());
    }

    #[test]
    fn validate_removes_and_returns_invalid_samples() {
        let mut samples = Samples::new(vec![
            sample_with("a", Some(vec![Some(PathBuf::from("x"))]), false),
            sample_with("b", None, false),
        ]);
        let invalid = samples.validate();
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].id, "b");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].id, "a");
    }

    #[test]
    fn split_without_link_by_yields_singletons() {
        let samples = Samples::new(vec![sample_with("a", None, false), sample_with("b", None, false)]);
        let groups = samples.split(None);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.len() == 1));
    }

    #[test]
    fn split_by_link_key_groups_equal_values() {
        let mut a = sample_with("a", None, false);
        a.extra.set_path("batch", serde_json::json!("x"));
        let mut b = sample_with("b", None, false);
        b.extra.set_path("batch", serde_json::json!("x"));
        let mut c = sample_with("c", None, false);
        c.extra.set_path("batch", serde_json::json!("y"));

        let samples = Samples::new(vec![a, b, c]);
        let groups = samples.split(Some("batch"));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
    }

    #[test]
    fn complete_requires_every_sample_sharing_id_done() {
        let samples = Samples::new(vec![
            sample_with("a", None, true),
            sample_with("a", None, false),
            sample_with("b", None, true),
        ]);
        assert_eq!(samples.complete(), vec!["b"]);
        assert_eq!(samples.failed(), vec!["a"]);
    }
}
