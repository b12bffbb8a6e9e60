//! Content-addressed run cache: skip a runner group whose effective config,
//! registered `main` source, and input files are unchanged since the last
//! run.
//!
//! The write path is ported from `shipper::state::atomic_write_json`'s
//! temp-file-then-`fsync`-then-rename pattern; the hash composition (config
//! + source text + head/tail of every input file) follows the
//! content-addressed task fingerprinting in the pack's turborepo task-hash
//! reference file.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use pipeweave_types::Samples;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Bytes read from the start and end of a large input file instead of the
/// whole thing, matching the pack's task-hash file's cap for large inputs.
const HEAD_TAIL_CAP: u64 = 128 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read input file {0}: {1}")]
    ReadInput(PathBuf, std::io::Error),
    #[error("failed to write cache entry at {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("failed to read cache entry at {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to serialize cached samples: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn compute(config: &Value, main_source: &str, samples: &Samples) -> Result<Self, CacheError> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(config)?);
        hasher.update(b"\0");
        hasher.update(main_source.as_bytes());
        hasher.update(b"\0");

        for sample in samples.iter() {
            hasher.update(sample.id.as_bytes());
            for path in sample.resolved_files() {
                hasher.update(hash_file(path)?.as_slice());
            }
        }

        let digest = hasher.finalize();
        let mut truncated = [0u8; 16];
        truncated.copy_from_slice(&digest[..16]);
        Ok(Fingerprint(truncated))
    }
}

fn hash_file(path: &Path) -> Result<Vec<u8>, CacheError> {
    let mut file = fs::File::open(path).map_err(|e| CacheError::ReadInput(path.to_path_buf(), e))?;
    let len = file
        .metadata()
        .map_err(|e| CacheError::ReadInput(path.to_path_buf(), e))?
        .len();

    let mut hasher = Sha256::new();
    hasher.update(len.to_le_bytes());

    if len <= HEAD_TAIL_CAP * 2 {
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| CacheError::ReadInput(path.to_path_buf(), e))?;
        hasher.update(&buf);
    } else {
        let mut head = vec![0u8; HEAD_TAIL_CAP as usize];
        file.read_exact(&mut head)
            .map_err(|e| CacheError::ReadInput(path.to_path_buf(), e))?;
        hasher.update(&head);

        let mut tail = vec![0u8; HEAD_TAIL_CAP as usize];
        file.seek(SeekFrom::End(-(HEAD_TAIL_CAP as i64)))
            .map_err(|e| CacheError::ReadInput(path.to_path_buf(), e))?;
        file.read_exact(&mut tail)
            .map_err(|e| CacheError::ReadInput(path.to_path_buf(), e))?;
        hasher.update(&tail);
    }

    Ok(hasher.finalize().to_vec())
}

/// A cache slot for one `(runner, fingerprint)` pair, rooted at
/// `outdir/<runner_name>_<fingerprint_hex[:16]>`.
pub struct CacheDir {
    dir: PathBuf,
}

impl CacheDir {
    pub fn locate(outdir: &Path, runner_name: &str, fingerprint: Fingerprint) -> Self {
        let dir = outdir.join(format!("{runner_name}_{}", &fingerprint.hex()[..16]));
        CacheDir { dir }
    }

    fn cache_path(&self) -> PathBuf {
        self.dir.join(".cache")
    }

    fn integrity_path(&self) -> PathBuf {
        self.dir.join(".integrity")
    }

    fn directory_listing_hash(&self) -> Option<String> {
        let mut entries: Vec<String> = fs::read_dir(&self.dir)
            .ok()?
            .flatten()
            .filter(|e| e.path() != self.integrity_path())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();
        let mut hasher = Sha256::new();
        for entry in &entries {
            hasher.update(entry.as_bytes());
            hasher.update(b"\0");
        }
        Some(hex::encode(hasher.finalize()))
    }

    /// Valid iff an `.integrity` sidecar exists and matches a fresh hash of
    /// the directory listing; loads `.cache` on a hit.
    pub fn try_load(&self) -> Option<Samples> {
        let expected = fs::read_to_string(self.integrity_path()).ok()?;
        let actual = self.directory_listing_hash()?;
        if expected.trim() != actual {
            return None;
        }
        let raw = fs::read_to_string(self.cache_path()).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn store(&self, samples: &Samples) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).map_err(|e| CacheError::Write(self.dir.clone(), e))?;
        atomic_write(&self.cache_path(), serde_json::to_vec_pretty(samples)?.as_slice())?;
        let listing = self.directory_listing_hash().unwrap_or_default();
        atomic_write(&self.integrity_path(), listing.as_bytes())?;
        Ok(())
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), CacheError> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp).map_err(|e| CacheError::Write(tmp.clone(), e))?;
        file.write_all(data).map_err(|e| CacheError::Write(tmp.clone(), e))?;
        file.sync_all().ok();
    }
    fs::rename(&tmp, path).map_err(|e| CacheError::Write(path.to_path_buf(), e))?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeweave_types::Sample;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn identical_inputs_yield_identical_fingerprint() {
        let samples = Samples::new(vec![Sample::new("a")]);
        let f1 = Fingerprint::compute(&json!({"x": 1}), "fn main() {}", &samples).unwrap();
        let f2 = Fingerprint::compute(&json!({"x": 1}), "fn main() {}", &samples).unwrap();
        assert_eq!(f1, f2);
    }

    #[test]
    fn config_change_flips_fingerprint() {
        let samples = Samples::new(vec![Sample::new("a")]);
        let f1 = Fingerprint::compute(&json!({"x": 1}), "fn main() {}", &samples).unwrap();
        let f2 = Fingerprint::compute(&json!({"x": 2}), "fn main() {}", &samples).unwrap();
        assert_ne!(f1, f2);
    }

    #[test]
    fn store_then_try_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let fingerprint = Fingerprint::compute(&json!({}), "src", &Samples::default()).unwrap();
        let cache = CacheDir::locate(dir.path(), "myrunner", fingerprint);
        let samples = Samples::new(vec![Sample::new("a")]);
        cache.store(&samples).unwrap();

        let loaded = cache.try_load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "a");
    }

    #[test]
    fn try_load_fails_without_integrity_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let fingerprint = Fingerprint::compute(&json!({}), "src", &Samples::default()).unwrap();
        let cache = CacheDir::locate(dir.path(), "myrunner", fingerprint);
        assert!(cache.try_load().is_none());
    }

    proptest::proptest! {
        #[test]
        fn fingerprint_is_deterministic_for_arbitrary_config(seed in 0u64..1000) {
            let samples = Samples::new(vec![Sample::new("a")]);
            let config = json!({"seed": seed});
            let f1 = Fingerprint::compute(&config, "src", &samples).unwrap();
            let f2 = Fingerprint::compute(&config, "src", &samples).unwrap();
            prop_assert_eq!(f1, f2);
        }
    }
}
