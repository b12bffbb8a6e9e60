//! Extension discovery and dynamic loading.
//!
//! Ported from `cellophane.src.modules.load_modules` (which walks a modules
//! directory and `importlib`s each file), adapted to Rust's ahead-of-time
//! compilation model via dynamic shared-library loading — the idiomatic
//! analogue of "import a file at runtime". Registration-function plumbing is
//! grounded on the plugin-registry pattern in the pack's `ModuleRegistry`
//! (host runtime example).
//!
//! This is the one module in the workspace that needs `unsafe`: `libloading`
//! cannot offer a safe API for pulling an arbitrary symbol out of a shared
//! object built by someone else's compiler. It is downgraded from the
//! workspace's `unsafe_code = "deny"` at the crate root and nowhere else.

#![allow(unsafe_code)]

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use pipeweave_types::api::ExtensionRegistry;
use thiserror::Error;

pub const REGISTER_SYMBOL: &[u8] = b"pipeweave_register";
pub type RegisterFn = unsafe extern "C" fn(&mut ExtensionRegistry);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read modules directory {0}: {1}")]
    ReadDir(PathBuf, std::io::Error),
}

/// Where an extension's shared library lives on disk: either a bare file at
/// the top level of the modules directory, or a subdirectory containing the
/// library plus an optional `schema.yaml`.
#[derive(Debug, Clone)]
pub struct ExtensionSource {
    pub name: String,
    pub library_path: PathBuf,
    pub schema_path: Option<PathBuf>,
}

#[derive(Debug)]
pub enum LoadOutcome {
    Loaded,
    Skipped { reason: String },
}

fn is_shared_library(path: &Path) -> bool {
    matches!(
        path.extension().and_then(OsStr::to_str),
        Some("so") | Some("dylib") | Some("dll")
    )
}

fn extension_name_from_library(path: &Path) -> String {
    let stem = path.file_stem().and_then(OsStr::to_str).unwrap_or_default();
    stem.strip_prefix("lib").unwrap_or(stem).to_string()
}

pub struct Loader;

impl Loader {
    /// Enumerate every extension under `modules_dir`: top-level shared
    /// libraries, and subdirectories containing one.
    pub fn discover(modules_dir: &Path) -> Result<Vec<ExtensionSource>, RegistryError> {
        let mut sources = Vec::new();
        let entries = std::fs::read_dir(modules_dir)
            .map_err(|e| RegistryError::ReadDir(modules_dir.to_path_buf(), e))?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && is_shared_library(&path) {
                sources.push(ExtensionSource {
                    name: extension_name_from_library(&path),
                    library_path: path,
                    schema_path: None,
                });
            } else if path.is_dir() {
                let Ok(children) = std::fs::read_dir(&path) else {
                    continue;
                };
                let mut library_path = None;
                let mut schema_path = None;
                for child in children.flatten() {
                    let child_path = child.path();
                    if child_path.is_file() && is_shared_library(&child_path) {
                        library_path = Some(child_path);
                    } else if child_path.file_name().and_then(OsStr::to_str) == Some("schema.yaml") {
                        schema_path = Some(child_path);
                    }
                }
                if let Some(library_path) = library_path {
                    let name = path
                        .file_name()
                        .and_then(OsStr::to_str)
                        .unwrap_or_default()
                        .to_string();
                    sources.push(ExtensionSource {
                        name,
                        library_path,
                        schema_path,
                    });
                }
            }
        }

        sources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sources)
    }

    /// Load one extension's shared library and call its registration entry
    /// point. Any failure — missing library, missing symbol, or a panic
    /// inside the extension's registration code — is swallowed and reported
    /// as [`LoadOutcome::Skipped`] rather than aborting the whole run,
    /// matching `load_modules`'s per-module `try`/`except`/log-and-continue.
    pub fn load(source: &ExtensionSource, registry: &mut ExtensionRegistry) -> LoadOutcome {
        // SAFETY: the library is only used for the duration of this call and
        // the symbol's signature is fixed by `RegisterFn`; a malformed
        // extension can still segfault the host, which matches the trust
        // model of dynamically loaded plugins in general.
        let library = match unsafe { Library::new(&source.library_path) } {
            Ok(lib) => lib,
            Err(err) => {
                tracing::debug!(extension = %source.name, error = %err, "failed to load extension library");
                return LoadOutcome::Skipped {
                    reason: err.to_string(),
                };
            }
        };

        let register: Symbol<RegisterFn> = match unsafe { library.get(REGISTER_SYMBOL) } {
            Ok(sym) => sym,
            Err(err) => {
                tracing::debug!(extension = %source.name, error = %err, "extension has no pipeweave_register symbol");
                return LoadOutcome::Skipped {
                    reason: err.to_string(),
                };
            }
        };

        // Extensions may install their own global `tracing` subscriber
        // during registration (to wire their own span formatting); scope it
        // to this call so it doesn't leak into the host's dispatcher, the
        // `tracing` analogue of cellophane's "snapshot/restore logging
        // handlers" around each module import.
        let noop = tracing::subscriber::NoSubscriber::default();
        let result = tracing::subscriber::with_default(noop, || {
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| unsafe {
                register(registry);
            }))
        });

        match result {
            Ok(()) => LoadOutcome::Loaded,
            Err(_) => {
                tracing::debug!(extension = %source.name, "extension registration panicked");
                LoadOutcome::Skipped {
                    reason: "registration panicked".to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_finds_top_level_and_nested_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libflat.so"), b"").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("libnested.so"), b"").unwrap();
        std::fs::write(dir.path().join("nested").join("schema.yaml"), b"{}").unwrap();

        let sources = Loader::discover(dir.path()).unwrap();
        assert_eq!(sources.len(), 2);
        let nested = sources.iter().find(|s| s.name == "nested").unwrap();
        assert!(nested.schema_path.is_some());
        let flat = sources.iter().find(|s| s.name == "flat").unwrap();
        assert!(flat.schema_path.is_none());
    }

    #[test]
    fn discover_ignores_non_library_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), b"hi").unwrap();
        let sources = Loader::discover(dir.path()).unwrap();
        assert!(sources.is_empty());
    }

    #[test]
    fn load_reports_skipped_for_missing_library() {
        let source = ExtensionSource {
            name: "ghost".into(),
            library_path: PathBuf::from("/nonexistent/libghost.so"),
            schema_path: None,
        };
        let mut registry = ExtensionRegistry::new();
        let outcome = Loader::load(&source, &mut registry);
        assert!(matches!(outcome, LoadOutcome::Skipped { .. }));
    }
}
