//! On-disk layout of the data directory.
//!
//! ```text
//! ~/.qi/
//! ├── qi.db          calibration runs and checkpoints
//! ├── params.toml    active parameter document (optional)
//! └── best/
//!     └── <run-id>.toml
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use qi_core::ParameterSet;
use uuid::Uuid;

use crate::error::{Result, io_error};
use crate::params_doc::{LoadedParams, load_params};
use crate::store::Store;

pub const DATA_DIR_ENV: &str = "QI_DATA_DIR";

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Explicit path, then `QI_DATA_DIR`, then `~/.qi`.
pub fn resolve_data_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    match env::var(DATA_DIR_ENV) {
        Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
        _ => dirs_home().join(".qi"),
    }
}

pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Open the data directory, creating it as needed.
    pub fn open(explicit: Option<&Path>) -> Result<Self> {
        let root = resolve_data_dir(explicit);
        fs::create_dir_all(&root).map_err(io_error(&root))?;
        Ok(Self { root })
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("qi.db")
    }

    pub fn params_path(&self) -> PathBuf {
        self.root.join("params.toml")
    }

    pub fn best_params_path(&self, run_id: Uuid) -> PathBuf {
        self.root.join("best").join(format!("{run_id}.toml"))
    }

    pub fn store(&self) -> Result<Store> {
        Store::open(&self.db_path())
    }

    /// Parameters from `path`, else the data directory's `params.toml`,
    /// else defaults.
    pub fn load_params(&self, path: Option<&Path>) -> Result<LoadedParams> {
        match path {
            Some(p) => load_params(p),
            None => {
                let default = self.params_path();
                if default.exists() {
                    load_params(&default)
                } else {
                    Ok(LoadedParams {
                        params: ParameterSet::default(),
                        clamped: Vec::new(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params_doc::save_params;

    #[test]
    fn test_explicit_dir_wins() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_data_dir(Some(dir.path())), dir.path());
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        let data = DataDir::open(Some(&root)).unwrap();
        assert!(root.is_dir());
        data.store().unwrap();
        assert!(data.db_path().exists());
        let id = Uuid::new_v4();
        assert!(data.best_params_path(id).starts_with(root.join("best")));
    }

    #[test]
    fn test_load_params_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::open(Some(dir.path())).unwrap();
        assert_eq!(data.load_params(None).unwrap().params, ParameterSet::default());

        let mut tuned = ParameterSet::default();
        tuned.flow.entropy = 0.11;
        save_params(&data.params_path(), &tuned).unwrap();
        assert_eq!(data.load_params(None).unwrap().params, tuned);

        let other = dir.path().join("other.toml");
        save_params(&other, &ParameterSet::default()).unwrap();
        assert_eq!(
            data.load_params(Some(&other)).unwrap().params,
            ParameterSet::default()
        );
    }
}
