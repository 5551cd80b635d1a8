//! TOML parameter documents.
//!
//! One table per parameter group. Missing keys take their defaults, unknown
//! keys and non-numeric values are rejected, out-of-range values are clamped
//! and reported.

use std::fs;
use std::path::Path;

use qi_core::ParameterSet;
use tracing::warn;

use crate::error::{Result, StoreError, io_error};

/// A parsed document plus the names of the values that had to be clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedParams {
    pub params: ParameterSet,
    pub clamped: Vec<&'static str>,
}

pub fn parse_params(doc: &str) -> Result<LoadedParams> {
    let mut params: ParameterSet = toml::from_str(doc)?;
    let clamped = params.clamp();
    for name in &clamped {
        warn!(tunable = name, "parameter out of range, clamped");
    }
    Ok(LoadedParams { params, clamped })
}

pub fn load_params(path: &Path) -> Result<LoadedParams> {
    let doc = fs::read_to_string(path).map_err(io_error(path))?;
    parse_params(&doc)
}

pub fn params_to_toml(params: &ParameterSet) -> Result<String> {
    toml::to_string_pretty(params)
        .map_err(|e| StoreError::InvalidData(format!("TOML encode failed: {e}")))
}

/// Write through a sibling temp file and rename, so readers never see a
/// half-written document.
pub fn save_params(path: &Path, params: &ParameterSet) -> Result<()> {
    let doc = params_to_toml(params)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(io_error(dir))?;
    }
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, doc).map_err(io_error(&tmp))?;
    fs::rename(&tmp, path).map_err(io_error(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_takes_defaults() {
        let loaded = parse_params("[flow]\ndamping = 0.9\n").unwrap();
        assert_eq!(loaded.params.flow.damping, 0.9);
        assert_eq!(loaded.params.foundation, ParameterSet::default().foundation);
        assert!(loaded.clamped.is_empty());
    }

    #[test]
    fn test_integer_values_accepted() {
        let loaded = parse_params("[interaction]\ncollapse_ratio = 5\n").unwrap();
        assert_eq!(loaded.params.interaction.collapse_ratio, 5.0);
    }

    #[test]
    fn test_out_of_range_clamped() {
        let loaded = parse_params("[flow]\ndamping = 3.0\nentropy = -1.0\n").unwrap();
        assert_eq!(loaded.params.flow.damping, 1.0);
        assert_eq!(loaded.params.flow.entropy, 0.0);
        assert_eq!(loaded.clamped, vec!["flow.damping", "flow.entropy"]);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse_params("[flow]\ndampening = 0.9\n").unwrap_err();
        assert!(matches!(err, StoreError::OutOfSchema(_)));
        let err = parse_params("[plumbing]\nx = 1.0\n").unwrap_err();
        assert!(matches!(err, StoreError::OutOfSchema(_)));
    }

    #[test]
    fn test_non_numeric_rejected() {
        let err = parse_params("[flow]\ndamping = \"high\"\n").unwrap_err();
        assert!(matches!(err, StoreError::OutOfSchema(_)));
    }

    #[test]
    fn test_save_and_load_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("best.toml");
        let mut params = ParameterSet::default();
        params.flow.damping = 0.123_456_789_012_345_6;
        params.evaluation.neutral_band_rel = 1.0 / 3.0;
        save_params(&path, &params).unwrap();
        let loaded = load_params(&path).unwrap();
        assert_eq!(loaded.params, params);
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_params(Path::new("/nonexistent/qi/params.toml")).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
