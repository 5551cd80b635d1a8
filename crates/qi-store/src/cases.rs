use std::fs;
use std::path::Path;

use qi_core::CaseSet;

use crate::error::{Result, io_error};

/// Read and validate a JSON case-set file.
pub fn load_cases(path: &Path) -> Result<CaseSet> {
    let json = fs::read_to_string(path).map_err(io_error(path))?;
    let cases = CaseSet::from_json(&json)?;
    tracing::info!(path = %path.display(), cases = cases.len(), "case set loaded");
    Ok(cases)
}
