use std::fmt;

/// Malformed chart input. Raised before any graph is built.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartError {
    PillarCount(usize),
    UnknownToken(String),
    MalformedPillar(String),
}

impl fmt::Display for ChartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartError::PillarCount(n) => write!(f, "expected 4 pillars, got {n}"),
            ChartError::UnknownToken(t) => write!(f, "unknown token: {t:?}"),
            ChartError::MalformedPillar(p) => write!(f, "malformed pillar: {p:?}"),
        }
    }
}

impl std::error::Error for ChartError {}

/// Failures of the calibration layer: bad case sets, or a checkpoint that
/// could not be written.
#[derive(Debug)]
pub enum CalibrationError {
    Case { name: String, source: ChartError },
    InvalidCaseSet(String),
    Json(serde_json::Error),
    Persist(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::Case { name, source } => write!(f, "case {name:?}: {source}"),
            CalibrationError::InvalidCaseSet(msg) => write!(f, "invalid case set: {msg}"),
            CalibrationError::Json(e) => write!(f, "case set JSON error: {e}"),
            CalibrationError::Persist(e) => write!(f, "failed to persist best parameters: {e}"),
        }
    }
}

impl std::error::Error for CalibrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CalibrationError::Case { source, .. } => Some(source),
            CalibrationError::Json(e) => Some(e),
            CalibrationError::Persist(e) => Some(e.as_ref()),
            CalibrationError::InvalidCaseSet(_) => None,
        }
    }
}

impl From<serde_json::Error> for CalibrationError {
    fn from(e: serde_json::Error) -> Self {
        CalibrationError::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, ChartError>;
