use std::fmt;
use std::path::PathBuf;

use qi_core::CalibrationError;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Io { path: PathBuf, source: std::io::Error },
    /// Parameter document that does not match the parameter schema.
    OutOfSchema(String),
    Cases(CalibrationError),
    InvalidData(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "SQLite error: {e}"),
            StoreError::Io { path, source } => write!(f, "{}: {source}", path.display()),
            StoreError::OutOfSchema(msg) => write!(f, "parameter document out of schema: {msg}"),
            StoreError::Cases(e) => write!(f, "{e}"),
            StoreError::InvalidData(msg) => write!(f, "invalid data: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Sqlite(e) => Some(e),
            StoreError::Io { source, .. } => Some(source),
            StoreError::Cases(e) => Some(e),
            StoreError::OutOfSchema(_) | StoreError::InvalidData(_) => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<CalibrationError> for StoreError {
    fn from(e: CalibrationError) -> Self {
        StoreError::Cases(e)
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(e: toml::de::Error) -> Self {
        StoreError::OutOfSchema(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub(crate) fn io_error(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.into();
    move |source| StoreError::Io { path, source }
}
