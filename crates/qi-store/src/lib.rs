//! Persistence for qi: TOML parameter documents, JSON case sets, and a
//! SQLite store of calibration runs that doubles as the optimizer's
//! checkpoint sink.

pub mod cases;
pub mod data_dir;
pub mod error;
pub mod params_doc;
pub mod schema;
pub mod store;

pub use cases::load_cases;
pub use data_dir::{DATA_DIR_ENV, DataDir, resolve_data_dir};
pub use error::{Result, StoreError};
pub use params_doc::{LoadedParams, load_params, params_to_toml, parse_params, save_params};
pub use store::{Checkpoint, RunSink, RunSummary, Store};
