//! runplot – experiment-log fetchers for parallel-coordinates viewers.
//!
//! Converts heterogeneous sources (CSV files, JSON files, training-log text,
//! built-in demo generators) into a normalized [`Experiment`]: ordered rows
//! of typed column→value mappings with a stable column vocabulary.

pub mod data;

pub use data::fetcher::{load_csv, load_json, load_log, load_log_text, load_uri};
pub use data::fetcher::{FetchError, FetchResult, Fetcher, FETCHERS};
pub use data::model::{Datapoint, Experiment, ValidationError, Value};
