//! On-disk state: incoming snapshots, procedure baselines, the procedure
//! dictionary, and the test-origin rules. Every write is an atomic replace.

mod data_dir;
mod error;
mod json_file;
mod snapshots;

pub use data_dir::DataDir;
pub use error::{StoreError, parse_date};
pub use json_file::{read_json, write_json};
pub use snapshots::{
    BackfillEntry, BackfillReport, ComparisonOverrides, ComparisonSource, SnapshotStore,
};
