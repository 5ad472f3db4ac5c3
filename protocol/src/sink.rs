use std::path::Path;

use crate::error::Result;
use crate::types::EpochRecord;

/// Column names of the centralized metrics file.
pub const BASELINE_HEADER: [&str; 12] = [
    "iter",
    "obj_value",
    "loss_value",
    "wt_norm",
    "obj_value_difference",
    "converged",
    "num_converge_iters",
    "accuracy",
    "zero_one_error",
    "train_time",
    "read_init_time",
    "m_t",
];

/// Append-only writer of epoch records.
///
/// The first append to a path within a run starts the file with a header
/// (prefixed with `node` when the record carries a node id); later appends
/// add one row each.
pub trait MetricsSink: Send + Sync {
    fn append_row(&self, path: &Path, record: &EpochRecord) -> Result<()>;
}
