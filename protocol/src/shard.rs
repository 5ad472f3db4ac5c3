//! Access to single-example shard files.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, SimError};
use crate::types::Example;

/// Reference to one shard file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardHandle(PathBuf);

impl ShardHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ShardHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// A flat directory of shard files, each consumed at record 0.
pub trait ShardStore: Send + Sync {
    /// Shards of `dir` in a stable order. No recursion.
    fn list_shards(&self, dir: &Path) -> Result<Vec<ShardHandle>>;

    /// First example of a shard.
    fn load_first_example(&self, shard: &ShardHandle) -> Result<Example>;

    fn load_by_index(&self, shards: &[ShardHandle], index: usize) -> Result<Example> {
        let shard = shards.get(index).ok_or_else(|| {
            SimError::InvalidArgument(format!(
                "shard index {index} out of range ({} shards)",
                shards.len()
            ))
        })?;
        self.load_first_example(shard)
    }

    fn load_by_path(&self, path: &Path) -> Result<Example> {
        self.load_first_example(&ShardHandle::new(path))
    }
}
