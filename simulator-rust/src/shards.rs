//! Filesystem shard store.
//!
//! Every regular file of a shard directory is one shard, in SVMLight text:
//!
//! ```text
//! # comment
//! +1 3:0.5 17:1.25
//! ```
//!
//! Feature indices are 1-based on disk. Only the first data line of a shard
//! is used.

use std::fs;
use std::path::Path;

use gadget_protocol::{Example, Result, ShardHandle, ShardStore, SimError, MAX_FEATURE_INDEX};

#[derive(Debug, Clone, Copy, Default)]
pub struct DirShardStore;

impl DirShardStore {
    pub fn new() -> Self {
        DirShardStore
    }
}

impl ShardStore for DirShardStore {
    fn list_shards(&self, dir: &Path) -> Result<Vec<ShardHandle>> {
        let entries = fs::read_dir(dir).map_err(|e| SimError::shard_load(dir, e.to_string()))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SimError::shard_load(dir, e.to_string()))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if is_file && !hidden {
                paths.push(entry.path());
            }
        }
        paths.sort();
        tracing::debug!(dir = %dir.display(), shards = paths.len(), "Listed shards");
        Ok(paths.into_iter().map(ShardHandle::new).collect())
    }

    fn load_first_example(&self, shard: &ShardHandle) -> Result<Example> {
        let text = fs::read_to_string(shard.path())
            .map_err(|e| SimError::shard_load(shard.path(), e.to_string()))?;
        for (lineno, line) in text.lines().enumerate() {
            match parse_line(line) {
                Ok(Some(example)) => return Ok(example),
                Ok(None) => continue,
                Err(reason) => {
                    return Err(SimError::shard_load(
                        shard.path(),
                        format!("line {}: {reason}", lineno + 1),
                    ))
                }
            }
        }
        Err(SimError::shard_load(shard.path(), "no examples in shard"))
    }
}

/// Parses one SVMLight line. Blank and comment-only lines yield `None`.
pub fn parse_line(line: &str) -> std::result::Result<Option<Example>, String> {
    let body = match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let mut tokens = body.split_whitespace();
    let Some(label) = tokens.next() else {
        return Ok(None);
    };
    let label: f64 = label
        .parse()
        .map_err(|_| format!("invalid label {label:?}"))?;

    let mut features = Vec::new();
    for token in tokens {
        let (index, value) = token
            .split_once(':')
            .ok_or_else(|| format!("invalid feature {token:?}"))?;
        if index == "qid" {
            continue;
        }
        let index: usize = index
            .parse()
            .map_err(|_| format!("invalid feature index {index:?}"))?;
        if index == 0 {
            return Err("feature indices start at 1".into());
        }
        if index - 1 > MAX_FEATURE_INDEX {
            return Err(format!(
                "feature index {index} exceeds the limit of {}",
                MAX_FEATURE_INDEX + 1
            ));
        }
        let value: f64 = value
            .parse()
            .map_err(|_| format!("invalid feature value {value:?}"))?;
        features.push((index - 1, value));
    }
    Ok(Some(Example::new(label, features)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let ex = parse_line("+1 1:0.5 4:-2 # trailing").unwrap().unwrap();
        assert_eq!(ex.label, 1.0);
        assert_eq!(ex.features, vec![(0, 0.5), (3, -2.0)]);

        let ex = parse_line("0 2:1").unwrap().unwrap();
        assert_eq!(ex.label, -1.0);

        assert!(parse_line("   ").unwrap().is_none());
        assert!(parse_line("# only a comment").unwrap().is_none());
        assert!(parse_line("1 0:1").is_err());
        assert!(parse_line("1 a:b").is_err());
        assert!(parse_line("yes 1:1").is_err());
    }

    #[test]
    fn test_oversized_feature_index_is_rejected() {
        let limit = MAX_FEATURE_INDEX + 1;
        let ex = parse_line(&format!("1 {limit}:1")).unwrap().unwrap();
        assert_eq!(ex.span(), limit);
        assert!(parse_line(&format!("1 {}:1", limit + 1)).is_err());
        assert!(parse_line("+1 18446744073709551615:1").is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.dat");
        fs::write(&path, "+1 18446744073709551615:1\n").unwrap();
        let err = DirShardStore::new()
            .load_first_example(&ShardHandle::new(&path))
            .unwrap_err();
        assert!(matches!(err, SimError::ShardLoad { .. }));
    }

    #[test]
    fn test_list_shards_is_sorted_and_flat() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.dat"), "1 1:1\n").unwrap();
        fs::write(dir.path().join("a.dat"), "1 1:1\n").unwrap();
        fs::write(dir.path().join(".hidden"), "1 1:1\n").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let shards = DirShardStore::new().list_shards(dir.path()).unwrap();
        let names: Vec<_> = shards
            .iter()
            .map(|s| s.path().file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.dat", "b.dat"]);
    }

    #[test]
    fn test_load_first_example_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.dat");
        fs::write(&path, "# header\n\n-1 2:3.5\n1 1:1\n").unwrap();

        let ex = DirShardStore::new()
            .load_first_example(&ShardHandle::new(&path))
            .unwrap();
        assert_eq!(ex.label, -1.0);
        assert_eq!(ex.features, vec![(1, 3.5)]);
    }

    #[test]
    fn test_missing_and_empty_shards_fail() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirShardStore::new();
        assert!(store.list_shards(&dir.path().join("absent")).is_err());

        let empty = dir.path().join("empty.dat");
        fs::write(&empty, "# nothing\n").unwrap();
        let err = store.load_first_example(&ShardHandle::new(&empty)).unwrap_err();
        assert!(matches!(err, SimError::ShardLoad { .. }));
    }
}
