mod database_tests;

use std::fs;
use std::path::Path;

use crate::*;

/// Small blocks so a handful of keys spans several of them.
pub(crate) fn test_config(base: &Path) -> EngineConfig {
    EngineConfig::new(base).num_workers(2).max_entries_per_block(4)
}

pub(crate) fn open(base: &Path) -> Result<Engine> {
    Engine::open(test_config(base))
}

/// `key00000 -> val00000` style pair.
pub(crate) fn kv(i: usize) -> (Vec<u8>, Vec<u8>) {
    (format!("key{i:05}").into_bytes(), format!("val{i:05}").into_bytes())
}

pub(crate) fn count_segments(log_dir: &Path) -> usize {
    fs::read_dir(log_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().map_or(false, |ext| ext == "dbl"))
                .count()
        })
        .unwrap_or(0)
}

/// Names of the snapshot directories in a database directory, sorted.
pub(crate) fn snapshot_dirs(db_dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(db_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|n| parse_snapshot_dir_name(n).is_some())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
