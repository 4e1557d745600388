use memtable::{LexicographicComparator, SharedComparator};
use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::manifest::validate_comparator_name;

/// Comparators by name. The manifest stores names only, so every comparator
/// a database was created with must be registered again before reopening.
#[derive(Clone)]
pub struct ComparatorRegistry {
    by_name: HashMap<String, SharedComparator>,
}

impl Default for ComparatorRegistry {
    fn default() -> Self {
        let mut by_name = HashMap::new();
        by_name.insert(
            LexicographicComparator::NAME.to_string(),
            LexicographicComparator::shared(),
        );
        Self { by_name }
    }
}

impl ComparatorRegistry {
    /// A registry holding only the lexicographic comparator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a comparator under its own name.
    pub fn register(&mut self, comparator: SharedComparator) -> Result<&mut Self> {
        validate_comparator_name(comparator.name())?;
        self.by_name.insert(comparator.name().to_string(), comparator);
        Ok(self)
    }

    pub fn resolve(&self, name: &str) -> Result<SharedComparator> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown comparator {name:?}")))
    }

    pub fn default_comparator(&self) -> SharedComparator {
        LexicographicComparator::shared()
    }
}

impl std::fmt::Debug for ComparatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ComparatorRegistry").field("comparators", &names).finish()
    }
}
