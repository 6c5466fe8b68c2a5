//! Module registry: maps module names to their storage layout.

use coffer_core::{Associations, CommitMetadata, FileId};
use std::collections::HashMap;
use time::OffsetDateTime;

/// Planned relative paths for one commit, both under the module subtree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedPaths {
    /// Interim path the file is staged at while the record transaction runs.
    pub staging: String,
    /// Date-partitioned path the finalize phase moves the file to.
    pub final_path: String,
}

/// Storage binding for one module.
///
/// Path planning is pure: the same `(file_id, filename, when)` always
/// yields the same paths, so the finalize path can be recomputed later
/// from the persisted record alone.
#[derive(Clone, Debug)]
pub struct ModuleBinding {
    name: String,
    subtree: String,
}

impl ModuleBinding {
    pub fn new(name: impl Into<String>, subtree: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subtree: subtree.into(),
        }
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File name used at both the staging and final locations.
    pub fn staged_name(&self, file_id: &FileId, filename: &str) -> String {
        format!("{file_id}_{filename}")
    }

    /// Plan the staging and final paths for one commit.
    pub fn plan_paths(&self, file_id: &FileId, filename: &str, when: OffsetDateTime) -> PlannedPaths {
        let staged_name = self.staged_name(file_id, filename);
        PlannedPaths {
            staging: format!("{}/.staging/{staged_name}", self.subtree),
            final_path: self.final_path_for(&staged_name, when),
        }
    }

    /// Recompute the final path for an already-staged name. Used by the
    /// finalize reconciliation pass, which only has the persisted record.
    pub fn final_path_for(&self, staged_name: &str, when: OffsetDateTime) -> String {
        format!(
            "{}/{:04}/{:02}/{staged_name}",
            self.subtree,
            when.year(),
            u8::from(when.month())
        )
    }

    /// Map caller metadata to the associations attached at commit time.
    pub fn associations(&self, metadata: &CommitMetadata) -> Associations {
        Associations {
            tags: metadata.tags.clone(),
            parent: metadata.parent.clone(),
        }
    }
}

/// Registry of module bindings, keyed by module name.
pub struct ModuleRegistry {
    bindings: HashMap<String, ModuleBinding>,
}

impl ModuleRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in modules, each storing under a
    /// subtree named after itself.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for name in ["documents", "archive", "notes", "diary"] {
            registry.register(ModuleBinding::new(name, name));
        }
        registry
    }

    /// Register (or replace) a binding.
    pub fn register(&mut self, binding: ModuleBinding) {
        self.bindings.insert(binding.name.clone(), binding);
    }

    /// Look up a binding by module name.
    pub fn resolve(&self, module: &str) -> Option<&ModuleBinding> {
        self.bindings.get(module)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
