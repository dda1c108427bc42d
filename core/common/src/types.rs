//! Common types used throughout drivemigrate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Display path of an item relative to the traversal root.
///
/// Remote names may contain any character, including `/`, so the path keeps
/// its components separately and only joins them for display. It is never
/// used to locate items; lookups always go through IDs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelativePath {
    components: Vec<String>,
}

impl RelativePath {
    /// The traversal root.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Path of a child named `name` below this one.
    pub fn join(&self, name: &str) -> Self {
        let mut components = self.components.clone();
        components.push(name.to_string());
        Self { components }
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Last component.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Number of components below the root.
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.components.join("/"))
        }
    }
}
