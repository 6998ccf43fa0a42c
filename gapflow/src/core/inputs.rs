//! Run-level inputs and per-run options.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// User-supplied inputs for one run, keyed by field name.
///
/// Every task sees these alongside its dependency outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunInputs(BTreeMap<String, String>);

impl RunInputs {
    /// Creates empty inputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Inserts a field only if it is absent.
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_insert_with(|| value.into());
    }

    /// Gets a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Gets a field, treating whitespace-only values as missing.
    #[must_use]
    pub fn get_non_blank(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Iterates fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RunInputs {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Per-run switches controlling the revision branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Run the revision pass on a `NO` verdict too.
    #[serde(default)]
    pub revise_on_no: bool,
    /// When false the revision pass never runs.
    #[serde(default = "default_true")]
    pub revision_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            revise_on_no: false,
            revision_enabled: true,
        }
    }
}

impl RunOptions {
    /// Sets `revise_on_no`.
    #[must_use]
    pub fn with_revise_on_no(mut self, value: bool) -> Self {
        self.revise_on_no = value;
        self
    }

    /// Sets `revision_enabled`.
    #[must_use]
    pub fn with_revision_enabled(mut self, value: bool) -> Self {
        self.revision_enabled = value;
        self
    }
}
