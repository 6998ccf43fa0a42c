//! Input prechecks run before discovery.

use crate::core::RunInputs;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Result of checking run inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecheckOutcome {
    /// Inputs are good enough to run.
    Accept,
    /// Inputs are rejected; the run ends REJECTED with these reasons.
    Reject(Vec<String>),
}

impl PrecheckOutcome {
    /// Returns true for `Accept`.
    #[must_use]
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Decides whether a run's inputs may proceed.
pub trait Precheck: Send + Sync + Debug {
    /// Fills in defaults before checking. The default does nothing.
    fn prepare(&self, _inputs: &mut RunInputs) {}

    /// Checks the inputs.
    fn check(&self, inputs: &RunInputs) -> PrecheckOutcome;
}

/// Accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Precheck for AcceptAll {
    fn check(&self, _inputs: &RunInputs) -> PrecheckOutcome {
        PrecheckOutcome::Accept
    }
}

/// Rejects runs missing any required field and fills optional defaults.
#[derive(Debug, Clone)]
pub struct RequiredFieldsPrecheck {
    required: Vec<String>,
    defaults: BTreeMap<String, String>,
}

/// Fields every idea validation run needs.
pub const DEFAULT_REQUIRED_FIELDS: [&str; 6] = [
    "idea_one_liner",
    "target_customer",
    "problem_statement",
    "current_alternatives",
    "geo_market",
    "business_type",
];

impl Default for RequiredFieldsPrecheck {
    fn default() -> Self {
        Self::new(DEFAULT_REQUIRED_FIELDS)
            .with_default("constraints", "No particular constraints")
            .with_default("success_definition", "A clear point of differentiation from competitors")
    }
}

impl RequiredFieldsPrecheck {
    /// Creates a precheck requiring `fields`, with no defaults.
    #[must_use]
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            required: fields.into_iter().map(Into::into).collect(),
            defaults: BTreeMap::new(),
        }
    }

    /// Adds a default for an optional field.
    #[must_use]
    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    /// Returns the required field names.
    #[must_use]
    pub fn required(&self) -> &[String] {
        &self.required
    }
}

impl Precheck for RequiredFieldsPrecheck {
    fn prepare(&self, inputs: &mut RunInputs) {
        for (key, value) in &self.defaults {
            if inputs.get_non_blank(key).is_none() {
                inputs.insert(key.clone(), value.clone());
            }
        }
    }

    fn check(&self, inputs: &RunInputs) -> PrecheckOutcome {
        let reasons: Vec<String> = self
            .required
            .iter()
            .filter(|field| inputs.get_non_blank(field).is_none())
            .map(|field| format!("missing required input: {field}"))
            .collect();
        if reasons.is_empty() {
            PrecheckOutcome::Accept
        } else {
            PrecheckOutcome::Reject(reasons)
        }
    }
}
