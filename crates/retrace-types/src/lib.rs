//! Shared types for the Retrace constraint-enforcement engine.
//!
//! This crate provides the foundational types used by `retrace-engine`:
//! - `RetraceError` — unified error taxonomy, including constraint violations
//! - `StepId` / `ConstraintId` — stable identities usable as map keys
//! - `FieldSpec` — a declared input field of a step's schema
//! - `TraceRecord` / `TraceSnapshot` — the execution trace and the immutable
//!   copy of it carried inside violation errors

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable identity of a pipeline step.
///
/// Steps are long-lived objects owned by the pipeline definition; their ids
/// survive the error boundary where live handles cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(uuid::Uuid);

impl StepId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a constraint. Content-addressed: constructing a constraint
/// from a `(result, message, target)` tuple already seen yields the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintId(uuid::Uuid);

impl ConstraintId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConstraintId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// ConstraintKind
// ---------------------------------------------------------------------------

/// Whether a failed check aborts the pipeline or triggers backtracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Violation is fatal unless globally suppressed.
    Hard,
    /// Violation drives the bounded backtracking retry loop.
    Soft,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintKind::Hard => write!(f, "hard"),
            ConstraintKind::Soft => write!(f, "soft"),
        }
    }
}

// ---------------------------------------------------------------------------
// Field schema
// ---------------------------------------------------------------------------

/// Named inputs and outputs of a step.
///
/// `serde_json::Map` keeps keys sorted, so rendered snapshots are
/// deterministic.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

/// Formatting rule applied when a field value is rendered into a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFormat {
    /// Render the value as plain text.
    Text,
    /// Render a JSON array as numbered passages, one per line.
    Passages,
}

impl FieldFormat {
    /// Render a field value according to this format.
    pub fn render(&self, value: &serde_json::Value) -> String {
        match self {
            FieldFormat::Text => value_text(value),
            FieldFormat::Passages => match value {
                serde_json::Value::Array(items) => items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| format!("[{}] «{}»", i + 1, value_text(item)))
                    .collect::<Vec<_>>()
                    .join("\n"),
                other => value_text(other),
            },
        }
    }
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One declared input field of a step's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Prefix text shown before the value (e.g. `"Question:"`).
    pub prefix: String,
    pub description: String,
    pub format: FieldFormat,
    /// Marks the conventional primary-input position; injected feedback
    /// fields are inserted immediately after it.
    pub primary: bool,
}

impl FieldSpec {
    /// A plain-text field.
    pub fn new(
        name: impl Into<String>,
        prefix: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            description: description.into(),
            format: FieldFormat::Text,
            primary: false,
        }
    }

    /// A passages-formatted field.
    pub fn passages(
        name: impl Into<String>,
        prefix: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            format: FieldFormat::Passages,
            ..Self::new(name, prefix, description)
        }
    }

    /// Mark this field as the primary input.
    pub fn as_primary(mut self) -> Self {
        self.primary = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Execution trace
// ---------------------------------------------------------------------------

/// One entry of the execution trace: which step ran, with what inputs, and
/// what it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub step: StepId,
    pub step_name: String,
    pub inputs: FieldMap,
    pub outputs: FieldMap,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

/// Immutable copy of the execution trace at a moment in time.
///
/// Violation errors carry one of these instead of a live reference, so the
/// failing state stays readable after the session that produced it is gone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSnapshot(Vec<TraceRecord>);

impl TraceSnapshot {
    pub fn new(records: Vec<TraceRecord>) -> Self {
        Self(records)
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The most recent entry.
    pub fn latest(&self) -> Option<&TraceRecord> {
        self.0.last()
    }

    /// The most recent entry produced by `step`.
    pub fn latest_for(&self, step: StepId) -> Option<&TraceRecord> {
        self.0.iter().rev().find(|r| r.step == step)
    }

    /// Resolve the step a backtrack should target: the most recent entry
    /// matching `target` when one is given, otherwise the most recent entry.
    /// `None` means no step could be identified (empty trace, or the target
    /// never ran).
    pub fn resolve_backtrack_step(&self, target: Option<StepId>) -> Option<StepId> {
        match target {
            Some(t) => self.latest_for(t).map(|r| r.step),
            None => self.latest().map(|r| r.step),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for all Retrace subsystems.
#[derive(Debug, thiserror::Error)]
pub enum RetraceError {
    /// A hard constraint failed and was not suppressed. Never backtracked.
    #[error("hard constraint violated: {message}")]
    HardViolation {
        id: ConstraintId,
        message: String,
        trace: TraceSnapshot,
    },

    /// A soft constraint failed and was not suppressed. Drives backtracking.
    #[error("soft constraint violated: {message}")]
    SoftViolation {
        id: ConstraintId,
        message: String,
        trace: TraceSnapshot,
    },

    /// A constraint check produced something other than a boolean. This is a
    /// configuration mistake, not a violation, and is never retried.
    #[error("constraint check produced a non-boolean result: {found}")]
    NonBooleanCheck { found: String },

    /// Augmentation would collide with a field the step already declares.
    #[error("step '{step}' already declares field '{field}'")]
    SchemaConflict { step: String, field: String },

    /// A step's own computation failed.
    #[error("step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl RetraceError {
    /// Returns `true` if the backtracking controller may recover from this
    /// error by rerunning the pipeline.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetraceError::SoftViolation { .. })
    }

    /// Returns `true` for constraint violations of either kind.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            RetraceError::HardViolation { .. } | RetraceError::SoftViolation { .. }
        )
    }

    /// The trace snapshot captured when the violation was raised, if any.
    pub fn trace(&self) -> Option<&TraceSnapshot> {
        match self {
            RetraceError::HardViolation { trace, .. }
            | RetraceError::SoftViolation { trace, .. } => Some(trace),
            _ => None,
        }
    }

    /// The id of the violated constraint, if any.
    pub fn constraint_id(&self) -> Option<ConstraintId> {
        match self {
            RetraceError::HardViolation { id, .. } | RetraceError::SoftViolation { id, .. } => {
                Some(*id)
            }
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, RetraceError>`.
pub type Result<T> = std::result::Result<T, RetraceError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
