//! Hard and soft constraint primitives.
//!
//! A constraint translates a boolean check on a step's output into one of
//! three outcomes: silent success, a suppressed-and-logged pass (when the
//! matching bypass flag is set), or a typed violation error carrying a
//! snapshot of the execution trace at the moment of failure.
//!
//! Constraint identity is content-addressed: a `(result, message, target)`
//! tuple already seen yields the same [`ConstraintId`] rather than a new
//! one. The registry is shared across both kinds and lives for the process.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value;

use retrace_types::{ConstraintId, ConstraintKind, Result, RetraceError, StepId};

use crate::session::Session;

type RegistryKey = (String, String, Option<StepId>);

// The result is canonicalized to its JSON text so the key is hashable.
static REGISTRY: Lazy<Mutex<HashMap<RegistryKey, ConstraintId>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn register(result: &Value, message: &str, target: Option<StepId>) -> ConstraintId {
    let key = (result.to_string(), message.to_string(), target);
    *REGISTRY.lock().entry(key).or_insert_with(ConstraintId::new)
}

/// A single correctness check, evaluated inline at the point of the check.
#[derive(Debug, Clone)]
pub struct Constraint {
    id: ConstraintId,
    kind: ConstraintKind,
    result: Value,
    message: String,
    target: Option<StepId>,
}

impl Constraint {
    fn build(
        kind: ConstraintKind,
        result: impl Into<Value>,
        message: impl Into<String>,
        target: Option<StepId>,
    ) -> Self {
        let result = result.into();
        let message = message.into();
        let id = register(&result, &message, target);
        Self {
            id,
            kind,
            result,
            message,
            target,
        }
    }

    /// A hard constraint: violation aborts the pipeline unless suppressed.
    pub fn hard(result: impl Into<Value>, message: impl Into<String>) -> Self {
        Self::build(ConstraintKind::Hard, result, message, None)
    }

    /// A soft constraint: violation triggers bounded backtracking.
    pub fn soft(result: impl Into<Value>, message: impl Into<String>) -> Self {
        Self::build(ConstraintKind::Soft, result, message, None)
    }

    /// A hard constraint attributed to a specific step.
    pub fn hard_for(
        target: StepId,
        result: impl Into<Value>,
        message: impl Into<String>,
    ) -> Self {
        Self::build(ConstraintKind::Hard, result, message, Some(target))
    }

    /// A soft constraint attributed to a specific step.
    pub fn soft_for(
        target: StepId,
        result: impl Into<Value>,
        message: impl Into<String>,
    ) -> Self {
        Self::build(ConstraintKind::Soft, result, message, Some(target))
    }

    pub fn id(&self) -> ConstraintId {
        self.id
    }

    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn target(&self) -> Option<StepId> {
        self.target
    }

    /// Evaluate the check against the session's current bypass flags.
    ///
    /// A non-boolean result is a configuration mistake and raises
    /// immediately; it is never treated as a violation.
    pub fn evaluate(&self, session: &Session) -> Result<bool> {
        let passed = match &self.result {
            Value::Bool(b) => *b,
            other => {
                return Err(RetraceError::NonBooleanCheck {
                    found: other.to_string(),
                })
            }
        };

        if passed {
            return Ok(true);
        }

        let bypassed = match self.kind {
            ConstraintKind::Hard => session.bypass_hard(),
            ConstraintKind::Soft => session.bypass_soft(),
        };

        if bypassed {
            tracing::error!(constraint = %self.id, kind = %self.kind, suppressed = true, "{}", self.message);
            return Ok(true);
        }

        tracing::error!(constraint = %self.id, kind = %self.kind, "{}", self.message);
        let trace = session.trace_snapshot();
        Err(match self.kind {
            ConstraintKind::Hard => RetraceError::HardViolation {
                id: self.id,
                message: self.message.clone(),
                trace,
            },
            ConstraintKind::Soft => RetraceError::SoftViolation {
                id: self.id,
                message: self.message.clone(),
                trace,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Inline check helpers
// ---------------------------------------------------------------------------

/// Evaluate a hard constraint inline.
pub fn check_hard(
    session: &Session,
    result: impl Into<Value>,
    message: impl Into<String>,
) -> Result<bool> {
    Constraint::hard(result, message).evaluate(session)
}

/// Evaluate a soft constraint inline.
pub fn check_soft(
    session: &Session,
    result: impl Into<Value>,
    message: impl Into<String>,
) -> Result<bool> {
    Constraint::soft(result, message).evaluate(session)
}

/// Evaluate a hard constraint attributed to `target`.
pub fn check_hard_for(
    session: &Session,
    target: StepId,
    result: impl Into<Value>,
    message: impl Into<String>,
) -> Result<bool> {
    Constraint::hard_for(target, result, message).evaluate(session)
}

/// Evaluate a soft constraint attributed to `target`.
pub fn check_soft_for(
    session: &Session,
    target: StepId,
    result: impl Into<Value>,
    message: impl Into<String>,
) -> Result<bool> {
    Constraint::soft_for(target, result, message).evaluate(session)
}
