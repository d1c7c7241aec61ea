//! Per-run accumulation of feedback messages and failure exemplars.
//!
//! One [`FeedbackLog`] lives for exactly one controller run. It only grows:
//! messages are appended (deduplicated by string equality) and exemplars are
//! overwritten per `(step, constraint)` pair, never removed.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;

use retrace_types::{ConstraintId, FieldMap, StepId};

/// The failing `(input, output, message)` triple recorded for one constraint.
#[derive(Debug, Clone)]
pub struct Exemplar {
    pub inputs: FieldMap,
    pub outputs: FieldMap,
    pub message: String,
}

/// Feedback accumulated across the attempts of one backtracking run.
#[derive(Default)]
pub struct FeedbackLog {
    messages: HashMap<StepId, Vec<String>>,
    // Latest exemplar per constraint id; iteration keeps first-insertion
    // order, matching the order lines are rendered in.
    exemplars: HashMap<StepId, IndexMap<ConstraintId, Exemplar>>,
}

impl FeedbackLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `message` for `step` unless an equal message is already
    /// recorded.
    pub fn record_message(&mut self, step: StepId, message: &str) {
        let messages = self.messages.entry(step).or_default();
        if !messages.iter().any(|m| m == message) {
            messages.push(message.to_string());
        }
    }

    /// Record the latest failing exemplar for `(step, constraint)`.
    pub fn record_exemplar(&mut self, step: StepId, constraint: ConstraintId, exemplar: Exemplar) {
        self.exemplars
            .entry(step)
            .or_default()
            .insert(constraint, exemplar);
    }

    /// All messages recorded for `step`, joined with newlines in insertion
    /// order.
    pub fn feedback_text(&self, step: StepId) -> String {
        self.messages
            .get(&step)
            .map(|m| m.join("\n"))
            .unwrap_or_default()
    }

    /// One rendered line per exemplar recorded for `step`.
    pub fn exemplar_lines(&self, step: StepId) -> Vec<String> {
        self.exemplars
            .get(&step)
            .map(|exemplars| {
                exemplars
                    .values()
                    .map(|ex| {
                        format!(
                            "Failed Instruction: {} | Output: {}",
                            ex.message,
                            Value::Object(ex.outputs.clone())
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs(pairs: &[(&str, Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn exemplar(message: &str, answer: &str) -> Exemplar {
        Exemplar {
            inputs: FieldMap::new(),
            outputs: outputs(&[("answer", json!(answer))]),
            message: message.to_string(),
        }
    }

    #[test]
    fn messages_keep_insertion_order() {
        let step = StepId::new();
        let mut log = FeedbackLog::new();
        log.record_message(step, "cite a source");
        log.record_message(step, "answer in one sentence");
        assert_eq!(
            log.feedback_text(step),
            "cite a source\nanswer in one sentence"
        );
    }

    #[test]
    fn duplicate_messages_are_recorded_once() {
        let step = StepId::new();
        let mut log = FeedbackLog::new();
        log.record_message(step, "cite a source");
        log.record_message(step, "cite a source");
        assert_eq!(log.feedback_text(step), "cite a source");
    }

    #[test]
    fn messages_are_scoped_per_step() {
        let a = StepId::new();
        let b = StepId::new();
        let mut log = FeedbackLog::new();
        log.record_message(a, "for a");
        log.record_message(b, "for b");
        assert_eq!(log.feedback_text(a), "for a");
        assert_eq!(log.feedback_text(b), "for b");
        assert_eq!(log.feedback_text(StepId::new()), "");
    }

    #[test]
    fn exemplar_lines_render_message_and_output() {
        let step = StepId::new();
        let mut log = FeedbackLog::new();
        log.record_exemplar(step, ConstraintId::new(), exemplar("cite a source", "42"));
        assert_eq!(
            log.exemplar_lines(step),
            vec![r#"Failed Instruction: cite a source | Output: {"answer":"42"}"#]
        );
    }

    #[test]
    fn latest_exemplar_wins_per_constraint() {
        let step = StepId::new();
        let constraint = ConstraintId::new();
        let mut log = FeedbackLog::new();
        log.record_exemplar(step, constraint, exemplar("too vague", "first"));
        log.record_exemplar(step, constraint, exemplar("too vague", "second"));

        let lines = log.exemplar_lines(step);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("second"));
    }

    #[test]
    fn overwriting_keeps_first_insertion_order() {
        let step = StepId::new();
        let first = ConstraintId::new();
        let second = ConstraintId::new();
        let mut log = FeedbackLog::new();
        log.record_exemplar(step, first, exemplar("first check", "a"));
        log.record_exemplar(step, second, exemplar("second check", "b"));
        log.record_exemplar(step, first, exemplar("first check", "updated"));

        let lines = log.exemplar_lines(step);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("first check"));
        assert!(lines[0].contains("updated"));
        assert!(lines[1].contains("second check"));
    }

    #[test]
    fn empty_log_renders_nothing() {
        let log = FeedbackLog::new();
        let step = StepId::new();
        assert_eq!(log.feedback_text(step), "");
        assert!(log.exemplar_lines(step).is_empty());
    }
}
