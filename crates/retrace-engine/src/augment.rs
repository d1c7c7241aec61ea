//! Temporary extension of a step's input schema with feedback fields.
//!
//! During backtracking the offending step is handed two extra optional
//! inputs: free-text feedback instructions and counter-example passages
//! rendered from earlier failures. The extension is reverted when the
//! controller run ends, on every exit path, so outside an active run a
//! step's schema and bindings always equal its declared values.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use retrace_types::{FieldMap, FieldSpec, Result, RetraceError, StepId};

use crate::step::Step;

/// Name of the injected free-text feedback field.
pub const FEEDBACK_FIELD: &str = "_feedback";

/// Name of the injected counter-example passages field.
pub const COUNTER_EXAMPLES_FIELD: &str = "_counter_examples";

fn feedback_spec() -> FieldSpec {
    FieldSpec::new(
        FEEDBACK_FIELD,
        "Instruction:",
        "Some instructions you must satisfy",
    )
}

fn counter_examples_spec() -> FieldSpec {
    FieldSpec::passages(
        COUNTER_EXAMPLES_FIELD,
        "Counter Examples:",
        "Traces of some incorrect outputs that violate instructions",
    )
}

/// Remove the injected fields from an output snapshot, so recorded
/// exemplars show only the step's own outputs.
pub fn strip_injected_fields(outputs: &FieldMap) -> FieldMap {
    let mut stripped = outputs.clone();
    stripped.remove(FEEDBACK_FIELD);
    stripped.remove(COUNTER_EXAMPLES_FIELD);
    stripped
}

struct SavedShape {
    step: Arc<dyn Step>,
    schema: Vec<FieldSpec>,
    bindings: FieldMap,
}

/// Tracks augmented steps for one controller run and restores their
/// declared shape exactly once.
///
/// Dropping an `Augmenter` reverts anything still outstanding, so cleanup
/// holds across early returns and panics inside the controller.
#[derive(Default)]
pub struct Augmenter {
    saved: HashMap<StepId, SavedShape>,
}

impl Augmenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_augmented(&self, step: StepId) -> bool {
        self.saved.contains_key(&step)
    }

    /// Extend `step`'s schema with the feedback fields and bind their
    /// current values as defaults.
    ///
    /// The first application saves the step's declared schema and bindings;
    /// later applications rebuild from that saved shape, so retries refresh
    /// the feedback values without duplicating fields. The fields are
    /// inserted immediately after the field marked primary (after the
    /// declared fields when none is), preserving all other relative order.
    pub fn apply(
        &mut self,
        step: &Arc<dyn Step>,
        feedback_text: &str,
        exemplar_lines: &[String],
    ) -> Result<()> {
        let saved = match self.saved.entry(step.id()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let schema = step.schema();
                for field in &schema {
                    if field.name == FEEDBACK_FIELD || field.name == COUNTER_EXAMPLES_FIELD {
                        return Err(RetraceError::SchemaConflict {
                            step: step.name().to_string(),
                            field: field.name.clone(),
                        });
                    }
                }
                entry.insert(SavedShape {
                    step: Arc::clone(step),
                    schema,
                    bindings: step.default_bindings(),
                })
            }
        };

        let mut schema = saved.schema.clone();
        let position = schema
            .iter()
            .position(|f| f.primary)
            .map(|i| i + 1)
            .unwrap_or(schema.len());
        schema.insert(position, counter_examples_spec());
        schema.insert(position, feedback_spec());

        let mut bindings = saved.bindings.clone();
        bindings.insert(
            FEEDBACK_FIELD.to_string(),
            Value::String(feedback_text.to_string()),
        );
        bindings.insert(
            COUNTER_EXAMPLES_FIELD.to_string(),
            Value::Array(
                exemplar_lines
                    .iter()
                    .map(|line| Value::String(line.clone()))
                    .collect(),
            ),
        );

        saved.step.set_schema(schema);
        saved.step.set_default_bindings(bindings);
        tracing::debug!(step = %saved.step.name(), "augmented input schema with feedback fields");
        Ok(())
    }

    /// Restore every augmented step to its saved schema and bindings.
    pub fn revert_all(&mut self) {
        for (_, saved) in self.saved.drain() {
            saved.step.set_schema(saved.schema);
            saved.step.set_default_bindings(saved.bindings);
            tracing::debug!(step = %saved.step.name(), "reverted augmented schema");
        }
    }
}

impl Drop for Augmenter {
    fn drop(&mut self) {
        if !self.saved.is_empty() {
            self.revert_all();
        }
    }
}
