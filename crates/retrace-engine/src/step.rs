//! The step contract and a closure-backed implementation.
//!
//! A [`Step`] is the unit a pipeline invokes: named JSON inputs in, named
//! JSON outputs out, plus a mutable input schema and default bindings that
//! the augmentation machinery edits between retry attempts.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use retrace_types::{FieldMap, FieldSpec, Result, StepId};

/// A unit of pipeline computation.
///
/// Contract: `invoke` must fill each absent input from the current default
/// bindings before computing. That is the seam the backtracking controller
/// uses to supply feedback values without touching explicit arguments —
/// callers that pass a field themselves always win.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable identity, usable as a map key.
    fn id(&self) -> StepId;

    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;

    /// The declared input schema, in order.
    fn schema(&self) -> Vec<FieldSpec>;

    /// Replace the input schema.
    fn set_schema(&self, fields: Vec<FieldSpec>);

    /// Values supplied automatically for inputs the caller omits.
    fn default_bindings(&self) -> FieldMap;

    /// Replace the default bindings.
    fn set_default_bindings(&self, bindings: FieldMap);

    /// Run the step.
    async fn invoke(&self, inputs: FieldMap) -> Result<FieldMap>;
}

type StepFuture = Pin<Box<dyn Future<Output = Result<FieldMap>> + Send>>;
type StepFn = Box<dyn Fn(FieldMap) -> StepFuture + Send + Sync>;

/// A [`Step`] backed by an async closure.
///
/// Schema and default bindings live behind a mutex so augmentation can edit
/// them through a shared handle; the closure itself is immutable.
pub struct FnStep {
    id: StepId,
    name: String,
    shape: Mutex<StepShape>,
    run: StepFn,
}

struct StepShape {
    schema: Vec<FieldSpec>,
    bindings: FieldMap,
}

impl FnStep {
    pub fn new<F, Fut>(name: impl Into<String>, schema: Vec<FieldSpec>, f: F) -> Self
    where
        F: Fn(FieldMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FieldMap>> + Send + 'static,
    {
        Self {
            id: StepId::new(),
            name: name.into(),
            shape: Mutex::new(StepShape {
                schema,
                bindings: FieldMap::new(),
            }),
            run: Box::new(move |inputs| Box::pin(f(inputs))),
        }
    }

    /// Declare default bindings at construction time.
    pub fn with_default_bindings(self, bindings: FieldMap) -> Self {
        self.shape.lock().bindings = bindings;
        self
    }
}

#[async_trait]
impl Step for FnStep {
    fn id(&self) -> StepId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> Vec<FieldSpec> {
        self.shape.lock().schema.clone()
    }

    fn set_schema(&self, fields: Vec<FieldSpec>) {
        self.shape.lock().schema = fields;
    }

    fn default_bindings(&self) -> FieldMap {
        self.shape.lock().bindings.clone()
    }

    fn set_default_bindings(&self, bindings: FieldMap) {
        self.shape.lock().bindings = bindings;
    }

    async fn invoke(&self, mut inputs: FieldMap) -> Result<FieldMap> {
        for (key, value) in self.default_bindings() {
            inputs.entry(key).or_insert(value);
        }
        (self.run)(inputs).await
    }
}
