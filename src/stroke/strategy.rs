use std::fmt;
use std::sync::Arc;

use super::job::JobSpec;
use crate::brush::BrushSettings;
use crate::composite::{CompositeOpId, CompositeParams};
use crate::selection::Selection;

/// Describes one user paint action: which phases contribute jobs, how dabs
/// are produced, and how the result is composited.
///
/// Every phase is optional. A strategy without a brush ignores submitted dab
/// samples; one without a finish job simply ends when its queue drains.
#[derive(Clone)]
pub struct StrokeStrategy {
    id: String,
    name: String,
    exclusive: bool,
    wrap_around: bool,
    indirect: bool,
    composite_op: CompositeOpId,
    indirect_op: CompositeOpId,
    opacity: f32,
    flow: f32,
    brush: Option<BrushSettings>,
    selection: Option<Arc<Selection>>,
    init: Option<JobSpec>,
    finish: Option<JobSpec>,
    cancel: Option<JobSpec>,
}

impl fmt::Debug for StrokeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrokeStrategy")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("exclusive", &self.exclusive)
            .field("indirect", &self.indirect)
            .field("composite_op", &self.composite_op)
            .field("opacity", &self.opacity)
            .finish_non_exhaustive()
    }
}

impl StrokeStrategy {
    /// The display name doubles as the id until [`with_id`](Self::with_id)
    /// sets one.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            exclusive: false,
            wrap_around: false,
            indirect: false,
            composite_op: CompositeOpId::Over,
            indirect_op: CompositeOpId::AlphaDarken,
            opacity: 1.0,
            flow: 1.0,
            brush: None,
            selection: None,
            init: None,
            finish: None,
            cancel: None,
        }
    }

    /// Brush stroke whose cancel reverts every tile it touched to the
    /// stroke-start state.
    pub fn painter_based(name: impl Into<String>, brush: BrushSettings) -> Self {
        Self::new(name).brush(brush).on_cancel(JobSpec::Revert)
    }

    // ---- builder ------------------------------------------------------------

    /// Stable identifier (e.g. `"brush"`), separate from the display name.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Whether the stroke copes with a wrap-around canvas. See
    /// `StrokeScheduler::wrap_around_supported`.
    pub fn supports_wrap_around(mut self, supported: bool) -> Self {
        self.wrap_around = supported;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Accumulate dabs on a private temporary device and merge at finish.
    pub fn indirect(mut self, indirect: bool) -> Self {
        self.indirect = indirect;
        self
    }

    pub fn composite_op(mut self, op: CompositeOpId) -> Self {
        self.composite_op = op;
        self
    }

    /// Op used for dabs on the temporary device (alpha-darken by default).
    pub fn indirect_composite_op(mut self, op: CompositeOpId) -> Self {
        self.indirect_op = op;
        self
    }

    pub fn opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    pub fn flow(mut self, flow: f32) -> Self {
        self.flow = flow.clamp(0.0, 1.0);
        self
    }

    pub fn brush(mut self, brush: BrushSettings) -> Self {
        self.brush = Some(brush);
        self
    }

    pub fn selection(mut self, selection: Arc<Selection>) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn on_init(mut self, spec: JobSpec) -> Self {
        self.init = Some(spec);
        self
    }

    pub fn on_finish(mut self, spec: JobSpec) -> Self {
        self.finish = Some(spec);
        self
    }

    pub fn on_cancel(mut self, spec: JobSpec) -> Self {
        self.cancel = Some(spec);
        self
    }

    // ---- accessors ----------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supports_wrap_around_mode(&self) -> bool {
        self.wrap_around
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn needs_indirect_painting(&self) -> bool {
        self.indirect
    }

    pub fn composite_op_id(&self) -> CompositeOpId {
        self.composite_op
    }

    pub fn indirect_composite_op_id(&self) -> CompositeOpId {
        self.indirect_op
    }

    pub fn brush_settings(&self) -> Option<&BrushSettings> {
        self.brush.as_ref()
    }

    pub fn selection_mask(&self) -> Option<&Selection> {
        self.selection.as_deref()
    }

    pub fn init_job(&self) -> Option<&JobSpec> {
        self.init.as_ref()
    }

    pub fn finish_job(&self) -> Option<&JobSpec> {
        self.finish.as_ref()
    }

    pub fn cancel_job(&self) -> Option<&JobSpec> {
        self.cancel.as_ref()
    }

    /// Params for compositing onto the target device.
    pub fn params(&self) -> CompositeParams {
        CompositeParams { opacity: self.opacity, flow: self.flow }
    }

    /// Params for dabs on the temporary device: full opacity, stroke flow.
    pub fn indirect_params(&self) -> CompositeParams {
        CompositeParams { opacity: 1.0, flow: self.flow }
    }
}
