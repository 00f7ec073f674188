use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use super::StrokeId;
use super::strategy::StrokeStrategy;
use crate::brush::DabSample;
use crate::composite::{CompositeOpId, CompositeOpRegistry, CompositeParams};
use crate::device::{DeviceSnapshot, PaintDevice};
use crate::error::{PaintError, PaintResult};
use crate::geometry::{Rect, TileRange};
use crate::painter::Painter;
use crate::selection::Selection;

/// Body of a custom job.
pub type JobFn = Arc<dyn Fn(&mut JobContext<'_>) -> PaintResult<()> + Send + Sync>;

/// Work description for one stroke phase or one submitted job.
#[derive(Clone)]
pub enum JobSpec {
    /// Composite a solid RGBA color over `rect` with the stroke's op.
    Fill { rect: Rect, color: [u8; 4] },
    /// Arbitrary work confined to `region`; `None` claims the whole device.
    Custom { region: Option<Rect>, run: JobFn },
    /// Put every tile the stroke touched back to its stroke-start contents.
    /// Granularity is whole tiles, so changes other strokes made to those
    /// tiles in the meantime are reverted too.
    Revert,
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSpec::Fill { rect, color } => f.debug_struct("Fill").field("rect", rect).field("color", color).finish(),
            JobSpec::Custom { region, .. } => f.debug_struct("Custom").field("region", region).finish_non_exhaustive(),
            JobSpec::Revert => f.write_str("Revert"),
        }
    }
}

impl JobSpec {
    pub fn fill(rect: Rect, color: [u8; 4]) -> Self {
        JobSpec::Fill { rect, color }
    }

    pub fn custom(region: Rect, run: impl Fn(&mut JobContext<'_>) -> PaintResult<()> + Send + Sync + 'static) -> Self {
        JobSpec::Custom { region: Some(region), run: Arc::new(run) }
    }

    /// Custom job that may touch any pixel of the device.
    pub fn custom_device(run: impl Fn(&mut JobContext<'_>) -> PaintResult<()> + Send + Sync + 'static) -> Self {
        JobSpec::Custom { region: None, run: Arc::new(run) }
    }

    /// Tiles this spec may write, and whether it claims the whole device.
    fn claim(&self, device: &PaintDevice, stroke_dirty: Rect) -> (TileRange, bool) {
        let clipped = |r: &Rect| r.intersect(&device.bounds()).map_or(TileRange::EMPTY, |c| c.tile_range());
        match self {
            JobSpec::Fill { rect, .. } => (clipped(rect), false),
            JobSpec::Custom { region: Some(r), .. } => (clipped(r), false),
            JobSpec::Custom { region: None, .. } => (device.all_tiles(), true),
            JobSpec::Revert => (clipped(&stroke_dirty), false),
        }
    }
}

/// What a custom job gets to work with.
pub struct JobContext<'a> {
    stroke: StrokeId,
    device: &'a PaintDevice,
    registry: &'a CompositeOpRegistry,
    strategy: &'a StrokeStrategy,
    op: CompositeOpId,
    params: CompositeParams,
    selection: Option<&'a Selection>,
    region: Rect,
}

impl<'a> JobContext<'a> {
    pub fn stroke_id(&self) -> StrokeId {
        self.stroke
    }

    /// Device this job paints on: the stroke's temporary device for dab-phase
    /// jobs of indirect strokes, the target device otherwise.
    pub fn device(&self) -> &'a PaintDevice {
        self.device
    }

    /// Rect the job claimed; writes outside it race with other strokes.
    pub fn region(&self) -> Rect {
        self.region
    }

    pub fn strategy(&self) -> &'a StrokeStrategy {
        self.strategy
    }

    pub fn registry(&self) -> &'a CompositeOpRegistry {
        self.registry
    }

    /// Painter preconfigured with the op, params and selection this job
    /// would use for a fill.
    pub fn painter(&self) -> PaintResult<Painter<'a>> {
        Ok(Painter::new(self.device, self.registry, self.op)?
            .with_params(self.params)
            .with_selection(self.selection))
    }
}

/// Scheduler-internal job payload.
#[derive(Clone, Debug)]
pub(crate) enum JobKind {
    Init(JobSpec),
    Dab(DabSample),
    Paint(JobSpec),
    Finish { merge: bool, spec: Option<JobSpec> },
    Cancel(JobSpec),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum JobTag {
    Init,
    Dab,
    Paint,
    Finish,
    Cancel,
}

impl JobTag {
    pub(crate) fn is_dab_phase(self) -> bool {
        matches!(self, JobTag::Dab | JobTag::Paint)
    }
}

impl fmt::Display for JobTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobTag::Init => "init",
            JobTag::Dab => "dab",
            JobTag::Paint => "paint",
            JobTag::Finish => "finish",
            JobTag::Cancel => "cancel",
        })
    }
}

impl JobKind {
    pub(crate) fn tag(&self) -> JobTag {
        match self {
            JobKind::Init(_) => JobTag::Init,
            JobKind::Dab(_) => JobTag::Dab,
            JobKind::Paint(_) => JobTag::Paint,
            JobKind::Finish { .. } => JobTag::Finish,
            JobKind::Cancel(_) => JobTag::Cancel,
        }
    }

    /// Tiles of the device the job paints on, and whether it claims all of
    /// them.
    fn claim(&self, strategy: &StrokeStrategy, device: &PaintDevice, stroke_dirty: Rect) -> (TileRange, bool) {
        match self {
            JobKind::Init(spec) | JobKind::Paint(spec) | JobKind::Cancel(spec) => spec.claim(device, stroke_dirty),
            JobKind::Dab(sample) => match strategy.brush_settings() {
                Some(brush) => (
                    brush
                        .dab_rect(sample)
                        .intersect(&device.bounds())
                        .map_or(TileRange::EMPTY, |r| r.tile_range()),
                    false,
                ),
                None => (TileRange::EMPTY, false),
            },
            JobKind::Finish { merge, spec } => {
                let mut range = if *merge {
                    stroke_dirty.intersect(&device.bounds()).map_or(TileRange::EMPTY, |r| r.tile_range())
                } else {
                    TileRange::EMPTY
                };
                let mut whole = false;
                if let Some(spec) = spec {
                    let (r, w) = spec.claim(device, stroke_dirty);
                    range = range.union(&r);
                    whole = w;
                }
                (range, whole)
            }
        }
    }
}

/// Admission footprint of a running job on its stroke's target device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Footprint {
    Tiles(TileRange),
    Device,
    /// Only touches the stroke's private temporary device.
    Private,
}

impl Footprint {
    pub(crate) fn conflicts(&self, other: &Footprint) -> bool {
        match (self, other) {
            (Footprint::Private, _) | (_, Footprint::Private) => false,
            (Footprint::Device, _) | (_, Footprint::Device) => true,
            (Footprint::Tiles(a), Footprint::Tiles(b)) => a.overlaps(b),
        }
    }
}

/// A job popped from the queue together with everything it needs to run
/// outside the scheduler lock.
pub(crate) struct Dispatch {
    pub(crate) seq: u64,
    pub(crate) stroke: StrokeId,
    pub(crate) kind: JobKind,
    pub(crate) target: Arc<PaintDevice>,
    pub(crate) temp: Option<Arc<PaintDevice>>,
    pub(crate) strategy: Arc<StrokeStrategy>,
    pub(crate) registry: Arc<CompositeOpRegistry>,
    pub(crate) lut: Option<Arc<[u8; 256]>>,
    pub(crate) before: Arc<DeviceSnapshot>,
    pub(crate) stroke_dirty: Rect,
}

pub(crate) struct JobReport {
    pub(crate) tag: JobTag,
    pub(crate) dirty: Rect,
    pub(crate) result: PaintResult<()>,
}

/// Footprint a job would claim on `target` if dispatched now.
pub(crate) fn footprint(
    kind: &JobKind,
    strategy: &StrokeStrategy,
    target: &PaintDevice,
    stroke_dirty: Rect,
) -> Footprint {
    if strategy.needs_indirect_painting() && kind.tag().is_dab_phase() {
        return Footprint::Private;
    }
    match kind.claim(strategy, target, stroke_dirty) {
        (_, true) => Footprint::Device,
        (range, false) => Footprint::Tiles(range),
    }
}

impl Dispatch {
    fn on_temp(&self) -> bool {
        self.kind.tag().is_dab_phase() && self.temp.is_some()
    }

    fn paint_device(&self) -> &PaintDevice {
        match &self.temp {
            Some(temp) if self.on_temp() => temp,
            _ => &self.target,
        }
    }

    /// Run the job. On failure (error or panic) the touched tiles are rolled
    /// back before the report is returned.
    pub(crate) fn run(self) -> JobReport {
        let tag = self.kind.tag();
        let device = self.paint_device();
        let (range, whole) = self.kind.claim(&self.strategy, device, self.stroke_dirty);
        let memento = device.capture_tiles(if whole { device.all_tiles() } else { range });

        let result = catch_unwind(AssertUnwindSafe(|| self.execute(device)))
            .unwrap_or_else(|payload| Err(PaintError::job_failed(panic_message(payload))));

        match result {
            Ok(dirty) => JobReport { tag, dirty, result: Ok(()) },
            Err(err) => {
                device.restore_tiles(memento);
                JobReport { tag, dirty: Rect::default(), result: Err(err) }
            }
        }
    }

    fn painter<'a>(&'a self, device: &'a PaintDevice) -> PaintResult<Painter<'a>> {
        let strategy = &self.strategy;
        if self.on_temp() {
            Ok(Painter::new(device, &self.registry, strategy.indirect_composite_op_id())?
                .with_params(strategy.indirect_params()))
        } else {
            Ok(Painter::new(device, &self.registry, strategy.composite_op_id())?
                .with_params(strategy.params())
                .with_selection(strategy.selection_mask()))
        }
    }

    fn execute(&self, device: &PaintDevice) -> PaintResult<Rect> {
        match &self.kind {
            JobKind::Init(spec) | JobKind::Paint(spec) | JobKind::Cancel(spec) => self.run_spec(spec, device),
            JobKind::Dab(sample) => {
                let (Some(brush), Some(lut)) = (self.strategy.brush_settings(), &self.lut) else {
                    return Ok(Rect::default());
                };
                let mut painter = self.painter(device)?;
                Ok(painter.paint_dab(brush, lut, sample)?.unwrap_or_default())
            }
            JobKind::Finish { merge, spec } => {
                let mut dirty = Rect::default();
                if *merge {
                    if let Some(temp) = &self.temp {
                        let mut painter = self.painter(&self.target)?;
                        painter.bit_blt(temp, self.stroke_dirty)?;
                        dirty = painter.dirty();
                    }
                }
                if let Some(spec) = spec {
                    dirty = dirty.union(&self.run_spec(spec, device)?);
                }
                Ok(dirty)
            }
        }
    }

    fn run_spec(&self, spec: &JobSpec, device: &PaintDevice) -> PaintResult<Rect> {
        match spec {
            JobSpec::Fill { rect, color } => {
                let mut painter = self.painter(device)?;
                painter.apply_solid(*rect, &device.format().encode_rgba8(*color), None)?;
                Ok(painter.dirty())
            }
            JobSpec::Custom { region, run } => {
                let region = match region {
                    Some(r) => r.intersect(&device.bounds()).unwrap_or_default(),
                    None => device.bounds(),
                };
                let (op, params, selection) = if self.on_temp() {
                    (self.strategy.indirect_composite_op_id(), self.strategy.indirect_params(), None)
                } else {
                    (
                        self.strategy.composite_op_id(),
                        self.strategy.params(),
                        self.strategy.selection_mask(),
                    )
                };
                let mut ctx = JobContext {
                    stroke: self.stroke,
                    device,
                    registry: &self.registry,
                    strategy: &self.strategy,
                    op,
                    params,
                    selection,
                    region,
                };
                run(&mut ctx)?;
                Ok(region)
            }
            JobSpec::Revert => {
                self.target.restore_tiles_from(&self.before, self.stroke_dirty.tile_range())?;
                Ok(Rect::default())
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("job panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("job panicked: {s}")
    } else {
        "job panicked".to_string()
    }
}
