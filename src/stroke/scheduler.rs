// ============================================================================
// STROKE SCHEDULER – worker pool with per-device admission rules
// ============================================================================
//
// Admission, checked under the queue lock each time a worker looks for work:
//   * a stroke runs at most one job at a time, in submission order;
//   * jobs of different strokes on the same device may overlap in time only
//     if their tile footprints are disjoint;
//   * an exclusive stroke owns its device from its first dispatched job until
//     it is done, and a pending exclusive stroke holds back newer work (the
//     oldest pending exclusive stroke wins).

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use super::job::{Dispatch, Footprint, JobKind, JobReport, JobSpec, JobTag, footprint};
use super::strategy::StrokeStrategy;
use super::{StrokeEnd, StrokeHandle, StrokeId, StrokeOutcome, StrokeState};
use crate::brush::DabSample;
use crate::composite::CompositeOpRegistry;
use crate::device::{DeviceId, DeviceSnapshot, PaintDevice};
use crate::error::{PaintError, PaintResult};
use crate::geometry::Rect;

struct StrokeEntry {
    id: StrokeId,
    target: Arc<PaintDevice>,
    temp: Option<Arc<PaintDevice>>,
    strategy: Arc<StrokeStrategy>,
    lut: Option<Arc<[u8; 256]>>,
    before: Arc<DeviceSnapshot>,
    state: StrokeState,
    jobs: VecDeque<JobKind>,
    running: Option<Footprint>,
    ended: bool,
    cancelled: bool,
    /// Nobody will `wait` on this stroke; drop its outcome when done.
    detached: bool,
    holds_device: bool,
    dirty: Rect,
    dabs_applied: usize,
    error: Option<PaintError>,
}

impl StrokeEntry {
    fn is_exclusive(&self) -> bool {
        self.strategy.is_exclusive()
    }

    fn accepts_jobs(&self) -> bool {
        !self.ended && !self.cancelled
    }

    /// Once the finish job is dispatched the stroke can only finish.
    fn accepts_cancel(&self) -> bool {
        !self.cancelled && self.state != StrokeState::Finishing
    }

    /// Drop queued dab-phase and finish work, then queue the cancel job.
    fn cancel(&mut self) {
        self.cancelled = true;
        self.state = StrokeState::Cancelling;
        self.jobs.retain(|job| matches!(job, JobKind::Init(_)));
        if let Some(spec) = self.strategy.cancel_job() {
            self.jobs.push_back(JobKind::Cancel(spec.clone()));
        }
    }
}

#[derive(Default)]
struct Queue {
    /// Live strokes keyed by creation sequence number (oldest first).
    strokes: BTreeMap<u64, StrokeEntry>,
    index: HashMap<StrokeId, u64>,
    outcomes: HashMap<StrokeId, StrokeOutcome>,
    next_seq: u64,
    shutdown: bool,
}

impl Queue {
    fn seq_of(&self, id: StrokeId) -> PaintResult<u64> {
        match self.index.get(&id) {
            Some(&seq) => Ok(seq),
            None if self.outcomes.contains_key(&id) => Err(PaintError::StrokeClosed(id.to_string())),
            None => Err(PaintError::UnknownStroke(id.to_string())),
        }
    }

    fn entry_mut(&mut self, id: StrokeId) -> PaintResult<(u64, &mut StrokeEntry)> {
        let seq = self.seq_of(id)?;
        match self.strokes.get_mut(&seq) {
            Some(entry) => Ok((seq, entry)),
            None => Err(PaintError::UnknownStroke(id.to_string())),
        }
    }

    fn open_entry(&mut self, id: StrokeId) -> PaintResult<&mut StrokeEntry> {
        let (_, entry) = self.entry_mut(id)?;
        if !entry.accepts_jobs() {
            return Err(PaintError::StrokeClosed(id.to_string()));
        }
        Ok(entry)
    }

    /// Whether stroke `seq` may start a job with footprint `fp` right now.
    fn admissible(&self, seq: u64, fp: &Footprint) -> bool {
        let Some(s) = self.strokes.get(&seq) else { return false };
        let device = s.target.id();
        for (&oseq, o) in &self.strokes {
            if oseq == seq || o.target.id() != device {
                continue;
            }
            if o.is_exclusive() && (o.holds_device || (!o.jobs.is_empty() && (!s.is_exclusive() || oseq < seq))) {
                return false;
            }
            if let Some(running) = &o.running {
                if s.is_exclusive() || running.conflicts(fp) {
                    return false;
                }
            }
        }
        true
    }

    /// Pop the first admissible job, oldest stroke first.
    fn next_dispatch(&mut self, registry: &Arc<CompositeOpRegistry>) -> Option<Dispatch> {
        let candidates: Vec<(u64, Footprint)> = self
            .strokes
            .iter()
            .filter(|(_, e)| e.running.is_none())
            .filter_map(|(&seq, e)| {
                let job = e.jobs.front()?;
                Some((seq, footprint(job, &e.strategy, &e.target, e.dirty)))
            })
            .collect();

        let (seq, fp) = candidates.into_iter().find(|(seq, fp)| self.admissible(*seq, fp))?;
        let entry = self.strokes.get_mut(&seq)?;
        let kind = entry.jobs.pop_front()?;
        entry.running = Some(fp);
        entry.holds_device = true;
        match kind.tag() {
            JobTag::Init if entry.state == StrokeState::Created => entry.state = StrokeState::Initializing,
            JobTag::Finish if !entry.cancelled => entry.state = StrokeState::Finishing,
            _ => {}
        }
        log::trace!("stroke {} dispatch {} job ({:?})", entry.id, kind.tag(), fp);

        Some(Dispatch {
            seq,
            stroke: entry.id,
            kind,
            target: Arc::clone(&entry.target),
            temp: entry.temp.clone(),
            strategy: Arc::clone(&entry.strategy),
            registry: Arc::clone(registry),
            lut: entry.lut.clone(),
            before: Arc::clone(&entry.before),
            stroke_dirty: entry.dirty,
        })
    }

    fn complete(&mut self, seq: u64, report: JobReport) {
        let Some(entry) = self.strokes.get_mut(&seq) else { return };
        entry.running = None;
        entry.dirty = entry.dirty.union(&report.dirty);
        match report.result {
            Ok(()) => {
                if report.tag.is_dab_phase() {
                    entry.dabs_applied += 1;
                }
                if report.tag == JobTag::Init && entry.state == StrokeState::Initializing {
                    entry.state = StrokeState::Active;
                }
            }
            Err(err) => {
                log::warn!("stroke {} {} job failed: {}", entry.id, report.tag, err);
                if entry.error.is_none() {
                    entry.error = Some(err);
                }
                if report.tag == JobTag::Cancel {
                    entry.cancelled = true;
                    entry.jobs.clear();
                } else if !entry.cancelled {
                    entry.cancel();
                }
            }
        }
        self.settle(seq);
    }

    /// Move the stroke to `Done` if it has nothing left to do.
    fn settle(&mut self, seq: u64) {
        let done = match self.strokes.get(&seq) {
            Some(e) => e.running.is_none() && e.jobs.is_empty() && (e.ended || e.cancelled),
            None => false,
        };
        if !done {
            return;
        }
        let Some(entry) = self.strokes.remove(&seq) else { return };
        self.index.remove(&entry.id);

        let end = if entry.cancelled { StrokeEnd::Cancelled } else { StrokeEnd::Finished };
        log::debug!(
            "stroke {} '{}' done: {:?}, {} dab job(s), dirty {:?}",
            entry.id,
            entry.strategy.name(),
            end,
            entry.dabs_applied,
            entry.dirty
        );
        if entry.detached {
            return;
        }
        let before = Arc::try_unwrap(entry.before).unwrap_or_else(|shared| (*shared).clone());
        let outcome = StrokeOutcome {
            id: entry.id,
            end,
            dabs_applied: entry.dabs_applied,
            dirty: (!entry.dirty.is_empty()).then_some(entry.dirty),
            error: entry.error,
            before,
            after: entry.target.snapshot(),
        };
        self.outcomes.insert(entry.id, outcome);
    }
}

struct Shared {
    queue: Mutex<Queue>,
    work_ready: Condvar,
    stroke_done: Condvar,
    registry: Arc<CompositeOpRegistry>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.work_ready.notify_all();
        self.stroke_done.notify_all();
    }
}

/// Runs stroke jobs on a pool of worker threads.
///
/// Jobs are synchronous; callers interact through handles and block only in
/// [`wait`](Self::wait) / [`wait_idle`](Self::wait_idle). Dropping the
/// scheduler cancels every unfinished stroke and joins the workers.
pub struct StrokeScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl StrokeScheduler {
    /// Spawn `workers` threads (0 = available parallelism).
    pub fn new(workers: usize, registry: Arc<CompositeOpRegistry>) -> PaintResult<Self> {
        let count = if workers == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            workers
        };
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            work_ready: Condvar::new(),
            stroke_done: Condvar::new(),
            registry,
        });
        let mut handles = Vec::with_capacity(count);
        for i in 0..count {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("tilepaint-worker-{i}"))
                .spawn(move || worker_loop(shared))?;
            handles.push(handle);
        }
        log::debug!("stroke scheduler started with {} worker(s)", count);
        Ok(Self { shared, workers: Mutex::new(handles), worker_count: count })
    }

    pub fn registry(&self) -> &Arc<CompositeOpRegistry> {
        &self.shared.registry
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Register a stroke on `device`. The composite ops the strategy needs are
    /// resolved up front so an unsupported op fails here rather than in a job.
    pub fn begin_stroke(&self, device: Arc<PaintDevice>, strategy: StrokeStrategy) -> PaintResult<StrokeHandle> {
        let registry = &self.shared.registry;
        registry.get(strategy.composite_op_id(), device.format())?;
        let temp = if strategy.needs_indirect_painting() {
            registry.get(strategy.indirect_composite_op_id(), device.format())?;
            Some(Arc::new(PaintDevice::new(device.width(), device.height(), device.format())?))
        } else {
            None
        };

        let id = StrokeId::new();
        let lut = strategy.brush_settings().map(|b| Arc::new(b.alpha_lut()));
        let mut jobs = VecDeque::new();
        let state = match strategy.init_job() {
            Some(spec) => {
                jobs.push_back(JobKind::Init(spec.clone()));
                StrokeState::Created
            }
            None => StrokeState::Active,
        };
        let before = Arc::new(device.snapshot());

        let mut q = self.shared.lock();
        if q.shutdown {
            return Err(PaintError::StrokeClosed(format!("{id} (scheduler shut down)")));
        }
        log::debug!(
            "stroke {} '{}' [{}] begins on device {} (exclusive={}, indirect={})",
            id,
            strategy.name(),
            strategy.id(),
            device.id(),
            strategy.is_exclusive(),
            strategy.needs_indirect_painting()
        );
        let seq = q.next_seq;
        q.next_seq += 1;
        q.index.insert(id, seq);
        q.strokes.insert(
            seq,
            StrokeEntry {
                id,
                target: device,
                temp,
                strategy: Arc::new(strategy),
                lut,
                before,
                state,
                jobs,
                running: None,
                ended: false,
                cancelled: false,
                detached: false,
                holds_device: false,
                dirty: Rect::default(),
                dabs_applied: 0,
                error: None,
            },
        );
        drop(q);
        self.shared.work_ready.notify_all();
        Ok(StrokeHandle::new(id))
    }

    /// Queue one dab. Strategies without a brush produce no job.
    pub fn submit_dab(&self, handle: &StrokeHandle, sample: DabSample) -> PaintResult<()> {
        let mut q = self.shared.lock();
        let entry = q.open_entry(handle.id())?;
        if entry.strategy.brush_settings().is_none() {
            return Ok(());
        }
        entry.jobs.push_back(JobKind::Dab(sample));
        drop(q);
        self.shared.work_ready.notify_all();
        Ok(())
    }

    /// Queue an explicit dab-phase job.
    pub fn submit_job(&self, handle: &StrokeHandle, spec: JobSpec) -> PaintResult<()> {
        let mut q = self.shared.lock();
        let entry = q.open_entry(handle.id())?;
        entry.jobs.push_back(JobKind::Paint(spec));
        drop(q);
        self.shared.work_ready.notify_all();
        Ok(())
    }

    /// No more dabs; queue the finish phase. Ending twice is a no-op.
    pub fn end_stroke(&self, handle: &StrokeHandle) -> PaintResult<()> {
        let mut q = self.shared.lock();
        if q.outcomes.contains_key(&handle.id()) {
            return Ok(());
        }
        let (seq, entry) = q.entry_mut(handle.id())?;
        if entry.ended || entry.cancelled {
            return Ok(());
        }
        entry.ended = true;
        let merge = entry.temp.is_some();
        let spec = entry.strategy.finish_job().cloned();
        if merge || spec.is_some() {
            entry.jobs.push_back(JobKind::Finish { merge, spec });
        }
        log::debug!("stroke {} ended with {} queued job(s)", entry.id, entry.jobs.len());
        q.settle(seq);
        drop(q);
        self.shared.notify();
        Ok(())
    }

    /// Discard queued dab and finish jobs and run the cancel phase. A job
    /// already running completes first. Cancelling a done stroke, or one whose
    /// finish job has started, is a no-op.
    pub fn cancel_stroke(&self, handle: &StrokeHandle) -> PaintResult<()> {
        let mut q = self.shared.lock();
        if q.outcomes.contains_key(&handle.id()) {
            return Ok(());
        }
        let (seq, entry) = q.entry_mut(handle.id())?;
        if !entry.accepts_cancel() {
            log::trace!("stroke {} cancel ignored in state {:?}", entry.id, entry.state);
            return Ok(());
        }
        log::debug!("stroke {} cancelled ({} queued job(s) dropped)", entry.id, entry.jobs.len());
        entry.cancel();
        q.settle(seq);
        drop(q);
        self.shared.notify();
        Ok(())
    }

    /// Give up the stroke's outcome. A live stroke keeps running and drops its
    /// outcome (and the snapshots in it) when done; a done stroke's stored
    /// outcome is dropped now. Afterwards `wait` reports `UnknownStroke`.
    pub fn detach(&self, handle: &StrokeHandle) -> PaintResult<()> {
        let mut q = self.shared.lock();
        if q.outcomes.remove(&handle.id()).is_some() {
            return Ok(());
        }
        let (_, entry) = q.entry_mut(handle.id())?;
        entry.detached = true;
        drop(q);
        self.shared.stroke_done.notify_all();
        Ok(())
    }

    /// Block until the stroke is done and take its outcome. Blocks forever on
    /// a stroke that is never ended or cancelled.
    pub fn wait(&self, handle: &StrokeHandle) -> PaintResult<StrokeOutcome> {
        let id = handle.id();
        let mut q = self.shared.lock();
        loop {
            if let Some(outcome) = q.outcomes.remove(&id) {
                return Ok(outcome);
            }
            if !q.index.contains_key(&id) {
                return Err(PaintError::UnknownStroke(id.to_string()));
            }
            q = self.shared.stroke_done.wait(q).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until no stroke is live.
    pub fn wait_idle(&self) {
        let mut q = self.shared.lock();
        while !q.strokes.is_empty() {
            q = self.shared.stroke_done.wait(q).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn state(&self, handle: &StrokeHandle) -> Option<StrokeState> {
        let q = self.shared.lock();
        if q.outcomes.contains_key(&handle.id()) {
            return Some(StrokeState::Done);
        }
        let seq = q.index.get(&handle.id())?;
        q.strokes.get(seq).map(|e| e.state)
    }

    /// True while an exclusive stroke owns `device`.
    pub fn is_device_locked(&self, device: DeviceId) -> bool {
        let q = self.shared.lock();
        q.strokes
            .values()
            .any(|e| e.is_exclusive() && e.holds_device && e.target.id() == device)
    }

    /// True unless a live stroke on `device` cannot handle a wrap-around
    /// canvas. Callers toggle wrap-around painting only while this holds.
    pub fn wrap_around_supported(&self, device: DeviceId) -> bool {
        let q = self.shared.lock();
        q.strokes
            .values()
            .filter(|e| e.target.id() == device)
            .all(|e| e.strategy.supports_wrap_around_mode())
    }

    pub fn live_strokes(&self) -> usize {
        self.shared.lock().strokes.len()
    }

    /// Cancel every unfinished stroke, let the workers drain the queue and
    /// join them. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut q = self.shared.lock();
            q.shutdown = true;
            let seqs: Vec<u64> = q.strokes.keys().copied().collect();
            for seq in seqs {
                if let Some(entry) = q.strokes.get_mut(&seq) {
                    if entry.accepts_cancel() {
                        log::debug!("stroke {} cancelled by shutdown", entry.id);
                        entry.cancel();
                    }
                }
                q.settle(seq);
            }
        }
        self.shared.notify();

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            workers.drain(..).collect()
        };
        for handle in handles {
            if handle.join().is_err() {
                log::error!("stroke worker panicked during shutdown");
            }
        }
    }
}

impl Drop for StrokeScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let dispatch = {
            let mut q = shared.lock();
            loop {
                if let Some(d) = q.next_dispatch(&shared.registry) {
                    break d;
                }
                if q.shutdown && q.strokes.is_empty() {
                    return;
                }
                q = shared.work_ready.wait(q).unwrap_or_else(PoisonError::into_inner);
            }
        };
        let seq = dispatch.seq;
        let report = dispatch.run();
        shared.lock().complete(seq, report);
        shared.notify();
    }
}
