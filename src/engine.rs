use std::sync::Arc;

use crate::brush::DabSample;
use crate::composite::CompositeOpRegistry;
use crate::device::{DeviceSnapshot, PaintDevice};
use crate::error::{PaintError, PaintResult};
use crate::geometry::Rect;
use crate::pixel::PixelBuffer;
use crate::settings::EngineSettings;
use crate::stroke::{JobSpec, StrokeHandle, StrokeOutcome, StrokeScheduler, StrokeState, StrokeStrategy};

/// One paint device plus the scheduler that strokes on it run through.
pub struct PaintEngine {
    device: Arc<PaintDevice>,
    scheduler: StrokeScheduler,
}

impl PaintEngine {
    pub fn new(device: PaintDevice, settings: &EngineSettings) -> PaintResult<Self> {
        Self::with_registry(device, settings.worker_threads, settings.registry())
    }

    pub fn with_registry(device: PaintDevice, workers: usize, registry: Arc<CompositeOpRegistry>) -> PaintResult<Self> {
        log::info!(
            "engine: {}x{} {} device {}, composite arch {}",
            device.width(),
            device.height(),
            device.format(),
            device.id(),
            registry.arch()
        );
        Ok(Self { device: Arc::new(device), scheduler: StrokeScheduler::new(workers, registry)? })
    }

    pub fn device(&self) -> &Arc<PaintDevice> {
        &self.device
    }

    pub fn registry(&self) -> &Arc<CompositeOpRegistry> {
        self.scheduler.registry()
    }

    pub fn scheduler(&self) -> &StrokeScheduler {
        &self.scheduler
    }

    pub fn begin_stroke(&self, strategy: StrokeStrategy) -> PaintResult<StrokeHandle> {
        self.scheduler.begin_stroke(Arc::clone(&self.device), strategy)
    }

    pub fn submit_dab(&self, handle: &StrokeHandle, sample: DabSample) -> PaintResult<()> {
        self.scheduler.submit_dab(handle, sample)
    }

    pub fn submit_job(&self, handle: &StrokeHandle, spec: JobSpec) -> PaintResult<()> {
        self.scheduler.submit_job(handle, spec)
    }

    pub fn end_stroke(&self, handle: &StrokeHandle) -> PaintResult<()> {
        self.scheduler.end_stroke(handle)
    }

    pub fn cancel_stroke(&self, handle: &StrokeHandle) -> PaintResult<()> {
        self.scheduler.cancel_stroke(handle)
    }

    /// Fire-and-forget: the stroke runs on but its outcome is dropped.
    pub fn detach_stroke(&self, handle: &StrokeHandle) -> PaintResult<()> {
        self.scheduler.detach(handle)
    }

    pub fn wait(&self, handle: &StrokeHandle) -> PaintResult<StrokeOutcome> {
        self.scheduler.wait(handle)
    }

    pub fn wait_idle(&self) {
        self.scheduler.wait_idle();
    }

    pub fn stroke_state(&self, handle: &StrokeHandle) -> Option<StrokeState> {
        self.scheduler.state(handle)
    }

    pub fn wrap_around_supported(&self) -> bool {
        self.scheduler.wrap_around_supported(self.device.id())
    }

    pub fn read_region(&self, rect: Rect) -> PaintResult<PixelBuffer> {
        self.device.read(rect)
    }

    /// Write pixels directly. Refused while an exclusive stroke owns the device.
    pub fn write_region(&self, buf: &PixelBuffer) -> PaintResult<()> {
        self.check_unlocked()?;
        self.device.write(buf)
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.device.snapshot()
    }

    pub fn restore(&self, snapshot: &DeviceSnapshot) -> PaintResult<()> {
        self.check_unlocked()?;
        self.device.restore(snapshot)
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    fn check_unlocked(&self) -> PaintResult<()> {
        if self.scheduler.is_device_locked(self.device.id()) {
            return Err(PaintError::DeviceLocked(self.device.id().get()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::pixel::PixelFormat;

    fn engine() -> PaintEngine {
        let device = PaintDevice::new(128, 128, PixelFormat::RGBA8).unwrap();
        PaintEngine::with_registry(device, 2, Arc::new(CompositeOpRegistry::scalar())).unwrap()
    }

    #[test]
    fn write_region_is_refused_under_an_exclusive_stroke() {
        let engine = engine();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        let strategy = StrokeStrategy::new("exclusive").exclusive(true).on_init(JobSpec::custom_device(move |_| {
            let _ = started_tx.send(());
            let _ = release_rx.lock().unwrap().recv();
            Ok(())
        }));
        let h = engine.begin_stroke(strategy).unwrap();
        started_rx.recv().unwrap();

        let buf = PixelBuffer::filled(Rect::new(0, 0, 4, 4), PixelFormat::RGBA8, &[9, 9, 9, 255]).unwrap();
        assert!(matches!(engine.write_region(&buf), Err(PaintError::DeviceLocked(_))));
        assert!(matches!(engine.restore(&engine.snapshot()), Err(PaintError::DeviceLocked(_))));

        release_tx.send(()).unwrap();
        engine.end_stroke(&h).unwrap();
        engine.wait(&h).unwrap();
        engine.write_region(&buf).unwrap();
        assert_eq!(engine.read_region(Rect::new(0, 0, 1, 1)).unwrap().data(), &[9, 9, 9, 255]);
    }

    #[test]
    fn snapshot_and_restore_round_trip() {
        let engine = engine();
        let snap = engine.snapshot();
        let h = engine.begin_stroke(StrokeStrategy::new("fill")).unwrap();
        engine.submit_job(&h, JobSpec::fill(Rect::new(0, 0, 10, 10), [0, 0, 0, 255])).unwrap();
        engine.end_stroke(&h).unwrap();
        assert!(engine.wait(&h).unwrap().is_finished());
        assert_eq!(engine.device().tile_count(), 1);
        engine.restore(&snap).unwrap();
        assert_eq!(engine.device().tile_count(), 0);
    }
}
