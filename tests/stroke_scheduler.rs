use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tilepaint::{
    BrushSettings, CompositeOpRegistry, DabSample, JobSpec, PaintDevice, PaintEngine, PaintError, PixelFormat, Rect,
    StrokeEnd, StrokeHandle, StrokeState, StrokeStrategy,
};

const BLACK: [u8; 4] = [0, 0, 0, 255];
const CLEAR: [u8; 4] = [0, 0, 0, 0];

fn engine(workers: usize) -> PaintEngine {
    let device = PaintDevice::new(128, 128, PixelFormat::RGBA8).unwrap();
    PaintEngine::with_registry(device, workers, Arc::new(CompositeOpRegistry::scalar())).unwrap()
}

fn hard_brush() -> BrushSettings {
    BrushSettings { diameter: 6.0, hardness: 1.0, anti_aliased: false, color: BLACK, spacing: 0.25 }
}

/// Dab centers on a diagonal, far enough apart that dabs never overlap.
fn dab(i: usize) -> DabSample {
    DabSample::new(8.5 + i as f32 * 12.0, 8.5 + i as f32 * 12.0)
}

fn px(engine: &PaintEngine, x: i32, y: i32) -> Vec<u8> {
    engine.device().pixel(x, y).unwrap()
}

/// Custom job that signals when it starts and blocks until released. Lets a
/// test hold a stroke at a known point in its queue.
fn gate() -> (JobSpec, Receiver<()>, Sender<()>) {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let spec = JobSpec::custom(Rect::new(120, 0, 1, 1), move |_| {
        let _ = started_tx.send(());
        let _ = release_rx.lock().unwrap().recv();
        Ok(())
    });
    (spec, started_rx, release_tx)
}

/// Submit `n` dabs, hold the stroke at a gate, queue `m - n` more dabs and
/// cancel while the gate is closed.
fn cancel_after(engine: &PaintEngine, strategy: StrokeStrategy, n: usize, m: usize) -> StrokeHandle {
    let h = engine.begin_stroke(strategy).unwrap();
    for i in 0..n {
        engine.submit_dab(&h, dab(i)).unwrap();
    }
    let (spec, started, release) = gate();
    engine.submit_job(&h, spec).unwrap();
    started.recv().unwrap();
    for i in n..m {
        engine.submit_dab(&h, dab(i)).unwrap();
    }
    engine.cancel_stroke(&h).unwrap();
    assert_eq!(engine.stroke_state(&h), Some(StrokeState::Cancelling));
    release.send(()).unwrap();
    h
}

#[test]
fn disjoint_strokes_both_complete() {
    let engine = engine(4);
    let left = engine.begin_stroke(StrokeStrategy::new("left")).unwrap();
    let right = engine.begin_stroke(StrokeStrategy::new("right")).unwrap();
    for y in (0..128).step_by(16) {
        engine.submit_job(&left, JobSpec::fill(Rect::new(0, y, 64, 16), [255, 0, 0, 255])).unwrap();
        engine.submit_job(&right, JobSpec::fill(Rect::new(64, y, 64, 16), [0, 0, 255, 255])).unwrap();
    }
    engine.end_stroke(&left).unwrap();
    engine.end_stroke(&right).unwrap();

    let l = engine.wait(&left).unwrap();
    let r = engine.wait(&right).unwrap();
    assert!(l.is_finished() && r.is_finished());
    assert_eq!(l.dabs_applied, 8);
    assert_eq!(l.dirty, Some(Rect::new(0, 0, 64, 128)));
    assert_eq!(r.dirty, Some(Rect::new(64, 0, 64, 128)));
    assert_eq!(px(&engine, 10, 100), vec![255, 0, 0, 255]);
    assert_eq!(px(&engine, 100, 10), vec![0, 0, 255, 255]);
    assert_eq!(engine.device().tile_count(), 4);
}

#[test]
fn brush_stroke_paints_each_dab() {
    let engine = engine(2);
    let h = engine.begin_stroke(StrokeStrategy::new("brush").brush(hard_brush())).unwrap();
    for i in 0..4 {
        engine.submit_dab(&h, dab(i)).unwrap();
    }
    engine.end_stroke(&h).unwrap();
    let outcome = engine.wait(&h).unwrap();
    assert_eq!(outcome.end, StrokeEnd::Finished);
    assert_eq!(outcome.dabs_applied, 4);
    for i in 0..4 {
        let c = 8 + i as i32 * 12;
        assert_eq!(px(&engine, c, c), BLACK.to_vec());
    }
    assert_eq!(px(&engine, 0, 60), CLEAR.to_vec());
    assert!(outcome.before.changed_tiles(&outcome.after).contains(&(0, 0)));
}

#[test]
fn indirect_stroke_lands_on_finish() {
    let engine = engine(2);
    let strategy = StrokeStrategy::new("indirect").brush(hard_brush()).indirect(true);
    let h = engine.begin_stroke(strategy).unwrap();
    engine.submit_dab(&h, dab(0)).unwrap();
    engine.submit_dab(&h, dab(0)).unwrap();
    engine.end_stroke(&h).unwrap();
    let outcome = engine.wait(&h).unwrap();
    assert!(outcome.is_finished());
    assert_eq!(outcome.dabs_applied, 2);
    assert_eq!(px(&engine, 8, 8), BLACK.to_vec());
    assert_eq!(px(&engine, 30, 30), CLEAR.to_vec());
}

#[test]
fn cancel_keeps_completed_dabs_and_runs_cancel_job() {
    let engine = engine(2);
    let strategy = StrokeStrategy::new("direct")
        .brush(hard_brush())
        .on_cancel(JobSpec::fill(Rect::new(100, 120, 4, 4), [0, 255, 0, 255]));
    let h = cancel_after(&engine, strategy, 3, 7);
    let outcome = engine.wait(&h).unwrap();

    assert_eq!(outcome.end, StrokeEnd::Cancelled);
    assert!(outcome.error.is_none());
    // three dabs plus the gate job
    assert_eq!(outcome.dabs_applied, 4);
    for i in 0..3 {
        let c = 8 + i as i32 * 12;
        assert_eq!(px(&engine, c, c), BLACK.to_vec(), "dab {i}");
    }
    for i in 3..7 {
        let c = 8 + i as i32 * 12;
        assert_eq!(px(&engine, c, c), CLEAR.to_vec(), "dab {i}");
    }
    assert_eq!(px(&engine, 101, 121), vec![0, 255, 0, 255]);
}

#[test]
fn cancelled_indirect_stroke_leaves_only_cancel_effect() {
    let engine = engine(2);
    let strategy = StrokeStrategy::new("indirect")
        .brush(hard_brush())
        .indirect(true)
        .on_cancel(JobSpec::fill(Rect::new(100, 120, 4, 4), [0, 255, 0, 255]));
    let h = cancel_after(&engine, strategy, 3, 7);
    let outcome = engine.wait(&h).unwrap();

    assert_eq!(outcome.end, StrokeEnd::Cancelled);
    for i in 0..7 {
        let c = 8 + i as i32 * 12;
        assert_eq!(px(&engine, c, c), CLEAR.to_vec(), "dab {i}");
    }
    assert_eq!(px(&engine, 101, 121), vec![0, 255, 0, 255]);
    assert_eq!(engine.device().tile_count(), 1);
}

#[test]
fn painter_based_cancel_reverts_the_stroke() {
    let engine = engine(2);
    engine.device().fill(Rect::new(0, 0, 4, 4), &[9, 9, 9, 255]).unwrap();
    let h = cancel_after(&engine, StrokeStrategy::painter_based("brush", hard_brush()), 3, 5);
    let outcome = engine.wait(&h).unwrap();

    assert_eq!(outcome.end, StrokeEnd::Cancelled);
    assert_eq!(px(&engine, 1, 1), vec![9, 9, 9, 255]);
    for i in 0..5 {
        let c = 8 + i as i32 * 12;
        assert_eq!(px(&engine, c, c), CLEAR.to_vec(), "dab {i}");
    }
    assert!(outcome.before.changed_tiles(&outcome.after).is_empty());
}

/// Custom job that appends `tag` to `log`.
fn record(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> JobSpec {
    let log = Arc::clone(log);
    JobSpec::custom(Rect::new(0, 0, 1, 1), move |_| {
        log.lock().unwrap().push(tag);
        Ok(())
    })
}

#[test]
fn cancel_during_finish_is_ignored() {
    let engine = engine(2);
    let log = Arc::new(Mutex::new(Vec::new()));
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let finish_log = Arc::clone(&log);
    let finish = JobSpec::custom(Rect::new(120, 0, 1, 1), move |_| {
        let _ = started_tx.send(());
        let _ = release_rx.lock().unwrap().recv();
        finish_log.lock().unwrap().push("finish");
        Ok(())
    });
    let strategy = StrokeStrategy::painter_based("brush", hard_brush()).on_finish(finish);
    let h = engine.begin_stroke(strategy).unwrap();
    engine.submit_dab(&h, dab(0)).unwrap();
    engine.submit_dab(&h, dab(1)).unwrap();
    engine.end_stroke(&h).unwrap();

    started_rx.recv().unwrap();
    assert_eq!(engine.stroke_state(&h), Some(StrokeState::Finishing));
    engine.cancel_stroke(&h).unwrap();
    assert_eq!(engine.stroke_state(&h), Some(StrokeState::Finishing));
    release_tx.send(()).unwrap();

    let outcome = engine.wait(&h).unwrap();
    assert_eq!(outcome.end, StrokeEnd::Finished);
    assert_eq!(outcome.dabs_applied, 2);
    assert_eq!(*log.lock().unwrap(), vec!["finish"]);
    // the revert cancel job never ran
    assert_eq!(px(&engine, 8, 8), BLACK.to_vec());
    assert_eq!(px(&engine, 20, 20), BLACK.to_vec());
}

#[test]
fn cancel_before_init_still_runs_init_then_cancel() {
    let engine = engine(1);
    let log = Arc::new(Mutex::new(Vec::new()));

    // occupy the only worker so the second stroke's init cannot start
    let blocker = engine.begin_stroke(StrokeStrategy::new("blocker")).unwrap();
    let (spec, started, release) = gate();
    engine.submit_job(&blocker, spec).unwrap();
    started.recv().unwrap();

    let strategy = StrokeStrategy::new("phased")
        .on_init(record(&log, "init"))
        .on_finish(record(&log, "finish"))
        .on_cancel(record(&log, "cancel"));
    let h = engine.begin_stroke(strategy).unwrap();
    engine.submit_job(&h, record(&log, "dab")).unwrap();
    assert_eq!(engine.stroke_state(&h), Some(StrokeState::Created));
    engine.cancel_stroke(&h).unwrap();
    assert_eq!(engine.stroke_state(&h), Some(StrokeState::Cancelling));

    release.send(()).unwrap();
    engine.end_stroke(&blocker).unwrap();
    let outcome = engine.wait(&h).unwrap();
    assert_eq!(outcome.end, StrokeEnd::Cancelled);
    assert_eq!(outcome.dabs_applied, 0);
    assert_eq!(*log.lock().unwrap(), vec!["init", "cancel"]);
    assert!(engine.wait(&blocker).unwrap().is_finished());
}

#[test]
fn detached_strokes_release_their_snapshots() {
    let engine = engine(4);
    let mut handles = Vec::new();
    for i in 0..50u8 {
        let h = engine.begin_stroke(StrokeStrategy::new("fill")).unwrap();
        engine.submit_job(&h, JobSpec::fill(Rect::new(0, 0, 128, 128), [i, i, i, 255])).unwrap();
        engine.end_stroke(&h).unwrap();
        engine.detach_stroke(&h).unwrap();
        handles.push(h);
    }
    engine.wait_idle();

    // every tile is owned by the device alone again
    assert_eq!(engine.device().tile_count(), 4);
    assert_eq!(engine.device().memory_bytes(), 4 * 64 * 64 * 4);
    assert!(matches!(engine.wait(&handles[0]), Err(PaintError::UnknownStroke(_))));
}

#[test]
fn init_and_finish_phases_run_in_order() {
    let engine = engine(3);
    let log = Arc::new(Mutex::new(Vec::new()));
    let record = |tag: &'static str| {
        let log = Arc::clone(&log);
        JobSpec::custom(Rect::new(0, 0, 1, 1), move |_| {
            log.lock().unwrap().push(tag);
            Ok(())
        })
    };
    let strategy = StrokeStrategy::new("phases").on_init(record("init")).on_finish(record("finish"));
    let h = engine.begin_stroke(strategy).unwrap();
    engine.submit_job(&h, record("a")).unwrap();
    engine.submit_job(&h, record("b")).unwrap();
    engine.end_stroke(&h).unwrap();
    let outcome = engine.wait(&h).unwrap();
    assert!(outcome.is_finished());
    assert_eq!(outcome.dabs_applied, 2);
    assert_eq!(*log.lock().unwrap(), vec!["init", "a", "b", "finish"]);
}

#[test]
fn exclusive_stroke_never_overlaps_other_jobs() {
    let engine = engine(4);
    let spans: Arc<Mutex<Vec<(&'static str, Instant, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
    let timed = |tag: &'static str, rect: Rect| {
        let spans = Arc::clone(&spans);
        JobSpec::custom(rect, move |_| {
            let start = Instant::now();
            thread::sleep(Duration::from_millis(15));
            spans.lock().unwrap().push((tag, start, Instant::now()));
            Ok(())
        })
    };

    let before = engine.begin_stroke(StrokeStrategy::new("before")).unwrap();
    let exclusive = engine.begin_stroke(StrokeStrategy::new("exclusive").exclusive(true)).unwrap();
    let after = engine.begin_stroke(StrokeStrategy::new("after")).unwrap();
    for i in 0..4 {
        engine.submit_job(&before, timed("other", Rect::new(0, i * 8, 8, 8))).unwrap();
        engine.submit_job(&exclusive, timed("exclusive", Rect::new(64, i * 8, 8, 8))).unwrap();
        engine.submit_job(&after, timed("other", Rect::new(0, 64 + i * 8, 8, 8))).unwrap();
    }
    for h in [&before, &exclusive, &after] {
        engine.end_stroke(h).unwrap();
    }
    for h in [&before, &exclusive, &after] {
        assert!(engine.wait(h).unwrap().is_finished());
    }

    let spans = spans.lock().unwrap();
    assert_eq!(spans.len(), 12);
    let (excl, other): (Vec<_>, Vec<_>) = spans.iter().partition(|(tag, _, _)| *tag == "exclusive");
    for (_, es, ee) in &excl {
        for (_, os, oe) in &other {
            assert!(ee <= os || oe <= es, "exclusive job overlapped another stroke's job");
        }
    }
}

#[test]
fn overlapping_strokes_serialize_per_tile() {
    let engine = engine(4);
    let a = engine.begin_stroke(StrokeStrategy::new("a")).unwrap();
    let b = engine.begin_stroke(StrokeStrategy::new("b")).unwrap();
    let counter = Arc::new(Mutex::new((0usize, 0usize)));
    let busy = |counter: Arc<Mutex<(usize, usize)>>| {
        JobSpec::custom(Rect::new(10, 10, 4, 4), move |_| {
            {
                let mut c = counter.lock().unwrap();
                c.0 += 1;
                c.1 = c.1.max(c.0);
            }
            thread::sleep(Duration::from_millis(5));
            counter.lock().unwrap().0 -= 1;
            Ok(())
        })
    };
    for _ in 0..5 {
        engine.submit_job(&a, busy(Arc::clone(&counter))).unwrap();
        engine.submit_job(&b, busy(Arc::clone(&counter))).unwrap();
    }
    engine.end_stroke(&a).unwrap();
    engine.end_stroke(&b).unwrap();
    engine.wait_idle();
    assert_eq!(counter.lock().unwrap().1, 1, "jobs on the same tile ran concurrently");
}
