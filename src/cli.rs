// ============================================================================
// tilepaint CLI - replay stroke scripts headlessly
// ============================================================================
//
// Usage examples:
//   tilepaint --script strokes.json --output out.png
//   tilepaint -s strokes.json -o out.png --size 512x512 --workers 4
//   tilepaint --import photo.png -s retouch.json -o out.png --snapshot out.tpd
//   tilepaint --report-arch
//
// All strokes of a script are begun up front and run through the scheduler
// together, so strokes on disjoint regions paint in parallel.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use serde::Deserialize;

use crate::brush::{BrushSettings, DabSample};
use crate::composite::{Arch, CompositeOpId, CompositeOpRegistry, arch::cpu_features};
use crate::device::PaintDevice;
use crate::engine::PaintEngine;
use crate::error::{PaintError, PaintResult};
use crate::geometry::Rect;
use crate::io;
use crate::pixel::PixelFormat;
use crate::selection::Selection;
use crate::settings::EngineSettings;
use crate::stroke::{JobSpec, StrokeHandle, StrokeStrategy};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Headless tiled paint engine.
#[derive(Parser, Debug)]
#[command(
    name = "tilepaint",
    about = "Replay JSON stroke scripts on a tiled paint device",
    long_about = "Create (or import) a paint device, replay a JSON stroke script through\n\
                  the stroke scheduler and write the result as PNG and/or a .tpd snapshot.\n\n\
                  Example:\n  \
                  tilepaint --script strokes.json --output out.png --size 256x256"
)]
pub struct CliArgs {
    /// JSON stroke script to replay.
    #[arg(short, long, value_name = "SCRIPT.json")]
    pub script: Option<PathBuf>,

    /// PNG file to write the result to.
    #[arg(short, long, value_name = "FILE.png")]
    pub output: Option<PathBuf>,

    /// Device size as WIDTHxHEIGHT when not importing (script size wins).
    #[arg(long, default_value = "256x256", value_name = "WxH")]
    pub size: String,

    /// Start from this image instead of a blank device.
    #[arg(short, long, value_name = "IMAGE")]
    pub import: Option<PathBuf>,

    /// Also write a bincode snapshot of the final device.
    #[arg(long, value_name = "FILE.tpd")]
    pub snapshot: Option<PathBuf>,

    /// Worker threads (overrides the settings file; 0 = all cores).
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Force a composite dispatch arch: scalar, sse2, sse4.1, avx2, neon.
    #[arg(long, value_name = "ARCH")]
    pub arch: Option<String>,

    /// Print CPU features, the selected arch and the registered ops, then exit.
    #[arg(long)]
    pub report_arch: bool,

    /// Print per-stroke results and timing.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Stroke script format
// ============================================================================

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct StrokeScript {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub strokes: Vec<ScriptStroke>,
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct ScriptStroke {
    pub name: String,
    pub op: CompositeOpId,
    pub opacity: f32,
    pub flow: f32,
    pub exclusive: bool,
    pub indirect: bool,
    pub brush: Option<BrushSettings>,
    /// Only pixels inside this rect are painted.
    pub selection: Option<Rect>,
    pub dabs: Vec<DabSample>,
    /// Polyline; dabs are spaced along each segment by the brush spacing.
    pub path: Vec<DabSample>,
    pub fills: Vec<ScriptFill>,
    /// Cancel instead of ending the stroke once everything is submitted.
    pub cancel: bool,
}

impl Default for ScriptStroke {
    fn default() -> Self {
        Self {
            name: "stroke".to_string(),
            op: CompositeOpId::Over,
            opacity: 1.0,
            flow: 1.0,
            exclusive: false,
            indirect: false,
            brush: None,
            selection: None,
            dabs: Vec::new(),
            path: Vec::new(),
            fills: Vec::new(),
            cancel: false,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct ScriptFill {
    pub rect: Rect,
    pub color: [u8; 4],
}

impl StrokeScript {
    pub fn parse(json: &str) -> PaintResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl ScriptStroke {
    fn strategy(&self, width: u32, height: u32) -> PaintResult<StrokeStrategy> {
        let mut strategy = match &self.brush {
            Some(brush) => StrokeStrategy::painter_based(self.name.clone(), brush.clone()),
            None => StrokeStrategy::new(self.name.clone()),
        }
        .composite_op(self.op)
        .opacity(self.opacity)
        .flow(self.flow)
        .exclusive(self.exclusive)
        .indirect(self.indirect);
        if let Some(rect) = self.selection {
            let selection = Selection::new(width, height)?;
            selection.select_rect(rect, 255)?;
            strategy = strategy.selection(Arc::new(selection));
        }
        Ok(strategy)
    }

    /// Explicit dabs followed by the interpolated path.
    fn samples(&self) -> Vec<DabSample> {
        let mut out = self.dabs.clone();
        if let (Some(brush), Some(first)) = (&self.brush, self.path.first()) {
            out.push(*first);
            for pair in self.path.windows(2) {
                out.extend(brush.dabs_between(pair[0], pair[1]));
            }
        }
        out
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the CLI and return an OS exit code.
pub fn run(args: CliArgs, mut settings: EngineSettings) -> ExitCode {
    if let Some(workers) = args.workers {
        settings.worker_threads = workers;
    }
    if let Some(name) = &args.arch {
        match name.parse::<Arch>() {
            Ok(arch) => settings.composite_arch = Some(arch),
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if args.report_arch {
        print_arch_report(&settings.registry());
        return ExitCode::SUCCESS;
    }

    match run_script(&args, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn print_arch_report(registry: &CompositeOpRegistry) {
    println!("cpu features: {}", cpu_features().join(", "));
    let supported: Vec<&str> = Arch::supported().into_iter().map(Arch::name).collect();
    println!("supported:    {}", supported.join(", "));
    println!("selected:     {}", registry.arch());
    println!("composite ops:");
    for (op, format) in registry.entries() {
        println!("  {:<12} {}", op.name(), format);
    }
}

fn run_script(args: &CliArgs, settings: &EngineSettings) -> PaintResult<()> {
    let script = match &args.script {
        Some(path) => StrokeScript::parse(&std::fs::read_to_string(path)?)?,
        None => StrokeScript::default(),
    };

    let device = match &args.import {
        Some(path) => io::import_image(path)?,
        None => {
            let (w, h) = parse_size(&args.size)?;
            PaintDevice::new(script.width.unwrap_or(w), script.height.unwrap_or(h), PixelFormat::RGBA8)?
        }
    };
    let (width, height) = (device.width(), device.height());
    let engine = PaintEngine::new(device, settings)?;

    let start = Instant::now();
    let mut handles: Vec<(StrokeHandle, &ScriptStroke)> = Vec::with_capacity(script.strokes.len());
    for stroke in &script.strokes {
        let handle = engine.begin_stroke(stroke.strategy(width, height)?)?;
        for sample in stroke.samples() {
            engine.submit_dab(&handle, sample)?;
        }
        for fill in &stroke.fills {
            engine.submit_job(&handle, JobSpec::fill(fill.rect, fill.color))?;
        }
        if stroke.cancel {
            engine.cancel_stroke(&handle)?;
        } else {
            engine.end_stroke(&handle)?;
        }
        handles.push((handle, stroke));
    }

    let mut failed = 0;
    for (handle, stroke) in &handles {
        let outcome = engine.wait(handle)?;
        if let Some(err) = &outcome.error {
            log::warn!("stroke '{}' failed: {}", stroke.name, err);
            failed += 1;
        }
        if args.verbose {
            println!(
                "  {:<16} {:?}, {} dab job(s), dirty {:?}",
                stroke.name, outcome.end, outcome.dabs_applied, outcome.dirty
            );
        }
    }
    if args.verbose {
        println!("{} stroke(s) in {:.0}ms", handles.len(), start.elapsed().as_secs_f64() * 1000.0);
    }

    if let Some(path) = &args.output {
        io::export_png(engine.device(), path)?;
        report_written(path, args.verbose);
    }
    if let Some(path) = &args.snapshot {
        io::save_snapshot(&engine.snapshot(), path)?;
        report_written(path, args.verbose);
    }
    engine.shutdown();

    if failed > 0 {
        return Err(PaintError::job_failed(format!("{failed} stroke(s) failed")));
    }
    Ok(())
}

fn report_written(path: &Path, verbose: bool) {
    log::info!("wrote {}", path.display());
    if verbose {
        println!("  → {}", path.display());
    }
}

/// Parse `WIDTHxHEIGHT`.
fn parse_size(s: &str) -> PaintResult<(u32, u32)> {
    let invalid = || PaintError::InvalidFile(format!("invalid size '{s}', expected WIDTHxHEIGHT"));
    let (w, h) = s.split_once(['x', 'X']).ok_or_else(invalid)?;
    let w = w.trim().parse().map_err(|_| invalid())?;
    let h = h.trim().parse().map_err(|_| invalid())?;
    Ok((w, h))
}
