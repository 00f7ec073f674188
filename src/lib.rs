//! Tiled raster paint engine: sparse copy-on-write pixel devices, rect and
//! masked iterators, CPU-dispatched composite ops, and a stroke scheduler that
//! runs paint jobs concurrently on a worker pool.

pub mod brush;
pub mod cli;
pub mod composite;
pub mod device;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod io;
pub mod iterator;
pub mod logger;
pub mod painter;
pub mod pixel;
pub mod selection;
pub mod settings;
pub mod stroke;
pub mod tile;

pub use brush::{BrushSettings, DabSample};
pub use composite::{Arch, CompositeOpId, CompositeOpRegistry, CompositeParams};
pub use device::{DeviceId, DeviceSnapshot, PaintDevice};
pub use engine::PaintEngine;
pub use error::{PaintError, PaintResult};
pub use geometry::{Rect, TileRange};
pub use iterator::{Masked, PixelCursor, RectIter, RectIterMut};
pub use painter::Painter;
pub use pixel::{PixelBuffer, PixelFormat};
pub use selection::Selection;
pub use settings::EngineSettings;
pub use stroke::{
    JobContext, JobSpec, StrokeEnd, StrokeHandle, StrokeId, StrokeOutcome, StrokeScheduler, StrokeState,
    StrokeStrategy,
};
pub use tile::{TILE_SIZE, Tile};
