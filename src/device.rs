// ============================================================================
// PAINT DEVICE – sparse tiled pixel store (Vec-indexed for speed)
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::RgbaImage;
use rayon::prelude::*;

use crate::error::{PaintError, PaintResult};
use crate::geometry::{Rect, TileRange};
use crate::pixel::{PixelBuffer, PixelFormat};
use crate::tile::{TILE_SIZE, Tile};

/// Upper bound on logical device size (~256 megapixels).
const MAX_PIXELS: u64 = 256_000_000;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique device identity; forks get a fresh id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

impl DeviceId {
    fn next() -> Self {
        DeviceId(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) type Slot = Mutex<Option<Arc<Tile>>>;

#[inline]
pub(crate) fn lock_slot(slot: &Slot) -> MutexGuard<'_, Option<Arc<Tile>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sparse tiled pixel store backed by a flat slot table.
/// Tile coordinates are mapped to a flat index via `ty * tiles_per_row + tx`,
/// giving O(1) access with zero hashing overhead.
///
/// Tiles are wrapped in `Arc` for copy-on-write semantics: `fork()` and
/// `snapshot()` only bump reference counts, and writers use `Arc::make_mut` to
/// clone only the touched tile. Each slot has its own mutex so a device can be
/// shared between stroke jobs; the scheduler keeps concurrently running jobs
/// on disjoint tiles, so the slot locks are never contended in practice.
pub struct PaintDevice {
    id: DeviceId,
    width: u32,
    height: u32,
    format: PixelFormat,
    default_pixel: Box<[u8]>,
    tiles_per_row: u32,
    tiles_per_col: u32,
    slots: Box<[Slot]>,
}

impl fmt::Debug for PaintDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaintDevice")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("tiles", &self.tile_count())
            .finish()
    }
}

impl PaintDevice {
    // ---- construction -------------------------------------------------------

    /// Create an empty device; every pixel reads as transparent black.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> PaintResult<Self> {
        let total = width as u64 * height as u64;
        if width == 0 || height == 0 || total > MAX_PIXELS {
            return Err(PaintError::InvalidDimensions { width, height });
        }
        let tiles_per_row = width.div_ceil(TILE_SIZE);
        let tiles_per_col = height.div_ceil(TILE_SIZE);
        let count = (tiles_per_row * tiles_per_col) as usize;
        let slots: Vec<Slot> = (0..count).map(|_| Mutex::new(None)).collect();
        Ok(Self {
            id: DeviceId::next(),
            width,
            height,
            format,
            default_pixel: format.transparent().into_boxed_slice(),
            tiles_per_row,
            tiles_per_col,
            slots: slots.into_boxed_slice(),
        })
    }

    /// Replace the value returned for never-written pixels.
    pub fn with_default_pixel(mut self, pixel: &[u8]) -> PaintResult<Self> {
        self.format.check_pixel(pixel)?;
        self.default_pixel = pixel.into();
        Ok(self)
    }

    /// Copy-on-write clone: shares every tile with `self` under a new id.
    pub fn fork(&self) -> PaintDevice {
        let slots: Vec<Slot> = self
            .slots
            .iter()
            .map(|s| Mutex::new(lock_slot(s).clone()))
            .collect();
        PaintDevice {
            id: DeviceId::next(),
            width: self.width,
            height: self.height,
            format: self.format,
            default_pixel: self.default_pixel.clone(),
            tiles_per_row: self.tiles_per_row,
            tiles_per_col: self.tiles_per_col,
            slots: slots.into_boxed_slice(),
        }
    }

    /// Build an RGBA8 device from an image, skipping tiles whose pixels all
    /// equal the default pixel so the result stays sparse.
    pub fn from_rgba_image(src: &RgbaImage) -> PaintResult<Self> {
        let device = Self::new(src.width(), src.height(), PixelFormat::RGBA8)?;
        let (width, height) = (src.width(), src.height());
        let raw = src.as_raw();
        let tile_stride = TILE_SIZE as usize * 4;
        let coords: Vec<(u32, u32)> = device.all_tiles().iter().collect();
        coords.par_iter().for_each(|&(tx, ty)| {
            let base_x = tx * TILE_SIZE;
            let base_y = ty * TILE_SIZE;
            let tw = TILE_SIZE.min(width - base_x) as usize;
            let th = TILE_SIZE.min(height - base_y);
            let mut data = vec![0u8; tile_stride * TILE_SIZE as usize];
            let mut has_content = false;
            for ly in 0..th {
                let src_off = ((base_y + ly) * width + base_x) as usize * 4;
                let src_row = &raw[src_off..src_off + tw * 4];
                has_content |= src_row.chunks_exact(4).any(|px| px != device.default_pixel());
                let dst_off = ly as usize * tile_stride;
                data[dst_off..dst_off + tw * 4].copy_from_slice(src_row);
            }
            if has_content {
                if let Some(tile) = Tile::from_raw(data, 4) {
                    *lock_slot(device.slot(tx, ty)) = Some(Arc::new(tile));
                }
            }
        });
        Ok(device)
    }

    // ---- accessors ----------------------------------------------------------

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Logical image bounds `(0, 0, width, height)`.
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixel_size(&self) -> usize {
        self.format.pixel_size()
    }

    pub fn default_pixel(&self) -> &[u8] {
        &self.default_pixel
    }

    pub fn tiles_per_row(&self) -> u32 {
        self.tiles_per_row
    }

    pub fn tiles_per_col(&self) -> u32 {
        self.tiles_per_col
    }

    /// Full tile grid of this device.
    pub fn all_tiles(&self) -> TileRange {
        TileRange { x0: 0, y0: 0, x1: self.tiles_per_row, y1: self.tiles_per_col }
    }

    /// Number of allocated tiles.
    pub fn tile_count(&self) -> usize {
        self.slots.iter().filter(|s| lock_slot(s).is_some()).count()
    }

    /// Fail with `OutOfBounds` unless `rect` lies inside the logical bounds.
    pub fn check_rect(&self, rect: &Rect) -> PaintResult<()> {
        let bounds = self.bounds();
        if !bounds.contains_rect(rect) {
            return Err(PaintError::out_of_bounds(*rect, bounds));
        }
        Ok(())
    }

    fn check_format(&self, format: PixelFormat) -> PaintResult<()> {
        if format != self.format {
            return Err(PaintError::format_mismatch(self.format, format));
        }
        Ok(())
    }

    // ---- indexing helpers ---------------------------------------------------

    #[inline(always)]
    fn flat_index(&self, tx: u32, ty: u32) -> usize {
        (ty * self.tiles_per_row + tx) as usize
    }

    #[inline(always)]
    fn tile_coord(&self, index: usize) -> (u32, u32) {
        let i = index as u32;
        (i % self.tiles_per_row, i / self.tiles_per_row)
    }

    #[inline]
    pub(crate) fn slot(&self, tx: u32, ty: u32) -> &Slot {
        &self.slots[self.flat_index(tx, ty)]
    }

    /// Pixel rect of a tile, clipped to the logical bounds.
    fn tile_rect(&self, tx: u32, ty: u32) -> Rect {
        let full = Rect::new(
            (tx * TILE_SIZE) as i32,
            (ty * TILE_SIZE) as i32,
            TILE_SIZE,
            TILE_SIZE,
        );
        full.intersect(&self.bounds()).unwrap_or_default()
    }

    fn check_tile(&self, tx: u32, ty: u32) -> PaintResult<()> {
        if tx >= self.tiles_per_row || ty >= self.tiles_per_col {
            let rect = Rect::new(
                (tx * TILE_SIZE) as i32,
                (ty * TILE_SIZE) as i32,
                TILE_SIZE,
                TILE_SIZE,
            );
            return Err(PaintError::out_of_bounds(rect, self.bounds()));
        }
        Ok(())
    }

    // ---- tile access --------------------------------------------------------

    /// Shared handle to an allocated tile; `None` for never-written tiles.
    /// Never allocates.
    pub fn tile_at(&self, tx: u32, ty: u32) -> PaintResult<Option<Arc<Tile>>> {
        self.check_tile(tx, ty)?;
        Ok(lock_slot(self.slot(tx, ty)).clone())
    }

    /// Run `f` on a writable tile, creating it (filled with the default pixel)
    /// on demand and COW-cloning it if shared.
    pub fn with_tile_mut<R>(&self, tx: u32, ty: u32, f: impl FnOnce(&mut Tile) -> R) -> PaintResult<R> {
        self.check_tile(tx, ty)?;
        let mut guard = lock_slot(self.slot(tx, ty));
        let arc = guard.get_or_insert_with(|| Arc::new(Tile::filled(&self.default_pixel)));
        Ok(f(Arc::make_mut(arc)))
    }

    // ---- pixel access -------------------------------------------------------

    pub fn pixel(&self, x: i32, y: i32) -> PaintResult<Vec<u8>> {
        self.check_rect(&Rect::new(x, y, 1, 1))?;
        let (tx, ty) = (x as u32 / TILE_SIZE, y as u32 / TILE_SIZE);
        let tile = lock_slot(self.slot(tx, ty)).clone();
        Ok(match tile {
            Some(t) => t.pixel(x as u32 % TILE_SIZE, y as u32 % TILE_SIZE).to_vec(),
            None => self.default_pixel.to_vec(),
        })
    }

    pub fn set_pixel(&self, x: i32, y: i32, pixel: &[u8]) -> PaintResult<()> {
        self.check_rect(&Rect::new(x, y, 1, 1))?;
        self.format.check_pixel(pixel)?;
        let (tx, ty) = (x as u32 / TILE_SIZE, y as u32 / TILE_SIZE);
        self.with_tile_mut(tx, ty, |t| {
            t.pixel_mut(x as u32 % TILE_SIZE, y as u32 % TILE_SIZE).copy_from_slice(pixel)
        })
    }

    // ---- region access ------------------------------------------------------

    /// Read a region. Never-written tiles come back as the default pixel.
    pub fn read(&self, rect: Rect) -> PaintResult<PixelBuffer> {
        let mut buf = PixelBuffer::new(rect, self.format);
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    /// Tile-aware region extraction into an existing buffer. Instead of
    /// per-pixel lookups, iterates only overlapping tiles and copies row spans.
    /// Bands of tile rows are filled in parallel.
    pub fn read_into(&self, buf: &mut PixelBuffer) -> PaintResult<()> {
        self.check_format(buf.format())?;
        let rect = buf.rect();
        self.check_rect(&rect)?;
        if rect.is_empty() {
            return Ok(());
        }

        let row_bytes = buf.row_bytes();
        let ts = TILE_SIZE as i32;
        let mut bands: Vec<(i32, i32, &mut [u8])> = Vec::new();
        let mut rest: &mut [u8] = buf.data_mut();
        let mut y = rect.y;
        while y < rect.bottom() {
            let band_end = ((y / ts + 1) * ts).min(rect.bottom());
            let (head, tail) = std::mem::take(&mut rest).split_at_mut((band_end - y) as usize * row_bytes);
            bands.push((y, band_end, head));
            rest = tail;
            y = band_end;
        }

        bands
            .into_par_iter()
            .for_each(|(y0, y1, band)| self.read_band(rect, y0, y1, band, row_bytes));
        Ok(())
    }

    fn read_band(&self, rect: Rect, y0: i32, y1: i32, band: &mut [u8], row_bytes: usize) {
        let ts = TILE_SIZE as i32;
        let ps = self.pixel_size();
        let ty = (y0 / ts) as u32;
        let range = rect.tile_range();
        for tx in range.x0..range.x1 {
            let tile = lock_slot(self.slot(tx, ty)).clone();
            let tile_x0 = (tx * TILE_SIZE) as i32;
            let ox0 = rect.x.max(tile_x0);
            let ox1 = rect.right().min(tile_x0 + ts);
            let n = (ox1 - ox0) as usize;
            for y in y0..y1 {
                let dst_off = (y - y0) as usize * row_bytes + (ox0 - rect.x) as usize * ps;
                let dst = &mut band[dst_off..dst_off + n * ps];
                match &tile {
                    Some(t) => dst.copy_from_slice(t.span((ox0 - tile_x0) as u32, (y - ty as i32 * ts) as u32, n)),
                    None => {
                        for px in dst.chunks_exact_mut(ps) {
                            px.copy_from_slice(&self.default_pixel);
                        }
                    }
                }
            }
        }
    }

    /// Write a buffer at its rect. Allocates exactly the tiles the rect
    /// intersects; tiles are written in parallel.
    pub fn write(&self, buf: &PixelBuffer) -> PaintResult<()> {
        self.check_format(buf.format())?;
        let rect = buf.rect();
        self.check_rect(&rect)?;
        if rect.is_empty() {
            return Ok(());
        }
        let ps = self.pixel_size();
        let row_bytes = buf.row_bytes();
        let data = buf.data();
        let coords: Vec<(u32, u32)> = rect.tile_range().iter().collect();
        coords.par_iter().for_each(|&(tx, ty)| {
            let Some(overlap) = rect.intersect(&self.tile_rect(tx, ty)) else { return };
            let lx = (overlap.x as u32) % TILE_SIZE;
            let n = overlap.width as usize;
            let mut guard = lock_slot(self.slot(tx, ty));
            let tile = Arc::make_mut(guard.get_or_insert_with(|| Arc::new(Tile::filled(&self.default_pixel))));
            for y in overlap.y..overlap.bottom() {
                let src_off = (y - rect.y) as usize * row_bytes + (overlap.x - rect.x) as usize * ps;
                tile.span_mut(lx, (y as u32) % TILE_SIZE, n)
                    .copy_from_slice(&data[src_off..src_off + n * ps]);
            }
        });
        Ok(())
    }

    /// Set every pixel in `rect` to `pixel`. Fully covered tiles are replaced
    /// wholesale instead of being written pixel by pixel.
    pub fn fill(&self, rect: Rect, pixel: &[u8]) -> PaintResult<()> {
        self.check_rect(&rect)?;
        self.format.check_pixel(pixel)?;
        for (tx, ty) in rect.tile_range().iter() {
            let tile_rect = self.tile_rect(tx, ty);
            let Some(overlap) = rect.intersect(&tile_rect) else { continue };
            if overlap == tile_rect {
                *lock_slot(self.slot(tx, ty)) = Some(Arc::new(Tile::filled(pixel)));
                continue;
            }
            self.with_tile_mut(tx, ty, |t| fill_span_rows(t, overlap, pixel))?;
        }
        Ok(())
    }

    /// Drop all tiles (every pixel reads as the default again).
    pub fn clear(&self) {
        for slot in self.slots.iter() {
            *lock_slot(slot) = None;
        }
    }

    /// Reset `rect` to the default pixel, dropping fully covered tiles.
    pub fn clear_rect(&self, rect: Rect) -> PaintResult<()> {
        self.check_rect(&rect)?;
        for (tx, ty) in rect.tile_range().iter() {
            let tile_rect = self.tile_rect(tx, ty);
            let Some(overlap) = rect.intersect(&tile_rect) else { continue };
            let mut guard = lock_slot(self.slot(tx, ty));
            if overlap == tile_rect {
                *guard = None;
            } else if let Some(arc) = guard.as_mut() {
                fill_span_rows(Arc::make_mut(arc), overlap, &self.default_pixel);
            }
        }
        Ok(())
    }

    /// Discard all pixel data outside `rect`.
    pub fn crop(&self, rect: Rect) {
        let keep = rect.intersect(&self.bounds()).unwrap_or_default();
        for (i, slot) in self.slots.iter().enumerate() {
            let (tx, ty) = self.tile_coord(i);
            let tile_rect = self.tile_rect(tx, ty);
            let mut guard = lock_slot(slot);
            let Some(arc) = guard.as_mut() else { continue };
            match tile_rect.intersect(&keep) {
                None => *guard = None,
                Some(inside) if inside == tile_rect => {}
                Some(inside) => {
                    let tile = Arc::make_mut(arc);
                    for y in tile_rect.y..tile_rect.bottom() {
                        for x in tile_rect.x..tile_rect.right() {
                            if !inside.contains_point(x, y) {
                                tile.pixel_mut(x as u32 % TILE_SIZE, y as u32 % TILE_SIZE)
                                    .copy_from_slice(&self.default_pixel);
                            }
                        }
                    }
                }
            }
        }
    }

    // ---- bounds -------------------------------------------------------------

    /// Bounds of all allocated tiles (tile-aligned, clipped to the device).
    pub fn extent(&self) -> Rect {
        let mut out = Rect::default();
        for (i, slot) in self.slots.iter().enumerate() {
            if lock_slot(slot).is_some() {
                let (tx, ty) = self.tile_coord(i);
                out = out.union(&self.tile_rect(tx, ty));
            }
        }
        out
    }

    /// Tight bounds of every pixel that differs from the default pixel.
    pub fn exact_bounds(&self) -> Rect {
        let tiles: Vec<(u32, u32, Arc<Tile>)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                let (tx, ty) = self.tile_coord(i);
                lock_slot(s).clone().map(|t| (tx, ty, t))
            })
            .collect();

        tiles
            .par_iter()
            .filter_map(|(tx, ty, tile)| {
                let r = self.tile_rect(*tx, *ty);
                let (mut x0, mut y0, mut x1, mut y1) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
                for y in r.y..r.bottom() {
                    for x in r.x..r.right() {
                        if tile.pixel(x as u32 % TILE_SIZE, y as u32 % TILE_SIZE) != &*self.default_pixel {
                            x0 = x0.min(x);
                            y0 = y0.min(y);
                            x1 = x1.max(x + 1);
                            y1 = y1.max(y + 1);
                        }
                    }
                }
                (x0 < x1).then(|| Rect::from_corners(x0, y0, x1, y1))
            })
            .reduce(Rect::default, |a, b| a.union(&b))
    }

    // ---- snapshots & mementos ----------------------------------------------

    /// Copy-on-write view of every tile at this moment.
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            width: self.width,
            height: self.height,
            format: self.format,
            default_pixel: self.default_pixel.to_vec(),
            tiles_per_row: self.tiles_per_row,
            tiles: self.slots.iter().map(|s| lock_slot(s).clone()).collect(),
        }
    }

    fn check_snapshot(&self, snapshot: &DeviceSnapshot) -> PaintResult<()> {
        if snapshot.width != self.width || snapshot.height != self.height || snapshot.format != self.format {
            return Err(PaintError::format_mismatch(
                format!("{}x{} {}", self.width, self.height, self.format),
                format!("{}x{} {}", snapshot.width, snapshot.height, snapshot.format),
            ));
        }
        Ok(())
    }

    /// Replace all tiles with the ones recorded in `snapshot`.
    pub fn restore(&self, snapshot: &DeviceSnapshot) -> PaintResult<()> {
        self.check_snapshot(snapshot)?;
        for (slot, tile) in self.slots.iter().zip(&snapshot.tiles) {
            *lock_slot(slot) = tile.clone();
        }
        Ok(())
    }

    /// Put the tiles in `range` back to their state in `snapshot`, leaving all
    /// other tiles alone.
    pub fn restore_tiles_from(&self, snapshot: &DeviceSnapshot, range: TileRange) -> PaintResult<()> {
        self.check_snapshot(snapshot)?;
        let range = TileRange {
            x0: range.x0,
            y0: range.y0,
            x1: range.x1.min(self.tiles_per_row),
            y1: range.y1.min(self.tiles_per_col),
        };
        for (tx, ty) in range.iter() {
            let idx = self.flat_index(tx, ty);
            *lock_slot(&self.slots[idx]) = snapshot.tiles[idx].clone();
        }
        Ok(())
    }

    /// Record the current state of the tiles in `range` so they can be put
    /// back with [`restore_tiles`](Self::restore_tiles).
    pub fn capture_tiles(&self, range: TileRange) -> TileMemento {
        let range = TileRange {
            x0: range.x0,
            y0: range.y0,
            x1: range.x1.min(self.tiles_per_row),
            y1: range.y1.min(self.tiles_per_col),
        };
        let entries = range
            .iter()
            .map(|(tx, ty)| {
                let idx = self.flat_index(tx, ty);
                (idx, lock_slot(&self.slots[idx]).clone())
            })
            .collect();
        TileMemento { device: self.id, entries }
    }

    /// Undo every change made to the memento's tiles since it was captured,
    /// including tiles allocated in between.
    pub fn restore_tiles(&self, memento: TileMemento) {
        if memento.device != self.id {
            log::warn!("tile memento for device {} applied to device {}; ignored", memento.device, self.id);
            return;
        }
        for (idx, tile) in memento.entries {
            *lock_slot(&self.slots[idx]) = tile;
        }
    }

    // ---- conversion ---------------------------------------------------------

    /// Flatten to an `RgbaImage`. Only RGBA8 devices convert.
    pub fn to_rgba_image(&self) -> PaintResult<RgbaImage> {
        self.check_format(PixelFormat::RGBA8)?;
        let buf = self.read(self.bounds())?;
        RgbaImage::from_raw(self.width, self.height, buf.into_raw())
            .ok_or_else(|| PaintError::format_mismatch("RGBA8 image buffer", "short buffer"))
    }

    /// Downscaled RGBA preview fitting inside `max_w × max_h`, aspect preserved.
    pub fn thumbnail(&self, max_w: u32, max_h: u32) -> PaintResult<RgbaImage> {
        let img = self.to_rgba_image()?;
        let scale = (max_w as f32 / self.width as f32)
            .min(max_h as f32 / self.height as f32)
            .min(1.0);
        let tw = ((self.width as f32 * scale).round() as u32).max(1);
        let th = ((self.height as f32 * scale).round() as u32).max(1);
        Ok(image::imageops::thumbnail(&img, tw, th))
    }

    /// Approximate memory usage in bytes.
    /// Shared (COW) tiles are counted at minimal cost (Arc pointer only)
    /// since their pixel data is shared with snapshots or forks.
    pub fn memory_bytes(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|s| lock_slot(s).clone())
            .map(|arc| {
                // The clone above holds one extra reference.
                if Arc::strong_count(&arc) == 2 {
                    arc.byte_size()
                } else {
                    std::mem::size_of::<usize>() * 2
                }
            })
            .sum()
    }
}

fn fill_span_rows(tile: &mut Tile, overlap: Rect, pixel: &[u8]) {
    let lx = overlap.x as u32 % TILE_SIZE;
    for y in overlap.y..overlap.bottom() {
        let span = tile.span_mut(lx, y as u32 % TILE_SIZE, overlap.width as usize);
        for px in span.chunks_exact_mut(pixel.len()) {
            px.copy_from_slice(pixel);
        }
    }
}

/// Saved slot contents for a tile range of one device.
#[derive(Debug)]
pub struct TileMemento {
    device: DeviceId,
    entries: Vec<(usize, Option<Arc<Tile>>)>,
}

impl TileMemento {
    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Copy-on-write image of a device's slot table.
#[derive(Clone, Debug)]
pub struct DeviceSnapshot {
    width: u32,
    height: u32,
    format: PixelFormat,
    default_pixel: Vec<u8>,
    tiles_per_row: u32,
    tiles: Vec<Option<Arc<Tile>>>,
}

impl DeviceSnapshot {
    /// Assemble a snapshot from loose tiles (used by snapshot files).
    pub(crate) fn from_tiles(
        width: u32,
        height: u32,
        format: PixelFormat,
        default_pixel: Vec<u8>,
        tiles: impl IntoIterator<Item = (u32, u32, Tile)>,
    ) -> PaintResult<Self> {
        let template = PaintDevice::new(width, height, format)?.with_default_pixel(&default_pixel)?;
        for (tx, ty, tile) in tiles {
            template.check_tile(tx, ty)?;
            if tile.pixel_size() != format.pixel_size() {
                return Err(PaintError::format_mismatch(format, format!("{} bytes/pixel tile", tile.pixel_size())));
            }
            *lock_slot(template.slot(tx, ty)) = Some(Arc::new(tile));
        }
        Ok(template.snapshot())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn default_pixel(&self) -> &[u8] {
        &self.default_pixel
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_some()).count()
    }

    /// Allocated tiles as `(tx, ty, tile)`.
    pub fn tiles(&self) -> impl Iterator<Item = (u32, u32, &Tile)> + '_ {
        let tpr = self.tiles_per_row;
        self.tiles.iter().enumerate().filter_map(move |(i, t)| {
            t.as_deref().map(|tile| ((i as u32) % tpr, (i as u32) / tpr, tile))
        })
    }

    /// Pixel value recorded in the snapshot.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y / TILE_SIZE) * self.tiles_per_row + x / TILE_SIZE) as usize;
        Some(match &self.tiles[idx] {
            Some(t) => t.pixel(x % TILE_SIZE, y % TILE_SIZE),
            None => &self.default_pixel,
        })
    }

    /// Tiles whose contents may differ between the two snapshots. Shared tiles
    /// are compared by pointer, so this is cheap.
    pub fn changed_tiles(&self, other: &DeviceSnapshot) -> Vec<(u32, u32)> {
        let tpr = self.tiles_per_row;
        self.tiles
            .iter()
            .zip(&other.tiles)
            .enumerate()
            .filter(|(_, (a, b))| match (a, b) {
                (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
                (None, None) => false,
                _ => true,
            })
            .map(|(i, _)| ((i as u32) % tpr, (i as u32) / tpr))
            .collect()
    }

    /// Materialize into a new device sharing the snapshot's tiles.
    pub fn to_device(&self) -> PaintResult<PaintDevice> {
        let device = PaintDevice::new(self.width, self.height, self.format)?
            .with_default_pixel(&self.default_pixel)?;
        device.restore(self)?;
        Ok(device)
    }
}
