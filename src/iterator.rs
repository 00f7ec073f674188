// ============================================================================
// PIXEL ITERATORS – row-major cursors over a device rectangle
// ============================================================================
//
// A cursor starts *before* the first pixel; the first `advance()` moves onto
// it and `advance()` returns false once the rectangle is exhausted. Tile
// crossings are invisible to callers, but the bulk `line()` accessors only
// return the run of the current row that lies inside the current tile.

use std::sync::{Arc, MutexGuard};

use crate::device::{PaintDevice, lock_slot};
use crate::error::PaintResult;
use crate::geometry::Rect;
use crate::selection::Selection;
use crate::tile::{TILE_SIZE, Tile};

/// Common cursor surface shared by the read and write iterators, so that
/// `Masked` can wrap either.
pub trait PixelCursor {
    fn rect(&self) -> Rect;
    fn x(&self) -> i32;
    fn y(&self) -> i32;
    fn conseq_pixels(&self) -> usize;
    fn advance(&mut self) -> bool;
    fn advance_run(&mut self) -> bool;
}

/// Position bookkeeping shared by both cursors.
#[derive(Clone, Copy, Debug)]
struct Position {
    rect: Rect,
    x: i32,
    y: i32,
    started: bool,
    done: bool,
}

impl Position {
    fn new(rect: Rect) -> Self {
        Self { rect, x: rect.x, y: rect.y, started: false, done: rect.is_empty() }
    }

    fn step(&mut self) -> bool {
        if self.done {
            return false;
        }
        if !self.started {
            self.started = true;
            return true;
        }
        self.x += 1;
        if self.x >= self.rect.right() {
            self.x = self.rect.x;
            self.y += 1;
            if self.y >= self.rect.bottom() {
                self.done = true;
                return false;
            }
        }
        true
    }

    /// Jump to the last pixel of the current run so the next `step` leaves it.
    fn skip_run(&mut self) {
        if self.started && !self.done {
            self.x += self.conseq_pixels() as i32 - 1;
        }
    }

    #[inline]
    fn on_pixel(&self) -> bool {
        self.started && !self.done
    }

    #[inline]
    fn tile_key(&self) -> (u32, u32) {
        (self.x as u32 / TILE_SIZE, self.y as u32 / TILE_SIZE)
    }

    #[inline]
    fn local(&self) -> (u32, u32) {
        (self.x as u32 % TILE_SIZE, self.y as u32 % TILE_SIZE)
    }

    /// Pixels left in the current row before the tile or rect edge.
    #[inline]
    fn conseq_pixels(&self) -> usize {
        if !self.on_pixel() {
            return 0;
        }
        let ts = TILE_SIZE as i32;
        let tile_end = (self.x / ts + 1) * ts;
        (tile_end.min(self.rect.right()) - self.x) as usize
    }
}

// ---- read cursor ------------------------------------------------------------

/// Read-only cursor. Tiles are fetched as shared `Arc` handles, so no lock is
/// held between calls and unallocated tiles are never created.
pub struct RectIter<'a> {
    device: &'a PaintDevice,
    pos: Position,
    key: Option<(u32, u32)>,
    tile: Option<Arc<Tile>>,
    default_run: Vec<u8>,
}

impl<'a> RectIter<'a> {
    pub fn new(device: &'a PaintDevice, rect: Rect) -> PaintResult<Self> {
        device.check_rect(&rect)?;
        Ok(Self {
            device,
            pos: Position::new(rect),
            key: None,
            tile: None,
            default_run: device.default_pixel().repeat(TILE_SIZE as usize),
        })
    }

    pub fn advance(&mut self) -> bool {
        let moved = self.pos.step();
        if moved {
            self.enter_tile();
        }
        moved
    }

    /// Skip the rest of the current run and land on the first pixel after it.
    pub fn advance_run(&mut self) -> bool {
        self.pos.skip_run();
        self.advance()
    }

    fn enter_tile(&mut self) {
        let key = self.pos.tile_key();
        if self.key != Some(key) {
            self.tile = lock_slot(self.device.slot(key.0, key.1)).clone();
            self.key = Some(key);
        }
    }

    pub fn x(&self) -> i32 {
        self.pos.x
    }

    pub fn y(&self) -> i32 {
        self.pos.y
    }

    pub fn rect(&self) -> Rect {
        self.pos.rect
    }

    pub fn conseq_pixels(&self) -> usize {
        self.pos.conseq_pixels()
    }

    /// Bytes of the pixel under the cursor.
    pub fn current(&self) -> &[u8] {
        assert!(self.pos.on_pixel(), "cursor is not positioned on a pixel");
        let (lx, ly) = self.pos.local();
        match &self.tile {
            Some(t) => t.pixel(lx, ly),
            None => self.device.default_pixel(),
        }
    }

    /// Bytes of the current run (see [`conseq_pixels`](Self::conseq_pixels)).
    pub fn line(&self) -> &[u8] {
        assert!(self.pos.on_pixel(), "cursor is not positioned on a pixel");
        let n = self.conseq_pixels();
        let (lx, ly) = self.pos.local();
        match &self.tile {
            Some(t) => t.span(lx, ly, n),
            None => &self.default_run[..n * self.device.pixel_size()],
        }
    }
}

impl PixelCursor for RectIter<'_> {
    fn rect(&self) -> Rect {
        self.pos.rect
    }

    fn x(&self) -> i32 {
        self.pos.x
    }

    fn y(&self) -> i32 {
        self.pos.y
    }

    fn conseq_pixels(&self) -> usize {
        self.pos.conseq_pixels()
    }

    fn advance(&mut self) -> bool {
        RectIter::advance(self)
    }

    fn advance_run(&mut self) -> bool {
        RectIter::advance_run(self)
    }
}

// ---- write cursor -----------------------------------------------------------

/// Mutable cursor. Entering a tile allocates it (filled with the default
/// pixel) and detaches it from any fork or snapshot.
///
/// The cursor holds the slot lock of the tile it is positioned in. Reading or
/// writing that same tile through the device from the same thread while the
/// cursor is alive deadlocks.
pub struct RectIterMut<'a> {
    device: &'a PaintDevice,
    pos: Position,
    key: Option<(u32, u32)>,
    guard: Option<MutexGuard<'a, Option<Arc<Tile>>>>,
}

impl<'a> RectIterMut<'a> {
    pub fn new(device: &'a PaintDevice, rect: Rect) -> PaintResult<Self> {
        device.check_rect(&rect)?;
        Ok(Self { device, pos: Position::new(rect), key: None, guard: None })
    }

    pub fn advance(&mut self) -> bool {
        let moved = self.pos.step();
        if moved {
            self.enter_tile();
        } else {
            self.guard = None;
            self.key = None;
        }
        moved
    }

    pub fn advance_run(&mut self) -> bool {
        self.pos.skip_run();
        self.advance()
    }

    fn enter_tile(&mut self) {
        let key = self.pos.tile_key();
        if self.key == Some(key) {
            return;
        }
        // Release the previous tile before taking the next lock.
        self.guard = None;
        let device = self.device;
        let mut guard = lock_slot(device.slot(key.0, key.1));
        let arc = guard.get_or_insert_with(|| Arc::new(Tile::filled(device.default_pixel())));
        Arc::make_mut(arc);
        self.guard = Some(guard);
        self.key = Some(key);
    }

    fn tile(&self) -> &Tile {
        match self.guard.as_deref() {
            Some(Some(arc)) => arc.as_ref(),
            _ => panic!("cursor is not positioned on a pixel"),
        }
    }

    fn tile_mut(&mut self) -> &mut Tile {
        match self.guard.as_deref_mut() {
            Some(Some(arc)) => Arc::make_mut(arc),
            _ => panic!("cursor is not positioned on a pixel"),
        }
    }

    pub fn x(&self) -> i32 {
        self.pos.x
    }

    pub fn y(&self) -> i32 {
        self.pos.y
    }

    pub fn rect(&self) -> Rect {
        self.pos.rect
    }

    pub fn conseq_pixels(&self) -> usize {
        self.pos.conseq_pixels()
    }

    pub fn current(&self) -> &[u8] {
        let (lx, ly) = self.pos.local();
        self.tile().pixel(lx, ly)
    }

    pub fn current_mut(&mut self) -> &mut [u8] {
        let (lx, ly) = self.pos.local();
        self.tile_mut().pixel_mut(lx, ly)
    }

    pub fn line(&self) -> &[u8] {
        let n = self.conseq_pixels();
        let (lx, ly) = self.pos.local();
        self.tile().span(lx, ly, n)
    }

    pub fn line_mut(&mut self) -> &mut [u8] {
        let n = self.conseq_pixels();
        let (lx, ly) = self.pos.local();
        self.tile_mut().span_mut(lx, ly, n)
    }
}

impl PixelCursor for RectIterMut<'_> {
    fn rect(&self) -> Rect {
        self.pos.rect
    }

    fn x(&self) -> i32 {
        self.pos.x
    }

    fn y(&self) -> i32 {
        self.pos.y
    }

    fn conseq_pixels(&self) -> usize {
        self.pos.conseq_pixels()
    }

    fn advance(&mut self) -> bool {
        RectIterMut::advance(self)
    }

    fn advance_run(&mut self) -> bool {
        RectIterMut::advance_run(self)
    }
}

// ---- masked cursor ----------------------------------------------------------

/// Wraps a cursor and skips every pixel whose selection value is 0.
/// The selection is walked in lockstep over the same rectangle.
pub struct Masked<'a, C> {
    inner: C,
    mask: RectIter<'a>,
}

impl<'a, C: PixelCursor> Masked<'a, C> {
    /// Fails with `OutOfBounds` if the cursor's rect is not inside the
    /// selection.
    pub fn new(inner: C, selection: &'a Selection) -> PaintResult<Self> {
        let mask = RectIter::new(selection.device(), inner.rect())?;
        Ok(Self { inner, mask })
    }

    pub fn advance(&mut self) -> bool {
        loop {
            if !self.inner.advance() {
                return false;
            }
            self.mask.advance();
            if self.mask.current()[0] != 0 {
                return true;
            }
        }
    }

    /// Step run by run, skipping runs with no selected pixel. A run that is
    /// only partly selected is returned whole; [`mask_line`](Self::mask_line)
    /// gives its per-pixel selection. Starts from the first run when called
    /// on a fresh cursor.
    pub fn advance_run(&mut self) -> bool {
        loop {
            if !self.inner.advance_run() {
                return false;
            }
            // Same rect, same tile grid: the mask runs line up with the inner ones.
            self.mask.advance_run();
            if self.mask.line().iter().any(|&s| s != 0) {
                return true;
            }
        }
    }

    /// Selection value of the pixel under the cursor; always non-zero after
    /// `advance`, may be 0 at the start of a run reached by `advance_run`.
    pub fn selectedness(&self) -> u8 {
        self.mask.current()[0]
    }

    /// Selection values of the current run.
    pub fn mask_line(&self) -> &[u8] {
        self.mask.line()
    }

    pub fn conseq_pixels(&self) -> usize {
        self.inner.conseq_pixels()
    }

    pub fn x(&self) -> i32 {
        self.inner.x()
    }

    pub fn y(&self) -> i32 {
        self.inner.y()
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }
}

impl Masked<'_, RectIterMut<'_>> {
    /// Writable pixels of the current run together with their selection values.
    pub fn line_mut_with_mask(&mut self) -> (&mut [u8], &[u8]) {
        (self.inner.line_mut(), self.mask.line())
    }
}

impl<C: PixelCursor> PixelCursor for Masked<'_, C> {
    fn rect(&self) -> Rect {
        self.inner.rect()
    }

    fn x(&self) -> i32 {
        self.inner.x()
    }

    fn y(&self) -> i32 {
        self.inner.y()
    }

    fn conseq_pixels(&self) -> usize {
        self.inner.conseq_pixels()
    }

    fn advance(&mut self) -> bool {
        Masked::advance(self)
    }

    fn advance_run(&mut self) -> bool {
        Masked::advance_run(self)
    }
}
