use serde::{Deserialize, Serialize};

use crate::tile::TILE_SIZE;

/// Integer pixel rectangle. `x`/`y` are inclusive, `right()`/`bottom()` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Build from exclusive corner coordinates; inverted corners give an empty rect.
    pub fn from_corners(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self::from_edges(x0, y0, x1 as i64, y1 as i64)
    }

    /// Like `from_corners` but with far edges that may lie past `i32::MAX`.
    fn from_edges(x0: i32, y0: i32, x1: i64, y1: i64) -> Self {
        let span = |lo: i32, hi: i64| (hi - lo as i64).clamp(0, u32::MAX as i64) as u32;
        Self { x: x0, y: y0, width: span(x0, x1), height: span(y0, y1) }
    }

    /// Exclusive right edge, without overflow.
    #[inline]
    pub fn end_x(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge, without overflow.
    #[inline]
    pub fn end_y(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Exclusive right edge, saturated to `i32::MAX`. Exact for any rect that
    /// passed a bounds check.
    #[inline]
    pub fn right(&self) -> i32 {
        self.end_x().min(i32::MAX as i64) as i32
    }

    #[inline]
    pub fn bottom(&self) -> i32 {
        self.end_y().min(i32::MAX as i64) as i32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    #[inline]
    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && (x as i64) < self.end_x() && (y as i64) < self.end_y()
    }

    /// True when `other` lies entirely inside `self`. Empty rects are contained
    /// by everything.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.is_empty()
            || (other.x >= self.x
                && other.y >= self.y
                && other.end_x() <= self.end_x()
                && other.end_y() <= self.end_y())
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::from_edges(
            self.x.max(other.x),
            self.y.max(other.y),
            self.end_x().min(other.end_x()),
            self.end_y().min(other.end_y()),
        );
        if r.is_empty() { None } else { Some(r) }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersect(other).is_some()
    }

    /// Smallest rect covering both. Empty operands are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect::from_edges(
            self.x.min(other.x),
            self.y.min(other.y),
            self.end_x().max(other.end_x()),
            self.end_y().max(other.end_y()),
        )
    }

    /// Range of tiles this rect touches. Callers clip to device bounds first,
    /// so negative coordinates never reach here.
    pub fn tile_range(&self) -> TileRange {
        if self.is_empty() {
            return TileRange::EMPTY;
        }
        let ts = TILE_SIZE as i64;
        TileRange {
            x0: (self.x.max(0) as i64 / ts) as u32,
            y0: (self.y.max(0) as i64 / ts) as u32,
            x1: ((self.end_x().max(0) + ts - 1) / ts) as u32,
            y1: ((self.end_y().max(0) + ts - 1) / ts) as u32,
        }
    }
}

/// Half-open range of tile coordinates `[x0, x1) × [y0, y1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct TileRange {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl TileRange {
    pub const EMPTY: TileRange = TileRange { x0: 0, y0: 0, x1: 0, y1: 0 };

    pub fn is_empty(&self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            ((self.x1 - self.x0) * (self.y1 - self.y0)) as usize
        }
    }

    pub fn contains(&self, tx: u32, ty: u32) -> bool {
        tx >= self.x0 && tx < self.x1 && ty >= self.y0 && ty < self.y1
    }

    pub fn overlaps(&self, other: &TileRange) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x0 < other.x1
            && other.x0 < self.x1
            && self.y0 < other.y1
            && other.y0 < self.y1
    }

    /// Smallest range covering both; empty operands are ignored.
    pub fn union(&self, other: &TileRange) -> TileRange {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        TileRange {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Tile coordinates in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let (x0, x1) = (self.x0, self.x1);
        (self.y0..self.y1).flat_map(move |ty| (x0..x1).map(move |tx| (tx, ty)))
    }

    /// Pixel rect covered by the range.
    pub fn pixel_rect(&self) -> Rect {
        Rect::from_corners(
            (self.x0 * TILE_SIZE) as i32,
            (self.y0 * TILE_SIZE) as i32,
            (self.x1 * TILE_SIZE) as i32,
            (self.y1 * TILE_SIZE) as i32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_and_union() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.intersect(&b), Some(Rect::new(5, 5, 5, 5)));
        assert_eq!(a.union(&b), Rect::new(0, 0, 15, 15));
        assert_eq!(a.intersect(&Rect::new(10, 0, 4, 4)), None);
        assert_eq!(Rect::default().union(&b), b);
    }

    #[test]
    fn contains_rect_treats_empty_as_contained() {
        let bounds = Rect::new(0, 0, 128, 128);
        assert!(bounds.contains_rect(&Rect::new(120, 120, 8, 8)));
        assert!(!bounds.contains_rect(&Rect::new(120, 120, 9, 8)));
        assert!(bounds.contains_rect(&Rect::new(-50, -50, 0, 0)));
    }

    #[test]
    fn edges_past_i32_max_do_not_wrap() {
        let bounds = Rect::new(0, 0, 64, 64);
        let far = Rect::new(i32::MAX - 5, 0, 10, 1);
        assert_eq!(far.end_x(), i32::MAX as i64 + 5);
        assert_eq!(far.right(), i32::MAX);
        assert!(!bounds.contains_rect(&far));
        assert_eq!(bounds.intersect(&far), None);

        let wide = Rect::new(-10, 0, u32::MAX, 4);
        assert!(!bounds.contains_rect(&wide));
        assert_eq!(bounds.intersect(&wide), Some(Rect::new(0, 0, 64, 4)));
        assert_eq!(Rect::from_corners(i32::MIN, 0, i32::MAX, 1).width, u32::MAX);
        assert!(bounds.union(&far).contains_rect(&far));
    }

    #[test]
    fn tile_range_covers_partial_tiles() {
        let r = Rect::new(5, 5, 10, 10).tile_range();
        assert_eq!(r, TileRange { x0: 0, y0: 0, x1: 1, y1: 1 });
        let r = Rect::new(60, 0, 10, 130).tile_range();
        assert_eq!(r, TileRange { x0: 0, y0: 0, x1: 2, y1: 3 });
        assert_eq!(r.len(), 6);
        assert!(Rect::new(0, 0, 0, 5).tile_range().is_empty());
    }

    #[test]
    fn tile_ranges_overlap_only_when_sharing_a_tile() {
        let left = Rect::new(0, 0, 64, 128).tile_range();
        let right = Rect::new(64, 0, 64, 128).tile_range();
        assert!(!left.overlaps(&right));
        let straddling = Rect::new(60, 0, 8, 8).tile_range();
        assert!(left.overlaps(&straddling));
        assert!(right.overlaps(&straddling));
    }

    #[test]
    fn tile_range_iterates_row_major() {
        let r = TileRange { x0: 1, y0: 0, x1: 3, y1: 2 };
        let coords: Vec<_> = r.iter().collect();
        assert_eq!(coords, vec![(1, 0), (2, 0), (1, 1), (2, 1)]);
    }
}
