use crate::device::PaintDevice;
use crate::error::{PaintError, PaintResult};
use crate::geometry::Rect;
use crate::pixel::PixelFormat;

/// Per-pixel selection mask stored as an `ALPHA8` paint device.
/// 0 = not selected, 255 = fully selected; values in between weight the
/// composite.
#[derive(Debug)]
pub struct Selection {
    mask: PaintDevice,
}

impl Selection {
    /// Empty selection (nothing selected).
    pub fn new(width: u32, height: u32) -> PaintResult<Self> {
        Ok(Self { mask: PaintDevice::new(width, height, PixelFormat::ALPHA8)? })
    }

    /// Everything selected without allocating a single tile.
    pub fn all(width: u32, height: u32) -> PaintResult<Self> {
        let mask = PaintDevice::new(width, height, PixelFormat::ALPHA8)?.with_default_pixel(&[255])?;
        Ok(Self { mask })
    }

    /// Wrap an existing mask device.
    pub fn from_mask(mask: PaintDevice) -> PaintResult<Self> {
        if mask.format() != PixelFormat::ALPHA8 {
            return Err(PaintError::format_mismatch(PixelFormat::ALPHA8, mask.format()));
        }
        Ok(Self { mask })
    }

    pub fn width(&self) -> u32 {
        self.mask.width()
    }

    pub fn height(&self) -> u32 {
        self.mask.height()
    }

    /// Set the selection value over `rect`, clipped to the mask bounds.
    pub fn select_rect(&self, rect: Rect, value: u8) -> PaintResult<()> {
        match rect.intersect(&self.mask.bounds()) {
            Some(clipped) => self.mask.fill(clipped, &[value]),
            None => Ok(()),
        }
    }

    pub fn deselect_rect(&self, rect: Rect) -> PaintResult<()> {
        self.select_rect(rect, 0)
    }

    pub fn select_all(&self) -> PaintResult<()> {
        self.mask.fill(self.mask.bounds(), &[255])
    }

    /// Selection value at a pixel; 0 outside the mask.
    pub fn value(&self, x: i32, y: i32) -> u8 {
        self.mask.pixel(x, y).map(|p| p[0]).unwrap_or(0)
    }

    /// Tight bounds of all selected (non-zero) pixels.
    pub fn selected_bounds(&self) -> Rect {
        if self.mask.default_pixel()[0] != 0 {
            // Unallocated tiles are selected, so only the full bounds are exact.
            return self.mask.bounds();
        }
        self.mask.exact_bounds()
    }

    pub fn device(&self) -> &PaintDevice {
        &self.mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_selection_values() {
        let sel = Selection::new(100, 100).unwrap();
        sel.select_rect(Rect::new(90, 90, 50, 50), 128).unwrap();
        assert_eq!(sel.value(95, 95), 128);
        assert_eq!(sel.value(10, 10), 0);
        assert_eq!(sel.value(-1, 200), 0);
        assert_eq!(sel.selected_bounds(), Rect::new(90, 90, 10, 10));
    }

    #[test]
    fn all_selected_is_sparse() {
        let sel = Selection::all(300, 200).unwrap();
        assert_eq!(sel.value(299, 199), 255);
        assert_eq!(sel.device().tile_count(), 0);
        assert_eq!(sel.selected_bounds(), Rect::new(0, 0, 300, 200));
        sel.deselect_rect(Rect::new(0, 0, 10, 10)).unwrap();
        assert_eq!(sel.value(5, 5), 0);
    }

    #[test]
    fn from_mask_requires_alpha8() {
        let rgba = PaintDevice::new(8, 8, PixelFormat::RGBA8).unwrap();
        assert!(Selection::from_mask(rgba).is_err());
    }
}
