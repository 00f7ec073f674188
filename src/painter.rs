// ============================================================================
// PAINTER – applies a dispatched composite op over device regions
// ============================================================================

use crate::brush::{BrushSettings, DabSample};
use crate::composite::{CompositeOp, CompositeOpId, CompositeOpRegistry, CompositeParams};
use crate::device::PaintDevice;
use crate::error::{PaintError, PaintResult};
use crate::geometry::Rect;
use crate::iterator::{Masked, RectIterMut};
use crate::selection::Selection;
use crate::tile::TILE_SIZE;

/// Composites solid colors, dabs and other devices onto one device.
/// Everything is clipped to the device bounds (and the selection bounds, when
/// a selection is set) and walked run by run with a write cursor. With a
/// selection the cursor is wrapped in [`Masked`], which skips unselected runs
/// and weights the rest by their selection values.
pub struct Painter<'a> {
    device: &'a PaintDevice,
    registry: &'a CompositeOpRegistry,
    op: CompositeOp,
    params: CompositeParams,
    selection: Option<&'a Selection>,
    dirty: Rect,
}

impl<'a> Painter<'a> {
    pub fn new(device: &'a PaintDevice, registry: &'a CompositeOpRegistry, op: CompositeOpId) -> PaintResult<Self> {
        let op = registry.get(op, device.format())?;
        Ok(Self {
            device,
            registry,
            op,
            params: CompositeParams::default(),
            selection: None,
            dirty: Rect::default(),
        })
    }

    pub fn with_params(mut self, params: CompositeParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.params.opacity = opacity;
        self
    }

    pub fn with_selection(mut self, selection: Option<&'a Selection>) -> Self {
        self.selection = selection;
        self
    }

    pub fn set_composite_op(&mut self, op: CompositeOpId) -> PaintResult<()> {
        self.op = self.registry.get(op, self.device.format())?;
        Ok(())
    }

    pub fn composite_op(&self) -> CompositeOpId {
        self.op.id()
    }

    /// Union of every region touched so far.
    pub fn dirty(&self) -> Rect {
        self.dirty
    }

    fn clip(&self, rect: Rect) -> Option<Rect> {
        let mut clip = rect.intersect(&self.device.bounds())?;
        if let Some(sel) = self.selection {
            clip = clip.intersect(&sel.device().bounds())?;
        }
        Some(clip)
    }

    /// Composite a solid `pixel` over `rect`. `weights`, if given, holds one
    /// coverage value per pixel of the *unclipped* `rect`.
    pub fn apply_solid(&mut self, rect: Rect, pixel: &[u8], weights: Option<&[u8]>) -> PaintResult<()> {
        self.device.format().check_pixel(pixel)?;
        if let Some(w) = weights {
            if w.len() as u64 != rect.area() {
                return Err(PaintError::format_mismatch(
                    format!("{} weights", rect.area()),
                    format!("{} weights", w.len()),
                ));
            }
        }
        let Some(clip) = self.clip(rect) else { return Ok(()) };

        let ps = pixel.len();
        let solid = pixel.repeat(TILE_SIZE as usize);
        let mut scratch = Vec::with_capacity(TILE_SIZE as usize);
        let (op, params) = (&self.op, &self.params);

        self.for_each_run(clip, |x, y, line, mask| {
            let n = line.len() / ps;
            let run_weights = weights.map(|w| {
                let off = (y - rect.y) as usize * rect.width as usize + (x - rect.x) as usize;
                &w[off..off + n]
            });
            let combined = combine_weights(&mut scratch, run_weights, mask);
            op.apply(line, &solid[..n * ps], combined, params)
        })?;
        self.dirty = self.dirty.union(&clip);
        Ok(())
    }

    /// Composite the same region of `src` onto this painter's device.
    pub fn bit_blt(&mut self, src: &PaintDevice, rect: Rect) -> PaintResult<()> {
        if src.format() != self.device.format() {
            return Err(PaintError::format_mismatch(self.device.format(), src.format()));
        }
        let Some(clip) = self.clip(rect).and_then(|c| c.intersect(&src.bounds())) else {
            return Ok(());
        };
        // Read first so the source may be the destination device itself.
        let src_buf = src.read(clip)?;
        let ps = self.device.pixel_size();
        let row_bytes = src_buf.row_bytes();
        let (op, params) = (&self.op, &self.params);

        self.for_each_run(clip, |x, y, line, mask| {
            let off = (y - clip.y) as usize * row_bytes + (x - clip.x) as usize * ps;
            op.apply(line, &src_buf.data()[off..off + line.len()], mask, params)
        })?;
        self.dirty = self.dirty.union(&clip);
        Ok(())
    }

    /// Rasterize one brush dab and composite the brush color through it.
    /// Returns the touched rect, or `None` when the dab misses the device.
    pub fn paint_dab(&mut self, brush: &BrushSettings, lut: &[u8; 256], sample: &DabSample) -> PaintResult<Option<Rect>> {
        let Some(dab) = brush.rasterize(sample, lut, self.device.bounds()) else {
            return Ok(None);
        };
        let pixel = self.device.format().encode_rgba8(brush.color);
        self.apply_solid(dab.rect, &pixel, Some(&dab.weights))?;
        Ok(Some(dab.rect))
    }

    /// Hand every run of `clip` to `f` as `(x, y, pixels, selection)`.
    fn for_each_run<F>(&self, clip: Rect, mut f: F) -> PaintResult<()>
    where
        F: FnMut(i32, i32, &mut [u8], Option<&[u8]>) -> PaintResult<()>,
    {
        let it = RectIterMut::new(self.device, clip)?;
        match self.selection {
            None => {
                let mut it = it;
                while it.advance_run() {
                    let (x, y) = (it.x(), it.y());
                    f(x, y, it.line_mut(), None)?;
                }
            }
            Some(sel) => {
                let mut it = Masked::new(it, sel)?;
                while it.advance_run() {
                    let (x, y) = (it.x(), it.y());
                    let (line, mask) = it.line_mut_with_mask();
                    f(x, y, line, Some(mask))?;
                }
            }
        }
        Ok(())
    }
}

/// Multiply two optional weight runs; a single run is passed through as is.
fn combine_weights<'s>(scratch: &'s mut Vec<u8>, a: Option<&'s [u8]>, b: Option<&'s [u8]>) -> Option<&'s [u8]> {
    match (a, b) {
        (Some(a), Some(b)) => {
            scratch.clear();
            scratch.extend(a.iter().zip(b).map(|(&a, &b)| ((a as u32 * b as u32 + 127) / 255) as u8));
            Some(scratch.as_slice())
        }
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::PixelFormat;

    fn setup(w: u32, h: u32) -> (PaintDevice, CompositeOpRegistry) {
        (PaintDevice::new(w, h, PixelFormat::RGBA8).unwrap(), CompositeOpRegistry::scalar())
    }

    #[test]
    fn apply_solid_clips_to_bounds() {
        let (dev, reg) = setup(100, 100);
        let mut painter = Painter::new(&dev, &reg, CompositeOpId::Over).unwrap();
        painter.apply_solid(Rect::new(90, 90, 20, 20), &[255, 0, 0, 255], None).unwrap();
        assert_eq!(painter.dirty(), Rect::new(90, 90, 10, 10));
        assert_eq!(dev.exact_bounds(), Rect::new(90, 90, 10, 10));
        assert_eq!(dev.pixel(99, 99).unwrap(), vec![255, 0, 0, 255]);
    }

    #[test]
    fn weights_follow_the_unclipped_rect() {
        let (dev, reg) = setup(64, 64);
        let mut painter = Painter::new(&dev, &reg, CompositeOpId::Copy).unwrap();
        let rect = Rect::new(-1, 0, 2, 1);
        painter.apply_solid(rect, &[9, 9, 9, 255], Some(&[0, 255])).unwrap();
        assert_eq!(dev.pixel(0, 0).unwrap(), vec![9, 9, 9, 255]);
        assert!(painter.apply_solid(rect, &[9, 9, 9, 255], Some(&[0])).is_err());
    }

    #[test]
    fn selection_limits_painting() {
        let (dev, reg) = setup(128, 128);
        let sel = Selection::new(128, 128).unwrap();
        sel.select_rect(Rect::new(0, 0, 64, 128), 255).unwrap();
        let mut painter = Painter::new(&dev, &reg, CompositeOpId::Over)
            .unwrap()
            .with_selection(Some(&sel));
        painter.apply_solid(Rect::new(0, 0, 128, 128), &[0, 0, 0, 255], None).unwrap();
        assert_eq!(dev.exact_bounds(), Rect::new(0, 0, 64, 128));
    }

    #[test]
    fn partial_selection_weights_pixels() {
        let (dev, reg) = setup(128, 64);
        let sel = Selection::new(128, 64).unwrap();
        sel.select_rect(Rect::new(0, 0, 2, 1), 255).unwrap();
        sel.select_rect(Rect::new(2, 0, 1, 1), 128).unwrap();
        let mut painter = Painter::new(&dev, &reg, CompositeOpId::Copy)
            .unwrap()
            .with_selection(Some(&sel));
        painter.apply_solid(dev.bounds(), &[255, 255, 255, 255], None).unwrap();
        assert_eq!(dev.pixel(1, 0).unwrap(), vec![255, 255, 255, 255]);
        assert_eq!(dev.pixel(2, 0).unwrap()[3], 128);
        assert_eq!(dev.pixel(3, 0).unwrap(), vec![0, 0, 0, 0]);
        assert_eq!(dev.pixel(0, 1).unwrap(), vec![0, 0, 0, 0]);
        assert_eq!(painter.dirty(), dev.bounds());
    }

    #[test]
    fn bit_blt_composites_other_device() {
        let (dev, reg) = setup(128, 128);
        let src = PaintDevice::new(128, 128, PixelFormat::RGBA8).unwrap();
        src.fill(Rect::new(60, 60, 10, 10), &[0, 255, 0, 255]).unwrap();
        let mut painter = Painter::new(&dev, &reg, CompositeOpId::Over).unwrap().with_opacity(0.5);
        painter.bit_blt(&src, Rect::new(0, 0, 128, 128)).unwrap();
        assert_eq!(dev.pixel(65, 65).unwrap(), vec![0, 255, 0, 128]);
        assert_eq!(dev.pixel(10, 10).unwrap(), vec![0, 0, 0, 0]);

        let gray = PaintDevice::new(128, 128, PixelFormat::GRAY8).unwrap();
        assert!(matches!(painter.bit_blt(&gray, dev.bounds()), Err(PaintError::FormatMismatch { .. })));
    }

    #[test]
    fn unsupported_op_for_format_is_rejected() {
        let dev = PaintDevice::new(8, 8, PixelFormat::GRAY8).unwrap();
        let reg = CompositeOpRegistry::scalar();
        assert!(matches!(
            Painter::new(&dev, &reg, CompositeOpId::Multiply),
            Err(PaintError::UnsupportedCompositeOp { .. })
        ));
    }

    #[test]
    fn paint_dab_reports_touched_rect() {
        let (dev, reg) = setup(64, 64);
        let brush = BrushSettings { diameter: 6.0, anti_aliased: false, color: [10, 20, 30, 255], ..Default::default() };
        let lut = brush.alpha_lut();
        let mut painter = Painter::new(&dev, &reg, CompositeOpId::Over).unwrap();
        let rect = painter.paint_dab(&brush, &lut, &DabSample::new(10.0, 10.0)).unwrap();
        assert_eq!(rect, Some(Rect::new(7, 7, 6, 6)));
        assert_eq!(dev.pixel(10, 10).unwrap(), vec![10, 20, 30, 255]);
        assert_eq!(painter.paint_dab(&brush, &lut, &DabSample::new(-20.0, 5.0)).unwrap(), None);
    }
}
