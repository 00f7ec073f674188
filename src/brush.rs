// ============================================================================
// BRUSH – round dab rasterization via a squared-distance alpha LUT
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::geometry::Rect;

/// Round brush tip parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrushSettings {
    /// Tip diameter in pixels.
    pub diameter: f32,
    /// 0.0 (airbrush-soft) to 1.0 (hard edge).
    pub hardness: f32,
    pub anti_aliased: bool,
    /// Unmultiplied RGBA paint color.
    pub color: [u8; 4],
    /// Dab spacing as a fraction of the diameter, used by `dabs_between`.
    pub spacing: f32,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self {
            diameter: 10.0,
            hardness: 0.75,
            anti_aliased: true,
            color: [0, 0, 0, 255],
            spacing: 0.1,
        }
    }
}

/// One input sample of a stroke path.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DabSample {
    pub x: f32,
    pub y: f32,
    #[serde(default = "full_pressure")]
    pub pressure: f32,
}

fn full_pressure() -> f32 {
    1.0
}

impl DabSample {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, pressure: 1.0 }
    }

    pub fn with_pressure(mut self, pressure: f32) -> Self {
        self.pressure = pressure;
        self
    }
}

/// Rasterized dab: a coverage value (0..=255) for every pixel of `rect`.
#[derive(Clone, Debug, PartialEq)]
pub struct Dab {
    pub rect: Rect,
    pub weights: Vec<u8>,
}

impl BrushSettings {
    pub fn radius(&self) -> f32 {
        self.diameter.max(0.0) / 2.0
    }

    /// Radius actually covered by the tip. Brushes under 3px radius get
    /// 1.5px of extra fade so they stay anti-aliased.
    pub fn outer_radius(&self) -> f32 {
        let radius = self.radius();
        if self.anti_aliased && radius < 3.0 { radius + 1.5 } else { radius }
    }

    /// Tip alpha at `dist` from the center, with a smoothstep edge fade.
    /// Without anti-aliasing the edge is a hard binary cut at the radius.
    pub fn alpha_at(&self, dist: f32) -> f32 {
        let radius = self.radius();
        if !self.anti_aliased {
            return if dist <= radius { 1.0 } else { 0.0 };
        }

        // 0% hardness maps to 0.02 internally (very soft), 100% to a hard edge.
        let remapped = 0.02 + self.hardness.clamp(0.0, 1.0) * 0.98;
        let safe_hardness = remapped.clamp(0.0, 0.99);

        let (effective_radius, fade_width) = if radius < 3.0 {
            let aa_extend = 1.5;
            (radius + aa_extend, aa_extend + radius * (1.0 - safe_hardness))
        } else {
            (radius, (radius * (1.0 - safe_hardness)).max(1.0))
        };

        let solid_radius = effective_radius - fade_width;
        if dist <= solid_radius {
            return 1.0;
        } else if dist >= effective_radius {
            return 0.0;
        }

        let t = (dist - solid_radius) / fade_width;
        let x = 1.0 - t.clamp(0.0, 1.0);
        x * x * (3.0 - 2.0 * x)
    }

    /// 256-entry LUT mapping `dist² / outer_radius²` (scaled to 0..255) to
    /// alpha, so rasterization needs no `sqrt` per pixel.
    pub fn alpha_lut(&self) -> [u8; 256] {
        let mut lut = [0u8; 256];
        let outer = self.outer_radius();
        if outer < 0.001 {
            return lut;
        }
        for (i, slot) in lut.iter_mut().enumerate() {
            let t_sq = i as f32 / 255.0;
            let dist = t_sq.sqrt() * outer;
            *slot = (self.alpha_at(dist) * 255.0).round().min(255.0) as u8;
        }
        lut
    }

    /// Pixel rect a dab centered on `sample` can touch (before clipping).
    pub fn dab_rect(&self, sample: &DabSample) -> Rect {
        let outer = self.outer_radius();
        Rect::from_corners(
            (sample.x - outer).floor() as i32,
            (sample.y - outer).floor() as i32,
            (sample.x + outer).ceil() as i32,
            (sample.y + outer).ceil() as i32,
        )
    }

    /// Coverage of one dab clipped to `bounds`; `None` if nothing is covered.
    /// Pressure scales the coverage linearly.
    pub fn rasterize(&self, sample: &DabSample, lut: &[u8; 256], bounds: Rect) -> Option<Dab> {
        let rect = self.dab_rect(sample).intersect(&bounds)?;
        let outer = self.outer_radius();
        let radius_sq = outer * outer;
        if radius_sq <= 0.0 {
            return None;
        }
        let inv_radius_sq = 1.0 / radius_sq;
        let pressure = sample.pressure.clamp(0.0, 1.0);

        let mut weights = Vec::with_capacity(rect.area() as usize);
        let mut any = false;
        for y in rect.y..rect.bottom() {
            let dy = y as f32 + 0.5 - sample.y;
            let dy_sq = dy * dy;
            for x in rect.x..rect.right() {
                let dx = x as f32 + 0.5 - sample.x;
                let dist_sq = dx * dx + dy_sq;
                let w = if dist_sq > radius_sq {
                    0
                } else {
                    let idx = (dist_sq * inv_radius_sq * 255.0).min(255.0) as usize;
                    (lut[idx] as f32 * pressure).round() as u8
                };
                any |= w != 0;
                weights.push(w);
            }
        }
        any.then_some(Dab { rect, weights })
    }

    /// Interpolated samples from `from` (exclusive) to `to` (inclusive),
    /// spaced `diameter * spacing` apart (at least 1px). Pressure is lerped.
    pub fn dabs_between(&self, from: DabSample, to: DabSample) -> Vec<DabSample> {
        let dx = to.x - from.x;
        let dy = to.y - from.y;
        let distance = (dx * dx + dy * dy).sqrt();
        let step = (self.diameter * self.spacing).max(1.0);
        let steps = (distance / step).ceil().max(1.0) as usize;
        (1..=steps)
            .map(|i| {
                let t = i as f32 / steps as f32;
                DabSample {
                    x: from.x + dx * t,
                    y: from.y + dy * t,
                    pressure: from.pressure + (to.pressure - from.pressure) * t,
                }
            })
            .collect()
    }
}
