// ============================================================================
// COMPOSITE KERNELS – scalar bodies plus per-arch compiled wrappers
// ============================================================================
//
// Every kernel is written once as an `#[inline(always)]` scalar function. The
// arch modules generated at the bottom wrap each kernel in a
// `#[target_feature]` function, so the compiler inlines and auto-vectorizes
// the same code for that instruction set. The arithmetic is identical across
// variants, which keeps their output bit-identical.

use super::{CompositeFn, CompositeOpId, CompositeParams};
use crate::pixel::PixelFormat;

#[inline(always)]
fn unit(v: u8) -> f32 {
    v as f32 / 255.0
}

#[inline(always)]
fn to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

#[inline(always)]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[inline(always)]
fn lerp_u8(a: u8, b: u8, t: f32) -> u8 {
    to_u8(lerp(unit(a), unit(b), t))
}

#[inline(always)]
fn weight_at(weights: Option<&[u8]>, i: usize) -> f32 {
    weights.map_or(1.0, |w| unit(w[i]))
}

/// Visit RGBA8 pixel pairs, skipping pixels whose weight is 0.
#[inline(always)]
fn for_each_rgba8(
    dst: &mut [u8],
    src: &[u8],
    weights: Option<&[u8]>,
    mut f: impl FnMut(&mut [u8; 4], [u8; 4], f32),
) {
    let dst: &mut [[u8; 4]] = bytemuck::cast_slice_mut(dst);
    let src: &[[u8; 4]] = bytemuck::cast_slice(src);
    match weights {
        Some(w) => {
            for ((d, s), &m) in dst.iter_mut().zip(src).zip(w) {
                if m != 0 {
                    f(d, *s, unit(m));
                }
            }
        }
        None => {
            for (d, s) in dst.iter_mut().zip(src) {
                f(d, *s, 1.0);
            }
        }
    }
}

/// Straight-alpha source-over with a separable blend function `f(base, top)`.
/// The blended color is mixed with the plain source color by the backdrop
/// alpha, so painting onto transparency always shows the source color.
#[inline(always)]
fn blend_rgba8(d: &mut [u8; 4], s: [u8; 4], weight: f32, opacity: f32, f: impl Fn(f32, f32) -> f32) {
    if s[3] == 0 {
        return;
    }
    let top_a = unit(s[3]) * opacity * weight;
    if top_a <= 0.0 {
        return;
    }
    let base_a = unit(d[3]);
    let out_a = top_a + base_a * (1.0 - top_a);
    for c in 0..3 {
        let base = unit(d[c]);
        let top = unit(s[c]);
        let mixed = (1.0 - base_a) * top + base_a * f(base, top);
        d[c] = to_u8((mixed * top_a + base * base_a * (1.0 - top_a)) / out_a);
    }
    d[3] = to_u8(out_a);
}

#[inline(always)]
fn separable_rgba8(
    dst: &mut [u8],
    src: &[u8],
    weights: Option<&[u8]>,
    params: &CompositeParams,
    f: impl Fn(f32, f32) -> f32 + Copy,
) {
    let opacity = params.opacity.clamp(0.0, 1.0);
    for_each_rgba8(dst, src, weights, |d, s, w| blend_rgba8(d, s, w, opacity, f));
}

// ---- RGBA8 ------------------------------------------------------------------

#[inline(always)]
fn over_rgba8(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
    let opacity = params.opacity.clamp(0.0, 1.0);
    for_each_rgba8(dst, src, weights, |d, s, w| {
        // Fast path: full coverage of an opaque source just overwrites.
        if s[3] == 255 && w >= 1.0 && opacity >= 1.0 {
            *d = s;
            return;
        }
        blend_rgba8(d, s, w, opacity, |_, top| top);
    });
}

/// Alpha-darken: color is lerped toward the source while alpha grows toward
/// (but never past) the stroke opacity. `flow` blends between that capped
/// alpha and a plain alpha union.
#[inline(always)]
fn alpha_darken_rgba8(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
    let opacity = params.opacity.clamp(0.0, 1.0);
    let flow = params.flow.clamp(0.0, 1.0);
    for_each_rgba8(dst, src, weights, |d, s, w| {
        let msk_alpha = unit(s[3]) * w;
        if msk_alpha <= 0.0 {
            return;
        }
        let src_alpha = msk_alpha * opacity;
        let dst_a = unit(d[3]);

        if d[3] != 0 {
            for c in 0..3 {
                d[c] = lerp_u8(d[c], s[c], src_alpha);
            }
        } else {
            d[..3].copy_from_slice(&s[..3]);
        }

        let full_flow = if opacity > dst_a { lerp(dst_a, opacity, msk_alpha) } else { dst_a };
        let zero_flow = dst_a + src_alpha - dst_a * src_alpha;
        d[3] = to_u8(lerp(zero_flow, full_flow, flow));
    });
}

#[inline(always)]
fn copy_rgba8(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
    let opacity = params.opacity.clamp(0.0, 1.0);
    for_each_rgba8(dst, src, weights, |d, s, w| {
        let t = w * opacity;
        if t >= 1.0 {
            *d = s;
        } else {
            for c in 0..4 {
                d[c] = lerp_u8(d[c], s[c], t);
            }
        }
    });
}

/// Scales destination alpha down by source coverage; colors are kept unless
/// the pixel becomes fully transparent.
#[inline(always)]
fn erase_rgba8(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
    let opacity = params.opacity.clamp(0.0, 1.0);
    for_each_rgba8(dst, src, weights, |d, s, w| {
        let a = to_u8(unit(d[3]) * (1.0 - unit(s[3]) * w * opacity));
        if a == 0 {
            *d = [0; 4];
        } else {
            d[3] = a;
        }
    });
}

#[inline(always)]
fn multiply_rgba8(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
    separable_rgba8(dst, src, weights, params, |b, t| b * t);
}

#[inline(always)]
fn screen_rgba8(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
    separable_rgba8(dst, src, weights, params, |b, t| 1.0 - (1.0 - b) * (1.0 - t));
}

#[inline(always)]
fn darken_rgba8(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
    separable_rgba8(dst, src, weights, params, f32::min);
}

#[inline(always)]
fn lighten_rgba8(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
    separable_rgba8(dst, src, weights, params, f32::max);
}

#[inline(always)]
fn difference_rgba8(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
    separable_rgba8(dst, src, weights, params, |b, t| (b - t).abs());
}

#[inline(always)]
fn additive_rgba8(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
    separable_rgba8(dst, src, weights, params, |b, t| (b + t).min(1.0));
}

// ---- RGBA F32 (128-bit pixels) ----------------------------------------------

#[inline(always)]
fn read_f32x4(bytes: &[u8]) -> [f32; 4] {
    bytemuck::pod_read_unaligned(bytes)
}

#[inline(always)]
fn over_rgba_f32(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
    let opacity = params.opacity.clamp(0.0, 1.0);
    for (i, (d, s)) in dst.chunks_exact_mut(16).zip(src.chunks_exact(16)).enumerate() {
        let w = weight_at(weights, i);
        let top = read_f32x4(s);
        let top_a = top[3].clamp(0.0, 1.0) * opacity * w;
        if top_a <= 0.0 {
            continue;
        }
        let mut base = read_f32x4(d);
        let base_a = base[3].clamp(0.0, 1.0);
        let out_a = top_a + base_a * (1.0 - top_a);
        for c in 0..3 {
            base[c] = (top[c] * top_a + base[c] * base_a * (1.0 - top_a)) / out_a;
        }
        base[3] = out_a;
        d.copy_from_slice(bytemuck::bytes_of(&base));
    }
}

#[inline(always)]
fn copy_rgba_f32(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
    let opacity = params.opacity.clamp(0.0, 1.0);
    for (i, (d, s)) in dst.chunks_exact_mut(16).zip(src.chunks_exact(16)).enumerate() {
        let t = weight_at(weights, i) * opacity;
        if t <= 0.0 {
            continue;
        }
        if t >= 1.0 {
            d.copy_from_slice(s);
            continue;
        }
        let top = read_f32x4(s);
        let mut base = read_f32x4(d);
        for c in 0..4 {
            base[c] = lerp(base[c], top[c], t);
        }
        d.copy_from_slice(bytemuck::bytes_of(&base));
    }
}

// ---- single-channel U8 ------------------------------------------------------

#[inline(always)]
fn copy_u8(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
    let opacity = params.opacity.clamp(0.0, 1.0);
    for (i, (d, &s)) in dst.iter_mut().zip(src).enumerate() {
        let t = weight_at(weights, i) * opacity;
        if t >= 1.0 {
            *d = s;
        } else if t > 0.0 {
            *d = lerp_u8(*d, s, t);
        }
    }
}

#[inline(always)]
fn copy_gray8(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
    copy_u8(dst, src, weights, params);
}

#[inline(always)]
fn copy_alpha8(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
    copy_u8(dst, src, weights, params);
}

// ---- per-arch tables --------------------------------------------------------

pub(crate) type KernelTable = Vec<(CompositeOpId, PixelFormat, CompositeFn)>;

macro_rules! arch_module {
    ($name:ident, $feature:literal, [$( $op:ident / $fmt:ident => $kernel:ident ),*]) => {
        pub(crate) mod $name {
            use super::{CompositeFn, CompositeOpId, CompositeParams, KernelTable, PixelFormat};

            $(
                fn $kernel(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
                    #[target_feature(enable = $feature)]
                    unsafe fn inner(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams) {
                        super::$kernel(dst, src, weights, params)
                    }
                    // SAFETY: the registry only installs this table after
                    // runtime detection confirmed the feature.
                    unsafe { inner(dst, src, weights, params) }
                }
            )*

            pub(crate) fn table() -> KernelTable {
                vec![$( (CompositeOpId::$op, PixelFormat::$fmt, $kernel as CompositeFn) ),*]
            }
        }
    };
}

macro_rules! composite_kernels {
    ($( $op:ident / $fmt:ident => $kernel:ident ),* $(,)?) => {
        pub(crate) fn scalar_table() -> KernelTable {
            vec![$( (CompositeOpId::$op, PixelFormat::$fmt, $kernel as CompositeFn) ),*]
        }

        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        arch_module!(avx2, "avx2", [$( $op / $fmt => $kernel ),*]);
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        arch_module!(sse41, "sse4.1", [$( $op / $fmt => $kernel ),*]);
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        arch_module!(sse2, "sse2", [$( $op / $fmt => $kernel ),*]);
        #[cfg(target_arch = "aarch64")]
        arch_module!(neon, "neon", [$( $op / $fmt => $kernel ),*]);
    };
}

composite_kernels! {
    Over / RGBA8 => over_rgba8,
    AlphaDarken / RGBA8 => alpha_darken_rgba8,
    Copy / RGBA8 => copy_rgba8,
    Erase / RGBA8 => erase_rgba8,
    Multiply / RGBA8 => multiply_rgba8,
    Screen / RGBA8 => screen_rgba8,
    Darken / RGBA8 => darken_rgba8,
    Lighten / RGBA8 => lighten_rgba8,
    Difference / RGBA8 => difference_rgba8,
    Additive / RGBA8 => additive_rgba8,
    Over / RGBA_F32 => over_rgba_f32,
    Copy / RGBA_F32 => copy_rgba_f32,
    Copy / GRAY8 => copy_gray8,
    Copy / ALPHA8 => copy_alpha8,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(opacity: f32) -> CompositeParams {
        CompositeParams { opacity, flow: 1.0 }
    }

    #[test]
    fn over_opaque_source_replaces() {
        let mut dst = [10, 20, 30, 255, 0, 0, 0, 0];
        over_rgba8(&mut dst, &[200, 100, 50, 255, 1, 2, 3, 255], None, &params(1.0));
        assert_eq!(dst, [200, 100, 50, 255, 1, 2, 3, 255]);
    }

    #[test]
    fn over_half_opacity_on_transparent_keeps_color() {
        let mut dst = [0, 0, 0, 0];
        over_rgba8(&mut dst, &[255, 0, 0, 255], None, &params(0.5));
        assert_eq!(dst, [255, 0, 0, 128]);
    }

    #[test]
    fn zero_weight_and_transparent_source_are_noops() {
        let mut dst = [1, 2, 3, 4, 5, 6, 7, 8];
        over_rgba8(&mut dst, &[255, 255, 255, 255, 9, 9, 9, 0], Some(&[0, 255]), &params(1.0));
        assert_eq!(dst, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn multiply_on_opaque_white_gives_source() {
        let mut dst = [255, 255, 255, 255];
        multiply_rgba8(&mut dst, &[100, 150, 200, 255], None, &params(1.0));
        assert_eq!(dst, [100, 150, 200, 255]);
    }

    #[test]
    fn darken_and_lighten_pick_channels() {
        let mut dark = [100, 200, 50, 255];
        darken_rgba8(&mut dark, &[150, 100, 50, 255], None, &params(1.0));
        assert_eq!(dark, [100, 100, 50, 255]);
        let mut light = [100, 200, 50, 255];
        lighten_rgba8(&mut light, &[150, 100, 50, 255], None, &params(1.0));
        assert_eq!(light, [150, 200, 50, 255]);
    }

    #[test]
    fn erase_clears_fully_covered_pixels() {
        let mut dst = [10, 20, 30, 255, 10, 20, 30, 255];
        erase_rgba8(&mut dst, &[0, 0, 0, 255, 0, 0, 0, 255], Some(&[255, 128]), &params(1.0));
        assert_eq!(&dst[..4], &[0, 0, 0, 0]);
        assert_eq!(&dst[4..7], &[10, 20, 30]);
        assert_eq!(dst[7], 127);
    }

    #[test]
    fn alpha_darken_caps_alpha_at_opacity() {
        let mut dst = [0, 0, 0, 0];
        for _ in 0..20 {
            alpha_darken_rgba8(&mut dst, &[0, 0, 255, 255], None, &params(0.5));
        }
        assert_eq!(dst, [0, 0, 255, 128]);
    }

    #[test]
    fn alpha_darken_zero_flow_accumulates() {
        let mut dst = [0, 0, 0, 0];
        let p = CompositeParams { opacity: 0.5, flow: 0.0 };
        alpha_darken_rgba8(&mut dst, &[0, 0, 255, 255], None, &p);
        assert_eq!(dst[3], 128);
        alpha_darken_rgba8(&mut dst, &[0, 0, 255, 255], None, &p);
        assert!(dst[3] > 128);
    }

    #[test]
    fn copy_lerps_by_weight() {
        let mut dst = [0, 0, 0, 0];
        copy_rgba8(&mut dst, &[255, 255, 255, 255], Some(&[51]), &params(1.0));
        assert_eq!(dst, [51, 51, 51, 51]);
        let mut gray = [0u8, 100];
        copy_gray8(&mut gray, &[200, 200], None, &params(1.0));
        assert_eq!(gray, [200, 200]);
    }

    #[test]
    fn f32_over_matches_straight_alpha_math() {
        let red: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
        let blue_half: [f32; 4] = [0.0, 0.0, 1.0, 0.5];
        let mut dst = bytemuck::bytes_of(&red).to_vec();
        over_rgba_f32(&mut dst, bytemuck::bytes_of(&blue_half), None, &params(1.0));
        let out = read_f32x4(&dst);
        assert_eq!(out, [0.5, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn table_covers_every_registered_pair_once() {
        let table = scalar_table();
        assert_eq!(table.len(), 14);
        let mut keys: Vec<_> = table.iter().map(|(op, fmt, _)| (*op, format!("{fmt}"))).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 14);
    }
}
