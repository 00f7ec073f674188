// ============================================================================
// COMPOSITE OPERATIONS – ids, parameters and the dispatched op handle
// ============================================================================

pub mod arch;
pub(crate) mod kernels;
mod registry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PaintError, PaintResult};
use crate::pixel::PixelFormat;

pub use arch::Arch;
pub use registry::CompositeOpRegistry;

/// Kernel signature: `dst` and `src` are runs of the same number of pixels,
/// `weights` (if any) holds one 0..=255 mask value per pixel.
pub type CompositeFn = fn(dst: &mut [u8], src: &[u8], weights: Option<&[u8]>, params: &CompositeParams);

/// Named composite operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CompositeOpId {
    #[serde(rename = "normal")]
    Over,
    #[serde(rename = "alphadarken")]
    AlphaDarken,
    #[serde(rename = "copy")]
    Copy,
    #[serde(rename = "erase")]
    Erase,
    #[serde(rename = "multiply")]
    Multiply,
    #[serde(rename = "screen")]
    Screen,
    #[serde(rename = "darken")]
    Darken,
    #[serde(rename = "lighten")]
    Lighten,
    #[serde(rename = "diff")]
    Difference,
    #[serde(rename = "add")]
    Additive,
}

impl CompositeOpId {
    pub const ALL: [CompositeOpId; 10] = [
        CompositeOpId::Over,
        CompositeOpId::AlphaDarken,
        CompositeOpId::Copy,
        CompositeOpId::Erase,
        CompositeOpId::Multiply,
        CompositeOpId::Screen,
        CompositeOpId::Darken,
        CompositeOpId::Lighten,
        CompositeOpId::Difference,
        CompositeOpId::Additive,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CompositeOpId::Over => "normal",
            CompositeOpId::AlphaDarken => "alphadarken",
            CompositeOpId::Copy => "copy",
            CompositeOpId::Erase => "erase",
            CompositeOpId::Multiply => "multiply",
            CompositeOpId::Screen => "screen",
            CompositeOpId::Darken => "darken",
            CompositeOpId::Lighten => "lighten",
            CompositeOpId::Difference => "diff",
            CompositeOpId::Additive => "add",
        }
    }
}

impl fmt::Display for CompositeOpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompositeOpId {
    type Err = PaintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| PaintError::unsupported_op(s, "any format"))
    }
}

/// Per-call composite parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompositeParams {
    /// 0.0..=1.0, multiplies source alpha.
    pub opacity: f32,
    /// 0.0..=1.0, only read by alpha-darken.
    pub flow: f32,
}

impl Default for CompositeParams {
    fn default() -> Self {
        Self { opacity: 1.0, flow: 1.0 }
    }
}

impl CompositeParams {
    pub fn with_opacity(opacity: f32) -> Self {
        Self { opacity, ..Self::default() }
    }
}

/// A resolved `(op, format, arch)` kernel. Cheap to copy.
#[derive(Clone, Copy, Debug)]
pub struct CompositeOp {
    id: CompositeOpId,
    format: PixelFormat,
    arch: Arch,
    func: CompositeFn,
}

impl CompositeOp {
    pub fn id(&self) -> CompositeOpId {
        self.id
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Composite `src` onto `dst` in place.
    /// Fails with `FormatMismatch` when the runs are not whole pixels of this
    /// op's format, differ in length, or the weight count is wrong.
    pub fn apply(
        &self,
        dst: &mut [u8],
        src: &[u8],
        weights: Option<&[u8]>,
        params: &CompositeParams,
    ) -> PaintResult<()> {
        let ps = self.format.pixel_size();
        if dst.len() % ps != 0 || src.len() != dst.len() {
            return Err(PaintError::format_mismatch(
                format!("{} bytes of {}", dst.len(), self.format),
                format!("{} source bytes", src.len()),
            ));
        }
        if let Some(w) = weights {
            if w.len() != dst.len() / ps {
                return Err(PaintError::format_mismatch(
                    format!("{} weights", dst.len() / ps),
                    format!("{} weights", w.len()),
                ));
            }
        }
        (self.func)(dst, src, weights, params);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_names() {
        for op in CompositeOpId::ALL {
            assert_eq!(op.name().parse::<CompositeOpId>().unwrap(), op);
        }
        assert!(matches!(
            "dissolve".parse::<CompositeOpId>(),
            Err(PaintError::UnsupportedCompositeOp { .. })
        ));
    }

    #[test]
    fn serde_uses_short_names() {
        let json = serde_json::to_string(&CompositeOpId::AlphaDarken).unwrap();
        assert_eq!(json, "\"alphadarken\"");
        let op: CompositeOpId = serde_json::from_str("\"diff\"").unwrap();
        assert_eq!(op, CompositeOpId::Difference);
    }

    #[test]
    fn apply_validates_run_lengths() {
        let op = CompositeOpRegistry::scalar().get(CompositeOpId::Over, PixelFormat::RGBA8).unwrap();
        let mut dst = [0u8; 8];
        let params = CompositeParams::default();
        assert!(op.apply(&mut dst, &[0u8; 4], None, &params).is_err());
        assert!(op.apply(&mut dst[..6], &[0u8; 6], None, &params).is_err());
        assert!(op.apply(&mut dst, &[0u8; 8], Some(&[255]), &params).is_err());
        assert!(op.apply(&mut dst, &[0u8; 8], Some(&[255, 255]), &params).is_ok());
    }
}
