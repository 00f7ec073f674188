use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use super::arch::{Arch, cpu_features};
use super::kernels::{self, KernelTable};
use super::{CompositeFn, CompositeOp, CompositeOpId};
use crate::error::{PaintError, PaintResult};
use crate::pixel::PixelFormat;

static GLOBAL: OnceLock<Arc<CompositeOpRegistry>> = OnceLock::new();

/// Immutable `(op, format) -> kernel` table for one instruction-set variant.
#[derive(Debug)]
pub struct CompositeOpRegistry {
    arch: Arch,
    ops: HashMap<(CompositeOpId, PixelFormat), CompositeFn>,
}

impl CompositeOpRegistry {
    /// Process-wide registry for the best arch the CPU supports. Built on
    /// first use, never modified afterwards.
    pub fn global() -> Arc<Self> {
        GLOBAL
            .get_or_init(|| {
                let arch = Arch::detect();
                log::debug!(
                    "composite dispatch: cpu features [{}], selected {}",
                    cpu_features().join(", "),
                    arch
                );
                Arc::new(Self::build(arch))
            })
            .clone()
    }

    /// Registry for a specific arch, or `None` if the CPU lacks it.
    pub fn for_arch(arch: Arch) -> Option<Self> {
        arch.is_supported().then(|| Self::build(arch))
    }

    /// Scalar reference registry.
    pub fn scalar() -> Self {
        Self::build(Arch::Scalar)
    }

    fn build(arch: Arch) -> Self {
        let ops = table_for(arch)
            .into_iter()
            .map(|(op, format, func)| ((op, format), func))
            .collect();
        Self { arch, ops }
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Resolve an op for a pixel format.
    pub fn get(&self, id: CompositeOpId, format: PixelFormat) -> PaintResult<CompositeOp> {
        self.ops
            .get(&(id, format))
            .map(|&func| CompositeOp { id, format, arch: self.arch, func })
            .ok_or_else(|| PaintError::unsupported_op(id, format))
    }

    pub fn supports(&self, id: CompositeOpId, format: PixelFormat) -> bool {
        self.ops.contains_key(&(id, format))
    }

    /// Registered `(op, format)` pairs, sorted by op name then format.
    pub fn entries(&self) -> Vec<(CompositeOpId, PixelFormat)> {
        let mut out: Vec<_> = self.ops.keys().copied().collect();
        out.sort_by_key(|(op, format)| (*op, format.to_string()));
        out
    }
}

fn table_for(arch: Arch) -> KernelTable {
    match arch {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        Arch::Avx2 => kernels::avx2::table(),
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        Arch::Sse41 => kernels::sse41::table(),
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        Arch::Sse2 => kernels::sse2::table(),
        #[cfg(target_arch = "aarch64")]
        Arch::Neon => kernels::neon::table(),
        _ => kernels::scalar_table(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_is_initialized_once() {
        let a = CompositeOpRegistry::global();
        let b = CompositeOpRegistry::global();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.arch(), Arch::detect());
    }

    #[test]
    fn unsupported_pairs_are_rejected() {
        let reg = CompositeOpRegistry::scalar();
        assert!(reg.supports(CompositeOpId::Over, PixelFormat::RGBA8));
        assert!(reg.supports(CompositeOpId::Copy, PixelFormat::ALPHA8));
        assert!(matches!(
            reg.get(CompositeOpId::Multiply, PixelFormat::RGBA_F32),
            Err(PaintError::UnsupportedCompositeOp { .. })
        ));
        assert!(reg.get(CompositeOpId::Over, PixelFormat::RGBA16).is_err());
        assert!(reg.get(CompositeOpId::Over, PixelFormat::GRAY8).is_err());
    }

    #[test]
    fn for_arch_refuses_missing_features() {
        for arch in Arch::PRIORITY {
            assert_eq!(CompositeOpRegistry::for_arch(arch).is_some(), arch.is_supported());
        }
    }

    #[test]
    fn every_arch_registers_the_same_entries() {
        let reference = CompositeOpRegistry::scalar().entries();
        for arch in Arch::supported() {
            let reg = CompositeOpRegistry::for_arch(arch).unwrap();
            assert_eq!(reg.entries(), reference, "{arch}");
        }
    }
}
