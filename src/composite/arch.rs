use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PaintError;

/// Instruction-set variant a composite kernel was compiled for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Scalar,
    Neon,
    Sse2,
    Sse41,
    Avx2,
}

impl Arch {
    /// Best first. `Scalar` is always last and always supported.
    pub const PRIORITY: [Arch; 5] = [Arch::Avx2, Arch::Sse41, Arch::Sse2, Arch::Neon, Arch::Scalar];

    pub fn name(self) -> &'static str {
        match self {
            Arch::Scalar => "scalar",
            Arch::Neon => "neon",
            Arch::Sse2 => "sse2",
            Arch::Sse41 => "sse4.1",
            Arch::Avx2 => "avx2",
        }
    }

    /// Runtime check against the running CPU.
    pub fn is_supported(self) -> bool {
        match self {
            Arch::Scalar => true,
            Arch::Neon => neon(),
            Arch::Sse2 => sse2(),
            Arch::Sse41 => sse41(),
            Arch::Avx2 => avx2(),
        }
    }

    /// First supported variant in priority order.
    pub fn detect() -> Arch {
        Self::PRIORITY
            .into_iter()
            .find(|a| a.is_supported())
            .unwrap_or(Arch::Scalar)
    }

    pub fn supported() -> Vec<Arch> {
        Self::PRIORITY.into_iter().filter(|a| a.is_supported()).collect()
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Arch {
    type Err = PaintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scalar" => Ok(Arch::Scalar),
            "neon" => Ok(Arch::Neon),
            "sse2" => Ok(Arch::Sse2),
            "sse4.1" | "sse41" => Ok(Arch::Sse41),
            "avx2" => Ok(Arch::Avx2),
            other => Err(PaintError::InvalidFile(format!("unknown composite arch '{other}'"))),
        }
    }
}

#[inline(always)]
fn avx2() -> bool {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    return std::arch::is_x86_feature_detected!("avx2");
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    return false;
}

#[inline(always)]
fn sse41() -> bool {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    return std::arch::is_x86_feature_detected!("sse4.1");
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    return false;
}

#[inline(always)]
fn sse2() -> bool {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    return std::arch::is_x86_feature_detected!("sse2");
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    return false;
}

#[inline(always)]
fn neon() -> bool {
    #[cfg(target_arch = "aarch64")]
    return std::arch::is_aarch64_feature_detected!("neon");
    #[cfg(not(target_arch = "aarch64"))]
    return false;
}

/// Names of the SIMD features the running CPU reports, for diagnostics.
pub fn cpu_features() -> Vec<&'static str> {
    let mut out = Vec::new();
    for (name, present) in [
        ("sse2", sse2()),
        ("sse4.1", sse41()),
        ("avx2", avx2()),
        ("neon", neon()),
    ] {
        if present {
            out.push(name);
        }
    }
    out
}
