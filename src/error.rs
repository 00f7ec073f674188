use crate::geometry::Rect;

pub type PaintResult<T> = Result<T, PaintError>;

/// Errors surfaced by the raster core.
///
/// `OutOfBounds` and `FormatMismatch` are caller errors and are never retried.
/// `DeviceLocked` is transient: the caller may retry once the exclusive stroke
/// holding the device has finished.
#[derive(thiserror::Error, Debug)]
pub enum PaintError {
    #[error("out of bounds: {rect:?} is not inside {bounds:?}")]
    OutOfBounds { rect: Rect, bounds: Rect },

    #[error("format mismatch: expected {expected}, found {found}")]
    FormatMismatch { expected: String, found: String },

    #[error("unsupported composite op '{op}' for {format}")]
    UnsupportedCompositeOp { op: String, format: String },

    #[error("device {0} is locked by an exclusive stroke")]
    DeviceLocked(u64),

    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("unknown stroke {0}")]
    UnknownStroke(String),

    #[error("stroke {0} no longer accepts jobs")]
    StrokeClosed(String),

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid file: {0}")]
    InvalidFile(String),
}

impl PaintError {
    pub fn out_of_bounds(rect: Rect, bounds: Rect) -> Self {
        Self::OutOfBounds { rect, bounds }
    }

    pub fn format_mismatch(expected: impl ToString, found: impl ToString) -> Self {
        Self::FormatMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub fn unsupported_op(op: impl ToString, format: impl ToString) -> Self {
        Self::UnsupportedCompositeOp {
            op: op.to_string(),
            format: format.to_string(),
        }
    }

    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    /// Whether the caller may retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DeviceLocked(_))
    }
}

impl From<Box<bincode::ErrorKind>> for PaintError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        PaintError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for PaintError {
    fn from(e: serde_json::Error) -> Self {
        PaintError::Serialization(e.to_string())
    }
}
