//! Error types for shadow map management
//!
//! Failures inside the capture pipeline never cross the public API: they are
//! logged and the operation degrades. `ShadowError` is what backends and the
//! debug image writer hand back to the array so it has something to log.

use std::path::PathBuf;

/// Errors reported by render contexts, readback and debug image output
#[derive(thiserror::Error, Debug)]
pub enum ShadowError {
    #[error("{what} index {index} is out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("{0} has not been allocated")]
    NotAllocated(&'static str),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Readback error: {0}")]
    Readback(String),

    #[error("failed to write shadow texture {path}: {source}")]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: Box<ShadowError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),
}

impl ShadowError {
    pub fn device<T: ToString>(msg: T) -> Self {
        ShadowError::Device(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        ShadowError::Readback(msg.to_string())
    }
}

/// Result type alias for shadow map operations
pub type ShadowResult<T> = Result<T, ShadowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_error_message() {
        let err = ShadowError::IndexOutOfRange {
            what: "view matrix",
            index: 3,
            len: 2,
        };
        assert_eq!(err.to_string(), "view matrix index 3 is out of range (len 2)");
    }

    #[test]
    fn test_not_allocated_message() {
        let err = ShadowError::NotAllocated("Shadow framebuffer");
        assert_eq!(err.to_string(), "Shadow framebuffer has not been allocated");
    }

    #[test]
    fn test_image_write_wraps_source() {
        let err = ShadowError::ImageWrite {
            path: PathBuf::from("/tmp/x.tif"),
            source: Box::new(ShadowError::readback("short buffer")),
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/x.tif"));
        assert!(msg.contains("short buffer"));
    }
}
