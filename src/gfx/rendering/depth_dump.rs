//! Debug dumps of captured shadow depth buffers
//!
//! When `DebugFlags::DUMP_TEXTURES` is set, every `end_capture` reads the
//! depth buffer back, stretches it to [0,1] so the nearest sample is black and
//! the farthest is white, and writes it as a single channel float TIFF.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tiff::encoder::{colortype, TiffEncoder};

use crate::error::{ShadowError, ShadowResult};

/// Depth pixels ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImage {
    pub width: u32,
    pub height: u32,
    /// Row-major, bottom row first when `flipped` is set
    pub pixels: Vec<f32>,
    pub flipped: bool,
}

/// Sink for debug depth images
pub trait ImageWriter: Send {
    fn write(&self, path: &Path, image: &DepthImage) -> ShadowResult<()>;
}

/// Writes `Gray32Float` TIFF files
#[derive(Debug, Default, Clone, Copy)]
pub struct TiffImageWriter;

impl ImageWriter for TiffImageWriter {
    fn write(&self, path: &Path, image: &DepthImage) -> ShadowResult<()> {
        let expected = image.width as usize * image.height as usize;
        if image.pixels.len() != expected {
            return Err(ShadowError::readback(format!(
                "depth image has {} pixels, expected {}x{}",
                image.pixels.len(),
                image.width,
                image.height
            )));
        }

        let rows: Vec<f32> = if image.flipped {
            flip_rows(&image.pixels, image.width as usize)
        } else {
            image.pixels.clone()
        };

        let file = File::create(path)?;
        let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
        encoder.write_image::<colortype::Gray32Float>(image.width, image.height, &rows)?;
        Ok(())
    }
}

/// Path of the dump for one shadow slot
pub fn dump_path(dir: &Path, slot: usize) -> PathBuf {
    dir.join(format!("ShadowMapArray.index_{}.tif", slot))
}

/// Remaps depth values in place so min becomes 0.0 and max becomes 1.0.
/// A flat buffer maps to 0.0.
pub fn normalize_depth(pixels: &mut [f32]) {
    if pixels.is_empty() {
        return;
    }

    let (min, max) = pixels
        .iter()
        .fold((f32::MAX, -f32::MAX), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;

    if range > 0.0 {
        for value in pixels.iter_mut() {
            *value = (*value - min) / range;
        }
    } else {
        pixels.fill(0.0);
    }
}

fn flip_rows(pixels: &[f32], width: usize) -> Vec<f32> {
    if width == 0 {
        return Vec::new();
    }
    pixels
        .chunks_exact(width)
        .rev()
        .flatten()
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_known_range() {
        let mut pixels = vec![0.2, 0.5, 0.8, 0.35];
        normalize_depth(&mut pixels);
        assert_eq!(pixels[0], 0.0);
        assert_eq!(pixels[2], 1.0);
        assert!((pixels[1] - 0.5).abs() < 1e-6);
        assert!((pixels[3] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_flat_buffer() {
        let mut pixels = vec![0.7; 6];
        normalize_depth(&mut pixels);
        assert!(pixels.iter().all(|&p| p == 0.0));

        let mut empty: Vec<f32> = Vec::new();
        normalize_depth(&mut empty);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_flip_rows() {
        let pixels = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(flip_rows(&pixels, 2), vec![5.0, 6.0, 3.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn test_dump_path_naming() {
        let path = dump_path(Path::new("/tmp"), 3);
        assert_eq!(path, PathBuf::from("/tmp/ShadowMapArray.index_3.tif"));
    }

    #[test]
    fn test_tiff_writer_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dump_path(dir.path(), 0);
        let image = DepthImage {
            width: 2,
            height: 2,
            pixels: vec![0.0, 0.25, 0.5, 1.0],
            flipped: true,
        };
        TiffImageWriter.write(&path, &image).unwrap();
        let written = std::fs::metadata(&path).unwrap();
        assert!(written.len() > 16);
    }

    #[test]
    fn test_tiff_writer_rejects_short_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let image = DepthImage {
            width: 4,
            height: 4,
            pixels: vec![0.0; 3],
            flipped: false,
        };
        assert!(TiffImageWriter.write(&dump_path(dir.path(), 1), &image).is_err());
    }

    #[test]
    fn test_tiff_writer_reports_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("x.tif");
        let image = DepthImage {
            width: 1,
            height: 1,
            pixels: vec![0.5],
            flipped: false,
        };
        assert!(matches!(
            TiffImageWriter.write(&path, &image),
            Err(ShadowError::Io(_))
        ));
    }
}
