use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::device::{DeviceSnapshot, PaintDevice};
use crate::error::{PaintError, PaintResult};
use crate::pixel::PixelFormat;
use crate::tile::{TILE_SIZE, Tile};

// ============================================================================
// TPD SNAPSHOT FILE FORMAT
// ============================================================================

/// Magic header for the sparse tiled snapshot format
const TPD_MAGIC: &str = "TPD1";

/// Maximum supported device dimension in pixels (per axis).
/// Prevents memory exhaustion from crafted snapshot files.
const MAX_DEVICE_DIM: u32 = 32_768;

/// Serializable snapshot file: only allocated tiles are stored.
#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    magic: String,
    width: u32,
    height: u32,
    format: PixelFormat,
    default_pixel: Vec<u8>,
    tiles: Vec<TileData>,
}

/// One stored tile (64×64 pixels in row-major order).
#[derive(Serialize, Deserialize)]
struct TileData {
    tx: u32,
    ty: u32,
    pixels: Vec<u8>,
}

/// Write a snapshot as a `.tpd` file.
pub fn save_snapshot(snapshot: &DeviceSnapshot, path: &Path) -> PaintResult<()> {
    let file = SnapshotFile {
        magic: TPD_MAGIC.to_string(),
        width: snapshot.width(),
        height: snapshot.height(),
        format: snapshot.format(),
        default_pixel: snapshot.default_pixel().to_vec(),
        tiles: snapshot
            .tiles()
            .map(|(tx, ty, tile)| TileData { tx, ty, pixels: tile.data().to_vec() })
            .collect(),
    };
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, &file)?;
    log::debug!("saved snapshot {} ({} tiles)", path.display(), file.tiles.len());
    Ok(())
}

/// Read a `.tpd` file back into a snapshot.
pub fn load_snapshot(path: &Path) -> PaintResult<DeviceSnapshot> {
    let raw = std::fs::read(path)?;
    if raw.len() < 12 {
        return Err(PaintError::InvalidFile("file too small".into()));
    }
    // bincode encodes a String as an 8-byte length prefix + UTF-8 data,
    // so bytes 8..12 hold the magic.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != TPD_MAGIC {
        return Err(PaintError::InvalidFile(format!("unknown magic '{}'", magic)));
    }

    let file: SnapshotFile = bincode::deserialize(&raw)?;
    if file.width > MAX_DEVICE_DIM || file.height > MAX_DEVICE_DIM {
        return Err(PaintError::InvalidFile(format!(
            "device size {}x{} exceeds maximum allowed {}x{}",
            file.width, file.height, MAX_DEVICE_DIM, MAX_DEVICE_DIM
        )));
    }

    let pixel_size = file.format.pixel_size();
    let expected = (TILE_SIZE * TILE_SIZE) as usize * pixel_size;
    let mut tiles = Vec::with_capacity(file.tiles.len());
    for td in file.tiles {
        if td.pixels.len() != expected {
            return Err(PaintError::InvalidFile(format!(
                "tile ({},{}) has {} bytes, expected {}",
                td.tx,
                td.ty,
                td.pixels.len(),
                expected
            )));
        }
        let tile = Tile::from_raw(td.pixels, pixel_size)
            .ok_or_else(|| PaintError::InvalidFile(format!("failed to rebuild tile ({},{})", td.tx, td.ty)))?;
        tiles.push((td.tx, td.ty, tile));
    }
    DeviceSnapshot::from_tiles(file.width, file.height, file.format, file.default_pixel, tiles)
}

/// Flatten an RGBA8 device to a PNG file.
pub fn export_png(device: &PaintDevice, path: &Path) -> PaintResult<()> {
    device.to_rgba_image()?.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Decode an image file into a sparse RGBA8 device. Fully transparent tiles
/// stay unallocated.
pub fn import_image(path: &Path) -> PaintResult<PaintDevice> {
    let img = image::open(path)?.to_rgba8();
    let device = PaintDevice::from_rgba_image(&img)?;
    log::debug!(
        "imported {} as {}x{} ({} tiles allocated)",
        path.display(),
        device.width(),
        device.height(),
        device.tile_count()
    );
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    fn temp_path(ext: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tilepaint-io-{}.{}", uuid::Uuid::new_v4(), ext))
    }

    #[test]
    fn snapshot_file_keeps_sparse_tiles() {
        let dev = PaintDevice::new(200, 100, PixelFormat::RGBA8).unwrap();
        dev.fill(Rect::new(130, 70, 5, 5), &[1, 2, 3, 4]).unwrap();
        let path = temp_path("tpd");
        save_snapshot(&dev.snapshot(), &path).unwrap();
        let snap = load_snapshot(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!((snap.width(), snap.height()), (200, 100));
        assert_eq!(snap.tile_count(), 1);
        assert_eq!(snap.pixel(132, 72), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(snap.pixel(0, 0), Some(&[0u8, 0, 0, 0][..]));
    }

    #[test]
    fn foreign_files_are_rejected() {
        let path = temp_path("tpd");
        std::fs::write(&path, b"\x04\0\0\0\0\0\0\0PFE1 and then some").unwrap();
        let err = load_snapshot(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, PaintError::InvalidFile(_)));
    }

    #[test]
    fn png_export_and_import() {
        let dev = PaintDevice::new(70, 10, PixelFormat::RGBA8).unwrap();
        dev.fill(Rect::new(66, 0, 4, 4), &[10, 20, 30, 255]).unwrap();
        let path = temp_path("png");
        export_png(&dev, &path).unwrap();
        let back = import_image(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!((back.width(), back.height()), (70, 10));
        assert_eq!(back.tile_count(), 1);
        assert_eq!(back.pixel(67, 1).unwrap(), vec![10, 20, 30, 255]);
    }
}
