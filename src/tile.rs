// ============================================================================
// TILE – fixed 64×64 block of pixel storage
// ============================================================================

pub const TILE_SIZE: u32 = 64;

const TILE_PIXELS: usize = (TILE_SIZE * TILE_SIZE) as usize;

/// One complete tile. The byte block is always `TILE_SIZE² × pixel_size`
/// long; there are no partial tiles, even at the right/bottom device edge.
///
/// Devices hold tiles behind `Arc` so that forks and snapshots share them;
/// writers go through `Arc::make_mut`, which copies a shared tile once.
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    data: Box<[u8]>,
    pixel_size: usize,
}

impl Tile {
    /// A tile with every pixel set to `pixel`.
    pub fn filled(pixel: &[u8]) -> Self {
        Self {
            data: pixel.repeat(TILE_PIXELS).into_boxed_slice(),
            pixel_size: pixel.len(),
        }
    }

    /// Wrap an existing full block. Returns `None` if the length is not a
    /// whole tile of `pixel_size`-byte pixels.
    pub fn from_raw(data: Vec<u8>, pixel_size: usize) -> Option<Self> {
        if pixel_size == 0 || data.len() != TILE_PIXELS * pixel_size {
            return None;
        }
        Some(Self { data: data.into_boxed_slice(), pixel_size })
    }

    #[inline]
    pub fn pixel_size(&self) -> usize {
        self.pixel_size
    }

    #[inline]
    fn offset(&self, lx: u32, ly: u32) -> usize {
        (ly as usize * TILE_SIZE as usize + lx as usize) * self.pixel_size
    }

    #[inline]
    pub fn pixel(&self, lx: u32, ly: u32) -> &[u8] {
        let off = self.offset(lx, ly);
        &self.data[off..off + self.pixel_size]
    }

    #[inline]
    pub fn pixel_mut(&mut self, lx: u32, ly: u32) -> &mut [u8] {
        let off = self.offset(lx, ly);
        let ps = self.pixel_size;
        &mut self.data[off..off + ps]
    }

    /// `len` pixels of row `ly` starting at column `lx`.
    #[inline]
    pub fn span(&self, lx: u32, ly: u32, len: usize) -> &[u8] {
        let off = self.offset(lx, ly);
        &self.data[off..off + len * self.pixel_size]
    }

    #[inline]
    pub fn span_mut(&mut self, lx: u32, ly: u32, len: usize) -> &mut [u8] {
        let off = self.offset(lx, ly);
        let end = off + len * self.pixel_size;
        &mut self.data[off..end]
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// True if every pixel equals `pixel`.
    pub fn is_uniform(&self, pixel: &[u8]) -> bool {
        pixel.len() == self.pixel_size && self.data.chunks_exact(self.pixel_size).all(|p| p == pixel)
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }
}
