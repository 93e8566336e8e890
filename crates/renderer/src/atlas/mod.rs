//! Texture atlases and the protocol that keeps every backend's copy of them
//! current.
//!
//! An atlas is a CPU-side RGBA image plus a content version. Whenever the
//! content changes, every backend with a registered upload callback is told
//! the new version; the upload itself runs lazily on a render thread of that
//! backend, the next time the thread sweeps or draws from the atlas.

mod manager;
mod registrar;
mod upload;

use std::{io::Write, sync::Arc};

use geometry::{Extent, Point, Px, Rect, UvRect};
use structures::Handle;

use crate::{error::AtlasError, image::PixelBuffer};

pub use manager::AtlasManager;
pub use registrar::AtlasRegistrar;
pub use upload::UploadFn;

/// Largest accepted atlas dimension.
pub const MAX_ATLAS_SIZE: u32 = 16384;

/// Identifies an atlas for the lifetime of its manager. Indices are handed
/// out in increasing order and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtlasIndex(u32);

impl AtlasIndex {
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Parameters for a new atlas.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AtlasConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Empty texels kept around every sprite so that filtering never bleeds
    /// neighbours into each other.
    pub padding: u32,
}

impl AtlasConfig {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            padding: 1,
        }
    }

    #[must_use]
    pub fn with_padding(mut self, padding: u32) -> Self {
        self.padding = padding;
        self
    }
}

/// The authoritative pixels of an atlas.
///
/// Every mutating method bumps [`version`](Self::version), which is what
/// backends compare against to decide whether their copy is stale.
pub struct TextureAtlas {
    index: AtlasIndex,
    name: String,
    extent: Extent<u32, Px>,
    pixels: Box<[u8]>,
    version: u64,
}

impl TextureAtlas {
    fn new(index: AtlasIndex, name: String, extent: Extent<u32, Px>) -> Self {
        let len = extent.width as usize * extent.height as usize * 4;

        Self {
            index,
            name,
            extent,
            pixels: vec![0; len].into_boxed_slice(),
            version: 1,
        }
    }

    pub fn index(&self) -> AtlasIndex {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extent(&self) -> Extent<u32, Px> {
        self.extent
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Tightly packed RGBA rows, top to bottom.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// The pixel at `(x, y)`, or `None` if out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.extent.width || y >= self.extent.height {
            return None;
        }

        let offset = self.offset(x, y);
        let p = &self.pixels[offset..offset + 4];
        Some([p[0], p[1], p[2], p[3]])
    }

    /// Copies `image` into the atlas with its top-left corner at `at`.
    pub fn write_region(&mut self, at: Point<u32, Px>, image: &PixelBuffer) -> Result<(), AtlasError> {
        let region = Rect::new(at, image.extent());
        self.check_bounds(region)?;

        let row_bytes = image.width() as usize * 4;
        for (y, row) in (at.y..).zip(image.rows()) {
            let offset = self.offset(at.x, y);
            self.pixels[offset..offset + row_bytes].copy_from_slice(row);
        }

        self.version += 1;
        Ok(())
    }

    /// Sets every pixel in `region` to `rgba`.
    pub fn fill_region(&mut self, region: Rect<u32, Px>, rgba: [u8; 4]) -> Result<(), AtlasError> {
        self.check_bounds(region)?;

        for y in region.top()..region.bottom() {
            let start = self.offset(region.left(), y);
            let end = self.offset(region.right(), y);
            for pixel in self.pixels[start..end].chunks_exact_mut(4) {
                pixel.copy_from_slice(&rgba);
            }
        }

        self.version += 1;
        Ok(())
    }

    pub fn clear(&mut self, rgba: [u8; 4]) {
        for pixel in self.pixels.chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
        self.version += 1;
    }

    /// Writes the atlas as an RGBA PNG, for debugging.
    pub fn encode_png<W: Write>(&self, writer: W) -> Result<(), AtlasError> {
        let mut encoder = png::Encoder::new(writer, self.extent.width, self.extent.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);

        let mut writer = encoder.write_header()?;
        writer.write_image_data(&self.pixels)?;
        writer.finish()?;
        Ok(())
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.extent.width as usize + x as usize) * 4
    }

    fn check_bounds(&self, region: Rect<u32, Px>) -> Result<(), AtlasError> {
        if region.right() > self.extent.width || region.bottom() > self.extent.height {
            let extent = region.extent();
            return Err(AtlasError::RegionTooLarge {
                atlas: self.index,
                width: extent.width,
                height: extent.height,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for TextureAtlas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureAtlas")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("extent", &self.extent)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Where a sprite lives.
#[derive(Clone, Debug, PartialEq)]
pub struct SpriteInfo {
    pub name: Arc<str>,
    pub atlas: AtlasIndex,
    /// The sprite's number within its atlas.
    pub local: u32,
    /// Texel region inside the atlas, padding excluded.
    pub region: Rect<u32, Px>,
    pub uv: UvRect,
}

/// A handle to a sprite. It stops resolving once the sprite is removed, even
/// if a new sprite later takes its place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpriteHandle {
    slot: Handle<SpriteInfo>,
    atlas: AtlasIndex,
    local: u32,
}

impl SpriteHandle {
    pub fn atlas(&self) -> AtlasIndex {
        self.atlas
    }

    pub fn local(&self) -> u32 {
        self.local
    }

    pub fn generation(&self) -> u32 {
        self.slot.generation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atlas(width: u32, height: u32) -> TextureAtlas {
        TextureAtlas::new(AtlasIndex(0), "test".into(), Extent::new(width, height))
    }

    #[test]
    fn new_atlas_is_transparent_at_version_one() {
        let atlas = atlas(4, 4);
        assert_eq!(atlas.version(), 1);
        assert_eq!(atlas.pixels().len(), 64);
        assert_eq!(atlas.pixel(3, 3), Some([0; 4]));
        assert_eq!(atlas.pixel(4, 0), None);
    }

    #[test]
    fn write_region_copies_rows() {
        let mut atlas = atlas(4, 4);
        let image = PixelBuffer::filled(Extent::new(2, 2), [9, 8, 7, 6]);

        atlas.write_region(Point::new(1, 2), &image).unwrap();

        assert_eq!(atlas.version(), 2);
        assert_eq!(atlas.pixel(1, 2), Some([9, 8, 7, 6]));
        assert_eq!(atlas.pixel(2, 3), Some([9, 8, 7, 6]));
        assert_eq!(atlas.pixel(0, 2), Some([0; 4]));
        assert_eq!(atlas.pixel(3, 2), Some([0; 4]));
        assert_eq!(atlas.pixel(1, 1), Some([0; 4]));
    }

    #[test]
    fn out_of_bounds_write_is_rejected_without_bump() {
        let mut atlas = atlas(4, 4);
        let image = PixelBuffer::filled(Extent::new(2, 2), [1; 4]);

        assert!(matches!(
            atlas.write_region(Point::new(3, 0), &image),
            Err(AtlasError::RegionTooLarge { .. })
        ));
        assert_eq!(atlas.version(), 1);
    }

    #[test]
    fn fill_and_clear_bump_version() {
        let mut atlas = atlas(4, 4);
        atlas
            .fill_region(Rect::new(Point::new(0, 0), Extent::new(2, 1)), [255; 4])
            .unwrap();
        assert_eq!(atlas.pixel(1, 0), Some([255; 4]));
        assert_eq!(atlas.pixel(0, 1), Some([0; 4]));

        atlas.clear([1, 2, 3, 4]);
        assert_eq!(atlas.version(), 3);
        assert_eq!(atlas.pixel(1, 0), Some([1, 2, 3, 4]));
    }

    #[test]
    fn encoded_png_decodes_to_same_pixels() {
        let mut atlas = atlas(3, 2);
        atlas
            .fill_region(Rect::new(Point::new(1, 1), Extent::new(1, 1)), [10, 20, 30, 40])
            .unwrap();

        let mut encoded = Vec::new();
        atlas.encode_png(&mut encoded).unwrap();

        let decoded = PixelBuffer::from_png(&encoded).unwrap();
        assert_eq!(decoded.extent(), atlas.extent());
        assert_eq!(decoded.bytes(), atlas.pixels());
    }
}
