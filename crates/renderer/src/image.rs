use geometry::{Extent, Px};

use crate::error::AtlasError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    RgbaU8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::RgbaU8 => 4,
        }
    }
}

/// A tightly packed image in CPU memory.
#[derive(Clone)]
pub struct PixelBuffer {
    bytes: Box<[u8]>,
    size: Extent<u32, Px>,
    format: PixelFormat,
}

impl PixelBuffer {
    /// Wraps `bytes` as an RGBA image of the given size.
    ///
    /// ## Errors
    ///
    /// Fails if `bytes` does not hold exactly `width * height` pixels.
    pub fn new(bytes: impl Into<Box<[u8]>>, size: Extent<u32, Px>) -> Result<Self, AtlasError> {
        let bytes = bytes.into();
        let format = PixelFormat::RgbaU8;
        let expected = byte_len(size, format);

        if bytes.len() != expected {
            return Err(AtlasError::PixelSizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            bytes,
            size,
            format,
        })
    }

    /// An image of the given size where every pixel is `rgba`.
    #[must_use]
    pub fn filled(size: Extent<u32, Px>, rgba: [u8; 4]) -> Self {
        let pixels = size.width as usize * size.height as usize;

        Self {
            bytes: rgba.repeat(pixels).into_boxed_slice(),
            size,
            format: PixelFormat::RgbaU8,
        }
    }

    /// Decodes a PNG image, converting it to 8-bit RGBA.
    pub fn from_png(encoded: &[u8]) -> Result<Self, AtlasError> {
        let mut decoder = png::Decoder::new(encoded);
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);

        let mut reader = decoder.read_info()?;
        let mut buffer = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buffer)?;
        buffer.truncate(info.buffer_size());

        if info.bit_depth != png::BitDepth::Eight {
            return Err(AtlasError::UnsupportedPng(format!(
                "bit depth {:?}",
                info.bit_depth
            )));
        }

        let rgba: Vec<u8> = match info.color_type {
            png::ColorType::Rgba => buffer,
            png::ColorType::Rgb => buffer
                .chunks_exact(3)
                .flat_map(|p| [p[0], p[1], p[2], u8::MAX])
                .collect(),
            png::ColorType::GrayscaleAlpha => buffer
                .chunks_exact(2)
                .flat_map(|p| [p[0], p[0], p[0], p[1]])
                .collect(),
            png::ColorType::Grayscale => buffer
                .iter()
                .flat_map(|&g| [g, g, g, u8::MAX])
                .collect(),
            other => {
                return Err(AtlasError::UnsupportedPng(format!(
                    "color type {other:?}"
                )))
            }
        };

        Self::new(rgba, Extent::new(info.width, info.height))
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn extent(&self) -> Extent<u32, Px> {
        self.size
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The pixel at `(x, y)`, or `None` if out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }

        let offset = (y as usize * self.size.width as usize + x as usize) * 4;
        let p = &self.bytes[offset..offset + 4];
        Some([p[0], p[1], p[2], p[3]])
    }

    pub fn rows(&self) -> RowIter {
        let row_pitch = self.size.width as usize * self.format.bytes_per_pixel() as usize;

        RowIter {
            row_pitch,
            cursor: 0,
            bytes: self.bytes.as_ref(),
        }
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("size", &self.size)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

fn byte_len(size: Extent<u32, Px>, format: PixelFormat) -> usize {
    size.width as usize * size.height as usize * format.bytes_per_pixel() as usize
}

pub struct RowIter<'a> {
    row_pitch: usize,
    cursor: usize,
    bytes: &'a [u8],
}

impl<'a> Iterator for RowIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.row_pitch == 0 || self.cursor >= self.bytes.len() {
            return None;
        }

        let row = &self.bytes[self.cursor..self.cursor + self.row_pitch];
        self.cursor += self.row_pitch;
        Some(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(width: u32, height: u32, color: png::ColorType, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(color);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(data).unwrap();
        }
        out
    }

    #[test]
    fn rejects_wrong_length() {
        let err = PixelBuffer::new(vec![0u8; 15], Extent::new(2, 2)).unwrap_err();
        assert!(matches!(
            err,
            AtlasError::PixelSizeMismatch {
                expected: 16,
                actual: 15
            }
        ));
    }

    #[test]
    fn rows_split_by_width() {
        let buffer = PixelBuffer::filled(Extent::new(3, 2), [1, 2, 3, 4]);
        let rows: Vec<_> = buffer.rows().collect();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.len() == 12));
    }

    #[test]
    fn decodes_rgb_png_as_rgba() {
        let png = encode(2, 1, png::ColorType::Rgb, &[255, 0, 0, 0, 0, 255]);
        let buffer = PixelBuffer::from_png(&png).unwrap();

        assert_eq!(buffer.extent(), Extent::new(2, 1));
        assert_eq!(buffer.pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(buffer.pixel(1, 0), Some([0, 0, 255, 255]));
        assert_eq!(buffer.pixel(2, 0), None);
    }

    #[test]
    fn decodes_gray_alpha_png() {
        let png = encode(1, 1, png::ColorType::GrayscaleAlpha, &[100, 50]);
        let buffer = PixelBuffer::from_png(&png).unwrap();

        assert_eq!(buffer.pixel(0, 0), Some([100, 100, 100, 50]));
    }

    #[test]
    fn garbage_is_a_decoding_error() {
        let err = PixelBuffer::from_png(b"definitely not a png").unwrap_err();
        assert!(matches!(err, AtlasError::PngDecoding(_)));
    }
}
