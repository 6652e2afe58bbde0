//! RGBA preview image.

/// Row-major RGBA preview of one buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugImage {
    width: u32,
    height: u32,
    pixels: Vec<[u8; 4]>,
}

impl DebugImage {
    /// Build an image by evaluating `pixel(x, y)` for every position.
    pub fn from_fn(width: u32, height: u32, mut pixel: impl FnMut(u32, u32) -> [u8; 4]) -> Self {
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| pixel(x, y))
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    /// RGBA at `(x, y)`, or `None` outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    /// Returns `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of distinct RGB values, alpha ignored.
    pub fn distinct_colors(&self) -> usize {
        self.pixels
            .iter()
            .map(|[r, g, b, _]| (*r, *g, *b))
            .collect::<hashbrown::HashSet<_>>()
            .len()
    }

    /// Encode as an 8-bit RGBA PNG.
    ///
    /// # Errors
    ///
    /// Returns the encoder error if the header or data cannot be written.
    pub fn encode_png(&self) -> Result<Vec<u8>, png::EncodingError> {
        let mut buffer = Vec::new();
        {
            let mut encoder =
                png::Encoder::new(std::io::Cursor::new(&mut buffer), self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(self.pixels.as_flattened())?;
        }
        Ok(buffer)
    }
}
