//! Renderers for height and weight buffers.

use super::image::DebugImage;
use crate::height_data::HeightData;

/// Map a normalized height `[0, 1]` to an RGB color.
///
/// Values below `sea_level` are shaded as water, the rest run from lowland
/// green through brown to white peaks.
pub fn height_to_color(normalized: f32, sea_level: f32) -> [u8; 3] {
    let n = normalized.clamp(0.0, 1.0);
    if n < sea_level * 0.5 {
        // Deep water
        [0, 0, 128]
    } else if n < sea_level {
        [30, 80, 200]
    } else if n < sea_level + 0.02 {
        // Shore
        [220, 200, 130]
    } else if n < 0.55 {
        let t = ((n - sea_level) / (0.55 - sea_level)).clamp(0.0, 1.0);
        [
            (30.0 + t * 80.0) as u8,
            (160.0 - t * 40.0) as u8,
            (30.0 + t * 20.0) as u8,
        ]
    } else if n < 0.75 {
        let t = (n - 0.55) / 0.2;
        [
            (110.0 + t * 40.0) as u8,
            (120.0 - t * 50.0) as u8,
            (50.0 + t * 20.0) as u8,
        ]
    } else {
        let base = (150.0 + ((n - 0.75) / 0.25).min(1.0) * 105.0) as u8;
        [base, base, base]
    }
}

/// Palette entry for weight layer `index`.
pub fn layer_color(index: usize) -> [u8; 3] {
    const PALETTE: [[u8; 3]; 8] = [
        [230, 25, 75],
        [60, 180, 75],
        [255, 225, 25],
        [0, 130, 200],
        [245, 130, 48],
        [145, 30, 180],
        [70, 240, 240],
        [240, 50, 230],
    ];
    PALETTE[index % PALETTE.len()]
}

/// Color every sample of `data` by its position in the declared range.
///
/// Waits for the buffer to be written.
pub fn render_height(data: &HeightData, sea_level: f32) -> DebugImage {
    let resolution = data.resolution();
    let samples = data.samples();
    DebugImage::from_fn(resolution, resolution, |x, y| {
        let value = samples[(y * resolution + x) as usize];
        let [r, g, b] = height_to_color(data.range.normalize(value), sea_level);
        [r, g, b, 255]
    })
}

/// Blend the palette colors of a weight list by their per-sample weights.
///
/// Every layer is read at `resolution`. Waits for the buffers.
pub fn render_weights(layers: &[HeightData], resolution: u32) -> DebugImage {
    for layer in layers {
        layer.wait();
    }
    DebugImage::from_fn(resolution, resolution, |x, y| {
        let i = (y * resolution + x) as usize;
        let mut rgb = [0.0_f32; 3];
        for (index, layer) in layers.iter().enumerate() {
            let w = layer.sample(i, resolution).clamp(0.0, 1.0);
            for (channel, c) in rgb.iter_mut().zip(layer_color(index)) {
                *channel += w * f32::from(c);
            }
        }
        let [r, g, b] = rgb.map(|c| c.clamp(0.0, 255.0) as u8);
        [r, g, b, 255]
    })
}
