//! Debug visualization: images of evaluated height and weight buffers.
//!
//! Provides [`DebugImage`] and renderers that color a [`crate::HeightData`]
//! against its declared range or blend a weight list into a palette image.
//! The CLI writes these out as PNG files.

mod image;
mod renderers;

pub use self::image::DebugImage;
pub use renderers::{height_to_color, layer_color, render_height, render_weights};
