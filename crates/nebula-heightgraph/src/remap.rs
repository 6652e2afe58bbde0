//! Nearest-neighbour index remapping between square grids of different
//! resolutions.
//!
//! Every kernel that reads an input whose resolution differs from its own
//! output goes through [`remap_index`], which is what lets a low-resolution
//! mask be blended into a high-resolution height field.

/// Map a flattened index on a `target_resolution²` grid to the flattened
/// index of the covering sample on a `source_resolution²` grid.
///
/// The relative `(x, y)` position is preserved:
/// `source_xy = floor(target_xy * source_resolution / target_resolution)`.
#[inline]
pub fn remap_index(target_index: usize, target_resolution: u32, source_resolution: u32) -> usize {
    if target_resolution == source_resolution {
        return target_index;
    }

    let target = target_resolution as usize;
    let source = source_resolution as usize;
    let x = target_index % target;
    let y = target_index / target;

    let sx = (x * source / target).min(source - 1);
    let sy = (y * source / target).min(source - 1);
    sy * source + sx
}

/// Split a flattened index into `(x, y)` on a `resolution²` grid.
#[inline]
pub fn index_to_xy(index: usize, resolution: u32) -> (u32, u32) {
    let r = resolution as usize;
    ((index % r) as u32, (index / r) as u32)
}
