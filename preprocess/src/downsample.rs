use crate::{
    cli::PreprocessBar,
    dataset::PyramidGeometry,
    result::{PreprocessError, PreprocessResult},
};
use indicatif::ParallelProgressIterator;
use itertools::Itertools;
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};
use terrain_streaming::{
    formats::tile_image::PngTileCodec,
    math::{QuadKey, Quadrant},
    raster::{Raster, RasterRegion},
    terrain_data::LayerType,
};

/// The key of the tile in the given row and column of a level with `2^level` tiles per side.
///
/// Row zero is the northern edge of the layer.
pub(crate) fn tile_key(row: usize, column: usize, level: u32) -> QuadKey {
    let path = (0..level)
        .rev()
        .map(|bit| match ((column >> bit) & 1, (row >> bit) & 1) {
            (0, 0) => Quadrant::NorthWest,
            (_, 0) => Quadrant::NorthEast,
            (0, _) => Quadrant::SouthWest,
            _ => Quadrant::SouthEast,
        })
        .collect();

    QuadKey::from_quadrants(path)
}

/// Writes the tiles of all levels, starting at the highest resolution.
///
/// Returns the number of empty tiles, which are stored as zero length files.
pub(crate) fn write_levels(
    raster: &Raster,
    geometry: &PyramidGeometry,
    layer_dir: &Path,
    layer_type: LayerType,
) -> PreprocessResult<usize> {
    let empty_tiles = AtomicUsize::new(0);

    for level in (0..=geometry.max_level).rev() {
        let tiles_per_side = geometry.tiles_per_side(level);
        let tiles = (0..tiles_per_side)
            .cartesian_product(0..tiles_per_side)
            .collect_vec();

        let progress_bar = PreprocessBar::new(
            format!("Writing level {} of {}", level + 1, geometry.number_of_levels()),
            tiles.len() as u64,
        );

        tiles
            .par_iter()
            .progress_with(progress_bar.bar())
            .try_for_each(|&(row, column)| {
                let written = write_tile(raster, geometry, layer_dir, layer_type, level, row, column)?;

                if !written {
                    empty_tiles.fetch_add(1, Ordering::Relaxed);
                }

                Ok::<(), PreprocessError>(())
            })?;

        progress_bar.finish();
    }

    Ok(empty_tiles.into_inner())
}

/// Writes one tile of `tile_size + 1` samples per side, reduced by the kernel of its level.
///
/// Returns whether the tile contains any valid samples.
fn write_tile(
    raster: &Raster,
    geometry: &PyramidGeometry,
    layer_dir: &Path,
    layer_type: LayerType,
    level: u32,
    row: usize,
    column: usize,
) -> PreprocessResult<bool> {
    let kernel = geometry.kernel(level);
    let size = geometry.tile_size + 1;
    let region = RasterRegion::new(
        row * geometry.tile_size * kernel,
        column * geometry.tile_size * kernel,
        size * kernel,
        size * kernel,
    );

    let encoded = match layer_type {
        LayerType::Elevation | LayerType::Field => {
            let samples = raster.get_resampled::<f32>(region, kernel)?;

            if samples.iter().all(|sample| sample.is_nan()) {
                None
            } else {
                Some(PngTileCodec::encode_float(size as u32, size as u32, &samples)?)
            }
        }
        LayerType::GrayImage => {
            let samples = raster.get_resampled::<u8>(region, kernel)?;

            if samples.iter().all(|&sample| sample == 0) {
                None
            } else {
                Some(PngTileCodec::encode_gray(size as u32, size as u32, &samples)?)
            }
        }
        LayerType::ColorImage => {
            let pixels = raster.get_resampled_rgba(region, kernel)?;

            if pixels.iter().all(|&pixel| pixel == [0; 4]) {
                None
            } else {
                Some(PngTileCodec::encode_rgba(size as u32, size as u32, &pixels)?)
            }
        }
        other => return Err(PreprocessError::UnsupportedLayerType(other)),
    };

    let path = PathBuf::from(
        tile_key(row, column, level).tile_path(&layer_dir.display().to_string(), "png"),
    );

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(&path, encoded.as_deref().unwrap_or_default())?;

    Ok(encoded.is_some())
}
