mod cli;
mod dataset;
mod downsample;
mod result;

use crate::{
    dataset::{clear_directory, delete_directory, PreprocessContext, PreprocessNoData},
    downsample::write_levels,
    result::{PreprocessError, PreprocessResult},
};
use std::{fs, time::Instant};
use terrain_streaming::{
    formats::{properties::Properties, raster_file::RasterFile},
    raster::Raster,
    terrain_data::LayerType,
};

pub mod prelude {
    pub use crate::{
        cli::Cli,
        dataset::{PreprocessContext, PreprocessNoData, PyramidGeometry, PyramidLayerType},
        preprocess,
        result::{PreprocessError, PreprocessResult},
        PyramidSummary,
    };
}

const PROPERTIES_FILE: &str = "layer.properties";
const DEPTH_TREE_FILE: &str = "dert/depthtree.txt";

/// What a pyramid build produced.
#[derive(Clone, Debug, PartialEq)]
pub struct PyramidSummary {
    pub number_of_levels: u32,
    /// The number of tiles along each side of the highest resolution level.
    pub number_of_tiles: usize,
    pub tile_count: usize,
    pub empty_tiles: usize,
    pub minimum: Vec<f64>,
    pub maximum: Vec<f64>,
}

/// Builds the tiled pyramid of a layer from the source raster.
///
/// The source is converted into a scratch raster in the temporary directory, centered in a
/// padded square of a power of two tiles per side. Every level is written from the highest
/// resolution down to the root, followed by the `layer.properties` file of the layer.
pub fn preprocess(
    mut source: RasterFile,
    context: &PreprocessContext,
) -> PreprocessResult<PyramidSummary> {
    let start_preprocessing = Instant::now();
    let geometry = context.geometry;

    if context.layer_dir.exists() && !context.overwrite {
        return Err(PreprocessError::LayerExists(context.layer_dir.clone()));
    }

    let data_type = context.scratch_data_type()?;

    clear_directory(&context.layer_dir)?;

    if let PreprocessNoData::NoData(missing) = context.no_data {
        source.set_missing_value(missing);
    }

    println!(
        "Writing temporary {}x{} raster",
        geometry.scratch_size, geometry.scratch_size
    );

    let mut raster = Raster::new(
        &context.temp_dir,
        geometry.scratch_size,
        geometry.scratch_size,
        data_type,
    )?;

    let loaded = load_source(&mut source, &mut raster, context);

    let written = loaded.and_then(|()| {
        write_levels(&raster, &geometry, &context.layer_dir, context.layer_type)
    });

    raster.dispose()?;
    delete_directory(&context.temp_dir)?;

    let empty_tiles = written?;

    let summary = PyramidSummary {
        number_of_levels: geometry.number_of_levels(),
        number_of_tiles: geometry.number_of_tiles,
        tile_count: geometry.tile_count(),
        empty_tiles,
        minimum: source.minimum_sample_value().to_vec(),
        maximum: source.maximum_sample_value().to_vec(),
    };

    save_layer_properties(&source, context, &summary)?;

    // the existence of tiles is indexed by the elevation layer
    if context.layer_type == LayerType::Elevation {
        let depth_tree = context.landscape_path.join(DEPTH_TREE_FILE);

        if depth_tree.exists() {
            fs::remove_file(depth_tree)?;
        }
    }

    println!(
        "Number of levels for {} = {} with {} tiles per side at the highest resolution level.",
        context.layer_name, summary.number_of_levels, summary.number_of_tiles
    );
    println!(
        "Total number of tiles for {} = {}, {} of them empty.",
        context.layer_name, summary.tile_count, summary.empty_tiles
    );
    println!("Preprocessing took: {:?}", start_preprocessing.elapsed());

    Ok(summary)
}

/// Converts the source into the padded scratch raster, marking the padding as missing.
fn load_source(
    source: &mut RasterFile,
    raster: &mut Raster,
    context: &PreprocessContext,
) -> PreprocessResult<()> {
    let PreprocessContext {
        geometry,
        layer_type,
        ..
    } = context;

    match *layer_type {
        LayerType::Elevation | LayerType::Field => {
            raster.fill(f32::NAN)?;
            source.load_as_float(raster, geometry.top, geometry.left, 1.0, f64::MIN, f64::MAX)?;

            let valid = source
                .minimum_sample_value()
                .first()
                .zip(source.maximum_sample_value().first())
                .is_some_and(|(minimum, maximum)| minimum <= maximum);

            if !valid {
                return Err(PreprocessError::NoValidSamples);
            }
        }
        LayerType::GrayImage => {
            raster.fill(0u8)?;
            source.compute_extrema()?;

            let (Some(&minimum), Some(&maximum)) = (
                source.minimum_sample_value().first(),
                source.maximum_sample_value().first(),
            ) else {
                return Err(PreprocessError::NoValidSamples);
            };

            source.load_as_gray(raster, geometry.top, geometry.left, minimum, maximum)?;
        }
        LayerType::ColorImage => {
            raster.fill(0u32)?;
            source.load_rgba(raster, geometry.top, geometry.left)?;
        }
        other => return Err(PreprocessError::UnsupportedLayerType(other)),
    }

    raster.flush()?;
    Ok(())
}

fn save_layer_properties(
    source: &RasterFile,
    context: &PreprocessContext,
    summary: &PyramidSummary,
) -> PreprocessResult<()> {
    let geometry = &context.geometry;
    let [pixel_width, pixel_length] = source.pixel_scale().unwrap_or([1.0, 1.0]);

    let mut properties = Properties::new();
    properties.set("LayerType", context.layer_type);
    properties.set("NumberOfLevels", summary.number_of_levels);
    properties.set("NumberOfTiles", summary.number_of_tiles);
    properties.set("TileWidth", geometry.tile_size);
    properties.set("TileLength", geometry.tile_size);
    properties.set("Source", context.source_path.display());
    properties.set_array("MinimumValue", &summary.minimum);
    properties.set_array("MaximumValue", &summary.maximum);
    properties.set("TileFormat", "PNG");
    properties.set_array("ProjectionInfo.Scale", &[pixel_width, pixel_length, 1.0]);
    properties.set("ProjectionInfo.RasterWidth", geometry.source_width);
    properties.set("ProjectionInfo.RasterLength", geometry.source_length);

    if context.layer_type == LayerType::Elevation {
        let edge_fill = summary.minimum.first().copied().unwrap_or(0.0) as f32;
        properties.set("EdgeFillValue", edge_fill);
    }

    properties.save_file(context.layer_dir.join(PROPERTIES_FILE))?;
    Ok(())
}
