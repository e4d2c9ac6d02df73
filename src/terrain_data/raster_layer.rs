use crate::{
    config::StreamingConfig,
    formats::properties::Properties,
    result::TerrainResult,
    terrain_data::{LayerInfo, LayerType},
};
use bevy::log::info;

/// The pyramid geometry of a layer, read from its `layer.properties` file.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterLayer {
    pub info: LayerInfo,
    pub number_of_levels: u32,
    pub number_of_tiles: usize,
    pub tile_width: usize,
    pub tile_length: usize,
    /// The width of the padded raster covered by all tiles of the highest level.
    pub raster_width: usize,
    pub raster_length: usize,
    /// The width of the source raster the pyramid was built from.
    pub source_width: usize,
    pub source_length: usize,
    /// The size of one pixel in meters.
    pub pixel_width: f64,
    pub pixel_length: f64,
    pub minimum: Vec<f64>,
    pub maximum: Vec<f64>,
    fill_value: f32,
}

impl RasterLayer {
    pub fn from_properties(info: LayerInfo, properties: &Properties) -> TerrainResult<Self> {
        let number_of_levels = properties.require("NumberOfLevels")?;
        let number_of_tiles = properties.require("NumberOfTiles")?;
        let tile_width = properties.require("TileWidth")?;
        let tile_length = match properties.parse("TileLength")? {
            Some(tile_length) => tile_length,
            None => properties.require("TileHeight")?,
        };

        let scale = properties.require_array::<f64>("ProjectionInfo.Scale")?;
        let (pixel_width, pixel_length) = match scale[..] {
            [width, length, ..] => (width, length),
            [size] => (size, size),
            [] => return Err(properties.missing("ProjectionInfo.Scale")),
        };

        let source_width = properties
            .parse("ProjectionInfo.RasterWidth")?
            .unwrap_or(tile_width * number_of_tiles);
        let source_length = match properties.parse("ProjectionInfo.RasterLength")? {
            Some(length) => length,
            None => properties
                .parse("ProjectionInfo.RasterHeight")?
                .unwrap_or(tile_length * number_of_tiles),
        };

        let minimum = properties.require_array("MinimumValue")?;
        let maximum = properties.require_array("MaximumValue")?;
        let fill_value = properties.parse("EdgeFillValue")?.unwrap_or(0.0);

        let layer = Self {
            info,
            number_of_levels,
            number_of_tiles,
            tile_width,
            tile_length,
            raster_width: tile_width * number_of_tiles,
            raster_length: tile_length * number_of_tiles,
            source_width,
            source_length,
            pixel_width,
            pixel_length,
            minimum,
            maximum,
            fill_value,
        };

        info!(
            "Properties for {}: type {}, {} levels, {}x{} tiles, values {:?} to {:?}, edge fill {}.",
            layer.info.name,
            layer.info.layer_type,
            layer.number_of_levels,
            layer.tile_width,
            layer.tile_length,
            layer.minimum.first(),
            layer.maximum.first(),
            layer.fill_value()
        );

        Ok(layer)
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn layer_type(&self) -> LayerType {
        self.info.layer_type
    }

    /// The elevation substituted for missing samples, the minimum if none was stored.
    pub fn fill_value(&self) -> f32 {
        if self.fill_value.is_nan() {
            self.minimum.first().copied().unwrap_or(0.0) as f32
        } else {
            self.fill_value
        }
    }

    /// The memory of one tile of this layer, including its shared edge row and column.
    pub fn bytes_per_tile(&self) -> usize {
        (self.tile_width + 1) * (self.tile_length + 1) * self.layer_type().bytes_per_pixel()
    }

    /// The exaggeration applied to the coordinates of this layer, see
    /// [`StreamingConfig::pixel_scale`].
    pub fn pixel_scale(&self, config: &StreamingConfig) -> f64 {
        config.pixel_scale(self.pixel_width.min(self.pixel_length))
    }

    pub fn physical_width(&self) -> f64 {
        self.raster_width as f64 * self.pixel_width
    }

    pub fn physical_length(&self) -> f64 {
        self.raster_length as f64 * self.pixel_length
    }
}
