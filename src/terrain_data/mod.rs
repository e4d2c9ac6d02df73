//! This module contains the data flowing from storage to the screen.
//!
//! # Explanation
//! A landscape consists of several layers, each a pyramid of [`Tile`]s addressed by
//! [`QuadKey`]. The elevation layer defines the geometry, every other layer is applied to it
//! as a texture.
//!
//! The [`TileSource`](tile_source::TileSource) provides the decoded tiles of a layer.
//! The [`TileFactory`](tile_factory::TileFactory) turns them into renderable
//! [`TerrainTile`](tile_factory::TerrainTile)s, consisting of a [`TileMesh`](tile_mesh::TileMesh)
//! and one [`TileTexture`] per layer, and keeps them in the
//! [`TileCache`](tile_cache::TileCache). Tiles are built either on the calling thread or in the
//! background by the [`TileLoader`](tile_loader::TileLoader).

use crate::{
    formats::tile_image::{pixel_to_float, DecodedTile},
    math::QuadKey,
    raster::DataType,
    result::{TerrainError, TerrainResult},
};
use std::{fmt, str::FromStr};

pub mod raster_layer;
pub mod tile_cache;
pub mod tile_factory;
pub mod tile_loader;
pub mod tile_mesh;
pub mod tile_source;

/// The kind of data stored in a layer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum LayerType {
    #[default]
    None,
    Elevation,
    ColorImage,
    GrayImage,
    Field,
    Footprint,
    Viewshed,
    Derivative,
}

impl LayerType {
    /// The number of bytes of one pixel of a tile of this layer.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            LayerType::Elevation | LayerType::Field | LayerType::ColorImage => 4,
            LayerType::GrayImage => 1,
            _ => 0,
        }
    }

    /// The data type tiles of this layer are expected to have.
    pub fn tile_data_type(self) -> DataType {
        match self {
            LayerType::Elevation | LayerType::Field => DataType::Float,
            LayerType::ColorImage => DataType::UnsignedInteger,
            LayerType::GrayImage => DataType::UnsignedByte,
            _ => DataType::Byte,
        }
    }

    pub fn is_image(self) -> bool {
        matches!(self, LayerType::ColorImage | LayerType::GrayImage)
    }

    pub fn has_color_map(self) -> bool {
        matches!(self, LayerType::Field | LayerType::Derivative)
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let name = match self {
            LayerType::None => "none",
            LayerType::Elevation => "elevation",
            LayerType::ColorImage => "colorimage",
            LayerType::GrayImage => "grayimage",
            LayerType::Field => "field",
            LayerType::Footprint => "footprint",
            LayerType::Viewshed => "viewshed",
            LayerType::Derivative => "derivative",
        };

        f.write_str(name)
    }
}

impl FromStr for LayerType {
    type Err = TerrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "none" => LayerType::None,
            "elevation" => LayerType::Elevation,
            "colorimage" => LayerType::ColorImage,
            "grayimage" => LayerType::GrayImage,
            "field" => LayerType::Field,
            "footprint" => LayerType::Footprint,
            "viewshed" => LayerType::Viewshed,
            "derivative" => LayerType::Derivative,
            other => return Err(TerrainError::UnknownLayerType(other.to_string())),
        })
    }
}

/// How a layer is presented on the landscape.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerInfo {
    pub name: String,
    pub layer_type: LayerType,
    /// The share of the layer in the color of the landscape.
    pub opacity: f64,
    /// The texture unit of the layer, if it is shown.
    pub layer_number: Option<usize>,
    pub color_map_name: Option<String>,
    pub gradient: bool,
    pub minimum: f64,
    pub maximum: f64,
    pub autoblend: bool,
    pub show: bool,
}

impl LayerInfo {
    pub fn new(name: &str, layer_type: LayerType) -> Self {
        Self {
            name: name.to_string(),
            layer_type,
            opacity: 1.0,
            layer_number: None,
            color_map_name: None,
            gradient: false,
            minimum: f64::NAN,
            maximum: f64::NAN,
            autoblend: layer_type != LayerType::None,
            show: true,
        }
    }

    pub fn with_color_map(mut self, name: &str, minimum: f64, maximum: f64, gradient: bool) -> Self {
        self.color_map_name = Some(name.to_string());
        self.minimum = minimum;
        self.maximum = maximum;
        self.gradient = gradient;
        self
    }
}

/// The samples of a [`Tile`].
#[derive(Clone, Debug, Default, PartialEq)]
pub enum TileData {
    /// The tile is stored, but holds no data.
    #[default]
    Empty,
    Float(Vec<f32>),
    Image { channels: u8, samples: Vec<u8> },
}

/// The decoded contents of one layer at one [`QuadKey`].
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    pub key: QuadKey,
    pub columns: usize,
    pub rows: usize,
    pub data_type: DataType,
    pub data: TileData,
}

impl Tile {
    pub fn empty(key: QuadKey, data_type: DataType) -> Self {
        Self {
            key,
            columns: 0,
            rows: 0,
            data_type,
            data: TileData::Empty,
        }
    }

    /// Interprets a decoded tile image as samples of the `declared` type.
    ///
    /// Float tiles are reassembled from their four byte channels. Image tiles whose channel count
    /// contradicts the declared type take the type matching their channels instead, since single
    /// gray tiles occur amid color layers and vice versa.
    pub fn from_decoded(key: QuadKey, decoded: DecodedTile, declared: DataType) -> Self {
        let columns = decoded.width as usize;
        let rows = decoded.length as usize;
        let channels = decoded.channels;

        if declared == DataType::Float {
            let samples = decoded
                .samples
                .chunks_exact(channels.max(1) as usize)
                .map(|pixel| match *pixel {
                    [r, g, b, a, ..] => pixel_to_float([r, g, b, a]),
                    _ => f32::NAN,
                })
                .collect();

            return Self {
                key,
                columns,
                rows,
                data_type: declared,
                data: TileData::Float(samples),
            };
        }

        let data_type = match declared {
            DataType::UnsignedInteger if channels < 4 => DataType::UnsignedByte,
            DataType::UnsignedByte if channels > 1 => DataType::UnsignedInteger,
            other => other,
        };

        Self {
            key,
            columns,
            rows,
            data_type,
            data: TileData::Image {
                channels,
                samples: decoded.samples,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.data, TileData::Empty)
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match &self.data {
            TileData::Empty => 0,
            TileData::Float(_) => 4,
            TileData::Image { channels, .. } => *channels as usize,
        }
    }

    /// The samples of an elevation or field tile.
    pub fn elevations(&self) -> Option<&[f32]> {
        match &self.data {
            TileData::Float(samples) => Some(samples),
            _ => None,
        }
    }

    /// Converts the tile into a texture, `None` for empty tiles.
    pub fn texture(&self) -> Option<TileTexture> {
        let (format, data) = match &self.data {
            TileData::Empty => return None,
            TileData::Float(samples) => (
                TextureFormat::LuminanceFloat,
                bytemuck::cast_slice(samples).to_vec(),
            ),
            TileData::Image { channels, samples } => {
                let format = match channels {
                    1 => TextureFormat::Luminance,
                    2 => TextureFormat::LuminanceAlpha,
                    3 => TextureFormat::Rgb,
                    _ => TextureFormat::Rgba,
                };
                (format, samples.clone())
            }
        };

        Some(TileTexture {
            width: self.columns as u32,
            length: self.rows as u32,
            format,
            data,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    Luminance,
    LuminanceAlpha,
    Rgb,
    Rgba,
    /// Native endian `f32` samples.
    LuminanceFloat,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Luminance => 1,
            TextureFormat::LuminanceAlpha => 2,
            TextureFormat::Rgb => 3,
            TextureFormat::Rgba | TextureFormat::LuminanceFloat => 4,
        }
    }
}

/// The image a layer contributes to a tile.
#[derive(Clone, Debug, PartialEq)]
pub struct TileTexture {
    pub width: u32,
    pub length: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
}

impl TileTexture {
    /// The texture of tiles without any elevation data.
    pub fn empty() -> Self {
        Self {
            width: 4,
            length: 4,
            format: TextureFormat::Luminance,
            data: vec![0; 16],
        }
    }

    /// A single fully transparent texel, used where a layer has no data.
    pub fn transparent() -> Self {
        Self {
            width: 1,
            length: 1,
            format: TextureFormat::Rgba,
            data: vec![0; 4],
        }
    }
}
