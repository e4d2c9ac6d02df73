use std::{io, path::PathBuf};
use terrain_streaming::{result::TerrainError, terrain_data::LayerType};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("terrain error: {0}")]
    Terrain(#[from] TerrainError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot build a pyramid for a {0} layer")]
    UnsupportedLayerType(LayerType),
    #[error("cannot build a {0} layer from a raster with {1} samples per pixel")]
    SamplesPerPixel(LayerType, usize),
    #[error("the tile size {0} is not a power of two")]
    TileSize(usize),
    #[error("the layer {} already exists, use --overwrite to replace it", .0.display())]
    LayerExists(PathBuf),
    #[error("the raster contains no valid samples")]
    NoValidSamples,
}

pub type PreprocessResult<T> = Result<T, PreprocessError>;
