use std::{io, num::ParseFloatError, num::ParseIntError, path::PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TerrainError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),
    #[error("RON error: {0}")]
    Ron(#[from] ron::Error),
    #[error("RON error: {0}")]
    RonSpanned(#[from] ron::error::SpannedError),
    #[error("parse error: {0}")]
    ParseInt(#[from] ParseIntError),
    #[error("parse error: {0}")]
    ParseFloat(#[from] ParseFloatError),
    #[error("invalid quadrant {0}, expected 1 to 4")]
    InvalidQuadrant(u8),
    #[error("invalid quad key {0:?}, expected /q1/q2/...")]
    InvalidQuadKey(String),
    #[error("invalid depth tree: {0}")]
    InvalidDepthTree(&'static str),
    #[error("missing property {key} in {}", path.display())]
    MissingProperty { key: &'static str, path: PathBuf },
    #[error("unknown layer type {0}")]
    UnknownLayerType(String),
    #[error("unsupported data type {0:?}")]
    UnsupportedDataType(crate::raster::DataType),
    #[error("region {0}x{1} at ({2}, {3}) lies outside of the raster")]
    InvalidRegion(usize, usize, usize, usize),
    #[error("raster of {0}x{1} samples is empty")]
    EmptyRaster(usize, usize),
    #[error("buffer of {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("unsupported raster file {}", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("landscape {} has no elevation layer", .0.display())]
    NoElevationLayer(PathBuf),
    #[error("tile {0} of the base layer does not exist")]
    TileNotFound(crate::math::QuadKey),
}

pub type TerrainResult<T> = Result<T, TerrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_include_the_source() {
        let error = TerrainError::from(io::Error::other("volume unreachable"));
        assert_eq!(error.to_string(), "I/O error: volume unreachable");

        let error = "x".parse::<u8>().map_err(TerrainError::from).unwrap_err();
        assert!(error.to_string().starts_with("parse error: "));
    }
}
