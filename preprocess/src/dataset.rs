use crate::{
    cli::Cli,
    result::{PreprocessError, PreprocessResult},
};
use clap::ValueEnum;
use std::{
    fs, io,
    num::ParseFloatError,
    path::{Path, PathBuf},
    str::FromStr,
};
use terrain_streaming::{formats::raster_file::RasterFile, raster::DataType, terrain_data::LayerType};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PreprocessNoData {
    Source,
    NoData(f32),
}

impl FromStr for PreprocessNoData {
    type Err = ParseFloatError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "source" => Ok(PreprocessNoData::Source),
            other => Ok(PreprocessNoData::NoData(other.parse()?)),
        }
    }
}

/// The layer types a pyramid can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PyramidLayerType {
    Elevation,
    Field,
    #[value(name = "colorimage")]
    ColorImage,
    #[value(name = "grayimage")]
    GrayImage,
}

impl From<PyramidLayerType> for LayerType {
    fn from(layer_type: PyramidLayerType) -> Self {
        match layer_type {
            PyramidLayerType::Elevation => LayerType::Elevation,
            PyramidLayerType::Field => LayerType::Field,
            PyramidLayerType::ColorImage => LayerType::ColorImage,
            PyramidLayerType::GrayImage => LayerType::GrayImage,
        }
    }
}

/// How the source raster is laid out in the pyramid.
///
/// The source is centered in a square of `padded_size` samples, a power of two multiple of
/// the tile size. Every tile shares its last row and column with its neighbor, so the scratch
/// raster extends `number_of_tiles` samples beyond the padded square, which covers the shared
/// edge of the last tile at every level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidGeometry {
    pub source_width: usize,
    pub source_length: usize,
    pub tile_size: usize,
    /// The number of tiles along each side of the highest resolution level.
    pub number_of_tiles: usize,
    pub max_level: u32,
    pub padded_size: usize,
    pub scratch_size: usize,
    /// The column of the first source sample in the scratch raster.
    pub left: usize,
    /// The row of the first source sample in the scratch raster.
    pub top: usize,
}

impl PyramidGeometry {
    pub fn new(
        source_width: usize,
        source_length: usize,
        tile_size: usize,
    ) -> PreprocessResult<Self> {
        if !tile_size.is_power_of_two() {
            return Err(PreprocessError::TileSize(tile_size));
        }

        let padded_size = source_width
            .max(source_length)
            .max(tile_size)
            .next_power_of_two();
        let number_of_tiles = padded_size / tile_size;

        Ok(Self {
            source_width,
            source_length,
            tile_size,
            number_of_tiles,
            max_level: number_of_tiles.trailing_zeros(),
            padded_size,
            scratch_size: padded_size + number_of_tiles,
            left: (padded_size - source_width) / 2,
            top: (padded_size - source_length) / 2,
        })
    }

    pub fn number_of_levels(&self) -> u32 {
        self.max_level + 1
    }

    /// The size of the box filter reducing the highest resolution to `level`.
    pub fn kernel(&self, level: u32) -> usize {
        num::pow(2, (self.max_level - level) as usize)
    }

    pub fn tiles_per_side(&self, level: u32) -> usize {
        self.number_of_tiles / self.kernel(level)
    }

    /// The number of tiles of all levels.
    pub fn tile_count(&self) -> usize {
        (0..=self.max_level)
            .map(|level| self.tiles_per_side(level).pow(2))
            .sum()
    }
}

pub struct PreprocessContext {
    pub(crate) source_path: PathBuf,
    pub(crate) landscape_path: PathBuf,
    pub(crate) layer_name: String,
    pub(crate) layer_type: LayerType,
    pub(crate) layer_dir: PathBuf,
    pub(crate) temp_dir: PathBuf,
    pub(crate) no_data: PreprocessNoData,
    pub(crate) overwrite: bool,
    pub(crate) geometry: PyramidGeometry,
}

impl PreprocessContext {
    pub fn from_cli(args: Cli) -> PreprocessResult<(RasterFile, Self)> {
        let Cli {
            src_path,
            landscape_path,
            layer_name,
            layer_type,
            tile_size,
            no_data,
            temp_path,
            overwrite,
        } = args;

        PreprocessContext::initialize(
            src_path,
            landscape_path,
            layer_name,
            layer_type.into(),
            tile_size,
            no_data,
            temp_path,
            overwrite,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn initialize(
        source_path: PathBuf,
        landscape_path: PathBuf,
        layer_name: String,
        layer_type: LayerType,
        tile_size: usize,
        no_data: PreprocessNoData,
        temp_dir: Option<PathBuf>,
        overwrite: bool,
    ) -> PreprocessResult<(RasterFile, Self)> {
        let source = RasterFile::open(&source_path)?;

        let samples_per_pixel = source.samples_per_pixel();
        if samples_per_pixel > 1 && layer_type != LayerType::ColorImage {
            return Err(PreprocessError::SamplesPerPixel(layer_type, samples_per_pixel));
        }

        let geometry = PyramidGeometry::new(source.width(), source.length(), tile_size)?;

        let layer_dir = landscape_path.join(&layer_name);

        let temp_dir = match temp_dir {
            None => layer_dir.join("temp"),
            Some(path) => path,
        };

        Ok((
            source,
            Self {
                source_path,
                landscape_path,
                layer_name,
                layer_type,
                layer_dir,
                temp_dir,
                no_data,
                overwrite,
                geometry,
            },
        ))
    }

    pub fn geometry(&self) -> &PyramidGeometry {
        &self.geometry
    }

    pub fn layer_dir(&self) -> &Path {
        &self.layer_dir
    }

    /// The sample type of the scratch raster holding the converted source.
    pub(crate) fn scratch_data_type(&self) -> PreprocessResult<DataType> {
        match self.layer_type {
            LayerType::Elevation | LayerType::Field => Ok(DataType::Float),
            LayerType::ColorImage => Ok(DataType::UnsignedInteger),
            LayerType::GrayImage => Ok(DataType::UnsignedByte),
            other => Err(PreprocessError::UnsupportedLayerType(other)),
        }
    }
}

pub fn delete_directory(directory: &Path) -> io::Result<()> {
    match fs::remove_dir_all(directory) {
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        result => result,
    }
}

pub fn clear_directory(directory: &Path) -> io::Result<()> {
    delete_directory(directory)?;
    fs::create_dir_all(directory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_centers_source() {
        let geometry = PyramidGeometry::new(300, 200, 64).unwrap();

        assert_eq!(geometry.padded_size, 512);
        assert_eq!(geometry.number_of_tiles, 8);
        assert_eq!(geometry.max_level, 3);
        assert_eq!(geometry.number_of_levels(), 4);
        assert_eq!(geometry.scratch_size, 520);
        assert_eq!((geometry.left, geometry.top), (106, 156));

        assert_eq!(geometry.kernel(3), 1);
        assert_eq!(geometry.kernel(0), 8);
        assert_eq!(geometry.tiles_per_side(1), 2);
        assert_eq!(geometry.tile_count(), 1 + 4 + 16 + 64);
    }

    #[test]
    fn small_sources_fit_a_single_tile() {
        let geometry = PyramidGeometry::new(20, 30, 128).unwrap();

        assert_eq!(geometry.padded_size, 128);
        assert_eq!(geometry.max_level, 0);
        assert_eq!(geometry.tile_count(), 1);
        assert_eq!(geometry.scratch_size, 129);
    }

    #[test]
    fn tile_size_is_a_power_of_two() {
        assert!(matches!(
            PyramidGeometry::new(300, 200, 100),
            Err(PreprocessError::TileSize(100))
        ));
        assert!(matches!(
            PyramidGeometry::new(300, 200, 0),
            Err(PreprocessError::TileSize(0))
        ));
    }

    #[test]
    fn no_data_from_str() {
        assert_eq!("source".parse(), Ok(PreprocessNoData::Source));
        assert_eq!(" -9999 ".parse(), Ok(PreprocessNoData::NoData(-9999.0)));
        assert!("none".parse::<PreprocessNoData>().is_err());
    }
}
