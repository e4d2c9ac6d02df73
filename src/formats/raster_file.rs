use crate::{
    formats::tile_image::PngTileCodec,
    raster::{DataType, Raster, RasterRegion, Sample},
    result::{TerrainError, TerrainResult},
};
use bevy::log::info;
use image::DynamicImage;
use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};
use tiff::{
    decoder::{Decoder, DecodingResult},
    tags::Tag,
};

const GDAL_NODATA: u16 = 42113;
const MODEL_PIXEL_SCALE: u16 = 33550;

/// Matches every [`DecodingResult`] variant and expands `$gen!(samples)` with the typed samples.
macro_rules! decoding_result_gen {
    ($result:expr, $gen:ident) => {
        match $result {
            DecodingResult::U8(samples) => $gen!(samples),
            DecodingResult::U16(samples) => $gen!(samples),
            DecodingResult::U32(samples) => $gen!(samples),
            DecodingResult::I8(samples) => $gen!(samples),
            DecodingResult::I16(samples) => $gen!(samples),
            DecodingResult::I32(samples) => $gen!(samples),
            DecodingResult::I64(samples) => $gen!(samples),
            DecodingResult::F32(samples) => $gen!(samples),
            DecodingResult::U64(samples) => $gen!(samples),
            DecodingResult::F64(samples) => $gen!(samples),
        }
    };
}

/// Properties shared by all source raster formats.
#[derive(Clone, Debug, Default)]
pub struct RasterHeader {
    pub path: PathBuf,
    pub width: usize,
    pub length: usize,
    pub samples_per_pixel: usize,
    pub data_type: DataType,
    pub missing: f32,
    /// The size of a pixel in meters, if the file is georeferenced.
    pub pixel_scale: Option<[f64; 2]>,
    pub minimum: Vec<f64>,
    pub maximum: Vec<f64>,
}

/// A source raster format, read chunk by chunk.
pub trait RasterSource {
    fn header(&self) -> &RasterHeader;

    fn header_mut(&mut self) -> &mut RasterHeader;

    /// Calls `visit` with the region and samples of every chunk of the file.
    fn read_chunks(
        &mut self,
        visit: &mut dyn FnMut(RasterRegion, DecodingResult) -> TerrainResult<()>,
    ) -> TerrainResult<()>;
}

pub struct TiffRaster {
    header: RasterHeader,
    decoder: Decoder<BufReader<File>>,
}

impl TiffRaster {
    pub fn open(path: &Path) -> TerrainResult<Self> {
        let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
        let (width, length) = decoder.dimensions()?;

        let samples_per_pixel = Self::first_u32(&mut decoder, Tag::SamplesPerPixel)?.unwrap_or(1);
        let bits = Self::first_u32(&mut decoder, Tag::BitsPerSample)?.unwrap_or(8);
        let format = Self::first_u32(&mut decoder, Tag::SampleFormat)?.unwrap_or(1);

        let data_type = match (format, bits) {
            (3, 32) => DataType::Float,
            (3, 64) => DataType::Double,
            (2, 8) => DataType::Byte,
            (2, 16) => DataType::Short,
            (2, 32) => DataType::Integer,
            (2, 64) => DataType::Long,
            (_, 8) => DataType::UnsignedByte,
            (_, 16) => DataType::UnsignedShort,
            (_, 32) => DataType::UnsignedInteger,
            (_, 64) => DataType::UnsignedLong,
            _ => DataType::Unknown,
        };

        let missing = decoder
            .find_tag(Tag::from_u16_exhaustive(GDAL_NODATA))?
            .map(|value| value.into_string())
            .transpose()?
            .and_then(|value| value.trim_matches(char::from(0)).trim().parse::<f32>().ok())
            .unwrap_or(f32::NAN);

        let pixel_scale = decoder
            .find_tag(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE))?
            .map(|value| value.into_f64_vec())
            .transpose()?
            .and_then(|scale| (scale.len() >= 2).then(|| [scale[0], scale[1]]));

        Ok(Self {
            header: RasterHeader {
                path: path.to_path_buf(),
                width: width as usize,
                length: length as usize,
                samples_per_pixel: samples_per_pixel as usize,
                data_type,
                missing,
                pixel_scale,
                minimum: Vec::new(),
                maximum: Vec::new(),
            },
            decoder,
        })
    }

    fn first_u32(decoder: &mut Decoder<BufReader<File>>, tag: Tag) -> TerrainResult<Option<u32>> {
        Ok(decoder
            .find_tag(tag)?
            .map(|value| value.into_u32_vec())
            .transpose()?
            .and_then(|values| values.first().copied()))
    }
}

impl RasterSource for TiffRaster {
    fn header(&self) -> &RasterHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RasterHeader {
        &mut self.header
    }

    fn read_chunks(
        &mut self,
        visit: &mut dyn FnMut(RasterRegion, DecodingResult) -> TerrainResult<()>,
    ) -> TerrainResult<()> {
        let (chunk_width, chunk_length) = self.decoder.chunk_dimensions();
        let (chunk_width, chunk_length) = (chunk_width.max(1) as usize, chunk_length.max(1) as usize);

        let across = self.header.width.div_ceil(chunk_width);
        let down = self.header.length.div_ceil(chunk_length);

        for index in 0..across * down {
            let (width, length) = self.decoder.chunk_data_dimensions(index as u32);
            let region = RasterRegion::new(
                (index / across) * chunk_length,
                (index % across) * chunk_width,
                width as usize,
                length as usize,
            );

            let samples = self.decoder.read_chunk(index as u32)?;
            visit(region, samples)?;
        }

        Ok(())
    }
}

pub struct PngRaster {
    header: RasterHeader,
    image: DynamicImage,
}

impl PngRaster {
    pub fn open(path: &Path) -> TerrainResult<Self> {
        let image = PngTileCodec::decode_image(&fs::read(path)?)?;

        let channels = image.color().channel_count() as usize;
        let bits = image.color().bits_per_pixel() as usize / channels;

        let data_type = match bits {
            8 => DataType::UnsignedByte,
            16 => DataType::UnsignedShort,
            _ => DataType::Float,
        };

        Ok(Self {
            header: RasterHeader {
                path: path.to_path_buf(),
                width: image.width() as usize,
                length: image.height() as usize,
                samples_per_pixel: channels,
                data_type,
                missing: f32::NAN,
                pixel_scale: None,
                minimum: Vec::new(),
                maximum: Vec::new(),
            },
            image,
        })
    }
}

impl RasterSource for PngRaster {
    fn header(&self) -> &RasterHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RasterHeader {
        &mut self.header
    }

    fn read_chunks(
        &mut self,
        visit: &mut dyn FnMut(RasterRegion, DecodingResult) -> TerrainResult<()>,
    ) -> TerrainResult<()> {
        let image = &self.image;

        let samples = match (self.header.data_type, self.header.samples_per_pixel) {
            (DataType::UnsignedByte, 1) => DecodingResult::U8(image.to_luma8().into_raw()),
            (DataType::UnsignedByte, 2) => DecodingResult::U8(image.to_luma_alpha8().into_raw()),
            (DataType::UnsignedByte, 3) => DecodingResult::U8(image.to_rgb8().into_raw()),
            (DataType::UnsignedByte, _) => DecodingResult::U8(image.to_rgba8().into_raw()),
            (DataType::UnsignedShort, 1) => DecodingResult::U16(image.to_luma16().into_raw()),
            (DataType::UnsignedShort, 2) => {
                DecodingResult::U16(image.to_luma_alpha16().into_raw())
            }
            (DataType::UnsignedShort, 3) => DecodingResult::U16(image.to_rgb16().into_raw()),
            (DataType::UnsignedShort, _) => DecodingResult::U16(image.to_rgba16().into_raw()),
            (_, 3) => DecodingResult::F32(image.to_rgb32f().into_raw()),
            _ => DecodingResult::F32(image.to_rgba32f().into_raw()),
        };

        let region = RasterRegion::new(0, 0, self.header.width, self.header.length);
        visit(region, samples)
    }
}

/// A source raster a pyramid is built from.
pub enum RasterFile {
    Tiff(TiffRaster),
    Png(PngRaster),
}

impl RasterFile {
    pub fn open<P: AsRef<Path>>(path: P) -> TerrainResult<Self> {
        let path = path.as_ref();

        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase);

        let file = match extension.as_deref() {
            Some("tif" | "tiff") => RasterFile::Tiff(TiffRaster::open(path)?),
            Some("png") => RasterFile::Png(PngRaster::open(path)?),
            _ => return Err(TerrainError::UnsupportedFormat(path.to_path_buf())),
        };

        let header = file.header();
        info!(
            "Opened {} with {}x{} samples of type {}, {} per pixel.",
            header.path.display(),
            header.width,
            header.length,
            header.data_type,
            header.samples_per_pixel
        );

        Ok(file)
    }

    fn source(&self) -> &dyn RasterSource {
        match self {
            RasterFile::Tiff(file) => file,
            RasterFile::Png(file) => file,
        }
    }

    fn source_mut(&mut self) -> &mut dyn RasterSource {
        match self {
            RasterFile::Tiff(file) => file,
            RasterFile::Png(file) => file,
        }
    }

    pub fn header(&self) -> &RasterHeader {
        self.source().header()
    }

    pub fn path(&self) -> &Path {
        &self.header().path
    }

    pub fn width(&self) -> usize {
        self.header().width
    }

    pub fn length(&self) -> usize {
        self.header().length
    }

    pub fn samples_per_pixel(&self) -> usize {
        self.header().samples_per_pixel
    }

    pub fn data_type(&self) -> DataType {
        self.header().data_type
    }

    /// The sample value marking missing data, NaN if the file does not declare one.
    pub fn missing_value(&self) -> f32 {
        self.header().missing
    }

    pub fn set_missing_value(&mut self, missing: f32) {
        self.source_mut().header_mut().missing = missing;
    }

    pub fn pixel_scale(&self) -> Option<[f64; 2]> {
        self.header().pixel_scale
    }

    /// The per channel minimum of the samples seen by the last load.
    pub fn minimum_sample_value(&self) -> &[f64] {
        &self.header().minimum
    }

    /// The per channel maximum of the samples seen by the last load.
    pub fn maximum_sample_value(&self) -> &[f64] {
        &self.header().maximum
    }

    /// Scans the whole file for the per channel extrema, skipping NaN and missing samples.
    pub fn compute_extrema(&mut self) -> TerrainResult<()> {
        let header = self.header();
        let samples_per_pixel = header.samples_per_pixel.max(1);
        let missing = header.missing as f64;

        let mut minimum = vec![f64::MAX; samples_per_pixel];
        let mut maximum = vec![f64::MIN; samples_per_pixel];

        self.source_mut().read_chunks(&mut |_, samples| {
            macro_rules! extrema_gen {
                ($samples:expr) => {
                    accumulate_extrema(&$samples, missing, &mut minimum, &mut maximum)
                };
            }

            decoding_result_gen!(samples, extrema_gen);
            Ok(())
        })?;

        self.store_extrema(minimum, maximum);
        Ok(())
    }

    fn store_extrema(&mut self, minimum: Vec<f64>, maximum: Vec<f64>) {
        let header = self.source_mut().header_mut();
        header.minimum = minimum;
        header.maximum = maximum;
    }

    /// Converts the first channel to float and writes it into `raster` at `(top, left)`.
    ///
    /// See [`Raster::set_as_float`] for the handling of missing and out of range samples.
    pub fn load_as_float(
        &mut self,
        raster: &mut Raster,
        top: usize,
        left: usize,
        scale: f32,
        minimum: f64,
        maximum: f64,
    ) -> TerrainResult<()> {
        let header = self.header();
        let samples_per_pixel = header.samples_per_pixel.max(1);
        let missing = header.missing;

        let mut found_minimum = vec![f64::MAX; samples_per_pixel];
        let mut found_maximum = vec![f64::MIN; samples_per_pixel];

        self.source_mut().read_chunks(&mut |region, samples| {
            macro_rules! float_gen {
                ($samples:expr) => {{
                    accumulate_extrema(
                        &$samples,
                        missing as f64,
                        &mut found_minimum,
                        &mut found_maximum,
                    );

                    let channel = first_channel(&$samples, samples_per_pixel);
                    raster.set_as_float(
                        region.translated(top, left),
                        &channel,
                        scale,
                        minimum,
                        maximum,
                        missing,
                    )
                }};
            }

            decoding_result_gen!(samples, float_gen)
        })?;

        self.store_extrema(found_minimum, found_maximum);
        Ok(())
    }

    /// Maps the first channel onto gray values and writes it into `raster` at `(top, left)`.
    ///
    /// See [`Raster::set_as_gray`] for the mapping.
    pub fn load_as_gray(
        &mut self,
        raster: &mut Raster,
        top: usize,
        left: usize,
        minimum: f64,
        maximum: f64,
    ) -> TerrainResult<()> {
        let samples_per_pixel = self.samples_per_pixel().max(1);
        let missing = self.missing_value();

        self.source_mut().read_chunks(&mut |region, samples| {
            macro_rules! gray_gen {
                ($samples:expr) => {{
                    let channel = first_channel(&$samples, samples_per_pixel);
                    raster.set_as_gray(
                        region.translated(top, left),
                        &channel,
                        minimum,
                        maximum,
                        missing,
                    )
                }};
            }

            decoding_result_gen!(samples, gray_gen)
        })
    }

    /// Expands 8 or 16 bit gray, gray alpha, RGB or RGBA pixels to packed RGBA and writes them
    /// into the 32 bit `raster` at `(top, left)`.
    pub fn load_rgba(&mut self, raster: &mut Raster, top: usize, left: usize) -> TerrainResult<()> {
        let samples_per_pixel = self.samples_per_pixel().max(1);
        let data_type = self.data_type();

        self.source_mut().read_chunks(&mut |region, samples| {
            let bytes = match samples {
                DecodingResult::U8(samples) => samples,
                DecodingResult::U16(samples) => samples.iter().map(|&s| (s >> 8) as u8).collect(),
                _ => return Err(TerrainError::UnsupportedDataType(data_type)),
            };

            let pixels = bytes
                .chunks_exact(samples_per_pixel)
                .map(|pixel| u32::from_ne_bytes(expand_to_rgba(pixel)))
                .collect::<Vec<u32>>();

            raster.set_region(region.translated(top, left), &pixels)
        })?;

        self.store_extrema(vec![0.0; samples_per_pixel], vec![255.0; samples_per_pixel]);
        Ok(())
    }
}

fn first_channel<T: Sample>(samples: &[T], samples_per_pixel: usize) -> Vec<T> {
    samples.iter().step_by(samples_per_pixel).copied().collect()
}

fn accumulate_extrema<T: Sample>(
    samples: &[T],
    missing: f64,
    minimum: &mut [f64],
    maximum: &mut [f64],
) {
    let channels = minimum.len();

    for (index, &sample) in samples.iter().enumerate() {
        let value = sample.as_f64();

        if sample.is_nan() || value == missing {
            continue;
        }

        let channel = index % channels;
        minimum[channel] = minimum[channel].min(value);
        maximum[channel] = maximum[channel].max(value);
    }
}

fn expand_to_rgba(pixel: &[u8]) -> [u8; 4] {
    match *pixel {
        [gray] => [gray, gray, gray, u8::MAX],
        [gray, alpha] => [gray, gray, gray, alpha],
        [red, green, blue] => [red, green, blue, u8::MAX],
        [red, green, blue, alpha, ..] => [red, green, blue, alpha],
        [] => [0; 4],
    }
}
