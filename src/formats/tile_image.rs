use crate::result::TerrainResult;
use image::{
    codecs::png::PngEncoder, DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat,
};

/// The raw samples of one tile image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedTile {
    pub width: u32,
    pub length: u32,
    /// The number of interleaved channels stored for every pixel.
    pub channels: u8,
    pub bytes_per_sample: u8,
    pub samples: Vec<u8>,
}

/// Turns stored tile payloads into raw samples.
pub trait TileDecoder: Send + Sync + 'static {
    /// The file extension of stored tiles.
    fn extension(&self) -> &'static str;

    fn decode(&self, encoded: &[u8]) -> TerrainResult<DecodedTile>;
}

/// Tiles stored as 8 bit PNG images.
///
/// Float tiles are stored as four channel images, where the channels of every pixel hold the
/// big endian bytes of the sample in the order alpha, blue, green, red.
#[derive(Clone, Copy, Debug, Default)]
pub struct PngTileCodec;

impl TileDecoder for PngTileCodec {
    fn extension(&self) -> &'static str {
        "png"
    }

    fn decode(&self, encoded: &[u8]) -> TerrainResult<DecodedTile> {
        let image = image::load_from_memory_with_format(encoded, ImageFormat::Png)?;

        let (width, length) = (image.width(), image.height());
        let channels = image.color().channel_count();

        let samples = match channels {
            1 => image.into_luma8().into_raw(),
            2 => image.into_luma_alpha8().into_raw(),
            3 => image.into_rgb8().into_raw(),
            _ => image.into_rgba8().into_raw(),
        };

        Ok(DecodedTile {
            width,
            length,
            channels: channels.min(4),
            bytes_per_sample: 1,
            samples,
        })
    }
}

impl PngTileCodec {
    pub fn encode_float(width: u32, length: u32, samples: &[f32]) -> TerrainResult<Vec<u8>> {
        let pixels = samples
            .iter()
            .flat_map(|sample| float_to_pixel(*sample))
            .collect::<Vec<u8>>();

        Self::encode(width, length, &pixels, ExtendedColorType::Rgba8)
    }

    pub fn encode_gray(width: u32, length: u32, samples: &[u8]) -> TerrainResult<Vec<u8>> {
        Self::encode(width, length, samples, ExtendedColorType::L8)
    }

    pub fn encode_rgba(width: u32, length: u32, pixels: &[[u8; 4]]) -> TerrainResult<Vec<u8>> {
        Self::encode(
            width,
            length,
            bytemuck::cast_slice(pixels),
            ExtendedColorType::Rgba8,
        )
    }

    fn encode(
        width: u32,
        length: u32,
        bytes: &[u8],
        color_type: ExtendedColorType,
    ) -> TerrainResult<Vec<u8>> {
        let mut encoded = Vec::new();
        PngEncoder::new(&mut encoded).write_image(bytes, width, length, color_type)?;
        Ok(encoded)
    }

    /// Decodes an image of any color type, used for source rasters rather than tiles.
    pub fn decode_image(encoded: &[u8]) -> TerrainResult<DynamicImage> {
        Ok(image::load_from_memory_with_format(encoded, ImageFormat::Png)?)
    }
}

/// The RGBA pixel storing a float sample.
#[inline]
pub fn float_to_pixel(sample: f32) -> [u8; 4] {
    let [a, b, g, r] = sample.to_be_bytes();
    [r, g, b, a]
}

/// The float sample stored in an RGBA pixel.
#[inline]
pub fn pixel_to_float(pixel: [u8; 4]) -> f32 {
    let [r, g, b, a] = pixel;
    f32::from_be_bytes([a, b, g, r])
}
