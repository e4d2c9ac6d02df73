//! Full resolution rasters kept in memory mapped scratch storage.

mod mapped_buffer;
mod sample;

pub use crate::raster::{
    mapped_buffer::{MultiMappedBuffer, MAX_SEGMENT_BYTES},
    sample::Sample,
};

use crate::result::{TerrainError, TerrainResult};
use bytemuck::Zeroable;
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, str::FromStr};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
    Integer,
    UnsignedInteger,
    Long,
    UnsignedLong,
    Float,
    Double,
    #[default]
    Unknown,
}

impl DataType {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            DataType::Byte | DataType::UnsignedByte => 1,
            DataType::Short | DataType::UnsignedShort => 2,
            DataType::Integer | DataType::UnsignedInteger | DataType::Float => 4,
            DataType::Long | DataType::UnsignedLong | DataType::Double => 8,
            DataType::Unknown => 0,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for DataType {
    type Err = TerrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Byte" => DataType::Byte,
            "UnsignedByte" => DataType::UnsignedByte,
            "Short" => DataType::Short,
            "UnsignedShort" => DataType::UnsignedShort,
            "Integer" => DataType::Integer,
            "UnsignedInteger" => DataType::UnsignedInteger,
            "Long" => DataType::Long,
            "UnsignedLong" => DataType::UnsignedLong,
            "Float" => DataType::Float,
            "Double" => DataType::Double,
            "Unknown" => DataType::Unknown,
            _ => return Err(TerrainError::UnsupportedDataType(DataType::Unknown)),
        })
    }
}

/// Expands `$gen!(T)` with the sample type matching the runtime [`DataType`].
macro_rules! data_type_gen {
    ($data_type:expr, $gen:ident) => {
        match $data_type {
            $crate::raster::DataType::Byte => $gen!(i8),
            $crate::raster::DataType::UnsignedByte => $gen!(u8),
            $crate::raster::DataType::Short => $gen!(i16),
            $crate::raster::DataType::UnsignedShort => $gen!(u16),
            $crate::raster::DataType::Integer => $gen!(i32),
            $crate::raster::DataType::UnsignedInteger => $gen!(u32),
            $crate::raster::DataType::Long => $gen!(i64),
            $crate::raster::DataType::UnsignedLong => $gen!(u64),
            $crate::raster::DataType::Float => $gen!(f32),
            $crate::raster::DataType::Double => $gen!(f64),
            $crate::raster::DataType::Unknown => {
                return Err($crate::result::TerrainError::UnsupportedDataType(
                    $crate::raster::DataType::Unknown,
                ))
            }
        }
    };
}

pub(crate) use data_type_gen;

/// A rectangular window of a raster, in samples.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RasterRegion {
    pub top: usize,
    pub left: usize,
    pub width: usize,
    pub length: usize,
}

impl RasterRegion {
    pub fn new(top: usize, left: usize, width: usize, length: usize) -> Self {
        Self {
            top,
            left,
            width,
            length,
        }
    }

    #[inline]
    pub fn sample_count(&self) -> usize {
        self.width * self.length
    }

    /// The same window moved by `top` rows and `left` columns.
    pub fn translated(self, top: usize, left: usize) -> Self {
        Self {
            top: self.top + top,
            left: self.left + left,
            ..self
        }
    }
}

/// A width x length grid of samples of a single [`DataType`].
///
/// The samples are kept in native byte order inside a [`MultiMappedBuffer`], so rasters larger
/// than the address space of a single mapping are supported.
pub struct Raster {
    width: usize,
    length: usize,
    data_type: DataType,
    buffer: MultiMappedBuffer,
    minimum: Vec<f64>,
    maximum: Vec<f64>,
}

impl Raster {
    pub fn new(
        directory: &Path,
        width: usize,
        length: usize,
        data_type: DataType,
    ) -> TerrainResult<Self> {
        Self::with_segment_size(directory, width, length, data_type, MAX_SEGMENT_BYTES)
    }

    pub fn with_segment_size(
        directory: &Path,
        width: usize,
        length: usize,
        data_type: DataType,
        max_segment_bytes: usize,
    ) -> TerrainResult<Self> {
        if data_type == DataType::Unknown {
            return Err(TerrainError::UnsupportedDataType(data_type));
        }

        let buffer = MultiMappedBuffer::with_segment_size(
            directory,
            width * data_type.bytes_per_sample(),
            length,
            max_segment_bytes,
        )?;

        Ok(Self {
            width,
            length,
            data_type,
            buffer,
            minimum: Vec::new(),
            maximum: Vec::new(),
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        self.data_type.bytes_per_sample()
    }

    /// The per channel minimum found by [`Raster::compute_min_max`].
    pub fn minimum(&self) -> &[f64] {
        &self.minimum
    }

    /// The per channel maximum found by [`Raster::compute_min_max`].
    pub fn maximum(&self) -> &[f64] {
        &self.maximum
    }

    pub fn buffer(&self) -> &MultiMappedBuffer {
        &self.buffer
    }

    fn check_type<T: Sample>(&self) -> TerrainResult<()> {
        if T::DATA_TYPE == self.data_type {
            Ok(())
        } else {
            Err(TerrainError::UnsupportedDataType(T::DATA_TYPE))
        }
    }

    fn check_region(&self, region: RasterRegion) -> TerrainResult<()> {
        if region.left + region.width > self.width || region.top + region.length > self.length {
            Err(TerrainError::InvalidRegion(
                region.width,
                region.length,
                region.left,
                region.top,
            ))
        } else {
            Ok(())
        }
    }

    /// Reads `into.len()` samples of `row`, starting at `column`.
    pub fn get_row<T: Sample>(&self, row: usize, column: usize, into: &mut [T]) -> TerrainResult<()> {
        self.check_type::<T>()?;
        self.buffer.get(
            row,
            column * self.bytes_per_sample(),
            bytemuck::cast_slice_mut(into),
        )
    }

    /// Writes `from.len()` samples to `row`, starting at `column`.
    pub fn set_row<T: Sample>(&mut self, row: usize, column: usize, from: &[T]) -> TerrainResult<()> {
        self.check_type::<T>()?;
        let offset = column * self.bytes_per_sample();
        self.buffer.set(row, offset, bytemuck::cast_slice(from))
    }

    /// Reads the samples of a region in row major order.
    pub fn get_region<T: Sample>(&self, region: RasterRegion) -> TerrainResult<Vec<T>> {
        self.check_region(region)?;

        let mut samples = vec![T::zeroed(); region.sample_count()];

        for (row, chunk) in samples.chunks_exact_mut(region.width.max(1)).enumerate() {
            self.get_row(region.top + row, region.left, chunk)?;
        }

        Ok(samples)
    }

    /// Writes the samples of a region given in row major order.
    pub fn set_region<T: Sample>(&mut self, region: RasterRegion, samples: &[T]) -> TerrainResult<()> {
        self.check_region(region)?;

        if samples.len() != region.sample_count() {
            return Err(TerrainError::BufferSize {
                expected: region.sample_count(),
                actual: samples.len(),
            });
        }

        for (row, chunk) in samples.chunks_exact(region.width.max(1)).enumerate() {
            self.set_row(region.top + row, region.left, chunk)?;
        }

        Ok(())
    }

    /// Sets every sample to `value`.
    pub fn fill<T: Sample>(&mut self, value: T) -> TerrainResult<()> {
        self.check_type::<T>()?;

        let row = vec![value; self.width];
        self.buffer.fill_rows(bytemuck::cast_slice(&row))
    }

    /// The mean of the `kernel` x `kernel` block with its top left corner at `(row, column)`.
    pub fn mean<T: Sample>(&self, row: usize, column: usize, kernel: usize) -> TerrainResult<T> {
        let mut samples = vec![T::zeroed(); kernel];
        let mut sum = 0.0;

        for r in row..row + kernel {
            self.get_row(r, column, &mut samples)?;
            sum += samples.iter().map(|&sample| sample.as_f64()).sum::<f64>();
        }

        Ok(T::from_mean(sum / (kernel * kernel) as f64))
    }

    /// The per channel mean of a `kernel` x `kernel` block of packed RGBA samples.
    pub fn mean_rgba(&self, row: usize, column: usize, kernel: usize) -> TerrainResult<[u8; 4]> {
        let mut bytes = vec![0u8; kernel * self.bytes_per_sample()];
        let mut sum = [0u32; 4];

        for r in row..row + kernel {
            self.buffer
                .get(r, column * self.bytes_per_sample(), &mut bytes)?;

            for pixel in bytes.chunks_exact(4) {
                for (channel, &value) in sum.iter_mut().zip(pixel) {
                    *channel += value as u32;
                }
            }
        }

        let count = (kernel * kernel) as u32;
        Ok(sum.map(|channel| (channel / count) as u8))
    }

    /// Reads a region reduced by the box filter of size `kernel`, one output sample per block.
    pub fn get_resampled<T: Sample>(
        &self,
        region: RasterRegion,
        kernel: usize,
    ) -> TerrainResult<Vec<T>> {
        self.check_type::<T>()?;
        self.check_region(region)?;

        let kernel = kernel.max(1);
        let mut samples = Vec::with_capacity(region.sample_count() / (kernel * kernel));

        for row in (region.top..region.top + region.length).step_by(kernel) {
            for column in (region.left..region.left + region.width).step_by(kernel) {
                samples.push(self.mean::<T>(row, column, kernel)?);
            }
        }

        Ok(samples)
    }

    /// Like [`Raster::get_resampled`], but averages packed RGBA samples channel by channel.
    pub fn get_resampled_rgba(
        &self,
        region: RasterRegion,
        kernel: usize,
    ) -> TerrainResult<Vec<[u8; 4]>> {
        if self.bytes_per_sample() != 4 {
            return Err(TerrainError::UnsupportedDataType(self.data_type));
        }
        self.check_region(region)?;

        let kernel = kernel.max(1);
        let mut pixels = Vec::with_capacity(region.sample_count() / (kernel * kernel));

        for row in (region.top..region.top + region.length).step_by(kernel) {
            for column in (region.left..region.left + region.width).step_by(kernel) {
                pixels.push(self.mean_rgba(row, column, kernel)?);
            }
        }

        Ok(pixels)
    }

    /// Converts source samples to float and stores them in this float raster.
    ///
    /// NaN, missing and out of range samples become NaN, everything else is multiplied by `scale`.
    pub fn set_as_float<S: Sample>(
        &mut self,
        region: RasterRegion,
        source: &[S],
        scale: f32,
        minimum: f64,
        maximum: f64,
        missing: f32,
    ) -> TerrainResult<()> {
        let missing = missing as f64;

        let samples = source
            .iter()
            .map(|&sample| {
                let value = sample.as_f64();

                if sample.is_nan() || value == missing || value < minimum || value > maximum {
                    f32::NAN
                } else {
                    value as f32 * scale
                }
            })
            .collect::<Vec<f32>>();

        self.set_region(region, &samples)
    }

    /// Maps source samples from `[minimum, maximum]` onto the gray values `1..=255` and stores
    /// them in this byte raster, reserving `0` for missing and out of range samples.
    pub fn set_as_gray<S: Sample>(
        &mut self,
        region: RasterRegion,
        source: &[S],
        minimum: f64,
        maximum: f64,
        missing: f32,
    ) -> TerrainResult<()> {
        let missing = missing as f64;
        let range = maximum - minimum;

        let samples = source
            .iter()
            .map(|&sample| {
                let value = sample.as_f64();

                if sample.is_nan() || value == missing || value < minimum || value > maximum {
                    0
                } else {
                    (254.0 * (value - minimum) / range + 1.0) as u8
                }
            })
            .collect::<Vec<u8>>();

        self.set_region(region, &samples)
    }

    /// Scans all samples for the extrema of each of the `samples_per_pixel` interleaved channels,
    /// ignoring NaN and `missing` samples.
    pub fn compute_min_max(&mut self, samples_per_pixel: usize, missing: f32) -> TerrainResult<()> {
        macro_rules! min_max_gen {
            ($ty:ty) => {
                self.min_max::<$ty>(samples_per_pixel.max(1), missing)?
            };
        }

        let (minimum, maximum) = data_type_gen!(self.data_type, min_max_gen);
        self.minimum = minimum;
        self.maximum = maximum;

        Ok(())
    }

    fn min_max<T: Sample>(
        &self,
        samples_per_pixel: usize,
        missing: f32,
    ) -> TerrainResult<(Vec<f64>, Vec<f64>)> {
        let missing = missing as f64;
        let mut minimum = vec![f64::MAX; samples_per_pixel];
        let mut maximum = vec![f64::MIN; samples_per_pixel];
        let mut samples = vec![T::zeroed(); self.width];

        for row in 0..self.length {
            self.get_row(row, 0, &mut samples)?;

            for (index, &sample) in samples.iter().enumerate() {
                let value = sample.as_f64();

                if sample.is_nan() || value == missing {
                    continue;
                }

                let channel = index % samples_per_pixel;
                minimum[channel] = minimum[channel].min(value);
                maximum[channel] = maximum[channel].max(value);
            }
        }

        Ok((minimum, maximum))
    }

    /// Replaces missing and out of range samples of this float raster with NaN.
    pub fn set_missing_values_to_nan(
        &mut self,
        missing: f32,
        minimum: Option<f64>,
        maximum: Option<f64>,
    ) -> TerrainResult<()> {
        let mut samples = vec![0.0f32; self.width];

        for row in 0..self.length {
            self.get_row(row, 0, &mut samples)?;

            for sample in &mut samples {
                let value = *sample as f64;

                if (!missing.is_nan() && *sample == missing)
                    || minimum.is_some_and(|minimum| value < minimum)
                    || maximum.is_some_and(|maximum| value > maximum)
                {
                    *sample = f32::NAN;
                }
            }

            self.set_row(row, 0, &samples)?;
        }

        Ok(())
    }

    /// Computes a neutral elevation for missing samples along the border of the valid data.
    ///
    /// The result is the minimum of the first valid sample of every row, scanning inward from the
    /// left and the right edge, and of the first valid samples found scanning inward row by row
    /// from the top and the bottom edge.
    pub fn compute_edge_fill(&self) -> TerrainResult<f32> {
        self.check_type::<f32>()?;

        let mut edge_fill = f32::MAX;
        let mut samples = vec![0.0f32; self.width];

        for row in 0..self.length {
            self.get_row(row, 0, &mut samples)?;

            if let Some(&value) = samples.iter().find(|value| !value.is_nan()) {
                edge_fill = edge_fill.min(value);
            }
            if let Some(&value) = samples.iter().rev().find(|value| !value.is_nan()) {
                edge_fill = edge_fill.min(value);
            }
        }

        edge_fill = edge_fill.min(self.scan_rows(0..self.length)?);
        edge_fill = edge_fill.min(self.scan_rows((0..self.length).rev())?);

        Ok(edge_fill)
    }

    /// Walks rows in the given order, taking the minimum over samples that become valid where the
    /// previous row was missing, until a row with valid data is fully covered by its successor.
    fn scan_rows(&self, mut rows: impl Iterator<Item = usize>) -> TerrainResult<f32> {
        let mut edge_fill = f32::MAX;
        let mut previous = vec![0.0f32; self.width];
        let mut current = vec![0.0f32; self.width];
        let mut found = false;

        let Some(first) = rows.next() else {
            return Ok(edge_fill);
        };
        self.get_row(first, 0, &mut previous)?;

        for row in rows {
            self.get_row(row, 0, &mut current)?;
            let mut done = true;

            for (&before, &after) in previous.iter().zip(&current) {
                if before.is_nan() {
                    if !after.is_nan() {
                        edge_fill = edge_fill.min(after);
                        done = false;
                        found = true;
                    }
                } else {
                    found = true;

                    if after.is_nan() {
                        done = false;
                    }
                }
            }

            std::mem::swap(&mut previous, &mut current);

            if found && done {
                break;
            }
        }

        Ok(edge_fill)
    }

    pub fn flush(&self) -> TerrainResult<()> {
        self.buffer.flush()
    }

    /// Releases the scratch storage of the raster.
    pub fn dispose(self) -> TerrainResult<()> {
        self.buffer.dispose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{seq::SliceRandom, Rng};

    fn scratch_raster(width: usize, length: usize, data_type: DataType) -> (tempfile::TempDir, Raster) {
        let dir = tempfile::tempdir().unwrap();
        let raster = Raster::new(dir.path(), width, length, data_type).unwrap();
        (dir, raster)
    }

    fn row_round_trip<T: Sample + fmt::Debug>(value: T) {
        let (dir, mut raster) = scratch_raster(6, 5, T::DATA_TYPE);
        let row = vec![value; 6];

        raster.set_row(3, 0, &row).unwrap();

        let mut read = vec![T::zeroed(); 6];
        raster.get_row(3, 0, &mut read).unwrap();
        assert_eq!(read, row);

        raster.dispose().unwrap();
        drop(dir);
    }

    #[test]
    fn rows_round_trip_for_every_type() {
        row_round_trip(-7i8);
        row_round_trip(200u8);
        row_round_trip(-1234i16);
        row_round_trip(60000u16);
        row_round_trip(-70000i32);
        row_round_trip(4_000_000_000u32);
        row_round_trip(-(1i64 << 40));
        row_round_trip(1.5f32);
        row_round_trip(-2.25f64);
    }

    #[test]
    fn rows_span_several_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut raster =
            Raster::with_segment_size(dir.path(), 4, 9, DataType::Integer, 32).unwrap();
        assert_eq!(raster.buffer().segment_count(), 5);

        let samples = (0..36).collect::<Vec<i32>>();
        raster
            .set_region(RasterRegion::new(0, 0, 4, 9), &samples)
            .unwrap();

        let region = raster
            .get_region::<i32>(RasterRegion::new(1, 1, 2, 7))
            .unwrap();
        assert_eq!(region[..4], [5, 6, 9, 10]);
        assert_eq!(region.len(), 14);

        raster.dispose().unwrap();
    }

    #[test]
    fn mismatched_type_and_region_fail() {
        let (_dir, mut raster) = scratch_raster(4, 4, DataType::Float);

        assert!(raster.set_row(0, 0, &[1u8; 4]).is_err());
        assert!(raster
            .get_region::<f32>(RasterRegion::new(2, 2, 3, 1))
            .is_err());
        assert!(raster
            .set_region(RasterRegion::new(0, 0, 2, 2), &[0.0f32; 3])
            .is_err());

        raster.dispose().unwrap();
    }

    #[test]
    fn mean_of_constant_block_is_exact() {
        let (_dir, mut raster) = scratch_raster(8, 8, DataType::Float);
        raster.fill(0.1f32).unwrap();
        assert_eq!(raster.mean::<f32>(2, 2, 4).unwrap(), 0.1);
        raster.dispose().unwrap();

        let (_dir, mut raster) = scratch_raster(8, 8, DataType::Short);
        raster.fill(-3i16).unwrap();
        assert_eq!(raster.mean::<i16>(0, 4, 4).unwrap(), -3);
        raster.dispose().unwrap();
    }

    #[test]
    fn resampling_rounds_integer_means() {
        let (_dir, mut raster) = scratch_raster(4, 2, DataType::UnsignedByte);
        raster
            .set_region(RasterRegion::new(0, 0, 4, 2), &[1u8, 2, 10, 10, 2, 2, 10, 11])
            .unwrap();

        let samples = raster
            .get_resampled::<u8>(RasterRegion::new(0, 0, 4, 2), 2)
            .unwrap();
        assert_eq!(samples, [2, 10]);

        raster.dispose().unwrap();
    }

    #[test]
    fn resampling_rgba_averages_channels() {
        let (_dir, mut raster) = scratch_raster(2, 2, DataType::UnsignedInteger);
        let pixels: [[u8; 4]; 4] = [
            [255, 0, 10, 255],
            [255, 0, 20, 255],
            [0, 3, 30, 255],
            [0, 0, 41, 0],
        ];
        raster
            .set_region(
                RasterRegion::new(0, 0, 2, 2),
                &pixels.map(u32::from_ne_bytes),
            )
            .unwrap();

        let mean = raster
            .get_resampled_rgba(RasterRegion::new(0, 0, 2, 2), 2)
            .unwrap();
        assert_eq!(mean, [[127, 0, 25, 191]]);

        raster.dispose().unwrap();
    }

    #[test]
    fn min_max_ignores_missing_in_any_order() {
        let mut rng = rand::rng();
        let mut values = (0..64).map(|_| rng.random_range(-100.0..100.0)).collect::<Vec<f32>>();
        values[3] = f32::NAN;
        values[17] = -9999.0;
        values[40] = f32::NAN;

        let expected_min = values
            .iter()
            .filter(|v| !v.is_nan() && **v != -9999.0)
            .fold(f64::MAX, |min, &v| min.min(v as f64));

        for _ in 0..3 {
            let (_dir, mut raster) = scratch_raster(8, 8, DataType::Float);
            raster
                .set_region(RasterRegion::new(0, 0, 8, 8), &values)
                .unwrap();
            raster.compute_min_max(1, -9999.0).unwrap();

            assert_eq!(raster.minimum(), [expected_min]);
            raster.dispose().unwrap();

            values.shuffle(&mut rng);
        }
    }

    #[test]
    fn min_max_per_channel() {
        let (_dir, mut raster) = scratch_raster(4, 1, DataType::UnsignedShort);
        raster.set_row(0, 0, &[1u16, 50, 3, 40]).unwrap();
        raster.compute_min_max(2, f32::NAN).unwrap();

        assert_eq!(raster.minimum(), [1.0, 40.0]);
        assert_eq!(raster.maximum(), [3.0, 50.0]);

        raster.dispose().unwrap();
    }

    #[test]
    fn convert_to_float_and_gray() {
        let source = [0i16, 5, 10, -32768];
        let region = RasterRegion::new(0, 0, 4, 1);

        let (_dir, mut raster) = scratch_raster(4, 1, DataType::Float);
        raster
            .set_as_float(region, &source, 2.0, 0.0, 8.0, -32768.0)
            .unwrap();
        let floats = raster.get_region::<f32>(region).unwrap();
        assert_eq!(floats[..2], [0.0, 10.0]);
        assert!(floats[2].is_nan() && floats[3].is_nan());
        raster.dispose().unwrap();

        let (_dir, mut raster) = scratch_raster(4, 1, DataType::UnsignedByte);
        raster
            .set_as_gray(region, &source, 0.0, 10.0, -32768.0)
            .unwrap();
        assert_eq!(raster.get_region::<u8>(region).unwrap(), [1, 128, 255, 0]);
        raster.dispose().unwrap();
    }

    #[test]
    fn missing_values_become_nan() {
        let (_dir, mut raster) = scratch_raster(4, 1, DataType::Float);
        raster.set_row(0, 0, &[-1.0f32, 0.0, 5.0, 11.0]).unwrap();
        raster
            .set_missing_values_to_nan(-1.0, Some(0.0), Some(10.0))
            .unwrap();

        let samples = raster.get_region::<f32>(RasterRegion::new(0, 0, 4, 1)).unwrap();
        assert!(samples[0].is_nan() && samples[3].is_nan());
        assert_eq!(samples[1..3], [0.0, 5.0]);

        raster.dispose().unwrap();
    }

    #[test]
    fn edge_fill_scans_inward() {
        let nan = f32::NAN;
        let (_dir, mut raster) = scratch_raster(4, 4, DataType::Float);
        raster
            .set_region(
                RasterRegion::new(0, 0, 4, 4),
                &[
                    nan, nan, nan, nan, //
                    nan, 7.0, 3.0, nan, //
                    nan, 5.0, 6.0, 8.0, //
                    nan, nan, 4.0, nan,
                ],
            )
            .unwrap();

        assert_eq!(raster.compute_edge_fill().unwrap(), 3.0);
        raster.dispose().unwrap();

        let (_dir, mut raster) = scratch_raster(3, 3, DataType::Float);
        raster.fill(2.5f32).unwrap();
        assert_eq!(raster.compute_edge_fill().unwrap(), 2.5);
        raster.dispose().unwrap();

        let (_dir, raster) = scratch_raster(3, 3, DataType::Integer);
        assert!(raster.compute_edge_fill().is_err());
        raster.dispose().unwrap();
    }
}
