use crate::raster::DataType;
use bytemuck::Pod;
use num::{NumCast, ToPrimitive};

/// A numeric element stored in a [`Raster`](crate::raster::Raster).
pub trait Sample: Pod + NumCast + PartialOrd + Default + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    fn is_nan(self) -> bool;

    /// Converts the mean of a kernel back to a sample, rounding to the nearest integer for
    /// integer types.
    fn from_mean(mean: f64) -> Self;

    #[inline]
    fn as_f64(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }
}

macro_rules! impl_integer_sample {
    ($ty:ty, $data_type:ident) => {
        impl Sample for $ty {
            const DATA_TYPE: DataType = DataType::$data_type;

            #[inline]
            fn is_nan(self) -> bool {
                false
            }

            #[inline]
            fn from_mean(mean: f64) -> Self {
                num::cast((mean + 0.5).floor()).unwrap_or_default()
            }
        }
    };
}

macro_rules! impl_float_sample {
    ($ty:ty, $data_type:ident) => {
        impl Sample for $ty {
            const DATA_TYPE: DataType = DataType::$data_type;

            #[inline]
            fn is_nan(self) -> bool {
                <$ty>::is_nan(self)
            }

            #[inline]
            fn from_mean(mean: f64) -> Self {
                mean as $ty
            }
        }
    };
}

impl_integer_sample!(i8, Byte);
impl_integer_sample!(u8, UnsignedByte);
impl_integer_sample!(i16, Short);
impl_integer_sample!(u16, UnsignedShort);
impl_integer_sample!(i32, Integer);
impl_integer_sample!(u32, UnsignedInteger);
impl_integer_sample!(i64, Long);
impl_integer_sample!(u64, UnsignedLong);
impl_float_sample!(f32, Float);
impl_float_sample!(f64, Double);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_means_round_to_nearest() {
        assert_eq!(u8::from_mean(2.5), 3);
        assert_eq!(u8::from_mean(2.49), 2);
        assert_eq!(i16::from_mean(-2.5), -2);
        assert_eq!(i32::from_mean(-2.51), -3);
        assert_eq!(u8::from_mean(300.0), 0);
        assert_eq!(u64::from_mean(1e12 + 0.5), 1_000_000_000_001);
        assert_eq!(u64::DATA_TYPE.bytes_per_sample(), 8);
    }

    #[test]
    fn float_means_are_exact() {
        assert_eq!(f32::from_mean(0.1f32 as f64), 0.1);
        assert!(Sample::is_nan(f32::NAN));
        assert!(!Sample::is_nan(7u16));
    }
}
