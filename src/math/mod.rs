mod quad_key;

pub use crate::math::quad_key::{QuadKey, Quadrant};
