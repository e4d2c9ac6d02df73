//! The on-disk formats of a landscape.
//!
//! A landscape directory holds one directory per layer, each with a `layer.properties` file
//! ([`properties`]) and a pyramid of tile images ([`tile_image`]) addressed by quad key.
//! The existence of tiles is indexed by the [`depth_tree`], and pyramids are built from
//! source rasters ([`raster_file`]).

pub mod depth_tree;
pub mod properties;
pub mod raster_file;
pub mod tile_image;
