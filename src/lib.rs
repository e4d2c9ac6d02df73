//! This crate streams height-field terrains of any size from storage to a renderer.
//!
//! # Background
//! There are two critical questions that each terrain streaming engine has to solve:
//!
//! ## How to store, manage and access the terrain data?
//! A landscape is made of several layers, e.g. the elevation and an orthophoto.
//! Their full resolution rasters can be far too large for memory, or even for a single
//! mapping of a file, so every layer is stored as a pyramid of small tiles instead.
//! Tiles are addressed by their [`QuadKey`](math::QuadKey), the path of quadrants from the
//! root of the pyramid to the tile.
//! Which tiles exist is recorded in the [`DepthTree`](formats::depth_tree::DepthTree), so that
//! the storage does not have to be probed.
//! The [`TileSource`](terrain_data::tile_source::TileSource) reads tiles from storage, and the
//! [`TileFactory`](terrain_data::tile_factory::TileFactory) turns them into meshes and
//! textures, which are kept in a memory budgeted [`TileCache`](terrain_data::tile_cache::TileCache).
//! See the [`terrain_data`] module for more information.
//!
//! ## How to best approximate the terrain geometry?
//! Only the tiles needed for the current view point are loaded. The
//! [`QuadTree`](quadtree::QuadTree) splits tiles whose pixels appear too large on screen
//! and merges them again once they appear small, and stitches the edges of adjacent tiles
//! with differing resolutions.
//! See the [`quadtree`] module for more information.
//!
//! Pyramids are built from full resolution rasters with the help of the [`raster`] module,
//! which keeps rasters of any size in memory mapped scratch files.

pub mod config;
pub mod formats;
pub mod math;
pub mod quadtree;
pub mod raster;
pub mod result;
pub mod terrain;
pub mod terrain_data;
pub mod terrain_view;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        config::StreamingConfig,
        math::{QuadKey, Quadrant},
        quadtree::{QuadTree, Side},
        raster::{DataType, Raster},
        result::{TerrainError, TerrainResult},
        terrain::Landscape,
        terrain_data::{
            raster_layer::RasterLayer,
            tile_cache::TileCache,
            tile_factory::{TerrainTile, TileFactory},
            tile_source::{FileSystemTileSource, TileSource},
            LayerInfo, LayerType, Tile,
        },
        terrain_view::{PerspectiveView, RenderEvent, ViewPoint},
    };
}
