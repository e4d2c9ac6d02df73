use crate::{
    config::StreamingConfig,
    math::QuadKey,
    quadtree::{QuadTree, TreeStats},
    result::{TerrainError, TerrainResult},
    terrain_data::{
        raster_layer::RasterLayer,
        tile_cache::CacheStats,
        tile_factory::TileFactory,
        tile_loader::LoadEvent,
        tile_source::{FileSystemTileSource, TileSource},
        LayerInfo, LayerType,
    },
    terrain_view::{RenderEvent, ViewPoint},
};
use async_channel::Receiver;
use bevy::{
    log::{debug, info},
    math::Vec3,
};
use std::{path::Path, sync::Arc};

/// A landscape opened for streaming.
///
/// Owns the tile source, the tile factory with its cache and worker threads, and the quadtree
/// of the view. Nothing is shared between landscapes.
pub struct Landscape {
    config: StreamingConfig,
    source: Arc<FileSystemTileSource>,
    factory: TileFactory,
    quadtree: QuadTree,
    events: Receiver<RenderEvent>,
}

impl Landscape {
    /// Opens the landscape directory, discovers its layers and loads the root tile.
    ///
    /// The first elevation layer defines the geometry, every image and field layer is assigned
    /// to the next texture unit in the order of discovery.
    pub fn open<P: AsRef<Path>>(path: P, config: StreamingConfig) -> TerrainResult<Self> {
        let source = Arc::new(FileSystemTileSource::connect(path)?);

        let mut base_layer = None;
        let mut layers = Vec::new();

        for (name, layer_type) in source.layer_info()? {
            let Some(properties) = source.properties(&name) else {
                continue;
            };

            let mut info = LayerInfo::new(&name, layer_type);

            match layer_type {
                LayerType::Elevation if base_layer.is_none() => {
                    base_layer = Some(RasterLayer::from_properties(info, &properties)?);
                }
                LayerType::ColorImage | LayerType::GrayImage | LayerType::Field => {
                    info.layer_number = Some(layers.len());
                    layers.push(Some(RasterLayer::from_properties(info, &properties)?));
                }
                _ => debug!("Layer {name} of type {layer_type} is not shown."),
            }
        }

        let base_layer = base_layer
            .ok_or_else(|| TerrainError::NoElevationLayer(source.landscape_path().to_path_buf()))?;

        if layers.is_empty() {
            layers.push(None);
        }

        info!(
            "Opened landscape {} with {} texture layers, {} levels of {}x{} tiles.",
            source.landscape_path().display(),
            layers.iter().flatten().count(),
            base_layer.number_of_levels,
            base_layer.tile_width,
            base_layer.tile_length
        );

        let factory = TileFactory::new(source.clone(), base_layer, layers, &config);
        let (sender, events) = async_channel::unbounded();
        let quadtree = QuadTree::new(&factory, config.cell_size, sender)?;

        Ok(Self {
            config,
            source,
            factory,
            quadtree,
            events,
        })
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn source(&self) -> &FileSystemTileSource {
        &self.source
    }

    pub fn factory(&self) -> &TileFactory {
        &self.factory
    }

    pub fn quadtree(&self) -> &QuadTree {
        &self.quadtree
    }

    pub fn base_layer(&self) -> &RasterLayer {
        self.factory.base_layer()
    }

    /// The texture layers by texture unit.
    pub fn layers(&self) -> &[Option<RasterLayer>] {
        self.factory.layers()
    }

    /// The changes of the shown meshes, to be applied by the owner of the scene graph.
    pub fn render_events(&self) -> &Receiver<RenderEvent> {
        &self.events
    }

    /// Adapts the level of detail to the view point without blocking.
    ///
    /// Children that are not cached yet are loaded in the background and picked up by a later
    /// update. Returns whether the shown tiles changed.
    pub fn update(&mut self, view: &impl ViewPoint) -> bool {
        for event in self.factory.poll_loaded() {
            if let LoadEvent::Failed(key) = event {
                debug!("Tile {key} could not be loaded.");
            }
        }

        self.apply(view, false)
    }

    /// Refines the level of detail for the view point until it is complete, loading all tiles
    /// on the calling thread.
    pub fn update_blocking(&mut self, view: &impl ViewPoint) -> bool {
        let mut changed = false;

        while self.apply(view, true) {
            changed = true;
        }

        changed
    }

    fn apply(&mut self, view: &impl ViewPoint, wait: bool) -> bool {
        let changed = self.quadtree.update(&self.factory, view, wait);

        if changed || self.quadtree.is_dirty() {
            self.quadtree.stitch();
        }

        changed
    }

    /// The elevation at a point relative to the center of the landscape.
    pub fn elevation(&self, x: f64, y: f64) -> f32 {
        self.quadtree.elevation(x, y)
    }

    pub fn elevation_nearest(&self, x: f64, y: f64) -> f32 {
        self.quadtree.elevation_nearest(x, y)
    }

    pub fn normal(&self, x: f64, y: f64) -> Option<Vec3> {
        self.quadtree.normal(x, y)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.quadtree.contains(x, y)
    }

    /// The deepest existing tile containing the point.
    pub fn locate(&self, x: f64, y: f64, max_level: Option<u32>) -> QuadKey {
        self.source.locate_best(
            x,
            y,
            self.factory.terrain_width(),
            self.factory.terrain_length(),
            max_level,
        )
    }

    /// The tile at exactly `level` containing the point, if it exists.
    pub fn locate_exact(&self, x: f64, y: f64, level: u32) -> Option<QuadKey> {
        self.source.locate_exact(
            x,
            y,
            self.factory.terrain_width(),
            self.factory.terrain_length(),
            level,
        )
    }

    pub fn set_surface_color(&mut self, color: [f32; 4]) {
        self.config.surface_color = color;
        self.factory.set_surface_color(color);
    }

    pub fn set_layers_enabled(&mut self, enabled: bool) {
        self.config.layers_enabled = enabled;
        self.factory.set_layers_enabled(enabled);
        self.quadtree.textures_changed();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.factory.cache().stats()
    }

    pub fn tree_stats(&self) -> TreeStats {
        self.quadtree.stats()
    }

    /// Waits until the depth tree has been stored.
    pub fn close(self) -> TerrainResult<()> {
        self.source.flush_depth_tree()
    }
}
