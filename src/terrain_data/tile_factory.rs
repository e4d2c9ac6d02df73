use crate::{
    config::StreamingConfig,
    math::{QuadKey, Quadrant},
    raster::DataType,
    result::TerrainResult,
    terrain_data::{
        raster_layer::RasterLayer,
        tile_cache::{cache_key, CacheSlot, TileCache},
        tile_loader::{LoadEvent, TileLoader},
        tile_mesh::{MeshStyle, TileMesh},
        tile_source::TileSource,
        TileTexture,
    },
};
use bevy::{
    log::{error, warn},
    math::DVec3,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

/// A renderable tile: the mesh built from the base layer and one texture per layer.
#[derive(Debug)]
pub struct TerrainTile {
    pub key: QuadKey,
    /// The offset of the tile center from the center of its parent.
    pub offset: DVec3,
    /// The center of the tile relative to the center of the terrain.
    pub center: DVec3,
    pub pixel_width: f64,
    pub pixel_length: f64,
    /// The estimated memory of the tile in bytes.
    pub cost: usize,
    mesh: RwLock<TileMesh>,
    textures: Vec<Option<Arc<TileTexture>>>,
    /// Bound instead of the layer textures while layers are disabled.
    disabled_textures: Vec<Option<Arc<TileTexture>>>,
    layers_enabled: AtomicBool,
}

impl TerrainTile {
    pub fn mesh(&self) -> RwLockReadGuard<'_, TileMesh> {
        self.mesh.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mesh_mut(&self) -> RwLockWriteGuard<'_, TileMesh> {
        self.mesh.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The textures to bind by texture unit, `None` for units without a layer.
    ///
    /// While layers are disabled, only the empty texture is bound to the first unit.
    pub fn textures(&self) -> &[Option<Arc<TileTexture>>] {
        if self.layers_enabled() {
            &self.textures
        } else {
            &self.disabled_textures
        }
    }

    /// The textures of the layers, regardless of whether they are enabled.
    pub fn layer_textures(&self) -> &[Option<Arc<TileTexture>>] {
        &self.textures
    }

    pub fn layers_enabled(&self) -> bool {
        self.layers_enabled.load(Ordering::Relaxed)
    }

    fn set_layers_enabled(&self, enabled: bool) {
        self.layers_enabled.store(enabled, Ordering::Relaxed);
    }
}

struct FactoryShared {
    source: Arc<dyn TileSource>,
    base_layer: RasterLayer,
    layers: Vec<Option<RasterLayer>>,
    cache: TileCache<TerrainTile>,
    style: RwLock<MeshStyle>,
    tile_width: usize,
    tile_length: usize,
    terrain_width: f64,
    terrain_length: f64,
    bytes_per_tile: usize,
    empty_texture: Arc<TileTexture>,
    transparent_texture: Arc<TileTexture>,
    layers_enabled: AtomicBool,
}

impl FactoryShared {
    fn style(&self) -> RwLockReadGuard<'_, MeshStyle> {
        self.style.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache_key(&self, key: &QuadKey) -> String {
        cache_key(self.base_layer.name(), key)
    }

    /// The offset of a child tile from the center of its parent.
    fn quadrant_offset(&self, quadrant: Option<Quadrant>, pixel_width: f64, pixel_length: f64) -> DVec3 {
        let w = self.tile_width as f64 * pixel_width / 2.0;
        let l = self.tile_length as f64 * pixel_length / 2.0;

        match quadrant {
            Some(Quadrant::NorthWest) => DVec3::new(-w, l, 0.0),
            Some(Quadrant::NorthEast) => DVec3::new(w, l, 0.0),
            Some(Quadrant::SouthWest) => DVec3::new(-w, -l, 0.0),
            Some(Quadrant::SouthEast) => DVec3::new(w, -l, 0.0),
            None => DVec3::ZERO,
        }
    }

    fn texture(&self, layer: &RasterLayer, key: &QuadKey) -> Arc<TileTexture> {
        let data_type = layer.layer_type().tile_data_type();

        match self.source.tile(layer.name(), key, data_type) {
            Ok(Some(tile)) => tile
                .texture()
                .map_or_else(|| self.transparent_texture.clone(), Arc::new),
            Ok(None) => self.transparent_texture.clone(),
            Err(error) => {
                warn!("Unable to read tile {key} of layer {}: {error}", layer.name());
                self.transparent_texture.clone()
            }
        }
    }

    fn build_tile(
        &self,
        key: &QuadKey,
        pixel_width: f64,
        pixel_length: f64,
    ) -> TerrainResult<Option<TerrainTile>> {
        let Some(tile) = self
            .source
            .tile(self.base_layer.name(), key, DataType::Float)?
        else {
            return Ok(None);
        };

        let mesh = {
            let style = self.style();

            match tile.elevations() {
                Some(samples) => TileMesh::new(
                    samples,
                    tile.columns,
                    tile.rows,
                    pixel_width,
                    pixel_length,
                    &style,
                )?,
                None => TileMesh::empty(
                    self.tile_width + 1,
                    self.tile_length + 1,
                    pixel_width,
                    pixel_length,
                    &style,
                ),
            }
        };

        let textures = self
            .layers
            .iter()
            .enumerate()
            .map(|(unit, layer)| match layer {
                Some(_) if mesh.is_empty() => Some(self.empty_texture.clone()),
                Some(layer) => Some(self.texture(layer, key)),
                None if unit == 0 => Some(self.empty_texture.clone()),
                None => None,
            })
            .collect();

        let disabled_textures = (0..self.layers.len())
            .map(|unit| (unit == 0).then(|| self.empty_texture.clone()))
            .collect();

        Ok(Some(TerrainTile {
            key: key.clone(),
            offset: self.quadrant_offset(key.last_quadrant(), pixel_width, pixel_length),
            center: key.tile_center(self.terrain_width, self.terrain_length),
            pixel_width,
            pixel_length,
            cost: self.bytes_per_tile,
            mesh: RwLock::new(mesh),
            textures,
            disabled_textures,
            layers_enabled: AtomicBool::new(self.layers_enabled.load(Ordering::Relaxed)),
        }))
    }

    /// Builds the tile of a reserved key and fills in the reservation.
    fn load(&self, key: &QuadKey, pixel_width: f64, pixel_length: f64) -> Option<Arc<TerrainTile>> {
        let cache_key = self.cache_key(key);

        match self.build_tile(key, pixel_width, pixel_length) {
            Ok(Some(tile)) => {
                let cost = tile.cost;
                Some(self.cache.finalize(&cache_key, tile, cost))
            }
            Ok(None) => {
                self.cache.abandon(&cache_key);
                None
            }
            Err(error) => {
                error!(
                    "Unable to load tile {key} of layer {}: {error}",
                    self.base_layer.name()
                );
                self.cache.abandon(&cache_key);
                None
            }
        }
    }
}

/// Builds renderable tiles on demand and keeps them in a memory budgeted cache.
pub struct TileFactory {
    shared: Arc<FactoryShared>,
    loader: TileLoader,
}

impl TileFactory {
    /// Creates the factory of a landscape.
    ///
    /// `layers` holds the texture layers by texture unit.
    pub fn new(
        source: Arc<dyn TileSource>,
        base_layer: RasterLayer,
        layers: Vec<Option<RasterLayer>>,
        config: &StreamingConfig,
    ) -> Self {
        let pixel_scale = base_layer.pixel_scale(config);
        let tile_width = base_layer.tile_width;
        let tile_length = base_layer.tile_length;

        let bytes_per_tile = (tile_width * tile_length * 14 + 2 * tile_width + 2 * tile_length) * 4
            + layers
                .iter()
                .flatten()
                .map(RasterLayer::bytes_per_tile)
                .sum::<usize>();

        let style = MeshStyle {
            pixel_scale,
            fill_value: base_layer.fill_value(),
            surface_color: config.surface_color,
            missing_color: config.missing_color,
        };

        let shared = FactoryShared {
            source,
            terrain_width: base_layer.physical_width() * pixel_scale,
            terrain_length: base_layer.physical_length() * pixel_scale,
            base_layer,
            layers,
            cache: TileCache::new(config.cache_budget),
            style: RwLock::new(style),
            tile_width,
            tile_length,
            bytes_per_tile,
            empty_texture: Arc::new(TileTexture::empty()),
            transparent_texture: Arc::new(TileTexture::transparent()),
            layers_enabled: AtomicBool::new(config.layers_enabled),
        };

        Self {
            shared: Arc::new(shared),
            loader: TileLoader::new(config.worker_count),
        }
    }

    pub fn source(&self) -> &Arc<dyn TileSource> {
        &self.shared.source
    }

    pub fn base_layer(&self) -> &RasterLayer {
        &self.shared.base_layer
    }

    pub fn layers(&self) -> &[Option<RasterLayer>] {
        &self.shared.layers
    }

    pub fn cache(&self) -> &TileCache<TerrainTile> {
        &self.shared.cache
    }

    pub fn tile_width(&self) -> usize {
        self.shared.tile_width
    }

    pub fn tile_length(&self) -> usize {
        self.shared.tile_length
    }

    pub fn pixel_scale(&self) -> f64 {
        self.shared.style().pixel_scale
    }

    /// The width of the terrain in scaled world units.
    pub fn terrain_width(&self) -> f64 {
        self.shared.terrain_width
    }

    pub fn terrain_length(&self) -> f64 {
        self.shared.terrain_length
    }

    pub fn bytes_per_tile(&self) -> usize {
        self.shared.bytes_per_tile
    }

    /// The smallest elevation of the base layer.
    pub fn min_z(&self) -> f64 {
        self.shared
            .base_layer
            .minimum
            .first()
            .copied()
            .unwrap_or(0.0)
    }

    /// The pixel size of tiles at a level.
    pub fn pixel_size(&self, level: u32) -> (f64, f64) {
        let scale = 2f64.powi(level as i32);

        (
            self.shared.terrain_width / self.shared.tile_width as f64 / scale,
            self.shared.terrain_length / self.shared.tile_length as f64 / scale,
        )
    }

    /// Returns the tile if its mesh is available.
    ///
    /// Tiles that are not cached yet are reserved and then built on the calling thread if
    /// `wait` is set, in the background otherwise.
    pub fn get_node(
        &self,
        key: &QuadKey,
        pixel_width: f64,
        pixel_length: f64,
        wait: bool,
    ) -> Option<Arc<TerrainTile>> {
        let cache_key = self.shared.cache_key(key);

        match self.shared.cache.reserve(&cache_key) {
            CacheSlot::Ready(tile) => Some(tile),
            CacheSlot::Pending if wait => self.shared.cache.wait(&cache_key),
            CacheSlot::Pending => None,
            CacheSlot::Empty if wait => self.shared.load(key, pixel_width, pixel_length),
            CacheSlot::Empty => {
                let shared = self.shared.clone();
                let task_key = key.clone();

                self.loader.start_loading(key.clone(), move || {
                    shared.load(&task_key, pixel_width, pixel_length).is_some()
                });

                None
            }
        }
    }

    /// Returns a tile at the pixel size of its level, waiting for it to be built.
    pub fn get_tile(&self, key: &QuadKey) -> Option<Arc<TerrainTile>> {
        let (pixel_width, pixel_length) = self.pixel_size(key.level());
        self.get_node(key, pixel_width, pixel_length, true)
    }

    pub fn get_root(&self) -> Option<Arc<TerrainTile>> {
        self.get_tile(&QuadKey::root())
    }

    /// Whether the tiles below the key exist, since quads are always complete.
    pub fn children_exist(&self, key: &QuadKey) -> bool {
        self.shared
            .source
            .tile_exists(&key.child_quadrant(Quadrant::NorthWest))
    }

    /// Requests all four children of a tile, returning them only if all of them are available.
    pub fn get_children(
        &self,
        key: &QuadKey,
        parent_pixel_width: f64,
        parent_pixel_length: f64,
        wait: bool,
    ) -> Option<[Arc<TerrainTile>; 4]> {
        let pixel_width = parent_pixel_width / 2.0;
        let pixel_length = parent_pixel_length / 2.0;

        let children = Quadrant::ALL.map(|quadrant| {
            self.get_node(&key.child_quadrant(quadrant), pixel_width, pixel_length, wait)
        });

        match children {
            [Some(nw), Some(ne), Some(sw), Some(se)] => Some([nw, ne, sw, se]),
            _ => None,
        }
    }

    /// The outcomes of all background loads finished since the last call.
    pub fn poll_loaded(&self) -> Vec<LoadEvent> {
        self.loader.poll()
    }

    pub fn loader(&self) -> &TileLoader {
        &self.loader
    }

    pub fn surface_color(&self) -> [f32; 4] {
        self.shared.style().surface_color
    }

    /// Changes the color of valid samples of all new and cached meshes.
    pub fn set_surface_color(&self, color: [f32; 4]) {
        self.shared
            .style
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .surface_color = color;

        self.shared
            .cache
            .for_each_ready(|_, tile| tile.mesh_mut().set_surface_color(color));
    }

    pub fn layers_enabled(&self) -> bool {
        self.shared.layers_enabled.load(Ordering::Relaxed)
    }

    /// Shows or hides the layer textures of all new and cached tiles.
    pub fn set_layers_enabled(&self, enabled: bool) {
        self.shared.layers_enabled.store(enabled, Ordering::Relaxed);

        self.shared
            .cache
            .for_each_ready(|_, tile| tile.set_layers_enabled(enabled));
    }

    /// Drops all cached tiles of the base layer.
    pub fn clear(&self) {
        self.shared.cache.clear(self.shared.base_layer.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        formats::tile_image::PngTileCodec,
        terrain_data::{
            tile_source::{tests::write_landscape, FileSystemTileSource},
            LayerInfo, LayerType,
        },
    };
    use std::{fs, path::Path, str::FromStr};

    fn factory(dir: &Path, config: &StreamingConfig) -> TileFactory {
        let source = FileSystemTileSource::connect(dir).unwrap();
        source.layer_info().unwrap();

        let layer = |name: &str, layer_type| {
            RasterLayer::from_properties(
                LayerInfo::new(name, layer_type),
                &source.properties(name).unwrap(),
            )
            .unwrap()
        };

        let base_layer = layer("elevation", LayerType::Elevation);
        let gray = layer("gray", LayerType::GrayImage);

        TileFactory::new(Arc::new(source), base_layer, vec![Some(gray), None], config)
    }

    #[test]
    fn builds_root_tile() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 2, 5, 7.0);
        let factory = factory(dir.path(), &StreamingConfig::default());

        // two by two tiles of four pixels of one meter
        assert_eq!(factory.terrain_width(), 8.0);
        assert_eq!(factory.pixel_size(0), (2.0, 2.0));
        assert_eq!(factory.pixel_size(1), (1.0, 1.0));
        assert_eq!(
            factory.bytes_per_tile(),
            (4 * 4 * 14 + 16) * 4 + 5 * 5
        );

        let root = factory.get_root().unwrap();
        let mesh = root.mesh();

        assert!(!mesh.is_empty());
        assert_eq!(mesh.positions().len(), 25);
        assert_eq!(mesh.elevation(2, 2), 7.0);
        assert_eq!(root.offset, DVec3::ZERO);

        let textures = root.textures();
        assert_eq!(textures.len(), 2);
        assert_eq!(
            textures[0].as_ref().unwrap().format,
            crate::terrain_data::TextureFormat::Luminance
        );
        assert!(textures[1].is_none());
    }

    #[test]
    fn children_load_in_background() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 2, 5, 7.0);
        let factory = factory(dir.path(), &StreamingConfig::default());

        let root = QuadKey::root();
        assert!(factory.children_exist(&root));
        assert!(!factory.children_exist(&QuadKey::from_str("/1").unwrap()));

        assert!(factory.get_children(&root, 2.0, 2.0, false).is_none());

        let mut loaded = 0;
        while let Some(event) = factory.loader().wait_next() {
            assert!(matches!(event, LoadEvent::Loaded(_)));
            loaded += 1;
        }
        assert_eq!(loaded, 4);

        let children = factory.get_children(&root, 2.0, 2.0, false).unwrap();
        let north_west = &children[0];

        assert_eq!(north_west.pixel_width, 1.0);
        assert_eq!(north_west.offset, DVec3::new(-2.0, 2.0, 0.0));
        assert_eq!(north_west.center, DVec3::new(-2.0, 2.0, 0.0));

        // the gray layer has no data below the root
        let texture = north_west.textures()[0].as_ref().unwrap();
        assert_eq!(**texture, TileTexture::transparent());
    }

    #[test]
    fn missing_tiles_fail_and_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 2, 5, 7.0);
        let factory = factory(dir.path(), &StreamingConfig::default());

        let missing = QuadKey::from_str("/1/1").unwrap();
        assert!(factory.get_node(&missing, 0.5, 0.5, true).is_none());
        assert!(matches!(
            factory.cache().lookup(&cache_key("elevation", &missing)),
            CacheSlot::Empty
        ));
    }

    #[test]
    fn empty_tiles_get_empty_meshes() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 2, 5, 7.0);

        let nan = PngTileCodec::encode_float(5, 5, &[f32::NAN; 25]).unwrap();
        fs::write(dir.path().join("elevation/2/0.png"), nan).unwrap();
        fs::write(dir.path().join("elevation/3/0.png"), []).unwrap();

        let factory = factory(dir.path(), &StreamingConfig::default());

        for key in ["/2", "/3"] {
            let tile = factory.get_tile(&QuadKey::from_str(key).unwrap()).unwrap();

            assert!(tile.mesh().is_empty());
            assert_eq!(**tile.textures()[0].as_ref().unwrap(), TileTexture::empty());
        }
    }

    #[test]
    fn surface_color_updates_cached_meshes() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 2, 5, 7.0);
        let factory = factory(dir.path(), &StreamingConfig::default());

        let root = factory.get_root().unwrap();
        factory.set_surface_color([0.2, 0.4, 0.6, 1.0]);

        assert_eq!(root.mesh().colors()[0], [0.2, 0.4, 0.6, 1.0]);
        assert_eq!(factory.surface_color(), [0.2, 0.4, 0.6, 1.0]);
    }

    #[test]
    fn disabled_layers_bind_the_empty_texture() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 2, 5, 7.0);
        let factory = factory(dir.path(), &StreamingConfig::default());

        let root = factory.get_root().unwrap();
        assert!(root.layers_enabled());
        let gray = root.textures()[0].clone().unwrap();
        assert_eq!(gray.format, crate::terrain_data::TextureFormat::Luminance);
        assert_ne!(*gray, TileTexture::empty());

        factory.set_layers_enabled(false);
        assert!(!factory.layers_enabled());
        assert_eq!(**root.textures()[0].as_ref().unwrap(), TileTexture::empty());
        assert!(root.textures()[1].is_none());
        assert_eq!(root.layer_textures()[0].as_ref(), Some(&gray));

        // tiles built while disabled start disabled
        let child = factory.get_tile(&QuadKey::from_str("/4").unwrap()).unwrap();
        assert!(!child.layers_enabled());

        factory.set_layers_enabled(true);
        assert_eq!(root.textures()[0].as_ref(), Some(&gray));
        assert!(child.layers_enabled());
    }

    #[test]
    fn budget_bounds_cached_tiles() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 2, 5, 7.0);

        let unbounded = factory(dir.path(), &StreamingConfig::default());
        let config = StreamingConfig {
            cache_budget: unbounded.bytes_per_tile() * 2,
            ..Default::default()
        };
        let factory = factory(dir.path(), &config);

        for key in ["", "/1", "/2", "/3"] {
            factory.get_tile(&QuadKey::from_str(key).unwrap()).unwrap();
        }

        let stats = factory.cache().stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.evictions, 2);
        assert!(stats.resident_bytes <= config.cache_budget);
    }
}
