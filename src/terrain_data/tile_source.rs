use crate::{
    formats::{
        depth_tree::DepthTree,
        properties::Properties,
        tile_image::{PngTileCodec, TileDecoder},
    },
    math::QuadKey,
    raster::DataType,
    result::{TerrainError, TerrainResult},
    terrain_data::{LayerType, Tile},
};
use bevy::{
    log::{error, info, warn},
    tasks::{futures_lite::future, IoTaskPool, Task, TaskPool},
    utils::HashMap,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

const PROPERTIES_FILE: &str = "layer.properties";
const DEPTH_TREE_FILE: &str = "dert/depthtree.txt";
const SKIPPED_DIRECTORIES: [&str; 2] = ["subpyramid", "dert"];

/// The origin of the tiles of a landscape.
pub trait TileSource: Send + Sync + 'static {
    fn landscape_path(&self) -> &Path;

    /// Discovers the layers of the landscape.
    ///
    /// Discovering an elevation layer also prepares the depth tree, since the elevation layer
    /// defines which tiles exist.
    fn layer_info(&self) -> TerrainResult<Vec<(String, LayerType)>>;

    /// The `layer.properties` of a discovered layer.
    fn properties(&self, layer: &str) -> Option<Properties>;

    /// Whether a tile with the given key exists in the reference layer.
    fn tile_exists(&self, key: &QuadKey) -> bool;

    /// Loads the tile of a layer, `None` if it does not exist.
    fn tile(&self, layer: &str, key: &QuadKey, data_type: DataType) -> TerrainResult<Option<Tile>>;

    /// The deepest existing tile containing the point, see [`DepthTree::locate_best`].
    fn locate_best(&self, x: f64, y: f64, width: f64, length: f64, max_level: Option<u32>)
        -> QuadKey;

    /// The tile at exactly `level` containing the point, see [`DepthTree::locate_exact`].
    fn locate_exact(&self, x: f64, y: f64, width: f64, length: f64, level: u32)
        -> Option<QuadKey>;
}

/// Tiles stored in a landscape directory on the local file system.
///
/// Every layer is a directory holding a `layer.properties` file and one `0.png` per tile at
/// `<layer>/<quad key>/0.png`.
pub struct FileSystemTileSource {
    path: PathBuf,
    decoder: PngTileCodec,
    properties: RwLock<HashMap<String, Properties>>,
    reference_layer: RwLock<Option<String>>,
    depth_tree: RwLock<Option<Arc<DepthTree>>>,
    storing: Mutex<Option<Task<TerrainResult<()>>>>,
}

impl FileSystemTileSource {
    pub fn connect<P: AsRef<Path>>(location: P) -> TerrainResult<Self> {
        let path = location.as_ref().canonicalize()?;

        if !path.is_dir() {
            return Err(TerrainError::NotADirectory(path));
        }

        Ok(Self {
            path,
            decoder: PngTileCodec,
            properties: Default::default(),
            reference_layer: Default::default(),
            depth_tree: Default::default(),
            storing: Default::default(),
        })
    }

    fn layer_path(&self, layer: &str) -> String {
        format!("{}/{layer}", self.path.display())
    }

    fn tile_file(&self, layer: &str, key: &QuadKey) -> PathBuf {
        PathBuf::from(key.tile_path(&self.layer_path(layer), self.decoder.extension()))
    }

    fn depth_tree_file(&self) -> PathBuf {
        self.path.join(DEPTH_TREE_FILE)
    }

    pub fn depth_tree(&self) -> Option<Arc<DepthTree>> {
        self.depth_tree
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Loads the depth tree of the reference layer, or builds it by probing the file system.
    ///
    /// A freshly built tree is written to the landscape in the background.
    pub fn prepare_depth_tree(&self, layer: &str) -> Option<Arc<DepthTree>> {
        if let Some(tree) = self.depth_tree() {
            return Some(tree);
        }

        let file = self.depth_tree_file();

        let tree = match file.exists().then(|| DepthTree::load_file(&file)) {
            Some(Ok(tree)) => {
                info!("Loaded depth tree of {} tiles.", tree.node_count());
                Some(tree)
            }
            Some(Err(error)) => {
                warn!("Could not read depth tree {}: {error}", file.display());
                None
            }
            None => None,
        };

        let tree = match tree {
            Some(tree) => Arc::new(tree),
            None => {
                if !self.tile_file(layer, &QuadKey::root()).exists() {
                    return None;
                }

                info!("Filling depth tree. This may take a bit for large landscapes.");
                let tree = Arc::new(DepthTree::build(&|key| self.tile_file(layer, key).exists()));
                info!(
                    "Filled depth tree of {} tiles and {} levels.",
                    tree.node_count(),
                    tree.depth() + 1
                );

                self.store_depth_tree(tree.clone(), file);
                tree
            }
        };

        *self
            .depth_tree
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(tree.clone());

        Some(tree)
    }

    fn store_depth_tree(&self, tree: Arc<DepthTree>, file: PathBuf) {
        let task = IoTaskPool::get_or_init(TaskPool::new).spawn(async move {
            let result = tree.save_file(&file);

            if let Err(error) = &result {
                error!("Error writing depth tree file {}: {error}", file.display());
            }

            result
        });

        *self.storing.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Blocks until a depth tree written in the background has been stored.
    pub fn flush_depth_tree(&self) -> TerrainResult<()> {
        let task = self
            .storing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match task {
            Some(task) => future::block_on(task),
            None => Ok(()),
        }
    }

    fn probe(&self, layer: &str, key: &QuadKey) -> bool {
        match self.depth_tree() {
            Some(tree) => tree.contains(key),
            None => self.tile_file(layer, key).exists(),
        }
    }

    fn reference_layer(&self) -> Option<String> {
        self.reference_layer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TileSource for FileSystemTileSource {
    fn landscape_path(&self) -> &Path {
        &self.path
    }

    fn layer_info(&self) -> TerrainResult<Vec<(String, LayerType)>> {
        let mut names = fs::read_dir(&self.path)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|file_type| file_type.is_dir()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| {
                !name.starts_with('.')
                    && !SKIPPED_DIRECTORIES.contains(&name.to_lowercase().as_str())
            })
            .collect::<Vec<_>>();
        names.sort();

        let mut layers = Vec::new();
        let mut discovered = HashMap::default();
        // the first elevation layer in name order, which is also the base layer of a landscape
        let mut reference_layer = None;

        for name in names {
            let file = self.path.join(&name).join(PROPERTIES_FILE);

            if !file.exists() {
                info!("No properties found for layer {name}, skipping.");
                continue;
            }

            let properties = Properties::load_file(&file)?;

            if let Some(layer_type) = properties.get("LayerType") {
                let layer_type = layer_type.parse::<LayerType>()?;

                if layer_type == LayerType::Elevation && reference_layer.is_none() {
                    reference_layer = Some(name.clone());
                }

                layers.push((name.clone(), layer_type));
            }

            discovered.insert(name, properties);
        }

        info!(
            "Discovered {} layers in {}.",
            layers.len(),
            self.path.display()
        );

        *self
            .properties
            .write()
            .unwrap_or_else(PoisonError::into_inner) = discovered;

        *self
            .reference_layer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = reference_layer;

        if let Some(layer) = self.reference_layer() {
            self.prepare_depth_tree(&layer);
        }

        Ok(layers)
    }

    fn properties(&self, layer: &str) -> Option<Properties> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(layer)
            .cloned()
    }

    fn tile_exists(&self, key: &QuadKey) -> bool {
        match self.reference_layer() {
            Some(layer) => self.probe(&layer, key),
            None => false,
        }
    }

    fn tile(&self, layer: &str, key: &QuadKey, data_type: DataType) -> TerrainResult<Option<Tile>> {
        if !self.probe(layer, key) {
            return Ok(None);
        }

        let encoded = match fs::read(self.tile_file(layer, key)) {
            Ok(encoded) => encoded,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        if encoded.is_empty() {
            return Ok(Some(Tile::empty(key.clone(), data_type)));
        }

        let decoded = self.decoder.decode(&encoded)?;

        Ok(Some(Tile::from_decoded(key.clone(), decoded, data_type)))
    }

    fn locate_best(
        &self,
        x: f64,
        y: f64,
        width: f64,
        length: f64,
        max_level: Option<u32>,
    ) -> QuadKey {
        match self.depth_tree() {
            Some(tree) => tree.locate_best(x, y, width, length, max_level),
            None => QuadKey::root(),
        }
    }

    fn locate_exact(
        &self,
        x: f64,
        y: f64,
        width: f64,
        length: f64,
        level: u32,
    ) -> Option<QuadKey> {
        self.depth_tree()?
            .locate_exact(x, y, width, length, level)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::str::FromStr;

    /// Writes a landscape with an elevation pyramid of `levels` complete levels and a gray layer
    /// holding only the root tile.
    pub(crate) fn write_landscape(dir: &Path, levels: u32, size: u32, elevation: f32) {
        let elevation_dir = dir.join("elevation");
        fs::create_dir_all(&elevation_dir).unwrap();
        fs::write(
            elevation_dir.join(PROPERTIES_FILE),
            format!(
                "LayerType=elevation\nNumberOfLevels={levels}\nNumberOfTiles={}\nTileWidth={}\n\
                 TileLength={}\nMinimumValue={elevation}\nMaximumValue={elevation}\n\
                 EdgeFillValue=NaN\nProjectionInfo.Scale=1.0,1.0,1.0\n",
                1 << (levels - 1),
                size - 1,
                size - 1
            ),
        )
        .unwrap();

        let samples = vec![elevation; (size * size) as usize];
        let encoded = PngTileCodec::encode_float(size, size, &samples).unwrap();

        let mut keys = vec![QuadKey::root()];
        for _ in 1..levels {
            keys = keys
                .iter()
                .flat_map(|key| key.children().collect::<Vec<_>>())
                .collect();
            for key in &keys {
                write_tile(&elevation_dir, key, &encoded);
            }
        }
        write_tile(&elevation_dir, &QuadKey::root(), &encoded);

        let gray_dir = dir.join("gray");
        fs::create_dir_all(&gray_dir).unwrap();
        fs::write(
            gray_dir.join(PROPERTIES_FILE),
            format!(
                "LayerType=grayimage\nNumberOfLevels=1\nNumberOfTiles=1\nTileWidth={}\n\
                 TileLength={}\nMinimumValue=0\nMaximumValue=255\n\
                 ProjectionInfo.Scale=1.0,1.0,1.0\n",
                size - 1,
                size - 1
            ),
        )
        .unwrap();
        let gray = PngTileCodec::encode_gray(size, size, &vec![128; (size * size) as usize])
            .unwrap();
        write_tile(&gray_dir, &QuadKey::root(), &gray);
    }

    fn write_tile(layer_dir: &Path, key: &QuadKey, encoded: &[u8]) {
        let file = PathBuf::from(key.tile_path(&layer_dir.display().to_string(), "png"));
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, encoded).unwrap();
    }

    #[test]
    fn discovers_layers_and_builds_depth_tree() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 3, 4, 10.0);
        fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        fs::create_dir_all(dir.path().join("subpyramid")).unwrap();
        fs::create_dir_all(dir.path().join("notes")).unwrap();

        let source = FileSystemTileSource::connect(dir.path()).unwrap();
        let layers = source.layer_info().unwrap();

        assert_eq!(
            layers,
            vec![
                ("elevation".to_string(), LayerType::Elevation),
                ("gray".to_string(), LayerType::GrayImage),
            ]
        );

        let tree = source.depth_tree().unwrap();
        assert_eq!(tree.node_count(), 1 + 4 + 16);
        source.flush_depth_tree().unwrap();

        let stored = DepthTree::load_file(dir.path().join(DEPTH_TREE_FILE)).unwrap();
        assert_eq!(&stored, tree.as_ref());

        assert!(source.tile_exists(&QuadKey::from_str("/2/3").unwrap()));
        assert!(!source.tile_exists(&QuadKey::from_str("/2/3/1").unwrap()));
        assert_eq!(
            source.properties("elevation").unwrap().get("NumberOfLevels"),
            Some("3")
        );
    }

    #[test]
    fn stored_depth_tree_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 2, 4, 10.0);

        // a stored tree takes precedence over the files on disk
        let stored = DepthTree::leaf(QuadKey::root());
        stored.save_file(dir.path().join(DEPTH_TREE_FILE)).unwrap();

        let source = FileSystemTileSource::connect(dir.path()).unwrap();
        source.layer_info().unwrap();

        assert_eq!(source.depth_tree().unwrap().node_count(), 1);
        assert!(!source.tile_exists(&QuadKey::from_str("/1").unwrap()));
    }

    #[test]
    fn corrupt_depth_trees_are_rebuilt() {
        let corrupt = [
            format!("Index,Id\n0,,-1,-1,-1,-1\n{},/1,-1,-1,-1,-1\n", usize::MAX),
            "Index,Id\n0,,1,2,3,4\n0,/1,-1,-1,-1,-1\n".to_string(),
            "Index,Id\n0,,1,2,3,99\n1,/1,-1,-1,-1,-1\n".to_string(),
            "Index,Id\n0,,1,2\n".to_string(),
        ];

        for encoded in corrupt {
            let dir = tempfile::tempdir().unwrap();
            write_landscape(dir.path(), 2, 4, 10.0);

            let file = dir.path().join(DEPTH_TREE_FILE);
            fs::create_dir_all(file.parent().unwrap()).unwrap();
            fs::write(&file, &encoded).unwrap();

            let source = FileSystemTileSource::connect(dir.path()).unwrap();
            source.layer_info().unwrap();

            let tree = source.depth_tree().unwrap();
            assert_eq!(tree.node_count(), 5, "{encoded}");
            assert!(source.tile_exists(&QuadKey::from_str("/3").unwrap()));
            assert!(!source.tile_exists(&QuadKey::from_str("/3/1").unwrap()));

            source.flush_depth_tree().unwrap();
            assert_eq!(&DepthTree::load_file(&file).unwrap(), tree.as_ref());
        }
    }

    #[test]
    fn first_elevation_layer_defines_existence() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 2, 4, 10.0);

        // a second elevation layer holding only the root tile
        let relief = dir.path().join("relief");
        fs::create_dir_all(&relief).unwrap();
        fs::copy(
            dir.path().join("elevation").join(PROPERTIES_FILE),
            relief.join(PROPERTIES_FILE),
        )
        .unwrap();
        fs::copy(dir.path().join("elevation/0.png"), relief.join("0.png")).unwrap();

        let source = FileSystemTileSource::connect(dir.path()).unwrap();
        let layers = source.layer_info().unwrap();

        assert_eq!(layers.len(), 3);
        assert_eq!(source.reference_layer().as_deref(), Some("elevation"));
        assert_eq!(source.depth_tree().unwrap().node_count(), 5);
        assert!(source.tile_exists(&QuadKey::from_str("/1").unwrap()));
    }

    #[test]
    fn loads_tiles() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 2, 4, 42.5);

        let source = FileSystemTileSource::connect(dir.path()).unwrap();
        source.layer_info().unwrap();

        let key = QuadKey::from_str("/4").unwrap();
        let tile = source
            .tile("elevation", &key, DataType::Float)
            .unwrap()
            .unwrap();
        assert_eq!((tile.columns, tile.rows), (4, 4));
        assert!(tile.elevations().unwrap().iter().all(|&z| z == 42.5));

        // the gray layer only holds the root tile
        assert!(source
            .tile("gray", &key, DataType::UnsignedByte)
            .unwrap()
            .is_none());
        let gray = source
            .tile("gray", &QuadKey::root(), DataType::UnsignedInteger)
            .unwrap()
            .unwrap();
        assert_eq!(gray.data_type, DataType::UnsignedByte);

        assert!(source
            .tile("elevation", &QuadKey::from_str("/4/4").unwrap(), DataType::Float)
            .unwrap()
            .is_none());
    }

    #[test]
    fn zero_length_tiles_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 2, 4, 1.0);
        fs::write(dir.path().join("elevation/3/0.png"), []).unwrap();

        let source = FileSystemTileSource::connect(dir.path()).unwrap();
        source.layer_info().unwrap();

        let tile = source
            .tile("elevation", &QuadKey::from_str("/3").unwrap(), DataType::Float)
            .unwrap()
            .unwrap();
        assert!(tile.is_empty());
    }

    #[test]
    fn locate_in_landscape() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 3, 4, 1.0);

        let source = FileSystemTileSource::connect(dir.path()).unwrap();
        source.layer_info().unwrap();

        assert_eq!(
            source.locate_best(-10.0, 5.0, 100.0, 100.0, None).to_string(),
            "/1/4"
        );
        assert_eq!(
            source.locate_exact(-10.0, 5.0, 100.0, 100.0, 1),
            Some(QuadKey::from_str("/1").unwrap())
        );
        assert_eq!(source.locate_exact(-10.0, 5.0, 100.0, 100.0, 3), None);
    }

    #[test]
    fn connect_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, "").unwrap();

        assert!(matches!(
            FileSystemTileSource::connect(&file),
            Err(TerrainError::NotADirectory(_))
        ));
    }
}
