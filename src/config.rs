use crate::result::TerrainResult;
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// The settings of a streaming session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// The upper bound of the estimated memory held by cached tiles, in bytes.
    pub cache_budget: usize,
    /// The number of threads building tiles in the background.
    pub worker_count: usize,
    /// The minimum number of screen pixels covered by one mesh cell.
    pub cell_size: f64,
    /// The vertex color of valid samples.
    pub surface_color: [f32; 4],
    /// The vertex color of missing samples.
    pub missing_color: [f32; 4],
    pub layers_enabled: bool,
    /// Terrains with a pixel size below this value are considered millimeter scale.
    pub millimeter_threshold: f64,
    /// The exaggeration applied to millimeter scale terrains.
    pub millimeter_scale: f64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            cache_budget: 400_000_000,
            worker_count: 5,
            cell_size: 4.0,
            surface_color: [1.0; 4],
            missing_color: [0.0; 4],
            layers_enabled: true,
            millimeter_threshold: 0.0001,
            millimeter_scale: 100.0,
        }
    }
}

impl StreamingConfig {
    /// The factor applied to all coordinates of a terrain with the given pixel size.
    pub fn pixel_scale(&self, pixel_width: f64) -> f64 {
        if pixel_width < self.millimeter_threshold {
            self.millimeter_scale
        } else {
            1.0
        }
    }

    pub fn decode_alloc(encoded: &str) -> TerrainResult<Self> {
        Ok(ron::from_str(encoded)?)
    }

    pub fn encode_alloc(&self) -> TerrainResult<String> {
        Ok(ron::ser::to_string_pretty(self, PrettyConfig::default())?)
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> TerrainResult<Self> {
        let encoded = fs::read_to_string(path)?;
        Self::decode_alloc(&encoded)
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> TerrainResult<()> {
        let encoded = self.encode_alloc()?;
        fs::write(path, encoded)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let config = StreamingConfig::decode_alloc("(worker_count: 2, cache_budget: 1000)").unwrap();

        assert_eq!(config.worker_count, 2);
        assert_eq!(config.cache_budget, 1000);
        assert_eq!(config.cell_size, 4.0);
        assert!(config.layers_enabled);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streaming.ron");

        let config = StreamingConfig {
            surface_color: [0.5, 0.25, 1.0, 1.0],
            ..Default::default()
        };
        config.save_file(&path).unwrap();

        assert_eq!(StreamingConfig::load_file(&path).unwrap(), config);
    }

    #[test]
    fn millimeter_terrains_are_exaggerated() {
        let config = StreamingConfig::default();

        assert_eq!(config.pixel_scale(0.00005), 100.0);
        assert_eq!(config.pixel_scale(1.0), 1.0);
    }
}
