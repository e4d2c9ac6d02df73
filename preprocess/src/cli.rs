use crate::dataset::{PreprocessNoData, PyramidLayerType};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tspp", author, version, about)]
pub struct Cli {
    /// The raster to build the pyramid from, a GeoTIFF or PNG file.
    #[arg(required = true)]
    pub src_path: PathBuf,
    /// The landscape directory the layer is written to.
    #[arg(required = true)]
    pub landscape_path: PathBuf,
    /// The name of the layer directory inside of the landscape.
    #[arg(required = true)]
    pub layer_name: String,
    #[arg(short = 't', long, value_enum, default_value_t = PyramidLayerType::Elevation)]
    pub layer_type: PyramidLayerType,
    /// The number of pixels along the edge of a tile, a power of two.
    #[arg(short = 's', long = "ts", default_value_t = 128)]
    pub tile_size: usize,
    /// The sample value marking missing data, or `source` to use the one of the raster.
    #[arg(short, long, default_value = "source", allow_negative_numbers = true)]
    pub no_data: PreprocessNoData,
    #[arg(long, default_value = None)]
    pub temp_path: Option<PathBuf>,
    #[arg(short, long, default_value_t = false)]
    pub overwrite: bool,
}

pub(crate) struct PreprocessBar {
    name: String,
    bar: ProgressBar,
}

impl PreprocessBar {
    pub(crate) fn new(name: String, count: u64) -> Self {
        let style = ProgressStyle::with_template(
            &(name.clone() + ": {wide_bar} {pos}/{len} tiles [{elapsed}/{duration}]"),
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());

        let bar = ProgressBar::new(count).with_style(style);

        Self { name, bar }
    }

    pub(crate) fn bar(&self) -> ProgressBar {
        self.bar.clone()
    }

    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
        println!("{} took: {:?}", self.name, self.bar.elapsed());
    }
}
