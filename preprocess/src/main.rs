use clap::Parser;
use terrain_streaming_pyramid::prelude::*;

fn main() -> PreprocessResult<()> {
    let args = Cli::parse();
    let (source, context) = PreprocessContext::from_cli(args)?;

    preprocess(source, &context)?;

    Ok(())
}
