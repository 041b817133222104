use anyhow::{ensure, Context, Result};
use image::ImageFormat;

use tile_seg_rs::{Config, OrtLoader, SceneProcessor};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::new();

    ensure!(config.model_path.exists(), "Model path does not exist");
    ensure!(config.input.exists(), "Input path does not exist");
    ensure!(
        ImageFormat::from_extension(&config.format).is_some(),
        "Invalid format"
    );

    let processor =
        SceneProcessor::new(OrtLoader, config).context("Invalid pipeline configuration")?;
    let processed = match processor.process() {
        Ok(processed) => processed,
        Err(err) if err.is_run_failure() => {
            log::error!("segmentation run failed: {err}");
            return Err(err.into());
        }
        Err(err) => return Err(anyhow::Error::new(err).context("Failed to process input")),
    };

    for files in &processed {
        log::info!(
            "wrote {} and {}",
            files.image.display(),
            files.mask.display()
        );
    }
    log::info!("processed {} image(s)", processed.len());

    Ok(())
}
