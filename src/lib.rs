pub mod cache;
pub mod config;
pub mod errors;
pub mod geometry;
pub mod imageops_ai;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod semaphore;
pub mod statistics;
pub mod task;
pub mod traits;

pub mod mocks;

use image::ImageFormat;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub use cache::ResultCache;
pub use config::{Config, PipelineConfig};
pub use errors::{Result, TileSegError};
pub use model::{OrtLoader, OrtModel};
pub use pipeline::{InferencePipeline, PipelineEvent, PipelineHandle, PipelineOutput, Progress};
pub use statistics::Statistics;
pub use traits::*;

#[cfg(test)]
pub use mocks::*;

use progress::ProgressBarObserver;

/// Output files written for one input image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedFiles {
    pub image: PathBuf,
    pub mask: PathBuf,
    pub statistics: Option<PathBuf>,
}

/// Runs the pipeline over an image file or a directory tree of images and
/// writes the highlighted image, the mask and optionally the statistics.
pub struct SceneProcessor<L: ModelLoader> {
    pipeline: InferencePipeline<L>,
    config: Config,
}

impl<L: ModelLoader> SceneProcessor<L> {
    pub fn new(loader: L, config: Config) -> Result<Self> {
        let pipeline = InferencePipeline::new(loader, config.pipeline_config()?)?;
        Ok(Self { pipeline, config })
    }

    pub fn process(&self) -> Result<Vec<ProcessedFiles>> {
        let input_path = &self.config.input;
        let output_path = &self.config.output_dir;

        if !input_path.exists() {
            return Err(TileSegError::FileSystem {
                path: input_path.clone(),
                operation: "input existence check".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "input path does not exist",
                ),
            });
        }

        fs::create_dir_all(output_path).map_err(|e| TileSegError::FileSystem {
            path: output_path.clone(),
            operation: "directory creation".to_string(),
            source: e,
        })?;

        let image_files = if input_path.is_file() {
            vec![input_path.clone()]
        } else {
            self.collect_image_files(input_path)
        };

        if image_files.is_empty() {
            log::warn!("no image files found under {}", input_path.display());
            return Ok(Vec::new());
        }

        log::info!("processing {} image file(s)", image_files.len());
        image_files
            .iter()
            .map(|input_file| self.process_single_image(input_file, output_path))
            .collect()
    }

    fn collect_image_files(&self, input_path: &Path) -> Vec<PathBuf> {
        WalkDir::new(input_path)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|path| path.is_file() && self.is_supported_image_format(path))
            .collect()
    }

    pub fn is_supported_image_format(&self, path: &Path) -> bool {
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            matches!(
                extension.to_lowercase().as_str(),
                "jpg" | "jpeg" | "png" | "webp" | "bmp" | "gif" | "tiff" | "avif"
            )
        } else {
            false
        }
    }

    fn process_single_image(&self, input_file: &Path, output_dir: &Path) -> Result<ProcessedFiles> {
        let img = image::open(input_file).map_err(|e| TileSegError::ImageProcessing {
            path: input_file.display().to_string(),
            operation: "image loading".to_string(),
            source: Box::new(e),
        })?;

        let observer = ProgressBarObserver::new(input_file.display().to_string());
        let output = self.pipeline.run(&img, &observer)?;
        log::info!("{}:\n{}", input_file.display(), output.statistics);

        let relative_path = self.get_relative_path(input_file)?;
        let base = output_dir.join(relative_path);
        if let Some(parent) = base.parent() {
            fs::create_dir_all(parent).map_err(|e| TileSegError::FileSystem {
                path: parent.to_path_buf(),
                operation: "output directory creation".to_string(),
                source: e,
            })?;
        }

        let image_file = base.with_extension(&self.config.format);
        let mask_file = with_suffix(&base, "_mask", "png");

        let output_format =
            ImageFormat::from_extension(&self.config.format).unwrap_or(ImageFormat::Png);
        let save = |result: image::ImageResult<()>, path: &Path| {
            result.map_err(|e| TileSegError::ImageProcessing {
                path: path.display().to_string(),
                operation: "image saving".to_string(),
                source: Box::new(e),
            })
        };

        // JPEG has no alpha channel.
        let image = if output_format == ImageFormat::Jpeg {
            image::DynamicImage::ImageRgba8(output.image).to_rgb8().into()
        } else {
            image::DynamicImage::ImageRgba8(output.image)
        };
        save(image.save_with_format(&image_file, output_format), &image_file)?;
        save(
            output.mask.save_with_format(&mask_file, ImageFormat::Png),
            &mask_file,
        )?;

        let statistics = if self.config.stats_json {
            let stats_file = with_suffix(&base, "_stats", "json");
            let json = serde_json::to_string_pretty(&output.statistics.summary()).map_err(|e| {
                TileSegError::ImageProcessing {
                    path: stats_file.display().to_string(),
                    operation: "statistics serialization".to_string(),
                    source: Box::new(e),
                }
            })?;
            fs::write(&stats_file, json).map_err(|e| TileSegError::FileSystem {
                path: stats_file.clone(),
                operation: "statistics writing".to_string(),
                source: e,
            })?;
            Some(stats_file)
        } else {
            None
        };

        Ok(ProcessedFiles {
            image: image_file,
            mask: mask_file,
            statistics,
        })
    }

    /// Path of `input_file` relative to the configured input. A single-file
    /// input maps to its file name.
    pub fn get_relative_path(&self, input_file: &Path) -> Result<PathBuf> {
        let input = &self.config.input;
        if input.is_file() {
            return input
                .file_name()
                .map(PathBuf::from)
                .ok_or_else(|| TileSegError::FileSystem {
                    path: input.clone(),
                    operation: "file name extraction".to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "input file has no file name",
                    ),
                });
        }
        input_file
            .strip_prefix(input)
            .map(|p| p.to_path_buf())
            .map_err(|_| TileSegError::FileSystem {
                path: input_file.to_path_buf(),
                operation: "relative path extraction".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "input file is not inside the input directory",
                ),
            })
    }
}

fn with_suffix(base: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    base.with_file_name(format!("{stem}{suffix}.{extension}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::ffi::OsStr;
    use tempfile::TempDir;

    fn config_for(input: &Path, output: &Path, model: &Path) -> Config {
        Config::parse_from([
            OsStr::new("tile-seg-rs"),
            input.as_os_str(),
            output.as_os_str(),
            OsStr::new("-m"),
            model.as_os_str(),
        ])
    }

    #[test]
    fn test_supported_formats() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config = config_for(temp_dir.path(), &temp_dir.path().join("out"), Path::new("m"));
        let processor = SceneProcessor::new(MockLoader::new(), config)?;

        for (filename, expected) in [
            ("test.jpg", true),
            ("test.JPEG", true),
            ("test.png", true),
            ("test.webp", true),
            ("test.txt", false),
            ("test", false),
        ] {
            assert_eq!(
                processor.is_supported_image_format(Path::new(filename)),
                expected,
                "{filename}"
            );
        }
        Ok(())
    }

    #[test]
    fn test_relative_path_calculation() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let input_dir = temp_dir.path().join("input");
        let subdir = input_dir.join("subdir");
        fs::create_dir_all(&subdir)?;

        let config = config_for(&input_dir, Path::new("output"), Path::new("model.onnx"));
        let processor = SceneProcessor::new(MockLoader::new(), config)?;

        let relative = processor.get_relative_path(&subdir.join("test.jpg"))?;
        assert_eq!(relative, Path::new("subdir/test.jpg"));
        Ok(())
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(
            with_suffix(Path::new("out/a/scene.jpg"), "_mask", "png"),
            PathBuf::from("out/a/scene_mask.png")
        );
    }
}
