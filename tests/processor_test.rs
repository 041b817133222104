use std::ffi::OsStr;
use std::fs;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use image::{GrayImage, Luma, Rgba, RgbaImage};
use tempfile::TempDir;

use tile_seg_rs::{mocks::MockLoader, Config, SceneProcessor};

fn write_scene(path: &Path, width: u32, height: u32) -> Result<()> {
    let image = RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([250, 0, 0, 255])
        } else {
            Rgba([0, 90, 180, 255])
        }
    });
    image.save(path)?;
    Ok(())
}

fn config(input: &Path, output: &Path, model: &Path, extra: &[&str]) -> Config {
    let mut args = vec![
        OsStr::new("tile-seg-rs"),
        input.as_os_str(),
        output.as_os_str(),
        OsStr::new("-m"),
        model.as_os_str(),
        OsStr::new("-t"),
        OsStr::new("32"),
        OsStr::new("-p"),
        OsStr::new("2"),
    ];
    args.extend(extra.iter().map(OsStr::new));
    Config::parse_from(args)
}

fn model_file(dir: &Path) -> Result<std::path::PathBuf> {
    let path = dir.join("unet.onnx");
    fs::write(&path, b"mock model")?;
    Ok(path)
}

#[test]
fn test_single_file_writes_image_and_mask() -> Result<()> {
    let temp = TempDir::new()?;
    let input = temp.path().join("scene.png");
    let output_dir = temp.path().join("out");
    write_scene(&input, 50, 20)?;
    let model = model_file(temp.path())?;

    let processor = SceneProcessor::new(
        MockLoader::new(),
        config(&input, &output_dir, &model, &["--stats-json"]),
    )?;
    let processed = processor.process()?;

    assert_eq!(processed.len(), 1);
    let files = &processed[0];
    assert_eq!(files.image, output_dir.join("scene.png"));
    assert_eq!(files.mask, output_dir.join("scene_mask.png"));

    let image = image::open(&files.image)?.to_rgba8();
    assert_eq!(image.dimensions(), (50, 20));
    assert_eq!(image.get_pixel(0, 0), &Rgba([250, 0, 0, 255]));
    assert_eq!(image.get_pixel(49, 0), &Rgba([90, 90, 90, 255]));

    let mask: GrayImage = image::open(&files.mask)?.to_luma8();
    assert_eq!(mask.get_pixel(0, 0), &Luma([255]));
    assert_eq!(mask.get_pixel(49, 19), &Luma([0]));

    let stats_path = files.statistics.as_ref().expect("stats requested");
    let stats: serde_json::Value = serde_json::from_str(&fs::read_to_string(stats_path)?)?;
    assert_eq!(stats["original_width"], 50);
    assert_eq!(stats["padded_width"], 64);
    assert_eq!(stats["padded_height"], 32);
    assert_eq!(stats["task_count"], 2);
    Ok(())
}

#[test]
fn test_directory_preserves_structure() -> Result<()> {
    let temp = TempDir::new()?;
    let input_dir = temp.path().join("input");
    let nested = input_dir.join("nested");
    fs::create_dir_all(&nested)?;
    write_scene(&input_dir.join("a.png"), 40, 40)?;
    write_scene(&nested.join("b.png"), 20, 70)?;
    fs::write(input_dir.join("notes.txt"), "not an image")?;

    let output_dir = temp.path().join("out");
    let model = model_file(temp.path())?;
    let processor = SceneProcessor::new(
        MockLoader::new(),
        config(&input_dir, &output_dir, &model, &["-f", "jpg"]),
    )?;

    let mut processed = processor.process()?;
    processed.sort_by(|a, b| a.image.cmp(&b.image));

    assert_eq!(processed.len(), 2);
    assert_eq!(processed[0].image, output_dir.join("a.jpg"));
    assert_eq!(processed[1].image, output_dir.join("nested/b.jpg"));
    assert_eq!(processed[1].mask, output_dir.join("nested/b_mask.png"));
    assert!(processed.iter().all(|files| files.statistics.is_none()));

    let nested_image = image::open(&processed[1].image)?;
    assert_eq!((nested_image.width(), nested_image.height()), (20, 70));
    Ok(())
}

#[test]
fn test_empty_directory_processes_nothing() -> Result<()> {
    let temp = TempDir::new()?;
    let input_dir = temp.path().join("empty");
    fs::create_dir_all(&input_dir)?;
    let model = model_file(temp.path())?;

    let processor = SceneProcessor::new(
        MockLoader::new(),
        config(&input_dir, &temp.path().join("out"), &model, &[]),
    )?;
    assert!(processor.process()?.is_empty());
    Ok(())
}

#[test]
fn test_missing_model_fails() -> Result<()> {
    let temp = TempDir::new()?;
    let input = temp.path().join("scene.png");
    write_scene(&input, 10, 10)?;

    let processor = SceneProcessor::new(
        MockLoader::new(),
        config(&input, &temp.path().join("out"), Path::new("/missing/unet.onnx"), &[]),
    )?;
    let err = processor.process().unwrap_err();
    assert!(err.is_run_failure());
    assert!(err
        .to_string()
        .starts_with("Model file not exists or cannot be opened"));
    Ok(())
}
