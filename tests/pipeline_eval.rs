//! End-to-end tests: image files through the pipeline and evaluation session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{GrayImage, Luma};
use imgref::ImgVec;
use recon_eval::{
    CacheMode, Error, EvalConfig, EvalSession, ImagePipeline, ImageSample, MetricKind, Model,
    ModelSpec, PipelineConfig, Result, TestSet,
};

fn write_png(path: &Path, size: u32, seed: u32) {
    let img = GrayImage::from_fn(size, size, |x, y| {
        Luma([((x * 40 + y * 13 + seed * 29) % 200 + 20) as u8])
    });
    img.save(path).unwrap();
}

/// Three 4x4 grayscale PNGs named a.png, b.png, c.png.
fn three_images(dir: &Path) -> Vec<PathBuf> {
    ["a.png", "b.png", "c.png"]
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let path = dir.join(name);
            write_png(&path, 4, i as u32);
            path
        })
        .collect()
}

fn eval_config(batch_size: usize) -> PipelineConfig {
    PipelineConfig::builder()
        .batch_size(batch_size)
        .resize(4, 4)
        .train(false)
        .build()
        .unwrap()
}

#[test]
fn eval_pass_keeps_order_and_batch_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let files = three_images(dir.path());
    let pipeline = ImagePipeline::new(files.clone(), eval_config(2)).unwrap();

    let batches: Vec<_> = pipeline.batches().unwrap().map(|b| b.unwrap()).collect();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(batches[1].len(), 1);

    let paths: Vec<_> = batches.iter().flat_map(|b| b.paths.clone()).collect();
    assert_eq!(paths, files);

    for pair in batches.iter().flat_map(|b| &b.pairs) {
        assert_eq!(pair.input.buf(), pair.target.buf());
        assert_eq!((pair.target.width(), pair.target.height()), (4, 4));
        let min = pair.target.buf().iter().copied().fold(f32::INFINITY, f32::min);
        let max = pair.target.buf().iter().copied().fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(min, 0.0);
        assert!((max - 1.0).abs() < 1e-6);
    }
}

#[test]
fn decode_error_names_the_file_and_ends_the_pass() {
    let dir = tempfile::tempdir().unwrap();
    let mut files = three_images(dir.path());
    let broken = dir.path().join("broken.png");
    std::fs::write(&broken, b"not an image").unwrap();
    files.insert(0, broken.clone());

    let pipeline = ImagePipeline::new(files, eval_config(2)).unwrap();
    let mut batches = pipeline.eval_batches();
    match batches.next() {
        Some(Err(Error::Decode { path, .. })) => assert_eq!(path, broken),
        other => panic!("expected decode error, got {:?}", other.map(|b| b.map(|b| b.len()))),
    }
    assert!(batches.next().is_none());
}

#[test]
fn training_batches_are_full_and_repeat() {
    let dir = tempfile::tempdir().unwrap();
    let files = three_images(dir.path());
    let config = PipelineConfig::builder()
        .batch_size(2)
        .resize(4, 4)
        .shuffle_buffer_size(8)
        .seed(11)
        .build()
        .unwrap();
    let pipeline = ImagePipeline::new(files.clone(), config).unwrap();

    let batches: Vec<_> = pipeline
        .batches()
        .unwrap()
        .take(6)
        .map(|b| b.unwrap())
        .collect();
    assert!(batches.iter().all(|b| b.len() == 2));

    // Six batches of two cover four epochs; each epoch emits every file once.
    let seen: Vec<PathBuf> = batches.iter().flat_map(|b| b.paths.clone()).collect();
    for epoch in seen.chunks(3) {
        let mut sorted = epoch.to_vec();
        sorted.sort();
        assert_eq!(sorted, files);
    }
}

#[test]
fn seeded_augmentation_is_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let files = three_images(dir.path());
    let run = |seed: u64| -> Vec<Vec<f32>> {
        let config = PipelineConfig::builder()
            .batch_size(3)
            .resize(4, 4)
            .train(false)
            .augment(true)
            .seed(seed)
            .build()
            .unwrap();
        let pipeline = ImagePipeline::new(files.clone(), config).unwrap();
        pipeline
            .eval_batches()
            .flat_map(|b| b.unwrap().pairs)
            .map(|p| p.input.into_buf())
            .collect()
    };

    assert_eq!(run(5), run(5));
    assert_ne!(run(5), run(6));
}

#[test]
fn file_cache_is_written_and_reused() {
    let dir = tempfile::tempdir().unwrap();
    let files = three_images(dir.path());
    let cache_path = dir.path().join("samples.json");
    let config = PipelineConfig::builder()
        .batch_size(2)
        .resize(4, 4)
        .train(false)
        .cache(CacheMode::File(cache_path.clone()))
        .build()
        .unwrap();

    let first: Vec<Vec<f32>> = ImagePipeline::new(files.clone(), config.clone())
        .unwrap()
        .eval_batches()
        .flat_map(|b| b.unwrap().pairs)
        .map(|p| p.target.into_buf())
        .collect();
    assert!(cache_path.is_file());

    // Remove the sources: the second pipeline must be served from the cache.
    for file in &files {
        std::fs::remove_file(file).unwrap();
    }
    let second: Vec<Vec<f32>> = ImagePipeline::new(files, config)
        .unwrap()
        .eval_batches()
        .flat_map(|b| b.unwrap().pairs)
        .map(|p| p.target.into_buf())
        .collect();
    assert_eq!(first, second);
}

fn blur_model(batch: &[ImageSample]) -> Result<Vec<ImageSample>> {
    Ok(batch
        .iter()
        .map(|img| {
            let buf = img.buf().iter().map(|v| 0.8 * v + 0.1).collect();
            ImgVec::new(buf, img.width(), img.height())
        })
        .collect())
}

fn loader(_: &Path) -> Result<Arc<dyn Model>> {
    Ok(Arc::new(blur_model))
}

fn session_with(root: &Path, files: Vec<PathBuf>, batch_size: usize, models: &[&str]) -> EvalSession {
    let config = EvalConfig::builder()
        .output_dir(root.join("out"))
        .pipeline(eval_config(batch_size))
        .build()
        .unwrap();
    let mut session = EvalSession::new(config, TestSet::from_files(files), loader).unwrap();
    for name in models {
        let dir = root.join("models").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        if *name != "untrained" {
            std::fs::write(dir.join(format!("{name}.h5")), b"weights").unwrap();
        }
        session.add_model(ModelSpec::from_dir(dir));
    }
    session
}

#[test]
fn aggregates_do_not_depend_on_batch_size() {
    let dir = tempfile::tempdir().unwrap();
    let files = three_images(dir.path());

    let by_one = session_with(dir.path(), files.clone(), 1, &["m"])
        .custom_evaluation()
        .unwrap();
    let by_three = session_with(dir.path(), files, 3, &["m"])
        .custom_evaluation()
        .unwrap();

    let a = &by_one.models[0].metrics;
    let b = &by_three.models[0].metrics;
    assert_eq!(a.images, 3);
    for kind in MetricKind::ALL {
        let (x, y) = (a.mean(kind).unwrap(), b.mean(kind).unwrap());
        assert!((x - y).abs() < 1e-12, "{kind}: {x} vs {y}");
        let (sx, sy) = (a.summary(kind).unwrap(), b.summary(kind).unwrap());
        assert!((sx.std_dev - sy.std_dev).abs() < 1e-12, "{kind}");
    }
}

#[test]
fn failing_model_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let files = three_images(dir.path());
    let mut session = session_with(dir.path(), files, 2, &["first", "untrained", "last"]);

    let report = session.custom_evaluation().unwrap();
    let evaluated: Vec<_> = report.models.iter().map(|m| m.model.as_str()).collect();
    assert_eq!(evaluated, ["first", "last"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].model, "untrained");

    let path = session.write_report(&report).unwrap();
    let json = std::fs::read_to_string(path).unwrap();
    assert!(json.contains("\"untrained\""));
}

#[test]
fn identity_reconstruction_scores_perfectly() {
    let dir = tempfile::tempdir().unwrap();
    let files = three_images(dir.path());
    let config = EvalConfig::builder()
        .output_dir(dir.path().join("out"))
        .pipeline(eval_config(2))
        .build()
        .unwrap();
    let identity_loader = |_: &Path| -> Result<Arc<dyn Model>> {
        Ok(Arc::new(|batch: &[ImageSample]| -> Result<Vec<ImageSample>> {
            Ok(batch.to_vec())
        }))
    };
    let mut session = EvalSession::new(config, TestSet::from_files(files), identity_loader).unwrap();
    let model_dir = dir.path().join("models").join("identity");
    std::fs::create_dir_all(&model_dir).unwrap();
    std::fs::write(model_dir.join("identity.h5"), b"").unwrap();
    session.add_model(ModelSpec::from_dir(model_dir));

    let report = session.custom_evaluation().unwrap();
    let metrics = &report.models[0].metrics;
    assert_eq!(metrics.mean(MetricKind::Mse), Some(0.0));
    assert!(metrics.mean(MetricKind::Dssim).unwrap().abs() < 1e-12);
    assert_eq!(metrics.perfect, 3);
    assert_eq!(metrics.mean(MetricKind::Psnr), Some(f64::INFINITY));
}

#[test]
fn stale_or_broken_file_cache_is_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let files = three_images(dir.path());
    let cache_path = dir.path().join("samples.json");
    let config = |height: usize, width: usize| {
        PipelineConfig::builder()
            .batch_size(2)
            .resize(height, width)
            .train(false)
            .cache(CacheMode::File(cache_path.clone()))
            .build()
            .unwrap()
    };
    let sizes = |pipeline: &ImagePipeline| -> Vec<(usize, usize)> {
        pipeline
            .eval_batches()
            .flat_map(|b| b.unwrap().pairs)
            .map(|p| (p.target.width(), p.target.height()))
            .collect()
    };

    std::fs::write(&cache_path, "{ truncated").unwrap();
    let first = ImagePipeline::new(files[..2].to_vec(), config(4, 4)).unwrap();
    assert_eq!(sizes(&first), [(4, 4), (4, 4)]);

    // A longer file list must not be served from the two-sample cache.
    let all = ImagePipeline::new(files.clone(), config(4, 4)).unwrap();
    assert_eq!(sizes(&all), [(4, 4); 3]);

    let resized = ImagePipeline::new(files.clone(), config(2, 2)).unwrap();
    assert_eq!(sizes(&resized), [(2, 2); 3]);

    // The rebuilt cache now serves the new settings without the sources.
    for file in &files {
        std::fs::remove_file(file).unwrap();
    }
    let cached = ImagePipeline::new(files, config(2, 2)).unwrap();
    assert_eq!(sizes(&cached), [(2, 2); 3]);
}

#[test]
fn unreadable_test_image_aborts_evaluation() {
    let dir = tempfile::tempdir().unwrap();
    let mut files = three_images(dir.path());
    let broken = dir.path().join("broken.png");
    std::fs::write(&broken, b"not an image").unwrap();
    files.insert(1, broken.clone());

    let mut session = session_with(dir.path(), files, 2, &["first", "second"]);
    match session.custom_evaluation() {
        Err(Error::Decode { path, .. }) => assert_eq!(path, broken),
        Err(other) => panic!("expected decode error, got {other}"),
        Ok(report) => panic!("expected decode error, got {} failures", report.failures.len()),
    }
}
