use std::path::{Path, PathBuf};

use canopy_shade::ml::{extract_features, run_training_pipeline, SkipReason};
use canopy_shade::model::{load_bundle, load_manifest, AppConfig, ClassifierSettings};
use canopy_shade::{PipelineError, PixelClass};
use image::{Rgb, RgbImage};

const SIZE: u32 = 32;

const HALF_AND_HALF: &str = r#"{
  "shapes": [
    {"label": "SUELO_LUZ", "points": [[0, 0], [31, 0], [31, 15], [0, 15]], "shape_type": "polygon"},
    {"label": "MALLA_SOMBRA", "points": [[0, 16], [31, 16], [31, 31], [0, 31]], "shape_type": "polygon"}
  ],
  "imagePath": "ignored.png",
  "imageHeight": 32,
  "imageWidth": 32
}"#;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("canopy_shade_it_{}_{}", name, std::process::id()));
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(dir.join("images")).unwrap();
    std::fs::create_dir_all(dir.join("annotations")).unwrap();
    dir
}

/// 上半分が明るい葉、下半分が暗い葉の合成画像
fn canopy_image(offset: u32) -> RgbImage {
    RgbImage::from_fn(SIZE, SIZE, |x, y| {
        let k = ((x + offset) % 30) as u8;
        if y < SIZE / 2 {
            Rgb([170 + k, 200 + (y as u8), 110 + k])
        } else {
            Rgb([15 + k, 35 + (y as u8 - 16), 20 + k])
        }
    })
}

fn config_for(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.paths.images_dir = dir.join("images");
    config.paths.annotations_dir = dir.join("annotations");
    config.paths.output_path = dir.join("out/canopy_shade.tar.gz");
    config.classifier = ClassifierSettings {
        max_iter: 10,
        min_samples_leaf: 5,
        ..ClassifierSettings::default()
    };
    config
}

#[test]
fn test_train_save_and_reload() {
    let dir = scratch_dir("roundtrip");
    for (i, name) in ["IMG_001", "IMG_002", "IMG_003"].iter().enumerate() {
        canopy_image(i as u32 * 7)
            .save(dir.join("images").join(format!("{}.png", name)))
            .unwrap();
        std::fs::write(dir.join("annotations").join(format!("{}.json", name)), HALF_AND_HALF).unwrap();
    }
    // アノテーションのない画像はスキップされる
    canopy_image(3).save(dir.join("images/IMG_004.png")).unwrap();

    let config = config_for(&dir);
    let summary = run_training_pipeline(&config).unwrap();

    assert_eq!(summary.assembly.processed, 3);
    assert_eq!(summary.assembly.skipped.len(), 1);
    assert!(matches!(summary.assembly.skipped[0].reason, SkipReason::MissingAnnotation(_)));
    assert_eq!(summary.n_samples, 3 * (SIZE * SIZE) as usize);
    assert!(summary.report.accuracy > 0.95);
    assert!(summary.bundle_path.exists());

    let out_dir = dir.join("out");
    let leftovers: Vec<_> = std::fs::read_dir(&out_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path() != summary.bundle_path)
        .collect();
    assert!(leftovers.is_empty());

    let manifest = load_manifest(&summary.bundle_path).unwrap();
    assert_eq!(manifest.classes, vec!["LUZ", "SOMBRA"]);
    assert_eq!(manifest.n_train + manifest.n_test, summary.n_samples);
    assert_eq!(manifest.seed, 42);

    let bundle = load_bundle(&summary.bundle_path).unwrap();
    assert_eq!(bundle.classifier().params, config.classifier);

    // 再読み込みしたバンドルは学習時と同じ予測を返す
    let probe = canopy_image(11);
    let pixels: Vec<[u8; 3]> = probe.pixels().map(|p| p.0).collect();
    let reloaded = bundle.classify(&pixels);
    let again = load_bundle(&summary.bundle_path).unwrap();
    assert_eq!(reloaded, again.classify(&pixels));
    assert_eq!(
        bundle.predict_proba(&extract_features(&pixels)),
        again.predict_proba(&extract_features(&pixels))
    );

    let top = reloaded[..(SIZE * SIZE / 2) as usize]
        .iter()
        .filter(|&&c| c == PixelClass::Light)
        .count();
    assert!(top as f64 > 0.9 * (SIZE * SIZE / 2) as f64);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_same_seed_gives_same_model() {
    let dir = scratch_dir("reproducible");
    canopy_image(0).save(dir.join("images/a.png")).unwrap();
    std::fs::write(dir.join("annotations/a.json"), HALF_AND_HALF).unwrap();

    let mut config = config_for(&dir);
    config.paths.output_path = dir.join("first.tar.gz");
    let first = run_training_pipeline(&config).unwrap();
    config.paths.output_path = dir.join("second.tar.gz");
    let second = run_training_pipeline(&config).unwrap();

    let a = load_bundle(&first.bundle_path).unwrap();
    let b = load_bundle(&second.bundle_path).unwrap();
    assert_eq!(a.classifier(), b.classifier());
    assert_eq!(a.scaler(), b.scaler());
    assert_eq!(a.encoder(), b.encoder());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_no_training_data_writes_nothing() {
    let dir = scratch_dir("no_data");
    canopy_image(0).save(dir.join("images/a.png")).unwrap();
    std::fs::write(
        dir.join("annotations/a.json"),
        r#"{"shapes": [{"label": "CIELO", "points": [[0, 0], [31, 0], [31, 31]]}]}"#,
    )
    .unwrap();

    let config = config_for(&dir);
    let err = run_training_pipeline(&config).unwrap_err();
    assert!(matches!(err, PipelineError::NoTrainingData));
    assert!(!config.paths.output_path.exists());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_single_class_fails_at_split() {
    let dir = scratch_dir("single_class");
    canopy_image(0).save(dir.join("images/a.png")).unwrap();
    std::fs::write(
        dir.join("annotations/a.json"),
        r#"{"shapes": [{"label": "MALLA_LUZ", "points": [[0, 0], [31, 0], [31, 15], [0, 15]]}]}"#,
    )
    .unwrap();

    let config = config_for(&dir);
    let err = run_training_pipeline(&config).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::InsufficientClass { class: PixelClass::Shadow, count: 0 }
    ));
    assert!(!config.paths.output_path.exists());

    std::fs::remove_dir_all(&dir).ok();
}
