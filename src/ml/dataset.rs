//! 学習データセットの構築
//!
//! 画像ディレクトリとアノテーションディレクトリを基底ファイル名で対応付け
//! （`X.jpg` ⇔ `X.json`）、ラベル付き画素ごとに特徴量ベクトルとクラスを集めます。
//!
//! 画像単位の問題（アノテーションなし、読み込み失敗）は警告を出してスキップし、
//! 処理全体は中断しません。全画像を処理してもデータが空の場合のみエラーになります。

use image::RgbImage;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use crate::annotation::{rasterize, AnnotationFile, ClassMask};
use crate::error::PipelineError;
use crate::ml::features::{pixel_features, sanitize_features};
use crate::model::config::AssemblySettings;
use crate::types::{FeatureVector, PixelClass};

/// ラベル付き特徴量行列（追記のみ）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    features: Vec<FeatureVector>,
    labels: Vec<PixelClass>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, features: FeatureVector, label: PixelClass) {
        self.features.push(features);
        self.labels.push(label);
    }

    /// 別のデータセットを末尾に追加（`other` は空になる）
    pub fn append(&mut self, other: &mut Dataset) {
        self.features.append(&mut other.features);
        self.labels.append(&mut other.labels);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn features(&self) -> &[FeatureVector] {
        &self.features
    }

    pub fn labels(&self) -> &[PixelClass] {
        &self.labels
    }

    /// 指定クラスのサンプル数
    pub fn count(&self, class: PixelClass) -> usize {
        self.labels.iter().filter(|&&l| l == class).count()
    }
}

/// 画像をスキップした理由
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MissingAnnotation(PathBuf),
    UnreadableAnnotation(String),
    UndecodableImage(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingAnnotation(path) => {
                write!(f, "アノテーションが見つかりません: {}", path.display())
            }
            SkipReason::UnreadableAnnotation(msg) => {
                write!(f, "アノテーションを読み込めません: {}", msg)
            }
            SkipReason::UndecodableImage(msg) => write!(f, "画像を読み込めません: {}", msg),
        }
    }
}

/// スキップした画像
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedImage {
    pub image: PathBuf,
    pub reason: SkipReason,
}

/// 1画像分の抽出結果
#[derive(Debug, Clone, Default)]
pub struct ImageContribution {
    pub samples: Dataset,
    /// 0.0 に置き換えた非有限値の数
    pub coerced_values: usize,
}

/// データセット構築の集計
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblyReport {
    /// 処理できた画像数（ラベル付き画素が0の画像も含む）
    pub processed: usize,
    /// スキップした画像
    pub skipped: Vec<SkippedImage>,
    /// ラベル付き画素が0だった画像数
    pub empty_images: usize,
    /// 0.0 に置き換えた非有限値の数
    pub coerced_values: usize,
}

/// 画像ディレクトリ内の対象画像をファイル名順に列挙
pub fn find_image_files(images_dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, PipelineError> {
    let io_err = |source| PipelineError::Io {
        path: images_dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(images_dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(ext) = path.extension() {
            let ext_str = ext.to_string_lossy().to_lowercase();
            if extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext_str)) {
                files.push(path);
            }
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// 画像に対応するアノテーションファイルのパス（`<stem>.json`）
pub fn annotation_path_for(image_path: &Path, annotations_dir: &Path) -> PathBuf {
    let stem = image_path.file_stem().unwrap_or_default();
    let mut name = stem.to_os_string();
    name.push(".json");
    annotations_dir.join(name)
}

/// マスクでラベル付けされた画素の特徴量を行優先順に集める
pub fn collect_labeled_pixels(image: &RgbImage, mask: &ClassMask) -> ImageContribution {
    let mut contribution = ImageContribution::default();
    for (x, y, pixel) in image.enumerate_pixels() {
        if x >= mask.width() || y >= mask.height() {
            continue;
        }
        let Some(class) = PixelClass::from_mask_value(mask.get(x, y)) else {
            continue;
        };
        let mut features = pixel_features(pixel.0);
        contribution.coerced_values += sanitize_features(&mut features);
        contribution.samples.push(features, class);
    }
    contribution
}

/// 1画像を処理（マスク生成 → 特徴量抽出）
pub fn process_image(image_path: &Path, annotation_path: &Path) -> Result<ImageContribution, SkipReason> {
    if !annotation_path.is_file() {
        return Err(SkipReason::MissingAnnotation(annotation_path.to_path_buf()));
    }
    let annotation = AnnotationFile::load(annotation_path)
        .map_err(|e| SkipReason::UnreadableAnnotation(format!("{:#}", e)))?;

    let image = image::open(image_path)
        .map_err(|e| SkipReason::UndecodableImage(e.to_string()))?
        .to_rgb8();
    let (width, height) = image.dimensions();

    if let (Some(w), Some(h)) = (annotation.image_width, annotation.image_height) {
        if (w, h) != (width, height) {
            warn!(
                "アノテーションの画像サイズ {}x{} が実画像 {}x{} と一致しません: {}",
                w,
                h,
                width,
                height,
                image_path.display()
            );
        }
    }

    debug!(
        "{}: 図形 {} 個（光 / 影 {} 個）",
        image_path.display(),
        annotation.shapes.len(),
        annotation.num_class_shapes()
    );
    let mask = rasterize(width, height, &annotation.shapes);
    Ok(collect_labeled_pixels(&image, &mask))
}

/// ディレクトリからデータセットを構築
///
/// 並列実行時も結果はファイル名順に結合されるため、逐次実行と同じデータセットになる。
pub fn assemble_dataset(
    images_dir: &Path,
    annotations_dir: &Path,
    settings: &AssemblySettings,
) -> Result<(Dataset, AssemblyReport), PipelineError> {
    let files = find_image_files(images_dir, &settings.image_extensions)?;
    info!("画像 {} 枚を検出しました: {}", files.len(), images_dir.display());

    let work = |path: &PathBuf| process_image(path, &annotation_path_for(path, annotations_dir));
    let results: Vec<Result<ImageContribution, SkipReason>> = if settings.parallel {
        files.par_iter().map(work).collect()
    } else {
        files.iter().map(work).collect()
    };

    let mut dataset = Dataset::new();
    let mut report = AssemblyReport::default();
    for (path, result) in files.into_iter().zip(results) {
        match result {
            Ok(mut contribution) => {
                report.processed += 1;
                report.coerced_values += contribution.coerced_values;
                if contribution.samples.is_empty() {
                    report.empty_images += 1;
                    info!("  {}: ラベル付き画素なし", path.display());
                } else {
                    info!("  {}: {} 画素", path.display(), contribution.samples.len());
                }
                dataset.append(&mut contribution.samples);
            }
            Err(reason) => {
                warn!("スキップ: {} ({})", path.display(), reason);
                report.skipped.push(SkippedImage { image: path, reason });
            }
        }
    }

    if report.coerced_values > 0 {
        warn!("非有限の特徴量 {} 個を 0.0 に置き換えました", report.coerced_values);
    }
    info!(
        "データセット: {} サンプル (LUZ {}, SOMBRA {}), 処理 {} 枚, スキップ {} 枚",
        dataset.len(),
        dataset.count(PixelClass::Light),
        dataset.count(PixelClass::Shadow),
        report.processed,
        report.skipped.len()
    );

    if dataset.is_empty() {
        return Err(PipelineError::NoTrainingData);
    }
    Ok((dataset, report))
}
