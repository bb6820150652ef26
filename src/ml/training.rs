//! モデル学習
//!
//! 層化分割 → 標準化 → ラベルエンコード → 勾配ブースティング学習 → 評価 の順に実行し、
//! 3つの成果物を1つの `ModelBundle` にまとめます。
//! どのステージで失敗しても処理全体を中断し、バンドルは保存しません。

use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::PathBuf;

use crate::error::{PipelineError, TrainingStage};
use crate::ml::dataset::{assemble_dataset, AssemblyReport, Dataset};
use crate::ml::evaluation::EvaluationReport;
use crate::ml::gbdt::GradientBoostedTrees;
use crate::ml::preprocessing::{LabelEncoder, Predict, StandardScaler, Transform};
use crate::model::config::AppConfig;
use crate::model::model_bundle::ModelBundle;
use crate::model::model_metadata::BundleManifest;
use crate::model::model_storage::save_bundle;
use crate::types::{FeatureVector, PixelClass};

/// 学習 / テストのインデックス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// クラス比率を保ったまま学習 / テストに分割
///
/// 各クラスのテスト件数は round(件数 * test_fraction) を [1, 件数 - 1] に収めたもの。
/// 同じシード・同じラベル列なら常に同じ分割になる。
pub fn stratified_split(
    labels: &[PixelClass],
    test_fraction: f64,
    seed: u64,
) -> Result<TrainTestSplit, PipelineError> {
    if labels.is_empty() {
        return Err(PipelineError::NoTrainingData);
    }
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(PipelineError::stage(
            TrainingStage::Split,
            format!("test fraction must be in (0, 1), got {}", test_fraction),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in PixelClass::ALL {
        let mut indices: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == class)
            .map(|(i, _)| i)
            .collect();
        let count = indices.len();
        if count < 2 {
            return Err(PipelineError::InsufficientClass { class, count });
        }

        indices.shuffle(&mut rng);
        let n_test = ((count as f64 * test_fraction).round() as usize).clamp(1, count - 1);
        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
    }

    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    Ok(TrainTestSplit { train, test })
}

fn gather<T: Copy>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| values[i]).collect()
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub bundle: ModelBundle,
    pub report: EvaluationReport,
    pub split: TrainTestSplit,
}

/// データセットからモデルバンドルを学習
pub fn train_model(dataset: &Dataset, config: &AppConfig) -> Result<TrainingOutcome, PipelineError> {
    config.validate()?;
    if dataset.is_empty() {
        return Err(PipelineError::NoTrainingData);
    }
    let seed = config.training.seed;

    // 1. 層化分割
    let split = stratified_split(dataset.labels(), config.training.test_fraction, seed)?;
    info!("学習データ: {} サンプル", split.train.len());
    info!("テストデータ: {} サンプル", split.test.len());

    let train_x: Vec<FeatureVector> = gather(dataset.features(), &split.train);
    let test_x: Vec<FeatureVector> = gather(dataset.features(), &split.test);
    let train_y: Vec<PixelClass> = gather(dataset.labels(), &split.train);
    let test_y: Vec<PixelClass> = gather(dataset.labels(), &split.test);

    // 2. 標準化（学習データのみで統計量を求める）
    let scaler = StandardScaler::fit(&train_x)?;
    let train_x = scaler.transform(&train_x);
    let test_x = scaler.transform(&test_x);

    // 3. ラベルエンコード
    let encoder = LabelEncoder::fit(&train_y)?;
    info!("クラス順序: {}", encoder.class_names().join(", "));
    let train_codes = encoder.transform(&train_y)?;
    let test_codes = encoder.transform(&test_y)?;

    // 4. 分類器の学習
    let params = &config.classifier;
    info!(
        "学習を開始します: max_iter={}, learning_rate={}, max_depth={}",
        params.max_iter, params.learning_rate, params.max_depth
    );
    let classifier = GradientBoostedTrees::fit(params, &train_x, &train_codes, seed)?;
    info!("学習が完了しました: 木 {} 本", classifier.num_trees());

    // 5. 評価
    let predicted = classifier.predict(&test_x);
    let report = EvaluationReport::from_predictions(&encoder.classes, &test_codes, &predicted);
    info!("モデルの評価:\n{}", report);

    let manifest = BundleManifest::new(
        encoder.class_names(),
        params.clone(),
        seed,
        split.train.len(),
        split.test.len(),
    );
    let bundle = ModelBundle::new(manifest, classifier, scaler, encoder)?;

    Ok(TrainingOutcome {
        bundle,
        report,
        split,
    })
}

/// パイプライン全体の結果
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub assembly: AssemblyReport,
    pub report: EvaluationReport,
    pub bundle_path: PathBuf,
    pub n_samples: usize,
}

/// 設定に従ってデータセット構築 → 学習 → 保存を実行
pub fn run_training_pipeline(config: &AppConfig) -> Result<PipelineSummary, PipelineError> {
    config.validate()?;

    let (dataset, assembly) = assemble_dataset(
        &config.paths.images_dir,
        &config.paths.annotations_dir,
        &config.assembly,
    )?;
    let n_samples = dataset.len();

    let outcome = train_model(&dataset, config)?;
    drop(dataset);

    let bundle_path = save_bundle(&config.paths.output_path, &outcome.bundle)?;

    Ok(PipelineSummary {
        assembly,
        report: outcome.report,
        bundle_path,
        n_samples,
    })
}
