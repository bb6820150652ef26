//! 学習設定管理モジュール
//!
//! 入出力パス、データセット構築、分割、分類器ハイパーパラメータをJSON形式で保存・読み込みします。
//! すべての既定値はこのファイルの `Default` 実装に集約されています。

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// 入出力パス設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// 画像ディレクトリ
    pub images_dir: PathBuf,
    /// アノテーション（JSON）ディレクトリ
    pub annotations_dir: PathBuf,
    /// モデルバンドルの出力先
    pub output_path: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("dataset/imagenes"),
            annotations_dir: PathBuf::from("dataset/anotaciones"),
            output_path: PathBuf::from("models/canopy_shade.tar.gz"),
        }
    }
}

/// データセット構築設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblySettings {
    /// 画像単位の処理を並列実行する
    pub parallel: bool,
    /// 対象とする画像拡張子（小文字）
    pub image_extensions: Vec<String>,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self {
            parallel: true,
            image_extensions: vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()],
        }
    }
}

/// 分割設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// テストデータの割合
    pub test_fraction: f64,
    /// ランダムシード
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

/// 勾配ブースティング分類器のハイパーパラメータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// ブースティング反復数（木の本数）
    pub max_iter: usize,
    /// 学習率（縮小係数）
    pub learning_rate: f64,
    /// 木の最大深さ
    pub max_depth: usize,
    /// 木あたりの最大葉数
    pub max_leaf_nodes: usize,
    /// 葉あたりの最小サンプル数
    pub min_samples_leaf: usize,
    /// 葉の値に対するL2正則化
    pub l2_regularization: f64,
    /// 特徴量あたりの最大ビン数（2..=255）
    pub max_bins: usize,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            max_iter: 50,
            learning_rate: 0.1,
            max_depth: 10,
            max_leaf_nodes: 31,
            min_samples_leaf: 20,
            l2_regularization: 0.0,
            max_bins: 255,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 入出力パス
    pub paths: PathSettings,
    /// データセット構築設定
    pub assembly: AssemblySettings,
    /// 分割設定
    pub training: TrainingSettings,
    /// 分類器設定
    pub classifier: ClassifierSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む。存在しない・壊れている場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 値の範囲を検証
    pub fn validate(&self) -> Result<(), PipelineError> {
        let t = &self.training;
        if !(t.test_fraction > 0.0 && t.test_fraction < 1.0) {
            return Err(PipelineError::Config(format!(
                "test_fraction must be in (0, 1), got {}",
                t.test_fraction
            )));
        }

        let c = &self.classifier;
        if c.max_iter == 0 {
            return Err(PipelineError::Config("max_iter must be at least 1".to_string()));
        }
        if !(c.learning_rate > 0.0 && c.learning_rate.is_finite()) {
            return Err(PipelineError::Config(format!(
                "learning_rate must be positive, got {}",
                c.learning_rate
            )));
        }
        if c.max_depth == 0 {
            return Err(PipelineError::Config("max_depth must be at least 1".to_string()));
        }
        if c.max_leaf_nodes < 2 {
            return Err(PipelineError::Config("max_leaf_nodes must be at least 2".to_string()));
        }
        if c.min_samples_leaf == 0 {
            return Err(PipelineError::Config("min_samples_leaf must be at least 1".to_string()));
        }
        if !(c.l2_regularization >= 0.0 && c.l2_regularization.is_finite()) {
            return Err(PipelineError::Config(format!(
                "l2_regularization must be non-negative, got {}",
                c.l2_regularization
            )));
        }
        if !(2..=255).contains(&c.max_bins) {
            return Err(PipelineError::Config(format!(
                "max_bins must be in 2..=255, got {}",
                c.max_bins
            )));
        }
        if self.assembly.image_extensions.is_empty() {
            return Err(PipelineError::Config("image_extensions must not be empty".to_string()));
        }
        Ok(())
    }

    /// 設定情報を表示
    pub fn display(&self) {
        info!("=== 学習設定 ===");
        info!("画像ディレクトリ: {}", self.paths.images_dir.display());
        info!("アノテーションディレクトリ: {}", self.paths.annotations_dir.display());
        info!("出力先: {}", self.paths.output_path.display());
        info!("並列処理: {}", self.assembly.parallel);
        info!("対象拡張子: {}", self.assembly.image_extensions.join(", "));
        info!("テスト割合: {}", self.training.test_fraction);
        info!("シード: {}", self.training.seed);
        info!(
            "分類器: max_iter={}, learning_rate={}, max_depth={}, max_leaf_nodes={}, min_samples_leaf={}, l2={}, max_bins={}",
            self.classifier.max_iter,
            self.classifier.learning_rate,
            self.classifier.max_depth,
            self.classifier.max_leaf_nodes,
            self.classifier.min_samples_leaf,
            self.classifier.l2_regularization,
            self.classifier.max_bins
        );
    }
}
