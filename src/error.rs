//! エラー型の定義
//!
//! 画像単位の問題（アノテーション欠落、デコード失敗など）はエラーではなく
//! `SkipReason` としてデータセット構築の内部で吸収されます。
//! ここで定義するのは学習パイプライン全体を中断させる致命的エラーのみです。

use std::path::PathBuf;

use thiserror::Error;

use crate::types::PixelClass;

/// 学習パイプラインのステージ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingStage {
    Assembly,
    Split,
    Scaling,
    Encoding,
    Fitting,
    Evaluation,
    Persistence,
}

impl std::fmt::Display for TrainingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrainingStage::Assembly => "assembly",
            TrainingStage::Split => "split",
            TrainingStage::Scaling => "scaling",
            TrainingStage::Encoding => "encoding",
            TrainingStage::Fitting => "fitting",
            TrainingStage::Evaluation => "evaluation",
            TrainingStage::Persistence => "persistence",
        };
        write!(f, "{}", name)
    }
}

/// 学習パイプラインの致命的エラー
#[derive(Error, Debug)]
pub enum PipelineError {
    /// 全画像を処理してもラベル付き画素が1つもない
    #[error("no training data: no annotated pixels were found")]
    NoTrainingData,

    /// 層化分割に必要な件数（2件）に満たないクラスがある
    #[error("[split] class {class} has {count} example(s); at least 2 are required for a stratified split")]
    InsufficientClass { class: PixelClass, count: usize },

    /// ステージ付きの失敗
    #[error("[{stage}] {reason}")]
    Stage { stage: TrainingStage, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[persistence] {0}")]
    Bundle(#[from] BundleError),
}

impl PipelineError {
    pub fn stage(stage: TrainingStage, reason: impl Into<String>) -> Self {
        PipelineError::Stage {
            stage,
            reason: reason.into(),
        }
    }

    /// エラーが発生したステージ
    pub fn training_stage(&self) -> Option<TrainingStage> {
        match self {
            PipelineError::NoTrainingData => Some(TrainingStage::Assembly),
            PipelineError::InsufficientClass { .. } => Some(TrainingStage::Split),
            PipelineError::Stage { stage, .. } => Some(*stage),
            PipelineError::Bundle(_) => Some(TrainingStage::Persistence),
            PipelineError::Config(_) | PipelineError::Io { .. } => None,
        }
    }
}

/// モデルバンドルの保存・読み込みエラー
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("bundle I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode bundle member '{member}': {source}")]
    Encode {
        member: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode bundle member '{member}': {source}")]
    Decode {
        member: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("bundle member '{0}' is missing")]
    MissingMember(&'static str),

    #[error("unexpected bundle member '{0}'")]
    UnexpectedMember(String),

    #[error("unsupported bundle format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("inconsistent bundle: {0}")]
    Inconsistent(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_tag_in_message() {
        let err = PipelineError::stage(TrainingStage::Fitting, "boom");
        assert_eq!(err.to_string(), "[fitting] boom");
        assert_eq!(err.training_stage(), Some(TrainingStage::Fitting));
    }

    #[test]
    fn test_insufficient_class_is_split_stage() {
        let err = PipelineError::InsufficientClass {
            class: PixelClass::Shadow,
            count: 1,
        };
        assert_eq!(err.training_stage(), Some(TrainingStage::Split));
        assert!(err.to_string().contains("SOMBRA"));
    }

    #[test]
    fn test_bundle_error_is_persistence_stage() {
        let err: PipelineError = BundleError::MissingMember("scaler.json").into();
        assert_eq!(err.training_stage(), Some(TrainingStage::Persistence));
    }
}
