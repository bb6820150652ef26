//! モデルバンドルのマニフェスト定義
//!
//! tar.gz 内の `manifest.json` として保存され、フォーマットバージョンと
//! 格納されている成果物の種類・順序を記録します。読み込み時はまずこれを検証し、
//! 想定と異なるバンドルは明示的なエラーにします。

use serde::{Deserialize, Serialize};

use crate::ml::preprocessing::ArtifactKind;
use crate::model::config::ClassifierSettings;
use crate::types::FEATURE_NAMES;

/// 現在のバンドルフォーマットバージョン
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// バンドルのマニフェスト
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    /// フォーマットバージョン
    pub format_version: u32,

    /// 格納されている成果物（順序付き: classifier, scaler, encoder）
    pub artifacts: Vec<ArtifactKind>,

    /// 特徴量の列名（推論時の列順の確認用）
    pub feature_names: Vec<String>,

    /// エンコーダのクラス順（コード0, コード1）
    pub classes: Vec<String>,

    /// 分類器のハイパーパラメータ
    pub classifier: ClassifierSettings,

    /// 分割に使用したシード
    pub seed: u64,

    /// 学習データ数
    pub n_train: usize,

    /// テストデータ数
    pub n_test: usize,

    /// 学習時刻（RFC3339形式）
    pub trained_at: String,
}

impl BundleManifest {
    /// 新しいマニフェストを作成
    pub fn new(
        classes: Vec<String>,
        classifier: ClassifierSettings,
        seed: u64,
        n_train: usize,
        n_test: usize,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            format_version: BUNDLE_FORMAT_VERSION,
            artifacts: ArtifactKind::BUNDLE_ORDER.to_vec(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            classes,
            classifier,
            seed,
            n_train,
            n_test,
            trained_at,
        }
    }

    /// マニフェストをJSON文字列に変換
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// JSON文字列からマニフェストを生成
    pub fn from_json_string(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
