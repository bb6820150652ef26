//! 特徴量の標準化とラベルエンコード
//!
//! バンドルを構成する3つの成果物（分類器・スケーラ・エンコーダ）は
//! `FittedArtifact` を実装し、保存時の整合性チェックに使われます。

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, TrainingStage};
use crate::types::{FeatureVector, PixelClass, NUM_FEATURES};

/// バンドル内の成果物の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Classifier,
    Scaler,
    Encoder,
}

impl ArtifactKind {
    /// バンドル内での格納順
    pub const BUNDLE_ORDER: [ArtifactKind; 3] =
        [ArtifactKind::Classifier, ArtifactKind::Scaler, ArtifactKind::Encoder];

    /// アーカイブ内のファイル名
    pub fn member_name(&self) -> &'static str {
        match self {
            ArtifactKind::Classifier => "classifier.json",
            ArtifactKind::Scaler => "scaler.json",
            ArtifactKind::Encoder => "encoder.json",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Classifier => write!(f, "classifier"),
            ArtifactKind::Scaler => write!(f, "scaler"),
            ArtifactKind::Encoder => write!(f, "encoder"),
        }
    }
}

/// 学習済み成果物の共通インターフェース
pub trait FittedArtifact {
    fn kind(&self) -> ArtifactKind;

    /// 読み込み後の構造検証（不正なら理由を返す）
    fn check(&self) -> Result<(), String>;
}

/// 特徴量を変換する成果物
pub trait Transform {
    fn transform(&self, features: &[FeatureVector]) -> Vec<FeatureVector>;
}

/// クラスコードを予測する成果物
pub trait Predict {
    /// 各サンプルのクラスコード（0 または 1）
    fn predict(&self, features: &[FeatureVector]) -> Vec<u8>;

    /// 各サンプルがクラスコード1である確率
    fn predict_proba(&self, features: &[FeatureVector]) -> Vec<f64>;
}

/// 平均0・分散1への標準化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: [f64; NUM_FEATURES],
    /// 標準偏差（分散0の列は1.0）
    pub scale: [f64; NUM_FEATURES],
    pub n_samples_seen: usize,
}

impl StandardScaler {
    /// 学習データのみから平均と標準偏差を求める
    pub fn fit(features: &[FeatureVector]) -> Result<Self, PipelineError> {
        if features.is_empty() {
            return Err(PipelineError::stage(
                TrainingStage::Scaling,
                "cannot fit scaler on an empty partition",
            ));
        }
        let n = features.len() as f64;

        let mut mean = [0.0f64; NUM_FEATURES];
        for row in features {
            for (m, &v) in mean.iter_mut().zip(row.iter()) {
                *m += v as f64;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = [0.0f64; NUM_FEATURES];
        for row in features {
            for ((acc, &v), m) in var.iter_mut().zip(row.iter()).zip(mean.iter()) {
                let d = v as f64 - m;
                *acc += d * d;
            }
        }

        let mut scale = [1.0f64; NUM_FEATURES];
        for (s, v) in scale.iter_mut().zip(var.iter()) {
            let std = (v / n).sqrt();
            if std > 0.0 {
                *s = std;
            }
        }

        if mean.iter().chain(scale.iter()).any(|v| !v.is_finite()) {
            return Err(PipelineError::stage(
                TrainingStage::Scaling,
                "scaler statistics are not finite",
            ));
        }

        Ok(Self {
            mean,
            scale,
            n_samples_seen: features.len(),
        })
    }

    /// 1サンプルを変換
    pub fn transform_one(&self, features: &FeatureVector) -> FeatureVector {
        let mut out = [0.0f32; NUM_FEATURES];
        for (i, o) in out.iter_mut().enumerate() {
            *o = ((features[i] as f64 - self.mean[i]) / self.scale[i]) as f32;
        }
        out
    }
}

impl Transform for StandardScaler {
    fn transform(&self, features: &[FeatureVector]) -> Vec<FeatureVector> {
        features.iter().map(|f| self.transform_one(f)).collect()
    }
}

impl FittedArtifact for StandardScaler {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Scaler
    }

    fn check(&self) -> Result<(), String> {
        if self.scale.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err("scaler has a non-positive or non-finite scale".to_string());
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err("scaler has a non-finite mean".to_string());
        }
        Ok(())
    }
}

/// クラスラベル ⇔ 整数コードの変換
///
/// クラスはラベル文字列のアルファベット順に並べ、その位置をコードとする
/// （LUZ = 0, SOMBRA = 1）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    pub classes: Vec<PixelClass>,
}

impl LabelEncoder {
    pub fn fit(labels: &[PixelClass]) -> Result<Self, PipelineError> {
        let mut classes: Vec<PixelClass> = Vec::new();
        for &label in labels {
            if !classes.contains(&label) {
                classes.push(label);
            }
        }
        classes.sort_by_key(|c| c.as_str());

        if classes.len() != 2 {
            return Err(PipelineError::stage(
                TrainingStage::Encoding,
                format!("expected exactly 2 classes, found {}", classes.len()),
            ));
        }
        Ok(Self { classes })
    }

    pub fn encode(&self, label: PixelClass) -> Option<u8> {
        self.classes.iter().position(|&c| c == label).map(|i| i as u8)
    }

    pub fn decode(&self, code: u8) -> Option<PixelClass> {
        self.classes.get(code as usize).copied()
    }

    /// ラベル列をコード列に変換
    pub fn transform(&self, labels: &[PixelClass]) -> Result<Vec<u8>, PipelineError> {
        labels
            .iter()
            .map(|&label| {
                self.encode(label).ok_or_else(|| {
                    PipelineError::stage(
                        TrainingStage::Encoding,
                        format!("label {} was not seen while fitting the encoder", label),
                    )
                })
            })
            .collect()
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes.iter().map(|c| c.as_str().to_string()).collect()
    }
}

impl FittedArtifact for LabelEncoder {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Encoder
    }

    fn check(&self) -> Result<(), String> {
        if self.classes.len() != 2 {
            return Err(format!("encoder must hold 2 classes, found {}", self.classes.len()));
        }
        if self.classes[0] == self.classes[1] {
            return Err("encoder classes are duplicated".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(v: f32) -> FeatureVector {
        [v; NUM_FEATURES]
    }

    #[test]
    fn test_scaler_zero_mean_unit_variance() {
        let data = vec![row(1.0), row(2.0), row(3.0), row(4.0)];
        let scaler = StandardScaler::fit(&data).unwrap();
        assert!((scaler.mean[0] - 2.5).abs() < 1e-12);

        let scaled = scaler.transform(&data);
        let mean: f64 = scaled.iter().map(|r| r[0] as f64).sum::<f64>() / 4.0;
        let var: f64 = scaled.iter().map(|r| (r[0] as f64 - mean).powi(2)).sum::<f64>() / 4.0;
        assert!(mean.abs() < 1e-6);
        assert!((var - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_scaler_constant_column_uses_unit_scale() {
        let data = vec![row(5.0), row(5.0)];
        let scaler = StandardScaler::fit(&data).unwrap();
        assert_eq!(scaler.scale[3], 1.0);
        assert_eq!(scaler.transform_one(&row(5.0))[3], 0.0);
        assert!(scaler.check().is_ok());
    }

    #[test]
    fn test_scaler_empty_is_scaling_error() {
        let err = StandardScaler::fit(&[]).unwrap_err();
        assert_eq!(err.training_stage(), Some(TrainingStage::Scaling));
    }

    #[test]
    fn test_encoder_alphabetical_order() {
        let labels = [PixelClass::Shadow, PixelClass::Light, PixelClass::Shadow];
        let encoder = LabelEncoder::fit(&labels).unwrap();
        assert_eq!(encoder.class_names(), vec!["LUZ", "SOMBRA"]);
        assert_eq!(encoder.transform(&labels).unwrap(), vec![1, 0, 1]);
        assert_eq!(encoder.decode(0), Some(PixelClass::Light));
        assert_eq!(encoder.decode(2), None);
    }

    #[test]
    fn test_encoder_requires_two_classes() {
        let err = LabelEncoder::fit(&[PixelClass::Light, PixelClass::Light]).unwrap_err();
        assert_eq!(err.training_stage(), Some(TrainingStage::Encoding));
    }

    #[test]
    fn test_artifact_kinds() {
        let scaler = StandardScaler::fit(&[row(1.0)]).unwrap();
        assert_eq!(scaler.kind(), ArtifactKind::Scaler);
        assert_eq!(ArtifactKind::Encoder.member_name(), "encoder.json");
    }
}
