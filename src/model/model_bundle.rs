//! 学習済みモデルバンドル（分類器 + スケーラ + エンコーダ）
//!
//! 3つの成果物は同じ学習データから作られたものとして一体で扱い、
//! 個別に取り出して保存する手段は提供しない。

use crate::error::BundleError;
use crate::ml::gbdt::GradientBoostedTrees;
use crate::ml::preprocessing::{FittedArtifact, LabelEncoder, Predict, StandardScaler};
use crate::model::model_metadata::{BundleManifest, BUNDLE_FORMAT_VERSION};
use crate::types::{FeatureVector, PixelClass, FEATURE_NAMES};

/// 学習済みモデルバンドル
#[derive(Debug, Clone, PartialEq)]
pub struct ModelBundle {
    manifest: BundleManifest,
    classifier: GradientBoostedTrees,
    scaler: StandardScaler,
    encoder: LabelEncoder,
}

impl ModelBundle {
    /// 3つの成果物からバンドルを作成（整合性を検証する）
    pub fn new(
        manifest: BundleManifest,
        classifier: GradientBoostedTrees,
        scaler: StandardScaler,
        encoder: LabelEncoder,
    ) -> Result<Self, BundleError> {
        let bundle = Self {
            manifest,
            classifier,
            scaler,
            encoder,
        };
        bundle.verify()?;
        Ok(bundle)
    }

    fn verify(&self) -> Result<(), BundleError> {
        let m = &self.manifest;
        if m.format_version != BUNDLE_FORMAT_VERSION {
            return Err(BundleError::UnsupportedVersion {
                found: m.format_version,
                expected: BUNDLE_FORMAT_VERSION,
            });
        }

        let artifacts: [&dyn FittedArtifact; 3] = [&self.classifier, &self.scaler, &self.encoder];
        let kinds: Vec<_> = artifacts.iter().map(|a| a.kind()).collect();
        if m.artifacts != kinds {
            return Err(BundleError::Inconsistent(format!(
                "manifest lists artifacts {:?}, expected {:?}",
                m.artifacts, kinds
            )));
        }
        for artifact in artifacts {
            artifact
                .check()
                .map_err(|e| BundleError::Inconsistent(format!("{}: {}", artifact.kind(), e)))?;
        }

        if m.classes != self.encoder.class_names() {
            return Err(BundleError::Inconsistent(format!(
                "manifest classes {:?} do not match encoder classes {:?}",
                m.classes,
                self.encoder.class_names()
            )));
        }
        if m.feature_names != FEATURE_NAMES {
            return Err(BundleError::Inconsistent(format!(
                "manifest feature columns {:?} do not match {:?}",
                m.feature_names, FEATURE_NAMES
            )));
        }
        if m.classifier != self.classifier.params {
            return Err(BundleError::Inconsistent(
                "manifest hyperparameters do not match the classifier".to_string(),
            ));
        }
        Ok(())
    }

    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    pub fn classifier(&self) -> &GradientBoostedTrees {
        &self.classifier
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn encoder(&self) -> &LabelEncoder {
        &self.encoder
    }

    /// 未スケーリングの特徴量からクラスを予測
    pub fn predict_features(&self, features: &[FeatureVector]) -> Vec<PixelClass> {
        let scaled: Vec<FeatureVector> = features.iter().map(|f| self.scaler.transform_one(f)).collect();
        self.classifier
            .predict(&scaled)
            .into_iter()
            .map(|code| self.decode(code))
            .collect()
    }

    /// 未スケーリングの特徴量から、コード1のクラス（`encoder().classes[1]`）の確率を返す
    pub fn predict_proba(&self, features: &[FeatureVector]) -> Vec<f64> {
        let scaled: Vec<FeatureVector> = features.iter().map(|f| self.scaler.transform_one(f)).collect();
        self.classifier.predict_proba(&scaled)
    }

    fn decode(&self, code: u8) -> PixelClass {
        // verify() で2クラスであることは保証済み
        self.encoder
            .decode(code)
            .unwrap_or(self.encoder.classes[self.encoder.classes.len() - 1])
    }
}
