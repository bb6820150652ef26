//! 推論
//!
//! 学習済みバンドルを読み込んだ推論側が呼び出す画素分類の入口。
//! 特徴量の計算は学習時と同じ `features` モジュールを通す。

use image::RgbImage;
use log::warn;

use crate::ml::features::{pixel_features, sanitize_features};
use crate::model::model_bundle::ModelBundle;
use crate::types::{FeatureVector, PixelClass, Rgb};

/// 画素色をクラスに分類するもの
pub trait PixelClassifier {
    fn classify(&self, pixels: &[Rgb]) -> Vec<PixelClass>;
}

impl ModelBundle {
    /// 画素色（RGB）から特徴量を計算してクラスを予測
    pub fn classify(&self, pixels: &[Rgb]) -> Vec<PixelClass> {
        let mut coerced = 0;
        let features: Vec<FeatureVector> = pixels
            .iter()
            .map(|&p| {
                let mut f = pixel_features(p);
                coerced += sanitize_features(&mut f);
                f
            })
            .collect();
        if coerced > 0 {
            warn!("非有限の特徴量 {} 個を 0.0 に置き換えました", coerced);
        }
        self.predict_features(&features)
    }

    /// 画像全体を行優先の順で分類
    pub fn classify_image(&self, image: &RgbImage) -> Vec<PixelClass> {
        let pixels: Vec<Rgb> = image.pixels().map(|p| p.0).collect();
        self.classify(&pixels)
    }
}

impl PixelClassifier for ModelBundle {
    fn classify(&self, pixels: &[Rgb]) -> Vec<PixelClass> {
        ModelBundle::classify(self, pixels)
    }
}
