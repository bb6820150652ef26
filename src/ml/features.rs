//! 画素単位の特徴量抽出
//!
//! 1画素のRGB値から10次元の特徴量ベクトルを計算します。
//!
//! 列構成:
//! - [0..3] R, G, B（生の値）
//! - [3..6] H, S, V（8bit HSV: H は 0..180、S/V は 0..255）
//! - [6] 輝度 0.299R + 0.587G + 0.114B
//! - [7] 彩度（S の複製。既存の学習済みフォーマットとの互換性のため独立した列として保持）
//! - [8] NDVI近似 (G - R) / (G + R + 1e-8)
//! - [9] チャネル分散（1画素内の3チャネルの分散。空間的なテクスチャではない）

use crate::types::{FeatureVector, Rgb};

/// NDVI近似のゼロ除算回避用ε
pub const NDVI_EPSILON: f32 = 1e-8;

const HSV_SHIFT: i32 = 12;

/// 8bit HSV変換（H: 0..180, S: 0..255, V: 0..255）
///
/// 整数演算の固定小数点変換で、一般的な画像処理ライブラリの8bit HSVと同じ値になる。
pub fn rgb_to_hsv8(rgb: Rgb) -> [u8; 3] {
    let [r, g, b] = rgb.map(i32::from);
    let v = r.max(g).max(b);
    let vmin = r.min(g).min(b);
    let diff = v - vmin;

    let s = if v == 0 {
        0
    } else {
        let sdiv = ((255i64 << HSV_SHIFT) as f64 / v as f64).round_ties_even() as i32;
        (diff * sdiv + (1 << (HSV_SHIFT - 1))) >> HSV_SHIFT
    };

    let h = if diff == 0 {
        0
    } else {
        let raw = if v == r {
            g - b
        } else if v == g {
            b - r + 2 * diff
        } else {
            r - g + 4 * diff
        };
        let hdiv = ((180i64 << HSV_SHIFT) as f64 / (6.0 * diff as f64)).round_ties_even() as i32;
        let h = (raw * hdiv + (1 << (HSV_SHIFT - 1))) >> HSV_SHIFT;
        if h < 0 {
            h + 180
        } else {
            h
        }
    };

    [h as u8, s as u8, v as u8]
}

/// 1画素の特徴量を計算（浮動小数点入力）
///
/// HSV変換のみ 0..255 にクランプした8bit値を使い、それ以外は入力値そのものを使う。
/// 非有限値はそのまま残るので、データセットに加える前に `sanitize_features` を通すこと。
pub fn pixel_features_f32(rgb: [f32; 3]) -> FeatureVector {
    let [r, g, b] = rgb;

    let rgb8 = rgb.map(|c| c.clamp(0.0, 255.0) as u8);
    let [h, s, v] = rgb_to_hsv8(rgb8).map(f32::from);

    let luminance = 0.299 * r + 0.587 * g + 0.114 * b;
    let ndvi = (g - r) / (g + r + NDVI_EPSILON);

    let mean = (r + g + b) / 3.0;
    let dispersion = ((r - mean).powi(2) + (g - mean).powi(2) + (b - mean).powi(2)) / 3.0;

    [r, g, b, h, s, v, luminance, s, ndvi, dispersion]
}

/// 1画素の特徴量を計算
pub fn pixel_features(rgb: Rgb) -> FeatureVector {
    pixel_features_f32(rgb.map(f32::from))
}

/// 複数画素の特徴量をまとめて計算
pub fn extract_features(pixels: &[Rgb]) -> Vec<FeatureVector> {
    pixels.iter().map(|&p| pixel_features(p)).collect()
}

/// 非有限値（NaN / Inf）を 0.0 に置き換え、置き換えた数を返す
pub fn sanitize_features(features: &mut FeatureVector) -> usize {
    let mut replaced = 0;
    for value in features.iter_mut() {
        if !value.is_finite() {
            *value = 0.0;
            replaced += 1;
        }
    }
    replaced
}

/// 全列が有限値かどうか
pub fn is_finite(features: &FeatureVector) -> bool {
    features.iter().all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_fields_finite_for_8bit_inputs() {
        for r in (0..=255u16).step_by(17) {
            for g in (0..=255u16).step_by(17) {
                for b in (0..=255u16).step_by(51) {
                    let f = pixel_features([r as u8, g as u8, b as u8]);
                    assert!(is_finite(&f), "non-finite feature for ({}, {}, {})", r, g, b);
                }
            }
        }
    }

    #[test]
    fn test_ndvi_extremes() {
        let red = pixel_features([255, 0, 0]);
        assert!((red[8] + 1.0).abs() < 1e-6);

        let green = pixel_features([0, 255, 0]);
        assert!((green[8] - 1.0).abs() < 1e-6);

        let black = pixel_features([0, 0, 0]);
        assert_eq!(black[8], 0.0);
    }

    #[test]
    fn test_ndvi_bounded() {
        for r in (0..=255u16).step_by(5) {
            for g in (0..=255u16).step_by(5) {
                let f = pixel_features([r as u8, g as u8, 0]);
                assert!(f[8] >= -1.0 - 1e-6 && f[8] <= 1.0 + 1e-6);
            }
        }
    }

    #[test]
    fn test_hsv_known_values() {
        assert_eq!(rgb_to_hsv8([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv8([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv8([0, 0, 255]), [120, 255, 255]);
        assert_eq!(rgb_to_hsv8([128, 128, 128]), [0, 0, 128]);
        assert_eq!(rgb_to_hsv8([0, 0, 0]), [0, 0, 0]);
    }

    #[test]
    fn test_column_layout() {
        let f = pixel_features([10, 20, 30]);
        assert_eq!(&f[0..3], &[10.0, 20.0, 30.0]);
        // 彩度の複製列
        assert_eq!(f[4], f[7]);
        let lum = 0.299 * 10.0 + 0.587 * 20.0 + 0.114 * 30.0;
        assert!((f[6] - lum).abs() < 1e-4);
        // 分散 = ((-10)^2 + 0 + 10^2) / 3
        assert!((f[9] - 200.0 / 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_uniform_pixel_has_zero_dispersion() {
        let f = pixel_features([77, 77, 77]);
        assert_eq!(f[9], 0.0);
    }

    #[test]
    fn test_sanitize_replaces_non_finite() {
        let mut f = pixel_features_f32([f32::NAN, 10.0, f32::INFINITY]);
        let replaced = sanitize_features(&mut f);
        assert!(replaced > 0);
        assert!(is_finite(&f));
    }

    #[test]
    fn test_out_of_range_input_is_clamped_for_hsv() {
        let f = pixel_features_f32([300.0, -5.0, 0.0]);
        assert_eq!(f[0], 300.0);
        assert_eq!(f[5], 255.0);
    }

    #[test]
    fn test_extract_features_preserves_order() {
        let pixels = [[1, 2, 3], [4, 5, 6]];
        let features = extract_features(&pixels);
        assert_eq!(features.len(), 2);
        assert_eq!(features[1][0], 4.0);
    }
}
