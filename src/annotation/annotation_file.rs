//! アノテーションファイル（LabelMe形式JSON）の定義と読み込み
//!
//! ```json
//! {
//!   "shapes": [
//!     { "label": "SUELO_LUZ", "points": [[10.0, 12.5], [40.0, 12.0], [25.0, 30.0]] }
//!   ],
//!   "imagePath": "IMG_0001.jpg",
//!   "imageHeight": 3024,
//!   "imageWidth": 4032
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::PixelClass;

/// 光クラスに対応するラベル
pub const LIGHT_LABELS: [&str; 2] = ["SUELO_LUZ", "MALLA_LUZ"];

/// 影クラスに対応するラベル
pub const SHADOW_LABELS: [&str; 2] = ["SUELO_SOMBRA", "MALLA_SOMBRA"];

/// アノテーションラベルを画素クラスに変換（対象外のラベルは None）
pub fn class_for_label(label: &str) -> Option<PixelClass> {
    if LIGHT_LABELS.contains(&label) {
        Some(PixelClass::Light)
    } else if SHADOW_LABELS.contains(&label) {
        Some(PixelClass::Shadow)
    } else {
        None
    }
}

/// 1つの図形
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shape {
    /// ラベル文字列
    pub label: String,

    /// 多角形の頂点 [x, y]（順序付き、閉じた多角形として扱う）
    #[serde(default)]
    pub points: Vec<[f64; 2]>,

    /// 図形の種類（未指定時は None。多角形として扱う）
    #[serde(default)]
    pub shape_type: Option<String>,

    /// グループID（未使用、未指定時は None）
    #[serde(default)]
    pub group_id: Option<i64>,
}

impl Shape {
    /// この図形の画素クラス
    pub fn class(&self) -> Option<PixelClass> {
        class_for_label(&self.label)
    }

    /// 整数の画素座標に変換した頂点（0方向への切り捨て）
    pub fn pixel_points(&self) -> Vec<(i64, i64)> {
        self.points
            .iter()
            .map(|[x, y]| (x.trunc() as i64, y.trunc() as i64))
            .collect()
    }
}

/// アノテーションファイル全体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationFile {
    /// 図形一覧（未指定時は空）
    #[serde(default)]
    pub shapes: Vec<Shape>,

    /// 対応する画像ファイル名（未指定時は None）
    #[serde(default)]
    pub image_path: Option<String>,

    /// 画像の高さ（未指定時は None。マスクサイズは常に実画像から決める）
    #[serde(default)]
    pub image_height: Option<u32>,

    /// 画像の幅（未指定時は None）
    #[serde(default)]
    pub image_width: Option<u32>,
}

impl AnnotationFile {
    /// JSON文字列から読み込む
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse annotation JSON")
    }

    /// ファイルから読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read annotation file: {:?}", path))?;
        Self::from_json_str(&content)
    }

    /// 光 / 影に対応する図形の数
    pub fn num_class_shapes(&self) -> usize {
        self.shapes.iter().filter(|s| s.class().is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_vocabulary() {
        assert_eq!(class_for_label("SUELO_LUZ"), Some(PixelClass::Light));
        assert_eq!(class_for_label("MALLA_LUZ"), Some(PixelClass::Light));
        assert_eq!(class_for_label("SUELO_SOMBRA"), Some(PixelClass::Shadow));
        assert_eq!(class_for_label("MALLA_SOMBRA"), Some(PixelClass::Shadow));
        assert_eq!(class_for_label("TRONCO"), None);
        assert_eq!(class_for_label("suelo_luz"), None);
    }

    #[test]
    fn test_parse_labelme_document() {
        let json = r#"{
            "version": "5.2.1",
            "flags": {},
            "shapes": [
                {"label": "SUELO_LUZ", "points": [[0, 0], [10.9, 0], [10, 10]], "shape_type": "polygon", "group_id": null}
            ],
            "imagePath": "a.jpg",
            "imageHeight": 20,
            "imageWidth": 30
        }"#;
        let ann = AnnotationFile::from_json_str(json).unwrap();
        assert_eq!(ann.shapes.len(), 1);
        assert_eq!(ann.image_width, Some(30));
        assert_eq!(ann.shapes[0].pixel_points(), vec![(0, 0), (10, 0), (10, 10)]);
        assert_eq!(ann.num_class_shapes(), 1);
    }

    #[test]
    fn test_missing_optional_fields_use_defaults() {
        let ann = AnnotationFile::from_json_str("{}").unwrap();
        assert!(ann.shapes.is_empty());
        assert_eq!(ann.image_path, None);

        let ann = AnnotationFile::from_json_str(r#"{"shapes": [{"label": "MALLA_SOMBRA"}]}"#).unwrap();
        assert!(ann.shapes[0].points.is_empty());
        assert_eq!(ann.shapes[0].shape_type, None);
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(AnnotationFile::from_json_str("{ not json").is_err());
        assert!(AnnotationFile::from_json_str(r#"{"shapes": [{"points": []}]}"#).is_err());
    }
}
