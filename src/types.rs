use serde::{Deserialize, Serialize};

/// 8bit RGB画素
pub type Rgb = [u8; 3];

/// 特徴量の次元数
pub const NUM_FEATURES: usize = 10;

/// 1画素分の特徴量ベクトル（列順は `FEATURE_NAMES` を参照）
pub type FeatureVector = [f32; NUM_FEATURES];

/// 特徴量の列名（永続化されるマニフェストにも記録される）
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "red",
    "green",
    "blue",
    "hue",
    "saturation",
    "value",
    "luminance",
    "saturation_dup",
    "ndvi",
    "channel_dispersion",
];

/// 画素クラス（光 / 影）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PixelClass {
    #[serde(rename = "LUZ")]
    Light,
    #[serde(rename = "SOMBRA")]
    Shadow,
}

impl PixelClass {
    /// 両クラス（固定順）
    pub const ALL: [PixelClass; 2] = [PixelClass::Light, PixelClass::Shadow];

    /// データセット上のラベル文字列
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelClass::Light => "LUZ",
            PixelClass::Shadow => "SOMBRA",
        }
    }

    /// クラスマスク上の値
    pub fn mask_value(&self) -> u8 {
        match self {
            PixelClass::Light => MASK_LIGHT,
            PixelClass::Shadow => MASK_SHADOW,
        }
    }

    /// クラスマスクの値から変換（0 = 未ラベルは None）
    pub fn from_mask_value(value: u8) -> Option<Self> {
        match value {
            MASK_LIGHT => Some(PixelClass::Light),
            MASK_SHADOW => Some(PixelClass::Shadow),
            _ => None,
        }
    }

    /// ラベル文字列から変換
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "LUZ" => Some(PixelClass::Light),
            "SOMBRA" => Some(PixelClass::Shadow),
            _ => None,
        }
    }
}

impl std::fmt::Display for PixelClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub const MASK_UNLABELED: u8 = 0;
pub const MASK_LIGHT: u8 = 1;
pub const MASK_SHADOW: u8 = 2;
