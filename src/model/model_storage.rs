//! モデルバンドルの永続化
//!
//! Tar.gz形式でマニフェストと3つの成果物を1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - manifest.json   - フォーマットバージョン、成果物の種類と順序、クラス、ハイパーパラメータ
//! - classifier.json - 勾配ブースティング分類器
//! - scaler.json     - 標準化パラメータ
//! - encoder.json    - ラベルエンコーダ
//!
//! 保存は同じディレクトリの一時ファイルに書き出してから置き換えるため、
//! 途中で失敗しても不完全なバンドルは残りません。

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::error::BundleError;
use crate::ml::preprocessing::ArtifactKind;
use crate::model::model_bundle::ModelBundle;
use crate::model::model_metadata::{BundleManifest, BUNDLE_FORMAT_VERSION};

/// マニフェストのファイル名
pub const MANIFEST_MEMBER: &str = "manifest.json";

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BundleError + '_ {
    move |source| BundleError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn append_member<W: std::io::Write>(
    builder: &mut Builder<W>,
    name: &str,
    bytes: &[u8],
) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, bytes)
}

fn encode_member<T: Serialize>(member: &'static str, value: &T) -> Result<Vec<u8>, BundleError> {
    serde_json::to_vec(value).map_err(|source| BundleError::Encode { member, source })
}

/// 保存先パスを正規化（拡張子が .gz でなければ末尾に .tar.gz を付け足す）
pub fn bundle_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        return output_path.to_path_buf();
    }
    let mut name = output_path.as_os_str().to_owned();
    name.push(".tar.gz");
    let path = PathBuf::from(name);
    info!("保存先を {} に変更します", path.display());
    path
}

/// バンドルをTar.gz形式で保存し、実際の保存先を返す
pub fn save_bundle(output_path: &Path, bundle: &ModelBundle) -> Result<PathBuf, BundleError> {
    let tar_gz_path = bundle_path(output_path);

    // 先にすべてエンコードしておき、ファイルを作る前に失敗を検出する
    let manifest = bundle
        .manifest()
        .to_json_string()
        .map_err(|source| BundleError::Encode {
            member: MANIFEST_MEMBER,
            source,
        })?;
    let members = [
        (
            ArtifactKind::Classifier.member_name(),
            encode_member(ArtifactKind::Classifier.member_name(), bundle.classifier())?,
        ),
        (
            ArtifactKind::Scaler.member_name(),
            encode_member(ArtifactKind::Scaler.member_name(), bundle.scaler())?,
        ),
        (
            ArtifactKind::Encoder.member_name(),
            encode_member(ArtifactKind::Encoder.member_name(), bundle.encoder())?,
        ),
    ];

    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = tar_gz_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
    }

    let mut tmp_name = tar_gz_path.as_os_str().to_owned();
    tmp_name.push(".partial");
    let tmp_path = PathBuf::from(tmp_name);

    let result = write_archive(&tmp_path, manifest.as_bytes(), &members)
        .and_then(|_| std::fs::rename(&tmp_path, &tar_gz_path).map_err(io_error(&tar_gz_path)));
    if result.is_err() {
        std::fs::remove_file(&tmp_path).ok();
    }
    result?;

    info!("モデルバンドルを保存しました: {}", tar_gz_path.display());
    Ok(tar_gz_path)
}

fn write_archive(path: &Path, manifest: &[u8], members: &[(&str, Vec<u8>)]) -> Result<(), BundleError> {
    let file = File::create(path).map_err(io_error(path))?;

    // Gzip圧縮を設定
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);

    append_member(&mut builder, MANIFEST_MEMBER, manifest).map_err(io_error(path))?;
    for (name, bytes) in members {
        append_member(&mut builder, name, bytes).map_err(io_error(path))?;
    }

    // tarアーカイブとgzipストリームを完成させる
    let encoder = builder.into_inner().map_err(io_error(path))?;
    let file = encoder.finish().map_err(io_error(path))?;
    file.sync_all().map_err(io_error(path))?;
    Ok(())
}

/// Tar.gzの全メンバーを (名前, 内容) で読み込む
fn read_members(tar_gz_path: &Path) -> Result<Vec<(String, Vec<u8>)>, BundleError> {
    let file = File::open(tar_gz_path).map_err(io_error(tar_gz_path))?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);

    let mut members = Vec::new();
    for entry in archive.entries().map_err(io_error(tar_gz_path))? {
        let mut entry = entry.map_err(io_error(tar_gz_path))?;
        let name = entry
            .path()
            .map_err(io_error(tar_gz_path))?
            .to_string_lossy()
            .to_string();
        let mut buffer = Vec::new();
        entry.read_to_end(&mut buffer).map_err(io_error(tar_gz_path))?;
        members.push((name, buffer));
    }
    Ok(members)
}

fn take_member(members: &mut Vec<(String, Vec<u8>)>, name: &'static str) -> Result<Vec<u8>, BundleError> {
    let pos = members
        .iter()
        .position(|(n, _)| n == name)
        .ok_or(BundleError::MissingMember(name))?;
    Ok(members.remove(pos).1)
}

fn decode_member<T: DeserializeOwned>(name: &str, bytes: &[u8]) -> Result<T, BundleError> {
    serde_json::from_slice(bytes).map_err(|source| BundleError::Decode {
        member: name.to_string(),
        source,
    })
}

/// Tar.gzからマニフェストのみを読み込む
pub fn load_manifest(tar_gz_path: &Path) -> Result<BundleManifest, BundleError> {
    let mut members = read_members(tar_gz_path)?;
    let bytes = take_member(&mut members, MANIFEST_MEMBER)?;
    decode_member(MANIFEST_MEMBER, &bytes)
}

/// Tar.gzからバンドル全体を読み込む
///
/// マニフェストのバージョン・成果物の並びを確認し、メンバーの欠落や余分なメンバー、
/// デコード失敗、成果物間の不整合はすべてエラーにする。
pub fn load_bundle(tar_gz_path: &Path) -> Result<ModelBundle, BundleError> {
    let mut members = read_members(tar_gz_path)?;

    let manifest: BundleManifest = decode_member(MANIFEST_MEMBER, &take_member(&mut members, MANIFEST_MEMBER)?)?;
    if manifest.format_version != BUNDLE_FORMAT_VERSION {
        return Err(BundleError::UnsupportedVersion {
            found: manifest.format_version,
            expected: BUNDLE_FORMAT_VERSION,
        });
    }
    if manifest.artifacts != ArtifactKind::BUNDLE_ORDER {
        return Err(BundleError::Inconsistent(format!(
            "manifest lists artifacts {:?}, expected {:?}",
            manifest.artifacts,
            ArtifactKind::BUNDLE_ORDER
        )));
    }

    let classifier_name = ArtifactKind::Classifier.member_name();
    let scaler_name = ArtifactKind::Scaler.member_name();
    let encoder_name = ArtifactKind::Encoder.member_name();

    let classifier = decode_member(classifier_name, &take_member(&mut members, classifier_name)?)?;
    let scaler = decode_member(scaler_name, &take_member(&mut members, scaler_name)?)?;
    let encoder = decode_member(encoder_name, &take_member(&mut members, encoder_name)?)?;

    if let Some((name, _)) = members.into_iter().next() {
        return Err(BundleError::UnexpectedMember(name));
    }

    ModelBundle::new(manifest, classifier, scaler, encoder)
}

/// マニフェストをログに表示
pub fn print_manifest_info(manifest: &BundleManifest) {
    info!("=== モデルバンドル ===");
    info!("フォーマットバージョン: {}", manifest.format_version);
    info!(
        "成果物: {}",
        manifest
            .artifacts
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("クラス: {}", manifest.classes.join(", "));
    info!("特徴量: {}", manifest.feature_names.join(", "));
    info!(
        "分類器: max_iter={}, learning_rate={}, max_depth={}",
        manifest.classifier.max_iter, manifest.classifier.learning_rate, manifest.classifier.max_depth
    );
    info!("シード: {}", manifest.seed);
    info!("学習 / テスト: {} / {}", manifest.n_train, manifest.n_test);
    info!("学習日時: {}", manifest.trained_at);
    info!("========================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::gbdt::GradientBoostedTrees;
    use crate::ml::preprocessing::{LabelEncoder, StandardScaler, Transform};
    use crate::model::config::ClassifierSettings;
    use crate::types::{FeatureVector, PixelClass, NUM_FEATURES};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("canopy_shade_storage_{}_{}", name, std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn tiny_bundle() -> ModelBundle {
        let mut features: Vec<FeatureVector> = Vec::new();
        let mut labels = Vec::new();
        for i in 0..60 {
            let mut row = [0.0f32; NUM_FEATURES];
            row[0] = i as f32;
            row[6] = (i * 3 % 11) as f32;
            features.push(row);
            labels.push(if i < 30 { PixelClass::Light } else { PixelClass::Shadow });
        }
        let params = ClassifierSettings {
            max_iter: 5,
            min_samples_leaf: 3,
            ..ClassifierSettings::default()
        };
        let scaler = StandardScaler::fit(&features).unwrap();
        let encoder = LabelEncoder::fit(&labels).unwrap();
        let codes = encoder.transform(&labels).unwrap();
        let classifier = GradientBoostedTrees::fit(&params, &scaler.transform(&features), &codes, 42).unwrap();
        let manifest = BundleManifest::new(encoder.class_names(), params, 42, 60, 0);
        ModelBundle::new(manifest, classifier, scaler, encoder).unwrap()
    }

    fn encoded_members(bundle: &ModelBundle) -> (Vec<u8>, Vec<(&'static str, Vec<u8>)>) {
        let manifest = bundle.manifest().to_json_string().unwrap().into_bytes();
        let members = vec![
            ("classifier.json", serde_json::to_vec(bundle.classifier()).unwrap()),
            ("scaler.json", serde_json::to_vec(bundle.scaler()).unwrap()),
            ("encoder.json", serde_json::to_vec(bundle.encoder()).unwrap()),
        ];
        (manifest, members)
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = scratch_dir("roundtrip");
        let bundle = tiny_bundle();
        let path = save_bundle(&dir.join("model.tar.gz"), &bundle).unwrap();
        assert!(path.exists());
        assert!(!dir.join("model.tar.gz.partial").exists());

        let loaded = load_bundle(&path).unwrap();
        assert_eq!(loaded, bundle);

        let probe: Vec<FeatureVector> = (0..60).map(|i| {
            let mut row = [0.0f32; NUM_FEATURES];
            row[0] = i as f32 + 0.25;
            row
        }).collect();
        assert_eq!(loaded.predict_features(&probe), bundle.predict_features(&probe));
        assert_eq!(loaded.predict_proba(&probe), bundle.predict_proba(&probe));

        assert_eq!(load_manifest(&path).unwrap(), *bundle.manifest());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_bundle_path_adds_extension() {
        assert_eq!(bundle_path(Path::new("out/model")), PathBuf::from("out/model.tar.gz"));
        assert_eq!(bundle_path(Path::new("out/model.tar.gz")), PathBuf::from("out/model.tar.gz"));
        assert_eq!(bundle_path(Path::new("out/model.v2")), PathBuf::from("out/model.v2.tar.gz"));
        assert_eq!(bundle_path(Path::new("out/model.pkl")), PathBuf::from("out/model.pkl.tar.gz"));
    }

    #[test]
    fn test_missing_member_is_error() {
        let dir = scratch_dir("missing");
        let bundle = tiny_bundle();
        let (manifest, mut members) = encoded_members(&bundle);
        members.remove(1);
        let path = dir.join("broken.tar.gz");
        write_archive(&path, &manifest, &members).unwrap();

        match load_bundle(&path) {
            Err(BundleError::MissingMember(name)) => assert_eq!(name, "scaler.json"),
            other => panic!("unexpected result: {:?}", other),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unexpected_member_is_error() {
        let dir = scratch_dir("extra");
        let bundle = tiny_bundle();
        let (manifest, mut members) = encoded_members(&bundle);
        members.push(("extra.json", b"{}".to_vec()));
        let path = dir.join("extra.tar.gz");
        write_archive(&path, &manifest, &members).unwrap();

        assert!(matches!(load_bundle(&path), Err(BundleError::UnexpectedMember(name)) if name == "extra.json"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_version_mismatch_is_error() {
        let dir = scratch_dir("version");
        let bundle = tiny_bundle();
        let (_, members) = encoded_members(&bundle);
        let mut manifest = bundle.manifest().clone();
        manifest.format_version = BUNDLE_FORMAT_VERSION + 1;
        let path = dir.join("future.tar.gz");
        write_archive(&path, manifest.to_json_string().unwrap().as_bytes(), &members).unwrap();

        assert!(matches!(
            load_bundle(&path),
            Err(BundleError::UnsupportedVersion { found, .. }) if found == BUNDLE_FORMAT_VERSION + 1
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_corrupt_member_is_decode_error() {
        let dir = scratch_dir("corrupt");
        let bundle = tiny_bundle();
        let (manifest, mut members) = encoded_members(&bundle);
        members[2].1 = br#"{"classes": "LUZ"}"#.to_vec();
        let path = dir.join("corrupt.tar.gz");
        write_archive(&path, &manifest, &members).unwrap();

        assert!(matches!(
            load_bundle(&path),
            Err(BundleError::Decode { member, .. }) if member == "encoder.json"
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_reordered_manifest_is_inconsistent() {
        let dir = scratch_dir("order");
        let bundle = tiny_bundle();
        let (_, members) = encoded_members(&bundle);
        let mut manifest = bundle.manifest().clone();
        manifest.artifacts.reverse();
        let path = dir.join("order.tar.gz");
        write_archive(&path, manifest.to_json_string().unwrap().as_bytes(), &members).unwrap();

        assert!(matches!(load_bundle(&path), Err(BundleError::Inconsistent(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_not_a_bundle_is_error() {
        let dir = scratch_dir("garbage");
        let path = dir.join("garbage.tar.gz");
        std::fs::write(&path, b"definitely not gzip").unwrap();
        assert!(load_bundle(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
