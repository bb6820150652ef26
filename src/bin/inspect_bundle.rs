//! モデルバンドルの確認用バイナリ
//!
//! マニフェストを表示し、バンドル全体を読み込んで整合性を検証します。

use canopy_shade::model::{load_bundle, load_manifest, print_manifest_info};
use canopy_shade::PixelClass;
use std::path::PathBuf;

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    println!("=== Model Bundle Inspector ===\n");

    // コマンドライン引数を取得
    let args: Vec<String> = std::env::args().collect();
    let bundle_path = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        PathBuf::from("models/canopy_shade.tar.gz")
    };

    // テスト1: マニフェスト読み込み
    println!("Test 1: マニフェスト読み込み");
    match load_manifest(&bundle_path) {
        Ok(manifest) => {
            println!("✓ マニフェスト読み込み成功");
            print_manifest_info(&manifest);
        }
        Err(e) => {
            eprintln!("✗ エラー: {}", e);
            std::process::exit(1);
        }
    }

    println!("\n{}\n", "=".repeat(50));

    // テスト2: バンドル全体の読み込みと検証
    println!("Test 2: バンドル読み込み");
    let bundle = match load_bundle(&bundle_path) {
        Ok(bundle) => {
            println!("✓ バンドル読み込み成功");
            println!("  木の数: {}", bundle.classifier().num_trees());
            println!("  学習サンプル数: {}", bundle.scaler().n_samples_seen);
            bundle
        }
        Err(e) => {
            eprintln!("✗ エラー: {}", e);
            std::process::exit(1);
        }
    };

    println!("\n{}\n", "=".repeat(50));

    // テスト3: 代表色の分類
    println!("Test 3: 代表色の分類");
    let samples: [(&str, [u8; 3]); 4] = [
        ("白", [255, 255, 255]),
        ("明るい緑", [150, 220, 90]),
        ("暗い緑", [20, 60, 25]),
        ("黒", [0, 0, 0]),
    ];
    let pixels: Vec<[u8; 3]> = samples.iter().map(|(_, rgb)| *rgb).collect();
    let classes = bundle.classify(&pixels);
    for ((name, rgb), class) in samples.iter().zip(classes) {
        let mark = if class == PixelClass::Light { "☀" } else { "☁" };
        println!("  {} {:?} -> {} {}", name, rgb, class, mark);
    }
}
