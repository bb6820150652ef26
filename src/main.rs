//! 光 / 影 画素分類器の学習CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;

use canopy_shade::model::AppConfig;
use canopy_shade::ml::run_training_pipeline;

#[derive(Parser, Debug)]
#[command(name = "canopy_shade")]
#[command(about = "Train the light/shadow canopy pixel classifier", long_about = None)]
struct Cli {
    /// 設定ファイル（JSON）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// デバッグログを出力する
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// データセットを構築してモデルバンドルを学習・保存する
    Train {
        /// 画像ディレクトリ
        #[arg(long)]
        images: Option<PathBuf>,

        /// アノテーションディレクトリ
        #[arg(long)]
        annotations: Option<PathBuf>,

        /// モデルバンドルの出力先
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// ランダムシード
        #[arg(long)]
        seed: Option<u64>,

        /// 画像を1枚ずつ順番に処理する
        #[arg(long)]
        sequential: bool,
    },

    /// デフォルト設定をファイルに書き出す
    InitConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env().filter_level(level).init();

    let explicit_config = cli.config.is_some();
    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);

    match cli.command {
        Command::Train {
            images,
            annotations,
            output,
            seed,
            sequential,
        } => {
            // 明示的に指定された設定ファイルは読めなければエラーにする
            let mut config = if explicit_config {
                AppConfig::load(&config_path)
                    .with_context(|| format!("設定ファイルを読み込めません: {}", config_path.display()))?
            } else {
                AppConfig::load_or_default(&config_path)
            };
            if let Some(images) = images {
                config.paths.images_dir = images;
            }
            if let Some(annotations) = annotations {
                config.paths.annotations_dir = annotations;
            }
            if let Some(output) = output {
                config.paths.output_path = output;
            }
            if let Some(seed) = seed {
                config.training.seed = seed;
            }
            if sequential {
                config.assembly.parallel = false;
            }
            config.display();

            let summary = run_training_pipeline(&config).context("学習に失敗しました")?;

            info!(
                "画像: 処理 {} 枚 / スキップ {} 枚 / ラベルなし {} 枚",
                summary.assembly.processed,
                summary.assembly.skipped.len(),
                summary.assembly.empty_images
            );
            if summary.assembly.coerced_values > 0 {
                warn!("非有限の特徴量を {} 個置き換えました", summary.assembly.coerced_values);
            }
            info!("サンプル数: {}", summary.n_samples);
            info!("テスト精度: {:.4}", summary.report.accuracy);
            info!("モデルを保存しました: {}", summary.bundle_path.display());
        }
        Command::InitConfig => {
            AppConfig::default()
                .save(&config_path)
                .with_context(|| format!("設定ファイルを書き込めません: {}", config_path.display()))?;
            info!("デフォルト設定を書き出しました: {}", config_path.display());
        }
    }

    Ok(())
}
