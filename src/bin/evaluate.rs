/// 切片评估 (Evaluate)
///
/// 在数据集的每张图上按网格切片, 用外部推理导出的逐切片结果回放,
/// 反投影回原图后计算每个类别的 AP.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lacmus_rs::config::CropConfig;
use lacmus_rs::dataset::YoloDataset;
use lacmus_rs::eval::{evaluate, GridTileSource};
use lacmus_rs::ReplayDetector;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "切片数据集评估 (mAP)", long_about = None)]
struct Args {
    /// 数据集目录 (YOLO 格式)
    #[arg(short, long)]
    input: PathBuf,

    /// 逐切片检测结果 (JSON: [{image_id, tile, detections}])
    #[arg(short, long)]
    detections: PathBuf,

    /// 配置文件
    #[arg(short, long, default_value = "lacmus.json")]
    config: PathBuf,

    /// 保存画好框的图像
    #[arg(short, long)]
    save_path: Option<PathBuf>,

    #[arg(long)]
    iou_threshold: Option<f32>,

    #[arg(long)]
    score_threshold: Option<f32>,

    /// 不缩放整图
    #[arg(long, default_value_t = false)]
    no_resize: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lacmus_rs=info,evaluate=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = CropConfig::load(&args.config);
    if let Some(iou) = args.iou_threshold {
        config.eval.iou_threshold = iou;
    }
    if let Some(score) = args.score_threshold {
        config.eval.score_threshold = score;
    }
    if args.no_resize {
        config.resize.enabled = false;
    }
    config.log_summary();

    let dataset = YoloDataset::open(&args.input)
        .with_context(|| format!("打开数据集失败: {}", args.input.display()))?;
    let mut detector = ReplayDetector::load(&args.detections)?;
    let cropper = config.grid.cropper().context("网格参数无效")?;
    let mut tiles = GridTileSource::new(&dataset, cropper, config.resize.bounds());

    let mut params = config.eval.params();
    params.save_path = args.save_path;

    info!("🚀 开始评估...");
    let report = evaluate(&mut tiles, &mut detector, &params)?;
    report.log_summary();
    println!("mAP: {:.4}", report.mean_average_precision());
    Ok(())
}
