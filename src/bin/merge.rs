/// 整图检测框合并 (Merge)
///
/// 回放逐切片检测结果, 反投影到原图并合并同类重叠框,
/// 按图像输出 `{image_id, objects: [{xmin, ymin, xmax, ymax, label, score}]}`.
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lacmus_rs::config::CropConfig;
use lacmus_rs::dataset::{AnnotationSource, YoloDataset};
use lacmus_rs::{ReplayDetector, TiledDetector};
use serde_json::json;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "切片检测结果合并", long_about = None)]
struct Args {
    /// 图像目录 (YOLO 格式数据集)
    #[arg(short, long)]
    input: PathBuf,

    /// 逐切片检测结果 (JSON: [{image_id, tile, detections}])
    #[arg(short, long)]
    detections: PathBuf,

    /// 配置文件
    #[arg(short, long, default_value = "lacmus.json")]
    config: PathBuf,

    /// 输出文件, 默认打印到标准输出
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 合并前的置信度阈值
    #[arg(long)]
    score_threshold: Option<f32>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lacmus_rs=info,merge=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = CropConfig::load(&args.config);
    if let Some(score) = args.score_threshold {
        config.merge.score_threshold = score;
    }
    config.log_summary();

    let dataset = YoloDataset::open(&args.input)
        .with_context(|| format!("打开数据集失败: {}", args.input.display()))?;
    let replay = ReplayDetector::load(&args.detections)?;
    let mut detector = TiledDetector::new(
        replay,
        config.grid.cropper().context("网格参数无效")?,
        dataset.labels().to_vec(),
        config.merge.merger(),
        config.resize.bounds(),
    );

    let mut results = Vec::new();
    for image_id in dataset.ids() {
        let output = dataset
            .load_image(&image_id)
            .map_err(anyhow::Error::from)
            .and_then(|image| detector.detect(&image_id, &image));
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!("⚠️ 图像 {} 处理失败, 跳过: {:#}", image_id, e);
                continue;
            }
        };

        let objects: Vec<_> = output
            .detections
            .iter()
            .map(|d| {
                json!({
                    "xmin": d.bbox.xmin(),
                    "ymin": d.bbox.ymin(),
                    "xmax": d.bbox.xmax(),
                    "ymax": d.bbox.ymax(),
                    "label": d.label,
                    "score": d.score,
                })
            })
            .collect();
        info!("✅ {}: {} 个切片 → {} 个目标", image_id, output.tiles, objects.len());
        results.push(json!({ "image_id": image_id, "objects": objects }));
    }

    let text = serde_json::to_string_pretty(&results)?;
    match &args.output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("写出失败: {}", path.display()))?;
            info!("💾 结果已保存到 {}", path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}
