/// 正负样本均衡的随机裁剪数据集 (Balanced crops)
///
/// 每张图按 1 个正样本 : N 个负样本 计划裁剪, 取不到的类型由均衡器借还.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lacmus_rs::config::CropConfig;
use lacmus_rs::dataset::{AnnotationSource, BalancedCropsGenerator, YoloDataset};
use lacmus_rs::gen_time_string;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "正负样本均衡的随机裁剪", long_about = None)]
struct Args {
    /// 源数据集目录 (YOLO 格式)
    #[arg(short, long)]
    input: PathBuf,

    /// 输出目录, 默认 balanced_crops_<时间>
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 配置文件
    #[arg(short, long, default_value = "lacmus.json")]
    config: PathBuf,

    /// 裁剪宽度
    #[arg(long)]
    crop_w: Option<u32>,

    /// 裁剪高度
    #[arg(long)]
    crop_h: Option<u32>,

    /// 每个正样本配几个负样本
    #[arg(short, long)]
    negatives: Option<usize>,

    #[arg(short, long)]
    batch_size: Option<usize>,

    /// 随机种子
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lacmus_rs=info,balanced_crops=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = CropConfig::load(&args.config);
    let sampling = &mut config.sampling;
    if let Some(w) = args.crop_w {
        sampling.crop_w = w;
    }
    if let Some(h) = args.crop_h {
        sampling.crop_h = h;
    }
    if let Some(n) = args.negatives {
        sampling.negatives_per_positive = n;
    }
    if let Some(b) = args.batch_size {
        sampling.batch_size = b;
    }
    if args.seed.is_some() {
        sampling.seed = args.seed;
    }
    config.log_summary();

    let source = YoloDataset::open(&args.input)
        .with_context(|| format!("打开数据集失败: {}", args.input.display()))?;
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("balanced_crops_{}", gen_time_string("_"))));
    let target = YoloDataset::create(&output, source.labels().to_vec())
        .with_context(|| format!("创建输出目录失败: {}", output.display()))?;

    let mut rng = match config.sampling.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    info!("🚀 均衡裁剪: {} → {}", args.input.display(), output.display());
    let generator = BalancedCropsGenerator::new(
        &source,
        config.sampling.crop_w,
        config.sampling.crop_h,
        config.sampling.negatives_per_positive,
        config.sampling.batch_size,
    );
    let summary = generator.generate(&target, config.train_ratio, &mut rng)?;

    if summary.written < summary.planned {
        warn!("⚠️ 计划 {} 个, 实际写出 {} 个", summary.planned, summary.written);
    }
    if !summary.failed_images.is_empty() {
        warn!("⚠️ 失败图像: {:?}", summary.failed_images);
    }
    Ok(())
}
