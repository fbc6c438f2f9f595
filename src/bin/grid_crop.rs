/// 网格切片数据集 (Grid crops)
///
/// 把大幅航拍图切成固定大小的重叠切片, 保留有人的切片和同样数量的空白切片,
/// 写成新的 YOLO 目录数据集.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lacmus_rs::config::CropConfig;
use lacmus_rs::dataset::{AnnotationSource, DatasetGridCropper, YoloDataset};
use lacmus_rs::gen_time_string;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "网格切片数据集生成", long_about = None)]
struct Args {
    /// 源数据集目录 (YOLO 格式)
    #[arg(short, long)]
    input: PathBuf,

    /// 输出目录, 默认 grid_crops_<时间>
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 配置文件
    #[arg(short, long, default_value = "lacmus.json")]
    config: PathBuf,

    /// 切片宽度
    #[arg(long)]
    window_w: Option<u32>,

    /// 切片高度
    #[arg(long)]
    window_h: Option<u32>,

    /// 水平/垂直重叠
    #[arg(long)]
    overlap: Option<u32>,

    /// 线程数
    #[arg(short, long)]
    workers: Option<usize>,

    /// 随机种子
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lacmus_rs=info,grid_crop=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = CropConfig::load(&args.config);
    if let Some(w) = args.window_w {
        config.grid.window_w = w;
    }
    if let Some(h) = args.window_h {
        config.grid.window_h = h;
    }
    if let Some(overlap) = args.overlap {
        config.grid.overlap_w = overlap;
        config.grid.overlap_h = overlap;
    }
    if let Some(workers) = args.workers {
        config.workers = workers.max(1);
    }
    config.log_summary();

    let cropper = config.grid.cropper().context("网格参数无效")?;
    let source = YoloDataset::open(&args.input)
        .with_context(|| format!("打开数据集失败: {}", args.input.display()))?;
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("grid_crops_{}", gen_time_string("_"))));
    let target = YoloDataset::create(&output, source.labels().to_vec())
        .with_context(|| format!("创建输出目录失败: {}", output.display()))?;

    let mut rng = match args.seed.or(config.sampling.seed) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    info!("🚀 网格切片: {} → {}", args.input.display(), output.display());
    let generator = DatasetGridCropper::new(&source, &target, cropper, config.workers, config.train_ratio);
    let summary = generator.generate_dataset(&mut rng)?;

    if !summary.failed_images.is_empty() {
        info!("⚠️ 失败图像: {:?}", summary.failed_images);
    }
    Ok(())
}
