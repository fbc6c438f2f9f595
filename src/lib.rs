#![allow(clippy::type_complexity)]
//! 航拍搜救行人检测的切片与采样工具
//!
//! 大幅航拍图 → 网格切片 / 均衡随机裁剪 (训练数据) → 外部模型逐片推理
//! → 反投影 + 同类框合并 → 整图 mAP 评估
pub mod config; // 切片/采样/评估参数
pub mod cropping; // 网格切片与随机采样
pub mod dataset; // 数据集读写与生成
pub mod detection; // 检测结果, 合并, 切片推理
pub mod error; // 错误类型
pub mod eval; // 切片数据集评估
pub mod utils; // 图像/绘制/线程池工具

pub use crate::config::CropConfig;
pub use crate::cropping::{
    GridCropper, NegativeSampling, PositiveSampling, ResizeOrder, SamplingBalancer, TileTransform,
};
pub use crate::detection::{
    Annotation, Detection, DetectionMerger, Detector, RawDetection, Rectangle, ReplayDetector,
    TiledDetector,
};
pub use crate::error::{CropError, DatasetError, EvalError, SamplingError};
pub use crate::eval::{evaluate, EvalParams, EvaluationReport, GridTileSource};

/// 当前时间字符串, 用于输出目录命名
pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}
