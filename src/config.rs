//! 切片/采样/评估配置 - 通过JSON文件调整参数

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::cropping::GridCropper;
use crate::detection::DetectionMerger;
use crate::error::CropError;
use crate::eval::EvalParams;

/// 网格切片参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    pub window_w: u32,                // 切片宽度
    pub window_h: u32,                // 切片高度
    pub overlap_w: u32,               // 水平重叠
    pub overlap_h: u32,               // 垂直重叠
    pub min_cropped_bbox_square: f64, // 裁剪后框面积 / 原面积 的最小比例
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            window_w: 1333,
            window_h: 800,
            overlap_w: 200,
            overlap_h: 200,
            min_cropped_bbox_square: 0.75,
        }
    }
}

impl GridSettings {
    pub fn cropper(&self) -> Result<GridCropper, CropError> {
        GridCropper::new(
            self.window_w,
            self.window_h,
            self.overlap_w,
            self.overlap_h,
            self.min_cropped_bbox_square,
        )
    }
}

/// 随机裁剪采样参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    pub crop_w: u32,
    pub crop_h: u32,
    pub negatives_per_positive: usize, // 每个正样本配几个负样本
    pub batch_size: usize,
    pub seed: Option<u64>, // 固定随机种子, 便于复现数据集
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            crop_w: 1333,
            crop_h: 800,
            negatives_per_positive: 3,
            batch_size: 8,
            seed: None,
        }
    }
}

/// 整图缩放参数 (短边 → min_side, 长边不超过 max_side)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeSettings {
    pub enabled: bool,
    pub min_side: u32,
    pub max_side: u32,
}

impl Default for ResizeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_side: 800,
            max_side: 1333,
        }
    }
}

impl ResizeSettings {
    pub fn bounds(&self) -> Option<(u32, u32)> {
        self.enabled.then_some((self.min_side, self.max_side))
    }
}

/// 评估参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalSettings {
    pub iou_threshold: f32,
    pub score_threshold: f32,
    pub max_detections: usize, // 每个切片最多保留的检测数
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            score_threshold: 0.05,
            max_detections: 100,
        }
    }
}

impl EvalSettings {
    pub fn params(&self) -> EvalParams {
        EvalParams {
            iou_threshold: self.iou_threshold,
            score_threshold: self.score_threshold,
            max_detections: self.max_detections,
            save_path: None,
        }
    }
}

/// 合并参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    pub score_threshold: f32,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            score_threshold: 0.15,
        }
    }
}

impl MergeSettings {
    pub fn merger(&self) -> DetectionMerger {
        DetectionMerger::new(self.score_threshold)
    }
}

/// 全部参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CropConfig {
    pub grid: GridSettings,
    pub sampling: SamplingSettings,
    pub resize: ResizeSettings,
    pub eval: EvalSettings,
    pub merge: MergeSettings,
    pub workers: usize,    // 数据集生成线程数
    pub train_ratio: f64,  // 训练集比例, 其余为验证集 (测试集 = 验证集)
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            grid: GridSettings::default(),
            sampling: SamplingSettings::default(),
            resize: ResizeSettings::default(),
            eval: EvalSettings::default(),
            merge: MergeSettings::default(),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            train_ratio: 0.8,
        }
    }
}

impl CropConfig {
    /// 从JSON文件加载配置; 文件不存在时写出默认配置
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    error!("❌ 保存配置失败: {}", e);
                } else {
                    info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => error!("❌ 序列化配置失败: {}", e),
        }
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        info!("🎛️  当前配置:");
        info!(
            "  网格: {}x{} 重叠 {}x{} 最小面积比 {:.2}",
            self.grid.window_w,
            self.grid.window_h,
            self.grid.overlap_w,
            self.grid.overlap_h,
            self.grid.min_cropped_bbox_square
        );
        info!(
            "  采样: {}x{} 负/正 = {} 批大小 {}",
            self.sampling.crop_w,
            self.sampling.crop_h,
            self.sampling.negatives_per_positive,
            self.sampling.batch_size
        );
        match self.resize.bounds() {
            Some((min_side, max_side)) => info!("  缩放: 短边 {} 长边上限 {}", min_side, max_side),
            None => info!("  缩放: 关闭"),
        }
        info!(
            "  评估: IoU {:.2} 置信度 {:.2} 最多 {} 个",
            self.eval.iou_threshold, self.eval.score_threshold, self.eval.max_detections
        );
        info!("  合并置信度: {:.2}", self.merge.score_threshold);
        info!("  线程数: {}", self.workers);
    }
}
