//! 检测器 (Detector)
//! 职责: 整图 → 网格切片 → 逐片推理 → 坐标反投影 → 同类框合并
//!
//! 神经网络本身不在本 crate 内: 任何能"给一张切片, 返回框/分数/类别"的实现
//! 都可以通过 [`Detector`] trait 注入.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::merger::DetectionMerger;
use super::types::{Detection, RawDetection, Rectangle};
use crate::cropping::{GridCropper, ResizeOrder, TileTransform};
use crate::utils::imaging::{crop_region, resize_image};

/// 一次切片推理的输入
#[derive(Clone, Copy)]
pub struct TileInput<'a> {
    pub image_id: &'a str,
    /// 切片在 (缩放后) 整图中的位置
    pub tile: Rectangle,
    /// 已裁剪好的切片像素
    pub image: &'a DynamicImage,
}

/// 检测器统一接口
pub trait Detector {
    /// 返回切片局部坐标下的检测结果, 按分数降序
    fn infer(&mut self, input: TileInput<'_>) -> Result<Vec<RawDetection>>;
}

// ========== 切片推理 ==========

/// 整图检测结果
#[derive(Clone, Debug)]
pub struct TiledOutput {
    pub detections: Vec<Detection>,
    pub tiles: usize,
    pub inference: Duration,
}

/// 整图切片推理 + 合并
pub struct TiledDetector<D: Detector> {
    detector: D,
    cropper: GridCropper,
    labels: Vec<String>,
    merger: DetectionMerger,
    /// (min_side, max_side); None 表示不缩放
    resize: Option<(u32, u32)>,
}

impl<D: Detector> TiledDetector<D> {
    pub fn new(
        detector: D,
        cropper: GridCropper,
        labels: Vec<String>,
        merger: DetectionMerger,
        resize: Option<(u32, u32)>,
    ) -> Self {
        Self {
            detector,
            cropper,
            labels,
            merger,
            resize,
        }
    }

    pub fn detect(&mut self, image_id: &str, image: &DynamicImage) -> Result<TiledOutput> {
        // 先整图缩放, 再在缩放后的图上切片 (BeforeTiling)
        let (resized, scale) = match self.resize {
            Some((min_side, max_side)) => resize_image(image, min_side, max_side)?,
            None => (image.clone(), 1.0),
        };

        let grid = self.cropper.grid(resized.width(), resized.height());
        let mut inference = Duration::ZERO;
        let mut candidates = Vec::new();

        for tile in &grid {
            let Some(tile_image) = crop_region(&resized, tile) else {
                continue;
            };
            let start = Instant::now();
            let raw = self
                .detector
                .infer(TileInput {
                    image_id,
                    tile: *tile,
                    image: &tile_image,
                })
                .with_context(|| format!("切片推理失败: {} {:?}", image_id, tile))?;
            inference += start.elapsed();

            let transform = TileTransform::new(tile, scale, ResizeOrder::BeforeTiling);
            for det in raw {
                let Some(label) = self.labels.get(det.label) else {
                    warn!("⚠️ 未知类别索引 {} ({})", det.label, image_id);
                    continue;
                };
                if let Some(bbox) = transform.to_source(&det.bbox) {
                    candidates.push(Detection::new(bbox, det.score, label.clone()));
                }
            }
        }

        // 合并依赖顺序: 与单次整图推理一样按分数降序输入
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        let before = candidates.len();
        let detections = self.merger.merge(candidates);
        debug!(
            "🔍 {}: {} 个切片, 原始 {} 个框 → 合并后 {} 个",
            image_id,
            grid.len(),
            before,
            detections.len()
        );

        Ok(TiledOutput {
            detections,
            tiles: grid.len(),
            inference,
        })
    }
}

// ========== 回放检测器 ==========

/// 外部推理引擎导出的单个切片结果
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TileRecord {
    pub image_id: String,
    pub tile: Rectangle,
    pub detections: Vec<RawDetection>,
}

/// 从 JSON 导出文件回放检测结果
#[derive(Debug, Default)]
pub struct ReplayDetector {
    records: HashMap<(String, Rectangle), Vec<RawDetection>>,
}

impl ReplayDetector {
    pub fn from_records(records: impl IntoIterator<Item = TileRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|r| ((r.image_id, r.tile), r.detections))
            .collect();
        Self { records }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("读取检测结果失败: {}", path.display()))?;
        let records: Vec<TileRecord> = serde_json::from_str(&json)
            .with_context(|| format!("检测结果解析失败: {}", path.display()))?;
        info!("✅ 已加载 {} 个切片的检测结果 ({})", records.len(), path.display());
        Ok(Self::from_records(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Detector for ReplayDetector {
    fn infer(&mut self, input: TileInput<'_>) -> Result<Vec<RawDetection>> {
        let key = (input.image_id.to_string(), input.tile);
        let mut detections = self
            .records
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow!("没有切片 {:?} 的检测记录 ({})", input.tile, input.image_id))?;
        detections.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn rect(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Rectangle {
        Rectangle::new(xmin, ymin, xmax, ymax).unwrap()
    }

    /// 在每个切片的固定局部位置报告一个框
    struct FixedDetector {
        calls: usize,
    }

    impl Detector for FixedDetector {
        fn infer(&mut self, input: TileInput<'_>) -> Result<Vec<RawDetection>> {
            self.calls += 1;
            assert!(input.image.width() <= input.tile.width() as u32);
            Ok(vec![RawDetection {
                bbox: rect(10, 10, 20, 20),
                score: 0.8,
                label: 0,
            }])
        }
    }

    #[test]
    fn test_tiled_detector_reprojects_and_merges() {
        let cropper = GridCropper::new(100, 100, 0, 0, 0.75).unwrap();
        let mut tiled = TiledDetector::new(
            FixedDetector { calls: 0 },
            cropper,
            vec!["Pedestrian".to_string()],
            DetectionMerger::new(0.15),
            None,
        );
        let image = DynamicImage::ImageRgb8(RgbImage::new(200, 100));
        let out = tiled.detect("img", &image).unwrap();

        assert_eq!(out.tiles, 2);
        assert_eq!(tiled.detector.calls, 2);
        // (10,10,20,20) 和 (110,10,120,20) 只在 y 方向重叠: 合并成一个, 只放大 y
        assert_eq!(out.detections.len(), 1);
        assert_eq!(out.detections[0].bbox, rect(10, 10, 20, 20));
        assert_eq!(out.detections[0].label, "Pedestrian");
    }

    #[test]
    fn test_tiled_detector_with_resize() {
        let cropper = GridCropper::new(100, 100, 0, 0, 0.75).unwrap();
        let mut tiled = TiledDetector::new(
            FixedDetector { calls: 0 },
            cropper,
            vec!["Pedestrian".to_string()],
            DetectionMerger::new(0.15),
            Some((50, 1000)),
        );
        // 100x100 缩放到 50x50 (scale = 0.5), 单个切片
        let image = DynamicImage::ImageRgb8(RgbImage::new(100, 100));
        let out = tiled.detect("img", &image).unwrap();
        assert_eq!(out.tiles, 1);
        assert_eq!(out.detections[0].bbox, rect(20, 20, 40, 40));
    }

    #[test]
    fn test_replay_detector() {
        let tile = rect(0, 0, 100, 100);
        let mut replay = ReplayDetector::from_records(vec![TileRecord {
            image_id: "a".to_string(),
            tile,
            detections: vec![
                RawDetection { bbox: rect(1, 1, 5, 5), score: 0.2, label: 0 },
                RawDetection { bbox: rect(2, 2, 6, 6), score: 0.9, label: 0 },
            ],
        }]);
        let image = DynamicImage::ImageRgb8(RgbImage::new(100, 100));

        let found = replay.infer(TileInput { image_id: "a", tile, image: &image }).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].score, 0.9);

        let missing = replay.infer(TileInput { image_id: "b", tile, image: &image });
        assert!(missing.is_err());
    }

    #[test]
    fn test_tile_record_json() {
        let json = r#"[{"image_id":"7","tile":{"xmin":0,"ymin":0,"xmax":800,"ymax":800},
            "detections":[{"bbox":{"xmin":1,"ymin":2,"xmax":30,"ymax":40},"score":0.5,"label":0}]}]"#;
        let records: Vec<TileRecord> = serde_json::from_str(json).unwrap();
        let replay = ReplayDetector::from_records(records);
        assert_eq!(replay.len(), 1);
    }
}
