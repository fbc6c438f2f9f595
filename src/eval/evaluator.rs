//! 切片数据集评估 (mAP)
//!
//! 逐图像: 每个切片推理 → 分数过滤/排序/截断 → 反投影回原图 → 按类别拼接 (不合并).
//! 然后按类别做贪心匹配, 累计 TP/FP, 用 VOC 包络法积分得到 AP.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::{debug, info, warn};

use super::tiles::TileSource;
use crate::detection::{Annotation, Detection, Detector, TileInput};
use crate::error::EvalError;
use crate::utils::draw::draw_annotated;

/// 评估参数
#[derive(Clone, Debug)]
pub struct EvalParams {
    pub iou_threshold: f32,
    pub score_threshold: f32,
    /// 每个切片最多保留的检测数
    pub max_detections: usize,
    /// 画好框的图像保存目录
    pub save_path: Option<PathBuf>,
}

impl Default for EvalParams {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            score_threshold: 0.05,
            max_detections: 100,
            save_path: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassMetrics {
    pub average_precision: f64,
    pub num_annotations: usize,
}

#[derive(Clone, Debug)]
pub struct EvaluationReport {
    pub average_precisions: BTreeMap<String, ClassMetrics>,
    /// 每张图像的平均推理耗时
    pub mean_inference: Duration,
    pub evaluated_images: usize,
    pub failed_images: Vec<String>,
}

impl EvaluationReport {
    /// 有标注的类别上的 AP 均值
    pub fn mean_average_precision(&self) -> f64 {
        let present: Vec<f64> = self
            .average_precisions
            .values()
            .filter(|m| m.num_annotations > 0)
            .map(|m| m.average_precision)
            .collect();
        if present.is_empty() {
            0.0
        } else {
            present.iter().sum::<f64>() / present.len() as f64
        }
    }

    pub fn log_summary(&self) {
        info!("📊 评估结果:");
        for (label, m) in &self.average_precisions {
            info!(
                "  {:<16} AP {:.4} ({} 个标注)",
                label, m.average_precision, m.num_annotations
            );
        }
        info!("  mAP: {:.4}", self.mean_average_precision());
        info!(
            "  图像: {} 成功, {} 失败, 平均推理 {:.2?}",
            self.evaluated_images,
            self.failed_images.len(),
            self.mean_inference
        );
    }
}

/// 单张图像的标注和 (原图坐标下的) 检测结果
struct ImageResult {
    annotations: Vec<Annotation>,
    detections: Vec<Detection>,
}

fn check_grouping<T: TileSource + ?Sized>(tiles: &T) -> Result<(), EvalError> {
    let groups = tiles.groups();
    let grouped = groups.len() == tiles.image_count()
        && groups.iter().enumerate().all(|(index, group)| {
            group.iter().all(|t| t.image_index == index)
        });
    if grouped {
        Ok(())
    } else {
        Err(EvalError::UngroupedTiles {
            groups: groups.len(),
            images: tiles.image_count(),
        })
    }
}

/// 在整个切片来源上评估检测器
pub fn evaluate<T, D>(tiles: &mut T, detector: &mut D, params: &EvalParams) -> Result<EvaluationReport, EvalError>
where
    T: TileSource + ?Sized,
    D: Detector + ?Sized,
{
    check_grouping(tiles)?;
    if let Some(dir) = &params.save_path {
        fs::create_dir_all(dir)?;
    }

    let image_count = tiles.image_count();
    let mut results = Vec::with_capacity(image_count);
    let mut failed_images = Vec::new();
    let mut total_inference = Duration::ZERO;

    for image_index in 0..image_count {
        let image_id = tiles.image_id(image_index).to_string();
        match detect_image(tiles, detector, params, image_index) {
            Ok((result, inference)) => {
                total_inference += inference;
                if let Some(dir) = &params.save_path {
                    save_visualization(tiles, image_index, &image_id, &result, dir);
                }
                results.push(result);
            }
            Err(e) => {
                warn!("⚠️ 图像 {} 评估失败, 跳过: {:#}", image_id, e);
                failed_images.push(image_id);
                continue;
            }
        }

        if (image_index + 1) % 100 == 0 {
            info!("  评估进度: {}/{}", image_index + 1, image_count);
        }
    }

    if results.is_empty() {
        return Err(EvalError::NothingEvaluated {
            failed: failed_images.len(),
        });
    }

    let mut labels: BTreeSet<String> = tiles.labels().iter().cloned().collect();
    for r in &results {
        labels.extend(r.annotations.iter().map(|a| a.label.clone()));
        labels.extend(r.detections.iter().map(|d| d.label.clone()));
    }

    let average_precisions = labels
        .into_iter()
        .map(|label| {
            let metrics = class_metrics(&results, &label, params.iou_threshold);
            (label, metrics)
        })
        .collect();

    Ok(EvaluationReport {
        average_precisions,
        mean_inference: total_inference / results.len() as u32,
        evaluated_images: results.len(),
        failed_images,
    })
}

fn detect_image<T, D>(
    tiles: &mut T,
    detector: &mut D,
    params: &EvalParams,
    image_index: usize,
) -> anyhow::Result<(ImageResult, Duration)>
where
    T: TileSource + ?Sized,
    D: Detector + ?Sized,
{
    let image_id = tiles.image_id(image_index).to_string();
    let group = tiles.groups()[image_index].clone();
    let mut detections = Vec::new();
    let mut inference = Duration::ZERO;

    for tile_ref in &group {
        let loaded = tiles.load_tile(tile_ref)?;
        let start = Instant::now();
        let mut raw = detector.infer(TileInput {
            image_id: &image_id,
            tile: loaded.tile,
            image: &loaded.image,
        })?;
        inference += start.elapsed();

        raw.retain(|d| d.score > params.score_threshold);
        raw.sort_by(|a, b| b.score.total_cmp(&a.score));
        raw.truncate(params.max_detections);

        for det in raw {
            let label = tiles
                .labels()
                .get(det.label)
                .cloned()
                .ok_or_else(|| anyhow!("未知类别索引 {}", det.label))?;
            if let Some(bbox) = loaded.transform.to_source(&det.bbox) {
                detections.push(Detection::new(bbox, det.score, label));
            }
        }
    }

    let annotations = tiles.annotations(image_index)?;
    debug!(
        "{}: {} 个切片, {} 个检测, {} 个标注",
        image_id,
        group.len(),
        detections.len(),
        annotations.len()
    );
    Ok((
        ImageResult {
            annotations,
            detections,
        },
        inference,
    ))
}

fn save_visualization<T: TileSource + ?Sized>(
    tiles: &mut T,
    image_index: usize,
    image_id: &str,
    result: &ImageResult,
    dir: &std::path::Path,
) {
    let path = dir.join(format!("{image_id}.png"));
    let saved = tiles
        .load_image(image_index)
        .and_then(|image| Ok(draw_annotated(&image, &result.annotations, &result.detections).save(&path)?));
    if let Err(e) = saved {
        warn!("⚠️ 保存 {} 失败: {:#}", path.display(), e);
    }
}

/// 单个类别: 逐图像贪心匹配, 再全局按分数排序累计
fn class_metrics(results: &[ImageResult], label: &str, iou_threshold: f32) -> ClassMetrics {
    let mut scored: Vec<(f32, bool)> = Vec::new();
    let mut num_annotations = 0;

    for r in results {
        let truth: Vec<_> = r
            .annotations
            .iter()
            .filter(|a| a.label == label)
            .map(|a| a.bbox)
            .collect();
        num_annotations += truth.len();

        let mut detections: Vec<&Detection> = r.detections.iter().filter(|d| d.label == label).collect();
        detections.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut claimed = vec![false; truth.len()];
        for d in detections {
            let best = truth
                .iter()
                .enumerate()
                .filter(|(i, _)| !claimed[*i])
                .map(|(i, t)| (i, d.bbox.iou(t)))
                .max_by(|a, b| a.1.total_cmp(&b.1));
            match best {
                Some((i, iou)) if iou >= iou_threshold => {
                    claimed[i] = true;
                    scored.push((d.score, true));
                }
                _ => scored.push((d.score, false)),
            }
        }
    }

    if num_annotations == 0 {
        return ClassMetrics {
            average_precision: 0.0,
            num_annotations: 0,
        };
    }

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    let mut recall = Vec::with_capacity(scored.len());
    let mut precision = Vec::with_capacity(scored.len());
    let (mut tp, mut fp) = (0f64, 0f64);
    for (_, is_tp) in scored {
        if is_tp {
            tp += 1.0;
        } else {
            fp += 1.0;
        }
        recall.push(tp / num_annotations as f64);
        precision.push(tp / (tp + fp).max(f64::EPSILON));
    }

    ClassMetrics {
        average_precision: compute_ap(&recall, &precision),
        num_annotations,
    }
}

/// 精度包络线下的面积
pub fn compute_ap(recall: &[f64], precision: &[f64]) -> f64 {
    let mut mrec = Vec::with_capacity(recall.len() + 2);
    mrec.push(0.0);
    mrec.extend_from_slice(recall);
    mrec.push(1.0);

    let mut mpre = Vec::with_capacity(precision.len() + 2);
    mpre.push(0.0);
    mpre.extend_from_slice(precision);
    mpre.push(0.0);

    for i in (1..mpre.len()).rev() {
        mpre[i - 1] = mpre[i - 1].max(mpre[i]);
    }

    (0..mrec.len() - 1)
        .filter(|&i| mrec[i + 1] != mrec[i])
        .map(|i| (mrec[i + 1] - mrec[i]) * mpre[i + 1])
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cropping::{ResizeOrder, TileTransform};
    use crate::detection::{RawDetection, Rectangle};
    use crate::eval::tiles::{LoadedTile, TileRef};
    use image::{DynamicImage, RgbImage};
    use std::collections::HashMap;

    fn rect(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Rectangle {
        Rectangle::new(xmin, ymin, xmax, ymax).unwrap()
    }

    /// 内存中的切片来源: 每张图 200x100, 两个 100x100 切片
    struct MemoryTiles {
        ids: Vec<String>,
        labels: Vec<String>,
        annotations: Vec<Vec<Annotation>>,
        groups: Vec<Vec<TileRef>>,
        broken: Option<usize>,
    }

    impl MemoryTiles {
        fn new(annotations: Vec<Vec<Annotation>>) -> Self {
            let groups = (0..annotations.len())
                .map(|image_index| {
                    (0..2)
                        .map(|crop_number| TileRef {
                            image_index,
                            crop_number,
                        })
                        .collect()
                })
                .collect();
            Self {
                ids: (0..annotations.len()).map(|i| format!("img{i}")).collect(),
                labels: vec!["Pedestrian".to_string(), "Car".to_string()],
                annotations,
                groups,
                broken: None,
            }
        }
    }

    impl TileSource for MemoryTiles {
        fn image_count(&self) -> usize {
            self.ids.len()
        }

        fn image_id(&self, image_index: usize) -> &str {
            &self.ids[image_index]
        }

        fn labels(&self) -> &[String] {
            &self.labels
        }

        fn groups(&self) -> &[Vec<TileRef>] {
            &self.groups
        }

        fn load_tile(&mut self, tile: &TileRef) -> anyhow::Result<LoadedTile> {
            if self.broken == Some(tile.image_index) {
                return Err(anyhow!("decode failed"));
            }
            let x = tile.crop_number as i32 * 100;
            let rect = rect(x, 0, x + 100, 100);
            Ok(LoadedTile {
                image: DynamicImage::ImageRgb8(RgbImage::new(100, 100)),
                tile: rect,
                transform: TileTransform::new(&rect, 1.0, ResizeOrder::BeforeTiling),
            })
        }

        fn load_image(&mut self, _image_index: usize) -> anyhow::Result<DynamicImage> {
            Ok(DynamicImage::ImageRgb8(RgbImage::new(200, 100)))
        }

        fn annotations(&self, image_index: usize) -> anyhow::Result<Vec<Annotation>> {
            Ok(self.annotations[image_index].clone())
        }
    }

    /// 按 (图像, 切片原点) 返回预设结果
    struct ScriptedDetector {
        answers: HashMap<(String, i32), Vec<RawDetection>>,
    }

    impl Detector for ScriptedDetector {
        fn infer(&mut self, input: TileInput<'_>) -> anyhow::Result<Vec<RawDetection>> {
            Ok(self
                .answers
                .get(&(input.image_id.to_string(), input.tile.xmin()))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn raw(bbox: Rectangle, score: f32, label: usize) -> RawDetection {
        RawDetection { bbox, score, label }
    }

    #[test]
    fn test_compute_ap() {
        assert!((compute_ap(&[1.0], &[1.0]) - 1.0).abs() < 1e-9);
        let ap = compute_ap(&[0.5, 0.5, 1.0], &[1.0, 0.5, 2.0 / 3.0]);
        assert!((ap - (0.5 + 0.5 * 2.0 / 3.0)).abs() < 1e-9);
        assert_eq!(compute_ap(&[], &[]), 0.0);
    }

    #[test]
    fn test_perfect_detection_across_tiles() {
        let mut tiles = MemoryTiles::new(vec![vec![
            Annotation::new("Pedestrian", rect(10, 10, 30, 50)),
            Annotation::new("Pedestrian", rect(120, 20, 150, 60)),
        ]]);
        let mut detector = ScriptedDetector {
            answers: HashMap::from([
                (("img0".to_string(), 0), vec![raw(rect(10, 10, 30, 50), 0.9, 0)]),
                // 第二个切片的局部坐标, 反投影后 +100
                (("img0".to_string(), 100), vec![raw(rect(20, 20, 50, 60), 0.8, 0)]),
            ]),
        };
        let report = evaluate(&mut tiles, &mut detector, &EvalParams::default()).unwrap();

        let pedestrian = report.average_precisions["Pedestrian"];
        assert!((pedestrian.average_precision - 1.0).abs() < 1e-9);
        assert_eq!(pedestrian.num_annotations, 2);
        // 没有标注的类别: AP = 0
        assert_eq!(
            report.average_precisions["Car"],
            ClassMetrics {
                average_precision: 0.0,
                num_annotations: 0
            }
        );
        assert!((report.mean_average_precision() - 1.0).abs() < 1e-9);
        assert_eq!(report.evaluated_images, 1);
    }

    #[test]
    fn test_duplicates_and_score_threshold() {
        let mut tiles = MemoryTiles::new(vec![vec![Annotation::new("Pedestrian", rect(10, 10, 30, 50))]]);
        let mut detector = ScriptedDetector {
            answers: HashMap::from([(
                ("img0".to_string(), 0),
                vec![
                    raw(rect(10, 10, 30, 50), 0.9, 0),
                    // 重复框: 标注已被占用, 记为 FP
                    raw(rect(11, 10, 30, 50), 0.7, 0),
                    // 低于分数阈值, 不参与
                    raw(rect(60, 60, 90, 90), 0.01, 0),
                ],
            )]),
        };
        let report = evaluate(&mut tiles, &mut detector, &EvalParams::default()).unwrap();
        // FP 在 TP 之后, 不影响 AP
        assert!((report.average_precisions["Pedestrian"].average_precision - 1.0).abs() < 1e-9);

        // 只保留 1 个检测时结果相同
        let params = EvalParams {
            max_detections: 1,
            ..EvalParams::default()
        };
        let report = evaluate(&mut tiles, &mut detector, &params).unwrap();
        assert!((report.average_precisions["Pedestrian"].average_precision - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missed_object_halves_ap() {
        let mut tiles = MemoryTiles::new(vec![
            vec![Annotation::new("Pedestrian", rect(10, 10, 30, 50))],
            vec![Annotation::new("Pedestrian", rect(10, 10, 30, 50))],
        ]);
        let mut detector = ScriptedDetector {
            answers: HashMap::from([(("img0".to_string(), 0), vec![raw(rect(10, 10, 30, 50), 0.9, 0)])]),
        };
        let report = evaluate(&mut tiles, &mut detector, &EvalParams::default()).unwrap();
        assert!((report.average_precisions["Pedestrian"].average_precision - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_failed_image_is_skipped() {
        let mut tiles = MemoryTiles::new(vec![
            vec![Annotation::new("Pedestrian", rect(10, 10, 30, 50))],
            vec![Annotation::new("Pedestrian", rect(10, 10, 30, 50))],
        ]);
        tiles.broken = Some(1);
        let mut detector = ScriptedDetector {
            answers: HashMap::from([(("img0".to_string(), 0), vec![raw(rect(10, 10, 30, 50), 0.9, 0)])]),
        };
        let report = evaluate(&mut tiles, &mut detector, &EvalParams::default()).unwrap();
        assert_eq!(report.failed_images, vec!["img1".to_string()]);
        assert_eq!(report.evaluated_images, 1);
        assert_eq!(report.average_precisions["Pedestrian"].num_annotations, 1);
        assert!((report.average_precisions["Pedestrian"].average_precision - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ungrouped_tiles_rejected() {
        let mut tiles = MemoryTiles::new(vec![vec![], vec![]]);
        // 把两张图的切片混在一组里
        let mixed: Vec<TileRef> = tiles.groups.concat();
        tiles.groups = vec![mixed];
        let mut detector = ScriptedDetector {
            answers: HashMap::new(),
        };
        let result = evaluate(&mut tiles, &mut detector, &EvalParams::default());
        assert!(matches!(
            result,
            Err(EvalError::UngroupedTiles { groups: 1, images: 2 })
        ));
    }

    #[test]
    fn test_all_images_failed() {
        let mut tiles = MemoryTiles::new(vec![vec![]]);
        tiles.broken = Some(0);
        let mut detector = ScriptedDetector {
            answers: HashMap::new(),
        };
        let result = evaluate(&mut tiles, &mut detector, &EvalParams::default());
        assert!(matches!(result, Err(EvalError::NothingEvaluated { failed: 1 })));
    }

    #[test]
    fn test_save_visualizations() {
        let dir = std::env::temp_dir().join(format!("lacmus-eval-save-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let mut tiles = MemoryTiles::new(vec![vec![Annotation::new("Pedestrian", rect(10, 10, 30, 50))]]);
        let mut detector = ScriptedDetector {
            answers: HashMap::new(),
        };
        let params = EvalParams {
            save_path: Some(dir.clone()),
            ..EvalParams::default()
        };
        evaluate(&mut tiles, &mut detector, &params).unwrap();
        assert!(dir.join("img0.png").exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
