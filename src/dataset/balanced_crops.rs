//! 正负样本均衡的随机裁剪数据集
//!
//! 每张图像计划 `1 + negatives_per_positive` 个裁剪, 其中正样本 1 个;
//! 正/负标记整体打乱后按 batch_size 分组 (末组回绕补齐).
//! 组内连续的 (图像, 类型) 一次采样, 取不到的类型由 [`SamplingBalancer`] 借还.

use image::DynamicImage;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use super::{AnnotationSource, DatasetWriter, ImageSets};
use crate::cropping::{CropSampling, NegativeSampling, PositiveSampling, SamplingBalancer};
use crate::detection::{Annotation, Rectangle};
use crate::error::DatasetError;

/// 一个计划中的裁剪
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropPlan {
    pub image_index: usize,
    pub positive: bool,
}

/// 生成统计
#[derive(Clone, Debug, Default)]
pub struct BalancedCropSummary {
    pub planned: usize,
    pub written: usize,
    pub positives: usize,
    pub negatives: usize,
    pub final_imbalance: i64,
    pub failed_images: Vec<String>,
}

/// 当前图像的缓存 (只保留一张)
struct CachedImage {
    index: usize,
    image: DynamicImage,
    annotations: Vec<Annotation>,
    positive: PositiveSampling,
    negative: NegativeSampling,
}

pub struct BalancedCropsGenerator<'a, S> {
    source: &'a S,
    crop_w: u32,
    crop_h: u32,
    negatives_per_positive: usize,
    batch_size: usize,
}

impl<'a, S: AnnotationSource> BalancedCropsGenerator<'a, S> {
    pub fn new(source: &'a S, crop_w: u32, crop_h: u32, negatives_per_positive: usize, batch_size: usize) -> Self {
        Self {
            source,
            crop_w,
            crop_h,
            negatives_per_positive,
            batch_size: batch_size.max(1),
        }
    }

    /// 裁剪计划, 按 batch 分组
    pub fn plan<R: Rng + ?Sized>(&self, images_count: usize, rng: &mut R) -> Vec<Vec<CropPlan>> {
        let samples_per_image = 1 + self.negatives_per_positive;
        let mut order: Vec<usize> = (0..images_count).collect();
        order.shuffle(rng);

        let mut is_positive = vec![true; images_count];
        is_positive.extend(std::iter::repeat(false).take(images_count * self.negatives_per_positive));
        is_positive.shuffle(rng);

        let crops: Vec<CropPlan> = order
            .iter()
            .flat_map(|&i| std::iter::repeat(i).take(samples_per_image))
            .zip(is_positive)
            .map(|(image_index, positive)| CropPlan {
                image_index,
                positive,
            })
            .collect();

        let total = crops.len();
        (0..total)
            .step_by(self.batch_size)
            .map(|start| {
                (start..start + self.batch_size)
                    .map(|c| crops[c % total])
                    .collect()
            })
            .collect()
    }

    /// 采样并写出全部裁剪
    pub fn generate<W: DatasetWriter, R: Rng + ?Sized>(
        &self,
        target: &W,
        train_ratio: f64,
        rng: &mut R,
    ) -> Result<BalancedCropSummary, DatasetError> {
        let ids = self.source.ids();
        let groups = self.plan(ids.len(), rng);
        let mut summary = BalancedCropSummary {
            planned: groups.iter().map(Vec::len).sum(),
            ..Default::default()
        };
        info!(
            "🎲 计划 {} 个裁剪 ({} 组, 每组 {})",
            summary.planned,
            groups.len(),
            self.batch_size
        );

        let mut balancer = SamplingBalancer::new();
        let mut cache: Option<CachedImage> = None;
        let mut failed = vec![false; ids.len()];
        let mut written = Vec::new();

        for (group_index, group) in groups.iter().enumerate() {
            for run in group.chunk_by(|a, b| a == b) {
                let plan = run[0];
                if failed[plan.image_index] {
                    continue;
                }
                let image_id = &ids[plan.image_index];

                if cache.as_ref().map(|c| c.index) != Some(plan.image_index) {
                    match self.load_cached(plan.image_index, image_id) {
                        Ok(c) => cache = Some(c),
                        Err(e) => {
                            warn!("⚠️ 图像 {} 加载失败, 跳过: {}", image_id, e);
                            failed[plan.image_index] = true;
                            summary.failed_images.push(image_id.clone());
                            cache = None;
                            continue;
                        }
                    }
                }
                let Some(cached) = cache.as_ref() else {
                    continue;
                };

                let crops = match balancer.get_samples_balanced(
                    run.len(),
                    plan.positive,
                    &cached.positive,
                    &cached.negative,
                    rng,
                ) {
                    Ok(crops) => crops,
                    Err(e) => {
                        warn!("⚠️ 图像 {} 无法采样: {}", image_id, e);
                        continue;
                    }
                };

                for crop in crops {
                    let annotations = crop_annotations(&cached.annotations, &crop);
                    let pixels = cached.image.crop_imm(
                        crop.xmin() as u32,
                        crop.ymin() as u32,
                        crop.width() as u32,
                        crop.height() as u32,
                    );
                    let new_id = written.len().to_string();
                    if let Err(e) = target.add(&new_id, &pixels, &annotations) {
                        warn!("⚠️ 图像 {} 的裁剪写出失败, 跳过该图像: {}", image_id, e);
                        failed[plan.image_index] = true;
                        summary.failed_images.push(image_id.clone());
                        break;
                    }
                    if annotations.is_empty() {
                        summary.negatives += 1;
                    } else {
                        summary.positives += 1;
                    }
                    written.push(new_id);
                }
            }

            if (group_index + 1) % 50 == 0 {
                info!(
                    "  进度: {}/{} 组, 不平衡 {}",
                    group_index + 1,
                    groups.len(),
                    balancer.imbalance()
                );
            }
        }

        summary.written = written.len();
        summary.final_imbalance = balancer.imbalance();
        let sets = ImageSets::split(written, train_ratio, rng);
        target.write_image_sets(&sets)?;

        info!(
            "✅ 完成: 写出 {} (正 {} 负 {}), 最终不平衡 {}",
            summary.written, summary.positives, summary.negatives, summary.final_imbalance
        );
        Ok(summary)
    }

    fn load_cached(&self, index: usize, image_id: &str) -> Result<CachedImage, DatasetError> {
        let image = self.source.load_image(image_id)?;
        let annotations = self.source.annotations(image_id)?;
        let bboxes: Vec<Rectangle> = annotations.iter().map(|a| a.bbox).collect();
        let (w, h) = (image.width(), image.height());

        let positive = PositiveSampling::new(w, h, self.crop_w, self.crop_h, &bboxes)?;
        let negative = NegativeSampling::new(w, h, self.crop_w, self.crop_h, &bboxes)?;
        debug!(
            "{}: {} 个目标, {} 个空白区域",
            image_id,
            bboxes.len(),
            negative.empty_areas().len()
        );
        Ok(CachedImage {
            index,
            image,
            annotations,
            positive,
            negative,
        })
    }
}

/// 坐标相对裁剪窗口的偏移, 限制在 `[0, size]`
pub fn offset_inside(coordinate: i32, min_border: i32, size: i32) -> i32 {
    (coordinate - min_border).max(0).min(size)
}

/// 裁剪窗口内的标注, 坐标夹到窗口内, 退化的丢弃
pub fn crop_annotations(annotations: &[Annotation], crop: &Rectangle) -> Vec<Annotation> {
    let (w, h) = (crop.width(), crop.height());
    annotations
        .iter()
        .filter_map(|a| {
            Rectangle::new(
                offset_inside(a.bbox.xmin(), crop.xmin(), w),
                offset_inside(a.bbox.ymin(), crop.ymin(), h),
                offset_inside(a.bbox.xmax(), crop.xmin(), w),
                offset_inside(a.bbox.ymax(), crop.ymin(), h),
            )
            .map(|bbox| Annotation::new(a.label.clone(), bbox))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::YoloDataset;
    use image::RgbImage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rect(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Rectangle {
        Rectangle::new(xmin, ymin, xmax, ymax).unwrap()
    }

    fn temp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lacmus-balanced-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_offset_inside() {
        let crop = rect(100, 100, 200, 200);
        let bbox = rect(150, 150, 250, 250);
        assert_eq!(offset_inside(bbox.xmin(), crop.xmin(), crop.width()), 50);
        assert_eq!(offset_inside(bbox.ymin(), crop.ymin(), crop.height()), 50);
        assert_eq!(offset_inside(bbox.xmax(), crop.xmax(), crop.width()), 50);
        assert_eq!(offset_inside(bbox.ymax(), crop.ymax(), crop.height()), 50);
    }

    #[test]
    fn test_crop_annotations() {
        let annotations = vec![
            Annotation::new("Pedestrian", rect(150, 150, 250, 250)),
            Annotation::new("Pedestrian", rect(0, 0, 50, 50)),
        ];
        let cropped = crop_annotations(&annotations, &rect(100, 100, 200, 200));
        assert_eq!(cropped, vec![Annotation::new("Pedestrian", rect(50, 50, 100, 100))]);
    }

    #[test]
    fn test_plan_groups() {
        let dir = temp_root("plan");
        fs::create_dir_all(dir.join("images")).unwrap();
        let source = YoloDataset::open(&dir).unwrap();
        let generator = BalancedCropsGenerator::new(&source, 100, 100, 3, 8);
        let mut rng = StdRng::seed_from_u64(9);

        let groups = generator.plan(5, &mut rng);
        // 5 张图 × 4 = 20 个裁剪, 每组 8 个, 末组回绕
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| g.len() == 8));

        let flat: Vec<CropPlan> = groups.iter().flatten().copied().take(20).collect();
        assert_eq!(flat.iter().filter(|p| p.positive).count(), 5);
        // 同一张图的裁剪相邻
        for chunk in flat.chunks(4) {
            assert!(chunk.iter().all(|p| p.image_index == chunk[0].image_index));
        }
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_generate_balanced_crops() {
        let src_root = temp_root("src");
        let dst_root = temp_root("dst");
        let labels = vec!["Pedestrian".to_string()];

        let writer = YoloDataset::create(&src_root, labels.clone()).unwrap();
        let image = DynamicImage::ImageRgb8(RgbImage::new(400, 300));
        writer
            .add("a", &image, &[Annotation::new("Pedestrian", rect(200, 100, 240, 180))])
            .unwrap();
        writer.add("b", &image, &[]).unwrap();
        let source = YoloDataset::open(&src_root).unwrap();
        let target = YoloDataset::create(&dst_root, labels).unwrap();

        let generator = BalancedCropsGenerator::new(&source, 100, 100, 1, 2);
        let mut rng = StdRng::seed_from_u64(21);
        let summary = generator.generate(&target, 0.8, &mut rng).unwrap();

        assert_eq!(summary.planned, 4);
        assert_eq!(summary.written, 4);
        assert!(summary.failed_images.is_empty());

        let written = YoloDataset::open(&dst_root).unwrap();
        assert_eq!(written.ids().len(), 4);
        for id in written.ids() {
            assert_eq!(written.image_size(&id).unwrap(), (100, 100));
        }

        fs::remove_dir_all(&src_root).unwrap();
        fs::remove_dir_all(&dst_root).unwrap();
    }

    /// 第一次写入失败, 之后正常写入
    struct FailOnceWriter {
        inner: YoloDataset,
        calls: AtomicUsize,
    }

    impl DatasetWriter for FailOnceWriter {
        fn add(&self, image_id: &str, image: &DynamicImage, annotations: &[Annotation]) -> Result<(), DatasetError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
            }
            self.inner.add(image_id, image, annotations)
        }

        fn write_image_sets(&self, sets: &ImageSets) -> Result<(), DatasetError> {
            self.inner.write_image_sets(sets)
        }
    }

    #[test]
    fn test_write_failure_skips_only_that_image() {
        let src_root = temp_root("flaky-src");
        let dst_root = temp_root("flaky-dst");
        let labels = vec!["Pedestrian".to_string()];

        let writer = YoloDataset::create(&src_root, labels.clone()).unwrap();
        let image = DynamicImage::ImageRgb8(RgbImage::new(400, 300));
        for id in ["a", "b", "c"] {
            writer.add(id, &image, &[]).unwrap();
        }
        let source = YoloDataset::open(&src_root).unwrap();
        let target = FailOnceWriter {
            inner: YoloDataset::create(&dst_root, labels).unwrap(),
            calls: AtomicUsize::new(0),
        };

        // 3 张图 × 2 个裁剪, 每组 2 个: 没有回绕
        let generator = BalancedCropsGenerator::new(&source, 100, 100, 1, 2);
        let mut rng = StdRng::seed_from_u64(4);
        let summary = generator.generate(&target, 0.8, &mut rng).unwrap();

        assert_eq!(summary.planned, 6);
        assert_eq!(summary.failed_images.len(), 1);
        // 失败图像的其余裁剪不再写出
        assert_eq!(summary.written, 4);
        assert_eq!(target.calls.load(Ordering::SeqCst), 5);
        assert_eq!(YoloDataset::open(&dst_root).unwrap().ids().len(), 4);

        fs::remove_dir_all(&src_root).unwrap();
        fs::remove_dir_all(&dst_root).unwrap();
    }

    #[test]
    fn test_image_smaller_than_crop_is_skipped() {
        let src_root = temp_root("small-src");
        let dst_root = temp_root("small-dst");
        let labels = vec!["Pedestrian".to_string()];

        let writer = YoloDataset::create(&src_root, labels.clone()).unwrap();
        writer
            .add("tiny", &DynamicImage::ImageRgb8(RgbImage::new(50, 50)), &[])
            .unwrap();
        let source = YoloDataset::open(&src_root).unwrap();
        let target = YoloDataset::create(&dst_root, labels).unwrap();

        let generator = BalancedCropsGenerator::new(&source, 100, 100, 1, 2);
        let mut rng = StdRng::seed_from_u64(1);
        let summary = generator.generate(&target, 0.8, &mut rng).unwrap();
        assert_eq!(summary.written, 0);
        assert_eq!(summary.failed_images, vec!["tiny".to_string()]);

        fs::remove_dir_all(&src_root).unwrap();
        fs::remove_dir_all(&dst_root).unwrap();
    }
}
