//! 网格切片数据集生成
//! 流程: 读源数据集 → 并行切片 → 筛选 (有人 + 同等数量的空白切片) → 写出 → 划分 ImageSets

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{info, warn};

use super::{AnnotationSource, DatasetWriter, ImageSets};
use crate::cropping::GridCropper;
use crate::detection::{Annotation, Rectangle};
use crate::error::DatasetError;
use crate::utils::{crop_region, parallel_map};

/// 源图像上的一个切片; 像素在写出时才读取
#[derive(Clone, Debug)]
pub struct GridFragment {
    pub image_id: String,
    pub crop: Rectangle,
    /// 面积比例达标的标注 (切片坐标)
    pub big: Vec<Annotation>,
    /// 被切碎的标注
    pub small: Vec<Annotation>,
}

impl GridFragment {
    pub fn has_human(&self) -> bool {
        !self.big.is_empty()
    }

    /// 完全没有目标 (连碎片都没有)
    pub fn is_empty(&self) -> bool {
        self.big.is_empty() && self.small.is_empty()
    }
}

/// 生成统计
#[derive(Clone, Debug, Default)]
pub struct GridCropSummary {
    pub source_images: usize,
    pub fragments: usize,
    pub with_human: usize,
    pub written: usize,
    pub failed_images: Vec<String>,
}

pub struct DatasetGridCropper<'a, S, W> {
    source: &'a S,
    target: &'a W,
    cropper: GridCropper,
    workers: usize,
    train_ratio: f64,
}

impl<'a, S: AnnotationSource, W: DatasetWriter> DatasetGridCropper<'a, S, W> {
    pub fn new(source: &'a S, target: &'a W, cropper: GridCropper, workers: usize, train_ratio: f64) -> Self {
        Self {
            source,
            target,
            cropper,
            workers,
            train_ratio,
        }
    }

    pub fn generate_dataset<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<GridCropSummary, DatasetError> {
        info!("📖 读取源数据集...");
        let ids = self.source.ids();
        let mut summary = GridCropSummary {
            source_images: ids.len(),
            ..Default::default()
        };

        info!("✂️  生成切片... ({} 张图像, {} 线程)", ids.len(), self.workers);
        let fragments = self.generate_fragments(ids, &mut summary);
        summary.fragments = fragments.len();

        info!("🔍 筛选切片...");
        let fragments = filter_fragments(fragments, rng);
        summary.with_human = fragments.iter().filter(|f| f.has_human()).count();

        info!("💾 写出切片... ({} 个)", fragments.len());
        let ids = self.write_fragments(fragments, &mut summary);
        summary.written = ids.len();

        info!("📝 写出 ImageSets...");
        let sets = ImageSets::split(ids, self.train_ratio, rng);
        self.target.write_image_sets(&sets)?;

        info!(
            "✅ 完成: 源图像 {} 切片 {} 有人 {} 写出 {} 失败图像 {}",
            summary.source_images,
            summary.fragments,
            summary.with_human,
            summary.written,
            summary.failed_images.len()
        );
        Ok(summary)
    }

    /// 单张图像的全部切片
    pub fn crop_image(&self, image_id: &str) -> Result<Vec<GridFragment>, DatasetError> {
        let (width, height) = self.source.image_size(image_id)?;
        let annotations = self.source.annotations(image_id)?;
        Ok(self
            .cropper
            .grid(width, height)
            .into_iter()
            .map(|crop| {
                let split = self.cropper.split_annotations(&annotations, &crop);
                GridFragment {
                    image_id: image_id.to_string(),
                    crop,
                    big: split.big,
                    small: split.small,
                }
            })
            .collect())
    }

    fn generate_fragments(&self, ids: Vec<String>, summary: &mut GridCropSummary) -> Vec<GridFragment> {
        let done = AtomicUsize::new(0);
        let total = ids.len();
        let results = parallel_map(ids, self.workers, |id| {
            let result = self.crop_image(&id);
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            if n % 100 == 0 || n == total {
                info!("  切片进度: {}/{}", n, total);
            }
            (id, result)
        });

        let mut fragments = Vec::new();
        for (id, result) in results {
            match result {
                Ok(fs) => fragments.extend(fs),
                Err(e) => {
                    warn!("⚠️ 图像 {} 切片失败, 跳过: {}", id, e);
                    summary.failed_images.push(id);
                }
            }
        }
        fragments
    }

    /// 按源图像分组写出, 每张源图只解码一次
    fn write_fragments(&self, fragments: Vec<GridFragment>, summary: &mut GridCropSummary) -> Vec<String> {
        let mut by_image: BTreeMap<String, Vec<(String, GridFragment)>> = BTreeMap::new();
        for (index, fragment) in fragments.into_iter().enumerate() {
            by_image
                .entry(fragment.image_id.clone())
                .or_default()
                .push((index.to_string(), fragment));
        }

        let jobs: Vec<(String, Vec<(String, GridFragment)>)> = by_image.into_iter().collect();
        let results = parallel_map(jobs, self.workers, |(image_id, items)| {
            let written = self.write_image_fragments(&image_id, &items);
            (image_id, written)
        });

        let mut ids = Vec::new();
        for (image_id, result) in results {
            match result {
                Ok(written) => ids.extend(written),
                Err(e) => {
                    warn!("⚠️ 图像 {} 写出失败, 跳过: {}", image_id, e);
                    summary.failed_images.push(image_id);
                }
            }
        }
        ids.sort_by_key(|id| id.parse::<usize>().unwrap_or(usize::MAX));
        ids
    }

    fn write_image_fragments(
        &self,
        image_id: &str,
        items: &[(String, GridFragment)],
    ) -> Result<Vec<String>, DatasetError> {
        let image = self.source.load_image(image_id)?;
        let mut written = Vec::with_capacity(items.len());
        for (new_id, fragment) in items {
            let Some(pixels) = crop_region(&image, &fragment.crop) else {
                continue;
            };
            self.target.add(new_id, &pixels, &fragment.big)?;
            written.push(new_id.clone());
        }
        Ok(written)
    }
}

/// 保留全部有人的切片, 再有放回地抽取同样数量的空白切片
pub fn filter_fragments<R: Rng + ?Sized>(fragments: Vec<GridFragment>, rng: &mut R) -> Vec<GridFragment> {
    let (with_human, rest): (Vec<_>, Vec<_>) = fragments.into_iter().partition(GridFragment::has_human);
    let without_human: Vec<GridFragment> = rest.into_iter().filter(GridFragment::is_empty).collect();

    let mut selected = Vec::with_capacity(with_human.len() * 2);
    if !without_human.is_empty() {
        for _ in 0..with_human.len() {
            if let Some(fragment) = without_human.choose(rng) {
                selected.push(fragment.clone());
            }
        }
    }
    let mut result = with_human;
    result.extend(selected);
    result
}
