//! 评估用切片来源
//!
//! 每张图像先按 (min_side, max_side) 缩放, 再在缩放后的图上切网格;
//! 切片按图像分组, 一组对应一张图像.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use tracing::{info, warn};

use crate::cropping::{GridCropper, ResizeOrder, TileTransform};
use crate::dataset::AnnotationSource;
use crate::detection::{Annotation, Rectangle};
use crate::utils::imaging::{compute_resize_scale, crop_region, resize_by_scale, scaled_size};

/// 第 `image_index` 张图像的第 `crop_number` 个切片
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileRef {
    pub image_index: usize,
    pub crop_number: usize,
}

/// 读出的切片像素及其反投影
pub struct LoadedTile {
    pub image: DynamicImage,
    /// 切片在缩放后整图中的位置
    pub tile: Rectangle,
    pub transform: TileTransform,
}

/// 评估器消费的切片来源
pub trait TileSource {
    fn image_count(&self) -> usize;

    fn image_id(&self, image_index: usize) -> &str;

    /// 类别名, 下标对应检测器输出的类别索引
    fn labels(&self) -> &[String];

    fn groups(&self) -> &[Vec<TileRef>];

    fn load_tile(&mut self, tile: &TileRef) -> Result<LoadedTile>;

    /// 原尺寸整图 (用于保存可视化结果)
    fn load_image(&mut self, image_index: usize) -> Result<DynamicImage>;

    /// 原尺寸坐标下的标注
    fn annotations(&self, image_index: usize) -> Result<Vec<Annotation>>;
}

/// 数据集上的网格切片来源
pub struct GridTileSource<'a, S> {
    source: &'a S,
    cropper: GridCropper,
    resize: Option<(u32, u32)>,
    ids: Vec<String>,
    /// 缩放后的尺寸
    sizes: Vec<(u32, u32)>,
    scales: Vec<f64>,
    grids: HashMap<(u32, u32), Vec<Rectangle>>,
    groups: Vec<Vec<TileRef>>,
    /// 最近一次读取并缩放过的图像
    cached: Option<(usize, DynamicImage)>,
}

impl<'a, S: AnnotationSource> GridTileSource<'a, S> {
    /// 只读图像头计算切片; 读不出尺寸的图像跳过
    pub fn new(source: &'a S, cropper: GridCropper, resize: Option<(u32, u32)>) -> Self {
        let mut ids = Vec::new();
        let mut sizes = Vec::new();
        let mut scales = Vec::new();
        for id in source.ids() {
            let (w, h) = match source.image_size(&id) {
                Ok(size) => size,
                Err(e) => {
                    warn!("⚠️ 读取图像 {} 尺寸失败, 跳过: {}", id, e);
                    continue;
                }
            };
            let scale = match resize {
                Some((min_side, max_side)) => compute_resize_scale(w, h, min_side, max_side),
                None => 1.0,
            };
            let size = if scale == 1.0 { (w, h) } else { scaled_size(w, h, scale) };
            ids.push(id);
            sizes.push(size);
            scales.push(scale);
        }

        let mut grids: HashMap<(u32, u32), Vec<Rectangle>> = HashMap::new();
        for &(w, h) in &sizes {
            grids.entry((w, h)).or_insert_with(|| cropper.grid(w, h));
        }

        let groups: Vec<Vec<TileRef>> = sizes
            .iter()
            .enumerate()
            .map(|(image_index, size)| {
                let count = grids.get(size).map_or(0, Vec::len);
                (0..count)
                    .map(|crop_number| TileRef {
                        image_index,
                        crop_number,
                    })
                    .collect()
            })
            .collect();

        info!(
            "🧩 切片来源: {} 张图像, {} 个切片, {} 种尺寸",
            ids.len(),
            groups.iter().map(Vec::len).sum::<usize>(),
            grids.len()
        );
        Self {
            source,
            cropper,
            resize,
            ids,
            sizes,
            scales,
            grids,
            groups,
            cached: None,
        }
    }

    pub fn cropper(&self) -> &GridCropper {
        &self.cropper
    }

    fn resized_image(&mut self, image_index: usize) -> Result<&DynamicImage> {
        if self.cached.as_ref().map(|(i, _)| *i) != Some(image_index) {
            let id = &self.ids[image_index];
            let image = self
                .source
                .load_image(id)
                .with_context(|| format!("读取图像失败: {}", id))?;
            let image = match self.resize {
                Some(_) if self.scales[image_index] != 1.0 => {
                    resize_by_scale(&image, self.scales[image_index])?
                }
                _ => image,
            };
            self.cached = Some((image_index, image));
        }
        self.cached
            .as_ref()
            .map(|(_, image)| image)
            .ok_or_else(|| anyhow!("图像缓存为空"))
    }
}

impl<S: AnnotationSource> TileSource for GridTileSource<'_, S> {
    fn image_count(&self) -> usize {
        self.ids.len()
    }

    fn image_id(&self, image_index: usize) -> &str {
        &self.ids[image_index]
    }

    fn labels(&self) -> &[String] {
        self.source.labels()
    }

    fn groups(&self) -> &[Vec<TileRef>] {
        &self.groups
    }

    fn load_tile(&mut self, tile: &TileRef) -> Result<LoadedTile> {
        let size = self
            .sizes
            .get(tile.image_index)
            .copied()
            .ok_or_else(|| anyhow!("图像下标越界: {}", tile.image_index))?;
        let rect = self
            .grids
            .get(&size)
            .and_then(|g| g.get(tile.crop_number))
            .copied()
            .ok_or_else(|| anyhow!("切片下标越界: {:?}", tile))?;
        let scale = self.scales[tile.image_index];

        let image = self.resized_image(tile.image_index)?;
        let pixels = crop_region(image, &rect).ok_or_else(|| anyhow!("切片 {:?} 在图像外", rect))?;
        Ok(LoadedTile {
            image: pixels,
            tile: rect,
            transform: TileTransform::new(&rect, scale, ResizeOrder::BeforeTiling),
        })
    }

    fn load_image(&mut self, image_index: usize) -> Result<DynamicImage> {
        let id = &self.ids[image_index];
        self.source
            .load_image(id)
            .with_context(|| format!("读取图像失败: {}", id))
    }

    fn annotations(&self, image_index: usize) -> Result<Vec<Annotation>> {
        Ok(self.source.annotations(&self.ids[image_index])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DatasetWriter, YoloDataset};
    use image::RgbImage;
    use std::fs;
    use std::path::{Path, PathBuf};

    fn temp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lacmus-tiles-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn make_dataset(root: &Path) -> YoloDataset {
        let writer = YoloDataset::create(root, vec!["Pedestrian".to_string()]).unwrap();
        let image = DynamicImage::ImageRgb8(RgbImage::new(400, 200));
        writer.add("a", &image, &[]).unwrap();
        writer.add("b", &image, &[]).unwrap();
        YoloDataset::open(root).unwrap()
    }

    #[test]
    fn test_grouped_by_image() {
        let root = temp_root("grouped");
        let dataset = make_dataset(&root);
        let cropper = GridCropper::new(200, 200, 0, 0, 0.75).unwrap();
        let mut tiles = GridTileSource::new(&dataset, cropper, None);

        assert_eq!(tiles.image_count(), 2);
        assert_eq!(tiles.groups().len(), tiles.image_count());
        assert!(tiles.groups()[0].iter().all(|t| t.image_index == 0));
        assert!(tiles.groups()[1].iter().all(|t| t.image_index == 1));

        let tile = tiles.groups()[0][1];
        let loaded = tiles.load_tile(&tile).unwrap();
        assert_eq!(loaded.tile, Rectangle::new(200, 0, 400, 200).unwrap());
        assert_eq!((loaded.image.width(), loaded.image.height()), (200, 200));

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_resized_tiles() {
        let root = temp_root("resized");
        let dataset = make_dataset(&root);
        let cropper = GridCropper::new(100, 100, 0, 0, 0.75).unwrap();
        // 400x200 → 200x100 (scale 0.5)
        let mut tiles = GridTileSource::new(&dataset, cropper, Some((100, 1000)));
        assert_eq!(tiles.groups()[0].len(), 2);

        let tile = tiles.groups()[0][1];
        let loaded = tiles.load_tile(&tile).unwrap();
        let local = Rectangle::new(10, 10, 20, 20).unwrap();
        assert_eq!(
            loaded.transform.to_source(&local),
            Some(Rectangle::new(220, 20, 240, 40).unwrap())
        );

        fs::remove_dir_all(&root).unwrap();
    }
}
