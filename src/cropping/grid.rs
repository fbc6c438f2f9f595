//! 网格切片 (Grid cropping)
//!
//! 把任意尺寸的航拍图切成固定大小、互相重叠的窗口, 并负责:
//! - 标注投影: 原图坐标 → 切片坐标 (裁剪 + 面积比例过滤)
//! - 检测反投影: 切片坐标 → 原图坐标 (见 [`TileTransform`])

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::detection::{Annotation, Rectangle};
use crate::error::CropError;

/// 网格切片器
#[derive(Clone, Debug)]
pub struct GridCropper {
    window_w: u32,
    window_h: u32,
    overlap_w: u32,
    overlap_h: u32,
    min_cropped_bbox_square: f64,
}

/// 切片内的标注 (平行数组, 没有标注时为空而不是缺失)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CroppedAnnotations {
    pub labels: Vec<String>,
    pub bboxes: Vec<Rectangle>,
}

impl CroppedAnnotations {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn into_annotations(self) -> Vec<Annotation> {
        self.labels
            .into_iter()
            .zip(self.bboxes)
            .map(|(label, bbox)| Annotation { label, bbox })
            .collect()
    }
}

/// 按面积比例拆分后的切片标注
#[derive(Clone, Debug, Default)]
pub struct SplitAnnotations {
    /// 保留下来的 (面积比 >= 阈值)
    pub big: Vec<Annotation>,
    /// 被切得太碎的
    pub small: Vec<Annotation>,
}

impl GridCropper {
    pub fn new(
        window_w: u32,
        window_h: u32,
        overlap_w: u32,
        overlap_h: u32,
        min_cropped_bbox_square: f64,
    ) -> Result<Self, CropError> {
        if window_w == 0 || window_h == 0 || overlap_w >= window_w || overlap_h >= window_h {
            return Err(CropError::InvalidGrid {
                window_w,
                window_h,
                overlap_w,
                overlap_h,
            });
        }
        Ok(Self {
            window_w,
            window_h,
            overlap_w,
            overlap_h,
            min_cropped_bbox_square,
        })
    }

    pub fn window(&self) -> (u32, u32) {
        (self.window_w, self.window_h)
    }

    pub fn min_cropped_bbox_square(&self) -> f64 {
        self.min_cropped_bbox_square
    }

    /// 切片网格, x 外层 y 内层, 顺序固定
    pub fn grid(&self, image_w: u32, image_h: u32) -> Vec<Rectangle> {
        let xs = cut_points(image_w, self.window_w, self.overlap_w);
        let ys = cut_points(image_h, self.window_h, self.overlap_h);

        let mut seen = HashSet::with_capacity(xs.len() * ys.len());
        let mut tiles = Vec::with_capacity(xs.len() * ys.len());
        for &x in &xs {
            for &y in &ys {
                let tile = Rectangle::new(
                    x,
                    y,
                    x + self.window_w as i32,
                    y + self.window_h as i32,
                );
                // window > 0, 不会退化
                if let Some(tile) = tile {
                    if seen.insert(tile) {
                        tiles.push(tile);
                    }
                }
            }
        }
        tiles
    }

    /// 只计算切片数量, 不生成矩形
    pub fn crop_count(&self, image_w: u32, image_h: u32) -> usize {
        cut_points(image_w, self.window_w, self.overlap_w).len()
            * cut_points(image_h, self.window_h, self.overlap_h).len()
    }

    /// 计算落在切片内的标注 (平行数组接口)
    pub fn calc_annotations<S: AsRef<str>>(
        &self,
        labels: &[S],
        bboxes: &[Rectangle],
        tile: &Rectangle,
    ) -> CroppedAnnotations {
        let mut out = CroppedAnnotations::default();
        for (label, bbox) in labels.iter().zip(bboxes) {
            if let Some(cropped) = self.accept(bbox, tile) {
                out.labels.push(label.as_ref().to_string());
                out.bboxes.push(cropped);
            }
        }
        out
    }

    pub fn calc_annotations_for(&self, annotations: &[Annotation], tile: &Rectangle) -> Vec<Annotation> {
        annotations
            .iter()
            .filter_map(|a| self.accept(&a.bbox, tile).map(|bbox| Annotation::new(a.label.clone(), bbox)))
            .collect()
    }

    /// 按面积比例把切片标注分成大/小两组, 完全不在切片内的丢弃
    pub fn split_annotations(&self, annotations: &[Annotation], tile: &Rectangle) -> SplitAnnotations {
        let mut split = SplitAnnotations::default();
        for a in annotations {
            let Some(cropped) = crop_bbox(&a.bbox, tile) else {
                continue;
            };
            let item = Annotation::new(a.label.clone(), cropped);
            if self.is_big_enough(&a.bbox, &cropped) {
                split.big.push(item);
            } else {
                split.small.push(item);
            }
        }
        split
    }

    fn accept(&self, bbox: &Rectangle, tile: &Rectangle) -> Option<Rectangle> {
        crop_bbox(bbox, tile).filter(|cropped| self.is_big_enough(bbox, cropped))
    }

    fn is_big_enough(&self, source: &Rectangle, cropped: &Rectangle) -> bool {
        cropped.area() as f64 / source.area() as f64 >= self.min_cropped_bbox_square
    }
}

/// 单轴切点: 步长 `window - overlap`, 最后强制补一个贴边的切点
pub fn cut_points(extent: u32, window: u32, overlap: u32) -> Vec<i32> {
    let extent = extent as i64;
    let window = window as i64;
    let step = (window - overlap as i64).max(1);

    let mut points = Vec::new();
    let mut point = 0i64;
    while point + window < extent {
        points.push(point as i32);
        point += step;
    }
    points.push((extent - window).max(0) as i32);
    points
}

/// 把原图中的框转换到切片坐标并裁剪到切片范围内; 不相交时返回 None
pub fn crop_bbox(bbox: &Rectangle, crop: &Rectangle) -> Option<Rectangle> {
    Rectangle::new(
        bbox.xmin().max(crop.xmin()) - crop.xmin(),
        bbox.ymin().max(crop.ymin()) - crop.ymin(),
        bbox.xmax().min(crop.xmax()) - crop.xmin(),
        bbox.ymax().min(crop.ymax()) - crop.ymin(),
    )
}

/// 缩放与切片的先后顺序
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizeOrder {
    /// 先整图缩放再切片: 先加切片原点, 再除以缩放比例
    BeforeTiling,
    /// 先切片再把切片缩放到模型输入: 先除以缩放比例, 再加切片原点
    AfterTiling,
}

/// 切片 → 原图 的坐标变换
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileTransform {
    pub offset_x: i32,
    pub offset_y: i32,
    /// 原图 → 模型输入 的缩放比例
    pub scale: f64,
    pub order: ResizeOrder,
}

impl TileTransform {
    pub fn new(tile: &Rectangle, scale: f64, order: ResizeOrder) -> Self {
        Self {
            offset_x: tile.xmin(),
            offset_y: tile.ymin(),
            scale,
            order,
        }
    }

    /// 把切片内的检测框映射回原图, 截断取整, 退化返回 None
    pub fn to_source(&self, bbox: &Rectangle) -> Option<Rectangle> {
        let inv = 1.0 / self.scale;
        match self.order {
            ResizeOrder::BeforeTiling => bbox.translate(self.offset_x, self.offset_y).scale(inv),
            ResizeOrder::AfterTiling => bbox
                .scale(inv)
                .map(|r| r.translate(self.offset_x, self.offset_y)),
        }
    }
}
