//! 随机裁剪采样 (Positive / Negative crop sampling)
//!
//! - PositiveSampling: 裁剪窗口完整包含某个目标框
//! - NegativeSampling: 裁剪窗口落在不含目标的空白区域 (EmptyArea) 内
//!
//! 所有窗口都是 `crop_w x crop_h`, 坐标 xmax/ymax 不包含.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::detection::Rectangle;
use crate::error::CropError;

/// 采样器统一接口
pub trait CropSampling {
    /// 是否还能产出样本
    fn samples_available(&self) -> bool;

    /// 产出 `count` 个裁剪窗口 (有放回抽取)
    fn get_samples<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<Rectangle>;
}

fn check_crop_fits(crop_w: u32, crop_h: u32, image_w: u32, image_h: u32) -> Result<(), CropError> {
    if crop_w == 0 || crop_h == 0 || crop_w > image_w || crop_h > image_h {
        return Err(CropError::CropLargerThanImage {
            crop_w,
            crop_h,
            image_w,
            image_h,
        });
    }
    Ok(())
}

// ========== 正样本 ==========

#[derive(Clone, Debug)]
pub struct PositiveSampling {
    image_w: i32,
    image_h: i32,
    crop_w: i32,
    crop_h: i32,
    bboxes: Vec<Rectangle>,
}

impl PositiveSampling {
    /// 目标框先裁剪到图像范围内; 图像外的框直接忽略
    pub fn new(
        image_w: u32,
        image_h: u32,
        crop_w: u32,
        crop_h: u32,
        bboxes: &[Rectangle],
    ) -> Result<Self, CropError> {
        check_crop_fits(crop_w, crop_h, image_w, image_h)?;

        let mut clipped = Vec::with_capacity(bboxes.len());
        for bbox in bboxes.iter().filter_map(|b| b.clip(image_w, image_h)) {
            if bbox.width() > crop_w as i32 || bbox.height() > crop_h as i32 {
                return Err(CropError::BoxLargerThanCrop {
                    bbox,
                    crop_w,
                    crop_h,
                });
            }
            clipped.push(bbox);
        }

        Ok(Self {
            image_w: image_w as i32,
            image_h: image_h as i32,
            crop_w: crop_w as i32,
            crop_h: crop_h as i32,
            bboxes: clipped,
        })
    }

    pub fn bboxes(&self) -> &[Rectangle] {
        &self.bboxes
    }

    fn random_crop_around<R: Rng + ?Sized>(&self, bbox: &Rectangle, rng: &mut R) -> Option<Rectangle> {
        let x_from = (bbox.xmax() - self.crop_w).max(0);
        let x_to = bbox.xmin().min(self.image_w - self.crop_w);
        let y_from = (bbox.ymax() - self.crop_h).max(0);
        let y_to = bbox.ymin().min(self.image_h - self.crop_h);

        let x = rng.gen_range(x_from..=x_to);
        let y = rng.gen_range(y_from..=y_to);
        Rectangle::new(x, y, x + self.crop_w, y + self.crop_h)
    }
}

impl CropSampling for PositiveSampling {
    fn samples_available(&self) -> bool {
        !self.bboxes.is_empty()
    }

    fn get_samples<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<Rectangle> {
        let mut crops = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(bbox) = self.bboxes.choose(rng) else {
                break;
            };
            if let Some(crop) = self.random_crop_around(bbox, rng) {
                crops.push(crop);
            }
        }
        crops
    }
}

// ========== 负样本 ==========

/// 不含任何已登记目标框的空白区域
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmptyArea(Rectangle);

impl EmptyArea {
    pub fn new(rect: Rectangle) -> Self {
        Self(rect)
    }

    pub fn rect(&self) -> &Rectangle {
        &self.0
    }

    /// 近似相交判断: 框的某个 x 端点落在区域 x 范围内, 且某个 y 端点落在 y 范围内 (闭区间)
    ///
    /// 框完全横跨区域时判为不相交, 生成的数据集依赖这个行为.
    pub fn intersects(&self, bbox: &Rectangle) -> bool {
        let a = &self.0;
        let in_x = |v: i32| a.xmin() <= v && v <= a.xmax();
        let in_y = |v: i32| a.ymin() <= v && v <= a.ymax();
        (in_x(bbox.xmin()) || in_x(bbox.xmax())) && (in_y(bbox.ymin()) || in_y(bbox.ymax()))
    }

    /// 框周围剩下的区域: 左, 右 (整高), 上, 下 (整宽)
    ///
    /// 与框之间留 1 像素间隔, 只保留放得下一个裁剪窗口的区域.
    pub fn crop_around(&self, bbox: &Rectangle, crop_w: i32, crop_h: i32) -> Vec<EmptyArea> {
        let a = &self.0;
        [
            Rectangle::new(a.xmin(), a.ymin(), bbox.xmin() - 1, a.ymax()),
            Rectangle::new(bbox.xmax() + 1, a.ymin(), a.xmax(), a.ymax()),
            Rectangle::new(a.xmin(), a.ymin(), a.xmax(), bbox.ymin() - 1),
            Rectangle::new(a.xmin(), bbox.ymax() + 1, a.xmax(), a.ymax()),
        ]
        .into_iter()
        .flatten()
        .filter(|m| m.width() >= crop_w && m.height() >= crop_h)
        .map(EmptyArea)
        .collect()
    }
}

#[derive(Clone, Debug)]
pub struct NegativeSampling {
    crop_w: i32,
    crop_h: i32,
    empty_areas: Vec<EmptyArea>,
}

impl NegativeSampling {
    pub fn new(
        image_w: u32,
        image_h: u32,
        crop_w: u32,
        crop_h: u32,
        bboxes: &[Rectangle],
    ) -> Result<Self, CropError> {
        check_crop_fits(crop_w, crop_h, image_w, image_h)?;
        let (cw, ch) = (crop_w as i32, crop_h as i32);

        let mut empty_areas: Vec<EmptyArea> = Rectangle::from_size(image_w, image_h)
            .map(EmptyArea)
            .into_iter()
            .collect();

        for bbox in bboxes {
            let mut index = 0;
            while index < empty_areas.len() {
                if empty_areas[index].intersects(bbox) {
                    let around = empty_areas[index].crop_around(bbox, cw, ch);
                    let inserted = around.len();
                    empty_areas.splice(index..index + 1, around);
                    // 新插入的区域不再和同一个框比较
                    index += inserted;
                } else {
                    index += 1;
                }
            }
        }

        Ok(Self {
            crop_w: cw,
            crop_h: ch,
            empty_areas,
        })
    }

    pub fn empty_areas(&self) -> &[EmptyArea] {
        &self.empty_areas
    }

    fn random_crop_inside<R: Rng + ?Sized>(&self, area: &EmptyArea, rng: &mut R) -> Option<Rectangle> {
        let a = area.rect();
        let x = a.xmin() + rng.gen_range(0..=(a.width() - self.crop_w));
        let y = a.ymin() + rng.gen_range(0..=(a.height() - self.crop_h));
        Rectangle::new(x, y, x + self.crop_w, y + self.crop_h)
    }
}

impl CropSampling for NegativeSampling {
    fn samples_available(&self) -> bool {
        !self.empty_areas.is_empty()
    }

    fn get_samples<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<Rectangle> {
        // 随机偏移, 同一个区域被多次选中也会得到不同的窗口
        let mut crops = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(area) = self.empty_areas.choose(rng) else {
                break;
            };
            if let Some(crop) = self.random_crop_inside(area, rng) {
                crops.push(crop);
            }
        }
        crops
    }
}
