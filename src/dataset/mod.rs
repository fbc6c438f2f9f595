/// 数据集 (Dataset)
///
/// - yolo:           YOLO 目录格式的读写
/// - grid_crops:     网格切片生成新数据集
/// - balanced_crops: 正负样本均衡的随机裁剪数据集
use std::path::PathBuf;

use image::DynamicImage;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::detection::Annotation;
use crate::error::DatasetError;

pub mod balanced_crops;
pub mod grid_crops;
pub mod yolo;

pub use balanced_crops::{BalancedCropsGenerator, CropPlan};
pub use grid_crops::{DatasetGridCropper, GridFragment};
pub use yolo::YoloDataset;

/// 标注来源
pub trait AnnotationSource: Sync {
    /// 图像 id, 顺序固定
    fn ids(&self) -> Vec<String>;

    /// 类别名, 下标即模型输出的类别索引
    fn labels(&self) -> &[String];

    fn annotations(&self, image_id: &str) -> Result<Vec<Annotation>, DatasetError>;

    /// 只读图像头, 不解码像素
    fn image_size(&self, image_id: &str) -> Result<(u32, u32), DatasetError>;

    fn image_path(&self, image_id: &str) -> Result<PathBuf, DatasetError>;

    fn load_image(&self, image_id: &str) -> Result<DynamicImage, DatasetError> {
        Ok(image::open(self.image_path(image_id)?)?)
    }
}

/// 数据集写入
pub trait DatasetWriter: Sync {
    /// 写入一张图像及其标注; 已存在的 id 会被覆盖
    fn add(&self, image_id: &str, image: &DynamicImage, annotations: &[Annotation]) -> Result<(), DatasetError>;

    fn write_image_sets(&self, sets: &ImageSets) -> Result<(), DatasetError>;
}

/// train / val / test 划分 (trainval = train + val)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageSets {
    pub train: Vec<String>,
    pub val: Vec<String>,
    pub test: Vec<String>,
}

impl ImageSets {
    /// 打乱后按比例切分, 测试集与验证集相同
    pub fn split<R: Rng + ?Sized>(mut ids: Vec<String>, train_ratio: f64, rng: &mut R) -> Self {
        let train_count = (ids.len() as f64 * train_ratio) as usize;
        ids.shuffle(rng);
        let val = ids.split_off(train_count.min(ids.len()));
        Self {
            train: ids,
            test: val.clone(),
            val,
        }
    }

    pub fn trainval(&self) -> Vec<String> {
        self.train.iter().chain(&self.val).cloned().collect()
    }
}
