//! 错误类型 (Error types)
//!
//! 几何退化 (空框) 不是错误, 用 `Option` 过滤; 这里只放前置条件违反和 I/O 失败.

use std::path::PathBuf;

use thiserror::Error;

use crate::detection::Rectangle;

/// 切片/裁剪参数错误
#[derive(Debug, Error)]
pub enum CropError {
    #[error("invalid grid: window {window_w}x{window_h}, overlap {overlap_w}x{overlap_h} (overlap must be smaller than a non-empty window)")]
    InvalidGrid {
        window_w: u32,
        window_h: u32,
        overlap_w: u32,
        overlap_h: u32,
    },

    #[error("crop {crop_w}x{crop_h} does not fit into image {image_w}x{image_h}")]
    CropLargerThanImage {
        crop_w: u32,
        crop_h: u32,
        image_w: u32,
        image_h: u32,
    },

    #[error("bbox {bbox:?} does not fit into crop {crop_w}x{crop_h}")]
    BoxLargerThanCrop {
        bbox: Rectangle,
        crop_w: u32,
        crop_h: u32,
    },
}

/// 采样均衡错误
#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("neither positive nor negative samples are available")]
    PoolsExhausted,
}

/// 评估错误
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("need crop generator to have crops grouped by image ({groups} groups for {images} images)")]
    UngroupedTiles { groups: usize, images: usize },

    #[error("no image could be evaluated ({failed} failed)")]
    NothingEvaluated { failed: usize },

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 数据集读写错误
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("unknown image id: {0}")]
    UnknownImage(String),

    #[error("malformed label line {line} in {path}: {reason}")]
    MalformedLabel {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("label {0:?} is not in the class list")]
    UnknownLabel(String),

    #[error(transparent)]
    Crop(#[from] CropError),

    #[error(transparent)]
    Sampling(#[from] SamplingError),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
