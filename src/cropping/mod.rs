/// 裁剪系统 (Cropping System)
///
/// - grid:     确定性网格切片与坐标变换
/// - sampling: 正/负样本随机裁剪
/// - balancer: 正负样本比例均衡
pub mod balancer;
pub mod grid;
pub mod sampling;

pub use balancer::SamplingBalancer;
pub use grid::{
    crop_bbox, cut_points, CroppedAnnotations, GridCropper, ResizeOrder, SplitAnnotations,
    TileTransform,
};
pub use sampling::{CropSampling, EmptyArea, NegativeSampling, PositiveSampling};
