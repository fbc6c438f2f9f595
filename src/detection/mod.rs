/// 检测系统 (Detection System)
///
/// - types:    几何与检测数据结构
/// - detector: 检测器接口, 整图切片推理, 结果回放
/// - merger:   同类框合并
pub mod detector;
pub mod merger;
pub mod types;

pub use detector::{Detector, ReplayDetector, TileInput, TileRecord, TiledDetector, TiledOutput};
pub use merger::DetectionMerger;
pub use types::{Annotation, Detection, RawDetection, Rectangle};
