/// 评估 (Evaluation)
///
/// - tiles:     按图像分组的切片来源
/// - evaluator: 逐切片推理, 反投影, 计算每个类别的 AP
pub mod evaluator;
pub mod tiles;

pub use evaluator::{compute_ap, evaluate, ClassMetrics, EvalParams, EvaluationReport};
pub use tiles::{GridTileSource, LoadedTile, TileRef, TileSource};
