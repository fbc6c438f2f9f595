/// 工具模块
/// Utility modules
pub mod draw;
pub mod imaging;
pub mod pool;

pub use imaging::{compute_resize_scale, crop_region, resize_image};
pub use pool::parallel_map;
