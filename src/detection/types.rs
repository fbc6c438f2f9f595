/// 检测系统数据结构定义
/// Geometric primitives shared by cropping, merging and evaluation
use serde::{Deserialize, Serialize};

// ========== 数据结构 ==========

/// 轴对齐矩形, 像素坐标, xmax/ymax 不包含 (exclusive)
///
/// 只能通过 [`Rectangle::new`] 构造, 保证 `xmin < xmax` 且 `ymin < ymax`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RectangleFields")]
pub struct Rectangle {
    xmin: i32,
    ymin: i32,
    xmax: i32,
    ymax: i32,
}

#[derive(Deserialize)]
struct RectangleFields {
    xmin: i32,
    ymin: i32,
    xmax: i32,
    ymax: i32,
}

impl TryFrom<RectangleFields> for Rectangle {
    type Error = String;

    fn try_from(f: RectangleFields) -> Result<Self, Self::Error> {
        Rectangle::new(f.xmin, f.ymin, f.xmax, f.ymax).ok_or_else(|| {
            format!(
                "degenerate rectangle ({}, {}, {}, {})",
                f.xmin, f.ymin, f.xmax, f.ymax
            )
        })
    }
}

impl Rectangle {
    /// 退化矩形 (宽或高 <= 0) 返回 None
    pub fn new(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Option<Self> {
        (xmin < xmax && ymin < ymax).then_some(Self {
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }

    /// 从浮点坐标构造 (截断取整), 用于模型输出
    pub fn from_f32(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Option<Self> {
        Self::new(xmin as i32, ymin as i32, xmax as i32, ymax as i32)
    }

    /// 以原点为左上角的整幅图像
    pub fn from_size(width: u32, height: u32) -> Option<Self> {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub fn xmin(&self) -> i32 {
        self.xmin
    }

    pub fn ymin(&self) -> i32 {
        self.ymin
    }

    pub fn xmax(&self) -> i32 {
        self.xmax
    }

    pub fn ymax(&self) -> i32 {
        self.ymax
    }

    pub fn width(&self) -> i32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> i32 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn to_array(&self) -> [i32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }

    /// 平移 (平移不会改变宽高, 结果总是合法)
    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self {
            xmin: self.xmin + dx,
            ymin: self.ymin + dy,
            xmax: self.xmax + dx,
            ymax: self.ymax + dy,
        }
    }

    /// 按比例缩放, 坐标截断取整; 缩得太小会退化为 None
    pub fn scale(&self, scale: f64) -> Option<Self> {
        Self::new(
            (self.xmin as f64 * scale) as i32,
            (self.ymin as f64 * scale) as i32,
            (self.xmax as f64 * scale) as i32,
            (self.ymax as f64 * scale) as i32,
        )
    }

    /// 交集
    pub fn intersection(&self, other: &Rectangle) -> Option<Self> {
        Self::new(
            self.xmin.max(other.xmin),
            self.ymin.max(other.ymin),
            self.xmax.min(other.xmax),
            self.ymax.min(other.ymax),
        )
    }

    /// 裁剪到 `[0, width) x [0, height)`
    pub fn clip(&self, width: u32, height: u32) -> Option<Self> {
        Self::from_size(width, height).and_then(|image| self.intersection(&image))
    }

    pub fn contains(&self, other: &Rectangle) -> bool {
        self.xmin <= other.xmin
            && self.ymin <= other.ymin
            && self.xmax >= other.xmax
            && self.ymax >= other.ymax
    }

    /// 交并比 (IoU)
    pub fn iou(&self, other: &Rectangle) -> f32 {
        let inter = match self.intersection(other) {
            Some(r) => r.area(),
            None => return 0.0,
        };
        let union = self.area() + other.area() - inter;
        inter as f32 / union as f32
    }
}

/// 标注: 类别名 + 框
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub label: String,
    pub bbox: Rectangle,
}

impl Annotation {
    pub fn new(label: impl Into<String>, bbox: Rectangle) -> Self {
        Self {
            label: label.into(),
            bbox,
        }
    }
}

/// 检测结果 (已解析类别名)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: Rectangle,
    pub score: f32,
    pub label: String,
}

impl Detection {
    pub fn new(bbox: Rectangle, score: f32, label: impl Into<String>) -> Self {
        Self {
            bbox,
            score,
            label: label.into(),
        }
    }
}

/// 模型原始输出 (类别为索引)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub bbox: Rectangle,
    pub score: f32,
    pub label: usize,
}
