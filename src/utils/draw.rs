//! 可视化: 在整图上画出标注 (绿) 和检测结果 (按类别着色)

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detection::{Annotation, Detection, Rectangle};

const ANNOTATION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

fn label_color(label: &str) -> Rgb<u8> {
    const PALETTE: [[u8; 3]; 6] = [
        [255, 0, 0],
        [0, 0, 255],
        [255, 0, 255],
        [0, 255, 255],
        [255, 255, 0],
        [128, 128, 128],
    ];
    let hash = label
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    Rgb(PALETTE[hash % PALETTE.len()])
}

/// 画一个 `thickness` 像素宽的空心框, 框会被裁到图像内
pub fn draw_box(image: &mut RgbImage, bbox: &Rectangle, color: Rgb<u8>, thickness: u32) {
    let Some(clipped) = bbox.clip(image.width(), image.height()) else {
        return;
    };
    let (w, h) = (clipped.width() as u32, clipped.height() as u32);
    let layers = thickness.max(1).min(w.div_ceil(2)).min(h.div_ceil(2));
    for t in 0..layers {
        let rect = Rect::at(clipped.xmin() + t as i32, clipped.ymin() + t as i32)
            .of_size((w - 2 * t).max(1), (h - 2 * t).max(1));
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// 返回画好标注和检测结果的 RGB 图像
pub fn draw_annotated(image: &DynamicImage, annotations: &[Annotation], detections: &[Detection]) -> RgbImage {
    let mut canvas = image.to_rgb8();
    for a in annotations {
        draw_box(&mut canvas, &a.bbox, ANNOTATION_COLOR, 2);
    }
    for d in detections {
        draw_box(&mut canvas, &d.bbox, label_color(&d.label), 2);
    }
    canvas
}
