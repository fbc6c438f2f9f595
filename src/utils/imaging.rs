//! 图像工具: 缩放比例, 高性能缩放, 切片裁剪

use anyhow::{Context, Result};
use fast_image_resize as fr;
use image::{DynamicImage, RgbImage};

use crate::detection::Rectangle;

/// 短边缩放到 `min_side`, 如果长边因此超过 `max_side`, 改为长边缩放到 `max_side`
pub fn compute_resize_scale(width: u32, height: u32, min_side: u32, max_side: u32) -> f64 {
    let smallest = width.min(height).max(1) as f64;
    let largest = width.max(height).max(1) as f64;

    let mut scale = min_side as f64 / smallest;
    if largest * scale > max_side as f64 {
        scale = max_side as f64 / largest;
    }
    scale
}

/// 缩放后的尺寸 (截断取整, 至少 1 像素)
pub fn scaled_size(width: u32, height: u32, scale: f64) -> (u32, u32) {
    (
        ((width as f64 * scale) as u32).max(1),
        ((height as f64 * scale) as u32).max(1),
    )
}

/// 按 `compute_resize_scale` 缩放图像, 返回缩放后的图像和比例
pub fn resize_image(image: &DynamicImage, min_side: u32, max_side: u32) -> Result<(DynamicImage, f64)> {
    let scale = compute_resize_scale(image.width(), image.height(), min_side, max_side);
    let resized = resize_by_scale(image, scale)?;
    Ok((resized, scale))
}

/// fast_image_resize 双线性缩放 (RGB)
pub fn resize_by_scale(image: &DynamicImage, scale: f64) -> Result<DynamicImage> {
    let (dst_w, dst_h) = scaled_size(image.width(), image.height(), scale);
    if (dst_w, dst_h) == (image.width(), image.height()) {
        return Ok(image.clone());
    }

    let rgb = image.to_rgb8();
    let (src_w, src_h) = rgb.dimensions();
    let src_image = fr::images::Image::from_vec_u8(src_w, src_h, rgb.into_raw(), fr::PixelType::U8x3)
        .context("创建源图像失败")?;
    let mut dst_image = fr::images::Image::new(dst_w, dst_h, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src_image,
            &mut dst_image,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )
        .context("图像缩放失败")?;

    let rgb = RgbImage::from_raw(dst_w, dst_h, dst_image.buffer().to_vec())
        .context("缩放结果转换失败")?;
    Ok(DynamicImage::ImageRgb8(rgb))
}

/// 按切片裁剪像素; 切片可以超出图像, 这里裁到图像范围内. 完全在图像外返回 None
pub fn crop_region(image: &DynamicImage, region: &Rectangle) -> Option<DynamicImage> {
    let clipped = region.clip(image.width(), image.height())?;
    Some(image.crop_imm(
        clipped.xmin() as u32,
        clipped.ymin() as u32,
        clipped.width() as u32,
        clipped.height() as u32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_compute_resize_scale() {
        // 短边 → 800
        let s = compute_resize_scale(1000, 700, 800, 1333);
        assert!((s - 800.0 / 700.0).abs() < 1e-9);
        // 短边到 800 时长边 1333.3 > 1333: 改用长边
        let s = compute_resize_scale(1000, 600, 800, 1333);
        assert!((s - 1333.0 / 1000.0).abs() < 1e-9);
        // 长边正好等于上限: 仍按短边
        let s = compute_resize_scale(1333, 800, 800, 1333);
        assert!((s - 1.0).abs() < 1e-9);
        // 长边会超 1333: 改用长边
        let s = compute_resize_scale(4000, 3000, 800, 1333);
        assert!((s - 1333.0 / 4000.0).abs() < 1e-9);
    }

    #[test]
    fn test_resize_image_size() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(400, 300, Rgb([10, 20, 30])));
        let (resized, scale) = resize_image(&image, 150, 1000).unwrap();
        assert!((scale - 0.5).abs() < 1e-9);
        assert_eq!((resized.width(), resized.height()), (200, 150));
        // 纯色图缩放后颜色不变
        assert_eq!(resized.to_rgb8().get_pixel(100, 75), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_crop_region_clips() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(300, 200));
        let tile = Rectangle::new(200, 100, 400, 400).unwrap();
        let crop = crop_region(&image, &tile).unwrap();
        assert_eq!((crop.width(), crop.height()), (100, 100));

        let outside = Rectangle::new(300, 0, 400, 100).unwrap();
        assert!(crop_region(&image, &outside).is_none());
    }
}
