//! YOLO 目录格式数据集
//!
//! ```text
//! <root>/classes.txt            每行一个类别名
//! <root>/images/<id>.jpg
//! <root>/labels/<id>.txt        每行: class cx cy w h (归一化到 0..1)
//! <root>/ImageSets/{train,val,trainval,test}.txt
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use tracing::{debug, info};

use super::{AnnotationSource, DatasetWriter, ImageSets};
use crate::detection::{Annotation, Rectangle};
use crate::error::DatasetError;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const DEFAULT_LABEL: &str = "Pedestrian";

pub struct YoloDataset {
    root: PathBuf,
    labels: Vec<String>,
    images: HashMap<String, PathBuf>,
}

impl YoloDataset {
    /// 打开已有数据集; 没有 classes.txt 时只有一个默认类别
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DatasetError> {
        let root = root.into();
        let labels = match fs::read_to_string(root.join("classes.txt")) {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => vec![DEFAULT_LABEL.to_string()],
        };

        let mut images = HashMap::new();
        for entry in fs::read_dir(root.join("images"))? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if !is_image {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                images.insert(stem.to_string(), path.clone());
            }
        }

        info!(
            "📂 数据集 {}: {} 张图像, 类别 {:?}",
            root.display(),
            images.len(),
            labels
        );
        Ok(Self {
            root,
            labels,
            images,
        })
    }

    /// 创建新数据集目录并写出 classes.txt
    pub fn create(root: impl Into<PathBuf>, labels: Vec<String>) -> Result<Self, DatasetError> {
        let root = root.into();
        fs::create_dir_all(root.join("images"))?;
        fs::create_dir_all(root.join("labels"))?;
        fs::write(root.join("classes.txt"), labels.join("\n") + "\n")?;
        Ok(Self {
            root,
            labels,
            images: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn label_path(&self, image_id: &str) -> PathBuf {
        self.root.join("labels").join(format!("{image_id}.txt"))
    }

    fn label_index(&self, label: &str) -> Result<usize, DatasetError> {
        self.labels
            .iter()
            .position(|l| l == label)
            .ok_or_else(|| DatasetError::UnknownLabel(label.to_string()))
    }
}

/// 解析一行 `class cx cy w h`
fn parse_label_line(
    line: &str,
    labels: &[String],
    width: u32,
    height: u32,
) -> Result<Option<Annotation>, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(None);
    }
    if parts.len() != 5 {
        return Err(format!("expected 5 fields, got {}", parts.len()));
    }
    let class: usize = parts[0]
        .parse()
        .map_err(|e| format!("bad class index {:?}: {}", parts[0], e))?;
    let label = labels
        .get(class)
        .ok_or_else(|| format!("class index {} out of range", class))?;
    let mut values = [0f64; 4];
    for (value, text) in values.iter_mut().zip(&parts[1..]) {
        *value = text
            .parse()
            .map_err(|e| format!("bad coordinate {:?}: {}", text, e))?;
    }

    let [cx, cy, w, h] = values;
    let (iw, ih) = (width as f64, height as f64);
    let bbox = Rectangle::new(
        ((cx - w / 2.0) * iw).round() as i32,
        ((cy - h / 2.0) * ih).round() as i32,
        ((cx + w / 2.0) * iw).round() as i32,
        ((cy + h / 2.0) * ih).round() as i32,
    );
    // 零面积标注直接丢弃
    Ok(bbox.map(|bbox| Annotation::new(label.clone(), bbox)))
}

fn format_label_line(class: usize, bbox: &Rectangle, width: u32, height: u32) -> String {
    let (iw, ih) = (width as f64, height as f64);
    let cx = (bbox.xmin() + bbox.xmax()) as f64 / 2.0 / iw;
    let cy = (bbox.ymin() + bbox.ymax()) as f64 / 2.0 / ih;
    let w = bbox.width() as f64 / iw;
    let h = bbox.height() as f64 / ih;
    format!("{} {:.6} {:.6} {:.6} {:.6}", class, cx, cy, w, h)
}

impl AnnotationSource for YoloDataset {
    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.images.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn annotations(&self, image_id: &str) -> Result<Vec<Annotation>, DatasetError> {
        let path = self.label_path(image_id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            // 没有标注文件 = 没有目标
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} 没有标注文件", image_id);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let (width, height) = self.image_size(image_id)?;

        let mut annotations = Vec::new();
        for (index, line) in text.lines().enumerate() {
            match parse_label_line(line, &self.labels, width, height) {
                Ok(Some(annotation)) => annotations.push(annotation),
                Ok(None) => {}
                Err(reason) => {
                    return Err(DatasetError::MalformedLabel {
                        path: path.clone(),
                        line: index + 1,
                        reason,
                    })
                }
            }
        }
        Ok(annotations)
    }

    fn image_size(&self, image_id: &str) -> Result<(u32, u32), DatasetError> {
        Ok(image::image_dimensions(self.image_path(image_id)?)?)
    }

    fn image_path(&self, image_id: &str) -> Result<PathBuf, DatasetError> {
        self.images
            .get(image_id)
            .cloned()
            .ok_or_else(|| DatasetError::UnknownImage(image_id.to_string()))
    }
}

impl DatasetWriter for YoloDataset {
    fn add(&self, image_id: &str, image: &DynamicImage, annotations: &[Annotation]) -> Result<(), DatasetError> {
        let (width, height) = (image.width(), image.height());
        let mut lines = Vec::with_capacity(annotations.len());
        for a in annotations {
            lines.push(format_label_line(self.label_index(&a.label)?, &a.bbox, width, height));
        }

        let image_path = self.root.join("images").join(format!("{image_id}.jpg"));
        DynamicImage::ImageRgb8(image.to_rgb8()).save(&image_path)?;

        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        fs::write(self.label_path(image_id), content)?;
        Ok(())
    }

    fn write_image_sets(&self, sets: &ImageSets) -> Result<(), DatasetError> {
        let dir = self.root.join("ImageSets");
        fs::create_dir_all(&dir)?;
        let write = |name: &str, ids: &[String]| -> Result<(), DatasetError> {
            let content: String = ids.iter().map(|id| format!("{id}\n")).collect();
            fs::write(dir.join(name), content)?;
            Ok(())
        };
        write("train.txt", &sets.train)?;
        write("trainval.txt", &sets.trainval())?;
        write("val.txt", &sets.val)?;
        write("test.txt", &sets.test)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn temp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lacmus-yolo-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn rect(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Rectangle {
        Rectangle::new(xmin, ymin, xmax, ymax).unwrap()
    }

    #[test]
    fn test_label_line_roundtrip_pixels() {
        let labels = vec!["Pedestrian".to_string()];
        let bbox = rect(101, 37, 163, 190);
        let line = format_label_line(0, &bbox, 1333, 800);
        let parsed = parse_label_line(&line, &labels, 1333, 800).unwrap().unwrap();
        assert_eq!(parsed.bbox, bbox);
        assert_eq!(parsed.label, "Pedestrian");
    }

    #[test]
    fn test_malformed_label_line() {
        let labels = vec!["Pedestrian".to_string()];
        assert!(parse_label_line("0 0.5 0.5", &labels, 100, 100).is_err());
        assert!(parse_label_line("3 0.5 0.5 0.1 0.1", &labels, 100, 100).is_err());
        assert!(parse_label_line("   ", &labels, 100, 100).unwrap().is_none());
    }

    #[test]
    fn test_write_then_open() {
        let root = temp_root("rw");
        let dataset = YoloDataset::create(&root, vec!["Pedestrian".to_string()]).unwrap();
        let image = DynamicImage::ImageRgb8(RgbImage::new(200, 100));
        let annotations = vec![Annotation::new("Pedestrian", rect(10, 20, 30, 60))];
        dataset.add("0", &image, &annotations).unwrap();
        dataset.add("1", &image, &[]).unwrap();
        assert!(matches!(
            dataset.add("2", &image, &[Annotation::new("Car", rect(0, 0, 5, 5))]),
            Err(DatasetError::UnknownLabel(_))
        ));

        let reopened = YoloDataset::open(&root).unwrap();
        assert_eq!(reopened.ids(), vec!["0".to_string(), "1".to_string()]);
        assert_eq!(reopened.image_size("0").unwrap(), (200, 100));
        assert_eq!(reopened.annotations("0").unwrap(), annotations);
        assert!(reopened.annotations("1").unwrap().is_empty());
        assert!(reopened.image_path("missing").is_err());

        reopened
            .write_image_sets(&ImageSets {
                train: vec!["0".to_string()],
                val: vec!["1".to_string()],
                test: vec!["1".to_string()],
            })
            .unwrap();
        let trainval = fs::read_to_string(root.join("ImageSets").join("trainval.txt")).unwrap();
        assert_eq!(trainval, "0\n1\n");

        fs::remove_dir_all(&root).unwrap();
    }
}
