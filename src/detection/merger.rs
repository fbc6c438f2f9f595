//! 检测框合并 (Detection merging)
//! 职责: 置信度过滤 → 同类别框贪心合并 (外接矩形 + 分数取最大)
//!
//! 相邻切片会对同一个目标各出一个框, 这里把它们合成一个.
//! 算法是贪心且依赖顺序的, 输出数量和形状就是对外契约, 不要换成 NMS/聚类.
//! 低于阈值的框逐个跳过而不是遇到第一个就停止: 输入按分数降序时两者结果相同,
//! 未排序的输入也不会丢掉后面的高分框.

use super::types::{Detection, Rectangle};

pub struct DetectionMerger {
    score_threshold: f32,
}

impl DetectionMerger {
    pub fn new(score_threshold: f32) -> Self {
        Self { score_threshold }
    }

    pub fn score_threshold(&self) -> f32 {
        self.score_threshold
    }

    /// 合并检测结果, 保持输入顺序
    pub fn merge(&self, detections: impl IntoIterator<Item = Detection>) -> Vec<Detection> {
        let mut results: Vec<Detection> = Vec::new();

        for target in detections {
            if target.score < self.score_threshold {
                continue;
            }

            // 一旦置位就不再清除: 之后扫到的同类结果也会取分数最大值
            let mut is_merged = false;
            for res in results.iter_mut() {
                if res.label != target.label {
                    continue;
                }
                if widen(&mut res.bbox, &target.bbox) {
                    is_merged = true;
                }
                if is_merged {
                    res.score = res.score.max(target.score);
                }
            }

            if !is_merged {
                results.push(target);
            }
        }

        results
    }
}

/// 六个条件依次作用在当前 (可能已被放大的) 结果框上, 返回是否命中任一条件
fn widen(res: &mut Rectangle, t: &Rectangle) -> bool {
    let [mut xmin, mut ymin, mut xmax, mut ymax] = res.to_array();
    let mut hit = false;

    if xmin <= t.xmin() && xmax >= t.xmin() {
        xmax = xmax.max(t.xmax());
        hit = true;
    }
    if xmin <= t.xmax() && xmax >= t.xmax() {
        xmin = xmin.min(t.xmin());
        hit = true;
    }
    if ymin <= t.ymin() && ymax >= t.ymin() {
        ymax = ymax.max(t.ymax());
        hit = true;
    }
    if ymin <= t.ymax() && ymax >= t.ymax() {
        ymin = ymin.min(t.ymin());
        hit = true;
    }
    if t.xmin() <= xmin && t.xmax() >= xmax {
        xmax = xmax.max(t.xmax());
        xmin = xmin.min(t.xmin());
        hit = true;
    }
    if t.ymin() <= ymin && t.ymax() >= ymax {
        ymax = ymax.max(t.ymax());
        ymin = ymin.min(t.ymin());
        hit = true;
    }

    // 只会变大, 不会退化
    if let Some(widened) = Rectangle::new(xmin, ymin, xmax, ymax) {
        *res = widened;
    }
    hit
}
