//! 正负样本均衡 (Sampling balancer)
//!
//! 计划的样本类型取不到时从另一个池子借, 并记下欠账;
//! 之后遇到相反类型的请求时优先还账.

use rand::Rng;

use super::sampling::CropSampling;
use crate::detection::Rectangle;
use crate::error::SamplingError;

#[derive(Debug, Default)]
pub struct SamplingBalancer {
    /// < 0: 多产出了负样本; > 0: 多产出了正样本
    imbalance: i64,
}

impl SamplingBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn imbalance(&self) -> i64 {
        self.imbalance
    }

    /// 按计划类型取 `count` 个样本, 总是正好返回 `count` 个
    ///
    /// 还账分支可能多还 (剩余部分也从借出方取, 计数继续变化), 已有数据集依赖这一行为.
    pub fn get_samples_balanced<P, N, R>(
        &mut self,
        count: usize,
        positive_planned: bool,
        positive: &P,
        negative: &N,
        rng: &mut R,
    ) -> Result<Vec<Rectangle>, SamplingError>
    where
        P: CropSampling,
        N: CropSampling,
        R: Rng + ?Sized,
    {
        let pos_ok = positive.samples_available();
        let neg_ok = negative.samples_available();
        if !pos_ok && !neg_ok {
            return Err(SamplingError::PoolsExhausted);
        }
        let n = count as i64;

        let samples = if positive_planned && self.imbalance > 0 {
            if neg_ok {
                let counterweight = n.min(self.imbalance);
                let mut samples = negative.get_samples(counterweight as usize, rng);
                self.imbalance -= counterweight;
                let reminder = n - counterweight;
                if reminder > 0 {
                    if pos_ok {
                        samples.extend(positive.get_samples(reminder as usize, rng));
                    } else {
                        samples.extend(negative.get_samples(reminder as usize, rng));
                        self.imbalance -= reminder;
                    }
                }
                samples
            } else {
                // 按计划取, 下次再平衡
                positive.get_samples(count, rng)
            }
        } else if !positive_planned && self.imbalance < 0 {
            if pos_ok {
                let counterweight = n.min(-self.imbalance);
                let mut samples = positive.get_samples(counterweight as usize, rng);
                self.imbalance += counterweight;
                let reminder = n - counterweight;
                if reminder > 0 {
                    if neg_ok {
                        samples.extend(negative.get_samples(reminder as usize, rng));
                    } else {
                        samples.extend(positive.get_samples(reminder as usize, rng));
                        // 按 counterweight 而不是 reminder 计数
                        self.imbalance += counterweight;
                    }
                }
                samples
            } else {
                negative.get_samples(count, rng)
            }
        } else if positive_planned {
            if pos_ok {
                positive.get_samples(count, rng)
            } else {
                self.imbalance -= n;
                negative.get_samples(count, rng)
            }
        } else if neg_ok {
            negative.get_samples(count, rng)
        } else {
            self.imbalance += n;
            positive.get_samples(count, rng)
        };

        Ok(samples)
    }
}
