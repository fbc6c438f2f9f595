//! 工作线程池: 任务队列 → N 个工作线程 → 结果队列 (crossbeam-channel)

use crossbeam_channel::{unbounded, Receiver, Sender};

/// 并行处理 `items`, 结果保持输入顺序
///
/// 每个任务独立, 不共享可变状态; 单个任务的失败由 `f` 自己以返回值表达.
pub fn parallel_map<T, U, F>(items: Vec<T>, workers: usize, f: F) -> Vec<U>
where
    T: Send,
    U: Send,
    F: Fn(T) -> U + Sync,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }
    let workers = workers.clamp(1, total);

    let (job_tx, job_rx): (Sender<(usize, T)>, Receiver<(usize, T)>) = unbounded();
    let (res_tx, res_rx): (Sender<(usize, U)>, Receiver<(usize, U)>) = unbounded();
    for job in items.into_iter().enumerate() {
        // 接收端还在, 不会失败
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    std::thread::scope(|s| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let res_tx = res_tx.clone();
            let f = &f;
            s.spawn(move || {
                for (index, item) in job_rx.iter() {
                    if res_tx.send((index, f(item))).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(res_tx);

    let mut results: Vec<(usize, U)> = res_rx.iter().collect();
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, value)| value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_map_keeps_order() {
        let items: Vec<u64> = (0..100).collect();
        let squared = parallel_map(items, 4, |x| x * x);
        assert_eq!(squared.len(), 100);
        assert!(squared.iter().enumerate().all(|(i, v)| *v == (i as u64) * (i as u64)));
    }

    #[test]
    fn test_parallel_map_empty_and_single_worker() {
        let empty: Vec<u32> = parallel_map(Vec::<u32>::new(), 8, |x| x);
        assert!(empty.is_empty());
        assert_eq!(parallel_map(vec![1, 2, 3], 0, |x| x + 1), vec![2, 3, 4]);
    }
}
