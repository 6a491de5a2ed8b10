/// 工具函数
/// Utility helpers
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 在限定时间内等待线程结束
///
/// 超时返回 `Err(handle)`, 由调用方决定继续等待还是放弃 (线程会被分离).
/// 线程 panic 时返回 `Ok(None)`.
pub fn join_with_timeout<T>(
    handle: JoinHandle<T>,
    timeout: Duration,
) -> Result<Option<T>, JoinHandle<T>> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        let now = Instant::now();
        if now >= deadline {
            return Err(handle);
        }
        thread::sleep((deadline - now).min(Duration::from_millis(5)));
    }
    Ok(handle.join().ok())
}

/// 滚动帧率统计 (每秒刷新一次)
#[derive(Debug)]
pub struct FpsCounter {
    count: u32,
    last: Instant,
    current_fps: f64,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self {
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
        }
    }
}

impl FpsCounter {
    /// 记录一帧, 返回当前帧率
    pub fn tick(&mut self) -> f64 {
        self.count += 1;
        let elapsed = self.last.elapsed();
        if elapsed >= Duration::from_secs(1) {
            self.current_fps = self.count as f64 / elapsed.as_secs_f64();
            self.count = 0;
            self.last = Instant::now();
        }
        self.current_fps
    }

    pub fn fps(&self) -> f64 {
        self.current_fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_finished_thread() {
        let handle = thread::spawn(|| 42);
        assert_eq!(join_with_timeout(handle, Duration::from_secs(1)).ok(), Some(Some(42)));
    }

    #[test]
    fn test_join_times_out() {
        let (tx, rx) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::spawn(move || {
            let _ = rx.recv();
        });
        let handle = join_with_timeout(handle, Duration::from_millis(30)).unwrap_err();
        drop(tx);
        assert!(join_with_timeout(handle, Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_fps_counter_starts_at_zero() {
        let mut fps = FpsCounter::default();
        assert_eq!(fps.tick(), 0.0);
        assert_eq!(fps.fps(), 0.0);
    }
}
