use std::time::{Duration, Instant};

/// 滚动窗口吞吐计数器
///
/// 每过一个窗口 (默认 1 秒) 报告一次窗口内的计次并清零，用于打印 FPS。
#[derive(Debug, Clone)]
pub struct TickMeter {
    window: Duration,
    window_start: Option<Instant>, // 当前窗口的起点
    counter: u64,                  // 当前窗口内的计次
    total: u64,                    // 累计计次
    last_rate: u64,                // 上一个完整窗口的计次
}

impl Default for TickMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl TickMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: None,
            counter: 0,
            total: 0,
            last_rate: 0,
        }
    }

    /// 计次一次；窗口结束时返回该窗口内的计次
    pub fn tick(&mut self) -> Option<u64> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> Option<u64> {
        let start = *self.window_start.get_or_insert(now);
        self.counter += 1;
        self.total += 1;

        if now.duration_since(start) >= self.window {
            let rate = self.counter;
            self.last_rate = rate;
            self.counter = 0;
            self.window_start = Some(now);
            return Some(rate);
        }
        None
    }

    pub fn reset(&mut self) {
        self.window_start = None;
        self.counter = 0;
        self.total = 0;
        self.last_rate = 0;
    }

    /// 上一个完整窗口的计次 (窗口为 1 秒时即 FPS)
    pub fn get_fps(&self) -> u64 {
        self.last_rate
    }

    pub fn get_counter(&self) -> u64 {
        self.total
    }
}
