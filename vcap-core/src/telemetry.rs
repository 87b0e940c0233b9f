use std::fmt;

/// 采集健康状况与吞吐统计
///
/// 由 Worker 在每一轮循环后更新，Coordinator 在 stop 之后汇总。
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// 成功交给管线并释放的帧数
    pub frames: u64,

    /// 最近一个 1 秒窗口内的帧数
    pub last_fps: u64,

    /// select/poll 超时次数 (跨多次 acquire 累计)
    pub timeouts: u64,

    /// 被重试掉的出队错误 (EIO 等)
    pub dequeue_errors: u64,
}

impl fmt::Debug for CaptureStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureStats")
            .field("frames", &self.frames)
            .field("fps", &self.last_fps)
            .field("timeouts", &self.timeouts)
            .field("dq_errors", &self.dequeue_errors)
            .finish()
    }
}

/// 简单的状态指示灯
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceHealthStatus {
    Healthy,
    /// 出现过超时或出队错误，但仍在出帧
    Degraded,
    /// 没有出过一帧
    Stalled,
}

impl CaptureStats {
    pub fn assess_health(&self) -> DeviceHealthStatus {
        if self.frames == 0 {
            return DeviceHealthStatus::Stalled;
        }

        if self.timeouts > 0 || self.dequeue_errors > 0 {
            return DeviceHealthStatus::Degraded;
        }

        DeviceHealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_assessment() {
        assert_eq!(
            CaptureStats::default().assess_health(),
            DeviceHealthStatus::Stalled
        );

        let mut stats = CaptureStats {
            frames: 30,
            ..Default::default()
        };
        assert_eq!(stats.assess_health(), DeviceHealthStatus::Healthy);

        stats.timeouts = 1;
        assert_eq!(stats.assess_health(), DeviceHealthStatus::Degraded);
    }
}
