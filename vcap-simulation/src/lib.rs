//! 模拟采集后端
//!
//! 在进程内模拟 V4L2 的缓冲区协议 (REQBUFS/QBUF/DQBUF/mmap/read)，
//! 用于在没有摄像头的机器上测试会话状态机。时间是虚拟的：
//! `wait_ready` 超时只推进内部时钟，不会真的睡眠。

mod device;
mod state;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vcap_core::traits::{CaptureDevice, Driver};

pub use device::{frame_tag, SimDevice};
pub use state::SimSpec;

use device::lock;
use state::SimState;

/// 模拟驱动：按路径注册虚拟设备节点
#[derive(Debug, Default)]
pub struct SimDriver {
    nodes: Mutex<HashMap<PathBuf, Arc<Mutex<SimState>>>>,
}

impl SimDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个设备节点并返回它的控制句柄
    pub fn add_device(&self, path: impl Into<PathBuf>, spec: SimSpec) -> SimControl {
        let state = Arc::new(Mutex::new(SimState::new(spec)));
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes.insert(path.into(), state.clone());
        SimControl { state }
    }

    pub fn control(&self, path: impl AsRef<Path>) -> Option<SimControl> {
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes
            .get(path.as_ref())
            .map(|state| SimControl { state: state.clone() })
    }
}

impl Driver for SimDriver {
    fn name(&self) -> &str {
        "Simulation"
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn CaptureDevice>> {
        let state = {
            let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
            nodes.get(path).cloned()
        };
        let state = state.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("Cannot identify '{}'", path.display()),
            )
        })?;

        {
            let mut st = lock(&state);
            if st.fail_open {
                return Err(io::Error::from_raw_os_error(libc::EACCES));
            }
            st.open = true;
            st.opens += 1;
        }

        tracing::debug!(target: "vcap::sim", path = %path.display(), "simulated device opened");
        Ok(Box::new(SimDevice::new(path.to_path_buf(), state)))
    }
}

/// 观察并篡改一个模拟设备的状态
#[derive(Debug, Clone)]
pub struct SimControl {
    state: Arc<Mutex<SimState>>,
}

impl SimControl {
    /// 设备停止出帧，之后每次等待都会超时
    pub fn set_stalled(&self, stalled: bool) {
        lock(&self.state).stalled = stalled;
    }

    pub fn fail_open(&self, fail: bool) {
        lock(&self.state).fail_open = fail;
    }

    /// 映射第 `index` 个缓冲区时返回 ENOMEM
    pub fn fail_map_at(&self, index: Option<u32>) {
        lock(&self.state).fail_map_at = index;
    }

    pub fn fail_stream_on(&self, fail: bool) {
        lock(&self.state).fail_stream_on = fail;
    }

    pub fn fail_close(&self, fail: bool) {
        lock(&self.state).fail_close = fail;
    }

    /// 之后的 QBUF 全部返回 EINVAL
    pub fn reject_queue(&self, reject: bool) {
        lock(&self.state).reject_queue = reject;
    }

    /// 接下来的 DQBUF / read 依次返回这些 errno
    pub fn inject_io_errors(&self, codes: impl IntoIterator<Item = i32>) {
        lock(&self.state).io_faults.extend(codes);
    }

    /// 之后每次 DQBUF / read 都返回这个 errno，模拟被拔掉的设备
    pub fn fail_dequeue(&self, code: Option<i32>) {
        lock(&self.state).dequeue_fault = code;
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    pub fn opens(&self) -> u32 {
        lock(&self.state).opens
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.state).streaming
    }

    /// 驱动当前记录的缓冲区数量
    pub fn driver_buffers(&self) -> usize {
        lock(&self.state).slots.len()
    }

    pub fn queued(&self) -> usize {
        lock(&self.state)
            .slots
            .iter()
            .filter(|s| s.queued)
            .count()
    }

    /// 仍然存在的 mmap 映射 (包括 REQBUFS(0) 之后尚未 munmap 的)
    pub fn live_mappings(&self) -> usize {
        lock(&self.state).live_mappings()
    }

    pub fn pending_faults(&self) -> usize {
        lock(&self.state).io_faults.len()
    }

    /// 虚拟时钟
    pub fn elapsed(&self) -> Duration {
        lock(&self.state).clock
    }

    pub fn delivered(&self) -> u64 {
        lock(&self.state).delivered
    }

    pub fn crop_resets(&self) -> u32 {
        lock(&self.state).crop_resets
    }

    /// REQBUFS(0) 被调用的次数
    pub fn buffer_releases(&self) -> u32 {
        lock(&self.state).buffer_releases
    }
}
