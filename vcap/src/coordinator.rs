//! 多设备协调器
//!
//! 只在启动与停止阶段按顺序访问各个句柄，Worker 运行期间不碰它们，
//! 设备之间没有共享的可变状态。

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use vcap_core::builder::{CaptureConfig, MultiCaptureConfig};
use vcap_core::error::CaptureError;
use vcap_core::telemetry::CaptureStats;
use vcap_core::traits::{Driver, FrameSink};

use crate::session::{DeviceHandle, SessionState};
use crate::worker::Worker;

/// 单个设备在一轮 stop/deinitialize 之后的结果
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub index: usize,
    pub path: PathBuf,
    pub ok: bool,
    pub error: Option<String>,
    pub stats: CaptureStats,
}

impl fmt::Display for DeviceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Camera #{} ({}): {} frames",
            self.index,
            self.path.display(),
            self.stats.frames
        )?;
        match &self.error {
            Some(e) => write!(f, ", FAILED: {}", e),
            None if self.ok => write!(f, ", OK"),
            None => write!(f, ", FAILED"),
        }
    }
}

enum Slot {
    Idle(DeviceHandle),
    Running(Worker),
    /// Worker 线程 panic，句柄已经没了
    Lost,
}

struct Entry {
    config: CaptureConfig,
    slot: Slot,
    /// 最近一次失败 (初始化或采集循环)
    error: Option<String>,
    stats: CaptureStats,
}

impl Entry {
    fn report(&self, index: usize, ok: bool) -> DeviceReport {
        DeviceReport {
            index,
            path: self.config.device.clone(),
            ok,
            error: self.error.clone(),
            stats: self.stats,
        }
    }
}

pub struct MultiCapture {
    driver: Arc<dyn Driver>,
    entries: Vec<Entry>,
}

impl fmt::Debug for MultiCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiCapture")
            .field("driver", &self.driver.name())
            .field("devices", &self.entries.len())
            .field("running", &self.running())
            .finish()
    }
}

impl MultiCapture {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 正在运行的 Worker 数量
    pub fn running(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(&e.slot, Slot::Running(w) if w.is_running()))
            .count()
    }

    /// 第 i 个设备的句柄；运行中的设备归 Worker 线程所有，返回 None
    pub fn device(&self, index: usize) -> Option<&DeviceHandle> {
        match &self.entries.get(index)?.slot {
            Slot::Idle(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn device_mut(&mut self, index: usize) -> Option<&mut DeviceHandle> {
        match &mut self.entries.get_mut(index)?.slot {
            Slot::Idle(handle) => Some(handle),
            _ => None,
        }
    }

    /// 运行中的设备返回 Worker 的实时统计
    pub fn stats(&self, index: usize) -> Option<CaptureStats> {
        let entry = self.entries.get(index)?;
        Some(match &entry.slot {
            Slot::Idle(handle) => handle.stats(),
            Slot::Running(worker) => worker.stats(),
            Slot::Lost => entry.stats,
        })
    }

    /// 依次初始化所有设备；某个设备失败不影响其他设备
    ///
    /// 已有的设备会先被关闭。
    pub fn initialize_all(&mut self, config: &MultiCaptureConfig) -> Vec<bool> {
        if !self.entries.is_empty() {
            self.shutdown();
            self.entries.clear();
        }

        config
            .devices
            .iter()
            .enumerate()
            .map(|(index, device)| {
                let mut handle = DeviceHandle::new(index, self.driver.clone());
                let error = match handle.initialize(device) {
                    Ok(()) => None,
                    Err(e) => {
                        tracing::error!(
                            "Camera #{} ({}) init failed: {}",
                            index,
                            device.device.display(),
                            e
                        );
                        Some(e.to_string())
                    }
                };
                let ok = error.is_none();
                self.entries.push(Entry {
                    config: device.clone(),
                    slot: Slot::Idle(handle),
                    error,
                    stats: CaptureStats::default(),
                });
                ok
            })
            .collect()
    }

    /// 为每个已初始化的设备启动 Worker
    ///
    /// `sink_factory(index, config)` 为每个设备创建一个管线。
    pub fn start_all<S, F>(&mut self, mut sink_factory: F) -> Vec<bool>
    where
        S: FrameSink + 'static,
        F: FnMut(usize, &CaptureConfig) -> S,
    {
        let mut started = Vec::with_capacity(self.entries.len());
        for (index, entry) in self.entries.iter_mut().enumerate() {
            let slot = std::mem::replace(&mut entry.slot, Slot::Lost);
            let (slot, ok) = match slot {
                Slot::Idle(mut handle) => match prepare(&mut handle) {
                    Ok(()) => {
                        let sink = sink_factory(index, &entry.config);
                        match Worker::spawn(handle, sink) {
                            Ok(worker) => {
                                entry.error = None;
                                (Slot::Running(worker), true)
                            }
                            Err(e) => {
                                tracing::error!("Camera #{} worker spawn failed: {}", index, e);
                                entry.error = Some(e.to_string());
                                (Slot::Lost, false)
                            }
                        }
                    }
                    Err(e) => {
                        // 保留初始化时的错误信息
                        if entry.error.is_none() {
                            entry.error = Some(e.to_string());
                        }
                        (Slot::Idle(handle), false)
                    }
                },
                running @ Slot::Running(_) => (running, true),
                Slot::Lost => (Slot::Lost, false),
            };
            entry.slot = slot;
            started.push(ok);
        }
        started
    }

    /// 停止所有 Worker 并取回句柄
    pub fn stop_all(&mut self) -> Vec<DeviceReport> {
        let mut reports = Vec::with_capacity(self.entries.len());
        for (index, entry) in self.entries.iter_mut().enumerate() {
            let slot = std::mem::replace(&mut entry.slot, Slot::Lost);
            let ok = match slot {
                Slot::Running(worker) => {
                    let exit = worker.stop();
                    entry.stats = exit.stats;
                    if let Some(handle) = exit.handle {
                        entry.slot = Slot::Idle(handle);
                    }
                    match exit.result {
                        Ok(()) => true,
                        Err(e) => {
                            entry.error = Some(e.to_string());
                            false
                        }
                    }
                }
                Slot::Idle(handle) => {
                    entry.stats = handle.stats();
                    let ok = handle.is_initialized();
                    entry.slot = Slot::Idle(handle);
                    ok
                }
                Slot::Lost => false,
            };

            let report = entry.report(index, ok);
            log_report(&report);
            reports.push(report);
        }
        reports
    }

    /// 拆除所有设备；运行中的 Worker 会先被停止
    pub fn deinitialize_all(&mut self) -> Vec<bool> {
        if self.entries.iter().any(|e| matches!(e.slot, Slot::Running(_))) {
            self.stop_all();
        }

        self.entries
            .iter_mut()
            .enumerate()
            .map(|(index, entry)| match &mut entry.slot {
                Slot::Idle(handle) => match handle.deinitialize() {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!("Camera #{} deinit failed: {}", index, e);
                        if !matches!(e, CaptureError::NotInitialized) {
                            entry.error = Some(e.to_string());
                        }
                        false
                    }
                },
                _ => false,
            })
            .collect()
    }

    /// stop_all + deinitialize_all，返回合并后的结果
    pub fn shutdown(&mut self) -> Vec<DeviceReport> {
        let mut reports = self.stop_all();
        let deinit = self.deinitialize_all();
        for (report, ok) in reports.iter_mut().zip(deinit) {
            report.ok &= ok;
            report.error = self.entries[report.index].error.clone();
        }
        reports
    }
}

/// 让句柄处于 Streaming：Negotiated 时重新 start
fn prepare(handle: &mut DeviceHandle) -> vcap_core::error::Result<()> {
    match handle.state() {
        SessionState::Streaming => Ok(()),
        SessionState::Negotiated => handle.start(),
        SessionState::FrameHeld => Err(CaptureError::FrameAlreadyHeld),
        SessionState::Uninitialized => Err(CaptureError::NotInitialized),
    }
}

fn log_report(report: &DeviceReport) {
    if report.ok {
        tracing::info!("{}", report);
    } else {
        tracing::warn!("{}", report);
    }
}
