//! 设备句柄与采集会话状态机
//!
//! ```text
//! Uninitialized --initialize--> Streaming <--start/stop--> Negotiated
//!                                 |   ^
//!                          acquire|   |release
//!                                 v   |
//!                               FrameHeld
//! Streaming | Negotiated | FrameHeld --deinitialize--> Uninitialized
//! ```

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use vcap_core::builder::{CaptureConfig, TransferStrategy};
use vcap_core::error::{CaptureError, Result, TeardownFailure, TeardownStep};
use vcap_core::frame::Frame;
use vcap_core::telemetry::CaptureStats;
use vcap_core::traits::{Capabilities, CaptureDevice, DeviceInfo, Driver, Format, Readiness};

use crate::pool::BufferPool;
use crate::strategy::{transfer_for, Transfer};

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    /// 格式与缓冲池已就绪，未在采集
    Negotiated,
    Streaming,
    /// Streaming 的子状态：唯一的一帧在消费者手里
    FrameHeld,
}

struct Active {
    device: Box<dyn CaptureDevice>,
    transfer: Box<dyn Transfer>,
    pool: BufferPool,
    format: Format,
    info: DeviceInfo,
    config: CaptureConfig,
    streaming: bool,
}

/// 一个采集设备的句柄
///
/// 只能被一个线程驱动；acquire/release 严格交替。
pub struct DeviceHandle {
    index: usize,
    driver: Arc<dyn Driver>,
    active: Option<Active>,
    /// 本次 acquire 已经用掉的重试次数 (超时与出队错误)，每次 acquire 开始时清零
    timeout_retries: u32,
    stats: CaptureStats,
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("index", &self.index)
            .field("driver", &self.driver.name())
            .field("state", &self.state())
            .field("path", &self.device_path())
            .field("format", &self.format())
            .finish()
    }
}

impl DeviceHandle {
    pub fn new(index: usize, driver: Arc<dyn Driver>) -> Self {
        Self {
            index,
            driver,
            active: None,
            timeout_retries: 0,
            stats: CaptureStats::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> SessionState {
        match &self.active {
            None => SessionState::Uninitialized,
            Some(a) if !a.streaming => SessionState::Negotiated,
            Some(a) if a.pool.held().is_some() => SessionState::FrameHeld,
            Some(_) => SessionState::Streaming,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    /// 协商后的格式 (已做过跨距修正)
    pub fn format(&self) -> Option<Format> {
        self.active.as_ref().map(|a| a.format)
    }

    pub fn pool(&self) -> Option<&BufferPool> {
        self.active.as_ref().map(|a| &a.pool)
    }

    pub fn device_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.config.device.as_path())
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.active.as_ref().map(|a| &a.info)
    }

    pub fn config(&self) -> Option<&CaptureConfig> {
        self.active.as_ref().map(|a| &a.config)
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// 打开设备、协商格式、分配缓冲池并开始采集
    ///
    /// 任何一步失败都会撤销本次调用中已经完成的部分。
    pub fn initialize(&mut self, config: &CaptureConfig) -> Result<()> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyInitialized);
        }
        config.validate()?;

        let path = config.device.as_path();
        let mut device = self.driver.open(path).map_err(|source| CaptureError::Open {
            path: path.display().to_string(),
            source,
        })?;

        let setup = setup(device.as_mut(), config);
        let (info, format, transfer, pool) = match setup {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(close_err) = device.close() {
                    tracing::warn!("close after failed setup: {}", close_err);
                }
                return Err(e);
            }
        };

        tracing::info!(
            "Camera #{} opened: {} ({}) {} stride {} via {}, {} buffers",
            self.index,
            path.display(),
            info.card,
            format,
            format.bytes_per_line,
            config.strategy,
            pool.len()
        );

        self.active = Some(Active {
            device,
            transfer,
            pool,
            format,
            info,
            config: config.clone(),
            streaming: true,
        });
        self.timeout_retries = 0;
        self.stats = CaptureStats::default();
        Ok(())
    }

    /// 等待并取出下一帧
    ///
    /// 阻塞时长不超过 `timeout * max_timeout_retries`。返回的帧借用了句柄，
    /// 在它被 drop 之前无法调用 `release`。
    pub fn acquire(&mut self) -> Result<Frame<'_>> {
        let active = self.active.as_mut().ok_or(CaptureError::NotInitialized)?;
        if !active.streaming {
            return Err(CaptureError::NotInitialized);
        }
        if active.pool.held().is_some() {
            return Err(CaptureError::FrameAlreadyHeld);
        }

        let timeout = active.config.timeout;
        let max_retries = active.config.max_timeout_retries;
        self.timeout_retries = 0;

        let done = loop {
            match active.device.wait_ready(timeout) {
                Ok(Readiness::Ready) => {}
                Ok(Readiness::TimedOut) => {
                    self.timeout_retries += 1;
                    self.stats.timeouts += 1;
                    tracing::warn!(
                        "Camera #{}: select timeout ({}/{})",
                        self.index,
                        self.timeout_retries,
                        max_retries
                    );
                    if self.timeout_retries >= max_retries {
                        return Err(CaptureError::CaptureTimeout {
                            retries: max_retries,
                            timeout,
                        });
                    }
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CaptureError::Io(e)),
            }

            match active
                .transfer
                .fetch(active.device.as_mut(), &mut active.pool)
            {
                Ok(done) => break done,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    // EIO 之类的错误重新等待，但与超时共用重试次数
                    self.timeout_retries += 1;
                    self.stats.dequeue_errors += 1;
                    tracing::warn!(
                        "Camera #{}: dequeue failed ({}/{}): {}",
                        self.index,
                        self.timeout_retries,
                        max_retries,
                        e
                    );
                    if self.timeout_retries >= max_retries {
                        return Err(CaptureError::Io(e));
                    }
                    continue;
                }
            }
        };

        active
            .pool
            .mark_held(done.index, done.bytes_used as usize)?;
        let (index, data) = active
            .pool
            .held_slice()
            .ok_or(CaptureError::NoFrameHeld)?;

        let format = active.format;
        Ok(Frame {
            data,
            index,
            width: format.width,
            height: format.height,
            stride: format.bytes_per_line as usize,
            format: format.pixel_format(),
            sequence: u64::from(done.sequence),
            timestamp: done.timestamp,
        })
    }

    /// 把持有的帧还给设备
    ///
    /// 入队失败时帧仍视为被持有。
    pub fn release(&mut self) -> Result<()> {
        let active = self.active.as_mut().ok_or(CaptureError::NotInitialized)?;
        let index = active.pool.held().ok_or(CaptureError::NoFrameHeld)?;

        if let Err(source) =
            active
                .transfer
                .requeue(active.device.as_mut(), &active.pool, index)
        {
            tracing::warn!("Camera #{}: VIDIOC_QBUF failed: {}", self.index, source);
            return Err(CaptureError::Requeue { index, source });
        }

        active.pool.mark_queued(index)?;
        self.stats.frames += 1;
        Ok(())
    }

    /// Streaming -> Negotiated
    ///
    /// 持有帧时拒绝；已经停止时什么也不做。
    pub fn stop(&mut self) -> Result<()> {
        let active = self.active.as_mut().ok_or(CaptureError::NotInitialized)?;
        if active.pool.held().is_some() {
            return Err(CaptureError::FrameAlreadyHeld);
        }
        if !active.streaming {
            return Ok(());
        }

        active
            .transfer
            .stop(active.device.as_mut(), &mut active.pool)?;
        active.streaming = false;
        tracing::info!("Camera #{} stream stopped", self.index);
        Ok(())
    }

    /// Negotiated -> Streaming
    pub fn start(&mut self) -> Result<()> {
        let active = self.active.as_mut().ok_or(CaptureError::NotInitialized)?;
        if active.streaming {
            return Ok(());
        }

        if let Err(e) = active
            .transfer
            .start(active.device.as_mut(), &mut active.pool)
        {
            // 已入队的缓冲区收回来，保持 Negotiated
            if let Err(stop_err) = active
                .transfer
                .stop(active.device.as_mut(), &mut active.pool)
            {
                tracing::warn!(
                    "Camera #{}: {} failed during rollback: {}",
                    self.index,
                    TeardownStep::StreamOff,
                    stop_err
                );
            }
            return Err(e);
        }
        active.streaming = true;
        tracing::info!("Camera #{} stream started", self.index);
        Ok(())
    }

    /// 停止采集、释放缓冲池、关闭设备
    ///
    /// 先把句柄标记为未初始化，再逐步拆除；某一步失败不会中断后续步骤，
    /// 所有失败汇总到一个 `Teardown` 错误里。持有的帧会被直接丢弃。
    pub fn deinitialize(&mut self) -> Result<()> {
        let Active {
            mut device,
            mut transfer,
            mut pool,
            streaming,
            config,
            ..
        } = self.active.take().ok_or(CaptureError::NotInitialized)?;
        self.timeout_retries = 0;

        if let Some(index) = pool.held() {
            tracing::warn!(
                "Camera #{}: deinitializing while buffer {} is still held",
                self.index,
                index
            );
        }

        let mut failures = Vec::new();
        if streaming {
            if let Err(e) = transfer.stop(device.as_mut(), &mut pool) {
                failures.push(TeardownFailure::new(TeardownStep::StreamOff, e));
            }
        }
        if let Err(e) = transfer.release_device_buffers(device.as_mut()) {
            failures.push(TeardownFailure::new(TeardownStep::ReleaseBuffers, e));
        }
        failures.extend(transfer.free(device.as_mut(), pool));
        if let Err(e) = device.close() {
            failures.push(TeardownFailure::new(TeardownStep::Close, e));
        }

        if failures.is_empty() {
            tracing::info!(
                "Camera #{} closed: {}",
                self.index,
                config.device.display()
            );
            Ok(())
        } else {
            Err(CaptureError::Teardown(failures))
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if self.active.is_some() {
            if let Err(e) = self.deinitialize() {
                tracing::error!("Camera #{} teardown on drop failed: {}", self.index, e);
            }
        }
    }
}

/// initialize 中打开设备之后的部分；失败时只剩下关闭设备由调用方负责
fn setup(
    device: &mut dyn CaptureDevice,
    config: &CaptureConfig,
) -> Result<(DeviceInfo, Format, Box<dyn Transfer>, BufferPool)> {
    let path = config.device.display();

    let info = device.query_caps().map_err(|source| CaptureError::Open {
        path: path.to_string(),
        source,
    })?;
    check_caps(&info, config)?;

    // 裁剪失败不影响后续协商
    if let Err(e) = device.reset_crop() {
        tracing::debug!("{}: crop reset ignored: {}", path, e);
    }

    let requested = Format::new(config.width, config.height, config.format);
    let reported = device.set_format(&requested).map_err(|e| {
        CaptureError::UnsupportedCapability(format!(
            "{}: VIDIOC_S_FMT {} rejected: {}",
            path, requested, e
        ))
    })?;
    if !requested.same_geometry(&reported) {
        return Err(CaptureError::FormatMismatch {
            requested,
            actual: reported,
        });
    }

    // Buggy driver paranoia.
    let format = reported.sanitized();
    if format != reported {
        tracing::warn!(
            "{}: driver reported stride {} / size {}, using {} / {}",
            path,
            reported.bytes_per_line,
            reported.size_image,
            format.bytes_per_line,
            format.size_image
        );
    }

    let mut transfer = transfer_for(config.strategy);
    let mut pool = match transfer.allocate(device, &format, config.buffer_count) {
        Ok(pool) => pool,
        Err(e) => {
            if let Err(release_err) = transfer.release_device_buffers(device) {
                tracing::warn!(
                    "{}: {} failed during rollback: {}",
                    path,
                    TeardownStep::ReleaseBuffers,
                    release_err
                );
            }
            return Err(e);
        }
    };

    if let Err(e) = transfer.start(device, &mut pool) {
        if let Err(stop_err) = transfer.stop(device, &mut pool) {
            tracing::warn!(
                "{}: {} failed during rollback: {}",
                path,
                TeardownStep::StreamOff,
                stop_err
            );
        }
        if let Err(release_err) = transfer.release_device_buffers(device) {
            tracing::warn!(
                "{}: {} failed during rollback: {}",
                path,
                TeardownStep::ReleaseBuffers,
                release_err
            );
        }
        for failure in transfer.free(device, pool) {
            tracing::warn!(
                "{}: {} failed during rollback: {}",
                path,
                failure.step,
                failure.source
            );
        }
        return Err(e);
    }

    Ok((info, format, transfer, pool))
}

fn check_caps(info: &DeviceInfo, config: &CaptureConfig) -> Result<()> {
    let path = config.device.display();
    if !info.capabilities.contains(Capabilities::VIDEO_CAPTURE) {
        return Err(CaptureError::UnsupportedCapability(format!(
            "{} is no video capture device",
            path
        )));
    }

    let (needed, what) = match config.strategy {
        TransferStrategy::Read => (Capabilities::READ_WRITE, "read i/o"),
        TransferStrategy::Mmap | TransferStrategy::UserPtr => {
            (Capabilities::STREAMING, "streaming i/o")
        }
    };
    if !info.capabilities.contains(needed) {
        return Err(CaptureError::UnsupportedCapability(format!(
            "{} does not support {}",
            path, what
        )));
    }
    Ok(())
}
