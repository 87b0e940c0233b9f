//! 每个设备一个采集线程
//!
//! 取消是协作式的：停止信号只在每轮循环开始时检查，
//! 因此 `stop` 最长要等一次 acquire 的超时周期。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use vcap_core::error::{CaptureError, Result};
use vcap_core::telemetry::CaptureStats;
use vcap_core::traits::FrameSink;

use crate::core::tick_meter::TickMeter;
use crate::session::DeviceHandle;

/// 线程间共享的统计
#[derive(Debug, Default)]
struct WorkerStats {
    frames: AtomicU64,
    last_fps: AtomicU64,
    timeouts: AtomicU64,
    dequeue_errors: AtomicU64,
}

impl WorkerStats {
    fn record(&self, stats: &CaptureStats) {
        self.frames.store(stats.frames, Ordering::Relaxed);
        self.timeouts.store(stats.timeouts, Ordering::Relaxed);
        self.dequeue_errors
            .store(stats.dequeue_errors, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            frames: self.frames.load(Ordering::Relaxed),
            last_fps: self.last_fps.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            dequeue_errors: self.dequeue_errors.load(Ordering::Relaxed),
        }
    }
}

/// Worker 结束后交回的东西
#[derive(Debug)]
pub struct WorkerExit {
    pub index: usize,
    /// 线程 panic 时句柄已随之销毁
    pub handle: Option<DeviceHandle>,
    /// 循环结束的原因：被停止为 Ok，否则是终止循环的那个错误
    pub result: Result<()>,
    pub stats: CaptureStats,
}

type Outcome = (DeviceHandle, Result<()>);

/// 线程退出 (包括 panic) 时清除 running
struct RunningFlag(Arc<AtomicBool>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct Worker {
    index: usize,
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<Outcome>>,
    running: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// 在新线程上运行采集循环
    ///
    /// 句柄必须处于 Streaming 状态；线程结束后通过 `stop` 取回。
    pub fn spawn<S>(handle: DeviceHandle, sink: S) -> Result<Self>
    where
        S: FrameSink + 'static,
    {
        let index = handle.index();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(WorkerStats::default());

        let thread = {
            let running = running.clone();
            let stats = stats.clone();
            thread::Builder::new()
                .name(format!("vcap-cam-{}", index))
                .spawn(move || {
                    let _running = RunningFlag(running);
                    let mut handle = handle;
                    let mut sink = sink;
                    let result = run(&mut handle, &mut sink, &stop_rx, &stats);
                    stats.record(&handle.stats());
                    if let Err(e) = &result {
                        tracing::error!("Camera #{} capture loop terminated: {}", index, e);
                    }
                    (handle, result)
                })?
        };

        tracing::info!("Camera #{} worker started", index);
        Ok(Self {
            index,
            stop_tx,
            thread: Some(thread),
            running,
            stats,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// 循环是否还在跑 (出错退出后为 false，即使还没有 stop)
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats.snapshot()
    }

    /// 发送停止信号并等待线程退出
    pub fn stop(mut self) -> WorkerExit {
        self.halt()
    }

    fn halt(&mut self) -> WorkerExit {
        // 容量为 1，重复发送或线程已退出都无所谓
        let _ = self.stop_tx.try_send(());

        let joined = self.thread.take().map(JoinHandle::join);
        let stats = self.stats.snapshot();

        match joined {
            Some(Ok((handle, result))) => {
                tracing::info!("Camera #{} worker stopped", self.index);
                WorkerExit {
                    index: self.index,
                    handle: Some(handle),
                    result,
                    stats,
                }
            }
            // 句柄已在 unwind 时 drop
            _ => WorkerExit {
                index: self.index,
                handle: None,
                result: Err(CaptureError::WorkerPanicked(self.index)),
                stats,
            },
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            // 句柄随 WorkerExit 一起 drop，会自动拆除
            let _ = self.halt();
        }
    }
}

fn run(
    handle: &mut DeviceHandle,
    sink: &mut dyn FrameSink,
    stop_rx: &Receiver<()>,
    stats: &WorkerStats,
) -> Result<()> {
    let index = handle.index();
    let mut meter = TickMeter::default();

    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return Ok(()),
            Err(TryRecvError::Empty) => {}
        }

        let consumed = {
            let frame = match handle.acquire() {
                Ok(frame) => frame,
                Err(e) => {
                    stats.record(&handle.stats());
                    return Err(e);
                }
            };
            sink.consume(&frame)
        };
        // 管线失败也先把帧还回去，句柄保持 Streaming
        handle.release()?;
        consumed?;

        stats.record(&handle.stats());
        if let Some(fps) = meter.tick() {
            stats.last_fps.store(fps, Ordering::Relaxed);
            tracing::info!("Camera #{} FPS: {}", index, fps);
        }
    }
}
