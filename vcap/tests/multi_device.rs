mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::*;
use vcap::coordinator::MultiCapture;
use vcap::pipeline::NullSink;
use vcap::session::{DeviceHandle, SessionState};
use vcap::worker::Worker;
use vcap::vcap_core::builder::{CaptureConfig, MultiCaptureConfig, TransferStrategy};
use vcap::vcap_core::error::CaptureError;
use vcap::vcap_core::frame::Frame;
use vcap_simulation::{frame_tag, SimDriver, SimSpec};

/// 轮询直到条件成立，最多 10 秒
fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

fn small(path: &str, strategy: TransferStrategy) -> CaptureConfig {
    CaptureConfig::new(path)
        .resolution(64, 48)
        .strategy(strategy)
}

#[test]
fn independent_devices_on_separate_threads() {
    init_tracing();
    let driver = Arc::new(SimDriver::new());
    let sims: Vec<_> = (0..2)
        .map(|i| driver.add_device(format!("/dev/video{}", i), SimSpec::default()))
        .collect();

    let strategies = [TransferStrategy::Mmap, TransferStrategy::UserPtr];
    let mut handles: Vec<DeviceHandle> = strategies
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            let mut h = DeviceHandle::new(i, driver.clone());
            h.initialize(&small(&format!("/dev/video{}", i), s)).unwrap();
            h
        })
        .collect();

    thread::scope(|scope| {
        for h in handles.iter_mut() {
            scope.spawn(move || {
                let regions: Vec<(usize, usize)> = {
                    let pool = h.pool().unwrap();
                    (0..pool.len() as u32)
                        .map(|i| {
                            let r = pool.region(i).unwrap();
                            (r.as_ptr().as_ptr() as usize, r.len())
                        })
                        .collect()
                };

                for n in 0..1000u64 {
                    let frame = h.acquire().unwrap();
                    let (start, len) = regions[frame.index as usize];
                    let addr = frame.as_ptr() as usize;
                    assert!(addr >= start && addr + frame.len() <= start + len);
                    assert_eq!(frame.sequence, n);
                    assert_eq!(frame_tag(frame.data), Some(n as u32));
                    h.release().unwrap();
                }
            });
        }
    });

    for (h, sim) in handles.iter_mut().zip(&sims) {
        assert_eq!(h.stats().frames, 1000);
        assert_eq!(sim.delivered(), 1000);
        h.deinitialize().unwrap();
        assert!(!sim.is_open());
        assert_eq!(sim.live_mappings(), 0);
    }
}

#[test]
fn worker_stops_on_request_and_returns_the_handle() {
    let (driver, sim) = one_device(SimSpec::default());
    let mut h = handle(&driver);
    h.initialize(&small(NODE, TransferStrategy::Mmap)).unwrap();

    let worker = Worker::spawn(h, NullSink::new()).unwrap();
    wait_for(|| worker.stats().frames >= 100);
    assert!(worker.is_running());

    let exit = worker.stop();
    assert!(exit.result.is_ok());
    assert!(exit.stats.frames >= 100);

    let mut h = exit.handle.unwrap();
    assert_eq!(h.state(), SessionState::Streaming);
    assert_eq!(h.stats().frames, exit.stats.frames);
    h.deinitialize().unwrap();
    assert!(!sim.is_open());
}

#[test]
fn sink_failure_releases_the_frame_and_ends_the_loop() {
    let (driver, _sim) = one_device(SimSpec::default());
    let mut h = handle(&driver);
    h.initialize(&small(NODE, TransferStrategy::UserPtr)).unwrap();

    let consumed = Arc::new(AtomicU64::new(0));
    let sink = {
        let consumed = consumed.clone();
        move |_frame: &Frame<'_>| {
            if consumed.fetch_add(1, Ordering::SeqCst) == 4 {
                return Err(CaptureError::Pipeline("disk full".into()));
            }
            Ok(())
        }
    };

    let worker = Worker::spawn(h, sink).unwrap();
    wait_for(|| !worker.is_running());

    let exit = worker.stop();
    assert!(matches!(exit.result, Err(CaptureError::Pipeline(_))));
    assert_eq!(consumed.load(Ordering::SeqCst), 5);
    assert_eq!(exit.stats.frames, 5);

    let h = exit.handle.unwrap();
    assert_eq!(h.state(), SessionState::Streaming);
}

#[test]
fn worker_ends_when_the_device_stalls() {
    let (driver, sim) = one_device(SimSpec::default());
    let mut h = handle(&driver);
    h.initialize(&small(NODE, TransferStrategy::Mmap)).unwrap();

    let worker = Worker::spawn(h, NullSink::new()).unwrap();
    wait_for(|| worker.stats().frames >= 10);
    sim.set_stalled(true);
    wait_for(|| !worker.is_running());

    let exit = worker.stop();
    assert!(matches!(exit.result, Err(CaptureError::CaptureTimeout { .. })));
    assert_eq!(exit.stats.timeouts, 10);
}

#[test]
fn worker_ends_when_the_device_disappears() {
    let (driver, sim) = one_device(SimSpec::default());
    let mut h = handle(&driver);
    h.initialize(&small(NODE, TransferStrategy::UserPtr)).unwrap();

    let worker = Worker::spawn(h, NullSink::new()).unwrap();
    wait_for(|| worker.stats().frames >= 10);
    sim.fail_dequeue(Some(libc::ENODEV));
    wait_for(|| !worker.is_running());

    let exit = worker.stop();
    assert!(matches!(exit.result, Err(CaptureError::Io(_))));
    assert_eq!(exit.stats.dequeue_errors, 10);

    exit.handle.unwrap().deinitialize().unwrap();
    assert!(!sim.is_open());
}

#[test]
fn coordinator_isolates_failing_devices() {
    init_tracing();
    let driver = Arc::new(SimDriver::new());
    let good: Vec<_> = ["/dev/video0", "/dev/video1"]
        .iter()
        .map(|p| driver.add_device(*p, SimSpec::default()))
        .collect();
    let stalled = driver.add_device("/dev/video3", SimSpec::default());

    let template = CaptureConfig::new("").resolution(32, 16);
    let config = MultiCaptureConfig::uniform(
        ["/dev/video0", "/dev/video1", "/dev/video2", "/dev/video3"],
        &template,
    );

    let mut mc = MultiCapture::new(driver.clone());
    assert_eq!(mc.initialize_all(&config), vec![true, true, false, true]);
    assert_eq!(mc.len(), 4);
    assert!(mc.device(2).unwrap().state() == SessionState::Uninitialized);

    stalled.set_stalled(true);
    assert_eq!(
        mc.start_all(|_, _| NullSink::new()),
        vec![true, true, false, true]
    );
    assert!(mc.device(0).is_none());

    wait_for(|| (0..2).all(|i| mc.stats(i).unwrap().frames >= 50));
    wait_for(|| mc.running() == 2);

    let reports = mc.stop_all();
    let ok: Vec<bool> = reports.iter().map(|r| r.ok).collect();
    assert_eq!(ok, vec![true, true, false, false]);
    assert!(reports[0].stats.frames >= 50);
    assert!(reports[2].error.as_deref().unwrap().contains("Cannot identify"));
    assert!(reports[3].error.as_deref().unwrap().contains("retries"));
    assert!(reports[1].to_string().ends_with("OK"));

    // 停止之后句柄回到协调器手里
    assert_eq!(
        mc.device(1).unwrap().state(),
        SessionState::Streaming
    );

    assert_eq!(mc.deinitialize_all(), vec![true, true, false, true]);
    for sim in good.iter().chain([&stalled]) {
        assert!(!sim.is_open());
        assert_eq!(sim.driver_buffers(), 0);
    }
}

#[test]
fn coordinator_restarts_after_stop() {
    let driver = Arc::new(SimDriver::new());
    let sim = driver.add_device(NODE, SimSpec::default());
    let config = MultiCaptureConfig::new(vec![small(NODE, TransferStrategy::Mmap)]);

    let mut mc = MultiCapture::new(driver.clone());
    assert_eq!(mc.initialize_all(&config), vec![true]);
    assert_eq!(mc.start_all(|_, _| NullSink::new()), vec![true]);
    wait_for(|| mc.stats(0).unwrap().frames >= 10);
    mc.stop_all();

    // Negotiated 的句柄会被重新 start
    mc.device_mut(0).unwrap().stop().unwrap();
    assert!(!sim.is_streaming());
    assert_eq!(mc.start_all(|_, _| NullSink::new()), vec![true]);
    wait_for(|| sim.is_streaming() && mc.running() == 1);

    let reports = mc.shutdown();
    assert!(reports[0].ok, "{}", reports[0]);
    assert!(!sim.is_open());
}
