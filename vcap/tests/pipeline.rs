mod common;

use std::sync::Arc;

use anyhow::Result;
use common::*;
use vcap::coordinator::MultiCapture;
use vcap::imgcodecs::imread;
use vcap::pipeline::ConvertSink;
use vcap::vcap_core::builder::{CaptureConfig, MultiCaptureConfig, TransferStrategy};
use vcap::vcap_core::traits::FrameSink;
use vcap_simulation::{SimDriver, SimSpec};

#[test]
fn frames_are_saved_per_camera() -> Result<()> {
    let dir = scratch_dir("save");
    let (driver, _sim) = one_device(SimSpec::default().fill(0x80));
    let mut h = handle(&driver);
    let cfg = CaptureConfig::new(NODE)
        .resolution(8, 4)
        .strategy(TransferStrategy::Mmap)
        .save_to(&dir);
    h.initialize(&cfg)?;

    let mut sink = ConvertSink::for_config(0, &cfg);
    for _ in 0..3 {
        let frame = h.acquire()?;
        sink.consume(&frame)?;
        h.release()?;
    }
    assert_eq!(sink.count(), 3);

    for n in 0..3 {
        let img = imread(dir.join("0").join(format!("{}.png", n)))?;
        assert_eq!((img.rows, img.cols, img.channels), (4, 8, 3));
        // 除帧号外都是 Y=U=V=0x80 的灰色
        assert_eq!(img.at(3, 7), sink.last_image().at(3, 7));
    }

    h.deinitialize()?;
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn workers_write_into_their_own_directories() -> Result<()> {
    let dir = scratch_dir("workers");
    let driver = Arc::new(SimDriver::new());
    let template = CaptureConfig::new("")
        .resolution(16, 8)
        .strategy(TransferStrategy::UserPtr)
        .save_to(&dir);
    let paths = ["/dev/video0", "/dev/video1"];
    for p in paths {
        driver.add_device(p, SimSpec::default());
    }

    let mut mc = MultiCapture::new(driver.clone());
    mc.initialize_all(&MultiCaptureConfig::uniform(paths, &template));
    mc.start_all(ConvertSink::for_config);

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    while (0..2).any(|i| mc.stats(i).map_or(0, |s| s.frames) < 5) {
        assert!(std::time::Instant::now() < deadline);
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    let reports = mc.shutdown();
    assert!(reports.iter().all(|r| r.ok));
    for camera in 0..2 {
        let first = imread(dir.join(camera.to_string()).join("0.png"))?;
        assert_eq!((first.rows, first.cols), (8, 16));
    }

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
