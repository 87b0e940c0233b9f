#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use vcap::session::DeviceHandle;
use vcap::vcap_core::builder::{CaptureConfig, TransferStrategy};
use vcap_simulation::{SimDriver, SimControl, SimSpec};

pub const NODE: &str = "/dev/video0";

/// 一个驱动 + 一个已注册的节点
pub fn one_device(spec: SimSpec) -> (Arc<SimDriver>, SimControl) {
    let driver = Arc::new(SimDriver::new());
    let sim = driver.add_device(NODE, spec);
    (driver, sim)
}

pub fn handle(driver: &Arc<SimDriver>) -> DeviceHandle {
    DeviceHandle::new(0, driver.clone())
}

pub fn config(strategy: TransferStrategy) -> CaptureConfig {
    CaptureConfig::new(NODE).strategy(strategy)
}

/// 已初始化的句柄
pub fn streaming(strategy: TransferStrategy, spec: SimSpec) -> (DeviceHandle, SimControl) {
    let (driver, sim) = one_device(spec);
    let mut h = handle(&driver);
    h.initialize(&config(strategy)).expect("initialize");
    (h, sim)
}

/// 每个测试独立的临时目录
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("vcap-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
