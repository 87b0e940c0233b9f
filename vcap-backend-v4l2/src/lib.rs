#![cfg(target_os = "linux")]

pub mod device;
mod stream;

use std::io;
use std::path::Path;
use std::sync::Arc;

use vcap_core::traits::{CaptureDevice, Driver};

pub use device::V4l2Device;

/// V4L2 驱动单例结构体
#[derive(Debug, Clone)]
pub struct V4l2Driver;

impl Default for V4l2Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl V4l2Driver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for V4l2Driver {
    fn name(&self) -> &str {
        "V4L2"
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn CaptureDevice>> {
        let dev = device::open(path)?;
        Ok(Box::new(dev))
    }
}

// 为了方便直接使用，提供一个默认实例
pub fn default_driver() -> Arc<dyn Driver> {
    Arc::new(V4l2Driver::new())
}
