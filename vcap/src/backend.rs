//! 按平台选择默认驱动

use std::sync::Arc;

use vcap_core::error::Result;
use vcap_core::traits::Driver;

#[cfg(all(target_os = "linux", feature = "linux-v4l2"))]
pub fn default_driver() -> Result<Arc<dyn Driver>> {
    tracing::debug!("Using V4L2 backend");
    Ok(vcap_backend_v4l2::default_driver())
}

#[cfg(not(all(target_os = "linux", feature = "linux-v4l2")))]
pub fn default_driver() -> Result<Arc<dyn Driver>> {
    Err(vcap_core::error::CaptureError::UnsupportedCapability(
        "no capture backend for this platform (enable `linux-v4l2` on Linux)".into(),
    ))
}
