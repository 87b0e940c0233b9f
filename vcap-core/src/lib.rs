// 开启一些 Clippy 检查，保证代码质量
#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

// 模块定义
pub mod builder;
pub mod error;
pub mod frame;
pub mod pixel_format;
pub mod telemetry;
pub mod traits;

// 方便用户使用的 Prelude
pub mod prelude {
    pub use crate::builder::{CaptureConfig, MultiCaptureConfig, TransferStrategy};
    pub use crate::error::{CaptureError, Result};
    pub use crate::frame::Frame;
    pub use crate::pixel_format::{FourCC, PixelFormat};
    pub use crate::telemetry::CaptureStats;
    pub use crate::traits::{CaptureDevice, Driver, FrameSink};
}

// 版本与构建信息常量
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
