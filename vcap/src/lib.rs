pub mod backend;
pub mod coordinator;
pub mod core;
pub mod imgcodecs;
pub mod imgproc;
pub mod pipeline;
pub mod pool;
pub mod session;
pub(crate) mod strategy; // 内部模块，不对外暴露
pub mod worker;

pub use vcap_core;

// Re-export 核心类型，方便 prelude 使用
pub use crate::coordinator::{DeviceReport, MultiCapture};
pub use crate::core::mat::Mat;
pub use crate::session::{DeviceHandle, SessionState};
pub use crate::worker::{Worker, WorkerExit};

/// 预置模块，用户可以通过 `use vcap::prelude::*;` 导入常用项
pub mod prelude {
    pub use crate::backend::default_driver;
    pub use crate::coordinator::{DeviceReport, MultiCapture};
    pub use crate::core::mat::Mat;
    pub use crate::pipeline::{ConvertSink, NullSink};
    pub use crate::pool::{BufferPool, SlotState};
    pub use crate::session::{DeviceHandle, SessionState};
    pub use crate::worker::Worker;
    pub use vcap_core::prelude::*;
}
