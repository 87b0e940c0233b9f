pub mod mat;
pub mod tick_meter;

pub use mat::Mat;
pub use tick_meter::TickMeter;
