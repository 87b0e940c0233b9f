pub mod color;

pub use color::{cvt_color, ColorConversion};
