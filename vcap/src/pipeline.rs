//! 参考图像管线：颜色转换 + 可选的 PNG 落盘

use std::fs;
use std::path::{Path, PathBuf};

use vcap_core::builder::CaptureConfig;
use vcap_core::error::{CaptureError, Result};
use vcap_core::frame::Frame;
use vcap_core::traits::FrameSink;

use crate::core::mat::Mat;
use crate::imgcodecs::imwrite;
use crate::imgproc::{cvt_color, ColorConversion};

/// 把每一帧转换为 BGR，设置了目录时保存为 `<dir>/<camera>/<n>.png`
#[derive(Debug)]
pub struct ConvertSink {
    camera: usize,
    save_dir: Option<PathBuf>,
    bgr: Mat,
    count: u64,
}

impl ConvertSink {
    pub fn new(camera: usize, save_dir: Option<PathBuf>) -> Self {
        Self {
            camera,
            save_dir: save_dir.map(|dir| dir.join(camera.to_string())),
            bgr: Mat::empty(),
            count: 0,
        }
    }

    pub fn for_config(camera: usize, config: &CaptureConfig) -> Self {
        Self::new(camera, config.save_dir.clone())
    }

    /// 最近一次转换的结果
    pub fn last_image(&self) -> &Mat {
        &self.bgr
    }

    /// 已处理的帧数
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.save_dir.as_deref()
    }
}

impl FrameSink for ConvertSink {
    fn consume(&mut self, frame: &Frame<'_>) -> Result<()> {
        let fourcc = frame.format.fourcc();
        let code = ColorConversion::for_fourcc(fourcc).ok_or_else(|| {
            CaptureError::Pipeline(format!("no color conversion for {}", frame.format))
        })?;

        cvt_color(frame, &mut self.bgr, code).map_err(pipeline_error)?;

        if let Some(dir) = &self.save_dir {
            if self.count == 0 {
                fs::create_dir_all(dir).map_err(|e| {
                    CaptureError::Pipeline(format!("cannot create {}: {}", dir.display(), e))
                })?;
            }
            imwrite(dir.join(format!("{}.png", self.count)), &self.bgr).map_err(pipeline_error)?;
        }

        self.count += 1;
        Ok(())
    }
}

fn pipeline_error(e: anyhow::Error) -> CaptureError {
    CaptureError::Pipeline(format!("{:#}", e))
}

/// 丢弃所有帧，只计数
#[derive(Debug, Default)]
pub struct NullSink {
    frames: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameSink for NullSink {
    fn consume(&mut self, _frame: &Frame<'_>) -> Result<()> {
        self.frames += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vcap_core::pixel_format::FourCC;

    fn frame(data: &[u8], cc: FourCC) -> Frame<'_> {
        Frame {
            data,
            index: 0,
            width: 2,
            height: 1,
            stride: 4,
            format: cc.into(),
            sequence: 0,
            timestamp: Duration::ZERO,
        }
    }

    #[test]
    fn converts_without_saving() {
        let mut sink = ConvertSink::new(3, None);
        sink.consume(&frame(&[128, 235, 128, 235], FourCC::UYVY))
            .unwrap();
        assert_eq!(sink.count(), 1);
        assert_eq!(sink.last_image().row_bytes(0), &[255; 6]);
        assert!(sink.output_dir().is_none());
    }

    #[test]
    fn compressed_frames_are_a_pipeline_error() {
        let mut sink = ConvertSink::new(0, None);
        let err = sink
            .consume(&frame(&[0; 4], FourCC::MJPEG))
            .unwrap_err();
        assert!(matches!(err, CaptureError::Pipeline(_)));
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn camera_index_is_a_subdirectory() {
        let sink = ConvertSink::new(2, Some(PathBuf::from("/tmp/out")));
        assert_eq!(sink.output_dir(), Some(Path::new("/tmp/out/2")));
    }
}
