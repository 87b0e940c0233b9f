use anyhow::{anyhow, Result};

use vcap_core::frame::Frame;
use vcap_core::pixel_format::FourCC;

use crate::core::mat::Mat;

/// 颜色转换代码 (对应 cv::COLOR_YUV2BGR_*)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorConversion {
    /// U0 Y0 V0 Y1
    UyvyToBgr,
    /// Y0 U0 Y1 V0
    YuyvToBgr,
}

impl ColorConversion {
    /// 按帧的像素格式选择转换方式
    pub fn for_fourcc(fourcc: FourCC) -> Option<Self> {
        match fourcc {
            FourCC::UYVY => Some(Self::UyvyToBgr),
            FourCC::YUYV => Some(Self::YuyvToBgr),
            _ => None,
        }
    }
}

/// 将一帧 4:2:2 打包数据转换为 BGR
///
/// `dst` 尺寸不符时会被重新分配。
pub fn cvt_color(frame: &Frame<'_>, dst: &mut Mat, code: ColorConversion) -> Result<()> {
    let (width, height) = (frame.width as usize, frame.height as usize);
    if width % 2 != 0 {
        return Err(anyhow!("4:2:2 frame width {} is not even", width));
    }

    let needed = frame.stride * height.saturating_sub(1) + width * 2;
    if frame.stride < width * 2 || frame.data.len() < needed {
        return Err(anyhow!(
            "frame too short: {} bytes for {}x{} stride {}",
            frame.data.len(),
            width,
            height,
            frame.stride
        ));
    }

    dst.ensure(height as i32, width as i32, 3);
    for row in 0..height {
        let src = &frame.data[row * frame.stride..row * frame.stride + width * 2];
        let out = dst.row_bytes_mut(row as i32);

        for (pair, bgr) in src.chunks_exact(4).zip(out.chunks_exact_mut(6)) {
            let (y0, u, y1, v) = match code {
                ColorConversion::UyvyToBgr => (pair[1], pair[0], pair[3], pair[2]),
                ColorConversion::YuyvToBgr => (pair[0], pair[1], pair[2], pair[3]),
            };
            bgr[..3].copy_from_slice(&yuv_to_bgr(y0, u, v));
            bgr[3..].copy_from_slice(&yuv_to_bgr(y1, u, v));
        }
    }
    Ok(())
}

/// BT.601 limited range, 整数近似
#[inline]
fn yuv_to_bgr(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    [clamp(b), clamp(g), clamp(r)]
}

#[inline]
fn clamp(x: i32) -> u8 {
    x.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(data: &[u8], width: u32, height: u32, stride: usize, cc: FourCC) -> Frame<'_> {
        Frame {
            data,
            index: 0,
            width,
            height,
            stride,
            format: cc.into(),
            sequence: 0,
            timestamp: Duration::ZERO,
        }
    }

    #[test]
    fn reference_colors() {
        assert_eq!(yuv_to_bgr(16, 128, 128), [0, 0, 0]);
        assert_eq!(yuv_to_bgr(235, 128, 128), [255, 255, 255]);
        // 纯红 (BT.601: Y=81 U=90 V=240)
        let [b, g, r] = yuv_to_bgr(81, 90, 240);
        assert!(r > 250 && g < 5 && b < 5, "got {:?}", (b, g, r));
    }

    #[test]
    fn uyvy_and_yuyv_agree() {
        // 2x1: 一个黑像素，一个白像素
        let uyvy = [128, 16, 128, 235];
        let yuyv = [16, 128, 235, 128];
        let mut a = Mat::empty();
        let mut b = Mat::empty();

        cvt_color(&frame(&uyvy, 2, 1, 4, FourCC::UYVY), &mut a, ColorConversion::UyvyToBgr)
            .unwrap();
        cvt_color(&frame(&yuyv, 2, 1, 4, FourCC::YUYV), &mut b, ColorConversion::YuyvToBgr)
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(a.at(0, 0), &[0, 0, 0]);
        assert_eq!(a.at(0, 1), &[255, 255, 255]);
    }

    #[test]
    fn stride_padding_is_skipped() {
        // 2x2 UYVY，每行 8 字节 (4 字节 padding 填成 0xFF)
        let data = [
            128, 16, 128, 16, 0xFF, 0xFF, 0xFF, 0xFF, //
            128, 235, 128, 235, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        let mut mat = Mat::empty();
        cvt_color(&frame(&data, 2, 2, 8, FourCC::UYVY), &mut mat, ColorConversion::UyvyToBgr)
            .unwrap();
        assert_eq!(mat.row_bytes(0), &[0, 0, 0, 0, 0, 0]);
        assert_eq!(mat.row_bytes(1), &[255; 6]);
    }

    #[test]
    fn short_frame_is_rejected() {
        let data = [0u8; 10];
        let mut mat = Mat::empty();
        let f = frame(&data, 4, 2, 8, FourCC::UYVY);
        assert!(cvt_color(&f, &mut mat, ColorConversion::UyvyToBgr).is_err());
        assert_eq!(ColorConversion::for_fourcc(FourCC::MJPEG), None);
    }
}
