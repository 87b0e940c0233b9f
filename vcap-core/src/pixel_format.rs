use std::fmt::{self, Display};
use std::str::FromStr;

/// 四字符代码 (Four Character Code)，视频工业标准
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FourCC(pub u32);

impl FourCC {
    /// 从 ASCII 字符创建 FourCC
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self((a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24))
    }

    pub const fn code(&self) -> u32 {
        self.0
    }
}

impl Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();

        write!(f, "{}", String::from_utf8_lossy(&bytes))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({})", self)
    }
}

impl FromStr for FourCC {
    type Err = String;

    /// "UYVY" -> FourCC::UYVY，不足 4 个字符时用空格补齐 ("Z16" -> "Z16 ")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 || !s.is_ascii() {
            return Err(format!("'{}' is not a four character code", s));
        }

        let mut code = [b' '; 4];
        code[..bytes.len()].copy_from_slice(bytes);
        Ok(Self::new(code[0], code[1], code[2], code[3]))
    }
}

impl From<u32> for FourCC {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

/// 常用像素格式定义
impl FourCC {
    // --- YUV Formats ---
    /// YUYV 4:2:2
    pub const YUYV: Self = Self::new(b'Y', b'U', b'Y', b'V');
    /// UYVY 4:2:2 - 多路采集板卡的默认格式
    pub const UYVY: Self = Self::new(b'U', b'Y', b'V', b'Y');
    /// NV12 4:2:0
    pub const NV12: Self = Self::new(b'N', b'V', b'1', b'2');
    /// YV12 4:2:0 (Planar)
    pub const YV12: Self = Self::new(b'Y', b'V', b'1', b'2');

    // --- RGB Formats ---
    /// RGB24 (Little Endian: B-G-R)
    pub const BGR3: Self = Self::new(b'B', b'G', b'R', b'3');
    /// RGB24 (Big Endian: R-G-B)
    pub const RGB3: Self = Self::new(b'R', b'G', b'B', b'3');
    /// RGBA32
    pub const RGBA: Self = Self::new(b'R', b'G', b'B', b'A');

    // --- Compressed Formats ---
    pub const MJPEG: Self = Self::new(b'M', b'J', b'P', b'G');
    pub const H264: Self = Self::new(b'H', b'2', b'6', b'4');

    // --- Bayer Formats (Raw Sensor Data) ---
    /// Raw Bayer BGGR 8-bit
    pub const BA81: Self = Self::new(b'B', b'A', b'8', b'1');
    /// Raw Bayer GBRG 8-bit
    pub const GBRG: Self = Self::new(b'G', b'B', b'R', b'G');
    /// Raw Bayer GRBG 8-bit
    pub const GRBG: Self = Self::new(b'G', b'R', b'B', b'G');
    /// Raw Bayer RGGB 8-bit
    pub const RGGB: Self = Self::new(b'R', b'G', b'G', b'B');

    // --- Depth Formats ---
    /// 16-bit Depth (Z16)
    pub const Z16: Self = Self::new(b'Z', b'1', b'6', b' ');
}

/// 像素格式的高级枚举，包含元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 已知的标准格式
    Known(FourCC),
    /// 驱动返回了库不认识的私有格式
    Unknown(u32),
}

impl PixelFormat {
    pub fn fourcc(&self) -> FourCC {
        match self {
            Self::Known(cc) => *cc,
            Self::Unknown(code) => FourCC(*code),
        }
    }

    /// 判断是否为压缩格式 (JPEG, H264)
    pub fn is_compressed(&self) -> bool {
        match self {
            Self::Known(cc) => matches!(*cc, FourCC::MJPEG | FourCC::H264),
            _ => false,
        }
    }

    /// 判断是否为 Bayer 原始格式 (需要 Demosaic)
    pub fn is_bayer(&self) -> bool {
        match self {
            Self::Known(cc) => matches!(
                *cc,
                FourCC::BA81 | FourCC::GBRG | FourCC::GRBG | FourCC::RGGB
            ),
            _ => false,
        }
    }

    /// 是否为 4:2:0 平面格式 (Y 平面 + 半分辨率色度)
    pub fn is_planar_420(&self) -> bool {
        matches!(self, Self::Known(FourCC::NV12) | Self::Known(FourCC::YV12))
    }

    /// 估算每像素比特数 (Bits Per Pixel)，用于计算带宽
    pub fn bpp_estimate(&self) -> u32 {
        match self {
            Self::Known(cc) => match *cc {
                FourCC::YUYV | FourCC::UYVY => 16,
                FourCC::BGR3 | FourCC::RGB3 => 24,
                FourCC::RGBA => 32,
                FourCC::NV12 | FourCC::YV12 => 12, // 平均 12 bpp
                FourCC::Z16 => 16,
                // Bayer 8-bit
                FourCC::BA81 | FourCC::GBRG | FourCC::GRBG | FourCC::RGGB => 8,
                // 压缩格式无法准确估算，给一个典型值
                FourCC::MJPEG | FourCC::H264 => 4,
                _ => 0,
            },
            _ => 0,
        }
    }

    /// 一行像素所需的最小字节数
    ///
    /// 压缩格式与未知格式按每像素 2 字节计算。
    pub fn min_bytes_per_line(&self, width: u32) -> u32 {
        if self.is_planar_420() {
            // 只统计 Y 平面
            return width;
        }

        match self.bpp_estimate() {
            bpp if bpp >= 8 && !self.is_compressed() => width.saturating_mul(bpp / 8),
            _ => width.saturating_mul(2),
        }
    }

    /// 整帧所需的最小字节数
    pub fn min_image_size(&self, bytes_per_line: u32, height: u32) -> u32 {
        let luma = bytes_per_line.saturating_mul(height);
        if self.is_planar_420() {
            luma.saturating_add(luma / 2)
        } else {
            luma
        }
    }
}

impl From<u32> for PixelFormat {
    fn from(val: u32) -> Self {
        Self::Known(FourCC(val))
    }
}

impl From<FourCC> for PixelFormat {
    fn from(cc: FourCC) -> Self {
        Self::Known(cc)
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(cc) => write!(f, "{}", cc),
            Self::Unknown(code) => write!(f, "unknown(0x{:08x})", code),
        }
    }
}

impl PartialEq<PixelFormat> for FourCC {
    fn eq(&self, other: &PixelFormat) -> bool {
        match other {
            PixelFormat::Known(cc) => self == cc,
            PixelFormat::Unknown(val) => self.0 == *val,
        }
    }
}

// 反向比较也加上
impl PartialEq<FourCC> for PixelFormat {
    fn eq(&self, other: &FourCC) -> bool {
        match self {
            PixelFormat::Known(cc) => cc == other,
            PixelFormat::Unknown(val) => *val == other.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_display_and_parse() {
        assert_eq!(FourCC::UYVY.to_string(), "UYVY");
        assert_eq!("UYVY".parse::<FourCC>().unwrap(), FourCC::UYVY);
        assert_eq!("Z16".parse::<FourCC>().unwrap(), FourCC::Z16);
        assert!("TOOLONG".parse::<FourCC>().is_err());
        assert!("".parse::<FourCC>().is_err());
    }

    #[test]
    fn minimum_sizes_for_packed_formats() {
        let uyvy = PixelFormat::from(FourCC::UYVY);
        assert_eq!(uyvy.min_bytes_per_line(640), 1280);
        assert_eq!(uyvy.min_image_size(1280, 480), 640 * 480 * 2);

        let bgr = PixelFormat::from(FourCC::BGR3);
        assert_eq!(bgr.min_bytes_per_line(640), 1920);
    }

    #[test]
    fn minimum_sizes_for_planar_and_compressed() {
        let nv12 = PixelFormat::from(FourCC::NV12);
        assert_eq!(nv12.min_bytes_per_line(640), 640);
        assert_eq!(nv12.min_image_size(640, 480), 640 * 480 * 3 / 2);

        // 压缩格式退化为 2 字节/像素
        let mjpg = PixelFormat::from(FourCC::MJPEG);
        assert_eq!(mjpg.min_bytes_per_line(640), 1280);
        let unknown = PixelFormat::Unknown(0x1234_5678);
        assert_eq!(unknown.min_bytes_per_line(10), 20);
    }
}
