use crate::pixel_format::PixelFormat;
use std::time::Duration;

/// 核心帧结构体
/// 使用生命周期 'a 绑定到设备句柄的缓冲池，实现零拷贝。
///
/// 帧存活期间句柄无法被可变借用，因此在 `release` 之前管线一定已经用完了数据。
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// 原始图像数据切片 (长度为驱动报告的有效字节数)
    pub data: &'a [u8],

    /// 缓冲池中的槽位编号
    pub index: u32,

    /// 图像宽度 (Pixels)
    pub width: u32,

    /// 图像高度 (Pixels)
    pub height: u32,

    /// 跨距/步长 (Bytes per line)
    pub stride: usize,

    /// 像素格式
    pub format: PixelFormat,

    /// 驱动帧序号
    pub sequence: u64,

    /// 驱动时间戳 (read I/O 模式下为 0)
    pub timestamp: Duration,
}

impl<'a> Frame<'a> {
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 第 `row` 行的像素数据 (不含行尾 Padding)
    pub fn row(&self, row: u32, bytes_per_pixel: usize) -> Option<&'a [u8]> {
        let start = (row as usize).checked_mul(self.stride)?;
        let end = start.checked_add(self.width as usize * bytes_per_pixel)?;
        self.data.get(start..end)
    }
}
