use std::fmt;
use std::io;
use std::path::Path;
use std::ptr::NonNull;
use std::time::Duration;

use bitflags::bitflags;

use crate::error::Result;
use crate::frame::Frame;
use crate::pixel_format::{FourCC, PixelFormat};

bitflags! {
    /// 设备能力位 (取值与 V4L2_CAP_* 一致)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const VIDEO_CAPTURE = 0x0000_0001;
        const READ_WRITE    = 0x0100_0000;
        const STREAMING     = 0x0400_0000;
        const DEVICE_CAPS   = 0x8000_0000;
    }
}

/// 设备基本信息
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// 驱动名称 (e.g. "uvcvideo")
    pub driver: String,

    /// 对用户友好的显示名称 (e.g. "Logitech C920")
    pub card: String,

    /// 硬件总线信息 (e.g. "usb-0000:00:14.0-1")
    pub bus_info: String,

    pub capabilities: Capabilities,
}

/// 缓冲区的内存类型 (取值与 V4L2_MEMORY_* 一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Memory {
    Mmap = 1,
    UserPtr = 2,
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Memory::Mmap => write!(f, "memory-mapped"),
            Memory::UserPtr => write!(f, "user pointer"),
        }
    }
}

/// 单平面图像格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    /// 跨距 (Bytes per line)，请求时填 0 由驱动决定
    pub bytes_per_line: u32,
    /// 整帧字节数，请求时填 0 由驱动决定
    pub size_image: u32,
}

impl Format {
    pub fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Self {
            width,
            height,
            fourcc,
            bytes_per_line: 0,
            size_image: 0,
        }
    }

    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::from(self.fourcc)
    }

    /// 宽、高、像素格式是否一致 (跨距与大小由驱动决定，不参与比较)
    pub fn same_geometry(&self, other: &Format) -> bool {
        self.width == other.width && self.height == other.height && self.fourcc == other.fourcc
    }

    /// Buggy driver paranoia: 驱动上报的跨距与帧大小不可信，取不小于理论最小值的版本
    pub fn sanitized(&self) -> Format {
        let pix = self.pixel_format();
        let bytes_per_line = self.bytes_per_line.max(pix.min_bytes_per_line(self.width));
        let size_image = self
            .size_image
            .max(pix.min_image_size(bytes_per_line, self.height));
        if bytes_per_line != self.bytes_per_line || size_image != self.size_image {
            tracing::debug!(
                "Format {}: stride {} -> {}, size {} -> {}",
                self,
                self.bytes_per_line,
                bytes_per_line,
                self.size_image,
                size_image
            );
        }

        Format {
            bytes_per_line,
            size_image,
            ..*self
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.fourcc)
    }
}

/// VIDIOC_QUERYBUF 的结果：mmap 所需的偏移与长度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub index: u32,
    pub offset: u32,
    pub length: u32,
}

/// 入队描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueBuffer {
    pub index: u32,
    pub memory: Memory,
    /// 用户指针模式下缓冲区的起始地址，mmap 模式为 0
    pub userptr: usize,
    pub length: u32,
}

impl QueueBuffer {
    pub fn mmap(index: u32) -> Self {
        Self {
            index,
            memory: Memory::Mmap,
            userptr: 0,
            length: 0,
        }
    }

    pub fn user(index: u32, ptr: NonNull<u8>, length: u32) -> Self {
        Self {
            index,
            memory: Memory::UserPtr,
            userptr: ptr.as_ptr() as usize,
            length,
        }
    }
}

/// 出队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: u32,
    /// 驱动填充的有效字节数
    pub bytes_used: u32,
    pub sequence: u32,
    pub timestamp: Duration,
}

/// 等待设备可读的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
}

/// 1. 设备面：一个已打开的采集设备节点
///
/// 这是与操作系统采集协议交互的唯一接缝。所有方法都对应一次 (或少数几次) 系统调用，
/// 不做重试，也不维护缓冲区所有权；这些由上层的会话状态机负责。
pub trait CaptureDevice: Send {
    /// VIDIOC_QUERYCAP
    fn query_caps(&mut self) -> io::Result<DeviceInfo>;

    /// VIDIOC_CROPCAP + VIDIOC_S_CROP，把裁剪区域恢复为默认矩形
    ///
    /// 不支持裁剪的驱动会返回 EINVAL 之类的错误，调用方可以忽略。
    fn reset_crop(&mut self) -> io::Result<()>;

    /// VIDIOC_S_FMT，返回驱动实际应用的格式 (可能被驱动自动修正)
    fn set_format(&mut self, requested: &Format) -> io::Result<Format>;

    /// VIDIOC_REQBUFS，返回驱动实际分配的数量；count 为 0 时释放驱动侧的缓冲区记录
    fn request_buffers(&mut self, memory: Memory, count: u32) -> io::Result<u32>;

    /// VIDIOC_QUERYBUF
    fn query_buffer(&mut self, index: u32) -> io::Result<BufferLayout>;

    /// 将驱动缓冲区映射到进程地址空间
    fn map_buffer(&mut self, layout: &BufferLayout) -> io::Result<NonNull<u8>>;

    /// 解除映射
    ///
    /// # Safety
    /// `ptr`/`length` 必须来自同一设备上一次成功的 `map_buffer`，且之后不再被访问。
    unsafe fn unmap_buffer(&mut self, ptr: NonNull<u8>, length: usize) -> io::Result<()>;

    /// VIDIOC_QBUF
    ///
    /// 用户指针模式下，驱动会在出队前一直写入 `userptr` 指向的内存。
    fn queue_buffer(&mut self, buf: &QueueBuffer) -> io::Result<()>;

    /// VIDIOC_DQBUF (非阻塞)，没有完成的缓冲区时返回 `WouldBlock`
    fn dequeue_buffer(&mut self, memory: Memory) -> io::Result<DequeuedBuffer>;

    /// read() I/O，返回写入的字节数
    fn read_frame(&mut self, dst: &mut [u8]) -> io::Result<usize>;

    /// 等待设备产生一帧 (select/poll)
    fn wait_ready(&mut self, timeout: Duration) -> io::Result<Readiness>;

    /// VIDIOC_STREAMON
    fn stream_on(&mut self) -> io::Result<()>;

    /// VIDIOC_STREAMOFF
    fn stream_off(&mut self) -> io::Result<()>;

    /// 关闭文件描述符
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// 2. 驱动入口：打开设备节点
pub trait Driver: Send + Sync {
    /// 后端类型标识 (e.g. "V4L2")
    fn name(&self) -> &str;

    /// 打开设备，路径不是字符设备时返回错误
    fn open(&self, path: &Path) -> io::Result<Box<dyn CaptureDevice>>;
}

/// 3. 图像管线：消费一帧数据 (颜色转换、保存、显示)
///
/// `frame` 仅在本次调用期间有效，实现不得保留对其数据的引用。
pub trait FrameSink: Send {
    fn consume(&mut self, frame: &Frame<'_>) -> Result<()>;
}

impl<F> FrameSink for F
where
    F: FnMut(&Frame<'_>) -> Result<()> + Send,
{
    fn consume(&mut self, frame: &Frame<'_>) -> Result<()> {
        self(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_pads_short_stride_and_size() {
        let reported = Format {
            bytes_per_line: 100,
            size_image: 1000,
            ..Format::new(640, 480, FourCC::UYVY)
        };

        let fixed = reported.sanitized();
        assert_eq!(fixed.bytes_per_line, 1280);
        assert_eq!(fixed.size_image, 1280 * 480);
    }

    #[test]
    fn sanitized_keeps_generous_driver_values() {
        let reported = Format {
            bytes_per_line: 1536,
            size_image: 1536 * 480 + 4096,
            ..Format::new(640, 480, FourCC::UYVY)
        };

        assert_eq!(reported.sanitized(), reported);
    }

    #[test]
    fn geometry_comparison_ignores_stride() {
        let a = Format::new(640, 480, FourCC::UYVY);
        let b = Format {
            bytes_per_line: 1280,
            ..a
        };
        assert!(a.same_geometry(&b));
        assert!(!a.same_geometry(&Format::new(648, 480, FourCC::UYVY)));
    }
}
