//! VIDIOC_* 调用的薄封装
//!
//! 每个函数只发一次 ioctl (EINTR 时重发)，不做状态管理。

use std::io;
use std::mem;
use std::num::NonZeroUsize;
use std::os::fd::BorrowedFd;
use std::os::raw::{c_int, c_void};
use std::ptr::NonNull;
use std::time::Duration;

use nix::sys::mman::{self, MapFlags, ProtFlags};
use v4l::v4l2;
use v4l::v4l_sys::*;

use vcap_core::pixel_format::FourCC;
use vcap_core::traits::{
    BufferLayout, Capabilities, DequeuedBuffer, DeviceInfo, Format, Memory, QueueBuffer,
};

const CAPTURE: u32 = v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE;

/// ioctl，被信号打断时重试
///
/// # Safety
/// `arg` 必须指向与 `request` 匹配的结构体。
unsafe fn xioctl<T>(fd: c_int, request: v4l2::vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
    loop {
        match v4l2::ioctl(fd, request, arg as *mut T as *mut c_void) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn c_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

pub(crate) fn query_caps(fd: c_int) -> io::Result<DeviceInfo> {
    let mut caps: v4l2_capability = unsafe { mem::zeroed() };
    unsafe { xioctl(fd, v4l2::vidioc::VIDIOC_QUERYCAP, &mut caps)? };

    // 新内核上 device_caps 才是当前节点的能力，capabilities 是整个物理设备的
    let bits = if caps.capabilities & Capabilities::DEVICE_CAPS.bits() != 0 {
        caps.device_caps
    } else {
        caps.capabilities
    };

    Ok(DeviceInfo {
        driver: c_string(&caps.driver),
        card: c_string(&caps.card),
        bus_info: c_string(&caps.bus_info),
        capabilities: Capabilities::from_bits_truncate(bits),
    })
}

/// VIDIOC_CROPCAP + VIDIOC_S_CROP：裁剪区域恢复为驱动默认值
pub(crate) fn reset_crop(fd: c_int) -> io::Result<()> {
    let mut cropcap: v4l2_cropcap = unsafe { mem::zeroed() };
    cropcap.type_ = CAPTURE;
    unsafe { xioctl(fd, v4l2::vidioc::VIDIOC_CROPCAP, &mut cropcap)? };

    let mut crop: v4l2_crop = unsafe { mem::zeroed() };
    crop.type_ = CAPTURE;
    crop.c = cropcap.defrect;
    unsafe { xioctl(fd, v4l2::vidioc::VIDIOC_S_CROP, &mut crop) }
}

pub(crate) fn set_format(fd: c_int, requested: &Format) -> io::Result<Format> {
    let mut fmt: v4l2_format = unsafe { mem::zeroed() };
    fmt.type_ = CAPTURE;
    unsafe {
        fmt.fmt.pix.width = requested.width;
        fmt.fmt.pix.height = requested.height;
        fmt.fmt.pix.pixelformat = requested.fourcc.code();
        fmt.fmt.pix.field = v4l2_field_V4L2_FIELD_INTERLACED;
        fmt.fmt.pix.bytesperline = requested.bytes_per_line;
        fmt.fmt.pix.sizeimage = requested.size_image;

        xioctl(fd, v4l2::vidioc::VIDIOC_S_FMT, &mut fmt)?;

        // 驱动可以修改宽高，结果写回同一个结构体
        let pix = fmt.fmt.pix;
        Ok(Format {
            width: pix.width,
            height: pix.height,
            fourcc: FourCC(pix.pixelformat),
            bytes_per_line: pix.bytesperline,
            size_image: pix.sizeimage,
        })
    }
}

pub(crate) fn request_buffers(fd: c_int, memory: Memory, count: u32) -> io::Result<u32> {
    let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
    req.type_ = CAPTURE;
    req.memory = memory as u32;
    req.count = count;

    unsafe { xioctl(fd, v4l2::vidioc::VIDIOC_REQBUFS, &mut req)? };
    Ok(req.count)
}

pub(crate) fn query_buffer(fd: c_int, index: u32) -> io::Result<BufferLayout> {
    let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
    buf.type_ = CAPTURE;
    buf.memory = Memory::Mmap as u32;
    buf.index = index;

    unsafe {
        xioctl(fd, v4l2::vidioc::VIDIOC_QUERYBUF, &mut buf)?;
        Ok(BufferLayout {
            index: buf.index,
            offset: buf.m.offset,
            length: buf.length,
        })
    }
}

pub(crate) fn map(fd: BorrowedFd<'_>, layout: &BufferLayout) -> io::Result<NonNull<u8>> {
    let length = NonZeroUsize::new(layout.length as usize).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("buffer {} has zero length", layout.index),
        )
    })?;

    let ptr = unsafe {
        mman::mmap(
            None,
            length,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            Some(&fd),
            layout.offset as libc::off_t,
        )?
    };

    NonNull::new(ptr as *mut u8)
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
}

/// # Safety
/// 见 `CaptureDevice::unmap_buffer`
pub(crate) unsafe fn unmap(ptr: NonNull<u8>, length: usize) -> io::Result<()> {
    mman::munmap(ptr.as_ptr() as *mut c_void, length)?;
    Ok(())
}

pub(crate) fn queue(fd: c_int, desc: &QueueBuffer) -> io::Result<()> {
    let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
    buf.type_ = CAPTURE;
    buf.memory = desc.memory as u32;
    buf.index = desc.index;

    if desc.memory == Memory::UserPtr {
        buf.m.userptr = desc.userptr as std::os::raw::c_ulong;
        buf.length = desc.length;
    }

    unsafe { xioctl(fd, v4l2::vidioc::VIDIOC_QBUF, &mut buf) }
}

pub(crate) fn dequeue(fd: c_int, memory: Memory) -> io::Result<DequeuedBuffer> {
    let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
    buf.type_ = CAPTURE;
    buf.memory = memory as u32;

    // 非阻塞 fd 上没有就绪的缓冲区时返回 EAGAIN，对应 WouldBlock
    unsafe { xioctl(fd, v4l2::vidioc::VIDIOC_DQBUF, &mut buf)? };

    let timestamp = Duration::from_secs(buf.timestamp.tv_sec.max(0) as u64)
        + Duration::from_micros(buf.timestamp.tv_usec.max(0) as u64);

    Ok(DequeuedBuffer {
        index: buf.index,
        bytes_used: buf.bytesused,
        sequence: buf.sequence,
        timestamp,
    })
}

pub(crate) fn stream_on(fd: c_int) -> io::Result<()> {
    let mut typ = CAPTURE;
    unsafe { xioctl(fd, v4l2::vidioc::VIDIOC_STREAMON, &mut typ) }
}

pub(crate) fn stream_off(fd: c_int) -> io::Result<()> {
    let mut typ = CAPTURE;
    unsafe { xioctl(fd, v4l2::vidioc::VIDIOC_STREAMOFF, &mut typ) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_string_stops_at_nul() {
        let mut raw = [0u8; 16];
        raw[..8].copy_from_slice(b"uvcvideo");
        assert_eq!(c_string(&raw), "uvcvideo");
        assert_eq!(c_string(b"full"), "full");
    }
}
