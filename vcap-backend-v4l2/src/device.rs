use std::fs;
use std::io;
use std::os::fd::BorrowedFd;
use std::os::raw::c_int;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::ptr::NonNull;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use v4l::v4l2;

use vcap_core::traits::{
    BufferLayout, CaptureDevice, DeviceInfo, Format, Memory, QueueBuffer, DequeuedBuffer,
    Readiness,
};

use crate::stream;

/// 打开设备节点
///
/// 与常见的采集工具一致：先确认路径是字符设备，再以 O_RDWR | O_NONBLOCK 打开。
pub fn open(path: &Path) -> io::Result<V4l2Device> {
    let meta = fs::metadata(path)?;
    if !meta.file_type().is_char_device() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is no device", path.display()),
        ));
    }

    let fd = v4l2::open(path, libc::O_RDWR | libc::O_NONBLOCK)?;
    tracing::debug!(target: "vcap::v4l2", path = %path.display(), fd, "device opened");

    Ok(V4l2Device { fd })
}

/// 一个已打开的 V4L2 采集节点 (单平面 VIDEO_CAPTURE)
#[derive(Debug)]
pub struct V4l2Device {
    fd: c_int,
}

impl V4l2Device {
    pub fn fd(&self) -> c_int {
        self.fd
    }

    fn borrowed(&self) -> BorrowedFd<'_> {
        // fd 在 self 存活期间一直有效，close 之后 self 已被消耗
        unsafe { BorrowedFd::borrow_raw(self.fd) }
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        if self.fd >= 0 {
            let _ = v4l2::close(self.fd);
        }
    }
}

impl CaptureDevice for V4l2Device {
    fn query_caps(&mut self) -> io::Result<DeviceInfo> {
        stream::query_caps(self.fd)
    }

    fn reset_crop(&mut self) -> io::Result<()> {
        stream::reset_crop(self.fd)
    }

    fn set_format(&mut self, requested: &Format) -> io::Result<Format> {
        stream::set_format(self.fd, requested)
    }

    fn request_buffers(&mut self, memory: Memory, count: u32) -> io::Result<u32> {
        stream::request_buffers(self.fd, memory, count)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferLayout> {
        stream::query_buffer(self.fd, index)
    }

    fn map_buffer(&mut self, layout: &BufferLayout) -> io::Result<NonNull<u8>> {
        stream::map(self.borrowed(), layout)
    }

    unsafe fn unmap_buffer(&mut self, ptr: NonNull<u8>, length: usize) -> io::Result<()> {
        stream::unmap(ptr, length)
    }

    fn queue_buffer(&mut self, buf: &QueueBuffer) -> io::Result<()> {
        stream::queue(self.fd, buf)
    }

    fn dequeue_buffer(&mut self, memory: Memory) -> io::Result<DequeuedBuffer> {
        stream::dequeue(self.fd, memory)
    }

    fn read_frame(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        nix::unistd::read(self.fd, dst).map_err(io::Error::from)
    }

    fn wait_ready(&mut self, timeout: Duration) -> io::Result<Readiness> {
        let fd = self.borrowed();
        let mut fds = [PollFd::new(&fd, PollFlags::POLLIN)];
        let timeout_ms = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);

        match poll(&mut fds, timeout_ms) {
            Ok(0) => Ok(Readiness::TimedOut),
            Ok(_) => Ok(Readiness::Ready),
            Err(Errno::EINTR) => Err(io::ErrorKind::Interrupted.into()),
            Err(e) => Err(e.into()),
        }
    }

    fn stream_on(&mut self) -> io::Result<()> {
        stream::stream_on(self.fd)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        stream::stream_off(self.fd)
    }

    fn close(mut self: Box<Self>) -> io::Result<()> {
        let fd = std::mem::replace(&mut self.fd, -1);
        v4l2::close(fd)
    }
}
