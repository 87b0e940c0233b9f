use std::io;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use vcap_core::traits::{
    BufferLayout, CaptureDevice, DequeuedBuffer, DeviceInfo, Format, Memory, QueueBuffer,
    Readiness,
};

use crate::state::{KernelBuffer, SimState, Slot};

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

pub(crate) fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 一次 open 得到的模拟设备
#[derive(Debug)]
pub struct SimDevice {
    path: PathBuf,
    state: Arc<Mutex<SimState>>,
}

impl SimDevice {
    pub(crate) fn new(path: PathBuf, state: Arc<Mutex<SimState>>) -> Self {
        Self { path, state }
    }
}

impl CaptureDevice for SimDevice {
    fn query_caps(&mut self) -> io::Result<DeviceInfo> {
        let st = lock(&self.state);
        Ok(DeviceInfo {
            driver: "vcap-sim".into(),
            card: format!("Simulated camera {}", self.path.display()),
            bus_info: format!("sim:{}", self.path.display()),
            capabilities: st.spec.caps,
        })
    }

    fn reset_crop(&mut self) -> io::Result<()> {
        lock(&self.state).crop_resets += 1;
        Ok(())
    }

    fn set_format(&mut self, requested: &Format) -> io::Result<Format> {
        let mut st = lock(&self.state);
        if st.streaming || !st.slots.is_empty() {
            return Err(errno(libc::EBUSY));
        }

        let (width, height) = st
            .spec
            .forced_resolution
            .unwrap_or((requested.width, requested.height));
        let fourcc = st.spec.forced_fourcc.unwrap_or(requested.fourcc);
        let mut applied = Format::new(width, height, fourcc).sanitized();
        if st.spec.stride_padding > 0 {
            applied.bytes_per_line += st.spec.stride_padding;
            applied.size_image = applied.bytes_per_line * height;
        }
        st.format = Some(applied);

        if st.spec.buggy_stride {
            // 真实格式照常记录，只是上报时丢掉
            return Ok(Format {
                bytes_per_line: 0,
                size_image: 0,
                ..applied
            });
        }
        Ok(applied)
    }

    fn request_buffers(&mut self, memory: Memory, count: u32) -> io::Result<u32> {
        let mut st = lock(&self.state);
        if st.streaming {
            return Err(errno(libc::EBUSY));
        }

        st.release_records();
        if count == 0 {
            st.buffer_releases += 1;
            return Ok(0);
        }

        let n = count.min(st.spec.max_buffers);
        let len = st.payload_len();
        if memory == Memory::Mmap {
            for _ in 0..n {
                let buf = KernelBuffer::new(len).ok_or_else(|| errno(libc::ENOMEM))?;
                st.kernel.push(buf);
            }
        }
        st.slots = (0..n).map(|_| Slot::default()).collect();
        st.memory = Some(memory);
        Ok(n)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferLayout> {
        let st = lock(&self.state);
        let buf = st.kernel.get(index as usize).ok_or_else(|| errno(libc::EINVAL))?;
        Ok(BufferLayout {
            index,
            offset: index * buf.len() as u32,
            length: buf.len() as u32,
        })
    }

    fn map_buffer(&mut self, layout: &BufferLayout) -> io::Result<NonNull<u8>> {
        let mut st = lock(&self.state);
        if st.fail_map_at == Some(layout.index) {
            return Err(errno(libc::ENOMEM));
        }
        let buf = st
            .kernel
            .get_mut(layout.index as usize)
            .ok_or_else(|| errno(libc::EINVAL))?;
        if buf.len() != layout.length as usize {
            return Err(errno(libc::EINVAL));
        }
        buf.mapped = true;
        Ok(buf.ptr())
    }

    unsafe fn unmap_buffer(&mut self, ptr: NonNull<u8>, _length: usize) -> io::Result<()> {
        let mut st = lock(&self.state);
        if let Some(buf) = st.kernel.iter_mut().find(|b| b.mapped && b.ptr() == ptr) {
            buf.mapped = false;
            return Ok(());
        }
        if let Some(pos) = st.retired.iter().position(|b| b.ptr() == ptr) {
            st.retired.swap_remove(pos);
            return Ok(());
        }
        Err(errno(libc::EINVAL))
    }

    fn queue_buffer(&mut self, buf: &QueueBuffer) -> io::Result<()> {
        let mut st = lock(&self.state);
        if st.reject_queue || st.memory != Some(buf.memory) {
            return Err(errno(libc::EINVAL));
        }
        let needed = st.payload_len();
        let slot = st
            .slots
            .get_mut(buf.index as usize)
            .ok_or_else(|| errno(libc::EINVAL))?;
        if slot.queued {
            return Err(errno(libc::EINVAL));
        }
        if buf.memory == Memory::UserPtr {
            if buf.userptr == 0 || (buf.length as usize) < needed {
                return Err(errno(libc::EINVAL));
            }
            slot.user = Some((buf.userptr, buf.length));
        }
        slot.queued = true;
        st.incoming.push_back(buf.index);
        Ok(())
    }

    fn dequeue_buffer(&mut self, memory: Memory) -> io::Result<DequeuedBuffer> {
        let mut st = lock(&self.state);
        if let Some(code) = st.io_faults.pop_front().or(st.dequeue_fault) {
            return Err(errno(code));
        }
        if !st.streaming || st.memory != Some(memory) {
            return Err(errno(libc::EINVAL));
        }
        if st.done.is_empty() && !st.complete_one() {
            return Err(errno(libc::EAGAIN));
        }
        let index = st.done.pop_front().ok_or_else(|| errno(libc::EAGAIN))?;

        let payload = st.payload_len();
        let (sequence, timestamp) = st.next_stamp();
        let (dst, capacity) = match memory {
            Memory::Mmap => {
                let buf = &st.kernel[index as usize];
                (buf.ptr().as_ptr(), buf.len())
            }
            Memory::UserPtr => {
                let (addr, len) = st.slots[index as usize]
                    .user
                    .ok_or_else(|| errno(libc::EINVAL))?;
                (addr as *mut u8, len as usize)
            }
        };
        let used = payload.min(capacity);

        // 队列中的缓冲区归驱动所有，调用方保证入队的内存在出队前一直有效
        let frame = unsafe { std::slice::from_raw_parts_mut(dst, used) };
        st.paint(frame, sequence);
        st.slots[index as usize].queued = false;

        Ok(DequeuedBuffer {
            index,
            bytes_used: used as u32,
            sequence,
            timestamp,
        })
    }

    fn read_frame(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let mut st = lock(&self.state);
        if let Some(code) = st.io_faults.pop_front().or(st.dequeue_fault) {
            return Err(errno(code));
        }
        if st.stalled {
            return Err(errno(libc::EAGAIN));
        }
        let used = st.payload_len().min(dst.len());
        let (sequence, _) = st.next_stamp();
        st.paint(&mut dst[..used], sequence);
        Ok(used)
    }

    fn wait_ready(&mut self, timeout: Duration) -> io::Result<Readiness> {
        let mut st = lock(&self.state);
        if !st.open {
            return Err(errno(libc::EBADF));
        }
        // 出错的设备 poll 时总是立即返回 (POLLERR)
        if !st.io_faults.is_empty() || st.dequeue_fault.is_some() {
            return Ok(Readiness::Ready);
        }

        let ready = if st.stalled {
            false
        } else if st.memory.is_none() {
            // read() I/O 没有队列，设备总是有数据
            true
        } else {
            !st.done.is_empty() || st.complete_one()
        };

        if ready {
            Ok(Readiness::Ready)
        } else {
            st.clock += timeout;
            Ok(Readiness::TimedOut)
        }
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut st = lock(&self.state);
        if st.fail_stream_on || st.slots.is_empty() {
            return Err(errno(libc::EIO));
        }
        st.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut st = lock(&self.state);
        st.streaming = false;
        // STREAMOFF 把所有缓冲区退回用户
        st.incoming.clear();
        st.done.clear();
        for slot in st.slots.iter_mut() {
            slot.queued = false;
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        let mut st = lock(&self.state);
        st.open = false;
        st.streaming = false;
        if st.fail_close {
            return Err(errno(libc::EIO));
        }
        Ok(())
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        let mut st = lock(&self.state);
        st.open = false;
        st.streaming = false;
    }
}

/// 帧开头的帧号 (见 `SimState::paint`)
pub fn frame_tag(data: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}
