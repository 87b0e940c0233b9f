use std::alloc::{self, Layout};
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::time::Duration;

use vcap_core::pixel_format::FourCC;
use vcap_core::traits::{Capabilities, Format, Memory};

/// 模拟设备节点的静态参数
#[derive(Debug, Clone)]
pub struct SimSpec {
    pub caps: Capabilities,
    /// 驱动最多给出的缓冲区数量
    pub max_buffers: u32,
    /// 驱动"自动修正"后的分辨率，None 表示按请求接受
    pub forced_resolution: Option<(u32, u32)>,
    /// 驱动替换后的像素格式，None 表示按请求接受
    pub forced_fourcc: Option<FourCC>,
    /// 模拟有缺陷的驱动：bytesperline/sizeimage 报告为 0
    pub buggy_stride: bool,
    /// 每行额外的 padding 字节
    pub stride_padding: u32,
    /// 帧数据的填充字节
    pub fill: u8,
    /// 相邻两帧之间的虚拟时间
    pub frame_interval: Duration,
}

impl Default for SimSpec {
    fn default() -> Self {
        Self {
            caps: Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING | Capabilities::READ_WRITE,
            max_buffers: 32,
            forced_resolution: None,
            forced_fourcc: None,
            buggy_stride: false,
            stride_padding: 0,
            fill: 0x80,
            frame_interval: Duration::from_millis(33),
        }
    }
}

impl SimSpec {
    pub fn caps(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn max_buffers(mut self, n: u32) -> Self {
        self.max_buffers = n;
        self
    }

    pub fn force_resolution(mut self, width: u32, height: u32) -> Self {
        self.forced_resolution = Some((width, height));
        self
    }

    pub fn force_fourcc(mut self, fourcc: FourCC) -> Self {
        self.forced_fourcc = Some(fourcc);
        self
    }

    pub fn buggy_stride(mut self) -> Self {
        self.buggy_stride = true;
        self
    }

    pub fn stride_padding(mut self, bytes: u32) -> Self {
        self.stride_padding = bytes;
        self
    }

    pub fn fill(mut self, byte: u8) -> Self {
        self.fill = byte;
        self
    }
}

/// 驱动侧的一块 mmap 内存
///
/// 模拟内核语义：REQBUFS(0) 之后仍被映射的内存要等到 munmap 才真正释放。
#[derive(Debug)]
pub(crate) struct KernelBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    pub(crate) mapped: bool,
}

// 内存由 KernelBuffer 独占，只在 SimState 的锁内访问
unsafe impl Send for KernelBuffer {}

impl KernelBuffer {
    pub(crate) fn new(len: usize) -> Option<Self> {
        let layout = Layout::from_size_align(len.max(1), 4096).ok()?;
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })?;
        Some(Self {
            ptr,
            layout,
            mapped: false,
        })
    }

    pub(crate) fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for KernelBuffer {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// 驱动记录的一个缓冲区槽位
#[derive(Debug, Default)]
pub(crate) struct Slot {
    pub(crate) queued: bool,
    /// 用户指针模式下最近一次入队的地址与长度
    pub(crate) user: Option<(usize, u32)>,
}

/// 可被 SimControl 观察与篡改的设备状态
#[derive(Debug)]
pub(crate) struct SimState {
    pub(crate) spec: SimSpec,
    pub(crate) open: bool,
    pub(crate) opens: u32,
    pub(crate) format: Option<Format>,
    pub(crate) memory: Option<Memory>,
    pub(crate) slots: Vec<Slot>,
    pub(crate) kernel: Vec<KernelBuffer>,
    pub(crate) retired: Vec<KernelBuffer>,
    /// 已入队、尚未完成的缓冲区 (FIFO)
    pub(crate) incoming: VecDeque<u32>,
    pub(crate) done: VecDeque<u32>,
    pub(crate) streaming: bool,
    pub(crate) clock: Duration,
    pub(crate) sequence: u32,
    pub(crate) delivered: u64,
    pub(crate) crop_resets: u32,
    /// REQBUFS(0) 的次数
    pub(crate) buffer_releases: u32,

    // fault injection
    pub(crate) stalled: bool,
    pub(crate) fail_open: bool,
    pub(crate) fail_map_at: Option<u32>,
    pub(crate) fail_stream_on: bool,
    pub(crate) fail_close: bool,
    pub(crate) reject_queue: bool,
    pub(crate) io_faults: VecDeque<i32>,
    pub(crate) dequeue_fault: Option<i32>,
}

impl SimState {
    pub(crate) fn new(spec: SimSpec) -> Self {
        Self {
            spec,
            open: false,
            opens: 0,
            format: None,
            memory: None,
            slots: Vec::new(),
            kernel: Vec::new(),
            retired: Vec::new(),
            incoming: VecDeque::new(),
            done: VecDeque::new(),
            streaming: false,
            clock: Duration::ZERO,
            sequence: 0,
            delivered: 0,
            crop_resets: 0,
            buffer_releases: 0,
            stalled: false,
            fail_open: false,
            fail_map_at: None,
            fail_stream_on: false,
            fail_close: false,
            reject_queue: false,
            io_faults: VecDeque::new(),
            dequeue_fault: None,
        }
    }

    pub(crate) fn live_mappings(&self) -> usize {
        self.kernel
            .iter()
            .chain(self.retired.iter())
            .filter(|b| b.mapped)
            .count()
    }

    /// 当前格式下一帧的有效字节数
    pub(crate) fn payload_len(&self) -> usize {
        self.format
            .map(|f| f.sanitized().size_image as usize)
            .unwrap_or(0)
    }

    /// 把排队最久的缓冲区标记为完成
    ///
    /// 真实设备中这一步由硬件完成，这里在等待时推进。
    pub(crate) fn complete_one(&mut self) -> bool {
        if !self.streaming || self.stalled {
            return false;
        }
        match self.incoming.pop_front() {
            Some(index) => {
                self.done.push_back(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn next_stamp(&mut self) -> (u32, Duration) {
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        self.clock += self.spec.frame_interval;
        self.delivered += 1;
        (seq, self.clock)
    }

    /// 填充一帧：开头 4 字节是小端序帧号，其余为 spec.fill
    pub(crate) fn paint(&self, dst: &mut [u8], sequence: u32) {
        dst.fill(self.spec.fill);
        let tag = sequence.to_le_bytes();
        let n = dst.len().min(tag.len());
        dst[..n].copy_from_slice(&tag[..n]);
    }

    pub(crate) fn release_records(&mut self) {
        self.slots.clear();
        self.incoming.clear();
        self.done.clear();
        self.memory = None;
        for buf in self.kernel.drain(..) {
            if buf.mapped {
                self.retired.push(buf);
            }
        }
    }
}
