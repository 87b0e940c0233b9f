//! 缓冲池 (Arena)
//!
//! 固定数量的槽位，每个槽位拥有一块内存 (驱动映射或页对齐堆内存)。
//! 所有权状态记录在槽位上而不是靠指针身份判断：
//!
//! ```text
//!   Idle --start--> Queued --dequeue--> Held --release--> Queued
//!                     \______________stop_______________/ -> Idle
//! ```

use std::alloc::{self, Layout};
use std::io;
use std::ptr::NonNull;
use std::slice;

use vcap_core::builder::TransferStrategy;

/// 系统页大小
pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

/// 页对齐、清零的堆内存块
///
/// 用户指针 I/O 要求缓冲区按页对齐；read I/O 也复用它。
#[derive(Debug)]
pub struct PageBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// 内存由 PageBuffer 独占
unsafe impl Send for PageBuffer {}

impl PageBuffer {
    pub fn new(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "zero-sized buffer",
            ));
        }
        let layout = Layout::from_size_align(len, page_size())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(ptr)
            .map(|ptr| Self { ptr, layout })
            .ok_or_else(|| io::Error::new(io::ErrorKind::OutOfMemory, "Out of memory"))
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }
}

impl Drop for PageBuffer {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

#[derive(Debug)]
pub(crate) enum Backing {
    /// 驱动内存，通过 munmap 释放
    Mapped,
    /// 本进程分配，drop 时释放
    Heap(PageBuffer),
}

/// 一块缓冲区内存：起始地址 + 长度
#[derive(Debug)]
pub struct Region {
    ptr: NonNull<u8>,
    len: usize,
    backing: Backing,
}

// 映射内存只通过持有它的 BufferPool 访问，BufferPool 只属于一个线程
unsafe impl Send for Region {}

impl Region {
    pub(crate) fn mapped(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            backing: Backing::Mapped,
        }
    }

    pub(crate) fn heap(buf: PageBuffer) -> Self {
        Self {
            ptr: buf.as_ptr(),
            len: buf.len(),
            backing: Backing::Heap(buf),
        }
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped)
    }

    fn contains(&self, ptr: *const u8) -> bool {
        let start = self.ptr.as_ptr() as usize;
        let addr = ptr as usize;
        addr >= start && addr < start + self.len
    }
}

/// 槽位的所有权状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// 不在驱动队列中 (未开始采集或已 stream-off)
    Idle,
    /// 属于驱动，硬件可能正在写入
    Queued,
    /// 属于消费者，数据有效
    Held,
}

#[derive(Debug)]
struct Slot {
    region: Region,
    state: SlotState,
    bytes_used: usize,
}

/// 一次 initialize/deinitialize 周期内固定不变的缓冲池
#[derive(Debug)]
pub struct BufferPool {
    strategy: TransferStrategy,
    slots: Vec<Slot>,
}

impl BufferPool {
    pub(crate) fn new(strategy: TransferStrategy, regions: Vec<Region>) -> Self {
        let slots = regions
            .into_iter()
            .map(|region| Slot {
                region,
                state: SlotState::Idle,
                bytes_used: 0,
            })
            .collect();
        Self { strategy, slots }
    }

    pub fn strategy(&self) -> TransferStrategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn buffer_len(&self, index: u32) -> Option<usize> {
        self.slots.get(index as usize).map(|s| s.region.len())
    }

    pub fn buffer_lengths(&self) -> Vec<usize> {
        self.slots.iter().map(|s| s.region.len()).collect()
    }

    pub fn state(&self, index: u32) -> Option<SlotState> {
        self.slots.get(index as usize).map(|s| s.state)
    }

    /// 当前被消费者持有的槽位
    pub fn held(&self) -> Option<u32> {
        self.slots
            .iter()
            .position(|s| s.state == SlotState::Held)
            .map(|i| i as u32)
    }

    pub fn region(&self, index: u32) -> Option<&Region> {
        self.slots.get(index as usize).map(|s| &s.region)
    }

    /// `ptr` 是否落在本池的某个缓冲区内
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.slots.iter().any(|s| s.region.contains(ptr))
    }

    /// Idle/Held -> Queued
    pub(crate) fn mark_queued(&mut self, index: u32) -> io::Result<()> {
        let slot = self.slot_mut(index)?;
        if slot.state == SlotState::Queued {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("buffer {} is already queued", index),
            ));
        }
        slot.state = SlotState::Queued;
        slot.bytes_used = 0;
        Ok(())
    }

    /// Queued -> Held，同一时刻最多一个 Held
    pub(crate) fn mark_held(&mut self, index: u32, bytes_used: usize) -> io::Result<()> {
        if let Some(held) = self.held() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("buffer {} is still held", held),
            ));
        }
        let slot = self.slot_mut(index)?;
        if slot.state != SlotState::Queued {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("driver returned buffer {} which was not queued", index),
            ));
        }
        slot.state = SlotState::Held;
        slot.bytes_used = bytes_used.min(slot.region.len());
        Ok(())
    }

    /// stream-off 之后驱动放弃了所有缓冲区
    pub(crate) fn mark_all_idle(&mut self) {
        for slot in &mut self.slots {
            slot.state = SlotState::Idle;
            slot.bytes_used = 0;
        }
    }

    /// 被持有帧的有效数据
    pub(crate) fn held_slice(&self) -> Option<(u32, &[u8])> {
        let index = self.held()?;
        let slot = &self.slots[index as usize];
        // Held 状态下驱动不会写入这块内存
        let data = unsafe { slice::from_raw_parts(slot.region.ptr.as_ptr(), slot.bytes_used) };
        Some((index, data))
    }

    /// 整个缓冲区，供 read() I/O 写入；只有 Queued (属于设备侧) 的槽位可写
    pub(crate) fn slice_mut(&mut self, index: u32) -> Option<&mut [u8]> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.state != SlotState::Queued {
            return None;
        }
        Some(unsafe { slice::from_raw_parts_mut(slot.region.ptr.as_ptr(), slot.region.len) })
    }

    /// 拆除时交出所有内存
    pub(crate) fn into_regions(self) -> impl Iterator<Item = (u32, Region)> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| (i as u32, slot.region))
    }

    fn slot_mut(&mut self, index: u32) -> io::Result<&mut Slot> {
        let len = self.slots.len();
        self.slots.get_mut(index as usize).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("buffer index {} out of range ({} buffers)", index, len),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap_pool(n: usize, len: usize) -> BufferPool {
        let regions = (0..n)
            .map(|_| Region::heap(PageBuffer::new(len).unwrap()))
            .collect();
        BufferPool::new(TransferStrategy::UserPtr, regions)
    }

    #[test]
    fn page_buffer_is_aligned_and_zeroed() {
        let buf = PageBuffer::new(10_000).unwrap();
        assert_eq!(buf.as_ptr().as_ptr() as usize % page_size(), 0);
        assert_eq!(buf.len(), 10_000);
        let data = unsafe { slice::from_raw_parts(buf.as_ptr().as_ptr(), buf.len()) };
        assert!(data.iter().all(|&b| b == 0));
        assert!(PageBuffer::new(0).is_err());
    }

    #[test]
    fn single_held_slot() {
        let mut pool = heap_pool(3, 64);
        for i in 0..3 {
            pool.mark_queued(i).unwrap();
        }

        pool.mark_held(1, 32).unwrap();
        assert_eq!(pool.held(), Some(1));
        assert!(pool.mark_held(2, 32).is_err());
        assert_eq!(pool.state(2), Some(SlotState::Queued));

        let (index, data) = pool.held_slice().unwrap();
        assert_eq!(index, 1);
        assert_eq!(data.len(), 32);

        pool.mark_queued(1).unwrap();
        assert_eq!(pool.held(), None);
        assert!(pool.held_slice().is_none());
    }

    #[test]
    fn only_queued_slot_may_be_held() {
        let mut pool = heap_pool(2, 64);
        // 还没入队
        assert!(pool.mark_held(0, 1).is_err());
        pool.mark_queued(0).unwrap();
        assert!(pool.mark_queued(0).is_err());
        assert!(pool.mark_held(5, 1).is_err());
        // bytes_used 不会超过缓冲区长度
        pool.mark_held(0, 1 << 20).unwrap();
        assert_eq!(pool.held_slice().unwrap().1.len(), 64);
    }

    #[test]
    fn stop_returns_everything_to_idle() {
        let mut pool = heap_pool(2, 64);
        pool.mark_queued(0).unwrap();
        pool.mark_queued(1).unwrap();
        pool.mark_all_idle();
        assert_eq!(pool.state(0), Some(SlotState::Idle));
        assert!(pool.slice_mut(0).is_none());
    }

    #[test]
    fn contains_checks_every_region() {
        let pool = heap_pool(2, 128);
        let base = pool.region(1).unwrap().as_ptr().as_ptr();
        assert!(pool.contains(base));
        assert!(pool.contains(unsafe { base.add(127) }));

        let other = PageBuffer::new(128).unwrap();
        assert!(!pool.contains(other.as_ptr().as_ptr()));
        assert_eq!(pool.buffer_lengths(), vec![128, 128]);
    }
}
