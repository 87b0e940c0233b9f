//! 三种缓冲区传输方式
//!
//! 会话状态机只通过 [`Transfer`] 调用，方式相关的细节都在各自的实现里。

mod mmap;
mod read;
mod userptr;

use std::io;

use vcap_core::builder::TransferStrategy;
use vcap_core::error::{CaptureError, Result, TeardownFailure};
use vcap_core::traits::{CaptureDevice, DequeuedBuffer, Format, Memory, QueueBuffer};

use crate::pool::BufferPool;

pub(crate) use mmap::MmapTransfer;
pub(crate) use read::ReadTransfer;
pub(crate) use userptr::UserPtrTransfer;

pub(crate) trait Transfer: Send {
    fn strategy(&self) -> TransferStrategy;

    /// 流式 I/O 的内存类型，read I/O 为 None
    fn memory(&self) -> Option<Memory>;

    /// 在设备上登记缓冲区并分配内存
    ///
    /// 失败时已完成的部分全部撤销，不会留下半个缓冲池。
    fn allocate(
        &mut self,
        dev: &mut dyn CaptureDevice,
        format: &Format,
        count: u32,
    ) -> Result<BufferPool>;

    /// 入队描述
    fn describe(&self, pool: &BufferPool, index: u32) -> QueueBuffer;

    /// 全部入队后 stream-on
    fn start(&mut self, dev: &mut dyn CaptureDevice, pool: &mut BufferPool) -> Result<()> {
        for index in 0..pool.len() as u32 {
            dev.queue_buffer(&self.describe(pool, index))
                .map_err(CaptureError::StreamStart)?;
            pool.mark_queued(index).map_err(CaptureError::StreamStart)?;
        }
        dev.stream_on().map_err(CaptureError::StreamStart)
    }

    fn stop(&mut self, dev: &mut dyn CaptureDevice, pool: &mut BufferPool) -> io::Result<()> {
        if self.memory().is_some() {
            dev.stream_off()?;
        }
        pool.mark_all_idle();
        Ok(())
    }

    /// REQBUFS(0)，释放驱动侧的缓冲区记录
    fn release_device_buffers(&mut self, dev: &mut dyn CaptureDevice) -> io::Result<()> {
        match self.memory() {
            Some(memory) => dev.request_buffers(memory, 0).map(|_| ()),
            None => Ok(()),
        }
    }

    /// 逐个释放内存，返回每个失败的步骤
    fn free(&mut self, _dev: &mut dyn CaptureDevice, pool: BufferPool) -> Vec<TeardownFailure> {
        drop(pool);
        Vec::new()
    }

    /// 取一帧；没有就绪的缓冲区时返回 WouldBlock
    fn fetch(
        &mut self,
        dev: &mut dyn CaptureDevice,
        pool: &mut BufferPool,
    ) -> io::Result<DequeuedBuffer>;

    /// 把缓冲区还给驱动
    fn requeue(
        &mut self,
        dev: &mut dyn CaptureDevice,
        pool: &BufferPool,
        index: u32,
    ) -> io::Result<()> {
        dev.queue_buffer(&self.describe(pool, index))
    }
}

pub(crate) fn transfer_for(strategy: TransferStrategy) -> Box<dyn Transfer> {
    match strategy {
        TransferStrategy::Read => Box::new(ReadTransfer),
        TransferStrategy::Mmap => Box::new(MmapTransfer),
        TransferStrategy::UserPtr => Box::new(UserPtrTransfer),
    }
}

/// REQBUFS(count)，驱动一个都不给时视为内存不足
fn request(dev: &mut dyn CaptureDevice, memory: Memory, count: u32) -> Result<u32> {
    let granted = dev.request_buffers(memory, count).map_err(|e| {
        let reason = if e.kind() == io::ErrorKind::InvalidInput {
            format!("device does not support {} i/o", memory)
        } else {
            format!("VIDIOC_REQBUFS ({}) failed", memory)
        };
        CaptureError::allocation(reason, Some(e))
    })?;

    if granted == 0 {
        return Err(CaptureError::allocation("insufficient buffer memory", None));
    }
    if granted < count {
        tracing::warn!("Driver granted {} of {} requested buffers", granted, count);
    }
    Ok(granted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_matches_strategy() {
        for s in [
            TransferStrategy::Read,
            TransferStrategy::Mmap,
            TransferStrategy::UserPtr,
        ] {
            assert_eq!(transfer_for(s).strategy(), s);
        }
        assert_eq!(transfer_for(TransferStrategy::Read).memory(), None);
        assert_eq!(
            transfer_for(TransferStrategy::UserPtr).memory(),
            Some(Memory::UserPtr)
        );
    }
}
