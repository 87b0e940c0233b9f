use std::io;

use vcap_core::builder::TransferStrategy;
use vcap_core::error::{CaptureError, Result};
use vcap_core::traits::{CaptureDevice, DequeuedBuffer, Format, Memory, QueueBuffer};

use super::{request, Transfer};
use crate::pool::{BufferPool, PageBuffer, Region};

/// 用户指针 I/O：进程分配页对齐内存，驱动直接写入
#[derive(Debug)]
pub(crate) struct UserPtrTransfer;

impl Transfer for UserPtrTransfer {
    fn strategy(&self) -> TransferStrategy {
        TransferStrategy::UserPtr
    }

    fn memory(&self) -> Option<Memory> {
        Some(Memory::UserPtr)
    }

    fn allocate(
        &mut self,
        dev: &mut dyn CaptureDevice,
        format: &Format,
        count: u32,
    ) -> Result<BufferPool> {
        let granted = request(dev, Memory::UserPtr, count)?;
        let size = format.size_image as usize;

        // 中途失败时 regions 被 drop，已分配的块随之释放
        let regions = (0..granted)
            .map(|_| PageBuffer::new(size).map(Region::heap))
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| CaptureError::allocation("Out of memory", Some(e)))?;

        Ok(BufferPool::new(TransferStrategy::UserPtr, regions))
    }

    fn describe(&self, pool: &BufferPool, index: u32) -> QueueBuffer {
        match pool.region(index) {
            Some(region) => QueueBuffer::user(index, region.as_ptr(), region.len() as u32),
            // 越界的编号交给驱动去拒绝
            None => QueueBuffer {
                index,
                memory: Memory::UserPtr,
                userptr: 0,
                length: 0,
            },
        }
    }

    fn fetch(
        &mut self,
        dev: &mut dyn CaptureDevice,
        _pool: &mut BufferPool,
    ) -> io::Result<DequeuedBuffer> {
        dev.dequeue_buffer(Memory::UserPtr)
    }
}
