use std::io;
use std::time::Duration;

use vcap_core::builder::TransferStrategy;
use vcap_core::error::{CaptureError, Result};
use vcap_core::traits::{CaptureDevice, DequeuedBuffer, Format, Memory, QueueBuffer};

use super::Transfer;
use crate::pool::{BufferPool, PageBuffer, Region};

/// read() I/O：单个缓冲区，没有驱动队列
#[derive(Debug)]
pub(crate) struct ReadTransfer;

impl Transfer for ReadTransfer {
    fn strategy(&self) -> TransferStrategy {
        TransferStrategy::Read
    }

    fn memory(&self) -> Option<Memory> {
        None
    }

    fn allocate(
        &mut self,
        _dev: &mut dyn CaptureDevice,
        format: &Format,
        _count: u32,
    ) -> Result<BufferPool> {
        let buf = PageBuffer::new(format.size_image as usize)
            .map_err(|e| CaptureError::allocation("Out of memory", Some(e)))?;
        Ok(BufferPool::new(TransferStrategy::Read, vec![Region::heap(buf)]))
    }

    fn describe(&self, _pool: &BufferPool, index: u32) -> QueueBuffer {
        // 不会被传给设备
        QueueBuffer::mmap(index)
    }

    /// 没有 stream-on，缓冲区在逻辑上交给设备
    fn start(&mut self, _dev: &mut dyn CaptureDevice, pool: &mut BufferPool) -> Result<()> {
        pool.mark_queued(0).map_err(CaptureError::StreamStart)
    }

    fn fetch(
        &mut self,
        dev: &mut dyn CaptureDevice,
        pool: &mut BufferPool,
    ) -> io::Result<DequeuedBuffer> {
        let dst = pool.slice_mut(0).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "read buffer is not available")
        })?;
        let n = dev.read_frame(dst)?;

        Ok(DequeuedBuffer {
            index: 0,
            bytes_used: n as u32,
            sequence: 0,
            timestamp: Duration::ZERO,
        })
    }

    fn requeue(
        &mut self,
        _dev: &mut dyn CaptureDevice,
        _pool: &BufferPool,
        _index: u32,
    ) -> io::Result<()> {
        Ok(())
    }
}
