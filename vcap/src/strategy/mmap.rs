use std::io;

use vcap_core::builder::TransferStrategy;
use vcap_core::error::{CaptureError, Result, TeardownFailure, TeardownStep};
use vcap_core::traits::{CaptureDevice, DequeuedBuffer, Format, Memory, QueueBuffer};

use super::{request, Transfer};
use crate::pool::{BufferPool, Region};

/// 内存映射 I/O：驱动分配，mmap 到进程
#[derive(Debug)]
pub(crate) struct MmapTransfer;

impl Transfer for MmapTransfer {
    fn strategy(&self) -> TransferStrategy {
        TransferStrategy::Mmap
    }

    fn memory(&self) -> Option<Memory> {
        Some(Memory::Mmap)
    }

    fn allocate(
        &mut self,
        dev: &mut dyn CaptureDevice,
        _format: &Format,
        count: u32,
    ) -> Result<BufferPool> {
        let granted = request(dev, Memory::Mmap, count)?;
        let mut regions: Vec<Region> = Vec::with_capacity(granted as usize);

        for index in 0..granted {
            let mapped = dev
                .query_buffer(index)
                .map_err(|e| ("VIDIOC_QUERYBUF", e))
                .and_then(|layout| {
                    dev.map_buffer(&layout)
                        .map(|ptr| Region::mapped(ptr, layout.length as usize))
                        .map_err(|e| ("mmap", e))
                });

            match mapped {
                Ok(region) => regions.push(region),
                Err((what, e)) => {
                    tracing::warn!("{} failed for buffer {}: {}", what, index, e);
                    // 撤销已经完成的映射
                    for region in regions.drain(..) {
                        let len = region.len();
                        if let Err(e) = unsafe { dev.unmap_buffer(region.as_ptr(), len) } {
                            tracing::error!("munmap during rollback failed: {}", e);
                        }
                    }
                    return Err(CaptureError::allocation(
                        format!("{} failed for buffer {}", what, index),
                        Some(e),
                    ));
                }
            }
        }

        Ok(BufferPool::new(TransferStrategy::Mmap, regions))
    }

    fn describe(&self, _pool: &BufferPool, index: u32) -> QueueBuffer {
        QueueBuffer::mmap(index)
    }

    fn free(&mut self, dev: &mut dyn CaptureDevice, pool: BufferPool) -> Vec<TeardownFailure> {
        let mut failures = Vec::new();
        for (index, region) in pool.into_regions() {
            let len = region.len();
            if let Err(e) = unsafe { dev.unmap_buffer(region.as_ptr(), len) } {
                failures.push(TeardownFailure::new(TeardownStep::FreeBuffer(index), e));
            }
        }
        failures
    }

    fn fetch(
        &mut self,
        dev: &mut dyn CaptureDevice,
        _pool: &mut BufferPool,
    ) -> io::Result<DequeuedBuffer> {
        dev.dequeue_buffer(Memory::Mmap)
    }
}
