//! Blocking one-shot transfers through staging buffers.
//!
//! [`UploadContext`] records a single command buffer, submits it to the
//! graphics queue (every graphics queue supports transfers) and blocks on a
//! fence until it retires. Used at load time only, never inside the frame
//! loop.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::buffer::{Buffer, BufferUsage};
use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::sync::Fence;

pub struct UploadContext {
    device: Arc<Device>,
    pool: CommandPool,
    fence: Fence,
}

impl UploadContext {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let pool = CommandPool::new_transient(device.clone(), device.graphics_family())?;
        let fence = Fence::new(device.clone(), false)?;
        Ok(Self {
            device,
            pool,
            fence,
        })
    }

    /// Records commands with `record`, submits them and waits for completion.
    ///
    /// The command buffer is freed whether recording succeeds or not.
    pub fn submit<F>(&self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer) -> RhiResult<()>,
    {
        let mut buffers = self.pool.allocate_command_buffers(1)?;
        let Some(cmd) = buffers.pop() else {
            return Err(RhiError::InvalidHandle(
                "no upload command buffer allocated".to_string(),
            ));
        };

        let result = self.record_and_wait(&cmd, record);
        self.pool.free(&[cmd]);
        result
    }

    fn record_and_wait<F>(&self, cmd: &CommandBuffer, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer) -> RhiResult<()>,
    {
        cmd.begin()?;
        record(cmd)?;
        cmd.end()?;

        let command_buffers = [cmd.handle()];
        let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);

        unsafe { self.device.submit_graphics(&[submit], self.fence.handle())? };
        self.fence.wait(u64::MAX)?;
        self.fence.reset()
    }

    /// Copies `data` into `dst` through a temporary staging buffer.
    ///
    /// Returns once the copy has completed on the GPU; the staging buffer is
    /// destroyed before returning.
    pub fn upload_to_buffer(&self, dst: &Buffer, data: &[u8]) -> RhiResult<()> {
        if data.len() as vk::DeviceSize > dst.size() {
            return Err(RhiError::InvalidSize(format!(
                "Upload of {} bytes exceeds destination of {} bytes",
                data.len(),
                dst.size()
            )));
        }

        let staging = Buffer::new_with_data(self.device.clone(), BufferUsage::Staging, data)?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: data.len() as vk::DeviceSize,
        };

        self.submit(|cmd| {
            cmd.copy_buffer(staging.handle(), dst.handle(), &[region]);
            Ok(())
        })?;

        debug!("Uploaded {} bytes via staging", data.len());
        Ok(())
    }

    /// Creates a device-local buffer holding `data`.
    pub fn create_device_local(&self, usage: BufferUsage, data: &[u8]) -> RhiResult<Buffer> {
        let buffer = Buffer::new(self.device.clone(), usage, data.len() as vk::DeviceSize)?;
        self.upload_to_buffer(&buffer, data)?;
        Ok(buffer)
    }

    /// Copies the first `len` bytes of `src` back to the host through a
    /// readback buffer. Meant for verification, not for per-frame use.
    pub fn read_buffer(&self, src: &Buffer, len: usize) -> RhiResult<Vec<u8>> {
        let readback = Buffer::new(
            self.device.clone(),
            BufferUsage::Readback,
            len as vk::DeviceSize,
        )?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: len as vk::DeviceSize,
        };

        self.submit(|cmd| {
            cmd.copy_buffer(src.handle(), readback.handle(), &[region]);
            Ok(())
        })?;

        readback.read_data(0, len)
    }
}
