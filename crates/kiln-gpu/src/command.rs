//! Command recording sessions.
//!
//! A [`CommandSession`] owns a command pool, a fence and a fixed set of
//! primary command buffers. Every submission is synchronous: `submit` returns
//! only after the GPU has finished the batch, with the fence reset and the
//! buffers ready to record again.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::sync::{self, FENCE_TIMEOUT_NS};
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

/// Device operations a command session needs.
///
/// Every method forwards to a Vulkan device, so callers uphold the usual
/// validity rules for each handle passed in.
pub trait CommandDevice: Sync {
    unsafe fn create_fence(&self, flags: vk::FenceCreateFlags) -> VkResult<vk::Fence>;
    unsafe fn destroy_fence(&self, fence: vk::Fence);
    unsafe fn create_command_pool(
        &self,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool>;
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);
    unsafe fn allocate_primary_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    unsafe fn begin_buffer(
        &self,
        buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()>;
    unsafe fn end_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()>;
    unsafe fn release_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()>;
    unsafe fn submit(
        &self,
        queue: vk::Queue,
        buffers: &[vk::CommandBuffer],
        fence: vk::Fence,
    ) -> VkResult<()>;
    unsafe fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;
    unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
}

impl CommandDevice for DeviceContext {
    unsafe fn create_fence(&self, flags: vk::FenceCreateFlags) -> VkResult<vk::Fence> {
        sync::create_fence(self.device(), flags)
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        self.device().destroy_fence(fence, None);
    }

    unsafe fn create_command_pool(
        &self,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);
        self.device().create_command_pool(&create_info, None)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.device().destroy_command_pool(pool, None);
    }

    unsafe fn allocate_primary_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        self.device().allocate_command_buffers(&alloc_info)
    }

    unsafe fn begin_buffer(
        &self,
        buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        self.device().begin_command_buffer(buffer, &begin_info)
    }

    unsafe fn end_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
        self.device().end_command_buffer(buffer)
    }

    unsafe fn release_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
        self.device()
            .reset_command_buffer(buffer, vk::CommandBufferResetFlags::RELEASE_RESOURCES)
    }

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    unsafe fn submit(
        &self,
        queue: vk::Queue,
        buffers: &[vk::CommandBuffer],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let submit_info = vk::SubmitInfo::default().command_buffers(buffers);
        self.device().queue_submit(queue, &[submit_info], fence)
    }

    unsafe fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        sync::wait_for_fence(self.device(), fence, timeout_ns)
    }

    unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        sync::reset_fence(self.device(), fence)
    }
}

/// Where the session fence is in its submit/wait/reset cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    /// Submitted work has not been waited on yet.
    Pending,
    /// Waited on or created signaled, and not yet reset.
    Signaled,
}

/// A command pool, its buffers and the fence guarding their reuse.
pub struct CommandSession<D: CommandDevice = DeviceContext> {
    device: Arc<D>,
    queue: vk::Queue,
    pool: vk::CommandPool,
    fence: vk::Fence,
    fence_state: FenceState,
    buffers: Vec<vk::CommandBuffer>,
}

impl<D: CommandDevice> CommandSession<D> {
    /// Create the fence and pool, then allocate `buffer_count` primary buffers.
    ///
    /// Fence and pool creation run concurrently and are both joined before
    /// allocation starts. Anything created before a failure is released.
    pub fn new(
        device: Arc<D>,
        queue_family: u32,
        queue: vk::Queue,
        buffer_count: u32,
        fence_flags: vk::FenceCreateFlags,
    ) -> Result<Self> {
        let raw: &D = &device;
        let (pool, fence) = rayon::join(
            || unsafe {
                raw.create_command_pool(
                    queue_family,
                    vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                )
            },
            || unsafe { raw.create_fence(fence_flags) },
        );

        let (pool, fence) = match (pool, fence) {
            (Ok(pool), Ok(fence)) => (pool, fence),
            (Err(e), fence) => {
                if let Ok(fence) = fence {
                    unsafe { device.destroy_fence(fence) };
                }
                return Err(GpuError::CommandPoolCreationFailed(e));
            }
            (Ok(pool), Err(e)) => {
                unsafe { device.destroy_command_pool(pool) };
                return Err(GpuError::FenceCreationFailed(e));
            }
        };

        let buffers = if buffer_count == 0 {
            Vec::new()
        } else {
            match unsafe { device.allocate_primary_buffers(pool, buffer_count) } {
                Ok(buffers) => buffers,
                Err(e) => {
                    unsafe {
                        device.destroy_command_pool(pool);
                        device.destroy_fence(fence);
                    }
                    return Err(GpuError::BufferAllocationFailed(e));
                }
            }
        };

        tracing::debug!(
            queue_family,
            buffers = buffers.len(),
            "Command session created"
        );

        Ok(Self {
            device,
            queue,
            pool,
            fence,
            fence_state: if fence_flags.contains(vk::FenceCreateFlags::SIGNALED) {
                FenceState::Signaled
            } else {
                FenceState::Unsignaled
            },
            buffers,
        })
    }

    /// Command buffers owned by this session, in allocation order.
    pub fn buffers(&self) -> &[vk::CommandBuffer] {
        &self.buffers
    }

    /// Get one command buffer by index.
    pub fn buffer(&self, index: usize) -> Option<vk::CommandBuffer> {
        self.buffers.get(index).copied()
    }

    /// Get the raw pool handle.
    pub fn pool(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the raw fence handle.
    pub fn fence(&self) -> vk::Fence {
        self.fence
    }

    /// Start a single-use recording. Pair with exactly one [`end`](Self::end).
    ///
    /// # Safety
    /// `buffer` must belong to this session and not be recording or pending.
    pub unsafe fn begin(&self, buffer: vk::CommandBuffer) -> Result<()> {
        self.device
            .begin_buffer(buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        Ok(())
    }

    /// Finish recording; the buffer becomes submittable.
    ///
    /// # Safety
    /// `buffer` must belong to this session and be recording.
    pub unsafe fn end(&self, buffer: vk::CommandBuffer) -> Result<()> {
        self.device.end_buffer(buffer)?;
        Ok(())
    }

    /// Submit `buffers` as one batch and block until the GPU has finished it.
    ///
    /// On return the fence is reset and the submitted buffers are back in the
    /// initial state with their memory returned to the pool. If an earlier
    /// wait failed, that submission is waited on before anything is reset.
    /// A failed buffer release does not stop the remaining releases; the
    /// first failure is returned.
    ///
    /// # Safety
    /// Every buffer must belong to this session and be executable, and every
    /// resource the recorded commands touch must stay alive until return.
    pub unsafe fn submit(&mut self, buffers: &[vk::CommandBuffer]) -> Result<()> {
        match self.fence_state {
            FenceState::Unsignaled => {}
            FenceState::Signaled => {
                self.device.reset_fence(self.fence)?;
                self.fence_state = FenceState::Unsignaled;
            }
            FenceState::Pending => self.signal()?,
        }

        self.device.submit(self.queue, buffers, self.fence)?;
        self.fence_state = FenceState::Pending;
        self.signal()?;

        let mut first_error = None;
        for &buffer in buffers {
            if let Err(e) = self.device.release_buffer(buffer) {
                tracing::warn!("Command buffer release failed: {e}");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Block until the fence signals, then reset it.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn signal(&mut self) -> Result<()> {
        unsafe {
            self.device.wait_for_fence(self.fence, FENCE_TIMEOUT_NS)?;
            self.fence_state = FenceState::Signaled;
            self.device.reset_fence(self.fence)?;
        }
        self.fence_state = FenceState::Unsignaled;
        Ok(())
    }
}

impl<D: CommandDevice> Drop for CommandSession<D> {
    fn drop(&mut self) {
        // Destroying the pool frees every buffer still allocated from it
        unsafe {
            self.device.destroy_command_pool(self.pool);
            self.device.destroy_fence(self.fence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum BufferState {
        Initial,
        Recording,
        Executable,
        Pending,
    }

    #[derive(Default)]
    struct FakeState {
        next_handle: u64,
        fences: HashMap<u64, bool>,
        pools: Vec<u64>,
        buffers: HashMap<u64, BufferState>,
        submissions: Vec<Vec<u64>>,
        waits: usize,
        resets: usize,
        /// Number of upcoming waits that fail.
        fail_waits: usize,
        fail_release: Option<u64>,
    }

    /// Completes every submission instantly.
    #[derive(Default)]
    struct FakeDevice {
        state: Mutex<FakeState>,
        fail_pool: bool,
        fail_fence: bool,
        fail_allocation: bool,
    }

    impl FakeState {
        fn handle(&mut self) -> u64 {
            self.next_handle += 1;
            self.next_handle
        }
    }

    impl CommandDevice for FakeDevice {
        unsafe fn create_fence(&self, flags: vk::FenceCreateFlags) -> VkResult<vk::Fence> {
            if self.fail_fence {
                return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            let mut state = self.state.lock();
            let handle = state.handle();
            state
                .fences
                .insert(handle, flags.contains(vk::FenceCreateFlags::SIGNALED));
            Ok(vk::Fence::from_raw(handle))
        }

        unsafe fn destroy_fence(&self, fence: vk::Fence) {
            self.state.lock().fences.remove(&fence.as_raw());
        }

        unsafe fn create_command_pool(
            &self,
            _queue_family: u32,
            flags: vk::CommandPoolCreateFlags,
        ) -> VkResult<vk::CommandPool> {
            assert!(flags.contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER));
            if self.fail_pool {
                return Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
            }
            let mut state = self.state.lock();
            let handle = state.handle();
            state.pools.push(handle);
            Ok(vk::CommandPool::from_raw(handle))
        }

        unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
            let mut state = self.state.lock();
            state.pools.retain(|&p| p != pool.as_raw());
            state.buffers.clear();
        }

        unsafe fn allocate_primary_buffers(
            &self,
            _pool: vk::CommandPool,
            count: u32,
        ) -> VkResult<Vec<vk::CommandBuffer>> {
            if self.fail_allocation {
                return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            let mut state = self.state.lock();
            Ok((0..count)
                .map(|_| {
                    let handle = state.handle();
                    state.buffers.insert(handle, BufferState::Initial);
                    vk::CommandBuffer::from_raw(handle)
                })
                .collect())
        }

        unsafe fn begin_buffer(
            &self,
            buffer: vk::CommandBuffer,
            flags: vk::CommandBufferUsageFlags,
        ) -> VkResult<()> {
            assert_eq!(flags, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            let mut state = self.state.lock();
            let slot = state.buffers.get_mut(&buffer.as_raw()).unwrap();
            assert_eq!(*slot, BufferState::Initial);
            *slot = BufferState::Recording;
            Ok(())
        }

        unsafe fn end_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
            let mut state = self.state.lock();
            let slot = state.buffers.get_mut(&buffer.as_raw()).unwrap();
            assert_eq!(*slot, BufferState::Recording);
            *slot = BufferState::Executable;
            Ok(())
        }

        unsafe fn release_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
            let mut state = self.state.lock();
            let fail = state.fail_release == Some(buffer.as_raw());
            let slot = state.buffers.get_mut(&buffer.as_raw()).unwrap();
            assert_ne!(*slot, BufferState::Pending, "buffer reset while pending");
            if fail {
                return Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
            }
            *slot = BufferState::Initial;
            Ok(())
        }

        unsafe fn submit(
            &self,
            _queue: vk::Queue,
            buffers: &[vk::CommandBuffer],
            fence: vk::Fence,
        ) -> VkResult<()> {
            let mut state = self.state.lock();
            assert_eq!(
                state.fences.get(&fence.as_raw()),
                Some(&false),
                "submitted with a signaled fence"
            );
            for buffer in buffers {
                let slot = state.buffers.get_mut(&buffer.as_raw()).unwrap();
                assert_eq!(*slot, BufferState::Executable);
                *slot = BufferState::Pending;
            }
            state
                .submissions
                .push(buffers.iter().map(|b| b.as_raw()).collect());
            state.fences.insert(fence.as_raw(), true);
            Ok(())
        }

        unsafe fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
            assert_eq!(timeout_ns, u64::MAX);
            let mut state = self.state.lock();
            if state.fail_waits > 0 {
                state.fail_waits -= 1;
                return Err(vk::Result::ERROR_DEVICE_LOST);
            }
            assert_eq!(
                state.fences.get(&fence.as_raw()),
                Some(&true),
                "wait would never return"
            );
            // Work behind a signaled fence is complete
            for slot in state.buffers.values_mut() {
                if *slot == BufferState::Pending {
                    *slot = BufferState::Executable;
                }
            }
            state.waits += 1;
            Ok(())
        }

        unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
            let mut state = self.state.lock();
            assert!(
                state.buffers.values().all(|s| *s != BufferState::Pending),
                "fence reset while work is pending"
            );
            state.fences.insert(fence.as_raw(), false);
            state.resets += 1;
            Ok(())
        }
    }

    fn session(device: &Arc<FakeDevice>, count: u32) -> CommandSession<FakeDevice> {
        CommandSession::new(
            device.clone(),
            0,
            vk::Queue::null(),
            count,
            vk::FenceCreateFlags::empty(),
        )
        .unwrap()
    }

    unsafe fn record(session: &CommandSession<FakeDevice>, buffer: vk::CommandBuffer) {
        session.begin(buffer).unwrap();
        session.end(buffer).unwrap();
    }

    #[test]
    fn construction_creates_fence_pool_and_buffers() {
        let device = Arc::new(FakeDevice::default());
        let session = session(&device, 3);

        assert_eq!(session.buffers().len(), 3);
        let state = device.state.lock();
        assert_eq!(state.pools, vec![session.pool().as_raw()]);
        assert_eq!(state.fences.get(&session.fence().as_raw()), Some(&false));
        assert_eq!(state.buffers.len(), 3);
    }

    #[test]
    fn drop_releases_pool_and_fence() {
        let device = Arc::new(FakeDevice::default());
        drop(session(&device, 2));

        let state = device.state.lock();
        assert!(state.pools.is_empty());
        assert!(state.fences.is_empty());
        assert!(state.buffers.is_empty());
    }

    #[test]
    fn submit_leaves_fence_reset_and_buffers_reusable() {
        let device = Arc::new(FakeDevice::default());
        let mut session = session(&device, 2);
        let buffers = session.buffers().to_vec();

        unsafe {
            for &buffer in &buffers {
                record(&session, buffer);
            }
            session.submit(&buffers).unwrap();
        }

        {
            let state = device.state.lock();
            assert_eq!(state.fences.get(&session.fence().as_raw()), Some(&false));
            assert!(state.buffers.values().all(|s| *s == BufferState::Initial));
            assert_eq!(state.submissions.len(), 1);
            assert_eq!(state.submissions[0].len(), 2);
            assert_eq!(state.waits, 1);
        }

        // Same buffers record and submit again without reallocation
        unsafe {
            record(&session, buffers[0]);
            session.submit(&buffers[..1]).unwrap();
        }
        let state = device.state.lock();
        assert_eq!(state.submissions.len(), 2);
        assert_eq!(state.submissions[1], vec![buffers[0].as_raw()]);
        assert_eq!(session.buffers(), buffers.as_slice());
    }

    #[test]
    fn signaled_fence_reset_before_first_submit() {
        let device = Arc::new(FakeDevice::default());
        let mut session = CommandSession::new(
            device.clone(),
            0,
            vk::Queue::null(),
            1,
            vk::FenceCreateFlags::SIGNALED,
        )
        .unwrap();
        let buffer = session.buffer(0).unwrap();

        unsafe {
            record(&session, buffer);
            session.submit(&[buffer]).unwrap();
        }

        let state = device.state.lock();
        assert_eq!(state.fences.get(&session.fence().as_raw()), Some(&false));
        assert_eq!(state.resets, 2);
    }

    #[test]
    fn failed_wait_is_retried_before_next_submit() {
        let device = Arc::new(FakeDevice::default());
        let mut session = session(&device, 1);
        let buffer = session.buffer(0).unwrap();
        device.state.lock().fail_waits = 1;

        unsafe {
            record(&session, buffer);
            assert!(matches!(
                session.submit(&[buffer]),
                Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
            ));
        }
        {
            let state = device.state.lock();
            assert_eq!(state.resets, 0);
            assert_eq!(state.buffers[&buffer.as_raw()], BufferState::Pending);
        }

        // The earlier batch is waited on, so the buffer is executable again
        unsafe {
            session.submit(&[buffer]).unwrap();
        }

        let state = device.state.lock();
        assert_eq!(state.submissions.len(), 2);
        assert_eq!(state.waits, 2);
        assert_eq!(state.resets, 2);
        assert_eq!(state.fences.get(&session.fence().as_raw()), Some(&false));
        assert_eq!(state.buffers[&buffer.as_raw()], BufferState::Initial);
    }

    #[test]
    fn failed_release_still_releases_remaining_buffers() {
        let device = Arc::new(FakeDevice::default());
        let mut session = session(&device, 3);
        let buffers = session.buffers().to_vec();
        device.state.lock().fail_release = Some(buffers[1].as_raw());

        let result = unsafe {
            for &buffer in &buffers {
                record(&session, buffer);
            }
            session.submit(&buffers)
        };

        assert!(matches!(
            result,
            Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY))
        ));
        let state = device.state.lock();
        assert_eq!(state.buffers[&buffers[0].as_raw()], BufferState::Initial);
        assert_eq!(state.buffers[&buffers[1].as_raw()], BufferState::Executable);
        assert_eq!(state.buffers[&buffers[2].as_raw()], BufferState::Initial);
        assert_eq!(state.fences.get(&session.fence().as_raw()), Some(&false));
    }

    #[test]
    fn signal_waits_then_resets() {
        let device = Arc::new(FakeDevice::default());
        let mut session = CommandSession::new(
            device.clone(),
            0,
            vk::Queue::null(),
            0,
            vk::FenceCreateFlags::SIGNALED,
        )
        .unwrap();
        assert!(session.buffers().is_empty());

        session.signal().unwrap();

        let state = device.state.lock();
        assert_eq!(state.waits, 1);
        assert_eq!(state.resets, 1);
        assert_eq!(state.fences.get(&session.fence().as_raw()), Some(&false));
    }

    #[test]
    fn pool_failure_releases_fence() {
        let device = Arc::new(FakeDevice {
            fail_pool: true,
            ..Default::default()
        });
        let result = CommandSession::new(
            device.clone(),
            0,
            vk::Queue::null(),
            1,
            vk::FenceCreateFlags::empty(),
        );

        assert!(matches!(
            result,
            Err(GpuError::CommandPoolCreationFailed(
                vk::Result::ERROR_OUT_OF_HOST_MEMORY
            ))
        ));
        assert!(device.state.lock().fences.is_empty());
    }

    #[test]
    fn fence_failure_releases_pool() {
        let device = Arc::new(FakeDevice {
            fail_fence: true,
            ..Default::default()
        });
        let result = CommandSession::new(
            device.clone(),
            0,
            vk::Queue::null(),
            1,
            vk::FenceCreateFlags::empty(),
        );

        assert!(matches!(result, Err(GpuError::FenceCreationFailed(_))));
        assert!(device.state.lock().pools.is_empty());
    }

    #[test]
    fn allocation_failure_releases_everything() {
        let device = Arc::new(FakeDevice {
            fail_allocation: true,
            ..Default::default()
        });
        let result = CommandSession::new(
            device.clone(),
            0,
            vk::Queue::null(),
            4,
            vk::FenceCreateFlags::empty(),
        );

        assert!(matches!(result, Err(GpuError::BufferAllocationFailed(_))));
        let state = device.state.lock();
        assert!(state.pools.is_empty());
        assert!(state.fences.is_empty());
    }
}
