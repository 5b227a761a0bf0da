//! Transfer Tokens
//!
//! Cheap, cloneable completion handles for submitted transfer work. A token
//! shares a fence with the engine's submission record; the engine recycles
//! the fence only after every external clone is gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ash::vk;

use crate::errors::Result;

pub(crate) struct TokenState {
    fence: vk::Fence,
    device: ash::Device,
    completed: AtomicBool,
}

impl TokenState {
    pub(crate) fn new(fence: vk::Fence, device: ash::Device) -> Self {
        Self {
            fence,
            device,
            completed: AtomicBool::new(false),
        }
    }

    pub(crate) fn fence(&self) -> vk::Fence {
        self.fence
    }

    /// Marks the submission as retired so late waiters never touch the
    /// (possibly recycled) fence again.
    pub(crate) fn mark_complete(&self) {
        self.completed.store(true, Ordering::Release);
    }

    pub(crate) fn poll(&self) -> bool {
        if self.completed.load(Ordering::Acquire) {
            return true;
        }
        let signaled = unsafe { self.device.get_fence_status(self.fence) }.unwrap_or(false);
        if signaled {
            self.completed.store(true, Ordering::Release);
        }
        signaled
    }
}

/// Completion handle for a submitted transfer.
///
/// Tokens are cheap to clone; all clones observe the same completion state.
#[derive(Clone)]
pub struct TransferToken {
    state: Arc<TokenState>,
}

impl TransferToken {
    pub(crate) fn new(state: Arc<TokenState>) -> Self {
        Self { state }
    }

    /// Blocks until the submission completes.
    pub fn wait(&self) -> Result<()> {
        self.wait_timeout(u64::MAX).map(|_| ())
    }

    /// Blocks up to `timeout_ns`. Returns whether the submission completed;
    /// a device-level wait failure is an error.
    pub fn wait_timeout(&self, timeout_ns: u64) -> Result<bool> {
        if self.state.completed.load(Ordering::Acquire) {
            return Ok(true);
        }
        let fences = [self.state.fence];
        match unsafe { self.state.device.wait_for_fences(&fences, true, timeout_ns) } {
            Ok(()) => {
                self.state.mark_complete();
                Ok(true)
            }
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Non-blocking completion check.
    pub fn is_complete(&self) -> bool {
        self.state.poll()
    }
}
