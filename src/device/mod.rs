//! Device execution model: queues, command buffers, semaphores, channels.
//!
//! A device exposes N independent queues configured by
//! [`crate::config::DeviceParams`]. Work is recorded into command buffers
//! (replayable graphs or single-use streams), submitted to a queue, and
//! ordered across queues exclusively through timeline semaphores. This CPU
//! backend executes on worker threads; GPU backends map the same recording
//! and submission surface onto native graph/stream APIs behind the driver
//! boundary.

mod channel;
mod command_buffer;
mod queue;
mod semaphore;

pub use channel::Channel;
pub use command_buffer::{CommandBuffer, CommandBufferState, DeviceBuffer};
pub use queue::{Queue, SemaphoreValue};
pub use semaphore::Semaphore;

use crate::config::{CollectiveId, DeviceParams};
use crate::error::{Error, Result};

/// A logical execution context: validated parameters plus its queues.
#[derive(Debug)]
pub struct Device {
    params: DeviceParams,
    queues: Vec<Queue>,
}

impl Device {
    /// Validates `params` and spawns the configured queues.
    pub fn new(params: DeviceParams) -> Result<Self> {
        params.validate()?;
        let mut queues = Vec::with_capacity(params.queue_count);
        for index in 0..params.queue_count {
            queues.push(Queue::spawn(
                index,
                params.arena_block_size,
                params.allow_inline_execution,
                params.stream_tracing,
            )?);
        }
        log::debug!("device up: {} queues", queues.len());
        Ok(Self { params, queues })
    }

    pub fn params(&self) -> &DeviceParams {
        &self.params
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn queue(&self, index: usize) -> Result<&Queue> {
        self.queues
            .get(index)
            .ok_or_else(|| Error::NotFound(format!("queue {index} of {}", self.queues.len())))
    }

    /// Creates a collective channel, resolving rank/count sentinels and an
    /// unset id against the device defaults.
    pub fn create_channel(
        &self,
        id: Option<CollectiveId>,
        rank: i32,
        count: i32,
    ) -> Result<Channel> {
        Channel::create(&self.params, id, rank, count)
    }
}
