//! Device configuration surface.
//!
//! All parameters carry fixed default initializers and are validated once,
//! before any queue is spawned. The CLI/config layer that populates these
//! structs lives outside this crate.

use crate::error::{Error, Result};

/// Size in bytes of an opaque collective-communication id token.
pub const COLLECTIVE_ID_BYTES: usize = 128;

/// Sentinel rank resolved against [`DeviceParams::collective_default_rank`].
pub const CHANNEL_RANK_DEFAULT: i32 = -1;

/// Sentinel participant count resolved against
/// [`DeviceParams::collective_default_count`].
pub const CHANNEL_COUNT_DEFAULT: i32 = -1;

/// Opaque fixed-size token identifying a collective communicator group.
///
/// Produced by an external rendezvous mechanism and treated as a blob here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectiveId(pub [u8; COLLECTIVE_ID_BYTES]);

impl CollectiveId {
    /// An all-zero id is "unset" and must be replaced before channel creation.
    pub fn is_unset(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Default for CollectiveId {
    fn default() -> Self {
        Self([0u8; COLLECTIVE_ID_BYTES])
    }
}

/// How command buffers are recorded and executed on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandBufferMode {
    /// Command buffers are recorded once, finalized, and replayed.
    #[default]
    Graph,
    /// Command buffers are issued inline against a queue and are single-use.
    Stream,
}

/// Parameters configuring a [`crate::device::Device`].
///
/// Initialize with `DeviceParams::default()` and override fields before
/// passing to `Device::new`, which calls [`DeviceParams::validate`].
#[derive(Debug, Clone)]
pub struct DeviceParams {
    /// Number of queues exposed on the device. Each queue is a separate
    /// synchronization scope; cross-queue ordering requires semaphores.
    pub queue_count: usize,
    /// Block size of the per-queue transient arena used to stage dispatch
    /// arguments. Must be a power of two of at least 4 KiB.
    pub arena_block_size: usize,
    /// Default recording mode for command buffers created on this device.
    pub command_buffer_mode: CommandBufferMode,
    /// Allow executing eligible stream command buffers on the submitting
    /// thread. Only buffers recorded with the inline-eligible flag use this.
    pub allow_inline_execution: bool,
    /// Emit per-submission trace events through the `log` facade.
    pub stream_tracing: bool,
    /// Collective id used when channel creation passes an unset id.
    pub collective_default_id: CollectiveId,
    /// Rank substituted when channel creation passes `CHANNEL_RANK_DEFAULT`.
    pub collective_default_rank: i32,
    /// Count substituted when channel creation passes `CHANNEL_COUNT_DEFAULT`.
    pub collective_default_count: i32,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            queue_count: 1,
            arena_block_size: 32 * 1024,
            command_buffer_mode: CommandBufferMode::Graph,
            allow_inline_execution: false,
            stream_tracing: false,
            collective_default_id: CollectiveId::default(),
            collective_default_rank: 0,
            collective_default_count: 1,
        }
    }
}

impl DeviceParams {
    pub fn validate(&self) -> Result<()> {
        if self.queue_count == 0 {
            return Err(Error::InvalidArgument("queue_count must be > 0".into()));
        }
        if self.arena_block_size < 4096 || !self.arena_block_size.is_power_of_two() {
            return Err(Error::InvalidArgument(format!(
                "arena_block_size {} must be a power of two >= 4096",
                self.arena_block_size
            )));
        }
        if self.collective_default_count < 1 {
            return Err(Error::InvalidArgument(format!(
                "collective_default_count {} must be >= 1",
                self.collective_default_count
            )));
        }
        if self.collective_default_rank < 0
            || self.collective_default_rank >= self.collective_default_count
        {
            return Err(Error::InvalidArgument(format!(
                "collective_default_rank {} out of range for count {}",
                self.collective_default_rank, self.collective_default_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(DeviceParams::default().validate().is_ok());
    }

    #[test]
    fn zero_queues_rejected() {
        let params = DeviceParams {
            queue_count: 0,
            ..DeviceParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn arena_block_size_must_be_po2() {
        let params = DeviceParams {
            arena_block_size: 5000,
            ..DeviceParams::default()
        };
        assert!(params.validate().is_err());
        let params = DeviceParams {
            arena_block_size: 2048,
            ..DeviceParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn rank_must_fit_count() {
        let params = DeviceParams {
            collective_default_rank: 2,
            collective_default_count: 2,
            ..DeviceParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn unset_collective_id() {
        assert!(CollectiveId::default().is_unset());
        let mut id = CollectiveId::default();
        id.0[7] = 1;
        assert!(!id.is_unset());
    }
}
