//! Collective-communication channel descriptors.
//!
//! A channel describes one participant of a communicator group: the opaque
//! group id plus this participant's rank and the total count. The actual
//! transport lives behind the driver boundary; this layer only resolves
//! defaults and validates the group shape.

use crate::config::{CollectiveId, DeviceParams, CHANNEL_COUNT_DEFAULT, CHANNEL_RANK_DEFAULT};
use crate::error::{Error, Result};

/// One resolved participant of a communicator group.
#[derive(Debug, Clone)]
pub struct Channel {
    id: CollectiveId,
    rank: usize,
    count: usize,
}

impl Channel {
    /// Resolves `rank`/`count` sentinels and an unset id against the device
    /// defaults, then validates the group shape.
    pub(crate) fn create(
        params: &DeviceParams,
        id: Option<CollectiveId>,
        rank: i32,
        count: i32,
    ) -> Result<Self> {
        let id = match id {
            Some(id) if !id.is_unset() => id,
            _ => params.collective_default_id,
        };
        if id.is_unset() {
            return Err(Error::InvalidArgument(
                "no collective id provided and no device default configured".into(),
            ));
        }
        let rank = if rank == CHANNEL_RANK_DEFAULT {
            params.collective_default_rank
        } else {
            rank
        };
        let count = if count == CHANNEL_COUNT_DEFAULT {
            params.collective_default_count
        } else {
            count
        };
        if count < 1 {
            return Err(Error::InvalidArgument(format!(
                "channel count {count} must be >= 1"
            )));
        }
        if rank < 0 || rank >= count {
            return Err(Error::InvalidArgument(format!(
                "channel rank {rank} out of range for count {count}"
            )));
        }
        Ok(Self {
            id,
            rank: rank as usize,
            count: count as usize,
        })
    }

    pub fn id(&self) -> &CollectiveId {
        &self.id
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_with_default_id() -> DeviceParams {
        let mut params = DeviceParams::default();
        params.collective_default_id.0[0] = 0xCD;
        params.collective_default_rank = 1;
        params.collective_default_count = 4;
        params
    }

    #[test]
    fn sentinels_resolve_to_defaults() {
        let params = params_with_default_id();
        let ch = Channel::create(&params, None, CHANNEL_RANK_DEFAULT, CHANNEL_COUNT_DEFAULT)
            .unwrap();
        assert_eq!(ch.rank(), 1);
        assert_eq!(ch.count(), 4);
        assert_eq!(ch.id().0[0], 0xCD);
    }

    #[test]
    fn explicit_values_win() {
        let params = params_with_default_id();
        let mut id = CollectiveId::default();
        id.0[1] = 0xEE;
        let ch = Channel::create(&params, Some(id), 2, 3).unwrap();
        assert_eq!(ch.rank(), 2);
        assert_eq!(ch.count(), 3);
        assert_eq!(ch.id().0[1], 0xEE);
    }

    #[test]
    fn unset_id_without_default_rejected() {
        let params = DeviceParams::default();
        assert!(matches!(
            Channel::create(&params, None, 0, 1),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn rank_out_of_range_rejected() {
        let params = params_with_default_id();
        assert!(Channel::create(&params, None, 4, 4).is_err());
        assert!(Channel::create(&params, None, -2, 4).is_err());
    }
}
