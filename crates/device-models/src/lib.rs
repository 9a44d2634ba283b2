//! Device models fed by RSCP data.
//!
//! Every sub-device the storage exposes (the storage itself, wallboxes, the
//! SG Ready relay) is represented by a model that knows which tags identify it,
//! which tags to poll and how to consume the answers.

#![allow(dead_code)]

mod sg_ready;
mod storage;
mod wallbox;

use rscp_codec::{RscpValue, Tag};
use tracing::debug;
use types::DeviceState;

pub use sg_ready::{SgReadyRscpModel, SG_READY_GROUP_INDEX};
pub use storage::StorageRscpModel;
pub use wallbox::{WallboxRscpModel, MAX_WALLBOXES};

/// The handler capability shared by all device models.
pub trait RscpModel {
    /// Requests sent on every regular poll.
    fn rscp_tags(&self) -> Vec<RscpValue>;

    /// Requests for slowly changing data. When to send them is up to the caller.
    fn rscp_tags_slow(&self) -> Vec<RscpValue>;

    /// Consumes `value` if it belongs to this model. Returns `false` without
    /// touching any state otherwise.
    fn handle_rscp_data(&mut self, value: &RscpValue) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Storage,
    Wallbox,
    SgReady,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceModel {
    Storage(StorageRscpModel),
    Wallbox(WallboxRscpModel),
    SgReady(SgReadyRscpModel),
}

impl DeviceModel {
    /// Identification requests of all device kinds, in identification order.
    pub fn identification_tags() -> Vec<RscpValue> {
        let mut requests = StorageRscpModel::identification_tags();
        requests.extend(WallboxRscpModel::identification_tags());
        requests.extend(SgReadyRscpModel::identification_tags());
        requests
    }

    /// Classifies one received node. Storage is tried first, then wallbox,
    /// then SG Ready; the first match wins.
    pub fn identify(value: &RscpValue) -> Option<DeviceModel> {
        if let Some(storage) = StorageRscpModel::identify(value) {
            return Some(DeviceModel::Storage(storage));
        }
        if let Some(wallbox) = WallboxRscpModel::identify(value) {
            return Some(DeviceModel::Wallbox(wallbox));
        }
        SgReadyRscpModel::identify(value).map(DeviceModel::SgReady)
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceModel::Storage(_) => DeviceKind::Storage,
            DeviceModel::Wallbox(_) => DeviceKind::Wallbox,
            DeviceModel::SgReady(_) => DeviceKind::SgReady,
        }
    }

    pub fn as_storage(&self) -> Option<&StorageRscpModel> {
        match self {
            DeviceModel::Storage(storage) => Some(storage),
            _ => None,
        }
    }

    pub fn as_wallbox(&self) -> Option<&WallboxRscpModel> {
        match self {
            DeviceModel::Wallbox(wallbox) => Some(wallbox),
            _ => None,
        }
    }

    pub fn as_sg_ready(&self) -> Option<&SgReadyRscpModel> {
        match self {
            DeviceModel::SgReady(sg_ready) => Some(sg_ready),
            _ => None,
        }
    }
}

impl RscpModel for DeviceModel {
    fn rscp_tags(&self) -> Vec<RscpValue> {
        match self {
            DeviceModel::Storage(model) => model.rscp_tags(),
            DeviceModel::Wallbox(model) => model.rscp_tags(),
            DeviceModel::SgReady(model) => model.rscp_tags(),
        }
    }

    fn rscp_tags_slow(&self) -> Vec<RscpValue> {
        match self {
            DeviceModel::Storage(model) => model.rscp_tags_slow(),
            DeviceModel::Wallbox(model) => model.rscp_tags_slow(),
            DeviceModel::SgReady(model) => model.rscp_tags_slow(),
        }
    }

    fn handle_rscp_data(&mut self, value: &RscpValue) -> bool {
        match self {
            DeviceModel::Storage(model) => model.handle_rscp_data(value),
            DeviceModel::Wallbox(model) => model.handle_rscp_data(value),
            DeviceModel::SgReady(model) => model.handle_rscp_data(value),
        }
    }
}

/// Index child of a data container, e.g. `WB_INDEX` inside `WB_DATA`.
pub(crate) fn index_of(container: &RscpValue, index_tag: Tag) -> Option<u8> {
    container
        .child(index_tag)
        .and_then(|index| index.value.as_i64())
        .and_then(|index| u8::try_from(index).ok())
}

pub(crate) fn as_i32(value: &RscpValue) -> Option<i32> {
    value.value.as_i64().and_then(|v| i32::try_from(v).ok())
}

pub(crate) fn as_u8(value: &RscpValue) -> Option<u8> {
    value.value.as_i64().and_then(|v| u8::try_from(v).ok())
}

/// Stores an identity string unless one is already set.
pub(crate) fn set_identity(target: &mut Option<String>, value: &RscpValue) {
    let Some(received) = value.value.as_str() else {
        return;
    };
    if let Some(current) = target.as_deref() {
        if current != received {
            debug!(tag = %value.tag, %current, %received, "identity already set, ignoring new value");
        }
        return;
    }
    *target = Some(received.to_string());
}

/// Reads the `*_DEVICE_STATE` container of any namespace.
pub(crate) fn device_state(container: &RscpValue, tags: [Tag; 3]) -> DeviceState {
    let [connected, working, in_service] = tags;
    let flag = |tag| {
        container
            .child(tag)
            .and_then(|child| child.value.as_bool())
            .unwrap_or(false)
    };
    DeviceState {
        connected: flag(connected),
        working: flag(working),
        in_service: flag(in_service),
    }
}
