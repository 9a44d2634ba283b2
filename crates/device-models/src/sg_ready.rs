use rscp_codec::{RscpValue, Tag, Value};
use tracing::debug;
use types::SgReadyData;

use crate::{as_u8, index_of, RscpModel};

/// SG Ready is addressed as a group, not by device index.
pub const SG_READY_GROUP_INDEX: u8 = 0xFF;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SgReadyRscpModel {
    model: SgReadyData,
}

impl SgReadyRscpModel {
    pub fn model(&self) -> &SgReadyData {
        &self.model
    }

    pub fn identification_tags() -> Vec<RscpValue> {
        vec![RscpValue::container(
            Tag::SGR_REQ_DATA,
            vec![
                RscpValue::new(Tag::SGR_INDEX, Value::UChar8(SG_READY_GROUP_INDEX)),
                RscpValue::request(Tag::SGR_REQ_STATE),
            ],
        )]
    }

    pub fn identify(value: &RscpValue) -> Option<Self> {
        if value.tag != Tag::SGR_DATA || index_of(value, Tag::SGR_INDEX) != Some(SG_READY_GROUP_INDEX) {
            return None;
        }
        let mut sg_ready = Self::default();
        sg_ready.handle_rscp_data(value);
        Some(sg_ready)
    }
}

impl RscpModel for SgReadyRscpModel {
    fn rscp_tags(&self) -> Vec<RscpValue> {
        Self::identification_tags()
    }

    fn rscp_tags_slow(&self) -> Vec<RscpValue> {
        Vec::new()
    }

    fn handle_rscp_data(&mut self, value: &RscpValue) -> bool {
        if value.tag != Tag::SGR_DATA || index_of(value, Tag::SGR_INDEX) != Some(SG_READY_GROUP_INDEX) {
            return false;
        }
        match value.child(Tag::SGR_STATE) {
            Some(state) if state.value.is_error() => {
                debug!(answer = %state, "SG Ready state not available");
            }
            Some(state) => self.model.state = as_u8(state),
            None => {}
        }
        true
    }
}
