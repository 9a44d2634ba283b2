use std::future::Future;

use rscp_codec::{RscpValue, Tag, Value};
use tracing::{debug, info};
use types::WallboxData;

use crate::{as_i32, as_u8, device_state, index_of, set_identity, RscpModel};

/// Wallbox indices asked for during identification.
pub const MAX_WALLBOXES: u8 = 8;

// Extern data layout: byte 2 holds the status flags.
const EXTERN_STATUS_BYTE: usize = 2;
const STATUS_SUN_MODE: u8 = 0x80;
const STATUS_CHARGING: u8 = 0x20;
const STATUS_CONNECTED: u8 = 0x08;

const EXTERN_DATA_LEN: u8 = 6;
const MODE_SUN: u8 = 1;
const MODE_MIXED: u8 = 2;

const WB_STATE_TAGS: [Tag; 3] = [
    Tag::WB_DEVICE_CONNECTED,
    Tag::WB_DEVICE_WORKING,
    Tag::WB_DEVICE_IN_SERVICE,
];

#[derive(Debug, Clone, PartialEq)]
pub struct WallboxRscpModel {
    model: WallboxData,
}

impl WallboxRscpModel {
    pub fn new(index: u8) -> Self {
        Self {
            model: WallboxData {
                index,
                ..WallboxData::default()
            },
        }
    }

    pub fn index(&self) -> u8 {
        self.model.index
    }

    pub fn model(&self) -> &WallboxData {
        &self.model
    }

    /// One `WB_REQ_DATA` per possible wallbox index asking for its identity.
    pub fn identification_tags() -> Vec<RscpValue> {
        (0..MAX_WALLBOXES)
            .map(|index| {
                RscpValue::container(
                    Tag::WB_REQ_DATA,
                    vec![
                        RscpValue::new(Tag::WB_INDEX, Value::UChar8(index)),
                        RscpValue::request(Tag::WB_REQ_DEVICE_NAME),
                        RscpValue::request(Tag::WB_REQ_SERIAL_NUMBER),
                        RscpValue::request(Tag::WB_REQ_FIRMWARE_VERSION),
                    ],
                )
            })
            .collect()
    }

    /// A wallbox exists when the storage answers its index with a device name;
    /// absent wallboxes come back with an error node instead.
    pub fn identify(value: &RscpValue) -> Option<Self> {
        if value.tag != Tag::WB_DATA {
            return None;
        }
        let index = index_of(value, Tag::WB_INDEX)?;
        value.child(Tag::WB_DEVICE_NAME)?.value.as_str()?;

        let mut wallbox = Self::new(index);
        wallbox.handle_rscp_data(value);
        Some(wallbox)
    }

    /// Command toggling sun-only charging.
    pub fn sun_mode_request(&self, enabled: bool) -> RscpValue {
        let mode = if enabled { MODE_SUN } else { MODE_MIXED };
        let mut extern_data = vec![0u8; usize::from(EXTERN_DATA_LEN)];
        extern_data[0] = mode;

        RscpValue::container(
            Tag::WB_REQ_DATA,
            vec![
                RscpValue::new(Tag::WB_INDEX, Value::UChar8(self.index())),
                RscpValue::container(
                    Tag::WB_REQ_SET_EXTERN,
                    vec![
                        RscpValue::new(Tag::WB_EXTERN_DATA, Value::ByteArray(extern_data)),
                        RscpValue::new(Tag::WB_EXTERN_DATA_LEN, Value::UChar8(EXTERN_DATA_LEN)),
                    ],
                ),
            ],
        )
    }

    /// Sends the sun mode command through `send_and_receive` and hands back the answer.
    pub async fn request_sun_mode<F, Fut, E>(
        &self,
        enabled: bool,
        send_and_receive: F,
    ) -> Result<Vec<RscpValue>, E>
    where
        F: FnOnce(Vec<RscpValue>) -> Fut,
        Fut: Future<Output = Result<Vec<RscpValue>, E>>,
    {
        info!(index = self.index(), enabled, "setting wallbox sun mode");
        send_and_receive(vec![self.sun_mode_request(enabled)]).await
    }

    fn handle_extern_data(&mut self, container: &RscpValue) {
        let Some(data) = container
            .child(Tag::WB_EXTERN_DATA)
            .and_then(|value| value.value.as_bytes())
        else {
            return;
        };
        let Some(status) = data.get(EXTERN_STATUS_BYTE) else {
            debug!(index = self.index(), len = data.len(), "wallbox extern data too short");
            return;
        };
        self.model.sun_mode = Some(status & STATUS_SUN_MODE != 0);
        self.model.charging = Some(status & STATUS_CHARGING != 0);
        self.model.connected = Some(status & STATUS_CONNECTED != 0);
    }
}

impl RscpModel for WallboxRscpModel {
    fn rscp_tags(&self) -> Vec<RscpValue> {
        vec![RscpValue::container(
            Tag::WB_REQ_DATA,
            vec![
                RscpValue::new(Tag::WB_INDEX, Value::UChar8(self.index())),
                RscpValue::request(Tag::WB_REQ_EXTERN_DATA_ALG),
                RscpValue::request(Tag::WB_REQ_SUN_MODE_ACTIVE),
                RscpValue::request(Tag::WB_REQ_PM_POWER_L1),
                RscpValue::request(Tag::WB_REQ_PM_POWER_L2),
                RscpValue::request(Tag::WB_REQ_PM_POWER_L3),
                RscpValue::request(Tag::WB_REQ_ASSIGNED_POWER),
                RscpValue::request(Tag::WB_REQ_CP_STATE),
            ],
        )]
    }

    fn rscp_tags_slow(&self) -> Vec<RscpValue> {
        vec![RscpValue::container(
            Tag::WB_REQ_DATA,
            vec![
                RscpValue::new(Tag::WB_INDEX, Value::UChar8(self.index())),
                RscpValue::request(Tag::WB_REQ_DEVICE_STATE),
            ],
        )]
    }

    fn handle_rscp_data(&mut self, value: &RscpValue) -> bool {
        if value.tag != Tag::WB_DATA || index_of(value, Tag::WB_INDEX) != Some(self.index()) {
            return false;
        }

        for child in value.children() {
            if child.value.is_error() {
                debug!(index = self.index(), answer = %child, "wallbox value not available, keeping previous");
                continue;
            }
            match child.tag {
                Tag::WB_INDEX => {}
                Tag::WB_DEVICE_NAME => set_identity(&mut self.model.device_name, child),
                Tag::WB_SERIAL_NUMBER => set_identity(&mut self.model.serial, child),
                Tag::WB_FIRMWARE_VERSION => set_identity(&mut self.model.firmware_version, child),
                Tag::WB_EXTERN_DATA_ALG => self.handle_extern_data(child),
                Tag::WB_SUN_MODE_ACTIVE => self.model.sun_mode = child.value.as_bool(),
                Tag::WB_PM_POWER_L1 => self.model.power_l1 = child.value.as_f64(),
                Tag::WB_PM_POWER_L2 => self.model.power_l2 = child.value.as_f64(),
                Tag::WB_PM_POWER_L3 => self.model.power_l3 = child.value.as_f64(),
                Tag::WB_ASSIGNED_POWER => self.model.assigned_power = as_i32(child),
                Tag::WB_CP_STATE => self.model.cp_state = as_u8(child).map(char::from),
                Tag::WB_DEVICE_STATE => {
                    self.model.device_state = Some(device_state(child, WB_STATE_TAGS));
                }
                Tag::WB_SET_EXTERN => {
                    debug!(index = self.index(), answer = %child, "wallbox acknowledged extern data");
                }
                other => debug!(index = self.index(), tag = %other, "unhandled wallbox child"),
            }
        }
        true
    }
}
