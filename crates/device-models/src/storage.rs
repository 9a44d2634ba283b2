use rscp_codec::{RscpValue, Tag, Value};
use tracing::debug;
use types::StorageData;

use crate::{as_i32, as_u8, device_state, index_of, set_identity, RscpModel};

/// PV inverter polled for DC power.
const PVI_INDEX: u16 = 0;
const MPPT_STRINGS: u16 = 2;
const BAT_INDEX: u16 = 0;
const PM_INDEX: u8 = 0;

const PVI_STATE_TAGS: [Tag; 3] = [
    Tag::PVI_DEVICE_CONNECTED,
    Tag::PVI_DEVICE_WORKING,
    Tag::PVI_DEVICE_IN_SERVICE,
];
const BAT_STATE_TAGS: [Tag; 3] = [
    Tag::BAT_DEVICE_CONNECTED,
    Tag::BAT_DEVICE_WORKING,
    Tag::BAT_DEVICE_IN_SERVICE,
];
const PM_STATE_TAGS: [Tag; 3] = [
    Tag::PM_DEVICE_CONNECTED,
    Tag::PM_DEVICE_WORKING,
    Tag::PM_DEVICE_IN_SERVICE,
];

/// Answers claimed by the storage model.
const STORAGE_TAGS: [Tag; 16] = [
    Tag::INFO_SERIAL_NUMBER,
    Tag::INFO_A35_SERIAL_NUMBER,
    Tag::INFO_MAC_ADDRESS,
    Tag::INFO_SW_RELEASE,
    Tag::EMS_POWER_PV,
    Tag::EMS_POWER_BAT,
    Tag::EMS_POWER_HOME,
    Tag::EMS_POWER_GRID,
    Tag::EMS_POWER_ADD,
    Tag::EMS_POWER_WB_ALL,
    Tag::EMS_POWER_WB_SOLAR,
    Tag::EMS_BAT_SOC,
    Tag::EMS_EMERGENCY_POWER_STATUS,
    Tag::PVI_DATA,
    Tag::BAT_DATA,
    Tag::PM_DATA,
];

/// The storage system itself: EMS power flows, battery and inverter state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageRscpModel {
    model: StorageData,
}

impl StorageRscpModel {
    pub fn model(&self) -> &StorageData {
        &self.model
    }

    pub fn serial(&self) -> Option<&str> {
        self.model.serial.as_deref()
    }

    pub fn identification_tags() -> Vec<RscpValue> {
        [
            Tag::INFO_REQ_SERIAL_NUMBER,
            Tag::INFO_REQ_A35_SERIAL_NUMBER,
            Tag::INFO_REQ_MAC_ADDRESS,
            Tag::INFO_REQ_SW_RELEASE,
        ]
        .into_iter()
        .map(RscpValue::request)
        .collect()
    }

    /// A storage is identified by its serial number answer.
    pub fn identify(value: &RscpValue) -> Option<Self> {
        if value.tag != Tag::INFO_SERIAL_NUMBER || value.value.as_str().is_none() {
            return None;
        }
        let mut storage = Self::default();
        storage.handle_rscp_data(value);
        Some(storage)
    }

    fn handle_pvi_data(&mut self, container: &RscpValue) {
        let Some(index) = index_of(container, Tag::PVI_INDEX) else {
            debug!("PVI data without index");
            return;
        };

        for child in container.children() {
            match child.tag {
                Tag::PVI_DC_POWER => {
                    let Some(string) = index_of(child, Tag::PVI_INDEX) else {
                        continue;
                    };
                    let power = child
                        .child(Tag::PVI_VALUE)
                        .and_then(|value| value.value.as_f64())
                        .map(|watts| watts.round() as i32);
                    self.model
                        .inverters
                        .entry(index)
                        .or_default()
                        .power_mppt
                        .insert(string, power);
                }
                Tag::PVI_DEVICE_STATE => {
                    self.model
                        .device_states
                        .inverter
                        .insert(index, device_state(child, PVI_STATE_TAGS));
                }
                Tag::PVI_INDEX => {}
                other => debug!(tag = %other, "unhandled PVI child"),
            }
        }
    }

    fn handle_bat_data(&mut self, container: &RscpValue) {
        let Some(index) = index_of(container, Tag::BAT_INDEX) else {
            debug!("BAT data without index");
            return;
        };
        if let Some(state) = container.child(Tag::BAT_DEVICE_STATE) {
            self.model
                .device_states
                .battery
                .insert(index, device_state(state, BAT_STATE_TAGS));
        }
    }

    fn handle_pm_data(&mut self, container: &RscpValue) {
        let Some(index) = index_of(container, Tag::PM_INDEX) else {
            debug!("PM data without index");
            return;
        };
        if let Some(state) = container.child(Tag::PM_DEVICE_STATE) {
            self.model
                .device_states
                .powermeter
                .insert(index, device_state(state, PM_STATE_TAGS));
        }
    }
}

impl RscpModel for StorageRscpModel {
    fn rscp_tags(&self) -> Vec<RscpValue> {
        let mut requests: Vec<RscpValue> = [
            Tag::EMS_REQ_POWER_PV,
            Tag::EMS_REQ_POWER_BAT,
            Tag::EMS_REQ_POWER_HOME,
            Tag::EMS_REQ_POWER_GRID,
            Tag::EMS_REQ_POWER_ADD,
            Tag::EMS_REQ_POWER_WB_ALL,
            Tag::EMS_REQ_POWER_WB_SOLAR,
            Tag::EMS_REQ_BAT_SOC,
            Tag::EMS_REQ_EMERGENCY_POWER_STATUS,
        ]
        .into_iter()
        .map(RscpValue::request)
        .collect();

        let mut pvi = vec![RscpValue::new(Tag::PVI_INDEX, Value::Uint16(PVI_INDEX))];
        pvi.extend(
            (0..MPPT_STRINGS).map(|string| RscpValue::new(Tag::PVI_REQ_DC_POWER, Value::Uint16(string))),
        );
        requests.push(RscpValue::container(Tag::PVI_REQ_DATA, pvi));

        requests
    }

    fn rscp_tags_slow(&self) -> Vec<RscpValue> {
        vec![
            RscpValue::container(
                Tag::BAT_REQ_DATA,
                vec![
                    RscpValue::new(Tag::BAT_INDEX, Value::Uint16(BAT_INDEX)),
                    RscpValue::request(Tag::BAT_REQ_DEVICE_STATE),
                ],
            ),
            RscpValue::container(
                Tag::PVI_REQ_DATA,
                vec![
                    RscpValue::new(Tag::PVI_INDEX, Value::Uint16(PVI_INDEX)),
                    RscpValue::request(Tag::PVI_REQ_DEVICE_STATE),
                ],
            ),
            RscpValue::container(
                Tag::PM_REQ_DATA,
                vec![
                    RscpValue::new(Tag::PM_INDEX, Value::UChar8(PM_INDEX)),
                    RscpValue::request(Tag::PM_REQ_DEVICE_STATE),
                ],
            ),
        ]
    }

    fn handle_rscp_data(&mut self, value: &RscpValue) -> bool {
        if !STORAGE_TAGS.contains(&value.tag) {
            return false;
        }
        if value.value.is_error() {
            debug!(answer = %value, "storage value not available, keeping previous");
            return true;
        }

        match value.tag {
            Tag::INFO_SERIAL_NUMBER => set_identity(&mut self.model.serial, value),
            Tag::INFO_A35_SERIAL_NUMBER => set_identity(&mut self.model.assembly_serial, value),
            Tag::INFO_MAC_ADDRESS => set_identity(&mut self.model.mac_address, value),
            Tag::INFO_SW_RELEASE => set_identity(&mut self.model.sw_version, value),
            Tag::EMS_POWER_PV => self.model.powers.pv = as_i32(value),
            Tag::EMS_POWER_BAT => self.model.powers.battery = as_i32(value),
            Tag::EMS_POWER_HOME => self.model.powers.home = as_i32(value),
            Tag::EMS_POWER_GRID => self.model.powers.grid = as_i32(value),
            Tag::EMS_POWER_ADD => self.model.powers.additional = as_i32(value),
            Tag::EMS_POWER_WB_ALL => self.model.powers.wallbox = as_i32(value),
            Tag::EMS_POWER_WB_SOLAR => self.model.powers.wallbox_pv = as_i32(value),
            Tag::EMS_BAT_SOC => self.model.bat_soc = as_u8(value),
            Tag::EMS_EMERGENCY_POWER_STATUS => self.model.emergency_power_state = as_u8(value),
            Tag::PVI_DATA => self.handle_pvi_data(value),
            Tag::BAT_DATA => self.handle_bat_data(value),
            Tag::PM_DATA => self.handle_pm_data(value),
            _ => {}
        }
        true
    }
}
