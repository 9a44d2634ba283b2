#![allow(dead_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Power values reported by the energy management system, in watts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmsPowers {
    pub home: Option<i32>,
    pub battery: Option<i32>,
    pub grid: Option<i32>,
    pub pv: Option<i32>,
    pub additional: Option<i32>,
    pub wallbox: Option<i32>,
    pub wallbox_pv: Option<i32>,
}

/// Health flags of a single sub-device (battery, inverter, power meter, wallbox).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub connected: bool,
    pub working: bool,
    /// Set while the device is being serviced, e.g. during a firmware update.
    pub in_service: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStates {
    pub battery: BTreeMap<u8, DeviceState>,
    pub inverter: BTreeMap<u8, DeviceState>,
    pub powermeter: BTreeMap<u8, DeviceState>,
}

/// DC power per MPPT string of one PV inverter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PvInverterData {
    pub power_mppt: BTreeMap<u8, Option<i32>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageData {
    pub serial: Option<String>,
    pub assembly_serial: Option<String>,
    pub mac_address: Option<String>,
    pub sw_version: Option<String>,
    pub device_states: DeviceStates,
    pub powers: EmsPowers,
    /// Battery state of charge in percent.
    pub bat_soc: Option<u8>,
    pub emergency_power_state: Option<u8>,
    pub inverters: BTreeMap<u8, PvInverterData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WallboxData {
    /// Wallbox index on the storage bus; stable for the lifetime of an identification pass.
    pub index: u8,
    pub device_name: Option<String>,
    pub serial: Option<String>,
    pub firmware_version: Option<String>,
    pub connected: Option<bool>,
    pub charging: Option<bool>,
    pub sun_mode: Option<bool>,
    /// Raw IEC 61851 charge point code (`A`, `B`, `C`, `F`).
    pub cp_state: Option<char>,
    pub power_l1: Option<f64>,
    pub power_l2: Option<f64>,
    pub power_l3: Option<f64>,
    pub assigned_power: Option<i32>,
    pub device_state: Option<DeviceState>,
}

impl WallboxData {
    /// Sum of the phase powers, `None` until at least one phase has been reported.
    pub fn power(&self) -> Option<f64> {
        let phases = [self.power_l1, self.power_l2, self.power_l3];
        if phases.iter().all(Option::is_none) {
            return None;
        }
        Some(phases.iter().flatten().sum())
    }

    pub fn charge_point_state(&self) -> Option<CpState> {
        self.cp_state.and_then(CpState::from_code)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SgReadyData {
    pub state: Option<u8>,
}

impl SgReadyData {
    pub fn sg_ready_state(&self) -> Option<SgReadyState> {
        self.state.and_then(SgReadyState::from_code)
    }
}

/// The four operating states of an SG Ready grid signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SgReadyState {
    Block,
    Normal,
    Go,
    ForceGo,
}

impl SgReadyState {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Block),
            2 => Some(Self::Normal),
            3 => Some(Self::Go),
            4 => Some(Self::ForceGo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpState {
    CableDisconnected,
    CableConnected,
    Charging,
    Error,
}

impl CpState {
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'A' => Some(Self::CableDisconnected),
            'B' => Some(Self::CableConnected),
            'C' => Some(Self::Charging),
            'F' => Some(Self::Error),
            _ => None,
        }
    }
}

/// Everything the client currently knows about the connected system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub storage: Option<StorageData>,
    pub wallboxes: BTreeMap<u8, WallboxData>,
    pub sg_ready: Option<SgReadyData>,
}

impl DeviceSnapshot {
    pub fn is_empty(&self) -> bool {
        self.storage.is_none() && self.wallboxes.is_empty() && self.sg_ready.is_none()
    }
}
