use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use device_models::{DeviceModel, WallboxRscpModel};
use rscp_client::{ClientError, RscpClient};
use rscp_codec::{pack_frame, unpack_frame, RscpValue, Tag, Value};
use rscp_connection::{ConnectionError, ConnectionState, Transport};
use types::SgReadyState;

/// Shared knobs and observations of the in-memory device.
#[derive(Clone, Default)]
struct Device {
    serial: Arc<Mutex<String>>,
    sent: Arc<Mutex<Vec<Vec<RscpValue>>>>,
    garble: Arc<AtomicBool>,
    truncate: Arc<AtomicBool>,
    reject_auth: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
    entered: Arc<Notify>,
    release: Arc<Notify>,
    hold: Arc<AtomicBool>,
}

impl Device {
    fn new(serial: &str) -> Self {
        let device = Self::default();
        *device.serial.lock().expect("lock") = serial.to_string();
        device
    }

    fn frames_sent(&self) -> usize {
        self.sent.lock().expect("lock").len()
    }

    fn last_sent(&self) -> Vec<RscpValue> {
        self.sent.lock().expect("lock").last().cloned().unwrap_or_default()
    }

    fn answer(&self, requests: &[RscpValue]) -> Vec<RscpValue> {
        requests
            .iter()
            .filter_map(|request| self.answer_one(request))
            .collect()
    }

    fn answer_one(&self, request: &RscpValue) -> Option<RscpValue> {
        let text = |tag, value: &str| RscpValue::new(tag, Value::CString(value.to_string()));
        let answer = match request.tag {
            Tag::INFO_REQ_SERIAL_NUMBER => {
                let serial = self.serial.lock().expect("lock").clone();
                text(Tag::INFO_SERIAL_NUMBER, &serial)
            }
            Tag::INFO_REQ_SW_RELEASE => text(Tag::INFO_SW_RELEASE, "S10_2026_02"),
            Tag::INFO_REQ_MAC_ADDRESS => RscpValue::new(Tag::INFO_MAC_ADDRESS, Value::Error(6)),
            Tag::EMS_REQ_POWER_PV => RscpValue::new(Tag::EMS_POWER_PV, Value::Int32(3_000)),
            Tag::EMS_REQ_BAT_SOC => RscpValue::new(Tag::EMS_BAT_SOC, Value::UChar8(64)),
            Tag::WB_REQ_DATA => return Some(self.answer_wallbox(request)),
            Tag::SGR_REQ_DATA => RscpValue::container(
                Tag::SGR_DATA,
                vec![
                    RscpValue::new(Tag::SGR_INDEX, Value::UChar8(0xFF)),
                    RscpValue::new(Tag::SGR_STATE, Value::UChar8(3)),
                ],
            ),
            Tag::BAT_REQ_DATA => RscpValue::container(
                Tag::BAT_DATA,
                vec![
                    RscpValue::new(Tag::BAT_INDEX, Value::Uint16(0)),
                    RscpValue::container(
                        Tag::BAT_DEVICE_STATE,
                        vec![
                            RscpValue::new(Tag::BAT_DEVICE_CONNECTED, Value::Bool(true)),
                            RscpValue::new(Tag::BAT_DEVICE_WORKING, Value::Bool(true)),
                            RscpValue::new(Tag::BAT_DEVICE_IN_SERVICE, Value::Bool(false)),
                        ],
                    ),
                ],
            ),
            _ => return None,
        };
        Some(answer)
    }

    /// Only wallbox 0 is installed.
    fn answer_wallbox(&self, request: &RscpValue) -> RscpValue {
        let index = request
            .child(Tag::WB_INDEX)
            .and_then(|index| index.value.as_i64())
            .unwrap_or_default() as u8;
        let mut children = vec![RscpValue::new(Tag::WB_INDEX, Value::UChar8(index))];
        for child in request.children() {
            let answer = match (index, child.tag) {
                (_, Tag::WB_INDEX) => continue,
                (0, Tag::WB_REQ_DEVICE_NAME) => {
                    RscpValue::new(Tag::WB_DEVICE_NAME, Value::CString("Easy Connect".into()))
                }
                (0, Tag::WB_REQ_SERIAL_NUMBER) => {
                    RscpValue::new(Tag::WB_SERIAL_NUMBER, Value::CString("WB-0815".into()))
                }
                (0, Tag::WB_REQ_PM_POWER_L1) => RscpValue::new(Tag::WB_PM_POWER_L1, Value::Double64(1_400.0)),
                (0, Tag::WB_REQ_CP_STATE) => RscpValue::new(Tag::WB_CP_STATE, Value::Char8(b'B' as i8)),
                (0, Tag::WB_REQ_SET_EXTERN) => RscpValue::new(Tag::WB_SET_EXTERN, Value::Bool(true)),
                (_, Tag::WB_REQ_DEVICE_NAME) => RscpValue::new(Tag::WB_DEVICE_NAME, Value::Error(6)),
                _ => continue,
            };
            children.push(answer);
        }
        RscpValue::container(Tag::WB_DATA, children)
    }
}

struct MockTransport {
    device: Device,
    state: ConnectionState,
    pending: Option<Vec<RscpValue>>,
}

impl MockTransport {
    fn new(device: &Device) -> Self {
        Self {
            device: device.clone(),
            state: ConnectionState::Disconnected,
            pending: None,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.device.connects.fetch_add(1, Ordering::SeqCst);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn authorize(&mut self) -> Result<(), ConnectionError> {
        if self.device.reject_auth.load(Ordering::SeqCst) {
            return Err(ConnectionError::AuthorizationRejected {
                username: "user".to_string(),
            });
        }
        self.state = ConnectionState::Authorized;
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Authorized {
            return Err(ConnectionError::NotAuthorized);
        }
        let values = unpack_frame(frame)?.values;
        self.pending = Some(self.device.answer(&values));
        self.device.sent.lock().expect("lock").push(values);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, ConnectionError> {
        if self.device.hold.load(Ordering::SeqCst) {
            self.device.entered.notify_one();
            self.device.release.notified().await;
        }
        let Some(values) = self.pending.take() else {
            return Err(ConnectionError::Timeout { timeout_ms: 0 });
        };
        if self.device.garble.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut frame = pack_frame(&values)?;
        if self.device.truncate.load(Ordering::SeqCst) {
            frame.truncate(frame.len() - 3);
        }
        Ok(Some(frame))
    }

    async fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.pending = None;
    }
}

fn client(device: &Device) -> RscpClient<MockTransport> {
    RscpClient::with_transport(MockTransport::new(device))
}

#[tokio::test]
async fn identification_registers_all_answering_devices() {
    let device = Device::new("S10-4711");
    let client = client(&device);

    let snapshot = client.identify_device().await.expect("identify");

    assert_eq!(device.last_sent(), DeviceModel::identification_tags());
    let storage = snapshot.storage.expect("storage");
    assert_eq!(storage.serial.as_deref(), Some("S10-4711"));
    assert_eq!(storage.sw_version.as_deref(), Some("S10_2026_02"));
    assert_eq!(storage.mac_address, None);

    assert_eq!(snapshot.wallboxes.keys().copied().collect::<Vec<_>>(), vec![0]);
    assert_eq!(snapshot.wallboxes[&0].serial.as_deref(), Some("WB-0815"));
    assert_eq!(
        snapshot.sg_ready.and_then(|sg_ready| sg_ready.sg_ready_state()),
        Some(SgReadyState::Go)
    );
    assert!(client.is_identified().await);
    assert_eq!(client.connection_state().await, ConnectionState::Authorized);
}

#[tokio::test]
async fn fetch_requires_identification() {
    let device = Device::new("S10-4711");
    let client = client(&device);

    assert!(matches!(client.fetch_data().await, Err(ClientError::NotIdentified)));
    assert_eq!(device.frames_sent(), 0);
}

#[tokio::test]
async fn fetch_polls_registered_handlers() {
    let device = Device::new("S10-4711");
    let client = client(&device);
    client.identify_device().await.expect("identify");

    let snapshot = client.fetch_data().await.expect("fetch");

    let sent: Vec<Tag> = device.last_sent().iter().map(|value| value.tag).collect();
    assert_eq!(sent.first(), Some(&Tag::EMS_REQ_POWER_PV));
    assert!(sent.contains(&Tag::WB_REQ_DATA));
    assert_eq!(sent.last(), Some(&Tag::SGR_REQ_DATA));
    assert!(!sent.contains(&Tag::BAT_REQ_DATA));

    let storage = snapshot.storage.expect("storage");
    assert_eq!(storage.powers.pv, Some(3_000));
    assert_eq!(storage.bat_soc, Some(64));
    let wallbox = client.wallbox(0).await.expect("wallbox");
    assert_eq!(wallbox.power(), Some(1_400.0));
    assert_eq!(wallbox.cp_state, Some('B'));
}

#[tokio::test]
async fn slow_fetch_adds_device_state_requests() {
    let device = Device::new("S10-4711");
    let client = client(&device);
    client.identify_device().await.expect("identify");

    client.fetch_data_with_slow_tags().await.expect("fetch");

    assert!(device
        .last_sent()
        .iter()
        .any(|value| value.tag == Tag::BAT_REQ_DATA));
    let storage = client.storage().await.expect("storage");
    assert!(storage.device_states.battery[&0].working);
}

#[tokio::test]
async fn decrypt_failure_leaves_snapshot_unchanged() {
    let device = Device::new("S10-4711");
    let client = client(&device);
    client.identify_device().await.expect("identify");
    let before = client.fetch_data().await.expect("fetch");

    device.garble.store(true, Ordering::SeqCst);
    let after = client.fetch_data().await.expect("decrypt failure is not an error");

    assert_eq!(before, after);
}

#[tokio::test]
async fn truncated_frame_yields_no_values() {
    let device = Device::new("S10-4711");
    let client = client(&device);
    device.truncate.store(true, Ordering::SeqCst);

    let values = client
        .send_and_receive(&[RscpValue::request(Tag::EMS_REQ_POWER_PV)])
        .await
        .expect("round trip");
    assert!(values.is_empty());
}

#[tokio::test]
async fn undecryptable_identification_is_an_identification_error() {
    let device = Device::new("S10-4711");
    device.garble.store(true, Ordering::SeqCst);
    let client = client(&device);

    let err = client.identify_device().await.expect_err("must fail");

    assert!(matches!(err, ClientError::Identification(ref cause) if matches!(**cause, ClientError::NoData)));
    assert!(!client.is_identified().await);
}

#[tokio::test]
async fn rejected_credentials_fail_identification_and_disconnect() {
    let device = Device::new("S10-4711");
    device.reject_auth.store(true, Ordering::SeqCst);
    let client = client(&device);

    let err = client.identify_device().await.expect_err("must fail");

    assert!(matches!(err, ClientError::Identification(ref cause) if matches!(**cause, ClientError::Authorization(_))));
    assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    assert_eq!(device.frames_sent(), 0);
}

#[tokio::test]
async fn concurrent_operations_fail_fast() {
    let device = Device::new("S10-4711");
    let client = Arc::new(client(&device));
    client.identify_device().await.expect("identify");

    device.hold.store(true, Ordering::SeqCst);
    let in_flight = tokio::spawn({
        let client = client.clone();
        async move { client.fetch_data().await }
    });
    device.entered.notified().await;

    assert!(matches!(client.fetch_data().await, Err(ClientError::Busy)));
    assert!(matches!(client.set_sun_mode(0, true).await, Err(ClientError::Busy)));

    device.release.notify_one();
    in_flight.await.expect("join").expect("fetch");
}

#[tokio::test]
async fn sun_mode_for_unknown_wallbox_sends_nothing() {
    let device = Device::new("S10-4711");
    let client = client(&device);
    client.identify_device().await.expect("identify");
    let frames = device.frames_sent();

    let result = client.set_sun_mode(1, true).await;

    assert!(matches!(result, Err(ClientError::WallboxNotFound(1))));
    assert_eq!(device.frames_sent(), frames);
}

#[tokio::test]
async fn sun_mode_sends_set_extern_command() {
    let device = Device::new("S10-4711");
    let client = client(&device);
    client.identify_device().await.expect("identify");

    client.set_sun_mode(0, false).await.expect("sun mode");

    assert_eq!(device.last_sent(), vec![WallboxRscpModel::new(0).sun_mode_request(false)]);
}

#[tokio::test]
async fn reidentification_keeps_same_storage_and_replaces_changed_one() {
    let device = Device::new("S10-4711");
    let client = client(&device);
    client.identify_device().await.expect("identify");
    client.fetch_data().await.expect("fetch");

    let again = client.identify_device().await.expect("identify again");
    let storage = again.storage.expect("storage");
    assert_eq!(storage.powers.pv, Some(3_000), "same serial keeps the existing model");
    assert_eq!(again.wallboxes.len(), 1);

    *device.serial.lock().expect("lock") = "S10-9999".to_string();
    let replaced = client.identify_device().await.expect("identify replaced");
    let storage = replaced.storage.expect("storage");
    assert_eq!(storage.serial.as_deref(), Some("S10-9999"));
    assert_eq!(storage.powers.pv, None);
}

#[tokio::test]
async fn operations_reconnect_after_disconnect() {
    let device = Device::new("S10-4711");
    let client = client(&device);
    client.identify_device().await.expect("identify");

    client.disconnect().await;
    assert_eq!(client.connection_state().await, ConnectionState::Disconnected);

    client.fetch_data().await.expect("fetch after reconnect");
    assert_eq!(device.connects.load(Ordering::SeqCst), 2);
    assert!(client.is_identified().await);
}
