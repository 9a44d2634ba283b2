//! RSCP client: identification, polling and commands on top of a [`Transport`].

#![allow(dead_code)]

mod pipeline;

use std::collections::BTreeMap;

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use device_models::{DeviceKind, DeviceModel};
use rscp_codec::{frame_length, pack_frame, unpack_frame, CodecError, RscpValue};
use rscp_connection::{ConnectionConfig, ConnectionError, ConnectionState, RscpConnection, Transport};
use types::{DeviceSnapshot, SgReadyData, StorageData, WallboxData};

pub use pipeline::HandlerPipeline;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[source] ConnectionError),
    #[error("authorization failed: {0}")]
    Authorization(#[source] ConnectionError),
    #[error("device identification failed, check username, password and RSCP key: {0}")]
    Identification(#[source] Box<ClientError>),
    #[error("device sent no usable data")]
    NoData,
    #[error("device not identified yet")]
    NotIdentified,
    #[error("no wallbox with index {0}")]
    WallboxNotFound(u8),
    #[error("another operation is in flight")]
    Busy,
    #[error("frame codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<ConnectionError> for ClientError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::AuthorizationRejected { .. } => Self::Authorization(err),
            ConnectionError::Codec(codec) => Self::Codec(codec),
            other => Self::Transport(other),
        }
    }
}

/// Connection, handlers and identification flag; everything an operation mutates.
struct Session<T> {
    transport: T,
    pipeline: HandlerPipeline,
    identified: bool,
}

pub struct RscpClient<T = RscpConnection> {
    session: Mutex<Session<T>>,
}

impl RscpClient<RscpConnection> {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_transport(RscpConnection::new(config))
    }
}

impl<T: Transport> RscpClient<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            session: Mutex::new(Session {
                transport,
                pipeline: HandlerPipeline::new(),
                identified: false,
            }),
        }
    }

    fn try_session(&self) -> Result<MutexGuard<'_, Session<T>>, ClientError> {
        self.session.try_lock().map_err(|_| ClientError::Busy)
    }

    /// Asks for storage, wallboxes and SG Ready and registers what answers.
    pub async fn identify_device(&self) -> Result<DeviceSnapshot, ClientError> {
        let mut session = self.try_session()?;
        match session.identify().await {
            Ok(()) => Ok(session.snapshot()),
            Err(err) => {
                warn!(error = %err, "rscp identification failed");
                Err(ClientError::Identification(Box::new(err)))
            }
        }
    }

    pub async fn fetch_data(&self) -> Result<DeviceSnapshot, ClientError> {
        self.fetch(false).await
    }

    /// Like [`fetch_data`](Self::fetch_data) but also asks for slowly changing values.
    pub async fn fetch_data_with_slow_tags(&self) -> Result<DeviceSnapshot, ClientError> {
        self.fetch(true).await
    }

    async fn fetch(&self, with_slow_tags: bool) -> Result<DeviceSnapshot, ClientError> {
        let mut session = self.try_session()?;
        if !session.identified {
            return Err(ClientError::NotIdentified);
        }
        session.ensure_authorized().await?;

        let mut requests = session.pipeline.collect_tags();
        if with_slow_tags {
            requests.extend(session.pipeline.collect_slow_tags());
        }
        let received = session.exchange(&requests).await?;
        if received.is_empty() {
            debug!("fetch cycle returned no values");
        } else {
            let handled = session.pipeline.process(&received);
            debug!(received = received.len(), handled, "fetch cycle processed");
        }
        Ok(session.snapshot())
    }

    /// Switches sun-only charging of the wallbox at `index`.
    pub async fn set_sun_mode(&self, index: u8, enabled: bool) -> Result<(), ClientError> {
        let mut session = self.try_session()?;
        let wallbox = session
            .pipeline
            .handlers()
            .iter()
            .filter_map(DeviceModel::as_wallbox)
            .find(|wallbox| wallbox.index() == index)
            .cloned()
            .ok_or(ClientError::WallboxNotFound(index))?;
        session.ensure_authorized().await?;

        let channel = &mut *session;
        let received = wallbox
            .request_sun_mode(enabled, |values| async move { channel.exchange(&values).await })
            .await?;
        session.pipeline.process(&received);
        Ok(())
    }

    /// One raw round trip. The answer is returned as-is and not routed to the handlers.
    pub async fn send_and_receive(&self, values: &[RscpValue]) -> Result<Vec<RscpValue>, ClientError> {
        let mut session = self.try_session()?;
        session.ensure_authorized().await?;
        session.exchange(values).await
    }

    /// Waits for any running operation, then closes the connection.
    /// Identified devices are kept; the next operation reconnects.
    pub async fn disconnect(&self) {
        self.session.lock().await.transport.disconnect().await;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.session.lock().await.transport.state()
    }

    pub async fn is_identified(&self) -> bool {
        self.session.lock().await.identified
    }

    pub async fn storage(&self) -> Option<StorageData> {
        self.session.lock().await.snapshot().storage
    }

    pub async fn wallboxes(&self) -> BTreeMap<u8, WallboxData> {
        self.session.lock().await.snapshot().wallboxes
    }

    pub async fn wallbox(&self, index: u8) -> Option<WallboxData> {
        self.wallboxes().await.remove(&index)
    }

    pub async fn sg_ready(&self) -> Option<SgReadyData> {
        self.session.lock().await.snapshot().sg_ready
    }

    pub async fn snapshot(&self) -> DeviceSnapshot {
        self.session.lock().await.snapshot()
    }
}

impl<T: Transport> Session<T> {
    async fn ensure_authorized(&mut self) -> Result<(), ClientError> {
        if self.transport.is_authorized() {
            return Ok(());
        }
        if !self.transport.is_connected() {
            if self.identified {
                info!("rscp reconnecting");
            }
            self.transport.connect().await?;
        }
        if let Err(err) = self.transport.authorize().await {
            self.transport.disconnect().await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn identify(&mut self) -> Result<(), ClientError> {
        self.ensure_authorized().await?;
        self.pipeline
            .retain(|handler| handler.kind() != DeviceKind::Wallbox);

        let received = self.exchange(&DeviceModel::identification_tags()).await?;
        if received.is_empty() {
            return Err(ClientError::NoData);
        }

        let mut unclassified = Vec::new();
        for value in &received {
            match DeviceModel::identify(value) {
                Some(model) => self.register(model),
                None => unclassified.push(value),
            }
        }
        for value in unclassified {
            self.pipeline.process_one(value);
        }

        self.identified = true;
        let snapshot = self.snapshot();
        info!(
            storage = ?snapshot.storage.as_ref().and_then(|storage| storage.serial.as_deref()),
            wallboxes = snapshot.wallboxes.len(),
            sg_ready = snapshot.sg_ready.is_some(),
            "rscp device identified"
        );
        Ok(())
    }

    fn register(&mut self, model: DeviceModel) {
        match &model {
            DeviceModel::Storage(storage) => {
                let current = self
                    .pipeline
                    .handlers()
                    .iter()
                    .find_map(DeviceModel::as_storage)
                    .map(|existing| existing.serial().map(str::to_string));
                match current {
                    Some(serial) if serial.as_deref() == storage.serial() => {
                        info!(serial = ?serial, "storage already identified");
                        return;
                    }
                    Some(serial) => {
                        info!(old = ?serial, new = ?storage.serial(), "storage serial changed, replacing model");
                        self.pipeline
                            .retain(|handler| handler.kind() != DeviceKind::Storage);
                    }
                    None => {}
                }
            }
            DeviceModel::Wallbox(wallbox) => {
                let index = wallbox.index();
                self.pipeline.retain(|handler| {
                    handler
                        .as_wallbox()
                        .map_or(true, |existing| existing.index() != index)
                });
            }
            DeviceModel::SgReady(_) => {
                self.pipeline
                    .retain(|handler| handler.kind() != DeviceKind::SgReady);
            }
        }
        debug!(kind = ?model.kind(), "registering device handler");
        self.pipeline.add_handler(model);
    }

    /// Pack, send, receive, unpack. Undecryptable, incomplete or malformed
    /// answers yield an empty result instead of an error.
    async fn exchange(&mut self, values: &[RscpValue]) -> Result<Vec<RscpValue>, ClientError> {
        let frame = pack_frame(values)?;
        self.transport.send(&frame).await?;
        metrics::counter!("rscp_frames_sent_total").increment(1);

        let Some(plain) = self.transport.receive().await? else {
            warn!("rscp response could not be decrypted, check the RSCP key");
            metrics::counter!("rscp_decrypt_failures_total").increment(1);
            return Ok(Vec::new());
        };
        metrics::counter!("rscp_frames_received_total").increment(1);

        match frame_length(&plain) {
            Some(length) if plain.len() >= length => {}
            declared => {
                warn!(?declared, available = plain.len(), "incomplete rscp frame, skipping decode");
                return Ok(Vec::new());
            }
        }

        match unpack_frame(&plain) {
            Ok(frame) => Ok(frame.values),
            Err(err) => {
                warn!(error = %err, "failed to decode rscp frame");
                metrics::counter!("rscp_decode_failures_total").increment(1);
                Ok(Vec::new())
            }
        }
    }

    fn snapshot(&self) -> DeviceSnapshot {
        let mut snapshot = DeviceSnapshot::default();
        for handler in self.pipeline.handlers() {
            match handler {
                DeviceModel::Storage(storage) => snapshot.storage = Some(storage.model().clone()),
                DeviceModel::Wallbox(wallbox) => {
                    snapshot
                        .wallboxes
                        .insert(wallbox.index(), wallbox.model().clone());
                }
                DeviceModel::SgReady(sg_ready) => snapshot.sg_ready = Some(sg_ready.model().clone()),
            }
        }
        snapshot
    }
}
