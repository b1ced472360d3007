//! Supervisor owning one processor task per watched device.

use keyward_identity::PairingResponse;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::processor::{ChallengeProcessor, StreamContext};
use crate::{StreamError, StreamResult};

pub struct StreamSupervisor {
    ctx: StreamContext,
    watched: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl StreamSupervisor {
    pub fn new(ctx: StreamContext) -> Self {
        Self {
            ctx,
            watched: Mutex::new(HashMap::new()),
        }
    }

    /// Watch every stored device. Returns how many were newly started.
    pub async fn start_all(&self) -> StreamResult<usize> {
        let mut started = 0;
        for device in self.ctx.store.load_devices()? {
            if self.start_device(&device.id).await? {
                started += 1;
            }
        }
        info!(started = started, "Challenge streams started");
        Ok(started)
    }

    /// Watch one device. Returns false if it is already watched.
    pub async fn start_device(&self, device_id: &str) -> StreamResult<bool> {
        let mut watched = self.watched.lock().await;
        if watched
            .get(device_id)
            .is_some_and(|handle| !handle.is_finished())
        {
            return Ok(false);
        }

        let device = self
            .ctx
            .store
            .load_device(device_id)?
            .ok_or_else(|| StreamError::DeviceNotFound {
                device_id: device_id.to_string(),
            })?;
        let handle = ChallengeProcessor::spawn(device, self.ctx.clone()).await?;
        watched.insert(device_id.to_string(), handle);
        Ok(true)
    }

    /// Start watching every device id received on `registrations`.
    pub fn watch_registrations(
        self: &Arc<Self>,
        mut registrations: mpsc::UnboundedReceiver<String>,
    ) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            while let Some(device_id) = registrations.recv().await {
                if let Err(e) = supervisor.start_device(&device_id).await {
                    error!(device_id = %device_id, error = %e, "Failed to watch paired device");
                }
            }
        })
    }

    /// Publish the pairing response for the peer under the info root.
    pub async fn send_info(&self, device_id: &str, response: &PairingResponse) -> StreamResult<()> {
        let json = response.to_json()?;
        self.ctx
            .remote
            .set_value(&self.ctx.layout.info_root, device_id, &json)
            .await?;
        info!(device_id = %device_id, "Pairing response published");
        Ok(())
    }

    /// Stop watching one device. Returns false if it was not watched.
    pub async fn stop_device(&self, device_id: &str) -> bool {
        match self.watched.lock().await.remove(device_id) {
            Some(handle) => {
                handle.abort();
                info!(device_id = %device_id, "Stopped watching device");
                true
            }
            None => false,
        }
    }

    pub async fn shutdown(&self) {
        let mut watched = self.watched.lock().await;
        for (_, handle) in watched.drain() {
            handle.abort();
        }
        info!("Challenge streams stopped");
    }

    /// Ids of the devices currently watched, sorted.
    pub async fn watched(&self) -> Vec<String> {
        let watched = self.watched.lock().await;
        let mut ids: Vec<String> = watched
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
