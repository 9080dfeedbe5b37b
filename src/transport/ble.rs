//! btleplug backend for real hardware.

use crate::transport::session::{Central, Link};
use crate::transport::types::{Advertisement, TransportError};
use btleplug::api::{
    Central as _, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use uuid::Uuid;

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// The first Bluetooth adapter of the host.
pub struct BleCentral {
    adapter: Adapter,
    seen: HashMap<String, Peripheral>,
}

impl BleCentral {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::Runtime(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| TransportError::Runtime(e.to_string()))?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        Ok(Self {
            adapter,
            seen: HashMap::new(),
        })
    }
}

impl Central for BleCentral {
    type Link = BleLink;

    async fn scan(&mut self, window: Duration) -> Result<Vec<Advertisement>, TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))?;
        tokio::time::sleep(window).await;
        self.adapter.stop_scan().await.ok();

        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))?;

        let mut adverts = Vec::with_capacity(peripherals.len());
        for p in peripherals {
            let name = p.properties().await.ok().flatten().and_then(|props| props.local_name);
            let id = p.id().to_string();
            tracing::debug!("seen {id} {name:?}");
            adverts.push(Advertisement {
                name,
                id: id.clone(),
            });
            self.seen.insert(id, p);
        }
        Ok(adverts)
    }

    async fn connect(&mut self, device: &Advertisement) -> Result<BleLink, TransportError> {
        let peripheral = self
            .seen
            .get(&device.id)
            .cloned()
            .ok_or_else(|| TransportError::Connect(format!("unknown device {}", device.id)))?;

        peripheral
            .connect()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(BleLink {
            peripheral,
            characteristic: None,
            notifications: None,
        })
    }
}

/// A connected peripheral.
pub struct BleLink {
    peripheral: Peripheral,
    characteristic: Option<Uuid>,
    notifications: Option<NotificationStream>,
}

impl Link for BleLink {
    async fn subscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError> {
        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or_else(|| {
                TransportError::Subscribe(format!("characteristic {characteristic} not found"))
            })?;

        self.peripheral
            .subscribe(&target)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        let stream = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        self.characteristic = Some(characteristic);
        self.notifications = Some(stream);
        Ok(())
    }

    async fn next_notification(&mut self) -> Option<Vec<u8>> {
        let wanted = self.characteristic?;
        let stream = self.notifications.as_mut()?;
        loop {
            let notification = stream.next().await?;
            if notification.uuid == wanted {
                return Some(notification.value);
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.notifications = None;
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| TransportError::Disconnect(e.to_string()))
    }
}
