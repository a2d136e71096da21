use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::MAX_DEVICES_PER_USER;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    Reminder,
    LevelUp,
    Extension,
    Infraction,
    Sanction,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Reminder => "reminder",
            NotificationKind::LevelUp => "level_up",
            NotificationKind::Extension => "extension",
            NotificationKind::Infraction => "infraction",
            NotificationKind::Sanction => "sanction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub kind: NotificationKind,
}

impl Notification {
    /// JSON body handed to the push service.
    pub fn payload(&self) -> String {
        serde_json::json!({
            "title": self.title,
            "body": self.body,
            "url": self.url,
            "type": self.kind.as_str(),
        })
        .to_string()
    }
}

/// Per-recipient outcome of one `send`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    /// Stale registrations removed during this send.
    pub pruned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    Unavailable(String),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Unavailable(e) => write!(f, "notifier unavailable: {e}"),
        }
    }
}

impl std::error::Error for NotifyError {}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, user_id: Ulid, notification: &Notification) -> Result<DeliveryReport, NotifyError>;
}

// ── Device push ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: Ulid,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The push service no longer knows this endpoint.
    Gone,
    Failed(String),
}

/// Delivers one payload to one device.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn deliver(&self, device: &Device, payload: &str) -> Result<(), DeliveryError>;
}

/// Fans a notification out to every registered device of the user. Devices reported `Gone`
/// are unregistered on the spot; the call itself still succeeds.
pub struct PushNotifier<T> {
    transport: T,
    devices: DashMap<Ulid, Vec<Device>>,
}

impl<T: PushTransport> PushNotifier<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            devices: DashMap::new(),
        }
    }

    /// Register an endpoint. Re-registering the same endpoint returns the existing id.
    /// The oldest registration is dropped once the user is at the device limit.
    pub fn register_device(&self, user_id: Ulid, endpoint: impl Into<String>) -> Ulid {
        let endpoint = endpoint.into();
        let mut devices = self.devices.entry(user_id).or_default();
        if let Some(existing) = devices.iter().find(|d| d.endpoint == endpoint) {
            return existing.id;
        }
        if devices.len() >= MAX_DEVICES_PER_USER {
            devices.remove(0);
        }
        let id = Ulid::new();
        devices.push(Device { id, endpoint });
        id
    }

    pub fn unregister_device(&self, user_id: Ulid, device_id: Ulid) -> bool {
        match self.devices.get_mut(&user_id) {
            Some(mut devices) => {
                let before = devices.len();
                devices.retain(|d| d.id != device_id);
                devices.len() != before
            }
            None => false,
        }
    }

    pub fn devices(&self, user_id: Ulid) -> Vec<Device> {
        self.devices
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl<T: PushTransport> Notifier for PushNotifier<T> {
    async fn send(&self, user_id: Ulid, notification: &Notification) -> Result<DeliveryReport, NotifyError> {
        // Snapshot so no map guard is held across the transport await.
        let devices = self.devices(user_id);
        let payload = notification.payload();
        let mut report = DeliveryReport::default();

        for device in &devices {
            match self.transport.deliver(device, &payload).await {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Gone) => {
                    if self.unregister_device(user_id, device.id) {
                        report.pruned += 1;
                        metrics::counter!(crate::observability::DEVICES_PRUNED_TOTAL).increment(1);
                        info!(%user_id, device = %device.id, "pruned stale push endpoint");
                    }
                    report.failed += 1;
                }
                Err(DeliveryError::Failed(e)) => {
                    warn!(%user_id, device = %device.id, "push delivery failed: {e}");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

/// Transport that only logs the payload. Used when no push service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl PushTransport for LogTransport {
    async fn deliver(&self, device: &Device, payload: &str) -> Result<(), DeliveryError> {
        debug!(device = %device.id, endpoint = %device.endpoint, payload, "push");
        Ok(())
    }
}

// ── In-app inbox ────────────────────────────────────────────────

/// Keeps every notification in an in-memory per-user inbox. Always delivers.
#[derive(Debug, Default)]
pub struct InboxNotifier {
    inboxes: DashMap<Ulid, Vec<Notification>>,
}

impl InboxNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inbox(&self, user_id: Ulid) -> Vec<Notification> {
        self.inboxes
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.inboxes.iter().map(|e| e.value().len()).sum()
    }
}

#[async_trait]
impl Notifier for InboxNotifier {
    async fn send(&self, user_id: Ulid, notification: &Notification) -> Result<DeliveryReport, NotifyError> {
        self.inboxes
            .entry(user_id)
            .or_default()
            .push(notification.clone());
        Ok(DeliveryReport {
            delivered: 1,
            ..DeliveryReport::default()
        })
    }
}

/// Writes each notification to the log. The binary's default.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, user_id: Ulid, notification: &Notification) -> Result<DeliveryReport, NotifyError> {
        info!(%user_id, payload = %notification.payload(), "notify");
        Ok(DeliveryReport {
            delivered: 1,
            ..DeliveryReport::default()
        })
    }
}
