//! Platform-native backend over the GeoClue2 system service.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use breezy_core::LocationConfig;
use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use zbus::zvariant::ObjectPath;
use zbus::{proxy, Connection};

use super::{
    FixListener, LocationProvider, Permission, Positioning, ProviderKind, SubscriptionId,
};
use crate::types::{Coordinate, Fix, LocationError};

#[proxy(
    gen_blocking = false,
    default_service = "org.freedesktop.GeoClue2",
    interface = "org.freedesktop.GeoClue2.Manager",
    default_path = "/org/freedesktop/GeoClue2/Manager"
)]
trait Manager {
    #[zbus(object = "Client")]
    fn get_client(&self);
}

#[proxy(
    gen_blocking = false,
    default_service = "org.freedesktop.GeoClue2",
    interface = "org.freedesktop.GeoClue2.Client"
)]
trait Client {
    fn start(&self) -> zbus::Result<()>;

    fn stop(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn set_desktop_id(&self, id: &str) -> zbus::Result<()>;

    #[zbus(property)]
    fn set_requested_accuracy_level(&self, level: u32) -> zbus::Result<()>;

    #[zbus(signal)]
    fn location_updated(&self, old: ObjectPath<'_>, new: ObjectPath<'_>) -> zbus::Result<()>;
}

#[proxy(
    gen_blocking = false,
    default_service = "org.freedesktop.GeoClue2",
    interface = "org.freedesktop.GeoClue2.Location"
)]
trait Location {
    #[zbus(property)]
    fn latitude(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn longitude(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn accuracy(&self) -> zbus::Result<f64>;
}

impl From<zbus::Error> for LocationError {
    fn from(e: zbus::Error) -> Self {
        LocationError::Provider(format!("GeoClue: {}", e))
    }
}

/// GeoClue's `GClueAccuracyLevel`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccuracyLevel {
    Country = 1,
    City = 4,
    Neighborhood = 5,
    Street = 6,
    Exact = 8,
}

impl AccuracyLevel {
    /// Only `Exact` needs satellites; coarser levels resolve from Wi-Fi/IP.
    pub fn positioning(self) -> Positioning {
        match self {
            AccuracyLevel::Exact => Positioning::SatelliteOnly,
            _ => Positioning::NetworkAssisted,
        }
    }

    pub fn permissions(self) -> &'static [Permission] {
        match self {
            AccuracyLevel::Exact => &[Permission::FineLocation],
            _ => &[Permission::CoarseLocation],
        }
    }
}

impl FromStr for AccuracyLevel {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "country" => Ok(Self::Country),
            "city" => Ok(Self::City),
            "neighborhood" | "neighbourhood" => Ok(Self::Neighborhood),
            "street" => Ok(Self::Street),
            "exact" => Ok(Self::Exact),
            other => Err(LocationError::Provider(format!(
                "unknown GeoClue accuracy level: {}",
                other
            ))),
        }
    }
}

pub struct GeoClueProvider {
    connection: Connection,
    runtime: Handle,
    desktop_id: String,
    accuracy: AccuracyLevel,
    max_age: Duration,
    cache: Arc<Mutex<Option<Fix>>>,
    /// Current session; cancelling it stops the GeoClue client
    pending: Mutex<Option<(SubscriptionId, CancellationToken)>>,
}

impl GeoClueProvider {
    /// Connect to the system bus.
    ///
    /// # Errors
    /// Fails when the accuracy level is unknown or the system bus is unreachable.
    pub async fn connect(config: &LocationConfig, runtime: Handle) -> Result<Self, LocationError> {
        let accuracy = config.geoclue.accuracy.parse::<AccuracyLevel>()?;
        let connection = Connection::system().await?;
        tracing::debug!(?accuracy, "Connected to system bus for GeoClue");

        Ok(Self {
            connection,
            runtime,
            desktop_id: config.geoclue.desktop_id.clone(),
            accuracy,
            max_age: config.cache_max_age(),
            cache: Arc::new(Mutex::new(None)),
            pending: Mutex::new(None),
        })
    }
}

/// Run `wait` until it finishes or `cancel` fires, then always run `stop`.
async fn run_until_cancelled<T, W, S>(cancel: &CancellationToken, wait: W, stop: S) -> Option<T>
where
    W: Future<Output = T>,
    S: Future<Output = ()>,
{
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        outcome = wait => Some(outcome),
    };
    stop.await;
    outcome
}

async fn stop_client(client: &ClientProxy<'_>) {
    if let Err(e) = client.stop().await {
        tracing::debug!("Failed to stop GeoClue client: {}", e);
    }
}

async fn acquire_fix(
    connection: &Connection,
    desktop_id: &str,
    accuracy: AccuracyLevel,
    cancel: &CancellationToken,
) -> Result<Fix, LocationError> {
    let manager = ManagerProxy::new(connection).await?;
    let client = manager.get_client().await?;
    client.set_desktop_id(desktop_id).await?;
    client.set_requested_accuracy_level(accuracy as u32).await?;

    let mut updates = client.receive_location_updated().await?;
    client.start().await?;

    let first_update = async {
        let signal = updates
            .next()
            .await
            .ok_or_else(|| LocationError::Provider("GeoClue location stream closed".into()))?;
        let args = signal.args()?;

        let location = LocationProxy::builder(connection)
            .path(args.new())?
            .build()
            .await?;
        let coordinate = Coordinate::new(location.latitude().await?, location.longitude().await?);
        let accuracy_meters = location.accuracy().await.ok();
        Ok::<_, LocationError>(Fix::new(coordinate, accuracy_meters))
    };

    run_until_cancelled(cancel, first_update, stop_client(&client))
        .await
        .unwrap_or(Err(LocationError::Cancelled))
}

impl LocationProvider for GeoClueProvider {
    fn name(&self) -> &str {
        "geoclue"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Native
    }

    fn positioning(&self) -> Positioning {
        self.accuracy.positioning()
    }

    fn required_permissions(&self) -> &[Permission] {
        self.accuracy.permissions()
    }

    // GeoClue is bus-activated; reaching the system bus in `connect` is the only check.
    fn is_available(&self) -> bool {
        true
    }

    fn last_known_fix(&self) -> Option<Fix> {
        self.cache
            .lock()
            .as_ref()
            .filter(|fix| fix.age(Utc::now()) <= self.max_age)
            .cloned()
    }

    fn subscribe_one_shot(&self, listener: FixListener) -> Result<SubscriptionId, LocationError> {
        let connection = self.connection.clone();
        let desktop_id = self.desktop_id.clone();
        let accuracy = self.accuracy;
        let cache = Arc::clone(&self.cache);
        let id = SubscriptionId::next();
        let cancel = CancellationToken::new();

        let session = cancel.clone();
        self.runtime.spawn(async move {
            match acquire_fix(&connection, &desktop_id, accuracy, &session).await {
                Ok(fix) => {
                    *cache.lock() = Some(fix.clone());
                    listener(Ok(fix));
                }
                // Torn down on purpose; the listener is dropped unheard.
                Err(LocationError::Cancelled) => tracing::debug!("GeoClue session cancelled"),
                Err(e) => {
                    tracing::warn!("GeoClue lookup failed: {}", e);
                    listener(Err(e));
                }
            }
        });

        if let Some((_, previous)) = self.pending.lock().replace((id, cancel)) {
            previous.cancel();
        }
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut pending = self.pending.lock();
        if pending.as_ref().is_some_and(|(current, _)| *current == id) {
            if let Some((_, cancel)) = pending.take() {
                cancel.cancel();
            }
        }
    }
}

impl Drop for GeoClueProvider {
    fn drop(&mut self) {
        if let Some((_, cancel)) = self.pending.lock().take() {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_accuracy_level_parsing() {
        assert_eq!("exact".parse::<AccuracyLevel>().unwrap(), AccuracyLevel::Exact);
        assert_eq!(" City ".parse::<AccuracyLevel>().unwrap(), AccuracyLevel::City);
        assert_eq!(
            "neighbourhood".parse::<AccuracyLevel>().unwrap(),
            AccuracyLevel::Neighborhood
        );
        assert!("gps".parse::<AccuracyLevel>().is_err());
    }

    #[test]
    fn test_exact_level_is_satellite_only() {
        assert_eq!(AccuracyLevel::Exact.positioning(), Positioning::SatelliteOnly);
        assert_eq!(AccuracyLevel::Exact.permissions(), &[Permission::FineLocation]);
        assert_eq!(AccuracyLevel::City.positioning(), Positioning::NetworkAssisted);
        assert_eq!(AccuracyLevel::Street.permissions(), &[Permission::CoarseLocation]);
    }

    #[tokio::test]
    async fn test_cancelled_session_still_stops() {
        let cancel = CancellationToken::new();
        let stopped = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let waiting = {
            let cancel = cancel.clone();
            let stopped = Arc::clone(&stopped);
            tokio::spawn(async move {
                run_until_cancelled(&cancel, std::future::pending::<()>(), async {
                    stopped.store(true, std::sync::atomic::Ordering::SeqCst);
                })
                .await
            })
        };

        cancel.cancel();
        assert_eq!(waiting.await.unwrap(), None);
        assert!(stopped.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_finished_session_stops_after_update() {
        let cancel = CancellationToken::new();
        let stopped = std::sync::atomic::AtomicBool::new(false);

        let outcome = run_until_cancelled(&cancel, async { 7 }, async {
            stopped.store(true, std::sync::atomic::Ordering::SeqCst);
        })
        .await;

        assert_eq!(outcome, Some(7));
        assert!(stopped.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_already_cancelled_session_skips_wait() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = run_until_cancelled(&cancel, async { 7 }, async {}).await;
        assert_eq!(outcome, None);
    }

    #[test]
    fn test_level_values_match_geoclue() {
        assert_eq!(AccuracyLevel::Country as u32, 1);
        assert_eq!(AccuracyLevel::Exact as u32, 8);
    }
}
