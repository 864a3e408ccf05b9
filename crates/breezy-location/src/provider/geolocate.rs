//! Network-assisted backend speaking the MLS-compatible geolocate protocol
//! (`POST /v1/geolocate`), as served by BeaconDB and similar services.

use std::sync::Arc;
use std::time::Duration;

use breezy_core::LocationConfig;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use url::Url;

use super::{
    FixListener, LocationProvider, Permission, Positioning, ProviderKind, SubscriptionId,
};
use crate::types::{Coordinate, Fix, LocationError};

const USER_AGENT: &str = concat!("Breezy/", env!("CARGO_PKG_VERSION"));
const PERMISSIONS: &[Permission] = &[Permission::CoarseLocation, Permission::Network];

#[derive(Debug, Deserialize)]
struct GeolocateResponse {
    location: GeolocateLocation,
    accuracy: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GeolocateLocation {
    lat: f64,
    lng: f64,
}

#[derive(Debug)]
pub struct GeolocateProvider {
    client: Client,
    endpoint: Url,
    runtime: Handle,
    max_age: Duration,
    cache: Arc<Mutex<Option<Fix>>>,
    pending: Mutex<Option<(SubscriptionId, JoinHandle<()>)>>,
}

impl GeolocateProvider {
    /// # Errors
    /// Fails if the endpoint is not a valid URL or the HTTP client cannot be built.
    pub fn new(
        endpoint: &str,
        timeout: Duration,
        max_age: Duration,
        runtime: Handle,
    ) -> Result<Self, LocationError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| LocationError::Provider(format!("invalid geolocate endpoint: {}", e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            runtime,
            max_age,
            cache: Arc::new(Mutex::new(None)),
            pending: Mutex::new(None),
        })
    }

    /// # Errors
    /// See [`GeolocateProvider::new`].
    pub fn from_config(config: &LocationConfig, runtime: Handle) -> Result<Self, LocationError> {
        Self::new(
            &config.geolocate.url,
            Duration::from_secs(config.geolocate.timeout_secs),
            config.cache_max_age(),
            runtime,
        )
    }
}

async fn request_fix(client: &Client, endpoint: Url) -> Result<Fix, LocationError> {
    let response = client
        .post(endpoint)
        .json(&serde_json::json!({ "considerIp": true }))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(LocationError::Provider(format!(
            "geolocate returned status {}",
            response.status()
        )));
    }

    let body: GeolocateResponse = response
        .json()
        .await
        .map_err(|e| LocationError::Provider(format!("geolocate parse error: {}", e)))?;

    Ok(Fix::new(
        Coordinate::new(body.location.lat, body.location.lng),
        body.accuracy,
    ))
}

impl LocationProvider for GeolocateProvider {
    fn name(&self) -> &str {
        "geolocate"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Fused
    }

    fn positioning(&self) -> Positioning {
        Positioning::NetworkAssisted
    }

    fn required_permissions(&self) -> &[Permission] {
        PERMISSIONS
    }

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
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let cache = Arc::clone(&self.cache);
        let id = SubscriptionId::next();

        let task = self.runtime.spawn(async move {
            let outcome = request_fix(&client, endpoint).await;
            match &outcome {
                Ok(fix) => *cache.lock() = Some(fix.clone()),
                Err(e) => tracing::warn!("Geolocate lookup failed: {}", e),
            }
            listener(outcome);
        });

        if let Some((_, previous)) = self.pending.lock().replace((id, task)) {
            previous.abort();
        }
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut pending = self.pending.lock();
        if pending.as_ref().is_some_and(|(current, _)| *current == id) {
            if let Some((_, task)) = pending.take() {
                task.abort();
            }
        }
    }
}

impl Drop for GeolocateProvider {
    fn drop(&mut self) {
        if let Some((_, task)) = self.pending.lock().take() {
            task.abort();
        }
    }
}
