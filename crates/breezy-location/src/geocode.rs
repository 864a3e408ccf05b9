//! Reverse geocoding: convert coordinates to administrative address components.
//! The default resolver uses Nominatim (OpenStreetMap) - free, no API key required.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use breezy_core::GeocoderConfig;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::types::{Address, Coordinate, LocationError};

const USER_AGENT: &str = concat!("Breezy/", env!("CARGO_PKG_VERSION"));

pub type GeocodeFuture<'a> = Pin<Box<dyn Future<Output = Option<Address>> + Send + 'a>>;

/// Best-effort reverse lookup. Any failure is reported as `None`.
pub trait GeocodeResolver: Send + Sync {
    fn resolve(&self, coordinate: Coordinate) -> GeocodeFuture<'_>;
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    country: Option<String>,
    country_code: Option<String>,
    state: Option<String>,
    province: Option<String>,
    region: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    city_district: Option<String>,
    district: Option<String>,
    suburb: Option<String>,
    county: Option<String>,
}

impl From<NominatimAddress> for Address {
    fn from(addr: NominatimAddress) -> Self {
        // Prefer city > town > village > municipality for the primary place name
        let city = addr
            .city
            .or(addr.town)
            .or(addr.village)
            .or(addr.municipality);

        Address {
            country: addr.country,
            country_code: addr.country_code.map(|c| c.to_ascii_uppercase()),
            province: addr.state.or(addr.province).or(addr.region),
            city,
            district: addr
                .city_district
                .or(addr.district)
                .or(addr.suburb)
                .or(addr.county),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NominatimResolver {
    client: Client,
    endpoint: Url,
    language: String,
}

impl NominatimResolver {
    /// # Errors
    /// Fails if the endpoint is not a valid URL or the HTTP client cannot be built.
    pub fn new(endpoint: &str, language: &str, timeout: Duration) -> Result<Self, LocationError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| LocationError::GeocodeFailure(format!("invalid endpoint: {}", e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            language: language.to_string(),
        })
    }

    /// # Errors
    /// See [`NominatimResolver::new`].
    pub fn from_config(config: &GeocoderConfig) -> Result<Self, LocationError> {
        Self::new(
            &config.url,
            &config.language,
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn lookup(&self, coordinate: Coordinate) -> Result<Address, LocationError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("lat", coordinate.latitude.to_string()),
                ("lon", coordinate.longitude.to_string()),
                ("format", "jsonv2".to_string()),
                ("addressdetails", "1".to_string()),
                ("zoom", "14".to_string()),
                ("accept-language", self.language.clone()),
            ])
            .send()
            .await
            .map_err(|e| LocationError::GeocodeFailure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LocationError::GeocodeFailure(format!(
                "status {}",
                response.status()
            )));
        }

        let body: NominatimResponse = response
            .json()
            .await
            .map_err(|e| LocationError::GeocodeFailure(format!("parse error: {}", e)))?;

        if let Some(error) = body.error {
            return Err(LocationError::GeocodeFailure(error));
        }

        let address: Address = body
            .address
            .ok_or_else(|| LocationError::GeocodeFailure("no address in response".into()))?
            .into();

        if address.is_empty() {
            return Err(LocationError::GeocodeFailure("empty address".into()));
        }
        Ok(address)
    }
}

impl GeocodeResolver for NominatimResolver {
    fn resolve(&self, coordinate: Coordinate) -> GeocodeFuture<'_> {
        Box::pin(async move {
            match self.lookup(coordinate).await {
                Ok(address) => {
                    tracing::debug!(
                        city = address.city.as_deref().unwrap_or(""),
                        country = address.country_code.as_deref().unwrap_or(""),
                        "Reverse geocoded {}",
                        coordinate
                    );
                    Some(address)
                }
                Err(e) => {
                    tracing::debug!("Reverse geocode of {} failed: {}", coordinate, e);
                    None
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    fn parse(json: &str) -> Address {
        let response: NominatimResponse = serde_json::from_str(json).unwrap();
        response.address.unwrap().into()
    }

    #[test]
    fn test_address_mapping_prefers_city() {
        let address = parse(
            r#"{"address": {"city": "Mountain View", "town": "Ignored", "state": "California",
                "country": "United States", "country_code": "us", "suburb": "Old Mountain View"}}"#,
        );
        assert_eq!(address.city.as_deref(), Some("Mountain View"));
        assert_eq!(address.province.as_deref(), Some("California"));
        assert_eq!(address.country_code.as_deref(), Some("US"));
        assert_eq!(address.district.as_deref(), Some("Old Mountain View"));
    }

    #[test]
    fn test_address_mapping_falls_back_to_town() {
        let address = parse(r#"{"address": {"town": "Leavenworth", "county": "Chelan County"}}"#);
        assert_eq!(address.city.as_deref(), Some("Leavenworth"));
        assert_eq!(address.district.as_deref(), Some("Chelan County"));
        assert!(address.country.is_none());
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let err = NominatimResolver::new("not a url", "en", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, LocationError::GeocodeFailure(_)));
    }
}
