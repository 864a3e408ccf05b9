use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::region::RegionClassifier;

/// WGS-84 position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Both components finite and inside the WGS-84 ranges
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.latitude, self.longitude)
    }
}

/// Administrative naming for a coordinate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub country: Option<String>,
    /// ISO 3166-1 alpha-2, upper case
    pub country_code: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        [
            &self.country,
            &self.country_code,
            &self.province,
            &self.city,
            &self.district,
        ]
        .iter()
        .all(|field| field.as_deref().map_or(true, |s| s.trim().is_empty()))
    }
}

/// A single raw position reading from a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub coordinate: Coordinate,
    /// Horizontal accuracy radius; `None` when the backend had no confidence
    pub accuracy_meters: Option<f64>,
    pub timestamp: DateTime<Utc>,
    /// Backend's own opinion on regional classification, if it has one
    pub region_hint: Option<bool>,
    /// Address the backend resolved itself (map SDK style backends)
    pub address: Option<Address>,
}

impl Fix {
    pub fn new(coordinate: Coordinate, accuracy_meters: Option<f64>) -> Self {
        Self {
            coordinate,
            accuracy_meters,
            timestamp: Utc::now(),
            region_hint: None,
            address: None,
        }
    }

    pub fn with_region_hint(mut self, hint: bool) -> Self {
        self.region_hint = Some(hint);
        self
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// A fix is only worth geocoding when it reports a usable accuracy and a valid position.
    pub fn is_trustworthy(&self) -> bool {
        self.coordinate.is_valid()
            && self
                .accuracy_meters
                .is_some_and(|accuracy| accuracy.is_finite() && accuracy >= 0.0)
    }

    /// Age relative to `now`; fixes from the future count as fresh.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Outcome of one successful resolution.
///
/// A failed resolution is represented by `None` at the callback, never by a
/// partially filled result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationResult {
    pub coordinate: Coordinate,
    pub has_geocode_information: bool,
    pub country: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub regional_classification: bool,
}

impl LocationResult {
    /// Build a result from a trusted fix and the address found for it (if any).
    ///
    /// The backend's own regional signal wins; otherwise the address heuristic
    /// decides, and without an address the flag stays false.
    pub fn from_fix(fix: &Fix, address: Option<Address>, classifier: &RegionClassifier) -> Self {
        let address = address.filter(|a| !a.is_empty());
        let heuristic = address.as_ref().map(|a| classifier.classify(a));
        let regional_classification = fix.region_hint.or(heuristic).unwrap_or(false);

        match address {
            Some(address) => Self {
                coordinate: fix.coordinate,
                has_geocode_information: true,
                country: address.country_code.or(address.country),
                province: address.province,
                city: address.city,
                district: address.district,
                regional_classification,
            },
            None => Self {
                coordinate: fix.coordinate,
                has_geocode_information: false,
                country: None,
                province: None,
                city: None,
                district: None,
                regional_classification,
            },
        }
    }
}

/// Identifier minted for each resolution attempt, strictly increasing per service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestToken(pub(crate) u64);

impl RequestToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a location request ended without a result, or why a backend call failed.
///
/// These never reach the completion callback; they are logged and collapsed
/// into an absent result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,
    #[error("No location provider available")]
    ProviderUnavailable,
    #[error("No fix within {0:?}")]
    AcquisitionTimeout(Duration),
    #[error("Fix reported no usable accuracy")]
    LowConfidenceFix,
    #[error("Reverse geocoding failed: {0}")]
    GeocodeFailure(String),
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Superseded by a newer request")]
    Superseded,
    #[error("Request cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for LocationError {
    fn from(e: reqwest::Error) -> Self {
        LocationError::Provider(e.to_string())
    }
}
