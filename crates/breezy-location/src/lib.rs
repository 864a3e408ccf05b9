//! Location acquisition for Breezy.
//!
//! Resolves the device position through one of several unreliable backends
//! and optionally reverse-geocodes it, delivering exactly one result (or an
//! explicit absence) per request.

pub mod dispatch;
pub mod geocode;
pub mod provider;
pub mod region;
pub mod request;
pub mod service;
pub mod types;

pub use dispatch::Dispatcher;
pub use geocode::{GeocodeResolver, NominatimResolver};
pub use provider::geolocate::GeolocateProvider;
pub use provider::{
    select_provider, FixListener, GrantedPermissions, LocationProvider, Permission,
    PermissionChecker, Positioning, ProviderKind, SubscriptionId,
};
pub use region::RegionClassifier;
pub use request::{LocationCallback, RequestOptions, RequestState};
pub use service::LocationResolutionService;
pub use types::*;

#[cfg(target_os = "linux")]
pub use provider::geoclue::GeoClueProvider;
