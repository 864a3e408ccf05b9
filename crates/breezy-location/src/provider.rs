//! Location backends and the policy for choosing one.
//!
//! Every backend is reduced to the same small capability set: a synchronous
//! last-known accessor, a one-shot subscription and an unsubscribe. The race
//! between them is handled once, in [`crate::request`].

#[cfg(target_os = "linux")]
pub mod geoclue;
pub mod geolocate;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use breezy_core::PermissionsConfig;

use crate::types::{Fix, LocationError};

/// Receives exactly one outcome: a fix, or the error that ended the lookup.
/// Called on whatever thread the backend uses.
pub type FixListener = Box<dyn FnOnce(Result<Fix, LocationError>) + Send + 'static>;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Names one `subscribe_one_shot` call so that tearing it down can never
/// touch a later subscription on the same backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// A fresh id, unique for the life of the process.
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

/// Capability tier, most capable first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProviderKind {
    /// Fused network-assisted backend (Wi-Fi, cell, IP)
    Fused,
    /// Platform-native location service
    Native,
}

/// How the backend finds its position; decides the timeout budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Positioning {
    NetworkAssisted,
    SatelliteOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    CoarseLocation,
    FineLocation,
    Network,
}

impl Permission {
    fn is_location(self) -> bool {
        matches!(self, Permission::CoarseLocation | Permission::FineLocation)
    }
}

pub trait PermissionChecker: Send + Sync {
    fn is_granted(&self, permission: Permission) -> bool;
}

/// Fixed set of granted permissions.
#[derive(Debug, Clone, Default)]
pub struct GrantedPermissions(HashSet<Permission>);

impl GrantedPermissions {
    pub fn new(permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self(permissions.into_iter().collect())
    }

    pub fn all() -> Self {
        Self::new([
            Permission::CoarseLocation,
            Permission::FineLocation,
            Permission::Network,
        ])
    }
}

impl From<&PermissionsConfig> for GrantedPermissions {
    fn from(config: &PermissionsConfig) -> Self {
        let flags = [
            (config.coarse, Permission::CoarseLocation),
            (config.fine, Permission::FineLocation),
            (config.network, Permission::Network),
        ];
        Self::new(
            flags
                .into_iter()
                .filter_map(|(granted, permission)| granted.then_some(permission)),
        )
    }
}

impl PermissionChecker for GrantedPermissions {
    fn is_granted(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }
}

/// A pluggable backend capable of producing raw fixes.
///
/// Implementations must tolerate `unsubscribe` at any time, including after
/// the listener already fired or after a newer subscription replaced it; an
/// id that is not the current subscription is ignored.
pub trait LocationProvider: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    fn positioning(&self) -> Positioning;

    fn required_permissions(&self) -> &[Permission];

    /// Whether the backend can run at all on this device.
    fn is_available(&self) -> bool;

    /// A cached fix that can be returned without waiting.
    fn last_known_fix(&self) -> Option<Fix>;

    /// Ask for one update. The listener is dropped without being called if
    /// the subscription is cancelled first, and receives the error if the
    /// lookup fails after subscribing.
    ///
    /// # Errors
    /// Returns an error when the backend refuses the subscription outright.
    fn subscribe_one_shot(&self, listener: FixListener) -> Result<SubscriptionId, LocationError>;

    /// Tear down the subscription `id`, if it is still the current one.
    fn unsubscribe(&self, id: SubscriptionId);
}

impl std::fmt::Debug for dyn LocationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationProvider")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Pick the most capable provider whose permissions are granted and which is available.
///
/// Ties keep registration order.
///
/// # Errors
/// [`LocationError::PermissionDenied`] when no location permission is granted at all
/// or no provider has its permissions; [`LocationError::ProviderUnavailable`] when
/// permitted providers exist but none can run.
pub fn select_provider(
    providers: &[Arc<dyn LocationProvider>],
    permissions: &dyn PermissionChecker,
) -> Result<Arc<dyn LocationProvider>, LocationError> {
    let any_location = [Permission::CoarseLocation, Permission::FineLocation]
        .into_iter()
        .any(|p| permissions.is_granted(p));
    if !any_location {
        return Err(LocationError::PermissionDenied);
    }

    let mut permitted: Vec<&Arc<dyn LocationProvider>> = providers
        .iter()
        .filter(|provider| {
            let required = provider.required_permissions();
            let granted = required.iter().all(|p| permissions.is_granted(*p));
            if !granted {
                tracing::debug!(provider = provider.name(), "Skipping provider: permission missing");
            }
            granted && required.iter().any(|p| p.is_location())
        })
        .collect();

    if permitted.is_empty() {
        return Err(LocationError::PermissionDenied);
    }

    permitted.sort_by_key(|provider| provider.kind());

    permitted
        .into_iter()
        .find(|provider| {
            let available = provider.is_available();
            if !available {
                tracing::debug!(provider = provider.name(), "Skipping provider: unavailable");
            }
            available
        })
        .cloned()
        .ok_or(LocationError::ProviderUnavailable)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    struct Stub {
        name: &'static str,
        kind: ProviderKind,
        permissions: Vec<Permission>,
        available: bool,
    }

    impl LocationProvider for Stub {
        fn name(&self) -> &str {
            self.name
        }
        fn kind(&self) -> ProviderKind {
            self.kind
        }
        fn positioning(&self) -> Positioning {
            Positioning::NetworkAssisted
        }
        fn required_permissions(&self) -> &[Permission] {
            &self.permissions
        }
        fn is_available(&self) -> bool {
            self.available
        }
        fn last_known_fix(&self) -> Option<Fix> {
            None
        }
        fn subscribe_one_shot(&self, _listener: FixListener) -> Result<SubscriptionId, LocationError> {
            Ok(SubscriptionId::next())
        }
        fn unsubscribe(&self, _id: SubscriptionId) {}
    }

    fn stub(
        name: &'static str,
        kind: ProviderKind,
        permissions: &[Permission],
        available: bool,
    ) -> Arc<dyn LocationProvider> {
        Arc::new(Stub {
            name,
            kind,
            permissions: permissions.to_vec(),
            available,
        })
    }

    fn native() -> Arc<dyn LocationProvider> {
        stub("native", ProviderKind::Native, &[Permission::FineLocation], true)
    }

    fn fused(available: bool) -> Arc<dyn LocationProvider> {
        stub(
            "fused",
            ProviderKind::Fused,
            &[Permission::CoarseLocation, Permission::Network],
            available,
        )
    }

    #[test]
    fn test_prefers_fused_over_native() {
        let providers = vec![native(), fused(true)];
        let chosen = select_provider(&providers, &GrantedPermissions::all()).unwrap();
        assert_eq!(chosen.name(), "fused");
    }

    #[test]
    fn test_falls_back_to_native_when_fused_unavailable() {
        let providers = vec![fused(false), native()];
        let chosen = select_provider(&providers, &GrantedPermissions::all()).unwrap();
        assert_eq!(chosen.name(), "native");
    }

    #[test]
    fn test_falls_back_to_native_without_network_permission() {
        let providers = vec![fused(true), native()];
        let permissions =
            GrantedPermissions::new([Permission::CoarseLocation, Permission::FineLocation]);
        let chosen = select_provider(&providers, &permissions).unwrap();
        assert_eq!(chosen.name(), "native");
    }

    #[test]
    fn test_no_location_permission_is_denied() {
        let providers = vec![fused(true), native()];
        let permissions = GrantedPermissions::new([Permission::Network]);
        let err = select_provider(&providers, &permissions).unwrap_err();
        assert_eq!(err, LocationError::PermissionDenied);
    }

    #[test]
    fn test_nothing_available() {
        let providers = vec![fused(false)];
        let err = select_provider(&providers, &GrantedPermissions::all()).unwrap_err();
        assert_eq!(err, LocationError::ProviderUnavailable);
    }

    #[test]
    fn test_subscription_ids_are_distinct() {
        let first = SubscriptionId::next();
        let second = SubscriptionId::next();
        assert_ne!(first, second);
    }

    #[test]
    fn test_permissions_from_config() {
        let config = PermissionsConfig {
            coarse: true,
            fine: false,
            network: true,
        };
        let granted = GrantedPermissions::from(&config);
        assert!(granted.is_granted(Permission::CoarseLocation));
        assert!(!granted.is_granted(Permission::FineLocation));
        assert!(granted.is_granted(Permission::Network));
    }
}
