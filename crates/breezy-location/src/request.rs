//! One logical "resolve my location" operation.
//!
//! Four things race to decide a request: the provider's one-shot listener, a
//! poll of the provider's last-known fix, the timeout, and cancellation. Each
//! goes through the same guarded transition out of `Active`, so only the first
//! one acts and the callback fires at most once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use breezy_core::LocationConfig;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::geocode::GeocodeResolver;
use crate::provider::{FixListener, LocationProvider, Positioning, SubscriptionId};
use crate::region::RegionClassifier;
use crate::types::{Address, Fix, LocationError, LocationResult, RequestToken};

/// Completion callback. Receives `None` whenever no usable location was found.
pub type LocationCallback = Box<dyn FnOnce(Option<LocationResult>) + Send + 'static>;

/// Timing knobs for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    pub poll_interval: Duration,
    pub network_timeout: Duration,
    pub satellite_timeout: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(300),
            network_timeout: Duration::from_secs(10),
            satellite_timeout: Duration::from_secs(60),
        }
    }
}

impl RequestOptions {
    pub fn from_config(config: &LocationConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            network_timeout: config.network_timeout(),
            satellite_timeout: config.satellite_timeout(),
        }
    }

    pub fn timeout_for(&self, positioning: Positioning) -> Duration {
        match positioning {
            Positioning::NetworkAssisted => self.network_timeout,
            Positioning::SatelliteOnly => self.satellite_timeout,
        }
    }
}

/// The one token per service that is allowed to act. Zero means none.
#[derive(Debug, Default)]
pub(crate) struct LiveToken(AtomicU64);

impl LiveToken {
    pub(crate) fn install(&self, token: RequestToken) {
        self.0.store(token.0, Ordering::SeqCst);
    }

    pub(crate) fn is_live(&self, token: RequestToken) -> bool {
        self.0.load(Ordering::SeqCst) == token.0
    }

    /// Retire `token` if it is still the live one. A newer token is left alone.
    pub(crate) fn retire(&self, token: RequestToken) -> bool {
        self.0
            .compare_exchange(token.0, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn current(&self) -> Option<RequestToken> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            value => Some(RequestToken(value)),
        }
    }
}

/// Collaborators shared by every request of one service.
#[derive(Clone)]
pub(crate) struct RequestContext {
    pub(crate) live: Arc<LiveToken>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) runtime: Handle,
    pub(crate) geocoder: Arc<dyn GeocodeResolver>,
    pub(crate) classifier: Arc<RegionClassifier>,
    pub(crate) options: RequestOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Active,
    /// A fix won the race; the result is being built (geocoding)
    Resolving,
    Completed,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Cancelled)
    }
}

/// Single-assignment holder of the caller's callback.
struct CallbackSlot(Option<LocationCallback>);

impl CallbackSlot {
    fn take(&mut self) -> Option<LocationCallback> {
        self.0.take()
    }
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Cached,
    Listener,
    Poll,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Trigger::Cached => "cached",
            Trigger::Listener => "listener",
            Trigger::Poll => "poll",
        }
    }
}

struct Inner {
    state: RequestState,
    slot: CallbackSlot,
}

pub struct SingleFlightLocationRequest {
    token: RequestToken,
    provider: Arc<dyn LocationProvider>,
    geocode: bool,
    ctx: RequestContext,
    inner: Mutex<Inner>,
    /// This request's own provider subscription, released at most once
    subscription: Mutex<Option<SubscriptionId>>,
    /// Cancelled when the request reaches a terminal state
    lifetime: CancellationToken,
    /// Cancelled when the race is decided; stops the poll loop and the timer
    racers: CancellationToken,
}

impl SingleFlightLocationRequest {
    pub(crate) fn new(
        token: RequestToken,
        provider: Arc<dyn LocationProvider>,
        geocode: bool,
        callback: LocationCallback,
        ctx: RequestContext,
    ) -> Self {
        let lifetime = CancellationToken::new();
        let racers = lifetime.child_token();
        Self {
            token,
            provider,
            geocode,
            ctx,
            inner: Mutex::new(Inner {
                state: RequestState::Idle,
                slot: CallbackSlot(Some(callback)),
            }),
            subscription: Mutex::new(None),
            lifetime,
            racers,
        }
    }

    pub fn token(&self) -> RequestToken {
        self.token
    }

    pub fn state(&self) -> RequestState {
        self.inner.lock().state
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// `Idle -> Active`. Takes the cached-fix fast path when the provider has one,
    /// otherwise subscribes the listener and starts the poll loop and the timer.
    pub(crate) fn start(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            if inner.state != RequestState::Idle {
                return;
            }
            inner.state = RequestState::Active;
        }
        tracing::info!(
            token = %self.token,
            provider = self.provider.name(),
            geocode = self.geocode,
            "Location request started"
        );

        if let Some(fix) = self.provider.last_known_fix() {
            self.on_fix(fix, Trigger::Cached);
            return;
        }

        let weak = Arc::downgrade(self);
        let listener: FixListener = Box::new(move |outcome| {
            if let Some(request) = weak.upgrade() {
                match outcome {
                    Ok(fix) => request.on_fix(fix, Trigger::Listener),
                    Err(e) => request.on_provider_error(e),
                }
            }
        });
        match self.provider.subscribe_one_shot(listener) {
            Ok(id) => *self.subscription.lock() = Some(id),
            Err(e) => {
                tracing::warn!(token = %self.token, "Subscription refused: {}", e);
                if self.claim() {
                    self.finish(None, Some(e));
                }
                return;
            }
        }

        // The race may already be over: the listener fired from inside
        // subscribe, or a cancel landed before the id was recorded.
        if self.racers.is_cancelled() {
            self.release_subscription();
            return;
        }
        self.spawn_poll();
        self.spawn_timeout();
    }

    fn spawn_poll(self: &Arc<Self>) {
        let request = Arc::clone(self);
        self.ctx.runtime.spawn(async move {
            let interval = request.ctx.options.poll_interval;
            while request.ctx.live.is_live(request.token) {
                tokio::select! {
                    _ = request.racers.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Some(fix) = request.provider.last_known_fix() {
                    request.on_fix(fix, Trigger::Poll);
                    return;
                }
            }
        });
    }

    fn spawn_timeout(self: &Arc<Self>) {
        let timeout = self.ctx.options.timeout_for(self.provider.positioning());
        let request = Arc::clone(self);
        self.ctx.runtime.spawn(async move {
            tokio::select! {
                _ = request.racers.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if request.claim() {
                        request.finish(None, Some(LocationError::AcquisitionTimeout(timeout)));
                    }
                }
            }
        });
    }

    /// The guarded check-and-act every racer goes through: `Active -> Resolving`.
    /// Returns false for everyone but the first caller.
    fn claim(&self) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state != RequestState::Active || !self.ctx.live.is_live(self.token) {
                return false;
            }
            inner.state = RequestState::Resolving;
        }
        self.release_subscription();
        self.racers.cancel();
        true
    }

    /// Unsubscribe this request's own listener. Never touches a subscription
    /// made by a newer request on the same provider.
    fn release_subscription(&self) {
        let id = self.subscription.lock().take();
        if let Some(id) = id {
            self.provider.unsubscribe(id);
        }
    }

    fn on_provider_error(&self, error: LocationError) {
        if self.claim() {
            self.finish(None, Some(error));
        } else {
            tracing::debug!(token = %self.token, "Late provider error ignored: {}", error);
        }
    }

    fn on_fix(self: &Arc<Self>, fix: Fix, trigger: Trigger) {
        if !self.claim() {
            tracing::debug!(token = %self.token, trigger = trigger.as_str(), "Late fix ignored");
            return;
        }
        tracing::debug!(
            token = %self.token,
            trigger = trigger.as_str(),
            accuracy = ?fix.accuracy_meters,
            "Fix won the race"
        );

        if !fix.is_trustworthy() {
            self.finish(None, Some(LocationError::LowConfidenceFix));
            return;
        }

        let request = Arc::clone(self);
        self.ctx.runtime.spawn(async move {
            let result = tokio::select! {
                _ = request.lifetime.cancelled() => return,
                result = request.resolve(fix) => result,
            };
            request.finish(Some(result), None);
        });
    }

    async fn resolve(&self, fix: Fix) -> LocationResult {
        if !self.geocode {
            return LocationResult::from_fix(&fix, None, &self.ctx.classifier);
        }

        let address = match fix.address.clone().filter(|a| !a.is_empty()) {
            Some(address) => Some(address),
            None => {
                let address = self.ctx.geocoder.resolve(fix.coordinate).await;
                if address.as_ref().map_or(true, Address::is_empty) {
                    let reason = LocationError::GeocodeFailure("no address found".into());
                    tracing::debug!(token = %self.token, "{}", reason);
                }
                address
            }
        };

        LocationResult::from_fix(&fix, address, &self.ctx.classifier)
    }

    /// `Resolving -> Completed`, delivering `result` through the callback slot.
    fn finish(&self, result: Option<LocationResult>, reason: Option<LocationError>) {
        let callback = {
            let mut inner = self.inner.lock();
            if inner.state != RequestState::Resolving {
                return;
            }
            inner.state = RequestState::Completed;
            inner.slot.take()
        };
        self.ctx.live.retire(self.token);
        self.lifetime.cancel();

        match (&result, reason) {
            (Some(result), _) => tracing::info!(
                token = %self.token,
                coordinate = %result.coordinate,
                geocoded = result.has_geocode_information,
                "Location resolved"
            ),
            (None, Some(reason)) => tracing::info!(
                token = %self.token,
                %reason,
                "Location request finished without a result"
            ),
            (None, None) => tracing::info!(
                token = %self.token,
                "Location request finished without a result"
            ),
        }

        self.deliver(callback, result);
    }

    /// Tear everything down and complete a still-pending callback with `None`.
    /// Returns false when the request had already finished.
    pub(crate) fn cancel(&self, reason: LocationError) -> bool {
        let callback = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return false;
            }
            inner.state = RequestState::Cancelled;
            inner.slot.take()
        };
        self.release_subscription();
        self.lifetime.cancel();
        self.ctx.live.retire(self.token);

        tracing::info!(token = %self.token, %reason, "Location request cancelled");
        self.deliver(callback, None);
        true
    }

    fn deliver(&self, callback: Option<LocationCallback>, result: Option<LocationResult>) {
        if let Some(callback) = callback {
            self.ctx.dispatcher.dispatch(move || callback(result));
        }
    }
}
