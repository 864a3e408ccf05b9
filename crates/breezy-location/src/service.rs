//! Façade that owns the live request and its callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::dispatch::Dispatcher;
use crate::geocode::GeocodeResolver;
use crate::provider::{select_provider, LocationProvider, PermissionChecker};
use crate::region::RegionClassifier;
use crate::request::{
    LiveToken, LocationCallback, RequestContext, RequestOptions, SingleFlightLocationRequest,
};
use crate::types::{LocationError, LocationResult, RequestToken};

/// Turns "where is the device" into exactly one callback per request.
///
/// At most one request is in flight; starting a new one cancels the previous
/// one, whose callback then receives `None`. Callbacks run on the
/// [`Dispatcher`] thread.
pub struct LocationResolutionService {
    providers: Vec<Arc<dyn LocationProvider>>,
    permissions: Arc<dyn PermissionChecker>,
    ctx: RequestContext,
    next_token: AtomicU64,
    current: Mutex<Option<Arc<SingleFlightLocationRequest>>>,
}

impl LocationResolutionService {
    pub fn new(
        runtime: Handle,
        dispatcher: Dispatcher,
        geocoder: Arc<dyn GeocodeResolver>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        Self {
            providers: Vec::new(),
            permissions,
            ctx: RequestContext {
                live: Arc::new(LiveToken::default()),
                dispatcher,
                runtime,
                geocoder,
                classifier: Arc::new(RegionClassifier::default()),
                options: RequestOptions::default(),
            },
            next_token: AtomicU64::new(1),
            current: Mutex::new(None),
        }
    }

    /// Register a backend. Registration order breaks ties between equally capable providers.
    pub fn with_provider(mut self, provider: Arc<dyn LocationProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.ctx.options = options;
        self
    }

    pub fn with_classifier(mut self, classifier: RegionClassifier) -> Self {
        self.ctx.classifier = Arc::new(classifier);
        self
    }

    pub fn providers(&self) -> &[Arc<dyn LocationProvider>] {
        &self.providers
    }

    /// Start resolving the current location, superseding any request in flight.
    ///
    /// `callback` is invoked exactly once on the dispatch thread: with a result,
    /// or with `None` if no usable fix was found, the request timed out, or it was
    /// cancelled or superseded.
    pub fn request_location<F>(&self, geocode: bool, callback: F) -> RequestToken
    where
        F: FnOnce(Option<LocationResult>) + Send + 'static,
    {
        let callback: LocationCallback = Box::new(callback);

        let mut current = self.current.lock();
        if let Some(previous) = current.take() {
            previous.cancel(LocationError::Superseded);
        }

        let token = RequestToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        self.ctx.live.install(token);

        let provider = match select_provider(&self.providers, self.permissions.as_ref()) {
            Ok(provider) => provider,
            Err(reason) => {
                tracing::info!(token = %token, %reason, "No usable location provider");
                self.ctx.live.retire(token);
                self.ctx.dispatcher.dispatch(move || callback(None));
                return token;
            }
        };

        let request = Arc::new(SingleFlightLocationRequest::new(
            token,
            provider,
            geocode,
            callback,
            self.ctx.clone(),
        ));
        *current = Some(Arc::clone(&request));
        drop(current);

        request.start();
        token
    }

    /// Stop outstanding work. A pending callback receives `None`; calling this
    /// again, or after completion, does nothing.
    pub fn cancel(&self) {
        let request = self.current.lock().take();
        if let Some(request) = request {
            request.cancel(LocationError::Cancelled);
        }
    }

    /// Token of the request still racing or resolving, if any.
    pub fn current_token(&self) -> Option<RequestToken> {
        self.ctx.live.current()
    }

    pub fn is_pending(&self) -> bool {
        self.current_token().is_some()
    }
}

impl Drop for LocationResolutionService {
    fn drop(&mut self) {
        self.cancel();
    }
}
