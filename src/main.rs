use std::sync::Arc;

use anyhow::{Context, Result};
use breezy_core::{Config, ProviderChoice};
use breezy_location::{
    Dispatcher, GeolocateProvider, GrantedPermissions, LocationResolutionService,
    NominatimResolver, RegionClassifier, RequestOptions,
};

fn main() -> Result<()> {
    let (config, validation) = Config::load_validated()?;
    breezy_core::init(&config.logging)?;
    for warning in &validation.warnings {
        tracing::warn!("Config warning: {}", warning);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    let location = &config.location;
    let dispatcher = Dispatcher::spawn("breezy-callbacks").context("Failed to start dispatcher")?;
    let geocoder = NominatimResolver::from_config(&location.geocoder)?;

    let mut service = LocationResolutionService::new(
        runtime.handle().clone(),
        dispatcher,
        Arc::new(geocoder),
        Arc::new(GrantedPermissions::from(&location.permissions)),
    )
    .with_options(RequestOptions::from_config(location))
    .with_classifier(RegionClassifier::from_config(location));

    for choice in location.provider_choices()? {
        match choice {
            ProviderChoice::Geolocate if location.geolocate.enabled => {
                let provider = GeolocateProvider::from_config(location, runtime.handle().clone())?;
                service = service.with_provider(Arc::new(provider));
            }
            #[cfg(target_os = "linux")]
            ProviderChoice::GeoClue if location.geoclue.enabled => {
                let connected = runtime.block_on(breezy_location::GeoClueProvider::connect(
                    location,
                    runtime.handle().clone(),
                ));
                match connected {
                    Ok(provider) => service = service.with_provider(Arc::new(provider)),
                    Err(e) => tracing::warn!("GeoClue unavailable: {}", e),
                }
            }
            other => tracing::debug!(provider = ?other, "Provider disabled or unsupported here"),
        }
    }
    tracing::info!(providers = service.providers().len(), "Breezy location service ready");

    let (tx, rx) = std::sync::mpsc::channel();
    service.request_location(location.geocode, move |result| {
        if tx.send(result).is_err() {
            tracing::debug!("Location result arrived after main stopped waiting");
        }
    });

    let result = rx.recv().context("Location callback was dropped")?;
    match result {
        Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
        None => {
            println!("null");
            tracing::warn!("No location could be determined");
        }
    }

    drop(service);
    runtime.shutdown_timeout(std::time::Duration::from_secs(1));
    Ok(())
}
