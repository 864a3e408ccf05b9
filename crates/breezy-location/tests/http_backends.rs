//! Integration tests for the HTTP backends using wiremock.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use breezy_location::{
    Coordinate, Dispatcher, GeocodeResolver, GeolocateProvider, GrantedPermissions, LocationError,
    LocationProvider, LocationResolutionService, NominatimResolver, RequestOptions,
};
use tokio::sync::oneshot;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn geolocate_body(lat: f64, lng: f64, accuracy: f64) -> serde_json::Value {
    serde_json::json!({
        "location": { "lat": lat, "lng": lng },
        "accuracy": accuracy
    })
}

fn nominatim_body() -> serde_json::Value {
    serde_json::json!({
        "place_id": 1,
        "display_name": "Mountain View, Santa Clara County, California, United States",
        "address": {
            "town": "Mountain View",
            "county": "Santa Clara County",
            "state": "California",
            "country": "United States",
            "country_code": "us"
        }
    })
}

fn provider(server: &MockServer) -> GeolocateProvider {
    GeolocateProvider::new(
        &format!("{}/v1/geolocate", server.uri()),
        Duration::from_secs(5),
        Duration::from_secs(300),
        tokio::runtime::Handle::current(),
    )
    .unwrap()
}

fn resolver(server: &MockServer) -> NominatimResolver {
    NominatimResolver::new(&format!("{}/reverse", server.uri()), "en", Duration::from_secs(5))
        .unwrap()
}

#[tokio::test]
async fn test_geolocate_subscription_delivers_fix() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/geolocate"))
        .and(body_json(serde_json::json!({ "considerIp": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(geolocate_body(37.0, -122.0, 25.0)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = provider(&mock_server);
    assert!(provider.last_known_fix().is_none());

    let (tx, rx) = oneshot::channel();
    provider
        .subscribe_one_shot(Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }))
        .unwrap();

    let fix = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(fix.coordinate, Coordinate::new(37.0, -122.0));
    assert_eq!(fix.accuracy_meters, Some(25.0));

    // The fix is now served from the cache.
    assert_eq!(provider.last_known_fix(), Some(fix));
}

#[tokio::test]
async fn test_geolocate_error_status_reports_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/geolocate"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": { "code": 404, "message": "Not found" }
        })))
        .mount(&mock_server)
        .await;

    let provider = provider(&mock_server);
    let (tx, rx) = oneshot::channel();
    provider
        .subscribe_one_shot(Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }))
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, Err(LocationError::Provider(_))));
    assert!(provider.last_known_fix().is_none());
}

#[tokio::test]
async fn test_geolocate_server_error_ends_request_early() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/geolocate"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let network_timeout = Duration::from_secs(10);
    let service = LocationResolutionService::new(
        tokio::runtime::Handle::current(),
        Dispatcher::spawn("http-test-dispatch").unwrap(),
        Arc::new(resolver(&mock_server)),
        Arc::new(GrantedPermissions::all()),
    )
    .with_provider(Arc::new(provider(&mock_server)))
    .with_options(RequestOptions {
        poll_interval: Duration::from_millis(50),
        network_timeout,
        satellite_timeout: network_timeout,
    });

    let (tx, rx) = oneshot::channel();
    let started = std::time::Instant::now();
    service.request_location(true, move |result| {
        let _ = tx.send(result);
    });

    let result = tokio::time::timeout(Duration::from_secs(3), rx)
        .await
        .expect("request should end as soon as the backend fails")
        .unwrap();
    assert!(result.is_none());
    assert!(started.elapsed() < network_timeout / 2);
    assert!(!service.is_pending());
}

#[tokio::test]
async fn test_nominatim_reverse_success() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .and(query_param("format", "jsonv2"))
        .and(query_param("lat", "37"))
        .and(query_param("lon", "-122"))
        .and(query_param("accept-language", "en"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nominatim_body()))
        .mount(&mock_server)
        .await;

    let address = resolver(&mock_server)
        .resolve(Coordinate::new(37.0, -122.0))
        .await
        .expect("address");

    assert_eq!(address.country_code.as_deref(), Some("US"));
    assert_eq!(address.country.as_deref(), Some("United States"));
    assert_eq!(address.province.as_deref(), Some("California"));
    assert_eq!(address.city.as_deref(), Some("Mountain View"));
    assert_eq!(address.district.as_deref(), Some("Santa Clara County"));
}

#[tokio::test]
async fn test_nominatim_error_field_is_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "error": "Unable to geocode" })),
        )
        .mount(&mock_server)
        .await;

    let address = resolver(&mock_server).resolve(Coordinate::new(0.0, -160.0)).await;
    assert!(address.is_none());
}

#[tokio::test]
async fn test_nominatim_server_error_is_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let address = resolver(&mock_server).resolve(Coordinate::new(1.0, 1.0)).await;
    assert!(address.is_none());
}

#[tokio::test]
async fn test_service_end_to_end_over_http() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/geolocate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(geolocate_body(37.0, -122.0, 25.0)))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nominatim_body()))
        .mount(&mock_server)
        .await;

    let service = LocationResolutionService::new(
        tokio::runtime::Handle::current(),
        Dispatcher::spawn("http-test-dispatch").unwrap(),
        Arc::new(resolver(&mock_server)),
        Arc::new(GrantedPermissions::all()),
    )
    .with_provider(Arc::new(provider(&mock_server)))
    .with_options(RequestOptions {
        poll_interval: Duration::from_millis(50),
        network_timeout: Duration::from_secs(5),
        satellite_timeout: Duration::from_secs(5),
    });

    let (tx, rx) = oneshot::channel();
    service.request_location(true, move |result| {
        let _ = tx.send(result);
    });

    let result = tokio::time::timeout(Duration::from_secs(10), rx)
        .await
        .unwrap()
        .unwrap()
        .expect("location");
    assert_eq!(result.coordinate, Coordinate::new(37.0, -122.0));
    assert!(result.has_geocode_information);
    assert_eq!(result.country.as_deref(), Some("US"));
    assert_eq!(result.city.as_deref(), Some("Mountain View"));
    assert!(!result.regional_classification);
}
