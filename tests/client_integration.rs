//! Integration tests for the surface client against a live server.

use std::time::Duration;

use axum::{Router, http::StatusCode, routing::get};
use chrono::Utc;
use tokio::net::TcpListener;

use emitterscope::api::{AppState, create_router, get_dashboard_metrics};
use emitterscope::capability::Surface;
use emitterscope::client::{ClientError, PageRequest, SurfaceClient};
use emitterscope::filters::{EnabledSet, FilterKey, FilterSpec, FilterValue};
use emitterscope::model::{Emitter, Observation};
use emitterscope::storage::Storage;

async fn seeded_storage() -> Storage {
    let storage = Storage::new("sqlite::memory:").await.unwrap();
    for (bssid, radio, level) in [
        ("AA:AA:AA:00:00:01", "W", -55),
        ("BB:BB:BB:00:00:02", "E", -75),
    ] {
        storage
            .upsert_emitter(&Emitter {
                bssid: bssid.into(),
                radio_type: Some(radio.into()),
                ..Emitter::default()
            })
            .await
            .unwrap();
        storage
            .insert_observation(&Observation {
                bssid: bssid.into(),
                lat: Some(52.0),
                lon: Some(13.0),
                level: Some(level),
                time: Utc::now(),
                ..Observation::default()
            })
            .await
            .unwrap();
    }
    storage
}

/// Serve `app` on an ephemeral port and return its base URL.
async fn spawn_server(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(base_url: &str, surface: Surface) -> SurfaceClient {
    SurfaceClient::new(base_url, surface).with_debounce(Duration::from_millis(10))
}

#[tokio::test]
async fn test_fetch_networks_reports_ignored_keys() {
    let base_url = spawn_server(create_router(AppState::new(seeded_storage().await))).await;
    let client = client(&base_url, Surface::Wardriving);

    let filters = FilterSpec::new()
        .with(FilterKey::RadioTypes, FilterValue::set(["W"]))
        .with(FilterKey::ThreatScoreMin, 90.0);
    let enabled = EnabledSet::new()
        .enable(FilterKey::RadioTypes)
        .enable(FilterKey::ThreatScoreMin);

    let page = client
        .fetch_networks(&filters, &enabled, &PageRequest::default())
        .await
        .unwrap();

    // The wardriving surface cannot apply threat filters, so only the radio
    // filter reaches the server.
    assert_eq!(page.ignored_keys, vec![FilterKey::ThreatScoreMin]);
    assert_eq!(page.body.pagination.total, 1);
    assert_eq!(page.body.data[0]["bssid"], "AA:AA:AA:00:00:01");
    assert_eq!(
        page.body.filter_transparency.applied_filters,
        vec![FilterKey::RadioTypes]
    );
}

#[tokio::test]
async fn test_fetch_geospatial_and_observations() {
    let base_url = spawn_server(create_router(AppState::new(seeded_storage().await))).await;
    let client = client(&base_url, Surface::MapExplorer);
    let selection = PageRequest {
        bssids: vec!["BB:BB:BB:00:00:02".into()],
        ..PageRequest::default()
    };

    let features = client
        .fetch_geospatial(&FilterSpec::new(), &EnabledSet::new(), &selection)
        .await
        .unwrap();
    assert_eq!(features.body.features.len(), 1);
    assert!(!features.body.truncated);

    let observations = client
        .fetch_observations(&FilterSpec::new(), &EnabledSet::new(), &selection)
        .await
        .unwrap();
    assert_eq!(observations.body.rows.len(), 1);
    assert_eq!(observations.body.pagination.total, 1);
}

#[tokio::test]
async fn test_rejected_request_carries_server_errors() {
    let base_url = spawn_server(create_router(AppState::new(seeded_storage().await))).await;
    let client = client(&base_url, Surface::Dashboard);

    // No selection: the observations route refuses the request.
    let result = client
        .fetch_observations(&FilterSpec::new(), &EnabledSet::new(), &PageRequest::default())
        .await;

    match result {
        Err(ClientError::Rejected { status, body }) => {
            assert_eq!(status, 400);
            assert_eq!(body["errors"][0]["parameter"], "bssids");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_dashboard_severity_degrades_to_zeros() {
    let state = AppState::new(seeded_storage().await);
    let app = Router::new()
        .route("/api/dashboard-metrics", get(get_dashboard_metrics))
        .route(
            "/api/v2/threats/severity-counts",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        )
        .with_state(state);
    let base_url = spawn_server(app).await;
    let client = client(&base_url, Surface::Dashboard);

    let tiles = client
        .fetch_dashboard(&FilterSpec::new(), &EnabledSet::new())
        .await
        .unwrap();

    assert_eq!(tiles.body.metrics.networks, 2);
    assert_eq!(tiles.body.metrics.by_radio.wifi, 1);
    assert_eq!(tiles.body.severity.none, 0);
    assert!(tiles.body.severity_error.is_some());
}

#[tokio::test]
async fn test_fetch_analytics() {
    let base_url = spawn_server(create_router(AppState::new(seeded_storage().await))).await;
    let client = client(&base_url, Surface::Analytics);

    let analytics = client
        .fetch_analytics(&FilterSpec::new(), &EnabledSet::new())
        .await
        .unwrap();

    assert_eq!(analytics.body.data["topNetworks"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_overlapping_requests_keep_only_the_latest() {
    let base_url = spawn_server(create_router(AppState::new(seeded_storage().await))).await;
    let client = SurfaceClient::new(&base_url, Surface::Dashboard)
        .with_debounce(Duration::from_millis(100));

    let wifi = FilterSpec::new().with(FilterKey::RadioTypes, FilterValue::set(["W"]));
    let ble = FilterSpec::new().with(FilterKey::RadioTypes, FilterValue::set(["E"]));
    let enabled = EnabledSet::new().enable(FilterKey::RadioTypes);
    let page = PageRequest::default();

    let (first, second) = tokio::join!(
        client.fetch_networks(&wifi, &enabled, &page),
        client.fetch_networks(&ble, &enabled, &page),
    );

    assert!(matches!(first, Err(ClientError::Superseded)));
    let second = second.unwrap();
    assert_eq!(second.body.data[0]["bssid"], "BB:BB:BB:00:00:02");
}
