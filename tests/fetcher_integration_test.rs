use std::time::Duration;

use floodwatch::error::AppError;
use floodwatch::fetcher::{FeatureClient, FeatureQuery, FeatureSource, RetryPolicy};
use floodwatch::model::{SeverityTier, StationId};
use floodwatch::pipeline;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUERY_PATH: &str = "/gauges/FeatureServer/0/query";

fn client_for(server: &MockServer, max_retries: u32) -> FeatureClient {
    FeatureClient::with_options(
        &format!("{}{}", server.uri(), QUERY_PATH),
        FeatureQuery {
            where_clause: "1=1".to_string(),
            result_record_count: Some(100),
            order_by_fields: Some("CreationDate DESC".to_string()),
        },
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(5),
        },
        Duration::from_secs(5),
    )
    .expect("Failed to create client")
}

fn gauge_payload() -> serde_json::Value {
    json!({
        "features": [
            {
                "attributes": {
                    "objectid": 1, "gauge": "Hanwella", "basin": "Kelani River",
                    "water_level": 3.0, "rain_fall": 12.5,
                    "alertpull": 4.0, "minorpull": 5.0, "majorpull": 6.0,
                    "CreationDate": 100
                },
                "geometry": { "x": 80.08, "y": 6.91 }
            },
            {
                "attributes": {
                    "objectid": 2, "gauge": "Hanwella", "basin": "Kelani River",
                    "water_level": 4.0, "rain_fall": null,
                    "alertpull": 4.0, "minorpull": 5.0, "majorpull": 6.0,
                    "CreationDate": 200
                },
                "geometry": { "x": 80.08, "y": 6.91 }
            },
            {
                "attributes": {
                    "objectid": 3, "gauge": "Nagalagam Street", "basin": " Kelani River ",
                    "water_level": 7.0, "rain_fall": 0,
                    "alertpull": null, "minorpull": null, "majorpull": 6.5,
                    "CreationDate": 150
                }
            },
            {
                "attributes": {
                    "objectid": 4, "gauge": "", "basin": "Kelani River",
                    "water_level": 9.9, "CreationDate": 300
                }
            }
        ]
    })
}

/// Live query sends the fixed feature-query parameters
#[tokio::test]
async fn test_fetch_live_sends_query_parameters() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .and(query_param("where", "1=1"))
        .and(query_param("outFields", "*"))
        .and(query_param("f", "json"))
        .and(query_param("returnGeometry", "true"))
        .and(query_param("resultRecordCount", "100"))
        .and(query_param("orderByFields", "CreationDate DESC"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gauge_payload()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 0);
    let features = client.fetch_features().await.expect("fetch failed");
    assert_eq!(features.len(), 4);
    assert_eq!(features[0].attributes.station.as_deref(), Some("Hanwella"));
}

/// Fetched batch flows through the pipeline into the expected snapshots
#[tokio::test]
async fn test_fetch_and_process_end_to_end() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(gauge_payload()))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 0);
    let features = client.fetch_live().await.expect("fetch failed");
    let data = pipeline::process(&features);

    assert_eq!(data.stats.rejected, 1);
    assert_eq!(data.snapshots.len(), 2);

    let hanwella = &data.snapshots[&StationId::from_label("Hanwella")];
    assert_eq!(hanwella.level, 4.0);
    assert_eq!(hanwella.rainfall, 0.0);
    assert_eq!(hanwella.tier, SeverityTier::Alert);
    assert!(hanwella.coordinates.is_placeable());

    let nagalagam = &data.snapshots[&StationId::from_label("Nagalagam Street")];
    assert_eq!(nagalagam.basin_id.as_str(), "kelani-river");
    assert_eq!(nagalagam.tier, SeverityTier::Major);
    assert!(!nagalagam.coordinates.is_placeable());

    assert_eq!(data.basins.len(), 1);
    assert_eq!(data.basins[0].name, "Kelani River");
    assert_eq!(data.basins[0].stations.len(), 2);
}

/// A feature with null or malformed attributes is rejected, not fatal to the poll
#[tokio::test]
async fn test_malformed_feature_keeps_rest_of_batch() {
    let mock_server = MockServer::start().await;

    let body = r#"{"features": [
        {"attributes": {"gauge": "Hanwella", "basin": "Kelani River", "water_level": 4.2,
                        "alertpull": 4.0, "CreationDate": 100}},
        {"attributes": null},
        {"attributes": {"gauge": "Glencourse", "basin": "Kelani River", "water_level": 1.0,
                        "CreationDate": 100}, "geometry": "n/a"}
    ]}"#;

    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 3);
    let features = client.fetch_live().await.expect("batch should decode");
    let data = pipeline::process(&features);

    assert_eq!(data.stats.total, 3);
    assert_eq!(data.stats.rejected, 1);
    assert_eq!(data.snapshots.len(), 2);
    assert_eq!(
        data.snapshots[&StationId::from_label("Hanwella")].tier,
        SeverityTier::Alert
    );
}

/// Transient server errors are retried until a success
#[tokio::test]
async fn test_fetch_retries_on_server_error() {
    let mock_server = MockServer::start().await;

    // First two requests fail with 500, third succeeds
    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(gauge_payload()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 3);
    let features = client.fetch_live().await.expect("retry should recover");
    assert_eq!(features.len(), 4);
}

/// Persistent failures surface after the retry budget is spent
#[tokio::test]
async fn test_fetch_gives_up_after_max_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 2);
    let result = client.fetch_live().await;

    match result {
        Err(AppError::Http(e)) => assert_eq!(e.status().map(|s| s.as_u16()), Some(503)),
        other => panic!("Expected Http error, got: {:?}", other),
    }
}

/// Non-2xx responses of any class are retried up to the bound
#[tokio::test]
async fn test_fetch_retries_client_error_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(429))
        .expect(4)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 3);
    match client.fetch_live().await {
        Err(AppError::Http(e)) => assert_eq!(e.status().map(|s| s.as_u16()), Some(429)),
        other => panic!("Expected Http error, got: {:?}", other),
    }
}

/// A 404 that clears up on retry still yields the batch
#[tokio::test]
async fn test_fetch_recovers_after_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "features": [] })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 3);
    let features = client.fetch_live().await.expect("retry should succeed");
    assert!(features.is_empty());
}

/// Malformed bodies count as transient and are retried
#[tokio::test]
async fn test_fetch_retries_malformed_json() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"features\": [ {\"attr"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 1);
    assert!(matches!(client.fetch_live().await, Err(AppError::Json(_))));
}

/// Query errors reported in a 200 body become service errors
#[tokio::test]
async fn test_fetch_surfaces_service_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": { "code": 400, "message": "Unable to complete operation.", "details": [] }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 3);
    match client.fetch_live().await {
        Err(AppError::Service { code, message }) => {
            assert_eq!(code, 400);
            assert!(message.contains("Unable to complete"));
        }
        other => panic!("Expected Service error, got: {:?}", other),
    }
}

/// Empty feature list is a valid, empty batch
#[tokio::test]
async fn test_fetch_empty_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 0);
    let features = client.fetch_live().await.expect("fetch failed");
    assert!(features.is_empty());
    assert!(pipeline::process(&features).basins.is_empty());
}

/// History query filters by gauge and returns an ascending series
#[tokio::test]
async fn test_fetch_history() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .and(query_param("orderByFields", "CreationDate ASC"))
        .and(query_param("resultRecordCount", "500"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "features": [
                { "attributes": {
                    "gauge": "Hanwella", "water_level": 3.2, "rain_fall": 1.0, "CreationDate": 2000
                } },
                { "attributes": {
                    "gauge": "Hanwella", "water_level": null, "rain_fall": null,
                    "CreationDate": 1000
                } }
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 0);
    let points = client.fetch_history("Hanwella", 48).await.expect("history failed");

    assert_eq!(points.len(), 2);
    assert_eq!(points[0].timestamp_ms, 1000);
    assert_eq!(points[0].level, 0.0);
    assert_eq!(points[1].level, 3.2);

    let requests = mock_server.received_requests().await.expect("recording enabled");
    let where_clause = requests[0]
        .url
        .query_pairs()
        .find(|(k, _)| k == "where")
        .map(|(_, v)| v.into_owned())
        .expect("where parameter");
    assert!(where_clause.starts_with("gauge = 'Hanwella' AND CreationDate >= "));
}
