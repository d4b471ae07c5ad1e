#[path = "../helpers/mod.rs"]
mod helpers;

use helpers::app::TestAppBuilder;
use helpers::fakes::{
    FailingCollector, FailingStore, FakeFallback, FakeGeo, FakeRegistry, RecordingCollector,
};
use ips_relay::core::Collector;
use ips_relay::geo::{DEFAULT_LATITUDE, DEFAULT_LONGITUDE};
use ips_relay::server::{ACK_BODY, STORE_ERROR_BODY};
use reqwest::StatusCode;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const ALERT: &str = "2024-01-01T00:00:00Z|1.2.3.4|5.6.7.8|US|Reversed|high|portscan|blocked";
const WAIT: Duration = Duration::from_secs(5);

fn scenario_registry() -> Arc<FakeRegistry> {
    Arc::new(FakeRegistry::new().with_prefix(
        "1.2.3.4",
        "1.2.3.0/24",
        Some("Example Org (AS64512), example.com"),
    ))
}

fn scenario_geo() -> Arc<FakeGeo> {
    Arc::new(FakeGeo::new().with_country("US", "38.7945952", "-106.5348379"))
}

#[tokio::test]
async fn enriches_stores_and_forwards_an_alert() {
    let fallback = Arc::new(FakeFallback::new().failing_endpoint("http://fallback-a"));
    let geo = scenario_geo();
    let collector_a = Arc::new(RecordingCollector::new("collector-a"));
    let collector_b = Arc::new(RecordingCollector::new("collector-b"));

    let app = TestAppBuilder::new()
        .with_registry(scenario_registry())
        .with_fallback(fallback.clone())
        .with_geo(geo.clone())
        .with_collectors(vec![collector_a.clone(), collector_b.clone()])
        .start()
        .await
        .unwrap();

    let response = app.post_alert(ALERT).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), ACK_BODY);

    let lines = app.stored_lines().await;
    assert_eq!(lines.len(), 1);
    let record: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(record["ips-firewall"], "alert");
    assert_eq!(record["source_asn"], "AS64512");
    assert_eq!(record["source_as_name"], "Example Org");
    assert_eq!(record["source_as_domain"], "example.com");
    assert_eq!(record["destination_asn"], "Unknown");
    assert_eq!(record["destination_as_name"], "No data available from fallback");
    assert_eq!(record["destination_as_domain"], "Unknown");
    assert_eq!(record["destination_description"], "No data available from fallback");
    assert_eq!(record["source_country_latitude"], "38.7945952");
    assert_eq!(record["destination_country_latitude"], DEFAULT_LATITUDE);
    assert_eq!(record["destination_country_longitude"], DEFAULT_LONGITUDE);

    // The registry miss went to exactly one fallback endpoint.
    let calls = fallback.calls();
    assert_eq!(calls, vec![("http://fallback-a".to_string(), "5.6.7.8".to_string())]);
    // The denylisted country never reached the geocoder.
    assert_eq!(geo.calls(), vec!["US".to_string()]);

    let a = collector_a.wait_for(1, WAIT).await;
    let b = collector_b.wait_for(1, WAIT).await;
    assert_eq!(a.len(), 1);
    assert_eq!(a, b);
    assert!(a[0].starts_with("ips-firewall timestamp=2024-01-01T00:00:00Z "));
    assert!(a[0].contains(" source_as_name=Example.Org "));
    assert!(a[0].contains(" destination_as_name=No.data.available.from.fallback "));

    app.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn identical_alerts_are_not_deduplicated() {
    let collector_a = Arc::new(RecordingCollector::new("collector-a"));
    let collector_b = Arc::new(RecordingCollector::new("collector-b"));

    let app = TestAppBuilder::new()
        .with_registry(scenario_registry())
        .with_geo(scenario_geo())
        .with_collectors(vec![collector_a.clone(), collector_b.clone()])
        .start()
        .await
        .unwrap();

    for _ in 0..2 {
        assert_eq!(app.post_alert(ALERT).await.status(), StatusCode::OK);
    }

    let lines = app.stored_lines().await;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], lines[1]);

    let transmissions =
        collector_a.wait_for(2, WAIT).await.len() + collector_b.wait_for(2, WAIT).await.len();
    assert_eq!(transmissions, 4);

    app.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn store_failure_returns_500_and_skips_collectors() {
    let collector = Arc::new(RecordingCollector::new("collector-a"));

    let app = TestAppBuilder::new()
        .with_registry(scenario_registry())
        .with_store(Arc::new(FailingStore))
        .with_collectors(vec![collector.clone()])
        .start()
        .await
        .unwrap();

    let response = app.post_alert(ALERT).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text().await.unwrap(), STORE_ERROR_BODY);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(collector.lines().is_empty());

    app.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn short_alert_is_rejected() {
    let collector = Arc::new(RecordingCollector::new("collector-a"));
    let app = TestAppBuilder::new()
        .with_collectors(vec![collector.clone()])
        .start()
        .await
        .unwrap();

    let response = app.post_alert("2024-01-01T00:00:00Z|1.2.3.4|5.6.7.8").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.stored_lines().await.is_empty());
    assert!(collector.lines().is_empty());

    app.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn alert_with_extra_fields_is_accepted() {
    let collector = Arc::new(RecordingCollector::new("collector-a"));
    let app = TestAppBuilder::new()
        .with_collectors(vec![collector.clone()])
        .start()
        .await
        .unwrap();

    let response = app.post_alert(&format!("{ALERT}|sensor-7|extra")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let lines = app.stored_lines().await;
    assert_eq!(lines.len(), 1);
    let record: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(record["action"], "blocked");
    assert_eq!(collector.wait_for(1, WAIT).await.len(), 1);

    app.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn empty_body_is_rejected() {
    let app = TestAppBuilder::new().start().await.unwrap();

    let response = reqwest::Client::new()
        .post(app.url("/webhook"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn failing_collector_does_not_block_the_other() {
    let failing = Arc::new(FailingCollector::new());
    let healthy = Arc::new(RecordingCollector::new("collector-b"));

    let app = TestAppBuilder::new()
        .with_collectors(vec![failing.clone() as Arc<dyn Collector>, healthy.clone()])
        .start()
        .await
        .unwrap();

    let response = app.post_alert(ALERT).await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(healthy.wait_for(1, WAIT).await.len(), 1);
    assert_eq!(failing.attempts(), 1);

    app.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn response_does_not_wait_for_collectors() {
    let slow = Arc::new(RecordingCollector::new("slow").with_delay(Duration::from_secs(2)));

    let app = TestAppBuilder::new()
        .with_collectors(vec![slow.clone()])
        .start()
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let response = app.post_alert(ALERT).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(slow.lines().is_empty());

    assert_eq!(slow.wait_for(1, WAIT).await.len(), 1);
    app.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn fallback_misses_rotate_across_endpoints() {
    let fallback = Arc::new(FakeFallback::new());
    let app = TestAppBuilder::new()
        .with_fallback(fallback.clone())
        .start()
        .await
        .unwrap();

    // Both addresses miss the empty registry, so each alert makes two fallback calls.
    for _ in 0..3 {
        assert_eq!(app.post_alert(ALERT).await.status(), StatusCode::OK);
    }

    let calls = fallback.calls();
    assert_eq!(calls.len(), 6);
    let endpoints: HashSet<&str> = calls.iter().map(|(endpoint, _)| endpoint.as_str()).collect();
    assert_eq!(endpoints.len(), 3);
    for endpoint in ["http://fallback-a", "http://fallback-b", "http://fallback-c"] {
        let used = calls.iter().filter(|(e, _)| e == endpoint).count();
        assert_eq!(used, 2, "{endpoint} should serve an even share");
    }

    app.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let app = TestAppBuilder::new().start().await.unwrap();

    let response = reqwest::get(app.url("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");

    app.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn app_shuts_down_cleanly() {
    let app = TestAppBuilder::new().start().await.unwrap();
    let result = app.shutdown(WAIT).await;
    assert!(result.is_ok(), "App should shut down cleanly: {result:?}");
}
