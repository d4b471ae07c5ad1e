#[path = "../helpers/mod.rs"]
mod helpers;

use helpers::app::TestAppBuilder;
use helpers::fakes::FailingCollector;
use ips_relay::core::Collector;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn relay_metrics_are_exported() {
    let failing = Arc::new(FailingCollector::new());
    let app = TestAppBuilder::new()
        .with_config_modifier(|config| {
            config.metrics.enabled = true;
            config.metrics.listen_address = SocketAddr::from(([127, 0, 0, 1], 0));
        })
        .with_collectors(vec![failing.clone() as Arc<dyn Collector>])
        .with_real_metrics()
        .start()
        .await
        .unwrap();
    let metrics_addr = app.metrics_addr.expect("metrics should be enabled");

    app.post_alert("2024-01-01T00:00:00Z|1.2.3.4|5.6.7.8|US|Reversed|high|portscan|blocked")
        .await;
    app.post_alert("too|short").await;

    // Collector reports arrive asynchronously.
    let url = format!("http://{}/metrics", metrics_addr);
    let mut body = String::new();
    for _ in 0..50 {
        body = reqwest::get(&url).await.unwrap().text().await.unwrap();
        if body.contains("collector_sends_total") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(body.contains("alerts_received_total 2"), "{body}");
    assert!(body.contains("alerts_rejected_total 1"), "{body}");
    assert!(body.contains("registry_misses_total 2"), "{body}");
    assert!(body.contains("geo_defaults_total 2"), "{body}");
    assert!(body.contains(r#"store_writes_total{outcome="success"} 1"#), "{body}");
    assert!(
        body.contains(r#"collector_sends_total{collector="failing",outcome="failure"} 1"#),
        "{body}"
    );
    assert!(body.contains("enrichment_duration_seconds_bucket"), "{body}");

    app.shutdown(Duration::from_secs(5)).await.unwrap();
}
