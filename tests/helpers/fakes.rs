#![allow(dead_code)]
//! In-memory stand-ins for the relay's external services.

use async_trait::async_trait;
use ips_relay::core::{
    AlertStore, Collector, Coordinates, DeliveryError, EnrichedAlert, FallbackAnswer,
    FallbackLookup, GeoLookup, LookupError, PrefixRecord, RegistryLookup, StoreError,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// A registry that knows a fixed set of addresses.
#[derive(Default)]
pub struct FakeRegistry {
    records: Mutex<HashMap<String, PrefixRecord>>,
    lookups: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(self, ip: &str, prefix: &str, description: Option<&str>) -> Self {
        self.records.lock().unwrap().insert(
            ip.to_string(),
            PrefixRecord {
                prefix: prefix.to_string(),
                description: description.map(str::to_string),
            },
        );
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegistryLookup for FakeRegistry {
    async fn lookup(&self, ip: &str) -> Result<Option<PrefixRecord>, LookupError> {
        self.lookups.lock().unwrap().push(ip.to_string());
        Ok(self.records.lock().unwrap().get(ip).cloned())
    }
}

/// A fallback client that answers every endpoint the same way and records
/// which endpoint each address was sent to.
#[derive(Default)]
pub struct FakeFallback {
    answers: Mutex<HashMap<String, Option<String>>>,
    failing_endpoints: Mutex<Vec<String>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeFallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answer(self, ip: &str, description: Option<&str>) -> Self {
        self.answers
            .lock()
            .unwrap()
            .insert(ip.to_string(), description.map(str::to_string));
        self
    }

    pub fn failing_endpoint(self, endpoint: &str) -> Self {
        self.failing_endpoints
            .lock()
            .unwrap()
            .push(endpoint.to_string());
        self
    }

    /// `(endpoint, ip)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FallbackLookup for FakeFallback {
    async fn lookup(&self, endpoint: &str, ip: &str) -> Result<FallbackAnswer, LookupError> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.to_string(), ip.to_string()));
        if self.failing_endpoints.lock().unwrap().iter().any(|e| e == endpoint) {
            return Err(LookupError::Url(endpoint.to_string()));
        }
        let description = self.answers.lock().unwrap().get(ip).cloned().flatten();
        Ok(FallbackAnswer { description })
    }
}

/// A geocoder with a fixed country table. Unknown countries fail.
#[derive(Default)]
pub struct FakeGeo {
    countries: Mutex<HashMap<String, Coordinates>>,
    calls: Mutex<Vec<String>>,
}

impl FakeGeo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_country(self, country: &str, latitude: &str, longitude: &str) -> Self {
        self.countries
            .lock()
            .unwrap()
            .insert(country.to_string(), Coordinates::new(latitude, longitude));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GeoLookup for FakeGeo {
    async fn coordinates(&self, country: &str) -> Result<Coordinates, LookupError> {
        self.calls.lock().unwrap().push(country.to_string());
        self.countries
            .lock()
            .unwrap()
            .get(country)
            .cloned()
            .ok_or_else(|| LookupError::Url(format!("no coordinates for {country}")))
    }
}

/// A store that always fails.
pub struct FailingStore;

#[async_trait]
impl AlertStore for FailingStore {
    async fn append(&self, _alert: &EnrichedAlert) -> Result<(), StoreError> {
        Err(StoreError::Io {
            path: "/unwritable/alerts.json".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }
}

/// A collector that keeps every line it is asked to send.
pub struct RecordingCollector {
    name: String,
    lines: Mutex<Vec<String>>,
    notify: Notify,
    delay: Option<Duration>,
}

impl RecordingCollector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            lines: Mutex::new(Vec::new()),
            notify: Notify::new(),
            delay: None,
        }
    }

    /// Makes every send take `delay` before it is recorded.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    /// Waits until at least `count` lines have been recorded.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<String> {
        let _ = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.lines.lock().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await;
        self.lines()
    }
}

#[async_trait]
impl Collector for RecordingCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, line: &str) -> Result<(), DeliveryError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.lines.lock().unwrap().push(line.to_string());
        self.notify.notify_waiters();
        Ok(())
    }
}

/// A collector whose every send fails.
pub struct FailingCollector {
    attempts: Mutex<usize>,
}

impl FailingCollector {
    pub fn new() -> Self {
        Self {
            attempts: Mutex::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Collector for FailingCollector {
    fn name(&self) -> &str {
        "failing"
    }

    async fn send(&self, _line: &str) -> Result<(), DeliveryError> {
        *self.attempts.lock().unwrap() += 1;
        Err(DeliveryError::Rejected("collector unreachable".to_string()))
    }
}
