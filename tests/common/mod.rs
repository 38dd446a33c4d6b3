// Shared test helpers: fake panel, recording messenger, temp store, local times
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tempfile::TempDir;
use traffic_reporter::error::{DeliveryError, FetchError};
use traffic_reporter::history_repo::{HistoryRepo, StoreSettings};
use traffic_reporter::models::Node;
use traffic_reporter::panel::{CounterSource, Counters};
use traffic_reporter::reader::ReaderConfig;
use traffic_reporter::service::TrafficService;
use traffic_reporter::telegram::{Messenger, Update};

pub const TZ: Tz = chrono_tz::Asia::Shanghai;
pub const CHAT_ID: &str = "-1001";

/// Instant for a wall-clock time in the statistics timezone.
pub fn local(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    TZ.with_ymd_and_hms(y, m, d, h, mi, 0)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn settings() -> StoreSettings {
    StoreSettings {
        timezone: TZ,
        sample_interval_secs: 300,
        sample_retention_hours: 720,
        hot_days: 60,
        retention_days: 400,
    }
}

/// Store in a temp dir; keep the TempDir alive for the test's duration.
pub async fn test_repo() -> (TempDir, Arc<HistoryRepo>) {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    (dir, repo)
}

/// A separate pool on the store file in `dir`, as a second process would open it.
pub async fn open_repo(dir: &TempDir) -> Arc<HistoryRepo> {
    let path = dir.path().join("traffic.db");
    let repo = HistoryRepo::connect(path.to_str().unwrap(), 2, settings())
        .await
        .unwrap();
    repo.init().await.unwrap();
    Arc::new(repo)
}

#[derive(Debug, Clone)]
pub enum FakeReading {
    Counters(u64, u64),
    Fail,
    Hang,
}

/// Panel stand-in whose readings tests set between cycles.
#[derive(Default)]
pub struct FakeSource {
    nodes: Mutex<BTreeMap<String, (Node, FakeReading)>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub list_fails: AtomicBool,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: &str, name: &str, reading: FakeReading) {
        self.nodes
            .lock()
            .unwrap()
            .insert(id.to_string(), (Node::new(id, name), reading));
    }

    pub fn counters(&self, id: &str, name: &str, up: u64, down: u64) {
        self.set(id, name, FakeReading::Counters(up, down));
    }

    pub fn remove(&self, id: &str) {
        self.nodes.lock().unwrap().remove(id);
    }

    /// Each fetch sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

impl CounterSource for FakeSource {
    async fn list_nodes(&self) -> anyhow::Result<Vec<Node>> {
        if self.list_fails.load(Ordering::SeqCst) {
            anyhow::bail!("panel unavailable");
        }
        let nodes = {
            let map = self.nodes.lock().unwrap();
            map.values().map(|(n, _)| n.clone()).collect()
        };
        Ok(nodes)
    }

    async fn fetch_counters(&self, node: &Node) -> Result<Counters, FetchError> {
        let (reading, delay) = {
            let map = self.nodes.lock().unwrap();
            let reading = map.get(&node.id).map(|(_, r)| r.clone());
            (reading, *self.delay.lock().unwrap())
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = match reading {
            Some(FakeReading::Counters(upload, download)) => Ok(Counters { upload, download }),
            Some(FakeReading::Fail) => Err(FetchError::Status(502)),
            Some(FakeReading::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(FetchError::Timeout)
            }
            None => Err(FetchError::Empty),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Messenger that records sent texts and serves queued updates.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<String>>,
    updates: Mutex<Vec<Update>>,
    pub fail: AtomicBool,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn queue(&self, update: Update) {
        self.updates.lock().unwrap().push(update);
    }
}

impl Messenger for RecordingMessenger {
    async fn send(&self, text: &str) -> Result<(), DeliveryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeliveryError::Exhausted {
                attempts: 3,
                last: Box::new(DeliveryError::Rejected {
                    status: 502,
                    description: "Bad Gateway".into(),
                }),
            });
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn poll(&self, _offset: Option<i64>) -> Result<Vec<Update>, DeliveryError> {
        let drained = std::mem::take(&mut *self.updates.lock().unwrap());
        Ok(drained)
    }
}

pub fn reader_config() -> ReaderConfig {
    ReaderConfig {
        workers: 4,
        timeout: Duration::from_millis(200),
    }
}

pub struct Harness {
    pub _dir: TempDir,
    pub repo: Arc<HistoryRepo>,
    pub source: Arc<FakeSource>,
    pub messenger: Arc<RecordingMessenger>,
    pub service: Arc<TrafficService<FakeSource, RecordingMessenger>>,
}

/// Another service on the harness's store file, source and messenger.
pub async fn second_service(h: &Harness) -> Arc<TrafficService<FakeSource, RecordingMessenger>> {
    let repo = open_repo(&h._dir).await;
    Arc::new(TrafficService::new(
        h.source.clone(),
        h.messenger.clone(),
        repo,
        reader_config(),
        3,
    ))
}

pub async fn harness() -> Harness {
    let (dir, repo) = test_repo().await;
    let source = Arc::new(FakeSource::new());
    let messenger = Arc::new(RecordingMessenger::new());
    let service = Arc::new(TrafficService::new(
        source.clone(),
        messenger.clone(),
        repo.clone(),
        reader_config(),
        3,
    ));
    Harness {
        _dir: dir,
        repo,
        source,
        messenger,
        service,
    }
}
