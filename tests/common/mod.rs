#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rfid_ingest::replay::{ReplayConnector, ReplayEnd, ReplayEntry};
use rfid_ingest::settings::SYSTEM_PORT_KEY;
use rfid_ingest::{
    Antenna, DriverError, IngestionClient, IngestionResult, InventoryPlan, JsonRaceModel,
    PipelineConfig, ReaderConnector, ReaderDriver, Signal, TagRead,
};

pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        queue_capacity: 64,
        poll_interval_ms: 5,
        enqueue_timeout_ms: 50,
        dequeue_timeout_ms: 20,
        startup_delay_ms: 0,
        ..PipelineConfig::default()
    }
}

pub fn model_with_port(port: &str) -> JsonRaceModel {
    let mut model = JsonRaceModel::default();
    model.set(SYSTEM_PORT_KEY, serde_json::json!(port));
    model
}

pub fn entry(epc: &str, delay_ms: u64) -> ReplayEntry {
    ReplayEntry {
        read: TagRead::tag(epc),
        delay_ms,
    }
}

/// Replay connector that counts connections and refuses the first `fail_first`.
pub struct CountingConnector {
    inner: ReplayConnector,
    fail_first: usize,
    close_delay: Duration,
    pub connects: AtomicUsize,
}

impl CountingConnector {
    pub fn new(entries: Vec<ReplayEntry>, end: ReplayEnd, fail_first: usize) -> Self {
        Self {
            inner: ReplayConnector::new(entries, end),
            fail_first,
            close_delay: Duration::ZERO,
            connects: AtomicUsize::new(0),
        }
    }

    /// Drivers handed out block this long in `close()`.
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl ReaderConnector for CountingConnector {
    fn connect(&self, port: &str, address: u8) -> Result<Box<dyn ReaderDriver>, DriverError> {
        let attempt = self.connects.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(DriverError::Connect {
                port: port.to_string(),
                reason: "port busy".to_string(),
            });
        }
        let driver = self.inner.connect(port, address)?;
        if self.close_delay.is_zero() {
            return Ok(driver);
        }
        Ok(Box::new(SlowCloseDriver {
            inner: driver,
            delay: self.close_delay,
        }))
    }
}

/// Driver whose `close()` takes a while, like a serial port flushing on release.
struct SlowCloseDriver {
    inner: Box<dyn ReaderDriver>,
    delay: Duration,
}

impl ReaderDriver for SlowCloseDriver {
    fn start_worker(&mut self) -> Result<(), DriverError> {
        self.inner.start_worker()
    }

    fn set_power(&mut self, dbm: u8) -> Result<(), DriverError> {
        self.inner.set_power(dbm)
    }

    fn set_work_antenna(&mut self, antenna: Antenna) -> Result<(), DriverError> {
        self.inner.set_work_antenna(antenna)
    }

    fn start_inventory(&mut self, plan: &InventoryPlan) -> Result<(), DriverError> {
        self.inner.start_inventory(plan)
    }

    fn poll_tag(&mut self, timeout: Duration) -> Result<Option<TagRead>, DriverError> {
        self.inner.poll_tag(timeout)
    }

    fn close(&mut self) {
        thread::sleep(self.delay);
        self.inner.close();
    }
}

#[derive(Clone, Default)]
pub struct Collector(pub Arc<Mutex<Vec<IngestionResult>>>);

impl Collector {
    pub fn attach(&self, client: &IngestionClient) {
        let sink = self.0.clone();
        client.register_callback(move |result| sink.lock().push(result));
    }

    pub fn card_numbers(&self) -> Vec<u64> {
        self.0.lock().iter().map(|r| r.card_number).collect()
    }

    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.0.lock().len() >= count)
    }
}

pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

pub fn client_with(
    connector: Arc<dyn ReaderConnector>,
    port: Option<&str>,
    config: PipelineConfig,
) -> (IngestionClient, Signal) {
    let model = match port {
        Some(port) => model_with_port(port),
        None => JsonRaceModel::default(),
    };
    let shutdown = Signal::new();
    let client = IngestionClient::new(connector, Arc::new(model), config, shutdown.clone());
    (client, shutdown)
}
