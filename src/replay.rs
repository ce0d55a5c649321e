//! 回放读写器：按 JSON Lines 抓包文件回放读数，用于无硬件调试。
//!
//! 每行一个读数，例如 `{"epc": "30 00 00 01", "delay_ms": 250}`，
//! `delay_ms` 为距上一条读数的间隔。

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::driver::{Antenna, InventoryPlan, ReaderConnector, ReaderDriver};
use crate::error::{DriverError, SettingsError};
use crate::model::TagRead;

/// 回放中的一条读数。
#[derive(Clone, Debug, Deserialize)]
pub struct ReplayEntry {
    #[serde(flatten)]
    pub read: TagRead,
    #[serde(default)]
    pub delay_ms: u64,
}

/// 读数耗尽后的行为。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayEnd {
    /// 保持连接，之后轮询一直超时。
    Idle,
    /// 模拟串口断开（链路故障）。
    Disconnect,
}

pub struct ReplayConnector {
    entries: Arc<Vec<ReplayEntry>>,
    end: ReplayEnd,
}

impl ReplayConnector {
    pub fn new(entries: Vec<ReplayEntry>, end: ReplayEnd) -> Self {
        Self {
            entries: Arc::new(entries),
            end,
        }
    }

    /// 加载 JSON Lines 抓包文件，空行忽略。
    pub fn load(path: impl AsRef<Path>, end: ReplayEnd) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        let mut entries = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            entries.push(serde_json::from_str(line)?);
        }
        Ok(Self::new(entries, end))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ReaderConnector for ReplayConnector {
    fn connect(&self, port: &str, address: u8) -> Result<Box<dyn ReaderDriver>, DriverError> {
        log::info!(
            "Replaying {} reads as reader {} on {}",
            self.entries.len(),
            address,
            port
        );
        Ok(Box::new(ReplayDriver {
            entries: self.entries.clone(),
            end: self.end,
            cursor: 0,
            next_due: None,
        }))
    }
}

struct ReplayDriver {
    entries: Arc<Vec<ReplayEntry>>,
    end: ReplayEnd,
    cursor: usize,
    next_due: Option<Instant>,
}

impl ReplayDriver {
    fn schedule(&mut self, from: Instant) {
        self.next_due = self
            .entries
            .get(self.cursor)
            .map(|entry| from + Duration::from_millis(entry.delay_ms));
    }
}

impl ReaderDriver for ReplayDriver {
    fn start_worker(&mut self) -> Result<(), DriverError> {
        self.cursor = 0;
        self.schedule(Instant::now());
        Ok(())
    }

    fn set_power(&mut self, dbm: u8) -> Result<(), DriverError> {
        log::debug!("Replay reader power {} dBm", dbm);
        Ok(())
    }

    fn set_work_antenna(&mut self, antenna: Antenna) -> Result<(), DriverError> {
        log::debug!("Replay reader work antenna {:?}", antenna);
        Ok(())
    }

    fn start_inventory(&mut self, _plan: &InventoryPlan) -> Result<(), DriverError> {
        Ok(())
    }

    fn poll_tag(&mut self, timeout: Duration) -> Result<Option<TagRead>, DriverError> {
        let Some(due) = self.next_due else {
            return match self.end {
                ReplayEnd::Idle => {
                    thread::sleep(timeout);
                    Ok(None)
                }
                ReplayEnd::Disconnect => Err(DriverError::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "replay exhausted",
                ))),
            };
        };

        let now = Instant::now();
        if due > now {
            let wait = due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(wait);
        }

        let read = self.entries[self.cursor].read.clone();
        self.cursor += 1;
        self.schedule(due.max(now));
        Ok(Some(read))
    }

    fn close(&mut self) {
        self.next_due = None;
        log::debug!("Replay reader closed");
    }

    fn diagnostics(&mut self) -> Result<String, DriverError> {
        Ok(format!("replay cursor {}/{}", self.cursor, self.entries.len()))
    }
}
