use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 驱动解码后的原始读卡数据（EPC + 轮询结束标记）。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TagRead {
    pub epc: String,
    #[serde(default)]
    pub read_complete: bool,
}

impl TagRead {
    /// 构造一条普通标签读数。
    pub fn tag(epc: impl Into<String>) -> Self {
        Self {
            epc: epc.into(),
            read_complete: false,
        }
    }

    /// 构造一次盘存结束标记（无 EPC）。
    pub fn cycle_complete() -> Self {
        Self {
            epc: String::new(),
            read_complete: true,
        }
    }

    /// 是否只是结束标记，不带标签。
    pub fn is_marker_only(&self) -> bool {
        self.epc.trim().is_empty()
    }
}

/// 读卡线程收到的标签事件（带到达时间）。
#[derive(Clone, Debug)]
pub struct TagEvent {
    pub tag_id: String,
    pub received_at: Instant,
    pub read_complete: bool,
}

impl TagEvent {
    /// 由驱动读数生成事件。
    pub fn from_read(read: TagRead, received_at: Instant) -> Self {
        Self {
            tag_id: read.epc,
            received_at,
            read_complete: read.read_complete,
        }
    }
}

/// 队列命令类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommandKind {
    CardData,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::CardData => "card_data",
        }
    }
}

/// 读卡线程 -> 结果线程的队列信封。
#[derive(Clone, Debug)]
pub struct IngestionCommand {
    pub kind: CommandKind,
    pub event: TagEvent,
    pub captured_at: DateTime<Local>,
}

impl IngestionCommand {
    /// 为通过去重的标签事件生成 card_data 命令。
    pub fn card_data(event: TagEvent, captured_at: DateTime<Local>) -> Self {
        Self {
            kind: CommandKind::CardData,
            event,
            captured_at,
        }
    }
}

/// 成绩来源类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    RfidImpinj,
}

/// 交给外部成绩模型的成绩记录。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngestionResult {
    pub kind: ResultKind,
    pub card_number: u64,
    pub finish_time: Option<DateTime<Local>>,
}

impl IngestionResult {
    /// 创建空成绩（卡号/时间待填充）。
    pub fn new(kind: ResultKind) -> Self {
        Self {
            kind,
            card_number: 0,
            finish_time: None,
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// 天线轮换策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntennaPolicy {
    /// 空闲时一次快速切换盘存覆盖全部天线。
    #[default]
    FastSwitch,
    /// 空闲时只盘存当前天线，收到结束标记后切到下一根。
    Stepping,
}

/// 采集管线运行参数（可配置项）。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub poll_interval_ms: u64,
    pub enqueue_timeout_ms: u64,
    pub dequeue_timeout_ms: u64,
    pub startup_delay_ms: u64,
    pub dedup_window_ms: u64,
    pub antenna_count: u8,
    pub antenna_policy: AntennaPolicy,
    pub inventory_repeat: u8,
    pub power_dbm: u8,
    pub reader_address: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            poll_interval_ms: 100,
            enqueue_timeout_ms: 1000,
            dequeue_timeout_ms: 5000,
            startup_delay_ms: 1000,
            dedup_window_ms: 15_000,
            antenna_count: 4,
            antenna_policy: AntennaPolicy::FastSwitch,
            inventory_repeat: 10,
            power_dbm: 22,
            reader_address: 1,
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    /// 队列容量至少为 1（crossbeam 的 0 容量是同步交接）。
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}
