use std::time::Duration;

use crate::error::DriverError;
use crate::model::TagRead;

/// 读写器天线编号（R2000 系列最多 4 根）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Antenna {
    Ant1,
    Ant2,
    Ant3,
    Ant4,
}

impl Antenna {
    pub const ALL: [Antenna; 4] = [Antenna::Ant1, Antenna::Ant2, Antenna::Ant3, Antenna::Ant4];

    /// 协议中的天线 ID（0 起）。
    pub fn as_u8(self) -> u8 {
        match self {
            Antenna::Ant1 => 0,
            Antenna::Ant2 => 1,
            Antenna::Ant3 => 2,
            Antenna::Ant4 => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Antenna::Ant1),
            1 => Some(Antenna::Ant2),
            2 => Some(Antenna::Ant3),
            3 => Some(Antenna::Ant4),
            _ => None,
        }
    }

    /// 前 `count` 根天线（限制在 1..=4）。
    pub fn first(count: u8) -> Vec<Antenna> {
        let count = count.clamp(1, Antenna::ALL.len() as u8) as usize;
        Antenna::ALL[..count].to_vec()
    }
}

/// 一次盘存指令。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InventoryPlan {
    /// 实时盘存当前工作天线。
    RealTime { repeat: u8 },
    /// 一条指令内快速切换多根天线盘存。
    FastSwitch { antennas: Vec<Antenna>, repeat: u8 },
}

/// 已连接的读写器句柄，仅由读卡线程持有。
pub trait ReaderDriver: Send {
    /// 启动驱动内部收发。
    fn start_worker(&mut self) -> Result<(), DriverError>;

    fn set_power(&mut self, dbm: u8) -> Result<(), DriverError>;

    fn set_work_antenna(&mut self, antenna: Antenna) -> Result<(), DriverError>;

    fn start_inventory(&mut self, plan: &InventoryPlan) -> Result<(), DriverError>;

    /// 等待一条解码后的读数，超时返回 `Ok(None)`。
    fn poll_tag(&mut self, timeout: Duration) -> Result<Option<TagRead>, DriverError>;

    /// 释放串口与驱动线程。
    fn close(&mut self);

    /// 诊断信息（回波损耗、天线连接检测等），失败不影响启动。
    fn diagnostics(&mut self) -> Result<String, DriverError> {
        Ok(String::new())
    }
}

/// 按串口打开读写器。每次启动读卡线程都会重新连接。
pub trait ReaderConnector: Send + Sync {
    fn connect(&self, port: &str, address: u8) -> Result<Box<dyn ReaderDriver>, DriverError>;
}
