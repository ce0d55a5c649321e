use std::io;

use thiserror::Error;

/// 读写器驱动错误。
#[derive(Debug, Error)]
pub enum DriverError {
    /// 串口链路故障（对当前读卡线程是致命的）。
    #[error("reader transport failure: {0}")]
    Transport(#[from] io::Error),
    #[error("reader protocol error: {0}")]
    Protocol(String),
    #[error("cannot connect to reader on {port}: {reason}")]
    Connect { port: String, reason: String },
}

impl DriverError {
    /// 链路级故障需要终止线程，其余错误只记录日志。
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::Transport(_))
    }
}

/// 读卡线程退出原因。
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("no serial port configured (setting `system_port`)")]
    NoPort,
    #[error("reader setup failed: {0}")]
    Setup(#[source] DriverError),
    #[error("reader link lost: {0}")]
    Transport(#[source] DriverError),
    #[error("ingestion queue disconnected")]
    QueueClosed,
}

/// 标签号 -> 卡号转换错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("tag identifier is empty")]
    EmptyTagId,
    #[error("invalid hex digit {0:?} in tag identifier")]
    InvalidHex(char),
}

/// 单条命令生成成绩失败（不影响结果线程继续运行）。
#[derive(Debug, Error)]
pub enum ResultError {
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("result model rejected result: {0}")]
    Model(String),
    #[error("result handling panicked: {0}")]
    Panicked(String),
}

/// 设置文件加载错误。
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings file: {0}")]
    Io(#[from] io::Error),
    #[error("invalid settings file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("settings file must contain a JSON object")]
    NotAnObject,
    #[error("setting `{0}` is missing")]
    Missing(String),
}
