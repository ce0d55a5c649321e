use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{ResultError, SettingsError};
use crate::model::{IngestionResult, PipelineConfig, ResultKind};

/// 串口设置项。
pub const SYSTEM_PORT_KEY: &str = "system_port";
/// 采集管线参数所在的设置项。
pub const PIPELINE_KEY: &str = "rfid";

/// 外部成绩模型：成绩工厂 + 比赛设置查询。
pub trait RaceModel: Send + Sync {
    fn create_result(&self, kind: ResultKind) -> Result<IngestionResult, ResultError>;

    fn setting(&self, key: &str) -> Option<Value>;
}

/// 读取设置项，缺失或类型不符时返回默认值。
pub fn get_setting<T: DeserializeOwned>(model: &dyn RaceModel, key: &str, default: T) -> T {
    match model.setting(key) {
        Some(Value::Null) | None => default,
        Some(value) => match serde_json::from_value(value) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("Setting {} has unexpected type: {}", key, err);
                default
            }
        },
    }
}

/// 基于 JSON 文件的比赛设置。
#[derive(Clone, Debug, Default)]
pub struct JsonRaceModel {
    settings: Map<String, Value>,
}

impl JsonRaceModel {
    pub fn new(settings: Map<String, Value>) -> Self {
        Self { settings }
    }

    /// 从文件加载设置（必须是 JSON 对象）。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, SettingsError> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(settings) => Ok(Self { settings }),
            _ => Err(SettingsError::NotAnObject),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.settings.insert(key.into(), value);
    }

    /// 独立运行时必须配置串口。
    pub fn required_port(&self) -> Result<String, SettingsError> {
        get_setting::<Option<String>>(self, SYSTEM_PORT_KEY, None)
            .ok_or_else(|| SettingsError::Missing(SYSTEM_PORT_KEY.to_string()))
    }

    /// 采集管线参数，未配置时使用默认值。
    pub fn pipeline_config(&self) -> PipelineConfig {
        get_setting(self, PIPELINE_KEY, PipelineConfig::default())
    }
}

impl RaceModel for JsonRaceModel {
    fn create_result(&self, kind: ResultKind) -> Result<IngestionResult, ResultError> {
        Ok(IngestionResult::new(kind))
    }

    fn setting(&self, key: &str) -> Option<Value> {
        self.settings.get(key).cloned()
    }
}
