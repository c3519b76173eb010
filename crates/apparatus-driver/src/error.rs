//! 驱动层错误类型定义

use apparatus_hw::HwError;
use apparatus_protocol::COMPARTMENT_COUNT;
use std::path::PathBuf;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 硬件访问错误
    #[error("Hardware error: {0}")]
    Hw(#[from] HwError),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 格号越界
    #[error("Invalid compartment {0} (expected 0..={max})", max = COMPARTMENT_COUNT)]
    InvalidCompartment(u8),

    /// 转盘工作线程已退出
    #[error("Carousel worker stopped")]
    WorkerStopped,

    /// 创建线程失败
    #[error("Failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// 配置加载/校验错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
