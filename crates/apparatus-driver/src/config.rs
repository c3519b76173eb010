//! 装置配置
//!
//! 启动时构造一次，以 `Arc<ApparatusConfig>` 传入各组件。
//! TOML 中缺省的字段取 `Default` 中的部署默认值。

use crate::error::ConfigError;
use apparatus_protocol::{CarouselId, LeverInput};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 装置配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApparatusConfig {
    pub server: ServerConfig,
    pub motion: MotionConfig,
    pub carousel1: CarouselConfig,
    pub carousel2: CarouselConfig,
    pub lever: LeverConfig,
    pub sound: SoundConfig,
}

impl ApparatusConfig {
    /// 从 TOML 文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.motion.full_step_deg > 0.0) || self.motion.microsteps == 0 {
            return Err(ConfigError::Invalid(format!(
                "step resolution must be positive (full_step_deg={}, microsteps={})",
                self.motion.full_step_deg, self.motion.microsteps
            )));
        }
        if self.motion.direction_sign != 1 && self.motion.direction_sign != -1 {
            return Err(ConfigError::Invalid(format!(
                "direction_sign must be 1 or -1, got {}",
                self.motion.direction_sign
            )));
        }
        let mut pins = HashSet::new();
        for input in LeverInput::ALL {
            let pin = self.lever.pin(input);
            if !pins.insert(pin) {
                return Err(ConfigError::Invalid(format!("duplicate lever pin {}", pin)));
            }
        }
        if self.server.max_frame_len == 0 {
            return Err(ConfigError::Invalid("max_frame_len must be non-zero".into()));
        }
        Ok(())
    }

    pub fn carousel(&self, id: CarouselId) -> &CarouselConfig {
        match id {
            CarouselId::First => &self.carousel1,
            CarouselId::Second => &self.carousel2,
        }
    }
}

/// 服务端监听配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub max_frame_len: usize,
    /// 心跳间隔（毫秒），0 表示不发送
    pub heartbeat_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 9001,
            max_frame_len: apparatus_protocol::DEFAULT_MAX_FRAME_LEN,
            heartbeat_interval_ms: 0,
        }
    }
}

/// 运动参数（两个转盘共用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// 整步角度（度）
    pub full_step_deg: f64,
    /// 细分数
    pub microsteps: u32,
    /// 步数符号：-1 表示正角度增量对应负步数
    pub direction_sign: i64,
    /// 首次运动后到校正运动前的等待
    pub settle_ms: u64,
    /// 投放时开门/关门后的停留
    pub deploy_dwell_ms: u64,
    /// 清空人类侧时的开门停留
    pub empty_human_dwell_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            full_step_deg: 0.5,
            microsteps: 8,
            direction_sign: -1,
            settle_ms: 100,
            deploy_dwell_ms: 1000,
            empty_human_dwell_ms: 2000,
        }
    }
}

impl MotionConfig {
    pub fn deg_per_step(&self) -> f64 {
        self.full_step_deg / self.microsteps as f64
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn deploy_dwell(&self) -> Duration {
        Duration::from_millis(self.deploy_dwell_ms)
    }

    pub fn empty_human_dwell(&self) -> Duration {
        Duration::from_millis(self.empty_human_dwell_ms)
    }
}

/// 单个转盘配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarouselConfig {
    /// 无编码器，按上次目标格估计位置
    pub sensorless: bool,
    /// 编码器零点寄存器
    pub encoder_zero_reg: u16,
    /// 门舵机自动断电时间（毫秒），0 表示不断电
    pub servo_timeout_ms: u64,
}

impl CarouselConfig {
    pub fn servo_timeout(&self) -> Option<Duration> {
        (self.servo_timeout_ms > 0).then(|| Duration::from_millis(self.servo_timeout_ms))
    }
}

/// 拉杆配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeverConfig {
    pub switch_io: u8,
    pub touch_io: u8,
    pub switch_up_io: u8,
    pub switch_io_bounce_ms: u64,
    pub touch_io_bounce_ms: u64,
    pub switch_up_io_bounce_ms: u64,
    /// 拉杆锁舵机自动断电时间（毫秒），0 表示不断电
    pub servo_timeout_ms: u64,
}

impl Default for LeverConfig {
    fn default() -> Self {
        Self {
            switch_io: 17,
            touch_io: 27,
            switch_up_io: 22,
            switch_io_bounce_ms: 50,
            touch_io_bounce_ms: 20,
            switch_up_io_bounce_ms: 50,
            servo_timeout_ms: 0,
        }
    }
}

impl LeverConfig {
    pub fn pin(&self, input: LeverInput) -> u8 {
        match input {
            LeverInput::Touch => self.touch_io,
            LeverInput::Pulled => self.switch_io,
            LeverInput::Released => self.switch_up_io,
        }
    }

    pub fn bounce(&self, input: LeverInput) -> Duration {
        Duration::from_millis(match input {
            LeverInput::Touch => self.touch_io_bounce_ms,
            LeverInput::Pulled => self.switch_io_bounce_ms,
            LeverInput::Released => self.switch_up_io_bounce_ms,
        })
    }

    pub fn input_for_pin(&self, pin: u8) -> Option<LeverInput> {
        LeverInput::ALL.into_iter().find(|&input| self.pin(input) == pin)
    }

    pub fn servo_timeout(&self) -> Option<Duration> {
        (self.servo_timeout_ms > 0).then(|| Duration::from_millis(self.servo_timeout_ms))
    }
}

/// 声音配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    pub sounds_path: PathBuf,
    pub default_file: String,
    /// `init_hw` 时以音量 0 预播放目录中的所有文件
    pub precache: bool,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            sounds_path: PathBuf::from("sounds"),
            default_file: "on-status.mp3".to_string(),
            precache: true,
        }
    }
}
