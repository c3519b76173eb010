//! 封闭命令集
//!
//! 命令名先在 [`COMMAND_NAMES`] 中查找，未知名称在解析参数之前即被拒绝；
//! 已知名称再按对应变体的字段模式解析参数。

use crate::color::Color;
use crate::error::CommandError;
use crate::ids::{CarouselId, LeverInput};
use crate::message::CommandFrame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// 支持的命令名
pub const COMMAND_NAMES: [&str; 13] = [
    "init_hw",
    "hw_self_test",
    "play_sound",
    "empty_human",
    "move_to",
    "move_to_wait",
    "deploy",
    "deploy_wait",
    "set_test_light",
    "set_human_light",
    "set_light",
    "set_lever_open",
    "wait_lever_state",
];

/// 类型化命令
///
/// 线上形式为 `{"func": <name>, "args": {...}}`，与 [`CommandFrame`] 一致。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "func", content = "args", rename_all = "snake_case")]
pub enum Command {
    /// 硬件复位到默认状态
    InitHw {},
    /// 遍历所有运动与输出的自检
    HwSelfTest {},
    PlaySound {
        /// 相对声音目录的文件名，缺省为配置中的默认文件
        #[serde(default)]
        file: Option<String>,
        #[serde(default = "default_volume")]
        volume: u8,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    /// 打开人类侧门并清空两个转盘
    EmptyHuman {},
    MoveTo {
        carousel_id: CarouselId,
        compartment_id: u8,
        #[serde(default)]
        monkey: bool,
        #[serde(default)]
        blocking: bool,
    },
    MoveToWait {
        carousel_id: CarouselId,
        /// 秒；缺省或负数表示无限等待
        #[serde(default)]
        timeout: Option<f64>,
        #[serde(default)]
        spinlock: bool,
    },
    Deploy {
        carousel_id: CarouselId,
        compartment_id: u8,
        #[serde(default)]
        monkey: bool,
        #[serde(default)]
        blocking: bool,
    },
    DeployWait {
        carousel_id: CarouselId,
        #[serde(default)]
        timeout: Option<f64>,
        #[serde(default)]
        spinlock: bool,
    },
    SetTestLight {
        state: bool,
        #[serde(default)]
        color: Option<Color>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    SetHumanLight {
        state: bool,
        #[serde(default)]
        color: Option<Color>,
    },
    SetLight {
        color: Color,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    SetLeverOpen {
        state: bool,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    WaitLeverState {
        pin_io: LeverInput,
        state: bool,
        #[serde(default)]
        timeout: Option<f64>,
        #[serde(default)]
        spinlock: bool,
    },
}

fn default_volume() -> u8 {
    90
}

impl Command {
    /// 线上命令名
    pub fn name(&self) -> &'static str {
        match self {
            Command::InitHw {} => "init_hw",
            Command::HwSelfTest {} => "hw_self_test",
            Command::PlaySound { .. } => "play_sound",
            Command::EmptyHuman {} => "empty_human",
            Command::MoveTo { .. } => "move_to",
            Command::MoveToWait { .. } => "move_to_wait",
            Command::Deploy { .. } => "deploy",
            Command::DeployWait { .. } => "deploy_wait",
            Command::SetTestLight { .. } => "set_test_light",
            Command::SetHumanLight { .. } => "set_human_light",
            Command::SetLight { .. } => "set_light",
            Command::SetLeverOpen { .. } => "set_lever_open",
            Command::WaitLeverState { .. } => "wait_lever_state",
        }
    }

    /// 定时执行时刻（仅可定时的命令）
    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Command::PlaySound { timestamp, .. }
            | Command::SetTestLight { timestamp, .. }
            | Command::SetLight { timestamp, .. }
            | Command::SetLeverOpen { timestamp, .. } => *timestamp,
            _ => None,
        }
    }

    /// 从未类型化的命令帧解析
    pub fn from_frame(frame: &CommandFrame) -> Result<Self, CommandError> {
        if !COMMAND_NAMES.contains(&frame.func.as_str()) {
            return Err(CommandError::UnknownCommand(frame.func.clone()));
        }
        let mut tagged = Map::new();
        tagged.insert("func".to_string(), Value::String(frame.func.clone()));
        tagged.insert("args".to_string(), Value::Object(frame.args.clone()));
        serde_json::from_value(Value::Object(tagged)).map_err(|source| {
            CommandError::InvalidArguments {
                func: frame.func.clone(),
                source,
            }
        })
    }

    /// 转换为命令帧
    pub fn to_frame(&self) -> Result<CommandFrame, CommandError> {
        serde_json::to_value(self)
            .and_then(serde_json::from_value)
            .map_err(CommandError::Encode)
    }
}

/// 协议中的超时参数（秒）转换为 `Duration`
///
/// `None`、负数、非有限值与超出 `Duration` 表示范围的值都表示无限等待。
pub fn wait_timeout(secs: Option<f64>) -> Option<Duration> {
    secs.and_then(|s| Duration::try_from_secs_f64(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(value: Value) -> CommandFrame {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_name_table_matches_variants() {
        let samples = [
            Command::InitHw {},
            Command::HwSelfTest {},
            Command::EmptyHuman {},
            Command::SetHumanLight {
                state: true,
                color: None,
            },
        ];
        for cmd in samples {
            assert!(COMMAND_NAMES.contains(&cmd.name()));
            let parsed = Command::from_frame(&cmd.to_frame().unwrap()).unwrap();
            assert_eq!(parsed, cmd);
        }
    }

    #[test]
    fn test_unknown_command_rejected_before_args() {
        let err = Command::from_frame(&frame(json!({"func": "no_such_fn", "args": {"x": 1}})))
            .unwrap_err();
        assert!(matches!(err, CommandError::UnknownCommand(ref n) if n == "no_such_fn"));
        assert!(err.to_string().contains("unknown command"));
    }

    #[test]
    fn test_defaults_for_optional_arguments() {
        let cmd = Command::from_frame(&frame(json!({
            "func": "move_to",
            "args": {"carousel_id": 1, "compartment_id": 5}
        })))
        .unwrap();
        assert_eq!(
            cmd,
            Command::MoveTo {
                carousel_id: CarouselId::Second,
                compartment_id: 5,
                monkey: false,
                blocking: false,
            }
        );

        let cmd = Command::from_frame(&frame(json!({
            "func": "play_sound",
            "args": {"file": null}
        })))
        .unwrap();
        assert_eq!(
            cmd,
            Command::PlaySound {
                file: None,
                volume: 90,
                timestamp: None
            }
        );
    }

    #[test]
    fn test_invalid_arguments() {
        let err = Command::from_frame(&frame(json!({
            "func": "move_to",
            "args": {"carousel_id": 7, "compartment_id": 0}
        })))
        .unwrap_err();
        assert!(matches!(err, CommandError::InvalidArguments { ref func, .. } if func == "move_to"));

        let err = Command::from_frame(&frame(json!({"func": "set_light", "args": {}})))
            .unwrap_err();
        assert!(err.to_string().contains("set_light"));
    }

    #[test]
    fn test_scheduled_at() {
        let at = Utc::now();
        let cmd = Command::SetLeverOpen {
            state: true,
            timestamp: Some(at),
        };
        assert_eq!(cmd.scheduled_at(), Some(at));
        assert_eq!(Command::InitHw {}.scheduled_at(), None);
    }

    #[test]
    fn test_wait_timeout_conversion() {
        assert_eq!(wait_timeout(None), None);
        assert_eq!(wait_timeout(Some(-1.0)), None);
        assert_eq!(wait_timeout(Some(f64::NAN)), None);
        assert_eq!(wait_timeout(Some(1.5)), Some(Duration::from_millis(1500)));
        assert_eq!(wait_timeout(Some(0.0)), Some(Duration::ZERO));
    }

    #[test]
    fn test_wait_timeout_overflow_is_forever() {
        assert_eq!(wait_timeout(Some(1e30)), None);
        assert_eq!(wait_timeout(Some(f64::INFINITY)), None);
        assert_eq!(wait_timeout(Some(f64::MAX)), None);
    }
}
