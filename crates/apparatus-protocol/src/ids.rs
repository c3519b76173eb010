//! 装置单元与输入标识

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// 每个转盘的格数
pub const COMPARTMENT_COUNT: u8 = 16;

/// 转盘编号（每台装置两个转盘）
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
#[serde(try_from = "u8", into = "u8")]
pub enum CarouselId {
    First = 0,
    Second = 1,
}

impl CarouselId {
    pub const ALL: [CarouselId; 2] = [CarouselId::First, CarouselId::Second];

    pub fn index(self) -> usize {
        u8::from(self) as usize
    }
}

impl std::fmt::Display for CarouselId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "carousel{}", u8::from(*self) + 1)
    }
}

/// 拉杆的逻辑输入
///
/// 数值是 `wait_lever_state` 的 `pin_io` 参数，名称是 `io_event` 的 `name` 字段。
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
#[serde(try_from = "u8", into = "u8")]
pub enum LeverInput {
    /// 触摸传感器
    Touch = 0,
    /// 拉杆开关（拉下）
    Pulled = 1,
    /// 拉杆上限开关（松开）
    Released = 2,
}

impl LeverInput {
    pub const ALL: [LeverInput; 3] = [LeverInput::Touch, LeverInput::Pulled, LeverInput::Released];

    /// `io_event` 中使用的输入名
    pub fn event_name(self) -> &'static str {
        match self {
            LeverInput::Touch => "LEVER_TOUCHS_IO",
            LeverInput::Pulled => "LEVER_SWITCH_IO",
            LeverInput::Released => "LEVER_SWITCH_UP_IO",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|input| input.event_name() == name)
    }

    pub fn index(self) -> usize {
        u8::from(self) as usize
    }
}
