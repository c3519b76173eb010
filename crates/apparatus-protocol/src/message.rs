//! 线上消息模型
//!
//! 每条消息是带 `type` 判别字段的 JSON 对象。`reply` 没有固定的 `type` 值：
//! 它回显所应答消息的种类（通常是 `"command"`，缺少 `type` 时为 `"error"`），
//! 因此解码时以 `success` 字段的存在来识别应答。

use crate::error::CodecError;
use crate::ids::CarouselId;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const KIND_COMMAND: &str = "command";
pub const KIND_IO_EVENT: &str = "io_event";
pub const KIND_WAIT_EVENT: &str = "wait_event";
pub const KIND_MSG: &str = "msg";
pub const KIND_ERROR: &str = "error";

/// 未经类型化的命令帧：函数名 + 具名参数表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub func: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// 命令应答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// 回显的消息种类
    #[serde(rename = "type")]
    pub kind: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl Reply {
    pub fn ok(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            success: true,
            msg: None,
        }
    }

    pub fn ok_with(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            success: true,
            msg: Some(msg.into()),
        }
    }

    pub fn failure(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            success: false,
            msg: Some(msg.into()),
        }
    }

    /// 缺少 `type` 字段时的固定应答
    pub fn missing_type() -> Self {
        Self::failure(KIND_ERROR, "Type not in dict")
    }
}

/// 数字输入状态变化事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoEvent {
    /// 物理引脚号
    pub pin_io: u8,
    /// 逻辑输入名（如 `LEVER_TOUCHS_IO`）
    pub name: String,
    pub state: bool,
    /// 已减去去抖时间的跳变时刻
    pub timestamp: DateTime<Utc>,
}

/// 长时间运动完成事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitEvent {
    pub carousel_id: CarouselId,
    /// `move_to` 或 `deploy`
    pub func_name: String,
}

/// 自由文本 / 心跳
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub msg: String,
}

/// 线上消息
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Command(CommandFrame),
    Reply(Reply),
    IoEvent(IoEvent),
    WaitEvent(WaitEvent),
    Msg(TextMessage),
}

impl Message {
    /// 消息种类（应答返回其回显的种类）
    pub fn kind(&self) -> &str {
        match self {
            Message::Command(_) => KIND_COMMAND,
            Message::Reply(reply) => &reply.kind,
            Message::IoEvent(_) => KIND_IO_EVENT,
            Message::WaitEvent(_) => KIND_WAIT_EVENT,
            Message::Msg(_) => KIND_MSG,
        }
    }

    pub fn heartbeat() -> Self {
        Message::Msg(TextMessage {
            msg: "heartbeat".to_string(),
        })
    }

    /// 转换为带 `type` 字段的 JSON 对象
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let (kind, body) = match self {
            Message::Reply(reply) => return serde_json::to_value(reply),
            Message::Command(c) => (KIND_COMMAND, serde_json::to_value(c)?),
            Message::IoEvent(e) => (KIND_IO_EVENT, serde_json::to_value(e)?),
            Message::WaitEvent(e) => (KIND_WAIT_EVENT, serde_json::to_value(e)?),
            Message::Msg(m) => (KIND_MSG, serde_json::to_value(m)?),
        };
        let mut object = match body {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        object.insert("type".to_string(), Value::String(kind.to_string()));
        Ok(Value::Object(object))
    }

    /// 从 JSON 值解析并按种类校验字段
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let Value::Object(mut object) = value else {
            return Err(CodecError::NotAnObject);
        };
        let kind = match object.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(CodecError::UnknownKind("<non-string>".to_string())),
            None => return Err(CodecError::MissingType),
        };

        if object.contains_key("success") {
            return parse_body(&kind, object).map(Message::Reply);
        }

        object.remove("type");
        match kind.as_str() {
            KIND_COMMAND => parse_body(&kind, object).map(Message::Command),
            KIND_IO_EVENT => parse_body(&kind, object).map(Message::IoEvent),
            KIND_WAIT_EVENT => parse_body(&kind, object).map(Message::WaitEvent),
            KIND_MSG => parse_body(&kind, object).map(Message::Msg),
            _ => Err(CodecError::UnknownKind(kind)),
        }
    }
}

fn parse_body<T: DeserializeOwned>(kind: &str, object: Map<String, Value>) -> Result<T, CodecError> {
    serde_json::from_value(Value::Object(object)).map_err(|source| CodecError::Schema {
        kind: kind.to_string(),
        source,
    })
}

impl From<CommandFrame> for Message {
    fn from(frame: CommandFrame) -> Self {
        Message::Command(frame)
    }
}

impl From<Reply> for Message {
    fn from(reply: Reply) -> Self {
        Message::Reply(reply)
    }
}

impl From<IoEvent> for Message {
    fn from(event: IoEvent) -> Self {
        Message::IoEvent(event)
    }
}

impl From<WaitEvent> for Message {
    fn from(event: WaitEvent) -> Self {
        Message::WaitEvent(event)
    }
}
