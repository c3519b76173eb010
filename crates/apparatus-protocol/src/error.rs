//! 协议层错误类型定义

use thiserror::Error;

/// 帧编解码错误
#[derive(Error, Debug)]
pub enum CodecError {
    /// 底层 IO 错误（连接重置等）
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 对端在帧中途关闭连接
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },

    /// 长度前缀超过上限
    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// 载荷不是合法 JSON
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// 载荷不是 JSON 对象
    #[error("Payload is not an object")]
    NotAnObject,

    /// 缺少 `type` 字段（可恢复，服务端回复失败后继续）
    #[error("Type not in dict")]
    MissingType,

    /// 未知的消息种类
    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    /// 已知种类但字段不符合模式
    #[error("Invalid {kind} message: {source}")]
    Schema {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CodecError {
    /// 是否为连接级致命错误
    ///
    /// 只有 `MissingType` 之后流仍然对齐，可以继续读取下一帧。
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CodecError::MissingType)
    }

    /// 是否为对端中途断开
    pub fn is_truncated(&self) -> bool {
        matches!(self, CodecError::TruncatedFrame { .. })
    }
}

/// 命令解析错误（可恢复，回复失败后连接保持）
#[derive(Error, Debug)]
pub enum CommandError {
    /// 命令名不在静态表中
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// 参数缺失或类型不符
    #[error("invalid arguments for {func}: {source}")]
    InvalidArguments {
        func: String,
        #[source]
        source: serde_json::Error,
    },

    /// 参数序列化失败
    #[error("failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),
}
