//! 客户端错误类型定义

use apparatus_protocol::{CodecError, CommandError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// 服务端返回失败应答
    #[error("{func} rejected: {msg}")]
    Rejected { func: String, msg: String },

    /// 等待应答超时
    #[error("Timed out waiting for reply to {0}")]
    Timeout(String),

    /// 连接已关闭
    #[error("Connection closed")]
    Closed,
}

impl ClientError {
    /// 连接是否已不可用
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ClientError::Closed | ClientError::Io(_) | ClientError::Codec(_) | ClientError::Connect { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ClientError::Rejected {
            func: "move_to".to_string(),
            msg: "Invalid compartment 40 (expected 0..=16)".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "move_to rejected: Invalid compartment 40 (expected 0..=16)"
        );
        assert!(!err.is_disconnect());
        assert!(ClientError::Closed.is_disconnect());
    }
}
