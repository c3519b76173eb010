//! 服务端错误类型定义

use apparatus_driver::DriverError;
use apparatus_protocol::CodecError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 帧或消息格式错误（对连接是致命的）
    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// 连接已关闭，无法再写出
    #[error("Connection closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::Codec(CodecError::TruncatedFrame {
            expected: 10,
            actual: 3,
        });
        assert!(err.to_string().starts_with("Protocol error: "));

        let err = ServerError::Bind {
            addr: "0.0.0.0:9001".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().contains("0.0.0.0:9001"));
    }
}
