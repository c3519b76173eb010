//! 硬件层错误类型定义

use thiserror::Error;

/// 硬件访问错误
#[derive(Error, Debug)]
pub enum HwError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
    #[error("Hardware operation timeout")]
    Timeout,
    #[error("Motor disabled")]
    MotorDisabled,
    #[error("Unknown input pin: {0}")]
    UnknownPin(u8),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HwError {
    pub fn is_fatal(&self) -> bool {
        match self {
            HwError::Device(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    InvalidResponse,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            DeviceErrorKind::NoDevice | DeviceErrorKind::AccessDenied | DeviceErrorKind::NotFound
        )
    }
}

impl From<String> for DeviceError {
    fn from(message: String) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for DeviceError {
    fn from(message: &str) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let err = HwError::Device(DeviceError::new(DeviceErrorKind::NoDevice, "encoder gone"));
        assert!(err.is_fatal());
        assert_eq!(format!("{}", err), "Device error: NoDevice: encoder gone");

        let err = HwError::Device(DeviceError::from("glitch"));
        assert!(!err.is_fatal());
        assert!(!HwError::Timeout.is_fatal());
    }
}
