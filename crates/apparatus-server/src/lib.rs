//! 奖励装置服务端
//!
//! - [`Server`]：TCP 监听，一次服务一个连接
//! - [`Dispatcher`]：命令 → 装置操作 → 应答
//! - [`Notifier`]：拉杆输入去抖后推送 `io_event`
//! - [`EventSink`]：应答与事件共用的写出路径

mod connection;
pub mod dispatcher;
mod error;
pub mod notifier;
pub mod server;
pub mod sink;

pub use connection::serve_connection;
pub use dispatcher::Dispatcher;
pub use error::ServerError;
pub use notifier::Notifier;
pub use server::{Server, ServerHandle};
pub use sink::{EventSink, StreamSink};
