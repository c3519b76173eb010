//! TCP 监听
//!
//! 与单台装置对应：同一时刻只服务一个连接，前一个连接断开并完成硬件复位后
//! 才处理下一个。接受循环使用非阻塞 listener 轮询关闭标志。

use crate::connection::serve_connection;
use crate::error::ServerError;
use apparatus_driver::Apparatus;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Default)]
struct Shared {
    shutdown: AtomicBool,
    /// 当前连接（用于关闭时打断阻塞读取）
    active: Mutex<Option<TcpStream>>,
}

pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    apparatus: Arc<Apparatus>,
    shared: Arc<Shared>,
}

impl Server {
    /// 按配置中的地址与端口监听
    pub fn bind(apparatus: Arc<Apparatus>) -> Result<Self, ServerError> {
        let server = &apparatus.config().server;
        let addr = format!("{}:{}", server.bind, server.port);
        Self::bind_addr(addr, apparatus)
    }

    pub fn bind_addr(addr: impl ToSocketAddrs + ToString, apparatus: Arc<Apparatus>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!("Listening on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
            apparatus,
            shared: Arc::new(Shared::default()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: self.shared.clone(),
            local_addr: self.local_addr,
        }
    }

    /// 阻塞运行接受循环，直到 [`ServerHandle::shutdown`]
    pub fn run(self) -> Result<(), ServerError> {
        while !self.shared.shutdown.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!("Accepted {}", peer);
                    stream.set_nonblocking(false)?;
                    self.serve(stream);
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                },
            }
        }
        info!("Server stopped");
        Ok(())
    }

    /// 在后台线程上运行
    pub fn spawn(self) -> Result<(ServerHandle, JoinHandle<Result<(), ServerError>>), ServerError> {
        let handle = self.handle();
        let worker = thread::Builder::new()
            .name("apparatus-server".into())
            .spawn(move || self.run())?;
        Ok((handle, worker))
    }

    fn serve(&self, stream: TcpStream) {
        match stream.try_clone() {
            Ok(clone) => *self.shared.active.lock() = Some(clone),
            Err(e) => warn!("Failed to clone connection handle: {}", e),
        }
        // 关闭请求可能发生在 accept 与登记之间
        if self.shared.shutdown.load(Ordering::Acquire) {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Err(e) = serve_connection(stream, self.apparatus.clone()) {
            debug!("Connection ended with error: {}", e);
        }
        self.shared.active.lock().take();
    }
}

/// 服务端控制句柄
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 请求停止：不再接受新连接，并断开当前连接
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(stream) = self.shared.active.lock().as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}
