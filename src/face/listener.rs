//! 리스너
//!
//! 들어오는 연결이나 새 원격 주소의 데이터그램마다 NDNLPv2 face를 만들어 테이블에 추가한다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener as TokioTcpListener, UdpSocket};
use tracing::{debug, error, info, warn};

use super::link_service::LinkService;
use super::shutdown::ShutdownToken;
use super::state::Persistency;
use super::system::FaceSystem;
use super::tcp::UnicastTcpTransport;
use super::transport::Transport;
use super::udp::{reuse_udp_socket, UnicastUdpTransport};
use super::websocket::WebSocketTransport;
use crate::tlv::{self, MAX_NDN_PACKET_SIZE};
use crate::uri::FaceUri;
use crate::{Error, Result};

/// WebSocket 핸드셰이크 제한 시간
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// 수락 실패 후 재시도 대기
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// UDP 유니캐스트 리스너
///
/// 새 원격 주소에서 데이터그램이 오면 같은 로컬 포트에 connect된 온디맨드 face를 만들고
/// 첫 데이터그램을 넘긴다. 이후 데이터그램은 커널이 connect된 소켓으로 보낸다.
pub struct UdpListener {
    system: FaceSystem,
    socket: UdpSocket,
    local: SocketAddr,
    shutdown: ShutdownToken,
}

impl UdpListener {
    pub fn bind(system: FaceSystem, local: SocketAddr) -> Result<Arc<Self>> {
        let socket = UdpSocket::from_std(reuse_udp_socket(local)?.into())?;
        let local = socket.local_addr()?;
        Ok(Arc::new(Self {
            system,
            socket,
            local,
            shutdown: ShutdownToken::new(),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn start(self: &Arc<Self>) {
        info!("UDP 리스너 시작: {}", self.local);
        self.shutdown.add_task(tokio::spawn(Arc::clone(self).run()));
    }

    pub async fn stop(&self) {
        self.shutdown.signal_stop();
        self.shutdown.join_all().await;
        info!("UDP 리스너 종료: {}", self.local);
    }

    async fn run(self: Arc<Self>) {
        let mut stop_rx = self.shutdown.subscribe();
        let mut buf = vec![0u8; MAX_NDN_PACKET_SIZE];
        loop {
            let result = tokio::select! {
                biased;
                _ = stop_rx.changed() => return,
                r = self.socket.recv_from(&mut buf) => r,
            };
            match result {
                Ok((n, remote)) => self.handle_datagram(&buf[..n], remote),
                Err(e) => {
                    warn!("UDP 리스너 {} - 수신 실패: {}", self.local, e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    fn handle_datagram(&self, datagram: &[u8], remote: SocketAddr) {
        let Some((_, total)) = tlv::peek_block(datagram) else {
            debug!("UDP 리스너 {} - {}에서 불완전한 데이터그램 - DROP", self.local, remote);
            return;
        };
        let frame = &datagram[..total];
        let remote_uri = FaceUri::udp(remote);

        // connect 전에 도착한 데이터그램
        if let Some(face) = self.system.table().get_by_uri(&remote_uri) {
            face.transport_base().record_in(total);
            face.handle_incoming_frame(frame);
            return;
        }

        let transport = match UnicastUdpTransport::new(
            remote_uri,
            self.local,
            Persistency::OnDemand,
            self.system.config(),
        ) {
            Ok(t) => t,
            Err(e) => {
                warn!("UDP 리스너 {} - {}용 face 생성 실패: {}", self.local, remote, e);
                return;
            }
        };
        match self.system.attach(transport, self.system.default_options()) {
            Ok(face) => {
                info!("{} - 수락", face);
                face.transport().base().record_in(total);
                face.handle_incoming_frame(frame);
            }
            Err(e) => error!("UDP 리스너 {} - face 추가 실패: {}", self.local, e),
        }
    }
}

/// TCP 리스너 (수락한 face는 Persistent)
pub struct TcpListener {
    system: FaceSystem,
    listener: TokioTcpListener,
    local: SocketAddr,
    shutdown: ShutdownToken,
}

impl TcpListener {
    pub async fn bind(system: FaceSystem, local: SocketAddr) -> Result<Arc<Self>> {
        let listener = TokioTcpListener::bind(local).await?;
        let local = listener.local_addr()?;
        Ok(Arc::new(Self {
            system,
            listener,
            local,
            shutdown: ShutdownToken::new(),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn start(self: &Arc<Self>) {
        info!("TCP 리스너 시작: {}", self.local);
        self.shutdown.add_task(tokio::spawn(Arc::clone(self).run()));
    }

    pub async fn stop(&self) {
        self.shutdown.signal_stop();
        self.shutdown.join_all().await;
        info!("TCP 리스너 종료: {}", self.local);
    }

    async fn run(self: Arc<Self>) {
        let mut stop_rx = self.shutdown.subscribe();
        loop {
            let accepted = tokio::select! {
                biased;
                _ = stop_rx.changed() => return,
                r = self.listener.accept() => r,
            };
            let stream = match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!("TCP 리스너 {} - 수락 실패: {}", self.local, e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };
            let result = UnicastTcpTransport::accepted(
                stream,
                Persistency::Persistent,
                self.system.config(),
            )
            .and_then(|t| self.system.attach(t, self.system.default_options()));
            match result {
                Ok(face) => info!("{} - 수락", face),
                Err(e) => warn!("TCP 리스너 {} - face 생성 실패: {}", self.local, e),
            }
        }
    }
}

/// WebSocket 리스너
pub struct WebSocketListener {
    system: FaceSystem,
    listener: TokioTcpListener,
    local: SocketAddr,
    shutdown: ShutdownToken,
}

impl WebSocketListener {
    pub async fn bind(system: FaceSystem, local: SocketAddr) -> Result<Arc<Self>> {
        let listener = TokioTcpListener::bind(local).await?;
        let local = listener.local_addr()?;
        Ok(Arc::new(Self {
            system,
            listener,
            local,
            shutdown: ShutdownToken::new(),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn start(self: &Arc<Self>) {
        info!("WebSocket 리스너 시작: {}", self.local);
        self.shutdown.add_task(tokio::spawn(Arc::clone(self).run()));
    }

    pub async fn stop(&self) {
        self.shutdown.signal_stop();
        self.shutdown.join_all().await;
        info!("WebSocket 리스너 종료: {}", self.local);
    }

    async fn run(self: Arc<Self>) {
        let mut stop_rx = self.shutdown.subscribe();
        let local_uri = FaceUri::websocket(self.local, false);
        loop {
            let accepted = tokio::select! {
                biased;
                _ = stop_rx.changed() => return,
                r = self.listener.accept() => r,
            };
            let (stream, remote) = match accepted {
                Ok(a) => a,
                Err(e) => {
                    warn!("WebSocket 리스너 {} - 수락 실패: {}", self.local, e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };

            // 핸드셰이크는 별도 태스크에서
            let system = self.system.clone();
            let local_uri = local_uri.clone();
            tokio::spawn(async move {
                let accepted = tokio::time::timeout(
                    HANDSHAKE_TIMEOUT,
                    WebSocketTransport::accept(stream, local_uri, system.config()),
                )
                .await;
                let result = match accepted {
                    Ok(r) => r.and_then(|t| system.attach(t, system.default_options())),
                    Err(_) => {
                        debug!("WebSocket {} - 핸드셰이크 시간 초과", remote);
                        return;
                    }
                };
                match result {
                    Ok(face) => info!("{} - 수락", face),
                    Err(Error::WebSocket(e)) => {
                        debug!("WebSocket {} - 핸드셰이크 실패: {}", remote, e)
                    }
                    Err(e) => warn!("WebSocket {} - face 생성 실패: {}", remote, e),
                }
            });
        }
    }
}

#[cfg(unix)]
pub use self::unix_listener::UnixListener;

#[cfg(unix)]
mod unix_listener {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use tokio::net::UnixListener as TokioUnixListener;
    use tracing::{info, warn};

    use super::ACCEPT_RETRY_DELAY;
    use crate::face::shutdown::ShutdownToken;
    use crate::face::system::FaceSystem;
    use crate::face::unix::UnixStreamTransport;
    use crate::Result;

    /// Unix 스트림 리스너
    ///
    /// 바인드 전에 남아 있는 소켓 파일을 지우고 종료 시 다시 지운다.
    pub struct UnixListener {
        system: FaceSystem,
        listener: TokioUnixListener,
        path: PathBuf,
        shutdown: ShutdownToken,
    }

    impl UnixListener {
        pub fn bind(system: FaceSystem, path: &Path) -> Result<Arc<Self>> {
            match std::fs::remove_file(path) {
                Ok(()) => info!("기존 소켓 파일 삭제: {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            let listener = TokioUnixListener::bind(path)?;
            Ok(Arc::new(Self {
                system,
                listener,
                path: path.to_path_buf(),
                shutdown: ShutdownToken::new(),
            }))
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        pub fn start(self: &Arc<Self>) {
            info!("Unix 리스너 시작: {}", self.path.display());
            self.shutdown.add_task(tokio::spawn(Arc::clone(self).run()));
        }

        pub async fn stop(&self) {
            self.shutdown.signal_stop();
            self.shutdown.join_all().await;
            let _ = std::fs::remove_file(&self.path);
            info!("Unix 리스너 종료: {}", self.path.display());
        }

        async fn run(self: Arc<Self>) {
            let mut stop_rx = self.shutdown.subscribe();
            loop {
                let accepted = tokio::select! {
                    biased;
                    _ = stop_rx.changed() => return,
                    r = self.listener.accept() => r,
                };
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!("Unix 리스너 {} - 수락 실패: {}", self.path.display(), e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                };
                let result = UnixStreamTransport::accepted(stream, &self.path)
                    .and_then(|t| self.system.attach(t, self.system.default_options()));
                match result {
                    Ok(face) => info!("{} - 수락", face),
                    Err(e) => warn!("Unix 리스너 {} - face 생성 실패: {}", self.path.display(), e),
                }
            }
        }
    }
}
