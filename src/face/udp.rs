//! 유니캐스트 UDP transport
//!
//! 로컬 포트를 리스너와 공유하기 위해 SO_REUSEADDR/SO_REUSEPORT 소켓을 원격 주소에 connect한다.
//! 데이터그램 하나가 프레임 하나다.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use super::link_service::LinkService;
use super::state::{FaceState, LinkType, Persistency};
use super::transport::{Transport, TransportBase};
use crate::tlv::{self, MAX_NDN_PACKET_SIZE};
use crate::uri::{FaceUri, UriKind};
use crate::{Config, Error, Result};

/// 주소 재사용 UDP 소켓 (non-blocking, 바인드 완료)
pub(crate) fn reuse_udp_socket(local: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    if local.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(local))?;
    Ok(socket)
}

/// 원격 주소와 같은 주소 체계의 와일드카드 주소
pub(crate) fn unspecified_for(remote: &SocketAddr, port: u16) -> SocketAddr {
    match remote {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
    }
}

pub struct UnicastUdpTransport {
    base: TransportBase,
    /// `close()` 후 None
    socket: Mutex<Option<Arc<UdpSocket>>>,
}

impl UnicastUdpTransport {
    /// `local`에 바인드하고 `remote_uri`에 connect
    ///
    /// tokio 런타임 안에서 호출해야 한다.
    pub fn new(
        remote_uri: FaceUri,
        local: SocketAddr,
        persistency: Persistency,
        config: &Config,
    ) -> Result<Arc<Self>> {
        if remote_uri.kind() != UriKind::Udp {
            return Err(Error::UnsupportedScheme(remote_uri.scheme().to_string()));
        }
        let remote = remote_uri
            .socket_addr()
            .filter(|_| remote_uri.is_canonical())
            .ok_or_else(|| Error::NonCanonicalUri(remote_uri.to_string()))?;

        let socket = reuse_udp_socket(local)?;
        socket.connect(&SockAddr::from(remote))?;
        let socket = UdpSocket::from_std(socket.into())?;
        let local_uri = FaceUri::udp(socket.local_addr()?);

        let scope = remote_uri.scope();
        let base = TransportBase::new(
            "UnicastUdpTransport",
            remote_uri,
            local_uri,
            persistency,
            scope,
            LinkType::PointToPoint,
            MAX_NDN_PACKET_SIZE,
        )?
        .with_lifetime(config.udp_lifetime());
        Ok(Arc::new(Self {
            base,
            socket: Mutex::new(Some(Arc::new(socket))),
        }))
    }

    /// 설정의 유니캐스트 포트를 로컬 포트로 사용
    pub fn dial(remote_uri: FaceUri, persistency: Persistency, config: &Config) -> Result<Arc<Self>> {
        let remote = remote_uri
            .socket_addr()
            .ok_or_else(|| Error::NonCanonicalUri(remote_uri.to_string()))?;
        let local = unspecified_for(&remote, config.udp_unicast_port);
        Self::new(remote_uri, local, persistency, config)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        let socket = self.socket().ok_or(Error::ConnectionClosed)?;
        Ok(socket.local_addr()?)
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket.lock().clone()
    }
}

impl Transport for UnicastUdpTransport {
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn send_frame(&self, frame: Bytes) {
        if frame.len() > self.base.mtu() {
            warn!("{} - MTU보다 큰 프레임 송신 시도 - DROP", self.base);
            return;
        }
        let Some(socket) = self.socket() else {
            trace!("{} - 닫힌 소켓으로 송신 시도 - DROP", self.base);
            return;
        };
        match socket.send(&frame).await {
            Ok(_) => {
                trace!("{} - 송신 {}바이트", self.base, frame.len());
                self.base.record_out(frame.len());
            }
            Err(e) if self.base.persistency() == Persistency::Permanent => {
                warn!("{} - 송신 실패: {} - DROP", self.base, e);
            }
            Err(e) => {
                warn!("{} - 송신 실패: {} - DROP, Face DOWN", self.base, e);
                self.change_state(FaceState::Down);
            }
        }
    }

    async fn run_receive(self: Arc<Self>, sink: Arc<dyn LinkService>) {
        let mut stop_rx = self.base.shutdown().subscribe();
        let Some(socket) = self.socket() else {
            return;
        };
        let mut buf = vec![0u8; MAX_NDN_PACKET_SIZE];
        loop {
            let result = tokio::select! {
                biased;
                _ = stop_rx.changed() => return,
                r = socket.recv(&mut buf) => r,
            };
            match result {
                Ok(n) => match tlv::peek_block(&buf[..n]) {
                    Some((_, total)) => {
                        self.base.record_in(total);
                        sink.handle_incoming_frame(&buf[..total]);
                    }
                    None => debug!("{} - 불완전한 데이터그램 {}바이트 - DROP", self.base, n),
                },
                Err(e) if self.base.persistency() == Persistency::Permanent => {
                    warn!("{} - 수신 실패: {}", self.base, e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(e) => {
                    warn!("{} - 수신 실패: {} - Face DOWN", self.base, e);
                    self.change_state(FaceState::Down);
                    return;
                }
            }
        }
    }

    fn close(&self) {
        if self.socket.lock().take().is_some() {
            debug!("{} - UDP 소켓 종료", self.base);
        }
    }

    fn set_persistency(&self, persistency: Persistency) -> bool {
        self.base.store_persistency(persistency);
        true
    }
}
