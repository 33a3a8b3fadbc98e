//! 멀티캐스트 UDP transport
//!
//! 송신 소켓과 수신 소켓을 따로 둔다. 수신 소켓은 그룹 포트에 바인드하고 로컬 인터페이스에서
//! 그룹에 가입한다. 송신 실패 시 송신 소켓을 다시 만든다.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV6};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tracing::{debug, error, trace, warn};

use super::link_service::LinkService;
use super::state::{LinkType, Persistency, Scope};
use super::transport::{Transport, TransportBase};
use super::udp::reuse_udp_socket;
use crate::tlv::{self, MAX_NDN_PACKET_SIZE};
use crate::uri::{FaceUri, UriKind};
use crate::{Config, Error, Result};

/// 로컬 주소 체계에 맞는 멀티캐스트 그룹 주소
pub fn group_addr(local: &IpAddr, config: &Config) -> SocketAddr {
    match local {
        IpAddr::V4(_) => SocketAddr::new(
            IpAddr::V4(config.udp_multicast_address_ipv4),
            config.udp_multicast_port,
        ),
        IpAddr::V6(_) => SocketAddr::new(
            IpAddr::V6(config.udp_multicast_address_ipv6),
            config.udp_multicast_port,
        ),
    }
}

pub struct MulticastUdpTransport {
    base: TransportBase,
    group: SocketAddr,
    local: SocketAddr,
    /// 두 소켓 모두 `close()` 후 None
    send_socket: Mutex<Option<Arc<UdpSocket>>>,
    recv_socket: Mutex<Option<Arc<UdpSocket>>>,
}

impl MulticastUdpTransport {
    /// `local_uri`의 인터페이스에서 설정된 그룹에 가입
    pub fn new(local_uri: FaceUri, config: &Config) -> Result<Arc<Self>> {
        if local_uri.kind() != UriKind::Udp {
            return Err(Error::UnsupportedScheme(local_uri.scheme().to_string()));
        }
        let local = local_uri
            .socket_addr()
            .filter(|_| local_uri.is_canonical())
            .ok_or_else(|| Error::NonCanonicalUri(local_uri.to_string()))?;
        let mut group = group_addr(&local.ip(), config);
        if let (SocketAddr::V6(g), SocketAddr::V6(l)) = (&mut group, &local) {
            g.set_scope_id(l.scope_id());
        }

        let send_socket = Self::connect_send(&local)?;
        let recv_socket = Self::connect_recv(&local, &group)?;

        let base = TransportBase::new(
            "MulticastUdpTransport",
            FaceUri::udp(group),
            local_uri,
            Persistency::Permanent,
            Scope::NonLocal,
            LinkType::MultiAccess,
            MAX_NDN_PACKET_SIZE,
        )?;
        Ok(Arc::new(Self {
            base,
            group,
            local,
            send_socket: Mutex::new(Some(Arc::new(send_socket))),
            recv_socket: Mutex::new(Some(Arc::new(recv_socket))),
        }))
    }

    fn connect_send(local: &SocketAddr) -> io::Result<UdpSocket> {
        let socket = reuse_udp_socket(SocketAddr::new(local.ip(), 0))?;
        match local {
            SocketAddr::V4(v4) => {
                socket.set_multicast_if_v4(v4.ip())?;
                socket.set_multicast_loop_v4(false)?;
            }
            SocketAddr::V6(v6) => {
                socket.set_multicast_if_v6(v6.scope_id())?;
                socket.set_multicast_loop_v6(false)?;
            }
        }
        UdpSocket::from_std(socket.into())
    }

    fn connect_recv(local: &SocketAddr, group: &SocketAddr) -> io::Result<UdpSocket> {
        let socket = match (local, group) {
            (SocketAddr::V4(l), SocketAddr::V4(g)) => {
                let socket =
                    reuse_udp_socket(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), g.port()))?;
                socket.join_multicast_v4(g.ip(), l.ip())?;
                socket
            }
            (SocketAddr::V6(l), SocketAddr::V6(g)) => {
                let bind = SocketAddrV6::new(*g.ip(), g.port(), 0, l.scope_id());
                let socket = reuse_udp_socket(SocketAddr::V6(bind))?;
                socket.join_multicast_v6(g.ip(), l.scope_id())?;
                socket
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "local and group address families differ",
                ))
            }
        };
        UdpSocket::from_std(socket.into())
    }

    pub fn group(&self) -> SocketAddr {
        self.group
    }
}

impl Transport for MulticastUdpTransport {
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn send_frame(&self, frame: Bytes) {
        if frame.len() > self.base.mtu() {
            warn!("{} - MTU보다 큰 프레임 송신 시도 - DROP", self.base);
            return;
        }
        let Some(socket) = self.send_socket.lock().clone() else {
            trace!("{} - 닫힌 소켓으로 송신 시도 - DROP", self.base);
            return;
        };
        match socket.send_to(&frame, self.group).await {
            Ok(_) => self.base.record_out(frame.len()),
            Err(e) => {
                warn!("{} - 송신 실패: {} - DROP", self.base, e);
                if self.base.shutdown().is_stopped() {
                    return;
                }
                match Self::connect_send(&self.local) {
                    Ok(fresh) => {
                        // 그 사이 닫혔으면 새 소켓을 버린다
                        let mut slot = self.send_socket.lock();
                        if slot.is_some() {
                            *slot = Some(Arc::new(fresh));
                        }
                    }
                    Err(e) => error!("{} - 송신 소켓 재생성 실패: {}", self.base, e),
                }
            }
        }
    }

    async fn run_receive(self: Arc<Self>, sink: Arc<dyn LinkService>) {
        let mut stop_rx = self.base.shutdown().subscribe();
        let Some(socket) = self.recv_socket.lock().clone() else {
            return;
        };
        let mut buf = vec![0u8; MAX_NDN_PACKET_SIZE];
        loop {
            let result = tokio::select! {
                biased;
                _ = stop_rx.changed() => return,
                r = socket.recv_from(&mut buf) => r,
            };
            match result {
                Ok((n, from)) => match tlv::peek_block(&buf[..n]) {
                    Some((_, total)) => {
                        trace!("{} - {}에서 {}바이트 수신", self.base, from, total);
                        self.base.record_in(total);
                        sink.handle_incoming_frame(&buf[..total]);
                    }
                    None => debug!("{} - 불완전한 데이터그램 - DROP", self.base),
                },
                Err(e) => {
                    warn!("{} - 수신 실패: {}", self.base, e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    fn close(&self) {
        let send = self.send_socket.lock().take();
        let recv = self.recv_socket.lock().take();
        if send.is_some() || recv.is_some() {
            debug!("{} - 멀티캐스트 소켓 종료", self.base);
        }
    }

    fn set_persistency(&self, persistency: Persistency) -> bool {
        persistency == Persistency::Permanent
    }
}
