//! 유니캐스트 TCP transport
//!
//! Permanent face는 연결이 끊기면 같은 원격 주소로 재연결하고 수신 루프를 이어간다.
//! 재연결 간격은 1초에서 시작해 설정된 상한까지 두 배씩 늘린다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::link_service::LinkService;
use super::state::{FaceState, LinkType, Persistency};
use super::stream::{run_stream_receive, StreamEnd};
use super::transport::{Transport, TransportBase};
use crate::tlv::MAX_NDN_PACKET_SIZE;
use crate::uri::{FaceUri, UriKind};
use crate::{Config, Error, Result};

/// 첫 재연결 대기 시간
pub const INITIAL_REDIAL_BACKOFF: Duration = Duration::from_secs(1);

/// 다음 재연결 대기 시간
pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

pub struct UnicastTcpTransport {
    base: TransportBase,
    remote_addr: SocketAddr,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader: parking_lot::Mutex<Option<OwnedReadHalf>>,

    /// 송신 실패 시 수신 루프에 재연결 요청
    redial: Notify,

    max_backoff: Duration,
}

impl UnicastTcpTransport {
    /// 원격 주소로 연결
    pub async fn dial(
        remote_uri: FaceUri,
        persistency: Persistency,
        config: &Config,
    ) -> Result<Arc<Self>> {
        if remote_uri.kind() != UriKind::Tcp {
            return Err(Error::UnsupportedScheme(remote_uri.scheme().to_string()));
        }
        let remote_addr = remote_uri
            .socket_addr()
            .filter(|_| remote_uri.is_canonical())
            .ok_or_else(|| Error::NonCanonicalUri(remote_uri.to_string()))?;
        let stream = TcpStream::connect(remote_addr).await?;
        Self::from_stream(stream, remote_uri, persistency, config)
    }

    /// 리스너가 받은 연결
    pub fn accepted(
        stream: TcpStream,
        persistency: Persistency,
        config: &Config,
    ) -> Result<Arc<Self>> {
        let remote_uri = FaceUri::tcp(stream.peer_addr()?);
        Self::from_stream(stream, remote_uri, persistency, config)
    }

    fn from_stream(
        stream: TcpStream,
        remote_uri: FaceUri,
        persistency: Persistency,
        config: &Config,
    ) -> Result<Arc<Self>> {
        let remote_addr = stream.peer_addr()?;
        let local_uri = FaceUri::tcp(stream.local_addr()?);
        stream.set_nodelay(true)?;

        let scope = remote_uri.scope();
        let base = TransportBase::new(
            "UnicastTcpTransport",
            remote_uri,
            local_uri,
            persistency,
            scope,
            LinkType::PointToPoint,
            MAX_NDN_PACKET_SIZE,
        )?
        .with_lifetime(config.tcp_lifetime());

        let (reader, writer) = stream.into_split();
        Ok(Arc::new(Self {
            base,
            remote_addr,
            writer: tokio::sync::Mutex::new(Some(writer)),
            reader: parking_lot::Mutex::new(Some(reader)),
            redial: Notify::new(),
            max_backoff: config.redial_max_backoff(),
        }))
    }

    /// 재연결 (성공하면 true)
    async fn reconnect(&self) -> bool {
        match TcpStream::connect(self.remote_addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                let (reader, writer) = stream.into_split();
                *self.writer.lock().await = Some(writer);
                *self.reader.lock() = Some(reader);
                info!("{} - 재연결 성공", self.base);
                true
            }
            Err(e) => {
                warn!("{} - 재연결 실패: {}", self.base, e);
                false
            }
        }
    }
}

impl Transport for UnicastTcpTransport {
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn send_frame(&self, frame: Bytes) {
        if frame.len() > self.base.mtu() {
            warn!("{} - MTU보다 큰 프레임 송신 시도 - DROP", self.base);
            return;
        }
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            debug!("{} - 연결 없음 - DROP", self.base);
            return;
        };
        match writer.write_all(&frame).await {
            Ok(()) => self.base.record_out(frame.len()),
            Err(e) => {
                warn!("{} - 송신 실패: {} - DROP", self.base, e);
                guard.take();
                drop(guard);
                if self.base.persistency() == Persistency::Permanent {
                    self.redial.notify_one();
                } else {
                    self.change_state(FaceState::Down);
                }
            }
        }
    }

    async fn run_receive(self: Arc<Self>, sink: Arc<dyn LinkService>) {
        let mut stop_rx = self.base.shutdown().subscribe();
        let mut backoff = INITIAL_REDIAL_BACKOFF;
        loop {
            let reader = self.reader.lock().take();
            if let Some(mut reader) = reader {
                let end = tokio::select! {
                    end = run_stream_receive(&mut reader, &self.base, sink.as_ref(), &mut stop_rx) => end,
                    _ = self.redial.notified() => StreamEnd::Failed(Error::ConnectionClosed),
                };
                match end {
                    StreamEnd::Stopped => return,
                    StreamEnd::Closed => info!("{} - 원격에서 연결 종료", self.base),
                    StreamEnd::Failed(e) => warn!("{} - 수신 실패: {}", self.base, e),
                }
                backoff = INITIAL_REDIAL_BACKOFF;
            }

            if self.base.persistency() != Persistency::Permanent {
                self.change_state(FaceState::Down);
                return;
            }

            tokio::select! {
                biased;
                _ = stop_rx.changed() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            let reconnected = tokio::select! {
                biased;
                _ = stop_rx.changed() => return,
                ok = self.reconnect() => ok,
            };
            if !reconnected {
                backoff = next_backoff(backoff, self.max_backoff);
            }
        }
    }

    fn close(&self) {
        if let Ok(mut guard) = self.writer.try_lock() {
            guard.take();
        }
        self.reader.lock().take();
    }

    fn set_persistency(&self, persistency: Persistency) -> bool {
        self.base.store_persistency(persistency);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::state::Scope;
    use tokio::net::TcpListener;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let max = Duration::from_secs(5);
        let mut b = INITIAL_REDIAL_BACKOFF;
        b = next_backoff(b, max);
        assert_eq!(b, Duration::from_secs(2));
        b = next_backoff(b, max);
        b = next_backoff(b, max);
        assert_eq!(b, max);
    }

    #[tokio::test]
    async fn test_dial_and_accept() {
        let config = Config::testing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialed = tokio::spawn({
            let config = config.clone();
            async move {
                UnicastTcpTransport::dial(FaceUri::tcp(addr), Persistency::Persistent, &config)
                    .await
                    .unwrap()
            }
        });
        let (stream, _) = listener.accept().await.unwrap();
        let accepted =
            UnicastTcpTransport::accepted(stream, Persistency::OnDemand, &config).unwrap();
        let dialed = dialed.await.unwrap();

        assert_eq!(dialed.base().remote_uri(), &FaceUri::tcp(addr));
        assert_eq!(accepted.base().local_uri(), &FaceUri::tcp(addr));
        assert_eq!(accepted.base().scope(), Scope::Local);
        assert_eq!(accepted.base().persistency(), Persistency::OnDemand);

        dialed.send_frame(Bytes::from_static(&[0x05, 0x00])).await;
        assert_eq!(dialed.base().n_out_bytes(), 2);

        dialed.close();
        dialed.send_frame(Bytes::from_static(&[0x05, 0x00])).await;
        assert_eq!(dialed.base().n_out_bytes(), 2);
    }
}
