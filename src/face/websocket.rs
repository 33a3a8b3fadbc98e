//! WebSocket transport
//!
//! 웹 애플리케이션용. 바이너리 메시지 하나가 프레임 하나이며 항상 온디맨드다.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, trace, warn};

use super::link_service::LinkService;
use super::state::{FaceState, LinkType, Persistency};
use super::transport::{Transport, TransportBase};
use crate::tlv::{self, MAX_NDN_PACKET_SIZE};
use crate::uri::FaceUri;
use crate::{Config, Result};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

pub struct WebSocketTransport {
    base: TransportBase,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    stream: parking_lot::Mutex<Option<WsStream>>,
}

impl WebSocketTransport {
    /// 서버 측 핸드셰이크 후 생성
    pub async fn accept(
        stream: TcpStream,
        local_uri: FaceUri,
        config: &Config,
    ) -> Result<Arc<Self>> {
        let remote_addr = stream.peer_addr()?;
        let ws = tokio_tungstenite::accept_async(stream).await?;
        Self::new(ws, remote_addr, local_uri, config)
    }

    /// 핸드셰이크가 끝난 연결로 생성
    pub fn new(
        ws: WebSocketStream<TcpStream>,
        remote_addr: SocketAddr,
        local_uri: FaceUri,
        config: &Config,
    ) -> Result<Arc<Self>> {
        let remote_uri = FaceUri::websocket(remote_addr, false);
        let scope = remote_uri.scope();
        let base = TransportBase::new(
            "WebSocketTransport",
            remote_uri,
            local_uri,
            Persistency::OnDemand,
            scope,
            LinkType::PointToPoint,
            MAX_NDN_PACKET_SIZE,
        )?
        .with_lifetime(config.tcp_lifetime());
        let (sink, stream) = ws.split();
        Ok(Arc::new(Self {
            base,
            sink: tokio::sync::Mutex::new(Some(sink)),
            stream: parking_lot::Mutex::new(Some(stream)),
        }))
    }
}

impl Transport for WebSocketTransport {
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn send_frame(&self, frame: Bytes) {
        if frame.len() > self.base.mtu() {
            warn!("{} - MTU보다 큰 프레임 송신 시도 - DROP", self.base);
            return;
        }
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return;
        };
        let len = frame.len();
        match sink.send(Message::Binary(frame.to_vec())).await {
            Ok(()) => self.base.record_out(len),
            Err(e) => {
                warn!("{} - 송신 실패: {} - DROP, Face DOWN", self.base, e);
                guard.take();
                drop(guard);
                self.change_state(FaceState::Down);
            }
        }
    }

    async fn run_receive(self: Arc<Self>, sink: Arc<dyn LinkService>) {
        let mut stop_rx = self.base.shutdown().subscribe();
        let stream = self.stream.lock().take();
        let Some(mut stream) = stream else {
            return;
        };
        loop {
            let msg = tokio::select! {
                biased;
                _ = stop_rx.changed() => return,
                msg = stream.next() => msg,
            };
            match msg {
                Some(Ok(Message::Binary(data))) => match tlv::peek_block(&data) {
                    Some((_, total)) => {
                        self.base.record_in(total);
                        sink.handle_incoming_frame(&data[..total]);
                    }
                    None => debug!("{} - 불완전한 메시지 - DROP", self.base),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("{} - 연결 종료", self.base);
                    break;
                }
                Some(Ok(other)) => trace!("{} - 바이너리가 아닌 메시지 무시: {:?}", self.base, other),
                Some(Err(e)) => {
                    warn!("{} - 수신 실패: {} - Face DOWN", self.base, e);
                    break;
                }
            }
        }
        self.change_state(FaceState::Down);
    }

    fn close(&self) {
        if let Ok(mut guard) = self.sink.try_lock() {
            guard.take();
        }
        self.stream.lock().take();
    }

    fn set_persistency(&self, persistency: Persistency) -> bool {
        persistency == Persistency::OnDemand
    }
}
