//! 내부 transport
//!
//! 관리 모듈 같은 포워더 내부 구성 요소가 face처럼 패킷을 주고받는 통로.
//! 구성 요소 쪽은 [`InternalHandle`]로 LP 프레임을 보내고 받는다.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::link_service::{LinkService, NdnlpLinkServiceOptions};
use super::state::{LinkType, Persistency, Scope};
use super::transport::{Transport, TransportBase};
use crate::lp::LpPacket;
use crate::tlv::{self, MAX_NDN_PACKET_SIZE};
use crate::uri::FaceUri;
use crate::{Error, Result};

pub struct InternalTransport {
    base: TransportBase,
    /// 포워더 -> 구성 요소
    to_component: mpsc::Sender<Bytes>,
    /// 구성 요소 -> 포워더
    from_component: parking_lot::Mutex<Option<mpsc::Receiver<Bytes>>>,
}

impl InternalTransport {
    pub fn new(queue_size: usize) -> Result<(Arc<Self>, InternalHandle)> {
        let base = TransportBase::new(
            "InternalTransport",
            FaceUri::internal(),
            FaceUri::internal(),
            Persistency::Persistent,
            Scope::Local,
            LinkType::PointToPoint,
            MAX_NDN_PACKET_SIZE,
        )?;
        let (to_component, component_rx) = mpsc::channel(queue_size.max(1));
        let (component_tx, from_component) = mpsc::channel(queue_size.max(1));
        let transport = Arc::new(Self {
            base,
            to_component,
            from_component: parking_lot::Mutex::new(Some(from_component)),
        });
        let handle = InternalHandle {
            tx: component_tx,
            rx: component_rx,
        };
        Ok((transport, handle))
    }

    /// 내부 face용 링크 서비스 옵션
    ///
    /// 구성 요소가 다음 홉을 지정하고 수신 face를 알 수 있어야 한다.
    pub fn link_options() -> NdnlpLinkServiceOptions {
        NdnlpLinkServiceOptions {
            consumer_controlled_forwarding: true,
            incoming_face_indication: true,
            ..NdnlpLinkServiceOptions::default()
        }
    }
}

impl Transport for InternalTransport {
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn send_frame(&self, frame: Bytes) {
        if frame.len() > self.base.mtu() {
            warn!("{} - MTU보다 큰 프레임 송신 시도 - DROP", self.base);
            return;
        }
        let len = frame.len();
        match self.to_component.try_send(frame) {
            Ok(()) => self.base.record_out(len),
            Err(TrySendError::Full(_)) => warn!("{} - 구성 요소 큐 가득 참 - DROP", self.base),
            Err(TrySendError::Closed(_)) => debug!("{} - 구성 요소 종료됨 - DROP", self.base),
        }
    }

    async fn run_receive(self: Arc<Self>, sink: Arc<dyn LinkService>) {
        let mut stop_rx = self.base.shutdown().subscribe();
        let rx = self.from_component.lock().take();
        let Some(mut rx) = rx else {
            return;
        };
        loop {
            let frame = tokio::select! {
                biased;
                _ = stop_rx.changed() => return,
                frame = rx.recv() => match frame {
                    Some(frame) => frame,
                    None => return,
                },
            };
            if frame.len() > MAX_NDN_PACKET_SIZE {
                warn!("{} - 구성 요소가 보낸 프레임이 너무 큼 - DROP", self.base);
                continue;
            }
            self.base.record_in(frame.len());
            sink.handle_incoming_frame(&frame);
        }
    }

    fn close(&self) {
        self.from_component.lock().take();
    }

    fn set_persistency(&self, persistency: Persistency) -> bool {
        persistency == Persistency::Persistent
    }
}

/// 구성 요소가 받은 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalPacket {
    /// 네트워크 계층 패킷 와이어
    pub wire: Bytes,
    pub pit_token: Option<Bytes>,
    pub incoming_face_id: Option<u64>,
}

/// 구성 요소 쪽 끝점
pub struct InternalHandle {
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
}

impl InternalHandle {
    /// LP 프레임 그대로 송신
    pub async fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// 네트워크 계층 패킷을 LpPacket으로 감싸 송신
    pub async fn send_packet(
        &self,
        wire: Bytes,
        pit_token: Option<Bytes>,
        next_hop_face_id: Option<u64>,
    ) -> Result<()> {
        let lp = LpPacket {
            pit_token,
            next_hop_face_id,
            fragment: Some(wire),
            ..LpPacket::default()
        };
        self.send_frame(lp.encode()).await
    }

    pub async fn recv_frame(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// 다음 유효한 패킷 수신 (잘못된 프레임은 건너뜀)
    ///
    /// face가 닫히면 `None`
    pub async fn recv_packet(&mut self) -> Option<InternalPacket> {
        loop {
            let frame = self.rx.recv().await?;
            let packet = match tlv::peek_block(&frame) {
                Some((crate::lp::TT_LP_PACKET, _)) => match LpPacket::decode(&frame) {
                    Ok(lp) => match lp.fragment {
                        Some(wire) if !wire.is_empty() => InternalPacket {
                            wire,
                            pit_token: lp.pit_token,
                            incoming_face_id: lp.incoming_face_id,
                        },
                        _ => {
                            warn!("InternalHandle - 빈 단편 수신 - DROP");
                            continue;
                        }
                    },
                    Err(e) => {
                        warn!("InternalHandle - LpPacket 디코딩 실패: {} - DROP", e);
                        continue;
                    }
                },
                Some(_) => InternalPacket {
                    wire: frame,
                    pit_token: None,
                    incoming_face_id: None,
                },
                None => {
                    warn!("InternalHandle - 잘린 프레임 - DROP");
                    continue;
                }
            };
            return Some(packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_frame_reaches_component() {
        let (t, mut handle) = InternalTransport::new(4).unwrap();
        let lp = LpPacket {
            pit_token: Some(Bytes::from_static(b"tok")),
            incoming_face_id: Some(3),
            fragment: Some(Bytes::from_static(&[0x06, 0x00])),
            ..LpPacket::default()
        };
        t.send_frame(lp.encode()).await;

        let pkt = handle.recv_packet().await.unwrap();
        assert_eq!(&pkt.wire[..], &[0x06, 0x00]);
        assert_eq!(pkt.pit_token.as_deref(), Some(&b"tok"[..]));
        assert_eq!(pkt.incoming_face_id, Some(3));
        assert!(t.base().n_out_bytes() > 0);
    }

    #[tokio::test]
    async fn test_full_component_queue_drops() {
        let (t, mut handle) = InternalTransport::new(1).unwrap();
        t.send_frame(Bytes::from_static(&[0x05, 0x00])).await;
        t.send_frame(Bytes::from_static(&[0x05, 0x00])).await;
        assert_eq!(t.base().n_out_bytes(), 2);
        assert!(handle.recv_frame().await.is_some());
    }

    #[test]
    fn test_internal_options() {
        let opts = InternalTransport::link_options();
        assert!(opts.consumer_controlled_forwarding);
        assert!(opts.incoming_face_indication);
        assert!(!opts.local_cache_policy);
    }
}
