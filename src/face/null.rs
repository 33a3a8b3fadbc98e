//! Null face
//!
//! 모든 패킷을 버린다. 포워더 내부의 싱크(sink) 용도.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use super::link_service::{AtomicCounters, FaceCounters, Lifecycle, LinkService, LinkServiceState};
use super::state::{FaceState, LinkType, Persistency, Scope};
use super::transport::{Transport, TransportBase};
use crate::pending::PendingPacket;
use crate::tlv::MAX_NDN_PACKET_SIZE;
use crate::uri::FaceUri;
use crate::Result;

pub struct NullTransport {
    base: TransportBase,
}

impl NullTransport {
    pub fn new() -> Result<Self> {
        let base = TransportBase::new(
            "NullTransport",
            FaceUri::null(),
            FaceUri::null(),
            Persistency::Permanent,
            Scope::Local,
            LinkType::PointToPoint,
            MAX_NDN_PACKET_SIZE,
        )?;
        Ok(Self { base })
    }
}

impl Transport for NullTransport {
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn send_frame(&self, frame: Bytes) {
        trace!("{} - 프레임 {}바이트 버림", self.base, frame.len());
    }

    async fn run_receive(self: Arc<Self>, _sink: Arc<dyn LinkService>) {
        let mut stop_rx = self.base.shutdown().subscribe();
        let _ = stop_rx.changed().await;
    }

    fn close(&self) {}

    fn set_persistency(&self, persistency: Persistency) -> bool {
        if persistency == Persistency::Permanent {
            self.base.store_persistency(persistency);
            return true;
        }
        false
    }
}

/// Null transport 위의 링크 서비스
pub struct NullLinkService {
    transport: Arc<NullTransport>,
    counters: AtomicCounters,
    lifecycle: Lifecycle,
}

impl NullLinkService {
    pub fn new() -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            transport: Arc::new(NullTransport::new()?),
            counters: AtomicCounters::default(),
            lifecycle: Lifecycle::new(),
        }))
    }
}

impl fmt::Display for NullLinkService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NullLinkService, {}", self.transport.base())
    }
}

impl LinkService for NullLinkService {
    fn transport_base(&self) -> &TransportBase {
        self.transport.base()
    }

    fn start(self: Arc<Self>) {
        if !self.lifecycle.start() {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let sink: Arc<dyn LinkService> = self.clone();
        let handle = tokio::spawn(async move {
            transport.run_receive(sink).await;
        });
        self.transport.base().shutdown().add_task(handle);
    }

    fn send_packet(&self, pkt: PendingPacket) {
        let counter = if pkt.packet.is_interest() {
            &self.counters.n_out_interests
        } else {
            &self.counters.n_out_data
        };
        counter.fetch_add(1, Ordering::Relaxed);
        trace!("{} - {} 버림", self, pkt.packet.name());
    }

    fn handle_incoming_frame(&self, _frame: &[u8]) {}

    fn set_persistency(&self, persistency: Persistency) -> bool {
        self.transport.set_persistency(persistency)
    }

    fn change_state(&self, new_state: FaceState) {
        if new_state != FaceState::Up {
            self.lifecycle.set(LinkServiceState::Quit);
        }
        self.transport.change_state(new_state);
    }

    fn send_queue_size(&self) -> u64 {
        0
    }

    fn counters(&self) -> FaceCounters {
        self.counters.snapshot(self.transport.base())
    }

    fn lifecycle(&self) -> LinkServiceState {
        self.lifecycle.get()
    }
}
