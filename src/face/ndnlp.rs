//! NDNLPv2 링크 서비스
//!
//! 송신: 헤더 오버헤드를 뺀 유효 MTU로 단편화, 첫 단편에만 PIT 토큰/혼잡 표시/수신 face 표시
//! 수신: LpPacket 해제, 재조립, 네트워크 계층 패킷 디코딩 후 포워딩 스레드로 분배
//!
//! ```text
//! send_packet() -> [송신 큐] -> 송신 루프 -> fragment() -> Transport::send_frame()
//! Transport 수신 루프 -> handle_incoming_frame() -> [재조립] -> Dispatcher
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

use super::link_service::{
    AtomicCounters, FaceCounters, Lifecycle, LinkService, LinkServiceState, NdnlpLinkServiceOptions,
};
use super::reassembly::PartialMessageStore;
use super::state::{FaceState, Persistency};
use super::transport::{Transport, TransportBase};
use crate::dispatch::Dispatcher;
use crate::lp::{LpPacket, TT_LP_PACKET, TT_PIT_TOKEN};
use crate::packet::{TT_DATA, TT_INTEREST};
use crate::pending::PendingPacket;
use crate::tlv;
use crate::{Config, Error, Result};

/// LpPacket TL + Fragment TL (길이 필드 최대 3바이트)
pub const LP_BASE_OVERHEAD: usize = 8;
/// Sequence + FragIndex + FragCount (각각 최대 10바이트)
pub const FRAGMENTATION_OVERHEAD: usize = 30;
const CONGESTION_MARK_OVERHEAD: usize = 12;
const INCOMING_FACE_ID_OVERHEAD: usize = 12;
const CACHE_POLICY_OVERHEAD: usize = 9;

/// 헤더 필드가 차지하는 최대 바이트
pub fn header_overhead(header: &LpPacket, fragmentation: bool) -> usize {
    let mut overhead = LP_BASE_OVERHEAD;
    if fragmentation {
        overhead += FRAGMENTATION_OVERHEAD;
    }
    if let Some(token) = &header.pit_token {
        overhead += tlv::tlv_len(TT_PIT_TOKEN, token.len());
    }
    if header.congestion_mark.is_some() {
        overhead += CONGESTION_MARK_OVERHEAD;
    }
    if header.incoming_face_id.is_some() {
        overhead += INCOMING_FACE_ID_OVERHEAD;
    }
    if header.cache_policy.is_some() {
        overhead += CACHE_POLICY_OVERHEAD;
    }
    overhead
}

/// 네트워크 계층 패킷을 LP 프레임으로 분할
///
/// `header`의 필드는 첫 단편에만 들어간다. 한 프레임에 들어가면 Sequence 없이
/// 단일 LpPacket을 만든다. 여러 단편이면 `next_sequence`에서 연속된 시퀀스를 할당한다.
pub fn fragment(
    payload: &Bytes,
    header: LpPacket,
    mtu: usize,
    fragmentation: bool,
    next_sequence: &AtomicU64,
) -> Result<Vec<Bytes>> {
    let overhead = header_overhead(&header, fragmentation);
    if mtu <= overhead {
        return Err(Error::MtuTooSmall { mtu, overhead });
    }
    let effective_mtu = mtu - overhead;

    if payload.len() <= effective_mtu {
        let mut lp = header;
        lp.fragment = Some(payload.clone());
        return Ok(vec![lp.encode()]);
    }
    if !fragmentation {
        return Err(Error::PacketTooLarge {
            size: payload.len(),
            max: effective_mtu,
        });
    }

    let frag_count = payload.len().div_ceil(effective_mtu);
    let base = next_sequence.fetch_add(frag_count as u64, Ordering::Relaxed);
    let mut frames = Vec::with_capacity(frag_count);
    let mut first = Some(header);
    for (index, start) in (0..payload.len()).step_by(effective_mtu).enumerate() {
        let end = (start + effective_mtu).min(payload.len());
        let mut lp = first.take().unwrap_or_default();
        lp.sequence = Some(base.wrapping_add(index as u64));
        lp.frag_index = Some(index as u64);
        lp.frag_count = Some(frag_count as u64);
        lp.fragment = Some(payload.slice(start..end));
        frames.push(lp.encode());
    }
    Ok(frames)
}

/// 혼잡 표시 빈도 제한
#[derive(Debug, Default)]
pub struct CongestionMarker {
    last_mark: Option<Instant>,
}

impl CongestionMarker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 큐 점유량이 임계값을 넘고 마지막 표시 후 `interval`이 지났으면 true
    pub fn should_mark(
        &mut self,
        occupancy: u64,
        threshold: u64,
        interval: Duration,
        now: Instant,
    ) -> bool {
        if occupancy <= threshold {
            return false;
        }
        if let Some(last) = self.last_mark {
            if now.saturating_duration_since(last) < interval {
                return false;
            }
        }
        self.last_mark = Some(now);
        true
    }
}

/// NDNLPv2 링크 서비스
pub struct NdnlpLinkService<T: Transport> {
    transport: Arc<T>,

    /// 포워딩 스레드 분배기
    dispatcher: Arc<Dispatcher>,

    options: RwLock<NdnlpLinkServiceOptions>,

    /// 송신 큐
    send_tx: mpsc::Sender<PendingPacket>,
    send_rx: Mutex<Option<mpsc::Receiver<PendingPacket>>>,

    /// 송신 큐에 쌓인 바이트
    queued_bytes: AtomicU64,

    counters: AtomicCounters,
    lifecycle: Lifecycle,

    /// 다음 단편 시퀀스 (송신 루프만 증가시킨다)
    next_sequence: AtomicU64,

    marker: Mutex<CongestionMarker>,
    reassembly: Mutex<PartialMessageStore>,

    /// 만료 검사 주기
    expiration_check: Duration,
}

impl<T: Transport> NdnlpLinkService<T> {
    pub fn new(
        transport: Arc<T>,
        options: NdnlpLinkServiceOptions,
        dispatcher: Arc<Dispatcher>,
        config: &Config,
    ) -> Arc<Self> {
        let (send_tx, send_rx) = mpsc::channel(config.queue_size.max(1));
        Arc::new(Self {
            transport,
            dispatcher,
            reassembly: Mutex::new(PartialMessageStore::new(
                options.reassembly_timeout,
                options.reassembly_max_groups,
            )),
            options: RwLock::new(options),
            send_tx,
            send_rx: Mutex::new(Some(send_rx)),
            queued_bytes: AtomicU64::new(0),
            counters: AtomicCounters::default(),
            lifecycle: Lifecycle::new(),
            next_sequence: AtomicU64::new(rand::random::<u32>() as u64),
            marker: Mutex::new(CongestionMarker::new()),
            expiration_check: config.expiration_check_interval(),
        })
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    async fn run_send(self: Arc<Self>, mut rx: mpsc::Receiver<PendingPacket>) {
        let mut stop_rx = self.transport.base().shutdown().subscribe();
        loop {
            let pkt = tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                pkt = rx.recv() => match pkt {
                    Some(pkt) => pkt,
                    None => break,
                },
            };
            self.send_one(pkt).await;
        }
        self.lifecycle.set(LinkServiceState::Quit);
        debug!("{} - 송신 루프 종료", self);
    }

    async fn send_one(&self, pkt: PendingPacket) {
        let len = pkt.raw.len() as u64;
        let occupancy = self.queued_bytes.load(Ordering::Relaxed) + self.transport.send_queue_size();
        self.queued_bytes.fetch_sub(len, Ordering::Relaxed);

        if self.transport.base().state() != FaceState::Up {
            warn!("{} - Down 상태 face로 송신 시도 - DROP", self);
            return;
        }

        let options = *self.options.read();
        let mut header = LpPacket {
            pit_token: pkt.pit_token.clone(),
            congestion_mark: pkt.congestion_mark,
            ..LpPacket::default()
        };
        if options.congestion_marking && header.congestion_mark.is_none() {
            let mark = self.marker.lock().should_mark(
                occupancy,
                options.default_congestion_threshold_bytes,
                options.base_congestion_marking_interval,
                Instant::now(),
            );
            if mark {
                debug!("{} - 혼잡 표시 (점유 {}바이트)", self, occupancy);
                header.congestion_mark = Some(1);
            }
        }
        if options.incoming_face_indication {
            header.incoming_face_id = pkt.incoming_face_id;
        }
        if options.local_cache_policy {
            header.cache_policy = pkt.cache_policy;
        }

        let mtu = self.transport.base().mtu();
        let frames = match fragment(
            &pkt.raw,
            header,
            mtu,
            options.fragmentation,
            &self.next_sequence,
        ) {
            Ok(frames) => frames,
            Err(e @ Error::PacketTooLarge { .. }) => {
                info!("{} - 단편화 비활성, {} - DROP", self, e);
                return;
            }
            Err(e) => {
                warn!("{} - 단편화 실패: {} - DROP", self, e);
                return;
            }
        };

        let counter = if pkt.packet.is_interest() {
            &self.counters.n_out_interests
        } else {
            &self.counters.n_out_data
        };
        counter.fetch_add(1, Ordering::Relaxed);

        for frame in frames {
            if frame.len() > mtu {
                warn!("{} - 프레임 {} > MTU {}, 나머지 단편 포기", self, frame.len(), mtu);
                break;
            }
            self.transport.send_frame(frame).await;
        }
    }

    async fn run_expiration(self: Arc<Self>) {
        let mut stop_rx = self.transport.base().shutdown().subscribe();
        let mut interval = tokio::time::interval(self.expiration_check);
        interval.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = interval.tick() => {
                    let now = Instant::now();
                    self.reassembly.lock().evict_expired(now);
                    if self.transport.base().is_expired(now) {
                        info!("{} - 유휴 수명 만료", self);
                        self.change_state(FaceState::Down);
                        break;
                    }
                }
            }
        }
    }

    fn handle_lp_frame(&self, wire: Bytes) {
        let lp = match LpPacket::decode(&wire) {
            Ok(lp) => lp,
            Err(e) => {
                debug!("{} - 유효하지 않은 LpPacket: {} - DROP", self, e);
                return;
            }
        };
        if lp.is_idle() {
            trace!("{} - IDLE 프레임 - DROP", self);
            return;
        }

        let options = *self.options.read();
        if lp.has_fragmentation_fields() && !options.reassembly {
            warn!("{} - 재조립 비활성 상태에서 단편 수신 - DROP", self);
            return;
        }

        if lp.frag_count.unwrap_or(1) == 1 {
            if lp.frag_index.unwrap_or(0) != 0 {
                debug!("{} - FragCount=1, FragIndex != 0 - DROP", self);
                return;
            }
            let mut head = lp;
            let payload = head.fragment.take().unwrap_or_default();
            self.deliver(head, payload, &options);
            return;
        }

        let result = self.reassembly.lock().insert(lp, Instant::now());
        match result {
            Ok(Some(done)) => self.deliver(done.head, done.payload, &options),
            Ok(None) => {}
            Err(e) => debug!("{} - 재조립 실패: {} - DROP", self, e),
        }
    }

    fn deliver(&self, head: LpPacket, payload: Bytes, options: &NdnlpLinkServiceOptions) {
        if head.nack.is_some() {
            debug!("{} - Nack 수신 (미지원) - DROP", self);
            return;
        }

        let mut pkt = match PendingPacket::from_wire(payload) {
            Ok(pkt) => pkt,
            Err(e) => {
                debug!("{} - 네트워크 계층 패킷 디코딩 실패: {} - DROP", self, e);
                return;
            }
        };
        pkt.congestion_mark = head.congestion_mark;
        pkt.pit_token = head.pit_token;
        if options.consumer_controlled_forwarding {
            pkt.next_hop_face_id = head.next_hop_face_id;
        }
        if options.local_cache_policy {
            pkt.cache_policy = head.cache_policy;
        }
        pkt.incoming_face_id = Some(self.face_id());

        let counter = if pkt.packet.is_interest() {
            &self.counters.n_in_interests
        } else {
            &self.counters.n_in_data
        };
        counter.fetch_add(1, Ordering::Relaxed);

        trace!("{} - 수신 {}", self, pkt.packet.name());
        self.dispatcher.dispatch(pkt, self.scope());
    }
}

impl<T: Transport> fmt::Display for NdnlpLinkService<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NdnlpLinkService, {}", self.transport.base())
    }
}

impl<T: Transport> LinkService for NdnlpLinkService<T> {
    fn transport_base(&self) -> &TransportBase {
        self.transport.base()
    }

    fn start(self: Arc<Self>) {
        if !self.lifecycle.start() {
            warn!("{} - 이미 시작됨", self);
            return;
        }
        let Some(rx) = self.send_rx.lock().take() else {
            return;
        };
        let shutdown = self.transport.base().shutdown();

        shutdown.add_task(tokio::spawn(Arc::clone(&self).run_send(rx)));

        let transport = Arc::clone(&self.transport);
        let sink: Arc<dyn LinkService> = self.clone();
        shutdown.add_task(tokio::spawn(transport.run_receive(sink)));

        shutdown.add_task(tokio::spawn(Arc::clone(&self).run_expiration()));

        debug!("{} - 시작", self);
    }

    fn send_packet(&self, pkt: PendingPacket) {
        let len = pkt.raw.len() as u64;
        self.queued_bytes.fetch_add(len, Ordering::Relaxed);
        match self.send_tx.try_send(pkt) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.queued_bytes.fetch_sub(len, Ordering::Relaxed);
                warn!("{} - 송신 큐 가득 참 - DROP", self);
            }
            Err(TrySendError::Closed(_)) => {
                self.queued_bytes.fetch_sub(len, Ordering::Relaxed);
                debug!("{} - 송신 루프 종료됨 - DROP", self);
            }
        }
    }

    fn handle_incoming_frame(&self, frame: &[u8]) {
        let wire = Bytes::copy_from_slice(frame);
        match tlv::peek_block(&wire) {
            Some((TT_INTEREST, _)) | Some((TT_DATA, _)) => {
                let options = *self.options.read();
                self.deliver(LpPacket::default(), wire, &options);
            }
            Some((TT_LP_PACKET, _)) => self.handle_lp_frame(wire),
            Some((typ, _)) => debug!("{} - 알 수 없는 프레임 타입 {:#x} - DROP", self, typ),
            None => debug!("{} - 잘린 프레임 - DROP", self),
        }
    }

    fn set_persistency(&self, persistency: Persistency) -> bool {
        self.transport.set_persistency(persistency)
    }

    fn change_state(&self, new_state: FaceState) {
        if new_state != FaceState::Up {
            match self.lifecycle.get() {
                LinkServiceState::Created => self.lifecycle.set(LinkServiceState::Quit),
                LinkServiceState::Running => self.lifecycle.set(LinkServiceState::Quitting),
                _ => {}
            }
        }
        self.transport.change_state(new_state);
    }

    fn send_queue_size(&self) -> u64 {
        self.queued_bytes.load(Ordering::Relaxed) + self.transport.send_queue_size()
    }

    fn counters(&self) -> FaceCounters {
        self.counters.snapshot(self.transport.base())
    }

    fn lifecycle(&self) -> LinkServiceState {
        self.lifecycle.get()
    }

    fn link_options(&self) -> Option<NdnlpLinkServiceOptions> {
        Some(*self.options.read())
    }

    fn set_link_options(&self, options: NdnlpLinkServiceOptions) -> bool {
        let mut current = self.options.write();
        if current.reassembly_timeout != options.reassembly_timeout
            || current.reassembly_max_groups != options.reassembly_max_groups
        {
            *self.reassembly.lock() =
                PartialMessageStore::new(options.reassembly_timeout, options.reassembly_max_groups);
        }
        *current = options;
        true
    }
}
