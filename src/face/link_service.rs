//! 링크 서비스
//!
//! Transport 하나를 소유하고 네트워크 계층 패킷과 링크 프레임 사이를 변환한다.
//! Face 테이블은 `Arc<dyn LinkService>`로 face를 보관한다.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::state::{FaceState, LinkType, Persistency, Scope};
use super::table::FaceTable;
use super::transport::TransportBase;
use crate::pending::PendingPacket;
use crate::uri::FaceUri;
use crate::Config;

/// 링크 서비스 생명주기
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkServiceState {
    Created,
    Running,
    Quitting,
    Quit,
}

#[derive(Debug)]
pub(crate) struct Lifecycle(AtomicU8);

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub(crate) fn get(&self) -> LinkServiceState {
        match self.0.load(Ordering::SeqCst) {
            0 => LinkServiceState::Created,
            1 => LinkServiceState::Running,
            2 => LinkServiceState::Quitting,
            _ => LinkServiceState::Quit,
        }
    }

    pub(crate) fn set(&self, state: LinkServiceState) {
        let v = match state {
            LinkServiceState::Created => 0,
            LinkServiceState::Running => 1,
            LinkServiceState::Quitting => 2,
            LinkServiceState::Quit => 3,
        };
        self.0.store(v, Ordering::SeqCst);
    }

    /// Created -> Running (한 번만 성공)
    pub(crate) fn start(&self) -> bool {
        self.0
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Face 카운터 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaceCounters {
    pub n_in_interests: u64,
    pub n_in_data: u64,
    pub n_out_interests: u64,
    pub n_out_data: u64,
    pub n_in_bytes: u64,
    pub n_out_bytes: u64,
}

#[derive(Debug, Default)]
pub(crate) struct AtomicCounters {
    pub n_in_interests: AtomicU64,
    pub n_in_data: AtomicU64,
    pub n_out_interests: AtomicU64,
    pub n_out_data: AtomicU64,
}

impl AtomicCounters {
    pub(crate) fn snapshot(&self, base: &TransportBase) -> FaceCounters {
        FaceCounters {
            n_in_interests: self.n_in_interests.load(Ordering::Relaxed),
            n_in_data: self.n_in_data.load(Ordering::Relaxed),
            n_out_interests: self.n_out_interests.load(Ordering::Relaxed),
            n_out_data: self.n_out_data.load(Ordering::Relaxed),
            n_in_bytes: base.n_in_bytes(),
            n_out_bytes: base.n_out_bytes(),
        }
    }
}

/// 관리 프로토콜 Flags 비트: 로컬 필드 (다음 홉 지정, 수신 face 표시, 캐시 정책)
pub const FLAG_LOCAL_FIELDS: u64 = 1 << 0;
/// 관리 프로토콜 Flags 비트: 혼잡 표시
pub const FLAG_CONGESTION_MARKING: u64 = 1 << 2;

/// 기본 혼잡 표시 간격
pub const BASE_CONGESTION_MARKING_INTERVAL: Duration = Duration::from_millis(100);
/// 기본 혼잡 임계값 (바이트)
pub const DEFAULT_CONGESTION_THRESHOLD_BYTES: u64 = 65536;

/// NDNLPv2 링크 서비스 옵션
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdnlpLinkServiceOptions {
    pub fragmentation: bool,
    pub reassembly: bool,
    /// 수신 패킷의 NextHopFaceId 필드 반영
    pub consumer_controlled_forwarding: bool,
    /// 송신 패킷에 IncomingFaceId 필드 추가
    pub incoming_face_indication: bool,
    /// CachePolicy 필드 반영
    pub local_cache_policy: bool,
    pub congestion_marking: bool,
    pub base_congestion_marking_interval: Duration,
    pub default_congestion_threshold_bytes: u64,
    pub reassembly_timeout: Duration,
    pub reassembly_max_groups: usize,
}

impl Default for NdnlpLinkServiceOptions {
    fn default() -> Self {
        Self {
            fragmentation: true,
            reassembly: true,
            consumer_controlled_forwarding: false,
            incoming_face_indication: false,
            local_cache_policy: false,
            congestion_marking: true,
            base_congestion_marking_interval: BASE_CONGESTION_MARKING_INTERVAL,
            default_congestion_threshold_bytes: DEFAULT_CONGESTION_THRESHOLD_BYTES,
            reassembly_timeout: Duration::from_millis(500),
            reassembly_max_groups: 256,
        }
    }
}

impl NdnlpLinkServiceOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            congestion_marking: config.congestion_marking,
            reassembly_timeout: config.reassembly_timeout(),
            reassembly_max_groups: config.reassembly_max_groups,
            ..Self::default()
        }
    }

    /// 관리 프로토콜용 Flags
    pub fn flags(&self) -> u64 {
        let mut flags = 0;
        if self.consumer_controlled_forwarding {
            flags |= FLAG_LOCAL_FIELDS;
        }
        if self.congestion_marking {
            flags |= FLAG_CONGESTION_MARKING;
        }
        flags
    }

    /// Flags/Mask 적용
    ///
    /// 로컬 필드 비트는 세 로컬 옵션을 함께 켜고 끈다.
    pub fn apply_flags(&mut self, flags: u64, mask: u64) {
        if mask & FLAG_LOCAL_FIELDS != 0 {
            let on = flags & FLAG_LOCAL_FIELDS != 0;
            self.consumer_controlled_forwarding = on;
            self.incoming_face_indication = on;
            self.local_cache_policy = on;
        }
        if mask & FLAG_CONGESTION_MARKING != 0 {
            self.congestion_marking = flags & FLAG_CONGESTION_MARKING != 0;
        }
    }
}

/// 링크 서비스 공통 인터페이스
pub trait LinkService: fmt::Display + Send + Sync + 'static {
    fn transport_base(&self) -> &TransportBase;

    /// 송신 루프, 수신 루프, 만료 검사 태스크 시작
    fn start(self: Arc<Self>);

    /// 송신 큐에 패킷 추가 (가득 차면 버림)
    fn send_packet(&self, pkt: PendingPacket);

    /// transport가 받은 프레임 처리
    fn handle_incoming_frame(&self, frame: &[u8]);

    fn set_persistency(&self, persistency: Persistency) -> bool;

    fn change_state(&self, new_state: FaceState);

    /// 링크 서비스 큐 + transport 큐의 바이트
    fn send_queue_size(&self) -> u64;

    fn counters(&self) -> FaceCounters;

    fn lifecycle(&self) -> LinkServiceState;

    /// NDNLPv2 옵션 (NDNLPv2 링크 서비스가 아니면 None)
    fn link_options(&self) -> Option<NdnlpLinkServiceOptions> {
        None
    }

    /// NDNLPv2 옵션 변경 (지원하지 않으면 false)
    fn set_link_options(&self, _options: NdnlpLinkServiceOptions) -> bool {
        false
    }

    fn face_id(&self) -> u64 {
        self.transport_base().face_id()
    }

    fn bind(&self, face_id: u64, table: Weak<FaceTable>) -> bool {
        self.transport_base().bind(face_id, table)
    }

    fn remote_uri(&self) -> &FaceUri {
        self.transport_base().remote_uri()
    }

    fn local_uri(&self) -> &FaceUri {
        self.transport_base().local_uri()
    }

    fn scope(&self) -> Scope {
        self.transport_base().scope()
    }

    fn link_type(&self) -> LinkType {
        self.transport_base().link_type()
    }

    fn persistency(&self) -> Persistency {
        self.transport_base().persistency()
    }

    fn mtu(&self) -> usize {
        self.transport_base().mtu()
    }

    fn set_mtu(&self, mtu: usize) {
        self.transport_base().set_mtu(mtu)
    }

    fn state(&self) -> FaceState {
        self.transport_base().state()
    }

    fn expiration_period(&self) -> Duration {
        self.transport_base().expiration_period()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = NdnlpLinkServiceOptions::default();
        assert!(opts.fragmentation);
        assert!(opts.reassembly);
        assert_eq!(opts.base_congestion_marking_interval, Duration::from_millis(100));
        assert_eq!(opts.default_congestion_threshold_bytes, 65536);
        assert_eq!(opts.flags(), FLAG_CONGESTION_MARKING);
    }

    #[test]
    fn test_apply_flags_respects_mask() {
        let mut opts = NdnlpLinkServiceOptions::default();
        opts.apply_flags(FLAG_LOCAL_FIELDS, FLAG_LOCAL_FIELDS);
        assert!(opts.consumer_controlled_forwarding);
        assert!(opts.incoming_face_indication);
        assert!(opts.local_cache_policy);
        assert!(opts.congestion_marking);

        opts.apply_flags(0, FLAG_CONGESTION_MARKING);
        assert!(!opts.congestion_marking);
        assert!(opts.local_cache_policy);
        assert_eq!(opts.flags(), FLAG_LOCAL_FIELDS);
    }

    #[test]
    fn test_lifecycle_start_once() {
        let lc = Lifecycle::new();
        assert_eq!(lc.get(), LinkServiceState::Created);
        assert!(lc.start());
        assert!(!lc.start());
        assert_eq!(lc.get(), LinkServiceState::Running);
        lc.set(LinkServiceState::Quit);
        assert_eq!(lc.get(), LinkServiceState::Quit);
    }
}
