//! Transport 추상화
//!
//! - `TransportBase`: 모든 transport가 공유하는 상태 (URI, 상태, MTU, 카운터)
//! - `Transport`: 프레임 송신, 수신 루프, 소켓 종료
//!
//! 상태가 Up에서 벗어나면 (1) 종료 신호 (2) 소켓 종료 (3) Face 테이블 제거
//! 순서로 정리한다.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::link_service::LinkService;
use super::shutdown::ShutdownToken;
use super::state::{FaceState, LinkType, Persistency, Scope};
use super::table::FaceTable;
use crate::uri::FaceUri;
use crate::{Error, Result};

/// 아직 테이블에 추가되지 않은 face의 ID
pub const INVALID_FACE_ID: u64 = 0;

struct FaceBinding {
    face_id: u64,
    table: Weak<FaceTable>,
}

/// Transport 공통 상태
pub struct TransportBase {
    kind: &'static str,
    binding: OnceLock<FaceBinding>,
    remote_uri: FaceUri,
    local_uri: FaceUri,
    scope: Scope,
    link_type: LinkType,
    persistency: Mutex<Persistency>,
    mtu: AtomicUsize,
    state: AtomicU8,
    lifetime: Option<Duration>,
    expiration: Mutex<Option<Instant>>,
    n_in_bytes: AtomicU64,
    n_out_bytes: AtomicU64,
    shutdown: ShutdownToken,
}

impl TransportBase {
    /// 새 transport 기반 상태 (Up 상태로 시작)
    ///
    /// 두 URI 모두 정규화되어 있어야 한다.
    pub fn new(
        kind: &'static str,
        remote_uri: FaceUri,
        local_uri: FaceUri,
        persistency: Persistency,
        scope: Scope,
        link_type: LinkType,
        mtu: usize,
    ) -> Result<Self> {
        if !remote_uri.is_canonical() {
            return Err(Error::NonCanonicalUri(remote_uri.to_string()));
        }
        if !local_uri.is_canonical() {
            return Err(Error::NonCanonicalUri(local_uri.to_string()));
        }
        Ok(Self {
            kind,
            binding: OnceLock::new(),
            remote_uri,
            local_uri,
            scope,
            link_type,
            persistency: Mutex::new(persistency),
            mtu: AtomicUsize::new(mtu),
            state: AtomicU8::new(FaceState::Up.as_u8()),
            lifetime: None,
            expiration: Mutex::new(None),
            n_in_bytes: AtomicU64::new(0),
            n_out_bytes: AtomicU64::new(0),
            shutdown: ShutdownToken::new(),
        })
    }

    /// 유휴 수명 설정 (온디맨드 face에만 적용)
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        *self.expiration.get_mut() = Some(Instant::now() + lifetime);
        self
    }

    pub fn face_id(&self) -> u64 {
        self.binding
            .get()
            .map(|b| b.face_id)
            .unwrap_or(INVALID_FACE_ID)
    }

    /// Face 테이블이 ID를 부여할 때 한 번만 호출
    pub(crate) fn bind(&self, face_id: u64, table: Weak<FaceTable>) -> bool {
        self.binding.set(FaceBinding { face_id, table }).is_ok()
    }

    fn table(&self) -> Option<(u64, Arc<FaceTable>)> {
        let binding = self.binding.get()?;
        Some((binding.face_id, binding.table.upgrade()?))
    }

    pub fn remote_uri(&self) -> &FaceUri {
        &self.remote_uri
    }

    pub fn local_uri(&self) -> &FaceUri {
        &self.local_uri
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    pub fn persistency(&self) -> Persistency {
        *self.persistency.lock()
    }

    pub(crate) fn store_persistency(&self, persistency: Persistency) {
        *self.persistency.lock() = persistency;
        if persistency == Persistency::OnDemand {
            self.refresh_expiration();
        }
    }

    pub fn mtu(&self) -> usize {
        self.mtu.load(Ordering::Relaxed)
    }

    pub fn set_mtu(&self, mtu: usize) {
        self.mtu.store(mtu, Ordering::Relaxed);
    }

    pub fn state(&self) -> FaceState {
        FaceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// 상태 전환, 바뀌었으면 이전 상태
    ///
    /// Up을 떠난 face(종료 신호 이후)는 다시 Up이 되지 않는다.
    fn transition_state(&self, new_state: FaceState) -> Option<FaceState> {
        let new = new_state.as_u8();
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                let revive = new_state == FaceState::Up && cur != FaceState::Up.as_u8();
                (cur != new && !revive).then_some(new)
            })
            .ok()
            .map(FaceState::from_u8)
    }

    pub fn shutdown(&self) -> &ShutdownToken {
        &self.shutdown
    }

    /// 송수신이 일어났을 때 만료 시각 연장
    pub fn refresh_expiration(&self) {
        if let Some(lifetime) = self.lifetime {
            *self.expiration.lock() = Some(Instant::now() + lifetime);
        }
    }

    /// 온디맨드 face가 만료되었는지
    pub fn is_expired(&self, now: Instant) -> bool {
        if self.persistency() != Persistency::OnDemand {
            return false;
        }
        match *self.expiration.lock() {
            Some(at) => now >= at,
            None => false,
        }
    }

    /// 만료까지 남은 시간 (온디맨드가 아니면 0)
    pub fn expiration_period(&self) -> Duration {
        if self.persistency() != Persistency::OnDemand {
            return Duration::ZERO;
        }
        match *self.expiration.lock() {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    pub fn record_in(&self, n: usize) {
        self.n_in_bytes.fetch_add(n as u64, Ordering::Relaxed);
        self.refresh_expiration();
    }

    pub fn record_out(&self, n: usize) {
        self.n_out_bytes.fetch_add(n as u64, Ordering::Relaxed);
        self.refresh_expiration();
    }

    pub fn n_in_bytes(&self) -> u64 {
        self.n_in_bytes.load(Ordering::Relaxed)
    }

    pub fn n_out_bytes(&self) -> u64 {
        self.n_out_bytes.load(Ordering::Relaxed)
    }
}

impl fmt::Display for TransportBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, FaceID={}, RemoteURI={}, LocalURI={}",
            self.kind,
            self.face_id(),
            self.remote_uri,
            self.local_uri
        )
    }
}

/// 실제 매체 위의 프레임 송수신
///
/// 링크 서비스만 `send_frame`을 호출한다.
pub trait Transport: Send + Sync + 'static {
    fn base(&self) -> &TransportBase;

    /// 프레임 하나 송신
    ///
    /// MTU보다 크면 기록 후 버린다. 부분 송신은 없다.
    fn send_frame(&self, frame: Bytes) -> impl Future<Output = ()> + Send;

    /// 수신 루프
    ///
    /// 종료 신호를 받거나 매체가 끊길 때까지 받은 프레임을 링크 서비스에 넘긴다.
    fn run_receive(self: Arc<Self>, sink: Arc<dyn LinkService>)
        -> impl Future<Output = ()> + Send;

    /// 소켓 종료
    fn close(&self);

    /// 커널 송신 큐에 쌓인 바이트
    fn send_queue_size(&self) -> u64 {
        0
    }

    /// 지속성 변경 (허용되지 않는 값이면 false)
    fn set_persistency(&self, persistency: Persistency) -> bool;

    /// 상태 변경
    ///
    /// 같은 상태면 아무것도 하지 않는다. Up을 떠나면 face가 종료되므로 이후 Up 전환은 무시한다.
    fn change_state(&self, new_state: FaceState) {
        let base = self.base();
        let Some(old_state) = base.transition_state(new_state) else {
            if new_state == FaceState::Up && base.state() != FaceState::Up {
                debug!("{} - 종료된 face의 Up 전환 무시", base);
            }
            return;
        };

        info!("{} - 상태 변경: {} -> {}", base, old_state, new_state);

        let table = base.table();
        if let Some((face_id, table)) = &table {
            table.on_state_change(*face_id, new_state);
        }

        if old_state == FaceState::Up {
            base.shutdown().signal_stop();
            self.close();
            if let Some((face_id, table)) = table {
                debug!("{} - Face 테이블에서 제거", base);
                table.remove(face_id);
            }
        }
    }
}
