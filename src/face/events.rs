//! Face 이벤트
//!
//! 고정 크기 링 버퍼. 가득 차면 가장 오래된 이벤트를 버린다.
//! 새 이벤트 ID는 broadcast 채널로 구독자에게 알린다.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::link_service::LinkService;
use super::state::{LinkType, Persistency, Scope};
use crate::tlv;

pub const TT_FACE_EVENT_NOTIFICATION: u64 = 0xC0;
pub const TT_FACE_EVENT_KIND: u64 = 0xC1;
pub const TT_FACE_ID: u64 = 0x69;
pub const TT_URI: u64 = 0x72;
pub const TT_LOCAL_URI: u64 = 0x81;
pub const TT_FACE_SCOPE: u64 = 0x84;
pub const TT_FACE_PERSISTENCY: u64 = 0x85;
pub const TT_LINK_TYPE: u64 = 0x86;
pub const TT_FLAGS: u64 = 0x6C;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceEventKind {
    Created,
    Destroyed,
    Up,
    Down,
}

impl FaceEventKind {
    pub fn code(self) -> u64 {
        match self {
            FaceEventKind::Created => 1,
            FaceEventKind::Destroyed => 2,
            FaceEventKind::Up => 3,
            FaceEventKind::Down => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceEvent {
    pub event_id: u64,
    pub kind: FaceEventKind,
    pub face_id: u64,
    pub remote_uri: String,
    pub local_uri: String,
    pub scope: Scope,
    pub persistency: Persistency,
    pub link_type: LinkType,
    pub flags: u64,
}

impl FaceEvent {
    /// FaceEventNotification TLV
    pub fn encode(&self) -> Bytes {
        let mut value = BytesMut::new();
        tlv::write_nni_tlv(&mut value, TT_FACE_EVENT_KIND, self.kind.code());
        tlv::write_nni_tlv(&mut value, TT_FACE_ID, self.face_id);
        tlv::write_tlv(&mut value, TT_URI, self.remote_uri.as_bytes());
        tlv::write_tlv(&mut value, TT_LOCAL_URI, self.local_uri.as_bytes());
        tlv::write_nni_tlv(&mut value, TT_FACE_SCOPE, self.scope.code());
        tlv::write_nni_tlv(&mut value, TT_FACE_PERSISTENCY, self.persistency.code());
        tlv::write_nni_tlv(&mut value, TT_LINK_TYPE, self.link_type.code());
        tlv::write_nni_tlv(&mut value, TT_FLAGS, self.flags);

        let mut out = BytesMut::with_capacity(tlv::tlv_len(TT_FACE_EVENT_NOTIFICATION, value.len()));
        tlv::write_tlv(&mut out, TT_FACE_EVENT_NOTIFICATION, &value);
        out.freeze()
    }
}

struct Ring {
    events: VecDeque<FaceEvent>,
    next_id: u64,
}

pub struct FaceEvents {
    ring: Mutex<Ring>,
    capacity: usize,
    notify: broadcast::Sender<u64>,
}

impl FaceEvents {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (notify, _) = broadcast::channel(capacity);
        Self {
            ring: Mutex::new(Ring {
                events: VecDeque::with_capacity(capacity),
                next_id: 1,
            }),
            capacity,
            notify,
        }
    }

    /// 이벤트 기록, 새 이벤트 ID 반환
    pub fn emit(&self, kind: FaceEventKind, face: &dyn LinkService) -> u64 {
        let event_id = {
            let mut ring = self.ring.lock();
            let event_id = ring.next_id;
            ring.next_id += 1;
            if ring.events.len() >= self.capacity {
                ring.events.pop_front();
            }
            ring.events.push_back(FaceEvent {
                event_id,
                kind,
                face_id: face.face_id(),
                remote_uri: face.remote_uri().to_string(),
                local_uri: face.local_uri().to_string(),
                scope: face.scope(),
                persistency: face.persistency(),
                link_type: face.link_type(),
                flags: face.link_options().map(|o| o.flags()).unwrap_or(0),
            });
            event_id
        };
        debug!("Face 이벤트 {}: {:?} FaceID={}", event_id, kind, face.face_id());
        // 구독자가 없으면 실패하지만 무시
        let _ = self.notify.send(event_id);
        event_id
    }

    /// ID로 조회 (버려진 이벤트는 None)
    pub fn get(&self, event_id: u64) -> Option<FaceEvent> {
        let ring = self.ring.lock();
        let first = ring.events.front()?.event_id;
        if event_id < first {
            return None;
        }
        ring.events.get((event_id - first) as usize).cloned()
    }

    pub fn last_id(&self) -> Option<u64> {
        self.ring.lock().events.back().map(|e| e.event_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<u64> {
        self.notify.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::null::NullLinkService;
    use crate::tlv::Block;

    #[test]
    fn test_ring_discards_oldest() {
        let events = FaceEvents::new(3);
        let face = NullLinkService::new().unwrap();
        assert_eq!(events.last_id(), None);

        for _ in 0..5 {
            events.emit(FaceEventKind::Created, face.as_ref());
        }
        assert_eq!(events.last_id(), Some(5));
        assert!(events.get(2).is_none());
        assert_eq!(events.get(3).unwrap().event_id, 3);
        assert_eq!(events.get(5).unwrap().kind, FaceEventKind::Created);
        assert!(events.get(6).is_none());
    }

    #[tokio::test]
    async fn test_subscribe_receives_ids() {
        let events = FaceEvents::new(10);
        let mut rx = events.subscribe();
        let face = NullLinkService::new().unwrap();

        let id = events.emit(FaceEventKind::Up, face.as_ref());
        assert_eq!(rx.recv().await.unwrap(), id);
    }

    #[test]
    fn test_encode_notification() {
        let events = FaceEvents::new(10);
        let face = NullLinkService::new().unwrap();
        let id = events.emit(FaceEventKind::Destroyed, face.as_ref());

        let wire = events.get(id).unwrap().encode();
        let block = Block::decode_exact(&wire, TT_FACE_EVENT_NOTIFICATION).unwrap();
        let children = block.children().unwrap();
        assert_eq!(children[0].typ, TT_FACE_EVENT_KIND);
        assert_eq!(children[0].as_nni().unwrap(), 2);
        assert_eq!(children[2].typ, TT_URI);
        assert_eq!(&children[2].value[..], b"null://");
    }
}
