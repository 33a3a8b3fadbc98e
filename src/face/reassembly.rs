//! 단편 재조립 저장소
//!
//! 기준 시퀀스(`sequence - frag_index`, 래핑)별로 단편을 모은다.
//! - 그룹마다 만료 시간 (TTL)
//! - 그룹 수 상한 초과 시 가장 오래된 그룹 제거
//! - 그룹 누적 크기가 `MAX_NDN_PACKET_SIZE`를 넘으면 그룹 폐기
//! - 받은 단편만 저장 (FragCount 크기로 미리 할당하지 않음)

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::lp::LpPacket;
use crate::tlv::MAX_NDN_PACKET_SIZE;
use crate::{Error, Result};

/// 재조립 완료된 메시지
#[derive(Debug)]
pub struct Reassembled {
    /// FragIndex 0 단편의 헤더 (PIT 토큰, 혼잡 표시 등)
    pub head: LpPacket,
    pub payload: Bytes,
}

struct PartialMessage {
    frag_count: u64,
    /// FragIndex 0 단편 헤더 (Fragment는 `fragments`로 옮김)
    head: Option<LpPacket>,
    fragments: BTreeMap<u64, Bytes>,
    total_len: usize,
    created_at: Instant,
}

pub struct PartialMessageStore {
    groups: HashMap<u64, PartialMessage>,
    ttl: Duration,
    max_groups: usize,
}

impl PartialMessageStore {
    pub fn new(ttl: Duration, max_groups: usize) -> Self {
        Self {
            groups: HashMap::new(),
            ttl,
            max_groups: max_groups.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// 미완성 그룹들이 들고 있는 단편 수
    pub fn buffered_fragments(&self) -> usize {
        self.groups.values().map(|g| g.fragments.len()).sum()
    }

    /// 단편 삽입
    ///
    /// 그룹이 완성되면 단편 순서대로 이어 붙여 반환하고 그룹을 제거한다.
    /// 중복 단편은 무시한다.
    pub fn insert(&mut self, mut frag: LpPacket, now: Instant) -> Result<Option<Reassembled>> {
        let sequence = frag
            .sequence
            .ok_or_else(|| Error::InvalidFragment("missing Sequence".into()))?;
        let frag_index = frag.frag_index.unwrap_or(0);
        let frag_count = frag.frag_count.unwrap_or(1);
        let Some(payload) = frag.fragment.take() else {
            return Err(Error::InvalidFragment("missing Fragment".into()));
        };
        if frag_count == 0 || frag_index >= frag_count {
            return Err(Error::InvalidFragment(format!(
                "FragIndex {frag_index} out of range for FragCount {frag_count}"
            )));
        }
        // 빈 단편이 아니면 FragCount는 패킷 최대 크기를 넘을 수 없다
        if frag_count > MAX_NDN_PACKET_SIZE as u64 {
            return Err(Error::InvalidFragment(format!("FragCount {frag_count} too large")));
        }
        // 시퀀스는 u64 전체를 돌아 다시 0부터 이어진다
        let base = sequence.wrapping_sub(frag_index);

        self.evict_expired(now);

        if let Some(group) = self.groups.get(&base) {
            if group.frag_count != frag_count {
                self.groups.remove(&base);
                return Err(Error::InvalidFragment(format!(
                    "FragCount mismatch for base sequence {base}"
                )));
            }
        } else {
            if self.groups.len() >= self.max_groups {
                self.evict_oldest();
            }
            self.groups.insert(
                base,
                PartialMessage {
                    frag_count,
                    head: None,
                    fragments: BTreeMap::new(),
                    total_len: 0,
                    created_at: now,
                },
            );
        }

        let Some(group) = self.groups.get_mut(&base) else {
            return Ok(None);
        };
        if group.fragments.contains_key(&frag_index) {
            return Ok(None);
        }
        let total_len = group.total_len + payload.len();
        if total_len > MAX_NDN_PACKET_SIZE {
            self.groups.remove(&base);
            warn!(
                "재조립 그룹 크기 초과: base={}, {} > {} 바이트, 그룹 폐기",
                base, total_len, MAX_NDN_PACKET_SIZE
            );
            return Err(Error::PacketTooLarge {
                size: total_len,
                max: MAX_NDN_PACKET_SIZE,
            });
        }
        group.total_len = total_len;
        group.fragments.insert(frag_index, payload);
        if frag_index == 0 {
            group.head = Some(frag);
        }
        if (group.fragments.len() as u64) < group.frag_count {
            return Ok(None);
        }

        let Some(group) = self.groups.remove(&base) else {
            return Ok(None);
        };
        let mut payload = BytesMut::with_capacity(group.total_len);
        for bytes in group.fragments.values() {
            payload.extend_from_slice(bytes);
        }
        Ok(Some(Reassembled {
            head: group.head.unwrap_or_default(),
            payload: payload.freeze(),
        }))
    }

    /// 만료된 그룹 제거
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let before = self.groups.len();
        let ttl = self.ttl;
        self.groups
            .retain(|_, g| now.saturating_duration_since(g.created_at) < ttl);
        let evicted = before - self.groups.len();
        if evicted > 0 {
            debug!("재조립 그룹 {}개 만료", evicted);
        }
        evicted
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .groups
            .iter()
            .min_by_key(|(_, g)| g.created_at)
            .map(|(&base, _)| base);
        if let Some(base) = oldest {
            debug!("재조립 그룹 상한 초과: base={} 제거", base);
            self.groups.remove(&base);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(seq: u64, index: u64, count: u64, data: &'static [u8]) -> LpPacket {
        LpPacket {
            sequence: Some(seq),
            frag_index: Some(index),
            frag_count: Some(count),
            fragment: Some(Bytes::from_static(data)),
            ..LpPacket::default()
        }
    }

    #[test]
    fn test_reassemble_out_of_order() {
        let mut store = PartialMessageStore::new(Duration::from_secs(1), 8);
        let now = Instant::now();

        assert!(store.insert(frag(12, 2, 3, b"ef"), now).unwrap().is_none());
        let mut head = frag(10, 0, 3, b"ab");
        head.pit_token = Some(Bytes::from_static(b"tok"));
        assert!(store.insert(head, now).unwrap().is_none());
        // 중복 무시
        assert!(store.insert(frag(12, 2, 3, b"ef"), now).unwrap().is_none());

        let done = store.insert(frag(11, 1, 3, b"cd"), now).unwrap().unwrap();
        assert_eq!(&done.payload[..], b"abcdef");
        assert_eq!(done.head.pit_token.as_deref(), Some(&b"tok"[..]));
        assert!(store.is_empty());
    }

    #[test]
    fn test_invalid_index() {
        let mut store = PartialMessageStore::new(Duration::from_secs(1), 8);
        let now = Instant::now();
        assert!(store.insert(frag(5, 3, 3, b"x"), now).is_err());
        assert!(store.insert(frag(5, 0, 0, b"x"), now).is_err());
        let mut missing = frag(5, 0, 2, b"x");
        missing.fragment = None;
        assert!(store.insert(missing, now).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_reassemble_across_sequence_wrap() {
        let mut store = PartialMessageStore::new(Duration::from_secs(1), 8);
        let now = Instant::now();

        // base = u64::MAX - 1, 시퀀스가 0으로 돌아간다
        assert!(store.insert(frag(0, 2, 3, b"ef"), now).unwrap().is_none());
        assert!(store
            .insert(frag(u64::MAX - 1, 0, 3, b"ab"), now)
            .unwrap()
            .is_none());
        assert_eq!(store.len(), 1);
        let done = store
            .insert(frag(u64::MAX, 1, 3, b"cd"), now)
            .unwrap()
            .unwrap();
        assert_eq!(&done.payload[..], b"abcdef");
        assert!(store.is_empty());
    }

    #[test]
    fn test_oversized_group_dropped() {
        static CHUNK: [u8; 8000] = [0x42; 8000];
        let mut store = PartialMessageStore::new(Duration::from_secs(1), 8);
        let now = Instant::now();

        assert!(store.insert(frag(100, 0, 4, &CHUNK), now).unwrap().is_none());
        assert!(matches!(
            store.insert(frag(101, 1, 4, &CHUNK), now),
            Err(Error::PacketTooLarge {
                size: 16000,
                max: MAX_NDN_PACKET_SIZE
            })
        ));
        assert!(store.is_empty());

        // 폐기된 그룹의 나머지 단편은 새 그룹을 시작하고 다시 거부된다
        assert!(store.insert(frag(102, 2, 4, &CHUNK), now).unwrap().is_none());
        assert!(store.insert(frag(103, 3, 4, &CHUNK), now).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_large_frag_count_stores_only_received() {
        let mut store = PartialMessageStore::new(Duration::from_secs(1), 256);
        let now = Instant::now();
        let count = MAX_NDN_PACKET_SIZE as u64;

        for i in 0..64 {
            let seq = i * 10_000;
            assert!(store.insert(frag(seq, 0, count, b"x"), now).unwrap().is_none());
        }
        assert_eq!(store.len(), 64);
        assert_eq!(store.buffered_fragments(), 64);

        assert!(store
            .insert(frag(0, 0, count + 1, b"x"), now)
            .is_err());
    }

    #[test]
    fn test_count_mismatch_drops_group() {
        let mut store = PartialMessageStore::new(Duration::from_secs(1), 8);
        let now = Instant::now();
        store.insert(frag(20, 0, 3, b"a"), now).unwrap();
        assert!(store.insert(frag(21, 1, 4, b"b"), now).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_ttl_eviction() {
        let mut store = PartialMessageStore::new(Duration::from_millis(100), 8);
        let now = Instant::now();
        store.insert(frag(0, 0, 2, b"a"), now).unwrap();
        assert_eq!(store.len(), 1);

        // 만료 후 도착한 나머지 단편은 새 그룹을 만든다
        let later = now + Duration::from_millis(150);
        assert!(store.insert(frag(1, 1, 2, b"b"), later).unwrap().is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.evict_expired(later + Duration::from_millis(150)), 1);
    }

    #[test]
    fn test_max_groups_evicts_oldest() {
        let mut store = PartialMessageStore::new(Duration::from_secs(10), 2);
        let now = Instant::now();
        store.insert(frag(0, 0, 2, b"a"), now).unwrap();
        store
            .insert(frag(10, 0, 2, b"b"), now + Duration::from_millis(1))
            .unwrap();
        store
            .insert(frag(20, 0, 2, b"c"), now + Duration::from_millis(2))
            .unwrap();
        assert_eq!(store.len(), 2);

        // base 0 그룹은 이미 제거되어 새 그룹이 되고, 이번엔 base 10이 밀려난다
        assert!(store
            .insert(frag(1, 1, 2, b"a"), now + Duration::from_millis(3))
            .unwrap()
            .is_none());
        let done = store
            .insert(frag(21, 1, 2, b"d"), now + Duration::from_millis(4))
            .unwrap()
            .unwrap();
        assert_eq!(&done.payload[..], b"cd");
        assert_eq!(store.len(), 1);
    }
}
