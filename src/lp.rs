//! NDNLPv2 링크 프로토콜 패킷
//!
//! LpPacket = 헤더 필드들 + (선택) Fragment.
//! Fragment가 없는 LpPacket은 IDLE 패킷이다.

use bytes::{Bytes, BytesMut};

use crate::tlv::{self, Block};
use crate::{Error, Result};

pub const TT_FRAGMENT: u64 = 0x50;
pub const TT_SEQUENCE: u64 = 0x51;
pub const TT_FRAG_INDEX: u64 = 0x52;
pub const TT_FRAG_COUNT: u64 = 0x53;
pub const TT_PIT_TOKEN: u64 = 0x62;
pub const TT_LP_PACKET: u64 = 0x64;
pub const TT_NACK: u64 = 0x0320;
pub const TT_NEXT_HOP_FACE_ID: u64 = 0x0330;
pub const TT_INCOMING_FACE_ID: u64 = 0x0331;
pub const TT_CACHE_POLICY: u64 = 0x0334;
pub const TT_CACHE_POLICY_TYPE: u64 = 0x0335;
pub const TT_CONGESTION_MARK: u64 = 0x0340;
pub const TT_ACK: u64 = 0x0344;
pub const TT_TX_SEQUENCE: u64 = 0x0348;
pub const TT_NON_DISCOVERY: u64 = 0x034c;
pub const TT_PREFIX_ANNOUNCEMENT: u64 = 0x0350;

/// Sequence 필드는 고정 8바이트로 쓴다
pub const SEQUENCE_LEN: usize = 8;

/// LP 헤더 필드가 필수(critical)인지
///
/// 800..=959 범위이면서 하위 2비트가 0이면 무시 가능, 그 외는 필수
pub fn is_lp_critical(typ: u64) -> bool {
    !((800..=959).contains(&typ) && typ & 0x03 == 0)
}

/// CachePolicy 힌트
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    NoCache,
}

impl CachePolicy {
    pub fn code(self) -> u64 {
        match self {
            CachePolicy::NoCache => 1,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(CachePolicy::NoCache),
            _ => None,
        }
    }
}

/// 디코딩된 NDNLPv2 패킷
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LpPacket {
    pub sequence: Option<u64>,
    pub frag_index: Option<u64>,
    pub frag_count: Option<u64>,
    pub pit_token: Option<Bytes>,
    pub nack: Option<Bytes>,
    pub next_hop_face_id: Option<u64>,
    pub incoming_face_id: Option<u64>,
    pub cache_policy: Option<CachePolicy>,
    pub congestion_mark: Option<u64>,
    pub non_discovery: bool,
    pub prefix_announcement: Option<Bytes>,
    pub fragment: Option<Bytes>,
}

impl LpPacket {
    /// 단편 하나를 담은 LpPacket
    pub fn with_fragment(fragment: Bytes) -> Self {
        Self {
            fragment: Some(fragment),
            ..Self::default()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.fragment.is_none()
    }

    /// FragIndex/FragCount 중 하나라도 있는지
    pub fn has_fragmentation_fields(&self) -> bool {
        self.frag_index.is_some() || self.frag_count.is_some()
    }

    /// LpPacket TLV 전체를 디코딩
    pub fn decode(wire: &Bytes) -> Result<Self> {
        let block = Block::decode_exact(wire, TT_LP_PACKET)?;
        let mut pkt = LpPacket::default();

        for field in block.children()? {
            match field.typ {
                TT_FRAGMENT => pkt.fragment = Some(field.value),
                TT_SEQUENCE => pkt.sequence = Some(field.as_nni()?),
                TT_FRAG_INDEX => pkt.frag_index = Some(field.as_nni()?),
                TT_FRAG_COUNT => pkt.frag_count = Some(field.as_nni()?),
                TT_PIT_TOKEN => pkt.pit_token = Some(field.value),
                TT_NACK => pkt.nack = Some(field.value),
                TT_NEXT_HOP_FACE_ID => pkt.next_hop_face_id = Some(field.as_nni()?),
                TT_INCOMING_FACE_ID => pkt.incoming_face_id = Some(field.as_nni()?),
                TT_CACHE_POLICY => {
                    for inner in field.children()? {
                        if inner.typ == TT_CACHE_POLICY_TYPE {
                            pkt.cache_policy = CachePolicy::from_code(inner.as_nni()?);
                        }
                    }
                }
                TT_CONGESTION_MARK => pkt.congestion_mark = Some(field.as_nni()?),
                TT_NON_DISCOVERY => pkt.non_discovery = true,
                TT_PREFIX_ANNOUNCEMENT => pkt.prefix_announcement = Some(field.value),
                // 신뢰성 계층은 구현하지 않음
                TT_ACK | TT_TX_SEQUENCE => {}
                typ if is_lp_critical(typ) => return Err(Error::UnrecognizedCritical { typ }),
                _ => {}
            }
        }
        Ok(pkt)
    }

    /// 와이어 형식으로 인코딩 (Fragment는 항상 마지막)
    pub fn encode(&self) -> Bytes {
        let mut value = BytesMut::new();
        if let Some(seq) = self.sequence {
            tlv::write_tlv(&mut value, TT_SEQUENCE, &seq.to_be_bytes());
        }
        if let Some(idx) = self.frag_index {
            tlv::write_nni_tlv(&mut value, TT_FRAG_INDEX, idx);
        }
        if let Some(count) = self.frag_count {
            tlv::write_nni_tlv(&mut value, TT_FRAG_COUNT, count);
        }
        if let Some(token) = &self.pit_token {
            tlv::write_tlv(&mut value, TT_PIT_TOKEN, token);
        }
        if let Some(nack) = &self.nack {
            tlv::write_tlv(&mut value, TT_NACK, nack);
        }
        if let Some(id) = self.next_hop_face_id {
            tlv::write_nni_tlv(&mut value, TT_NEXT_HOP_FACE_ID, id);
        }
        if let Some(id) = self.incoming_face_id {
            tlv::write_nni_tlv(&mut value, TT_INCOMING_FACE_ID, id);
        }
        if let Some(policy) = self.cache_policy {
            let mut inner = BytesMut::new();
            tlv::write_nni_tlv(&mut inner, TT_CACHE_POLICY_TYPE, policy.code());
            tlv::write_tlv(&mut value, TT_CACHE_POLICY, &inner);
        }
        if let Some(mark) = self.congestion_mark {
            tlv::write_nni_tlv(&mut value, TT_CONGESTION_MARK, mark);
        }
        if self.non_discovery {
            tlv::write_tlv(&mut value, TT_NON_DISCOVERY, &[]);
        }
        if let Some(pa) = &self.prefix_announcement {
            tlv::write_tlv(&mut value, TT_PREFIX_ANNOUNCEMENT, pa);
        }
        if let Some(frag) = &self.fragment {
            tlv::write_tlv(&mut value, TT_FRAGMENT, frag);
        }
        Block::new(TT_LP_PACKET, value.freeze()).encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lp_criticality() {
        // 무시 가능: 800..=959, 하위 2비트 0
        assert!(!is_lp_critical(TT_CONGESTION_MARK));
        assert!(!is_lp_critical(TT_NON_DISCOVERY));
        assert!(!is_lp_critical(800));
        assert!(is_lp_critical(801));
        assert!(is_lp_critical(TT_INCOMING_FACE_ID));
        assert!(is_lp_critical(TT_FRAGMENT));
        assert!(is_lp_critical(960));
    }

    #[test]
    fn test_encode_decode_fields() {
        let pkt = LpPacket {
            sequence: Some(42),
            frag_index: Some(1),
            frag_count: Some(3),
            pit_token: Some(Bytes::from_static(&[0, 1, 2, 3, 4, 5])),
            congestion_mark: Some(1),
            cache_policy: Some(CachePolicy::NoCache),
            incoming_face_id: Some(300),
            fragment: Some(Bytes::from_static(b"frag")),
            ..LpPacket::default()
        };

        let wire = pkt.encode();
        let decoded = LpPacket::decode(&wire).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn test_idle_packet() {
        let wire = LpPacket::default().encode();
        assert_eq!(&wire[..], &[0x64, 0x00]);
        assert!(LpPacket::decode(&wire).unwrap().is_idle());
    }

    #[test]
    fn test_unknown_critical_lp_field() {
        let mut value = BytesMut::new();
        tlv::write_tlv(&mut value, 0x0325, &[1]);
        let wire = Block::new(TT_LP_PACKET, value.freeze()).encode();
        assert!(matches!(
            LpPacket::decode(&wire),
            Err(Error::UnrecognizedCritical { typ: 0x0325 })
        ));
    }

    #[test]
    fn test_unknown_ignorable_lp_field() {
        let mut value = BytesMut::new();
        tlv::write_tlv(&mut value, 0x0360, &[1]);
        tlv::write_tlv(&mut value, TT_FRAGMENT, b"x");
        let wire = Block::new(TT_LP_PACKET, value.freeze()).encode();
        let pkt = LpPacket::decode(&wire).unwrap();
        assert_eq!(pkt.fragment.as_deref(), Some(&b"x"[..]));
    }
}
