//! 포워딩 스레드와 face 사이를 오가는 패킷

use bytes::Bytes;

use crate::lp::CachePolicy;
use crate::packet::NetPacket;
use crate::Result;

/// PIT 토큰 길이 (스레드 인덱스 2바이트 + 태그 4바이트)
pub const PIT_TOKEN_LEN: usize = 6;

/// 큐에 들어가는 패킷
///
/// `raw`는 수신 버퍼와 별개로 소유한 바이트다.
#[derive(Debug, Clone)]
pub struct PendingPacket {
    pub raw: Bytes,
    pub packet: NetPacket,
    pub pit_token: Option<Bytes>,
    pub congestion_mark: Option<u64>,
    pub incoming_face_id: Option<u64>,
    pub next_hop_face_id: Option<u64>,
    pub cache_policy: Option<CachePolicy>,
}

impl PendingPacket {
    /// 와이어 바이트에서 생성
    pub fn from_wire(raw: Bytes) -> Result<Self> {
        let packet = NetPacket::decode(&raw)?;
        Ok(Self::with_raw(raw, packet))
    }

    /// 디코딩된 패킷에서 생성
    pub fn from_packet(packet: NetPacket) -> Self {
        let raw = packet.encode();
        Self::with_raw(raw, packet)
    }

    fn with_raw(raw: Bytes, packet: NetPacket) -> Self {
        Self {
            raw,
            packet,
            pit_token: None,
            congestion_mark: None,
            incoming_face_id: None,
            next_hop_face_id: None,
            cache_policy: None,
        }
    }

    pub fn with_pit_token(mut self, token: Bytes) -> Self {
        self.pit_token = Some(token);
        self
    }
}

/// 자체 PIT 토큰 생성
pub fn make_pit_token(thread: u16, tag: u32) -> Bytes {
    let mut token = Vec::with_capacity(PIT_TOKEN_LEN);
    token.extend_from_slice(&thread.to_be_bytes());
    token.extend_from_slice(&tag.to_be_bytes());
    Bytes::from(token)
}

/// PIT 토큰에서 스레드 인덱스 추출
///
/// 길이가 맞지 않으면 `None`
pub fn pit_token_thread(token: &[u8]) -> Option<u16> {
    if token.len() != PIT_TOKEN_LEN {
        return None;
    }
    Some(u16::from_be_bytes([token[0], token[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Interest;

    #[test]
    fn test_pit_token() {
        let token = make_pit_token(3, 0xDEADBEEF);
        assert_eq!(token.len(), PIT_TOKEN_LEN);
        assert_eq!(pit_token_thread(&token), Some(3));
        assert_eq!(pit_token_thread(&token[..4]), None);
    }

    #[test]
    fn test_from_packet_keeps_wire() {
        let pkt = PendingPacket::from_packet(NetPacket::Interest(Interest::new(
            "/a/b".parse().unwrap(),
        )));
        let again = PendingPacket::from_wire(pkt.raw.clone()).unwrap();
        assert_eq!(again.packet, pkt.packet);
    }
}
