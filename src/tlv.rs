//! TLV 인코딩/디코딩
//!
//! NDN 패킷 형식의 TLV (Type-Length-Value) 기본 코덱
//! - TLV-TYPE, TLV-LENGTH: 1/3/5/9 바이트 가변 길이 정수
//! - NNI: 1/2/4/8 바이트 비음수 정수

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// 최대 NDN 패킷 크기 (바이트)
pub const MAX_NDN_PACKET_SIZE: usize = 8800;

/// 가변 길이 정수 인코딩 크기
pub fn varint_len(v: u64) -> usize {
    if v < 0xFD {
        1
    } else if v <= 0xFFFF {
        3
    } else if v <= 0xFFFF_FFFF {
        5
    } else {
        9
    }
}

/// 가변 길이 정수 쓰기
pub fn write_varint(buf: &mut BytesMut, v: u64) {
    if v < 0xFD {
        buf.put_u8(v as u8);
    } else if v <= 0xFFFF {
        buf.put_u8(0xFD);
        buf.put_u16(v as u16);
    } else if v <= 0xFFFF_FFFF {
        buf.put_u8(0xFE);
        buf.put_u32(v as u32);
    } else {
        buf.put_u8(0xFF);
        buf.put_u64(v);
    }
}

/// 가변 길이 정수 읽기
///
/// 데이터가 부족하면 `None`. 성공 시 (값, 소비한 바이트 수)
pub fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let first = *buf.first()?;
    match first {
        0xFD => {
            let b = buf.get(1..3)?;
            Some((u16::from_be_bytes([b[0], b[1]]) as u64, 3))
        }
        0xFE => {
            let b = buf.get(1..5)?;
            Some((u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64, 5))
        }
        0xFF => {
            let b = buf.get(1..9)?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(b);
            Some((u64::from_be_bytes(arr), 9))
        }
        v => Some((v as u64, 1)),
    }
}

/// 버퍼 앞쪽 TLV 블록의 (타입, 전체 크기)
///
/// 헤더나 값이 아직 다 도착하지 않았으면 `None`
pub fn peek_block(buf: &[u8]) -> Option<(u64, usize)> {
    let (typ, t_len) = read_varint(buf)?;
    let (len, l_len) = read_varint(&buf[t_len..])?;
    let total = (t_len + l_len).saturating_add(len as usize);
    if buf.len() < total {
        return None;
    }
    Some((typ, total))
}

/// 네트워크 계층 필수 TLV 판정
///
/// 타입 번호 31 이하이거나 홀수면 필수(critical)
pub fn is_critical(typ: u64) -> bool {
    typ <= 31 || typ & 1 == 1
}

/// NNI 인코딩 크기
pub fn nni_len(v: u64) -> usize {
    if v <= 0xFF {
        1
    } else if v <= 0xFFFF {
        2
    } else if v <= 0xFFFF_FFFF {
        4
    } else {
        8
    }
}

/// NNI 쓰기 (최소 길이)
pub fn write_nni(buf: &mut BytesMut, v: u64) {
    match nni_len(v) {
        1 => buf.put_u8(v as u8),
        2 => buf.put_u16(v as u16),
        4 => buf.put_u32(v as u32),
        _ => buf.put_u64(v),
    }
}

/// NNI 읽기
pub fn read_nni(value: &[u8]) -> Result<u64> {
    match value.len() {
        1 => Ok(value[0] as u64),
        2 => Ok(u16::from_be_bytes([value[0], value[1]]) as u64),
        4 => Ok(u32::from_be_bytes([value[0], value[1], value[2], value[3]]) as u64),
        8 => {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(value);
            Ok(u64::from_be_bytes(arr))
        }
        len => Err(Error::InvalidNni { len }),
    }
}

/// TLV 하나 쓰기
pub fn write_tlv(buf: &mut BytesMut, typ: u64, value: &[u8]) {
    write_varint(buf, typ);
    write_varint(buf, value.len() as u64);
    buf.put_slice(value);
}

/// NNI 값을 가진 TLV 쓰기
pub fn write_nni_tlv(buf: &mut BytesMut, typ: u64, v: u64) {
    write_varint(buf, typ);
    write_varint(buf, nni_len(v) as u64);
    write_nni(buf, v);
}

/// 값 길이가 `len`인 TLV의 전체 인코딩 크기
pub fn tlv_len(typ: u64, len: usize) -> usize {
    varint_len(typ) + varint_len(len as u64) + len
}

/// 디코딩된 TLV 블록
///
/// 값은 원본 버퍼를 복사 없이 참조한다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub typ: u64,
    pub value: Bytes,
}

impl Block {
    pub fn new(typ: u64, value: impl Into<Bytes>) -> Self {
        Self {
            typ,
            value: value.into(),
        }
    }

    /// 버퍼 앞쪽 블록 하나 디코딩
    ///
    /// 반환: (블록, 소비한 바이트 수)
    pub fn decode(buf: &Bytes) -> Result<(Block, usize)> {
        let (typ, t_len) = read_varint(buf).ok_or(Error::Truncated {
            need: 1,
            have: buf.len(),
        })?;
        let (len, l_len) = read_varint(&buf[t_len..]).ok_or(Error::Truncated {
            need: t_len + 1,
            have: buf.len(),
        })?;
        let start = t_len + l_len;
        let end = start
            .checked_add(len as usize)
            .ok_or(Error::PacketTooLarge {
                size: usize::MAX,
                max: MAX_NDN_PACKET_SIZE,
            })?;
        if buf.len() < end {
            return Err(Error::Truncated {
                need: end,
                have: buf.len(),
            });
        }
        Ok((
            Block {
                typ,
                value: buf.slice(start..end),
            },
            end,
        ))
    }

    /// 버퍼 전체가 정확히 블록 하나여야 할 때
    pub fn decode_exact(buf: &Bytes, expected: u64) -> Result<Block> {
        let (block, consumed) = Self::decode(buf)?;
        if block.typ != expected {
            return Err(Error::UnexpectedType {
                expected,
                got: block.typ,
            });
        }
        if consumed != buf.len() {
            return Err(Error::InvalidFragment(format!(
                "trailing {} bytes after TLV",
                buf.len() - consumed
            )));
        }
        Ok(block)
    }

    /// 값 내부의 하위 블록 목록
    pub fn children(&self) -> Result<Vec<Block>> {
        let mut out = Vec::new();
        let mut rest = self.value.clone();
        while !rest.is_empty() {
            let (child, consumed) = Block::decode(&rest)?;
            out.push(child);
            rest = rest.slice(consumed..);
        }
        Ok(out)
    }

    pub fn encoded_len(&self) -> usize {
        tlv_len(self.typ, self.value.len())
    }

    pub fn encode_to(&self, buf: &mut BytesMut) {
        write_tlv(buf, self.typ, &self.value);
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf.freeze()
    }

    pub fn as_nni(&self) -> Result<u64> {
        read_nni(&self.value)
    }
}
