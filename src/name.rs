//! NDN 이름
//!
//! - URI 표현 (`/a/b`) 파싱/출력
//! - TLV 인코딩/디코딩
//! - 포워딩 스레드 분배용 이름 해시, 접두사별 해시

use std::fmt;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};

use crate::tlv::{self, Block};
use crate::{Error, Result};

pub const TT_NAME: u64 = 0x07;
pub const TT_GENERIC_COMPONENT: u64 = 0x08;

/// 이름 컴포넌트
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Component {
    pub typ: u64,
    pub value: Bytes,
}

impl Component {
    pub fn generic(value: impl Into<Bytes>) -> Self {
        Self {
            typ: TT_GENERIC_COMPONENT,
            value: value.into(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        tlv::tlv_len(self.typ, self.value.len())
    }

    pub fn encode_to(&self, buf: &mut BytesMut) {
        tlv::write_tlv(buf, self.typ, &self.value);
    }

    fn parse(s: &str) -> Result<Self> {
        let (typ, raw) = match s.split_once('=') {
            Some((t, v)) if !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()) => {
                let typ: u64 = t.parse().map_err(|_| Error::InvalidName(s.to_string()))?;
                (typ, v)
            }
            _ => (TT_GENERIC_COMPONENT, s),
        };
        Ok(Self {
            typ,
            value: Bytes::from(percent_decode(raw)?),
        })
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.typ != TT_GENERIC_COMPONENT {
            write!(f, "{}=", self.typ)?;
        }
        for &b in self.value.iter() {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "%{:02X}", b)?;
            }
        }
        Ok(())
    }
}

fn percent_decode(s: &str) -> Result<Vec<u8>> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s
                .get(i + 1..i + 3)
                .ok_or_else(|| Error::InvalidName(s.to_string()))?;
            let v = u8::from_str_radix(hex, 16).map_err(|_| Error::InvalidName(s.to_string()))?;
            out.push(v);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// NDN 이름 (컴포넌트 목록)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Name {
    components: Vec<Component>,
}

impl Name {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_components(components: Vec<Component>) -> Self {
        Self { components }
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Component> {
        self.components.get(i)
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn push(&mut self, c: Component) {
        self.components.push(c);
    }

    /// 길이 `n`인 접두사
    pub fn prefix(&self, n: usize) -> Name {
        Name {
            components: self.components[..n.min(self.len())].to_vec(),
        }
    }

    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.len() <= other.len() && self.components[..] == other.components[..self.len()]
    }

    /// 첫 컴포넌트가 `localhost`인지
    pub fn is_localhost(&self) -> bool {
        self.components
            .first()
            .map(|c| c.typ == TT_GENERIC_COMPONENT && &c.value[..] == b"localhost")
            .unwrap_or(false)
    }

    fn value_len(&self) -> usize {
        self.components.iter().map(Component::encoded_len).sum()
    }

    pub fn encoded_len(&self) -> usize {
        tlv::tlv_len(TT_NAME, self.value_len())
    }

    pub fn encode_to(&self, buf: &mut BytesMut) {
        tlv::write_varint(buf, TT_NAME);
        tlv::write_varint(buf, self.value_len() as u64);
        for c in &self.components {
            c.encode_to(buf);
        }
    }

    /// Name TLV 블록에서 디코딩
    pub fn from_block(block: &Block) -> Result<Self> {
        if block.typ != TT_NAME {
            return Err(Error::UnexpectedType {
                expected: TT_NAME,
                got: block.typ,
            });
        }
        let components = block
            .children()?
            .into_iter()
            .map(|b| Component {
                typ: b.typ,
                value: b.value,
            })
            .collect();
        Ok(Self { components })
    }

    /// 접두사 길이별 해시
    ///
    /// `ret[n]`은 길이 n인 접두사의 해시. `ret[0]`은 모든 이름이 같다.
    pub fn prefix_hashes(&self) -> Vec<u64> {
        let mut hasher = crc32fast::Hasher::new();
        let mut ret = Vec::with_capacity(self.len() + 1);
        ret.push(hasher.clone().finalize() as u64);

        let mut buf = BytesMut::new();
        for c in &self.components {
            buf.clear();
            c.encode_to(&mut buf);
            hasher.update(&buf);
            ret.push(hasher.clone().finalize() as u64);
        }
        ret
    }

    /// 이름 전체 해시
    pub fn hash_value(&self) -> u64 {
        let mut hasher = crc32fast::Hasher::new();
        let mut buf = BytesMut::new();
        for c in &self.components {
            buf.clear();
            c.encode_to(&mut buf);
            hasher.update(&buf);
        }
        hasher.finalize() as u64
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix("ndn:").unwrap_or(s);
        let components = s
            .split('/')
            .filter(|part| !part.is_empty())
            .map(Component::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { components })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for c in &self.components {
            write!(f, "/{}", c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let name: Name = "/a/b%20c/35=x".parse().unwrap();
        assert_eq!(name.len(), 3);
        assert_eq!(&name.get(1).unwrap().value[..], b"b c");
        assert_eq!(name.get(2).unwrap().typ, 35);
        assert_eq!(name.to_string(), "/a/b%20c/35=x");

        let root: Name = "/".parse().unwrap();
        assert!(root.is_empty());
        assert_eq!(root.to_string(), "/");
    }

    #[test]
    fn test_invalid_percent_escape() {
        assert!("/a%G1".parse::<Name>().is_err());
        assert!("/a%4".parse::<Name>().is_err());
    }

    #[test]
    fn test_tlv_roundtrip() {
        let name: Name = "/ndn/edu/ucla".parse().unwrap();
        let mut buf = BytesMut::new();
        name.encode_to(&mut buf);
        assert_eq!(buf.len(), name.encoded_len());

        let block = Block::decode_exact(&buf.freeze(), TT_NAME).unwrap();
        assert_eq!(Name::from_block(&block).unwrap(), name);
    }

    #[test]
    fn test_prefix_hashes_match_prefixes() {
        let name: Name = "/a/b/c".parse().unwrap();
        let hashes = name.prefix_hashes();
        assert_eq!(hashes.len(), 4);
        assert_eq!(hashes[3], name.hash_value());
        assert_eq!(hashes[2], name.prefix(2).hash_value());
        assert_eq!(hashes[0], Name::new().hash_value());
    }

    #[test]
    fn test_localhost() {
        let name: Name = "/localhost/nfd/faces".parse().unwrap();
        assert!(name.is_localhost());
        let name: Name = "/localhop/nfd".parse().unwrap();
        assert!(!name.is_localhost());
    }

    #[test]
    fn test_is_prefix_of() {
        let a: Name = "/a".parse().unwrap();
        let ab: Name = "/a/b".parse().unwrap();
        assert!(a.is_prefix_of(&ab));
        assert!(!ab.is_prefix_of(&a));
    }
}
