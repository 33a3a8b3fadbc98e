//! 네트워크 계층 패킷 (Interest / Data)

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::name::{Name, TT_NAME};
use crate::tlv::{self, Block};
use crate::{Error, Result};

pub const TT_INTEREST: u64 = 0x05;
pub const TT_DATA: u64 = 0x06;
pub const TT_NONCE: u64 = 0x0a;
pub const TT_INTEREST_LIFETIME: u64 = 0x0c;
pub const TT_MUST_BE_FRESH: u64 = 0x12;
pub const TT_META_INFO: u64 = 0x14;
pub const TT_CONTENT: u64 = 0x15;
pub const TT_SIGNATURE_INFO: u64 = 0x16;
pub const TT_SIGNATURE_VALUE: u64 = 0x17;
pub const TT_CONTENT_TYPE: u64 = 0x18;
pub const TT_FRESHNESS_PERIOD: u64 = 0x19;
pub const TT_FINAL_BLOCK_ID: u64 = 0x1a;
pub const TT_FORWARDING_HINT: u64 = 0x1e;
pub const TT_CAN_BE_PREFIX: u64 = 0x21;
pub const TT_HOP_LIMIT: u64 = 0x22;
pub const TT_APPLICATION_PARAMETERS: u64 = 0x24;
pub const TT_INTEREST_SIGNATURE_INFO: u64 = 0x2c;
pub const TT_INTEREST_SIGNATURE_VALUE: u64 = 0x2e;

/// 기본 Interest 수명
pub const DEFAULT_INTEREST_LIFETIME: Duration = Duration::from_millis(4000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interest {
    pub name: Name,
    pub can_be_prefix: bool,
    pub must_be_fresh: bool,
    pub forwarding_hint: Option<Bytes>,
    pub nonce: Option<u32>,
    pub lifetime: Option<Duration>,
    pub hop_limit: Option<u8>,
    pub app_params: Option<Bytes>,
    pub signature_info: Option<Bytes>,
    pub signature_value: Option<Bytes>,
}

impl Interest {
    /// 임의 Nonce를 가진 Interest
    pub fn new(name: Name) -> Self {
        Self {
            name,
            can_be_prefix: false,
            must_be_fresh: false,
            forwarding_hint: None,
            nonce: Some(rand::random()),
            lifetime: None,
            hop_limit: None,
            app_params: None,
            signature_info: None,
            signature_value: None,
        }
    }

    pub fn lifetime_or_default(&self) -> Duration {
        self.lifetime.unwrap_or(DEFAULT_INTEREST_LIFETIME)
    }

    fn decode_value(block: &Block) -> Result<Self> {
        let mut children = block.children()?.into_iter();
        let name_block = children.next().ok_or(Error::Truncated { need: 1, have: 0 })?;
        let mut interest = Interest {
            name: Name::from_block(&name_block)?,
            can_be_prefix: false,
            must_be_fresh: false,
            forwarding_hint: None,
            nonce: None,
            lifetime: None,
            hop_limit: None,
            app_params: None,
            signature_info: None,
            signature_value: None,
        };

        for child in children {
            match child.typ {
                TT_CAN_BE_PREFIX => interest.can_be_prefix = true,
                TT_MUST_BE_FRESH => interest.must_be_fresh = true,
                TT_FORWARDING_HINT => interest.forwarding_hint = Some(child.value),
                TT_NONCE => {
                    let v: [u8; 4] = child.value[..]
                        .try_into()
                        .map_err(|_| Error::InvalidNni { len: child.value.len() })?;
                    interest.nonce = Some(u32::from_be_bytes(v));
                }
                TT_INTEREST_LIFETIME => {
                    interest.lifetime = Some(Duration::from_millis(child.as_nni()?));
                }
                TT_HOP_LIMIT => {
                    if child.value.len() != 1 {
                        return Err(Error::InvalidNni { len: child.value.len() });
                    }
                    interest.hop_limit = Some(child.value[0]);
                }
                TT_APPLICATION_PARAMETERS => interest.app_params = Some(child.value),
                TT_INTEREST_SIGNATURE_INFO => interest.signature_info = Some(child.value),
                TT_INTEREST_SIGNATURE_VALUE => interest.signature_value = Some(child.value),
                typ if tlv::is_critical(typ) => return Err(Error::UnrecognizedCritical { typ }),
                _ => {}
            }
        }
        Ok(interest)
    }

    pub fn encode(&self) -> Bytes {
        let mut value = BytesMut::new();
        self.name.encode_to(&mut value);
        if self.can_be_prefix {
            tlv::write_tlv(&mut value, TT_CAN_BE_PREFIX, &[]);
        }
        if self.must_be_fresh {
            tlv::write_tlv(&mut value, TT_MUST_BE_FRESH, &[]);
        }
        if let Some(hint) = &self.forwarding_hint {
            tlv::write_tlv(&mut value, TT_FORWARDING_HINT, hint);
        }
        if let Some(nonce) = self.nonce {
            tlv::write_tlv(&mut value, TT_NONCE, &nonce.to_be_bytes());
        }
        if let Some(lifetime) = self.lifetime {
            tlv::write_nni_tlv(&mut value, TT_INTEREST_LIFETIME, lifetime.as_millis() as u64);
        }
        if let Some(hop_limit) = self.hop_limit {
            tlv::write_tlv(&mut value, TT_HOP_LIMIT, &[hop_limit]);
        }
        if let Some(params) = &self.app_params {
            tlv::write_tlv(&mut value, TT_APPLICATION_PARAMETERS, params);
        }
        if let Some(info) = &self.signature_info {
            tlv::write_tlv(&mut value, TT_INTEREST_SIGNATURE_INFO, info);
        }
        if let Some(sig) = &self.signature_value {
            tlv::write_tlv(&mut value, TT_INTEREST_SIGNATURE_VALUE, sig);
        }
        Block::new(TT_INTEREST, value.freeze()).encode()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub name: Name,
    pub content_type: Option<u64>,
    pub freshness_period: Option<Duration>,
    pub final_block_id: Option<Bytes>,
    pub content: Bytes,
    pub signature_info: Option<Bytes>,
    pub signature_value: Option<Bytes>,
}

impl Data {
    pub fn new(name: Name, content: impl Into<Bytes>) -> Self {
        Self {
            name,
            content_type: None,
            freshness_period: None,
            final_block_id: None,
            content: content.into(),
            signature_info: None,
            signature_value: None,
        }
    }

    fn decode_value(block: &Block) -> Result<Self> {
        let mut children = block.children()?.into_iter();
        let name_block = children.next().ok_or(Error::Truncated { need: 1, have: 0 })?;
        let mut data = Data::new(Name::from_block(&name_block)?, Bytes::new());

        for child in children {
            match child.typ {
                TT_META_INFO => {
                    for meta in child.children()? {
                        match meta.typ {
                            TT_CONTENT_TYPE => data.content_type = Some(meta.as_nni()?),
                            TT_FRESHNESS_PERIOD => {
                                data.freshness_period = Some(Duration::from_millis(meta.as_nni()?))
                            }
                            TT_FINAL_BLOCK_ID => data.final_block_id = Some(meta.value),
                            typ if tlv::is_critical(typ) => {
                                return Err(Error::UnrecognizedCritical { typ })
                            }
                            _ => {}
                        }
                    }
                }
                TT_CONTENT => data.content = child.value,
                TT_SIGNATURE_INFO => data.signature_info = Some(child.value),
                TT_SIGNATURE_VALUE => data.signature_value = Some(child.value),
                typ if tlv::is_critical(typ) => return Err(Error::UnrecognizedCritical { typ }),
                _ => {}
            }
        }
        Ok(data)
    }

    pub fn encode(&self) -> Bytes {
        let mut value = BytesMut::new();
        self.name.encode_to(&mut value);

        let mut meta = BytesMut::new();
        if let Some(ct) = self.content_type {
            tlv::write_nni_tlv(&mut meta, TT_CONTENT_TYPE, ct);
        }
        if let Some(fp) = self.freshness_period {
            tlv::write_nni_tlv(&mut meta, TT_FRESHNESS_PERIOD, fp.as_millis() as u64);
        }
        if let Some(fb) = &self.final_block_id {
            tlv::write_tlv(&mut meta, TT_FINAL_BLOCK_ID, fb);
        }
        if !meta.is_empty() {
            tlv::write_tlv(&mut value, TT_META_INFO, &meta);
        }

        tlv::write_tlv(&mut value, TT_CONTENT, &self.content);
        // 서명이 없으면 DigestSha256 자리표시자
        match &self.signature_info {
            Some(info) => tlv::write_tlv(&mut value, TT_SIGNATURE_INFO, info),
            None => {
                let mut info = BytesMut::new();
                tlv::write_nni_tlv(&mut info, 0x1b, 0);
                tlv::write_tlv(&mut value, TT_SIGNATURE_INFO, &info);
            }
        }
        match &self.signature_value {
            Some(sig) => tlv::write_tlv(&mut value, TT_SIGNATURE_VALUE, sig),
            None => {
                let mut zero = BytesMut::with_capacity(32);
                zero.put_bytes(0, 32);
                tlv::write_tlv(&mut value, TT_SIGNATURE_VALUE, &zero);
            }
        }
        Block::new(TT_DATA, value.freeze()).encode()
    }
}

/// 디코딩된 네트워크 계층 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetPacket {
    Interest(Interest),
    Data(Data),
}

impl NetPacket {
    /// 와이어 바이트 전체를 Interest 또는 Data로 디코딩
    pub fn decode(wire: &Bytes) -> Result<Self> {
        let (block, consumed) = Block::decode(wire)?;
        if consumed != wire.len() {
            return Err(Error::InvalidFragment(format!(
                "trailing {} bytes after network packet",
                wire.len() - consumed
            )));
        }
        match block.typ {
            TT_INTEREST => Ok(NetPacket::Interest(Interest::decode_value(&block)?)),
            TT_DATA => Ok(NetPacket::Data(Data::decode_value(&block)?)),
            TT_NAME => Err(Error::UnexpectedType {
                expected: TT_INTEREST,
                got: TT_NAME,
            }),
            typ => Err(Error::UnrecognizedCritical { typ }),
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            NetPacket::Interest(i) => i.encode(),
            NetPacket::Data(d) => d.encode(),
        }
    }

    pub fn name(&self) -> &Name {
        match self {
            NetPacket::Interest(i) => &i.name,
            NetPacket::Data(d) => &d.name,
        }
    }

    pub fn is_interest(&self) -> bool {
        matches!(self, NetPacket::Interest(_))
    }
}
