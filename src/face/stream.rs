//! 스트림 매체(TCP, Unix) 공통 수신 처리
//!
//! 읽은 바이트를 버퍼에 쌓고 완성된 TLV 블록 단위로 잘라낸다.
//! 최대 패킷 크기를 넘는 블록이 선언되면 연결을 끊어야 하는 프레이밍 오류다.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;

use super::link_service::LinkService;
use super::transport::TransportBase;
use crate::tlv::{self, MAX_NDN_PACKET_SIZE};
use crate::{Error, Result};

/// TLV 스트림 프레이머
#[derive(Debug)]
pub struct TlvFramer {
    buf: BytesMut,
}

impl TlvFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_NDN_PACKET_SIZE * 2),
        }
    }

    /// 리더에서 한 번 읽어 버퍼에 추가 (0이면 EOF)
    pub async fn fill<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> std::io::Result<usize> {
        self.buf.reserve(MAX_NDN_PACKET_SIZE);
        reader.read_buf(&mut self.buf).await
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// 완성된 블록 하나를 꺼낸다
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        let Some((_, t_len)) = tlv::read_varint(&self.buf) else {
            return Ok(None);
        };
        let Some((len, l_len)) = tlv::read_varint(&self.buf[t_len..]) else {
            return Ok(None);
        };
        let total = (t_len + l_len).saturating_add(len as usize);
        if total > MAX_NDN_PACKET_SIZE {
            return Err(Error::PacketTooLarge {
                size: total,
                max: MAX_NDN_PACKET_SIZE,
            });
        }
        if self.buf.len() < total {
            return Ok(None);
        }
        Ok(Some(self.buf.split_to(total).freeze()))
    }
}

impl Default for TlvFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// 스트림 수신 루프 종료 원인
#[derive(Debug)]
pub enum StreamEnd {
    /// 종료 신호
    Stopped,
    /// 원격 EOF
    Closed,
    Failed(Error),
}

/// 스트림에서 프레임을 읽어 링크 서비스에 넘긴다
pub async fn run_stream_receive<R: AsyncRead + Unpin>(
    reader: &mut R,
    base: &TransportBase,
    sink: &dyn LinkService,
    stop_rx: &mut watch::Receiver<bool>,
) -> StreamEnd {
    let mut framer = TlvFramer::new();
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => return StreamEnd::Stopped,
            result = framer.fill(reader) => match result {
                Ok(0) => return StreamEnd::Closed,
                Ok(_) => {}
                Err(e) => return StreamEnd::Failed(e.into()),
            },
        }

        loop {
            match framer.next_frame() {
                Ok(Some(frame)) => {
                    base.record_in(frame.len());
                    sink.handle_incoming_frame(&frame);
                }
                Ok(None) => break,
                Err(e) => return StreamEnd::Failed(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Interest;

    #[test]
    fn test_framer_partial_and_multiple() {
        let a = Interest::new("/a".parse().unwrap()).encode();
        let b = Interest::new("/b/c".parse().unwrap()).encode();
        let mut framer = TlvFramer::new();

        framer.extend(&a[..3]);
        assert!(framer.next_frame().unwrap().is_none());

        framer.extend(&a[3..]);
        framer.extend(&b);
        assert_eq!(framer.next_frame().unwrap().unwrap(), a);
        assert_eq!(framer.next_frame().unwrap().unwrap(), b);
        assert!(framer.next_frame().unwrap().is_none());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_framer_oversized_is_fatal() {
        let mut framer = TlvFramer::new();
        // 타입 5, 길이 0xFD 0x30 0x00 (12288)
        framer.extend(&[0x05, 0xFD, 0x30, 0x00]);
        assert!(matches!(
            framer.next_frame(),
            Err(Error::PacketTooLarge { size: 12292, .. })
        ));
    }

    #[tokio::test]
    async fn test_fill_reads_from_stream() {
        let a = Interest::new("/x".parse().unwrap()).encode();
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client, &a).await.unwrap();
        drop(client);

        let mut framer = TlvFramer::new();
        let mut total = 0;
        loop {
            let n = framer.fill(&mut server).await.unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, a.len());
        assert_eq!(framer.next_frame().unwrap().unwrap(), a);
    }
}
