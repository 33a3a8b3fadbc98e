//! Unix 스트림 transport
//!
//! 리스너가 받은 연결만 존재한다. 원격 URI는 `fd://<파일 디스크립터>`, 로컬 URI는 소켓 경로.

use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use super::link_service::LinkService;
use super::state::{FaceState, LinkType, Persistency, Scope};
use super::stream::{run_stream_receive, StreamEnd};
use super::transport::{Transport, TransportBase};
use crate::tlv::MAX_NDN_PACKET_SIZE;
use crate::uri::FaceUri;
use crate::Result;

pub struct UnixStreamTransport {
    base: TransportBase,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader: parking_lot::Mutex<Option<OwnedReadHalf>>,
}

impl UnixStreamTransport {
    pub fn accepted(stream: UnixStream, socket_path: &Path) -> Result<Arc<Self>> {
        let base = TransportBase::new(
            "UnixStreamTransport",
            FaceUri::fd(stream.as_raw_fd()),
            FaceUri::unix(socket_path),
            Persistency::Persistent,
            Scope::Local,
            LinkType::PointToPoint,
            MAX_NDN_PACKET_SIZE,
        )?;
        let (reader, writer) = stream.into_split();
        Ok(Arc::new(Self {
            base,
            writer: tokio::sync::Mutex::new(Some(writer)),
            reader: parking_lot::Mutex::new(Some(reader)),
        }))
    }
}

impl Transport for UnixStreamTransport {
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn send_frame(&self, frame: Bytes) {
        if frame.len() > self.base.mtu() {
            warn!("{} - MTU보다 큰 프레임 송신 시도 - DROP", self.base);
            return;
        }
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return;
        };
        match writer.write_all(&frame).await {
            Ok(()) => self.base.record_out(frame.len()),
            Err(e) => {
                warn!("{} - 송신 실패: {} - DROP, Face DOWN", self.base, e);
                guard.take();
                drop(guard);
                self.change_state(FaceState::Down);
            }
        }
    }

    async fn run_receive(self: Arc<Self>, sink: Arc<dyn LinkService>) {
        let mut stop_rx = self.base.shutdown().subscribe();
        let reader = self.reader.lock().take();
        let Some(mut reader) = reader else {
            return;
        };
        match run_stream_receive(&mut reader, &self.base, sink.as_ref(), &mut stop_rx).await {
            StreamEnd::Stopped => return,
            StreamEnd::Closed => info!("{} - 원격에서 연결 종료", self.base),
            StreamEnd::Failed(e) => warn!("{} - 수신 실패: {} - Face DOWN", self.base, e),
        }
        self.change_state(FaceState::Down);
    }

    fn close(&self) {
        if let Ok(mut guard) = self.writer.try_lock() {
            guard.take();
        }
        self.reader.lock().take();
        debug!("{} - Unix 소켓 종료", self.base);
    }

    fn set_persistency(&self, persistency: Persistency) -> bool {
        persistency == Persistency::Persistent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::UriKind;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_accepted_uris() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nfd.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let _client = UnixStream::connect(&path).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let t = UnixStreamTransport::accepted(stream, &path).unwrap();

        assert_eq!(t.base().remote_uri().kind(), UriKind::Fd);
        assert_eq!(t.base().local_uri().kind(), UriKind::Unix);
        assert_eq!(t.base().scope(), Scope::Local);
        assert!(t.set_persistency(Persistency::Persistent));
        assert!(!t.set_persistency(Persistency::OnDemand));
    }
}
