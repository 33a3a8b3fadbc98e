//! Face 계층 컨텍스트
//!
//! 설정, 분배기, 이벤트, face 테이블을 한데 묶는다. 전역 상태 대신 이 값을 복제해 넘긴다.

use std::sync::Arc;

use tracing::{debug, info};

use super::events::FaceEvents;
use super::internal::{InternalHandle, InternalTransport};
use super::link_service::{LinkService, NdnlpLinkServiceOptions};
use super::multicast::MulticastUdpTransport;
use super::ndnlp::NdnlpLinkService;
use super::null::NullLinkService;
use super::state::{FaceState, Persistency};
use super::table::FaceTable;
use super::tcp::UnicastTcpTransport;
use super::transport::Transport;
use super::udp::UnicastUdpTransport;
use crate::dispatch::{Dispatcher, FwQueues};
use crate::uri::{FaceUri, UriKind};
use crate::{Config, Error, Result};

#[derive(Clone)]
pub struct FaceSystem {
    config: Arc<Config>,
    dispatcher: Arc<Dispatcher>,
    events: Arc<FaceEvents>,
    table: Arc<FaceTable>,
}

impl FaceSystem {
    /// 포워딩 스레드 큐와 함께 생성
    pub fn new(config: Config) -> (Self, Vec<FwQueues>) {
        let (dispatcher, queues) = Dispatcher::new(config.num_fw_threads, config.fw_queue_size);
        let events = Arc::new(FaceEvents::new(config.face_event_capacity));
        let table = FaceTable::new(Arc::clone(&dispatcher), Arc::clone(&events));
        let system = Self {
            config: Arc::new(config),
            dispatcher,
            events,
            table,
        };
        (system, queues)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn events(&self) -> &Arc<FaceEvents> {
        &self.events
    }

    pub fn table(&self) -> &Arc<FaceTable> {
        &self.table
    }

    /// 설정 기반 기본 NDNLPv2 옵션
    pub fn default_options(&self) -> NdnlpLinkServiceOptions {
        NdnlpLinkServiceOptions::from_config(&self.config)
    }

    /// 테이블에 추가하고 시작
    pub fn add_face(&self, face: Arc<dyn LinkService>) -> Result<u64> {
        let face_id = self.table.add(Arc::clone(&face))?;
        face.start();
        Ok(face_id)
    }

    /// transport를 NDNLPv2 링크 서비스로 감싸 추가
    pub fn attach<T: Transport>(
        &self,
        transport: Arc<T>,
        options: NdnlpLinkServiceOptions,
    ) -> Result<Arc<NdnlpLinkService<T>>> {
        let face = self.wrap(transport, options);
        self.add_face(face.clone())?;
        Ok(face)
    }

    fn wrap<T: Transport>(
        &self,
        transport: Arc<T>,
        options: NdnlpLinkServiceOptions,
    ) -> Arc<NdnlpLinkService<T>> {
        NdnlpLinkService::new(
            transport,
            options,
            Arc::clone(&self.dispatcher),
            &self.config,
        )
    }

    /// 원격 URI로 face 생성
    ///
    /// 같은 원격 URI의 face가 이미 있으면 그 ID를 돌려준다. 동시에 같은 URI로 생성하면
    /// 하나만 테이블에 들어가고 나머지는 닫힌다.
    pub async fn create_face(
        &self,
        remote_uri: FaceUri,
        persistency: Persistency,
        options: Option<NdnlpLinkServiceOptions>,
    ) -> Result<u64> {
        if !remote_uri.is_canonical() {
            return Err(Error::NonCanonicalUri(remote_uri.to_string()));
        }
        if let Some(existing) = self.table.get_by_uri(&remote_uri) {
            return Ok(existing.face_id());
        }
        let options = options.unwrap_or_else(|| self.default_options());

        let face: Arc<dyn LinkService> = match remote_uri.kind() {
            UriKind::Udp => {
                let transport = UnicastUdpTransport::dial(remote_uri, persistency, &self.config)?;
                self.wrap(transport, options)
            }
            UriKind::Tcp => {
                let transport =
                    UnicastTcpTransport::dial(remote_uri, persistency, &self.config).await?;
                self.wrap(transport, options)
            }
            UriKind::Null => NullLinkService::new()?,
            _ => return Err(Error::UnsupportedScheme(remote_uri.scheme().to_string())),
        };

        match self.table.add_unique(Arc::clone(&face)) {
            Ok(face_id) => {
                info!("{} - Face 생성", face);
                face.start();
                Ok(face_id)
            }
            Err(e) => {
                face.change_state(FaceState::AdminDown);
                match e {
                    Error::FaceExists(existing) => {
                        debug!("{} - 같은 URI의 face {} 존재, 새 연결 폐기", face, existing);
                        Ok(existing)
                    }
                    e => Err(e),
                }
            }
        }
    }

    /// Face 종료 (AdminDown)
    pub fn destroy_face(&self, face_id: u64) -> Result<()> {
        let face = self.table.get(face_id).ok_or(Error::FaceNotFound(face_id))?;
        face.change_state(FaceState::AdminDown);
        Ok(())
    }

    /// 로컬 인터페이스 주소에 멀티캐스트 face 생성
    pub fn create_multicast_face(&self, local_uri: FaceUri) -> Result<u64> {
        let transport = MulticastUdpTransport::new(local_uri, &self.config)?;
        let face = self.attach(transport, self.default_options())?;
        Ok(face.face_id())
    }

    /// 내부 구성 요소용 face 생성
    pub fn register_internal(&self) -> Result<(u64, InternalHandle)> {
        let (transport, handle) = InternalTransport::new(self.config.queue_size)?;
        let face = self.attach(transport, InternalTransport::link_options())?;
        Ok((face.face_id(), handle))
    }

    /// 모든 face 종료
    pub fn close_all(&self) {
        self.table.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::events::FaceEventKind;
    use std::net::SocketAddr;

    #[tokio::test]
    async fn test_create_null_face() {
        let (system, _queues) = FaceSystem::new(Config::testing());
        let id = system
            .create_face(FaceUri::null(), Persistency::Permanent, None)
            .await
            .unwrap();
        assert_eq!(id, 1);
        let face = system.table().get(id).unwrap();
        assert_eq!(face.state(), FaceState::Up);
        assert_eq!(system.events().get(1).unwrap().kind, FaceEventKind::Created);

        let again = system
            .create_face(FaceUri::null(), Persistency::Permanent, None)
            .await
            .unwrap();
        assert_eq!(again, id);
    }

    #[tokio::test]
    async fn test_create_rejects_non_canonical() {
        let (system, _queues) = FaceSystem::new(Config::testing());
        let uri = FaceUri::udp("127.0.0.1:0".parse::<SocketAddr>().unwrap());
        assert!(matches!(
            system.create_face(uri, Persistency::Persistent, None).await,
            Err(Error::NonCanonicalUri(_))
        ));
        let uri = FaceUri::internal();
        assert!(matches!(
            system.create_face(uri, Persistency::Persistent, None).await,
            Err(Error::UnsupportedScheme(_))
        ));
    }

    #[tokio::test]
    async fn test_create_udp_face() {
        let (system, _queues) = FaceSystem::new(Config::testing());
        let peer = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let uri = FaceUri::udp(peer.local_addr().unwrap());
        let id = system
            .create_face(uri.clone(), Persistency::Persistent, None)
            .await
            .unwrap();
        let face = system.table().get(id).unwrap();
        assert_eq!(face.remote_uri(), &uri);
        assert!(face.link_options().is_some());
        system.close_all();
        assert!(system.table().is_empty());
    }

    #[tokio::test]
    async fn test_register_internal() {
        let (system, _queues) = FaceSystem::new(Config::testing());
        let (id, _handle) = system.register_internal().unwrap();
        let face = system.table().get(id).unwrap();
        let opts = face.link_options().unwrap();
        assert!(opts.incoming_face_indication);
        assert!(opts.consumer_controlled_forwarding);
    }

    #[tokio::test]
    async fn test_concurrent_create_same_uri() {
        let (system, _queues) = FaceSystem::new(Config::testing());
        let peer = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = FaceUri::tcp(peer.local_addr().unwrap());

        // 둘 다 조회를 통과한 뒤 연결을 기다린다
        let (a, b) = tokio::join!(
            system.create_face(uri.clone(), Persistency::Persistent, None),
            system.create_face(uri.clone(), Persistency::Persistent, None),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a, b);
        assert_eq!(system.table().len(), 1);
        assert_eq!(system.table().get(a).unwrap().remote_uri(), &uri);

        system.close_all();
    }

    #[tokio::test]
    async fn test_destroy_face() {
        let (system, _queues) = FaceSystem::new(Config::testing());
        let id = system
            .create_face(FaceUri::null(), Persistency::Persistent, None)
            .await
            .unwrap();

        system.destroy_face(id).unwrap();
        assert!(system.table().get(id).is_none());
        assert!(matches!(
            system.destroy_face(id),
            Err(Error::FaceNotFound(missing)) if missing == id
        ));
    }
}
