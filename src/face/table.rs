//! Face 테이블
//!
//! FaceID -> 링크 서비스. ID는 단조 증가하며 살아 있는 face와 겹치지 않는다.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{info, warn};

use super::events::{FaceEventKind, FaceEvents};
use super::link_service::LinkService;
use super::state::FaceState;
use crate::dispatch::Dispatcher;
use crate::uri::FaceUri;
use crate::{Error, Result};

struct Inner {
    faces: HashMap<u64, Arc<dyn LinkService>>,
    next_face_id: u64,
}

pub struct FaceTable {
    inner: RwLock<Inner>,
    dispatcher: Arc<Dispatcher>,
    events: Arc<FaceEvents>,
    self_ref: Weak<FaceTable>,
}

impl FaceTable {
    pub fn new(dispatcher: Arc<Dispatcher>, events: Arc<FaceEvents>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            inner: RwLock::new(Inner {
                faces: HashMap::new(),
                next_face_id: 1,
            }),
            dispatcher,
            events,
            self_ref: self_ref.clone(),
        })
    }

    /// Face 추가, 부여된 ID 반환
    ///
    /// 한 face는 한 번만 추가할 수 있다.
    pub fn add(&self, face: Arc<dyn LinkService>) -> Result<u64> {
        self.insert(face, false)
    }

    /// 같은 원격 URI의 face가 없을 때만 추가
    ///
    /// 있으면 `Error::FaceExists(기존 ID)`. 검사와 추가가 한 번의 쓰기 잠금 안에서 일어난다.
    pub fn add_unique(&self, face: Arc<dyn LinkService>) -> Result<u64> {
        self.insert(face, true)
    }

    fn insert(&self, face: Arc<dyn LinkService>, unique: bool) -> Result<u64> {
        let face_id = {
            let mut inner = self.inner.write();
            if unique {
                let remote_uri = face.remote_uri();
                if let Some(existing) = inner.faces.values().find(|f| f.remote_uri() == remote_uri) {
                    return Err(Error::FaceExists(existing.face_id()));
                }
            }
            let mut face_id = inner.next_face_id;
            while face_id == 0 || inner.faces.contains_key(&face_id) {
                face_id = face_id.wrapping_add(1);
            }
            if !face.bind(face_id, self.self_ref.clone()) {
                return Err(Error::AlreadyRegistered(face.face_id()));
            }
            inner.next_face_id = face_id.wrapping_add(1);
            inner.faces.insert(face_id, Arc::clone(&face));
            face_id
        };

        self.dispatcher.add_face(Arc::clone(&face));
        self.events.emit(FaceEventKind::Created, face.as_ref());
        info!("{} - Face 테이블에 추가", face);
        Ok(face_id)
    }

    pub fn get(&self, face_id: u64) -> Option<Arc<dyn LinkService>> {
        self.inner.read().faces.get(&face_id).cloned()
    }

    /// 원격 URI로 조회
    pub fn get_by_uri(&self, remote_uri: &FaceUri) -> Option<Arc<dyn LinkService>> {
        self.inner
            .read()
            .faces
            .values()
            .find(|f| f.remote_uri() == remote_uri)
            .cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<dyn LinkService>> {
        self.inner.read().faces.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Face 제거 (없으면 아무것도 하지 않음)
    pub fn remove(&self, face_id: u64) -> Option<Arc<dyn LinkService>> {
        let face = self.inner.write().faces.remove(&face_id)?;
        self.dispatcher.remove_face(face_id);
        self.events.emit(FaceEventKind::Destroyed, face.as_ref());
        info!("{} - Face 테이블에서 제거됨", face);
        Some(face)
    }

    /// Transport 상태 변화 알림
    pub(crate) fn on_state_change(&self, face_id: u64, new_state: FaceState) {
        let Some(face) = self.get(face_id) else {
            return;
        };
        let kind = match new_state {
            FaceState::Up => FaceEventKind::Up,
            FaceState::Down | FaceState::AdminDown => FaceEventKind::Down,
        };
        self.events.emit(kind, face.as_ref());
    }

    /// 모든 face를 AdminDown으로 닫는다
    pub fn close_all(&self) {
        let faces = self.get_all();
        if !faces.is_empty() {
            warn!("Face {}개 종료", faces.len());
        }
        for face in faces {
            face.change_state(FaceState::AdminDown);
        }
    }
}
