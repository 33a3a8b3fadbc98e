//! 포워딩 스레드 분배
//!
//! - Interest: 이름 해시로 스레드 하나
//! - Data: PIT 토큰의 스레드 인덱스, 없으면 로컬 face는 모든 접두사 해시, 그 외 이름 해시
//! - `/localhost` 이름은 항상 스레드 0
//!
//! 스레드 큐는 bounded 채널이다. 가득 차면 버리고 기록한다 (블록하지 않음).

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use dashmap::DashMap;
use tracing::{error, trace, warn};

use crate::face::{LinkService, Scope};
use crate::name::Name;
use crate::packet::NetPacket;
use crate::pending::{pit_token_thread, PendingPacket};
use crate::{Error, Result};

/// 포워딩 스레드 하나가 소비하는 큐
pub struct FwQueues {
    pub thread: usize,
    pub interests: Receiver<PendingPacket>,
    pub data: Receiver<PendingPacket>,
}

struct ThreadSender {
    interests: Sender<PendingPacket>,
    data: Sender<PendingPacket>,
}

/// Face 등록부 + 스레드 큐
pub struct Dispatcher {
    threads: Vec<ThreadSender>,
    faces: DashMap<u64, Arc<dyn LinkService>>,
}

impl Dispatcher {
    /// 스레드 수만큼 큐 생성
    pub fn new(num_threads: usize, queue_size: usize) -> (Arc<Self>, Vec<FwQueues>) {
        let num_threads = num_threads.max(1);
        let mut threads = Vec::with_capacity(num_threads);
        let mut queues = Vec::with_capacity(num_threads);
        for thread in 0..num_threads {
            let (itx, irx) = bounded(queue_size);
            let (dtx, drx) = bounded(queue_size);
            threads.push(ThreadSender {
                interests: itx,
                data: dtx,
            });
            queues.push(FwQueues {
                thread,
                interests: irx,
                data: drx,
            });
        }
        let dispatcher = Arc::new(Self {
            threads,
            faces: DashMap::new(),
        });
        (dispatcher, queues)
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    // -- Face 등록부 --

    pub fn add_face(&self, face: Arc<dyn LinkService>) {
        self.faces.insert(face.face_id(), face);
    }

    pub fn remove_face(&self, face_id: u64) {
        self.faces.remove(&face_id);
    }

    /// 포워딩 스레드가 송신 face를 찾을 때
    pub fn get_face(&self, face_id: u64) -> Option<Arc<dyn LinkService>> {
        self.faces.get(&face_id).map(|f| Arc::clone(f.value()))
    }

    // -- 스레드 선택 --

    /// 이름 전체 해시로 스레드 선택
    pub fn thread_for_name(&self, name: &Name) -> usize {
        if name.is_localhost() {
            return 0;
        }
        (name.hash_value() % self.threads.len() as u64) as usize
    }

    /// 이름의 모든 (비어 있지 않은) 접두사에 해당하는 스레드 집합
    pub fn threads_for_prefixes(&self, name: &Name) -> Vec<usize> {
        if name.is_localhost() {
            return vec![0];
        }
        let n = self.threads.len() as u64;
        let mut threads: Vec<usize> = name
            .prefix_hashes()
            .into_iter()
            .skip(1)
            .map(|h| (h % n) as usize)
            .collect();
        threads.sort_unstable();
        threads.dedup();
        threads
    }

    // -- 분배 --

    /// 수신 face 범위에 따라 Interest/Data 분배
    pub fn dispatch(&self, pkt: PendingPacket, scope: Scope) {
        match pkt.packet {
            NetPacket::Interest(_) => self.dispatch_interest(pkt),
            NetPacket::Data(_) => self.dispatch_data(pkt, scope),
        }
    }

    pub fn dispatch_interest(&self, pkt: PendingPacket) {
        let thread = self.thread_for_name(pkt.packet.name());
        trace!("Interest {} -> 스레드 {}", pkt.packet.name(), thread);
        if let Err(e) = self.queue_interest(thread, pkt) {
            warn!("Interest 분배 실패 (스레드 {}): {} - DROP", thread, e);
        }
    }

    pub fn dispatch_data(&self, pkt: PendingPacket, scope: Scope) {
        if let Some(token) = pkt.pit_token.as_ref().filter(|t| !t.is_empty()) {
            let thread = match pit_token_thread(token) {
                Some(t) if (t as usize) < self.threads.len() => t as usize,
                Some(t) => {
                    error!("PIT 토큰의 스레드 인덱스 {} 범위 초과 - DROP", t);
                    return;
                }
                None => {
                    error!("{} - DROP", Error::InvalidPitToken { len: token.len() });
                    return;
                }
            };
            if let Err(e) = self.queue_data(thread, pkt) {
                warn!("Data 분배 실패 (스레드 {}): {} - DROP", thread, e);
            }
            return;
        }

        if scope == Scope::Local {
            // PIT 토큰 없는 생산자 Data: 모든 접두사 스레드
            for thread in self.threads_for_prefixes(pkt.packet.name()) {
                if let Err(e) = self.queue_data(thread, pkt.clone()) {
                    warn!("Data 분배 실패 (스레드 {}): {} - DROP", thread, e);
                }
            }
            return;
        }

        let thread = self.thread_for_name(pkt.packet.name());
        if let Err(e) = self.queue_data(thread, pkt) {
            warn!("Data 분배 실패 (스레드 {}): {} - DROP", thread, e);
        }
    }

    pub fn queue_interest(&self, thread: usize, pkt: PendingPacket) -> Result<()> {
        let sender = self
            .threads
            .get(thread)
            .ok_or(Error::InvalidThread(thread))?;
        Self::try_queue(&sender.interests, pkt)
    }

    pub fn queue_data(&self, thread: usize, pkt: PendingPacket) -> Result<()> {
        let sender = self
            .threads
            .get(thread)
            .ok_or(Error::InvalidThread(thread))?;
        Self::try_queue(&sender.data, pkt)
    }

    fn try_queue(tx: &Sender<PendingPacket>, pkt: PendingPacket) -> Result<()> {
        match tx.try_send(pkt) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(Error::ConnectionClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Data, Interest};
    use crate::pending::make_pit_token;

    fn interest(name: &str) -> PendingPacket {
        PendingPacket::from_packet(NetPacket::Interest(Interest::new(name.parse().unwrap())))
    }

    fn data(name: &str) -> PendingPacket {
        PendingPacket::from_packet(NetPacket::Data(Data::new(name.parse().unwrap(), &b"x"[..])))
    }

    fn drain(queues: &[FwQueues]) -> (Vec<usize>, Vec<usize>) {
        let mut interests = Vec::new();
        let mut datas = Vec::new();
        for q in queues {
            while q.interests.try_recv().is_ok() {
                interests.push(q.thread);
            }
            while q.data.try_recv().is_ok() {
                datas.push(q.thread);
            }
        }
        (interests, datas)
    }

    #[test]
    fn test_interest_dispatch_deterministic() {
        let (dispatcher, queues) = Dispatcher::new(8, 16);
        let name: Name = "/a/b".parse().unwrap();
        let expected = dispatcher.thread_for_name(&name);

        dispatcher.dispatch(interest("/a/b"), Scope::NonLocal);
        dispatcher.dispatch(interest("/a/b"), Scope::NonLocal);
        let (interests, _) = drain(&queues);
        assert_eq!(interests, vec![expected, expected]);
    }

    #[test]
    fn test_localhost_goes_to_thread_zero() {
        let (dispatcher, queues) = Dispatcher::new(8, 16);
        dispatcher.dispatch(interest("/localhost/nfd/faces/list"), Scope::Local);
        dispatcher.dispatch(data("/localhost/nfd/status"), Scope::Local);
        let (interests, datas) = drain(&queues);
        assert_eq!(interests, vec![0]);
        assert_eq!(datas, vec![0]);
    }

    #[test]
    fn test_data_with_pit_token() {
        let (dispatcher, queues) = Dispatcher::new(4, 16);
        for _ in 0..3 {
            let pkt = data("/x/y").with_pit_token(make_pit_token(2, 77));
            dispatcher.dispatch(pkt, Scope::NonLocal);
        }
        let (_, datas) = drain(&queues);
        assert_eq!(datas, vec![2, 2, 2]);
    }

    #[test]
    fn test_data_with_invalid_pit_token_dropped() {
        let (dispatcher, queues) = Dispatcher::new(4, 16);
        // 길이 오류
        dispatcher.dispatch(
            data("/x").with_pit_token(bytes::Bytes::from_static(&[0, 1, 2])),
            Scope::NonLocal,
        );
        // 스레드 인덱스 범위 초과
        dispatcher.dispatch(
            data("/x").with_pit_token(make_pit_token(9, 1)),
            Scope::NonLocal,
        );
        let (_, datas) = drain(&queues);
        assert!(datas.is_empty());
    }

    #[test]
    fn test_local_data_without_token_goes_to_prefix_threads() {
        let (dispatcher, queues) = Dispatcher::new(8, 16);
        let name: Name = "/a/b/c".parse().unwrap();
        let expected = dispatcher.threads_for_prefixes(&name);
        assert!(!expected.is_empty());

        dispatcher.dispatch(data("/a/b/c"), Scope::Local);
        let (_, mut datas) = drain(&queues);
        datas.sort_unstable();
        assert_eq!(datas, expected);

        // 비로컬 face는 이름 해시 하나
        dispatcher.dispatch(data("/a/b/c"), Scope::NonLocal);
        let (_, datas) = drain(&queues);
        assert_eq!(datas, vec![dispatcher.thread_for_name(&name)]);
    }

    #[test]
    fn test_full_queue_drops() {
        let (dispatcher, queues) = Dispatcher::new(1, 2);
        for _ in 0..5 {
            dispatcher.dispatch(interest("/q"), Scope::NonLocal);
        }
        let (interests, _) = drain(&queues);
        assert_eq!(interests.len(), 2);
    }
}
