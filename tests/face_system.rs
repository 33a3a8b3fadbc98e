use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::Receiver;
use tokio::io::AsyncWriteExt;

use ndnd::face::listener::{TcpListener, UdpListener};
use ndnd::face::{FaceEventKind, FaceState, LinkService, NullLinkService, Persistency};
use ndnd::pending::make_pit_token;
use ndnd::{Config, Data, FaceSystem, FaceUri, Interest, Name, NetPacket, PendingPacket};

fn name(s: &str) -> Name {
    s.parse().unwrap()
}

/// 포워딩 큐에서 패킷이 나올 때까지 대기
async fn recv_within(rx: &Receiver<PendingPacket>) -> PendingPacket {
    for _ in 0..200 {
        if let Ok(pkt) = rx.try_recv() {
            return pkt;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("포워딩 큐에 패킷이 오지 않음");
}

async fn wait_for_faces(system: &FaceSystem, n: usize) {
    for _ in 0..200 {
        if system.table().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("face {}개가 생성되지 않음", n);
}

#[tokio::test]
async fn test_internal_face_round_trip() {
    let (system, queues) = FaceSystem::new(Config::testing());
    let (face_id, mut handle) = system.register_internal().unwrap();

    let interest = Interest::new(name("/a/b")).encode();
    let token = Bytes::from_static(&[1, 2, 3, 4]);
    handle
        .send_packet(interest, Some(token.clone()), None)
        .await
        .unwrap();

    let thread = system.dispatcher().thread_for_name(&name("/a/b"));
    let pkt = recv_within(&queues[thread].interests).await;
    assert_eq!(pkt.packet.name(), &name("/a/b"));
    assert_eq!(pkt.incoming_face_id, Some(face_id));
    assert_eq!(pkt.pit_token, Some(token));

    let face = system.table().get(face_id).unwrap();
    assert_eq!(face.counters().n_in_interests, 1);

    // 포워더 -> 구성 요소
    let data = NetPacket::Data(Data::new(name("/a/b"), &b"hello"[..]));
    let reply = make_pit_token(0, 7);
    let mut out = PendingPacket::from_packet(data).with_pit_token(reply.clone());
    out.incoming_face_id = Some(99);
    face.send_packet(out);

    let received = tokio::time::timeout(Duration::from_secs(2), handle.recv_packet())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.pit_token, Some(reply));
    assert_eq!(received.incoming_face_id, Some(99));
    let decoded = NetPacket::decode(&received.wire).unwrap();
    assert!(!decoded.is_interest());
    assert_eq!(decoded.name(), &name("/a/b"));
    assert_eq!(face.counters().n_out_data, 1);

    system.close_all();
}

#[tokio::test]
async fn test_face_ids_are_not_reused() {
    let (system, _queues) = FaceSystem::new(Config::testing());
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(system.add_face(NullLinkService::new().unwrap()).unwrap());
    }
    assert_eq!(ids, vec![1, 2, 3]);

    system.table().remove(2);
    assert!(system.table().get(2).is_none());
    let next = system.add_face(NullLinkService::new().unwrap()).unwrap();
    assert_eq!(next, 4);
    assert_eq!(system.table().len(), 3);
}

#[tokio::test]
async fn test_change_state_is_idempotent() {
    let (system, _queues) = FaceSystem::new(Config::testing());
    let face = NullLinkService::new().unwrap();
    let id = system.add_face(face.clone()).unwrap();

    face.change_state(FaceState::Down);
    face.change_state(FaceState::Down);
    assert_eq!(face.state(), FaceState::Down);
    assert!(system.table().get(id).is_none());

    let events = system.events();
    assert_eq!(events.last_id(), Some(3));
    assert_eq!(events.get(1).unwrap().kind, FaceEventKind::Created);
    assert_eq!(events.get(2).unwrap().kind, FaceEventKind::Down);
    assert_eq!(events.get(3).unwrap().kind, FaceEventKind::Destroyed);

    face.transport_base().shutdown().join_all().await;
}

#[tokio::test]
async fn test_down_face_stays_down() {
    let (system, _queues) = FaceSystem::new(Config::testing());
    let face = NullLinkService::new().unwrap();
    system.add_face(face.clone()).unwrap();

    face.change_state(FaceState::Down);
    assert!(face.transport_base().shutdown().is_stopped());
    face.change_state(FaceState::Up);
    assert_eq!(face.state(), FaceState::Down);

    // Created, Down, Destroyed 뿐, Up 이벤트 없음
    let events = system.events();
    assert_eq!(events.last_id(), Some(3));
    assert!((1..=3).all(|id| events.get(id).unwrap().kind != FaceEventKind::Up));

    // Up 이외로의 전환은 그대로 적용된다
    face.change_state(FaceState::AdminDown);
    assert_eq!(face.state(), FaceState::AdminDown);
    assert_eq!(events.last_id(), Some(3));

    face.transport_base().shutdown().join_all().await;
}

#[tokio::test]
async fn test_udp_fragmented_data_reassembled() {
    let (server, server_queues) = FaceSystem::new(Config::testing());
    let listener = UdpListener::bind(server.clone(), "127.0.0.1:0".parse().unwrap()).unwrap();
    listener.start();

    let (client, _client_queues) = FaceSystem::new(Config::testing());
    let remote = FaceUri::udp(listener.local_addr());
    let face_id = client
        .create_face(remote, Persistency::Persistent, None)
        .await
        .unwrap();
    let face = client.table().get(face_id).unwrap();
    face.set_mtu(1400);

    let token = make_pit_token(1, 42);
    let data = NetPacket::Data(Data::new(name("/big/data"), vec![0x5A; 5000]));
    face.send_packet(PendingPacket::from_packet(data).with_pit_token(token.clone()));

    let pkt = recv_within(&server_queues[1].data).await;
    assert_eq!(pkt.packet.name(), &name("/big/data"));
    assert_eq!(pkt.pit_token, Some(token));
    match &pkt.packet {
        NetPacket::Data(d) => assert_eq!(d.content.len(), 5000),
        NetPacket::Interest(_) => panic!("Data가 와야 함"),
    }
    assert_eq!(server.table().len(), 1);

    listener.stop().await;
    client.close_all();
    server.close_all();
}

#[tokio::test]
async fn test_tcp_stream_split_frames() {
    let (server, queues) = FaceSystem::new(Config::testing());
    let listener = TcpListener::bind(server.clone(), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    listener.start();

    let mut client = tokio::net::TcpStream::connect(listener.local_addr())
        .await
        .unwrap();
    wait_for_faces(&server, 1).await;

    // 프레임 두 개를 경계와 무관하게 쪼개 보낸다
    let mut wire = Interest::new(name("/x/1")).encode().to_vec();
    wire.extend_from_slice(&Interest::new(name("/x/1")).encode());
    let (a, b) = wire.split_at(3);
    client.write_all(a).await.unwrap();
    client.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.write_all(b).await.unwrap();

    let thread = server.dispatcher().thread_for_name(&name("/x/1"));
    recv_within(&queues[thread].interests).await;
    recv_within(&queues[thread].interests).await;

    let face = server.table().get_all().pop().unwrap();
    assert_eq!(face.counters().n_in_interests, 2);

    listener.stop().await;
    server.close_all();
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket_face() {
    use ndnd::face::listener::UnixListener;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ndnd.sock");

    let (server, queues) = FaceSystem::new(Config::testing());
    let listener = UnixListener::bind(server.clone(), &path).unwrap();
    listener.start();

    let mut client = tokio::net::UnixStream::connect(&path).await.unwrap();
    wait_for_faces(&server, 1).await;
    let face = server.table().get_all().pop().unwrap();
    assert_eq!(face.local_uri(), &FaceUri::unix(&path));
    assert_eq!(face.persistency(), Persistency::Persistent);

    client
        .write_all(&Interest::new(name("/localhost/nfd")).encode())
        .await
        .unwrap();
    let pkt = recv_within(&queues[0].interests).await;
    assert_eq!(pkt.packet.name(), &name("/localhost/nfd"));

    // 원격이 끊으면 face가 사라진다
    drop(client);
    for _ in 0..200 {
        if server.table().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(server.table().is_empty());

    listener.stop().await;
}
