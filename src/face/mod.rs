//! Face 계층
//!
//! transport가 매체 위에서 프레임을 주고받고, 링크 서비스가 NDNLPv2로 패킷과 프레임을 변환한다.
//! face 하나 = 링크 서비스 + transport.

pub mod events;
pub mod internal;
pub mod link_service;
pub mod listener;
pub mod multicast;
pub mod ndnlp;
pub mod null;
pub mod reassembly;
pub mod shutdown;
pub mod state;
pub mod stream;
pub mod system;
pub mod table;
pub mod tcp;
pub mod transport;
pub mod udp;
#[cfg(unix)]
pub mod unix;
pub mod websocket;

pub use events::{FaceEvent, FaceEventKind, FaceEvents};
pub use internal::{InternalHandle, InternalPacket, InternalTransport};
pub use link_service::{FaceCounters, LinkService, LinkServiceState, NdnlpLinkServiceOptions};
pub use ndnlp::NdnlpLinkService;
pub use null::NullLinkService;
pub use shutdown::ShutdownToken;
pub use state::{FaceState, LinkType, Persistency, Scope};
pub use system::FaceSystem;
pub use table::FaceTable;
pub use transport::{Transport, TransportBase};
