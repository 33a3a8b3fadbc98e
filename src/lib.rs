//! # ndnd
//!
//! NDN 포워더의 face 계층
//!
//! ## 구성
//! - **Transport**: UDP/TCP/Unix/WebSocket/멀티캐스트/내부/null 위에서 프레임 송수신
//! - **NDNLPv2 링크 서비스**: 단편화/재조립, PIT 토큰, 혼잡 표시, 로컬 필드
//! - **Face 테이블**: FaceID 부여, 상태 변경 시 이벤트 기록
//! - **분배**: 이름 해시와 PIT 토큰으로 포워딩 스레드 선택

pub mod config;
pub mod dispatch;
pub mod error;
pub mod face;
pub mod lp;
pub mod name;
pub mod packet;
pub mod pending;
pub mod tlv;
pub mod uri;

pub use config::Config;
pub use dispatch::{Dispatcher, FwQueues};
pub use error::{Error, Result};
pub use face::{FaceSystem, LinkService};
pub use name::Name;
pub use packet::{Data, Interest, NetPacket};
pub use pending::PendingPacket;
pub use uri::FaceUri;
