//! 에러 타입 정의

use thiserror::Error;

/// 포워더 face 계층 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("설정 파일 파싱 실패: {0}")]
    Config(String),

    #[error("정규화되지 않은 URI: {0}")]
    NonCanonicalUri(String),

    #[error("지원하지 않는 URI 스킴: {0}")]
    UnsupportedScheme(String),

    #[error("TLV 데이터 부족: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("유효하지 않은 TLV 타입: expected {expected:#x}, got {got:#x}")]
    UnexpectedType { expected: u64, got: u64 },

    #[error("인식할 수 없는 필수(critical) TLV: {typ:#x}")]
    UnrecognizedCritical { typ: u64 },

    #[error("유효하지 않은 NNI 길이: {len}")]
    InvalidNni { len: usize },

    #[error("유효하지 않은 이름 컴포넌트: {0}")]
    InvalidName(String),

    #[error("패킷 크기 초과: {size} > {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("MTU 부족: mtu={mtu}, overhead={overhead}")]
    MtuTooSmall { mtu: usize, overhead: usize },

    #[error("유효하지 않은 PIT 토큰: length={len}")]
    InvalidPitToken { len: usize },

    #[error("유효하지 않은 단편: {0}")]
    InvalidFragment(String),

    #[error("유효하지 않은 포워딩 스레드: {0}")]
    InvalidThread(usize),

    #[error("큐 가득 참")]
    QueueFull,

    #[error("Face 없음: face_id={0}")]
    FaceNotFound(u64),

    #[error("이미 등록된 face: face_id={0}")]
    AlreadyRegistered(u64),

    #[error("같은 원격 URI의 face 존재: face_id={0}")]
    FaceExists(u64),

    #[error("연결 종료")]
    ConnectionClosed,

    #[error("WebSocket 에러: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::UnrecognizedCritical { typ: 0x21 };
        assert!(e.to_string().contains("0x21"));

        let e = Error::MtuTooSmall { mtu: 10, overhead: 20 };
        assert!(e.to_string().contains("mtu=10"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
