//! 포워더 face 설정

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Face 계층 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Face 송신 큐 크기 (패킷 수)
    pub queue_size: usize,

    /// 혼잡 표시 (congestion marking) 기본 활성화 여부
    pub congestion_marking: bool,

    /// UDP 유니캐스트 포트
    pub udp_unicast_port: u16,

    /// UDP 멀티캐스트 포트
    pub udp_multicast_port: u16,

    /// IPv4 멀티캐스트 그룹
    pub udp_multicast_address_ipv4: Ipv4Addr,

    /// IPv6 멀티캐스트 그룹
    pub udp_multicast_address_ipv6: Ipv6Addr,

    /// 온디맨드 UDP face 수명 (초)
    /// 마지막 송수신 이후 이 시간이 지나면 Down
    pub udp_lifetime_secs: u64,

    /// TCP 유니캐스트 포트
    pub tcp_unicast_port: u16,

    /// 온디맨드 TCP face 수명 (초)
    pub tcp_lifetime_secs: u64,

    /// Unix 스트림 소켓 경로
    pub unix_socket_path: PathBuf,

    /// WebSocket 리스너 포트
    pub websocket_port: u16,

    /// 포워딩 스레드 수
    pub num_fw_threads: usize,

    /// 포워딩 스레드 큐 크기
    pub fw_queue_size: usize,

    /// 재조립 그룹 만료 시간 (밀리초)
    pub reassembly_timeout_ms: u64,

    /// face당 동시 재조립 그룹 최대 수
    /// 초과 시 가장 오래된 그룹 제거
    pub reassembly_max_groups: usize,

    /// 온디맨드 face 만료 검사 주기 (초)
    pub expiration_check_secs: u64,

    /// Permanent face 재연결 최대 대기 (밀리초)
    pub redial_max_backoff_ms: u64,

    /// Face 이벤트 링 버퍼 크기
    pub face_event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_size: 1024,
            congestion_marking: true,
            udp_unicast_port: 6363,
            udp_multicast_port: 56363,
            udp_multicast_address_ipv4: Ipv4Addr::new(224, 0, 23, 170),
            udp_multicast_address_ipv6: Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x114),
            udp_lifetime_secs: 600,                  // 10분
            tcp_unicast_port: 6363,
            tcp_lifetime_secs: 600,                  // 10분
            unix_socket_path: PathBuf::from("/run/nfd.sock"),
            websocket_port: 9696,
            num_fw_threads: 8,
            fw_queue_size: 1024,
            reassembly_timeout_ms: 500,
            reassembly_max_groups: 256,
            expiration_check_secs: 10,
            redial_max_backoff_ms: 60_000,           // 1분
            face_event_capacity: 100,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// TOML 파일에서 설정 로드
    ///
    /// 파일에 없는 항목은 기본값을 사용한다.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정 파싱
    pub fn parse(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn udp_lifetime(&self) -> Duration {
        Duration::from_secs(self.udp_lifetime_secs)
    }

    pub fn tcp_lifetime(&self) -> Duration {
        Duration::from_secs(self.tcp_lifetime_secs)
    }

    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }

    pub fn expiration_check_interval(&self) -> Duration {
        Duration::from_secs(self.expiration_check_secs)
    }

    pub fn redial_max_backoff(&self) -> Duration {
        Duration::from_millis(self.redial_max_backoff_ms)
    }

    /// 테스트용 설정
    ///
    /// 스레드 수와 큐를 줄이고 만료 검사를 짧게 잡는다.
    pub fn testing() -> Self {
        Self {
            queue_size: 64,
            num_fw_threads: 4,
            fw_queue_size: 64,
            udp_unicast_port: 0,                     // 임의 포트
            tcp_unicast_port: 0,
            websocket_port: 0,
            reassembly_timeout_ms: 200,
            reassembly_max_groups: 16,
            expiration_check_secs: 1,
            redial_max_backoff_ms: 1000,
            ..Self::default()
        }
    }

    /// 저사양 기기용 설정
    pub fn low_spec() -> Self {
        Self {
            queue_size: 256,
            num_fw_threads: 2,
            fw_queue_size: 256,
            reassembly_max_groups: 64,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.queue_size, 1024);
        assert_eq!(config.udp_unicast_port, 6363);
        assert_eq!(config.udp_multicast_port, 56363);
        assert_eq!(config.udp_lifetime(), Duration::from_secs(600));
        assert_eq!(config.unix_socket_path, PathBuf::from("/run/nfd.sock"));
        assert_eq!(config.udp_multicast_address_ipv6.to_string(), "ff02::114");
    }

    #[test]
    fn test_low_spec_keeps_ports() {
        let config = Config::low_spec();
        assert_eq!(config.num_fw_threads, 2);
        assert!(config.queue_size < Config::default().queue_size);
        assert_eq!(config.tcp_unicast_port, 6363);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = Config::parse(
            r#"
            queue_size = 32
            num_fw_threads = 2
            unix_socket_path = "/tmp/ndnd.sock"
            "#,
        )
        .unwrap();

        assert_eq!(config.queue_size, 32);
        assert_eq!(config.num_fw_threads, 2);
        assert_eq!(config.unix_socket_path, PathBuf::from("/tmp/ndnd.sock"));
        // 나머지는 기본값
        assert_eq!(config.tcp_unicast_port, 6363);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = Config::parse("queue_size = \"many\"").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ndnd.toml");
        std::fs::write(&path, "websocket_port = 9000\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.websocket_port, 9000);
    }
}
