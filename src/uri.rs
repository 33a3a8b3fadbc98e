//! Face URI
//!
//! 주소 하나당 정규(canonical) 문자열이 정확히 하나 존재한다.
//! - `udp4://1.2.3.4:6363`, `udp6://[::1]:6363`
//! - `tcp4://…`, `tcp6://…`
//! - `unix:///run/nfd.sock`, `fd://3`, `dev://eth0`, `ether://[aa:bb:cc:dd:ee:ff]`
//! - `ws://host:port`, `wss://host:port`
//! - `null://`, `internal://`
//!
//! 정규화되지 않은 URI로는 transport를 만들 수 없다.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6, ToSocketAddrs};
use std::path::Path;
use std::str::FromStr;

use crate::face::Scope;
use crate::{Error, Result};

/// URI 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UriKind {
    Unknown,
    Dev,
    Ethernet,
    Fd,
    Internal,
    Null,
    Udp,
    Tcp,
    Unix,
    WebSocket,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FaceUri {
    kind: UriKind,
    scheme: String,
    path: String,
    port: u16,
    canonical: bool,
}

impl FaceUri {
    fn raw(kind: UriKind, scheme: &str, path: impl Into<String>, port: u16) -> Self {
        Self {
            kind,
            scheme: scheme.to_string(),
            path: path.into(),
            port,
            canonical: false,
        }
    }

    fn canonized(mut self) -> Self {
        // 실패하면 canonical=false로 남는다
        let _ = self.canonize();
        self
    }

    pub fn udp(addr: SocketAddr) -> Self {
        Self::raw(UriKind::Udp, "udp", host_with_zone(&addr), addr.port()).canonized()
    }

    pub fn tcp(addr: SocketAddr) -> Self {
        Self::raw(UriKind::Tcp, "tcp", host_with_zone(&addr), addr.port()).canonized()
    }

    pub fn websocket(addr: SocketAddr, tls: bool) -> Self {
        let scheme = if tls { "wss" } else { "ws" };
        Self::raw(UriKind::WebSocket, scheme, host_with_zone(&addr), addr.port()).canonized()
    }

    pub fn unix(path: impl AsRef<Path>) -> Self {
        Self::raw(UriKind::Unix, "unix", path.as_ref().to_string_lossy(), 0).canonized()
    }

    pub fn dev(ifname: &str) -> Self {
        Self::raw(UriKind::Dev, "dev", ifname, 0).canonized()
    }

    pub fn ethernet(mac: [u8; 6]) -> Self {
        let path = mac
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":");
        Self::raw(UriKind::Ethernet, "ether", path, 0).canonized()
    }

    pub fn fd(fd: i32) -> Self {
        Self::raw(UriKind::Fd, "fd", fd.to_string(), 0).canonized()
    }

    pub fn null() -> Self {
        Self::raw(UriKind::Null, "null", "", 0).canonized()
    }

    pub fn internal() -> Self {
        Self::raw(UriKind::Internal, "internal", "", 0).canonized()
    }

    /// 문자열 디코딩
    ///
    /// 결과가 정규화되지 않았을 수 있다 (`is_canonical()` 확인).
    pub fn decode(s: &str) -> Self {
        let Some((scheme, rest)) = s.split_once("://") else {
            return Self::raw(UriKind::Unknown, "unknown", "", 0);
        };
        let scheme = scheme.to_ascii_lowercase();
        let uri = match scheme.as_str() {
            "udp" | "udp4" | "udp6" => Self::decode_host_port(UriKind::Udp, &scheme, rest),
            "tcp" | "tcp4" | "tcp6" => Self::decode_host_port(UriKind::Tcp, &scheme, rest),
            "ws" | "wss" => Self::decode_host_port(UriKind::WebSocket, &scheme, rest),
            "unix" => Self::raw(UriKind::Unix, "unix", rest, 0),
            "dev" => Self::raw(UriKind::Dev, "dev", rest, 0),
            "fd" => Self::raw(UriKind::Fd, "fd", rest, 0),
            "ether" => Self::raw(
                UriKind::Ethernet,
                "ether",
                rest.trim_start_matches('[').trim_end_matches(']'),
                0,
            ),
            "null" if rest.is_empty() => Self::raw(UriKind::Null, "null", "", 0),
            "internal" if rest.is_empty() => Self::raw(UriKind::Internal, "internal", "", 0),
            _ => Self::raw(UriKind::Unknown, "unknown", "", 0),
        };
        uri.canonized()
    }

    /// 정규 URI만 허용하는 파싱
    pub fn parse(s: &str) -> Result<Self> {
        let uri = Self::decode(s);
        match (uri.kind, uri.canonical) {
            (UriKind::Unknown, _) => Err(Error::UnsupportedScheme(s.to_string())),
            (_, false) => Err(Error::NonCanonicalUri(s.to_string())),
            _ => Ok(uri),
        }
    }

    fn decode_host_port(kind: UriKind, scheme: &str, rest: &str) -> Self {
        let Some((host, port)) = rest.rsplit_once(':') else {
            return Self::raw(kind, scheme, rest, 0);
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = port.parse::<u16>().unwrap_or(0);
        Self::raw(kind, scheme, host, port)
    }

    /// 정규화
    ///
    /// 호스트 이름은 IP로 해석하고 스킴에 IP 버전을 붙인다.
    pub fn canonize(&mut self) -> Result<()> {
        self.canonical = false;
        match self.kind {
            UriKind::Udp | UriKind::Tcp => {
                let base = if self.kind == UriKind::Udp { "udp" } else { "tcp" };
                let want_v4 = self.scheme.ends_with('4');
                let want_v6 = self.scheme.ends_with('6');
                let (ip, zone) = self.resolve_host(want_v4, want_v6)?;
                if self.port == 0 {
                    return Err(Error::NonCanonicalUri(self.to_string()));
                }
                self.scheme = match ip {
                    IpAddr::V4(_) => format!("{base}4"),
                    IpAddr::V6(_) => format!("{base}6"),
                };
                self.path = ip.to_string() + &zone;
            }
            UriKind::WebSocket => {
                let (ip, zone) = self.resolve_host(false, false)?;
                if self.port == 0 {
                    return Err(Error::NonCanonicalUri(self.to_string()));
                }
                self.path = ip.to_string() + &zone;
            }
            UriKind::Unix => {
                if self.path.is_empty() || self.port != 0 {
                    return Err(Error::NonCanonicalUri(self.to_string()));
                }
                match std::fs::metadata(&self.path) {
                    Ok(meta) if meta.is_dir() => {
                        return Err(Error::NonCanonicalUri(self.to_string()))
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(_) => return Err(Error::NonCanonicalUri(self.to_string())),
                }
            }
            UriKind::Dev => {
                let valid = !self.path.is_empty()
                    && self
                        .path
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.');
                if !valid {
                    return Err(Error::NonCanonicalUri(self.to_string()));
                }
            }
            UriKind::Ethernet => {
                let mac = parse_mac(&self.path)
                    .ok_or_else(|| Error::NonCanonicalUri(self.to_string()))?;
                self.path = mac
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<Vec<_>>()
                    .join(":");
            }
            UriKind::Fd => {
                if self.path.parse::<u32>().is_err() {
                    return Err(Error::NonCanonicalUri(self.to_string()));
                }
            }
            UriKind::Null | UriKind::Internal => {}
            UriKind::Unknown => return Err(Error::UnsupportedScheme(self.scheme.clone())),
        }
        self.canonical = true;
        Ok(())
    }

    fn resolve_host(&self, want_v4: bool, want_v6: bool) -> Result<(IpAddr, String)> {
        let (host, zone) = match self.path.split_once('%') {
            // 존은 숫자 인덱스이거나 존재하는 인터페이스 이름이어야 한다
            Some((h, z)) => {
                if zone_index(z).is_none() {
                    return Err(Error::NonCanonicalUri(self.to_string()));
                }
                (h, format!("%{z}"))
            }
            None => (self.path.as_str(), String::new()),
        };
        let matches = |ip: &IpAddr| (!want_v4 || ip.is_ipv4()) && (!want_v6 || ip.is_ipv6());

        if let Ok(ip) = host.parse::<IpAddr>() {
            let ip = match ip {
                IpAddr::V6(v6) if want_v4 => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
                _ => ip,
            };
            if !matches(&ip) {
                return Err(Error::NonCanonicalUri(self.to_string()));
            }
            return Ok((ip, zone));
        }

        // 호스트 이름 해석
        let resolved = (host, self.port)
            .to_socket_addrs()
            .map_err(|_| Error::NonCanonicalUri(self.to_string()))?
            .map(|addr| addr.ip())
            .find(matches)
            .ok_or_else(|| Error::NonCanonicalUri(self.to_string()))?;
        Ok((resolved, zone))
    }

    pub fn kind(&self) -> UriKind {
        self.kind
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// 경로에서 존(zone) 부분을 뺀 호스트
    pub fn path_host(&self) -> &str {
        self.path.split('%').next().unwrap_or("")
    }

    pub fn path_zone(&self) -> Option<&str> {
        self.path.split_once('%').map(|(_, z)| z)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_canonical(&self) -> bool {
        self.canonical
    }

    /// IP 기반 URI의 소켓 주소
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        if !matches!(self.kind, UriKind::Udp | UriKind::Tcp | UriKind::WebSocket) {
            return None;
        }
        let ip: IpAddr = self.path_host().parse().ok()?;
        match ip {
            IpAddr::V4(_) => Some(SocketAddr::new(ip, self.port)),
            IpAddr::V6(v6) => {
                let scope_id = match self.path_zone() {
                    Some(zone) => zone_index(zone)?,
                    None => 0,
                };
                Some(SocketAddr::V6(SocketAddrV6::new(v6, self.port, 0, scope_id)))
            }
        }
    }

    /// URI로부터 결정되는 face 범위
    pub fn scope(&self) -> Scope {
        if !self.canonical {
            return Scope::Unknown;
        }
        match self.kind {
            UriKind::Dev | UriKind::Ethernet => Scope::NonLocal,
            UriKind::Udp | UriKind::Tcp | UriKind::WebSocket => {
                match self.path_host().parse::<IpAddr>() {
                    Ok(ip) if ip.is_loopback() => Scope::Local,
                    Ok(IpAddr::V6(v6)) if is_mapped_loopback(&v6) => Scope::Local,
                    _ => Scope::NonLocal,
                }
            }
            UriKind::Unknown => Scope::Unknown,
            UriKind::Fd | UriKind::Unix | UriKind::Internal | UriKind::Null => Scope::Local,
        }
    }
}

/// scope id가 있으면 `%<index>`를 붙인 호스트
fn host_with_zone(addr: &SocketAddr) -> String {
    match addr {
        SocketAddr::V6(v6) if v6.scope_id() != 0 => format!("{}%{}", v6.ip(), v6.scope_id()),
        _ => addr.ip().to_string(),
    }
}

/// IPv6 존 문자열을 scope id로 (숫자 또는 인터페이스 이름)
fn zone_index(zone: &str) -> Option<u32> {
    if zone.is_empty() {
        return None;
    }
    if let Ok(index) = zone.parse::<u32>() {
        return Some(index);
    }
    interface_index(zone)
}

#[cfg(unix)]
fn interface_index(name: &str) -> Option<u32> {
    nix::net::if_::if_nametoindex(name).ok().filter(|&i| i != 0)
}

#[cfg(not(unix))]
fn interface_index(_name: &str) -> Option<u32> {
    None
}

fn is_mapped_loopback(v6: &Ipv6Addr) -> bool {
    v6.to_ipv4_mapped().map(|v4| v4.is_loopback()).unwrap_or(false)
}

fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let parts: Vec<&str> = s.split(|c: char| c == ':' || c == '-').collect();
    if parts.len() != 6 {
        return None;
    }
    let mut mac = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        if part.len() != 2 {
            return None;
        }
        mac[i] = u8::from_str_radix(part, 16).ok()?;
    }
    Some(mac)
}

impl FromStr for FaceUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for FaceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            UriKind::Udp | UriKind::Tcp | UriKind::WebSocket => {
                if self.path_host().contains(':') {
                    write!(f, "{}://[{}]:{}", self.scheme, self.path, self.port)
                } else {
                    write!(f, "{}://{}:{}", self.scheme, self.path, self.port)
                }
            }
            UriKind::Ethernet => write!(f, "ether://[{}]", self.path),
            UriKind::Unknown => write!(f, "unknown://"),
            _ => write!(f, "{}://{}", self.scheme, self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_canonize() {
        let uri = FaceUri::decode("udp://127.0.0.1:6363");
        assert!(uri.is_canonical());
        assert_eq!(uri.scheme(), "udp4");
        assert_eq!(uri.to_string(), "udp4://127.0.0.1:6363");
        assert_eq!(uri.scope(), Scope::Local);

        let uri = FaceUri::parse("udp6://[::1]:6363").unwrap();
        assert_eq!(uri.to_string(), "udp6://[::1]:6363");

        let uri = FaceUri::parse("udp://[fe80::1%2]:6363").unwrap();
        assert_eq!(uri.scheme(), "udp6");
        assert_eq!(uri.path_zone(), Some("2"));
        assert_eq!(uri.to_string(), "udp6://[fe80::1%2]:6363");
        assert_eq!(uri.scope(), Scope::NonLocal);
        match uri.socket_addr() {
            Some(SocketAddr::V6(v6)) => assert_eq!(v6.scope_id(), 2),
            other => panic!("IPv6 주소가 와야 함: {:?}", other),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_named_zone_resolves_interface_index() {
        let uri = FaceUri::parse("udp6://[fe80::1%lo]:6363").unwrap();
        assert_eq!(uri.path_zone(), Some("lo"));
        assert_eq!(uri.to_string(), "udp6://[fe80::1%lo]:6363");
        match uri.socket_addr() {
            Some(SocketAddr::V6(v6)) => assert_ne!(v6.scope_id(), 0),
            other => panic!("IPv6 주소가 와야 함: {:?}", other),
        }
    }

    #[test]
    fn test_scope_id_kept_from_socket_addr() {
        let addr = SocketAddr::V6(SocketAddrV6::new("fe80::1".parse().unwrap(), 6363, 0, 3));
        let uri = FaceUri::udp(addr);
        assert_eq!(uri.to_string(), "udp6://[fe80::1%3]:6363");
        assert_eq!(uri.socket_addr(), Some(addr));
    }

    #[test]
    fn test_unknown_zone_not_canonical() {
        assert!(matches!(
            FaceUri::parse("udp6://[fe80::1%no-such-if0]:6363"),
            Err(Error::NonCanonicalUri(_))
        ));
        assert!(!FaceUri::decode("udp://[fe80::1%]:6363").is_canonical());
    }

    #[test]
    fn test_one_canonical_string_per_address() {
        let a = FaceUri::parse("tcp://192.168.1.10:6363").unwrap();
        let b = FaceUri::tcp("192.168.1.10:6363".parse().unwrap());
        let c = FaceUri::parse("TCP4://192.168.1.10:6363").unwrap();
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a, c);
    }

    #[test]
    fn test_version_mismatch_not_canonical() {
        assert!(!FaceUri::decode("udp6://10.0.0.1:6363").is_canonical());
        assert!(matches!(
            FaceUri::parse("udp4://[2001:db8::1]:6363"),
            Err(Error::NonCanonicalUri(_))
        ));
        assert!(FaceUri::parse("udp4://10.0.0.1").is_err());
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!(matches!(
            FaceUri::parse("http://a.b:80"),
            Err(Error::UnsupportedScheme(_))
        ));
        assert!(matches!(FaceUri::parse("garbage"), Err(Error::UnsupportedScheme(_))));
    }

    #[test]
    fn test_other_schemes() {
        let uri = FaceUri::unix("/run/nfd.sock");
        assert!(uri.is_canonical());
        assert_eq!(uri.to_string(), "unix:///run/nfd.sock");
        assert_eq!(uri.scope(), Scope::Local);

        assert_eq!(FaceUri::null().to_string(), "null://");
        assert_eq!(FaceUri::internal().to_string(), "internal://");
        assert_eq!(FaceUri::fd(3).to_string(), "fd://3");
        assert_eq!(FaceUri::dev("eth0").to_string(), "dev://eth0");
        assert_eq!(FaceUri::dev("eth0").scope(), Scope::NonLocal);

        let ether = FaceUri::parse("ether://[AA-BB-CC-DD-EE-FF]").unwrap();
        assert_eq!(ether.to_string(), "ether://[aa:bb:cc:dd:ee:ff]");

        let ws = FaceUri::parse("ws://127.0.0.1:9696").unwrap();
        assert_eq!(ws.scope(), Scope::Local);
        assert_eq!(ws.socket_addr(), Some("127.0.0.1:9696".parse().unwrap()));
    }

    #[test]
    fn test_unix_directory_not_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let uri = FaceUri::unix(dir.path());
        assert!(!uri.is_canonical());
        assert_eq!(uri.scope(), Scope::Unknown);
    }
}
