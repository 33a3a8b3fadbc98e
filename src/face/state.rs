//! Face 속성 열거형

use std::fmt;

/// Face 지속성
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Persistency {
    /// 실패하면 종료
    Persistent,
    /// 유휴 시간이 수명을 넘으면 Down
    OnDemand,
    /// 실패해도 같은 원격지로 재연결
    Permanent,
}

impl Persistency {
    pub fn code(self) -> u64 {
        match self {
            Persistency::Persistent => 0,
            Persistency::OnDemand => 1,
            Persistency::Permanent => 2,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Persistency::Persistent),
            1 => Some(Persistency::OnDemand),
            2 => Some(Persistency::Permanent),
            _ => None,
        }
    }
}

impl fmt::Display for Persistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Persistency::Persistent => "persistent",
            Persistency::OnDemand => "on-demand",
            Persistency::Permanent => "permanent",
        };
        f.write_str(s)
    }
}

/// Face 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaceState {
    Up,
    Down,
    AdminDown,
}

impl FaceState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            FaceState::Up => 1,
            FaceState::Down => 2,
            FaceState::AdminDown => 3,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => FaceState::Up,
            3 => FaceState::AdminDown,
            _ => FaceState::Down,
        }
    }
}

impl fmt::Display for FaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaceState::Up => "Up",
            FaceState::Down => "Down",
            FaceState::AdminDown => "AdminDown",
        };
        f.write_str(s)
    }
}

/// Face 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    NonLocal,
    Local,
    Unknown,
}

impl Scope {
    pub fn code(self) -> u64 {
        match self {
            Scope::NonLocal => 0,
            Scope::Local => 1,
            Scope::Unknown => 255,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scope::NonLocal => "non-local",
            Scope::Local => "local",
            Scope::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// 링크 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    PointToPoint,
    MultiAccess,
    AdHoc,
}

impl LinkType {
    pub fn code(self) -> u64 {
        match self {
            LinkType::PointToPoint => 0,
            LinkType::MultiAccess => 1,
            LinkType::AdHoc => 2,
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkType::PointToPoint => "point-to-point",
            LinkType::MultiAccess => "multi-access",
            LinkType::AdHoc => "ad-hoc",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistency_codes() {
        for p in [
            Persistency::Persistent,
            Persistency::OnDemand,
            Persistency::Permanent,
        ] {
            assert_eq!(Persistency::from_code(p.code()), Some(p));
        }
        assert_eq!(Persistency::from_code(7), None);
    }

    #[test]
    fn test_state_u8() {
        for s in [FaceState::Up, FaceState::Down, FaceState::AdminDown] {
            assert_eq!(FaceState::from_u8(s.as_u8()), s);
        }
    }
}
