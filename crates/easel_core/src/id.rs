//! Identifiers — peer addresses, board ids, and opaque path tokens.
//!
//! A board id is the triple `host:port:name`. The owning peer (`host:port`)
//! is authoritative for the board; only the first two colon-delimited fields
//! are ever treated as the address, so board names may themselves contain
//! `:`. The `%` character is reserved as the field delimiter of the compact
//! wire encoding (see [`crate::wire`]) and is therefore rejected in both
//! board names and path tokens instead of being escaped.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors from parsing or validating identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input did not have the expected `host:port[:name]` shape.
    #[error("malformed identifier: {0}")]
    Malformed(String),

    /// The port field was not a valid u16.
    #[error("invalid port in identifier: {0}")]
    BadPort(String),

    /// A board name or path token contained a reserved character or was empty.
    #[error("illegal token {0:?}: must be non-empty and free of '%'")]
    IllegalToken(String),
}

// ---------------------------------------------------------------------------
// PeerAddr
// ---------------------------------------------------------------------------

/// The stable identity of a peer on the network: `host:port`.
///
/// One address corresponds to one peer process; all boards owned by that peer
/// share it, and the connection pool in `easel_net` keys cached connections
/// by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddr {
    host: String,
    port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerAddr {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, ':');
        let host = parts
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| IdError::Malformed(s.to_string()))?;
        let port = parts
            .next()
            .ok_or_else(|| IdError::Malformed(s.to_string()))?;
        let port: u16 = port.parse().map_err(|_| IdError::BadPort(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for PeerAddr {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PeerAddr> for String {
    fn from(addr: PeerAddr) -> Self {
        addr.to_string()
    }
}

// ---------------------------------------------------------------------------
// BoardId
// ---------------------------------------------------------------------------

/// Globally unique board identifier: `host:port:name`.
///
/// The `host:port` prefix names the owning peer. Only the first two colon
/// fields are parsed as the address, so `name` may contain further colons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BoardId {
    owner: PeerAddr,
    name: String,
}

impl BoardId {
    /// Create a board id, validating the name.
    pub fn new(owner: PeerAddr, name: impl Into<String>) -> Result<Self, IdError> {
        let name = name.into();
        if name.is_empty() || name.contains('%') {
            return Err(IdError::IllegalToken(name));
        }
        Ok(Self { owner, name })
    }

    /// The peer that created the board and is authoritative for it.
    pub fn owner(&self) -> &PeerAddr {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.name)
    }
}

impl FromStr for BoardId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let host = parts
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| IdError::Malformed(s.to_string()))?;
        let port = parts
            .next()
            .ok_or_else(|| IdError::Malformed(s.to_string()))?;
        let name = parts
            .next()
            .ok_or_else(|| IdError::Malformed(s.to_string()))?;
        let port: u16 = port.parse().map_err(|_| IdError::BadPort(s.to_string()))?;
        Self::new(PeerAddr::new(host, port), name)
    }
}

impl TryFrom<String> for BoardId {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BoardId> for String {
    fn from(id: BoardId) -> Self {
        id.to_string()
    }
}

// ---------------------------------------------------------------------------
// PathToken
// ---------------------------------------------------------------------------

/// An opaque, immutable drawing primitive.
///
/// The synchronization layer never looks inside a path; it only appends,
/// removes, and re-transmits them. Tokens must be non-empty and `%`-free so
/// the compact snapshot encoding stays unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathToken(String);

impl PathToken {
    pub fn new(token: impl Into<String>) -> Result<Self, IdError> {
        let token = token.into();
        if token.is_empty() || token.contains('%') {
            return Err(IdError::IllegalToken(token));
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PathToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PathToken {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PathToken {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<PathToken> for String {
    fn from(token: PathToken) -> Self {
        token.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_addr_parse_and_display() {
        let addr: PeerAddr = "192.168.1.7:3171".parse().unwrap();
        assert_eq!(addr.host(), "192.168.1.7");
        assert_eq!(addr.port(), 3171);
        assert_eq!(addr.to_string(), "192.168.1.7:3171");
    }

    #[test]
    fn peer_addr_rejects_garbage() {
        assert!("".parse::<PeerAddr>().is_err());
        assert!("hostonly".parse::<PeerAddr>().is_err());
        assert!("host:notaport".parse::<PeerAddr>().is_err());
        assert!(":3171".parse::<PeerAddr>().is_err());
    }

    #[test]
    fn board_id_round_trip() {
        let id: BoardId = "peerX:3171:board100".parse().unwrap();
        assert_eq!(id.owner().host(), "peerX");
        assert_eq!(id.owner().port(), 3171);
        assert_eq!(id.name(), "board100");
        assert_eq!(id.to_string(), "peerX:3171:board100");
        assert_eq!(id.to_string().parse::<BoardId>().unwrap(), id);
    }

    #[test]
    fn board_name_may_contain_colons() {
        // Only the first two colon fields are the address.
        let id: BoardId = "host:8080:notes:2026:draft".parse().unwrap();
        assert_eq!(id.owner().port(), 8080);
        assert_eq!(id.name(), "notes:2026:draft");
        assert_eq!(id.to_string().parse::<BoardId>().unwrap(), id);
    }

    #[test]
    fn board_name_rejects_percent_and_empty() {
        let owner = PeerAddr::new("host", 1);
        assert!(BoardId::new(owner.clone(), "a%b").is_err());
        assert!(BoardId::new(owner, "").is_err());
        assert!("host:1:a%b".parse::<BoardId>().is_err());
        assert!("host:1:".parse::<BoardId>().is_err());
    }

    #[test]
    fn path_token_validation() {
        assert!(PathToken::new("0,0 10,10 black").is_ok());
        assert!(PathToken::new("").is_err());
        assert!(PathToken::new("10%20").is_err());
    }

    #[test]
    fn serde_as_strings() {
        let id: BoardId = "h:9:b".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"h:9:b\"");
        let back: BoardId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        // Invalid content is rejected during deserialization, not later.
        assert!(serde_json::from_str::<PathToken>("\"a%b\"").is_err());
        assert!(serde_json::from_str::<BoardId>("\"no-port\"").is_err());
    }
}
