//! Compact full-state wire encoding.
//!
//! A snapshot travels as `host:port:name%version%path1%path2%...`: the board
//! id, the version, and the ordered paths. The string is split on `%` at most
//! twice, so the third field is the whole paths blob; individual paths are
//! then split on `%` again, which is unambiguous because `%` is rejected in
//! board names and path tokens at construction (see [`crate::id`]).

use serde::{Deserialize, Serialize};

use crate::id::{BoardId, IdError, PathToken};

/// Errors from decoding a snapshot string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The input did not have the `id%version%paths` shape.
    #[error("malformed snapshot: {0}")]
    Malformed(String),

    /// The embedded board id or a path token was invalid.
    #[error("invalid field in snapshot: {0}")]
    BadField(#[from] IdError),

    /// The version field was not a number.
    #[error("invalid version in snapshot: {0}")]
    BadVersion(String),
}

/// Full state of a board: id, version, and the ordered path sequence.
///
/// `decode(encode(s)) == s` for every snapshot, which is what lets a viewer
/// reconstruct a board exactly from one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub id: BoardId,
    pub version: u64,
    pub paths: Vec<PathToken>,
}

impl BoardSnapshot {
    /// Encode as `id%version%paths`. A board with no paths encodes with an
    /// empty third field (`id%version%`).
    pub fn encode(&self) -> String {
        let paths = self
            .paths
            .iter()
            .map(PathToken::as_str)
            .collect::<Vec<_>>()
            .join("%");
        format!("{}%{}%{}", self.id, self.version, paths)
    }

    /// Decode a string produced by [`encode`](Self::encode).
    pub fn decode(s: &str) -> Result<Self, WireError> {
        let mut parts = s.splitn(3, '%');
        let id = parts
            .next()
            .ok_or_else(|| WireError::Malformed(s.to_string()))?;
        let version = parts
            .next()
            .ok_or_else(|| WireError::Malformed(s.to_string()))?;
        let paths = parts
            .next()
            .ok_or_else(|| WireError::Malformed(s.to_string()))?;

        let id: BoardId = id.parse()?;
        let version: u64 = version
            .parse()
            .map_err(|_| WireError::BadVersion(s.to_string()))?;
        let paths = if paths.is_empty() {
            Vec::new()
        } else {
            paths
                .split('%')
                .map(PathToken::new)
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self { id, version, paths })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str, version: u64, paths: &[&str]) -> BoardSnapshot {
        BoardSnapshot {
            id: id.parse().unwrap(),
            version,
            paths: paths.iter().map(|p| PathToken::new(*p).unwrap()).collect(),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let snap = snapshot("peerX:3171:board100", 2, &["p1", "p2"]);
        let encoded = snap.encode();
        assert_eq!(encoded, "peerX:3171:board100%2%p1%p2");
        assert_eq!(BoardSnapshot::decode(&encoded).unwrap(), snap);
    }

    #[test]
    fn empty_board_round_trip() {
        let snap = snapshot("peerX:3171:empty", 0, &[]);
        let encoded = snap.encode();
        assert_eq!(encoded, "peerX:3171:empty%0%");
        assert_eq!(BoardSnapshot::decode(&encoded).unwrap(), snap);
    }

    #[test]
    fn board_name_with_colons_round_trips() {
        let snap = snapshot("h:1:a:b:c", 7, &["x", "y", "z"]);
        assert_eq!(BoardSnapshot::decode(&snap.encode()).unwrap(), snap);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        // Too few '%' fields.
        assert!(matches!(
            BoardSnapshot::decode("h:1:b%3"),
            Err(WireError::Malformed(_))
        ));
        // Version is not numeric.
        assert!(matches!(
            BoardSnapshot::decode("h:1:b%x%p1"),
            Err(WireError::BadVersion(_))
        ));
        // Bad board id.
        assert!(matches!(
            BoardSnapshot::decode("noport%1%p1"),
            Err(WireError::BadField(_))
        ));
    }

    #[test]
    fn decode_preserves_path_order() {
        let decoded = BoardSnapshot::decode("h:1:b%3%c%a%b").unwrap();
        let order: Vec<&str> = decoded.paths.iter().map(PathToken::as_str).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn serde_round_trip_matches_text_round_trip() {
        let snap = snapshot("peerX:3171:board100", 4, &["p1", "p2", "p3"]);
        let json = serde_json::to_string(&snap).unwrap();
        let back: BoardSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.encode(), snap.encode());
    }
}
