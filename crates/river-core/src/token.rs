//! Resumption tokens
//!
//! A token names a session and the next sequence the holder has not seen.
//! On the wire it is URL-safe base64 of a small versioned JSON document, so it
//! survives query strings, SSE `id:` lines and process restarts unchanged.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RiverError;
use crate::types::{Sequence, SessionId};

const TOKEN_VERSION: u8 = 1;
const MAX_ENCODED_LEN: usize = 512;

#[derive(Serialize, Deserialize)]
struct WireToken {
    v: u8,
    s: String,
    o: Sequence,
}

/// Session id plus the offset to resume from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResumptionToken {
    session_id: SessionId,
    offset: Sequence,
}

impl ResumptionToken {
    pub fn new(session_id: SessionId, offset: Sequence) -> Self {
        Self { session_id, offset }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Next sequence to deliver when resuming with this token
    pub fn offset(&self) -> Sequence {
        self.offset
    }

    pub fn encode(&self) -> String {
        let wire = WireToken {
            v: TOKEN_VERSION,
            s: self.session_id.to_string(),
            o: self.offset,
        };
        // Serializing a plain struct of a string and two integers cannot fail.
        let json = serde_json::to_vec(&wire).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a client-supplied token. Only the shape is checked here; the
    /// offset is bounds-checked against the real log by the engine.
    pub fn decode(raw: &str) -> Result<Self, RiverError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RiverError::malformed_token("token is empty"));
        }
        if raw.len() > MAX_ENCODED_LEN {
            return Err(RiverError::malformed_token("token is too long"));
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|e| RiverError::malformed_token(format!("invalid encoding: {}", e)))?;
        let wire: WireToken = serde_json::from_slice(&bytes)
            .map_err(|e| RiverError::malformed_token(format!("invalid payload: {}", e)))?;

        if wire.v != TOKEN_VERSION {
            return Err(RiverError::malformed_token(format!(
                "unsupported token version {}",
                wire.v
            )));
        }

        let session_id = SessionId::parse(&wire.s)
            .map_err(|e| RiverError::malformed_token(format!("invalid session id: {}", e)))?;

        Ok(Self {
            session_id,
            offset: wire.o,
        })
    }
}

impl fmt::Display for ResumptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for ResumptionToken {
    type Err = RiverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl TryFrom<String> for ResumptionToken {
    type Error = RiverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::decode(&value)
    }
}

impl From<ResumptionToken> for String {
    fn from(token: ResumptionToken) -> Self {
        token.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_url_safe_and_decodes() {
        let token = ResumptionToken::new(SessionId::parse("abc123").unwrap(), 42);
        let encoded = token.encode();
        assert!(
            encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_eq!(ResumptionToken::decode(&encoded).unwrap(), token);
    }

    #[test]
    fn test_rejects_garbage() {
        for raw in ["", "   ", "not base64!!", "e30", &"A".repeat(600)] {
            let err = ResumptionToken::decode(raw).unwrap_err();
            assert!(matches!(err, RiverError::MalformedToken { .. }), "{raw}");
        }
    }

    #[test]
    fn test_rejects_unknown_version_and_bad_session_id() {
        let future = URL_SAFE_NO_PAD.encode(br#"{"v":9,"s":"abc","o":0}"#);
        assert!(ResumptionToken::decode(&future).is_err());

        let traversal = URL_SAFE_NO_PAD.encode(br#"{"v":1,"s":"../x","o":0}"#);
        assert!(ResumptionToken::decode(&traversal).is_err());

        let negative = URL_SAFE_NO_PAD.encode(br#"{"v":1,"s":"abc","o":-1}"#);
        assert!(ResumptionToken::decode(&negative).is_err());
    }

    #[test]
    fn test_serializes_as_encoded_string() {
        let token = ResumptionToken::new(SessionId::parse("s1").unwrap(), 3);
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, format!("\"{}\"", token.encode()));
    }
}
