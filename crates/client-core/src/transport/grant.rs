//! Room access credentials
//!
//! The token service issues JWT-shaped credentials (`header.payload.signature`)
//! whose claims name the participant (`sub`) and the room it may join
//! (`video.room`). Clients never verify the signature, that is the room
//! service's job; they only need to read the claims, e.g. to check that a
//! credential matches the room being joined.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Room-scoped grant inside the credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoGrant {
    pub room: String,
    #[serde(rename = "roomJoin", default = "default_room_join")]
    pub room_join: bool,
}

fn default_room_join() -> bool {
    true
}

/// Claims carried by an access credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    /// Participant identity
    pub sub: String,
    /// Room grant
    pub video: VideoGrant,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expiry (seconds since the Unix epoch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

impl AccessGrant {
    /// Grant for `identity` to join `room`
    pub fn new(identity: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            sub: identity.into(),
            video: VideoGrant {
                room: room.into(),
                room_join: true,
            },
            name: None,
            exp: None,
        }
    }

    pub fn identity(&self) -> &str {
        &self.sub
    }

    pub fn room(&self) -> &str {
        &self.video.room
    }

    /// Read the claims of a credential without verifying its signature
    pub fn decode(credential: &str) -> ClientResult<Self> {
        let mut parts = credential.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ClientError::transport("malformed access token"));
        };

        let raw = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| ClientError::transport(format!("malformed access token: {}", e)))?;
        let grant: AccessGrant = serde_json::from_slice(&raw)
            .map_err(|e| ClientError::transport(format!("malformed access token claims: {}", e)))?;

        if grant.sub.is_empty() || grant.video.room.is_empty() {
            return Err(ClientError::transport("access token has no identity or room"));
        }
        Ok(grant)
    }

    /// Encode as an unsigned credential (`alg: none`)
    ///
    /// Accepted by [`LoopbackHub`](super::LoopbackHub); a real room service
    /// rejects it.
    pub fn encode_unsigned(&self) -> ClientResult<String> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?);
        Ok(format!("{}.{}.", header, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsigned_credential_reads_back() {
        let grant = AccessGrant::new("agent-a", "room1");
        let token = grant.encode_unsigned().unwrap();

        assert_eq!(token.matches('.').count(), 2);
        let decoded = AccessGrant::decode(&token).unwrap();
        assert_eq!(decoded.identity(), "agent-a");
        assert_eq!(decoded.room(), "room1");
        assert!(decoded.video.room_join);
    }

    #[test]
    fn test_reads_issued_claims() {
        // Claims as the token service issues them, with a signature we do not check
        let claims = serde_json::json!({
            "sub": "agent-b",
            "iss": "APIkey",
            "name": "Agent B",
            "exp": 1_900_000_000u64,
            "video": {"room": "room1", "roomJoin": true, "canPublish": true}
        });
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let token = format!("eyJhbGciOiJIUzI1NiJ9.{}.c2lnbmF0dXJl", payload);

        let grant = AccessGrant::decode(&token).unwrap();
        assert_eq!(grant.identity(), "agent-b");
        assert_eq!(grant.room(), "room1");
        assert_eq!(grant.name.as_deref(), Some("Agent B"));
        assert_eq!(grant.exp, Some(1_900_000_000));
    }

    #[test]
    fn test_rejects_malformed_credentials() {
        for token in ["", "abc", "a.b", "a.b.c.d", "a.!!!.c"] {
            let err = AccessGrant::decode(token).unwrap_err();
            assert!(matches!(err, ClientError::Transport { .. }), "{}: {:?}", token, err);
        }

        let empty_room = AccessGrant::new("agent-a", "").encode_unsigned().unwrap();
        assert!(AccessGrant::decode(&empty_room).is_err());
    }
}
