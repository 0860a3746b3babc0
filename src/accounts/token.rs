use rand::{rngs::OsRng, RngCore};
use time::{Duration, OffsetDateTime};

/// Bytes of randomness per opaque token (40 hex chars on the wire).
pub const TOKEN_BYTES: usize = 20;

/// An opaque single-use token together with its absolute expiry.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

/// Issue a fresh unguessable token valid for `ttl` from now.
pub fn issue(ttl: Duration) -> IssuedToken {
    let mut buf = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut buf);
    IssuedToken {
        token: hex::encode(buf),
        expires_at: OffsetDateTime::now_utc() + ttl,
    }
}

/// A token is live strictly before its expiry instant.
pub fn is_live(expires_at: OffsetDateTime) -> bool {
    OffsetDateTime::now_utc() < expires_at
}
