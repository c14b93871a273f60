//! Short-lived per-build tokens for the runner callback API.
//!
//! Format: `<build_id>.<expires_at_unix>.<hmac-sha256-hex>`, where the MAC
//! covers `<build_id>.<expires_at_unix>` keyed with the server's token secret.

use chrono::Utc;
use std::fmt;
use std::time::Duration;

use crate::secret::{hmac_hex, verify_mac_hex};
use crate::{BuildId, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildToken(String);

impl BuildToken {
    /// Issue a token for `build_id` valid for `ttl` from now.
    pub fn issue(secret: &str, build_id: BuildId, ttl: Duration) -> Self {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp().saturating_add(ttl);
        Self::issue_until(secret, build_id, expires_at)
    }

    pub fn issue_until(secret: &str, build_id: BuildId, expires_at: i64) -> Self {
        let payload = format!("{build_id}.{expires_at}");
        let mac = hmac_hex(secret, payload.as_bytes());
        Self(format!("{payload}.{mac}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Verify `token` grants access to `build_id` right now.
    pub fn verify(secret: &str, token: &str, build_id: BuildId) -> Result<()> {
        Self::verify_at(secret, token, build_id, Utc::now().timestamp())
    }

    pub fn verify_at(secret: &str, token: &str, build_id: BuildId, now: i64) -> Result<()> {
        let mut parts = token.splitn(3, '.');
        let (Some(id), Some(expires_at), Some(mac)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Unauthorized("malformed build token".to_string()));
        };

        if !verify_mac_hex(secret, format!("{id}.{expires_at}").as_bytes(), mac) {
            return Err(Error::Unauthorized("invalid build token".to_string()));
        }
        if id != build_id.to_string() {
            return Err(Error::Unauthorized(format!(
                "token does not grant access to build {build_id}"
            )));
        }
        let expires_at: i64 = expires_at
            .parse()
            .map_err(|_| Error::Unauthorized("malformed build token".to_string()))?;
        if now > expires_at {
            return Err(Error::Unauthorized("build token expired".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for BuildToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
