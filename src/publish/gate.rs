//! Outer auth gate, evaluated by the calling application before it talks
//! to the worker.

use crate::{
    auth::{AuthError, tokens_match},
    errors::register_secret,
};
use std::fmt;

/// Environment variable holding the client-facing publish secret.
pub const PUBLISH_TOKEN_ENV: &str = "SITE_STORE_PUBLISH_TOKEN";

/// Where a publish request is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishTarget {
    /// Third-party pages deployment; no client token required.
    Pages,
    /// This storage worker; requires the publish token.
    Storage,
}

#[derive(Clone, Default)]
pub struct PublishGate {
    publish_token: Option<String>,
}

impl fmt::Debug for PublishGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishGate")
            .field("publish_token", &self.publish_token.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl PublishGate {
    pub fn new(publish_token: Option<String>) -> Self {
        let publish_token = publish_token.filter(|token| !token.is_empty());
        if let Some(token) = publish_token.as_deref() {
            register_secret(token);
        }
        Self { publish_token }
    }

    /// Decide whether a client may publish to `target`.
    pub fn authorize(
        &self,
        target: PublishTarget,
        client_token: Option<&str>,
    ) -> Result<(), AuthError> {
        if target == PublishTarget::Pages {
            return Ok(());
        }

        let expected = self
            .publish_token
            .as_deref()
            .ok_or(AuthError::NotConfigured(PUBLISH_TOKEN_ENV))?;
        let presented = client_token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingCredential("publish token"))?;

        if tokens_match(presented, expected) {
            Ok(())
        } else {
            Err(AuthError::InvalidCredential("publish token"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_needs_no_token() {
        let gate = PublishGate::new(None);
        assert_eq!(gate.authorize(PublishTarget::Pages, None), Ok(()));
    }

    #[test]
    fn storage_requires_matching_token() {
        let gate = PublishGate::new(Some("outer-gate-secret".into()));
        assert_eq!(
            gate.authorize(PublishTarget::Storage, Some("outer-gate-secret")),
            Ok(())
        );
        assert_eq!(
            gate.authorize(PublishTarget::Storage, None),
            Err(AuthError::MissingCredential("publish token"))
        );
        assert_eq!(
            gate.authorize(PublishTarget::Storage, Some("")),
            Err(AuthError::MissingCredential("publish token"))
        );
        assert_eq!(
            gate.authorize(PublishTarget::Storage, Some("inner")),
            Err(AuthError::InvalidCredential("publish token"))
        );
    }

    #[test]
    fn publish_token_is_redacted_once_configured() {
        PublishGate::new(Some("gate-redaction-secret".into()));
        assert_eq!(
            crate::errors::redact("client sent gate-redaction-secret"),
            "client sent [REDACTED]"
        );
    }

    #[test]
    fn unconfigured_secret_is_not_unauthorized() {
        for token in [None, Some(String::new())] {
            let gate = PublishGate::new(token);
            assert_eq!(
                gate.authorize(PublishTarget::Storage, Some("anything")),
                Err(AuthError::NotConfigured(PUBLISH_TOKEN_ENV))
            );
        }
    }
}
