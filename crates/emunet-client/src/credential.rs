//! Credential-refresh collaborator.
//!
//! Credential issuance itself is out of scope for this crate (external identity/auth system);
//! this trait is the seam an implementer plugs a token refresh flow into. Per §4.7/§7, any
//! signaling error tagged unauthorized/token/auth (surfaced here as [`NetplayError::AuthRequired`])
//! is routed here before the triggering call is retried.

use crate::error::NetplayError;
use crate::signaling::BoxFuture;

pub trait CredentialRefresh: Send + Sync {
    /// Obtain a fresh auth token. On success the caller retries the original request with it.
    fn refresh<'a>(&'a self) -> BoxFuture<'a, Result<String, NetplayError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRefresh(&'static str);
    impl CredentialRefresh for FixedRefresh {
        fn refresh<'a>(&'a self) -> BoxFuture<'a, Result<String, NetplayError>> {
            Box::pin(async move { Ok(self.0.to_string()) })
        }
    }

    #[tokio::test]
    async fn refresh_returns_new_token() {
        let cred = FixedRefresh("tok-123");
        assert_eq!(cred.refresh().await.unwrap(), "tok-123");
    }
}
