//! Anonymous identity provider
//!
//! Each client (browser tab / WebSocket connection) signs in anonymously and
//! receives a ULID that stays stable for the lifetime of the provider.

use crate::types::Identity;
use async_trait::async_trait;
use tokio::sync::watch;

/// Trait that all identity providers must implement
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Sign in, returning the existing identity if already signed in
    async fn sign_in(&self) -> Identity;

    /// Identity issued so far, if any
    fn current_user(&self) -> Option<Identity>;

    /// Watch for the identity becoming available
    fn subscribe(&self) -> watch::Receiver<Option<Identity>>;
}

/// Issues random anonymous identities without collecting credentials
pub struct AnonymousAuth {
    user: watch::Sender<Option<Identity>>,
}

impl AnonymousAuth {
    pub fn new() -> Self {
        let (user, _rx) = watch::channel(None);
        Self { user }
    }

    /// Provider already signed in as `identity`, for a client coming back
    pub fn resumed(identity: Identity) -> Self {
        let (user, _rx) = watch::channel(Some(identity));
        Self { user }
    }
}

impl Default for AnonymousAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for AnonymousAuth {
    async fn sign_in(&self) -> Identity {
        let candidate = Identity {
            uid: ulid::Ulid::new().to_string(),
        };
        let mut identity = candidate.clone();

        let issued = self.user.send_if_modified(|user| match user {
            Some(existing) => {
                identity = existing.clone();
                false
            }
            None => {
                *user = Some(candidate);
                true
            }
        });

        if issued {
            tracing::debug!("Signed in anonymously as {}", identity.uid);
        }
        identity
    }

    fn current_user(&self) -> Option<Identity> {
        self.user.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.user.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_signed_in_by_default() {
        let auth = AnonymousAuth::new();
        assert!(auth.current_user().is_none());
    }

    #[tokio::test]
    async fn test_sign_in_is_stable() {
        let auth = AnonymousAuth::new();
        let first = auth.sign_in().await;
        let second = auth.sign_in().await;

        assert_eq!(first, second);
        assert_eq!(auth.current_user(), Some(first));
    }

    #[tokio::test]
    async fn test_separate_providers_get_distinct_ids() {
        let a = AnonymousAuth::new().sign_in().await;
        let b = AnonymousAuth::new().sign_in().await;
        assert_ne!(a.uid, b.uid);
    }

    #[tokio::test]
    async fn test_subscribers_observe_sign_in() {
        let auth = AnonymousAuth::new();
        let mut rx = auth.subscribe();

        let identity = auth.sign_in().await;
        let seen = rx.wait_for(|user| user.is_some()).await.unwrap().clone();
        assert_eq!(seen, Some(identity));
    }

    #[tokio::test]
    async fn test_resumed_provider_keeps_identity() {
        let original = AnonymousAuth::new().sign_in().await;
        let auth = AnonymousAuth::resumed(original.clone());

        assert_eq!(auth.current_user(), Some(original.clone()));
        assert_eq!(auth.sign_in().await, original);
    }
}
