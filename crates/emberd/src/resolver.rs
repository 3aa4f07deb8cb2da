//! Bearer-token to account resolution.

use std::sync::Arc;

use crate::identity::{IdentityError, IdentityProvider};
use crate::store::{Account, AccountStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("bearer token rejected by identity provider: {0}")]
    TokenInvalid(String),

    #[error("no linked account for external user id {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Maps inbound bearer tokens to device-cloud accounts.
///
/// Token validity and claim extraction are delegated to the identity
/// provider; this component only performs the local lookup once a verified
/// external user id is in hand. Read-only and safe to call concurrently.
pub struct AccountResolver {
    identity: Arc<dyn IdentityProvider>,
    accounts: Arc<dyn AccountStore>,
}

impl AccountResolver {
    pub fn new(identity: Arc<dyn IdentityProvider>, accounts: Arc<dyn AccountStore>) -> Self {
        Self { identity, accounts }
    }

    #[tracing::instrument(skip(self, token))]
    pub async fn resolve(&self, token: &str) -> Result<Account, ResolveError> {
        let external_user_id = self
            .identity
            .external_user_id(token)
            .await
            .map_err(|e| match e {
                IdentityError::TokenRejected(msg) => ResolveError::TokenInvalid(msg),
                other => ResolveError::TokenInvalid(other.to_string()),
            })?;

        let identity = self
            .accounts
            .find_identity_by_external_id(&external_user_id)
            .await?
            .ok_or_else(|| ResolveError::NotFound(external_user_id.clone()))?;

        self.accounts
            .get_account(&identity.account_id)
            .await?
            .ok_or(ResolveError::NotFound(external_user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::test_support::MockIdentityProvider;
    use crate::store::{LinkedIdentity, MemoryStore};

    #[tokio::test]
    async fn resolves_linked_account() {
        let store = Arc::new(MemoryStore::new());
        let account = Account::new("owner");
        store.insert_account(account.clone()).await.unwrap();
        store
            .upsert_identity(LinkedIdentity::new(&account.id, "amzn1.user.1"))
            .await
            .unwrap();

        let identity = Arc::new(MockIdentityProvider::new().with_token("tok", "amzn1.user.1"));
        let resolver = AccountResolver::new(identity, store);

        let resolved = resolver.resolve("tok").await.unwrap();
        assert_eq!(resolved.id, account.id);
    }

    #[tokio::test]
    async fn rejects_unknown_token() {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(MockIdentityProvider::new());
        let resolver = AccountResolver::new(identity, store);

        let err = resolver.resolve("bogus").await.unwrap_err();
        assert!(matches!(err, ResolveError::TokenInvalid(_)));
    }

    #[tokio::test]
    async fn valid_token_without_identity_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(MockIdentityProvider::new().with_token("tok", "amzn1.user.2"));
        let resolver = AccountResolver::new(identity, store);

        let err = resolver.resolve("tok").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }
}
