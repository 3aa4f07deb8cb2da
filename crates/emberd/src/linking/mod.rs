//! Account linking: authorization-code exchange, account resolution and
//! merge, and re-association of devices discovered before linking.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use crate::directory::DeviceDirectory;
use crate::error::LinkingError;
use crate::identity::{
    ExternalProfile, IdentityError, IdentityProvider, TokenGrant,
};
use crate::store::{Account, AccountStore, Device, DeviceStore, LinkedIdentity, StoreError};

/// Outcome summary rendered on the linking success page.
#[derive(Debug, Clone)]
pub struct LinkSummary {
    pub account_id: String,
    pub account_name: String,
    pub devices_linked: usize,
    pub identity_created: bool,
}

struct Resolution {
    account: Account,
    identity_created: bool,
}

/// Runs the account-linking pipeline for one redirect callback.
pub struct LinkWorkflow {
    identity: Arc<dyn IdentityProvider>,
    accounts: Arc<dyn AccountStore>,
    directory: DeviceDirectory,
}

impl LinkWorkflow {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        accounts: Arc<dyn AccountStore>,
        devices: Arc<dyn DeviceStore>,
    ) -> Self {
        Self {
            identity,
            accounts,
            directory: DeviceDirectory::new(devices),
        }
    }

    /// Find or create the placeholder account for a device-control session
    /// that started before linking.
    pub async fn placeholder_for_session(&self, link_code: &str) -> Result<Account, StoreError> {
        if let Some(existing) = self.accounts.find_account_by_link_code(link_code).await? {
            return Ok(existing);
        }
        let account = Account::placeholder(link_code);
        self.accounts.insert_account(account.clone()).await?;
        tracing::info!(account_id = %account.id, "created placeholder account for session");
        Ok(account)
    }

    /// Run the full linking pipeline.
    ///
    /// `session` is the session-correlation id carried through the OAuth
    /// `state` parameter, when the flow started from a device session.
    #[tracing::instrument(skip(self, code, session))]
    pub async fn link(
        &self,
        code: &str,
        session: Option<&str>,
    ) -> Result<LinkSummary, LinkingError> {
        // The grant exchange and the placeholder lookup are independent;
        // run them together and join.
        let auth = async {
            let grant = self
                .identity
                .exchange_code(code)
                .await
                .map_err(exchange_error)?;
            let profile = self
                .identity
                .fetch_profile(&grant.access_token)
                .await
                .map_err(|e| LinkingError::ProfileFetch(e.to_string()))?;
            Ok::<(TokenGrant, ExternalProfile), LinkingError>((grant, profile))
        };
        let session_lookup = async {
            match session {
                Some(link_code) => {
                    let placeholder =
                        self.accounts.find_account_by_link_code(link_code).await?;
                    let devices = match &placeholder {
                        Some(account) => self.directory.devices_for(&account.id).await?,
                        None => Vec::new(),
                    };
                    Ok::<(Option<Account>, Vec<Device>), StoreError>((placeholder, devices))
                }
                None => Ok((None, Vec::new())),
            }
        };

        let (auth, session_state) = tokio::join!(auth, session_lookup);
        let (grant, profile) = auth?;
        let (placeholder, session_devices) = session_state?;

        let resolution = self
            .resolve_account(&profile, &grant, placeholder.as_ref())
            .await?;
        let account = resolution.account;

        // Import the session's devices: dedup by address, link for voice
        // control, and move them off a placeholder that was not reused.
        let mut devices_linked = 0;
        for candidate in session_devices {
            let device = self.directory.upsert_by_address(candidate).await?;
            self.directory.link_for_voice(&account.id, &device).await?;
            if let Some(placeholder) = &placeholder {
                if placeholder.id != account.id {
                    self.directory.unlink(&placeholder.id, &device.id).await?;
                }
            }
            devices_linked += 1;
        }

        if let Some(placeholder) = &placeholder {
            if placeholder.id != account.id {
                let remaining = self.directory.devices_for(&placeholder.id).await?;
                if remaining.is_empty() {
                    self.accounts.delete_account(&placeholder.id).await?;
                    tracing::info!(
                        placeholder_id = %placeholder.id,
                        "deleted empty placeholder after merge"
                    );
                }
            }
        }

        let owned = self.directory.devices_for(&account.id).await?;
        if owned.is_empty() {
            // The account linkage itself is persisted; the page asks the
            // user to set a fireplace up and retry.
            return Err(LinkingError::NoDevices);
        }

        tracing::info!(
            account_id = %account.id,
            devices_linked,
            "account linking completed"
        );
        Ok(LinkSummary {
            account_id: account.id,
            account_name: account.name,
            devices_linked,
            identity_created: resolution.identity_created,
        })
    }

    /// Resolve the final account for an external identity.
    ///
    /// Idempotent under repeated linking: an existing identity always wins
    /// and only has its profile fields refreshed; otherwise a placeholder is
    /// promoted in place; only as a last resort is a new account created.
    async fn resolve_account(
        &self,
        profile: &ExternalProfile,
        grant: &TokenGrant,
        placeholder: Option<&Account>,
    ) -> Result<Resolution, LinkingError> {
        if let Some(mut identity) = self
            .accounts
            .find_identity_by_external_id(&profile.user_id)
            .await?
        {
            apply_profile(&mut identity, profile, grant);
            self.accounts.upsert_identity(identity.clone()).await?;
            let account = self
                .accounts
                .get_account(&identity.account_id)
                .await?
                .ok_or_else(|| {
                    LinkingError::AccountCreate(format!(
                        "identity {} references a missing account",
                        identity.id
                    ))
                })?;
            return Ok(Resolution {
                account,
                identity_created: false,
            });
        }

        let account = match placeholder {
            Some(placeholder) => {
                let mut promoted = placeholder.clone();
                promoted.name = display_name(profile);
                self.accounts
                    .update_account(promoted.clone())
                    .await
                    .map_err(|e| LinkingError::AccountCreate(e.to_string()))?;
                tracing::info!(account_id = %promoted.id, "promoted placeholder account");
                promoted
            }
            None => {
                let account = Account::new(display_name(profile));
                self.accounts
                    .insert_account(account.clone())
                    .await
                    .map_err(|e| LinkingError::AccountCreate(e.to_string()))?;
                account
            }
        };

        let mut identity = LinkedIdentity::new(&account.id, &profile.user_id);
        apply_profile(&mut identity, profile, grant);
        self.accounts.upsert_identity(identity).await?;

        Ok(Resolution {
            account,
            identity_created: true,
        })
    }
}

fn apply_profile(identity: &mut LinkedIdentity, profile: &ExternalProfile, grant: &TokenGrant) {
    identity.email = profile.email.clone();
    identity.postal_code = profile.postal_code.clone();
    identity.access_token = Some(grant.access_token.clone());
    identity.refresh_token = grant.refresh_token.clone();
}

fn display_name(profile: &ExternalProfile) -> String {
    profile
        .name
        .clone()
        .or_else(|| profile.email.clone())
        .unwrap_or_else(|| "Fireplace owner".to_string())
}

fn exchange_error(err: IdentityError) -> LinkingError {
    match err {
        IdentityError::Provider { code, description } => {
            LinkingError::Provider { code, description }
        }
        other => LinkingError::CodeExchange(other.to_string()),
    }
}
