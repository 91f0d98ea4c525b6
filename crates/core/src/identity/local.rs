//! In-process identity service
//!
//! Holds accounts in memory with salted password hashes and a single current
//! session, the way one browser tab sees the identity provider.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::IdentityService;
use crate::model::Principal;
use crate::validation::{is_email, MIN_PASSWORD_LEN};
use crate::{Error, Result};

/// A recovery mail that would have been sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryMail {
    pub email: String,
    pub user_id: String,
    pub secret: String,
    /// Link with `userId` and `secret` appended as query parameters
    pub link: String,
}

#[derive(Debug, Clone)]
struct Account {
    principal: Principal,
    password_hash: String,
}

/// How long a recovery secret stays redeemable.
pub const RECOVERY_TTL: Duration = Duration::hours(1);

#[derive(Debug, Clone)]
struct Recovery {
    user_id: String,
    secret: String,
    created_at: DateTime<Utc>,
}

impl Recovery {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > RECOVERY_TTL
    }
}

#[derive(Debug, Default)]
struct IdentityState {
    accounts: HashMap<String, Account>,
    session: Option<String>,
    recoveries: Vec<Recovery>,
    outbox: Vec<RecoveryMail>,
}

#[derive(Clone, Default)]
pub struct LocalIdentityService {
    state: Arc<RwLock<IdentityState>>,
}

impl LocalIdentityService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace an account's labels. Privileged, not part of the client API.
    pub async fn set_labels(
        &self,
        user_id: &str,
        labels: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Principal> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| Error::NotFound(format!("User {} not found", user_id)))?;
        account.principal.labels = labels.into_iter().map(Into::into).collect::<BTreeSet<_>>();
        Ok(account.principal.clone())
    }

    /// Drain the recovery mails sent so far.
    pub async fn take_outbox(&self) -> Vec<RecoveryMail> {
        std::mem::take(&mut self.state.write().await.outbox)
    }

    async fn with_current<F>(&self, apply: F) -> Result<Principal>
    where
        F: FnOnce(&mut Account) -> Result<()>,
    {
        let mut state = self.state.write().await;
        let user_id = state
            .session
            .clone()
            .ok_or_else(|| Error::Unauthorized("No active session".to_string()))?;
        let account = state
            .accounts
            .get_mut(&user_id)
            .ok_or_else(|| Error::Unauthorized("No active session".to_string()))?;
        apply(account)?;
        Ok(account.principal.clone())
    }
}

#[async_trait]
impl IdentityService for LocalIdentityService {
    async fn create_account(&self, email: &str, password: &str, name: &str) -> Result<Principal> {
        let email = normalize_email(email)?;
        validate_password(password)?;

        let mut state = self.state.write().await;
        if state
            .accounts
            .values()
            .any(|account| account.principal.email == email)
        {
            return Err(Error::Conflict(
                "A user with the same email already exists".to_string(),
            ));
        }

        let principal = Principal::new(Uuid::new_v4().simple().to_string(), name.trim(), email);
        state.accounts.insert(
            principal.id.clone(),
            Account {
                principal: principal.clone(),
                password_hash: hash_password(password),
            },
        );
        info!("Registered account {}", principal.id);
        Ok(principal)
    }

    async fn create_session(&self, email: &str, password: &str) -> Result<Principal> {
        let email = normalize_email(email)?;
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .values()
            .find(|account| account.principal.email == email)
            .filter(|account| verify_password(&account.password_hash, password))
            .cloned()
            .ok_or_else(|| Error::Unauthorized("Invalid credentials".to_string()))?;
        state.session = Some(account.principal.id.clone());
        Ok(account.principal)
    }

    async fn delete_session(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .session
            .take()
            .map(|_| ())
            .ok_or_else(|| Error::Unauthorized("No active session".to_string()))
    }

    async fn current_account(&self) -> Result<Option<Principal>> {
        let state = self.state.read().await;
        Ok(state
            .session
            .as_ref()
            .and_then(|id| state.accounts.get(id))
            .map(|account| account.principal.clone()))
    }

    async fn create_recovery(&self, email: &str, redirect_url: &str) -> Result<()> {
        let email = normalize_email(email)?;
        let mut state = self.state.write().await;
        let user_id = state
            .accounts
            .values()
            .find(|account| account.principal.email == email)
            .map(|account| account.principal.id.clone())
            .ok_or_else(|| Error::NotFound("User with the requested email not found".to_string()))?;

        let now = Utc::now();
        state.recoveries.retain(|r| !r.is_expired(now));

        let secret = generate_secret();
        let separator = if redirect_url.contains('?') { '&' } else { '?' };
        let link = format!("{}{}userId={}&secret={}", redirect_url, separator, user_id, secret);
        state.recoveries.push(Recovery {
            user_id: user_id.clone(),
            secret: secret.clone(),
            created_at: now,
        });
        state.outbox.push(RecoveryMail {
            email,
            user_id,
            secret,
            link,
        });
        Ok(())
    }

    async fn update_recovery(&self, user_id: &str, secret: &str, password: &str) -> Result<()> {
        validate_password(password)?;
        let mut state = self.state.write().await;
        let now = Utc::now();
        state.recoveries.retain(|r| !r.is_expired(now));
        let position = state
            .recoveries
            .iter()
            .position(|r| r.user_id == user_id && r.secret == secret)
            .ok_or_else(|| Error::Unauthorized("Invalid or expired recovery token".to_string()))?;
        let recovery = state.recoveries.remove(position);

        let account = state
            .accounts
            .get_mut(&recovery.user_id)
            .ok_or_else(|| Error::NotFound(format!("User {} not found", recovery.user_id)))?;
        account.password_hash = hash_password(password);
        info!(
            "Password recovered for {} (token issued {})",
            recovery.user_id, recovery.created_at
        );
        Ok(())
    }

    async fn update_name(&self, name: &str) -> Result<Principal> {
        let name = name.trim().to_string();
        self.with_current(|account| {
            account.principal.name = name;
            Ok(())
        })
        .await
    }

    async fn update_email(&self, email: &str, password: &str) -> Result<Principal> {
        let email = normalize_email(email)?;
        {
            let state = self.state.read().await;
            if state
                .accounts
                .values()
                .any(|account| account.principal.email == email && Some(&account.principal.id) != state.session.as_ref())
            {
                return Err(Error::Conflict(
                    "A user with the same email already exists".to_string(),
                ));
            }
        }
        self.with_current(|account| {
            if !verify_password(&account.password_hash, password) {
                return Err(Error::Unauthorized("Invalid credentials".to_string()));
            }
            account.principal.email = email;
            Ok(())
        })
        .await
    }

    async fn update_password(&self, new_password: &str, old_password: &str) -> Result<Principal> {
        validate_password(new_password)?;
        self.with_current(|account| {
            if !verify_password(&account.password_hash, old_password) {
                return Err(Error::Unauthorized("Invalid credentials".to_string()));
            }
            account.password_hash = hash_password(new_password);
            Ok(())
        })
        .await
    }
}

fn normalize_email(email: &str) -> Result<String> {
    let normalized = email.trim().to_lowercase();
    if !is_email(&normalized) {
        return Err(Error::InvalidInput("Invalid email".to_string()));
    }
    Ok(normalized)
}

fn validate_password(password: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(Error::InvalidInput(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}

fn generate_secret() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_password(password: &str) -> String {
    let mut salt = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();

    format!(
        "v1${}${}",
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(digest)
    )
}

fn verify_password(stored_hash: &str, password: &str) -> bool {
    let mut parts = stored_hash.split('$');
    let (Some("v1"), Some(encoded_salt), Some(encoded_digest)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (
        URL_SAFE_NO_PAD.decode(encoded_salt),
        URL_SAFE_NO_PAD.decode(encoded_digest),
    ) else {
        return false;
    };

    let mut hasher = Sha256::new();
    hasher.update(&salt);
    hasher.update(password.as_bytes());
    expected == hasher.finalize().as_slice()
}
