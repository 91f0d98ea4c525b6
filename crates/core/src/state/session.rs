//! Session container and route authorization

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::identity::IdentityService;
use crate::model::{Principal, ADMIN_LABEL};
use crate::validation::{is_email, FieldErrors, PasswordResetForm, ProfileUpdate, RegistrationForm};
use crate::{Error, Result};

/// Routes reachable without a session.
pub const PUBLIC_ROUTES: [&str; 7] = [
    "/",
    "/login",
    "/register",
    "/forgot-password",
    "/reset-password",
    "/welcome",
    "/unauthorized",
];

pub const HOME_ROUTE: &str = "/";
pub const LOGIN_ROUTE: &str = "/login";
pub const UNAUTHORIZED_ROUTE: &str = "/unauthorized";

const AUTH_CHECK_FAILED: &str = "Failed to verify authentication status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    /// The session check has not finished yet
    Pending,
    Redirect(&'static str),
}

pub fn is_public_route(path: &str) -> bool {
    PUBLIC_ROUTES.contains(&path)
}

/// Where a visitor on `path` should go, given who is signed in.
pub fn route_decision(principal: Option<&Principal>, path: &str) -> RouteDecision {
    let public = is_public_route(path);
    match principal {
        None if !public => RouteDecision::Redirect(LOGIN_ROUTE),
        Some(_) if public && path != HOME_ROUTE => RouteDecision::Redirect(HOME_ROUTE),
        _ => RouteDecision::Allow,
    }
}

/// A result plus the route the caller should navigate to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect<T> {
    pub value: T,
    pub to: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub loading: bool,
    pub error: Option<String>,
}

/// `userId` and `secret` carried by a password recovery link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryToken {
    pub user_id: String,
    pub secret: String,
}

impl RecoveryToken {
    /// Parse the query string of a recovery link, with or without the
    /// leading `?`. Both parameters must be present and non-empty.
    pub fn from_query(query: &str) -> Option<Self> {
        let mut user_id = None;
        let mut secret = None;
        for pair in query.trim_start_matches('?').split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let slot = match key {
                "userId" => &mut user_id,
                "secret" => &mut secret,
                _ => continue,
            };
            *slot = urlencoding::decode(&value.replace('+', " "))
                .ok()
                .map(|v| v.into_owned());
        }
        Some(Self {
            user_id: user_id.filter(|v| !v.is_empty())?,
            secret: secret.filter(|v| !v.is_empty())?,
        })
    }

    pub fn reset_form(&self, password: impl Into<String>, confirm_password: impl Into<String>) -> PasswordResetForm {
        PasswordResetForm {
            user_id: self.user_id.clone(),
            secret: self.secret.clone(),
            password: password.into(),
            confirm_password: confirm_password.into(),
        }
    }
}

struct SessionInner {
    principal: Option<Principal>,
    loading: bool,
    error: Option<String>,
}

/// The signed-in principal and the account operations around it.
pub struct SessionState {
    identity: Arc<dyn IdentityService>,
    recovery_url: String,
    inner: RwLock<SessionInner>,
}

impl SessionState {
    /// A session that is still loading until the first [`refresh`](Self::refresh).
    pub fn new(identity: Arc<dyn IdentityService>, recovery_url: impl Into<String>) -> Self {
        Self {
            identity,
            recovery_url: recovery_url.into(),
            inner: RwLock::new(SessionInner {
                principal: None,
                loading: true,
                error: None,
            }),
        }
    }

    pub async fn principal(&self) -> Option<Principal> {
        self.inner.read().await.principal.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        let inner = self.inner.read().await;
        SessionStatus {
            loading: inner.loading,
            error: inner.error.clone(),
        }
    }

    pub async fn has_role(&self, role: &str) -> bool {
        self.inner
            .read()
            .await
            .principal
            .as_ref()
            .is_some_and(|principal| principal.has_label(role))
    }

    pub async fn is_admin(&self) -> bool {
        self.has_role(ADMIN_LABEL).await
    }

    /// Re-check the session and decide what to do with a visitor on `path`.
    ///
    /// A failed check counts as signed out.
    pub async fn refresh(&self, path: &str) -> RouteDecision {
        self.begin().await;
        let result = self.identity.current_account().await;

        let mut inner = self.inner.write().await;
        match result {
            Ok(principal) => inner.principal = principal,
            Err(err) => {
                warn!("Auth status check failed: {}", err);
                inner.principal = None;
                inner.error = Some(AUTH_CHECK_FAILED.to_string());
            }
        }
        inner.loading = false;
        route_decision(inner.principal.as_ref(), path)
    }

    /// Gate for a role-protected view.
    pub async fn require_role(&self, role: &str) -> RouteDecision {
        let inner = self.inner.read().await;
        if inner.loading {
            return RouteDecision::Pending;
        }
        match &inner.principal {
            Some(principal) if principal.has_label(role) => RouteDecision::Allow,
            _ => RouteDecision::Redirect(UNAUTHORIZED_ROUTE),
        }
    }

    /// Create an account and sign straight into it.
    pub async fn register(&self, form: &RegistrationForm) -> Result<Redirect<Principal>> {
        form.validate()?;
        let operation = async {
            self.identity
                .create_account(&form.email, &form.password, &form.name)
                .await?;
            self.identity.create_session(&form.email, &form.password).await
        };
        let principal = self
            .track(operation, "Registration failed. Please try again.")
            .await?;
        info!("Registered and signed in {}", principal.id);
        self.set_principal(Some(principal.clone())).await;
        Ok(Redirect {
            value: principal,
            to: HOME_ROUTE,
        })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Redirect<Principal>> {
        let principal = self
            .track(
                self.identity.create_session(email, password),
                "Login failed. Please check your credentials.",
            )
            .await?;
        self.set_principal(Some(principal.clone())).await;
        Ok(Redirect {
            value: principal,
            to: HOME_ROUTE,
        })
    }

    pub async fn logout(&self) -> Result<Redirect<()>> {
        self.track(self.identity.delete_session(), "Logout failed. Please try again.")
            .await?;
        self.set_principal(None).await;
        Ok(Redirect {
            value: (),
            to: LOGIN_ROUTE,
        })
    }

    /// Send a recovery mail linking back to the reset page.
    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        let email = email.trim();
        let mut errors = FieldErrors::new();
        if email.is_empty() {
            errors.add("email", "Email is required");
        } else if !is_email(email) {
            errors.add("email", "Email is invalid");
        }
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        self.track(
            self.identity.create_recovery(email, &self.recovery_url),
            "Failed to send reset instructions. Please try again.",
        )
        .await
    }

    pub async fn reset_password(&self, form: &PasswordResetForm) -> Result<Redirect<()>> {
        form.validate()?;
        self.track(
            self.identity
                .update_recovery(&form.user_id, &form.secret, &form.password),
            "Failed to reset password. Please try again.",
        )
        .await?;
        Ok(Redirect {
            value: (),
            to: LOGIN_ROUTE,
        })
    }

    /// Apply the present sections of `update` in order (name, email,
    /// password), then reload the account.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Principal> {
        update.validate()?;
        let current_password = update.current_password.as_deref().unwrap_or_default();
        let operation = async {
            if let Some(name) = &update.name {
                self.identity.update_name(name.trim()).await?;
            }
            if let Some(email) = &update.email {
                self.identity.update_email(email.trim(), current_password).await?;
            }
            if let Some(new_password) = &update.new_password {
                self.identity
                    .update_password(new_password, current_password)
                    .await?;
            }
            self.identity
                .current_account()
                .await?
                .ok_or_else(|| Error::Unauthorized("No active session".to_string()))
        };
        let principal = self
            .track(operation, "Failed to update profile. Please try again.")
            .await?;
        self.set_principal(Some(principal.clone())).await;
        Ok(principal)
    }

    async fn set_principal(&self, principal: Option<Principal>) {
        self.inner.write().await.principal = principal;
    }

    async fn begin(&self) {
        let mut inner = self.inner.write().await;
        inner.loading = true;
        inner.error = None;
    }

    async fn track<R>(
        &self,
        operation: impl std::future::Future<Output = Result<R>>,
        fallback: &str,
    ) -> Result<R> {
        self.begin().await;
        let result = operation.await;
        let mut inner = self.inner.write().await;
        if let Err(err) = &result {
            warn!("{} ({})", fallback, err);
            let message = err.user_message();
            inner.error = Some(if message.is_empty() {
                fallback.to_string()
            } else {
                message
            });
        }
        inner.loading = false;
        result
    }
}
