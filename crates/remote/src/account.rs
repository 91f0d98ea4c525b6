//! `IdentityService` over the Account API

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::info;

use rack_core::identity::IdentityService;
use rack_core::model::Principal;
use rack_core::{Error, Result};

use crate::client::AppwriteClient;

#[async_trait]
impl IdentityService for AppwriteClient {
    async fn create_account(&self, email: &str, password: &str, name: &str) -> Result<Principal> {
        let request = self.request(Method::POST, "/account")?.json(&json!({
            "userId": "unique()",
            "email": email,
            "password": password,
            "name": name,
        }));
        let principal: Principal = self.send(request, "create account").await?;
        info!("Created account {}", principal.id);
        Ok(principal)
    }

    async fn create_session(&self, email: &str, password: &str) -> Result<Principal> {
        let request = self
            .request(Method::POST, "/account/sessions/email")?
            .json(&json!({ "email": email, "password": password }));
        let _session: Value = self.send(request, "create session").await?;
        self.current_account()
            .await?
            .ok_or_else(|| Error::Unauthorized("Session was not established".to_string()))
    }

    async fn delete_session(&self) -> Result<()> {
        let request = self.request(Method::DELETE, "/account/sessions/current")?;
        self.send_empty(request, "delete session").await
    }

    async fn current_account(&self) -> Result<Option<Principal>> {
        let request = self.request(Method::GET, "/account")?;
        match self.send(request, "get account").await {
            Ok(principal) => Ok(Some(principal)),
            Err(Error::Unauthorized(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create_recovery(&self, email: &str, redirect_url: &str) -> Result<()> {
        let request = self
            .request(Method::POST, "/account/recovery")?
            .json(&json!({ "email": email, "url": redirect_url }));
        self.send_empty(request, "create recovery").await
    }

    async fn update_recovery(&self, user_id: &str, secret: &str, password: &str) -> Result<()> {
        let request = self.request(Method::PUT, "/account/recovery")?.json(&json!({
            "userId": user_id,
            "secret": secret,
            "password": password,
        }));
        self.send_empty(request, "complete recovery").await
    }

    async fn update_name(&self, name: &str) -> Result<Principal> {
        let request = self
            .request(Method::PATCH, "/account/name")?
            .json(&json!({ "name": name }));
        self.send(request, "update name").await
    }

    async fn update_email(&self, email: &str, password: &str) -> Result<Principal> {
        let request = self
            .request(Method::PATCH, "/account/email")?
            .json(&json!({ "email": email, "password": password }));
        self.send(request, "update email").await
    }

    async fn update_password(&self, new_password: &str, old_password: &str) -> Result<Principal> {
        let request = self
            .request(Method::PATCH, "/account/password")?
            .json(&json!({ "password": new_password, "oldPassword": old_password }));
        self.send(request, "update password").await
    }
}
