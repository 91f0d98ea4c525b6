//! Form validation
//!
//! Every form is checked before any remote call is attempted. Failures are
//! reported per field so a caller can place messages next to inputs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{ApplicationInput, ServerGroupInput, ServerInput};
use crate::{Error, Result};

pub const MIN_PASSWORD_LEN: usize = 8;

/// Field name to message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors(BTreeMap<&'static str, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(field, msg)| (*field, msg.as_str()))
    }

    fn into_result<T>(self, value: T) -> Result<T> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, msg)| format!("{}: {}", field, msg))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Raw server form fields as typed by the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerForm {
    pub name: String,
    pub ip_address: String,
    pub dns: String,
    pub username: String,
    pub group_id: String,
}

impl ServerForm {
    /// Validate for creation.
    pub fn validate(&self) -> Result<ServerInput> {
        let mut errors = FieldErrors::new();
        if self.name.trim().is_empty() {
            errors.add("name", "Server name is required");
        }
        check_ip_address(&self.ip_address, &mut errors);
        errors.into_result(self.to_input())
    }

    /// Validate for editing, where a username is mandatory.
    pub fn validate_edit(&self) -> Result<ServerInput> {
        let mut errors = match self.validate() {
            Ok(_) => FieldErrors::new(),
            Err(Error::Validation(errors)) => errors,
            Err(other) => return Err(other),
        };
        if self.username.trim().is_empty() {
            errors.add("username", "Username is required");
        }
        errors.into_result(self.to_input())
    }

    fn to_input(&self) -> ServerInput {
        ServerInput {
            name: self.name.trim().to_string(),
            ip_address: self.ip_address.trim().to_string(),
            dns: optional(&self.dns),
            username: optional(&self.username),
            group_id: optional(&self.group_id),
        }
    }
}

/// Raw application form fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationForm {
    pub name: String,
    pub port: String,
    pub description: String,
}

impl ApplicationForm {
    pub fn new(name: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: port.into(),
            description: String::new(),
        }
    }

    pub fn validate(&self) -> Result<ApplicationInput> {
        let mut errors = FieldErrors::new();
        if self.name.trim().is_empty() {
            errors.add("name", "Application name is required");
        }
        let port = self.port.trim();
        let parsed = if port.is_empty() {
            errors.add("port", "Port number is required");
            None
        } else {
            match port.parse::<u32>() {
                Ok(value) if (1..=65535).contains(&value) => Some(value as u16),
                _ => {
                    errors.add("port", "Port must be a number between 1-65535");
                    None
                }
            }
        };
        errors.into_result(ApplicationInput {
            name: self.name.trim().to_string(),
            port: parsed.unwrap_or_default(),
            description: optional(&self.description),
        })
    }
}

/// Raw server group form fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerGroupForm {
    pub name: String,
    pub description: String,
    pub variables: BTreeMap<String, String>,
}

impl ServerGroupForm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a variable
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<ServerGroupInput> {
        let mut errors = FieldErrors::new();
        if self.name.trim().is_empty() {
            errors.add("name", "Group name is required");
        }
        if self.variables.keys().any(|key| key.trim().is_empty()) {
            errors.add("variables", "Variable names cannot be empty");
        }
        errors.into_result(ServerGroupInput {
            name: self.name.trim().to_string(),
            description: optional(&self.description),
            variables: self
                .variables
                .iter()
                .map(|(k, v)| (k.trim().to_string(), v.clone()))
                .collect(),
        })
    }
}

/// Account registration form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegistrationForm {
    pub fn validate(&self) -> Result<()> {
        let mut errors = FieldErrors::new();
        if self.name.trim().is_empty() {
            errors.add("name", "Name is required");
        }
        check_email("email", &self.email, &mut errors);
        check_new_password(
            "password",
            "confirmPassword",
            &self.password,
            &self.confirm_password,
            &mut errors,
        );
        errors.into_result(())
    }
}

/// Password reset form, filled from the recovery link and user input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PasswordResetForm {
    pub user_id: String,
    pub secret: String,
    pub password: String,
    pub confirm_password: String,
}

impl PasswordResetForm {
    pub fn validate(&self) -> Result<()> {
        let mut errors = FieldErrors::new();
        if self.user_id.is_empty() || self.secret.is_empty() {
            errors.add("token", "Invalid or expired password reset link");
        }
        check_new_password(
            "password",
            "confirmPassword",
            &self.password,
            &self.confirm_password,
            &mut errors,
        );
        errors.into_result(())
    }
}

/// Profile changes. Each section is applied only when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
    pub confirm_password: Option<String>,
}

impl ProfileUpdate {
    pub fn validate(&self) -> Result<()> {
        let mut errors = FieldErrors::new();
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                errors.add("name", "Name is required");
            }
        }
        let current = self.current_password.as_deref().unwrap_or_default();
        if let Some(email) = &self.email {
            check_email("email", email, &mut errors);
            if current.is_empty() {
                errors.add("currentPassword", "Current password is required");
            }
        }
        if let Some(new_password) = &self.new_password {
            if current.is_empty() {
                errors.add("currentPassword", "Current password is required");
            }
            check_new_password(
                "newPassword",
                "confirmPassword",
                new_password,
                self.confirm_password.as_deref().unwrap_or_default(),
                &mut errors,
            );
        }
        errors.into_result(())
    }
}

/// Four dot-separated groups of 1-3 digits, each at most 255.
pub fn is_ipv4_address(value: &str) -> bool {
    let octets: Vec<&str> = value.split('.').collect();
    octets.len() == 4
        && octets.iter().all(|octet| {
            !octet.is_empty()
                && octet.len() <= 3
                && octet.bytes().all(|b| b.is_ascii_digit())
                && octet.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
        })
}

/// Loose `local@domain.tld` shape with no whitespace.
pub fn is_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    let Some(dot) = domain.rfind('.') else {
        return false;
    };
    !local.is_empty() && dot > 0 && dot + 1 < domain.len()
}

fn check_ip_address(value: &str, errors: &mut FieldErrors) {
    let value = value.trim();
    if value.is_empty() {
        errors.add("ipAddress", "IP address is required");
    } else if !is_ipv4_address(value) {
        errors.add("ipAddress", "Invalid IP address format");
    }
}

fn check_email(field: &'static str, value: &str, errors: &mut FieldErrors) {
    if value.is_empty() {
        errors.add(field, "Email is required");
    } else if !is_email(value) {
        errors.add(field, "Email is invalid");
    }
}

fn check_new_password(
    field: &'static str,
    confirm_field: &'static str,
    password: &str,
    confirm: &str,
    errors: &mut FieldErrors,
) {
    if password.is_empty() {
        errors.add(field, "Password is required");
    } else if password.len() < MIN_PASSWORD_LEN {
        errors.add(field, "Password must be at least 8 characters");
    }
    if confirm.is_empty() {
        errors.add(confirm_field, "Please confirm your password");
    } else if password != confirm {
        errors.add(confirm_field, "Passwords do not match");
    }
}

fn optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
