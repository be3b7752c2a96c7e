// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Credentials shared by the stream source and the push notifiers.

use crate::types::BoxError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Supplies short-lived bearer tokens (e.g. an OIDC client).
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<String, BoxError>;
}

#[derive(Clone)]
pub enum Credentials {
    ApiKey { id: String, secret: String },
    TokenSource(Arc<dyn TokenSource>),
}

/// Concrete authorization presented on a single request or connection.
#[derive(Clone, PartialEq, Eq)]
pub enum Authorization {
    ApiKey { id: String, secret: String },
    Bearer(String),
}

impl Credentials {
    pub fn api_key(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Credentials::ApiKey {
            id: id.into(),
            secret: secret.into(),
        }
    }

    pub async fn authorization(&self) -> Result<Authorization, BoxError> {
        match self {
            Credentials::ApiKey { id, secret } => Ok(Authorization::ApiKey {
                id: id.clone(),
                secret: secret.clone(),
            }),
            Credentials::TokenSource(source) => Ok(Authorization::Bearer(source.fetch_token().await?)),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ApiKey { id, .. } => f
                .debug_struct("ApiKey")
                .field("id", id)
                .field("secret", &"<redacted>")
                .finish(),
            Credentials::TokenSource(_) => f.write_str("TokenSource(..)"),
        }
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authorization::ApiKey { id, .. } => write!(f, "ApiKey({id})"),
            Authorization::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}
