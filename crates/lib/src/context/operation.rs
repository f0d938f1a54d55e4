//! One authenticated batch of API calls.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Context, ContextError};
use crate::Result;
use crate::account::Account;

/// A single API call within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub api: String,
    #[serde(default)]
    pub body: String,
}

impl Request {
    pub fn new(api: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            api: api.into(),
            body: body.into(),
        }
    }
}

/// State shared by the requests of one batch.
///
/// The current account starts as the authenticated caller and is replaced
/// when an `impersonate` privilege runs; later requests in the batch then
/// resolve against the impersonated account's privileges.
#[derive(Debug)]
pub struct OperationContext<'a> {
    context: &'a Context,
    account: Arc<Account>,
}

impl<'a> OperationContext<'a> {
    pub fn new(context: &'a Context, account: Arc<Account>) -> Self {
        Self { context, account }
    }

    pub fn context(&self) -> &'a Context {
        self.context
    }

    /// The account requests currently run as.
    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }

    pub fn set_account(&mut self, account: Arc<Account>) {
        self.account = account;
    }

    /// Run one request with the current account's privilege for its API.
    pub fn invoke(&mut self, request: &Request) -> Result<String> {
        let account = Arc::clone(&self.account);
        let Some(privilege) = account.privilege(&request.api) else {
            tracing::warn!(
                principal = %account.principal(),
                api = %request.api,
                "operation forbidden"
            );
            return Err(ContextError::OperationForbidden {
                principal: account.principal().to_string(),
                api: request.api.clone(),
            }
            .into());
        };

        tracing::info!(
            principal = %account.principal(),
            api = %request.api,
            kind = %privilege.kind(),
            "operation granted"
        );
        privilege.invoke(self, &request.body)
    }
}
