//! Authorization gate
//!
//! Consulted exactly once, before a producer is ever invoked. A gate that
//! errors counts as a denial.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::error::{RiverError, RiverResult};

/// What the transport knows about the caller
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Credential presented by the caller, e.g. an application password
    pub credential: Option<String>,
    /// Free-form request attributes (headers, route parameters, ...)
    pub attributes: HashMap<String, String>,
    pub remote_addr: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

/// Gate decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub authorized: bool,
    pub reason: Option<String>,
}

impl Authorization {
    pub fn allow() -> Self {
        Self {
            authorized: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            authorized: false,
            reason: Some(reason.into()),
        }
    }
}

/// Yes/no decision on whether a stream may start
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    async fn check_authorization(&self, context: &RequestContext) -> RiverResult<Authorization>;
}

/// Consult a gate and turn anything but an explicit allow into
/// `AuthorizationDenied`.
pub async fn authorize(gate: &dyn AuthorizationGate, context: &RequestContext) -> RiverResult<()> {
    match gate.check_authorization(context).await {
        Ok(decision) if decision.authorized => Ok(()),
        Ok(decision) => Err(RiverError::authorization_denied(
            decision
                .reason
                .unwrap_or_else(|| "request was not authorized".to_string()),
        )),
        Err(e) => {
            warn!(error = %e, "Authorization check failed, denying");
            Err(RiverError::authorization_denied(format!(
                "authorization check failed: {}",
                e
            )))
        }
    }
}

/// Lets every request through
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AuthorizationGate for AllowAll {
    async fn check_authorization(&self, _context: &RequestContext) -> RiverResult<Authorization> {
        Ok(Authorization::allow())
    }
}

/// Refuses every request
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl AuthorizationGate for DenyAll {
    async fn check_authorization(&self, _context: &RequestContext) -> RiverResult<Authorization> {
        Ok(Authorization::deny("all requests are denied"))
    }
}

type GateFn = dyn Fn(&RequestContext) -> RiverResult<Authorization> + Send + Sync;

/// Gate backed by a closure
#[derive(Clone)]
pub struct FnGate {
    check: Arc<GateFn>,
}

impl FnGate {
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&RequestContext) -> RiverResult<Authorization> + Send + Sync + 'static,
    {
        Self {
            check: Arc::new(check),
        }
    }
}

impl fmt::Debug for FnGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnGate").finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthorizationGate for FnGate {
    async fn check_authorization(&self, context: &RequestContext) -> RiverResult<Authorization> {
        (self.check)(context)
    }
}

/// Compares the presented credential with a configured application secret
#[derive(Clone)]
pub struct SharedSecretGate {
    secret: String,
}

impl SharedSecretGate {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for SharedSecretGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecretGate")
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl AuthorizationGate for SharedSecretGate {
    async fn check_authorization(&self, context: &RequestContext) -> RiverResult<Authorization> {
        match context.credential.as_deref() {
            None => Ok(Authorization::deny("no credential presented")),
            Some(presented) if constant_time_eq(presented.as_bytes(), self.secret.as_bytes()) => {
                Ok(Authorization::allow())
            }
            Some(_) => Ok(Authorization::deny("credential does not match")),
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
