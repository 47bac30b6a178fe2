//! Role-checked request context.

use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::models::AnalysisRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("admin access is disabled: ADMIN_PASSWORD is not configured")]
    AdminDisabled,

    #[error("invalid admin password")]
    InvalidAdminPassword,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("unauthorized access")]
    Unauthorized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Anonymous,
    Patient { email: String },
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    role: Role,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self {
            role: Role::Anonymous,
        }
    }

    /// Callers construct this only after the credential store verified the
    /// password.
    pub fn patient(email: impl Into<String>) -> Self {
        Self {
            role: Role::Patient {
                email: email.into(),
            },
        }
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn require_admin(&self) -> Result<(), AccessError> {
        match self.role {
            Role::Admin => Ok(()),
            _ => Err(AccessError::Unauthorized),
        }
    }

    pub fn require_patient(&self) -> Result<&str, AccessError> {
        match &self.role {
            Role::Patient { email } => Ok(email),
            _ => Err(AccessError::Unauthorized),
        }
    }

    /// Admins see every record; patients only their own.
    pub fn can_view(&self, record: &AnalysisRecord) -> bool {
        match &self.role {
            Role::Admin => true,
            Role::Patient { email } => record.user_email == *email,
            Role::Anonymous => false,
        }
    }

    pub fn require_view(&self, record: &AnalysisRecord) -> Result<(), AccessError> {
        if self.can_view(record) {
            Ok(())
        } else {
            Err(AccessError::Unauthorized)
        }
    }
}

/// Grants the admin role against a configured secret. Without a secret every
/// attempt fails.
pub struct AdminGate {
    secret: Option<String>,
}

impl AdminGate {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    pub fn authenticate(&self, candidate: &str) -> Result<RequestContext, AccessError> {
        let secret = self.secret.as_deref().ok_or(AccessError::AdminDisabled)?;
        if bool::from(secret.as_bytes().ct_eq(candidate.as_bytes())) {
            Ok(RequestContext { role: Role::Admin })
        } else {
            Err(AccessError::InvalidAdminPassword)
        }
    }
}
