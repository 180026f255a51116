//! Multi-tenant scoping shared by every persisted entity.

use serde::{Deserialize, Serialize};

/// `(app_id, user_organization_id?)`. `user_organization_id = None` denotes
/// a platform-scoped record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantScope {
    pub app_id: String,
    pub user_organization_id: Option<String>,
}

impl TenantScope {
    pub fn app(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            user_organization_id: None,
        }
    }

    pub fn org(app_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            user_organization_id: Some(org_id.into()),
        }
    }

    pub fn is_platform_scoped(&self) -> bool {
        self.user_organization_id.is_none()
    }

    /// Stable string used as a key prefix (rate-limit keys, cache keys).
    pub fn key_prefix(&self) -> String {
        match &self.user_organization_id {
            Some(org) => format!("{}:{}", self.app_id, org),
            None => self.app_id.clone(),
        }
    }
}
