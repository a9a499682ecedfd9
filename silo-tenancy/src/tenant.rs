//! Tenant model
//!
//! Rows of the control-plane store as seen by the data plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Tenant lifecycle status.
///
/// `provisioning` moves to `active` or `failed` only through the worker.
/// `suspended` is set administratively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Database is being created
    #[default]
    Provisioning,
    /// Serving traffic
    Active,
    /// Blocked by an administrator
    Suspended,
    /// Provisioning failed; needs an operator
    Failed,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(Self::Provisioning),
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown tenant status '{}'", other)),
        }
    }
}

/// Tenant row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    /// Public token carried in request paths.
    pub routing_code: String,
    /// Internal code the physical database name is derived from.
    #[serde(skip_serializing)]
    pub database_code: String,
    pub subdomain: Option<String>,
    pub owner_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// New tenant in `provisioning` status.
    pub fn new(routing_code: impl Into<String>, database_code: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            routing_code: routing_code.into(),
            database_code: database_code.into(),
            subdomain: None,
            owner_id: None,
            plan_id: None,
            status: TenantStatus::Provisioning,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_owner(mut self, owner_id: Uuid) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn with_plan(mut self, plan_id: Uuid) -> Self {
        self.plan_id = Some(plan_id);
        self
    }

    pub fn with_subdomain(mut self, subdomain: impl Into<String>) -> Self {
        self.subdomain = Some(subdomain.into());
        self
    }

    pub fn with_status(mut self, status: TenantStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == Some(user_id)
    }
}

/// Display and company details, one per tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantProfile {
    pub tenant_id: Uuid,
    pub company_name: Option<String>,
    pub is_company: bool,
    pub custom_domain: Option<String>,
    /// Free-form document; `name` holds the display name.
    pub custom_settings: serde_json::Value,
}

impl TenantProfile {
    pub fn display_name(&self) -> Option<&str> {
        self.custom_settings.get("name").and_then(|v| v.as_str())
    }
}

/// A tenant as listed for one of its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTenant {
    pub id: Uuid,
    pub routing_code: String,
    pub name: String,
    pub role: String,
}

/// Everything written atomically when a tenant is registered.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTenant {
    pub tenant: Tenant,
    pub profile: TenantProfile,
    /// Role slug given to the owner's membership row.
    pub owner_role: String,
}
