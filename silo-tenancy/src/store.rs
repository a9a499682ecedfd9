//! Control-plane store
//!
//! The shared database holding tenant metadata, membership and
//! entitlements. [`crate::pg::PgControlPlaneStore`] is the production
//! implementation; [`MemoryStore`] backs tests.

use crate::tenant::{NewTenant, Tenant, TenantProfile, TenantStatus, UserTenant};
use crate::{TenantError, TenantResult};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Role slug given to tenant owners.
pub const OWNER_ROLE: &str = "owner";

/// Read and write access to tenant metadata.
#[async_trait]
pub trait ControlPlaneStore: Send + Sync {
    /// Find a tenant by its public routing code.
    async fn find_by_routing_code(&self, routing_code: &str) -> TenantResult<Option<Tenant>>;

    async fn find_by_id(&self, tenant_id: Uuid) -> TenantResult<Option<Tenant>>;

    /// Whether `user_id` has a membership row in the tenant.
    async fn is_member(&self, user_id: Uuid, tenant_id: Uuid) -> TenantResult<bool>;

    /// Feature slugs granted by the tenant's plan.
    async fn tenant_features(&self, tenant_id: Uuid) -> TenantResult<BTreeSet<String>>;

    /// Permission slugs granted by the member's role.
    async fn member_permissions(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> TenantResult<BTreeSet<String>>;

    /// Every permission slug that exists.
    async fn all_permissions(&self) -> TenantResult<BTreeSet<String>>;

    /// Role slug of a user within a tenant. The owner is always `owner`.
    async fn member_role(&self, user_id: Uuid, tenant_id: Uuid) -> TenantResult<Option<String>>;

    /// Active tenants the user belongs to, newest first.
    async fn list_user_tenants(&self, user_id: Uuid) -> TenantResult<Vec<UserTenant>>;

    /// Set the status and bump `updated_at`. Returns `false` if no such tenant.
    async fn update_status(&self, tenant_id: Uuid, status: TenantStatus) -> TenantResult<bool>;

    async fn subdomain_exists(&self, subdomain: &str) -> TenantResult<bool>;

    async fn routing_code_exists(&self, routing_code: &str) -> TenantResult<bool>;

    /// Insert tenant, profile and owner membership in one transaction.
    async fn create_tenant(&self, new: &NewTenant) -> TenantResult<Tenant>;

    async fn find_profile(&self, tenant_id: Uuid) -> TenantResult<Option<TenantProfile>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    tenants: HashMap<Uuid, Tenant>,
    profiles: HashMap<Uuid, TenantProfile>,
    members: HashMap<(Uuid, Uuid), String>,
    plan_features: HashMap<Uuid, BTreeSet<String>>,
    role_permissions: HashMap<String, BTreeSet<String>>,
    permissions: BTreeSet<String>,
}

/// In-memory control plane for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    lookups: AtomicUsize,
    unavailable: AtomicBool,
    delay: RwLock<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tenant(&self, tenant: Tenant) {
        self.state.write().tenants.insert(tenant.id, tenant);
    }

    /// Add a membership with the given role slug.
    pub fn add_member(&self, tenant_id: Uuid, user_id: Uuid, role: impl Into<String>) {
        self.state
            .write()
            .members
            .insert((user_id, tenant_id), role.into());
    }

    pub fn set_plan_features<I, S>(&self, plan_id: Uuid, features: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let features = features.into_iter().map(Into::into).collect();
        self.state.write().plan_features.insert(plan_id, features);
    }

    /// Grant permissions to a role. Also registers them as existing permissions.
    pub fn set_role_permissions<I, S>(&self, role: impl Into<String>, permissions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let permissions: BTreeSet<String> = permissions.into_iter().map(Into::into).collect();
        let mut state = self.state.write();
        state.permissions.extend(permissions.iter().cloned());
        state.role_permissions.insert(role.into(), permissions);
    }

    /// Register permissions not attached to any role.
    pub fn add_permissions<I, S>(&self, permissions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .write()
            .permissions
            .extend(permissions.into_iter().map(Into::into));
    }

    /// Routing-code lookups served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Make every call fail with a store error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every call, for timeout tests.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = delay;
    }

    pub fn status_of(&self, tenant_id: Uuid) -> Option<TenantStatus> {
        self.state.read().tenants.get(&tenant_id).map(|t| t.status)
    }

    async fn enter(&self) -> TenantResult<()> {
        let delay = *self.delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TenantError::Store("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlaneStore for MemoryStore {
    async fn find_by_routing_code(&self, routing_code: &str) -> TenantResult<Option<Tenant>> {
        self.enter().await?;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .state
            .read()
            .tenants
            .values()
            .find(|t| t.routing_code == routing_code)
            .cloned())
    }

    async fn find_by_id(&self, tenant_id: Uuid) -> TenantResult<Option<Tenant>> {
        self.enter().await?;
        Ok(self.state.read().tenants.get(&tenant_id).cloned())
    }

    async fn is_member(&self, user_id: Uuid, tenant_id: Uuid) -> TenantResult<bool> {
        self.enter().await?;
        Ok(self.state.read().members.contains_key(&(user_id, tenant_id)))
    }

    async fn tenant_features(&self, tenant_id: Uuid) -> TenantResult<BTreeSet<String>> {
        self.enter().await?;
        let state = self.state.read();
        Ok(state
            .tenants
            .get(&tenant_id)
            .and_then(|t| t.plan_id)
            .and_then(|plan| state.plan_features.get(&plan).cloned())
            .unwrap_or_default())
    }

    async fn member_permissions(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> TenantResult<BTreeSet<String>> {
        self.enter().await?;
        let state = self.state.read();
        Ok(state
            .members
            .get(&(user_id, tenant_id))
            .and_then(|role| state.role_permissions.get(role).cloned())
            .unwrap_or_default())
    }

    async fn all_permissions(&self) -> TenantResult<BTreeSet<String>> {
        self.enter().await?;
        Ok(self.state.read().permissions.clone())
    }

    async fn member_role(&self, user_id: Uuid, tenant_id: Uuid) -> TenantResult<Option<String>> {
        self.enter().await?;
        let state = self.state.read();
        if state
            .tenants
            .get(&tenant_id)
            .is_some_and(|t| t.is_owned_by(user_id))
        {
            return Ok(Some(OWNER_ROLE.to_string()));
        }
        Ok(state.members.get(&(user_id, tenant_id)).cloned())
    }

    async fn list_user_tenants(&self, user_id: Uuid) -> TenantResult<Vec<UserTenant>> {
        self.enter().await?;
        let state = self.state.read();
        let mut tenants: Vec<&Tenant> = state
            .members
            .keys()
            .filter(|(user, _)| *user == user_id)
            .filter_map(|(_, tenant_id)| state.tenants.get(tenant_id))
            .filter(|t| t.is_active())
            .collect();
        tenants.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(tenants
            .into_iter()
            .map(|t| UserTenant {
                id: t.id,
                routing_code: t.routing_code.clone(),
                name: state
                    .profiles
                    .get(&t.id)
                    .and_then(|p| p.display_name())
                    .unwrap_or_default()
                    .to_string(),
                role: state
                    .members
                    .get(&(user_id, t.id))
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn update_status(&self, tenant_id: Uuid, status: TenantStatus) -> TenantResult<bool> {
        self.enter().await?;
        let mut state = self.state.write();
        match state.tenants.get_mut(&tenant_id) {
            Some(tenant) => {
                tenant.status = status;
                tenant.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn subdomain_exists(&self, subdomain: &str) -> TenantResult<bool> {
        self.enter().await?;
        Ok(self
            .state
            .read()
            .tenants
            .values()
            .any(|t| t.subdomain.as_deref() == Some(subdomain)))
    }

    async fn routing_code_exists(&self, routing_code: &str) -> TenantResult<bool> {
        self.enter().await?;
        Ok(self
            .state
            .read()
            .tenants
            .values()
            .any(|t| t.routing_code == routing_code))
    }

    async fn create_tenant(&self, new: &NewTenant) -> TenantResult<Tenant> {
        self.enter().await?;
        let tenant = &new.tenant;
        let mut state = self.state.write();

        let clash = state.tenants.values().find_map(|t| {
            if t.routing_code == tenant.routing_code {
                Some("routing code")
            } else if t.database_code == tenant.database_code {
                Some("database code")
            } else if tenant.subdomain.is_some() && t.subdomain == tenant.subdomain {
                Some("subdomain")
            } else {
                None
            }
        });
        if let Some(field) = clash {
            return Err(TenantError::Conflict(format!("{} is already in use", field)));
        }

        state.tenants.insert(tenant.id, tenant.clone());
        state.profiles.insert(tenant.id, new.profile.clone());
        if let Some(owner) = tenant.owner_id {
            state.members.insert((owner, tenant.id), new.owner_role.clone());
        }
        Ok(tenant.clone())
    }

    async fn find_profile(&self, tenant_id: Uuid) -> TenantResult<Option<TenantProfile>> {
        self.enter().await?;
        Ok(self.state.read().profiles.get(&tenant_id).cloned())
    }
}
