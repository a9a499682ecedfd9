//! Tenant registration
//!
//! Writes the tenant in `provisioning` status and hands the physical work
//! to the provisioning worker through the queue.

use crate::cache::RoutingCache;
use crate::codes::{generate_routing_code, normalize_slug, validate_routing_code};
use crate::store::{ControlPlaneStore, OWNER_ROLE};
use crate::tenant::{NewTenant, Tenant, TenantProfile, TenantStatus};
use crate::{TenantError, TenantResult};
use serde::{Deserialize, Serialize};
use silo_queue::{ProvisioningMessage, ProvisioningQueue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Attempts at drawing an unused routing code.
pub const MAX_ROUTING_CODE_ATTEMPTS: usize = 10;

/// Request to register a tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTenantRequest {
    /// Display name.
    pub name: String,
    /// Public site slug, normalized before use.
    pub subdomain: String,
    /// Explicit routing code; generated when absent.
    #[serde(default)]
    pub routing_code: Option<String>,
    #[serde(default)]
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub plan_id: Option<Uuid>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub is_company: bool,
    #[serde(default)]
    pub custom_domain: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
}

impl CreateTenantRequest {
    pub fn new(name: impl Into<String>, subdomain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subdomain: subdomain.into(),
            ..Default::default()
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

    pub fn with_routing_code(mut self, routing_code: impl Into<String>) -> Self {
        self.routing_code = Some(routing_code.into());
        self
    }

    pub fn with_company(mut self, company_name: impl Into<String>) -> Self {
        self.company_name = Some(company_name.into());
        self.is_company = true;
        self
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }
}

/// Registers tenants and requests their provisioning.
pub struct ProvisioningRequester {
    store: Arc<dyn ControlPlaneStore>,
    queue: Arc<dyn ProvisioningQueue>,
    cache: RoutingCache,
    store_timeout: Duration,
}

impl ProvisioningRequester {
    pub fn new(
        store: Arc<dyn ControlPlaneStore>,
        queue: Arc<dyn ProvisioningQueue>,
        cache: RoutingCache,
    ) -> Self {
        Self {
            store,
            queue,
            cache,
            store_timeout: Duration::from_secs(5),
        }
    }

    /// Deadline for each control-plane call.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Register a tenant and enqueue its provisioning.
    ///
    /// The returned tenant is in `provisioning` status. If the enqueue fails
    /// the row stays in `provisioning` and the error is returned.
    pub async fn create_tenant(&self, request: CreateTenantRequest) -> TenantResult<Tenant> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(TenantError::Invalid("name is required".into()));
        }

        let subdomain = normalize_slug(&request.subdomain)?;
        if self
            .bounded("subdomain check", self.store.subdomain_exists(&subdomain))
            .await?
        {
            return Err(TenantError::Conflict("subdomain is already in use".into()));
        }

        let routing_code = self.pick_routing_code(request.routing_code.as_deref()).await?;
        let database_code = Uuid::new_v4().to_string();

        let mut tenant = Tenant::new(routing_code, database_code).with_subdomain(subdomain);
        tenant.owner_id = request.owner_id;
        tenant.plan_id = request.plan_id;

        let profile = TenantProfile {
            tenant_id: tenant.id,
            company_name: request.company_name.clone(),
            is_company: request.is_company,
            custom_domain: request.custom_domain.clone(),
            custom_settings: serde_json::json!({
                "name": name,
                "industry": request.industry.as_deref().unwrap_or_default(),
            }),
        };

        let new_tenant = NewTenant {
            tenant,
            profile,
            owner_role: OWNER_ROLE.to_string(),
        };
        let tenant = self
            .bounded("tenant insert", self.store.create_tenant(&new_tenant))
            .await?;

        let message = ProvisioningMessage::new(
            tenant.id,
            tenant.database_code.clone(),
            tenant.routing_code.clone(),
        );
        if let Err(e) = self.queue.enqueue(&message).await {
            error!(
                tenant_id = %tenant.id,
                routing_code = %tenant.routing_code,
                error = %e,
                "Failed to enqueue provisioning request; tenant stays in provisioning"
            );
            return Err(TenantError::Queue(e));
        }

        self.cache.set(&tenant.routing_code, &tenant.database_code).await;

        info!(
            tenant_id = %tenant.id,
            routing_code = %tenant.routing_code,
            "Tenant registered, provisioning requested"
        );
        Ok(tenant)
    }

    async fn pick_routing_code(&self, requested: Option<&str>) -> TenantResult<String> {
        if let Some(code) = requested {
            let code = code.trim();
            validate_routing_code(code)?;
            if self
                .bounded("routing code check", self.store.routing_code_exists(code))
                .await?
            {
                return Err(TenantError::Conflict("routing code is already in use".into()));
            }
            return Ok(code.to_string());
        }

        for _ in 0..MAX_ROUTING_CODE_ATTEMPTS {
            let code = generate_routing_code();
            if !self
                .bounded("routing code check", self.store.routing_code_exists(&code))
                .await?
            {
                return Ok(code);
            }
        }
        Err(TenantError::Conflict(format!(
            "could not generate a unique routing code after {} attempts",
            MAX_ROUTING_CODE_ATTEMPTS
        )))
    }

    /// Current status of a tenant, for callers polling provisioning.
    pub async fn tenant_status(&self, tenant_id: Uuid) -> TenantResult<TenantStatus> {
        self.bounded("tenant lookup", self.store.find_by_id(tenant_id))
            .await?
            .map(|t| t.status)
            .ok_or_else(|| TenantError::NotFound(tenant_id.to_string()))
    }

    /// Drop the cached routing entry after an administrative change.
    pub async fn invalidate_routing(&self, routing_code: &str) -> bool {
        self.cache.invalidate(routing_code).await
    }

    async fn bounded<T>(
        &self,
        step: &'static str,
        fut: impl Future<Output = TenantResult<T>>,
    ) -> TenantResult<T> {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    step,
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "Control-plane call timed out"
                );
                Err(TenantError::Timeout(step))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheProvider;
    use crate::store::MemoryStore;
    use silo_queue::MemoryQueue;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
        cache: Arc<MemoryCacheProvider>,
        requester: ProvisioningRequester,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let cache = Arc::new(MemoryCacheProvider::new());
        let requester = ProvisioningRequester::new(
            store.clone(),
            queue.clone(),
            RoutingCache::new(cache.clone()),
        );
        Fixture {
            store,
            queue,
            cache,
            requester,
        }
    }

    #[tokio::test]
    async fn test_create_tenant_end_to_end() {
        let fx = fixture();
        let owner = Uuid::new_v4();
        let tenant = fx
            .requester
            .create_tenant(
                CreateTenantRequest::new("Acme", "Acme Corp")
                    .with_owner(owner)
                    .with_industry("retail"),
            )
            .await
            .unwrap();

        assert_eq!(tenant.status, TenantStatus::Provisioning);
        assert_eq!(tenant.subdomain.as_deref(), Some("acme-corp"));
        assert_eq!(tenant.routing_code.len(), 11);
        assert!(Uuid::parse_str(&tenant.database_code).is_ok());

        let profile = fx.store.find_profile(tenant.id).await.unwrap().unwrap();
        assert_eq!(profile.display_name(), Some("Acme"));
        assert_eq!(profile.custom_settings["industry"], "retail");
        assert_eq!(
            fx.store.member_role(owner, tenant.id).await.unwrap().as_deref(),
            Some(OWNER_ROLE)
        );

        let pending = fx.queue.pending();
        assert_eq!(pending.len(), 1);
        let message = ProvisioningMessage::from_json(&pending[0]).unwrap();
        assert_eq!(message.tenant_id, tenant.id);
        assert_eq!(message.database_code, tenant.database_code);
        assert_eq!(message.routing_code, tenant.routing_code);

        let key = RoutingCache::key(&tenant.routing_code);
        assert!(fx.cache.ttl(&key).is_some());
        assert_eq!(
            fx.requester.tenant_status(tenant.id).await.unwrap(),
            TenantStatus::Provisioning
        );
    }

    #[tokio::test]
    async fn test_subdomain_must_be_free() {
        let fx = fixture();
        fx.requester
            .create_tenant(CreateTenantRequest::new("Acme", "acme"))
            .await
            .unwrap();

        let err = fx
            .requester
            .create_tenant(CreateTenantRequest::new("Other", "ACME"))
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::Conflict(_)));
        assert_eq!(fx.queue.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let fx = fixture();
        for request in [
            CreateTenantRequest::new("", "acme"),
            CreateTenantRequest::new("Acme", "a!"),
            CreateTenantRequest::new("Acme", "acme").with_routing_code("no spaces allowed"),
        ] {
            let err = fx.requester.create_tenant(request).await.unwrap_err();
            assert_eq!(err.http_status(), 400, "{err}");
        }
    }

    #[tokio::test]
    async fn test_explicit_routing_code() {
        let fx = fixture();
        let tenant = fx
            .requester
            .create_tenant(CreateTenantRequest::new("Acme", "acme").with_routing_code("FR34JJO390G"))
            .await
            .unwrap();
        assert_eq!(tenant.routing_code, "FR34JJO390G");

        let err = fx
            .requester
            .create_tenant(CreateTenantRequest::new("Other", "other").with_routing_code("FR34JJO390G"))
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_enqueue_failure_leaves_provisioning_row() {
        let fx = fixture();
        fx.queue.reject_enqueues(true);

        let err = fx
            .requester
            .create_tenant(CreateTenantRequest::new("Acme", "acme"))
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::Queue(_)));
        assert!(fx.store.subdomain_exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_failure_is_not_fatal() {
        let fx = fixture();
        fx.cache.set_unavailable(true);

        let tenant = fx
            .requester
            .create_tenant(CreateTenantRequest::new("Acme", "acme"))
            .await
            .unwrap();
        assert_eq!(fx.queue.pending().len(), 1);

        fx.cache.set_unavailable(false);
        assert!(fx.cache.ttl(&RoutingCache::key(&tenant.routing_code)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out_before_insert() {
        let fx = fixture();
        fx.store.set_delay(Duration::from_secs(30));
        let requester = fx.requester.with_store_timeout(Duration::from_millis(100));

        let err = requester
            .create_tenant(CreateTenantRequest::new("Acme", "acme"))
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::Timeout("subdomain check")));
        assert_eq!(err.http_status(), 500);
        assert!(fx.queue.pending().is_empty());

        fx.store.set_delay(Duration::ZERO);
        assert!(!fx.store.subdomain_exists("acme").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_routing() {
        let fx = fixture();
        fx.cache.insert(RoutingCache::key("FR34JJO390G"), "abc", Duration::from_secs(60));
        assert!(fx.requester.invalidate_routing("FR34JJO390G").await);
        assert!(fx.cache.ttl(&RoutingCache::key("FR34JJO390G")).is_none());
    }
}
