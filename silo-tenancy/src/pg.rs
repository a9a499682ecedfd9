//! Postgres control-plane store.

use crate::store::{ControlPlaneStore, OWNER_ROLE};
use crate::tenant::{NewTenant, Tenant, TenantProfile, TenantStatus, UserTenant};
use crate::{TenantError, TenantResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{Bool, Jsonb, Nullable, Text, Timestamptz, Uuid as SqlUuid};
use diesel::{OptionalExtension, QueryableByName};
use diesel_async::RunQueryDsl;
use diesel_async::scoped_futures::ScopedFutureExt;
use silo_db::{DbError, PgConnection, PgPool};
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

/// Control-plane tables. Every statement is idempotent.
pub const CONTROL_PLANE_SCHEMA: &str = r#"
DO $$ BEGIN
    CREATE TYPE tenant_status AS ENUM ('provisioning', 'active', 'suspended', 'failed');
EXCEPTION WHEN duplicate_object THEN NULL;
END $$;

CREATE TABLE IF NOT EXISTS plans (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS features (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    slug TEXT NOT NULL UNIQUE,
    description TEXT
);

CREATE TABLE IF NOT EXISTS plan_features (
    plan_id UUID NOT NULL REFERENCES plans(id) ON DELETE CASCADE,
    feature_id UUID NOT NULL REFERENCES features(id) ON DELETE CASCADE,
    PRIMARY KEY (plan_id, feature_id)
);

CREATE TABLE IF NOT EXISTS permissions (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    slug TEXT NOT NULL UNIQUE,
    description TEXT
);

CREATE TABLE IF NOT EXISTS roles (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS role_permissions (
    role_id UUID NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    permission_id UUID NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
    PRIMARY KEY (role_id, permission_id)
);

CREATE TABLE IF NOT EXISTS tenants (
    id UUID PRIMARY KEY,
    routing_code TEXT NOT NULL UNIQUE,
    database_code TEXT NOT NULL UNIQUE,
    subdomain TEXT UNIQUE,
    owner_id UUID,
    plan_id UUID REFERENCES plans(id),
    status tenant_status NOT NULL DEFAULT 'provisioning',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS tenant_profiles (
    tenant_id UUID PRIMARY KEY REFERENCES tenants(id) ON DELETE CASCADE,
    company_name TEXT,
    is_company BOOLEAN NOT NULL DEFAULT FALSE,
    custom_domain TEXT,
    custom_settings JSONB NOT NULL DEFAULT '{}'::jsonb
);

CREATE TABLE IF NOT EXISTS tenant_members (
    tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    user_id UUID NOT NULL,
    role_id UUID NOT NULL REFERENCES roles(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (tenant_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_tenant_members_user ON tenant_members(user_id);

INSERT INTO roles (slug, name) VALUES ('owner', 'Owner') ON CONFLICT (slug) DO NOTHING;
"#;

const TENANT_COLUMNS: &str = "id, routing_code, database_code, subdomain, owner_id, plan_id, \
     status::text AS status, created_at, updated_at";

#[derive(QueryableByName)]
struct TenantRow {
    #[diesel(sql_type = SqlUuid)]
    id: Uuid,
    #[diesel(sql_type = Text)]
    routing_code: String,
    #[diesel(sql_type = Text)]
    database_code: String,
    #[diesel(sql_type = Nullable<Text>)]
    subdomain: Option<String>,
    #[diesel(sql_type = Nullable<SqlUuid>)]
    owner_id: Option<Uuid>,
    #[diesel(sql_type = Nullable<SqlUuid>)]
    plan_id: Option<Uuid>,
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    updated_at: DateTime<Utc>,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = TenantError;

    fn try_from(row: TenantRow) -> TenantResult<Self> {
        let status = row.status.parse().map_err(TenantError::Store)?;
        Ok(Tenant {
            id: row.id,
            routing_code: row.routing_code,
            database_code: row.database_code,
            subdomain: row.subdomain,
            owner_id: row.owner_id,
            plan_id: row.plan_id,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(QueryableByName)]
struct ProfileRow {
    #[diesel(sql_type = SqlUuid)]
    tenant_id: Uuid,
    #[diesel(sql_type = Nullable<Text>)]
    company_name: Option<String>,
    #[diesel(sql_type = Bool)]
    is_company: bool,
    #[diesel(sql_type = Nullable<Text>)]
    custom_domain: Option<String>,
    #[diesel(sql_type = Jsonb)]
    custom_settings: serde_json::Value,
}

#[derive(QueryableByName)]
struct UserTenantRow {
    #[diesel(sql_type = SqlUuid)]
    id: Uuid,
    #[diesel(sql_type = Text)]
    routing_code: String,
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Text)]
    role: String,
}

#[derive(QueryableByName)]
struct Slug {
    #[diesel(sql_type = Text)]
    slug: String,
}

#[derive(QueryableByName)]
struct MaybeSlug {
    #[diesel(sql_type = Nullable<Text>)]
    slug: Option<String>,
}

#[derive(QueryableByName)]
struct Found {
    #[diesel(sql_type = Bool)]
    found: bool,
}

fn query_error(err: DieselError) -> TenantError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            TenantError::Conflict(info.message().to_string())
        }
        other => TenantError::Store(other.to_string()),
    }
}

/// [`ControlPlaneStore`] over the control-plane pool.
#[derive(Clone)]
pub struct PgControlPlaneStore {
    pool: PgPool,
}

impl PgControlPlaneStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the control-plane tables if they do not exist.
    pub async fn migrate(&self) -> TenantResult<()> {
        self.pool.batch_execute(CONTROL_PLANE_SCHEMA).await?;
        info!(database = %self.pool.database(), "Control-plane schema applied");
        Ok(())
    }

    async fn conn(&self) -> TenantResult<PgConnection> {
        Ok(self.pool.get().await?)
    }

    async fn find_one(
        &self,
        column: &str,
        placeholder: &str,
        bind: String,
    ) -> TenantResult<Option<Tenant>> {
        let mut conn = self.conn().await?;
        let row = diesel::sql_query(format!(
            "SELECT {} FROM tenants WHERE {} = {}",
            TENANT_COLUMNS, column, placeholder
        ))
        .bind::<Text, _>(bind)
        .get_result::<TenantRow>(&mut *conn)
        .await
        .optional()
        .map_err(query_error)?;
        row.map(Tenant::try_from).transpose()
    }

    async fn exists(&self, sql: &str, bind: &str) -> TenantResult<bool> {
        let mut conn = self.conn().await?;
        let row = diesel::sql_query(sql)
            .bind::<Text, _>(bind)
            .get_result::<Found>(&mut *conn)
            .await
            .map_err(query_error)?;
        Ok(row.found)
    }
}

#[async_trait]
impl ControlPlaneStore for PgControlPlaneStore {
    async fn find_by_routing_code(&self, routing_code: &str) -> TenantResult<Option<Tenant>> {
        self.find_one("routing_code", "$1", routing_code.to_string())
            .await
    }

    async fn find_by_id(&self, tenant_id: Uuid) -> TenantResult<Option<Tenant>> {
        self.find_one("id", "$1::uuid", tenant_id.to_string()).await
    }

    async fn is_member(&self, user_id: Uuid, tenant_id: Uuid) -> TenantResult<bool> {
        let mut conn = self.conn().await?;
        let row = diesel::sql_query(
            "SELECT EXISTS (SELECT 1 FROM tenant_members WHERE user_id = $1 AND tenant_id = $2) AS found",
        )
        .bind::<SqlUuid, _>(user_id)
        .bind::<SqlUuid, _>(tenant_id)
        .get_result::<Found>(&mut *conn)
        .await
        .map_err(query_error)?;
        Ok(row.found)
    }

    async fn tenant_features(&self, tenant_id: Uuid) -> TenantResult<BTreeSet<String>> {
        let mut conn = self.conn().await?;
        let rows = diesel::sql_query(
            "SELECT f.slug FROM features f \
             JOIN plan_features pf ON pf.feature_id = f.id \
             JOIN tenants t ON t.plan_id = pf.plan_id \
             WHERE t.id = $1",
        )
        .bind::<SqlUuid, _>(tenant_id)
        .load::<Slug>(&mut *conn)
        .await
        .map_err(query_error)?;
        Ok(rows.into_iter().map(|r| r.slug).collect())
    }

    async fn member_permissions(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> TenantResult<BTreeSet<String>> {
        let mut conn = self.conn().await?;
        let rows = diesel::sql_query(
            "SELECT DISTINCT p.slug FROM permissions p \
             JOIN role_permissions rp ON rp.permission_id = p.id \
             JOIN tenant_members tm ON tm.role_id = rp.role_id \
             WHERE tm.user_id = $1 AND tm.tenant_id = $2",
        )
        .bind::<SqlUuid, _>(user_id)
        .bind::<SqlUuid, _>(tenant_id)
        .load::<Slug>(&mut *conn)
        .await
        .map_err(query_error)?;
        Ok(rows.into_iter().map(|r| r.slug).collect())
    }

    async fn all_permissions(&self) -> TenantResult<BTreeSet<String>> {
        let mut conn = self.conn().await?;
        let rows = diesel::sql_query("SELECT slug FROM permissions")
            .load::<Slug>(&mut *conn)
            .await
            .map_err(query_error)?;
        Ok(rows.into_iter().map(|r| r.slug).collect())
    }

    async fn member_role(&self, user_id: Uuid, tenant_id: Uuid) -> TenantResult<Option<String>> {
        let mut conn = self.conn().await?;
        let row = diesel::sql_query(
            "SELECT CASE WHEN t.owner_id = $1 THEN $3 ELSE r.slug END AS slug \
             FROM tenants t \
             LEFT JOIN tenant_members tm ON tm.tenant_id = t.id AND tm.user_id = $1 \
             LEFT JOIN roles r ON r.id = tm.role_id \
             WHERE t.id = $2",
        )
        .bind::<SqlUuid, _>(user_id)
        .bind::<SqlUuid, _>(tenant_id)
        .bind::<Text, _>(OWNER_ROLE)
        .get_result::<MaybeSlug>(&mut *conn)
        .await
        .optional()
        .map_err(query_error)?;
        Ok(row.and_then(|r| r.slug))
    }

    async fn list_user_tenants(&self, user_id: Uuid) -> TenantResult<Vec<UserTenant>> {
        let mut conn = self.conn().await?;
        let rows = diesel::sql_query(
            "SELECT t.id, t.routing_code, \
                    COALESCE(tp.custom_settings->>'name', '') AS name, \
                    r.slug AS role \
             FROM tenant_members tm \
             JOIN tenants t ON t.id = tm.tenant_id \
             JOIN roles r ON r.id = tm.role_id \
             LEFT JOIN tenant_profiles tp ON tp.tenant_id = t.id \
             WHERE tm.user_id = $1 AND t.status = 'active' \
             ORDER BY t.created_at DESC",
        )
        .bind::<SqlUuid, _>(user_id)
        .load::<UserTenantRow>(&mut *conn)
        .await
        .map_err(query_error)?;

        Ok(rows
            .into_iter()
            .map(|r| UserTenant {
                id: r.id,
                routing_code: r.routing_code,
                name: r.name,
                role: r.role,
            })
            .collect())
    }

    async fn update_status(&self, tenant_id: Uuid, status: TenantStatus) -> TenantResult<bool> {
        let mut conn = self.conn().await?;
        let updated = diesel::sql_query(
            "UPDATE tenants SET status = $1::tenant_status, updated_at = now() WHERE id = $2",
        )
        .bind::<Text, _>(status.as_str())
        .bind::<SqlUuid, _>(tenant_id)
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;

        debug!(tenant_id = %tenant_id, status = %status, updated, "Tenant status written");
        Ok(updated > 0)
    }

    async fn subdomain_exists(&self, subdomain: &str) -> TenantResult<bool> {
        self.exists(
            "SELECT EXISTS (SELECT 1 FROM tenants WHERE subdomain = $1) AS found",
            subdomain,
        )
        .await
    }

    async fn routing_code_exists(&self, routing_code: &str) -> TenantResult<bool> {
        self.exists(
            "SELECT EXISTS (SELECT 1 FROM tenants WHERE routing_code = $1) AS found",
            routing_code,
        )
        .await
    }

    async fn create_tenant(&self, new: &NewTenant) -> TenantResult<Tenant> {
        let new = new.clone();
        let tenant = new.tenant.clone();

        let result = self
            .pool
            .transaction(move |conn| {
                async move {
                    let t = &new.tenant;
                    diesel::sql_query(
                        "INSERT INTO tenants \
                         (id, routing_code, database_code, subdomain, owner_id, plan_id, status, created_at, updated_at) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7::tenant_status, $8, $9)",
                    )
                    .bind::<SqlUuid, _>(t.id)
                    .bind::<Text, _>(t.routing_code.clone())
                    .bind::<Text, _>(t.database_code.clone())
                    .bind::<Nullable<Text>, _>(t.subdomain.clone())
                    .bind::<Nullable<SqlUuid>, _>(t.owner_id)
                    .bind::<Nullable<SqlUuid>, _>(t.plan_id)
                    .bind::<Text, _>(t.status.as_str())
                    .bind::<Timestamptz, _>(t.created_at)
                    .bind::<Timestamptz, _>(t.updated_at)
                    .execute(conn)
                    .await?;

                    let p = &new.profile;
                    diesel::sql_query(
                        "INSERT INTO tenant_profiles \
                         (tenant_id, company_name, is_company, custom_domain, custom_settings) \
                         VALUES ($1, $2, $3, $4, $5)",
                    )
                    .bind::<SqlUuid, _>(t.id)
                    .bind::<Nullable<Text>, _>(p.company_name.clone())
                    .bind::<Bool, _>(p.is_company)
                    .bind::<Nullable<Text>, _>(p.custom_domain.clone())
                    .bind::<Jsonb, _>(p.custom_settings.clone())
                    .execute(conn)
                    .await?;

                    if let Some(owner_id) = t.owner_id {
                        let inserted = diesel::sql_query(
                            "INSERT INTO tenant_members (tenant_id, user_id, role_id) \
                             SELECT $1, $2, id FROM roles WHERE slug = $3",
                        )
                        .bind::<SqlUuid, _>(t.id)
                        .bind::<SqlUuid, _>(owner_id)
                        .bind::<Text, _>(new.owner_role.clone())
                        .execute(conn)
                        .await?;
                        if inserted == 0 {
                            return Err(DieselError::NotFound);
                        }
                    }
                    Ok(())
                }
                .scope_boxed()
            })
            .await;

        match result {
            Ok(()) => {
                info!(
                    tenant_id = %tenant.id,
                    routing_code = %tenant.routing_code,
                    "Tenant row created"
                );
                Ok(tenant)
            }
            Err(DbError::Query(DieselError::NotFound)) => Err(TenantError::Store(
                "owner role is not defined in the control plane".into(),
            )),
            Err(DbError::Query(err)) => Err(query_error(err)),
            Err(other) => Err(other.into()),
        }
    }

    async fn find_profile(&self, tenant_id: Uuid) -> TenantResult<Option<TenantProfile>> {
        let mut conn = self.conn().await?;
        let row = diesel::sql_query(
            "SELECT tenant_id, company_name, is_company, custom_domain, custom_settings \
             FROM tenant_profiles WHERE tenant_id = $1",
        )
        .bind::<SqlUuid, _>(tenant_id)
        .get_result::<ProfileRow>(&mut *conn)
        .await
        .optional()
        .map_err(query_error)?;

        Ok(row.map(|r| TenantProfile {
            tenant_id: r.tenant_id,
            company_name: r.company_name,
            is_company: r.is_company,
            custom_domain: r.custom_domain,
            custom_settings: r.custom_settings,
        }))
    }
}
