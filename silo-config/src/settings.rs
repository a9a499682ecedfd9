// Typed settings for the data plane

use crate::loader::read_file;
use crate::{ConfigError, ConfigValidator, EnvLoader, FileFormat, Result, Validate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides (`SILO_<SECTION>_<FIELD>`).
pub const ENV_PREFIX: &str = "SILO";

const SECTIONS: &[&str] = &[
    "control_plane",
    "admin",
    "tenant",
    "redis",
    "resolver",
    "worker",
];

const SSL_MODES: &[&str] = &[
    "disable",
    "allow",
    "prefer",
    "require",
    "verify-ca",
    "verify-full",
];

/// Connection settings for a single Postgres database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub ssl_mode: String,
    pub max_connections: usize,
    pub min_connections: usize,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            database: "silo_control".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 25,
            min_connections: 5,
        }
    }
}

impl DatabaseSettings {
    /// Defaults for the administrative connection used for `CREATE DATABASE`.
    pub fn admin() -> Self {
        Self {
            database: "postgres".to_string(),
            max_connections: 5,
            min_connections: 1,
            ..Self::default()
        }
    }

    fn check(&self, section: &str) -> Result<()> {
        ConfigValidator::not_empty(&self.host, &format!("{}.host", section))?;
        ConfigValidator::is_port(self.port, &format!("{}.port", section))?;
        ConfigValidator::not_empty(&self.user, &format!("{}.user", section))?;
        ConfigValidator::not_empty(&self.database, &format!("{}.database", section))?;
        ConfigValidator::one_of(&self.ssl_mode.as_str(), SSL_MODES, &format!("{}.ssl_mode", section))?;
        ConfigValidator::in_range(self.max_connections, 1, 1000, &format!("{}.max_connections", section))?;
        ConfigValidator::ordered(
            self.min_connections,
            self.max_connections,
            &format!("{}.min_connections", section),
        )
    }
}

/// Settings shared by every per-tenant pool.
///
/// The database name is derived per tenant from `database_prefix` and the
/// tenant's database code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantPoolSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: usize,
    pub min_connections: usize,
    pub database_prefix: String,
    /// Role granted table and sequence privileges on each new tenant database.
    pub grant_role: Option<String>,
}

impl Default for TenantPoolSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            ssl_mode: "disable".to_string(),
            max_connections: 20,
            min_connections: 2,
            database_prefix: "db_tenant_".to_string(),
            grant_role: None,
        }
    }
}

impl Validate for TenantPoolSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.host, "tenant.host")?;
        ConfigValidator::is_port(self.port, "tenant.port")?;
        ConfigValidator::not_empty(&self.user, "tenant.user")?;
        ConfigValidator::one_of(&self.ssl_mode.as_str(), SSL_MODES, "tenant.ssl_mode")?;
        ConfigValidator::in_range(self.max_connections, 1, 1000, "tenant.max_connections")?;
        ConfigValidator::ordered(self.min_connections, self.max_connections, "tenant.min_connections")?;
        ConfigValidator::is_identifier(&self.database_prefix, "tenant.database_prefix")?;
        ConfigValidator::in_range(self.database_prefix.len(), 1, 24, "tenant.database_prefix length")?;
        if let Some(role) = &self.grant_role {
            ConfigValidator::is_identifier(role, "tenant.grant_role")?;
        }
        Ok(())
    }
}

/// Redis connection, routing cache and provisioning queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub url: String,
    pub pool_size: u32,
    pub routing_ttl_secs: u64,
    pub queue_key: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            routing_ttl_secs: 86_400,
            queue_key: "tenant:provision:queue".to_string(),
        }
    }
}

impl RedisSettings {
    pub fn routing_ttl(&self) -> Duration {
        Duration::from_secs(self.routing_ttl_secs)
    }
}

impl Validate for RedisSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::is_redis_url(&self.url, "redis.url")?;
        ConfigValidator::in_range(self.pool_size, 1, 512, "redis.pool_size")?;
        ConfigValidator::in_range(self.routing_ttl_secs, 1, 30 * 86_400, "redis.routing_ttl_secs")?;
        ConfigValidator::not_empty(&self.queue_key, "redis.queue_key")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Deadline applied to each cache, store and pool step.
    pub lookup_timeout_ms: u64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: 5_000,
        }
    }
}

impl ResolverSettings {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub dequeue_timeout_secs: u64,
    pub error_backoff_ms: u64,
    pub step_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            dequeue_timeout_secs: 5,
            error_backoff_ms: 1_000,
            step_timeout_secs: 60,
        }
    }
}

impl WorkerSettings {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_secs(self.dequeue_timeout_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl Validate for WorkerSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::in_range(self.dequeue_timeout_secs, 1, 300, "worker.dequeue_timeout_secs")?;
        ConfigValidator::in_range(self.step_timeout_secs, 1, 3_600, "worker.step_timeout_secs")
    }
}

/// Complete data-plane settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub control_plane: DatabaseSettings,
    pub admin: DatabaseSettings,
    pub tenant: TenantPoolSettings,
    pub redis: RedisSettings,
    pub resolver: ResolverSettings,
    pub worker: WorkerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            control_plane: DatabaseSettings::default(),
            admin: DatabaseSettings::admin(),
            tenant: TenantPoolSettings::default(),
            redis: RedisSettings::default(),
            resolver: ResolverSettings::default(),
            worker: WorkerSettings::default(),
        }
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        self.control_plane.check("control_plane")?;
        self.admin.check("admin")?;
        self.tenant.validate()?;
        self.redis.validate()?;
        ConfigValidator::in_range(self.resolver.lookup_timeout_ms, 1, 60_000, "resolver.lookup_timeout_ms")?;
        self.worker.validate()
    }
}

impl Settings {
    /// Load settings: defaults, then `path` (if any), then `.env`, then
    /// `SILO_<SECTION>_<FIELD>` variables. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.map(read_file).transpose()?;

        dotenvy::dotenv().ok();
        let env = EnvLoader::new(Some(ENV_PREFIX.to_string())).load()?;

        Self::from_sources(file, &env)
    }

    /// Build settings from an already parsed file and a map of overrides
    /// keyed as `<section>_<field>` (lowercase, prefix stripped).
    pub fn from_sources(
        file: Option<(FileFormat, Value)>,
        overrides: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut value = serde_json::to_value(Self::default())
            .map_err(|e| ConfigError::Shape(e.to_string()))?;

        match file {
            Some((FileFormat::Env, Value::Object(pairs))) => {
                let pairs = pairs
                    .into_iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())));
                let flat = EnvLoader::new(Some(ENV_PREFIX.to_string())).load_from(pairs);
                apply_overrides(&mut value, &flat)?;
            }
            Some((_, data)) => merge(&mut value, data),
            None => {}
        }

        apply_overrides(&mut value, overrides)?;

        let settings: Settings = serde_json::from_value(value)
            .map_err(|e| ConfigError::Shape(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

// Keys that match no known section or field are ignored: other SILO_*
// variables (e.g. SILO_LOG_LEVEL) belong to other components.
fn apply_overrides(value: &mut Value, overrides: &HashMap<String, String>) -> Result<()> {
    for (key, raw) in overrides {
        let Some((section, field)) = SECTIONS.iter().find_map(|section| {
            key.strip_prefix(section)
                .and_then(|rest| rest.strip_prefix('_'))
                .map(|field| (*section, field))
        }) else {
            continue;
        };

        let Some(slot) = value.get_mut(section).and_then(|s| s.get_mut(field)) else {
            continue;
        };

        *slot = coerce(slot, raw).ok_or_else(|| {
            ConfigError::Parse(format!(
                "{}_{}: cannot use '{}' for {}.{}",
                ENV_PREFIX,
                key.to_uppercase(),
                raw,
                section,
                field
            ))
        })?;
    }
    Ok(())
}

fn coerce(current: &Value, raw: &str) -> Option<Value> {
    match current {
        Value::Number(_) => raw.trim().parse::<u64>().ok().map(Value::from),
        Value::Bool(_) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Some(Value::Bool(true)),
            "0" | "false" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        Value::Null if raw.is_empty() => Some(Value::Null),
        _ => Some(Value::String(raw.to_string())),
    }
}
