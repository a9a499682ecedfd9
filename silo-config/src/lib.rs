// Configuration for the silo data plane
//
// Settings are layered: built-in defaults, an optional TOML/JSON/.env file,
// the process `.env` file, then `SILO_<SECTION>_<FIELD>` environment variables.

pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{FileFormat, read_file};
pub use settings::{
    DatabaseSettings, ENV_PREFIX, RedisSettings, ResolverSettings, Settings, TenantPoolSettings,
    WorkerSettings,
};
pub use validation::{ConfigValidator, Validate};
