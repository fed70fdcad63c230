//! Process settings.
//!
//! # Data Flow
//! ```text
//! settings file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → SyncSettings (validated, immutable)
//!     → SyncOptions / pool / source / credential wiring in main
//! ```
//!
//! # Design Decisions
//! - Settings are read once at startup; the desired router configuration is
//!   what changes at runtime
//! - All fields have defaults to allow minimal files
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    CredentialsConfig, ManagementConfig, ObservabilityConfig, ReconcileConfig, SourceConfig,
    SyncSettings,
};
pub use validation::{validate_config, ValidationError};
