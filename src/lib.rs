pub mod analysis;
pub mod commands;
pub mod error;
pub mod models;
pub mod remote;

pub use commands::capture::run_backup_cycle;
pub use commands::restore::{restore_from_export, restore_from_store, RestoreOptions};
pub use commands::settings::{load_config, ShadowConfig};
pub use error::{RemoteError, ShadowError, ShadowResult};
