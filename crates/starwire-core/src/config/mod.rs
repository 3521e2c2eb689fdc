mod dirs;
mod settings;
mod validation;

pub use dirs::Directories;
pub use settings::{Config, ConnectionConfig, MessageConfig, ProtocolConfig, ServerConfig};
pub use validation::warn_unknown_fields;
