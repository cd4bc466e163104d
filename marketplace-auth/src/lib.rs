pub mod bootstrap;
pub mod config;
pub mod models;
pub mod services;

pub use bootstrap::AuthRuntime;
pub use services::{AuthContext, AuthError, AuthMode, AuthOrchestrator};
