//! Terminal output and prompts.

mod output;
mod prompts;

pub use output::{HealthStatus, error, header, health_check, info, kv, success, warning};
pub use prompts::password;
