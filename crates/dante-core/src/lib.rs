pub mod config;
pub mod error;
pub mod types;
pub mod validation;

pub use config::{ClientSettings, DanteConfig};
pub use error::{DanteError, Result};
pub use types::*;
pub use validation::ValidationError;
