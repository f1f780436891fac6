pub mod api_type;
pub mod backend;
pub mod config;
pub mod error;
pub mod journal;
pub mod proxy;
pub mod queue;
pub mod server;
pub mod translate;

pub use backend::BackendConfig;
pub use config::ServerConfig;
pub use error::{ProxyError, Result};
pub use journal::SharedJournal;
pub use proxy::Relay;
pub use server::{build_router, AppState};
