pub mod agent;
pub mod annotate;
pub mod brain;
pub mod config;
pub mod docs;
pub mod dom;
pub mod error;
pub mod hands;
pub mod journal;
pub mod reflect;
pub mod types;

pub use agent::{Explorer, RunOutcome, RunReport};
pub use config::ExplorerConfig;
pub use error::AgentError;
