// Hyperloom search coordinator
// Keeps a fixed number of training runs busy with configurations from a search template

mod config;
mod coordinator;

pub use config::{CoordinatorConfig, CONFIG_ENV, DEFAULT_RETRY_LIMIT, RUNS_ROOT_ENV};
pub use coordinator::{Coordinator, TickReport};
