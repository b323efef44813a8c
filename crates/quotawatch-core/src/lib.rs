pub mod aggregate;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod models;
pub mod providers;
pub mod refresher;
pub mod state;

pub use aggregate::aggregate;
pub use fetch::{fetch, FetchOptions};
pub use providers::normalize;
pub use refresher::{RefreshHandle, Refresher};
pub use state::{RefreshState, Severity, StateMachine, ViewModel};
