pub mod audit;
pub mod classifier;
pub mod client;
pub mod collector;
pub mod edit_script;
pub mod error;
pub mod history;
pub mod registry;
pub mod sa;

pub use audit::AuditClient;
pub use classifier::{ClassifierClient, CombinerClient};
pub use collector::{
    collect_dl, collect_history, collect_ml, poll_heuristic, record_choice, run_all, PollPolicy,
};
pub use edit_script::EditScriptClient;
pub use error::EngineError;
pub use history::HistoryClient;
pub use registry::EngineSet;
pub use sa::SaClient;
