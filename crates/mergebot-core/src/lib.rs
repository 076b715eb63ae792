pub mod config;
pub mod engine;
pub mod logging;
pub mod message;
pub mod session;

pub use config::Settings;
pub use engine::{
    AuditSink, ClassifierEngine, CombinerEngine, EditScriptEngine, HeuristicEngine, HistorySource,
};
pub use message::{FileContext, Notice, NoticeLevel};
pub use session::{ResolutionSession, SessionSnapshot, SharedSession};
