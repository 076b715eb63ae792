use crate::audit::AuditClient;
use crate::classifier::{ClassifierClient, CombinerClient};
use crate::edit_script::EditScriptClient;
use crate::error::EngineError;
use crate::history::HistoryClient;
use crate::sa::SaClient;
use mergebot_core::config::EngineSettings;
use mergebot_core::{
    AuditSink, ClassifierEngine, CombinerEngine, EditScriptEngine, HeuristicEngine, HistorySource,
};
use std::fmt;
use std::sync::Arc;

/// The engines a session can draw candidates from. `None` disables a source.
#[derive(Clone, Default)]
pub struct EngineSet {
    pub heuristic: Option<Arc<dyn HeuristicEngine>>,
    pub classifier: Option<Arc<dyn ClassifierEngine>>,
    pub combiner: Option<Arc<dyn CombinerEngine>>,
    pub edit_script: Option<Arc<dyn EditScriptEngine>>,
    pub history: Option<Arc<dyn HistorySource>>,
    pub audit: Option<Arc<dyn AuditSink>>,
}

impl EngineSet {
    /// HTTP clients for every engine with a non-empty URL.
    pub fn from_settings(settings: &EngineSettings) -> Result<Self, EngineError> {
        let timeout = settings.timeout();
        let mut set = Self::default();

        if let Some(url) = configured(&settings.sa) {
            set.heuristic = Some(Arc::new(SaClient::new(url, timeout)?));
        }
        if let Some(url) = configured(&settings.classifier) {
            set.classifier = Some(Arc::new(ClassifierClient::new(url, timeout)?));
        }
        if let Some(url) = configured(&settings.combiner) {
            set.combiner = Some(Arc::new(CombinerClient::new(url, timeout)?));
        }
        if let Some(url) = configured(&settings.edit_script) {
            set.edit_script = Some(Arc::new(EditScriptClient::new(url, timeout)?));
        }
        if let Some(url) = configured(&settings.history) {
            set.history = Some(Arc::new(HistoryClient::new(url, timeout)?));
        }
        if let Some(url) = configured(&settings.audit) {
            set.audit = Some(Arc::new(AuditClient::new(url, timeout)?));
        }

        tracing::info!(enabled = ?set.enabled(), "Engines configured");
        Ok(set)
    }

    /// Names of the enabled sources.
    pub fn enabled(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.heuristic.is_some() {
            names.push("sa");
        }
        if self.classifier.is_some() {
            names.push("classifier");
        }
        if self.combiner.is_some() {
            names.push("combiner");
        }
        if self.edit_script.is_some() {
            names.push("edit_script");
        }
        if self.history.is_some() {
            names.push("history");
        }
        if self.audit.is_some() {
            names.push("audit");
        }
        names
    }
}

impl fmt::Debug for EngineSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSet")
            .field("enabled", &self.enabled())
            .finish()
    }
}

fn configured(url: &str) -> Option<&str> {
    let url = url.trim();
    (!url.is_empty()).then_some(url)
}
