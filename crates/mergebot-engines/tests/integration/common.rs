//! Shared helpers: a mock server per engine and a session over a small
//! conflicted file.

use std::time::Duration;

use merge_engine::DiffAlgorithm;
use mergebot_core::config::EngineSettings;
use mergebot_core::{FileContext, ResolutionSession, SharedSession};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CONFLICTED: &str = "a\n<<<<<<< HEAD\nfoo\n=======\nbar\n>>>>>>> topic\nb";

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn file_context() -> FileContext {
    FileContext {
        project_path: "/repo".into(),
        target_branch: "main".into(),
        source_branch: "topic".into(),
        file_path: "src/App.java".into(),
        ..Default::default()
    }
}

pub fn session() -> SharedSession {
    ResolutionSession::new(file_context(), CONFLICTED, DiffAlgorithm::Tokens).shared()
}

/// Every engine URL pointing at the same mock server.
pub fn settings_for(server: &MockServer) -> EngineSettings {
    EngineSettings {
        sa: server.uri(),
        classifier: server.uri(),
        combiner: server.uri(),
        edit_script: server.uri(),
        history: server.uri(),
        audit: server.uri(),
        timeout_secs: 5,
    }
}

/// Mounts `POST /resolve` answering a finished result with the given merge.
pub async fn mount_sa_ready(server: &MockServer, merged: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/resolve"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "00000",
            "data": {
                "pending": false,
                "resolutions": [
                    {"index": 0, "desc": "take ours", "confidence": 0.7, "label": "ours", "code": ["foo"]}
                ],
                "merged": merged
            }
        })))
        .mount(server)
        .await;
}

pub async fn mount_classifier(server: &MockServer, label: &str) {
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 200,
            "msg": "ok",
            "data": [{"index": 0, "label": label, "confidence": 0.93}]
        })))
        .mount(server)
        .await;
}
