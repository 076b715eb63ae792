//! Collectors running against mocked engines.

use merge_engine::{DlOutcome, HeuristicStatus, ResolutionChoice};
use mergebot_core::NoticeLevel;
use mergebot_engines::{record_choice, run_all, EngineSet, PollPolicy};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

fn quick_policy() -> PollPolicy {
    PollPolicy {
        max_attempts: 3,
        interval: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_run_all_fills_every_source() {
    let server = MockServer::start().await;
    common::mount_sa_ready(&server, serde_json::json!(["a", "foo", "b"])).await;
    common::mount_classifier(&server, "CC").await;
    Mock::given(method("POST"))
        .and(path("/es_predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "isSuccessful": true,
            "data": "bar\n"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/conflict/specified"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 200,
            "info": [{"historyTruth": ["foo"], "truthScore": [0.8]}]
        })))
        .mount(&server)
        .await;

    let engines = EngineSet::from_settings(&common::settings_for(&server)).unwrap();
    let session = common::session();
    run_all(engines, session.clone(), quick_policy(), CancellationToken::new()).await;

    let mut guard = session.lock().await;
    assert!(guard.notices.is_empty(), "notices: {:?}", guard.notices);
    let aggregator = guard.manager.aggregator();
    assert_eq!(aggregator.heuristic_status(), HeuristicStatus::Ready);
    assert_eq!(aggregator.ml(1).unwrap().content, "foo\nbar");
    assert_eq!(aggregator.dl(1), Some(&DlOutcome::Resolvable("bar".into())));
    assert_eq!(aggregator.history(1)[0].content, "foo");
    assert_eq!(guard.manager.patches().len(), 1);

    guard
        .manager
        .apply_resolution(1, ResolutionChoice::SemanticPatch(0))
        .unwrap();
    assert_eq!(guard.manager.content(), "a\nfoo\nb");
}

#[tokio::test]
async fn test_heuristic_keeps_polling_while_pending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/resolve"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "00000",
            "data": {"pending": true, "resolutions": []}
        })))
        .expect(3)
        .mount(&server)
        .await;

    let engines = EngineSet {
        heuristic: EngineSet::from_settings(&common::settings_for(&server))
            .unwrap()
            .heuristic,
        ..Default::default()
    };
    let session = common::session();
    run_all(engines, session.clone(), quick_policy(), CancellationToken::new()).await;

    let guard = session.lock().await;
    assert_eq!(
        guard.manager.aggregator().heuristic_status(),
        HeuristicStatus::TimedOut
    );
    assert_eq!(guard.notices.len(), 1);
    assert_eq!(guard.notices[0].level, NoticeLevel::Warning);
}

#[tokio::test]
async fn test_unreachable_engine_becomes_notice() {
    let server = MockServer::start().await;
    let mut settings = common::settings_for(&server);
    settings.history = "http://127.0.0.1:1".into();
    let engines = EngineSet {
        history: EngineSet::from_settings(&settings).unwrap().history,
        ..Default::default()
    };

    let session = common::session();
    run_all(engines, session.clone(), quick_policy(), CancellationToken::new()).await;

    let guard = session.lock().await;
    assert_eq!(guard.notices.len(), 1);
    assert_eq!(guard.notices[0].level, NoticeLevel::Error);
    assert!(guard.manager.aggregator().history(1).is_empty());
}

#[tokio::test]
async fn test_audit_failure_leaves_buffer_alone() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audit/choice/save"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let sink = EngineSet::from_settings(&common::settings_for(&server))
        .unwrap()
        .audit
        .unwrap();

    let session = common::session();
    let record = {
        let mut guard = session.lock().await;
        let applied = guard
            .manager
            .apply_resolution(1, ResolutionChoice::Side(merge_engine::Side::Ours))
            .unwrap();
        guard.choice_record(1, applied.audit)
    };

    let notice = record_choice(sink, record).await.unwrap();
    assert!(notice.is_some());
    assert_eq!(session.lock().await.manager.content(), "a\nfoo\nb");
}
