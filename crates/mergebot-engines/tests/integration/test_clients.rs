//! Request and response shapes of each HTTP client.

use merge_engine::DlOutcome;
use mergebot_core::message::{EditScriptRequest, HistoryQuery};
use mergebot_engines::{
    AuditClient, ClassifierClient, CombinerClient, EditScriptClient, EngineError, HistoryClient,
    SaClient,
};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_sa_resolve_maps_indices() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/resolve"))
        .and(body_json(serde_json::json!({
            "path": "/repo",
            "ms": {"ours": "main", "theirs": "topic"},
            "file": "src/App.java"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "00000",
            "data": {
                "pending": true,
                "resolutions": [
                    {"index": 0, "desc": "d", "confidence": 0.4, "label": "l", "code": ["x", "y"]}
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = SaClient::new(&server.uri(), common::TIMEOUT).unwrap();
    let report = client
        .fetch(&common::file_context().heuristic_request())
        .await
        .expect("resolve failed");

    assert!(report.pending);
    assert_eq!(report.resolutions[0].index, 1);
    assert_eq!(report.resolutions[0].content, "x\ny");
    assert!(report.merged.is_none());
}

#[tokio::test]
async fn test_sa_error_code_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/resolve"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": "A0400",
            "msg": "unknown project"
        })))
        .mount(&server)
        .await;

    let client = SaClient::new(&server.uri(), common::TIMEOUT).unwrap();
    let err = client
        .fetch(&common::file_context().heuristic_request())
        .await
        .unwrap_err();

    match err {
        EngineError::Rejected { engine, message } => {
            assert_eq!(engine, "sa");
            assert_eq!(message, "unknown project");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_http_status_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let client = ClassifierClient::new(&server.uri(), common::TIMEOUT).unwrap();
    let err = client
        .fetch(&common::file_context().classifier_request())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Rejected { engine: "classifier", .. }));
    assert!(err.to_string().contains("overloaded"));
}

#[tokio::test]
async fn test_classifier_predictions() {
    let server = MockServer::start().await;
    common::mount_classifier(&server, "V1").await;

    let client = ClassifierClient::new(&format!("{}/", server.uri()), common::TIMEOUT).unwrap();
    let predictions = client
        .fetch(&common::file_context().classifier_request())
        .await
        .unwrap();

    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].label, "V1");
    assert_eq!(predictions[0].index, 0);
}

#[tokio::test]
async fn test_combiner_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/combine"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "isSuccessful": false,
            "msg": "cannot combine"
        })))
        .mount(&server)
        .await;

    let client = CombinerClient::new(&server.uri(), common::TIMEOUT).unwrap();
    let err = client
        .fetch(&merge_engine::CombineInput {
            version1: "a".into(),
            version2: "b".into(),
            base: String::new(),
        })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("cannot combine"));
}

#[tokio::test]
async fn test_edit_script_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/es_predict"))
        .and(body_json(serde_json::json!({
            "base": "",
            "ours": "foo\n",
            "theirs": "bar\n"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "isSuccessful": true,
            "data": ["foo", "bar"]
        })))
        .mount(&server)
        .await;

    let client = EditScriptClient::new(&server.uri(), common::TIMEOUT).unwrap();
    let outcome = client
        .fetch(&EditScriptRequest {
            base: String::new(),
            ours: "foo\n".into(),
            theirs: "bar\n".into(),
        })
        .await
        .unwrap();

    assert_eq!(outcome, DlOutcome::Resolvable("foo\nbar\n".into()));
}

#[tokio::test]
async fn test_history_query_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/conflict/specified"))
        .and(query_param("filePath", "src/App.java"))
        .and(query_param("repo", "/repo"))
        .and(query_param("fileType", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 200,
            "info": [{"historyTruth": ["foo", "bar"], "truthScore": [0.3, 0.6]}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HistoryClient::new(&server.uri(), common::TIMEOUT).unwrap();
    let query: HistoryQuery = common::file_context().history_query();
    let records = client.fetch(&query).await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].history_truth, vec!["foo", "bar"]);
}

#[tokio::test]
async fn test_audit_save() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audit/choice/save"))
        .and(body_json(serde_json::json!({
            "projectPath": "/repo",
            "targetBranch": "main",
            "sourceBranch": "topic",
            "fileName": "src/App.java",
            "blockIdx": 0,
            "blockResolutionChoice": {
                "choice": "ours",
                "choiceCode": "foo",
                "saCode": "",
                "mlCode": "",
                "dlCode": ""
            }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = AuditClient::new(&server.uri(), common::TIMEOUT).unwrap();
    let record = common::file_context().choice_record(
        1,
        merge_engine::ChoiceAudit {
            choice: "ours".into(),
            choice_code: "foo".into(),
            ..Default::default()
        },
    );
    client.save(&record).await.unwrap();
}
