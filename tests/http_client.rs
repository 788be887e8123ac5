use std::time::Duration;

use mockito::{Matcher, Server};
use serde_json::json;

use conductor_worker::{
    AuthRetryPolicy, AuthStopBehavior, ClientConfig, HttpTaskClient, PollRequest, TaskClient,
    TaskDef, TaskEnvelope, TaskOutcome, TransportError,
};

const POLL_PATH: &str = "/api/tasks/poll/batch/orders";

fn fast_auth(max_attempts: u32, stop: AuthStopBehavior) -> AuthRetryPolicy {
    AuthRetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter_percent: 0,
        stop_behavior: stop,
    }
}

fn client(server: &Server, policy: AuthRetryPolicy) -> HttpTaskClient {
    let cfg = ClientConfig::new(format!("{}/api/", server.url()))
        .with_credentials("key", "secret")
        .with_auth_retry(policy);
    HttpTaskClient::new(cfg).unwrap()
}

fn poll_request() -> PollRequest {
    PollRequest {
        task_type: "orders".into(),
        worker_id: "w-1".into(),
        domain: None,
        count: 3,
        timeout: Duration::from_millis(100),
    }
}

#[tokio::test]
async fn poll_sends_query_and_token_and_decodes_tasks() {
    let mut server = Server::new_async().await;
    let token = server
        .mock("POST", "/api/token")
        .match_body(Matcher::PartialJson(json!({ "keyId": "key", "keySecret": "secret" })))
        .with_body(r#"{"token":"tok-1"}"#)
        .expect(1)
        .create_async()
        .await;
    let poll = server
        .mock("GET", POLL_PATH)
        .match_header("X-Authorization", "tok-1")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("workerid".into(), "w-1".into()),
            Matcher::UrlEncoded("count".into(), "3".into()),
            Matcher::UrlEncoded("timeout".into(), "100".into()),
            Matcher::UrlEncoded("domain".into(), "eu".into()),
        ]))
        .with_header("content-type", "application/json")
        .with_body(
            json!([
                { "taskId": "t-1", "workflowInstanceId": "wf-1", "taskType": "orders",
                  "inputData": { "n": 2 }, "responseTimeoutSeconds": 60 },
                { "taskId": "t-2", "workflowInstanceId": "wf-1", "taskType": "orders" }
            ])
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;

    let client = client(&server, fast_auth(3, AuthStopBehavior::StopWorker));
    let mut req = poll_request();
    req.domain = Some("eu".into());

    let tasks = client.batch_poll(&req).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].task_id, "t-1");
    assert_eq!(tasks[0].input("n"), Some(&json!(2)));
    assert_eq!(tasks[0].response_timeout(), Some(Duration::from_secs(60)));

    // Second poll reuses the cached token.
    client.batch_poll(&req).await.unwrap();

    token.assert_async().await;
    poll.assert_async().await;
}

#[tokio::test]
async fn no_content_and_null_bodies_mean_no_tasks() {
    let mut server = Server::new_async().await;
    let _token = server
        .mock("POST", "/api/token")
        .with_body(r#"{"token":"tok-1"}"#)
        .create_async()
        .await;
    let empty = server
        .mock("GET", POLL_PATH)
        .with_status(204)
        .expect(1)
        .create_async()
        .await;
    let null = server
        .mock("GET", POLL_PATH)
        .with_body("null")
        .expect(1)
        .create_async()
        .await;

    let client = client(&server, fast_auth(3, AuthStopBehavior::StopWorker));
    assert!(client.batch_poll(&poll_request()).await.unwrap().is_empty());
    assert!(client.batch_poll(&poll_request()).await.unwrap().is_empty());

    empty.assert_async().await;
    null.assert_async().await;
}

#[tokio::test]
async fn unauthorized_refreshes_token_retries_and_resets() {
    let mut server = Server::new_async().await;
    let token = server
        .mock("POST", "/api/token")
        .with_body(r#"{"token":"tok-1"}"#)
        .expect(2)
        .create_async()
        .await;
    let rejected = server
        .mock("GET", POLL_PATH)
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("GET", POLL_PATH)
        .with_body("[]")
        .expect(1)
        .create_async()
        .await;

    let client = client(&server, fast_auth(3, AuthStopBehavior::StopWorker));
    let tasks = client.batch_poll(&poll_request()).await.unwrap();
    assert!(tasks.is_empty());

    // initial fetch + forced refresh after the 401
    token.assert_async().await;
    rejected.assert_async().await;
    accepted.assert_async().await;
    assert_eq!(client.auth_state().attempts("tasks/poll/batch/orders"), 0);
}

#[tokio::test]
async fn exhausted_401_with_stop_is_fatal_then_fails_fast() {
    let mut server = Server::new_async().await;
    let _token = server
        .mock("POST", "/api/token")
        .with_body(r#"{"token":"tok-1"}"#)
        .create_async()
        .await;
    let poll = server
        .mock("GET", POLL_PATH)
        .with_status(401)
        .expect(4)
        .create_async()
        .await;

    let client = client(&server, fast_auth(2, AuthStopBehavior::StopWorker));

    let err = client.batch_poll(&poll_request()).await.unwrap_err();
    match &err {
        TransportError::AuthExhausted {
            attempts, stop, ..
        } => {
            assert_eq!(*attempts, 2);
            assert_eq!(*stop, AuthStopBehavior::StopWorker);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_fatal());

    // No more retries on this endpoint until a success resets it.
    let err = client.batch_poll(&poll_request()).await.unwrap_err();
    assert!(matches!(err, TransportError::Unauthorized { .. }));
    assert!(!err.is_fatal());

    poll.assert_async().await;
}

#[tokio::test]
async fn exhausted_401_with_continue_is_not_fatal() {
    let mut server = Server::new_async().await;
    let _token = server
        .mock("POST", "/api/token")
        .with_body(r#"{"token":"tok-1"}"#)
        .create_async()
        .await;
    let _poll = server
        .mock("GET", POLL_PATH)
        .with_status(401)
        .create_async()
        .await;

    let client = client(&server, fast_auth(1, AuthStopBehavior::Continue));
    let err = client.batch_poll(&poll_request()).await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::AuthExhausted {
            stop: AuthStopBehavior::Continue,
            ..
        }
    ));
    assert!(!err.is_fatal());
    assert_eq!(err.as_label(), "auth_exhausted");
}

#[tokio::test]
async fn forbidden_is_not_retried() {
    let mut server = Server::new_async().await;
    let _token = server
        .mock("POST", "/api/token")
        .with_body(r#"{"token":"tok-1"}"#)
        .create_async()
        .await;
    let poll = server
        .mock("GET", POLL_PATH)
        .with_status(403)
        .with_body("forbidden")
        .expect(1)
        .create_async()
        .await;

    let client = client(&server, fast_auth(3, AuthStopBehavior::StopWorker));
    let err = client.batch_poll(&poll_request()).await.unwrap_err();
    assert!(matches!(err, TransportError::Status { code: 403, .. }));
    assert_eq!(err.status_code(), Some(403));

    poll.assert_async().await;
}

#[tokio::test]
async fn rejected_credentials_fail_without_touching_the_endpoint() {
    let mut server = Server::new_async().await;
    let token = server
        .mock("POST", "/api/token")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let poll = server.mock("GET", POLL_PATH).expect(0).create_async().await;

    let client = client(&server, fast_auth(3, AuthStopBehavior::StopWorker));
    let err = client.batch_poll(&poll_request()).await.unwrap_err();
    assert!(matches!(err, TransportError::Unauthorized { ref path } if path == "token"));

    token.assert_async().await;
    poll.assert_async().await;
}

#[tokio::test]
async fn update_task_posts_the_outcome() {
    let mut server = Server::new_async().await;
    let update = server
        .mock("POST", "/api/tasks")
        .match_header("X-Authorization", "tok-1")
        .match_body(Matcher::PartialJson(json!({
            "taskId": "t-1",
            "workflowInstanceId": "wf-1",
            "workerId": "w-1",
            "status": "COMPLETED",
            "outputData": { "n": 4 }
        })))
        .with_body("t-1")
        .expect(1)
        .create_async()
        .await;
    let _token = server
        .mock("POST", "/api/token")
        .with_body(r#"{"token":"tok-1"}"#)
        .create_async()
        .await;

    let task = TaskEnvelope::new("t-1", "wf-1", "orders");
    let mut output = serde_json::Map::new();
    output.insert("n".into(), json!(4));
    let outcome = TaskOutcome::completed(output).for_task(&task, "w-1");

    let client = client(&server, fast_auth(3, AuthStopBehavior::StopWorker));
    client.update_task(&outcome).await.unwrap();

    update.assert_async().await;
}

#[tokio::test]
async fn registers_task_definitions() {
    let mut server = Server::new_async().await;
    let _token = server
        .mock("POST", "/api/token")
        .with_body(r#"{"token":"tok-1"}"#)
        .create_async()
        .await;
    let register = server
        .mock("POST", "/api/metadata/taskdefs")
        .match_body(Matcher::Regex(r#""name":"orders""#.into()))
        .expect(1)
        .create_async()
        .await;

    let client = client(&server, fast_auth(3, AuthStopBehavior::StopWorker));
    client
        .register_task_defs(&[TaskDef::new("orders")])
        .await
        .unwrap();

    register.assert_async().await;
}
