//! Integration tests for the Pub/Sub adapter
//!
//! The real `PubSubClient` runs against an in-process fake of the Pub/Sub
//! REST API, so no emulator or cloud project is needed.

#[cfg(test)]
mod integration {
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use hexagonal_adapter_pubsub::{
        get_results_json, ErrorKind, PubSubConfig, PubSubError, Publisher, RequestTimeout,
        RetryConfig, RunWorkflowCommand, RunWorkflowParams, Transport,
    };
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone)]
    struct RecordedRequest {
        project: String,
        topic: String,
        authorization: Option<String>,
        body: Value,
    }

    #[derive(Debug, Clone)]
    enum Reply {
        Status(StatusCode),
        Delay(Duration),
    }

    #[derive(Clone, Default)]
    struct FakePubSub {
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
        script: Arc<Mutex<VecDeque<Reply>>>,
    }

    impl FakePubSub {
        fn scripted(replies: Vec<Reply>) -> Self {
            let fake = Self::default();
            *fake.script.lock().unwrap() = replies.into();
            fake
        }

        fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    async fn publish_handler(
        State(fake): State<FakePubSub>,
        Path((project, topic)): Path<(String, String)>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let count = body["messages"].as_array().map(Vec::len).unwrap_or(0);
        fake.requests.lock().unwrap().push(RecordedRequest {
            project,
            topic,
            authorization: headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body,
        });

        let reply = fake.script.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Status(status)) => {
                return (status, Json(json!({"error": {"code": status.as_u16()}})));
            }
            Some(Reply::Delay(delay)) => tokio::time::sleep(delay).await,
            None => {}
        }

        let ids: Vec<String> = (0..count).map(|i| format!("70617077688122{i:02}")).collect();
        (StatusCode::OK, Json(json!({ "messageIds": ids })))
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    async fn start_fake(fake: FakePubSub) -> SocketAddr {
        let router = Router::new()
            .route("/v1/projects/:project/topics/:topic", post(publish_handler))
            .with_state(fake);
        serve(router).await
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_secs: 0.01,
            max_delay_secs: 0.05,
            jitter: 0.0,
        }
    }

    fn emulator_config(addr: SocketAddr) -> PubSubConfig {
        PubSubConfig::default()
            .with_emulator_host(addr.to_string())
            .with_retry(fast_retry(3))
    }

    fn run_workflow() -> RunWorkflowCommand {
        RunWorkflowCommand::new(
            RunWorkflowParams::new(
                "https://repo.prefix.dev/ecoscope-workflows/",
                "custom-events-workflow-pkg",
                "0.0.65",
                "run",
            )
            .with_invoker_kwarg("mock_io", json!(true))
            .with_invoker_kwarg("filter_events", json!({"min_x": -98.567, "max_x": 53.234})),
        )
        .unwrap()
    }

    fn decode_data(message: &Value) -> Vec<u8> {
        BASE64.decode(message["data"].as_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_publish_minimal_command() {
        let fake = FakePubSub::default();
        let addr = start_fake(fake.clone()).await;
        let publisher = Publisher::connect(emulator_config(addr).with_project("ecoscope-dev"))
            .await
            .unwrap();
        assert_eq!(publisher.publish_timeout(), Duration::from_secs(30));

        let command = run_workflow();
        let ack = publisher
            .publish(&[command.clone()], "workflow-requests")
            .await
            .unwrap();
        assert_eq!(ack.message_ids, vec!["7061707768812200"]);

        let requests = fake.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].project, "ecoscope-dev");
        assert_eq!(requests[0].topic, "workflow-requests:publish");
        assert_eq!(requests[0].authorization, None);

        let message = &requests[0].body["messages"][0];
        assert!(message.get("orderingKey").is_none());
        assert!(message.get("attributes").is_none());

        let decoded = RunWorkflowCommand::from_bytes(&decode_data(message)).unwrap();
        assert_eq!(decoded.id(), command.id());
        assert_eq!(decoded.payload(), command.payload());

        publisher.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_with_ordering_key_and_attributes() {
        let fake = FakePubSub::default();
        let addr = start_fake(fake.clone()).await;
        let publisher = Publisher::connect(emulator_config(addr).with_project("ecoscope-dev"))
            .await
            .unwrap();

        let command = run_workflow().with_attributes([("ordering_key", "12345"), ("key1", "value1")]);
        publisher.publish(&[command], "workflow-requests").await.unwrap();

        let message = &fake.requests()[0].body["messages"][0];
        assert_eq!(message["orderingKey"], json!("12345"));
        assert_eq!(message["attributes"], json!({"key1": "value1"}));

        let data: Value = serde_json::from_slice(&decode_data(message)).unwrap();
        assert!(data.get("attributes").is_none());
        assert_eq!(data["type"], json!("RunWorkflow"));
        assert_eq!(data["schema_version"], json!("v1"));
    }

    #[tokio::test]
    async fn test_batch_is_one_request_in_order() {
        let fake = FakePubSub::default();
        let addr = start_fake(fake.clone()).await;
        let publisher = Publisher::connect(emulator_config(addr).with_project("p"))
            .await
            .unwrap();

        let batch: Vec<RunWorkflowCommand> = (0..3).map(|_| run_workflow()).collect();
        let ack = publisher.publish(&batch, "t").await.unwrap();
        assert_eq!(ack.message_ids.len(), 3);

        let requests = fake.requests();
        assert_eq!(requests.len(), 1);
        let ids: Vec<_> = requests[0].body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| RunWorkflowCommand::from_bytes(&decode_data(m)).unwrap().id())
            .collect();
        let expected: Vec<_> = batch.iter().map(|c| c.id()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_retries_after_unavailable() {
        let fake = FakePubSub::scripted(vec![Reply::Status(StatusCode::SERVICE_UNAVAILABLE)]);
        let addr = start_fake(fake.clone()).await;
        let publisher = Publisher::connect(emulator_config(addr).with_project("p"))
            .await
            .unwrap();

        let ack = publisher.publish(&[run_workflow()], "t").await.unwrap();
        assert_eq!(ack.message_ids.len(), 1);

        let requests = fake.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].body, requests[1].body);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_unavailable() {
        let fake = FakePubSub::scripted(vec![
            Reply::Status(StatusCode::SERVICE_UNAVAILABLE),
            Reply::Status(StatusCode::TOO_MANY_REQUESTS),
            Reply::Status(StatusCode::BAD_GATEWAY),
        ]);
        let addr = start_fake(fake.clone()).await;
        let publisher = Publisher::connect(emulator_config(addr).with_project("p"))
            .await
            .unwrap();

        let err = publisher.publish(&[run_workflow()], "t").await.unwrap_err();
        assert!(matches!(err, PubSubError::Unavailable { status: 502, .. }));
        assert_eq!(fake.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let fake = FakePubSub::scripted(vec![Reply::Status(StatusCode::NOT_FOUND)]);
        let addr = start_fake(fake.clone()).await;
        let publisher = Publisher::connect(emulator_config(addr).with_project("p"))
            .await
            .unwrap();

        let err = publisher.publish(&[run_workflow()], "t").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert_eq!(fake.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_slow_broker_times_out_and_is_retried() {
        let fake = FakePubSub::scripted(vec![
            Reply::Delay(Duration::from_secs(2)),
            Reply::Delay(Duration::from_secs(2)),
        ]);
        let addr = start_fake(fake.clone()).await;
        let config = emulator_config(addr)
            .with_project("p")
            .with_publish_timeout(RequestTimeout::secs(0.2))
            .with_retry(fast_retry(2));
        let publisher = Publisher::connect(config).await.unwrap();

        let err = publisher.publish(&[run_workflow()], "t").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(fake.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let publisher = Publisher::connect(emulator_config(addr).with_project("p"))
            .await
            .unwrap();
        let err = publisher.publish(&[run_workflow()], "t").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_static_token_is_sent_as_bearer() {
        let fake = FakePubSub::default();
        let addr = start_fake(fake.clone()).await;
        let config = PubSubConfig::default()
            .with_api_root(format!("http://{addr}/v1"))
            .with_token("secret-token")
            .with_project("p");
        let publisher = Publisher::connect(config).await.unwrap();

        publisher.publish(&[run_workflow()], "t").await.unwrap();
        assert_eq!(
            fake.requests()[0].authorization.as_deref(),
            Some("Bearer secret-token")
        );
    }

    #[tokio::test]
    async fn test_missing_project_fails_before_network() {
        let fake = FakePubSub::default();
        let addr = start_fake(fake.clone()).await;
        let publisher = Publisher::connect(emulator_config(addr)).await.unwrap();

        let err = publisher.publish(&[run_workflow()], "t").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(fake.requests().is_empty());
    }

    #[tokio::test]
    async fn test_scoped_publisher_is_closed_afterwards() {
        let fake = FakePubSub::default();
        let addr = start_fake(fake.clone()).await;
        let publisher = Publisher::connect(emulator_config(addr).with_project("p"))
            .await
            .unwrap();

        let mut kept = None;
        let ack = publisher
            .scoped(|p| {
                kept = Some(p.clone());
                async move { p.publish(&[run_workflow()], "t").await }
            })
            .await
            .unwrap();
        assert_eq!(ack.message_ids.len(), 1);

        let publisher = kept.unwrap();
        let err = publisher.publish(&[run_workflow()], "t").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Closed);
        assert!(publisher.transport().resolve_topic("t", None).is_ok());
    }

    #[tokio::test]
    async fn test_connect_with_invalid_timeouts_is_config_error() {
        let config = PubSubConfig::default()
            .with_emulator_host("127.0.0.1:1")
            .with_publish_timeout(RequestTimeout::secs(-1.0));
        let err = Publisher::connect(config).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);

        let config = PubSubConfig::default()
            .with_emulator_host("127.0.0.1:1")
            .with_retry(RetryConfig {
                max_delay_secs: 1e30,
                ..fast_retry(3)
            });
        let err = Publisher::connect(config).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    async fn results_handler(Path(run): Path<String>) -> (StatusCode, String) {
        match run.as_str() {
            "run-1" => (StatusCode::OK, r#"{"key": "value"}"#.to_string()),
            "empty" => (StatusCode::OK, String::new()),
            _ => (StatusCode::NOT_FOUND, String::new()),
        }
    }

    #[tokio::test]
    async fn test_get_results_json_over_http() {
        let router = Router::new().route("/results/:run/result.json", get(results_handler));
        let addr = serve(router).await;

        let results = get_results_json(&format!("http://{addr}/results/run-1"))
            .await
            .unwrap();
        assert_eq!(results, json!({"key": "value"}));

        let err = get_results_json(&format!("http://{addr}/results/missing/"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = get_results_json(&format!("http://{addr}/results/empty"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    }
}
