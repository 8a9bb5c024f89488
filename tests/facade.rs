use qianfan_chat::client::{DEFAULT_FALLBACK_MESSAGE, NO_CHOICES};
use qianfan_chat::provider::stub::StubProvider;
use qianfan_chat::provider::CompletionResponse;
use qianfan_chat::{
    Cancellation, ChatClient, ChatOutput, ClientError, ClientSettings, GenerationParams, Message,
    Prompt, RetryPolicy,
};
use std::time::Duration;
use tokio::time::Instant;

fn client(stub: &StubProvider) -> ChatClient {
    ChatClient::new(stub.clone(), ClientSettings::default())
}

fn net(msg: &str) -> ClientError {
    ClientError::Network(msg.to_string())
}

fn gaps(instants: &[Instant]) -> Vec<Duration> {
    instants.windows(2).map(|w| w[1] - w[0]).collect()
}

#[tokio::test(start_paused = true)]
async fn single_turn_returns_plain_text() {
    let stub = StubProvider::scripted().reply_text("Hi there");
    let out = client(&stub)
        .chat(Prompt::single("Hello"), GenerationParams::default())
        .await
        .unwrap();

    match out {
        ChatOutput::Text(s) => assert_eq!(s, "Hi there"),
        other => panic!("expected text, got {other:?}"),
    }
    assert_eq!(stub.calls(), 1);

    let req = &stub.requests()[0];
    assert_eq!(req.messages, vec![Message::user("Hello")]);
    assert_eq!(req.temperature, 0.7);
    assert_eq!(req.top_p, 0.9);
    assert!(!req.stream);
}

#[tokio::test(start_paused = true)]
async fn first_attempt_success_does_not_sleep() {
    let stub = StubProvider::scripted().reply_text("ok");
    let start = Instant::now();
    let out = client(&stub)
        .chat(Prompt::one_shot("sys", "hi"), GenerationParams::default())
        .await
        .unwrap();
    assert_eq!(out.into_text().await, "ok");
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn conversation_returns_structured_result() {
    let mut resp = CompletionResponse::text("fine, thanks");
    resp.model = Some("ernie-4.0-turbo-8k".into());
    resp.usage = Some(serde_json::json!({"total_tokens": 12}));
    let stub = StubProvider::scripted().reply(Ok(resp));

    let msgs = vec![
        Message::system("s"),
        Message::user("hi"),
        Message::assistant("hello"),
        Message::user("how are you?"),
    ];
    let out = client(&stub)
        .chat(Prompt::conversation(msgs.clone()), GenerationParams::default())
        .await
        .unwrap();

    let ChatOutput::Structured(r) = out else {
        panic!("expected structured result");
    };
    assert_eq!(r.content, "fine, thanks");
    assert_eq!(r.model, "ernie-4.0-turbo-8k");
    assert_eq!(r.finish_reason, "stop");
    assert_eq!(r.usage["total_tokens"], 12);
    assert_eq!(r.error, None);
    assert_eq!(stub.requests()[0].messages, msgs);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_then_success() {
    let stub = StubProvider::scripted()
        .fail(net("connection reset"))
        .fail(ClientError::Http { status: 502, body: "bad gateway".into() })
        .reply_text("third time lucky");
    let c = ChatClient::new(
        stub.clone(),
        ClientSettings {
            retry: RetryPolicy::new(4, Duration::from_secs(1)),
            ..Default::default()
        },
    );

    let out = c
        .chat(Prompt::single("q"), GenerationParams::default())
        .await
        .unwrap();
    assert_eq!(out.into_text().await, "third time lucky");
    assert_eq!(stub.calls(), 3);
    assert_eq!(
        gaps(&stub.call_instants()),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[tokio::test(start_paused = true)]
async fn endpoint_error_objects_are_retried() {
    let stub = StubProvider::scripted()
        .fail(ClientError::Api {
            code: "rpm_rate_limit_exceeded".into(),
            message: "slow down".into(),
        })
        .reply_text("recovered");
    let out = client(&stub)
        .chat(Prompt::single("q"), GenerationParams::default())
        .await
        .unwrap();
    assert_eq!(out.into_text().await, "recovered");
    assert_eq!(stub.calls(), 2);
    assert_eq!(gaps(&stub.call_instants()), vec![Duration::from_secs(1)]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_return_fallback_and_error() {
    let stub = StubProvider::scripted()
        .fail(net("a"))
        .fail(net("b"))
        .fail(net("timed out"));
    let out = client(&stub)
        .chat(Prompt::conversation(vec![Message::user("q")]), GenerationParams::default())
        .await
        .unwrap();

    let ChatOutput::Structured(r) = out else {
        panic!("expected structured result");
    };
    assert_eq!(r.content, DEFAULT_FALLBACK_MESSAGE);
    assert!(r.error.as_deref().unwrap().contains("timed out"));
    assert_ne!(r.content, r.error.clone().unwrap());
    assert_eq!(stub.calls(), 3);
    assert_eq!(
        gaps(&stub.call_instants()),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[tokio::test(start_paused = true)]
async fn plain_text_failure_yields_fallback_text() {
    let stub = StubProvider::scripted().fail(net("down"));
    let out = client(&stub)
        .chat_with_retries(Prompt::single("q"), GenerationParams::default(), 1)
        .await
        .unwrap();
    assert_eq!(out.into_text().await, DEFAULT_FALLBACK_MESSAGE);
    assert_eq!(stub.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn zero_choices_is_not_retried() {
    let stub = StubProvider::scripted()
        .reply(Ok(CompletionResponse::default()))
        .reply_text("never reached");
    let out = client(&stub)
        .chat(Prompt::conversation(vec![Message::user("q")]), GenerationParams::default())
        .await
        .unwrap();

    let ChatOutput::Structured(r) = out else {
        panic!("expected structured result");
    };
    assert_eq!(r.error.as_deref(), Some(NO_CHOICES));
    assert_eq!(r.content, "");
    assert_eq!(stub.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn per_call_retry_bound_leaves_client_untouched() {
    let stub = StubProvider::scripted()
        .fail(net("1"))
        .fail(net("2"))
        .fail(net("3"))
        .fail(net("4"))
        .fail(net("5"))
        .reply_text("ok");
    let c = client(&stub);

    let r = c.safe_call("sys", "q", 5).await;
    assert_eq!(r, DEFAULT_FALLBACK_MESSAGE);
    assert_eq!(stub.calls(), 5);
    assert_eq!(c.settings().retry.max_retries, 3);

    // A failing override call does not leak its bound either.
    let err = c
        .chat_with_retries(Prompt::conversation(vec![]), GenerationParams::default(), 9)
        .await;
    assert!(matches!(err, Err(ClientError::InvalidArgument(_))));
    assert_eq!(c.settings().retry.max_retries, 3);

    let out = c.safe_call("sys", "q", 1).await;
    assert_eq!(out, "ok");
    assert_eq!(c.settings().retry.max_retries, 3);
}

#[tokio::test]
async fn invalid_input_fails_before_any_request() {
    let stub = StubProvider::scripted().reply_text("x");
    let c = client(&stub);

    let bad_params = GenerationParams {
        temperature: 3.0,
        ..Default::default()
    };
    assert!(matches!(
        c.chat(Prompt::single("q"), bad_params).await,
        Err(ClientError::InvalidArgument(_))
    ));
    assert!(matches!(
        c.chat(
            Prompt::conversation(vec![Message::user("q"), Message::assistant("a")]),
            GenerationParams::default()
        )
        .await,
        Err(ClientError::InvalidArgument(_))
    ));
    assert!(matches!(
        Prompt::from_parts(Some("sys".into()), None, None),
        Err(ClientError::InvalidArgument(_))
    ));
    assert_eq!(stub.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn passthrough_options_reach_the_request() {
    let stub = StubProvider::scripted().reply_text("x");
    let params = GenerationParams::default().option("max_output_tokens", serde_json::json!(64));
    client(&stub)
        .chat(Prompt::single("q"), params)
        .await
        .unwrap();
    let req = &stub.requests()[0];
    assert_eq!(req.options["max_output_tokens"], 64);
}

#[tokio::test(start_paused = true)]
async fn history_chat_appends_user_turn() {
    let stub = StubProvider::scripted().reply_text("nice to meet you");
    let c = client(&stub);
    let mut history = vec![Message::system("friendly")];

    let reply = c.chat_with_history(&mut history, "I'm Lin").await;
    assert_eq!(reply, "nice to meet you");
    assert_eq!(history, vec![Message::system("friendly"), Message::user("I'm Lin")]);
    assert_eq!(stub.requests()[0].messages, history);
}

#[tokio::test(start_paused = true)]
async fn deadline_stops_retrying() {
    let stub = StubProvider::scripted()
        .fail(net("a"))
        .fail(net("b"))
        .fail(net("c"));
    let c = client(&stub);

    let start = Instant::now();
    let cancel = Cancellation::none().with_timeout(Duration::from_millis(1500));
    let r = c
        .complete(Prompt::single("q"), GenerationParams::default(), cancel)
        .await
        .unwrap();

    assert_eq!(r.error.as_deref(), Some("deadline exceeded"));
    assert_eq!(r.content, DEFAULT_FALLBACK_MESSAGE);
    // Attempt at 0s, retry at 1s, deadline hits during the 2s backoff.
    assert_eq!(stub.calls(), 2);
    assert_eq!(start.elapsed(), Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_makes_no_request() {
    let stub = StubProvider::scripted().reply_text("x");
    let (cancel, handle) = Cancellation::new();
    handle.cancel();

    let r = client(&stub)
        .complete(Prompt::single("q"), GenerationParams::default(), cancel)
        .await
        .unwrap();
    assert_eq!(r.error.as_deref(), Some("request cancelled"));
    assert_eq!(stub.calls(), 0);
}
