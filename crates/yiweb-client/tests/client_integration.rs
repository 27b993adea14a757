//! End-to-end behaviour of the client against a scripted transport


use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use test_support::{api, data, local_client, local_client_with, ms, test_config};
use yiweb_client::http::{MockResponse, TransportResponse};
use yiweb_client::loading::IndicatorEvent;
use yiweb_client::{
    retry, BatchOperation, ClientConfig, ErrorKind, LoadingOptions, Method, Payload, QueryParams, RequestError,
    RequestOptions, Rule, ValidationRules,
};

#[tokio::test]
async fn test_batch_with_one_failure_counts() {
    let h = local_client();
    h.mock.add_response(Method::Get, &api("/news"), MockResponse::json(200, json!([{"id": 1}])));
    h.mock.add_response(Method::Get, &api("/tasks"), MockResponse::json(500, json!({"error": "boom"})));
    h.mock.add_response(Method::Put, &api("/tasks/1"), MockResponse::json(200, json!({"id": 1, "done": true})));

    let result = h
        .client
        .api()
        .batch(vec![
            BatchOperation::get("/news"),
            BatchOperation::get("/tasks"),
            BatchOperation::update("/tasks/1", json!({"done": true})),
        ])
        .await;

    assert_eq!(result.success_count, 2);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.results.len(), 3);

    let failed = result.results[1].outcome.as_ref().unwrap_err();
    assert_eq!(failed.kind(), ErrorKind::HttpStatus);
    assert_eq!(failed.message, "internal server error");
    assert_eq!(failed.url.as_deref(), Some(api("/tasks").as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_beats_late_response() {
    let h = local_client();
    h.mock.add_response(
        Method::Get,
        &api("/slow"),
        MockResponse::json(200, json!({"late": true})).with_delay(ms(101)),
    );

    let err = h
        .client
        .api()
        .get("/slow", None, &RequestOptions::default().with_timeout(ms(100)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.message, "request timed out: 100ms");
    assert_eq!(h.mock.completed_count(), 0);
    assert_eq!(h.mock.in_flight_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_default_client_sends_a_timed_out_request_once() {
    let h = local_client_with(ClientConfig::default());
    for _ in 0..3 {
        h.mock.add_response(Method::Get, &api("/slow"), MockResponse::json(200, json!({})).with_delay(ms(101)));
    }

    let started = tokio::time::Instant::now();
    let err = h
        .client
        .api()
        .get("/slow", None, &RequestOptions::default().with_timeout(ms(100)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(h.mock.call_count(), 1);
    assert!(started.elapsed() < ms(200));
}

#[tokio::test(start_paused = true)]
async fn test_configured_timeout_applies_by_default() {
    let h = local_client_with(ClientConfig {
        timeout: ms(250),
        ..test_config()
    });
    h.mock.add_response(Method::Get, &api("/slow"), MockResponse::json(200, json!({})).with_delay(ms(300)));

    let err = h.client.api().get("/slow", None, &RequestOptions::default()).await.unwrap_err();
    assert_eq!(err.message, "request timed out: 250ms");
}

#[tokio::test(start_paused = true)]
async fn test_fast_request_never_shows_indicator() {
    let h = local_client();
    h.mock.add_response(Method::Get, &api("/news"), MockResponse::json(200, json!([])).with_delay(ms(1000)));

    let options = RequestOptions::default().with_loading(LoadingOptions::new("Loading news"));
    h.client.api().get("/news", None, &options).await.unwrap();
    assert!(h.indicator.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_configured_loading_delay_reaches_plain_options() {
    let h = local_client_with(ClientConfig {
        loading_delay: ms(500),
        ..test_config()
    });
    h.mock.add_response(Method::Get, &api("/news"), MockResponse::json(200, json!([])).with_delay(ms(1000)));

    let options = RequestOptions::default().with_loading(LoadingOptions::new("Loading news"));
    h.client.api().get("/news", None, &options).await.unwrap();
    assert_eq!(h.indicator.shown_count(), 1);
    assert_eq!(h.indicator.hidden_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_user_cancel_aborts_request() {
    let h = local_client();
    h.mock.add_response(Method::Get, &api("/export"), MockResponse::json(200, json!({})).with_delay(Duration::from_secs(30)));

    let options = RequestOptions::default().with_loading(h.client.loading_options("Exporting").cancellable());
    let indicator = h.indicator.clone();
    let user = async move {
        tokio::time::sleep(Duration::from_secs(4)).await;
        indicator.last_cancel_handle().expect("indicator shown with cancel").cancel();
    };

    let (result, ()) = tokio::join!(h.client.api().get("/export", None, &options), user);
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(h.mock.completed_count(), 0);

    let events = h.indicator.events();
    assert!(matches!(events.first(), Some(IndicatorEvent::Shown { cancellable: true, .. })));
    assert!(matches!(events.last(), Some(IndicatorEvent::Hidden { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_cached_get_expires_after_ttl() {
    let h = local_client();
    h.mock.add_response(Method::Get, &api("/list?b=2&a=1"), MockResponse::json(200, json!([1])));
    h.mock.add_response(Method::Get, &api("/list?a=1&b=2"), MockResponse::json(200, json!([2])));

    let options = RequestOptions::default().cached(Some(ms(100)));
    let first = QueryParams::new().with("b", "2").with("a", "1");
    let same = QueryParams::new().with("a", "1").with("b", "2");

    let one = h.client.api().get("/list", Some(&first), &options).await.unwrap();
    // different insertion order, same fingerprint
    let cached = h.client.api().get("/list", Some(&same), &options).await.unwrap();
    assert_eq!(one, cached);
    assert_eq!(h.mock.call_count(), 1);

    tokio::time::advance(ms(101)).await;
    let fresh = h.client.api().get("/list", Some(&same), &options).await.unwrap();
    assert_eq!(fresh, Payload::Json(json!([2])));
    assert_eq!(h.mock.call_count(), 2);
}

#[tokio::test]
async fn test_validation_failure_never_hits_network() {
    let h = local_client();
    let rules = ValidationRules::new()
        .field("name", [Rule::Required, Rule::MaxLength(8)])
        .field("url", [Rule::Required]);

    let err = h
        .client
        .api()
        .create("/websites", &json!({"name": "a very long site name"}), Some(&rules), &RequestOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!((err.field.as_deref(), err.rule.as_deref()), (Some("name"), Some("max_length")));
    assert_eq!(h.mock.call_count(), 0);
}

#[tokio::test]
async fn test_unauthorized_is_classified() {
    let h = local_client();
    h.client.tokens().save_token("stale");
    h.mock.add_response(Method::Get, &api("/me"), MockResponse::json(401, json!({})));

    let err = h.client.api().get("/me", None, &RequestOptions::default()).await.unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(err.message, "unauthorized, please sign in again");
    assert_eq!(h.mock.calls()[0].header("x-token"), Some("stale"));
}

#[tokio::test]
async fn test_explicit_token_overrides_stored() {
    let h = local_client();
    h.client.tokens().save_token("stored");
    h.mock.add_response(Method::Delete, &api("/tasks/9"), MockResponse::json(200, json!({})));

    h.client
        .api()
        .delete("/tasks/9", &RequestOptions::default().with_token("explicit"))
        .await
        .unwrap();
    assert_eq!(h.mock.calls()[0].header("x-token"), Some("explicit"));
}

#[tokio::test]
async fn test_text_and_no_content_payloads() {
    let h = local_client();
    h.mock.add_response(Method::Get, &data("/readme.md"), MockResponse::text(200, "# YiWeb"));
    h.mock.add_response(
        Method::Delete,
        &api("/tasks/1"),
        MockResponse::from_response(TransportResponse::new(204, "")),
    );

    let readme = h.client.data().get("/readme.md", None, &RequestOptions::default()).await.unwrap();
    assert_eq!(readme.as_text(), Some("# YiWeb"));

    let deleted = h.client.api().delete("/tasks/1", &RequestOptions::default()).await.unwrap();
    assert_eq!(deleted, Payload::Text(String::new()));
}

#[tokio::test]
async fn test_retry_helper_with_client_calls() {
    let h = local_client();
    h.mock.add_response(Method::Get, &api("/flaky"), MockResponse::network_error("connection reset"));
    h.mock.add_response(Method::Get, &api("/flaky"), MockResponse::network_error("connection reset"));
    h.mock.add_response(Method::Get, &api("/flaky"), MockResponse::json(200, json!({"ok": true})));

    let opts = RequestOptions::default();
    let payload = retry(
        || h.client.api().get("/flaky", None, &opts),
        3,
        Duration::ZERO,
    )
    .await
    .unwrap();
    assert_eq!(payload, Payload::Json(json!({"ok": true})));
    assert_eq!(h.mock.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_client_retry_policy_recovers_idempotent_reads() {
    let h = local_client_with(ClientConfig {
        retry: yiweb_client::RetryPolicy::new(2, ms(500)),
        ..test_config()
    });
    h.mock.add_response(Method::Get, &api("/feed"), MockResponse::json(502, json!({})));
    h.mock.add_response(Method::Get, &api("/feed"), MockResponse::json(200, json!(["item"])));

    let payload = h.client.api().get("/feed", None, &RequestOptions::default()).await.unwrap();
    assert_eq!(payload, Payload::Json(json!(["item"])));
}

#[tokio::test]
async fn test_payload_deserializes_into_types() {
    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Site {
        name: String,
        url: String,
    }

    let h = local_client();
    h.mock.add_response(
        Method::Get,
        &data("/sites.json"),
        MockResponse::json(200, json!([{"name": "Rust", "url": "https://rust-lang.org"}])),
    );

    let sites: Vec<Site> = h
        .client
        .data()
        .get("/sites.json", None, &RequestOptions::default())
        .await
        .and_then(|p| p.deserialize())
        .unwrap();
    assert_eq!(sites[0].name, "Rust");

    let wrong: Result<Vec<u32>, RequestError> = Payload::Json(json!(["x"])).deserialize();
    assert_eq!(wrong.unwrap_err().kind(), ErrorKind::Parse);
}
