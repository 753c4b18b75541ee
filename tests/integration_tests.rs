use formsendr::{
    config::{AppConfig, MailTransportKind},
    create_app,
    mail::Mailer,
    AppState,
};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.mail.transport = MailTransportKind::Log;
    config.security.force_https = false;
    config
}

async fn spawn_app(config: AppConfig) -> (String, AppState) {
    let mailer = Mailer::from_config(&config.mail).unwrap();
    let state = AppState::with_mailer(config, mailer, None).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_app(state.clone());
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (format!("http://{addr}"), state)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (base, _) = spawn_app(test_config()).await;

    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    assert_eq!(
        resp.headers()["content-security-policy"],
        "default-src 'self'; script-src 'self'; style-src 'self'"
    );
    assert!(resp.headers().contains_key("x-request-id"));

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"status": "healthy"}));
}

#[tokio::test]
async fn test_detailed_health_reports_configuration() {
    let (base, _) = spawn_app(test_config()).await;

    let body: Value = reqwest::get(format!("{base}/api/v1/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "formsendr");
    assert_eq!(body["mail"]["transport"], "log");
    assert_eq!(body["rate_limit"]["policy"], "5 per minute;100 per day");
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let (base, _) = spawn_app(test_config()).await;

    let resp = reqwest::Client::new()
        .get(format!("{base}/health"))
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "abc-123");
}

#[tokio::test]
async fn test_url_encoded_submission_is_relayed() {
    let (base, state) = spawn_app(test_config()).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/send/owner@example.com"))
        .form(&[
            ("name", "Ada"),
            ("email", "ada@example.org"),
            ("message", "<b>Hello</b> there"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-ratelimit-limit"], "5");
    assert_eq!(resp.headers()["x-ratelimit-remaining"], "4");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Email sent successfully");

    let outbox = state.mailer.outbox().await;
    assert_eq!(outbox.len(), 1);
    let (envelope, raw) = &outbox[0];
    assert_eq!(envelope.to()[0].to_string(), "owner@example.com");
    assert!(raw.contains("Subject: New Form Submission from Ada"));
    assert!(raw.contains("Reply-To:"));
    assert!(raw.contains("ada@example.org"));
    assert!(!raw.contains("<b>Hello</b>"));
}

#[tokio::test]
async fn test_json_submission_is_relayed() {
    let (base, state) = spawn_app(test_config()).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/send/owner@example.com"))
        .json(&json!({"name": "Grace", "details": {"plan": "pro", "seats": 3}}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let outbox = state.mailer.outbox().await;
    assert_eq!(outbox.len(), 1);
    assert!(outbox[0].1.contains("New Form Submission from Grace"));
}

#[tokio::test]
async fn test_invalid_recipient_is_rejected() {
    let (base, state) = spawn_app(test_config()).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/send/not-an-email"))
        .form(&[("name", "Ada")])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "Invalid recipient email address");
    assert!(state.mailer.outbox().await.is_empty());
}

#[tokio::test]
async fn test_empty_form_is_rejected() {
    let (base, _) = spawn_app(test_config()).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/send/owner@example.com"))
        .header("content-type", "text/plain")
        .body("ignored")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Invalid form data");
    assert_eq!(body["details"]["form"], "No form data received");
}

#[tokio::test]
async fn test_oversized_form_is_rejected() {
    let (base, state) = spawn_app(test_config()).await;

    let message = "x".repeat(12_000);
    let resp = reqwest::Client::new()
        .post(format!("{base}/send/owner@example.com"))
        .form(&[("message", message.as_str())])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Invalid form data");
    assert!(state.mailer.outbox().await.is_empty());
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let (base, _) = spawn_app(test_config()).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/send/owner@example.com"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_rate_limit_blocks_after_quota() {
    let mut config = test_config();
    config.rate_limit.policy = Some("2 per minute".to_string());
    let (base, state) = spawn_app(config).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let resp = client
            .post(format!("{base}/send/owner@example.com"))
            .form(&[("name", "Ada")])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = client
        .post(format!("{base}/send/owner@example.com"))
        .form(&[("name", "Ada")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = resp.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 60);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Rate limit exceeded. Please try again later.");

    assert_eq!(state.mailer.outbox().await.len(), 2);

    // Unlimited routes are unaffected.
    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_can_be_disabled() {
    let mut config = test_config();
    config.rate_limit.policy = Some("1 per minute".to_string());
    config.rate_limit.enabled = false;
    let (base, _) = spawn_app(config).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let resp = client
            .post(format!("{base}/send/owner@example.com"))
            .form(&[("name", "Ada")])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.headers().contains_key("x-ratelimit-limit"));
    }
}

#[tokio::test]
async fn test_background_delivery_answers_accepted() {
    let mut config = test_config();
    config.mail.send_in_background = true;
    let (base, state) = spawn_app(config).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/send/owner@example.com"))
        .form(&[("name", "Ada")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Email is being sent");

    let mut delivered = 0;
    for _ in 0..50 {
        delivered = state.mailer.outbox().await.len();
        if delivered > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(delivered, 1);
}

#[tokio::test]
async fn test_background_sends_finish_before_drain_returns() {
    let mut config = test_config();
    config.mail.send_in_background = true;
    let (base, state) = spawn_app(config).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let resp = client
            .post(format!("{base}/send/owner@example.com"))
            .form(&[("name", "Ada")])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    assert_eq!(state.drain_background(Duration::from_secs(5)).await, 0);
    assert_eq!(state.mailer.outbox().await.len(), 3);
}

#[tokio::test]
async fn test_contact_requires_all_fields() {
    let (base, _) = spawn_app(test_config()).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/contact"))
        .form(&[("name", "Ada"), ("email", "  "), ("message", "hi")])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Please fill in all required fields.");
    assert_eq!(body["details"]["missing"], json!(["email", "subject"]));
}

#[tokio::test]
async fn test_contact_rejects_invalid_email() {
    let (base, _) = spawn_app(test_config()).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/contact"))
        .form(&[
            ("name", "Ada"),
            ("email", "ada-at-example"),
            ("subject", "Hi"),
            ("message", "hello"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Please enter a valid email address.");
}

#[tokio::test]
async fn test_contact_without_recipient_is_only_logged() {
    let (base, state) = spawn_app(test_config()).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/contact"))
        .json(&json!({
            "name": "Ada",
            "email": "ada@example.org",
            "subject": "Hi",
            "message": "hello"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["message"],
        "Thank you for your message! We'll get back to you soon."
    );
    assert!(state.mailer.outbox().await.is_empty());
}

#[tokio::test]
async fn test_contact_with_recipient_is_relayed() {
    let mut config = test_config();
    config.contact.recipient = Some("owner@example.com".to_string());
    let (base, state) = spawn_app(config).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/contact"))
        .form(&[
            ("name", "Ada"),
            ("email", "ada@example.org"),
            ("subject", "<i>Question</i>"),
            ("message", "hello"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let outbox = state.mailer.outbox().await;
    assert_eq!(outbox.len(), 1);
    assert!(outbox[0].1.contains("Subject: Contact Form: Question"));
}

#[tokio::test]
async fn test_contact_validates_email_as_typed() {
    let mut config = test_config();
    config.contact.recipient = Some("owner@example.com".to_string());
    let (base, state) = spawn_app(config).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/contact"))
        .form(&[
            ("name", "Ada"),
            ("email", "ada<x>@example.org"),
            ("subject", "Hi"),
            ("message", "hello"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Please enter a valid email address.");
    assert!(state.mailer.outbox().await.is_empty());
}

#[tokio::test]
async fn test_contact_markup_only_field_is_not_missing() {
    let (base, _) = spawn_app(test_config()).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/contact"))
        .form(&[
            ("name", "<b></b>"),
            ("email", "ada@example.org"),
            ("subject", "Hi"),
            ("message", "hello"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_contact_form_description() {
    let (base, _) = spawn_app(test_config()).await;

    let body: Value = reqwest::get(format!("{base}/contact"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["fields"], json!(["name", "email", "subject", "message"]));
}

#[tokio::test]
async fn test_unknown_route_returns_json_404() {
    let (base, _) = spawn_app(test_config()).await;

    let resp = reqwest::get(format!("{base}/nope")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Page not found");
}

#[tokio::test]
async fn test_docs_and_index() {
    let (base, _) = spawn_app(test_config()).await;

    let docs: Value = reqwest::get(format!("{base}/docs"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(docs["paths"]["/send/{recipient_email}"]["post"].is_object());

    let index: Value = reqwest::get(format!("{base}/"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(index["service"], "formsendr");
    assert!(index["endpoints"].as_array().unwrap().len() >= 5);
}

#[tokio::test]
async fn test_metrics_endpoint_without_recorder() {
    let (base, _) = spawn_app(test_config()).await;

    let resp = reqwest::get(format!("{base}/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_force_https_redirects_plain_requests() {
    let mut config = test_config();
    config.security.force_https = true;
    config.server.trust_proxy_headers = true;
    let (base, _) = spawn_app(config).await;
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let resp = client.get(format!("{base}/docs")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = resp.headers()["location"].to_str().unwrap();
    assert!(location.starts_with("https://127.0.0.1:"));
    assert!(location.ends_with("/docs"));

    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .get(format!("{base}/docs"))
        .header("x-forwarded-proto", "https")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("strict-transport-security"));
}

#[tokio::test]
async fn test_forwarded_proto_ignored_without_trusted_proxy() {
    let mut config = test_config();
    config.security.force_https = true;
    let (base, _) = spawn_app(config).await;
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let resp = client
        .get(format!("{base}/docs"))
        .header("x-forwarded-proto", "https")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert!(!resp.headers().contains_key("strict-transport-security"));
}
