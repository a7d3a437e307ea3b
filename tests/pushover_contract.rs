//! Contract tests for Pushover delivery against a mock HTTP server

use std::collections::HashMap;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use iqamah::config::Config;
use iqamah::notify::{Notifier, MAX_MESSAGE_LENGTH};

fn config(pushover: bool) -> Config {
    let mut env: HashMap<&str, &str> = HashMap::new();
    env.insert("MOSQUE_SLUG", "test-mosque");
    env.insert("HTTP_TIMEOUT_SECS", "5");
    if pushover {
        env.insert("PUSHOVER_USER_KEY", "user-key");
        env.insert("PUSHOVER_API_TOKEN", "api-token");
    }
    Config::from_getter(|key| env.get(key).map(|v| v.to_string())).unwrap()
}

fn notifier(server: &MockServer) -> Notifier {
    Notifier::new(&config(true))
        .unwrap()
        .with_api_url(&format!("{}/1/messages.json", server.uri()))
}

#[tokio::test]
async fn test_delivers_form_encoded_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/1/messages.json"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("token=api-token"))
        .and(body_string_contains("user=user-key"))
        .and(body_string_contains("title=Dhuhr"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":1,"request":"abc"}"#))
        .expect(1)
        .mount(&server)
        .await;

    notifier(&server)
        .send("Dhuhr", "Dhuhr adhan in 15 minutes (12:00)")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rejected_credentials_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string(r#"{"status":0,"errors":["application token is invalid"]}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = notifier(&server).send("Asr", "Asr adhan now").await.unwrap_err();
    assert!(format!("{:#}", err).contains("application token is invalid"), "{:#}", err);
}

#[tokio::test]
async fn test_status_zero_with_200_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"status":0,"errors":["user key is invalid"]}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    assert!(notifier(&server).send("Asr", "Asr adhan now").await.is_err());
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":1}"#))
        .expect(1)
        .mount(&server)
        .await;

    notifier(&server).send("Isha", "Isha iqama in 5 minutes").await.unwrap();
}

#[tokio::test]
async fn test_long_messages_are_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":1}"#))
        .expect(1)
        .mount(&server)
        .await;

    let long = "word ".repeat(1000);
    notifier(&server).send("Fajr", &long).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body).to_string();
    let message = body
        .split('&')
        .find_map(|pair| pair.strip_prefix("message="))
        .unwrap();
    // "word+" is 5 bytes encoded, same as "word " decoded
    assert!(message.len() <= MAX_MESSAGE_LENGTH);
    assert!(message.ends_with("..."));
}

#[tokio::test]
async fn test_without_credentials_nothing_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let notifier = Notifier::new(&config(false))
        .unwrap()
        .with_api_url(&format!("{}/1/messages.json", server.uri()));
    assert!(!notifier.is_enabled());
    notifier.send("Maghrib", "Maghrib adhan now").await.unwrap();
}
