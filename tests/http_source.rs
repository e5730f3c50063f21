//! HTTP source and downloader against a local mock server.
use postbox::ingest::{DownloadError, Downloader, HttpDownloader, HttpMessageSource, MessageDescriptor, MessageSource, SourceError};
use postbox::validation::PayloadError;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn source(server: &MockServer) -> HttpMessageSource {
    HttpMessageSource::new(
        format!("{}/get_post", server.uri()),
        format!("{}/delete_post", server.uri()),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn poll_returns_descriptor_with_string_or_numeric_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get_post"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "type": "audio",
            "mp3_url": "http://files/42.mp3",
            "id": "42"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/get_post"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "type": "audio",
            "mp3_url": "http://files/43.mp3",
            "id": 43
        })))
        .mount(&server)
        .await;

    let source = source(&server);
    assert_eq!(
        source.poll().await.unwrap(),
        Some(MessageDescriptor {
            id: "42".into(),
            payload_url: "http://files/42.mp3".into()
        })
    );
    assert_eq!(source.poll().await.unwrap().map(|d| d.id), Some("43".to_string()));
}

#[tokio::test]
async fn poll_accepts_a_body_with_both_url_keys() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get_post"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "type": "audio",
            "mp3_url": "http://files/44.mp3",
            "payload_url": "http://files/44.mp3",
            "id": "44"
        })))
        .mount(&server)
        .await;

    let descriptor = source(&server).poll().await.unwrap();
    assert_eq!(descriptor.map(|d| d.payload_url), Some("http://files/44.mp3".to_string()));
}

#[tokio::test]
async fn poll_without_audio_or_body_is_no_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get_post"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"type": "text", "id": "9"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/get_post"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/get_post"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let source = source(&server);
    for _ in 0..3 {
        assert_eq!(source.poll().await.unwrap(), None);
    }
}

#[tokio::test]
async fn poll_reports_server_errors_and_garbage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get_post"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/get_post"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let source = source(&server);
    match source.poll().await {
        Err(SourceError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert!(matches!(source.poll().await, Err(SourceError::Malformed(_))));
}

#[tokio::test]
async fn acknowledge_deletes_by_id() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/delete_post/42"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/delete_post/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such post"))
        .mount(&server)
        .await;

    let source = source(&server);
    assert!(source.acknowledge("42").await);
    assert!(!source.acknowledge("gone").await);
}

#[tokio::test]
async fn acknowledge_to_unreachable_host_is_false() {
    let source = HttpMessageSource::new(
        "http://127.0.0.1:9/get_post",
        "http://127.0.0.1:9/delete_post",
        Duration::from_millis(500),
    )
    .unwrap();
    assert!(!source.acknowledge("1").await);
}

#[tokio::test]
async fn download_lands_under_the_url_file_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/msg%201.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3 audio bytes".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let downloads = dir.path().join("downloads");
    let downloader = HttpDownloader::new(&downloads, Duration::from_secs(5), 1024).unwrap();
    let fetched = downloader
        .fetch(&format!("{}/files/msg%201.mp3?token=abc", server.uri()))
        .await
        .unwrap();

    assert_eq!(fetched, downloads.join("msg%25201.mp3"));
    assert_eq!(std::fs::read(&fetched).unwrap(), b"ID3 audio bytes");
    let names: Vec<_> = std::fs::read_dir(&downloads).unwrap().map(|e| e.unwrap().file_name()).collect();
    assert_eq!(names.len(), 1, "no partial file left: {:?}", names);
}

#[tokio::test]
async fn oversize_payload_is_rejected_without_leftovers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let downloader = HttpDownloader::new(dir.path(), Duration::from_secs(5), 1024).unwrap();
    let result = downloader.fetch(&format!("{}/big.mp3", server.uri())).await;

    assert!(matches!(
        result,
        Err(DownloadError::Payload(PayloadError::SizeExceeded { limit: 1024 }))
    ));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn download_failures_are_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.mp3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/empty.mp3"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let downloader = HttpDownloader::new(dir.path(), Duration::from_secs(5), 1024).unwrap();

    let missing = downloader.fetch(&format!("{}/missing.mp3", server.uri())).await;
    assert!(matches!(missing, Err(DownloadError::Status(404))));
    let empty = downloader.fetch(&format!("{}/empty.mp3", server.uri())).await;
    assert!(matches!(empty, Err(DownloadError::Payload(PayloadError::Empty))));
    let nameless = downloader.fetch(&server.uri()).await;
    assert!(matches!(nameless, Err(DownloadError::Payload(PayloadError::NoFileName(_)))));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
