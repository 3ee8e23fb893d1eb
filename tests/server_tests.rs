//! End-to-end tests against a live server instance.
//!
//! Simple object operations are driven with the real aws-sdk-s3 client so
//! genuine SigV4 signatures hit the validator. Multipart, preflight, and
//! unsigned requests use reqwest with a local signing helper because the
//! server's multipart XML schema differs from what the SDK parser expects.

use std::fs;
use std::path::Path;

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::Client;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::time::{sleep, Duration};

use sandbar::server::Server;

const ACCESS_KEY: &str = "AKIA1";
const SECRET_KEY: &str = "secret";

fn setup_dirs() -> (TempDir, TempDir) {
    let root_dir = TempDir::new().expect("Failed to create root temp directory");
    let creds_dir = TempDir::new().expect("Failed to create credentials temp directory");
    fs::write(
        creds_dir.path().join("test.json"),
        format!(
            r#"{{"access_key_id": "{}", "secret_access_key": "{}"}}"#,
            ACCESS_KEY, SECRET_KEY
        ),
    )
    .expect("Failed to write credential file");
    (root_dir, creds_dir)
}

async fn start_test_server(root_dir: &Path, creds_dir: &Path) -> (tokio::task::JoinHandle<()>, u16)
{
    let (server, port) = Server::test_mode(root_dir.to_path_buf(), creds_dir.to_path_buf())
        .await
        .expect("Failed to create test server");

    let handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            eprintln!("Server error: {}", e);
        }
    });

    // Give the server time to start
    sleep(Duration::from_millis(100)).await;

    (handle, port)
}

async fn create_s3_client(port: u16) -> Client {
    create_s3_client_with_secret(port, SECRET_KEY).await
}

async fn create_s3_client_with_secret(port: u16, secret: &str) -> Client {
    let creds = Credentials::new(ACCESS_KEY, secret, None, None, "test");
    let config = aws_config::defaults(BehaviorVersion::latest())
        .credentials_provider(creds)
        .region(Region::new("us-east-1"))
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&config)
        .endpoint_url(format!("http://127.0.0.1:{}", port))
        .force_path_style(true)
        .build();

    Client::from_conf(s3_config)
}

#[tokio::test]
async fn test_put_get_roundtrip_with_md5_etag() {
    let (root_dir, creds_dir) = setup_dirs();
    let (handle, port) = start_test_server(root_dir.path(), creds_dir.path()).await;
    let client = create_s3_client(port).await;

    let expected_etag = format!("\"{:x}\"", md5::compute(b"hello world"));

    let put = client
        .put_object()
        .bucket("bkt")
        .key("model.bin")
        .body(aws_sdk_s3::primitives::ByteStream::from_static(
            b"hello world",
        ))
        .send()
        .await
        .expect("PutObject should succeed");
    assert_eq!(put.e_tag(), Some(expected_etag.as_str()));

    let get = client
        .get_object()
        .bucket("bkt")
        .key("model.bin")
        .send()
        .await
        .expect("GetObject should succeed");
    assert_eq!(get.e_tag(), Some(expected_etag.as_str()));

    let body = get
        .body
        .collect()
        .await
        .expect("Should read body")
        .into_bytes();
    assert_eq!(&body[..], b"hello world");

    handle.abort();
}

#[tokio::test]
async fn test_get_missing_key_is_no_such_key() {
    let (root_dir, creds_dir) = setup_dirs();
    let (handle, port) = start_test_server(root_dir.path(), creds_dir.path()).await;
    let client = create_s3_client(port).await;

    let err = client
        .get_object()
        .bucket("bkt")
        .key("missing.bin")
        .send()
        .await
        .expect_err("GetObject on a missing key should fail")
        .into_service_error();
    assert!(err.is_no_such_key(), "Expected NoSuchKey, got {:?}", err);

    handle.abort();
}

#[tokio::test]
async fn test_range_get() {
    let (root_dir, creds_dir) = setup_dirs();
    let (handle, port) = start_test_server(root_dir.path(), creds_dir.path()).await;
    let client = create_s3_client(port).await;

    client
        .put_object()
        .bucket("bkt")
        .key("digits.bin")
        .body(aws_sdk_s3::primitives::ByteStream::from_static(
            b"0123456789",
        ))
        .send()
        .await
        .expect("PutObject should succeed");

    let get = client
        .get_object()
        .bucket("bkt")
        .key("digits.bin")
        .range("bytes=2-6")
        .send()
        .await
        .expect("Range GetObject should succeed");
    assert_eq!(get.content_range(), Some("bytes 2-6/10"));

    let body = get
        .body
        .collect()
        .await
        .expect("Should read body")
        .into_bytes();
    assert_eq!(&body[..], b"23456");

    handle.abort();
}

#[tokio::test]
async fn test_invalid_range_rejected() {
    let (root_dir, creds_dir) = setup_dirs();
    let (handle, port) = start_test_server(root_dir.path(), creds_dir.path()).await;
    let client = create_s3_client(port).await;

    client
        .put_object()
        .bucket("bkt")
        .key("digits.bin")
        .body(aws_sdk_s3::primitives::ByteStream::from_static(
            b"0123456789",
        ))
        .send()
        .await
        .expect("PutObject should succeed");

    // Starts past the end of the object
    let result = client
        .get_object()
        .bucket("bkt")
        .key("digits.bin")
        .range("bytes=20-30")
        .send()
        .await;
    assert!(result.is_err(), "Out-of-bounds range should be rejected");

    // Inverted span
    let result = client
        .get_object()
        .bucket("bkt")
        .key("digits.bin")
        .range("bytes=6-2")
        .send()
        .await;
    assert!(result.is_err(), "Inverted range should be rejected");

    handle.abort();
}

#[tokio::test]
async fn test_delete_finality() {
    let (root_dir, creds_dir) = setup_dirs();
    let (handle, port) = start_test_server(root_dir.path(), creds_dir.path()).await;
    let client = create_s3_client(port).await;

    client
        .put_object()
        .bucket("bkt")
        .key("model.bin")
        .body(aws_sdk_s3::primitives::ByteStream::from_static(b"data"))
        .send()
        .await
        .expect("PutObject should succeed");

    client
        .delete_object()
        .bucket("bkt")
        .key("model.bin")
        .send()
        .await
        .expect("DeleteObject should succeed");

    let err = client
        .get_object()
        .bucket("bkt")
        .key("model.bin")
        .send()
        .await
        .expect_err("GetObject after delete should fail")
        .into_service_error();
    assert!(err.is_no_such_key());

    // Deleting again reports the key as missing
    let result = client
        .delete_object()
        .bucket("bkt")
        .key("model.bin")
        .send()
        .await;
    assert!(result.is_err(), "Deleting a missing key should fail");

    handle.abort();
}

#[tokio::test]
async fn test_wrong_secret_rejected_without_side_effects() {
    let (root_dir, creds_dir) = setup_dirs();
    let (handle, port) = start_test_server(root_dir.path(), creds_dir.path()).await;

    let bad_client = create_s3_client_with_secret(port, "wrong-secret").await;
    let result = bad_client
        .put_object()
        .bucket("bkt")
        .key("model.bin")
        .body(aws_sdk_s3::primitives::ByteStream::from_static(b"boom"))
        .send()
        .await;
    assert!(result.is_err(), "Request with a bad secret should fail");

    let client = create_s3_client(port).await;
    let err = client
        .get_object()
        .bucket("bkt")
        .key("model.bin")
        .send()
        .await
        .expect_err("Nothing should have been written")
        .into_service_error();
    assert!(err.is_no_such_key());

    handle.abort();
}

#[tokio::test]
async fn test_unsigned_request_rejected_without_side_effects() {
    let (root_dir, creds_dir) = setup_dirs();
    let (handle, port) = start_test_server(root_dir.path(), creds_dir.path()).await;

    let response = reqwest::Client::new()
        .put(format!("http://127.0.0.1:{}/bkt/model.bin", port))
        .body("boom")
        .send()
        .await
        .expect("Request should complete");
    assert_eq!(response.status(), 403);

    let client = create_s3_client(port).await;
    let err = client
        .get_object()
        .bucket("bkt")
        .key("model.bin")
        .send()
        .await
        .expect_err("Nothing should have been written")
        .into_service_error();
    assert!(err.is_no_such_key());

    handle.abort();
}

#[tokio::test]
async fn test_traversal_key_rejected() {
    let (root_dir, creds_dir) = setup_dirs();
    let (handle, port) = start_test_server(root_dir.path(), creds_dir.path()).await;
    let client = create_s3_client(port).await;

    let result = client
        .put_object()
        .bucket("bkt")
        .key("../../etc/passwd")
        .body(aws_sdk_s3::primitives::ByteStream::from_static(b"boom"))
        .send()
        .await;
    assert!(result.is_err(), "Traversal key should be rejected");

    handle.abort();
}

#[tokio::test]
async fn test_options_preflight() {
    let (root_dir, creds_dir) = setup_dirs();
    let (handle, port) = start_test_server(root_dir.path(), creds_dir.path()).await;

    let response = reqwest::Client::new()
        .request(
            reqwest::Method::OPTIONS,
            format!("http://127.0.0.1:{}/bkt/model.bin", port),
        )
        .send()
        .await
        .expect("Preflight should complete");
    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    assert!(response.headers().contains_key("x-amz-request-id"));

    handle.abort();
}

// --- multipart lifecycle over raw signed HTTP ---

type HmacSha256 = Hmac<Sha256>;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Sign a request the way an S3 client would, with UNSIGNED-PAYLOAD.
fn sigv4_headers(method: &str, host: &str, path_and_query: &str) -> Vec<(&'static str, String)> {
    let now = chrono::Utc::now();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let payload_hash = "UNSIGNED-PAYLOAD";

    let (path, query) = path_and_query
        .split_once('?')
        .unwrap_or((path_and_query, ""));
    let mut params: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    params.sort_unstable();

    let canonical_request = format!(
        "{}\n{}\n{}\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\nhost;x-amz-content-sha256;x-amz-date\n{}",
        method,
        path,
        params.join("&"),
        host,
        payload_hash,
        amz_date,
        payload_hash
    );

    let scope = format!("{}/us-east-1/s3/aws4_request", date);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        hex(&Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac(format!("AWS4{}", SECRET_KEY).as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, b"us-east-1");
    let k_service = hmac(&k_region, b"s3");
    let k_signing = hmac(&k_service, b"aws4_request");
    let signature = hex(&hmac(&k_signing, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={}",
        ACCESS_KEY, scope, signature
    );

    vec![
        ("authorization", authorization),
        ("x-amz-date", amz_date),
        ("x-amz-content-sha256", payload_hash.to_string()),
    ]
}

async fn signed_request(
    port: u16,
    method: reqwest::Method,
    path_and_query: &str,
    body: Vec<u8>,
) -> reqwest::Response {
    let host = format!("127.0.0.1:{}", port);
    let mut request = reqwest::Client::new().request(
        method.clone(),
        format!("http://{}{}", host, path_and_query),
    );
    for (name, value) in sigv4_headers(method.as_str(), &host, path_and_query) {
        request = request.header(name, value);
    }
    request
        .body(body)
        .send()
        .await
        .expect("Request should complete")
}

fn extract_tag(xml: &str, tag: &str) -> String {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open).expect("Tag should be present") + open.len();
    let end = xml[start..].find(&close).expect("Tag should close") + start;
    xml[start..end].to_string()
}

#[tokio::test]
async fn test_multipart_out_of_order_assembly() {
    let (root_dir, creds_dir) = setup_dirs();
    let (handle, port) = start_test_server(root_dir.path(), creds_dir.path()).await;

    let response =
        signed_request(port, reqwest::Method::POST, "/bkt/model.bin?uploads", vec![]).await;
    assert_eq!(response.status(), 200);
    let xml = response.text().await.expect("Should read body");
    assert!(xml.contains("<InitiateMultipartUploadResponse>"));
    assert_eq!(extract_tag(&xml, "Bucket"), "bkt");
    assert_eq!(extract_tag(&xml, "Key"), "model.bin");
    let upload_id = extract_tag(&xml, "UploadId");

    // Parts arrive in reverse order
    let response = signed_request(
        port,
        reqwest::Method::PUT,
        &format!("/bkt/model.bin?partNumber=2&uploadId={}", upload_id),
        b"-world".to_vec(),
    )
    .await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("etag").and_then(|v| v.to_str().ok()),
        Some(format!("\"{:x}\"", md5::compute(b"-world")).as_str())
    );

    let response = signed_request(
        port,
        reqwest::Method::PUT,
        &format!("/bkt/model.bin?partNumber=1&uploadId={}", upload_id),
        b"hello".to_vec(),
    )
    .await;
    assert_eq!(response.status(), 200);

    let response = signed_request(
        port,
        reqwest::Method::POST,
        &format!("/bkt/model.bin?uploadId={}", upload_id),
        vec![],
    )
    .await;
    assert_eq!(response.status(), 200);
    let xml = response.text().await.expect("Should read body");
    assert!(xml.contains("<CompleteMultipartUploadResponse>"));
    let expected_etag = format!("\"{:x}\"", md5::compute(b"hello-world"));
    assert_eq!(
        extract_tag(&xml, "ETag"),
        expected_etag.replace('"', "&quot;")
    );

    // The assembled object reads back in ascending part order
    let client = create_s3_client(port).await;
    let get = client
        .get_object()
        .bucket("bkt")
        .key("model.bin")
        .send()
        .await
        .expect("GetObject should succeed");
    assert_eq!(get.e_tag(), Some(expected_etag.as_str()));
    let body = get
        .body
        .collect()
        .await
        .expect("Should read body")
        .into_bytes();
    assert_eq!(&body[..], b"hello-world");

    handle.abort();
}

#[tokio::test]
async fn test_multipart_abort_finality() {
    let (root_dir, creds_dir) = setup_dirs();
    let (handle, port) = start_test_server(root_dir.path(), creds_dir.path()).await;

    let response =
        signed_request(port, reqwest::Method::POST, "/bkt/model.bin?uploads", vec![]).await;
    let xml = response.text().await.expect("Should read body");
    let upload_id = extract_tag(&xml, "UploadId");

    let response = signed_request(
        port,
        reqwest::Method::PUT,
        &format!("/bkt/model.bin?partNumber=1&uploadId={}", upload_id),
        b"data".to_vec(),
    )
    .await;
    assert_eq!(response.status(), 200);

    let response = signed_request(
        port,
        reqwest::Method::DELETE,
        &format!("/bkt/model.bin?uploadId={}", upload_id),
        vec![],
    )
    .await;
    assert_eq!(response.status(), 204);

    // Terminal: further part uploads and completion both report NoSuchUpload
    let response = signed_request(
        port,
        reqwest::Method::PUT,
        &format!("/bkt/model.bin?partNumber=2&uploadId={}", upload_id),
        b"late".to_vec(),
    )
    .await;
    assert_eq!(response.status(), 404);
    let xml = response.text().await.expect("Should read body");
    assert_eq!(extract_tag(&xml, "Code"), "NoSuchUpload");

    let response = signed_request(
        port,
        reqwest::Method::POST,
        &format!("/bkt/model.bin?uploadId={}", upload_id),
        vec![],
    )
    .await;
    assert_eq!(response.status(), 404);

    handle.abort();
}

#[tokio::test]
async fn test_unknown_upload_id_rejected() {
    let (root_dir, creds_dir) = setup_dirs();
    let (handle, port) = start_test_server(root_dir.path(), creds_dir.path()).await;

    let response = signed_request(
        port,
        reqwest::Method::PUT,
        "/bkt/model.bin?partNumber=1&uploadId=nonexistent",
        b"data".to_vec(),
    )
    .await;
    assert_eq!(response.status(), 404);
    let xml = response.text().await.expect("Should read body");
    assert_eq!(extract_tag(&xml, "Code"), "NoSuchUpload");
    assert!(!extract_tag(&xml, "RequestId").is_empty());

    handle.abort();
}
