//! Shared test infrastructure for integration tests
//!
//! Provides TestServer (spawns the real basalt binary against a temp
//! data directory), an AWS SDK client wired to it, and a hand-rolled
//! SigV4 signer for raw-HTTP tests that need full control over the
//! request bytes.

#![allow(dead_code)]

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

/// Credentials every test server is started with.
pub const ACCESS_KEY: &str = "basalt-test";
pub const SECRET_KEY: &str = "basalt-test-secret";

/// Port counter to avoid conflicts between tests.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(19100);

/// Test server wrapper that spawns a real basalt binary
pub struct TestServer {
    process: Child,
    port: u16,
    _data_dir: TempDir,
}

impl TestServer {
    /// Start a test server with default settings.
    pub async fn spawn() -> Self {
        Self::spawn_with_env(&[]).await
    }

    /// Start a test server with extra environment overrides.
    pub async fn spawn_with_env(extra_env: &[(&str, &str)]) -> Self {
        let port = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
        let data_dir = TempDir::new().expect("Failed to create temp dir");

        let mut command = Command::new(env!("CARGO_BIN_EXE_basalt"));
        command
            .env("BASALT_LISTEN_ADDR", format!("127.0.0.1:{}", port))
            .env("BASALT_DATA_DIR", data_dir.path())
            .env("BASALT_CREDENTIALS", format!("{ACCESS_KEY}:{SECRET_KEY}"))
            .env("RUST_LOG", "basalt=warn");
        for (key, value) in extra_env {
            command.env(key, value);
        }

        let process = command.spawn().expect("Failed to start server");

        let mut server = Self {
            process,
            port,
            _data_dir: data_dir,
        };
        server.wait_ready().await;
        server
    }

    async fn wait_ready(&mut self) {
        let addr = format!("127.0.0.1:{}", self.port);
        for _ in 0..150 {
            if std::net::TcpStream::connect(&addr).is_ok() {
                sleep(Duration::from_millis(100)).await;
                return;
            }

            if let Ok(Some(status)) = self.process.try_wait() {
                panic!("Server exited before becoming ready: {}", status);
            }

            sleep(Duration::from_millis(100)).await;
        }

        let _ = self.process.kill();
        panic!("Timed out waiting for server on {}", addr);
    }

    /// Create an S3 client configured for this test server
    pub async fn s3_client(&self) -> Client {
        let credentials = Credentials::new(ACCESS_KEY, SECRET_KEY, None, None, "test");

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(self.endpoint())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Client::from_conf(config)
    }

    /// Get the HTTP endpoint URL
    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Host header value clients connecting directly will send
    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.process.kill();
    }
}

// === Raw SigV4 signing ===

/// Headers produced by signing a request by hand.
pub struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
    pub content_sha256: String,
}

/// Sign a request the way an S3 client does, for raw reqwest tests.
///
/// `canonical_query` must match the query string actually sent, in
/// sorted `key=value` form. The signed header set is fixed to
/// `host;x-amz-content-sha256;x-amz-date`.
pub fn sign_v4(
    method: &str,
    path: &str,
    canonical_query: &str,
    host: &str,
    body: &[u8],
    date_time: chrono::DateTime<chrono::Utc>,
) -> SignedHeaders {
    use hmac::{Hmac, Mac};
    use sha2::{Digest, Sha256};

    fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    let amz_date = date_time.format("%Y%m%dT%H%M%SZ").to_string();
    let date = date_time.format("%Y%m%d").to_string();
    let payload_hash = hex::encode(Sha256::digest(body));

    let canonical_request = format!(
        "{method}\n{path}\n{canonical_query}\nhost:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n\nhost;x-amz-content-sha256;x-amz-date\n{payload_hash}"
    );
    let scope = format!("{date}/us-east-1/s3/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac(format!("AWS4{SECRET_KEY}").as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, b"us-east-1");
    let k_service = hmac(&k_region, b"s3");
    let k_signing = hmac(&k_service, b"aws4_request");
    let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes()));

    SignedHeaders {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={ACCESS_KEY}/{scope}, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={signature}"
        ),
        amz_date,
        content_sha256: payload_hash,
    }
}

/// Build a reqwest request carrying a fresh hand-rolled signature.
pub fn signed_request(
    client: &reqwest::Client,
    method: reqwest::Method,
    server: &TestServer,
    path_and_query: &str,
    body: Vec<u8>,
) -> reqwest::RequestBuilder {
    let (path, query) = path_and_query
        .split_once('?')
        .unwrap_or((path_and_query, ""));
    // Queries are sent pre-sorted in key=value form, so the canonical
    // query is the raw query with bare flags given an explicit `=`.
    let canonical_query = query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            if pair.contains('=') {
                pair.to_string()
            } else {
                format!("{pair}=")
            }
        })
        .collect::<Vec<_>>()
        .join("&");

    let signed = sign_v4(
        method.as_str(),
        path,
        &canonical_query,
        &server.host(),
        &body,
        chrono::Utc::now(),
    );

    client
        .request(method, format!("{}{}", server.endpoint(), path_and_query))
        .header("authorization", signed.authorization)
        .header("x-amz-date", signed.amz_date)
        .header("x-amz-content-sha256", signed.content_sha256)
        .body(body)
}
