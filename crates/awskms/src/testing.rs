//! Deterministic stand-ins for the remote collaborators, used by unit tests:
//! in-process fakes for the [`KmsOracle`] seam and a local HTTP stub for the
//! SDK path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use aws_config::Region;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::client::{KmsOracle, RemoteError};
use crate::credentials::DiscoverCredentials;
use crate::error::KmsError;

/// Discovery that always yields the same static access key id.
#[derive(Debug)]
pub(crate) struct StaticDiscovery {
    access_key_id: String,
}

impl StaticDiscovery {
    pub(crate) fn new(access_key_id: &str) -> Self {
        Self {
            access_key_id: access_key_id.to_owned(),
        }
    }
}

#[async_trait]
impl DiscoverCredentials for StaticDiscovery {
    async fn discover(
        &self,
        _region: &Region,
        _profile: Option<&str>,
    ) -> Result<SharedCredentialsProvider, KmsError> {
        Ok(SharedCredentialsProvider::new(Credentials::new(
            self.access_key_id.clone(),
            "secret",
            None,
            None,
            "static-discovery",
        )))
    }
}

struct Record {
    key_id: String,
    context: HashMap<String, String>,
    plaintext: Vec<u8>,
}

/// In-memory KMS: ciphertexts are opaque handles, decryption checks the
/// encryption context like the real service.
#[derive(Default)]
pub(crate) struct FakeKms {
    records: Mutex<Vec<Record>>,
    encrypt_calls: AtomicUsize,
}

impl FakeKms {
    pub(crate) fn encrypt_calls(&self) -> usize {
        self.encrypt_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KmsOracle for FakeKms {
    async fn encrypt(
        &self,
        key_id: &str,
        plaintext: &[u8],
        context: &HashMap<String, String>,
    ) -> Result<Vec<u8>, RemoteError> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap();
        let handle = format!("fake-ciphertext-{}", records.len()).into_bytes();
        records.push(Record {
            key_id: key_id.to_owned(),
            context: context.clone(),
            plaintext: plaintext.to_vec(),
        });
        Ok(handle)
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &HashMap<String, String>,
    ) -> Result<Vec<u8>, RemoteError> {
        let records = self.records.lock().unwrap();
        let index = std::str::from_utf8(ciphertext)
            .ok()
            .and_then(|s| s.strip_prefix("fake-ciphertext-"))
            .and_then(|n| n.parse::<usize>().ok());
        let record = index
            .and_then(|i| records.get(i))
            .ok_or_else(|| RemoteError::InvalidCiphertext("InvalidCiphertextException".into()))?;
        if record.key_id.is_empty() || &record.context != context {
            return Err(RemoteError::InvalidCiphertext(
                "InvalidCiphertextException: encryption context mismatch".into(),
            ));
        }
        Ok(record.plaintext.clone())
    }
}

/// One HTTP request received by [`AwsStub`].
#[derive(Debug, Clone)]
pub(crate) struct CapturedRequest {
    headers: HashMap<String, String>,
    pub(crate) body: String,
}

impl CapturedRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// `X-Amz-Target` of a JSON-protocol request, e.g. `TrentService.Encrypt`.
    pub(crate) fn target(&self) -> Option<&str> {
        self.header("x-amz-target")
    }

    pub(crate) fn is_assume_role(&self) -> bool {
        self.body.contains("Action=AssumeRole")
    }

    pub(crate) fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }

    /// Access key id from the SigV4 `Authorization` header.
    pub(crate) fn access_key_id(&self) -> Option<&str> {
        let auth = self.header("authorization")?;
        let credential = auth.split("Credential=").nth(1)?;
        credential.split('/').next()
    }
}

/// Canned HTTP response returned by an [`AwsStub`] handler.
#[derive(Debug, Clone)]
pub(crate) struct StubResponse {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: String,
}

impl StubResponse {
    pub(crate) fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "application/x-amz-json-1.1".into())],
            body: body.to_string(),
        }
    }

    /// An awsJson error response with code `error_type`.
    pub(crate) fn kms_error(error_type: &str) -> Self {
        let mut resp = Self::json(
            400,
            json!({ "__type": error_type, "message": format!("{error_type} from stub") }),
        );
        resp.headers.push(("x-amzn-errortype", error_type.to_owned()));
        resp
    }

    fn xml(body: String) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type", "text/xml".into())],
            body,
        }
    }
}

type Handler = dyn Fn(&CapturedRequest) -> StubResponse + Send + Sync;

/// Local HTTP server standing in for the KMS and STS endpoints.
///
/// Point a [`StaticEndpoint`](crate::StaticEndpoint) at [`AwsStub::url`]; every
/// request is recorded and answered by the handler.
pub(crate) struct AwsStub {
    url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    task: JoinHandle<()>,
}

impl AwsStub {
    pub(crate) async fn start(
        handler: impl Fn(&CapturedRequest) -> StubResponse + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let recorded = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = Arc::clone(&handler);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let _ = serve(stream, handler.as_ref(), &recorded).await;
                });
            }
        });

        Self {
            url,
            requests,
            task,
        }
    }

    /// [`AwsStub::start`] with [`fake_aws`] as the handler.
    pub(crate) async fn fake_aws() -> Self {
        Self::start(fake_aws).await
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests that reached KMS, in order.
    pub(crate) fn kms_requests(&self) -> Vec<CapturedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.target().is_some_and(|t| t.starts_with("TrentService.")))
            .collect()
    }
}

impl Drop for AwsStub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Read one request, answer it, close the connection.
async fn serve(
    mut stream: TcpStream,
    handler: &Handler,
    recorded: &Mutex<Vec<CapturedRequest>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let headers: HashMap<String, String> = head
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_owned()))
        .collect();
    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let request = CapturedRequest {
        headers,
        body: String::from_utf8_lossy(&buf[header_end..]).into_owned(),
    };
    let response = handler(&request);
    recorded.lock().unwrap().push(request);

    let mut out = format!("HTTP/1.1 {} Stub\r\n", response.status);
    for (name, value) in &response.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.body.len(),
        response.body
    ));
    stream.write_all(out.as_bytes()).await?;
    stream.shutdown().await
}

/// Access key id of the credentials returned by the stub's `AssumeRole`.
pub(crate) const ASSUMED_ACCESS_KEY_ID: &str = "ASIAASSUMEDROLE";
pub(crate) const ASSUMED_SESSION_TOKEN: &str = "assumed-session-token";

/// Stateless KMS and STS.
///
/// Ciphertext is the base64 of `{"p": <plaintext>, "c": <context>}`, so
/// decryption checks the context the way KMS does without shared state.
pub(crate) fn fake_aws(req: &CapturedRequest) -> StubResponse {
    if req.is_assume_role() {
        return StubResponse::xml(format!(
            r#"<AssumeRoleResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <AssumeRoleResult>
    <Credentials>
      <AccessKeyId>{ASSUMED_ACCESS_KEY_ID}</AccessKeyId>
      <SecretAccessKey>assumed-secret</SecretAccessKey>
      <SessionToken>{ASSUMED_SESSION_TOKEN}</SessionToken>
      <Expiration>2099-01-01T00:00:00Z</Expiration>
    </Credentials>
    <AssumedRoleUser>
      <AssumedRoleId>AROASTUB:sops</AssumedRoleId>
      <Arn>arn:aws:sts::123456789012:assumed-role/stub/sops</Arn>
    </AssumedRoleUser>
  </AssumeRoleResult>
  <ResponseMetadata>
    <RequestId>stub-request</RequestId>
  </ResponseMetadata>
</AssumeRoleResponse>"#
        ));
    }

    let body = req.json();
    let context = body.get("EncryptionContext").cloned().unwrap_or(json!({}));
    match req.target() {
        Some("TrentService.Encrypt") => {
            let sealed = json!({ "p": body["Plaintext"], "c": context }).to_string();
            StubResponse::json(
                200,
                json!({
                    "CiphertextBlob": STANDARD.encode(sealed),
                    "KeyId": body["KeyId"],
                }),
            )
        }
        Some("TrentService.Decrypt") => {
            let sealed = body["CiphertextBlob"]
                .as_str()
                .and_then(|b| STANDARD.decode(b).ok())
                .and_then(|raw| serde_json::from_slice::<Value>(&raw).ok());
            match sealed {
                Some(sealed) if sealed["c"] == context => StubResponse::json(
                    200,
                    json!({
                        "Plaintext": sealed["p"],
                        "KeyId": "arn:aws:kms:us-west-2:123456789012:key/stub",
                    }),
                ),
                _ => StubResponse::kms_error("InvalidCiphertextException"),
            }
        }
        _ => StubResponse::kms_error("UnsupportedOperationException"),
    }
}
