// clipkeeper - Daemon API Gateway
// Typed HTTP client for clipkeeperd with timeouts, retries, and error classification

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::api::{
    CaptureRequest, CreateFolderRequest, CreateSnippetRequest, ErrorBody, HealthResponse,
    MoveSnippetRequest, RenameFolderRequest, SearchResponse, SnippetExport, StatsResponse,
    SuccessResponse,
};
use crate::backoff::Backoff;
use crate::error::GatewayError;
use crate::model::{ClipItem, HistoryFolder, Snippet, SnippetFolder};
use crate::service::HealthProbe;
use crate::store::{Imported, SnippetPatch};

/// Default per-call timeout
const CALL_TIMEOUT: Duration = Duration::from_secs(5);
/// Health probes are single attempts with a short timeout
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Operations the foreground performs against the daemon.
#[async_trait]
pub trait DaemonApi: Send + Sync {
    async fn health(&self) -> Result<HealthResponse, GatewayError>;
    async fn stats(&self) -> Result<StatsResponse, GatewayError>;

    async fn history(&self) -> Result<Vec<ClipItem>, GatewayError>;
    /// The `limit` most recent items
    async fn history_limited(&self, limit: usize) -> Result<Vec<ClipItem>, GatewayError>;
    async fn recent_history(&self) -> Result<Vec<ClipItem>, GatewayError>;
    async fn history_folders(&self) -> Result<Vec<HistoryFolder>, GatewayError>;
    async fn capture(&self, request: &CaptureRequest) -> Result<ClipItem, GatewayError>;
    async fn delete_history_item(&self, id: &str) -> Result<(), GatewayError>;
    async fn clear_history(&self) -> Result<(), GatewayError>;

    async fn snippets(&self) -> Result<Vec<SnippetFolder>, GatewayError>;
    async fn folder_snippets(&self, folder: &str) -> Result<Vec<Snippet>, GatewayError>;
    async fn create_snippet(&self, request: &CreateSnippetRequest) -> Result<Snippet, GatewayError>;
    async fn update_snippet(
        &self,
        folder: &str,
        id: &str,
        patch: &SnippetPatch,
    ) -> Result<Snippet, GatewayError>;
    async fn delete_snippet(&self, folder: &str, id: &str) -> Result<(), GatewayError>;
    async fn move_snippet(&self, from: &str, id: &str, to: &str) -> Result<Snippet, GatewayError>;

    async fn folders(&self) -> Result<Vec<String>, GatewayError>;
    async fn create_folder(&self, name: &str) -> Result<SnippetFolder, GatewayError>;
    async fn rename_folder(&self, name: &str, new_name: &str) -> Result<(), GatewayError>;
    async fn delete_folder(&self, name: &str) -> Result<(), GatewayError>;

    async fn search(&self, query: &str) -> Result<SearchResponse, GatewayError>;

    async fn export_snippets(&self) -> Result<SnippetExport, GatewayError>;
    async fn import_snippets(&self, export: &SnippetExport) -> Result<Imported, GatewayError>;
}

fn loopback_client() -> Result<Client, GatewayError> {
    Client::builder()
        .no_proxy()
        .build()
        .map_err(|e| GatewayError::Network(format!("failed to build HTTP client: {e}")))
}

fn encode_body<B: Serialize>(body: &B) -> Result<Value, GatewayError> {
    serde_json::to_value(body).map_err(|e| GatewayError::Decode(format!("request body: {e}")))
}

/// One request, no retries. Non-2xx responses are classified by status.
async fn send_once<T>(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<&Value>,
    timeout: Duration,
) -> Result<T, GatewayError>
where
    T: DeserializeOwned,
{
    let mut request = client.request(method, url).timeout(timeout);
    if let Some(body) = body {
        request = request.json(body);
    }
    let response = request
        .send()
        .await
        .map_err(|e| GatewayError::Network(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()));
    }

    let detail = match response.json::<ErrorBody>().await {
        Ok(body) => body.detail,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    let code = status.as_u16();
    if status.is_client_error() {
        Err(GatewayError::Validation { status: code, detail })
    } else {
        Err(GatewayError::Server { status: code, detail })
    }
}

/// `DaemonApi` over HTTP to a daemon on loopback.
#[derive(Clone, Debug)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    timeout: Duration,
    retry: Backoff,
}

impl HttpGateway {
    pub fn new(port: u16) -> Result<Self, GatewayError> {
        Self::with_base_url(format!("http://127.0.0.1:{port}"))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, GatewayError> {
        Ok(Self {
            client: loopback_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: CALL_TIMEOUT,
            retry: Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 3),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retry schedule for network failures; `max_attempts` counts the first try
    pub fn with_retry(mut self, retry: Backoff) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<T>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        let mut attempt = 0;
        loop {
            match send_once(&self.client, method.clone(), &url, body.as_ref(), self.timeout).await {
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    tracing::debug!(%method, %url, attempt, ?delay, "daemon unreachable, retrying: {e}");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        self.call(Method::GET, path, None).await
    }

    async fn send<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        self.call(method, path, Some(encode_body(body)?)).await
    }

    async fn delete(&self, path: &str) -> Result<(), GatewayError> {
        self.call::<SuccessResponse>(Method::DELETE, path, None)
            .await
            .map(|_| ())
    }
}

fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[async_trait]
impl DaemonApi for HttpGateway {
    async fn health(&self) -> Result<HealthResponse, GatewayError> {
        self.get("/health").await
    }

    async fn stats(&self) -> Result<StatsResponse, GatewayError> {
        self.get("/stats").await
    }

    async fn history(&self) -> Result<Vec<ClipItem>, GatewayError> {
        self.get("/history").await
    }

    async fn history_limited(&self, limit: usize) -> Result<Vec<ClipItem>, GatewayError> {
        self.get(&format!("/history?limit={limit}")).await
    }

    async fn recent_history(&self) -> Result<Vec<ClipItem>, GatewayError> {
        self.get("/history/recent").await
    }

    async fn history_folders(&self) -> Result<Vec<HistoryFolder>, GatewayError> {
        self.get("/history/folders").await
    }

    async fn capture(&self, request: &CaptureRequest) -> Result<ClipItem, GatewayError> {
        self.send(Method::POST, "/history", request).await
    }

    async fn delete_history_item(&self, id: &str) -> Result<(), GatewayError> {
        self.delete(&format!("/history/{}", segment(id))).await
    }

    async fn clear_history(&self) -> Result<(), GatewayError> {
        self.delete("/history").await
    }

    async fn snippets(&self) -> Result<Vec<SnippetFolder>, GatewayError> {
        self.get("/snippets").await
    }

    async fn folder_snippets(&self, folder: &str) -> Result<Vec<Snippet>, GatewayError> {
        self.get(&format!("/snippets/{}", segment(folder))).await
    }

    async fn create_snippet(&self, request: &CreateSnippetRequest) -> Result<Snippet, GatewayError> {
        self.send(Method::POST, "/snippets", request).await
    }

    async fn update_snippet(
        &self,
        folder: &str,
        id: &str,
        patch: &SnippetPatch,
    ) -> Result<Snippet, GatewayError> {
        let path = format!("/snippets/{}/{}", segment(folder), segment(id));
        self.send(Method::PUT, &path, patch).await
    }

    async fn delete_snippet(&self, folder: &str, id: &str) -> Result<(), GatewayError> {
        self.delete(&format!("/snippets/{}/{}", segment(folder), segment(id)))
            .await
    }

    async fn move_snippet(&self, from: &str, id: &str, to: &str) -> Result<Snippet, GatewayError> {
        let path = format!("/snippets/{}/{}/move", segment(from), segment(id));
        let request = MoveSnippetRequest {
            to_folder: to.to_string(),
        };
        self.send(Method::POST, &path, &request).await
    }

    async fn folders(&self) -> Result<Vec<String>, GatewayError> {
        self.get("/folders").await
    }

    async fn create_folder(&self, name: &str) -> Result<SnippetFolder, GatewayError> {
        let request = CreateFolderRequest {
            folder_name: name.to_string(),
        };
        self.send(Method::POST, "/folders", &request).await
    }

    async fn rename_folder(&self, name: &str, new_name: &str) -> Result<(), GatewayError> {
        let request = RenameFolderRequest {
            new_name: new_name.to_string(),
        };
        self.send::<_, SuccessResponse>(Method::PUT, &format!("/folders/{}", segment(name)), &request)
            .await
            .map(|_| ())
    }

    async fn delete_folder(&self, name: &str) -> Result<(), GatewayError> {
        self.delete(&format!("/folders/{}", segment(name))).await
    }

    async fn search(&self, query: &str) -> Result<SearchResponse, GatewayError> {
        self.get(&format!("/search?q={}", segment(query))).await
    }

    async fn export_snippets(&self) -> Result<SnippetExport, GatewayError> {
        self.get("/export").await
    }

    async fn import_snippets(&self, export: &SnippetExport) -> Result<Imported, GatewayError> {
        self.send(Method::POST, "/import", export).await
    }
}

/// Health probe over HTTP, used by the supervisor and port resolver.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    client: Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new() -> Result<Self, GatewayError> {
        Ok(Self {
            client: loopback_client()?,
            timeout: PROBE_TIMEOUT,
        })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, port: u16) -> Result<HealthResponse, GatewayError> {
        let url = format!("http://127.0.0.1:{port}/health");
        send_once(&self.client, Method::GET, &url, None, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    fn closed_port() -> u16 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn base_url_is_normalised() {
        let gateway = HttpGateway::with_base_url("http://127.0.0.1:9/").unwrap();
        assert_eq!(gateway.base_url(), "http://127.0.0.1:9");
    }

    #[test]
    fn path_segments_are_encoded() {
        assert_eq!(segment("Work Stuff/2"), "Work%20Stuff%2F2");
    }

    #[tokio::test]
    async fn refused_connection_is_transient_after_retries() {
        let gateway = HttpGateway::new(closed_port())
            .unwrap()
            .with_retry(Backoff::new(Duration::from_millis(1), Duration::from_millis(2), 3));
        let err = gateway.history().await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }

    #[tokio::test]
    async fn probe_of_closed_port_fails() {
        let probe = HttpProbe::new().unwrap();
        assert!(matches!(
            probe.probe(closed_port()).await,
            Err(GatewayError::Network(_))
        ));
    }
}
