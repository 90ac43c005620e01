//! HTTP snapshot download.
//!
//! Response bodies are streamed chunk by chunk into a file under the snapshot
//! directory, so payload size never dictates memory use.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Response};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::MarketplaceConfig;
use crate::errors::{ConfigError, FetchError};
use crate::models::{Marketplace, RawElementType, Snapshot};
use crate::resilience::parse_retry_after;
use crate::source::{EventSource, FetchRequest};

/// Error bodies are truncated to this many characters.
const MAX_ERROR_BODY_CHARS: usize = 512;

const CLIENT_ID_HEADER: &str = "client-id";
const API_KEY_HEADER: &str = "api-key";

/// A downloaded response body.
#[derive(Debug)]
pub struct DownloadedBody {
    pub path: PathBuf,
    pub headers: HeaderMap,
    pub bytes: u64,
}

/// Authenticated client of one marketplace API.
pub struct HttpSnapshotFetcher {
    client: Client,
    marketplace: Marketplace,
    base_url: String,
    auth_headers: HeaderMap,
    snapshot_dir: PathBuf,
}

impl HttpSnapshotFetcher {
    pub fn new(
        marketplace: Marketplace,
        config: &MarketplaceConfig,
        snapshot_dir: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        config.validate(marketplace)?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::invalid(format!("{}.httpClient", marketplace), e.to_string()))?;

        Ok(Self {
            client,
            marketplace,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            auth_headers: auth_headers(marketplace, config)?,
            snapshot_dir: snapshot_dir.into(),
        })
    }

    pub fn marketplace(&self) -> Marketplace {
        self.marketplace
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends the request and streams a successful body to a new snapshot file.
    ///
    /// Non-success statuses become [`FetchError::Http`] carrying the parsed
    /// retry hint; a partially written file is removed on failure.
    pub async fn download(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        file_stem: &str,
    ) -> Result<DownloadedBody, FetchError> {
        let url = self.url(path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .headers(self.auth_headers.clone());
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!("{} {} {} ({} params)", self.marketplace, method, url, query.len());
        let response = request.send().await.map_err(FetchError::from)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers(), Utc::now());
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            warn!("{} {} {} answered {}", self.marketplace, method, url, status.as_u16());
            return Err(FetchError::Http {
                status: status.as_u16(),
                retry_after,
                body: Some(body),
            });
        }

        let headers = response.headers().clone();
        let path = self.snapshot_path(file_stem);
        match self.stream_to_file(response, &path).await {
            Ok(bytes) => {
                debug!("Saved {} bytes to {}", bytes, path.display());
                Ok(DownloadedBody {
                    path,
                    headers,
                    bytes,
                })
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove partial snapshot {}: {}", path.display(), remove_err);
                    }
                }
                Err(e)
            }
        }
    }

    fn snapshot_path(&self, file_stem: &str) -> PathBuf {
        self.snapshot_dir.join(format!(
            "{}_{}_{}.json",
            self.marketplace.tag(),
            file_stem,
            Uuid::now_v7()
        ))
    }

    async fn stream_to_file(&self, mut response: Response, path: &Path) -> Result<u64, FetchError> {
        let io_err = |e: std::io::Error| FetchError::Other(format!("snapshot write failed: {}", e));
        tokio::fs::create_dir_all(&self.snapshot_dir)
            .await
            .map_err(io_err)?;
        let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(FetchError::from)? {
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;
        Ok(written)
    }
}

fn auth_headers(marketplace: Marketplace, config: &MarketplaceConfig) -> Result<HeaderMap, ConfigError> {
    let value = |raw: &str, field: &str| {
        HeaderValue::from_str(raw.trim())
            .map_err(|_| ConfigError::invalid(format!("{}.{}", marketplace, field), "not a valid header value"))
    };
    let mut headers = HeaderMap::new();
    match marketplace {
        Marketplace::Wildberries => {
            if let Some(key) = config.api_key.as_deref() {
                headers.insert(AUTHORIZATION, value(key, "apiKey")?);
            }
        }
        Marketplace::Ozon => {
            if let Some(key) = config.api_key.as_deref() {
                headers.insert(HeaderName::from_static(API_KEY_HEADER), value(key, "apiKey")?);
            }
            if let Some(client_id) = config.client_id.as_deref() {
                headers.insert(HeaderName::from_static(CLIENT_ID_HEADER), value(client_id, "clientId")?);
            }
        }
    }
    Ok(headers)
}

/// How the window and page token are put on the wire.
pub enum RequestShape {
    /// Query parameters; dates formatted as `YYYY-MM-DD`.
    Query {
        from_param: &'static str,
        to_param: &'static str,
        page_param: Option<&'static str>,
    },
    /// JSON body built from the request.
    JsonBody(fn(&FetchRequest) -> Value),
}

/// Where the next page token comes from.
pub enum PageTokenSource {
    None,
    /// A response header.
    Header(&'static str),
}

/// Describes one marketplace endpoint.
pub struct EndpointSpec {
    pub method: Method,
    pub path: &'static str,
    pub shape: RequestShape,
    pub paging: PageTokenSource,
}

/// An [`EventSource`] backed by one HTTP endpoint.
pub struct HttpEventSource {
    fetcher: Arc<HttpSnapshotFetcher>,
    element_type: RawElementType,
    endpoint: EndpointSpec,
    source_id: String,
}

impl HttpEventSource {
    pub fn new(
        fetcher: Arc<HttpSnapshotFetcher>,
        element_type: RawElementType,
        endpoint: EndpointSpec,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            element_type,
            endpoint,
            source_id: source_id.into(),
        }
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn fetch_snapshot(&self, request: &FetchRequest) -> Result<Snapshot, FetchError> {
        let (query, body) = match &self.endpoint.shape {
            RequestShape::Query {
                from_param,
                to_param,
                page_param,
            } => {
                let mut query = vec![
                    (from_param.to_string(), request.window.from().to_string()),
                    (to_param.to_string(), request.window.to().to_string()),
                ];
                if let (Some(param), Some(token)) = (page_param, request.page_token.as_ref()) {
                    query.push((param.to_string(), token.clone()));
                }
                (query, None)
            }
            RequestShape::JsonBody(build) => (Vec::new(), Some(build(request))),
        };

        let downloaded = self
            .fetcher
            .download(
                self.endpoint.method.clone(),
                self.endpoint.path,
                &query,
                body.as_ref(),
                &self.source_id,
            )
            .await?;

        let next_token = match self.endpoint.paging {
            PageTokenSource::None => None,
            PageTokenSource::Header(name) => downloaded
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        };
        Ok(Snapshot::new(self.element_type, downloaded.path).with_next_token(next_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventWindow, MarketplaceEvent};
    use chrono::NaiveDate;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and returns the raw request it received.
    async fn serve_once(response: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut received = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
                if n == 0 || received.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&received).to_string()
        });
        (format!("http://{}", addr), handle)
    }

    fn http_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut out = format!("HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n", status, body.len());
        for (name, value) in headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str("\r\n");
        out.push_str(body);
        out
    }

    fn request() -> FetchRequest {
        let day = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        FetchRequest {
            account_id: 1,
            event: MarketplaceEvent::SalesFact,
            window: EventWindow::new(day, day).unwrap(),
            page_token: Some("abc".into()),
        }
    }

    fn source(base_url: &str, dir: &Path) -> HttpEventSource {
        let mut config = MarketplaceConfig::new(base_url);
        config.api_key = Some("token".into());
        config.request_timeout = Duration::from_secs(5);
        let fetcher = HttpSnapshotFetcher::new(Marketplace::Wildberries, &config, dir).unwrap();
        HttpEventSource::new(
            Arc::new(fetcher),
            RawElementType::of::<Value>(),
            EndpointSpec {
                method: Method::GET,
                path: "/api/v1/sales",
                shape: RequestShape::Query {
                    from_param: "dateFrom",
                    to_param: "dateTo",
                    page_param: Some("cursor"),
                },
                paging: PageTokenSource::Header("x-next-cursor"),
            },
            "wb_sales",
        )
    }

    #[tokio::test]
    async fn streams_body_to_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let (base, server) = serve_once(http_response(
            "200 OK",
            &[("X-Next-Cursor", "page-2")],
            r#"[{"id":1},{"id":2}]"#,
        ))
        .await;

        let snapshot = source(&base, dir.path()).fetch_snapshot(&request()).await.unwrap();
        let raw_request = server.await.unwrap();

        assert!(raw_request.starts_with("GET /api/v1/sales?dateFrom=2024-04-01&dateTo=2024-04-01&cursor=abc"));
        assert!(raw_request.to_ascii_lowercase().contains("authorization: token"));
        assert_eq!(snapshot.next_token.as_deref(), Some("page-2"));
        assert!(snapshot.file_path.starts_with(dir.path()));
        assert_eq!(
            std::fs::read_to_string(&snapshot.file_path).unwrap(),
            r#"[{"id":1},{"id":2}]"#
        );
    }

    #[tokio::test]
    async fn throttled_response_carries_retry_hint() {
        let dir = tempfile::tempdir().unwrap();
        let (base, server) = serve_once(http_response(
            "429 Too Many Requests",
            &[("Retry-After", "5")],
            "slow down",
        ))
        .await;

        let err = source(&base, dir.path()).fetch_snapshot(&request()).await.unwrap_err();
        server.await.unwrap();
        match err {
            FetchError::Http {
                status,
                retry_after,
                body,
            } => {
                assert_eq!(status, 429);
                assert_eq!(retry_after, Some(Duration::from_secs(5)));
                assert_eq!(body.as_deref(), Some("slow down"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn connection_refused_is_transport_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let err = source(&format!("http://{}", addr), dir.path())
            .fetch_snapshot(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)), "{err:?}");
    }

    #[test]
    fn blank_base_url_is_rejected() {
        let config = MarketplaceConfig::new(" ");
        assert!(matches!(
            HttpSnapshotFetcher::new(Marketplace::Ozon, &config, "/tmp"),
            Err(ConfigError::BlankBaseUrl(Marketplace::Ozon))
        ));
    }
}
