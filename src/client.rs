//! USGS earthquake catalog client.
//!
//! Provides async HTTP access to the FDSN event query endpoint.
//! Uses reqwest with rustls for TLS.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::errors::FetchError;
use crate::models::{FeatureCollection, SearchResult};
use crate::query::CatalogRequest;

/// Default request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// User agent string for API requests.
const USER_AGENT: &str = concat!("quakesearch/", env!("CARGO_PKG_VERSION"));

/// Most characters of a server error body kept in [`FetchError::Server`].
const MAX_ERROR_BODY: usize = 512;

/// Source of search results.
///
/// Implementations must return [`FetchError::Cancelled`] promptly once
/// `cancel` fires, without producing a result.
#[async_trait]
pub trait Catalog: Send + Sync + 'static {
    async fn fetch(
        &self,
        request: &CatalogRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResult, FetchError>;
}

/// Client for the USGS catalog.
///
/// Requests carry their own endpoint, so one client serves any catalog URL.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: Client,
}

impl CatalogClient {
    /// Create a client with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    async fn execute(&self, request: &CatalogRequest) -> Result<SearchResult, FetchError> {
        let response = self.client.get(request.url()).send().await?;

        // Check status before parsing
        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if let Some((cut, _)) = message.char_indices().nth(MAX_ERROR_BODY) {
                message.truncate(cut);
            }
            return Err(FetchError::Server {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }

        let body = response.bytes().await?;
        let collection: FeatureCollection = serde_json::from_slice(&body)?;
        let result = collection.into_result()?;

        debug!("fetched {} events", result.len());
        Ok(result)
    }
}

#[async_trait]
impl Catalog for CatalogClient {
    #[instrument(skip_all, fields(url = %request))]
    async fn fetch(
        &self,
        request: &CatalogRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResult, FetchError> {
        debug!("querying catalog");

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("request cancelled");
                Err(FetchError::Cancelled)
            }
            result = self.execute(request) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::Router;
    use axum::http::{StatusCode, header};
    use axum::routing::get;
    use chrono::NaiveDate;

    use crate::geo::GeoPoint;
    use crate::models::tests::SAMPLE;
    use crate::query::{ResolvedSearch, build_request};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/query")
    }

    fn request(base_url: &str) -> CatalogRequest {
        let search = ResolvedSearch {
            center: GeoPoint::new(37.77, -122.42),
            start: NaiveDate::from_ymd_opt(1900, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            min_magnitude: 7.5,
            max_magnitude: 10.0,
            radius_km: 3000.0,
            result_limit: 50,
        };
        build_request(&search, base_url)
    }

    fn client() -> CatalogClient {
        CatalogClient::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let base = serve(Router::new().route(
            "/query",
            get(|| async { ([(header::CONTENT_TYPE, "application/json")], SAMPLE) }),
        ))
        .await;

        let result = client()
            .fetch(&request(&base), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.bbox.is_some());
    }

    #[tokio::test]
    async fn test_non_success_status_is_server_error() {
        let base = serve(Router::new().route(
            "/query",
            get(|| async { (StatusCode::BAD_REQUEST, "Error 400: Bad Request") }),
        ))
        .await;

        let err = client()
            .fetch(&request(&base), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            FetchError::Server { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("Bad Request"));
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let base = serve(Router::new().route("/query", get(|| async { "<html>oops</html>" }))).await;

        let err = client()
            .fetch(&request(&base), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/query", listener.local_addr().unwrap());
        drop(listener);

        let err = client()
            .fetch(&request(&base), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let base = serve(Router::new().route(
            "/query",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                SAMPLE
            }),
        ))
        .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = client().fetch(&request(&base), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_token_wins() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let base = "http://127.0.0.1:9/query";
        let err = client().fetch(&request(base), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
