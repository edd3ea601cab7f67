//! Quote provider HTTP client
//!
//! Performs one GET per call and classifies the parsed body. The provider
//! reports quota exhaustion and entitlement blocks inside HTTP 200 bodies,
//! so those are detected from content and returned as
//! [`FetchOutcome::SoftFailure`] rather than as errors.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use super::endpoints::{EndpointRegistry, Operation, Request};
use crate::credential::Credential;

/// Default timeout applied to each provider request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Body fields the provider uses for advisories
const ADVISORY_FIELDS: [&str; 2] = ["Information", "Note"];

const RATE_LIMIT_MARKER: &str = "api rate limit";
const PREMIUM_MARKER: &str = "premium endpoint";

/// Hard failures: the fetch could not be completed at all
///
/// Cloneable so every caller awaiting a shared fetch receives the same error.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The operation name is not registered
    #[error("Unsupported operation: {0}")]
    UnknownOperation(String),

    /// A required parameter was missing or blank
    #[error("Operation {operation} requires parameter '{parameter}'")]
    MissingParameter {
        operation: Operation,
        parameter: &'static str,
    },

    /// The request URL could not be built
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    /// Network failure or timeout
    #[error("HTTP request failed: {0}")]
    Transport(Arc<reqwest::Error>),

    /// The provider answered with a non-success status
    #[error("Provider returned HTTP {0}")]
    HttpStatus(u16),

    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(Arc<reqwest::Error>),

    /// The background fetch task panicked or was cancelled
    #[error("Fetch task failed: {0}")]
    Task(Arc<tokio::task::JoinError>),

    /// The body was not valid JSON
    #[error("Failed to parse JSON response: {0}")]
    Parse(Arc<serde_json::Error>),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(Arc::new(err))
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(Arc::new(err))
    }
}

/// Kinds of soft failure the provider signals in-band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvisoryKind {
    /// The key's request quota is exhausted
    RateLimited,
    /// The endpoint is not included in the key's plan
    PremiumRequired,
}

impl fmt::Display for AdvisoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvisoryKind::RateLimited => f.write_str("rate limited"),
            AdvisoryKind::PremiumRequired => f.write_str("premium endpoint"),
        }
    }
}

/// A provider advisory raised instead of data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advisory {
    pub kind: AdvisoryKind,
    pub operation: Operation,
    /// The provider's advisory text
    pub message: String,
}

/// Result of a completed provider call
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// A usable payload
    Data(Value),
    /// The provider legitimately had nothing (`null` or `{}`)
    NoData,
    /// Quota or entitlement block reported inside a 200 body
    SoftFailure(Advisory),
}

/// Inspects a parsed body and decides what it means
pub fn classify(operation: Operation, body: Value) -> FetchOutcome {
    if let Some((kind, message)) = find_advisory(&body) {
        return FetchOutcome::SoftFailure(Advisory {
            kind,
            operation,
            message,
        });
    }
    if is_no_data(&body) {
        return FetchOutcome::NoData;
    }
    FetchOutcome::Data(body)
}

fn find_advisory(body: &Value) -> Option<(AdvisoryKind, String)> {
    let object = body.as_object()?;
    ADVISORY_FIELDS.iter().find_map(|field| {
        let text = object.get(*field)?.as_str()?;
        let lowered = text.to_lowercase();
        let kind = if lowered.contains(RATE_LIMIT_MARKER) {
            AdvisoryKind::RateLimited
        } else if lowered.contains(PREMIUM_MARKER) {
            AdvisoryKind::PremiumRequired
        } else {
            return None;
        };
        Some((kind, text.to_string()))
    })
}

fn is_no_data(body: &Value) -> bool {
    match body {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Client for the quote provider
#[derive(Debug, Clone)]
pub struct QuoteClient {
    client: Client,
    registry: EndpointRegistry,
}

impl QuoteClient {
    /// Create a client with the default request timeout
    pub fn new(registry: EndpointRegistry) -> Result<Self, FetchError> {
        Self::with_timeout(registry, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client whose requests give up after `timeout`
    pub fn with_timeout(registry: EndpointRegistry, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| FetchError::ClientBuild(Arc::new(err)))?;
        Ok(Self { client, registry })
    }

    /// Fetch an operation by name
    ///
    /// # Returns
    /// * `Ok(FetchOutcome)` - The transport succeeded and the body parsed
    /// * `Err(FetchError)` - Unknown operation, missing parameter, network or parse failure
    pub async fn fetch<I, K, V>(
        &self,
        operation: &str,
        params: I,
        credential: &Credential,
    ) -> Result<FetchOutcome, FetchError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let operation: Operation = operation.parse()?;
        let request = Request::resolve(operation, params)?;
        self.fetch_request(&request, credential).await
    }

    /// Fetch an already resolved request
    pub async fn fetch_request(
        &self,
        request: &Request,
        credential: &Credential,
    ) -> Result<FetchOutcome, FetchError> {
        let url = self.registry.url_for(request, credential)?;
        info!(operation = %request.operation, params = ?request.params, "fetching from provider");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            debug!(status = status.as_u16(), body = %text, "provider returned error status");
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let body: Value = serde_json::from_str(&text)?;
        Ok(classify(request.operation, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[test]
    fn test_classify_rate_limit() {
        let body = json!({
            "Information": "Thank you for using Alpha Vantage! Our standard API rate limit is 25 requests per day."
        });

        match classify(Operation::CompanyOverview, body) {
            FetchOutcome::SoftFailure(advisory) => {
                assert_eq!(advisory.kind, AdvisoryKind::RateLimited);
                assert_eq!(advisory.operation, Operation::CompanyOverview);
                assert!(advisory.message.contains("API rate limit"));
            }
            other => panic!("expected soft failure, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_premium_endpoint() {
        let body = json!({
            "Information": "Thank you for using Alpha Vantage! This is a premium endpoint."
        });

        assert!(matches!(
            classify(Operation::IntradayTimeSeries, body),
            FetchOutcome::SoftFailure(Advisory {
                kind: AdvisoryKind::PremiumRequired,
                ..
            })
        ));
    }

    #[test]
    fn test_classify_note_field() {
        let body = json!({"Note": "Our standard API rate limit is 5 calls per minute."});
        assert!(matches!(
            classify(Operation::DailyTimeSeries, body),
            FetchOutcome::SoftFailure(_)
        ));
    }

    #[test]
    fn test_unrelated_information_is_data() {
        let body = json!({"Information": "The demo key is for demo purposes only."});
        assert!(matches!(
            classify(Operation::TopGainersLosers, body),
            FetchOutcome::Data(_)
        ));
    }

    #[test]
    fn test_marker_in_non_advisory_field_is_data() {
        let body = json!({"Name": "API rate limit Corp", "Symbol": "ARL"});
        assert!(matches!(
            classify(Operation::CompanyOverview, body),
            FetchOutcome::Data(_)
        ));
    }

    #[test]
    fn test_null_and_empty_object_are_no_data() {
        assert_eq!(classify(Operation::CompanyOverview, Value::Null), FetchOutcome::NoData);
        assert_eq!(classify(Operation::CompanyOverview, json!({})), FetchOutcome::NoData);
        assert!(matches!(
            classify(Operation::TickerSearch, json!({"bestMatches": []})),
            FetchOutcome::Data(_)
        ));
    }

    #[tokio::test]
    async fn test_fetch_sends_expected_query() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("function".into(), "OVERVIEW".into()),
                Matcher::UrlEncoded("symbol".into(), "IBM".into()),
                Matcher::UrlEncoded("apikey".into(), "demo".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"Symbol":"IBM","Name":"International Business Machines"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = QuoteClient::new(EndpointRegistry::new(server.url())).unwrap();
        let outcome = client
            .fetch("companyOverview", [("symbol", "IBM")], &Credential::Demo)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            FetchOutcome::Data(json!({"Symbol": "IBM", "Name": "International Business Machines"}))
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_intraday_uses_default_interval() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("function".into(), "TIME_SERIES_INTRADAY".into()),
                Matcher::UrlEncoded("interval".into(), "5min".into()),
                Matcher::UrlEncoded("apikey".into(), "K1".into()),
            ]))
            .with_body(r#"{"Meta Data":{}}"#)
            .create_async()
            .await;

        let client = QuoteClient::new(EndpointRegistry::new(server.url())).unwrap();
        let outcome = client
            .fetch(
                "intradayTimeSeries",
                [("symbol", "IBM")],
                &Credential::ApiKey("K1".into()),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, FetchOutcome::Data(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_malformed_body_is_parse_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        let client = QuoteClient::new(EndpointRegistry::new(server.url())).unwrap();
        let err = client
            .fetch("topGainersLosers", Vec::<(String, String)>::new(), &Credential::Demo)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[tokio::test]
    async fn test_fetch_error_status_is_hard_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let client = QuoteClient::new(EndpointRegistry::new(server.url())).unwrap();
        let err = client
            .fetch("dailyTimeSeries", [("symbol", "IBM")], &Credential::Demo)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::HttpStatus(503)));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host_is_transport_error() {
        // Port 9 (discard) on localhost is expected to refuse connections
        let client = QuoteClient::with_timeout(
            EndpointRegistry::new("http://127.0.0.1:9"),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = client
            .fetch("dailyTimeSeries", [("symbol", "IBM")], &Credential::Demo)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Transport(_)));
    }

    #[tokio::test]
    async fn test_fetch_unknown_operation_makes_no_request() {
        let client = QuoteClient::new(EndpointRegistry::new("http://127.0.0.1:9")).unwrap();
        let err = client
            .fetch("weeklyTimeSeries", [("symbol", "IBM")], &Credential::Demo)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::UnknownOperation(_)));
    }

    #[tokio::test]
    async fn test_configured_timeout_applies_to_requests() {
        // Accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = QuoteClient::with_timeout(
            EndpointRegistry::new(format!("http://{}", addr)),
            Duration::from_millis(200),
        )
        .unwrap();
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            client.fetch("companyOverview", [("symbol", "IBM")], &Credential::Demo),
        )
        .await
        .expect("client timeout should fire before the guard")
        .unwrap_err();

        match err {
            FetchError::Transport(err) => assert!(err.is_timeout()),
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
