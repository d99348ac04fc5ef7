//! HTTP transport seam and the request facade.
//!
//! The facade cleans parameters, signs when asked, dispatches through an
//! injected [`Transport`], and feeds every response's headers back to the
//! quota accountant — the exchange reports counter values on error responses
//! too. It deliberately does NOT run the admission test itself: callers that
//! batch requests decide admission across the whole batch, so `can_make` is
//! the caller's contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error};
use url::Url;

use crate::cipher::AesCipher;
use crate::clock::ServerClock;
use crate::config::GatewayConfig;
use crate::credentials::{CredentialFile, CredentialVault};
use crate::error::GatewayError;
use crate::limits::{QuotaAccountant, RateLimits};
use crate::metrics;
use crate::signer::{FlatParams, RequestSigner};

pub const TIME_ENDPOINT: &str = "/api/v3/time";
pub const EXCHANGE_INFO_ENDPOINT: &str = "/api/v3/exchangeInfo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// What the gateway needs back from a round-trip. Header names are
/// lowercased so reconciliation sees one spelling.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// The HTTP round-trip seam. Production uses [`HttpTransport`]; tests
/// inject a mock.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        method: Method,
        url: Url,
        query: &[(String, String)],
        headers: &HashMap<String, String>,
    ) -> Result<TransportResponse, GatewayError>;
}

/// reqwest-backed transport with a bounded request timeout. Connection
/// pooling is the client's concern.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        method: Method,
        url: Url,
        query: &[(String, String)],
        headers: &HashMap<String, String>,
    ) -> Result<TransportResponse, GatewayError> {
        let mut request = match method {
            Method::Get => self.client.get(url).query(query),
            Method::Post => self.client.post(url).form(query),
        };
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response.text().await?;
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

/// A request parameter value: a scalar, or a sequence that expands to one
/// `k=v` pair per element (array-style query parameters).
#[derive(Debug, Clone)]
pub enum ParamValue {
    Scalar(String),
    Many(Vec<String>),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Scalar(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Scalar(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Scalar(value.to_string())
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        ParamValue::Scalar(value.to_string())
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(values: Vec<String>) -> Self {
        ParamValue::Many(values)
    }
}

impl From<Vec<&str>> for ParamValue {
    fn from(values: Vec<&str>) -> Self {
        ParamValue::Many(values.into_iter().map(str::to_string).collect())
    }
}

/// Caller-facing parameter list. `None` values are dropped before dispatch.
pub type Params = Vec<(String, Option<ParamValue>)>;

/// Drop absent values and flatten sequences, preserving input order.
pub fn clean_params(params: Params) -> FlatParams {
    let mut flat = Vec::with_capacity(params.len());
    for (name, value) in params {
        match value {
            None => {}
            Some(ParamValue::Scalar(v)) => flat.push((name, v)),
            Some(ParamValue::Many(vs)) => {
                for v in vs {
                    flat.push((name.clone(), v));
                }
            }
        }
    }
    flat
}

/// The typed request facade handed to endpoint wrappers.
pub struct Gateway {
    transport: Arc<dyn Transport>,
    signer: RequestSigner,
    accountant: Arc<QuotaAccountant>,
    base_url: Url,
    recv_window_ms: u64,
}

impl Gateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        signer: RequestSigner,
        accountant: Arc<QuotaAccountant>,
        base_url: Url,
        recv_window_ms: u64,
    ) -> Self {
        Self {
            transport,
            signer,
            accountant,
            base_url,
            recv_window_ms,
        }
    }

    /// Wire the full stack from configuration: host cipher, credential
    /// vault, reqwest transport, limit discovery, and a first clock fix.
    pub async fn from_config(config: &GatewayConfig) -> eyre::Result<Self> {
        let base_url = config.base_url()?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(Duration::from_secs(
            config.api.http_timeout_secs,
        ))?);
        let vault = Arc::new(CredentialVault::new(
            CredentialFile::in_home_dir(&config.credentials.file_name)?,
            AesCipher::from_host_entropy(),
            config.credentials.prompt_missing,
        ));
        let signer = RequestSigner::new(
            vault,
            config.credentials.api_key_name.clone(),
            config.credentials.secret_key_name.clone(),
        );
        let clock = Arc::new(ServerClock::new());
        let accountant =
            Arc::new(QuotaAccountant::initialize(transport.as_ref(), &base_url, clock).await);
        Ok(Self::new(
            transport,
            signer,
            accountant,
            base_url,
            config.api.recv_window_ms,
        ))
    }

    /// The accountant, for callers running admission before dispatch.
    pub fn accountant(&self) -> &Arc<QuotaAccountant> {
        &self.accountant
    }

    pub async fn get(&self, path: &str, params: Params, sign: bool) -> Result<Value, GatewayError> {
        let recv_window = sign.then_some(self.recv_window_ms);
        self.dispatch(Method::Get, path, params, sign, recv_window).await
    }

    pub async fn post(&self, path: &str, params: Params, sign: bool) -> Result<Value, GatewayError> {
        let recv_window = sign.then_some(self.recv_window_ms);
        self.dispatch(Method::Post, path, params, sign, recv_window).await
    }

    /// Variant for endpoints that must not carry a `recvWindow` (or need a
    /// non-default one).
    pub async fn get_with_recv_window(
        &self,
        path: &str,
        params: Params,
        sign: bool,
        recv_window: Option<u64>,
    ) -> Result<Value, GatewayError> {
        self.dispatch(Method::Get, path, params, sign, recv_window).await
    }

    pub async fn post_with_recv_window(
        &self,
        path: &str,
        params: Params,
        sign: bool,
        recv_window: Option<u64>,
    ) -> Result<Value, GatewayError> {
        self.dispatch(Method::Post, path, params, sign, recv_window).await
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        params: Params,
        sign: bool,
        recv_window: Option<u64>,
    ) -> Result<Value, GatewayError> {
        let mut flat = clean_params(params);
        let mut headers = HashMap::new();
        if sign {
            if let Some(recv_window) = recv_window {
                flat.push(("recvWindow".to_string(), recv_window.to_string()));
            }
            flat = self
                .signer
                .sign(flat, true, self.accountant.clock().offset_ms())?;
            headers = self.signer.api_key_header()?;
        }

        let url = join_url(&self.base_url, path)?;
        debug!(method = method.as_str(), %path, params = flat.len(), sign, "dispatching");

        let response = match self.transport.execute(method, url, &flat, &headers).await {
            Ok(response) => response,
            Err(err) => {
                metrics::record_request(method.as_str(), "transport_error");
                return Err(err);
            }
        };

        // The exchange emits counter headers on errors too, so reconcile
        // before looking at the status.
        self.accountant.update_from_headers(&response.headers)?;
        self.accountant
            .maybe_resync(self.transport.as_ref(), &self.base_url)
            .await;

        metrics::record_request(method.as_str(), status_class(response.status));
        if !(200..300).contains(&response.status) {
            error!(
                endpoint = %path,
                status = response.status,
                body = %response.body,
                "exchange returned an error"
            );
            return Err(GatewayError::Exchange {
                status: response.status,
                endpoint: path.to_string(),
                body: response.body,
            });
        }

        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&response.body).map_err(|err| GatewayError::Transport {
            message: format!("unparseable response body: {}", err),
        })
    }
}

fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

fn join_url(base_url: &Url, path: &str) -> Result<Url, GatewayError> {
    base_url.join(path).map_err(|err| GatewayError::Transport {
        message: format!("invalid endpoint url '{}': {}", path, err),
    })
}

/// Current exchange time in UNIX milliseconds.
pub async fn fetch_server_time(
    transport: &dyn Transport,
    base_url: &Url,
) -> Result<i64, GatewayError> {
    let url = join_url(base_url, TIME_ENDPOINT)?;
    let response = transport
        .execute(Method::Get, url, &[], &HashMap::new())
        .await?;
    if !(200..300).contains(&response.status) {
        return Err(GatewayError::Exchange {
            status: response.status,
            endpoint: TIME_ENDPOINT.to_string(),
            body: response.body,
        });
    }
    let value: Value = serde_json::from_str(&response.body).map_err(|err| {
        GatewayError::Transport {
            message: format!("unparseable time response: {}", err),
        }
    })?;
    value
        .get("serverTime")
        .and_then(Value::as_i64)
        .ok_or_else(|| GatewayError::Transport {
            message: "time response missing serverTime".to_string(),
        })
}

/// Rate limits advertised by exchangeInfo.
pub async fn fetch_exchange_limits(
    transport: &dyn Transport,
    base_url: &Url,
) -> Result<RateLimits, GatewayError> {
    let url = join_url(base_url, EXCHANGE_INFO_ENDPOINT)?;
    let response = transport
        .execute(Method::Get, url, &[], &HashMap::new())
        .await?;
    if !(200..300).contains(&response.status) {
        return Err(GatewayError::Exchange {
            status: response.status,
            endpoint: EXCHANGE_INFO_ENDPOINT.to_string(),
            body: response.body,
        });
    }
    RateLimits::from_exchange_info(&response.body)
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process transport double shared by unit and integration tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub struct RecordedCall {
        pub method: Method,
        pub url: Url,
        pub query: FlatParams,
        pub headers: HashMap<String, String>,
    }

    /// Replays queued responses in order; repeats an empty 200 once drained.
    pub struct MockTransport {
        responses: Mutex<VecDeque<TransportResponse>>,
        pub calls: Mutex<Vec<RecordedCall>>,
    }

    impl MockTransport {
        pub fn new(responses: Vec<TransportResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn ok(body: &str) -> TransportResponse {
            TransportResponse {
                status: 200,
                headers: HashMap::new(),
                body: body.to_string(),
            }
        }

        pub fn ok_with_headers(body: &str, headers: &[(&str, &str)]) -> TransportResponse {
            TransportResponse {
                status: 200,
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body: body.to_string(),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn execute(
            &self,
            method: Method,
            url: Url,
            query: &[(String, String)],
            headers: &HashMap<String, String>,
        ) -> Result<TransportResponse, GatewayError> {
            self.calls.lock().unwrap().push(RecordedCall {
                method,
                url,
                query: query.to_vec(),
                headers: headers.clone(),
            });
            let next = self.responses.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| Self::ok("{}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockTransport;
    use super::*;
    use crate::cipher::AesCipher;
    use crate::clock::ServerClock;
    use crate::credentials::{CredentialFile, CredentialVault};
    use crate::limits::Window;
    use tempfile::TempDir;

    fn gateway(dir: &TempDir, transport: Arc<MockTransport>) -> Gateway {
        let vault = CredentialVault::new(
            CredentialFile::new(dir.path().join("panzer.tmp")),
            AesCipher::from_seed(b"/home/aliceTest CPU"),
            false,
        );
        vault.add("api_key", "test-key", true).unwrap();
        vault.add("api_secret", "test-secret", true).unwrap();
        let signer = RequestSigner::new(Arc::new(vault), "api_key", "api_secret");
        let accountant = Arc::new(QuotaAccountant::new(
            RateLimits::default(),
            Arc::new(ServerClock::new()),
        ));
        Gateway::new(
            transport,
            signer,
            accountant,
            Url::parse("https://api.binance.com").unwrap(),
            10_000,
        )
    }

    fn scalar(name: &str, value: &str) -> (String, Option<ParamValue>) {
        (name.to_string(), Some(value.into()))
    }

    #[test]
    fn test_clean_params_drops_none_and_flattens() {
        let params: Params = vec![
            scalar("symbol", "BTCUSDT"),
            ("startTime".to_string(), None),
            (
                "symbols".to_string(),
                Some(vec!["BTCUSDT", "LTCBTC"].into()),
            ),
            scalar("limit", "500"),
        ];
        let flat = clean_params(params);
        assert_eq!(
            flat,
            vec![
                ("symbol".to_string(), "BTCUSDT".to_string()),
                ("symbols".to_string(), "BTCUSDT".to_string()),
                ("symbols".to_string(), "LTCBTC".to_string()),
                ("limit".to_string(), "500".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_unsigned_get_sends_bare_params() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(vec![MockTransport::ok("[]")]));
        let gateway = gateway(&dir, transport.clone());

        let body = gateway
            .get("/api/v3/trades", vec![scalar("symbol", "BTCUSDT")], false)
            .await
            .unwrap();
        assert_eq!(body, serde_json::json!([]));

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, Method::Get);
        assert_eq!(calls[0].url.path(), "/api/v3/trades");
        assert_eq!(calls[0].query, vec![("symbol".to_string(), "BTCUSDT".to_string())]);
        assert!(calls[0].headers.is_empty());
    }

    #[tokio::test]
    async fn test_signed_get_appends_recv_window_timestamp_signature() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(vec![MockTransport::ok("{}")]));
        let gateway = gateway(&dir, transport.clone());

        gateway
            .get("/api/v3/account", vec![], true)
            .await
            .unwrap();

        let calls = transport.calls.lock().unwrap();
        let keys: Vec<&str> = calls[0].query.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["recvWindow", "timestamp", "signature"]);
        assert_eq!(calls[0].query[0].1, "10000");
        assert_eq!(calls[0].headers.get("X-MBX-APIKEY").map(String::as_str), Some("test-key"));
    }

    #[tokio::test]
    async fn test_recv_window_suppressed_when_not_signing() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(vec![MockTransport::ok("{}")]));
        let gateway = gateway(&dir, transport.clone());

        gateway.get("/api/v3/time", vec![], false).await.unwrap();
        let calls = transport.calls.lock().unwrap();
        assert!(calls[0].query.is_empty());
    }

    #[tokio::test]
    async fn test_response_headers_reach_the_accountant() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(vec![MockTransport::ok_with_headers(
            "{}",
            &[("x-mbx-used-weight-1m", "77")],
        )]));
        let gateway = gateway(&dir, transport.clone());

        gateway.get("/api/v3/ping", vec![], false).await.unwrap();
        assert_eq!(
            gateway.accountant().window_value(Window::MinuteWeight),
            77
        );
    }

    #[tokio::test]
    async fn test_error_status_still_reconciles_headers() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(vec![TransportResponse {
            status: 429,
            headers: HashMap::from([(
                "x-mbx-used-weight-1m".to_string(),
                "6000".to_string(),
            )]),
            body: r#"{"code":-1003,"msg":"Too many requests."}"#.to_string(),
        }]));
        let gateway = gateway(&dir, transport.clone());

        let err = gateway.get("/api/v3/ping", vec![], false).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Exchange { status: 429, .. }
        ));
        assert_eq!(
            gateway.accountant().window_value(Window::MinuteWeight),
            6000
        );
    }

    #[tokio::test]
    async fn test_unknown_rate_header_is_fatal_to_the_request() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(vec![MockTransport::ok_with_headers(
            "{}",
            &[("x-mbx-retry-budget", "3")],
        )]));
        let gateway = gateway(&dir, transport.clone());

        let err = gateway.get("/api/v3/ping", vec![], false).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownRateHeader { .. }));
    }

    #[tokio::test]
    async fn test_post_dispatches_as_post() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(vec![MockTransport::ok("{}")]));
        let gateway = gateway(&dir, transport.clone());

        gateway
            .post("/api/v3/order", vec![scalar("symbol", "LTCBTC")], true)
            .await
            .unwrap();
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].method, Method::Post);
    }

    #[tokio::test]
    async fn test_empty_body_is_null() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(vec![MockTransport::ok("")]));
        let gateway = gateway(&dir, transport);
        let body = gateway.get("/api/v3/ping", vec![], false).await.unwrap();
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_fetch_server_time() {
        let transport = MockTransport::new(vec![MockTransport::ok(
            r#"{"serverTime": 1499827319559}"#,
        )]);
        let base = Url::parse("https://api.binance.com").unwrap();
        let server_ms = fetch_server_time(&transport, &base).await.unwrap();
        assert_eq!(server_ms, 1_499_827_319_559);
    }

    #[tokio::test]
    async fn test_fetch_server_time_missing_field() {
        let transport = MockTransport::new(vec![MockTransport::ok("{}")]);
        let base = Url::parse("https://api.binance.com").unwrap();
        assert!(fetch_server_time(&transport, &base).await.is_err());
    }
}
