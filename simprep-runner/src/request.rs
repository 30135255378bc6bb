//! HTTP calls to the remote simulation service.
//!
//! A single [`RetryPolicy`] decides what happens after every attempt:
//! transient failures (connection/read errors, 5xx, 429 on fetches) back off
//! exponentially within a bounded budget, while 429 on a submission waits a
//! fixed interval and resubmits until the service accepts it.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const USER_AGENT: &str = "simprep-runner";
const REPORT_NAME: &str = "simprep-runner";
const SUBMISSION_ITERATIONS: u64 = 100_000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connect(String),
    #[error("read error: {0}")]
    Read(String),
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request to {url} failed with status {status}")]
    Failed { url: String, status: u16 },
    #[error("request to {url} gave up after {retries} retries: {last}")]
    RetriesExhausted {
        url: String,
        retries: u32,
        last: String,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("response from {url} is not valid JSON: {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Something that can carry one HTTP request; a reusable session.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self, RequestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder.header(reqwest::header::CONTENT_TYPE, "application/json"),
        };

        let response = builder.send().await.map_err(|err| {
            if err.is_connect() {
                TransportError::Connect(err.to_string())
            } else {
                TransportError::Read(err.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Read(err.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

/// What to do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Done,
    /// Transient failure; retry after an exponential delay while budget remains.
    Backoff,
    /// Rate limited submission; wait the fixed interval and resubmit.
    Resubmit,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: Duration,
    pub backoff_max: Duration,
    pub retry_statuses: Vec<u16>,
    pub rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 6,
            backoff_factor: Duration::from_secs(1),
            backoff_max: Duration::from_secs(120),
            retry_statuses: vec![429, 500, 502, 503, 504],
            rate_limit_wait: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn classify(
        &self,
        method: Method,
        outcome: &Result<HttpResponse, TransportError>,
    ) -> RetryDecision {
        match outcome {
            Err(_) => RetryDecision::Backoff,
            Ok(response) if response.is_success() => RetryDecision::Done,
            Ok(response) if response.status == 429 && method == Method::Post => {
                RetryDecision::Resubmit
            }
            Ok(response) if self.retry_statuses.contains(&response.status) => {
                RetryDecision::Backoff
            }
            Ok(_) => RetryDecision::Fail,
        }
    }

    /// Delay before retry number `retry` (1-based). The first retry is
    /// immediate, then `factor * 2^(retry - 1)` capped at `backoff_max`.
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        if retry <= 1 {
            return Duration::ZERO;
        }
        let multiplier = 2_u32.saturating_pow(retry - 1);
        self.backoff_factor
            .saturating_mul(multiplier)
            .min(self.backoff_max)
    }
}

/// Envelope sent with every submission.
#[must_use]
pub fn submission_body(apikey: &str, payload: &Value) -> Value {
    json!({
        "advancedInput": payload,
        "apiKey": apikey,
        "iterations": SUBMISSION_ITERATIONS,
        "reportName": REPORT_NAME,
        "simcVersion": "nightly",
        "type": "advanced",
    })
}

/// JSON client with the retry policy applied.
#[derive(Clone)]
pub struct RequestClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    /// Back-off retries only apply to urls under this prefix; `None` means all.
    scope: Option<String>,
}

impl RequestClient {
    /// Client over a caller-supplied session; the policy covers every url.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            scope: None,
        }
    }

    /// Fresh session whose back-off retries are limited to `url`'s origin.
    ///
    /// # Errors
    ///
    /// Returns an error for an unparsable url or when the client cannot be built.
    pub fn for_host(url: &str, policy: RetryPolicy) -> Result<Self, RequestError> {
        let parsed = reqwest::Url::parse(url).map_err(|err| RequestError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        let scope = format!("{}/", parsed.origin().ascii_serialization());
        let transport = ReqwestTransport::new(DEFAULT_TIMEOUT)?;
        Ok(Self {
            transport: Arc::new(transport),
            policy,
            scope: Some(scope),
        })
    }

    fn in_scope(&self, url: &str) -> bool {
        self.scope
            .as_deref()
            .is_none_or(|prefix| url.starts_with(prefix))
    }

    /// Fetch `url`, or submit `payload` to it when one is given.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Failed`] for a non-retryable status,
    /// [`RequestError::RetriesExhausted`] once the back-off budget is spent,
    /// and [`RequestError::Decode`] when the body is not JSON.
    pub async fn call(
        &self,
        url: &str,
        apikey: &str,
        payload: Option<&Value>,
    ) -> Result<Value, RequestError> {
        let request = match payload {
            Some(payload) => HttpRequest {
                method: Method::Post,
                url: url.to_string(),
                body: Some(submission_body(apikey, payload)),
            },
            None => HttpRequest {
                method: Method::Get,
                url: url.to_string(),
                body: None,
            },
        };
        let retry_enabled = self.in_scope(url);
        let mut retries = 0;

        loop {
            let outcome = self.transport.send(&request).await;
            match self.policy.classify(request.method, &outcome) {
                RetryDecision::Done => {
                    let response = outcome?;
                    return serde_json::from_str(&response.body).map_err(|source| {
                        RequestError::Decode {
                            url: url.to_string(),
                            source,
                        }
                    });
                }
                RetryDecision::Resubmit => {
                    log::info!(
                        "{url} is rate limited, resubmitting in {:?}",
                        self.policy.rate_limit_wait
                    );
                    tokio::time::sleep(self.policy.rate_limit_wait).await;
                }
                RetryDecision::Backoff if retry_enabled && retries < self.policy.max_retries => {
                    retries += 1;
                    let delay = self.policy.backoff_delay(retries);
                    log::debug!(
                        "{url}: {} - retry {retries}/{} in {delay:?}",
                        describe(&outcome),
                        self.policy.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Backoff if retry_enabled => {
                    return Err(RequestError::RetriesExhausted {
                        url: url.to_string(),
                        retries,
                        last: describe(&outcome),
                    });
                }
                RetryDecision::Backoff | RetryDecision::Fail => {
                    return Err(match outcome {
                        Ok(response) => RequestError::Failed {
                            url: url.to_string(),
                            status: response.status,
                        },
                        Err(err) => RequestError::Transport(err),
                    });
                }
            }
        }
    }
}

fn describe(outcome: &Result<HttpResponse, TransportError>) -> String {
    match outcome {
        Ok(response) => format!("status {}", response.status),
        Err(err) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned outcomes and records every request it sees.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(status(200)))
        }
    }

    fn status(code: u16) -> HttpResponse {
        HttpResponse {
            status: code,
            body: format!(r#"{{"status":{code}}}"#),
        }
    }

    fn client(transport: &Arc<ScriptedTransport>) -> RequestClient {
        let transport: Arc<dyn Transport> = transport.clone();
        RequestClient::new(transport, RetryPolicy::default())
    }

    #[test]
    fn classification_table() {
        let policy = RetryPolicy::default();
        let post = Method::Post;
        let get = Method::Get;
        assert_eq!(policy.classify(get, &Ok(status(200))), RetryDecision::Done);
        assert_eq!(policy.classify(get, &Ok(status(503))), RetryDecision::Backoff);
        assert_eq!(policy.classify(post, &Ok(status(502))), RetryDecision::Backoff);
        assert_eq!(policy.classify(get, &Ok(status(429))), RetryDecision::Backoff);
        assert_eq!(policy.classify(post, &Ok(status(429))), RetryDecision::Resubmit);
        assert_eq!(policy.classify(get, &Ok(status(404))), RetryDecision::Fail);
        assert_eq!(
            policy.classify(get, &Err(TransportError::Connect("refused".into()))),
            RetryDecision::Backoff
        );
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::ZERO);
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(40), policy.backoff_max);
    }

    #[test]
    fn submission_body_has_fixed_envelope() {
        let body = submission_body("key", &json!("mage=frost"));
        assert_eq!(body["apiKey"], "key");
        assert_eq!(body["advancedInput"], "mage=frost");
        assert_eq!(body["iterations"], 100_000);
        assert_eq!(body["type"], "advanced");
        assert_eq!(body["simcVersion"], "nightly");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_absorbed_within_budget() {
        let transport = ScriptedTransport::new(vec![
            Ok(status(503)),
            Ok(status(503)),
            Ok(status(503)),
            Ok(status(200)),
        ]);
        let value = client(&transport)
            .call("https://www.raidbots.com/api/job/1", "", None)
            .await
            .unwrap();
        assert_eq!(value["status"], 200);
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_surfaces_error() {
        let transport = ScriptedTransport::new(
            (0..10)
                .map(|_| Err(TransportError::Read("reset".into())))
                .collect(),
        );
        let err = client(&transport)
            .call("https://www.raidbots.com/api/job/1", "", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::RetriesExhausted { retries: 6, .. }));
        assert_eq!(transport.calls(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_submission_waits_and_resubmits() {
        let transport = ScriptedTransport::new(
            std::iter::repeat_with(|| Ok(status(429)))
                .take(12)
                .chain(std::iter::once(Ok(status(200))))
                .collect(),
        );
        let started = tokio::time::Instant::now();
        let value = client(&transport)
            .call("https://www.raidbots.com/sim", "key", Some(&json!("input")))
            .await
            .unwrap();
        assert_eq!(value["status"], 200);
        // 429 resubmissions do not consume the back-off budget
        assert_eq!(transport.calls(), 13);
        assert!(started.elapsed() >= Duration::from_secs(120));
        let seen = transport.seen.lock().unwrap();
        assert!(seen.iter().all(|request| request.method == Method::Post));
        assert_eq!(seen[0].body.as_ref().unwrap()["apiKey"], "key");
    }

    #[tokio::test(start_paused = true)]
    async fn other_status_fails_immediately() {
        let transport = ScriptedTransport::new(vec![Ok(status(401))]);
        let err = client(&transport)
            .call("https://www.raidbots.com/sim", "bad", Some(&json!("input")))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Failed { status: 401, .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_scope_urls_are_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(status(503)), Ok(status(200))]);
        let transport_dyn: Arc<dyn Transport> = transport.clone();
        let client = RequestClient {
            transport: transport_dyn,
            policy: RetryPolicy::default(),
            scope: Some("https://www.raidbots.com/".to_string()),
        };
        let err = client
            .call("https://example.com/status", "", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Failed { status: 503, .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn non_json_body_is_a_decode_error() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse {
            status: 200,
            body: "<html>".to_string(),
        })]);
        let client = client(&transport);
        let err = tokio_test::block_on(client.call("https://www.raidbots.com/", "", None))
            .unwrap_err();
        assert!(matches!(err, RequestError::Decode { .. }));
    }

    mod over_http {
        use super::super::*;
        use hyper::service::{make_service_fn, service_fn};
        use hyper::{Body, Request, Response, Server};
        use std::convert::Infallible;
        use std::net::SocketAddr;
        use std::sync::atomic::{AtomicUsize, Ordering};

        /// Serves `script[n]` as the status of the n-th request, then 200.
        fn spawn_server(script: Vec<u16>) -> (String, Arc<AtomicUsize>) {
            let hits = Arc::new(AtomicUsize::new(0));
            let script = Arc::new(script);
            let counter = Arc::clone(&hits);
            let make_svc = make_service_fn(move |_conn| {
                let counter = Arc::clone(&counter);
                let script = Arc::clone(&script);
                async move {
                    Ok::<_, Infallible>(service_fn(move |_req: Request<Body>| {
                        let attempt = counter.fetch_add(1, Ordering::SeqCst);
                        let code = script.get(attempt).copied().unwrap_or(200);
                        async move {
                            let response = Response::builder()
                                .status(code)
                                .header("content-type", "application/json")
                                .body(Body::from(format!(r#"{{"attempt":{attempt}}}"#)))
                                .unwrap();
                            Ok::<_, Infallible>(response)
                        }
                    }))
                }
            });
            let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
            let addr = server.local_addr();
            tokio::spawn(server);
            (format!("http://{addr}/sim"), hits)
        }

        fn fast_policy() -> RetryPolicy {
            RetryPolicy {
                backoff_factor: Duration::from_millis(1),
                rate_limit_wait: Duration::from_millis(5),
                ..RetryPolicy::default()
            }
        }

        #[tokio::test]
        async fn recovers_from_server_errors() {
            let (url, hits) = spawn_server(vec![503, 503, 503]);
            let client = RequestClient::for_host(&url, fast_policy()).unwrap();
            let value = client.call(&url, "", None).await.unwrap();
            assert_eq!(value["attempt"], 3);
            assert_eq!(hits.load(Ordering::SeqCst), 4);
        }

        #[tokio::test]
        async fn resubmits_after_rate_limit() {
            let (url, hits) = spawn_server(vec![429, 429]);
            let client = RequestClient::for_host(&url, fast_policy()).unwrap();
            let value = client
                .call(&url, "key", Some(&json!("mage=frost")))
                .await
                .unwrap();
            assert_eq!(value["attempt"], 2);
            assert_eq!(hits.load(Ordering::SeqCst), 3);
        }

        #[tokio::test]
        async fn client_errors_are_fatal() {
            let (url, hits) = spawn_server(vec![404]);
            let client = RequestClient::for_host(&url, fast_policy()).unwrap();
            let err = client.call(&url, "", None).await.unwrap_err();
            assert!(matches!(err, RequestError::Failed { status: 404, .. }));
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }
    }
}
