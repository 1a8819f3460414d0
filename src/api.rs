// API client module: a small blocking HTTP client for the photo web service.
// Requests are retried a bounded number of times with a linear backoff, and
// every answer is classified into an `Outcome` the caller has to match on.

use log::{debug, error, warn};
use reqwest::blocking::Client;
use serde::Serialize;
use std::fmt;
use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::records::{self, ErrorBody, ParseError};

/// HTTP verbs the web service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
        })
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
        }
    }
}

/// Request descriptor: verb, path below the base URL and optional JSON body.
/// Built once per call and consumed by [`ResilientClient::send`].
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Request {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn put<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, ParseError> {
        Self::with_body(Method::Put, path.into(), body)
    }

    pub fn post<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, ParseError> {
        Self::with_body(Method::Post, path.into(), body)
    }

    fn with_body<B: Serialize>(method: Method, path: String, body: &B) -> Result<Self, ParseError> {
        Ok(Request {
            method,
            path,
            body: Some(serde_json::to_value(body)?),
        })
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }
}

/// Status and body of a single HTTP exchange, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// A request that never produced an HTTP status.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not even be built (malformed URL and the like).
    #[error("invalid request: {0}")]
    Invalid(String),
    /// Connection refused, DNS failure, timeout, broken socket.
    #[error("network failure: {0}")]
    Network(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let mut cause = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(inner) = source {
            cause.push_str(": ");
            cause.push_str(&inner.to_string());
            source = std::error::Error::source(inner);
        }
        if err.is_builder() {
            TransportError::Invalid(cause)
        } else {
            TransportError::Network(cause)
        }
    }
}

/// One network round trip. The retry loop sits above this seam so tests can
/// script answers without a server.
pub trait Transport {
    fn execute(&self, url: &str, request: &Request) -> Result<RawResponse, TransportError>;
}

/// `Transport` backed by a reqwest blocking client.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build the underlying client. `timeout` bounds each attempt, not the
    /// whole retry sequence.
    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(HttpTransport {
            client: builder.build()?,
        })
    }
}

impl Transport for HttpTransport {
    fn execute(&self, url: &str, request: &Request) -> Result<RawResponse, TransportError> {
        let mut req = self.client.request(request.method().into(), url);
        if let Some(body) = request.body() {
            req = req.json(body);
        }
        let res = req.send()?;
        let status = res.status().as_u16();
        let body = res.text()?;
        Ok(RawResponse { status, body })
    }
}

/// 200, 400 and 500 are answers the service meant to give; anything else is
/// treated as transient.
pub fn is_terminal(status: u16) -> bool {
    matches!(status, 200 | 400 | 500)
}

/// Classified result of [`ResilientClient::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 200 with the raw JSON body.
    Success { body: String },
    /// 400 with the service's message.
    ClientError { message: String },
    /// 500 with the service's message.
    ServerError { message: String },
    /// Some other status was still being returned when the attempts ran out.
    Unexpected { status: u16, body: String },
    /// No HTTP status at all.
    TransportFailure { cause: String },
}

impl Outcome {
    pub fn classify(raw: RawResponse) -> Self {
        match raw.status {
            200 => Outcome::Success { body: raw.body },
            400 => Outcome::ClientError {
                message: error_message(raw.body),
            },
            500 => Outcome::ServerError {
                message: error_message(raw.body),
            },
            status => Outcome::Unexpected {
                status,
                body: raw.body,
            },
        }
    }

    /// HTTP status behind this outcome, `None` for transport failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Outcome::Success { .. } => Some(200),
            Outcome::ClientError { .. } => Some(400),
            Outcome::ServerError { .. } => Some(500),
            Outcome::Unexpected { status, .. } => Some(*status),
            Outcome::TransportFailure { .. } => None,
        }
    }
}

// 400/500 bodies are `{"message": ...}`; fall back to the raw text when a
// proxy or a crash produced something else.
fn error_message(body: String) -> String {
    match records::parse::<ErrorBody>(&body) {
        Ok(parsed) => parsed.message,
        Err(_) => body,
    }
}

/// How often and how patiently a request is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// The wait after attempt `n` is `n * backoff_unit`.
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }
}

/// Sends requests against a fixed base URL with bounded retries.
pub struct ResilientClient<T = HttpTransport> {
    transport: T,
    base_url: String,
    policy: RetryPolicy,
    sleep: fn(Duration),
}

impl<T: Transport> ResilientClient<T> {
    pub fn new(transport: T, base_url: impl Into<String>, policy: RetryPolicy) -> Self {
        ResilientClient {
            transport,
            base_url: base_url.into(),
            policy,
            sleep: thread::sleep,
        }
    }

    /// Replace the function used to wait between attempts.
    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Issue `request`, retrying transient failures. Blocks through the
    /// backoff sleeps; there is no way to cancel a sequence in flight.
    pub fn send(&self, request: Request) -> Outcome {
        let url = self.url_for(request.path());
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("{} {} (attempt {}/{})", request.method(), url, attempt, max_attempts);
            let result = self.transport.execute(&url, &request);

            let retry = match &result {
                Ok(raw) => !is_terminal(raw.status),
                Err(err) => err.is_retryable(),
            };

            if !retry || attempt >= max_attempts {
                return match result {
                    Ok(raw) => Outcome::classify(raw),
                    Err(err) => {
                        error!("{} {} failed: {}", request.method(), url, err);
                        Outcome::TransportFailure {
                            cause: err.to_string(),
                        }
                    }
                };
            }

            let delay = self.policy.delay_after(attempt);
            match &result {
                Ok(raw) => warn!(
                    "{} answered {}, retrying in {:?} (attempt {}/{})",
                    url, raw.status, delay, attempt, max_attempts
                ),
                Err(err) => warn!(
                    "{} unreachable ({}), retrying in {:?} (attempt {}/{})",
                    url, err, delay, attempt, max_attempts
                ),
            }
            (self.sleep)(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// Plays back scripted answers; the last one repeats once the script runs dry.
    struct Scripted {
        answers: RefCell<VecDeque<Result<RawResponse, TransportError>>>,
        last: fn() -> Result<RawResponse, TransportError>,
        calls: Cell<u32>,
    }

    impl Scripted {
        fn new(
            answers: Vec<Result<RawResponse, TransportError>>,
            last: fn() -> Result<RawResponse, TransportError>,
        ) -> Self {
            Scripted {
                answers: RefCell::new(answers.into()),
                last,
                calls: Cell::new(0),
            }
        }
    }

    impl Transport for Scripted {
        fn execute(&self, _url: &str, _request: &Request) -> Result<RawResponse, TransportError> {
            self.calls.set(self.calls.get() + 1);
            self.answers
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| (self.last)())
        }
    }

    fn status(code: u16, body: &str) -> Result<RawResponse, TransportError> {
        Ok(RawResponse {
            status: code,
            body: body.to_string(),
        })
    }

    fn unavailable() -> Result<RawResponse, TransportError> {
        status(503, "Service Unavailable")
    }

    fn refused() -> Result<RawResponse, TransportError> {
        Err(TransportError::Network("connection refused".into()))
    }

    fn client(transport: Scripted) -> ResilientClient<Scripted> {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_unit: Duration::ZERO,
        };
        ResilientClient::new(transport, "http://localhost:8080", policy)
    }

    #[test]
    fn transient_statuses_are_retried_until_success() {
        let c = client(Scripted::new(
            vec![unavailable(), unavailable(), status(200, "{}")],
            unavailable,
        ));
        let outcome = c.send(Request::get("/stats"));
        assert_eq!(outcome, Outcome::Success { body: "{}".into() });
        assert_eq!(c.transport().calls.get(), 3);
    }

    #[test]
    fn exhausted_attempts_return_the_last_answer() {
        let c = client(Scripted::new(vec![], unavailable));
        let outcome = c.send(Request::get("/stats"));
        assert_eq!(outcome.status(), Some(503));
        assert!(matches!(outcome, Outcome::Unexpected { .. }));
        assert_eq!(c.transport().calls.get(), 3);
    }

    #[test]
    fn client_error_is_not_retried() {
        let c = client(Scripted::new(
            vec![status(400, r#"{"message":"no such higi"}"#)],
            unavailable,
        ));
        let outcome = c.send(Request::get("/image/9"));
        assert_eq!(
            outcome,
            Outcome::ClientError {
                message: "no such higi".into()
            }
        );
        assert_eq!(c.transport().calls.get(), 1);
    }

    #[test]
    fn server_error_is_not_retried() {
        let c = client(Scripted::new(vec![status(500, "boom")], unavailable));
        let outcome = c.send(Request::get("/images"));
        assert_eq!(
            outcome,
            Outcome::ServerError {
                message: "boom".into()
            }
        );
        assert_eq!(c.transport().calls.get(), 1);
    }

    #[test]
    fn network_failures_are_retried() {
        let c = client(Scripted::new(vec![refused(), status(200, "{}")], refused));
        assert!(matches!(c.send(Request::get("/higis")), Outcome::Success { .. }));
        assert_eq!(c.transport().calls.get(), 2);
    }

    #[test]
    fn persistent_network_failure_becomes_transport_failure() {
        let c = client(Scripted::new(vec![], refused));
        let outcome = c.send(Request::get("/higis"));
        assert!(matches!(outcome, Outcome::TransportFailure { .. }));
        assert_eq!(outcome.status(), None);
        assert_eq!(c.transport().calls.get(), 3);
    }

    #[test]
    fn invalid_request_is_not_retried() {
        let c = client(Scripted::new(vec![], || {
            Err(TransportError::Invalid("relative URL without a base".into()))
        }));
        let outcome = c.send(Request::get("/higis"));
        assert!(matches!(outcome, Outcome::TransportFailure { .. }));
        assert_eq!(c.transport().calls.get(), 1);
    }

    thread_local! {
        static SLEPT: RefCell<Vec<Duration>> = RefCell::new(Vec::new());
    }

    fn record_sleep(delay: Duration) {
        SLEPT.with(|slept| slept.borrow_mut().push(delay));
    }

    fn slept() -> Vec<Duration> {
        SLEPT.with(|slept| slept.borrow().clone())
    }

    #[test]
    fn waits_one_then_two_seconds_and_not_after_the_last_attempt() {
        let transport = Scripted::new(vec![], unavailable);
        let c = ResilientClient::new(transport, "http://localhost:8080", RetryPolicy::default())
            .with_sleep(record_sleep);

        c.send(Request::get("/stats"));

        assert_eq!(c.transport().calls.get(), 3);
        assert_eq!(slept(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn no_wait_when_the_first_answer_is_terminal() {
        let transport = Scripted::new(vec![status(200, "{}")], unavailable);
        let c = ResilientClient::new(transport, "http://localhost:8080", RetryPolicy::default())
            .with_sleep(record_sleep);

        c.send(Request::get("/stats"));

        assert!(slept().is_empty());
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
    }

    #[test]
    fn request_body_is_captured_as_json() {
        #[derive(Serialize)]
        struct Body {
            higiloc: &'static str,
        }
        let req = Request::put("/higi", &Body { higiloc: "Lab A" }).unwrap();
        assert_eq!(req.method(), Method::Put);
        assert_eq!(req.body().unwrap()["higiloc"], "Lab A");
    }

    #[test]
    fn urls_are_joined_onto_the_base() {
        let c = client(Scripted::new(vec![], unavailable));
        assert_eq!(c.url_for("/image/42"), "http://localhost:8080/image/42");
    }
}
