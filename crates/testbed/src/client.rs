//! In-process HTTP client for axum applications.
//!
//! [`TestClient`] sends simulated requests through an [`axum::Router`]
//! without opening a socket, keeps a cookie jar across requests and checks
//! every response status against an [`ExpectStatus`]. [`TestResponse`] is
//! the collected result.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use testbed::client::{ExpectStatus, TestClient};
//! use axum::Router;
//! use axum::routing::get;
//! use http::Method;
//!
//! async fn example() {
//!     let app = Router::new().route("/hello", get(|| async { "Hello, World!" }));
//!     let mut client = TestClient::new(app);
//!
//!     let response = client.get("/hello").await;
//!     assert_eq!(response.status_code(), 200);
//!     assert_eq!(response.text(), "Hello, World!");
//!
//!     let missing = client
//!         .request(Method::GET, "/missing", None, &ExpectStatus::Any)
//!         .await;
//!     assert_eq!(missing.status_code(), 404);
//! }
//! ```

use std::collections::HashMap;
use std::fmt;

use axum::Router;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use testbed_core::{TestbedError, TestbedResult};

/// Content type of encoded [`FormData`] bodies.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Which response statuses a request accepts.
///
/// A status outside the accepted set fails the test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExpectStatus {
    /// Any 2xx or 3xx status.
    #[default]
    Default,
    /// Every status.
    Any,
    /// Exactly the listed statuses.
    Codes(Vec<u16>),
}

impl ExpectStatus {
    /// Returns `true` if `status` is accepted.
    pub fn accepts(&self, status: StatusCode) -> bool {
        match self {
            Self::Default => status.is_success() || status.is_redirection(),
            Self::Any => true,
            Self::Codes(codes) => codes.contains(&status.as_u16()),
        }
    }
}

impl fmt::Display for ExpectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("2xx or 3xx"),
            Self::Any => f.write_str("any status"),
            Self::Codes(codes) => {
                let codes: Vec<String> = codes.iter().map(ToString::to_string).collect();
                f.write_str(&codes.join(", "))
            }
        }
    }
}

impl From<u16> for ExpectStatus {
    fn from(code: u16) -> Self {
        Self::Codes(vec![code])
    }
}

/// A form body, encoded as `application/x-www-form-urlencoded`.
///
/// Keys and values are written as given, without percent-encoding.
/// A field with several values is written once per value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    pairs: Vec<(String, String)>,
}

impl FormData {
    /// An empty form.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single-valued field.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    /// Adds a field with several values; the key is repeated for each.
    #[must_use]
    pub fn field_list<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let key = key.into();
        for value in values {
            self.pairs.push((key.clone(), value.into()));
        }
        self
    }

    /// Every encoded `(key, value)` pair, in insertion order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Returns `true` if the form has no fields.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Encodes the form as `key=value&...`.
    pub fn encode(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn json_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl TryFrom<serde_json::Value> for FormData {
    type Error = TestbedError;

    /// Builds a form from a JSON object. Arrays become repeated keys.
    fn try_from(value: serde_json::Value) -> TestbedResult<Self> {
        let serde_json::Value::Object(fields) = value else {
            return Err(TestbedError::SerializationError(format!(
                "form data must be a JSON object, got {value}"
            )));
        };
        Ok(fields
            .iter()
            .fold(Self::new(), |form, (key, value)| match value {
                serde_json::Value::Array(items) => {
                    form.field_list(key.as_str(), items.iter().map(json_scalar))
                }
                scalar => form.field(key.as_str(), json_scalar(scalar)),
            }))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |form, (k, v)| form.field(k, v))
    }
}

/// A test client for making simulated HTTP requests against an axum application.
///
/// Maintains cookies across requests. The verb shortcuts expect a 2xx or 3xx
/// status; [`request`](Self::request) takes an explicit [`ExpectStatus`].
pub struct TestClient {
    app: Router,
    cookies: HashMap<String, String>,
}

impl TestClient {
    /// Creates a new test client wrapping the given router.
    pub fn new(app: Router) -> Self {
        Self {
            app,
            cookies: HashMap::new(),
        }
    }

    /// Sends a GET request to the given path.
    pub async fn get(&mut self, path: &str) -> TestResponse {
        self.request(Method::GET, path, None, &ExpectStatus::Default)
            .await
    }

    /// Sends a POST request with form data.
    pub async fn post(&mut self, path: &str, data: &FormData) -> TestResponse {
        self.request(Method::POST, path, Some(data), &ExpectStatus::Default)
            .await
    }

    /// Sends a PUT request with form data.
    pub async fn put(&mut self, path: &str, data: &FormData) -> TestResponse {
        self.request(Method::PUT, path, Some(data), &ExpectStatus::Default)
            .await
    }

    /// Sends a PATCH request with form data.
    pub async fn patch(&mut self, path: &str, data: &FormData) -> TestResponse {
        self.request(Method::PATCH, path, Some(data), &ExpectStatus::Default)
            .await
    }

    /// Sends a DELETE request to the given path.
    pub async fn delete(&mut self, path: &str) -> TestResponse {
        self.request(Method::DELETE, path, None, &ExpectStatus::Default)
            .await
    }

    /// Sends a HEAD request to the given path.
    pub async fn head(&mut self, path: &str) -> TestResponse {
        self.request(Method::HEAD, path, None, &ExpectStatus::Default)
            .await
    }

    /// Sends an OPTIONS request to the given path.
    pub async fn options(&mut self, path: &str) -> TestResponse {
        self.request(Method::OPTIONS, path, None, &ExpectStatus::Default)
            .await
    }

    /// Sends a request, with `data` as a form body when given.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid request target or the response
    /// status is not accepted by `expect`.
    pub async fn request(
        &mut self,
        method: Method,
        path: &str,
        data: Option<&FormData>,
        expect: &ExpectStatus,
    ) -> TestResponse {
        let body = data.map(|form| (form.encode().into_bytes(), FORM_CONTENT_TYPE));
        self.dispatch(method, path, body, expect).await
    }

    /// Sends a request whose body is sent exactly as given.
    ///
    /// # Panics
    ///
    /// Panics if `path` or `content_type` is invalid, or the response status
    /// is not accepted by `expect`.
    pub async fn request_raw(
        &mut self,
        method: Method,
        path: &str,
        body: impl Into<Vec<u8>>,
        content_type: &str,
        expect: &ExpectStatus,
    ) -> TestResponse {
        self.dispatch(method, path, Some((body.into(), content_type)), expect)
            .await
    }

    async fn dispatch(
        &mut self,
        method: Method,
        path: &str,
        body: Option<(Vec<u8>, &str)>,
        expect: &ExpectStatus,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method.clone()).uri(path);

        if let Some((_, content_type)) = &body {
            builder = builder.header(http::header::CONTENT_TYPE, *content_type);
        }

        if let Some(cookie) = self.cookie_header() {
            builder = builder.header(http::header::COOKIE, cookie);
        }

        let body = body.map_or_else(axum::body::Body::empty, |(bytes, _)| {
            axum::body::Body::from(bytes)
        });
        let req = builder
            .body(body)
            .unwrap_or_else(|e| panic!("Invalid request {method} {path}: {e}"));

        let response = self.send(req).await;
        tracing::debug!(%method, path, status = response.status_code(), "test request");
        assert!(
            expect.accepts(response.status),
            "Bad response: {} (not {expect}) for {method} {path}",
            response.status
        );
        response
    }

    /// Requests the target of a redirect response with GET.
    ///
    /// # Panics
    ///
    /// Panics if the response has no `Location` header.
    pub async fn follow(&mut self, response: &TestResponse) -> TestResponse {
        let Some(location) = response.location() else {
            panic!(
                "Cannot follow a response without a Location header (status code was {})",
                response.status_code()
            );
        };
        let location = location.to_string();
        self.get(&location).await
    }

    /// Sets a cookie that will be included in subsequent requests.
    pub fn set_cookie(&mut self, name: &str, value: &str) {
        self.cookies.insert(name.to_string(), value.to_string());
    }

    /// Returns the current value of a cookie.
    pub fn get_cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Clears all cookies from the client.
    pub fn clear_cookies(&mut self) {
        self.cookies.clear();
    }

    /// Builds the Cookie header from the current cookie jar.
    fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }

        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Sends the request through the router and builds a `TestResponse`.
    async fn send(&mut self, req: Request<axum::body::Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(req)
            .await
            .unwrap_or_else(|never| match never {});

        let status = response.status();
        let headers = response.headers().clone();

        // Only the leading name=value of each Set-Cookie is kept.
        let mut response_cookies = HashMap::new();
        for value in headers.get_all(http::header::SET_COOKIE) {
            if let Ok(cookie_str) = value.to_str() {
                if let Some(pair) = cookie_str.split(';').next() {
                    if let Some((name, val)) = pair.split_once('=') {
                        let name = name.trim().to_string();
                        let val = val.trim().to_string();
                        self.cookies.insert(name.clone(), val.clone());
                        response_cookies.insert(name, val);
                    }
                }
            }
        }

        let body_bytes = response
            .into_body()
            .collect()
            .await
            .map_or_else(|_| Bytes::new(), http_body_util::Collected::to_bytes);

        TestResponse {
            status,
            headers,
            body: body_bytes.to_vec(),
            cookies: response_cookies,
        }
    }
}

impl fmt::Debug for TestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestClient")
            .field("cookies", &self.cookies)
            .finish_non_exhaustive()
    }
}

/// The response from a test request.
#[derive(Debug)]
pub struct TestResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    /// The response body as raw bytes.
    pub body: Vec<u8>,
    /// Cookies set by the response.
    pub cookies: HashMap<String, String>,
}

impl TestResponse {
    /// Returns the response body as a UTF-8 string.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Deserializes the response body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> TestbedResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| TestbedError::SerializationError(e.to_string()))
    }

    /// Returns the numeric status code.
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Returns the value of a header by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns `true` if the response has the specified header.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Returns the raw `Location` header.
    pub fn location(&self) -> Option<&str> {
        self.header(http::header::LOCATION.as_str())
    }

    /// Returns `true` if the response body contains the given text.
    pub fn contains(&self, text: &str) -> bool {
        self.text().contains(text)
    }
}
