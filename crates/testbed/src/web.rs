//! HTTP sandbox and response assertions.
//!
//! [`WebSandbox`] wraps the application under test in a lazily built
//! [`TestClient`]. Unlike the bare client its verb methods accept every
//! status code, so tests can assert on error responses with the helpers in
//! this module.
//!
//! ## Assertion Helpers
//!
//! - [`assert_ok`] - status 200
//! - [`assert_not_found`] - status 404
//! - [`assert_forbidden`] - status 403
//! - [`assert_redirects`] - status 301/302, optionally to a given URL
//! - [`assert_contains`] / [`assert_not_contains`] - response body text

use axum::Router;
use http::Method;
use url::Url;

use testbed_core::{Settings, TestbedError, TestbedResult};

use crate::base::Sandbox;
use crate::client::{ExpectStatus, FormData, TestClient, TestResponse, FORM_CONTENT_TYPE};

/// Drives the configured application for one test.
pub struct WebSandbox {
    application: Option<Router>,
    client: Option<TestClient>,
    base_url: String,
}

impl WebSandbox {
    /// Creates a sandbox for `application`, with `http://localhost` as the
    /// base for redirect comparisons.
    pub fn new(application: Router) -> Self {
        Self {
            application: Some(application),
            client: None,
            base_url: Settings::default().base_url,
        }
    }

    /// Creates a sandbox with no application. Requests fail until one is set.
    pub fn unconfigured() -> Self {
        Self {
            application: None,
            client: None,
            base_url: Settings::default().base_url,
        }
    }

    /// Creates a sandbox using the base URL from `settings`.
    pub fn from_settings(settings: &Settings, application: Option<Router>) -> Self {
        Self {
            application,
            client: None,
            base_url: settings.base_url.clone(),
        }
    }

    /// Replaces the application. The next request builds a fresh client.
    pub fn set_application(&mut self, application: Router) {
        self.application = Some(application);
        self.client = None;
    }

    /// Sets the base URL redirect targets are resolved against.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The base URL redirect targets are resolved against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the client, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`TestbedError::ImproperlyConfigured`] if no application was set.
    pub fn try_app(&mut self) -> TestbedResult<&mut TestClient> {
        let client = match self.client.take() {
            Some(client) => client,
            None => {
                let application = self.application.clone().ok_or_else(|| {
                    TestbedError::ImproperlyConfigured("Missing setting APPLICATION".into())
                })?;
                tracing::debug!(base_url = %self.base_url, "test client created");
                TestClient::new(application)
            }
        };
        Ok(self.client.insert(client))
    }

    /// Returns the client, building it on first use.
    ///
    /// # Panics
    ///
    /// Panics with `Missing setting APPLICATION` if no application was set.
    pub fn app(&mut self) -> &mut TestClient {
        match self.try_app() {
            Ok(client) => client,
            Err(e) => panic!("{e}"),
        }
    }

    /// Sends a GET request, accepting any status.
    pub async fn get(&mut self, path: &str) -> TestResponse {
        self.get_expecting(path, &ExpectStatus::Any).await
    }

    /// Sends a GET request with an explicit status expectation.
    pub async fn get_expecting(&mut self, path: &str, expect: &ExpectStatus) -> TestResponse {
        self.app().request(Method::GET, path, None, expect).await
    }

    /// Sends a form-encoded POST request, accepting any status.
    pub async fn post(&mut self, path: &str, data: &FormData) -> TestResponse {
        self.post_expecting(path, data, &ExpectStatus::Any).await
    }

    /// Sends a form-encoded POST request with an explicit status expectation.
    pub async fn post_expecting(
        &mut self,
        path: &str,
        data: &FormData,
        expect: &ExpectStatus,
    ) -> TestResponse {
        self.app()
            .request(Method::POST, path, Some(data), expect)
            .await
    }

    /// Sends a POST request whose body is passed through unencoded, with a
    /// form content type. Accepts any status.
    pub async fn post_raw(&mut self, path: &str, body: impl Into<Vec<u8>>) -> TestResponse {
        self.post_raw_expecting(path, body, &ExpectStatus::Any).await
    }

    /// Sends an unencoded POST body with an explicit status expectation.
    pub async fn post_raw_expecting(
        &mut self,
        path: &str,
        body: impl Into<Vec<u8>>,
        expect: &ExpectStatus,
    ) -> TestResponse {
        self.app()
            .request_raw(Method::POST, path, body, FORM_CONTENT_TYPE, expect)
            .await
    }

    /// Sends a form-encoded PUT request, accepting any status.
    pub async fn put(&mut self, path: &str, data: &FormData) -> TestResponse {
        self.put_expecting(path, data, &ExpectStatus::Any).await
    }

    /// Sends a form-encoded PUT request with an explicit status expectation.
    pub async fn put_expecting(
        &mut self,
        path: &str,
        data: &FormData,
        expect: &ExpectStatus,
    ) -> TestResponse {
        self.app()
            .request(Method::PUT, path, Some(data), expect)
            .await
    }

    /// Sends a DELETE request, accepting any status.
    pub async fn delete(&mut self, path: &str) -> TestResponse {
        self.delete_expecting(path, &ExpectStatus::Any).await
    }

    /// Sends a DELETE request with an explicit status expectation.
    pub async fn delete_expecting(&mut self, path: &str, expect: &ExpectStatus) -> TestResponse {
        self.app().request(Method::DELETE, path, None, expect).await
    }

    /// Returns a cookie from the client's jar.
    pub fn get_cookie(&self, name: &str) -> Option<String> {
        self.client
            .as_ref()
            .and_then(|client| client.get_cookie(name))
            .map(ToString::to_string)
    }

    /// Puts a cookie in the client's jar, building the client if needed.
    ///
    /// # Panics
    ///
    /// Panics with `Missing setting APPLICATION` if no application was set.
    pub fn set_cookie(&mut self, name: &str, value: &str) {
        self.app().set_cookie(name, value);
    }

    /// # Panics
    ///
    /// Panics unless the status is 200.
    pub fn assert_ok(&self, response: &TestResponse) {
        assert_ok(response);
    }

    /// # Panics
    ///
    /// Panics unless the status is 404.
    pub fn assert_not_found(&self, response: &TestResponse) {
        assert_not_found(response);
    }

    /// # Panics
    ///
    /// Panics unless the status is 403.
    pub fn assert_forbidden(&self, response: &TestResponse) {
        assert_forbidden(response);
    }

    /// Asserts a redirect, resolving both URLs against this sandbox's base URL.
    ///
    /// # Panics
    ///
    /// Panics if the response is not a 301/302, or redirects elsewhere than `to`.
    pub fn assert_redirects(&self, response: &TestResponse, to: Option<&str>) {
        assert_redirects(response, to, &self.base_url);
    }
}

impl Sandbox for WebSandbox {
    /// Drops the client so the test starts with an empty cookie jar.
    fn set_up(&mut self) {
        self.client = None;
    }
}

/// Resolves `target` against `base`, as a browser resolves a link.
///
/// # Errors
///
/// Returns [`TestbedError::ConfigurationError`] if `base` is not an absolute
/// URL or `target` cannot be joined onto it.
pub fn resolve_url(base: &str, target: &str) -> TestbedResult<Url> {
    let base = Url::parse(base)
        .map_err(|e| TestbedError::ConfigurationError(format!("invalid base URL '{base}': {e}")))?;
    base.join(target)
        .map_err(|e| TestbedError::ConfigurationError(format!("invalid URL '{target}': {e}")))
}

/// Asserts that the response status is 200.
///
/// # Panics
///
/// Panics if the status is anything else.
pub fn assert_ok(response: &TestResponse) {
    let status = response.status_code();
    assert!(
        status == 200,
        "Response did not return a 200 OK (status code was {status})"
    );
}

/// Asserts that the response status is 404.
///
/// # Panics
///
/// Panics if the status is anything else.
pub fn assert_not_found(response: &TestResponse) {
    let status = response.status_code();
    assert!(
        status == 404,
        "Response was found (status code was {status})"
    );
}

/// Asserts that the response status is 403.
///
/// # Panics
///
/// Panics if the status is anything else.
pub fn assert_forbidden(response: &TestResponse) {
    let status = response.status_code();
    assert!(
        status == 403,
        "Response was allowed (status code was {status})"
    );
}

/// Asserts that the response is a 301 or 302 redirect.
///
/// With `to`, the `Location` header and `to` are both resolved against
/// `base_url` before comparing, so `/login` matches
/// `http://localhost/login`.
///
/// # Panics
///
/// Panics if the response is not a redirect, or goes elsewhere than `to`.
pub fn assert_redirects(response: &TestResponse, to: Option<&str>, base_url: &str) {
    let status = response.status_code();
    assert!(
        status == 301 || status == 302,
        "Response did not redirect (status code was {status})."
    );

    let Some(to) = to else {
        return;
    };
    let resolve = |target: &str| {
        resolve_url(base_url, target)
            .map(String::from)
            .unwrap_or_else(|e| panic!("{e}"))
    };
    let expected = resolve(to);
    let actual = response
        .location()
        .map_or_else(|| "<none>".to_string(), resolve);
    assert!(
        actual == expected,
        "Response redirected, but went to {actual} instead of {expected}"
    );
}

/// Asserts that the response body contains the given text.
///
/// # Panics
///
/// Panics if the response body does not contain `text`.
pub fn assert_contains(response: &TestResponse, text: &str) {
    let body = response.text();
    assert!(
        body.contains(text),
        "Response body does not contain '{text}'.\nActual body: {body}"
    );
}

/// Asserts that the response body does not contain the given text.
///
/// # Panics
///
/// Panics if the response body contains `text`.
pub fn assert_not_contains(response: &TestResponse, text: &str) {
    let body = response.text();
    assert!(
        !body.contains(text),
        "Response body unexpectedly contains '{text}'.\nActual body: {body}"
    );
}
