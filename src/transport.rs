// Author: Jacques Murray

//! The outbound-call seam.
//!
//! The crate never talks to the network itself. Callers describe an API
//! action as a serializable [`Operation`] and inject a [`Transport`] that
//! performs it. Non-2xx responses are returned as `Ok(Response)`; only
//! failures with no response at all (timeouts, refused connections) are
//! reported as `Err(RawFailure)`.

use crate::classify::RawFailure;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Header carrying the request id for server-side correlation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// HTTP method of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Whether this method changes server state.
    pub fn is_write(self) -> bool {
        !matches!(self, Method::Get)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A serializable description of one API action.
///
/// Being plain data, it can be persisted in the offline queue and replayed
/// after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Logical operation name, e.g. `"update_campaign"`.
    pub name: String,
    pub method: Method,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Per-call timeout enforced by the transport.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_millis")]
    pub timeout: Option<Duration>,
}

impl Operation {
    pub fn new(name: impl Into<String>, method: Method, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, Method::Get, url)
    }

    pub fn post(name: impl Into<String>, url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(name, Method::Post, url).with_body(body)
    }

    pub fn put(name: impl Into<String>, url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(name, Method::Put, url).with_body(body)
    }

    pub fn delete(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, Method::Delete, url)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A response received from the server, whatever its status.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    /// Header names are lower-case.
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn ok(body: serde_json::Value) -> Self {
        Self::new(200).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs one outbound call.
pub trait Transport: Send + Sync {
    fn send(&self, operation: Operation) -> BoxFuture<'_, Result<Response, RawFailure>>;
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(d.as_millis() as u64),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(feature = "reqwest")]
pub use self::reqwest_adapter::ReqwestTransport;

#[cfg(feature = "reqwest")]
mod reqwest_adapter {
    use super::*;
    use futures::FutureExt;

    /// A [`Transport`] over a `reqwest::Client`.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
        base_url: String,
    }

    impl ReqwestTransport {
        pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
            Self {
                client,
                base_url: base_url.into(),
            }
        }

        async fn execute(&self, operation: Operation) -> Result<Response, RawFailure> {
            let method = match operation.method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
                Method::Put => reqwest::Method::PUT,
                Method::Patch => reqwest::Method::PATCH,
                Method::Delete => reqwest::Method::DELETE,
            };
            let url = format!("{}{}", self.base_url, operation.url);
            let mut request = self.client.request(method, url);
            for (name, value) in &operation.headers {
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &operation.body {
                request = request.json(body);
            }
            if let Some(timeout) = operation.timeout {
                request = request.timeout(timeout);
            }

            let res = request.send().await.map_err(|e| RawFailure::from_reqwest(&e))?;
            let status = res.status().as_u16();
            let headers = res
                .headers()
                .iter()
                .filter_map(|(k, v)| Some((k.as_str().to_owned(), v.to_str().ok()?.to_owned())))
                .collect();
            let text = res.text().await.map_err(|e| RawFailure::from_reqwest(&e))?;
            let body = if text.is_empty() {
                None
            } else {
                Some(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
            };

            Ok(Response {
                status,
                headers,
                body,
            })
        }
    }

    impl Transport for ReqwestTransport {
        fn send(&self, operation: Operation) -> BoxFuture<'_, Result<Response, RawFailure>> {
            self.execute(operation).boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_survives_json() {
        let op = Operation::put("update_campaign", "/api/campaigns/7", json!({"budget": 1200}))
            .with_header("X-Tenant", "acme")
            .with_timeout(Duration::from_secs(10));

        let text = serde_json::to_string(&op).unwrap();
        assert!(text.contains("\"method\":\"PUT\""));
        assert!(text.contains("\"timeout\":10000"));

        let back: Operation = serde_json::from_str(&text).unwrap();
        assert_eq!(back, op);
        assert_eq!(back.headers.get("x-tenant").map(String::as_str), Some("acme"));
    }

    #[test]
    fn response_headers_are_case_insensitive() {
        let res = Response::new(429).with_header("Retry-After", "3");
        assert_eq!(res.header("retry-after"), Some("3"));
        assert_eq!(res.header("RETRY-AFTER"), Some("3"));
        assert!(!res.is_success());
    }

    #[test]
    fn only_get_is_a_read() {
        assert!(!Method::Get.is_write());
        assert!(Method::Post.is_write());
        assert!(Method::Delete.is_write());
    }
}
