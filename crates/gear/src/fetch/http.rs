use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Supported request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(FetchError::InvalidMethod(s.to_string())),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Errors from executing a request
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection, TLS or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// No complete response within the request timeout
    #[error("request to {0} timed out")]
    Timeout(String),

    /// Proxy address could not be parsed
    #[error("invalid proxy address: {0}")]
    InvalidProxy(String),

    #[error("unknown http method: {0}")]
    InvalidMethod(String),
}

/// A request description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Proxy URL, e.g. `http://10.0.0.1:8080`
    #[serde(default)]
    pub proxy: Option<String>,
    /// Covers connect, headers and body
    #[serde(default, with = "optional_millis")]
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            proxy: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A buffered response
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: u16,
    /// Header names are lowercase
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl FetchResult {
    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Body as UTF-8, lossy
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Executes [`HttpRequest`]s
///
/// Requests without a proxy share one connection pool. A request with a
/// proxy gets a client built for that proxy.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_user_agent(concat!("gear/", env!("CARGO_PKG_VERSION")))
    }

    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        let user_agent = user_agent.into();
        let client = reqwest::Client::builder()
            .user_agent(user_agent.clone())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, user_agent }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<reqwest::Client, FetchError> {
        let Some(proxy) = proxy else {
            return Ok(self.client.clone());
        };

        let proxy =
            reqwest::Proxy::all(proxy).map_err(|_| FetchError::InvalidProxy(proxy.to_string()))?;
        reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .proxy(proxy)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))
    }

    /// Send the request and read the whole body
    ///
    /// Non-2xx statuses are returned as results, not errors.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn fetch(&self, request: &HttpRequest) -> Result<FetchResult, FetchError> {
        let client = self.client_for(request.proxy.as_deref())?;

        let mut builder = client.request(request.method.into(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response.bytes().await?.to_vec();
            Ok::<_, reqwest::Error>(FetchResult {
                status,
                headers,
                body,
            })
        };

        let result = match request.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| FetchError::Timeout(request.url.clone()))?,
            None => exchange.await,
        };

        let result = result.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(request.url.clone())
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;

        debug!(status = result.status, bytes = result.body.len(), "Fetched");
        Ok(result)
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
