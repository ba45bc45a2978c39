use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use dirsync_application::UserIndex;
use dirsync_core::{AppError, AppResult};
use dirsync_domain::{IndexedUser, Role, Username};


/// Connection and layout settings for the Elasticsearch user index.
#[derive(Debug, Clone)]
pub struct ElasticsearchSettings {
    /// Node base URLs, or bare `host:port` values for plain HTTP.
    pub hosts: Vec<String>,
    /// Index holding user documents.
    pub index: String,
    /// Mapping type of user documents, `None` for typeless endpoints.
    pub document_type: Option<String>,
    /// Timeout applied to every request.
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// Elasticsearch implementation of the user index port.
pub struct ElasticsearchUserIndex {
    http_client: reqwest::Client,
    hosts: Vec<Url>,
    index: String,
    document_type: Option<String>,
}

impl ElasticsearchUserIndex {
    /// Creates a user index client. No request is sent until first use.
    pub fn new(settings: &ElasticsearchSettings) -> AppResult<Self> {
        let hosts = settings
            .hosts
            .iter()
            .map(|host| parse_host(host))
            .collect::<AppResult<Vec<_>>>()?;
        if hosts.is_empty() {
            return Err(AppError::Validation(
                "at least one elasticsearch host is required".to_owned(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            http_client,
            hosts,
            index: settings.index.clone(),
            document_type: settings.document_type.clone(),
        })
    }

    fn count_url(&self, host: &Url) -> AppResult<Url> {
        match &self.document_type {
            Some(document_type) => endpoint(
                host,
                &[self.index.as_str(), document_type.as_str(), "_count"],
            ),
            None => endpoint(host, &[self.index.as_str(), "_count"]),
        }
    }

    fn create_url(&self, host: &Url, id: &str) -> AppResult<Url> {
        match &self.document_type {
            Some(document_type) => endpoint(
                host,
                &[self.index.as_str(), document_type.as_str(), id, "_create"],
            ),
            None => endpoint(host, &[self.index.as_str(), "_create", id]),
        }
    }

    fn update_url(&self, host: &Url, id: &str) -> AppResult<Url> {
        match &self.document_type {
            Some(document_type) => endpoint(
                host,
                &[self.index.as_str(), document_type.as_str(), id, "_update"],
            ),
            None => endpoint(host, &[self.index.as_str(), "_update", id]),
        }
    }

    /// Sends a request to the first reachable host.
    ///
    /// Transport failures move on to the next host. An HTTP error status is
    /// returned as is, since every host would answer the same.
    async fn send<F>(&self, operation: &str, build: F) -> AppResult<reqwest::Response>
    where
        F: Fn(&reqwest::Client, &Url) -> AppResult<reqwest::RequestBuilder>,
    {
        let mut last_error: Option<String> = None;

        for host in &self.hosts {
            match build(&self.http_client, host)?.send().await {
                Ok(response) => return ensure_success(operation, response).await,
                Err(error) => {
                    warn!(
                        host = %host,
                        operation,
                        error = %error,
                        "elasticsearch host unreachable"
                    );
                    last_error =
                        Some(format!("elasticsearch {operation} request failed: {error}"));
                }
            }
        }

        Err(AppError::Unavailable(last_error.unwrap_or_else(|| {
            "no elasticsearch host configured".to_owned()
        })))
    }
}

#[async_trait]
impl UserIndex for ElasticsearchUserIndex {
    async fn count_by_username(&self, username: &Username) -> AppResult<u64> {
        let query = username_query(username);
        let response = self
            .send("count", |client, host| {
                Ok(client.post(self.count_url(host)?).json(&query))
            })
            .await?;

        let body = response.json::<CountResponse>().await.map_err(|error| {
            AppError::Internal(format!("failed to parse elasticsearch count response: {error}"))
        })?;
        debug!(username = %username, count = body.count, "counted indexed users");

        Ok(body.count)
    }

    async fn create_user(&self, user: &IndexedUser) -> AppResult<()> {
        self.send("index", |client, host| {
            Ok(client
                .put(self.create_url(host, user.username.as_str())?)
                .json(user))
        })
        .await?;

        Ok(())
    }

    async fn update_role(&self, username: &Username, role: Role) -> AppResult<()> {
        let patch = json!({ "doc": { "role": role } });
        self.send("update", |client, host| {
            Ok(client
                .post(self.update_url(host, username.as_str())?)
                .json(&patch))
        })
        .await?;

        Ok(())
    }
}

/// Exact username match on a keyword mapping, and on the `keyword`
/// sub-field that dynamic mapping adds next to an analyzed `text` field.
fn username_query(username: &Username) -> serde_json::Value {
    json!({
        "query": {
            "bool": {
                "should": [
                    { "term": { "username": username.as_str() } },
                    { "term": { "username.keyword": username.as_str() } }
                ],
                "minimum_should_match": 1
            }
        }
    })
}

fn parse_host(host: &str) -> AppResult<Url> {
    let trimmed = host.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_owned()
    } else {
        format!("http://{trimmed}")
    };

    let url = Url::parse(candidate.as_str()).map_err(|error| {
        AppError::Validation(format!("invalid elasticsearch host '{host}': {error}"))
    })?;
    if url.cannot_be_a_base() {
        return Err(AppError::Validation(format!(
            "invalid elasticsearch host '{host}': not a base URL"
        )));
    }

    Ok(url)
}

fn endpoint(host: &Url, segments: &[&str]) -> AppResult<Url> {
    let mut url = host.clone();
    url.path_segments_mut()
        .map_err(|()| {
            AppError::Validation(format!("elasticsearch host '{host}' is not a base URL"))
        })?
        .pop_if_empty()
        .extend(segments);
    url.set_query(None);

    Ok(url)
}

async fn ensure_success(
    operation: &str,
    response: reqwest::Response,
) -> AppResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_owned());
    let message = format!(
        "elasticsearch {operation} request returned status {}: {}",
        status.as_u16(),
        body.trim()
    );

    Err(match status {
        reqwest::StatusCode::NOT_FOUND => AppError::NotFound(message),
        reqwest::StatusCode::CONFLICT => AppError::Conflict(message),
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            AppError::Unauthorized(message)
        }
        _ if status.is_server_error() => AppError::Unavailable(message),
        _ => AppError::Internal(message),
    })
}
