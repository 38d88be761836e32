//! X API v2 content source.
//!
//! Resolves `@handle` to a user id once per process, then pages through the
//! user's timeline newest-first until it reaches the cursor, the end of the
//! timeline, or `max_items`. Results are handed back oldest-first.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use sundew_shared::{Item, ItemId, Result, SourceConfig, SundewError};

use crate::client::{ContentSource, FetchOutcome};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("Sundew/", env!("CARGO_PKG_VERSION"));

/// Header carrying the epoch second at which the rate-limit window resets.
const RATE_LIMIT_RESET_HEADER: &str = "x-rate-limit-reset";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UserLookup {
    data: Option<UserData>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TimelinePage {
    #[serde(default)]
    data: Vec<Post>,
    #[serde(default)]
    meta: Option<PageMeta>,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: ItemId,
    text: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    next_token: Option<String>,
}

/// Failure of a single HTTP exchange, before it is folded into a [`FetchOutcome`].
#[derive(Debug)]
enum RequestFailure {
    RateLimited(Duration),
    Transient(String),
    Fatal(String),
}

// ---------------------------------------------------------------------------
// XApiClient
// ---------------------------------------------------------------------------

/// Content source backed by the X API v2 user timeline endpoint.
pub struct XApiClient {
    client: Client,
    base_url: String,
    page_size: u32,
    max_items: usize,
    default_cooldown: Duration,
    /// Handle (without `@`, lowercased) to numeric user id.
    user_ids: Mutex<HashMap<String, String>>,
}

impl XApiClient {
    /// Build a client using an explicit bearer token.
    pub fn new(config: &SourceConfig, bearer_token: &str) -> Result<Self> {
        Url::parse(&config.base_url).map_err(|e| {
            SundewError::config(format!("invalid source.base_url '{}': {e}", config.base_url))
        })?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {bearer_token}"))
            .map_err(|_| SundewError::Authentication("bearer token is not a valid header".into()))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SundewError::Network(format!("failed to build HTTP client: {e}")))?;

        info!(base_url = %config.base_url, "X API client initialized");

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            max_items: config.max_items,
            default_cooldown: config.rate_limit_cooldown(),
            user_ids: Mutex::new(HashMap::new()),
        })
    }

    /// Build a client reading the bearer token from the configured env var.
    pub fn from_env(config: &SourceConfig) -> Result<Self> {
        let token = std::env::var(&config.bearer_token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                SundewError::Authentication(format!(
                    "X API bearer token not found in {}",
                    config.bearer_token_env
                ))
            })?;
        Self::new(config, &token)
    }

    /// Resolve a handle to its user id, caching the answer.
    async fn user_id(&self, account: &str) -> std::result::Result<String, RequestFailure> {
        let handle = account.trim_start_matches('@').to_ascii_lowercase();
        if let Some(id) = self.user_ids.lock().await.get(&handle) {
            return Ok(id.clone());
        }

        let url = format!("{}/users/by/username/{handle}", self.base_url);
        let lookup: UserLookup = self.get_json(&url, &[]).await?;
        let id = lookup
            .data
            .map(|u| u.id)
            .ok_or_else(|| RequestFailure::Fatal(format!("account {account} not found")))?;

        debug!(account, user_id = %id, "resolved account");
        self.user_ids.lock().await.insert(handle, id.clone());
        Ok(id)
    }

    /// GET `url` and decode the JSON body, classifying every failure.
    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<T, RequestFailure> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let cooldown = cooldown_from_headers(response.headers()).unwrap_or(self.default_cooldown);
            return Err(RequestFailure::RateLimited(cooldown));
        }
        if status.is_server_error() {
            return Err(RequestFailure::Transient(format!("{url}: HTTP {status}")));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RequestFailure::Fatal(format!(
                "{url}: credentials rejected (HTTP {status})"
            )));
        }
        if !status.is_success() {
            return Err(RequestFailure::Fatal(format!("{url}: HTTP {status}")));
        }

        let body = response.text().await.map_err(classify_transport_error)?;
        serde_json::from_str(&body)
            .map_err(|e| RequestFailure::Fatal(format!("{url}: malformed response: {e}")))
    }
}

#[async_trait]
impl ContentSource for XApiClient {
    #[instrument(skip_all, fields(account = %account, cursor = ?cursor.map(ItemId::as_str)))]
    async fn fetch_new(&self, account: &str, cursor: Option<&ItemId>) -> FetchOutcome {
        info!("fetching new posts");

        let user_id = match self.user_id(account).await {
            Ok(id) => id,
            Err(failure) => return fold_failure(failure, Vec::new()),
        };

        let url = format!("{}/users/{user_id}/tweets", self.base_url);
        let mut collected: Vec<Item> = Vec::new();
        let mut pagination_token: Option<String> = None;

        'pages: loop {
            let mut query = vec![
                ("max_results", self.page_size.to_string()),
                ("exclude", "retweets,replies".to_string()),
                ("tweet.fields", "id,text,created_at".to_string()),
            ];
            if let Some(cursor) = cursor {
                query.push(("since_id", cursor.to_string()));
            }
            if let Some(token) = &pagination_token {
                query.push(("pagination_token", token.clone()));
            }

            let page: TimelinePage = match self.get_json(&url, &query).await {
                Ok(page) => page,
                Err(failure) => return fold_failure(failure, finish(collected)),
            };

            for post in page.data {
                if cursor.is_some_and(|c| post.id <= *c) {
                    break 'pages;
                }
                collected.push(Item {
                    id: post.id,
                    created_at: post.created_at,
                    text: post.text,
                });
                if collected.len() >= self.max_items {
                    break 'pages;
                }
            }

            pagination_token = page.meta.and_then(|m| m.next_token);
            if pagination_token.is_none() {
                break;
            }
        }

        let items = finish(collected);
        info!(items = items.len(), "fetch complete");
        FetchOutcome::Fetched(items)
    }
}

/// Order oldest-first and drop duplicate ids that can appear across pages.
fn finish(mut items: Vec<Item>) -> Vec<Item> {
    items.sort_by(|a, b| a.id.cmp(&b.id));
    items.dedup_by(|a, b| a.id == b.id);
    items
}

fn fold_failure(failure: RequestFailure, partial: Vec<Item>) -> FetchOutcome {
    match failure {
        RequestFailure::RateLimited(cooldown) => {
            warn!(
                cooldown_secs = cooldown.as_secs(),
                partial = partial.len(),
                "rate limit exceeded"
            );
            FetchOutcome::RateLimited { partial, cooldown }
        }
        RequestFailure::Transient(reason) => FetchOutcome::Transient(reason),
        RequestFailure::Fatal(reason) => FetchOutcome::Fatal(reason),
    }
}

fn classify_transport_error(e: reqwest::Error) -> RequestFailure {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        RequestFailure::Transient(e.to_string())
    } else {
        RequestFailure::Fatal(e.to_string())
    }
}

/// Seconds until the advertised reset, never less than one second.
fn cooldown_from_headers(headers: &HeaderMap) -> Option<Duration> {
    let reset: i64 = headers
        .get(RATE_LIMIT_RESET_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    let remaining = reset - Utc::now().timestamp();
    Some(Duration::from_secs(remaining.max(1) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> SourceConfig {
        SourceConfig {
            base_url: base_url.to_string(),
            page_size: 5,
            rate_limit_cooldown_secs: 900,
            request_timeout_secs: 5,
            ..SourceConfig::default()
        }
    }

    fn post(id: u64) -> serde_json::Value {
        serde_json::json!({
            "id": id.to_string(),
            "text": format!("post {id}"),
            "created_at": "2024-05-01T10:00:00.000Z",
        })
    }

    async fn mount_user(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/users/by/username/rustlang"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"id": "42", "name": "Rust", "username": "rustlang"}
            })))
            .mount(server)
            .await;
    }

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[tokio::test]
    async fn pages_through_timeline_and_returns_oldest_first() {
        let server = MockServer::start().await;
        mount_user(&server).await;

        Mock::given(path("/users/42/tweets"))
            .and(query_param_is_missing("pagination_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [post(105), post(104)],
                "meta": {"result_count": 2, "next_token": "page2"}
            })))
            .mount(&server)
            .await;
        Mock::given(path("/users/42/tweets"))
            .and(query_param("pagination_token", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [post(103)],
                "meta": {"result_count": 1}
            })))
            .mount(&server)
            .await;

        let client = XApiClient::new(&config(&server.uri()), "token").unwrap();
        match client.fetch_new("@rustlang", None).await {
            FetchOutcome::Fetched(items) => assert_eq!(ids(&items), vec!["103", "104", "105"]),
            other => panic!("expected Fetched, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sends_cursor_and_drops_items_at_or_below_it() {
        let server = MockServer::start().await;
        mount_user(&server).await;

        Mock::given(path("/users/42/tweets"))
            .and(query_param("since_id", "103"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [post(105), post(104), post(103), post(102)],
                "meta": {"result_count": 4}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = XApiClient::new(&config(&server.uri()), "token").unwrap();
        let cursor = ItemId::from(103u64);
        match client.fetch_new("@rustlang", Some(&cursor)).await {
            FetchOutcome::Fetched(items) => assert_eq!(ids(&items), vec!["104", "105"]),
            other => panic!("expected Fetched, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_timeline_is_an_empty_fetch() {
        let server = MockServer::start().await;
        mount_user(&server).await;
        Mock::given(path("/users/42/tweets"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"meta": {"result_count": 0}})),
            )
            .mount(&server)
            .await;

        let client = XApiClient::new(&config(&server.uri()), "token").unwrap();
        assert_eq!(
            client.fetch_new("rustlang", None).await,
            FetchOutcome::Fetched(Vec::new())
        );
    }

    #[tokio::test]
    async fn caches_user_id_lookups() {
        let server = MockServer::start().await;
        Mock::given(path("/users/by/username/rustlang"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"id": "42"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/users/42/tweets"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"meta": {}})),
            )
            .mount(&server)
            .await;

        let client = XApiClient::new(&config(&server.uri()), "token").unwrap();
        client.fetch_new("@rustlang", None).await;
        client.fetch_new("@RustLang", None).await;
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        mount_user(&server).await;
        Mock::given(path("/users/42/tweets"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = XApiClient::new(&config(&server.uri()), "token").unwrap();
        let outcome = client.fetch_new("@rustlang", None).await;
        assert!(matches!(outcome, FetchOutcome::Transient(_)), "{outcome:?}");
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        // Port 1 is reserved and never listening in test environments.
        let client = XApiClient::new(&config("http://127.0.0.1:1"), "token").unwrap();
        let outcome = client.fetch_new("@rustlang", None).await;
        assert!(matches!(outcome, FetchOutcome::Transient(_)), "{outcome:?}");
    }

    #[tokio::test]
    async fn rate_limit_mid_pagination_keeps_partial_results() {
        let server = MockServer::start().await;
        mount_user(&server).await;
        Mock::given(path("/users/42/tweets"))
            .and(query_param_is_missing("pagination_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [post(9), post(8)],
                "meta": {"next_token": "more"}
            })))
            .mount(&server)
            .await;
        Mock::given(path("/users/42/tweets"))
            .and(query_param("pagination_token", "more"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = XApiClient::new(&config(&server.uri()), "token").unwrap();
        match client.fetch_new("@rustlang", None).await {
            FetchOutcome::RateLimited { partial, cooldown } => {
                assert_eq!(ids(&partial), vec!["8", "9"]);
                assert_eq!(cooldown, Duration::from_secs(900));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_credentials_are_fatal() {
        let server = MockServer::start().await;
        Mock::given(path("/users/by/username/rustlang"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = XApiClient::new(&config(&server.uri()), "bad").unwrap();
        match client.fetch_new("@rustlang", None).await {
            FetchOutcome::Fatal(reason) => assert!(reason.contains("credentials rejected")),
            other => panic!("expected Fatal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_account_and_malformed_body_are_fatal() {
        let server = MockServer::start().await;
        Mock::given(path("/users/by/username/ghost"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errors": [{"detail": "Could not find user"}]
            })))
            .mount(&server)
            .await;
        mount_user(&server).await;
        Mock::given(path("/users/42/tweets"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let client = XApiClient::new(&config(&server.uri()), "token").unwrap();
        assert!(matches!(
            client.fetch_new("@ghost", None).await,
            FetchOutcome::Fatal(_)
        ));
        match client.fetch_new("@rustlang", None).await {
            FetchOutcome::Fatal(reason) => assert!(reason.contains("malformed")),
            other => panic!("expected Fatal, got {other:?}"),
        }
    }

    #[test]
    fn cooldown_header_is_clamped_to_one_second() {
        let mut headers = HeaderMap::new();
        headers.insert(RATE_LIMIT_RESET_HEADER, HeaderValue::from_static("0"));
        assert_eq!(cooldown_from_headers(&headers), Some(Duration::from_secs(1)));

        let future = (Utc::now().timestamp() + 120).to_string();
        headers.insert(RATE_LIMIT_RESET_HEADER, HeaderValue::from_str(&future).unwrap());
        let cooldown = cooldown_from_headers(&headers).unwrap();
        assert!(cooldown <= Duration::from_secs(120) && cooldown >= Duration::from_secs(118));
    }
}
