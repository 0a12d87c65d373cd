use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, LINK};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{HTTP_TIMEOUT_SECS, RetryPolicy, RuntimeConfig};

pub const USER_AGENT: &str = concat!("firewatch/", env!("CARGO_PKG_VERSION"));
pub const JSON_ACCEPT: &str = "application/vnd.github+json";
/// Media type that adds `reactions` to issue payloads.
pub const REACTIONS_PREVIEW_ACCEPT: &str = "application/vnd.github.squirrel-girl-preview+json";
pub const PER_PAGE: usize = 100;
const API_VERSION_HEADER: &str = "X-GitHub-Api-Version";
const API_VERSION: &str = "2022-11-28";
const MAX_PAGES: usize = 50;

/// One page of a paginated listing: the raw body and the `rel="next"` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub body: String,
    pub next: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    api_base_url: String,
    token: String,
    retry_policy: RetryPolicy,
}

impl GitHubClient {
    pub fn new(config: &RuntimeConfig) -> Result<Self, GitHubApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(GitHubApiError::BuildClient)?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.clone(),
            token: config.github_token.clone(),
            retry_policy: config.retry_policy,
        })
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base_url, path.trim_start_matches('/'))
    }

    /// Walks a listing from `url` with `query`, following `Link` headers.
    pub fn paginate<T, Parse>(
        &self,
        url: &str,
        query: &[(String, String)],
        accept: &str,
        parse: Parse,
    ) -> Result<Vec<T>, GitHubApiError>
    where
        Parse: FnMut(&str) -> Result<Vec<T>, GitHubApiError>,
    {
        collect_pages(
            |next| match next {
                None => self.get_page(url, query, accept),
                Some(next_url) => self.get_page(next_url, &[], accept),
            },
            parse,
        )
    }

    pub fn get_page(
        &self,
        url: &str,
        query: &[(String, String)],
        accept: &str,
    ) -> Result<Page, GitHubApiError> {
        execute_with_retry(
            self.retry_policy,
            || {
                debug!(url, "github request");
                let response = self
                    .authorized(self.client.get(url).query(query), accept)
                    .send()
                    .map_err(|source| GitHubApiError::Transport { source })?;

                let status_code = response.status().as_u16();
                let next = response
                    .headers()
                    .get(LINK)
                    .and_then(|value| value.to_str().ok())
                    .and_then(next_page_url);
                let body = response
                    .text()
                    .map_err(|source| GitHubApiError::Transport { source })?;

                check_status(status_code, &body)?;
                Ok(Page { body, next })
            },
            std::thread::sleep,
        )
    }

    pub fn get_bytes(&self, url: &str) -> Result<Vec<u8>, GitHubApiError> {
        execute_with_retry(
            self.retry_policy,
            || {
                let response = self
                    .authorized(self.client.get(url), JSON_ACCEPT)
                    .send()
                    .map_err(|source| GitHubApiError::Transport { source })?;

                let status_code = response.status().as_u16();
                if !(200..=299).contains(&status_code) {
                    let body = response.text().unwrap_or_default();
                    return Err(http_error(status_code, &body));
                }

                response
                    .bytes()
                    .map(|bytes| bytes.to_vec())
                    .map_err(|source| GitHubApiError::Transport { source })
            },
            std::thread::sleep,
        )
    }

    fn authorized(&self, request: RequestBuilder, accept: &str) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header(ACCEPT, accept)
            .header(API_VERSION_HEADER, API_VERSION)
    }
}

pub fn collect_pages<T, Fetch, Parse>(
    mut fetch: Fetch,
    mut parse: Parse,
) -> Result<Vec<T>, GitHubApiError>
where
    Fetch: FnMut(Option<&str>) -> Result<Page, GitHubApiError>,
    Parse: FnMut(&str) -> Result<Vec<T>, GitHubApiError>,
{
    let mut items = Vec::new();
    let mut next: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let page = fetch(next.as_deref())?;
        items.extend(parse(&page.body)?);

        match page.next {
            Some(url) => next = Some(url),
            None => return Ok(items),
        }
    }

    Err(GitHubApiError::PageLimit { limit: MAX_PAGES })
}

pub fn execute_with_retry<T, F, S>(
    policy: RetryPolicy,
    mut operation: F,
    mut sleep_fn: S,
) -> Result<T, GitHubApiError>
where
    F: FnMut() -> Result<T, GitHubApiError>,
    S: FnMut(Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) if error.retryable() && attempt < max_attempts => {
                attempt += 1;
                let delay = policy.backoff_for_attempt(attempt);
                warn!(%error, attempt, delay_ms = delay, "retrying github request");
                sleep_fn(Duration::from_millis(delay));
            }
            Err(error) => return Err(error),
        }
    }
}

/// Extracts the `rel="next"` target from a GitHub `Link` header.
pub fn next_page_url(link_header: &str) -> Option<String> {
    link_header.split(',').find_map(|part| {
        let (target, params) = part.trim().split_once(';')?;
        let is_next = params
            .split(';')
            .map(str::trim)
            .any(|param| param == "rel=\"next\"");
        if !is_next {
            return None;
        }

        target
            .trim()
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .map(ToOwned::to_owned)
    })
}

pub fn check_status(status_code: u16, body: &str) -> Result<(), GitHubApiError> {
    if (200..=299).contains(&status_code) {
        return Ok(());
    }

    Err(http_error(status_code, body))
}

fn http_error(status_code: u16, body: &str) -> GitHubApiError {
    let message = extract_error_message(body).unwrap_or_else(|| format!("HTTP {status_code}"));
    GitHubApiError::Http {
        status: status_code,
        message,
    }
}

fn extract_error_message(body: &str) -> Option<String> {
    let payload = serde_json::from_str::<ErrorPayload>(body).ok()?;
    let message = payload.message?.trim().to_string();
    if message.is_empty() {
        None
    } else {
        Some(message)
    }
}

#[derive(Debug, Error)]
pub enum GitHubApiError {
    #[error("failed to build github client")]
    BuildClient(#[source] reqwest::Error),
    #[error("github request failed")]
    Transport {
        #[source]
        source: reqwest::Error,
    },
    #[error("github api error ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("invalid github api response")]
    InvalidResponse(#[source] serde_json::Error),
    #[error("invalid {field} in github api response: {value}")]
    InvalidField { field: &'static str, value: String },
    #[error("github listing exceeded {limit} pages")]
    PageLimit { limit: usize },
}

impl GitHubApiError {
    pub fn retryable(&self) -> bool {
        match self {
            GitHubApiError::Transport { .. } => true,
            GitHubApiError::Http { status, message } => {
                *status == 429
                    || (500..=599).contains(status)
                    || (*status == 403 && message.to_ascii_lowercase().contains("rate limit"))
            }
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    fn http(status: u16, message: &str) -> GitHubApiError {
        GitHubApiError::Http {
            status,
            message: message.to_string(),
        }
    }

    #[test]
    fn github_api_next_page_url_follows_rel_next() {
        let header = concat!(
            "<https://api.github.com/search/issues?q=x&page=1>; rel=\"prev\", ",
            "<https://api.github.com/search/issues?q=x&page=3>; rel=\"next\", ",
            "<https://api.github.com/search/issues?q=x&page=10>; rel=\"last\""
        );

        assert_eq!(
            next_page_url(header),
            Some("https://api.github.com/search/issues?q=x&page=3".to_string())
        );
        assert_eq!(
            next_page_url("<https://api.github.com/x?page=1>; rel=\"first\""),
            None
        );
        assert_eq!(next_page_url(""), None);
    }

    #[test]
    fn github_api_check_status_surfaces_api_error_message() {
        let err = check_status(401, r#"{"message":"Bad credentials"}"#)
            .expect_err("non-2xx should fail");

        match err {
            GitHubApiError::Http { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Bad credentials");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = check_status(502, "<html>bad gateway</html>").expect_err("502 should fail");
        assert!(
            matches!(err, GitHubApiError::Http { status: 502, ref message } if message == "HTTP 502")
        );
        assert!(check_status(204, "").is_ok());
    }

    #[test]
    fn github_api_retryable_covers_rate_limits_and_server_errors() {
        assert!(http(429, "slow down").retryable());
        assert!(http(503, "unavailable").retryable());
        assert!(http(403, "You have exceeded a secondary rate limit").retryable());
        assert!(!http(403, "Resource not accessible by integration").retryable());
        assert!(!http(422, "Validation Failed").retryable());
        assert!(!GitHubApiError::PageLimit { limit: 1 }.retryable());
    }

    #[test]
    fn github_api_retries_transient_failures_with_backoff() {
        let attempts = RefCell::new(0usize);
        let sleeps = RefCell::new(Vec::<u64>::new());

        let result = execute_with_retry(
            RetryPolicy {
                max_attempts: 3,
                base_backoff_ms: 5,
            },
            || {
                *attempts.borrow_mut() += 1;
                if *attempts.borrow() < 3 {
                    return Err(http(503, "unavailable"));
                }
                Ok("ok")
            },
            |delay| sleeps.borrow_mut().push(delay.as_millis() as u64),
        )
        .expect("should succeed on third attempt");

        assert_eq!(result, "ok");
        assert_eq!(*attempts.borrow(), 3);
        assert_eq!(*sleeps.borrow(), vec![5, 10]);
    }

    #[test]
    fn github_api_does_not_retry_client_errors() {
        let attempts = RefCell::new(0usize);

        let err = execute_with_retry(
            RetryPolicy::default(),
            || {
                *attempts.borrow_mut() += 1;
                Result::<(), _>::Err(http(404, "Not Found"))
            },
            |_| {},
        )
        .expect_err("must fail");

        assert!(matches!(err, GitHubApiError::Http { status: 404, .. }));
        assert_eq!(*attempts.borrow(), 1);
    }

    #[test]
    fn github_api_collect_pages_follows_next_links_in_order() {
        let requested = RefCell::new(Vec::<Option<String>>::new());

        let items = collect_pages(
            |next| {
                requested.borrow_mut().push(next.map(ToOwned::to_owned));
                Ok(match next {
                    None => Page {
                        body: "1,2".to_string(),
                        next: Some("page-2".to_string()),
                    },
                    Some(_) => Page {
                        body: "3".to_string(),
                        next: None,
                    },
                })
            },
            |body| {
                Ok(body
                    .split(',')
                    .filter_map(|value| value.parse::<u64>().ok())
                    .collect())
            },
        )
        .expect("pages should collect");

        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(
            *requested.borrow(),
            vec![None, Some("page-2".to_string())]
        );
    }

    #[test]
    fn github_api_collect_pages_stops_runaway_pagination() {
        let err = collect_pages(
            |_| {
                Ok(Page {
                    body: String::new(),
                    next: Some("again".to_string()),
                })
            },
            |_| Ok(Vec::<u64>::new()),
        )
        .expect_err("endless next links should fail");

        assert!(matches!(err, GitHubApiError::PageLimit { limit: MAX_PAGES }));
    }
}
