use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

const GITHUB_TOKEN_ENV: &str = "INPUT_GITHUB_TOKEN";
const GITHUB_TOKEN_FALLBACK_ENV: &str = "GITHUB_TOKEN";
const ORG_ENV: &str = "INPUT_ORG";
const REPO_ENV: &str = "INPUT_REPO";
const GITHUB_REPOSITORY_ENV: &str = "GITHUB_REPOSITORY";
const ALERT_THRESHOLD_ENV: &str = "INPUT_ALERT_THRESHOLD";
const ALERT_THRESHOLD_FALLBACK_ENV: &str = "FIREWATCH_ALERT_THRESHOLD";
const ISSUE_AGE_MONTHS_ENV: &str = "INPUT_ISSUE_AGE_MONTHS";
const ISSUE_AGE_MONTHS_FALLBACK_ENV: &str = "FIREWATCH_ISSUE_AGE_MONTHS";
const SLACK_TOKEN_ENV: &str = "INPUT_SLACK_TOKEN";
const SLACK_TOKEN_FALLBACK_ENV: &str = "SLACK_TOKEN";
const SLACK_CHANNEL_ENV: &str = "INPUT_SLACK_CHANNEL";
const SLACK_CHANNEL_FALLBACK_ENV: &str = "SLACK_CHANNEL";
const DATA_FILE_ENV: &str = "INPUT_FIREWATCH_DATA";
const DATA_FILE_FALLBACK_ENV: &str = "FIREWATCH_DATA_FILE";
const ARTIFACT_NAME_ENV: &str = "INPUT_ARTIFACT_NAME";
const ARTIFACT_NAME_FALLBACK_ENV: &str = "FIREWATCH_ARTIFACT_NAME";
const GITHUB_API_URL_ENV: &str = "GITHUB_API_URL";
const GITHUB_SERVER_URL_ENV: &str = "GITHUB_SERVER_URL";

pub const DEFAULT_DATA_FILE: &str = "firewatch.data";
pub const DEFAULT_ARTIFACT_NAME: &str = "firewatch";
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";
pub const DEFAULT_SERVER_URL: &str = "https://github.com";

pub const HTTP_TIMEOUT_SECS: u64 = 30;
pub const RETRY_MAX_ATTEMPTS: usize = 3;
pub const RETRY_BASE_BACKOFF_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub github_token: String,
    pub owner: String,
    pub repo: String,
    pub alert_threshold: u64,
    pub issue_age_months: u32,
    pub slack: Option<SlackConfig>,
    pub data_file: PathBuf,
    pub artifact_name: String,
    pub api_base_url: String,
    pub server_url: String,
    pub retry_policy: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackConfig {
    pub token: String,
    pub channel: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_backoff_ms: RETRY_BASE_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for_attempt(self, attempt: usize) -> u64 {
        if attempt <= 1 {
            return 0;
        }

        let shift = (attempt - 2).min(8);
        self.base_backoff_ms.saturating_mul(1_u64 << shift)
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_pairs(std::env::vars())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env_map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();

        let github_token = lookup(&env_map, GITHUB_TOKEN_ENV, GITHUB_TOKEN_FALLBACK_ENV)
            .ok_or(ConfigError::Missing(GITHUB_TOKEN_ENV))?
            .to_string();
        let (owner, repo) = parse_repository(&env_map)?;

        let slack = match (
            lookup(&env_map, SLACK_TOKEN_ENV, SLACK_TOKEN_FALLBACK_ENV),
            lookup(&env_map, SLACK_CHANNEL_ENV, SLACK_CHANNEL_FALLBACK_ENV),
        ) {
            (Some(token), Some(channel)) => Some(SlackConfig {
                token: token.to_string(),
                channel: channel.to_string(),
            }),
            _ => None,
        };

        Ok(Self {
            github_token,
            owner,
            repo,
            alert_threshold: parse_required_count(
                &env_map,
                ALERT_THRESHOLD_ENV,
                ALERT_THRESHOLD_FALLBACK_ENV,
            )?,
            issue_age_months: parse_required_count(
                &env_map,
                ISSUE_AGE_MONTHS_ENV,
                ISSUE_AGE_MONTHS_FALLBACK_ENV,
            )?,
            slack,
            data_file: lookup(&env_map, DATA_FILE_ENV, DATA_FILE_FALLBACK_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_FILE)),
            artifact_name: lookup(&env_map, ARTIFACT_NAME_ENV, ARTIFACT_NAME_FALLBACK_ENV)
                .unwrap_or(DEFAULT_ARTIFACT_NAME)
                .to_string(),
            api_base_url: trimmed_url(
                lookup_one(&env_map, GITHUB_API_URL_ENV),
                DEFAULT_API_BASE_URL,
            ),
            server_url: trimmed_url(
                lookup_one(&env_map, GITHUB_SERVER_URL_ENV),
                DEFAULT_SERVER_URL,
            ),
            retry_policy: RetryPolicy::default(),
        })
    }

    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// File name the snapshot is stored under inside the artifact archive.
    pub fn data_file_name(&self) -> String {
        self.data_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_DATA_FILE.to_string())
    }

    pub fn issue_url(&self, id: u64) -> String {
        format!("{}/{}/{}/issues/{id}", self.server_url, self.owner, self.repo)
    }
}

fn lookup_one<'a>(env_map: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    env_map
        .get(key)
        .map(String::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn lookup<'a>(
    env_map: &'a HashMap<String, String>,
    primary: &str,
    fallback: &str,
) -> Option<&'a str> {
    lookup_one(env_map, primary).or_else(|| lookup_one(env_map, fallback))
}

fn trimmed_url(raw: Option<&str>, default: &str) -> String {
    raw.unwrap_or(default).trim_end_matches('/').to_string()
}

fn parse_repository(env_map: &HashMap<String, String>) -> Result<(String, String), ConfigError> {
    match (lookup_one(env_map, ORG_ENV), lookup_one(env_map, REPO_ENV)) {
        (Some(owner), Some(repo)) => return Ok((owner.to_string(), repo.to_string())),
        (Some(_), None) => return Err(ConfigError::Missing(REPO_ENV)),
        (None, Some(_)) => return Err(ConfigError::Missing(ORG_ENV)),
        (None, None) => {}
    }

    let raw = lookup_one(env_map, GITHUB_REPOSITORY_ENV)
        .ok_or(ConfigError::Missing(GITHUB_REPOSITORY_ENV))?;
    match raw.split_once('/') {
        Some((owner, repo))
            if !owner.trim().is_empty() && !repo.trim().is_empty() && !repo.contains('/') =>
        {
            Ok((owner.trim().to_string(), repo.trim().to_string()))
        }
        _ => Err(ConfigError::InvalidRepository(raw.to_string())),
    }
}

fn parse_required_count<T>(
    env_map: &HashMap<String, String>,
    primary: &'static str,
    fallback: &'static str,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    let value = lookup(env_map, primary, fallback).ok_or(ConfigError::Missing(primary))?;

    value.parse::<T>().map_err(|_| ConfigError::InvalidCount {
        field: primary,
        value: value.to_string(),
    })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid {field}: {value} (expected a non-negative integer)")]
    InvalidCount { field: &'static str, value: String },
    #[error("invalid {GITHUB_REPOSITORY_ENV}: {0} (expected <owner>/<repo>)")]
    InvalidRepository(String),
}
