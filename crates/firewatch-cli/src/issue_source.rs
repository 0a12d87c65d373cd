use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use firewatch_core::IssueRecord;

use crate::config::RuntimeConfig;
use crate::github_api::{
    GitHubApiError, GitHubClient, PER_PAGE, Page, REACTIONS_PREVIEW_ACCEPT, collect_pages,
};

pub trait IssueSource {
    /// Every open issue created on or after `cutoff`, across all pages.
    fn search(&self, cutoff: NaiveDate) -> Result<Vec<IssueRecord>, SourceError>;
}

#[derive(Debug, Clone)]
pub struct GitHubIssueSource {
    client: GitHubClient,
    owner: String,
    repo: String,
}

impl GitHubIssueSource {
    pub fn new(client: GitHubClient, config: &RuntimeConfig) -> Self {
        Self {
            client,
            owner: config.owner.clone(),
            repo: config.repo.clone(),
        }
    }
}

impl IssueSource for GitHubIssueSource {
    fn search(&self, cutoff: NaiveDate) -> Result<Vec<IssueRecord>, SourceError> {
        let query = build_search_query(&self.owner, &self.repo, cutoff);
        info!(%query, "searching open issues");

        let url = self.client.api_url("search/issues");
        let params = build_search_params(&query);
        let records = collect_search(|next| match next {
            None => self
                .client
                .get_page(&url, &params, REACTIONS_PREVIEW_ACCEPT),
            Some(next_url) => self
                .client
                .get_page(next_url, &[], REACTIONS_PREVIEW_ACCEPT),
        })?;

        info!(records = records.len(), "issue search complete");
        Ok(records)
    }
}

/// Drains every search page. Fails when GitHub timed out on any page or
/// stopped paging before `total_count` issues were returned.
pub fn collect_search<Fetch>(fetch: Fetch) -> Result<Vec<IssueRecord>, SourceError>
where
    Fetch: FnMut(Option<&str>) -> Result<Page, GitHubApiError>,
{
    let mut incomplete = false;
    let mut total_count = 0;
    let records = collect_pages(fetch, |body| {
        let page = parse_search_page(body)?;
        incomplete |= page.incomplete_results;
        total_count = page.total_count;
        Ok(page.records)
    })?;

    if incomplete {
        return Err(SourceError::IncompleteResults);
    }

    let collected = records.len() as u64;
    if collected < total_count {
        return Err(SourceError::Truncated {
            collected,
            total: total_count,
        });
    }

    Ok(records)
}

/// Subtracts whole calendar months from `now`'s date, clamping to month end.
pub fn cutoff_date(now: DateTime<Utc>, months: u32) -> NaiveDate {
    let today = now.date_naive();
    today
        .checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}

pub fn build_search_query(owner: &str, repo: &str, cutoff: NaiveDate) -> String {
    format!(
        "is:issue is:open repo:{owner}/{repo} created:>={}",
        cutoff.format("%Y-%m-%d")
    )
}

pub fn build_search_params(query: &str) -> Vec<(String, String)> {
    vec![
        ("q".to_string(), query.to_string()),
        ("per_page".to_string(), PER_PAGE.to_string()),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    pub records: Vec<IssueRecord>,
    pub total_count: u64,
    pub incomplete_results: bool,
}

pub fn parse_search_page(body: &str) -> Result<SearchPage, GitHubApiError> {
    let payload: SearchResponse =
        serde_json::from_str(body).map_err(GitHubApiError::InvalidResponse)?;

    let records = payload
        .items
        .into_iter()
        .map(|item| {
            let created_at = DateTime::parse_from_rfc3339(&item.created_at)
                .map(|value| value.with_timezone(&Utc))
                .map_err(|_| GitHubApiError::InvalidField {
                    field: "created_at",
                    value: item.created_at.clone(),
                })?;

            Ok(IssueRecord {
                id: item.number,
                title: item.title.trim().to_string(),
                reaction_count: item.reactions.total_count,
                created_at,
            })
        })
        .collect::<Result<Vec<_>, GitHubApiError>>()?;

    Ok(SearchPage {
        records,
        total_count: payload.total_count,
        incomplete_results: payload.incomplete_results,
    })
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("github search request failed")]
    Api(#[from] GitHubApiError),
    #[error("issue search timed out and returned incomplete results")]
    IncompleteResults,
    #[error(
        "issue search returned {collected} of {total} matching issues; shorten the issue age window"
    )]
    Truncated { collected: u64, total: u64 },
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    incomplete_results: bool,
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    reactions: Reactions,
    created_at: String,
}

#[derive(Debug, Default, Deserialize)]
struct Reactions {
    #[serde(default)]
    total_count: u64,
}
