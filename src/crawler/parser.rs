//! GraphQL search response decoding
//!
//! Turns the body of a repository search response into a `Page`. Nodes that
//! are not repositories (the search connection can surface other types as
//! empty objects) are skipped.

use crate::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Repository search document sent with every page request
///
/// Variables: `$query` (partition predicate), `$cursor` (continuation, null
/// for the first page), `$first` (page size).
pub const SEARCH_QUERY: &str = r#"query($query: String!, $cursor: String, $first: Int!) {
  search(query: $query, type: REPOSITORY, first: $first, after: $cursor) {
    repositoryCount
    pageInfo { hasNextPage endCursor }
    edges {
      node {
        ... on Repository {
          id
          name
          owner { login }
          nameWithOwner
          description
          stargazerCount
          forkCount
          issues(states: OPEN) { totalCount }
          primaryLanguage { name }
          createdAt
          updatedAt
          pushedAt
          diskUsage
          isArchived
          isDisabled
          licenseInfo { key }
        }
      }
    }
  }
  rateLimit { cost remaining resetAt }
}"#;

/// One repository as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    /// Stable node id; the natural key
    pub github_id: String,
    pub name: String,
    pub owner_login: String,
    pub full_name: String,
    pub description: Option<String>,
    pub stargazers_count: i64,
    pub forks_count: i64,
    pub open_issues_count: i64,
    pub language: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub pushed_at: Option<String>,
    pub disk_usage_kb: Option<i64>,
    pub archived: bool,
    pub disabled: bool,
    pub license_key: Option<String>,
}

/// One decoded page of search results
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<RepositoryRecord>,

    /// Continuation cursor for the next page
    pub end_cursor: Option<String>,

    pub has_next_page: bool,

    /// Matches the API reports for the whole predicate
    pub total_count: Option<u64>,

    /// Budget reported in the body: `(remaining, resets_at)`
    pub rate: Option<(Option<u32>, Option<DateTime<Utc>>)>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Option<Data>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Data {
    search: Option<Search>,
    rate_limit: Option<RateLimit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Search {
    repository_count: Option<u64>,
    page_info: PageInfo,
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Edge {
    node: Option<Node>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Node {
    id: Option<String>,
    name: Option<String>,
    owner: Option<Owner>,
    name_with_owner: Option<String>,
    description: Option<String>,
    stargazer_count: i64,
    fork_count: i64,
    issues: Option<Count>,
    primary_language: Option<Named>,
    created_at: Option<String>,
    updated_at: Option<String>,
    pushed_at: Option<String>,
    disk_usage: Option<i64>,
    is_archived: bool,
    is_disabled: bool,
    license_info: Option<License>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    login: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Count {
    total_count: i64,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct License {
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimit {
    remaining: Option<u32>,
    reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    message: String,
}

impl Node {
    fn into_record(self) -> Option<RepositoryRecord> {
        let github_id = self.id?;
        let name = self.name.unwrap_or_default();
        let owner_login = self.owner.map(|o| o.login).unwrap_or_default();
        let full_name = self
            .name_with_owner
            .unwrap_or_else(|| format!("{}/{}", owner_login, name));

        Some(RepositoryRecord {
            github_id,
            name,
            owner_login,
            full_name,
            description: self.description,
            stargazers_count: self.stargazer_count,
            forks_count: self.fork_count,
            open_issues_count: self.issues.map_or(0, |i| i.total_count),
            language: self.primary_language.map(|l| l.name),
            created_at: self.created_at,
            updated_at: self.updated_at,
            pushed_at: self.pushed_at,
            disk_usage_kb: self.disk_usage,
            archived: self.is_archived,
            disabled: self.is_disabled,
            license_key: self.license_info.and_then(|l| l.key),
        })
    }
}

/// Decodes a search response body
///
/// # Returns
///
/// * `Ok(Page)` - The body carried a usable `data.search`
/// * `Err(ApiError::RateLimited)` - A GraphQL error of type `RATE_LIMITED`
/// * `Err(ApiError::Transient)` - The body was not valid JSON of the expected shape
/// * `Err(ApiError::Query)` - GraphQL errors and no search data
pub fn decode_search(body: &str) -> ApiResult<Page> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| ApiError::Transient(format!("undecodable response body: {}", e)))?;

    let rate = envelope
        .data
        .as_ref()
        .and_then(|d| d.rate_limit.as_ref())
        .map(|r| (r.remaining, r.reset_at));

    if envelope
        .errors
        .iter()
        .any(|e| e.kind.as_deref() == Some("RATE_LIMITED"))
    {
        return Err(ApiError::RateLimited {
            resets_at: rate.and_then(|(_, reset)| reset),
            retry_after: None,
        });
    }

    let search = match envelope.data.and_then(|d| d.search) {
        Some(search) => search,
        None if !envelope.errors.is_empty() => {
            let messages: Vec<&str> = envelope.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(ApiError::Query(messages.join("; ")));
        }
        None => {
            return Err(ApiError::Transient(
                "response carried no search data".to_string(),
            ))
        }
    };

    if !envelope.errors.is_empty() {
        tracing::warn!(
            "Search returned data with {} partial errors",
            envelope.errors.len()
        );
    }

    let records = search
        .edges
        .into_iter()
        .filter_map(|edge| edge.node.and_then(Node::into_record))
        .collect();

    Ok(Page {
        records,
        end_cursor: search.page_info.end_cursor,
        has_next_page: search.page_info.has_next_page,
        total_count: search.repository_count,
        rate,
    })
}
