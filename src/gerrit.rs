use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::{
    StatusCode,
    blocking::{Client, RequestBuilder},
    header::ACCEPT,
};
use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use thiserror::Error;
use tracing::debug;

use crate::domain::{Category, Changelist, Host, Identity, Reviewer};

const USER_AGENT_HEADER: &str = "cl-monitor/0.1";
// Gerrit prefixes every JSON body to defeat cross-site script inclusion.
const XSSI_PREFIX: &str = ")]}'";
pub const LOGIN_PROMPT: &str = " Try logging in.";
const CODE_REVIEW_LABEL: &str = "Code-Review";
const DEFAULT_STALE_DAYS: i64 = 7;

/// Retrieves review data for a single host. The orchestrator only talks to
/// hosts through this seam.
pub trait HostClient: Sync {
    fn resolve_identity(&self, host: &Host) -> Result<Identity, FetchError>;

    fn fetch_changes(
        &self,
        host: &Host,
        identity: &Identity,
        detailed: bool,
    ) -> Result<Vec<Changelist>, FetchError>;
}

#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

pub struct GerritClient {
    client: Client,
    credentials: HashMap<String, Credentials>,
    only_attention_set: bool,
    stale_after: Duration,
}

impl GerritClient {
    pub fn new(
        credentials: HashMap<String, Credentials>,
        only_attention_set: bool,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT_HEADER)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            credentials,
            only_attention_set,
            stale_after: Duration::days(DEFAULT_STALE_DAYS),
        })
    }

    fn authorized(&self, host: &Host, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(ACCEPT, "application/json");
        match self.credentials.get(&host.url) {
            Some(creds) => request.basic_auth(&creds.username, Some(&creds.password)),
            None => request,
        }
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        host: &Host,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{path}", host.url);
        let response = self
            .authorized(host, self.client.get(url).query(query))
            .send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(FetchError::from_status(status, &body));
        }
        parse_gerrit_json(&body)
    }

    fn search_query(&self) -> &'static str {
        if self.only_attention_set {
            "status:open -is:ignored (attention:self OR owner:self)"
        } else {
            "status:open -is:ignored (owner:self OR reviewer:self OR attention:self)"
        }
    }
}

impl HostClient for GerritClient {
    fn resolve_identity(&self, host: &Host) -> Result<Identity, FetchError> {
        let account: AccountInfo = self.get_json(host, "/a/accounts/self", &[])?;
        Ok(Identity {
            account_id: account.account_id,
            name: account.display_name(),
        })
    }

    fn fetch_changes(
        &self,
        host: &Host,
        identity: &Identity,
        detailed: bool,
    ) -> Result<Vec<Changelist>, FetchError> {
        let mut query = vec![
            ("q", self.search_query()),
            ("o", "DETAILED_LABELS"),
            ("o", "SUBMITTABLE"),
        ];
        if detailed {
            query.push(("o", "DETAILED_ACCOUNTS"));
        }
        let changes: Vec<ChangeInfo> = self.get_json(host, "/a/changes/", &query)?;
        debug!(host = %host, user = %identity.name, count = changes.len(), "fetched changes");

        let now = Utc::now();
        let classifier = Classifier {
            user: identity.account_id,
            only_attention_set: self.only_attention_set,
            stale_after: self.stale_after,
            now,
        };
        Ok(changes
            .into_iter()
            .filter_map(|change| {
                let category = classifier.classify(&change)?;
                Some(change.into_changelist(host, category))
            })
            .collect())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Network(String),
    #[error("Background worker disconnected before returning a result")]
    BackgroundWorkerGone,
}

impl FetchError {
    fn from_status(status: StatusCode, body: &str) -> Self {
        if (400..=403).contains(&status.as_u16()) {
            FetchError::Auth(format!("HTTP {}{LOGIN_PROMPT}", status.as_u16()))
        } else {
            let detail = body.trim();
            if detail.is_empty() {
                FetchError::Network(status.to_string())
            } else {
                FetchError::Network(format!("{status}: {detail}"))
            }
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::from_status(status, ""),
            None => FetchError::Network(err.to_string()),
        }
    }
}

fn parse_gerrit_json<T: DeserializeOwned>(body: &str) -> Result<T, FetchError> {
    let payload = body.strip_prefix(XSSI_PREFIX).unwrap_or(body);
    serde_json::from_str(payload)
        .map_err(|err| FetchError::Network(format!("Malformed response from Gerrit: {err}")))
}

/// Assigns a changelist to the category that explains why it needs attention.
struct Classifier {
    user: u64,
    only_attention_set: bool,
    stale_after: Duration,
    now: DateTime<Utc>,
}

impl Classifier {
    fn classify(&self, change: &ChangeInfo) -> Option<Category> {
        let in_attention_set = change.attention_set.contains_key(&self.user.to_string());

        if change.owner.account_id != self.user {
            if in_attention_set {
                return Some(Category::IncomingNeedsAttention);
            }
            if !self.only_attention_set && self.awaits_my_vote(change) {
                return Some(Category::IncomingNeedsAttention);
            }
            return None;
        }

        if change.work_in_progress {
            return Some(Category::WorkInProgress);
        }
        if change.reviewer_accounts().all(|id| id == self.user) {
            return Some(Category::NoReviewers);
        }
        if change.submittable {
            return Some(Category::ReadyToSubmit);
        }
        if in_attention_set || change.unresolved_comment_count > 0 {
            return Some(Category::OutgoingNeedsAttention);
        }
        if self.now - change.updated >= self.stale_after {
            return Some(Category::Stale);
        }
        None
    }

    fn awaits_my_vote(&self, change: &ChangeInfo) -> bool {
        let is_reviewer = change.reviewer_accounts().any(|id| id == self.user);
        let voted = change
            .code_review_votes()
            .any(|vote| vote.account_id == self.user && vote.value.unwrap_or(0) != 0);
        is_reviewer && !voted
    }
}

// Response payloads ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AccountInfo {
    #[serde(rename = "_account_id")]
    account_id: u64,
    name: Option<String>,
    email: Option<String>,
    username: Option<String>,
}

impl AccountInfo {
    fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.username.clone())
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| format!("account {}", self.account_id))
    }
}

#[derive(Debug, Deserialize)]
struct ChangeInfo {
    project: String,
    change_id: String,
    subject: String,
    #[serde(rename = "_number")]
    number: u64,
    #[serde(deserialize_with = "gerrit_timestamp")]
    updated: DateTime<Utc>,
    owner: AccountInfo,
    #[serde(default)]
    submittable: bool,
    #[serde(default)]
    work_in_progress: bool,
    #[serde(default)]
    unresolved_comment_count: u32,
    #[serde(default)]
    attention_set: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    reviewers: BTreeMap<String, Vec<AccountInfo>>,
    #[serde(default)]
    labels: BTreeMap<String, LabelInfo>,
}

#[derive(Debug, Deserialize)]
struct LabelInfo {
    #[serde(default)]
    all: Vec<ApprovalInfo>,
}

#[derive(Debug, Deserialize)]
struct ApprovalInfo {
    #[serde(rename = "_account_id")]
    account_id: u64,
    name: Option<String>,
    email: Option<String>,
    value: Option<i32>,
}

impl ChangeInfo {
    fn reviewer_accounts(&self) -> impl Iterator<Item = u64> + '_ {
        self.reviewers
            .get("REVIEWER")
            .into_iter()
            .flatten()
            .map(|account| account.account_id)
    }

    fn code_review_votes(&self) -> impl Iterator<Item = &ApprovalInfo> {
        self.labels
            .get(CODE_REVIEW_LABEL)
            .into_iter()
            .flat_map(|label| label.all.iter())
    }

    fn reviewers(&self) -> Vec<Reviewer> {
        let owner = self.owner.account_id;
        let votes: Vec<Reviewer> = self
            .code_review_votes()
            .filter(|vote| vote.account_id != owner)
            .map(|vote| Reviewer {
                name: vote
                    .name
                    .clone()
                    .or_else(|| vote.email.clone())
                    .unwrap_or_else(|| format!("account {}", vote.account_id)),
                approval: vote.value.unwrap_or(0),
            })
            .collect();
        if !votes.is_empty() {
            return votes;
        }
        self.reviewers
            .get("REVIEWER")
            .into_iter()
            .flatten()
            .filter(|account| account.account_id != owner)
            .map(|account| Reviewer {
                name: account.display_name(),
                approval: 0,
            })
            .collect()
    }

    fn into_changelist(self, host: &Host, category: Category) -> Changelist {
        Changelist {
            url: format!("{}/c/{}/+/{}", host.url, self.project, self.number),
            reviewers: self.reviewers(),
            author: self.owner.display_name(),
            change_id: self.change_id,
            number: self.number,
            subject: self.subject,
            host: host.url.clone(),
            updated_at: self.updated,
            category,
        }
    }
}

fn gerrit_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------
