//! GitLab platform service implementation

use crate::error::{Error, Result};
use crate::platform::PlatformService;
use crate::types::{
    Award, BranchInfo, CommitReview, Discussion, Job, MergeParams, MergeResult, ReviewState,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// GitLab service using reqwest
pub struct GitLabService {
    client: Client,
    token: String,
    api_url: String,
    project: String,
}

/// Merge response
#[derive(Deserialize)]
struct MergeResponse {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    merge_commit_sha: Option<String>,
    #[serde(default)]
    squash_commit_sha: Option<String>,
    #[serde(default)]
    message: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct MergePayload<'a> {
    squash: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    squash_commit_message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    merge_commit_message: Option<&'a str>,
    sha: &'a str,
    should_remove_source_branch: bool,
}

#[derive(Serialize)]
struct CreateMrPayload<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    title: &'a str,
    remove_source_branch: bool,
    squash: bool,
}

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Page size for list endpoints
const PAGE_SIZE: usize = 100;

impl GitLabService {
    /// Create a new GitLab service
    ///
    /// `api_url` is the v4 API root (`https://gitlab.example.com/api/v4`),
    /// `project` a numeric id or a `group/name` path.
    pub fn new(token: String, api_url: &str, project: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::GitLabApi(format!("failed to create HTTP client: {e}")))?;

        let api_url = url::Url::parse(api_url)
            .map_err(|e| Error::Config(format!("invalid GitLab API url {api_url}: {e}")))?;

        Ok(Self {
            client,
            token,
            api_url: api_url.as_str().trim_end_matches('/').to_string(),
            project: project.to_string(),
        })
    }

    fn project_url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}{}",
            self.api_url,
            urlencoding::encode(&self.project),
            path
        )
    }

    fn review_url(&self, iid: u64, path: &str) -> String {
        self.project_url(&format!("/merge_requests/{iid}{path}"))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("PRIVATE-TOKEN", &self.token)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        Ok(self
            .authorized(self.client.get(url))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::GitLabApi(e.to_string()))?
            .json()
            .await?)
    }

    /// Collect every page of a list endpoint
    async fn get_paged<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let mut result = Vec::new();
        let per_page = PAGE_SIZE.to_string();
        for page in 1.. {
            let items: Vec<T> = self
                .authorized(self.client.get(url))
                .query(&[("page", page.to_string()), ("per_page", per_page.clone())])
                .send()
                .await?
                .error_for_status()
                .map_err(|e| Error::GitLabApi(e.to_string()))?
                .json()
                .await?;
            let full = items.len() == PAGE_SIZE;
            result.extend(items);
            if !full {
                break;
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl PlatformService for GitLabService {
    async fn get_review(&self, iid: u64) -> Result<ReviewState> {
        debug!(mr_iid = iid, "getting MR");
        let review: ReviewState = self.get_json(&self.review_url(iid, "")).await?;
        debug!(mr_iid = iid, state = %review.state, "got MR");
        Ok(review)
    }

    async fn list_awards(&self, iid: u64) -> Result<Vec<Award>> {
        debug!(mr_iid = iid, "listing MR awards");
        let awards: Vec<Award> = self.get_paged(&self.review_url(iid, "/award_emoji")).await?;
        debug!(mr_iid = iid, count = awards.len(), "listed MR awards");
        Ok(awards)
    }

    async fn list_discussions(&self, iid: u64) -> Result<Vec<Discussion>> {
        debug!(mr_iid = iid, "listing MR discussions");
        let discussions: Vec<Discussion> =
            self.get_paged(&self.review_url(iid, "/discussions")).await?;
        debug!(mr_iid = iid, count = discussions.len(), "listed MR discussions");
        Ok(discussions)
    }

    async fn list_branches(&self) -> Result<Vec<BranchInfo>> {
        debug!("listing branches");
        let branches: Vec<BranchInfo> = self
            .get_paged(&self.project_url("/repository/branches"))
            .await?;
        debug!(count = branches.len(), "listed branches");
        Ok(branches)
    }

    async fn get_branch(&self, name: &str) -> Result<Option<BranchInfo>> {
        debug!(branch = name, "getting branch");
        let url = self.project_url(&format!(
            "/repository/branches/{}",
            urlencoding::encode(name)
        ));
        let response = self.authorized(self.client.get(&url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(branch = name, "branch not found");
            return Ok(None);
        }
        let branch: BranchInfo = response
            .error_for_status()
            .map_err(|e| Error::GitLabApi(e.to_string()))?
            .json()
            .await?;
        Ok(Some(branch))
    }

    async fn get_job(&self, id: u64) -> Result<Job> {
        debug!(job_id = id, "getting job");
        self.get_json(&self.project_url(&format!("/jobs/{id}"))).await
    }

    async fn list_commit_reviews(&self, sha: &str) -> Result<Vec<CommitReview>> {
        debug!(sha, "listing commit MRs");
        let url = self.project_url(&format!("/repository/commits/{sha}/merge_requests"));
        self.get_paged(&url).await
    }

    async fn update_labels(
        &self,
        iid: u64,
        add: &BTreeSet<String>,
        remove: &BTreeSet<String>,
    ) -> Result<()> {
        if add.is_empty() && remove.is_empty() {
            return Ok(());
        }
        debug!(mr_iid = iid, ?add, ?remove, "updating MR labels");
        let join = |labels: &BTreeSet<String>| labels.iter().cloned().collect::<Vec<_>>().join(",");
        self.authorized(self.client.put(self.review_url(iid, "")))
            .json(&serde_json::json!({
                "add_labels": join(add),
                "remove_labels": join(remove),
            }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::GitLabApi(e.to_string()))?;
        debug!(mr_iid = iid, "updated MR labels");
        Ok(())
    }

    async fn post_award(&self, iid: u64, name: &str) -> Result<()> {
        debug!(mr_iid = iid, award = name, "posting MR award");
        self.authorized(self.client.post(self.review_url(iid, "/award_emoji")))
            .query(&[("name", name)])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::GitLabApi(e.to_string()))?;
        Ok(())
    }

    async fn trigger_pipeline(&self, iid: u64) -> Result<()> {
        debug!(mr_iid = iid, "triggering MR pipeline");
        self.authorized(self.client.post(self.review_url(iid, "/pipelines")))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::GitLabApi(e.to_string()))?;
        Ok(())
    }

    async fn merge_review(&self, iid: u64, params: &MergeParams) -> Result<MergeResult> {
        debug!(mr_iid = iid, squash = params.squash, sha = %params.sha, "merging MR");
        let message = params.commit_message.as_str();
        let payload = MergePayload {
            squash: params.squash,
            squash_commit_message: params.squash.then_some(message),
            merge_commit_message: (!params.squash).then_some(message),
            sha: params.sha.as_str(),
            should_remove_source_branch: params.should_remove_source_branch,
        };
        let response = self
            .authorized(self.client.put(self.review_url(iid, "/merge")))
            .json(&payload)
            .send()
            .await?;
        let refused = matches!(
            response.status(),
            StatusCode::METHOD_NOT_ALLOWED
                | StatusCode::NOT_ACCEPTABLE
                | StatusCode::CONFLICT
                | StatusCode::UNPROCESSABLE_ENTITY
        );
        let response: MergeResponse = if refused {
            response.json().await?
        } else {
            response
                .error_for_status()
                .map_err(|e| Error::GitLabApi(format!("Merge failed: {e}")))?
                .json()
                .await?
        };

        let merged = response.state.as_deref() == Some("merged");
        let message = response.message.map(|m| match m {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        });
        if !merged && message.is_none() {
            return Err(Error::GitLabApi(format!(
                "unexpected merge response for !{iid}: state {:?}",
                response.state
            )));
        }
        let merge_result = MergeResult {
            merged,
            sha: response.squash_commit_sha.or(response.merge_commit_sha),
            message,
        };
        debug!(
            mr_iid = iid,
            merged = merge_result.merged,
            sha = ?merge_result.sha,
            "merge complete"
        );
        Ok(merge_result)
    }

    async fn create_review(&self, source: &str, target: &str, title: &str) -> Result<ReviewState> {
        debug!(source, target, "creating MR");
        let payload = CreateMrPayload {
            source_branch: source,
            target_branch: target,
            title,
            remove_source_branch: true,
            squash: false,
        };
        let review: ReviewState = self
            .authorized(self.client.post(self.project_url("/merge_requests")))
            .json(&payload)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::GitLabApi(e.to_string()))?
            .json()
            .await?;
        debug!(mr_iid = review.iid, "created MR");
        Ok(review)
    }
}
