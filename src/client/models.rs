//! Typed mirrors of the hosting API's JSON payloads.
//!
//! Only the fields the provider reads are modelled. Everything is optional
//! because the API omits fields freely depending on token scopes and
//! repository settings.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

/// A user or organization account.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct User {
    pub login: Option<String>,
    pub id: Option<i64>,
    pub node_id: Option<String>,
    pub avatar_url: Option<String>,
    pub html_url: Option<String>,
    pub name: Option<String>,
    pub company: Option<String>,
    pub blog: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub public_repos: Option<i64>,
    pub public_gists: Option<i64>,
    pub followers: Option<i64>,
    pub following: Option<i64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// A repository as returned by `GET repos/{owner}/{repo}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Repository {
    pub id: Option<i64>,
    pub node_id: Option<String>,
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub owner: Option<User>,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub private: Option<bool>,
    pub visibility: Option<String>,
    pub fork: Option<bool>,
    pub archived: Option<bool>,
    pub has_issues: Option<bool>,
    pub has_discussions: Option<bool>,
    pub has_projects: Option<bool>,
    pub has_downloads: Option<bool>,
    pub has_wiki: Option<bool>,
    pub has_pages: Option<bool>,
    pub is_template: Option<bool>,
    pub allow_merge_commit: Option<bool>,
    pub allow_squash_merge: Option<bool>,
    pub allow_rebase_merge: Option<bool>,
    pub allow_auto_merge: Option<bool>,
    pub allow_update_branch: Option<bool>,
    pub delete_branch_on_merge: Option<bool>,
    pub squash_merge_commit_title: Option<String>,
    pub squash_merge_commit_message: Option<String>,
    pub merge_commit_title: Option<String>,
    pub merge_commit_message: Option<String>,
    pub default_branch: Option<String>,
    pub language: Option<String>,
    pub html_url: Option<String>,
    pub ssh_url: Option<String>,
    pub svn_url: Option<String>,
    pub git_url: Option<String>,
    pub clone_url: Option<String>,
    pub topics: Option<Vec<String>>,
    pub license: Option<License>,
    pub template_repository: Option<Box<Repository>>,
}

/// Body of `POST user/repos` and `POST orgs/{org}/repos`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewRepository {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_issues: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_discussions: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_projects: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_downloads: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_wiki: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_template: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_init: Option<bool>,
    pub allow_merge_commit: bool,
    pub allow_squash_merge: bool,
    pub allow_rebase_merge: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_auto_merge: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_update_branch: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_branch_on_merge: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squash_merge_commit_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squash_merge_commit_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_commit_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_commit_message: Option<String>,
}

/// Pages site configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pages {
    pub url: Option<String>,
    pub status: Option<String>,
    pub cname: Option<String>,
    pub custom_404: Option<bool>,
    pub html_url: Option<String>,
    pub build_type: Option<String>,
    pub source: Option<PagesSource>,
}

/// Where a Pages site is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagesSource {
    pub branch: Option<String>,
    pub path: Option<String>,
}

/// Body of `PUT repos/{owner}/{repo}/pages`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PagesUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PagesSource>,
}

/// License summary embedded in repositories.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct License {
    pub key: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub spdx_id: Option<String>,
    pub html_url: Option<String>,
    pub featured: Option<bool>,
    pub description: Option<String>,
    pub implementation: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub limitations: Vec<String>,
    pub body: Option<String>,
}

/// The license file of a repository, from `GET repos/{owner}/{repo}/license`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryLicense {
    pub name: Option<String>,
    pub path: Option<String>,
    pub sha: Option<String>,
    pub size: Option<i64>,
    pub url: Option<String>,
    pub html_url: Option<String>,
    pub git_url: Option<String>,
    pub download_url: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub content: Option<String>,
    pub encoding: Option<String>,
    pub license: Option<License>,
}

/// A git reference.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Reference {
    #[serde(rename = "ref")]
    pub name: Option<String>,
    pub node_id: Option<String>,
    pub url: Option<String>,
    pub object: Option<GitObject>,
}

impl Reference {
    /// SHA the reference points at.
    pub fn sha(&self) -> Option<&str> {
        self.object.as_ref().and_then(|o| o.sha.as_deref())
    }
}

/// Target of a git reference.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitObject {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub sha: Option<String>,
    pub url: Option<String>,
}

/// A file or directory entry under `contents/`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryContent {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub encoding: Option<String>,
    pub size: Option<i64>,
    pub name: Option<String>,
    pub path: Option<String>,
    pub content: Option<String>,
    pub sha: Option<String>,
    pub url: Option<String>,
    pub git_url: Option<String>,
    pub html_url: Option<String>,
    pub download_url: Option<String>,
}

/// `GET contents/{path}` answers with an object for files and an array for
/// directories.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Contents {
    File(Box<RepositoryContent>),
    Directory(Vec<RepositoryContent>),
}

/// Name, email and timestamp of a commit author or committer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// A git commit object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Commit {
    pub sha: Option<String>,
    pub message: Option<String>,
    pub author: Option<CommitAuthor>,
    pub committer: Option<CommitAuthor>,
}

/// A commit as returned by the repository commits endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryCommit {
    pub sha: Option<String>,
    pub commit: Option<Commit>,
}

/// Body of `PUT` and `DELETE` on `contents/{path}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileChange {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<CommitAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committer: Option<CommitAuthor>,
}

/// Response of a contents write.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileChangeResponse {
    pub content: Option<RepositoryContent>,
    pub commit: Option<Commit>,
}

/// A commit status.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoStatus {
    pub state: Option<String>,
    pub context: Option<String>,
    pub description: Option<String>,
}

/// One side of a pull request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullRequestBranch {
    #[serde(rename = "ref")]
    pub name: Option<String>,
    pub sha: Option<String>,
    pub label: Option<String>,
}

/// A pull request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullRequest {
    pub number: Option<i64>,
    pub state: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub merged: Option<bool>,
    pub merged_at: Option<String>,
    pub mergeable: Option<bool>,
    pub merge_commit_sha: Option<String>,
    pub maintainer_can_modify: Option<bool>,
    pub head: Option<PullRequestBranch>,
    pub base: Option<PullRequestBranch>,
}

impl PullRequest {
    /// Whether the pull request is open.
    pub fn is_open(&self) -> bool {
        self.state.as_deref() == Some("open")
    }

    /// Whether the pull request was merged.
    pub fn is_merged(&self) -> bool {
        self.merged.unwrap_or(false)
    }

    /// Head commit SHA.
    pub fn head_sha(&self) -> Option<&str> {
        self.head.as_ref().and_then(|h| h.sha.as_deref())
    }
}

/// Body of `POST pulls`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewPullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub maintainer_can_modify: bool,
}

/// Body of `PATCH pulls/{number}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PullRequestUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintainer_can_modify: Option<bool>,
}

/// Response of `PUT pulls/{number}/merge`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MergeResult {
    pub sha: Option<String>,
    pub merged: Option<bool>,
    pub message: Option<String>,
}


/// Response of `POST app/installations/{id}/access_tokens`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstallationToken {
    pub token: Option<String>,
    pub expires_at: Option<String>,
}
