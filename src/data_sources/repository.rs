//! `githubx_repository`

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{locate_repository, DataSource};
use crate::client::models::{License, Pages, Repository, RepositoryLicense};
use crate::client::GithubClient;
use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeType, Diagnostic, Schema};
use crate::state::{set, sorted_list};
use crate::types::OperationResult;

/// Looks up a repository with its Pages site, license and template origin.
pub struct RepositoryDataSource;

fn string_fields(names: &[&str]) -> HashMap<String, AttributeType> {
    names
        .iter()
        .map(|name| (name.to_string(), AttributeType::String))
        .collect()
}

fn pages_type() -> HashMap<String, AttributeType> {
    let mut fields = string_fields(&["build_type", "cname", "html_url", "status", "url"]);
    fields.insert("custom_404".into(), AttributeType::Bool);
    fields.insert(
        "source".into(),
        AttributeType::object(string_fields(&["branch", "path"])),
    );
    fields
}

fn license_type() -> HashMap<String, AttributeType> {
    let mut info = string_fields(&[
        "key",
        "name",
        "url",
        "spdx_id",
        "html_url",
        "description",
        "implementation",
        "body",
    ]);
    info.insert("featured".into(), AttributeType::Bool);
    for list in ["permissions", "conditions", "limitations"] {
        info.insert(list.into(), AttributeType::list(AttributeType::String));
    }

    let mut fields = string_fields(&[
        "name",
        "path",
        "sha",
        "url",
        "html_url",
        "git_url",
        "download_url",
        "type",
        "content",
        "encoding",
    ]);
    fields.insert("size".into(), AttributeType::Int64);
    fields.insert("license".into(), AttributeType::object(info));
    fields
}

#[async_trait]
impl DataSource for RepositoryDataSource {
    fn type_name(&self) -> &'static str {
        "githubx_repository"
    }

    fn schema(&self) -> Schema {
        let text = |description: &str| Attribute::computed_string().with_description(description);
        let flag = |description: &str| Attribute::computed_bool().with_description(description);

        Schema::v0()
            .with_description("Get information on a GitHub repository.")
            .with_attribute(
                "full_name",
                Attribute::optional_string()
                    .conflicts_with("name")
                    .with_description(
                        "The full name of the repository (owner/repo). Conflicts with `name`.",
                    ),
            )
            .with_attribute(
                "name",
                Attribute::optional_string()
                    .conflicts_with("full_name")
                    .with_description(
                        "The name of the repository. Conflicts with `full_name`. Uses the \
                         provider-level `owner`.",
                    ),
            )
            .with_attribute("description", text("A description of the repository."))
            .with_attribute("homepage_url", text("URL of a page describing the project."))
            .with_attribute("private", flag("Whether the repository is private."))
            .with_attribute("visibility", text("The visibility of the repository."))
            .with_attribute("has_issues", flag("Whether the repository has issues enabled."))
            .with_attribute(
                "has_discussions",
                flag("Whether the repository has discussions enabled."),
            )
            .with_attribute("has_projects", flag("Whether the repository has projects enabled."))
            .with_attribute("has_downloads", flag("Whether the repository has downloads enabled."))
            .with_attribute("has_wiki", flag("Whether the repository has the wiki enabled."))
            .with_attribute("is_template", flag("Whether the repository is a template."))
            .with_attribute("fork", flag("Whether the repository is a fork."))
            .with_attribute("allow_merge_commit", flag("Whether merge commits are allowed."))
            .with_attribute("allow_squash_merge", flag("Whether squash merges are allowed."))
            .with_attribute("allow_rebase_merge", flag("Whether rebase merges are allowed."))
            .with_attribute("allow_auto_merge", flag("Whether auto-merge is allowed."))
            .with_attribute(
                "allow_update_branch",
                flag("Whether pull request head branches can be updated."),
            )
            .with_attribute(
                "delete_branch_on_merge",
                flag("Whether head branches are deleted after merging."),
            )
            .with_attribute(
                "squash_merge_commit_title",
                text("The default squash merge commit title."),
            )
            .with_attribute(
                "squash_merge_commit_message",
                text("The default squash merge commit message."),
            )
            .with_attribute("merge_commit_title", text("The default merge commit title."))
            .with_attribute("merge_commit_message", text("The default merge commit message."))
            .with_attribute("default_branch", text("The default branch of the repository."))
            .with_attribute("primary_language", text("The primary language of the repository."))
            .with_attribute("archived", flag("Whether the repository is archived."))
            .with_attribute(
                "repository_license",
                Attribute::computed_object(license_type())
                    .with_description("The license file of the repository."),
            )
            .with_attribute(
                "pages",
                Attribute::computed_object(pages_type())
                    .with_description("The GitHub Pages configuration of the repository."),
            )
            .with_attribute(
                "topics",
                Attribute::computed_string_list().with_description("The topics of the repository."),
            )
            .with_attribute("html_url", text("URL of the repository on GitHub."))
            .with_attribute("ssh_clone_url", text("URL for cloning over SSH."))
            .with_attribute("svn_url", text("URL for checking out with Subversion."))
            .with_attribute("git_clone_url", text("URL for cloning over the git protocol."))
            .with_attribute("http_clone_url", text("URL for cloning over HTTPS."))
            .with_attribute(
                "template",
                Attribute::computed_object(string_fields(&["owner", "repository"]))
                    .with_description("The template repository this repository was created from."),
            )
            .with_attribute("node_id", text("The GraphQL node ID of the repository."))
            .with_attribute(
                "repo_id",
                Attribute::computed_int64().with_description("The numeric ID of the repository."),
            )
            .with_attribute("id", text("The name of the repository."))
    }

    async fn read(
        &self,
        client: &GithubClient,
        config: Value,
    ) -> Result<OperationResult, ProviderError> {
        let (owner, name) = locate_repository(client, &config, "name").await?;

        let mut state = config;
        let repo = match client.get_repository(&owner, &name).await {
            Ok(repo) => repo,
            Err(e) if e.is_not_found() => {
                debug!(owner = %owner, repo = %name, "Missing repository");
                set(&mut state, "id", "");
                return Ok(OperationResult::new(state).with_diagnostic(
                    Diagnostic::warning("Repository Not Found").with_detail(format!(
                        "Repository {}/{} not found. Setting empty state.",
                        owner, name
                    )),
                ));
            },
            Err(e) => return Err(ProviderError::api("Error fetching GitHub repository", e)),
        };

        fill_repository(&mut state, &repo);

        let mut warnings = Vec::new();
        let pages = if repo.has_pages.unwrap_or(false) {
            match client.get_pages(&owner, &name).await {
                Ok(pages) => pages_value(&pages),
                Err(e) => {
                    warnings.push(
                        Diagnostic::warning("Error fetching Pages info")
                            .with_detail(format!("Unable to fetch Pages info: {}", e)),
                    );
                    Value::Null
                },
            }
        } else {
            Value::Null
        };
        set(&mut state, "pages", pages);

        let license = if repo.license.is_some() {
            match client.get_repository_license(&owner, &name).await {
                Ok(license) => license_value(&license),
                Err(e) => {
                    warnings.push(
                        Diagnostic::warning("Error fetching license")
                            .with_detail(format!("Unable to fetch license: {}", e)),
                    );
                    Value::Null
                },
            }
        } else {
            Value::Null
        };
        set(&mut state, "repository_license", license);

        Ok(OperationResult::new(state).with_diagnostics(warnings))
    }
}

fn fill_repository(state: &mut Value, repo: &Repository) {
    let name = repo.name.clone().unwrap_or_default();
    set(state, "id", name.clone());
    set(state, "name", name);

    let text = |value: &Option<String>| value.clone().unwrap_or_default();
    for (attr, value) in [
        ("full_name", &repo.full_name),
        ("description", &repo.description),
        ("homepage_url", &repo.homepage),
        ("visibility", &repo.visibility),
        ("squash_merge_commit_title", &repo.squash_merge_commit_title),
        ("squash_merge_commit_message", &repo.squash_merge_commit_message),
        ("merge_commit_title", &repo.merge_commit_title),
        ("merge_commit_message", &repo.merge_commit_message),
        ("default_branch", &repo.default_branch),
        ("primary_language", &repo.language),
        ("html_url", &repo.html_url),
        ("ssh_clone_url", &repo.ssh_url),
        ("svn_url", &repo.svn_url),
        ("git_clone_url", &repo.git_url),
        ("http_clone_url", &repo.clone_url),
        ("node_id", &repo.node_id),
    ] {
        set(state, attr, text(value));
    }

    for (attr, value) in [
        ("private", repo.private),
        ("has_issues", repo.has_issues),
        ("has_discussions", repo.has_discussions),
        ("has_projects", repo.has_projects),
        ("has_downloads", repo.has_downloads),
        ("has_wiki", repo.has_wiki),
        ("is_template", repo.is_template),
        ("fork", repo.fork),
        ("allow_merge_commit", repo.allow_merge_commit),
        ("allow_squash_merge", repo.allow_squash_merge),
        ("allow_rebase_merge", repo.allow_rebase_merge),
        ("allow_auto_merge", repo.allow_auto_merge),
        ("allow_update_branch", repo.allow_update_branch),
        ("delete_branch_on_merge", repo.delete_branch_on_merge),
        ("archived", repo.archived),
    ] {
        set(state, attr, value.unwrap_or(false));
    }

    set(state, "repo_id", repo.id.unwrap_or_default());
    set(
        state,
        "topics",
        match &repo.topics {
            Some(topics) => json!(topics),
            None => Value::Null,
        },
    );
    set(
        state,
        "template",
        repo.template_repository
            .as_deref()
            .map(|template| {
                json!({
                    "owner": template
                        .owner
                        .as_ref()
                        .and_then(|o| o.login.clone())
                        .unwrap_or_default(),
                    "repository": template.name.clone().unwrap_or_default(),
                })
            })
            .unwrap_or(Value::Null),
    );
}

fn pages_value(pages: &Pages) -> Value {
    let source = pages.source.as_ref().map(|source| {
        json!({
            "branch": source.branch.clone().unwrap_or_default(),
            "path": source.path.clone().unwrap_or_default(),
        })
    });
    json!({
        "source": source,
        "build_type": pages.build_type.clone().unwrap_or_default(),
        "cname": pages.cname.clone().unwrap_or_default(),
        "custom_404": pages.custom_404.unwrap_or(false),
        "html_url": pages.html_url.clone().unwrap_or_default(),
        "status": pages.status.clone().unwrap_or_default(),
        "url": pages.url.clone().unwrap_or_default(),
    })
}

fn license_info(license: &License) -> Value {
    let text = |value: &Option<String>| value.clone().unwrap_or_default();
    // Empty term lists are reported as null rather than [].
    let terms = |items: &[String]| sorted_list(Some(items));
    json!({
        "key": text(&license.key),
        "name": text(&license.name),
        "url": text(&license.url),
        "spdx_id": text(&license.spdx_id),
        "html_url": text(&license.html_url),
        "featured": license.featured.unwrap_or(false),
        "description": text(&license.description),
        "implementation": text(&license.implementation),
        "permissions": terms(&license.permissions),
        "conditions": terms(&license.conditions),
        "limitations": terms(&license.limitations),
        "body": text(&license.body),
    })
}

fn license_value(license: &RepositoryLicense) -> Value {
    let text = |value: &Option<String>| value.clone().unwrap_or_default();
    json!({
        "name": text(&license.name),
        "path": text(&license.path),
        "license": license.license.as_ref().map(license_info),
        "sha": text(&license.sha),
        "size": license.size.unwrap_or_default(),
        "url": text(&license.url),
        "html_url": text(&license.html_url),
        "git_url": text(&license.git_url),
        "download_url": text(&license.download_url),
        "type": text(&license.kind),
        "content": text(&license.content),
        "encoding": text(&license.encoding),
    })
}
