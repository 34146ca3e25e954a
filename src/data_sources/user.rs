//! `githubx_user`

use async_trait::async_trait;
use serde_json::{json, Value};

use super::DataSource;
use crate::client::GithubClient;
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};
use crate::state::str_attr;
use crate::types::OperationResult;

/// Profile of a user account.
pub struct UserDataSource;

#[async_trait]
impl DataSource for UserDataSource {
    fn type_name(&self) -> &'static str {
        "githubx_user"
    }

    fn schema(&self) -> Schema {
        let text = |description: &str| Attribute::computed_string().with_description(description);
        let count = |description: &str| Attribute::computed_int64().with_description(description);
        Schema::v0()
            .with_description("Get information on a GitHub user.")
            .with_attribute(
                "username",
                Attribute::required_string().with_description("The GitHub username to look up."),
            )
            .with_attribute("id", text("The GitHub user ID, as a string."))
            .with_attribute("user_id", count("The GitHub user ID as an integer."))
            .with_attribute("node_id", text("The GitHub node ID of the user."))
            .with_attribute("login", text("The user's login."))
            .with_attribute("avatar_url", text("The URL of the user's avatar."))
            .with_attribute("html_url", text("The GitHub URL of the user's profile."))
            .with_attribute("name", text("The user's display name."))
            .with_attribute("company", text("The user's company."))
            .with_attribute("blog", text("The user's blog URL."))
            .with_attribute("location", text("The user's location."))
            .with_attribute("email", text("The user's email address."))
            .with_attribute("bio", text("The user's bio."))
            .with_attribute("public_repos", count("The number of public repositories."))
            .with_attribute("public_gists", count("The number of public gists."))
            .with_attribute("followers", count("The number of followers."))
            .with_attribute("following", count("The number of users following."))
            .with_attribute(
                "created_at",
                text("The timestamp when the user account was created."),
            )
            .with_attribute(
                "updated_at",
                text("The timestamp when the user account was last updated."),
            )
    }

    async fn read(
        &self,
        client: &GithubClient,
        config: Value,
    ) -> Result<OperationResult, ProviderError> {
        let Some(username) = str_attr(&config, "username") else {
            return Err(ProviderError::operation(
                "Missing Username",
                "The username attribute is required.",
            ));
        };
        let user = client.get_user(username).await.map_err(|e| {
            ProviderError::api("Error fetching GitHub user", e)
        })?;

        let id = user.id.unwrap_or_default();
        Ok(OperationResult::new(json!({
            "username": username,
            "id": id.to_string(),
            "user_id": id,
            "node_id": user.node_id.unwrap_or_default(),
            "login": user.login.unwrap_or_else(|| username.to_string()),
            "avatar_url": user.avatar_url.unwrap_or_default(),
            "html_url": user.html_url.unwrap_or_default(),
            "name": user.name.unwrap_or_default(),
            "company": user.company.unwrap_or_default(),
            "blog": user.blog.unwrap_or_default(),
            "location": user.location.unwrap_or_default(),
            "email": user.email.unwrap_or_default(),
            "bio": user.bio.unwrap_or_default(),
            "public_repos": user.public_repos.unwrap_or_default(),
            "public_gists": user.public_gists.unwrap_or_default(),
            "followers": user.followers.unwrap_or_default(),
            "following": user.following.unwrap_or_default(),
            "created_at": user.created_at,
            "updated_at": user.updated_at,
        })))
    }
}
