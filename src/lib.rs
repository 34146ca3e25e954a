//! Hemmer provider for GitHub.
//!
//! Manages repositories, branches, files and auto-merging pull requests
//! through the GitHub REST API, and exposes read-only lookups for users,
//! repositories, branches and files. The binary speaks the Hemmer provider
//! gRPC protocol; [`GithubProvider`] implements [`ProviderService`] on top of
//! it.
//!
//! # Resources
//!
//! - `githubx_repository`
//! - `githubx_repository_branch`
//! - `githubx_repository_file`
//! - `githubx_repository_pull_request_auto_merge`
//!
//! # Data sources
//!
//! - `githubx_user`
//! - `githubx_repository`
//! - `githubx_repository_branch`
//! - `githubx_repository_file`
//!
//! # Handshake Protocol
//!
//! When the provider starts via [`serve`], it outputs a handshake string to stdout:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `HEMMER_PROVIDER|<protocol_version>|<address>`
//!
//! # Configuration
//!
//! Every provider setting has an environment fallback:
//!
//! | Attribute  | Environment        | Default                   |
//! |------------|--------------------|---------------------------|
//! | `token`    | `GITHUB_TOKEN`     | `gh auth token`           |
//! | `base_url` | `GITHUB_BASE_URL`  | `https://api.github.com/` |
//! | `owner`    | `GITHUB_OWNER`     | the authenticated user    |
//! | `insecure` | `GITHUB_INSECURE`  | `false`                   |
//!
//! When no token is found anywhere, an `app_auth` block (`id`,
//! `installation_id`, `pem_file`) authenticates as a GitHub App installation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app_auth;
pub mod client;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod ids;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod server;
pub mod state;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use client::{ApiError, GithubClient};
pub use config::{PollSettings, ProviderConfig};
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::GithubProvider;
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ProviderService, ServeOptions,
};
pub use types::{
    AttributeChange, ImportedResource, OperationResult, PlanResult, ProviderMetadata,
    ServerCapabilities, HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
