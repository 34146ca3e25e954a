use hemmer_provider_githubx::{init_logging, serve, GithubProvider, ProviderError};

#[tokio::main]
async fn main() -> Result<(), ProviderError> {
    init_logging();
    serve(GithubProvider::new()).await
}
