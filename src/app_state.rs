use crate::{completion::CompletionClient, config::Config};

/// Shared application state injected into every request handler via Axum's
/// `State` extractor. Read-only after startup.
pub struct AppState {
    pub config: Config,
    /// Holds the `reqwest::Client` pool and the API key resolved at startup.
    pub completion: CompletionClient,
}

impl AppState {
    pub fn new(config: Config, http_client: reqwest::Client) -> Self {
        let completion = CompletionClient::new(http_client, &config);
        Self { config, completion }
    }
}
