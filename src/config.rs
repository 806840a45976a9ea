use std::path::{Path, PathBuf};

use axum::http::HeaderValue;
use clap::Parser;

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

#[derive(Parser, Debug, Clone)]
#[command(
    name    = "vision-bridge",
    about   = "Image + prompt gateway to a multimodal chat-completion API",
    version
)]
pub struct Config {
    /// OpenAI API key sent as the bearer token upstream.
    /// Falls back to an OPENAI_API_KEY line in `--key-file` when unset.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Plaintext key=value file consulted when the key is not in the environment.
    #[arg(long, env = "VISION_KEY_FILE", default_value = ".env")]
    pub key_file: PathBuf,

    /// Host address to listen on.
    #[arg(long, env = "VISION_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, env = "VISION_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Chat-completion endpoint.
    #[arg(
        long,
        env = "VISION_UPSTREAM_URL",
        default_value = "https://api.openai.com/v1/chat/completions"
    )]
    pub upstream_url: String,

    #[arg(long, env = "VISION_MODEL", default_value = "gpt-4o")]
    pub model: String,

    /// Upper bound on generated tokens per answer.
    #[arg(long, env = "VISION_MAX_TOKENS", default_value_t = 500)]
    pub max_tokens: u32,

    /// Cap on the whole multipart request body.
    #[arg(long, env = "VISION_MAX_UPLOAD_BYTES", default_value_t = 10 << 20)]
    pub max_upload_bytes: usize,

    /// Landing page served on `GET /`.
    #[arg(long, env = "VISION_INDEX_FILE", default_value = "index.html")]
    pub index_file: PathBuf,

    /// Browser origin allowed to POST cross-origin, e.g. http://localhost:3000.
    /// CORS headers are only emitted when this is set.
    #[arg(long, env = "VISION_CORS_ORIGIN")]
    pub cors_origin: Option<String>,

    /// Echo the base64 image and the prompt back alongside the answer.
    #[arg(long, env = "VISION_ECHO_INPUT")]
    pub echo_input: bool,

    #[arg(long, env = "VISION_UPSTREAM_TIMEOUT_SECS", default_value_t = 120)]
    pub upstream_timeout_secs: u64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_tokens == 0 {
            anyhow::bail!("--max-tokens must be greater than zero");
        }
        if self.max_upload_bytes == 0 {
            anyhow::bail!("--max-upload-bytes must be greater than zero");
        }
        if let Some(origin) = &self.cors_origin {
            HeaderValue::from_str(origin)
                .map_err(|e| anyhow::anyhow!("Invalid --cors-origin {origin:?}: {e}"))?;
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Environment value first, then the key file. Blank values count as absent.
    pub fn resolve_api_key(&self) -> Option<String> {
        non_blank(self.openai_api_key.as_deref()).or_else(|| key_from_file(&self.key_file))
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn key_from_file(path: &Path) -> Option<String> {
    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Key file not readable");
            return None;
        }
    };

    entries
        .filter_map(Result::ok)
        .find(|(name, _)| name == API_KEY_VAR)
        .and_then(|(_, value)| non_blank(Some(&value)))
}

#[cfg(test)]
impl Config {
    /// Defaults with the upstream pointed at `upstream_url` and no key file.
    pub fn for_tests(upstream_url: &str, api_key: Option<&str>) -> Self {
        Self {
            openai_api_key: api_key.map(str::to_string),
            key_file: PathBuf::from("/nonexistent/vision-bridge.env"),
            host: "127.0.0.1".into(),
            port: 0,
            upstream_url: upstream_url.into(),
            model: "gpt-4o".into(),
            max_tokens: 500,
            max_upload_bytes: 10 << 20,
            index_file: PathBuf::from("index.html"),
            cors_origin: None,
            echo_input: false,
            upstream_timeout_secs: 5,
        }
    }
}
