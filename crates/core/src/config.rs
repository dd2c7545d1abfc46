use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub github: GitHubConfig,
    pub agent: Option<AgentConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubConfig {
    #[serde(default = "default_github_api_base_url")]
    pub api_base_url: String,
    pub app: Option<GitHubAppConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubAppConfig {
    pub id: u64,
    pub webhook_secret: String,
    pub private_key: String,
}

impl GitHubAppConfig {
    /// PEM keys passed through environment variables often arrive with
    /// escaped newlines.
    pub fn private_key_pem(&self) -> String { self.private_key.replace("\\n", "\n") }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    pub api_key: String,
    #[serde(default = "default_agent_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub poll: PollConfig,
}

/// Tuning knobs for the agent activities polling loop.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_attempts")]
    pub attempts: u32,
    #[serde(default = "default_poll_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_poll_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_not_found_retries")]
    pub max_not_found_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            attempts: default_poll_attempts(),
            delay_ms: default_poll_delay_ms(),
            page_size: default_poll_page_size(),
            max_not_found_retries: default_max_not_found_retries(),
        }
    }
}

fn default_github_api_base_url() -> String { "https://api.github.com".to_string() }

fn default_agent_base_url() -> String { "https://jules.googleapis.com/v1alpha".to_string() }

fn default_poll_attempts() -> u32 { 10 }

fn default_poll_delay_ms() -> u64 { 1500 }

fn default_poll_page_size() -> u32 { 50 }

fn default_max_not_found_retries() -> u32 { 3 }
