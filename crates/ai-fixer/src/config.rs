//! Runtime configuration, assembled by the binary and validated before any
//! task starts.

use std::path::{Component, Path};
use std::time::Duration;

use crate::cluster::MAX_WATCH_TIMEOUT_SECS;
use crate::error::{FixerError, Result};
use crate::escalation::github::RepoSlug;
use crate::escalation::GitHubSettings;

/// Namespace watched when none is configured.
pub const DEFAULT_NAMESPACE: &str = "app-namespace";

/// Model requested from the inference service when none is configured.
pub const DEFAULT_MODEL: &str = "qwen2.5-coder-1.5b-cpu";

/// Timer, window and retry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    /// How often the remediation loop checks the buffer
    pub poll_interval: Duration,
    /// Minimum gap between two non-empty drains
    pub debounce: Duration,
    /// How long an applied fix is watched
    pub rollout_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// Timeout for every outbound HTTP call
    pub http_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            debounce: Duration::from_secs(10),
            rollout_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            max_reconnect_delay: Duration::from_secs(60),
            http_timeout: Duration::from_secs(60),
        }
    }
}

/// Everything one instance needs to manage one deployment.
#[derive(Debug, Clone)]
pub struct FixerConfig {
    pub namespace: String,
    /// Only this deployment may be updated, when set
    pub target_deployment: Option<String>,
    pub ai_url: String,
    pub model: String,
    pub manifest_url: String,
    /// Voice-call service; human escalation fails when unset
    pub phone_service_url: Option<String>,
    pub github: GitHubSettings,
    pub timing: Timing,
}

impl FixerConfig {
    /// Check the configuration for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(config_error("namespace must not be empty"));
        }
        if matches!(&self.target_deployment, Some(name) if name.trim().is_empty()) {
            return Err(config_error("target deployment must not be empty when set"));
        }
        if self.model.trim().is_empty() {
            return Err(config_error("model must not be empty"));
        }

        require_http_url("AI URL", &self.ai_url)?;
        require_http_url("manifest URL", &self.manifest_url)?;
        if let Some(url) = &self.phone_service_url {
            require_http_url("phone service URL", url)?;
        }

        RepoSlug::from_url(&self.github.repo_url)?;
        if self.github.token.trim().is_empty() {
            return Err(config_error("GitHub token must not be empty"));
        }
        if self.github.base_branch.trim().is_empty() {
            return Err(config_error("base branch must not be empty"));
        }
        validate_repo_path(&self.github.manifest_path)?;

        let timing = &self.timing;
        if timing.poll_interval.is_zero() {
            return Err(config_error("poll interval must be greater than zero"));
        }
        let rollout_secs = timing.rollout_timeout.as_secs();
        if rollout_secs == 0 || rollout_secs > MAX_WATCH_TIMEOUT_SECS {
            return Err(config_error(&format!(
                "rollout timeout must be between 1 and {MAX_WATCH_TIMEOUT_SECS} seconds"
            )));
        }
        if timing.reconnect_delay.is_zero() {
            return Err(config_error("reconnect delay must be greater than zero"));
        }
        if timing.max_reconnect_delay < timing.reconnect_delay {
            return Err(config_error(
                "max reconnect delay must not be shorter than the reconnect delay",
            ));
        }
        if timing.http_timeout.is_zero() {
            return Err(config_error("HTTP timeout must be greater than zero"));
        }

        Ok(())
    }
}

fn config_error(message: &str) -> FixerError {
    FixerError::Config(message.to_string())
}

fn require_http_url(what: &str, url: &str) -> Result<()> {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(FixerError::Config(format!(
            "{what} must be an http(s) URL, got {url:?}"
        )))
    }
}

/// The manifest path must stay inside the repository checkout.
fn validate_repo_path(path: &str) -> Result<()> {
    let parsed = Path::new(path);
    let inside = !path.trim().is_empty()
        && parsed
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if inside {
        Ok(())
    } else {
        Err(FixerError::Config(format!(
            "repository manifest path must be relative to the repository root, got {path:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn valid() -> FixerConfig {
        FixerConfig {
            namespace: DEFAULT_NAMESPACE.to_string(),
            target_deployment: Some("nginx".to_string()),
            ai_url: "http://inference.local".to_string(),
            model: DEFAULT_MODEL.to_string(),
            manifest_url: "https://raw.githubusercontent.com/acme/infra/main/nginx.yaml"
                .to_string(),
            phone_service_url: None,
            github: GitHubSettings {
                repo_url: "https://github.com/acme/infra.git".to_string(),
                token: "ghp_token".to_string(),
                base_branch: "main".to_string(),
                manifest_path: "apps/nginx.yaml".to_string(),
                work_dir: PathBuf::from("./tmp-repo"),
            },
            timing: Timing::default(),
        }
    }

    #[test]
    fn test_defaults_validate() {
        valid().validate().unwrap();
    }

    #[test]
    fn test_rollout_timeout_must_fit_server_watch_limit() {
        let mut config = valid();
        config.timing.rollout_timeout = Duration::from_secs(600);
        let err = config.validate().unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[test]
    fn test_rejects_non_http_urls() {
        let mut config = valid();
        config.ai_url = "inference.local".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.phone_service_url = Some("ftp://phone".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_manifest_path_stays_in_repo() {
        for path in ["/etc/passwd", "../outside.yaml", ""] {
            let mut config = valid();
            config.github.manifest_path = path.to_string();
            assert!(config.validate().is_err(), "{path} should be rejected");
        }
    }

    #[test]
    fn test_backoff_bounds() {
        let mut config = valid();
        config.timing.max_reconnect_delay = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }
}
