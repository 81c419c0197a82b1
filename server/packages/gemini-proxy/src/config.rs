use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};

use gemini_proxy_error::ProxyError;

use crate::completion::CompletionService;
use crate::executor::{check_executable, StrategyExecutor, DEFAULT_ATTEMPT_TIMEOUT_SECS};
use crate::prompt::DEFAULT_MAX_PROMPT_CHARS;
use crate::sanitize::SanitizeOptions;

pub const DEFAULT_GEMINI_PATH: &str = "/opt/homebrew/bin/gemini";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7777;

const WILDCARD: &str = "*";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error("invalid port: {0}")]
    InvalidPort(u16),
    #[error("invalid gemini timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid max prompt length: {0}")]
    InvalidMaxPromptChars(usize),
    #[error("invalid cors origin: {0}")]
    InvalidCorsOrigin(String),
    #[error("invalid cors method: {0}")]
    InvalidCorsMethod(String),
    #[error("invalid cors header: {0}")]
    InvalidCorsHeader(String),
}

/// Startup configuration, resolved once from flags and environment.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub gemini_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub attempt_timeout: Duration,
    pub max_prompt_chars: usize,
    pub strip_banner_phrases: bool,
    /// `None` disables the audit log.
    pub audit_log: Option<PathBuf>,
    pub cors: CorsConfig,
}

impl ProxyConfig {
    pub fn new(gemini_path: impl Into<PathBuf>) -> Self {
        Self {
            gemini_path: gemini_path.into(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
            strip_banner_phrases: false,
            audit_log: None,
            cors: CorsConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_executable(&self.gemini_path)?;
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("0".to_string()));
        }
        if self.max_prompt_chars == 0 {
            return Err(ConfigError::InvalidMaxPromptChars(self.max_prompt_chars));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn completion_service(&self) -> CompletionService {
        CompletionService::new(
            StrategyExecutor::new(&self.gemini_path, self.attempt_timeout),
            SanitizeOptions {
                strip_banner_phrases: self.strip_banner_phrases,
            },
            self.max_prompt_chars,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsConfig {
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: vec![WILDCARD.to_string()],
            allow_methods: vec![WILDCARD.to_string()],
            allow_headers: vec![WILDCARD.to_string()],
            allow_credentials: true,
        }
    }
}

impl CorsConfig {
    /// Wildcards become `Any`, or are mirrored from the request when
    /// credentials are allowed.
    pub fn build_layer(&self) -> Result<CorsLayer, ConfigError> {
        let mut cors = CorsLayer::new();
        let mirror = self.allow_credentials;

        if is_wildcard(&self.allow_origins) {
            cors = if mirror {
                cors.allow_origin(AllowOrigin::mirror_request())
            } else {
                cors.allow_origin(Any)
            };
        } else {
            let mut origins = Vec::new();
            for origin in &self.allow_origins {
                let value = origin
                    .parse()
                    .map_err(|_| ConfigError::InvalidCorsOrigin(origin.clone()))?;
                origins.push(value);
            }
            cors = cors.allow_origin(origins);
        }

        if is_wildcard(&self.allow_methods) {
            cors = if mirror {
                cors.allow_methods(AllowMethods::mirror_request())
            } else {
                cors.allow_methods(Any)
            };
        } else {
            let mut methods = Vec::new();
            for method in &self.allow_methods {
                let parsed = method
                    .parse()
                    .map_err(|_| ConfigError::InvalidCorsMethod(method.clone()))?;
                methods.push(parsed);
            }
            cors = cors.allow_methods(methods);
        }

        if is_wildcard(&self.allow_headers) {
            cors = if mirror {
                cors.allow_headers(AllowHeaders::mirror_request())
            } else {
                cors.allow_headers(Any)
            };
        } else {
            let mut headers = Vec::new();
            for header in &self.allow_headers {
                let parsed = header
                    .parse()
                    .map_err(|_| ConfigError::InvalidCorsHeader(header.clone()))?;
                headers.push(parsed);
            }
            cors = cors.allow_headers(headers);
        }

        if self.allow_credentials {
            cors = cors.allow_credentials(true);
        }

        Ok(cors)
    }
}

fn is_wildcard(values: &[String]) -> bool {
    values.is_empty() || values.iter().any(|value| value.trim() == WILDCARD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_executable_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProxyConfig::new(dir.path().join("gemini"));
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Proxy(ProxyError::ExecutableNotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn numeric_limits_are_checked() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gemini");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = ProxyConfig::new(&path);
        config.validate().unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:7777");

        let mut bad = config.clone();
        bad.port = 0;
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidPort(0))));

        let mut bad = config.clone();
        bad.attempt_timeout = Duration::ZERO;
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidTimeout(_))));

        let mut bad = config;
        bad.max_prompt_chars = 0;
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::InvalidMaxPromptChars(0))
        ));
    }

    #[test]
    fn cors_defaults_build() {
        assert!(CorsConfig::default().build_layer().is_ok());

        let without_credentials = CorsConfig {
            allow_credentials: false,
            ..CorsConfig::default()
        };
        assert!(without_credentials.build_layer().is_ok());
    }

    #[test]
    fn cors_explicit_values_are_parsed() {
        let config = CorsConfig {
            allow_origins: vec!["http://localhost:3000".to_string()],
            allow_methods: vec!["GET".to_string(), "POST".to_string()],
            allow_headers: vec!["content-type".to_string()],
            allow_credentials: true,
        };
        assert!(config.build_layer().is_ok());

        let bad_header = CorsConfig {
            allow_headers: vec!["bad header".to_string()],
            ..config.clone()
        };
        assert!(matches!(
            bad_header.build_layer(),
            Err(ConfigError::InvalidCorsHeader(_))
        ));

        let bad_method = CorsConfig {
            allow_methods: vec!["GE T".to_string()],
            ..config
        };
        assert!(matches!(
            bad_method.build_layer(),
            Err(ConfigError::InvalidCorsMethod(_))
        ));
    }
}
