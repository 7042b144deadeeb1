//! Credentials kept out of version control in `.pilot/secrets.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable that overrides `ci_api_token` from the file.
pub const CI_TOKEN_ENV: &str = "PILOT_CI_API_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Secrets {
    pub ci_api_token: Option<String>,
}

impl Secrets {
    /// Token from `env_token` if set and non-empty, else from the file.
    pub fn ci_api_token(&self, env_token: Option<String>) -> Option<String> {
        env_token
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.ci_api_token.clone())
            .filter(|t| !t.trim().is_empty())
    }
}

/// Load secrets; a missing file means no secrets.
pub fn load_secrets(path: &Path) -> Result<Secrets> {
    if !path.exists() {
        return Ok(Secrets::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// CI API token from the environment or the secrets file.
pub fn resolve_ci_token(path: &Path) -> Result<Option<String>> {
    Ok(load_secrets(path)?.ci_api_token(std::env::var(CI_TOKEN_ENV).ok()))
}

/// Template written by `pilot init`.
pub const SECRETS_TEMPLATE: &str = "\
# Credentials for pilot. This file is git-ignored.
# The PILOT_CI_API_TOKEN environment variable takes precedence.
# ci_api_token = \"\"
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_has_no_token() {
        let temp = tempfile::tempdir().expect("tempdir");
        let secrets = load_secrets(&temp.path().join("secrets.toml")).expect("load");
        assert_eq!(secrets.ci_api_token(None), None);
    }

    #[test]
    fn template_parses_without_a_token() {
        let secrets: Secrets = toml::from_str(SECRETS_TEMPLATE).expect("parse");
        assert_eq!(secrets, Secrets::default());
    }

    #[test]
    fn environment_overrides_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("secrets.toml");
        fs::write(&path, "ci_api_token = \"from-file\"\n").expect("write");
        let secrets = load_secrets(&path).expect("load");

        assert_eq!(secrets.ci_api_token(None).as_deref(), Some("from-file"));
        assert_eq!(
            secrets.ci_api_token(Some("from-env".to_string())).as_deref(),
            Some("from-env")
        );
        assert_eq!(
            secrets.ci_api_token(Some(String::new())).as_deref(),
            Some("from-file")
        );
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let secrets = Secrets {
            ci_api_token: Some("   ".to_string()),
        };
        assert_eq!(secrets.ci_api_token(None), None);
    }
}
