use anyhow::{anyhow, Result};
use sc_defs::DEFAULT_ORGANIZATION;

const DEFAULT_API_URL: &str = "https://api.pulumi.com";
const DEFAULT_TAG_NAME: &str = "pulumi:sc";
const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BRANCH: &str = "refs/heads/main";

#[derive(Clone)]
pub struct CatalogConfig {
    pub state_machine_arn: String,
    pub organization: String,
    pub access_token: String,
    pub api_url: String,
    pub catalog_tag_name: String,
    pub port: u16,
    pub default_branch: String,
}

impl CatalogConfig {
    pub fn from_env() -> Result<Self> {
        CatalogConfig::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let state_machine_arn =
            get("STATE_MACHINE_ARN").ok_or_else(|| anyhow!("STATE_MACHINE_ARN is not set"))?;
        let port = match get("PORT") {
            Some(port) => port
                .parse()
                .map_err(|e| anyhow!("Invalid PORT {}: {}", port, e))?,
            None => DEFAULT_PORT,
        };

        Ok(CatalogConfig {
            state_machine_arn,
            organization: get("PULUMI_ORGANIZATION")
                .or_else(|| get("ORGANIZATION"))
                .unwrap_or_else(|| DEFAULT_ORGANIZATION.to_string()),
            access_token: get("PULUMI_ACCESS_TOKEN").unwrap_or_default(),
            api_url: get("PULUMI_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            catalog_tag_name: get("CATALOG_TAG_NAME")
                .unwrap_or_else(|| DEFAULT_TAG_NAME.to_string()),
            port,
            default_branch: get("DEFAULT_BRANCH").unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        })
    }
}

impl std::fmt::Debug for CatalogConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogConfig")
            .field("state_machine_arn", &self.state_machine_arn)
            .field("organization", &self.organization)
            .field("access_token", &"***")
            .field("api_url", &self.api_url)
            .field("catalog_tag_name", &self.catalog_tag_name)
            .field("port", &self.port)
            .field("default_branch", &self.default_branch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<CatalogConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CatalogConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_state_machine_is_required() {
        assert!(config(&[]).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("STATE_MACHINE_ARN", "arn:aws:states:x")]).unwrap();
        assert_eq!(config.organization, "initech");
        assert_eq!(config.port, 8080);
        assert_eq!(config.default_branch, "refs/heads/main");
        assert_eq!(config.catalog_tag_name, "pulumi:sc");
        assert_eq!(config.api_url, "https://api.pulumi.com");
    }

    #[test]
    fn test_organization_fallback_order() {
        let arn = ("STATE_MACHINE_ARN", "arn:aws:states:x");

        let fallback = config(&[arn, ("ORGANIZATION", "acme")]).unwrap();
        assert_eq!(fallback.organization, "acme");

        let preferred = config(&[
            arn,
            ("ORGANIZATION", "acme"),
            ("PULUMI_ORGANIZATION", "globex"),
        ])
        .unwrap();
        assert_eq!(preferred.organization, "globex");
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let result = config(&[("STATE_MACHINE_ARN", "arn:aws:states:x"), ("PORT", "http")]);
        assert!(result.is_err());
    }
}
