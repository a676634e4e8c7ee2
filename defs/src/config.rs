use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_ORGANIZATION: &str = "initech";
pub const DEFAULT_REGION: &str = "us-west-2";
const DEFAULT_API_URL: &str = "https://api.pulumi.com";
const DEFAULT_TAG_NAME: &str = "pulumi:sc";
const DEFAULT_TAG_VALUE: &str = "true";

/// What the driver does when a non-essential side effect fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Abort,
    Continue,
}

impl FailurePolicy {
    fn parse(value: Option<String>, default: FailurePolicy) -> FailurePolicy {
        match value.as_deref().map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("abort") => FailurePolicy::Abort,
            Some(v) if v.eq_ignore_ascii_case("continue") => FailurePolicy::Continue,
            _ => default,
        }
    }
}

/// Settings for one deployment handler process, read once at start-up.
#[derive(Clone)]
pub struct DeploymentConfig {
    pub organization: String,
    pub region: String,
    pub access_token: String,
    pub api_url: String,
    pub pulumi_binary: String,
    pub git_binary: String,
    pub work_root: PathBuf,
    pub catalog_tag_name: String,
    pub catalog_tag_value: String,
    pub branch_failure_policy: FailurePolicy,
    pub tag_failure_policy: FailurePolicy,
}

impl DeploymentConfig {
    pub fn from_env() -> Self {
        DeploymentConfig::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        DeploymentConfig {
            organization: get("ORGANIZATION", DEFAULT_ORGANIZATION),
            region: get("AWS_REGION", DEFAULT_REGION),
            access_token: get("PULUMI_ACCESS_TOKEN", ""),
            api_url: get("PULUMI_API_URL", DEFAULT_API_URL)
                .trim_end_matches('/')
                .to_string(),
            pulumi_binary: get("PULUMI_BINARY", "pulumi"),
            git_binary: get("GIT_BINARY", "git"),
            work_root: lookup("WORK_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            catalog_tag_name: get("CATALOG_TAG_NAME", DEFAULT_TAG_NAME),
            catalog_tag_value: get("CATALOG_TAG_VALUE", DEFAULT_TAG_VALUE),
            branch_failure_policy: FailurePolicy::parse(
                lookup("BRANCH_FAILURE_POLICY"),
                FailurePolicy::Abort,
            ),
            tag_failure_policy: FailurePolicy::parse(
                lookup("TAG_FAILURE_POLICY"),
                FailurePolicy::Continue,
            ),
        }
    }

    /// Environment handed to the remote executor of every stack run.
    pub fn remote_environment(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("AWS_REGION".to_string(), self.region.clone());
        env.insert(
            "PULUMI_ACCESS_TOKEN".to_string(),
            self.access_token.clone(),
        );
        env
    }
}

impl fmt::Debug for DeploymentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentConfig")
            .field("organization", &self.organization)
            .field("region", &self.region)
            .field("access_token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("pulumi_binary", &self.pulumi_binary)
            .field("git_binary", &self.git_binary)
            .field("work_root", &self.work_root)
            .field("catalog_tag_name", &self.catalog_tag_name)
            .field("catalog_tag_value", &self.catalog_tag_value)
            .field("branch_failure_policy", &self.branch_failure_policy)
            .field("tag_failure_policy", &self.tag_failure_policy)
            .finish()
    }
}
