use serde::{Deserialize, Serialize};

use crate::error::{PlanError, PlanResult};

/// Planner configuration section (`[planner]` in meridian.toml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Query timeout recorded on every top-level route when the statement
    /// carries no QUERY_TIMEOUT_MS directive (0 = no timeout).
    pub default_query_timeout_ms: u64,
    /// When false, any plan that would fan out to every shard is rejected.
    pub allow_scatter: bool,
    /// Bind variable that carries the row bound pushed beneath a gateway LIMIT.
    #[serde(default = "default_upper_limit_bind_var")]
    pub upper_limit_bind_var: String,
}

fn default_upper_limit_bind_var() -> String {
    "__upper_limit".to_string()
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_query_timeout_ms: 0,
            allow_scatter: true,
            upper_limit_bind_var: default_upper_limit_bind_var(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    planner: PlannerConfig,
}

impl PlannerConfig {
    /// Parse the `[planner]` section of a TOML document. Missing keys take
    /// their defaults; a missing section yields the default config.
    pub fn from_toml_str(content: &str) -> PlanResult<Self> {
        let file: ConfigFile = toml::from_str(content)
            .map_err(|e| PlanError::InvalidArgument(format!("invalid planner config: {e}")))?;
        Ok(file.planner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = PlannerConfig::default();
        assert!(cfg.allow_scatter);
        assert_eq!(cfg.default_query_timeout_ms, 0);
        assert_eq!(cfg.upper_limit_bind_var, "__upper_limit");
    }

    #[test]
    fn test_from_toml_partial_section() {
        let cfg = PlannerConfig::from_toml_str(
            "[planner]\ndefault_query_timeout_ms = 2500\nallow_scatter = false\n",
        )
        .unwrap();
        assert_eq!(cfg.default_query_timeout_ms, 2500);
        assert!(!cfg.allow_scatter);
        assert_eq!(cfg.upper_limit_bind_var, "__upper_limit");
    }

    #[test]
    fn test_from_toml_missing_section() {
        let cfg = PlannerConfig::from_toml_str("[server]\nnode_id = 1\n").unwrap();
        assert_eq!(cfg, PlannerConfig::default());
    }

    #[test]
    fn test_from_toml_rejects_bad_types() {
        let err = PlannerConfig::from_toml_str("[planner]\nallow_scatter = \"yes\"\n").unwrap_err();
        assert!(matches!(err, PlanError::InvalidArgument(_)));
    }
}
