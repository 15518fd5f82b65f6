//! Runtime server configuration, deserialised from `config.toml` and
//! `VIGIL_*` environment variables.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::Deserialize;
use vigil_core::{policy::LaborBounds, scoring::ScoreWeights};
use vigil_pipeline::PipelineConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                   String,
  pub port:                   u16,
  pub store_path:             PathBuf,
  /// Argon2 PHC string for the trigger's bearer secret. Generate with
  /// `vigil-server --hash-token`.
  pub trigger_token_hash:     String,
  pub tenant_timeout_secs:    u64,
  pub max_concurrent_tenants: usize,
  pub policy_cache_ttl_secs:  i64,
  pub labor_bounds:           LaborBounds,
  pub score_weights:          ScoreWeights,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                   "127.0.0.1".to_string(),
      port:                   8080,
      store_path:             PathBuf::from("vigil.db"),
      trigger_token_hash:     String::new(),
      tenant_timeout_secs:    300,
      max_concurrent_tenants: 8,
      policy_cache_ttl_secs:  300,
      labor_bounds:           LaborBounds::default(),
      score_weights:          ScoreWeights::default(),
    }
  }
}

impl ServerConfig {
  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      tenant_timeout:         Duration::from_secs(self.tenant_timeout_secs),
      max_concurrent_tenants: self.max_concurrent_tenants.max(1),
      labor_bounds:           self.labor_bounds.clone(),
      score_weights:          self.score_weights.clone(),
    }
  }

  pub fn policy_cache_ttl(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.policy_cache_ttl_secs)
  }

  /// `store_path` with a leading `~` expanded.
  pub fn resolved_store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_source_yields_defaults() {
    let cfg: ServerConfig = config::Config::builder()
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.pipeline_config().max_concurrent_tenants, 8);
    assert_eq!(cfg.pipeline_config().tenant_timeout, Duration::from_secs(300));
  }

  #[test]
  fn nested_tables_override_piecewise() {
    let toml = r#"
      port = 9000
      max_concurrent_tenants = 2

      [labor_bounds]
      max_labor_pct = 45.0

      [score_weights]
      max_score = 50.0
    "#;
    let cfg: ServerConfig = config::Config::builder()
      .add_source(config::File::from_str(toml, config::FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();
    assert_eq!(cfg.port, 9000);
    assert_eq!(cfg.labor_bounds.max_labor_pct, 45.0);
    assert_eq!(cfg.labor_bounds.max_ot_pct, LaborBounds::default().max_ot_pct);
    assert_eq!(cfg.score_weights.max_score, 50.0);
    assert_eq!(cfg.pipeline_config().max_concurrent_tenants, 2);
  }

  #[test]
  fn tilde_is_expanded_only_at_the_start() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(
      expand_tilde(Path::new("~/vigil.db")),
      PathBuf::from(home).join("vigil.db")
    );
    assert_eq!(expand_tilde(Path::new("/srv/~/x.db")), PathBuf::from("/srv/~/x.db"));
  }
}
