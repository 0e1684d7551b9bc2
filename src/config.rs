//! Loop-closure registration configuration.
//!
//! Loaded from YAML. Every field has a default, so a config file only needs
//! to list what differs:
//!
//! ```yaml
//! layers:
//!   places:
//!     use_pairwise_registration: false
//!     log_registration_problem: true
//!     registration_output_path: /tmp/lcd
//!     estimator:
//!       noise_bound: 0.2
//! agent:
//!   enabled: true
//!   request_timeout_ms: 2000
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::scene_graph::LayerId;

/// Parameters of the robust correspondence-free estimator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RobustSolverParams {
    /// Maximum position noise of a true correspondence (m).
    pub noise_bound: f64,
    /// Largest rotation accepted as a solution (rad).
    pub max_rotation_rad: f64,
    /// Largest translation norm accepted as a solution (m).
    pub max_translation: f64,
    /// Minimum number of inlier correspondences for a valid solution.
    pub min_inliers: usize,
    /// Inlier residual threshold as a multiple of `noise_bound`.
    pub inlier_factor: f64,
}

impl Default for RobustSolverParams {
    fn default() -> Self {
        Self {
            noise_bound: 0.1,
            max_rotation_rad: std::f64::consts::PI,
            max_translation: 1000.0,
            min_inliers: 3,
            inlier_factor: 1.0,
        }
    }
}

/// Per-layer registration settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LayerRegistrationConfig {
    /// Pair every source node with every destination node (true), or only
    /// nodes sharing a semantic label (false).
    pub use_pairwise_registration: bool,
    /// Write a diagnostic record for every attempt.
    pub log_registration_problem: bool,
    /// Directory receiving diagnostic records.
    pub registration_output_path: PathBuf,
    /// Cap on candidate correspondences handed to the estimator.
    pub max_correspondences: usize,
    pub estimator: RobustSolverParams,
}

impl Default for LayerRegistrationConfig {
    fn default() -> Self {
        Self {
            use_pairwise_registration: true,
            log_registration_problem: false,
            registration_output_path: PathBuf::from("."),
            max_correspondences: 2000,
            estimator: RobustSolverParams::default(),
        }
    }
}

/// Agent (keyframe) solver settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentSolverConfig {
    pub enabled: bool,
    /// Upper bound on a single frame-registration request.
    pub request_timeout_ms: u64,
}

impl AgentSolverConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for AgentSolverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            request_timeout_ms: 5000,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LcdConfig {
    /// Layer solvers to build, keyed by layer.
    pub layers: BTreeMap<LayerId, LayerRegistrationConfig>,
    pub agent: AgentSolverConfig,
}

impl Default for LcdConfig {
    fn default() -> Self {
        let mut layers = BTreeMap::new();
        layers.insert(LayerId::Places, LayerRegistrationConfig::default());
        Self {
            layers,
            agent: AgentSolverConfig::default(),
        }
    }
}

impl LcdConfig {
    /// Load and validate a YAML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let config: LcdConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: LcdConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.layers.contains_key(&LayerId::Agents) {
            bail!("the agents layer is registered by the agent solver; configure it under `agent`");
        }

        for (layer, config) in &self.layers {
            let params = &config.estimator;
            if !(params.noise_bound > 0.0) {
                bail!("{}: noise_bound must be positive, got {}", layer, params.noise_bound);
            }
            if !(params.inlier_factor > 0.0) {
                bail!("{}: inlier_factor must be positive, got {}", layer, params.inlier_factor);
            }
            if params.max_rotation_rad < 0.0 || params.max_translation < 0.0 {
                bail!("{}: rotation/translation bounds must be non-negative", layer);
            }
            if params.min_inliers < 3 {
                bail!("{}: min_inliers must be at least 3, got {}", layer, params.min_inliers);
            }
            if config.max_correspondences < params.min_inliers {
                bail!(
                    "{}: max_correspondences ({}) is below min_inliers ({})",
                    layer,
                    config.max_correspondences,
                    params.min_inliers
                );
            }
        }

        if self.agent.enabled && self.agent.request_timeout_ms == 0 {
            bail!("agent.request_timeout_ms must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LcdConfig::default();
        let places = &config.layers[&LayerId::Places];

        assert!(places.use_pairwise_registration);
        assert!(!places.log_registration_problem);
        assert_eq!(places.estimator.min_inliers, 3);
        assert!(!config.agent.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_falls_back_to_defaults() {
        let yaml = r#"
layers:
  places:
    use_pairwise_registration: false
    estimator:
      noise_bound: 0.25
  objects:
    log_registration_problem: true
agent:
  enabled: true
"#;
        let config = LcdConfig::from_yaml_str(yaml).unwrap();

        let places = &config.layers[&LayerId::Places];
        assert!(!places.use_pairwise_registration);
        assert_eq!(places.estimator.noise_bound, 0.25);
        assert_eq!(places.estimator.min_inliers, 3);

        let objects = &config.layers[&LayerId::Objects];
        assert!(objects.log_registration_problem);
        assert!(objects.use_pairwise_registration);

        assert!(config.agent.enabled);
        assert_eq!(config.agent.request_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_invalid_noise_bound_rejected() {
        let yaml = "layers:\n  places:\n    estimator:\n      noise_bound: 0.0\n";
        assert!(LcdConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_agents_layer_rejected() {
        let yaml = "layers:\n  agents: {}\n";
        assert!(LcdConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "agent:\n  request_timeout_ms: 250").unwrap();

        let config = LcdConfig::load(file.path()).unwrap();
        assert_eq!(config.agent.request_timeout_ms, 250);
        assert!(config.layers.contains_key(&LayerId::Places));
    }

    #[test]
    fn test_load_missing_file() {
        let err = LcdConfig::load("/nonexistent/lcd.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to open"));
    }
}
