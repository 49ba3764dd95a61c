//! Configuration for the layout pipeline.
//!
//! Every knob the pipeline reads lives here, grouped by stage. All groups
//! default to the parameters the atlas has always been rendered with, so
//! `AtlasConfig::default()` reproduces the reference layouts.
//!
//! Configurations are validated once, when a [`LayoutService`] is built;
//! the stages themselves assume a valid config.
//!
//! [`LayoutService`]: crate::service::LayoutService

use serde::{Deserialize, Serialize};

use crate::align::AlignmentMode;
use crate::model::PerSpace;
use crate::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    pub graph: GraphConfig,
    pub force: ForceConfig,
    pub manifold: ManifoldConfig,
    pub alignment: AlignmentConfig,
    pub drift: DriftConfig,
    pub distortion: DistortionConfig,
    /// Human-readable names of the two spaces, echoed in artifact metadata.
    pub space_labels: SpaceLabels,
}

/// How semantic distance turns into attraction strength.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightFalloff {
    /// `1 / (d + ε)`
    #[default]
    Inverse,
    /// `1 / (d + ε)²`. Close neighbors hold tight, distant ones barely pull.
    InverseSquare,
}

/// Graph construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Neighbors kept per node in independent topology (before symmetrization).
    pub knn_k: usize,
    /// ε in the weight function. Must be positive so zero distance stays finite.
    pub weight_epsilon: f64,
    pub weight_falloff: WeightFalloff,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            knn_k: 8,
            weight_epsilon: 0.1,
            weight_falloff: WeightFalloff::Inverse,
        }
    }
}

impl GraphConfig {
    /// Edge weight for a semantic distance. Monotonically decreasing in `distance`.
    pub fn weight(&self, distance: f64) -> f64 {
        let base = distance.max(0.0) + self.weight_epsilon;
        match self.weight_falloff {
            WeightFalloff::Inverse => 1.0 / base,
            WeightFalloff::InverseSquare => 1.0 / (base * base),
        }
    }
}

/// Spring-embedder parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceConfig {
    /// Optimal node spacing; larger spreads the layout.
    pub spring_k: f64,
    /// Steps for the shared-graph layout.
    pub iterations: usize,
    /// Steps for independent k-NN layouts (identical physics for both spaces).
    pub independent_iterations: usize,
    pub seeds: PerSpace<u64>,
    /// Final coordinates are rescaled so the largest |component| equals this.
    pub scale: f64,
    /// Initial step size as a fraction of the initial layout extent.
    pub initial_temperature: f64,
    /// Stop early once the mean displacement falls below this.
    pub convergence_threshold: Option<f64>,
}

impl Default for ForceConfig {
    fn default() -> Self {
        Self {
            spring_k: 2.0,
            iterations: 150,
            independent_iterations: 200,
            seeds: PerSpace::new(42, 43),
            scale: 10.0,
            initial_temperature: 0.1,
            convergence_threshold: Some(1e-4),
        }
    }
}

/// Manifold (neighbor-embedding) reduction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifoldConfig {
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub n_epochs: usize,
    pub learning_rate: f64,
    pub negative_sample_rate: usize,
    pub seeds: PerSpace<u64>,
}

impl Default for ManifoldConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 15,
            min_dist: 0.1,
            spread: 1.0,
            n_epochs: 500,
            learning_rate: 1.0,
            negative_sample_rate: 5,
            seeds: PerSpace::new(42, 43),
        }
    }
}

/// Procrustes alignment and display framing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Permit improper orthogonal transforms (mirror images).
    pub allow_reflection: bool,
    /// Mode used when both spaces share the relationship graph.
    pub shared_mode: AlignmentMode,
    /// Mode used when each space has its own k-NN graph.
    pub independent_mode: AlignmentMode,
    /// Mode used for manifold layouts.
    pub manifold_mode: AlignmentMode,
    /// Uniform display factor applied after scale-normalizing alignment.
    pub constrained_scale: f64,
    /// Target baseline std-dev after rotation-only alignment of graph layouts.
    pub rotation_only_std: f64,
    /// Target baseline std-dev after rotation-only alignment of manifold layouts.
    pub manifold_std: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            allow_reflection: true,
            shared_mode: AlignmentMode::ScaleNormalizing,
            independent_mode: AlignmentMode::RotationOnly,
            manifold_mode: AlignmentMode::RotationOnly,
            constrained_scale: 50.0,
            rotation_only_std: 5.0,
            manifold_std: 3.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Multiplier on the aligned drift vector for the amplified coordinate.
    pub amplification: f64,
    pub compute_hulls: bool,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self { amplification: 3.0, compute_hulls: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistortionConfig {
    pub low_percentile: f64,
    pub high_percentile: f64,
    /// Below this many neighbors, tiers fall back to rank order.
    pub min_neighbors: usize,
    /// Size of the spatial-neighbor query.
    pub spatial_k: usize,
}

impl Default for DistortionConfig {
    fn default() -> Self {
        Self {
            low_percentile: 50.0,
            high_percentile: 80.0,
            min_neighbors: 3,
            spatial_k: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceLabels {
    pub baseline: String,
    pub comparison: String,
}

impl Default for SpaceLabels {
    fn default() -> Self {
        Self {
            baseline: "MiniLM-L6-v2".into(),
            comparison: "Qwen2.5-14B".into(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl AtlasConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ATLAS_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| Error::Configuration(format!("{key}: cannot parse {raw:?}")))
        }

        if let Some(raw) = lookup("ATLAS_KNN_K") {
            self.graph.knn_k = parse("ATLAS_KNN_K", raw)?;
        }
        if let Some(raw) = lookup("ATLAS_SPRING_K") {
            self.force.spring_k = parse("ATLAS_SPRING_K", raw)?;
        }
        if let Some(raw) = lookup("ATLAS_AMPLIFICATION") {
            self.drift.amplification = parse("ATLAS_AMPLIFICATION", raw)?;
        }
        if let Some(raw) = lookup("ATLAS_MANIFOLD_NEIGHBORS") {
            self.manifold.n_neighbors = parse("ATLAS_MANIFOLD_NEIGHBORS", raw)?;
        }
        if let Some(raw) = lookup("ATLAS_SPATIAL_K") {
            self.distortion.spatial_k = parse("ATLAS_SPATIAL_K", raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject parameter values no stage can run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| -> Result<()> { Err(Error::Configuration(msg.to_string())) };

        if self.graph.knn_k == 0 {
            return fail("graph.knn_k must be at least 1");
        }
        if !(self.graph.weight_epsilon.is_finite() && self.graph.weight_epsilon > 0.0) {
            return fail("graph.weight_epsilon must be finite and positive");
        }
        if !(self.force.spring_k.is_finite() && self.force.spring_k > 0.0) {
            return fail("force.spring_k must be finite and positive");
        }
        if self.force.iterations == 0 || self.force.independent_iterations == 0 {
            return fail("force iterations must be at least 1");
        }
        if !(self.force.scale.is_finite() && self.force.scale > 0.0) {
            return fail("force.scale must be finite and positive");
        }
        if !(self.force.initial_temperature.is_finite() && self.force.initial_temperature > 0.0) {
            return fail("force.initial_temperature must be finite and positive");
        }
        if self.manifold.n_neighbors < 2 {
            return fail("manifold.n_neighbors must be at least 2");
        }
        if !(self.manifold.min_dist.is_finite() && self.manifold.min_dist >= 0.0) {
            return fail("manifold.min_dist must be finite and non-negative");
        }
        if !(self.manifold.spread.is_finite() && self.manifold.spread > self.manifold.min_dist) {
            return fail("manifold.spread must be finite and greater than min_dist");
        }
        if self.manifold.n_epochs == 0 {
            return fail("manifold.n_epochs must be at least 1");
        }
        if !(self.manifold.learning_rate.is_finite() && self.manifold.learning_rate > 0.0) {
            return fail("manifold.learning_rate must be finite and positive");
        }
        for (name, value) in [
            ("alignment.constrained_scale", self.alignment.constrained_scale),
            ("alignment.rotation_only_std", self.alignment.rotation_only_std),
            ("alignment.manifold_std", self.alignment.manifold_std),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Configuration(format!("{name} must be finite and positive")));
            }
        }
        if !self.drift.amplification.is_finite() {
            return fail("drift.amplification must be finite");
        }
        let d = &self.distortion;
        if !(0.0..=100.0).contains(&d.low_percentile)
            || !(0.0..=100.0).contains(&d.high_percentile)
            || d.low_percentile > d.high_percentile
        {
            return fail("distortion percentiles must satisfy 0 <= low <= high <= 100");
        }
        if d.spatial_k == 0 {
            return fail("distortion.spatial_k must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(AtlasConfig::default().validate().is_ok());
    }

    #[test]
    fn test_weight_monotonic_decreasing() {
        for falloff in [WeightFalloff::Inverse, WeightFalloff::InverseSquare] {
            let cfg = GraphConfig { weight_falloff: falloff, ..GraphConfig::default() };
            let mut last = f64::INFINITY;
            for step in 0..40 {
                let w = cfg.weight(step as f64 * 0.05);
                assert!(w < last, "{falloff:?} not decreasing at step {step}");
                last = w;
            }
        }
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = AtlasConfig::from_json_str(r#"{"graph": {"knn_k": 4}, "drift": {"amplification": 1.5}}"#).unwrap();
        assert_eq!(cfg.graph.knn_k, 4);
        assert_eq!(cfg.graph.weight_epsilon, 0.1);
        assert_eq!(cfg.drift.amplification, 1.5);
        assert_eq!(cfg.force.spring_k, 2.0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut cfg = AtlasConfig::default();
        cfg.distortion.low_percentile = 90.0;
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));

        let mut cfg = AtlasConfig::default();
        cfg.drift.amplification = f64::NAN;
        assert!(cfg.validate().is_err());

        assert!(AtlasConfig::from_json_str(r#"{"graph": {"knn_k": 0}}"#).is_err());
    }

    #[test]
    fn test_overrides() {
        let cfg = AtlasConfig::default()
            .with_overrides(|key| match key {
                "ATLAS_KNN_K" => Some("12".into()),
                "ATLAS_AMPLIFICATION" => Some(" 2.5 ".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(cfg.graph.knn_k, 12);
        assert_eq!(cfg.drift.amplification, 2.5);

        let bad = AtlasConfig::default().with_overrides(|key| {
            (key == "ATLAS_SPATIAL_K").then(|| "many".to_string())
        });
        assert!(matches!(bad, Err(Error::Configuration(_))));
    }
}
