//! Sensitivity-driven occupancy heuristic.
//!
//! Each cell is judged by an ordered list of named rules; the first rule that
//! returns a verdict wins, then the rejection checks may downgrade an
//! occupied verdict back to empty.

use crate::config::{ClassifierTuning, Sensitivity};
use crate::detection::classifier::features::CellFeatures;
use crate::detection::classifier::{CellDetector, CellReading, Occupancy};
use crate::detection::warp::CanonicalBoard;

/// Per-cell thresholds derived from the sensitivity knobs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub light_delta: f32,
    pub light_min_std: f32,
    pub dark_delta: f32,
    pub dark_min_std: f32,
    pub edge_count: f32,
    /// Multiplier applied for busy square textures (1.0 = none)
    pub boost: f32,
}

impl Thresholds {
    pub fn derive(
        sensitivity: &Sensitivity,
        tuning: &ClassifierTuning,
        bg_std: f32,
        inner_area: u32,
    ) -> Self {
        // higher sensitivity, lower bar
        let scale = |factor: f32| (1.5 - factor).max(0.25);

        let boost = if bg_std > tuning.busy_background_std && tuning.busy_background_span > 0.0 {
            let ramp = ((bg_std - tuning.busy_background_std) / tuning.busy_background_span).min(1.0);
            1.0 + ramp * tuning.busy_boost_max
        } else {
            1.0
        };

        let light = scale(sensitivity.light_factor());
        let dark = scale(sensitivity.dark_factor());

        Self {
            light_delta: tuning.light_delta_base * light * boost,
            light_min_std: tuning.light_min_std_base * light * boost,
            dark_delta: tuning.dark_delta_base * dark * boost,
            dark_min_std: tuning.dark_min_std_base * dark * boost,
            // higher empty sensitivity needs more edges before calling a piece
            edge_count: inner_area as f32
                * tuning.edge_ratio_base
                * (0.5 + sensitivity.empty_factor())
                * boost,
            boost,
        }
    }
}

type Verdict = fn(&CellFeatures, &Thresholds, &ClassifierTuning) -> Option<Occupancy>;
type Rejection = fn(&CellFeatures, &Thresholds, &ClassifierTuning, Occupancy) -> bool;

pub struct Rule {
    pub name: &'static str,
    pub verdict: Verdict,
}

pub struct RejectionRule {
    pub name: &'static str,
    pub rejects: Rejection,
}

/// Evaluated top to bottom, first verdict wins
pub const RULES: [Rule; 3] = [
    Rule {
        name: "edge_dense",
        verdict: edge_dense,
    },
    Rule {
        name: "bright_texture",
        verdict: bright_texture,
    },
    Rule {
        name: "dark_texture",
        verdict: dark_texture,
    },
];

pub const REJECTIONS: [RejectionRule; 2] = [
    RejectionRule {
        name: "flat_noise",
        rejects: flat_noise,
    },
    RejectionRule {
        name: "false_light",
        rejects: false_light,
    },
];

/// Small, low-edge, high-brightness artifact such as a reflection or marker
pub fn is_small_bright_spot(f: &CellFeatures, t: &Thresholds, tuning: &ClassifierTuning) -> bool {
    f.bright_ratio > 0.0
        && f.bright_ratio < tuning.spot_max_bright_ratio
        && (f.edge_count as f32) < t.edge_count * tuning.spot_edge_factor
        && f.delta() > 0.0
}

pub fn edge_dense(f: &CellFeatures, t: &Thresholds, tuning: &ClassifierTuning) -> Option<Occupancy> {
    if (f.edge_count as f32) < t.edge_count || is_small_bright_spot(f, t, tuning) {
        return None;
    }
    if f.delta() > 0.0 || f.mean > tuning.brightness_threshold {
        Some(Occupancy::Light)
    } else {
        Some(Occupancy::Dark)
    }
}

pub fn bright_texture(
    f: &CellFeatures,
    t: &Thresholds,
    tuning: &ClassifierTuning,
) -> Option<Occupancy> {
    let bright = f.delta() > t.light_delta || f.mean > tuning.very_bright;
    let textured = f.std >= t.light_min_std && f.std <= tuning.max_piece_std;
    (bright && textured).then_some(Occupancy::Light)
}

pub fn dark_texture(f: &CellFeatures, t: &Thresholds, _tuning: &ClassifierTuning) -> Option<Occupancy> {
    (f.delta() < -t.dark_delta && f.std > t.dark_min_std).then_some(Occupancy::Dark)
}

pub fn flat_noise(
    f: &CellFeatures,
    t: &Thresholds,
    tuning: &ClassifierTuning,
    verdict: Occupancy,
) -> bool {
    verdict.is_occupied()
        && f.std < tuning.noise_std
        && (f.edge_count as f32) < t.edge_count * tuning.noise_edge_factor
}

pub fn false_light(
    f: &CellFeatures,
    t: &Thresholds,
    tuning: &ClassifierTuning,
    verdict: Occupancy,
) -> bool {
    verdict == Occupancy::Light
        && f.bright_ratio < tuning.false_light_bright_ratio
        && f.std < t.light_min_std
}

/// Run the rules and rejections; returns the verdict and the deciding rule's name
pub fn evaluate(
    f: &CellFeatures,
    t: &Thresholds,
    tuning: &ClassifierTuning,
) -> (Occupancy, &'static str) {
    let (verdict, rule) = RULES
        .iter()
        .find_map(|r| (r.verdict)(f, t, tuning).map(|v| (v, r.name)))
        .unwrap_or((Occupancy::Empty, "no_evidence"));

    match REJECTIONS.iter().find(|r| (r.rejects)(f, t, tuning, verdict)) {
        Some(rejection) => (Occupancy::Empty, rejection.name),
        None => (verdict, rule),
    }
}

/// Default detector: adaptive thresholds from the sensitivity knobs
#[derive(Debug, Clone)]
pub struct AdaptiveDetector {
    pub sensitivity: Sensitivity,
    pub tuning: ClassifierTuning,
}

impl AdaptiveDetector {
    pub fn new(sensitivity: Sensitivity, tuning: ClassifierTuning) -> Self {
        Self { sensitivity, tuning }
    }
}

impl CellDetector for AdaptiveDetector {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn detect(&self, board: &CanonicalBoard, row: u8, col: u8) -> CellReading {
        let features = CellFeatures::measure(board, row, col, &self.tuning);
        let thresholds =
            Thresholds::derive(&self.sensitivity, &self.tuning, features.bg_std, features.inner_area);
        let (occupancy, rule) = evaluate(&features, &thresholds, &self.tuning);
        CellReading {
            row,
            col,
            occupancy,
            features,
            rule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(mean: f32, std: f32, bg_mean: f32, edge_count: u32, bright_ratio: f32) -> CellFeatures {
        CellFeatures {
            mean,
            std,
            bg_mean,
            bg_std: 2.0,
            edge_count,
            inner_area: 2500,
            bright_ratio,
        }
    }

    fn defaults() -> (Thresholds, ClassifierTuning) {
        let tuning = ClassifierTuning::default();
        let t = Thresholds::derive(&Sensitivity::default(), &tuning, 2.0, 2500);
        (t, tuning)
    }

    #[test]
    fn default_thresholds() {
        let (t, _) = defaults();
        assert_eq!(t.boost, 1.0);
        assert!((t.light_delta - 25.0).abs() < 1e-4);
        assert!((t.dark_delta - 25.0).abs() < 1e-4);
        assert!((t.edge_count - 50.0).abs() < 1e-4);
    }

    #[test]
    fn higher_sensitivity_lowers_thresholds() {
        let tuning = ClassifierTuning::default();
        let low = Thresholds::derive(&Sensitivity { light: 20, dark: 20, empty: 50 }, &tuning, 0.0, 2500);
        let high = Thresholds::derive(&Sensitivity { light: 90, dark: 90, empty: 50 }, &tuning, 0.0, 2500);
        assert!(high.light_delta < low.light_delta);
        assert!(high.dark_min_std < low.dark_min_std);
        // far above 100 stays positive
        let extreme = Thresholds::derive(&Sensitivity { light: 400, dark: 400, empty: 400 }, &tuning, 0.0, 2500);
        assert!(extreme.light_delta > 0.0 && extreme.dark_delta > 0.0);
    }

    #[test]
    fn busy_background_boosts_thresholds() {
        let tuning = ClassifierTuning::default();
        let calm = Thresholds::derive(&Sensitivity::default(), &tuning, 2.0, 2500);
        let busy = Thresholds::derive(&Sensitivity::default(), &tuning, 40.0, 2500);
        assert!(busy.boost > 1.0);
        assert!(busy.edge_count > calm.edge_count);
        assert!(busy.light_delta > calm.light_delta);
    }

    #[test]
    fn edge_dense_cell_takes_colour_from_delta() {
        let (t, tuning) = defaults();
        assert_eq!(evaluate(&features(200.0, 40.0, 150.0, 150, 0.6), &t, &tuning), (Occupancy::Light, "edge_dense"));
        assert_eq!(evaluate(&features(60.0, 40.0, 150.0, 150, 0.0), &t, &tuning), (Occupancy::Dark, "edge_dense"));
        // darker than its square but absolutely very bright still reads light
        assert_eq!(evaluate(&features(190.0, 40.0, 200.0, 150, 0.3), &t, &tuning).0, Occupancy::Light);
    }

    #[test]
    fn brightness_rules_without_edges() {
        let (t, tuning) = defaults();
        assert_eq!(evaluate(&features(200.0, 30.0, 150.0, 10, 0.4), &t, &tuning), (Occupancy::Light, "bright_texture"));
        assert_eq!(evaluate(&features(90.0, 30.0, 150.0, 10, 0.0), &t, &tuning), (Occupancy::Dark, "dark_texture"));
        // bright but implausibly textured
        assert_eq!(evaluate(&features(200.0, 120.0, 150.0, 10, 0.4), &t, &tuning).0, Occupancy::Empty);
    }

    #[test]
    fn uniform_cell_is_empty() {
        let (t, tuning) = defaults();
        assert_eq!(evaluate(&features(150.0, 1.0, 150.0, 0, 0.0), &t, &tuning), (Occupancy::Empty, "no_evidence"));
    }

    #[test]
    fn small_bright_spot_is_not_edge_evidence() {
        let (t, tuning) = defaults();
        let spot = features(160.0, 6.0, 150.0, 60, 0.05);
        assert!(is_small_bright_spot(&spot, &t, &tuning));
        assert_eq!(evaluate(&spot, &t, &tuning).0, Occupancy::Empty);
    }

    #[test]
    fn rejections_downgrade_to_empty() {
        let (t, tuning) = defaults();
        // very bright and flat: only passes bright_texture once the std floor is gone
        let no_std_floor = Thresholds { light_min_std: 0.0, ..t };
        let flat = features(240.0, 2.0, 238.0, 0, 1.0);
        assert_eq!(evaluate(&flat, &no_std_floor, &tuning), (Occupancy::Empty, "flat_noise"));

        // edge-dense and brighter than its square, yet no bright pixels and little texture
        let dim_light = features(200.0, 5.0, 150.0, 60, 0.0);
        assert_eq!(evaluate(&dim_light, &t, &tuning), (Occupancy::Empty, "false_light"));
    }
}
