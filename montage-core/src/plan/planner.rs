use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::{debug, info};

use super::models::{ClipPlan, MontageRequest, PlanWindow, VariationPlan};
use super::PlanResult;

/// Safety valve for the spacing-rejection loops: candidates that keep
/// landing within one interval of accepted starts would otherwise spin
/// forever on short sources.
const BACKFILL_ATTEMPT_MULTIPLIER: usize = 20;

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Pool over-provisioning relative to the target clip count.
    /// Extraction is unreliable, so the pool carries spares.
    pub backfill_factor: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            backfill_factor: 2.5,
        }
    }
}

/// Computes clip start times for every variation of a montage request.
///
/// Pure given its inputs: the same `seed` always yields the same plans,
/// and each variation derives its own sub-seed so repeated planning is
/// reproducible while variations stay distinct.
#[derive(Debug, Clone, Default)]
pub struct TimelinePlanner {
    config: PlannerConfig,
}

impl TimelinePlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn plan(
        &self,
        source_index: usize,
        source_duration: f64,
        request: &MontageRequest,
        seed: u64,
    ) -> PlanResult<Vec<VariationPlan>> {
        if request.variation_count == 0 {
            return Err(super::PlanError::InvalidConfig(
                "variation count must be at least 1".into(),
            ));
        }
        let target = request.target_clip_count()?;
        let window = PlanWindow::for_request(source_duration, request)?;
        let pool_target = (target as f64 * self.config.backfill_factor).ceil() as usize;

        let mut variations = Vec::with_capacity(request.variation_count);
        for variation_index in 0..request.variation_count {
            let variation_seed = derive_variation_seed(seed, variation_index);
            let mut rng = ChaCha20Rng::seed_from_u64(variation_seed);
            let starts = if request.linear_mode {
                self.linear_starts(&window, target, pool_target, variation_index, &mut rng)
            } else {
                self.random_starts(&window, target, pool_target, &mut rng)
            };
            debug!(
                target: "planner",
                variation = variation_index,
                pool = starts.len(),
                "candidate pool computed"
            );
            let clips = starts
                .into_iter()
                .map(|start_seconds| ClipPlan {
                    source_index,
                    start_seconds,
                    duration_seconds: window.clip_interval,
                })
                .collect();
            variations.push(VariationPlan {
                variation_index,
                clips,
            });
        }

        info!(
            target: "planner",
            variations = variations.len(),
            target,
            pool_target,
            linear = request.linear_mode,
            "timeline planned"
        );
        Ok(variations)
    }

    /// Linear mode: one clip per equal segment of the usable range, with
    /// uniform jitter inside the segment. The whole segmentation is phase
    /// shifted per variation so each one samples the source differently.
    fn linear_starts(
        &self,
        window: &PlanWindow,
        target: usize,
        pool_target: usize,
        variation_index: usize,
        rng: &mut ChaCha20Rng,
    ) -> Vec<f64> {
        let segment = window.usable_duration / target as f64;
        let offset = (variation_index as f64 * segment) % window.usable_duration;

        let mut starts = Vec::with_capacity(pool_target);
        for clip_index in 0..target {
            let segment_start = window.start_cut + offset + clip_index as f64 * segment;
            let segment_end = segment_start + segment - window.clip_interval;
            let safe_end = segment_end.min(window.max_start());
            let safe_start = segment_start.min(safe_end);
            let start = if safe_end > safe_start {
                rng.gen_range(safe_start..safe_end)
            } else {
                // Segment narrower than one clip: clamp to its start.
                safe_start
            };
            starts.push(window.clamp_start(start));
        }
        starts.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        self.fill_spaced_candidates(window, pool_target, &mut starts, rng);
        starts
    }

    /// Random mode: a strided candidate pool shuffled per variation.
    /// Shuffle order is preserved so the montage plays out of sequence.
    fn random_starts(
        &self,
        window: &PlanWindow,
        target: usize,
        pool_target: usize,
        rng: &mut ChaCha20Rng,
    ) -> Vec<f64> {
        let stride = (window.spread() / (target as f64 * 2.0)).floor().max(1.0);
        let mut positions = Vec::new();
        let mut position = window.start_cut;
        while position <= window.max_start() {
            positions.push(position);
            position += stride;
        }
        positions.shuffle(rng);
        positions.truncate(pool_target);

        self.fill_spaced_candidates(window, pool_target, &mut positions, rng);
        positions
    }

    /// Tops a pool up to `pool_target` with random window-constrained
    /// candidates, rejecting any start within one clip interval of an
    /// already-accepted start. Bounded so degenerate windows terminate.
    fn fill_spaced_candidates(
        &self,
        window: &PlanWindow,
        pool_target: usize,
        starts: &mut Vec<f64>,
        rng: &mut ChaCha20Rng,
    ) {
        let mut attempts = 0;
        let max_attempts = pool_target * BACKFILL_ATTEMPT_MULTIPLIER;
        while starts.len() < pool_target && attempts < max_attempts {
            attempts += 1;
            let candidate = window.clamp_start(window.start_cut + rng.gen::<f64>() * window.spread());
            let spaced = starts
                .iter()
                .all(|existing| (existing - candidate).abs() >= window.clip_interval);
            if spaced {
                starts.push(candidate);
            }
        }
    }
}

/// Derives a reproducible per-variation seed from the request seed.
fn derive_variation_seed(seed: u64, variation_index: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    variation_index.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanError;

    fn request() -> MontageRequest {
        MontageRequest {
            sources: vec!["https://example.com/video.mp4".into()],
            ..MontageRequest::default()
        }
    }

    #[test]
    fn plan_is_deterministic_for_a_seed() {
        let planner = TimelinePlanner::default();
        let request = MontageRequest {
            clip_interval_seconds: 1.0,
            montage_length_seconds: 10.0,
            start_cut_seconds: 0.0,
            end_cut_seconds: 0.0,
            linear_mode: true,
            variation_count: 3,
            ..request()
        };
        let first = planner.plan(0, 600.0, &request, 7).unwrap();
        let second = planner.plan(0, 600.0, &request, 7).unwrap();
        assert_eq!(first, second);

        let other_seed = planner.plan(0, 600.0, &request, 8).unwrap();
        assert_ne!(first, other_seed);
    }

    #[test]
    fn variations_are_distinct() {
        let planner = TimelinePlanner::default();
        let request = MontageRequest {
            clip_interval_seconds: 2.0,
            montage_length_seconds: 20.0,
            end_cut_seconds: 0.0,
            variation_count: 2,
            ..request()
        };
        let plans = planner.plan(0, 900.0, &request, 42).unwrap();
        let starts = |v: &VariationPlan| -> Vec<f64> {
            v.clips.iter().map(|c| c.start_seconds).collect()
        };
        assert_ne!(starts(&plans[0]), starts(&plans[1]));
    }

    #[test]
    fn planned_clips_stay_inside_the_window() {
        let planner = TimelinePlanner::default();
        let request = MontageRequest {
            clip_interval_seconds: 2.0,
            montage_length_seconds: 20.0,
            start_cut_seconds: 10.0,
            end_cut_seconds: 50.0,
            variation_count: 1,
            ..request()
        };
        let plans = planner.plan(0, 300.0, &request, 1).unwrap();
        let clips = &plans[0].clips;
        // target = 10 base clips, pool over-provisioned to 25
        assert!(clips.len() >= 10);
        assert_eq!(clips.len(), 25);
        for clip in clips {
            assert!(clip.start_seconds >= 10.0);
            assert!(clip.start_seconds + clip.duration_seconds <= 250.0 + 1e-9);
        }
        // base picks come out chronologically ordered
        let base: Vec<f64> = clips.iter().take(10).map(|c| c.start_seconds).collect();
        let mut sorted = base.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(base, sorted);
    }

    #[test]
    fn backfill_candidates_keep_spacing() {
        let planner = TimelinePlanner::default();
        let request = MontageRequest {
            clip_interval_seconds: 2.0,
            montage_length_seconds: 20.0,
            start_cut_seconds: 10.0,
            end_cut_seconds: 50.0,
            variation_count: 1,
            ..request()
        };
        let plans = planner.plan(0, 300.0, &request, 5).unwrap();
        let clips = &plans[0].clips;
        // Extras beyond the base count were spacing-checked against every
        // earlier accepted start.
        for (index, clip) in clips.iter().enumerate().skip(10) {
            for earlier in &clips[..index] {
                assert!(
                    (earlier.start_seconds - clip.start_seconds).abs() >= 2.0,
                    "backfill candidate too close to an accepted start"
                );
            }
        }
    }

    #[test]
    fn random_mode_preserves_shuffle_order() {
        let planner = TimelinePlanner::default();
        let request = MontageRequest {
            clip_interval_seconds: 2.0,
            montage_length_seconds: 20.0,
            end_cut_seconds: 0.0,
            linear_mode: false,
            variation_count: 1,
            ..request()
        };
        let plans = planner.plan(0, 600.0, &request, 3).unwrap();
        let starts: Vec<f64> = plans[0].clips.iter().map(|c| c.start_seconds).collect();
        let mut sorted = starts.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_ne!(starts, sorted, "random mode must not be chronological");
        for start in &starts {
            assert!(*start >= 0.0 && *start + 2.0 <= 600.0 + 1e-9);
        }
    }

    #[test]
    fn short_usable_range_degenerates_to_start_cut() {
        let planner = TimelinePlanner::default();
        let request = MontageRequest {
            clip_interval_seconds: 10.0,
            montage_length_seconds: 10.0,
            start_cut_seconds: 1.0,
            end_cut_seconds: 0.0,
            variation_count: 1,
            ..request()
        };
        // usable = 5s, shorter than one 10s clip
        let plans = planner.plan(0, 6.0, &request, 11).unwrap();
        for clip in &plans[0].clips {
            assert_eq!(clip.start_seconds, 1.0);
        }
    }

    #[test]
    fn degenerate_range_fails_fast() {
        let planner = TimelinePlanner::default();
        let request = MontageRequest {
            start_cut_seconds: 40.0,
            end_cut_seconds: 20.0,
            ..request()
        };
        let err = planner.plan(0, 50.0, &request, 0).unwrap_err();
        assert!(matches!(err, PlanError::InvalidRange { .. }));
    }

    #[test]
    fn zero_variations_rejected() {
        let planner = TimelinePlanner::default();
        let request = MontageRequest {
            variation_count: 0,
            ..request()
        };
        assert!(matches!(
            planner.plan(0, 600.0, &request, 0),
            Err(PlanError::InvalidConfig(_))
        ));
    }
}
