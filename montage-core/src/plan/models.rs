use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{PlanError, PlanResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Resolution {
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "original")]
    Original,
}

impl Resolution {
    /// Output canvas in pixels; `Original` keeps the source dimensions.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            Resolution::P480 => Some((854, 480)),
            Resolution::P720 => Some((1280, 720)),
            Resolution::P1080 => Some((1920, 1080)),
            Resolution::Original => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::P480 => "480p",
            Resolution::P720 => "720p",
            Resolution::P1080 => "1080p",
            Resolution::Original => "original",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "480p" => Ok(Resolution::P480),
            "720p" => Ok(Resolution::P720),
            "1080p" => Ok(Resolution::P1080),
            "original" => Ok(Resolution::Original),
            other => Err(format!("unknown resolution: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    Cut,
    Stacked,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Cut => f.write_str("cut"),
            Layout::Stacked => f.write_str("stacked"),
        }
    }
}

impl FromStr for Layout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cut" => Ok(Layout::Cut),
            "stacked" => Ok(Layout::Stacked),
            other => Err(format!("unknown layout: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextOverlay {
    pub text: String,
    pub font_size: u32,
    pub color: String,
    pub outline: bool,
}

impl TextOverlay {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            font_size: 24,
            color: "white".into(),
            outline: true,
        }
    }
}

/// One user submission. Defaults mirror the submission surface:
/// 1s interval, 30s montage, no start cut, 60s end cut, 720p, linear,
/// one variation, audio kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MontageRequest {
    pub sources: Vec<String>,
    pub clip_interval_seconds: f64,
    pub montage_length_seconds: f64,
    pub start_cut_seconds: f64,
    pub end_cut_seconds: f64,
    pub linear_mode: bool,
    pub variation_count: usize,
    pub keep_audio: bool,
    pub output_resolution: Resolution,
    pub layout: Layout,
    pub text_overlay: Option<TextOverlay>,
    pub custom_filename: String,
}

impl Default for MontageRequest {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            clip_interval_seconds: 1.0,
            montage_length_seconds: 30.0,
            start_cut_seconds: 0.0,
            end_cut_seconds: 60.0,
            linear_mode: true,
            variation_count: 1,
            keep_audio: true,
            output_resolution: Resolution::P720,
            layout: Layout::Cut,
            text_overlay: None,
            custom_filename: "montage".into(),
        }
    }
}

impl MontageRequest {
    /// Clips needed to fill the montage. Zero means the interval exceeds
    /// the montage length, which is rejected as invalid configuration.
    pub fn target_clip_count(&self) -> PlanResult<usize> {
        let count = (self.montage_length_seconds / self.clip_interval_seconds).floor() as usize;
        if count == 0 {
            return Err(PlanError::InvalidConfig(format!(
                "clip interval {}s exceeds montage length {}s",
                self.clip_interval_seconds, self.montage_length_seconds
            )));
        }
        Ok(count.max(1))
    }
}

/// Usable portion of a source timeline once start/end cuts are applied.
/// `end_cut_seconds` counts backwards from the end of the source, not as
/// an absolute timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanWindow {
    pub source_duration: f64,
    pub start_cut: f64,
    pub effective_end: f64,
    pub usable_duration: f64,
    pub clip_interval: f64,
}

impl PlanWindow {
    pub fn for_request(source_duration: f64, request: &MontageRequest) -> PlanResult<Self> {
        if request.clip_interval_seconds <= 0.0 {
            return Err(PlanError::InvalidConfig(format!(
                "clip interval must be positive, got {}s",
                request.clip_interval_seconds
            )));
        }
        if request.montage_length_seconds <= 0.0 {
            return Err(PlanError::InvalidConfig(format!(
                "montage length must be positive, got {}s",
                request.montage_length_seconds
            )));
        }
        if request.start_cut_seconds < 0.0 || request.end_cut_seconds < 0.0 {
            return Err(PlanError::InvalidConfig(
                "start and end cuts must be non-negative".into(),
            ));
        }
        let effective_end =
            if request.end_cut_seconds > 0.0 && request.end_cut_seconds < source_duration {
                source_duration - request.end_cut_seconds
            } else {
                source_duration
            };
        let usable_duration = (effective_end - request.start_cut_seconds).max(0.0);
        if usable_duration <= 0.0 {
            return Err(PlanError::InvalidRange {
                start_cut: request.start_cut_seconds,
                end_cut: request.end_cut_seconds,
                duration: source_duration,
                usable: effective_end - request.start_cut_seconds,
            });
        }
        Ok(Self {
            source_duration,
            start_cut: request.start_cut_seconds,
            effective_end,
            usable_duration,
            clip_interval: request.clip_interval_seconds,
        })
    }

    /// Latest admissible clip start. Degenerates to `start_cut` when the
    /// usable range is shorter than one clip.
    pub fn max_start(&self) -> f64 {
        (self.effective_end - self.clip_interval).max(self.start_cut)
    }

    /// Width of the random spread for candidate starts.
    pub fn spread(&self) -> f64 {
        (self.usable_duration - self.clip_interval).max(0.0)
    }

    pub fn clamp_start(&self, candidate: f64) -> f64 {
        candidate.clamp(self.start_cut, self.max_start())
    }
}

/// One planned extraction from a source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipPlan {
    pub source_index: usize,
    pub start_seconds: f64,
    pub duration_seconds: f64,
}

impl ClipPlan {
    pub fn end_seconds(&self) -> f64 {
        self.start_seconds + self.duration_seconds
    }
}

/// Over-provisioned candidate pool for one variation. Computed once per
/// request and immutable afterwards; the materializer keeps its own list
/// of accepted clips instead of mutating the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariationPlan {
    pub variation_index: usize,
    pub clips: Vec<ClipPlan>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_cut_counts_from_the_end() {
        let request = MontageRequest {
            sources: vec!["file:///a.mp4".into()],
            end_cut_seconds: 30.0,
            start_cut_seconds: 0.0,
            ..MontageRequest::default()
        };
        let window = PlanWindow::for_request(840.0, &request).unwrap();
        assert_eq!(window.effective_end, 810.0);
        assert_eq!(window.usable_duration, 810.0);
    }

    #[test]
    fn oversized_end_cut_falls_back_to_full_duration() {
        let request = MontageRequest {
            end_cut_seconds: 500.0,
            ..MontageRequest::default()
        };
        let window = PlanWindow::for_request(120.0, &request).unwrap();
        assert_eq!(window.effective_end, 120.0);
    }

    #[test]
    fn degenerate_range_is_rejected() {
        let request = MontageRequest {
            start_cut_seconds: 40.0,
            end_cut_seconds: 20.0,
            ..MontageRequest::default()
        };
        let err = PlanWindow::for_request(50.0, &request).unwrap_err();
        assert!(matches!(err, PlanError::InvalidRange { .. }));
    }

    #[test]
    fn interval_larger_than_montage_is_invalid_config() {
        let request = MontageRequest {
            clip_interval_seconds: 40.0,
            montage_length_seconds: 30.0,
            ..MontageRequest::default()
        };
        assert!(matches!(
            request.target_clip_count(),
            Err(PlanError::InvalidConfig(_))
        ));
    }

    #[test]
    fn max_start_degenerates_to_start_cut() {
        let request = MontageRequest {
            clip_interval_seconds: 10.0,
            montage_length_seconds: 10.0,
            start_cut_seconds: 2.0,
            end_cut_seconds: 0.0,
            ..MontageRequest::default()
        };
        let window = PlanWindow::for_request(8.0, &request).unwrap();
        assert_eq!(window.max_start(), 2.0);
        assert_eq!(window.spread(), 0.0);
        assert_eq!(window.clamp_start(7.5), 2.0);
    }
}
