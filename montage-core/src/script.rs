use std::fmt::Write as _;

use crate::assembler::cut_filter_chain;
use crate::config::MediaSection;
use crate::media::{normalize_source_url, SourceKind};
use crate::plan::{MontageRequest, PlanResult, VariationPlan};

/// Renders a request and its planned variations into a standalone bash
/// script: dependency checks, source downloads, per-clip extraction and
/// the final concat. The script always assembles sequentially; only the
/// in-process pipeline composites the stacked layout.
pub struct ScriptRenderer {
    ffmpeg: String,
    ytdlp: String,
    curl: String,
}

impl ScriptRenderer {
    pub fn new(media: &MediaSection) -> Self {
        Self {
            ffmpeg: media.ffmpeg_binary.clone(),
            ytdlp: media.ytdlp_binary.clone(),
            curl: media.curl_binary.clone(),
        }
    }

    pub fn render(
        &self,
        request: &MontageRequest,
        plans: &[VariationPlan],
    ) -> PlanResult<String> {
        let target = request.target_clip_count()?;
        let mut script = String::new();
        let _ = writeln!(script, "#!/usr/bin/env bash");
        let _ = writeln!(script, "# montage script: {}", request.custom_filename);
        let _ = writeln!(script, "set -euo pipefail");
        script.push('\n');

        self.render_dependency_checks(&mut script, request);
        script.push('\n');

        let _ = writeln!(script, "WORKDIR=\"$(mktemp -d)\"");
        let _ = writeln!(script, "trap 'rm -rf \"$WORKDIR\"' EXIT");
        script.push('\n');

        self.render_downloads(&mut script, request);

        for plan in plans {
            script.push('\n');
            self.render_variation(&mut script, request, plan, target);
        }
        Ok(script)
    }

    fn render_dependency_checks(&self, script: &mut String, request: &MontageRequest) {
        let mut tools = vec![self.ffmpeg.clone()];
        for url in &request.sources {
            let tool = match SourceKind::classify(&normalize_source_url(url)) {
                SourceKind::VideoPlatform => &self.ytdlp,
                _ => &self.curl,
            };
            if !tools.contains(tool) {
                tools.push(tool.clone());
            }
        }
        for tool in tools {
            let _ = writeln!(
                script,
                "command -v '{tool}' >/dev/null 2>&1 || {{ echo 'missing dependency: {tool}' >&2; exit 1; }}"
            );
        }
    }

    fn render_downloads(&self, script: &mut String, request: &MontageRequest) {
        for (index, url) in request.sources.iter().enumerate() {
            let url = normalize_source_url(url);
            let _ = writeln!(script, "echo 'downloading source {index}'");
            match SourceKind::classify(&url) {
                SourceKind::VideoPlatform => {
                    let _ = writeln!(
                        script,
                        "'{}' -f 'best[height<=720]' -o \"$WORKDIR/source_{index}.mp4\" '{url}'",
                        self.ytdlp
                    );
                }
                _ => {
                    let _ = writeln!(
                        script,
                        "'{}' -L -f '{url}' -o \"$WORKDIR/source_{index}.mp4\"",
                        self.curl
                    );
                }
            }
        }
    }

    /// Extracts the first `target` candidates of the pool; the script
    /// has no backfill loop, so spares past the target are dropped.
    fn render_variation(
        &self,
        script: &mut String,
        request: &MontageRequest,
        plan: &VariationPlan,
        target: usize,
    ) {
        let variation = plan.variation_index + 1;
        let audio_args = if request.keep_audio { "-c:a aac" } else { "-an" };
        let _ = writeln!(script, "echo 'building variation {variation}'");
        let clips = plan.clips.iter().take(target);
        for (index, clip) in clips.clone().enumerate() {
            let _ = writeln!(
                script,
                "'{}' -y -ss {} -i \"$WORKDIR/source_{}.mp4\" -t {} -c:v libx264 {audio_args} -pix_fmt yuv420p \"$WORKDIR/v{variation:02}_clip_{index:03}.mp4\"",
                self.ffmpeg, clip.start_seconds, clip.source_index, clip.duration_seconds
            );
        }

        let _ = writeln!(script, "cat > \"$WORKDIR/v{variation:02}_concat.txt\" <<LIST");
        for (index, _) in clips.enumerate() {
            let _ = writeln!(script, "file '$WORKDIR/v{variation:02}_clip_{index:03}.mp4'");
        }
        let _ = writeln!(script, "LIST");

        let filter = cut_filter_chain(request.output_resolution, request.text_overlay.as_ref())
            .map(|chain| format!(" -vf '{chain}'"))
            .unwrap_or_default();
        let _ = writeln!(
            script,
            "'{}' -y -f concat -safe 0 -i \"$WORKDIR/v{variation:02}_concat.txt\"{filter} -c:v libx264 {audio_args} -pix_fmt yuv420p \"{}_v{variation:02}.mp4\"",
            self.ffmpeg, request.custom_filename
        );
        let _ = writeln!(
            script,
            "echo 'wrote {}_v{variation:02}.mp4'",
            request.custom_filename
        );
    }
}
