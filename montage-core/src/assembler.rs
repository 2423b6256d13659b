use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use tracing::info;

use crate::materializer::MaterializedClip;
use crate::media::{FfmpegEdit, MediaError, MediaResult};
use crate::plan::{Layout, Resolution, TextOverlay};

/// Per-layer shrink applied to each successive clip in the stacked
/// layout.
const STACK_SHRINK_FACTOR: f64 = 0.75;

#[derive(Debug, Clone)]
pub struct AssemblyOptions {
    pub layout: Layout,
    pub resolution: Resolution,
    pub overlay: Option<TextOverlay>,
    pub keep_audio: bool,
    pub montage_length_seconds: f64,
}

/// Seam for the pipeline: production code uses the ffmpeg-backed
/// [`Assembler`], tests substitute a fake that writes a marker file.
#[async_trait]
pub trait ClipAssembler: Send + Sync {
    async fn assemble(
        &self,
        clips: &[MaterializedClip],
        dest: &Path,
        options: &AssemblyOptions,
        rng: &mut ChaCha20Rng,
    ) -> MediaResult<PathBuf>;
}

/// Concatenates or stacks materialized clips into one montage file.
pub struct Assembler {
    ffmpeg: FfmpegEdit,
}

impl Assembler {
    pub fn new(ffmpeg: FfmpegEdit) -> Self {
        Self { ffmpeg }
    }

    /// Clips are assembled in the order the materializer produced them:
    /// chronological for linear plans, shuffle order for random plans.
    pub async fn assemble(
        &self,
        clips: &[MaterializedClip],
        dest: &Path,
        options: &AssemblyOptions,
        rng: &mut ChaCha20Rng,
    ) -> MediaResult<PathBuf> {
        if clips.is_empty() {
            return Err(MediaError::Assembly("no clips to assemble".into()));
        }
        match options.layout {
            Layout::Cut => self.assemble_cut(clips, dest, options).await?,
            Layout::Stacked => self.assemble_stacked(clips, dest, options, rng).await?,
        }
        info!(
            target: "assembler",
            clips = clips.len(),
            layout = %options.layout,
            dest = %dest.display(),
            "montage assembled"
        );
        Ok(dest.to_path_buf())
    }

    async fn assemble_cut(
        &self,
        clips: &[MaterializedClip],
        dest: &Path,
        options: &AssemblyOptions,
    ) -> MediaResult<()> {
        let list_path = dest.with_extension("txt");
        let mut list = String::new();
        for clip in clips {
            writeln!(list, "file '{}'", clip.path.display())
                .expect("writing to a String cannot fail");
        }
        tokio::fs::write(&list_path, list)
            .await
            .map_err(|source| MediaError::io(&list_path, source))?;

        let mut args: Vec<OsString> = vec![
            "-y".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list_path.as_os_str().to_os_string(),
        ];
        if let Some(filter) = cut_filter_chain(options.resolution, options.overlay.as_ref()) {
            args.push("-vf".into());
            args.push(filter.into());
        }
        args.push("-c:v".into());
        args.push("libx264".into());
        if options.keep_audio {
            args.push("-c:a".into());
            args.push("aac".into());
        } else {
            args.push("-an".into());
        }
        args.push("-pix_fmt".into());
        args.push("yuv420p".into());
        args.push(dest.as_os_str().to_os_string());
        self.ffmpeg.run(args, MediaError::Assembly).await
    }

    async fn assemble_stacked(
        &self,
        clips: &[MaterializedClip],
        dest: &Path,
        options: &AssemblyOptions,
        rng: &mut ChaCha20Rng,
    ) -> MediaResult<()> {
        let (width, height) = options.resolution.dimensions().unwrap_or((1280, 720));
        let (graph, map_label) = stacked_filter_graph(
            clips.len(),
            width,
            height,
            options.montage_length_seconds,
            options.overlay.as_ref(),
            rng,
        );
        let mut args: Vec<OsString> = vec!["-y".into()];
        for clip in clips {
            args.push("-i".into());
            args.push(clip.path.as_os_str().to_os_string());
        }
        args.push("-filter_complex".into());
        args.push(graph.into());
        args.push("-map".into());
        args.push(format!("[{map_label}]").into());
        args.extend(stacked_audio_args(options.keep_audio));
        args.push("-c:v".into());
        args.push("libx264".into());
        args.push("-preset".into());
        args.push("fast".into());
        args.push("-pix_fmt".into());
        args.push("yuv420p".into());
        args.push("-t".into());
        args.push(format!("{}", options.montage_length_seconds).into());
        args.push(dest.as_os_str().to_os_string());
        self.ffmpeg.run(args, MediaError::Assembly).await
    }
}

#[async_trait]
impl ClipAssembler for Assembler {
    async fn assemble(
        &self,
        clips: &[MaterializedClip],
        dest: &Path,
        options: &AssemblyOptions,
        rng: &mut ChaCha20Rng,
    ) -> MediaResult<PathBuf> {
        Assembler::assemble(self, clips, dest, options, rng).await
    }
}

/// Audio for the stacked output: the first clip's track when audio is
/// kept (`?` tolerates silent sources), dropped explicitly otherwise.
fn stacked_audio_args(keep_audio: bool) -> Vec<OsString> {
    if keep_audio {
        vec!["-map".into(), "0:a?".into(), "-c:a".into(), "aac".into()]
    } else {
        vec!["-an".into()]
    }
}

/// Scale-and-pad plus optional centered text for the cut layout. Returns
/// `None` when the source dimensions are kept and no overlay is wanted.
pub fn cut_filter_chain(resolution: Resolution, overlay: Option<&TextOverlay>) -> Option<String> {
    let mut parts = Vec::new();
    if let Some((width, height)) = resolution.dimensions() {
        parts.push(format!(
            "scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2"
        ));
    }
    if let Some(overlay) = overlay {
        parts.push(drawtext_filter(overlay));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}

/// Centered drawtext with an optional black outline.
pub fn drawtext_filter(overlay: &TextOverlay) -> String {
    let mut filter = format!(
        "drawtext=text='{}':fontsize={}:fontcolor={}",
        escape_drawtext(&overlay.text),
        overlay.font_size,
        overlay.color
    );
    if overlay.outline {
        filter.push_str(":bordercolor=black:borderw=2");
    }
    filter.push_str(":x=(w-tw)/2:y=(h-th)/2");
    filter
}

fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Builds the stacked-layout filter graph: a black canvas the length of
/// the montage, clips composited in reverse z-order so later clips land
/// on top, each layer appearing one second after the previous and shrunk
/// by a fixed factor per depth.
pub fn stacked_filter_graph(
    clip_count: usize,
    width: u32,
    height: u32,
    montage_length_seconds: f64,
    overlay: Option<&TextOverlay>,
    rng: &mut ChaCha20Rng,
) -> (String, String) {
    let mut graph = format!(
        "color=s={width}x{height}:d={montage_length_seconds}:c=black[bg];"
    );
    let mut last_output = "bg".to_string();
    for input in (0..clip_count).rev() {
        let depth = clip_count - 1 - input;
        let scale_factor = STACK_SHRINK_FACTOR.powi(depth as i32);
        let scaled_width = ((width as f64) * scale_factor) as u32;
        let scaled_height = ((height as f64) * scale_factor) as u32;
        let (x, y) = if depth == 0 {
            (0, 0)
        } else {
            let max_x = width.saturating_sub(scaled_width);
            let max_y = height.saturating_sub(scaled_height);
            (rng.gen_range(0..=max_x), rng.gen_range(0..=max_y))
        };
        let _ = write!(
            graph,
            "[{input}:v]setpts=PTS-STARTPTS+{depth}/TB,scale={scaled_width}:{scaled_height}[v{input}];\
             [{last_output}][v{input}]overlay={x}:{y}[out{input}];"
        );
        last_output = format!("out{input}");
    }
    if let Some(overlay) = overlay {
        let _ = write!(graph, "[{last_output}]{}[final];", drawtext_filter(overlay));
        last_output = "final".to_string();
    }
    (graph, last_output)
}
