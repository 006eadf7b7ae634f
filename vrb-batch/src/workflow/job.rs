//! Pipeline job
//!
//! Two sequential stages per input file:
//! 1. **Vocal removal**: the separation model writes instrumental and vocal
//!    WAV stems. Lines like ` 42%|####...` become absolute progress.
//! 2. **Conversion + tagging**: the converter encodes the instrumental stem
//!    to MP3 (each `*` line is one progress tick), tags are rewritten and
//!    both stems are deleted.
//!
//! Subprocess outcomes are logged but never abort the job by themselves;
//! a missing output surfaces as an I/O error in stage 2.

use super::{JobExecutor, ProgressHandle};
use crate::services::process_runner::{OutputLine, ProcessOutcome, ProcessRunner, RunOptions};
use crate::services::tag_io::TagWriter;
use crate::services::JobDescriptor;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::ffi::OsString;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};
use vrb_common::config::ToolConfig;
use vrb_common::{ProgressEvent, Stage};

static REGEX_SEPARATION_PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)%\|").expect("valid progress regex"));

/// Loudness normalization passed to the converter
pub const NORMALIZE_EFFECT: &str =
    "Volume Normalize=-mode={qt}peak{qt} -maxamp={qt}100{qt} -desiredb={qt}-.1{qt}";
/// Encoder selection passed to the converter
pub const ENCODER: &str = "mp3 (Lame)";
/// Encoder quality flag passed to the converter
pub const ENCODER_QUALITY: &str = "-V 0";

const SEPARATOR_NAME: &str = "VocRemover";
const CONVERTER_NAME: &str = "Converter";

/// Parse a separation progress line (`<int>%|...`) into a percentage
///
/// Values above 100 are clamped.
pub fn parse_separation_progress(line: &str) -> Option<u8> {
    let caps = REGEX_SEPARATION_PERCENT.captures(line)?;
    let value: u32 = caps[1].parse().ok()?;
    Some(value.min(100) as u8)
}

/// True for converter lines that mark one unit of progress
pub fn is_conversion_tick(line: &str) -> bool {
    line.trim().starts_with('*')
}

/// Stages of one job, borrowing everything it needs
pub struct PipelineJob<'a> {
    job: &'a JobDescriptor,
    config: &'a ToolConfig,
    runner: &'a ProcessRunner,
    tag_writer: &'a dyn TagWriter,
}

impl<'a> PipelineJob<'a> {
    pub fn new(
        job: &'a JobDescriptor,
        config: &'a ToolConfig,
        runner: &'a ProcessRunner,
        tag_writer: &'a dyn TagWriter,
    ) -> Self {
        Self {
            job,
            config,
            runner,
            tag_writer,
        }
    }

    /// Arguments for the separation interpreter
    pub fn separation_args(&self) -> Vec<OsString> {
        let params = &self.config.separation;
        vec![
            self.config.inference_script().into_os_string(),
            "-g".into(),
            params.gpu_index.to_string().into(),
            "-m".into(),
            params.model_params.clone().into_os_string(),
            "-H".into(),
            "mirroring".into(),
            "-D".into(),
            "-w".into(),
            params.window_size.to_string().into(),
            "-P".into(),
            params.model_weights.clone().into_os_string(),
            "-t".into(),
            "-i".into(),
            self.job.input.clone().into_os_string(),
        ]
    }

    /// Arguments for the converter
    pub fn conversion_args(&self) -> Vec<OsString> {
        vec![
            "-infile".into(),
            self.job.intermediate_instrumental_path.clone().into_os_string(),
            "-outfile".into(),
            self.job.final_output_path.clone().into_os_string(),
            "-dspeffect3".into(),
            NORMALIZE_EFFECT.into(),
            "-convert_to".into(),
            ENCODER.into(),
            ENCODER_QUALITY.into(),
        ]
    }

    /// Stage 1: run the separation model
    pub async fn remove_vocals(&self, progress: &ProgressHandle) -> ProcessOutcome {
        let mut sink = |line: &OutputLine| {
            if let Some(pct) = parse_separation_progress(&line.text) {
                progress.report(ProgressEvent::Absolute(pct));
            }
        };

        self.runner
            .run(
                SEPARATOR_NAME,
                &self.config.python_path,
                &self.separation_args(),
                &RunOptions::in_dir(&self.config.vocal_remover_path),
                Some(&mut sink),
            )
            .await
    }

    /// Stage 2: convert, tag, and remove the intermediates
    pub async fn convert_and_tag(&self, progress: &ProgressHandle) -> Result<()> {
        let output = &self.job.final_output_path;
        if let Some(parent) = output.parent() {
            info!("Making dir: {}", parent.display());
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut sink = |line: &OutputLine| {
            if is_conversion_tick(&line.text) {
                progress.report(ProgressEvent::Increment);
            }
        };
        let outcome = self
            .runner
            .run(
                CONVERTER_NAME,
                &self.config.converter_path,
                &self.conversion_args(),
                &RunOptions::default(),
                Some(&mut sink),
            )
            .await;
        log_unclean_exit(&self.job.display_name, &outcome);

        let audio = tokio::fs::read(output)
            .await
            .with_context(|| format!("Failed to read converted file {}", output.display()))?;

        if let Some(metadata) = &self.job.metadata {
            let tagged = self
                .tag_writer
                .write(&metadata.tag_set(), &audio)
                .with_context(|| format!("Failed to tag {}", output.display()))?;
            tokio::fs::write(output, tagged)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
        } else {
            debug!("No source tags for {}, leaving output untagged", output.display());
        }

        for path in self.intermediates() {
            tokio::fs::remove_file(path)
                .await
                .with_context(|| format!("Failed to delete {}", path.display()))?;
        }

        Ok(())
    }

    /// Best-effort removal of stage-1 artifacts after a failed job
    pub async fn discard_intermediates(&self) {
        for path in self.intermediates() {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!("Removed leftover {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove {}: {}", path.display(), e),
            }
        }
    }

    fn intermediates(&self) -> [&Path; 2] {
        [
            &self.job.intermediate_instrumental_path,
            &self.job.intermediate_vocals_path,
        ]
    }
}

fn log_unclean_exit(job_name: &str, outcome: &ProcessOutcome) {
    if outcome.succeeded() {
        return;
    }
    warn!(
        job = job_name,
        process = %outcome.name,
        state = ?outcome.state,
        "Process did not exit cleanly, continuing"
    );
    for line in &outcome.tail {
        debug!("[{}] {}", outcome.name, line.text);
    }
}

/// [`JobExecutor`] running the real separation and conversion tools
pub struct PipelineExecutor {
    config: Arc<ToolConfig>,
    runner: ProcessRunner,
    tag_writer: Arc<dyn TagWriter>,
}

impl PipelineExecutor {
    pub fn new(config: Arc<ToolConfig>, runner: ProcessRunner, tag_writer: Arc<dyn TagWriter>) -> Self {
        Self {
            config,
            runner,
            tag_writer,
        }
    }
}

#[async_trait]
impl JobExecutor for PipelineExecutor {
    async fn execute(&self, job: JobDescriptor, progress: ProgressHandle) -> Result<()> {
        let pipeline = PipelineJob::new(&job, &self.config, &self.runner, self.tag_writer.as_ref());

        progress.stage(Stage::VocalRemoval);
        let separation = pipeline.remove_vocals(&progress).await;
        log_unclean_exit(&job.display_name, &separation);

        progress.stage(Stage::Conversion);
        if let Err(e) = pipeline.convert_and_tag(&progress).await {
            pipeline.discard_intermediates().await;
            return Err(e);
        }

        info!("Finished {}", job.display_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::input_resolver::{derive_job, ResolverSettings};
    use std::path::PathBuf;
    use vrb_common::config::ToolOverrides;

    fn config() -> ToolConfig {
        ToolConfig::resolve(
            &ToolOverrides {
                python_path: Some(PathBuf::from("/usr/bin/python3")),
                vocal_remover_path: Some(PathBuf::from("/toolkit")),
                converter_path: Some(PathBuf::from("/bin/converter")),
                debug: false,
            },
            None,
        )
        .unwrap()
    }

    fn job(config: &ToolConfig) -> JobDescriptor {
        derive_job(
            Path::new("/music/song.mp3"),
            None,
            &ResolverSettings {
                separated_root: config.separated_root(),
                model_tag: config.separation.model_tag(),
            },
        )
    }

    #[test]
    fn test_parse_separation_progress() {
        assert_eq!(parse_separation_progress("42%|rest"), Some(42));
        assert_eq!(parse_separation_progress(" 7%|##       | 3/40"), Some(7));
        assert_eq!(parse_separation_progress("100%|##########|"), Some(100));
        assert_eq!(parse_separation_progress("250%|"), Some(100));
        assert_eq!(parse_separation_progress("loading model"), None);
        assert_eq!(parse_separation_progress("42% done"), None);
    }

    #[test]
    fn test_conversion_tick_detection() {
        assert!(is_conversion_tick("* progress"));
        assert!(is_conversion_tick("   ***"));
        assert!(!is_conversion_tick("Converting file"));
        assert!(!is_conversion_tick(""));
    }

    #[test]
    fn test_separation_args() {
        let config = config();
        let job = job(&config);
        let runner = ProcessRunner::new();
        let pipeline = PipelineJob::new(&job, &config, &runner, &crate::services::Id3TagWriter);

        let args: Vec<String> = pipeline
            .separation_args()
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            args,
            vec![
                "/toolkit/inference.py",
                "-g",
                "1",
                "-m",
                "modelparams/2band_32000.json",
                "-H",
                "mirroring",
                "-D",
                "-w",
                "352",
                "-P",
                "models/MGM-v5-KAROKEE-32000-BETA1.pth",
                "-t",
                "-i",
                "/music/song.mp3",
            ]
        );
    }

    #[test]
    fn test_conversion_args() {
        let config = config();
        let job = job(&config);
        let runner = ProcessRunner::new();
        let pipeline = PipelineJob::new(&job, &config, &runner, &crate::services::Id3TagWriter);

        let args = pipeline.conversion_args();
        assert_eq!(args[0], "-infile");
        assert_eq!(
            PathBuf::from(&args[1]),
            PathBuf::from("/toolkit/separated/song_MGM-v5-KAROKEE-32000-BETA1_Instruments.wav")
        );
        assert_eq!(args[2], "-outfile");
        assert_eq!(PathBuf::from(&args[3]), PathBuf::from("/toolkit/separated/song.mp3"));
        assert_eq!(args[5], NORMALIZE_EFFECT);
        assert_eq!(args[7], ENCODER);
        assert_eq!(args[8], ENCODER_QUALITY);
    }
}
