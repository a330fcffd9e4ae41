//! Extractor invocation: mode-specific yt-dlp arguments and process start.

use tokio::process::Command;

use crate::core::config;
use crate::core::error::AppError;
use crate::core::validation::DownloadRequest;
use crate::download::process::ExtractionProcess;

/// Fixed outbound headers sent to the platform on every invocation.
pub const UPSTREAM_HEADERS: &[&str] = &["referer:youtube.com", "user-agent:googlebot"];

/// What a run should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ExtractionMode {
    /// One JSON record describing the media, no download
    Metadata,
    /// Best audio-only track on stdout
    Audio,
    /// Best video+audio up to the quality ceiling, muxed to mp4 on stdout
    Video,
}

impl ExtractionMode {
    /// Content type of the streamed body.
    pub fn content_type(self) -> &'static str {
        match self {
            ExtractionMode::Metadata => "application/json",
            ExtractionMode::Audio => "audio/mpeg",
            ExtractionMode::Video => "video/mp4",
        }
    }

    pub fn label(self) -> &'static str {
        self.into()
    }
}

/// Program plus leading arguments used to run the extractor.
///
/// `YTDL_BIN=yt-dlp` and `YTDL_BIN="python3 -m yt_dlp"` are both valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorCommand {
    program: String,
    leading_args: Vec<String>,
}

impl ExtractorCommand {
    pub fn new(program: impl Into<String>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    /// Splits a command line on whitespace. An empty line falls back to `yt-dlp`.
    pub fn parse(cmdline: &str) -> Self {
        let mut parts = cmdline.split_whitespace().map(str::to_string);
        match parts.next() {
            Some(program) => Self::new(program, parts.collect()),
            None => Self::new("yt-dlp", Vec::new()),
        }
    }

    pub fn from_config() -> Self {
        Self::parse(&config::YTDL_BIN)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Builds a command with the leading arguments applied.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args);
        cmd
    }
}

/// Starts extractor processes.
#[derive(Debug, Clone)]
pub struct Launcher {
    extractor: ExtractorCommand,
    tail_bytes: usize,
}

impl Launcher {
    pub fn new(extractor: ExtractorCommand, tail_bytes: usize) -> Self {
        Self { extractor, tail_bytes }
    }

    pub fn from_config() -> Self {
        Self::new(ExtractorCommand::from_config(), *config::extractor::DIAGNOSTIC_TAIL_BYTES)
    }

    /// Starts one extractor run for `request` in `mode`.
    ///
    /// A start failure (binary missing, not executable) is fatal for this
    /// request only and is never retried.
    pub fn launch(
        &self,
        request: &DownloadRequest,
        mode: ExtractionMode,
        label: &str,
    ) -> Result<ExtractionProcess, AppError> {
        let args = build_args(request, mode);
        log::debug!("[{}] {} {}", label, self.extractor.program(), args.join(" "));

        let mut cmd = self.extractor.command();
        cmd.args(&args);

        ExtractionProcess::spawn(cmd, label, self.tail_bytes).map_err(|source| {
            log::error!("[{}] failed to start {}: {}", label, self.extractor.program(), source);
            AppError::Launch {
                program: self.extractor.program().to_string(),
                source,
            }
        })
    }
}

/// Builds the yt-dlp argument vector for one run. The URL is always last.
pub fn build_args(request: &DownloadRequest, mode: ExtractionMode) -> Vec<String> {
    let mut args: Vec<String> = match mode {
        ExtractionMode::Metadata => vec![
            "--dump-single-json".into(),
            "--skip-download".into(),
            "--no-warnings".into(),
            "--force-ipv4".into(),
        ],
        ExtractionMode::Audio => vec![
            "-f".into(),
            "bestaudio[ext=m4a]/bestaudio".into(),
            "-o".into(),
            "-".into(),
            "--no-progress".into(),
        ],
        ExtractionMode::Video => vec![
            "-f".into(),
            video_format_selector(request.quality()),
            "--merge-output-format".into(),
            "mp4".into(),
            "-o".into(),
            "-".into(),
            "--no-progress".into(),
        ],
    };

    args.push("--no-playlist".into());
    args.push("--no-check-certificate".into());
    for header in UPSTREAM_HEADERS {
        args.push("--add-header".into());
        args.push((*header).into());
    }
    args.push(request.url().as_str().into());
    args
}

/// Format selector for the video mode, capped at the hard ceiling whatever
/// the request says.
pub fn video_format_selector(quality: u32) -> String {
    let height = quality.min(config::quality::MAX);
    format!(
        "bv*[ext=mp4][vcodec^=avc1][height<={h}]+ba[ext=m4a]/b[ext=mp4][height<={h}]/b[height<={h}]",
        h = height
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validation::{parse_download_request, HostAllowList};
    use pretty_assertions::assert_eq;

    fn request(quality: &str) -> DownloadRequest {
        let hosts = HostAllowList::new(["youtube.com", "youtu.be"]);
        let body = format!(r#"{{"url":"https://youtu.be/abc","quality":{}}}"#, quality);
        parse_download_request(body.as_bytes(), &hosts).unwrap()
    }

    #[test]
    fn test_metadata_args() {
        let args = build_args(&request("720"), ExtractionMode::Metadata);
        assert_eq!(
            args,
            vec![
                "--dump-single-json",
                "--skip-download",
                "--no-warnings",
                "--force-ipv4",
                "--no-playlist",
                "--no-check-certificate",
                "--add-header",
                "referer:youtube.com",
                "--add-header",
                "user-agent:googlebot",
                "https://youtu.be/abc",
            ]
        );
    }

    #[test]
    fn test_audio_args_stream_to_stdout() {
        let args = build_args(&request("720"), ExtractionMode::Audio);
        let joined = args.join(" ");
        assert!(joined.starts_with("-f bestaudio[ext=m4a]/bestaudio -o -"));
        assert!(!joined.contains("height"));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/abc"));
    }

    #[test]
    fn test_video_args_use_quality() {
        let args = build_args(&request("480"), ExtractionMode::Video);
        assert_eq!(args[0], "-f");
        assert_eq!(
            args[1],
            "bv*[ext=mp4][vcodec^=avc1][height<=480]+ba[ext=m4a]/b[ext=mp4][height<=480]/b[height<=480]"
        );
        assert!(args.windows(2).any(|w| w == ["--merge-output-format", "mp4"]));
        assert!(args.windows(2).any(|w| w == ["-o", "-"]));
    }

    #[test]
    fn test_video_selector_never_exceeds_ceiling() {
        assert!(video_format_selector(4320).contains("height<=1080"));
        assert!(!video_format_selector(4320).contains("4320"));
        assert!(build_args(&request("9999"), ExtractionMode::Video)[1].contains("height<=1080"));
    }

    #[test]
    fn test_every_mode_sends_fixed_headers() {
        for mode in [ExtractionMode::Metadata, ExtractionMode::Audio, ExtractionMode::Video] {
            let args = build_args(&request("720"), mode);
            for header in UPSTREAM_HEADERS {
                assert!(
                    args.windows(2).any(|w| w[0] == "--add-header" && w[1] == *header),
                    "{} missing {}",
                    mode,
                    header
                );
            }
        }
    }

    #[test]
    fn test_extractor_command_parse() {
        assert_eq!(ExtractorCommand::parse("yt-dlp"), ExtractorCommand::new("yt-dlp", vec![]));
        assert_eq!(
            ExtractorCommand::parse("  python3 -m   yt_dlp "),
            ExtractorCommand::new("python3", vec!["-m".into(), "yt_dlp".into()])
        );
        assert_eq!(ExtractorCommand::parse("").program(), "yt-dlp");
    }

    #[test]
    fn test_mode_labels_and_content_types() {
        assert_eq!(ExtractionMode::Video.label(), "video");
        assert_eq!(ExtractionMode::Audio.to_string(), "audio");
        assert_eq!(ExtractionMode::Metadata.label(), "metadata");
        assert_eq!(ExtractionMode::Video.content_type(), "video/mp4");
        assert_eq!(ExtractionMode::Audio.content_type(), "audio/mpeg");
    }

    #[tokio::test]
    async fn test_launch_missing_binary_is_launch_error() {
        let launcher = Launcher::new(ExtractorCommand::parse("/nonexistent/yt-dlp"), 1024);
        let err = launcher
            .launch(&request("720"), ExtractionMode::Metadata, "t")
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Launch { .. }));
    }
}
