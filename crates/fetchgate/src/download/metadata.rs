//! Metadata lookup: one `--dump-single-json` run, parsed into a [`MetadataRecord`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::metrics;
use crate::download::diagnostics::classify_failure;
use crate::download::process::ExtractionProcess;

/// What the gateway returns for a metadata lookup. All fields are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataRecord {
    pub title: String,
    pub author: String,
    pub thumbnail: String,
}

/// The subset of yt-dlp's info JSON we care about.
#[derive(Debug, Deserialize)]
struct InfoJson {
    title: Option<String>,
    uploader: Option<String>,
    thumbnail: Option<String>,
}

/// Metadata collector limits.
#[derive(Debug, Clone, Copy)]
pub struct MetadataLimits {
    pub max_output_bytes: usize,
    pub timeout: Duration,
}

impl MetadataLimits {
    pub fn from_config() -> Self {
        Self {
            max_output_bytes: *config::extractor::METADATA_MAX_BYTES,
            timeout: config::extractor::metadata_timeout(),
        }
    }
}

/// Drains a metadata-mode process, waits for it and parses its record.
///
/// Exit status wins over output: a non-zero exit is an
/// [`AppError::UpstreamExit`] even if a valid record was printed.
pub async fn collect_metadata(mut process: ExtractionProcess, limits: MetadataLimits) -> AppResult<MetadataRecord> {
    let started = std::time::Instant::now();
    let drained = tokio::time::timeout(limits.timeout, drain_and_wait(&mut process, limits.max_output_bytes)).await;
    let result = match drained {
        Ok(result) => result,
        Err(_) => {
            process.terminate().await;
            log::error!(
                "[{}] metadata extraction timed out after {}s",
                process.label(),
                limits.timeout.as_secs()
            );
            Err(AppError::Timeout(limits.timeout.as_secs()))
        }
    };
    metrics::observe_extractor_duration("metadata", started.elapsed());

    let output = result?;
    let record = parse_metadata_output(&output).map_err(|e| {
        log::error!("[{}] {}", process.label(), e);
        e
    })?;

    log::info!("[{}] metadata extracted: {:?} by {:?}", process.label(), record.title, record.author);
    Ok(record)
}

async fn drain_and_wait(process: &mut ExtractionProcess, max_bytes: usize) -> AppResult<Vec<u8>> {
    let Some(output) = process.take_output() else {
        process.terminate().await;
        log::error!("[{}] no stdout from yt-dlp process", process.label());
        return Err(AppError::Parse("extractor produced no output pipe".to_string()));
    };

    let mut buf = Vec::new();
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    if let Err(e) = output.take(limit).read_to_end(&mut buf).await {
        process.terminate().await;
        return Err(AppError::Io(e));
    }

    if buf.len() > max_bytes {
        process.terminate().await;
        return Err(AppError::Parse(format!("metadata output exceeded {} bytes", max_bytes)));
    }

    let status = process.wait().await?;
    if !status.is_success() {
        let diagnostics = process.diagnostic_tail();
        let kind = classify_failure(&diagnostics);
        metrics::record_extractor_failure("metadata", kind.label());
        log::error!(
            "[{}] metadata extraction failed with {} ({}):\n{}",
            process.label(),
            status,
            kind.label(),
            diagnostics.trim_end()
        );
        return Err(AppError::UpstreamExit { status, diagnostics });
    }

    Ok(buf)
}

/// Parses extractor output: the last non-empty line must be a JSON object
/// with non-empty `title`, `uploader` and `thumbnail` strings. Anything the
/// tool printed before that line is ignored.
///
/// # Examples
/// ```
/// use fetchgate::download::metadata::parse_metadata_output;
///
/// let out = b"noise\n{\"title\":\"T\",\"uploader\":\"A\",\"thumbnail\":\"http://x\"}\n";
/// let record = parse_metadata_output(out).unwrap();
/// assert_eq!(record.author, "A");
/// ```
pub fn parse_metadata_output(output: &[u8]) -> AppResult<MetadataRecord> {
    let text = String::from_utf8_lossy(output);
    let line = text
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| AppError::Parse("extractor printed nothing".to_string()))?;

    let info: InfoJson =
        serde_json::from_str(line).map_err(|e| AppError::Parse(format!("invalid metadata record: {}", e)))?;

    let title = require_field("title", info.title)?;
    let author = require_field("uploader", info.uploader)?;
    let thumbnail = require_field("thumbnail", info.thumbnail)?;

    Ok(MetadataRecord {
        title,
        author,
        thumbnail,
    })
}

fn require_field(name: &str, value: Option<String>) -> AppResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        Some(_) => Err(AppError::Parse(format!("metadata field `{}` is empty", name))),
        None => Err(AppError::Parse(format!("metadata field `{}` is missing", name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_last_line_wins() {
        let out = b"noise\n{\"title\":\"T\",\"uploader\":\"A\",\"thumbnail\":\"http://x\"}\n";
        assert_eq!(
            parse_metadata_output(out).unwrap(),
            MetadataRecord {
                title: "T".into(),
                author: "A".into(),
                thumbnail: "http://x".into(),
            }
        );
    }

    #[test]
    fn test_trailing_blank_lines_and_crlf() {
        let out = b"[youtube] abc: Downloading webpage\r\n{\"title\":\"T\",\"uploader\":\"A\",\"thumbnail\":\"t\"}\r\n\r\n  \n";
        assert_eq!(parse_metadata_output(out).unwrap().title, "T");
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let out = br#"{"id":"abc","title":"T","uploader":"A","channel":"C","thumbnail":"t","duration":212}"#;
        assert_eq!(parse_metadata_output(out).unwrap().author, "A");
    }

    #[test]
    fn test_missing_field_is_parse_error() {
        let out = br#"{"title":"T","uploader":"A"}"#;
        let err = parse_metadata_output(out).unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
        assert!(err.to_string().contains("thumbnail"));
    }

    #[test]
    fn test_empty_or_non_string_field_is_parse_error() {
        let cases: Vec<&[u8]> = vec![
            br#"{"title":"","uploader":"A","thumbnail":"t"}"#,
            br#"{"title":"T","uploader":"  ","thumbnail":"t"}"#,
            br#"{"title":"T","uploader":"A","thumbnail":null}"#,
            br#"{"title":42,"uploader":"A","thumbnail":"t"}"#,
        ];
        for out in cases {
            assert!(
                matches!(parse_metadata_output(out), Err(AppError::Parse(_))),
                "Should fail for: {}",
                String::from_utf8_lossy(out)
            );
        }
    }

    #[test]
    fn test_garbage_is_parse_error() {
        for out in [&b""[..], b"\n\n", b"T||A||http://x", b"{\"title\":"] {
            assert!(matches!(parse_metadata_output(out), Err(AppError::Parse(_))));
        }
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use pretty_assertions::assert_eq;
        use crate::download::process::TerminationStatus;
        use tokio::process::Command;

        fn spawn(script: &str) -> ExtractionProcess {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(script);
            ExtractionProcess::spawn(cmd, "meta-test", 1024).unwrap()
        }

        fn limits() -> MetadataLimits {
            MetadataLimits {
                max_output_bytes: 4096,
                timeout: Duration::from_secs(10),
            }
        }

        #[tokio::test]
        async fn test_collects_record() {
            let process = spawn(
                r#"echo "[info] noise"; echo '{"title":"T","uploader":"A","thumbnail":"http://x"}'"#,
            );
            let record = collect_metadata(process, limits()).await.unwrap();
            assert_eq!(record.thumbnail, "http://x");
        }

        #[tokio::test]
        async fn test_non_zero_exit_beats_valid_output() {
            let process = spawn(
                r#"echo '{"title":"T","uploader":"A","thumbnail":"http://x"}'; echo 'ERROR: Video unavailable' >&2; exit 1"#,
            );
            let err = collect_metadata(process, limits()).await.unwrap_err();
            match err {
                AppError::UpstreamExit { status, diagnostics } => {
                    assert_eq!(status, TerminationStatus::Exited(1));
                    assert!(diagnostics.contains("Video unavailable"));
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_oversized_output_is_rejected() {
            let process = spawn("yes '{}'");
            let limits = MetadataLimits {
                max_output_bytes: 1024,
                timeout: Duration::from_secs(10),
            };
            let err = collect_metadata(process, limits).await.unwrap_err();
            assert!(matches!(err, AppError::Parse(_)));
        }

        #[tokio::test]
        async fn test_deadline_kills_process() {
            let process = spawn("sleep 30");
            let limits = MetadataLimits {
                max_output_bytes: 1024,
                timeout: Duration::from_millis(100),
            };
            let err = collect_metadata(process, limits).await.unwrap_err();
            assert!(matches!(err, AppError::Timeout(_)));
        }
    }
}
