//! Fake extractor fixture
//!
//! Writes a shell script into a temp dir and runs it as `sh <script> <args>`,
//! so the gateway sees a normal subprocess with yt-dlp's argument list. Every
//! launch appends a line to a marker file, which lets tests prove that a
//! request never reached the launcher.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fetchgate::core::validation::HostAllowList;
use fetchgate::core::web_server::AppState;
use fetchgate::download::metadata::MetadataLimits;
use fetchgate::download::relay::RelayLimits;
use fetchgate::download::{ExtractorCommand, Launcher};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub struct FakeExtractor {
    dir: TempDir,
    script: PathBuf,
    launches: PathBuf,
    args: PathBuf,
}

impl FakeExtractor {
    /// Creates an extractor whose body is the given shell snippet.
    ///
    /// The arguments of the most recent launch are available via [`Self::last_args`].
    pub fn new(body: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("fake-yt-dlp.sh");
        let launches = dir.path().join("launches");
        let args = dir.path().join("args");

        let content = format!(
            "echo launched >> '{}'\nprintf '%s\\n' \"$@\" > '{}'\n{}\n",
            launches.display(),
            args.display(),
            body
        );
        std::fs::write(&script, content).unwrap();

        Self {
            dir,
            script,
            launches,
            args,
        }
    }

    /// Prints a metadata line preceded by tool chatter.
    pub fn with_metadata(title: &str, uploader: &str, thumbnail: &str) -> Self {
        Self::new(&format!(
            "echo '[youtube] abc: Downloading webpage'\necho '{{\"title\":\"{}\",\"uploader\":\"{}\",\"thumbnail\":\"{}\",\"duration\":212}}'",
            title, uploader, thumbnail
        ))
    }

    pub fn command(&self) -> ExtractorCommand {
        ExtractorCommand::new("sh", vec![self.script.display().to_string()])
    }

    pub fn launcher(&self) -> Launcher {
        Launcher::new(self.command(), 4096)
    }

    /// Gateway state with short limits, allowing youtube.com and youtu.be.
    pub fn state(&self) -> Arc<AppState> {
        Arc::new(state_with(self.launcher()))
    }

    /// Number of times the script was started.
    pub fn launches(&self) -> usize {
        std::fs::read_to_string(&self.launches)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    /// Arguments of the last launch, one per element.
    pub fn last_args(&self) -> Vec<String> {
        std::fs::read_to_string(&self.args)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn dir(&self) -> &std::path::Path {
        self.dir.path()
    }
}

/// Gateway state around an arbitrary launcher.
pub fn state_with(launcher: Launcher) -> AppState {
    AppState {
        launcher,
        hosts: HostAllowList::new(["youtube.com", "youtu.be"]),
        relay_limits: RelayLimits {
            chunk_bytes: 4096,
            idle_timeout: Duration::from_secs(10),
        },
        metadata_limits: MetadataLimits {
            max_output_bytes: 64 * 1024,
            timeout: Duration::from_secs(10),
        },
        shutdown: CancellationToken::new(),
    }
}
