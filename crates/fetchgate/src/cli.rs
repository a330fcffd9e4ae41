use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fetchgate")]
#[command(author, version, about = "HTTP gateway that streams media through yt-dlp", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway (default)
    Run {
        /// Port to listen on (overrides WEB_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Look up metadata for one URL and print it as JSON
    Info {
        /// Video URL
        url: String,
    },

    /// Check that the extractor can be started
    Check,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
