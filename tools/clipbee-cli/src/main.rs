//! ClipBee CLI: merge clips into one video and manage stored artifacts.
//!
//! Usage:
//!   clipbee render <CLIP>...       Merge clips into one output
//!   clipbee probe <PATH>           Show media metadata
//!   clipbee uploads list <SESSION> List a session's uploads
//!   clipbee uploads import ...     Copy files into a session
//!   clipbee sweep [--watch]        Delete expired artifacts
//!   clipbee clean-session <ID>     Remove one session's uploads
//!   clipbee check                  Check the encoding engine

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "clipbee",
    about = "Merge video clips with crossfade transitions",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Storage root (overrides config and CLIPBEE_STORAGE_ROOT)
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge clips into a single output
    Render {
        /// Clips in order, each `PATH` or `PATH,START[,END]` (seconds)
        #[arg(required_unless_present = "request")]
        clips: Vec<String>,

        /// Read the whole request from a JSON file instead
        #[arg(long, conflicts_with = "clips")]
        request: Option<PathBuf>,

        /// Transition: fade, dissolve, slide, none, or an engine effect name
        #[arg(short, long, default_value = "fade")]
        transition: String,

        /// Requested transition length (seconds)
        #[arg(long, default_value = "0.5")]
        transition_duration: f64,

        /// Output container: mp4, mov, mkv, webm
        #[arg(short, long, default_value = "mp4")]
        format: String,

        /// Resolution preset (4k, 1080p, 720p, 480p); overrides width/height
        #[arg(short, long)]
        quality: Option<String>,

        /// Output width
        #[arg(long, default_value = "1920")]
        width: u32,

        /// Output height
        #[arg(long, default_value = "1080")]
        height: u32,

        /// Output frame rate
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Session owning the sources; its consumed uploads are deleted
        #[arg(long)]
        session: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Keep running until the output's retention window ends, then delete it
        #[arg(long)]
        hold: bool,
    },

    /// Show metadata for a media file
    Probe {
        path: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage session uploads
    Uploads {
        #[command(subcommand)]
        action: UploadsAction,
    },

    /// Delete artifacts older than the retention window
    Sweep {
        /// Keep running and sweep on the configured interval
        #[arg(long)]
        watch: bool,
    },

    /// Remove one session's uploads, then sweep
    CleanSession { session: String },

    /// Check the encoding engine and supported transitions
    Check,
}

#[derive(Subcommand)]
enum UploadsAction {
    /// List a session's uploads with probed metadata
    List {
        session: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Copy files into a session's upload directory
    Import {
        session: String,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = clipbee_common::config::AppConfig::load();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    if let Some(root) = cli.storage_root {
        config.storage.root = root;
    }
    clipbee_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Render {
            clips,
            request,
            transition,
            transition_duration,
            format,
            quality,
            width,
            height,
            fps,
            session,
            json,
            hold,
        } => {
            let request = match request {
                Some(path) => commands::render::load_request(&path)?,
                None => commands::render::build_request(commands::render::RenderArgs {
                    clips,
                    transition,
                    transition_duration,
                    format,
                    quality,
                    width,
                    height,
                    fps,
                    session,
                })?,
            };
            commands::render::run(&config, request, json, hold).await
        }
        Commands::Probe { path, json } => commands::probe::run(&config, path, json).await,
        Commands::Uploads { action } => match action {
            UploadsAction::List { session, json } => {
                commands::uploads::list(&config, session, json).await
            }
            UploadsAction::Import { session, files } => {
                commands::uploads::import(&config, session, files).await
            }
        },
        Commands::Sweep { watch } => commands::sweep::run(&config, watch).await,
        Commands::CleanSession { session } => commands::sweep::clean_session(&config, session).await,
        Commands::Check => commands::check::run(&config).await,
    }
}
