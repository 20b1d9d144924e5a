//! vidsummary - Main Application Entrypoint
//!
//! Parses command-line arguments, initializes logging and dispatches to the
//! library's `run`.

use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;
use vidsummary::document_builder::ExportFormat;
use vidsummary::orchestrator::DEFAULT_MAX_VIDEO_BYTES;
use vidsummary::{Command, Config, run};

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

/// Samples representative frames from a video and summarizes them with a vision model.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding cached analysis results
    #[arg(long, env = "VIDSUMMARY_CACHE_DIR", default_value = ".vidsummary-cache", global = true)]
    cache_dir: PathBuf,

    /// Upper bound on frames sent to the model
    #[arg(long, default_value_t = 30, global = true)]
    max_frames: usize,

    /// Mean luma difference (0-255) that counts as a scene cut
    #[arg(long, default_value_t = 30.0, global = true)]
    scene_threshold: f64,

    /// Analyses admitted per minute
    #[arg(long, env = "VIDSUMMARY_RATE_LIMIT", default_value_t = 10, global = true)]
    rate_limit: u32,

    /// Largest accepted video, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_VIDEO_BYTES, global = true)]
    max_video_bytes: u64,

    /// API key for the chat-completions endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1", global = true)]
    api_base: String,

    /// Vision-capable model name
    #[arg(long, env = "VIDSUMMARY_MODEL", default_value = "gpt-4o-mini", global = true)]
    model: String,

    /// Completion token limit
    #[arg(long, default_value_t = 1000, global = true)]
    max_tokens: u32,

    /// Summarizer request timeout in seconds
    #[arg(long, default_value_t = 120, global = true)]
    request_timeout: u64,

    /// Per-attempt download timeout in seconds
    #[arg(long, default_value_t = 60, global = true)]
    download_timeout: u64,

    /// Logging verbosity level
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a local video file or an http(s) URL
    Analyze {
        /// Path or URL of the video
        input: String,

        /// Analysis style (see `styles`)
        #[arg(short, long, default_value = "general")]
        style: String,

        /// Instructions used with the `custom` style
        #[arg(short, long)]
        prompt: Option<String>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Md)]
        format: OutputFormat,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the available analysis styles
    Styles,
    /// Print or export a cached result by key
    Show {
        key: String,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write a cached result to a file
    Export {
        key: String,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pdf)]
        format: OutputFormat,

        #[arg(short, long)]
        output: PathBuf,
    },
    /// Remove every cached result
    ClearCache,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Json,
    Md,
    Pdf,
}

impl From<OutputFormat> for ExportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => ExportFormat::Json,
            OutputFormat::Md => ExportFormat::Markdown,
            OutputFormat::Pdf => ExportFormat::Pdf,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum LogLevel {
    Error,
    Info,
    Debug,
}

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    let log_level = match args.log_level {
        LogLevel::Error => "error",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    info!("Starting vidsummary...");

    let command = match args.command {
        Commands::Analyze {
            input,
            style,
            prompt,
            format,
            output,
        } => {
            let is_url = input.starts_with("http://") || input.starts_with("https://");
            if !is_url && !PathBuf::from(&input).exists() {
                error!("Input file does not exist: {:?}", input);
                std::process::exit(1);
            }
            Command::Analyze {
                input,
                style,
                custom_prompt: prompt,
                format: format.into(),
                output,
            }
        }
        Commands::Styles => Command::Styles,
        Commands::Show { key, format, output } => Command::Show {
            key,
            format: format.into(),
            output,
        },
        Commands::Export { key, format, output } => Command::Show {
            key,
            format: format.into(),
            output: Some(output),
        },
        Commands::ClearCache => Command::ClearCache,
    };

    let config = Config {
        cache_dir: args.cache_dir,
        max_frames: args.max_frames,
        scene_threshold: args.scene_threshold,
        requests_per_minute: args.rate_limit,
        max_video_bytes: args.max_video_bytes,
        api_key: args.api_key,
        api_base: args.api_base,
        model: args.model,
        max_tokens: args.max_tokens,
        request_timeout: Duration::from_secs(args.request_timeout),
        download_timeout: Duration::from_secs(args.download_timeout),
    };

    if let Err(e) = run(config, command) {
        error!("Application failed: {:#}", e);
        std::process::exit(2);
    }

    info!("Done.");
}
