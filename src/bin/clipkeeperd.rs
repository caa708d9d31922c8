// clipkeeper - Daemon Entry Point
// Serves the clipboard and snippet stores over local HTTP

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clipkeeper::config::{paths, DEFAULT_PORT};
use clipkeeper::daemon::{self, DaemonOptions};
use clipkeeper::store::HistoryLimits;

/// clipkeeper background daemon
#[derive(Parser, Debug)]
#[command(name = "clipkeeperd", version, about)]
struct Args {
    /// Port to listen on (127.0.0.1 only)
    #[arg(long, env = "CLIPKEEPER_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory for history.json and snippets.json
    #[arg(long, env = "CLIPKEEPER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, env = "CLIPKEEPER_MAX_HISTORY", default_value_t = 100)]
    max_history: usize,

    #[arg(long, env = "CLIPKEEPER_DISPLAY_COUNT", default_value_t = 10)]
    display_count: usize,

    #[arg(long, env = "CLIPKEEPER_ITEMS_PER_FOLDER", default_value_t = 10)]
    items_per_folder: usize,

    /// How often dirty stores are written, in milliseconds
    #[arg(long, default_value_t = 1000)]
    flush_interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    clipkeeper::logging::init();
    let args = Args::parse();

    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => paths::data_dir()?,
    };
    let mut options = DaemonOptions::new(args.port, data_dir);
    options.limits = HistoryLimits {
        max_items: args.max_history,
        display_count: args.display_count,
        items_per_folder: args.items_per_folder,
    };
    options.flush_interval = Duration::from_millis(args.flush_interval_ms.max(10));

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting clipkeeperd");
    daemon::run(options).await
}
