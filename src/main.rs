//! dash-resizer - Resize Tableau dashboards to a new canvas size
//!
//! Main entry point for the command-line tool.
//!
//! # Execution Flow
//!
//! 1. Load `Resizer Config.yaml` from the config directory (defaults if absent)
//! 2. Initialize logging → `<config dir>/logs/dash-resizer.<date>`
//! 3. Either list the dashboards of a workbook, or resize one of them and
//!    print the path of the new workbook
//!
//! # Configuration Files
//!
//! Expected in `Resizer Data/` unless `--config-dir` says otherwise:
//! - `Resizer Config.yaml`: Output and work directories, asset folders, legacy encoding

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use dash_resizer::config::DEFAULT_CONFIG_DIR;
use dash_resizer::{APP_NAME, ConfigManager, ResizeRequest, ResizeService, VERSION};

#[derive(Parser)]
#[command(name = "dash-resizer")]
#[command(version)]
#[command(about = "Resize a Tableau dashboard and rescale every zone inside it", long_about = None)]
struct Cli {
    /// Workbook to resize (.twb or .twbx)
    workbook: Utf8PathBuf,

    /// Name of the dashboard to resize
    #[arg(short, long, required_unless_present = "list_dashboards")]
    dashboard: Option<String>,

    /// New dashboard width in pixels
    #[arg(long, required_unless_present = "list_dashboards")]
    width: Option<String>,

    /// New dashboard height in pixels
    #[arg(long, required_unless_present = "list_dashboards")]
    height: Option<String>,

    /// Print the dashboard names in the workbook and exit
    #[arg(long, conflicts_with_all = ["dashboard", "width", "height"])]
    list_dashboards: bool,

    /// Directory holding Resizer Config.yaml and logs
    #[arg(long, default_value = DEFAULT_CONFIG_DIR)]
    config_dir: Utf8PathBuf,

    /// Write the resized workbook here instead of the configured directory
    #[arg(short, long)]
    output_dir: Option<Utf8PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(&cli.config_dir)?;
    let mut settings = config_manager.load_config()?.resizer_settings;
    if let Some(output_dir) = &cli.output_dir {
        settings.output_dir = output_dir.to_string();
    }
    settings.debug_mode |= cli.debug;

    let log_dir = config_manager.config_dir().join("logs");
    let _guard = dash_resizer::logging::setup_logging(
        log_dir.as_str(),
        APP_NAME,
        settings.debug_mode,
        settings.debug_mode,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    // Config was read before the subscriber existed, so report it now
    if config_manager.has_config_file() {
        tracing::info!("Using config {}", config_manager.config_path());
    } else {
        tracing::warn!(
            "Config file not found at {}, using defaults",
            config_manager.config_path()
        );
    }

    let service = ResizeService::new(settings)?;

    if cli.list_dashboards {
        let names = service
            .list_dashboards(&cli.workbook)
            .with_context(|| format!("Failed to list dashboards in {}", cli.workbook))?;
        for name in names {
            println!("{}", name);
        }
        return Ok(());
    }

    let request = ResizeRequest::new(
        &cli.workbook,
        cli.dashboard.unwrap_or_default(),
        cli.width.as_deref().unwrap_or_default(),
        cli.height.as_deref().unwrap_or_default(),
    )?;

    let report = service.resize(&request).map_err(|e| {
        tracing::error!("Resize failed: {}", e);
        anyhow::Error::new(e)
    })?;

    if !report.dashboard_found {
        eprintln!(
            "warning: dashboard {:?} not found, workbook copied unchanged",
            request.dashboard
        );
    }
    println!("{}", report.output_path);

    Ok(())
}
