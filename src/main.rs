use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use tracing::info;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use dv::controller::Controller;
use dv::domain::{DVConfig, DVError};
use dv::engine::NumericRule;
use dv::model::{Model, Status};
use dv::ui::TableUI;

/// Explore a CSV file in the terminal: column statistics, charts and a paginated table.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// CSV file to open on start
    file: Option<String>,

    /// Rows per page of the data table
    #[arg(long, default_value_t = 5)]
    page_size: usize,

    /// When a column counts as numeric
    #[arg(long, value_enum, default_value_t = NumericRule::Any)]
    numeric_rule: NumericRule,

    /// Maximum rendered width of a table column
    #[arg(long, default_value_t = 24)]
    max_column_width: usize,

    /// Event poll interval in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    /// Write logs to this file, filtered by RUST_LOG (default: dv=info)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> DVConfig {
        DVConfig::default()
            .with_page_size(self.page_size)
            .with_numeric_rule(self.numeric_rule)
            .with_max_column_width(self.max_column_width)
            .with_event_poll_time(self.poll_ms)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = setup_logging(args.log_file.as_ref()) {
        eprintln!("Error: Can not set up logging: {e}");
        return ExitCode::FAILURE;
    }

    let mut terminal = ratatui::init();
    let result = run(&args, &mut terminal);
    ratatui::restore();

    match result {
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

// The terminal belongs to the UI, so logs only go to a file if one is given.
fn setup_logging(log_file: Option<&PathBuf>) -> Result<(), DVError> {
    let Some(path) = log_file else {
        return Ok(());
    };
    let file = File::create(path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dv=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        )
        .with(ErrorLayer::default())
        .init();
    Ok(())
}

fn run(args: &Args, terminal: &mut ratatui::DefaultTerminal) -> Result<(), DVError> {
    info!("Starting dv!");
    let cfg = args.config();

    let mut model = Model::init(&cfg)?;
    let mut ui = TableUI::new(&cfg);
    let controller = Controller::new(&cfg);

    if let Some(file) = &args.file {
        model.open(file);
    }

    while model.status != Status::QUITTING {
        // Render the current view
        terminal.draw(|f| ui.draw(&model, f))?;

        // Apply a finished load before handling input
        if let Some(message) = model.poll_loader() {
            model.update(Some(message))?;
        }

        // Handle events and map to a Message
        let message = controller.handle_event(&model)?;
        model.update(message)?;
    }

    info!("Quitting dv!");
    Ok(())
}
