use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;

mod api;
mod catalog;
mod config;
mod controller;
mod conversion;
mod error;
mod event_bus;
mod logger;
mod models;
mod presenter;
mod ui;

use api::HttpBackend;
use config::Config;
use controller::{FormController, Phase};
use event_bus::{EventBus, EventEmitter};
use presenter::{ResultPresenter, SystemClipboard};
use ui::TerminalUI;

#[derive(Parser)]
#[command(name = "prompt_converter", version, about = "Convert natural-language prompts into structured JSON")]
struct Args {
    /// Run without banner, colors or spinner
    #[arg(long)]
    headless: bool,
    /// Verbose logging (repeat for debug output)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Config file (defaults to prompt_converter.toml and friends)
    #[arg(short, long)]
    config: Option<String>,
    /// Conversion backend base URL
    #[arg(long)]
    backend_url: Option<String>,
    /// Model id to convert with
    #[arg(short, long)]
    model: Option<String>,
    /// Use your own provider API key instead of the backend's shared key
    #[arg(long)]
    api_key: Option<String>,
    /// Also save the JSON output to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Print the model catalog and exit
    #[arg(long)]
    list_models: bool,
    /// Prompt to convert; starts an interactive session when omitted
    #[arg(trailing_var_arg = true)]
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    logger::init(args.verbose);

    let mut config = Config::load(&args.config)?;
    config.apply_env();
    config.merge_with_args(args.headless, args.backend_url.clone(), args.model.clone());

    log::info!("Using backend {}", config.backend_url());
    let backend = HttpBackend::new(&config.backend).context("Failed to set up backend client")?;
    let event_bus = Arc::new(EventBus::new(64));
    let presenter = ResultPresenter::new(
        Box::new(SystemClipboard::detect()),
        shellexpand::tilde(&config.ui.download_dir).as_ref(),
    );
    let mut controller = FormController::new(
        Arc::new(backend),
        presenter,
        &config.ui.default_model,
        Duration::from_millis(config.ui.copied_reset_ms),
    );
    controller.set_event_bus(event_bus.clone());

    let mut ui = TerminalUI::new(args.headless, config.ui.colorful, &event_bus);
    ui.start(controller.backend_url());

    controller.load_catalog().await;
    let one_shot = !args.prompt.is_empty();
    if let Some(model) = &args.model {
        if let Err(e) = controller.select_model(model).await {
            if one_shot || args.list_models {
                ui.flush_notices();
                return Err(e.into());
            }
        }
    }
    if let Some(key) = &args.api_key {
        controller.set_api_key(key);
        controller.set_use_own_key(true);
    }
    ui.flush_notices();

    if args.list_models {
        ui.print_models(&controller);
        return Ok(());
    }

    if one_shot {
        controller.set_prompt(&args.prompt.join(" "));
        ui::convert(&mut ui, &mut controller).await;

        if controller.state().phase != Phase::Ready {
            let reason = controller
                .state()
                .last_error
                .clone()
                .unwrap_or_else(|| "Nothing was converted".to_string());
            bail!(reason);
        }
        if let Some(path) = &args.output {
            let result = controller.download(Some(path)).await;
            ui.flush_notices();
            result?;
        }
        return Ok(());
    }

    ui::run_session(&mut ui, &mut controller, config.history.default_limit).await?;
    ui.finish(&event_bus.get_metrics().await);
    Ok(())
}
