use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use colored::*;
use crossterm::terminal;
use crossterm::tty::IsTty;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use crate::controller::{example_label, FormController, Phase, EXAMPLE_PROMPTS};
use crate::event_bus::{Event, EventBus, Metrics};
use crate::models::ConversionRecord;

/// A toast-style message derived from an `Event`.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub title: &'static str,
    pub description: String,
    pub destructive: bool,
    pub warning: bool,
}

/// Map an event to the notice shown for it. Events without a visible
/// notice (spinner and timer bookkeeping) map to `None`.
pub fn notice_for(event: &Event) -> Option<Notice> {
    let (title, description) = match event {
        Event::CatalogLoaded { count } => ("Models", format!("Loaded {} models.", count)),
        Event::CatalogFallback { reason, count } => (
            "Warning",
            format!("{}. Using the {} built-in models.", reason, count),
        ),
        Event::ValidationFailed { message } => ("Error", message.clone()),
        Event::ModelSelected { id } => ("Model", format!("Now using {}.", id)),
        Event::ConversionSucceeded { model } => (
            "Success",
            format!("Prompt converted to JSON using {}!", model),
        ),
        Event::ConversionFailed { message } => ("Conversion failed", message.clone()),
        Event::SubmitIgnored => ("Busy", "A conversion is already running.".to_string()),
        Event::Copied => ("Copied!", "JSON copied to clipboard.".to_string()),
        Event::CopyFailed { error } => ("Error", error.clone()),
        Event::Downloaded { path } => ("Downloaded!", format!("JSON saved to {}.", path)),
        Event::DownloadFailed { error } => ("Error", error.clone()),
        Event::ConversionStarted { .. } | Event::CopiedReset => return None,
    };
    Some(Notice {
        title,
        description,
        destructive: event.is_destructive(),
        warning: matches!(event, Event::CatalogFallback { .. } | Event::SubmitIgnored),
    })
}

/// Commands understood by the interactive session.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Models,
    Model(String),
    Examples,
    Example(usize),
    Key(String),
    NoKey,
    Convert,
    Copy,
    Download(Option<PathBuf>),
    History(Option<usize>),
    Status,
    Show,
    Quit,
    /// Plain text: replace the prompt and convert it
    Prompt(String),
    Empty,
}

pub fn parse_command(line: &str) -> std::result::Result<Command, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(Command::Prompt(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
        None => (rest, None),
    };

    match (name, arg) {
        ("help" | "h" | "?", _) => Ok(Command::Help),
        ("models", _) => Ok(Command::Models),
        ("model", Some(id)) => Ok(Command::Model(id.to_string())),
        ("model", None) => Err("usage: :model <id>".to_string()),
        ("examples", _) => Ok(Command::Examples),
        ("example", Some(n)) => match n.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(Command::Example(n - 1)),
            _ => Err(format!("usage: :example <1-{}>", EXAMPLE_PROMPTS.len())),
        },
        ("example", None) => Err(format!("usage: :example <1-{}>", EXAMPLE_PROMPTS.len())),
        ("key", Some(key)) => Ok(Command::Key(key.to_string())),
        ("key", None) => Err("usage: :key <api key>".to_string()),
        ("nokey", _) => Ok(Command::NoKey),
        ("convert" | "c", _) => Ok(Command::Convert),
        ("copy", _) => Ok(Command::Copy),
        ("download" | "save", path) => Ok(Command::Download(path.map(PathBuf::from))),
        ("history", None) => Ok(Command::History(None)),
        ("history", Some(n)) => n
            .parse::<usize>()
            .map(|n| Command::History(Some(n)))
            .map_err(|_| "usage: :history [count]".to_string()),
        ("status", _) => Ok(Command::Status),
        ("show", _) => Ok(Command::Show),
        ("quit" | "q" | "exit", _) => Ok(Command::Quit),
        (other, _) => Err(format!("unknown command :{} (try :help)", other)),
    }
}

const HELP: &str = "\
  <text>            set the prompt and convert it
  :convert          convert the current prompt again
  :examples         list example prompts
  :example <n>      use example prompt n
  :models           list available models
  :model <id>       select a model
  :key <value>      use your own API key
  :nokey            go back to the shared key
  :copy             copy the JSON output to the clipboard
  :download [path]  save the JSON output (default converted-prompt.json)
  :history [n]      show recent conversions
  :status           show backend info
  :show             show the current form
  :quit             leave";

fn rule_width() -> usize {
    terminal::size().map(|(cols, _)| (cols as usize).min(60)).unwrap_or(60)
}

/// Terminal front end. Notices go to stderr so stdout carries only JSON.
pub struct TerminalUI {
    headless: bool,
    receiver: broadcast::Receiver<Event>,
}

impl TerminalUI {
    pub fn new(headless: bool, colorful: bool, event_bus: &EventBus) -> Self {
        if headless || !colorful || !io::stderr().is_tty() {
            colored::control::set_override(false);
        }
        Self {
            headless,
            receiver: event_bus.subscribe(),
        }
    }

    pub fn start(&self, backend_url: &str) {
        if self.headless {
            return;
        }
        let width = rule_width();
        eprintln!("{}", "=".repeat(width).bright_blue());
        eprintln!("{}", "Prompt Converter".bright_white().bold());
        eprintln!("{}", "Natural language prompts in, structured JSON out".dimmed());
        eprintln!("{}", "=".repeat(width).bright_blue());
        eprintln!("Backend: {}", backend_url.bright_cyan());
        eprintln!();
    }

    /// Print notices for everything emitted since the last call.
    pub fn flush_notices(&mut self) {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if let Some(notice) = notice_for(&event) {
                        self.print_notice(&notice);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!("Skipped {} notices", skipped);
                }
                Err(_) => break,
            }
        }
    }

    fn print_notice(&self, notice: &Notice) {
        let title = if notice.destructive {
            format!("✗ {}", notice.title).red().bold()
        } else if notice.warning {
            format!("! {}", notice.title).yellow().bold()
        } else {
            format!("✓ {}", notice.title).green().bold()
        };
        eprintln!("{} {}", title, notice.description);
    }

    pub fn display_error(&self, error: &str) {
        eprintln!("{} {}", "✗ Error:".red().bold(), error);
    }

    /// Run `fut` behind a spinner unless headless.
    pub async fn with_spinner<F, T>(&self, message: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        if self.headless {
            return fut.await;
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        let out = fut.await;
        spinner.finish_and_clear();
        out
    }

    pub fn print_models(&self, controller: &FormController) {
        let state = controller.state();
        for model in &state.models {
            let marker = if model.id == state.selected_model { "*" } else { " " };
            print!("{} {:<18} {}", marker, model.id.bright_cyan(), model.label());
            if !model.description.is_empty() {
                print!(" - {}", model.description.dimmed());
            }
            println!();
        }
        if state.catalog_fallback {
            eprintln!("{}", "(built-in list; backend catalog unavailable)".yellow());
        }
    }

    pub fn print_examples(&self) {
        for (i, example) in EXAMPLE_PROMPTS.iter().enumerate() {
            eprintln!("  {}. {}", i + 1, example_label(example));
        }
    }

    pub fn print_form(&self, controller: &FormController) {
        let state = controller.state();
        let phase = match state.phase {
            Phase::Idle => "idle".normal(),
            Phase::Loading => "converting".yellow(),
            Phase::Ready => "ready".green(),
            Phase::Error => "error".red(),
        };
        eprintln!("Prompt:  {}", if state.prompt.is_empty() { "(empty)" } else { state.prompt.as_str() });
        eprintln!("Model:   {}", state.selected_model.bright_cyan());
        eprintln!(
            "API key: {}",
            if state.use_own_key { "your own" } else { "shared backend key" }
        );
        eprintln!("State:   {}", phase);
        if let Some(error) = &state.last_error {
            eprintln!("Last error: {}", error.red());
        }
        if let Some(output) = &state.output {
            self.print_output(output, state.model_used.as_deref());
        }
    }

    pub fn print_output(&self, output: &str, model_used: Option<&str>) {
        if let Some(model) = model_used {
            eprintln!("{}", format!("JSON Output ({})", model).bright_white().bold());
        }
        println!("{}", output);
        let _ = io::stdout().flush();
    }

    pub fn print_history(&self, records: &[ConversionRecord]) {
        if records.is_empty() {
            eprintln!("No conversions yet.");
            return;
        }
        for record in records {
            let when = record
                .timestamp
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            let prompt = record.original_prompt.as_deref().unwrap_or("");
            let secs = record
                .processing_time
                .map(|t| format!("{:.2}s", t))
                .unwrap_or_default();
            eprintln!(
                "{} {:<16} {:>7}  {}",
                when.dimmed(),
                record.model.as_deref().unwrap_or("?").bright_cyan(),
                secs,
                example_label(prompt)
            );
        }
    }

    fn prompt_line(&self, controller: &FormController) -> String {
        let copied = if controller.is_copied() { " copied" } else { "" };
        format!("{}{}> ", controller.state().selected_model, copied)
    }

    pub fn finish(&self, metrics: &Metrics) {
        if self.headless {
            return;
        }
        eprintln!();
        eprintln!(
            "Conversions: {} ok, {} failed, {} rejected | copies: {} | downloads: {}",
            metrics.conversions_succeeded.to_string().bright_green(),
            metrics.conversions_failed.to_string().bright_red(),
            metrics.validation_failures,
            metrics.copies,
            metrics.downloads
        );
    }
}

/// Interactive loop over stdin. Returns when stdin closes or on `:quit`.
pub async fn run_session(
    ui: &mut TerminalUI,
    controller: &mut FormController,
    history_limit: usize,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("Type a prompt to convert it, or :help for commands.");

    loop {
        ui.flush_notices();
        eprint!("{}", ui.prompt_line(controller).bold());
        let _ = io::stderr().flush();

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(usage) => {
                ui.display_error(&usage);
                continue;
            }
        };

        if !dispatch(ui, controller, command, history_limit).await {
            break;
        }
    }

    ui.flush_notices();
    info!("Session ended");
    Ok(())
}

/// Execute one command. Returns `false` when the session should end.
async fn dispatch(
    ui: &mut TerminalUI,
    controller: &mut FormController,
    command: Command,
    history_limit: usize,
) -> bool {
    match command {
        Command::Empty => {}
        Command::Help => eprintln!("{}", HELP),
        Command::Quit => return false,
        Command::Models => ui.print_models(controller),
        Command::Model(id) => {
            let _ = controller.select_model(&id).await;
        }
        Command::Examples => ui.print_examples(),
        Command::Example(index) => match controller.select_example(index) {
            Ok(example) => eprintln!("Prompt: {}", example),
            Err(e) => ui.display_error(&e.to_string()),
        },
        Command::Key(key) => {
            controller.set_api_key(&key);
            controller.set_use_own_key(true);
            eprintln!("Using your own API key.");
        }
        Command::NoKey => {
            controller.set_use_own_key(false);
            eprintln!("Using the shared backend key.");
        }
        Command::Prompt(text) => {
            controller.set_prompt(&text);
            convert(ui, controller).await;
        }
        Command::Convert => convert(ui, controller).await,
        Command::Copy => {
            if let Err(e @ crate::error::ConverterError::Validation(_)) = controller.copy().await {
                ui.display_error(&e.to_string());
            }
        }
        Command::Download(path) => {
            if let Err(e @ crate::error::ConverterError::Validation(_)) =
                controller.download(path.as_deref()).await
            {
                ui.display_error(&e.to_string());
            }
        }
        Command::History(limit) => {
            let limit = limit.unwrap_or(history_limit);
            match controller.history(limit).await {
                Ok(records) => ui.print_history(&records),
                Err(e) => ui.display_error(&e.to_string()),
            }
        }
        Command::Status => match controller.api_info().await {
            Ok(info) => eprintln!(
                "{} {} ({})",
                info.message,
                info.version.as_deref().unwrap_or(""),
                controller.backend_url()
            ),
            Err(e) => ui.display_error(&e.to_string()),
        },
        Command::Show => ui.print_form(controller),
    }
    true
}

/// Submit the current prompt and print the JSON on success. The spinner
/// only shows when the submit button would be enabled.
pub async fn convert(ui: &mut TerminalUI, controller: &mut FormController) {
    let sent = if controller.can_submit() {
        let message = format!("Converting with {}...", controller.state().selected_model);
        ui.with_spinner(&message, controller.submit()).await
    } else {
        controller.submit().await
    };
    ui.flush_notices();
    if sent && controller.state().phase == Phase::Ready {
        if let Some(output) = &controller.state().output {
            ui.print_output(output, None);
        }
    }
}
