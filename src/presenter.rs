use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use crossterm::tty::IsTty;
use log::{debug, warn};
use serde_json::Value;

use crate::error::{ConverterError, Result};

/// Name the exported file gets unless the user picks another.
pub const DOWNLOAD_FILENAME: &str = "converted-prompt.json";

/// MIME type of the exported file.
pub const JSON_MIME: &str = "application/json";

/// Render a value as two-space indented JSON, keys in received order.
pub fn format(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Platform clipboard.
pub trait Clipboard: Send + Sync {
    fn write_text(&mut self, text: &str) -> Result<()>;
}

/// Copies through the terminal with an OSC 52 escape sequence. Works over
/// SSH and in most modern terminal emulators.
pub struct TerminalClipboard<W: Write + Send + Sync> {
    out: W,
    /// Wrap the sequence for tmux/screen passthrough
    passthrough: bool,
}

impl TerminalClipboard<io::Stderr> {
    /// OSC 52 on stderr, so stdout keeps only JSON.
    pub fn stderr() -> Self {
        let mut clipboard = Self::new(io::stderr());
        clipboard.passthrough = std::env::var("TMUX").is_ok() || std::env::var("STY").is_ok();
        clipboard
    }
}

impl<W: Write + Send + Sync> TerminalClipboard<W> {
    pub fn new(out: W) -> Self {
        Self { out, passthrough: false }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + Sync> Clipboard for TerminalClipboard<W> {
    fn write_text(&mut self, text: &str) -> Result<()> {
        let osc52 = format!("\x1b]52;c;{}\x07", STANDARD.encode(text.as_bytes()));
        let sequence = if self.passthrough {
            format!("\x1bPtmux;\x1b{}\x1b\\", osc52)
        } else {
            osc52
        };
        self.out
            .write_all(sequence.as_bytes())
            .and_then(|_| self.out.flush())
            .map_err(|e| ConverterError::Clipboard(e.to_string()))
    }
}

/// A native clipboard program fed through stdin.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipboardCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ClipboardCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn run(&self, text: &str) -> Result<()> {
        let fail = |e: String| ConverterError::Clipboard(format!("{}: {}", self.program, e));

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| fail(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).map_err(|e| fail(e.to_string()))?;
        }

        let status = child.wait().map_err(|e| fail(e.to_string()))?;
        if !status.success() {
            return Err(fail(format!("exited with {}", status)));
        }
        Ok(())
    }
}

/// Clipboard programs worth trying on this platform, in order.
pub fn native_commands() -> Vec<ClipboardCommand> {
    if cfg!(target_os = "macos") {
        return vec![ClipboardCommand::new("pbcopy", &[])];
    }
    if cfg!(target_os = "windows") {
        return vec![ClipboardCommand::new(
            "powershell",
            &[
                "-NoProfile",
                "-Command",
                "[Console]::InputEncoding = [System.Text.Encoding]::UTF8; Set-Clipboard -Value ([Console]::In.ReadToEnd())",
            ],
        )];
    }

    let mut commands = Vec::new();
    if std::env::var("WAYLAND_DISPLAY").is_ok() {
        commands.push(ClipboardCommand::new("wl-copy", &[]));
    }
    commands.push(ClipboardCommand::new("xclip", &["-selection", "clipboard"]));
    commands.push(ClipboardCommand::new("xsel", &["--clipboard", "--input"]));
    commands
}

/// OSC 52 when a terminal is attached, then the native clipboard tools.
/// Fails only when nothing could take the text.
pub struct SystemClipboard {
    terminal: Option<Box<dyn Clipboard>>,
    commands: Vec<ClipboardCommand>,
}

impl SystemClipboard {
    pub fn detect() -> Self {
        let terminal: Option<Box<dyn Clipboard>> = if io::stderr().is_tty() {
            Some(Box::new(TerminalClipboard::stderr()))
        } else {
            None
        };
        Self::new(terminal, native_commands())
    }

    pub fn new(terminal: Option<Box<dyn Clipboard>>, commands: Vec<ClipboardCommand>) -> Self {
        Self { terminal, commands }
    }
}

impl Clipboard for SystemClipboard {
    fn write_text(&mut self, text: &str) -> Result<()> {
        let mut reasons = Vec::new();

        let sent_to_terminal = match self.terminal.as_mut() {
            Some(terminal) => match terminal.write_text(text) {
                Ok(()) => true,
                Err(e) => {
                    reasons.push(e.to_string());
                    false
                }
            },
            None => {
                reasons.push("no terminal attached".to_string());
                false
            }
        };

        for command in &self.commands {
            match command.run(text) {
                Ok(()) => {
                    debug!("Copied with {}", command.program);
                    return Ok(());
                }
                Err(e) => reasons.push(e.to_string()),
            }
        }

        if sent_to_terminal {
            return Ok(());
        }
        Err(ConverterError::Clipboard(format!("no clipboard available ({})", reasons.join("; "))))
    }
}

/// What a download produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Download {
    pub path: PathBuf,
    pub mime: &'static str,
    pub bytes: usize,
}

/// Serializes results and exports them to the clipboard or disk.
pub struct ResultPresenter {
    clipboard: Box<dyn Clipboard>,
    download_dir: PathBuf,
}

impl ResultPresenter {
    pub fn new(clipboard: Box<dyn Clipboard>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            clipboard,
            download_dir: download_dir.into(),
        }
    }

    pub fn format(&self, value: &Value) -> String {
        format(value)
    }

    /// Failures are returned, never swallowed.
    pub fn copy(&mut self, text: &str) -> Result<()> {
        self.clipboard.write_text(text).map_err(|e| {
            warn!("Clipboard write failed: {}", e);
            e
        })
    }

    /// Write `text` as `<download_dir>/<filename>`. `filename` must be a
    /// bare file name.
    pub fn download(&self, text: &str, filename: &str) -> Result<Download> {
        download_to(text, &self.download_dir, filename)
    }

    /// Write to an explicit path; its parent replaces the download dir.
    pub fn download_as(&self, text: &str, path: &Path) -> Result<Download> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ConverterError::Download(format!("invalid file name: {}", path.display())))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => self.download_dir.clone(),
        };
        download_to(text, &dir, filename)
    }
}

fn download_to(text: &str, dir: &Path, filename: &str) -> Result<Download> {
    if filename.trim().is_empty() || filename.contains('/') || filename.contains('\\') {
        return Err(ConverterError::Download(format!("invalid file name: {:?}", filename)));
    }

    fs::create_dir_all(dir).map_err(|e| ConverterError::Download(format!("{}: {}", dir.display(), e)))?;

    let path = dir.join(filename);
    fs::write(&path, text.as_bytes()).map_err(|e| ConverterError::Download(format!("{}: {}", path.display(), e)))?;

    debug!("Wrote {} bytes to {}", text.len(), path.display());
    Ok(Download {
        path,
        mime: JSON_MIME,
        bytes: text.len(),
    })
}
