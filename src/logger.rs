use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

/// Log records go to stderr; stdout carries only converted JSON.
pub const LOG_STREAM: TerminalMode = TerminalMode::Stderr;

/// Install the process-wide logger. `verbose` is the number of `-v` flags.
pub fn init(verbose: u8) {
    let config = ConfigBuilder::new()
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .build();
    let _ = TermLogger::init(level_for(verbose), config, LOG_STREAM, ColorChoice::Auto);
}

pub fn level_for(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}
