use std::path::Path;

use log::{LevelFilter, SetLoggerError};
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender},
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};

const PATTERN: &str = "[{h({l})} - {d(%Y-%m-%d %H:%M:%S)}] {m}{n}";

#[derive(thiserror::Error, Debug)]
pub enum LoggerError {
    #[error("Cannot open log file: {0}")]
    File(#[from] std::io::Error),

    #[error("Invalid logger configuration: {0}")]
    Config(String),

    #[error("Logger already initialized: {0}")]
    SetLogger(#[from] SetLoggerError),
}

/// Log to the console and, with a save directory, to `<save_dir>/<file_name>` as well.
pub fn init_log(save_dir: Option<&Path>, file_name: &str) -> Result<(), LoggerError> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();
    let mut config =
        Config::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));
    let mut root = Root::builder().appender("stdout");

    if let Some(dir) = save_dir {
        std::fs::create_dir_all(dir)?;
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(PATTERN)))
            .build(dir.join(file_name))?;
        config = config.appender(Appender::builder().build("file", Box::new(file)));
        root = root.appender("file");
    }

    let config = config
        .build(root.build(LevelFilter::Info))
        .map_err(|err| LoggerError::Config(err.to_string()))?;
    log4rs::init_config(config)?;
    update_panic_hook();

    Ok(())
}

fn update_panic_hook() {
    let hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC => {}", info);
        hook(info);
    }));
}
