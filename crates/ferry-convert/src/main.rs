mod cli;
mod logger;

use std::process::ExitCode;

use clap::Parser;
use ferry_store::{ConvertError, Converter};

use crate::cli::ConvertArgs;

fn main() -> ExitCode {
    let args = ConvertArgs::parse();

    if let Err(err) = logger::init_log(args.save_dir.as_deref(), &args.logging_file_name) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &ConvertArgs) -> Result<(), ConvertError> {
    let converter = Converter::from_config(args.config()?)?;
    let conversion = converter.convert(&args.request())?;
    log::debug!("{}", conversion.report);

    log::info!(
        "Convert {}-model {} into {}-model {}",
        args.src_fwk,
        args.src_model,
        args.dst_fwk,
        args.dst_model
    );
    Ok(())
}
