use argh::FromArgs;
use eyre::Context;
use segment_coordinator::{config::Config, nodes::historical};
use std::{fs, path::PathBuf};

#[derive(FromArgs)]
/// Historical node that holds segments in memory
struct Args {
    #[argh(positional)]
    config_file: PathBuf,
    /// name of the server entry in the config file
    #[argh(option)]
    server: String,
}

fn main() -> eyre::Result<()> {
    let args: Args = argh::from_env();

    if let Err(err) = set_up_logger(&args.server) {
        eprintln!(
            "{:?}",
            eyre::Error::new(err).wrap_err("failed to set up logger")
        );
    }

    let config: Config = serde_yaml::from_str(
        &fs::read_to_string(&args.config_file).context("failed to read config file")?,
    )
    .context("failed to parse config file")?;
    config.validate().context("invalid config file")?;

    historical::run(&config, &args.server)
}

fn set_up_logger(server: &str) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .chain(fern::log_file(format!("{}.log", server))?)
        .apply()?;
    Ok(())
}
