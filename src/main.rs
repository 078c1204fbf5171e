use std::process;

use serde::Serialize;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use transfer_cache::{
    application::{error::AppError, payload},
    cache::{CacheConfig, ReqwestTransport},
    config::{self, Command, InspectArgs, PurgeArgs, RecordArgs},
    infra::{
        payload::{read_payload, write_payload},
        telemetry,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    let cache_config = CacheConfig::from(&settings.cache);

    match cli_args.command {
        Command::Inspect(args) => run_inspect(args).await,
        Command::Purge(args) => run_purge(args).await,
        Command::Record(args) => run_record(args, &cache_config).await,
    }
}

async fn run_inspect(args: InspectArgs) -> Result<(), AppError> {
    let store = read_payload(&args.payload).await?;
    print_json(&payload::inspect(&store)?)
}

async fn run_purge(args: PurgeArgs) -> Result<(), AppError> {
    let store = read_payload(&args.payload).await?;
    let report = payload::purge(&store);

    let output = args.output.as_deref().unwrap_or(args.payload.as_path());
    write_payload(output, &store).await?;
    info!(
        output = %output.display(),
        removed = report.removed.len(),
        "payload purged"
    );
    print_json(&report)
}

async fn run_record(args: RecordArgs, cache_config: &CacheConfig) -> Result<(), AppError> {
    let client = reqwest::Client::builder()
        .build()
        .map_err(|err| AppError::unexpected(format!("failed to build http client: {err}")))?;
    let transport = ReqwestTransport::new(client);
    let (store, recorded) = payload::record(&args.urls, cache_config, &transport).await?;

    write_payload(&args.output, &store).await?;
    print_json(&recorded)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
