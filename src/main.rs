use std::{
    fs,
    io::Read,
    path::Path,
    process,
};

use cartomill::{
    application::{
        error::RenderError,
        service::{self, MapXmlService},
    },
    config,
    domain::params::MapParams,
    infra::{error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &RenderError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), RenderError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| RenderError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Compile(args) => run_compile(settings, args).await,
        config::Command::Migrate(args) => run_migrate(settings, args),
    }
}

async fn run_compile(
    settings: config::Settings,
    args: config::CompileArgs,
) -> Result<(), RenderError> {
    let raw = read_params(args.params.as_deref())?;
    let params: MapParams = serde_json::from_str(&raw)
        .map_err(|err| RenderError::unexpected(format!("failed to parse map parameters: {err}")))?;

    let (executor, pool) = service::executor_from_settings(&settings)?;
    let service = MapXmlService::new(&settings, executor);

    let result = service.render_xml(&params).await;
    if let Some(pool) = pool {
        pool.shutdown().await;
    }

    print!("{}", result?);
    Ok(())
}

fn run_migrate(settings: config::Settings, args: config::MigrateArgs) -> Result<(), RenderError> {
    let style = fs::read_to_string(&args.file).map_err(InfraError::Io)?;
    let from = args
        .from
        .as_deref()
        .unwrap_or(&settings.styles.default_style_version);
    let to = args
        .to
        .as_deref()
        .unwrap_or(&settings.styles.mapnik_version);

    let migrated = cartomill::domain::migrate::migrate(&style, from, to)?;
    print!("{migrated}");
    Ok(())
}

fn read_params(path: Option<&Path>) -> Result<String, RenderError> {
    match path {
        Some(path) => Ok(fs::read_to_string(path).map_err(InfraError::Io)?),
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .map_err(InfraError::Io)?;
            Ok(raw)
        }
    }
}
