//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{collections::BTreeMap, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "cartomill";
const DEFAULT_SRID: u32 = 3857;
const DEFAULT_MAXIMUM_EXTENT: &str = "-20037508.3,-20037508.3,20037508.3,20037508.3";
const DEFAULT_MAP_FORMAT: &str = "png8";
const DEFAULT_DATASOURCE_TYPE: &str = "postgis";
const DEFAULT_DATASOURCE_SRID: u32 = 4326;
const DEFAULT_GEOMETRY_FIELD: &str = "the_geom";
const DEFAULT_RASTER_FIELD: &str = "the_raster_webmercator";
const DEFAULT_MAPNIK_VERSION: &str = "2.0.2";
const DEFAULT_STYLE_VERSION: &str = "2.0.0";
const DEFAULT_WORKERS_MIN: usize = 0;
const DEFAULT_WORKERS_MAX: usize = 4;
const DEFAULT_WORKER_IDLE_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_WORKER_JOB_TIMEOUT_MS: u64 = 0;
pub(crate) const DEFAULT_CARTO_CLI_PATH: &str = "carto";
pub(crate) const DEFAULT_CARTO_SCRATCH_DIR: &str = "/tmp/cartomill";

/// Command-line arguments for the cartomill binary.
#[derive(Debug, Parser)]
#[command(name = "cartomill", version, about = "CartoCSS map definition compiler")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "CARTOMILL_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Compile map parameters into renderer XML.
    Compile(CompileArgs),
    /// Migrate a CartoCSS file between renderer versions.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Clone)]
pub struct CompileArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Path to the JSON map parameters; reads standard input when omitted.
    #[arg(value_name = "PARAMS", value_hint = ValueHint::FilePath)]
    pub params: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Path to the CartoCSS file to migrate.
    #[arg(value_name = "STYLE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Source renderer version; defaults to the configured style version.
    #[arg(long = "from", value_name = "VERSION")]
    pub from: Option<String>,

    /// Target renderer version; defaults to the configured Mapnik version.
    #[arg(long = "to", value_name = "VERSION")]
    pub to: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the map SRID.
    #[arg(long = "map-srid", value_name = "SRID")]
    pub map_srid: Option<u32>,

    /// Override the target Mapnik API version.
    #[arg(long = "mapnik-version", value_name = "VERSION")]
    pub mapnik_version: Option<String>,

    /// Override the assumed version of styles that declare none.
    #[arg(long = "default-style-version", value_name = "VERSION")]
    pub default_style_version: Option<String>,

    /// Override the carto CLI executable path.
    #[arg(long = "carto-cli-path", value_name = "PATH")]
    pub carto_cli_path: Option<PathBuf>,

    /// Override the scratch directory for compiler inputs.
    #[arg(long = "carto-scratch-dir", value_name = "PATH")]
    pub carto_scratch_dir: Option<PathBuf>,

    /// Toggle the out-of-process worker pool.
    #[arg(
        long = "workers-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub workers_enabled: Option<bool>,

    /// Override the number of workers pre-warmed and kept alive.
    #[arg(long = "workers-min", value_name = "COUNT")]
    pub workers_min: Option<usize>,

    /// Override the worker pool size ceiling.
    #[arg(long = "workers-max", value_name = "COUNT")]
    pub workers_max: Option<usize>,

    /// Override the idle worker timeout in milliseconds (0 disables reaping).
    #[arg(long = "workers-idle-timeout-ms", value_name = "MILLIS")]
    pub workers_idle_timeout_ms: Option<u64>,

    /// Override the per-job timeout in milliseconds (0 disables the timeout).
    #[arg(long = "workers-job-timeout-ms", value_name = "MILLIS")]
    pub workers_job_timeout_ms: Option<u64>,

    /// Override the worker executable; defaults to `cartomill-worker` next to
    /// the main binary.
    #[arg(long = "worker-program", value_name = "PATH")]
    pub worker_program: Option<PathBuf>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub map: MapSettings,
    pub datasource: DatasourceSettings,
    pub styles: StyleSettings,
    pub carto: CartoSettings,
    pub workers: WorkerSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct MapSettings {
    pub srid: u32,
    pub maximum_extent: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatasourceSettings {
    pub kind: String,
    pub srid: u32,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub extent: Option<String>,
    pub max_size: Option<u32>,
    pub geometry_field: String,
    pub raster_field: String,
}

#[derive(Debug, Clone)]
pub struct StyleSettings {
    /// Target renderer API version styles are migrated to before compiling.
    pub mapnik_version: String,
    /// Assumed version of styles supplied without one.
    pub default_style_version: String,
}

#[derive(Debug, Clone)]
pub struct CartoSettings {
    pub cli_path: PathBuf,
    pub scratch_dir: PathBuf,
    /// Extra environment variables handed opaquely to the compiler process.
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub enabled: bool,
    pub min: usize,
    pub max: usize,
    pub idle_timeout: Duration,
    pub job_timeout: Option<Duration>,
    pub program: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("CARTOMILL").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Compile(args) => raw.apply_overrides(&args.overrides),
        Command::Migrate(args) => raw.apply_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    map: RawMapSettings,
    datasource: RawDatasourceSettings,
    styles: RawStyleSettings,
    carto: RawCartoSettings,
    workers: RawWorkerSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(srid) = overrides.map_srid {
            self.map.srid = Some(srid);
        }
        if let Some(version) = overrides.mapnik_version.as_ref() {
            self.styles.mapnik_version = Some(version.clone());
        }
        if let Some(version) = overrides.default_style_version.as_ref() {
            self.styles.default_style_version = Some(version.clone());
        }
        if let Some(path) = overrides.carto_cli_path.as_ref() {
            self.carto.cli_path = Some(path.clone());
        }
        if let Some(dir) = overrides.carto_scratch_dir.as_ref() {
            self.carto.scratch_dir = Some(dir.clone());
        }
        if let Some(enabled) = overrides.workers_enabled {
            self.workers.enabled = Some(enabled);
        }
        if let Some(min) = overrides.workers_min {
            self.workers.min = Some(min);
        }
        if let Some(max) = overrides.workers_max {
            self.workers.max = Some(max);
        }
        if let Some(millis) = overrides.workers_idle_timeout_ms {
            self.workers.idle_timeout_ms = Some(millis);
        }
        if let Some(millis) = overrides.workers_job_timeout_ms {
            self.workers.job_timeout_ms = Some(millis);
        }
        if let Some(program) = overrides.worker_program.as_ref() {
            self.workers.program = Some(program.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            map,
            datasource,
            styles,
            carto,
            workers,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            map: build_map_settings(map)?,
            datasource: build_datasource_settings(datasource),
            styles: build_style_settings(styles)?,
            carto: build_carto_settings(carto)?,
            workers: build_worker_settings(workers)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_map_settings(map: RawMapSettings) -> Result<MapSettings, LoadError> {
    let srid = map.srid.unwrap_or(DEFAULT_SRID);
    if srid == 0 {
        return Err(LoadError::invalid("map.srid", "must be greater than zero"));
    }

    let maximum_extent = match map.maximum_extent {
        Some(extent) => {
            let trimmed = extent.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        None => Some(DEFAULT_MAXIMUM_EXTENT.to_string()),
    };

    let format = match map.format {
        Some(format) => {
            let trimmed = format.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        None => Some(DEFAULT_MAP_FORMAT.to_string()),
    };

    Ok(MapSettings {
        srid,
        maximum_extent,
        format,
    })
}

fn build_datasource_settings(datasource: RawDatasourceSettings) -> DatasourceSettings {
    DatasourceSettings {
        kind: datasource
            .kind
            .unwrap_or_else(|| DEFAULT_DATASOURCE_TYPE.to_string()),
        srid: datasource.srid.unwrap_or(DEFAULT_DATASOURCE_SRID),
        host: datasource.host,
        port: datasource.port,
        user: datasource.user,
        password: datasource.password,
        extent: datasource
            .extent
            .or_else(|| Some(DEFAULT_MAXIMUM_EXTENT.to_string())),
        max_size: datasource.max_size,
        geometry_field: datasource
            .geometry_field
            .unwrap_or_else(|| DEFAULT_GEOMETRY_FIELD.to_string()),
        raster_field: datasource
            .raster_field
            .unwrap_or_else(|| DEFAULT_RASTER_FIELD.to_string()),
    }
}

fn build_style_settings(styles: RawStyleSettings) -> Result<StyleSettings, LoadError> {
    let mapnik_version = styles
        .mapnik_version
        .unwrap_or_else(|| DEFAULT_MAPNIK_VERSION.to_string());
    if mapnik_version.trim().is_empty() {
        return Err(LoadError::invalid(
            "styles.mapnik_version",
            "version must not be empty",
        ));
    }

    let default_style_version = styles
        .default_style_version
        .unwrap_or_else(|| DEFAULT_STYLE_VERSION.to_string());
    if default_style_version.trim().is_empty() {
        return Err(LoadError::invalid(
            "styles.default_style_version",
            "version must not be empty",
        ));
    }

    Ok(StyleSettings {
        mapnik_version,
        default_style_version,
    })
}

fn build_carto_settings(carto: RawCartoSettings) -> Result<CartoSettings, LoadError> {
    let cli_path = carto
        .cli_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CARTO_CLI_PATH));
    if cli_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "carto.cli_path",
            "path must not be empty",
        ));
    }

    let scratch_dir = carto
        .scratch_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CARTO_SCRATCH_DIR));
    if scratch_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "carto.scratch_dir",
            "path must not be empty",
        ));
    }

    Ok(CartoSettings {
        cli_path,
        scratch_dir,
        env: carto.env.unwrap_or_default(),
    })
}

fn build_worker_settings(workers: RawWorkerSettings) -> Result<WorkerSettings, LoadError> {
    // Out-of-process compilation is opt-in.
    let enabled = workers.enabled.unwrap_or(false);

    let min = workers.min.unwrap_or(DEFAULT_WORKERS_MIN);
    let max = workers.max.unwrap_or(DEFAULT_WORKERS_MAX);
    if max == 0 {
        return Err(LoadError::invalid(
            "workers.max",
            "must be greater than zero",
        ));
    }
    if min > max {
        return Err(LoadError::invalid(
            "workers.min",
            "must not exceed workers.max",
        ));
    }

    let idle_timeout = Duration::from_millis(
        workers
            .idle_timeout_ms
            .unwrap_or(DEFAULT_WORKER_IDLE_TIMEOUT_MS),
    );

    let job_timeout_ms = workers
        .job_timeout_ms
        .unwrap_or(DEFAULT_WORKER_JOB_TIMEOUT_MS);
    let job_timeout = (job_timeout_ms > 0).then(|| Duration::from_millis(job_timeout_ms));

    Ok(WorkerSettings {
        enabled,
        min,
        max,
        idle_timeout,
        job_timeout,
        program: workers.program,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMapSettings {
    srid: Option<u32>,
    maximum_extent: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatasourceSettings {
    #[serde(rename = "type")]
    kind: Option<String>,
    srid: Option<u32>,
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    extent: Option<String>,
    max_size: Option<u32>,
    geometry_field: Option<String>,
    raster_field: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStyleSettings {
    mapnik_version: Option<String>,
    default_style_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCartoSettings {
    cli_path: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
    env: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkerSettings {
    enabled: Option<bool>,
    min: Option<usize>,
    max: Option<usize>,
    idle_timeout_ms: Option<u64>,
    job_timeout_ms: Option<u64>,
    program: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_without_any_input() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert_eq!(settings.map.srid, DEFAULT_SRID);
        assert_eq!(settings.styles.mapnik_version, DEFAULT_MAPNIK_VERSION);
        assert_eq!(settings.styles.default_style_version, DEFAULT_STYLE_VERSION);
        assert_eq!(settings.datasource.kind, "postgis");
        assert_eq!(settings.datasource.srid, DEFAULT_DATASOURCE_SRID);
        assert!(!settings.workers.enabled);
        assert_eq!(settings.workers.max, DEFAULT_WORKERS_MAX);
        assert_eq!(settings.workers.job_timeout, None);
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.styles.mapnik_version = Some("2.1.0".to_string());
        raw.workers.max = Some(8);

        let overrides = Overrides {
            mapnik_version: Some("3.0.12".to_string()),
            workers_max: Some(2),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        raw.apply_overrides(&overrides);

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.styles.mapnik_version, "3.0.12");
        assert_eq!(settings.workers.max, 2);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    }

    #[test]
    fn zero_job_timeout_disables_the_budget() {
        let mut raw = RawSettings::default();
        raw.workers.job_timeout_ms = Some(0);
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.workers.job_timeout, None);
    }

    #[test]
    fn zero_worker_ceiling_is_rejected() {
        let mut raw = RawSettings::default();
        raw.workers.max = Some(0);
        let err = Settings::from_raw(raw).expect_err("invalid settings");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "workers.max",
                ..
            }
        ));
    }

    #[test]
    fn worker_minimum_above_the_ceiling_is_rejected() {
        let mut raw = RawSettings::default();
        raw.workers.min = Some(8);
        raw.workers.max = Some(2);
        let err = Settings::from_raw(raw).expect_err("invalid settings");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "workers.min",
                ..
            }
        ));
    }

    #[test]
    fn blank_maximum_extent_clears_the_default() {
        let mut raw = RawSettings::default();
        raw.map.maximum_extent = Some("  ".to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.map.maximum_extent, None);
    }

    #[test]
    fn parse_migrate_arguments() {
        let args = CliArgs::parse_from([
            "cartomill",
            "migrate",
            "--from",
            "2.0.0",
            "--to",
            "2.1.0",
            "/tmp/style.mss",
        ]);

        match args.command {
            Command::Migrate(migrate) => {
                assert_eq!(migrate.from.as_deref(), Some("2.0.0"));
                assert_eq!(migrate.to.as_deref(), Some("2.1.0"));
                assert_eq!(migrate.file, std::path::Path::new("/tmp/style.mss"));
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_compile_overrides() {
        let args = CliArgs::parse_from([
            "cartomill",
            "compile",
            "--carto-cli-path",
            "/opt/carto/bin/carto",
            "--workers-enabled",
            "false",
            "/tmp/params.json",
        ]);

        match args.command {
            Command::Compile(compile) => {
                assert_eq!(
                    compile.overrides.carto_cli_path.as_deref(),
                    Some(std::path::Path::new("/opt/carto/bin/carto"))
                );
                assert_eq!(compile.overrides.workers_enabled, Some(false));
                assert_eq!(
                    compile.params.as_deref(),
                    Some(std::path::Path::new("/tmp/params.json"))
                );
            }
            _ => panic!("wrong command parsed"),
        }
    }
}
