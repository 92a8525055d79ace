//! Map XML service: the one entry point callers use to turn per-call map
//! parameters into renderer XML, plus the wiring from settings to executors.

use std::{sync::Arc, time::Instant};

use serde_json::{Value, json};
use tracing::info;

use crate::{
    application::{
        compiler::{CartoCliCompiler, CompileOptions, CompileRequest},
        error::RenderError,
        executor::{CompileExecutor, InProcessExecutor, PooledExecutor},
        pool::{PoolSettings, WorkerCommand, WorkerPool},
    },
    config::Settings,
    domain::{
        builder::{self, BuildDefaults},
        migrate,
        params::MapParams,
    },
};

pub struct MapXmlService {
    defaults: BuildDefaults,
    target_version: String,
    default_style_version: String,
    options: CompileOptions,
    env: Value,
    executor: Arc<dyn CompileExecutor>,
}

impl MapXmlService {
    pub fn new(settings: &Settings, executor: Arc<dyn CompileExecutor>) -> Self {
        let env = if settings.carto.env.is_empty() {
            Value::Null
        } else {
            json!(settings.carto.env)
        };
        Self {
            defaults: build_defaults(settings),
            target_version: settings.styles.mapnik_version.clone(),
            default_style_version: settings.styles.default_style_version.clone(),
            options: compile_options(settings),
            env,
            executor,
        }
    }

    /// Build the map document, migrate and attach its styles, and compile the
    /// result to renderer XML.
    pub async fn render_xml(&self, params: &MapParams) -> Result<String, RenderError> {
        let started_at = Instant::now();

        let mut document = builder::build_document(params, &self.defaults)?;
        builder::attach_styles(
            &mut document,
            params,
            &self.target_version,
            &self.default_style_version,
        )?;
        let layers = document.layers.len();
        let stylesheets = document.stylesheets.len();

        let mml = serde_json::to_value(&document)
            .map_err(|err| RenderError::unexpected(format!("map document: {err}")))?;
        let request = CompileRequest {
            mml,
            options: self.options.clone(),
            env: self.env.clone(),
        };

        let xml = self.executor.compile(request).await?;

        info!(
            target = "application::service",
            op = "map::render_xml",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            layers,
            stylesheets,
            xml_bytes = xml.len(),
            "Map parameters compiled to renderer XML"
        );

        Ok(xml)
    }

    /// Migrate a single style to the configured target version. `from`
    /// defaults to the configured style version.
    pub fn migrate_style(&self, style: &str, from: Option<&str>) -> Result<String, RenderError> {
        let from = from.unwrap_or(&self.default_style_version);
        Ok(migrate::migrate(style, from, &self.target_version)?)
    }
}

/// Builder defaults derived from the resolved settings.
pub fn build_defaults(settings: &Settings) -> BuildDefaults {
    let ds = &settings.datasource;
    let mut datasource = crate::domain::document::Datasource::new();
    datasource.insert("type".to_string(), json!(ds.kind));
    datasource.insert("srid".to_string(), json!(ds.srid));
    if let Some(host) = ds.host.as_ref() {
        datasource.insert("host".to_string(), json!(host));
    }
    if let Some(port) = ds.port {
        datasource.insert("port".to_string(), json!(port));
    }
    if let Some(user) = ds.user.as_ref() {
        datasource.insert("user".to_string(), json!(user));
    }
    if let Some(password) = ds.password.as_ref() {
        datasource.insert("password".to_string(), json!(password));
    }
    if let Some(extent) = ds.extent.as_ref() {
        datasource.insert("extent".to_string(), json!(extent));
    }
    if let Some(max_size) = ds.max_size {
        datasource.insert("max_size".to_string(), json!(max_size));
    }

    BuildDefaults {
        srid: settings.map.srid,
        maximum_extent: settings.map.maximum_extent.clone(),
        format: settings.map.format.clone(),
        datasource,
        geometry_field: ds.geometry_field.clone(),
        raster_field: ds.raster_field.clone(),
    }
}

pub fn compile_options(settings: &Settings) -> CompileOptions {
    CompileOptions {
        cli_path: settings.carto.cli_path.clone(),
        scratch_dir: settings.carto.scratch_dir.clone(),
        mapnik_version: settings.styles.mapnik_version.clone(),
    }
}

/// Pick the executor the settings ask for. When the pool is enabled the
/// second element carries it so the caller can shut it down on exit.
pub fn executor_from_settings(
    settings: &Settings,
) -> Result<(Arc<dyn CompileExecutor>, Option<Arc<WorkerPool>>), RenderError> {
    if !settings.workers.enabled {
        let executor = InProcessExecutor::new(Arc::new(CartoCliCompiler));
        return Ok((Arc::new(executor), None));
    }

    let program = match settings.workers.program.clone() {
        Some(program) => program,
        None => {
            let exe = std::env::current_exe().map_err(|err| {
                RenderError::unexpected(format!("cannot locate worker executable: {err}"))
            })?;
            exe.with_file_name("cartomill-worker")
        }
    };

    let pool = WorkerPool::start(PoolSettings {
        command: WorkerCommand::new(program),
        min_workers: settings.workers.min,
        max_workers: settings.workers.max,
        idle_timeout: settings.workers.idle_timeout,
        job_timeout: settings.workers.job_timeout,
    });

    Ok((Arc::new(PooledExecutor::new(Arc::clone(&pool))), Some(pool)))
}
