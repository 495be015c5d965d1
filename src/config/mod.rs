//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "scorta";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8700;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_APP_PREFIX: &str = "scorta";
const DEFAULT_GENERATION: &str = "v1";
const DEFAULT_API_PREFIX: &str = "/api/";
const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:8700";

fn default_static_manifest() -> Vec<String> {
    [
        "/",
        "/login",
        "/register",
        "/manifest.webmanifest",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_image_prefixes() -> Vec<String> {
    ["/uploads/", "/icons/"].into_iter().map(str::to_string).collect()
}

/// Command-line arguments for the Scorta binary.
#[derive(Debug, Parser)]
#[command(name = "scorta", version, about = "Scorta offline caching gateway")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SCORTA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the Scorta gateway.
    Serve(Box<ServeArgs>),
    /// Send a REFRESH_CACHE control message to a running gateway.
    #[command(name = "refresh")]
    Refresh(RefreshArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct RefreshArgs {
    /// Base URL of the gateway to refresh.
    #[arg(
        long = "gateway-url",
        value_name = "URL",
        default_value = DEFAULT_GATEWAY_URL
    )]
    pub gateway_url: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

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

    /// Override the upstream origin the gateway fronts.
    #[arg(long = "upstream-origin", value_name = "URL")]
    pub upstream_origin: Option<String>,

    /// Override the upstream request timeout.
    #[arg(long = "upstream-timeout-seconds", value_name = "SECONDS")]
    pub upstream_timeout_seconds: Option<u64>,

    /// Override the partition name prefix.
    #[arg(long = "cache-app-prefix", value_name = "PREFIX")]
    pub cache_app_prefix: Option<String>,

    /// Override the partition generation tag.
    #[arg(long = "cache-generation", value_name = "TAG")]
    pub cache_generation: Option<String>,

    /// Override the API route prefix classified as network-only.
    #[arg(long = "cache-api-prefix", value_name = "PATH")]
    pub cache_api_prefix: Option<String>,

    /// Override the bounded wait for refresh acknowledgements.
    #[arg(long = "cache-refresh-timeout-ms", value_name = "MILLIS")]
    pub cache_refresh_timeout_ms: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub upstream: UpstreamSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen_addr: SocketAddr,
    pub graceful_shutdown: Duration,
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
pub struct UpstreamSettings {
    pub origin: Option<Url>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub app_prefix: String,
    pub generation: String,
    pub static_manifest: Vec<String>,
    pub api_prefix: String,
    pub image_prefixes: Vec<String>,
    pub refresh_timeout: Duration,
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

    builder = builder.add_source(Environment::with_prefix("SCORTA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Refresh(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    upstream: RawUpstreamSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(origin) = overrides.upstream_origin.as_ref() {
            self.upstream.origin = Some(origin.clone());
        }
        if let Some(seconds) = overrides.upstream_timeout_seconds {
            self.upstream.timeout_seconds = Some(seconds);
        }
        if let Some(prefix) = overrides.cache_app_prefix.as_ref() {
            self.cache.app_prefix = Some(prefix.clone());
        }
        if let Some(generation) = overrides.cache_generation.as_ref() {
            self.cache.generation = Some(generation.clone());
        }
        if let Some(prefix) = overrides.cache_api_prefix.as_ref() {
            self.cache.api_prefix = Some(prefix.clone());
        }
        if let Some(millis) = overrides.cache_refresh_timeout_ms {
            self.cache.refresh_timeout_ms = Some(millis);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            upstream,
            cache,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let upstream = build_upstream_settings(upstream)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self {
            server,
            logging,
            upstream,
            cache,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let listen_addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.listen_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }
    let graceful_shutdown = Duration::from_secs(graceful_secs);

    Ok(ServerSettings {
        listen_addr,
        graceful_shutdown,
    })
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

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let origin = match upstream.origin {
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                let url = Url::parse(trimmed).map_err(|err| {
                    LoadError::invalid("upstream.origin", format!("invalid URL: {err}"))
                })?;
                if url.cannot_be_a_base() {
                    return Err(LoadError::invalid(
                        "upstream.origin",
                        "must be an absolute http(s) URL",
                    ));
                }
                Some(url)
            }
        }
        None => None,
    };

    let timeout_secs = upstream
        .timeout_seconds
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "upstream.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(UpstreamSettings {
        origin,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let app_prefix = cache
        .app_prefix
        .unwrap_or_else(|| DEFAULT_APP_PREFIX.to_string());
    if app_prefix.trim().is_empty() {
        return Err(LoadError::invalid(
            "cache.app_prefix",
            "prefix must not be empty",
        ));
    }

    let generation = cache
        .generation
        .unwrap_or_else(|| DEFAULT_GENERATION.to_string());
    if generation.trim().is_empty() {
        return Err(LoadError::invalid(
            "cache.generation",
            "generation must not be empty",
        ));
    }

    let static_manifest = cache.static_manifest.unwrap_or_else(default_static_manifest);
    for path in &static_manifest {
        if !path.starts_with('/') {
            return Err(LoadError::invalid(
                "cache.static_manifest",
                format!("`{path}` must start with `/`"),
            ));
        }
    }

    let api_prefix = cache
        .api_prefix
        .unwrap_or_else(|| DEFAULT_API_PREFIX.to_string());
    if !api_prefix.starts_with('/') {
        return Err(LoadError::invalid(
            "cache.api_prefix",
            "prefix must start with `/`",
        ));
    }

    let image_prefixes = cache.image_prefixes.unwrap_or_else(default_image_prefixes);
    for prefix in &image_prefixes {
        if !prefix.starts_with('/') {
            return Err(LoadError::invalid(
                "cache.image_prefixes",
                format!("`{prefix}` must start with `/`"),
            ));
        }
    }

    let refresh_millis = cache
        .refresh_timeout_ms
        .unwrap_or(DEFAULT_REFRESH_TIMEOUT_MS);
    if refresh_millis == 0 {
        return Err(LoadError::invalid(
            "cache.refresh_timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        app_prefix,
        generation,
        static_manifest,
        api_prefix,
        image_prefixes,
        refresh_timeout: Duration::from_millis(refresh_millis),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    origin: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    app_prefix: Option<String>,
    generation: Option<String>,
    static_manifest: Option<Vec<String>>,
    api_prefix: Option<String>,
    image_prefixes: Option<Vec<String>>,
    refresh_timeout_ms: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
