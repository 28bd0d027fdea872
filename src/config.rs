use std::net::IpAddr;
use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Every route, including static assets, lives under this prefix.
    pub api_prefix: String,
    pub body_limit_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticAssetsConfig {
    pub mount: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProxyConfig {
    pub trusted: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_seconds: u64,
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Static bearer tokens accepted by the default strategy.
    pub tokens: Vec<String>,
    /// Optional file with one token per line, read once at startup.
    pub token_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    pub enabled: bool,
    pub metrics_report_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub workers: Option<usize>,
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub static_assets: StaticAssetsConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub jobs: JobsConfig,
    pub queue: QueueConfig,
    pub security: Option<SecurityConfig>,
}

const DEFAULTS: &str = include_str!("../config/default.toml");

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        match ::config::Config::builder()
            .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => panic!("Failed to deserialize default config: {}", e),
            },
            Err(e) => panic!("Failed to parse default config: {}", e),
        }
    }
}

impl QueueConfig {
    /// Worker count, defaulting to the number of CPUs (at most 8).
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| num_cpus::get().clamp(1, 8))
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        // Optional local file: gatehouse.toml (in CWD)
        .add_source(::config::File::with_name("gatehouse").required(false));

    if let Ok(custom_path) = std::env::var("GATEHOUSE_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(
        ::config::Environment::with_prefix("GATEHOUSE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("proxy.trusted")
            .with_list_parse_key("auth.tokens")
            .try_parsing(true),
    );

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }
    let prefix = &cfg.server.api_prefix;
    if !prefix.starts_with('/') || (prefix.len() > 1 && prefix.ends_with('/')) {
        return Err(anyhow::anyhow!("server.api_prefix must start with '/' and not end with '/': {}", prefix));
    }
    if cfg.server.body_limit_bytes == 0 {
        return Err(anyhow::anyhow!("server.body_limit_bytes must be > 0"));
    }

    // Static assets must stay inside the API surface
    let mount = &cfg.static_assets.mount;
    if !crate::context::path_is_under(mount, prefix) || mount == prefix || mount.ends_with('/') {
        return Err(anyhow::anyhow!(
            "static_assets.mount must be a sub-path of {} without trailing '/': {}",
            prefix,
            mount
        ));
    }

    // Proxy
    for entry in &cfg.proxy.trusted {
        parse_cidr(entry)?;
    }

    // Rate limit
    if cfg.rate_limit.max_requests == 0 {
        return Err(anyhow::anyhow!("rate_limit.max_requests must be > 0"));
    }
    if cfg.rate_limit.window_seconds == 0 {
        return Err(anyhow::anyhow!("rate_limit.window_seconds must be > 0"));
    }
    if cfg.rate_limit.cleanup_interval_seconds == 0 {
        return Err(anyhow::anyhow!("rate_limit.cleanup_interval_seconds must be > 0"));
    }

    // Jobs & queue
    if cfg.jobs.metrics_report_interval_seconds == 0 {
        return Err(anyhow::anyhow!("jobs.metrics_report_interval_seconds must be > 0"));
    }
    if let Some(w) = cfg.queue.workers {
        if w == 0 || w > 64 {
            return Err(anyhow::anyhow!("queue.workers must be in 1..=64"));
        }
    }
    if cfg.queue.capacity == 0 {
        return Err(anyhow::anyhow!("queue.capacity must be > 0"));
    }

    if cfg.auth.tokens.is_empty() && cfg.auth.token_file.is_none() {
        tracing::warn!("No auth tokens configured - protected routes will reject every request");
    }

    Ok(())
}

/// Parses `10.0.0.0/8`, `::1` or `192.168.1.7` into an address and prefix length.
pub fn parse_cidr(entry: &str) -> anyhow::Result<(IpAddr, u8)> {
    let entry = entry.trim();
    let (addr, len) = match entry.split_once('/') {
        Some((a, l)) => (a, Some(l)),
        None => (entry, None),
    };
    let ip: IpAddr = addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid proxy.trusted entry {:?}: {}", entry, e))?;
    let max = if ip.is_ipv4() { 32 } else { 128 };
    let prefix = match len {
        Some(l) => l
            .parse::<u8>()
            .ok()
            .filter(|p| *p <= max)
            .ok_or_else(|| anyhow::anyhow!("invalid prefix length in proxy.trusted entry {:?}", entry))?,
        None => max,
    };
    Ok((ip, prefix))
}
