use std::env;
use url::Url;

/// Hard ceiling imposed by S3-compatible stores on presigned URL lifetimes.
pub const MAX_PRESIGN_TTL_SECONDS: i64 = 7 * 24 * 3600;

#[derive(Debug, Clone)]
pub struct Config {
    pub s3_region: String,
    pub s3_bucket: String,
    pub s3_access_key_id: String,
    pub s3_secret_access_key: String,
    pub s3_endpoint: String,
    pub token_secret: String,
    pub token_ttl_seconds: i64,
    pub presign_ttl_seconds: i64,
    pub server_path: String,
    pub public_url: Option<String>,
    pub server_ssl: bool,
    pub verbose_errors: bool,
    pub listen: String,
    pub metrics_listen: String,
    pub log_level: String,
    pub insecure_dev: bool,
}

impl Config {
    pub fn load() -> Result<Self, String> {
        let store = StoreEnv::from_env()?;
        let grant = GrantEnv::from_env()?;
        let server = ServerEnv::from_env();
        let config = Self::from_parts(store, grant, server);
        config.validate()?;
        Ok(config)
    }

    fn from_parts(store: StoreEnv, grant: GrantEnv, server: ServerEnv) -> Self {
        Self {
            s3_region: store.region,
            s3_bucket: store.bucket,
            s3_access_key_id: store.access_key_id,
            s3_secret_access_key: store.secret_access_key,
            s3_endpoint: store.endpoint,
            token_secret: grant.token_secret,
            token_ttl_seconds: grant.token_ttl_seconds,
            presign_ttl_seconds: grant.presign_ttl_seconds,
            server_path: server.server_path,
            public_url: server.public_url,
            server_ssl: server.server_ssl,
            verbose_errors: server.verbose_errors,
            listen: server.listen,
            metrics_listen: server.metrics_listen,
            log_level: server.log_level,
            insecure_dev: server.insecure_dev,
        }
    }

    fn validate(&self) -> Result<(), String> {
        validate_endpoint(&self.s3_endpoint)?;
        validate_server_path(&self.server_path)?;
        validate_ttls(self.token_ttl_seconds, self.presign_ttl_seconds)?;
        if !self.insecure_dev {
            validate_required_secret("LFSG_TOKEN_SECRET", &self.token_secret)?;
        }
        Ok(())
    }
}

struct StoreEnv {
    region: String,
    bucket: String,
    access_key_id: String,
    secret_access_key: String,
    endpoint: String,
}

impl StoreEnv {
    fn from_env() -> Result<Self, String> {
        let region = required_env("LFSG_S3_REGION", "LFSG_S3_REGION is required")?;
        let endpoint = env::var("LFSG_S3_ENDPOINT")
            .unwrap_or_else(|_| format!("https://s3.{}.amazonaws.com", region));
        Ok(Self {
            region,
            bucket: required_env("LFSG_S3_BUCKET", "LFSG_S3_BUCKET is required")?,
            access_key_id: required_env(
                "LFSG_S3_ACCESS_KEY_ID",
                "LFSG_S3_ACCESS_KEY_ID is required",
            )?,
            secret_access_key: required_env(
                "LFSG_S3_SECRET_ACCESS_KEY",
                "LFSG_S3_SECRET_ACCESS_KEY is required",
            )?,
            endpoint,
        })
    }
}

struct GrantEnv {
    token_secret: String,
    token_ttl_seconds: i64,
    presign_ttl_seconds: i64,
}

impl GrantEnv {
    fn from_env() -> Result<Self, String> {
        Ok(Self {
            token_secret: required_env("LFSG_TOKEN_SECRET", "LFSG_TOKEN_SECRET is required")?,
            token_ttl_seconds: parse_env("LFSG_TOKEN_TTL_SECONDS").unwrap_or(900),
            presign_ttl_seconds: parse_env("LFSG_PRESIGN_TTL_SECONDS").unwrap_or(900),
        })
    }
}

struct ServerEnv {
    server_path: String,
    public_url: Option<String>,
    server_ssl: bool,
    verbose_errors: bool,
    listen: String,
    metrics_listen: String,
    log_level: String,
    insecure_dev: bool,
}

impl ServerEnv {
    fn from_env() -> Self {
        Self {
            server_path: env_or_default("LFSG_SERVER_PATH", "/:project/lfs"),
            public_url: env::var("LFSG_PUBLIC_URL")
                .ok()
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty()),
            server_ssl: bool_env("LFSG_SERVER_SSL"),
            verbose_errors: bool_env("LFSG_VERBOSE_ERRORS"),
            listen: normalize_listen_addr(env_or_default("LFSG_LISTEN", ":8080")),
            metrics_listen: normalize_listen_addr(env_or_default("LFSG_METRICS_LISTEN", ":9100")),
            log_level: env_or_default("LFSG_LOG_LEVEL", "info"),
            insecure_dev: bool_env("LFSG_INSECURE_DEV"),
        }
    }
}

fn required_env(key: &str, missing_message: &str) -> Result<String, String> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| missing_message.to_string())
}

fn env_or_default(key: &str, default_value: &str) -> String {
    env::var(key).unwrap_or_else(|_| default_value.to_string())
}

fn parse_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn bool_env(key: &str) -> bool {
    env::var(key)
        .ok()
        .and_then(|value| parse_bool(&value))
        .unwrap_or(false)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn normalize_listen_addr(value: String) -> String {
    if value.starts_with(':') {
        format!("0.0.0.0{}", value)
    } else {
        value
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), String> {
    let url = Url::parse(endpoint).map_err(|_| "LFSG_S3_ENDPOINT must be a valid URL")?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err("LFSG_S3_ENDPOINT must be an absolute http/https URL".into());
    }
    if url.host_str().is_none() {
        return Err("LFSG_S3_ENDPOINT must include a host".into());
    }
    Ok(())
}

fn validate_server_path(server_path: &str) -> Result<(), String> {
    if !server_path.starts_with('/') {
        return Err("LFSG_SERVER_PATH must start with '/'".into());
    }
    if !server_path.contains(":project") {
        return Err("LFSG_SERVER_PATH must contain the :project placeholder".into());
    }
    Ok(())
}

fn validate_ttls(token_ttl_seconds: i64, presign_ttl_seconds: i64) -> Result<(), String> {
    if token_ttl_seconds <= 0 {
        return Err("LFSG_TOKEN_TTL_SECONDS must be positive".into());
    }
    if presign_ttl_seconds <= 0 || presign_ttl_seconds > MAX_PRESIGN_TTL_SECONDS {
        return Err(format!(
            "LFSG_PRESIGN_TTL_SECONDS must be between 1 and {}",
            MAX_PRESIGN_TTL_SECONDS
        ));
    }
    Ok(())
}

fn validate_required_secret(env_name: &str, value: &str) -> Result<(), String> {
    if matches!(value.trim(), "" | "change-me") {
        return Err(format!(
            "{env_name} must be changed from default when LFSG_INSECURE_DEV=false"
        ));
    }
    Ok(())
}
