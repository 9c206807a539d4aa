use rocket::figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub address: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

/// Shared secret the API expects in the `X-Auth-String` header.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AuthConfig {
    pub auth_string: String,
}

/// Connection settings for the upstream club management portal.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Seconds to establish a connection.
    pub connect_timeout: u64,
    /// Seconds for the whole exchange; the portal is slow to render.
    pub read_timeout: u64,
    /// Seconds to wait for a free connection slot.
    pub pool_timeout: u64,
    pub max_connections: usize,
    pub max_idle_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4000,
            address: "127.0.0.1".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            proxy: None,
            connect_timeout: 15,
            read_timeout: 45,
            pool_timeout: 15,
            max_connections: 10,
            max_idle_connections: 5,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources in priority order:
    /// 1. built-in defaults
    /// 2. ClubSource.toml (base configuration file)
    /// 3. environment variables prefixed with CLUB_
    /// 4. the bare deployment variables (SOURCE_BASE_URL, SOURCE_USERNAME,
    ///    SOURCE_PASSWORD, AUTH_STRING, HTTP_PROXY)
    pub fn load() -> Result<Self, figment::Error> {
        let figment = Figment::new()
            .merge(Toml::string(&toml::to_string(&Config::default()).unwrap()).nested())
            .merge(Toml::file("ClubSource.toml").nested())
            .merge(Env::prefixed("CLUB_").split("_"))
            .merge(Env::raw().only(&["SOURCE_BASE_URL"]).map(|_| "source.base_url".into()))
            .merge(Env::raw().only(&["SOURCE_USERNAME"]).map(|_| "source.username".into()))
            .merge(Env::raw().only(&["SOURCE_PASSWORD"]).map(|_| "source.password".into()))
            .merge(Env::raw().only(&["AUTH_STRING"]).map(|_| "auth.auth_string".into()))
            .merge(Env::raw().only(&["HTTP_PROXY"]).map(|_| "source.proxy".into()));

        figment.extract()
    }
}
