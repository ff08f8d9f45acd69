use serde::Deserialize;
use std::{env, fs, path::Path, path::PathBuf};

pub const DEFAULT_DB_PATH: &str = "data/visitlog.db";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HMAC key for session tokens. Must be set outside debug mode.
    pub secret_key: String,
    pub listen_host: String,
    pub listen_port: u16,
    pub db_path: String,
    pub debug: bool,
    /// IANA zone name; check-in times are stored as wall-clock time in it.
    pub timezone: String,
    pub one_checkin_per_day: bool,
    pub upload_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub dev_cors_origin: Option<String>,
    pub mail: MailConfig,
    /// TTF/OTF used for chart captions and labels.
    pub chart_font_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            listen_host: "0.0.0.0".to_string(),
            listen_port: 5151,
            db_path: DEFAULT_DB_PATH.to_string(),
            debug: false,
            timezone: "UTC".to_string(),
            one_checkin_per_day: true,
            upload_dir: PathBuf::from("uploads"),
            backup_dir: PathBuf::from("backups"),
            dev_cors_origin: None,
            mail: MailConfig::default(),
            chart_font_path: None,
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            server: "smtp.gmail.com".to_string(),
            port: 587,
            username: None,
            password: None,
            from: None,
        }
    }
}

impl MailConfig {
    /// Username and password, when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Yaml(e) => write!(f, "YAML error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        ConfigError::Yaml(value)
    }
}

impl AppConfig {
    /// Reads `CONFIG_PATH` (default `config.yaml`), then applies environment overrides.
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        let mut cfg = if Path::new(&path).exists() {
            Self::load_from_path(&path)?
        } else {
            Self::default()
        };
        cfg.apply_overrides(|key| env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        let cfg: AppConfig = serde_yaml::from_str(&text)?;
        Ok(cfg)
    }

    /// Applies `DB_PATH`, `PORT`, `SECRET_KEY`, `MAIL_*` and friends from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("SECRET_KEY") {
            self.secret_key = v;
        }
        if let Some(v) = get("DB_PATH") {
            self.db_path = v;
        }
        if let Some(v) = get("HOST") {
            self.listen_host = v;
        }
        if let Some(v) = get("PORT") {
            self.listen_port = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT is not a port number: {v}")))?;
        }
        if let Some(v) = get("DEBUG") {
            self.debug = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = get("TIMEZONE") {
            self.timezone = v;
        }
        if let Some(v) = get("UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = get("BACKUP_DIR") {
            self.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = get("MAIL_SERVER") {
            self.mail.server = v;
        }
        if let Some(v) = get("MAIL_PORT") {
            self.mail.port = v.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("MAIL_PORT is not a port number: {v}"))
            })?;
        }
        if let Some(v) = get("MAIL_USERNAME") {
            self.mail.username = Some(v);
        }
        if let Some(v) = get("MAIL_PASSWORD") {
            self.mail.password = Some(v);
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .trim()
            .parse::<chrono_tz::Tz>()
            .map_err(|_| ConfigError::Invalid(format!("unknown timezone: {}", self.timezone)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "secret_key must be set (config file or SECRET_KEY)".to_string(),
            ));
        }
        self.tz()?;
        Ok(())
    }
}
