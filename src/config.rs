use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Reference cap on a single upload body: 1 GiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 1 << 30;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: Option<u16>,
    pub max_upload_bytes: Option<u64>,
    pub staging_dir: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub url_mode: Option<String>,
    pub presign_expiry_secs: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub jwt_secret: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSection {
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSection {
    pub interval_secs: Option<u64>,
    pub max_age_secs: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreSection {
    pub seed_file: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub auth: AuthSection,
    pub media: MediaSection,
    pub cleanup: CleanupSection,
    pub datastore: DatastoreSection,
}

/// How a committed video location is written to the record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlMode {
    /// Publicly resolvable URL built from bucket, region and key.
    Public,
    /// `bucket,key` pair, signed into a temporary URL when read.
    Presigned,
}

impl FromStr for UrlMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "presigned" | "signed" => Ok(Self::Presigned),
            other => anyhow::bail!("unknown storage url mode: {other}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub url_mode: UrlMode,
    pub presign_expiry: Duration,
    pub max_attempts: u32,
}

#[derive(Clone, Debug)]
pub struct MediaConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

#[derive(Clone, Debug)]
pub struct CleanupConfig {
    pub interval: Duration,
    pub max_age: Duration,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub max_upload_bytes: u64,
    pub staging_dir: PathBuf,
    pub storage: StorageConfig,
    pub jwt_secret: String,
    pub media: MediaConfig,
    pub cleanup: CleanupConfig,
    pub seed_file: Option<PathBuf>,
}

impl Config {
    /// Load `config.toml` from the working directory (if present) and apply
    /// environment overrides on top of it.
    pub fn load() -> anyhow::Result<Self> {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let config_path = base_dir.join("config.toml");
        let config_file = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            Some(
                toml::from_str::<ConfigFile>(&content)
                    .with_context(|| format!("failed to parse {}", config_path.display()))?,
            )
        } else {
            None
        };

        Self::resolve(config_file, &base_dir, |key| std::env::var(key).ok())
    }

    /// Merge file values, environment values (which win) and defaults.
    pub fn resolve<F>(file: Option<ConfigFile>, base_dir: &Path, env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = file.unwrap_or_default();

        let port = env("PORT")
            .and_then(|p| p.parse().ok())
            .or(file.server.port)
            .unwrap_or(8091);

        let max_upload_bytes = env("MAX_UPLOAD_BYTES")
            .and_then(|v| v.parse().ok())
            .or(file.server.max_upload_bytes)
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        let staging_dir = env("STAGING_DIR")
            .or(file.server.staging_dir)
            .map(|dir| absolutize(base_dir, &dir))
            .unwrap_or_else(std::env::temp_dir);

        let bucket = env("S3_BUCKET")
            .or(file.storage.bucket)
            .filter(|b| !b.is_empty())
            .context("S3_BUCKET must be set")?;

        let region = env("S3_REGION")
            .or(file.storage.region)
            .unwrap_or_else(|| "us-east-1".to_string());

        let endpoint = env("S3_ENDPOINT")
            .or(file.storage.endpoint)
            .filter(|e| !e.is_empty());

        let url_mode = match env("S3_URL_MODE").or(file.storage.url_mode) {
            Some(mode) => mode.parse()?,
            None => UrlMode::Public,
        };

        let presign_expiry_secs = env("S3_PRESIGN_EXPIRY_SECS")
            .and_then(|v| v.parse().ok())
            .or(file.storage.presign_expiry_secs)
            .unwrap_or(3600);

        let max_attempts = env("S3_MAX_ATTEMPTS")
            .and_then(|v| v.parse().ok())
            .or(file.storage.max_attempts)
            .unwrap_or(3)
            .max(1);

        let jwt_secret = env("JWT_SECRET")
            .or(file.auth.jwt_secret)
            .filter(|s| !s.is_empty())
            .context("JWT_SECRET must be set")?;

        let media = MediaConfig {
            ffmpeg_path: env("FFMPEG_PATH")
                .or(file.media.ffmpeg_path)
                .unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe_path: env("FFPROBE_PATH")
                .or(file.media.ffprobe_path)
                .unwrap_or_else(|| "ffprobe".to_string()),
        };

        let cleanup = CleanupConfig {
            interval: Duration::from_secs(file.cleanup.interval_secs.unwrap_or(15 * 60)),
            max_age: Duration::from_secs(file.cleanup.max_age_secs.unwrap_or(6 * 60 * 60)),
        };

        let seed_file = env("VIDEO_SEED_FILE")
            .or(file.datastore.seed_file)
            .map(|path| absolutize(base_dir, &path));

        Ok(Self {
            port,
            max_upload_bytes,
            staging_dir,
            storage: StorageConfig {
                bucket,
                region,
                endpoint,
                url_mode,
                presign_expiry: Duration::from_secs(presign_expiry_secs),
                max_attempts,
            },
            jwt_secret,
            media,
            cleanup,
            seed_file,
        })
    }
}

fn absolutize(base_dir: &Path, path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_only_config_uses_defaults() {
        let config = Config::resolve(
            None,
            Path::new("/srv/tubely"),
            env_from(&[("S3_BUCKET", "videos"), ("JWT_SECRET", "shh")]),
        )
        .unwrap();

        assert_eq!(config.port, 8091);
        assert_eq!(config.max_upload_bytes, 1 << 30);
        assert_eq!(config.storage.bucket, "videos");
        assert_eq!(config.storage.region, "us-east-1");
        assert_eq!(config.storage.url_mode, UrlMode::Public);
        assert_eq!(config.storage.presign_expiry, Duration::from_secs(3600));
        assert_eq!(config.media.ffmpeg_path, "ffmpeg");
        assert!(config.seed_file.is_none());
    }

    #[test]
    fn env_overrides_file_values() {
        let file: ConfigFile = toml::from_str(
            r#"
            [server]
            port = 9000
            staging_dir = "staging"

            [storage]
            bucket = "from-file"
            region = "eu-west-1"
            url_mode = "presigned"

            [auth]
            jwt_secret = "file-secret"
            "#,
        )
        .unwrap();

        let config = Config::resolve(
            Some(file),
            Path::new("/srv/tubely"),
            env_from(&[("PORT", "7000"), ("S3_BUCKET", "from-env")]),
        )
        .unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.storage.bucket, "from-env");
        assert_eq!(config.storage.region, "eu-west-1");
        assert_eq!(config.storage.url_mode, UrlMode::Presigned);
        assert_eq!(config.jwt_secret, "file-secret");
        assert_eq!(config.staging_dir, PathBuf::from("/srv/tubely/staging"));
    }

    #[test]
    fn max_attempts_follows_env_then_file() {
        let file: ConfigFile = toml::from_str(
            r#"
            [storage]
            max_attempts = 5
            "#,
        )
        .unwrap();
        let base = [("S3_BUCKET", "videos"), ("JWT_SECRET", "shh")];

        let from_file =
            Config::resolve(Some(file.clone()), Path::new("."), env_from(&base)).unwrap();
        assert_eq!(from_file.storage.max_attempts, 5);

        let mut with_env = base.to_vec();
        with_env.push(("S3_MAX_ATTEMPTS", "8"));
        let from_env = Config::resolve(Some(file), Path::new("."), env_from(&with_env)).unwrap();
        assert_eq!(from_env.storage.max_attempts, 8);

        let floor = Config::resolve(
            None,
            Path::new("."),
            env_from(&[("S3_BUCKET", "videos"), ("JWT_SECRET", "shh"), ("S3_MAX_ATTEMPTS", "0")]),
        )
        .unwrap();
        assert_eq!(floor.storage.max_attempts, 1);
    }

    #[test]
    fn missing_bucket_is_an_error() {
        let result = Config::resolve(None, Path::new("."), env_from(&[("JWT_SECRET", "shh")]));
        assert!(result.is_err());
    }

    #[test]
    fn missing_secret_is_an_error() {
        let result = Config::resolve(None, Path::new("."), env_from(&[("S3_BUCKET", "videos")]));
        assert!(result.is_err());
    }

    #[test]
    fn unknown_url_mode_is_rejected() {
        let result = Config::resolve(
            None,
            Path::new("."),
            env_from(&[
                ("S3_BUCKET", "videos"),
                ("JWT_SECRET", "shh"),
                ("S3_URL_MODE", "carrier-pigeon"),
            ]),
        );
        assert!(result.is_err());
    }
}
