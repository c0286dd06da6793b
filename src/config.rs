use std::env;
use std::path::PathBuf;

const DEFAULT_DATABASE_URL: &str = "sqlite:../data/matchmind.db";
const DEFAULT_API_HOST: &str = "0.0.0.0";
const DEFAULT_API_PORT: u16 = 8000;
const DEFAULT_MODEL_DIR: &str = "../data/models";
const DEFAULT_CSV_PATH: &str = "../data/sample_matches.csv";

/// Runtime settings read from the environment (and `.env`, loaded in `main`).
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub api_host: String,
    pub api_port: u16,
    pub model_dir: PathBuf,
    pub csv_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            api_host: DEFAULT_API_HOST.to_string(),
            api_port: DEFAULT_API_PORT,
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            csv_path: PathBuf::from(DEFAULT_CSV_PATH),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_port = match env::var("API_PORT") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!("Invalid API_PORT {:?}, using {}", raw, DEFAULT_API_PORT);
                DEFAULT_API_PORT
            }),
            Err(_) => defaults.api_port,
        };

        Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            api_host: env::var("API_HOST").unwrap_or(defaults.api_host),
            api_port,
            model_dir: env::var("MODEL_DIR").map(PathBuf::from).unwrap_or(defaults.model_dir),
            csv_path: env::var("DATA_CSV_PATH").map(PathBuf::from).unwrap_or(defaults.csv_path),
        }
    }
}
