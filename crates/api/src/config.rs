use std::path::PathBuf;

use sdapi_core::generation::GenerationEnvironment;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults that match a checkout laid out as
/// `./stable-diffusion`, `./stable-diffusion-scripts`, and `./models`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8888`).
    pub port: u16,
    /// Maximum number of generation processes running at once (default: `1`).
    pub concurrency: usize,
    /// Delete non-`COMPLETE` records at startup (default: `false`).
    pub delete_incomplete: bool,
    /// Root of generated images, uploads, and the job store.
    pub output_dir: PathBuf,
    pub repository_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub text_to_image_model: PathBuf,
    pub inpaint_image_model: PathBuf,
    /// Interpreter used to run the scripts (default: `python`).
    pub python: String,
    /// Allowed CORS origins from comma-separated `CORS_ORIGINS`; `*` allows any.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Largest accepted request body in bytes (default: 20 MiB).
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                         |
    /// |------------------------|---------------------------------|
    /// | `HOST`                 | `0.0.0.0`                       |
    /// | `PORT`                 | `8888`                          |
    /// | `CONCURRENCY`          | `1`                             |
    /// | `DELETE_INCOMPLETE`    | `false`                         |
    /// | `OUTPUT_DIR`           | `./output`                      |
    /// | `REPOSITORY_DIR`       | `./stable-diffusion`            |
    /// | `SCRIPTS_DIR`          | `./stable-diffusion-scripts`    |
    /// | `TEXT_TO_IMAGE_MODEL`  | `./models/text-to-image.ckpt`   |
    /// | `INPAINT_IMAGE_MODEL`  | `./models/inpaint-image.ckpt`   |
    /// | `PYTHON`               | `python`                        |
    /// | `CORS_ORIGINS`         | `*`                             |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                            |
    /// | `MAX_UPLOAD_BYTES`     | `20971520`                      |
    pub fn from_env() -> Self {
        let host = env_or("HOST", "0.0.0.0");

        let port: u16 = env_or("PORT", "8888")
            .parse()
            .expect("PORT must be a valid u16");

        let concurrency: usize = env_or("CONCURRENCY", "1")
            .parse()
            .expect("CONCURRENCY must be a positive integer");
        assert!(concurrency > 0, "CONCURRENCY must be at least 1");

        let delete_incomplete = matches!(
            env_or("DELETE_INCOMPLETE", "false").to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        );

        let cors_origins: Vec<String> = env_or("CORS_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = env_or("REQUEST_TIMEOUT_SECS", "30")
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let max_upload_bytes: usize = env_or("MAX_UPLOAD_BYTES", "20971520")
            .parse()
            .expect("MAX_UPLOAD_BYTES must be a valid usize");

        Self {
            host,
            port,
            concurrency,
            delete_incomplete,
            output_dir: env_or("OUTPUT_DIR", "./output").into(),
            repository_dir: env_or("REPOSITORY_DIR", "./stable-diffusion").into(),
            scripts_dir: env_or("SCRIPTS_DIR", "./stable-diffusion-scripts").into(),
            text_to_image_model: env_or("TEXT_TO_IMAGE_MODEL", "./models/text-to-image.ckpt").into(),
            inpaint_image_model: env_or("INPAINT_IMAGE_MODEL", "./models/inpaint-image.ckpt").into(),
            python: env_or("PYTHON", "python"),
            cors_origins,
            request_timeout_secs,
            max_upload_bytes,
        }
    }

    /// Directory of the job store.
    pub fn store_dir(&self) -> PathBuf {
        self.output_dir.join(".database")
    }

    /// Directory of content-addressed uploads.
    pub fn uploads_dir(&self) -> PathBuf {
        self.output_dir.join(".uploads")
    }

    pub fn generation_environment(&self) -> GenerationEnvironment {
        GenerationEnvironment {
            python: self.python.clone(),
            scripts_dir: self.scripts_dir.clone(),
            repository_dir: self.repository_dir.clone(),
            text_to_image_model: self.text_to_image_model.clone(),
            inpaint_image_model: self.inpaint_image_model.clone(),
            output_dir: self.output_dir.clone(),
        }
    }

    /// Whether any origin may make cross-origin requests.
    pub fn cors_allows_any(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}
