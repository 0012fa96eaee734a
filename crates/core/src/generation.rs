//! Generation request parameters, defaults, and per-job commands.
//!
//! A request arrives with optional tuning fields. [`GenerationEnvironment`]
//! validates it, fills in defaults, and pins the model and repository paths,
//! producing a fully resolved [`GenerationParams`]. The resolved value is what
//! gets fingerprinted, so an omitted field and an explicit default describe
//! the same job.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::hashing;
use crate::job::JobType;
use crate::runner::{FlagMap, FlagValue, RunnerCommand};
use crate::types::JobId;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_BATCH_SIZE: u32 = 1;
pub const DEFAULT_CHANNELS: u32 = 4;
pub const DEFAULT_DOWNSAMPLING_FACTOR: u32 = 8;
pub const DEFAULT_ETA: f64 = 0.0;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 7.5;
pub const DEFAULT_HEIGHT: u32 = 512;
pub const DEFAULT_WIDTH: u32 = 512;
pub const DEFAULT_ITERATIONS: u32 = 1;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_STRENGTH: f64 = 0.75;
pub const DEFAULT_STEPS_TEXT_TO_IMAGE: u32 = 8;
pub const DEFAULT_STEPS_IMAGE_TO_IMAGE: u32 = 24;
pub const DEFAULT_STEPS_INPAINT_IMAGE: u32 = 32;

/// Diffusion sampler used by text-to-image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sampler {
    Ddim,
    #[default]
    Plms,
}

impl Sampler {
    pub fn as_str(self) -> &'static str {
        match self {
            Sampler::Ddim => "ddim",
            Sampler::Plms => "plms",
        }
    }
}

// ---------------------------------------------------------------------------
// Requests (as received)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TextToImageRequest {
    #[validate(length(min = 1, max = 2000))]
    pub prompt: String,
    #[validate(range(min = 1, max = 16))]
    pub batch_size: Option<u32>,
    #[validate(range(min = 1, max = 16))]
    pub channels: Option<u32>,
    #[validate(range(min = 1, max = 64))]
    pub downsampling_factor: Option<u32>,
    #[validate(range(min = 0.0, max = 1.0))]
    pub eta: Option<f64>,
    #[validate(range(min = 0.0, max = 50.0))]
    pub guidance_scale: Option<f64>,
    #[validate(range(min = 64, max = 2048))]
    pub height: Option<u32>,
    #[validate(range(min = 64, max = 2048))]
    pub width: Option<u32>,
    #[validate(range(min = 1, max = 100))]
    pub iterations: Option<u32>,
    pub seed: Option<u64>,
    pub sampler: Option<Sampler>,
    #[validate(range(min = 1, max = 500))]
    pub steps: Option<u32>,
}

/// Tuning fields for image-to-image. The input image arrives separately as
/// an upload.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ImageToImageRequest {
    #[validate(length(min = 1, max = 2000))]
    pub prompt: String,
    #[validate(range(min = 1, max = 16))]
    pub batch_size: Option<u32>,
    #[validate(range(min = 0.0, max = 1.0))]
    pub eta: Option<f64>,
    #[validate(range(min = 0.0, max = 50.0))]
    pub guidance_scale: Option<f64>,
    #[validate(range(min = 1, max = 100))]
    pub iterations: Option<u32>,
    pub seed: Option<u64>,
    #[validate(range(min = 1, max = 500))]
    pub steps: Option<u32>,
    #[validate(range(min = 0.0, max = 1.0))]
    pub strength: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InpaintImageRequest {
    pub seed: Option<u64>,
    #[validate(range(min = 1, max = 500))]
    pub steps: Option<u32>,
}

// ---------------------------------------------------------------------------
// Resolved parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextToImageParams {
    pub prompt: String,
    pub batch_size: u32,
    pub channels: u32,
    pub downsampling_factor: u32,
    pub eta: f64,
    pub guidance_scale: f64,
    pub height: u32,
    pub width: u32,
    pub iterations: u32,
    pub seed: u64,
    pub sampler: Sampler,
    pub steps: u32,
    pub model: String,
    pub repository_dir: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageToImageParams {
    pub prompt: String,
    pub image_file_path: String,
    pub batch_size: u32,
    pub eta: f64,
    pub guidance_scale: f64,
    pub iterations: u32,
    pub seed: u64,
    pub steps: u32,
    pub strength: f64,
    pub model: String,
    pub repository_dir: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InpaintImageParams {
    pub image_file_path: String,
    pub mask_file_path: String,
    pub seed: u64,
    pub steps: u32,
    pub model: String,
    pub repository_dir: String,
}

/// Fully resolved parameters for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GenerationParams {
    TextToImage(TextToImageParams),
    ImageToImage(ImageToImageParams),
    InpaintImage(InpaintImageParams),
}

impl GenerationParams {
    pub fn job_type(&self) -> JobType {
        match self {
            GenerationParams::TextToImage(_) => JobType::TextToImage,
            GenerationParams::ImageToImage(_) => JobType::ImageToImage,
            GenerationParams::InpaintImage(_) => JobType::InpaintImage,
        }
    }

    /// Content-derived job id. Jobs of different types live under different
    /// keys, so the type itself is not part of the hash input.
    pub fn fingerprint(&self) -> Result<JobId, CoreError> {
        hashing::fingerprint(self).map_err(|e| CoreError::Internal(format!("fingerprint: {e}")))
    }

    /// Script flags, excluding `--output` which depends on the job id.
    pub fn flags(&self) -> FlagMap {
        let mut flags = FlagMap::new();
        match self {
            GenerationParams::TextToImage(p) => {
                flags.insert("prompt".into(), p.prompt.as_str().into());
                flags.insert("batch_size".into(), p.batch_size.into());
                flags.insert("channels".into(), p.channels.into());
                flags.insert("downsampling_factor".into(), p.downsampling_factor.into());
                flags.insert("eta".into(), p.eta.into());
                flags.insert("guidance_scale".into(), p.guidance_scale.into());
                flags.insert("height".into(), p.height.into());
                flags.insert("width".into(), p.width.into());
                flags.insert("iterations".into(), p.iterations.into());
                flags.insert("seed".into(), p.seed.into());
                flags.insert("sampler".into(), p.sampler.as_str().into());
                flags.insert("steps".into(), p.steps.into());
                flags.insert("model".into(), p.model.as_str().into());
            }
            GenerationParams::ImageToImage(p) => {
                flags.insert("prompt".into(), p.prompt.as_str().into());
                flags.insert("image_file_path".into(), p.image_file_path.as_str().into());
                flags.insert("batch_size".into(), p.batch_size.into());
                flags.insert("eta".into(), p.eta.into());
                flags.insert("guidance_scale".into(), p.guidance_scale.into());
                flags.insert("iterations".into(), p.iterations.into());
                flags.insert("seed".into(), p.seed.into());
                flags.insert("steps".into(), p.steps.into());
                flags.insert("strength".into(), p.strength.into());
                flags.insert("model".into(), p.model.as_str().into());
            }
            GenerationParams::InpaintImage(p) => {
                flags.insert("image_file_path".into(), p.image_file_path.as_str().into());
                flags.insert("mask_file_path".into(), p.mask_file_path.as_str().into());
                flags.insert("seed".into(), p.seed.into());
                flags.insert("steps".into(), p.steps.into());
                flags.insert("model".into(), p.model.as_str().into());
            }
        }
        flags
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Where the generation scripts, models, and outputs live.
#[derive(Debug, Clone)]
pub struct GenerationEnvironment {
    /// Python interpreter, looked up on the venv-adjusted `PATH`.
    pub python: String,
    /// Directory holding `text-to-image.py`, `image-to-image.py`, and
    /// `inpaint-image.py`.
    pub scripts_dir: PathBuf,
    /// Stable Diffusion checkout with a `venv/` inside.
    pub repository_dir: PathBuf,
    pub text_to_image_model: PathBuf,
    pub inpaint_image_model: PathBuf,
    pub output_dir: PathBuf,
}

impl GenerationEnvironment {
    pub fn resolve_text_to_image(&self, req: TextToImageRequest) -> Result<GenerationParams, CoreError> {
        req.validate()?;
        Ok(GenerationParams::TextToImage(TextToImageParams {
            prompt: req.prompt,
            batch_size: req.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            channels: req.channels.unwrap_or(DEFAULT_CHANNELS),
            downsampling_factor: req.downsampling_factor.unwrap_or(DEFAULT_DOWNSAMPLING_FACTOR),
            eta: req.eta.unwrap_or(DEFAULT_ETA),
            guidance_scale: req.guidance_scale.unwrap_or(DEFAULT_GUIDANCE_SCALE),
            height: req.height.unwrap_or(DEFAULT_HEIGHT),
            width: req.width.unwrap_or(DEFAULT_WIDTH),
            iterations: req.iterations.unwrap_or(DEFAULT_ITERATIONS),
            seed: req.seed.unwrap_or(DEFAULT_SEED),
            sampler: req.sampler.unwrap_or_default(),
            steps: req.steps.unwrap_or(DEFAULT_STEPS_TEXT_TO_IMAGE),
            model: absolute_string(&self.text_to_image_model)?,
            repository_dir: absolute_string(&self.repository_dir)?,
        }))
    }

    /// Image-to-image reuses the text-to-image checkpoint.
    pub fn resolve_image_to_image(
        &self,
        req: ImageToImageRequest,
        image_file_path: &Path,
    ) -> Result<GenerationParams, CoreError> {
        req.validate()?;
        Ok(GenerationParams::ImageToImage(ImageToImageParams {
            prompt: req.prompt,
            image_file_path: absolute_string(image_file_path)?,
            batch_size: req.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            eta: req.eta.unwrap_or(DEFAULT_ETA),
            guidance_scale: req.guidance_scale.unwrap_or(DEFAULT_GUIDANCE_SCALE),
            iterations: req.iterations.unwrap_or(DEFAULT_ITERATIONS),
            seed: req.seed.unwrap_or(DEFAULT_SEED),
            steps: req.steps.unwrap_or(DEFAULT_STEPS_IMAGE_TO_IMAGE),
            strength: req.strength.unwrap_or(DEFAULT_STRENGTH),
            model: absolute_string(&self.text_to_image_model)?,
            repository_dir: absolute_string(&self.repository_dir)?,
        }))
    }

    pub fn resolve_inpaint_image(
        &self,
        req: InpaintImageRequest,
        image_file_path: &Path,
        mask_file_path: &Path,
    ) -> Result<GenerationParams, CoreError> {
        req.validate()?;
        Ok(GenerationParams::InpaintImage(InpaintImageParams {
            image_file_path: absolute_string(image_file_path)?,
            mask_file_path: absolute_string(mask_file_path)?,
            seed: req.seed.unwrap_or(DEFAULT_SEED),
            steps: req.steps.unwrap_or(DEFAULT_STEPS_INPAINT_IMAGE),
            model: absolute_string(&self.inpaint_image_model)?,
            repository_dir: absolute_string(&self.repository_dir)?,
        }))
    }

    /// Output directory of one job: `<output_dir>/<type>/<id>`.
    pub fn job_output_dir(&self, job_type: JobType, id: &str) -> PathBuf {
        self.output_dir.join(job_type.slug()).join(id)
    }

    /// The process invocation for a resolved job.
    ///
    /// Runs `<python> <scripts_dir>/<type>.py` inside the repository with its
    /// virtualenv activated.
    pub fn command(&self, params: &GenerationParams, id: &str) -> Result<RunnerCommand, CoreError> {
        let job_type = params.job_type();
        let repository = absolute(&self.repository_dir)?;
        let venv = repository.join("venv");
        let script = absolute(&self.scripts_dir)?.join(format!("{}.py", job_type.slug()));
        let output = absolute(&self.job_output_dir(job_type, id))?;

        let mut command = RunnerCommand::new(self.python.clone(), output.clone());
        command.leading_args = vec![script.display().to_string()];
        command.flags = params.flags();
        command
            .flags
            .insert("output".into(), FlagValue::Str(output.display().to_string()));
        command.env_vars = vec![
            ("VIRTUAL_ENV".into(), venv.display().to_string()),
            ("PATH".into(), prepend_env("PATH", &venv.join("bin"))),
            ("PYTHONPATH".into(), prepend_env("PYTHONPATH", &repository)),
        ];
        command.working_directory = Some(repository);
        Ok(command)
    }
}

fn absolute(path: &Path) -> Result<PathBuf, CoreError> {
    std::path::absolute(path)
        .map_err(|e| CoreError::Internal(format!("Cannot resolve '{}': {e}", path.display())))
}

fn absolute_string(path: &Path) -> Result<String, CoreError> {
    absolute(path).map(|p| p.display().to_string())
}

/// `dir` prepended to the current value of the env var `key`.
fn prepend_env(key: &str, dir: &Path) -> String {
    match std::env::var(key) {
        Ok(existing) if !existing.is_empty() => format!("{}:{existing}", dir.display()),
        _ => dir.display().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
