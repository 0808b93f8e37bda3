//! Pretrained weight fetching and loading.
//!
//! Weight sets are burn named-msgpack records, one file per backbone
//! variant (`<variant>.mpk`) under a base URL. Files are cached locally; a
//! fetch is retried a bounded number of times and then fails.

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use vision_core::{Error, Result, WeightSourceConfig};

use crate::backbone::BackboneVariant;
use crate::params::Describe;

/// Location of pretrained weight files plus a local cache
#[derive(Debug, Clone)]
pub struct WeightSource {
    base_url: String,
    cache_dir: PathBuf,
    max_attempts: usize,
}

impl WeightSource {
    /// `base_url` is either an `http(s)://` URL or a local directory
    /// (optionally prefixed with `file://`).
    pub fn new(base_url: impl Into<String>, cache_dir: impl Into<PathBuf>, max_attempts: usize) -> Self {
        Self {
            base_url: base_url.into(),
            cache_dir: cache_dir.into(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn file_name(variant: BackboneVariant) -> String {
        format!("{variant}.mpk")
    }

    /// Where the weights for `variant` live once fetched
    pub fn cached_path(&self, variant: BackboneVariant) -> PathBuf {
        self.cache_dir.join(Self::file_name(variant))
    }

    fn remote_location(&self, variant: BackboneVariant) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), Self::file_name(variant))
    }

    /// Returns the local weight file for `variant`, downloading it on a cache miss.
    pub fn fetch(&self, variant: BackboneVariant) -> Result<PathBuf> {
        let dest = self.cached_path(variant);
        if dest.is_file() {
            info!("Using cached weights {}", dest.display());
            return Ok(dest);
        }

        std::fs::create_dir_all(&self.cache_dir)?;
        let location = self.remote_location(variant);
        let partial = dest.with_extension("mpk.part");

        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            match download(&location, &partial) {
                Ok(bytes) => {
                    std::fs::rename(&partial, &dest)?;
                    info!("Fetched {} ({} bytes) to {}", location, bytes, dest.display());
                    return Ok(dest);
                }
                Err(e) => {
                    warn!(attempt, max_attempts = self.max_attempts, "Weight fetch failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        let _ = std::fs::remove_file(&partial);
        Err(Error::WeightLoad(format!(
            "could not fetch {} after {} attempts: {}",
            location,
            self.max_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

impl From<&WeightSourceConfig> for WeightSource {
    fn from(config: &WeightSourceConfig) -> Self {
        Self::new(config.base_url.clone(), config.cache_dir.clone(), config.max_attempts)
    }
}

fn download(location: &str, dest: &Path) -> Result<u64> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let bytes = reqwest::blocking::get(location)?.error_for_status()?.bytes()?;
        std::fs::write(dest, &bytes)?;
        Ok(bytes.len() as u64)
    } else {
        let source = location.strip_prefix("file://").unwrap_or(location);
        Ok(std::fs::copy(source, dest)?)
    }
}

/// Loads a record into `model` and checks that every parameter name and
/// shape matches the freshly built architecture.
pub fn load_checked<B, M>(model: M, path: &Path, device: &B::Device) -> Result<M>
where
    B: Backend,
    M: Module<B> + Describe,
{
    let expected = model.describe("").param_shapes();
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let loaded = model.load_file(path.to_path_buf(), &recorder, device)?;
    let actual = loaded.describe("").param_shapes();

    if expected.len() != actual.len() {
        return Err(Error::WeightLoad(format!(
            "{}: expected {} parameters, found {}",
            path.display(),
            expected.len(),
            actual.len()
        )));
    }
    if let Some(((name, want), (_, got))) = expected.iter().zip(&actual).find(|(e, a)| e != a) {
        return Err(Error::WeightLoad(format!(
            "{}: parameter {} has shape {:?}, expected {:?}",
            path.display(),
            name,
            got,
            want
        )));
    }

    info!("Loaded {} parameter tensors from {}", actual.len(), path.display());
    Ok(loaded)
}
