//! Image folder dataset: `root/<class>/<image>` with alphabetically
//! indexed classes.

use burn::data::dataset::Dataset;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vision_core::{Error, Result};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 9] = ["jpg", "jpeg", "png", "ppm", "bmp", "pgm", "tif", "tiff", "webp"];

/// A decoded image and its class index
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub image: RgbImage,
    pub label: usize,
}

/// Labeled image files discovered under a root directory.
#[derive(Debug, Clone)]
pub struct ImageFolderDataset {
    root: PathBuf,
    classes: Vec<String>,
    samples: Vec<(PathBuf, usize)>,
}

impl ImageFolderDataset {
    /// Scans `root`; each subdirectory is a class, sorted by name.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::Dataset(format!(
                "Image folder not found: {}",
                root.display()
            )));
        }

        let mut classes: Vec<String> = WalkDir::new(&root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        classes.sort();

        if classes.is_empty() {
            return Err(Error::Dataset(format!(
                "No class directories in {}",
                root.display()
            )));
        }

        let mut samples = Vec::new();
        for (label, class) in classes.iter().enumerate() {
            let mut files = collect_images(&root.join(class));
            files.sort();
            debug!(class = %class, label, count = files.len(), "Scanned class directory");
            samples.extend(files.into_iter().map(|path| (path, label)));
        }

        if samples.is_empty() {
            return Err(Error::Dataset(format!("No images found under {}", root.display())));
        }

        Ok(Self { root, classes, samples })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Class names in index order
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// `(path, label)` pairs in index order
    pub fn samples(&self) -> &[(PathBuf, usize)] {
        &self.samples
    }
}

/// Image files anywhere below a class directory
fn collect_images(class_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(class_dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
        .map(|e| e.into_path())
        .collect()
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

impl Dataset<ImageItem> for ImageFolderDataset {
    /// Decodes the image at `index`; unreadable files are skipped with a warning.
    fn get(&self, index: usize) -> Option<ImageItem> {
        let (path, label) = self.samples.get(index)?;
        match image::open(path) {
            Ok(image) => Some(ImageItem {
                image: image.to_rgb8(),
                label: *label,
            }),
            Err(e) => {
                warn!("Failed to load image {}: {}", path.display(), e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
