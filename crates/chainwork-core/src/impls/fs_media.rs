//! Filesystem media adapters backed by the `image` crate (PNG).

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};
use serde::Serialize;
use ulid::Ulid;

use crate::ports::{Blur, Image, ImageStore, MediaError, MediaStore, OutputDir};

const FILE_SCHEME: &str = "file://";

/// File name prefix of the intermediate images written by the transform step.
pub const OUTPUT_FILE_PREFIX: &str = "blur-filter-output-";

/// `file:///a/b.png` and `/a/b.png` both name `/a/b.png`.
pub fn locator_path(locator: &str) -> &Path {
    Path::new(locator.strip_prefix(FILE_SCHEME).unwrap_or(locator))
}

pub fn file_locator(path: &Path) -> String {
    format!("{FILE_SCHEME}{}", path.display())
}

fn decode(locator: &str) -> Result<Image, MediaError> {
    let decoded = image::open(locator_path(locator)).map_err(|e| MediaError::Decode {
        locator: locator.to_string(),
        reason: e.to_string(),
    })?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(Image::new(width, height, rgba.into_raw()))
}

fn to_buffer(image: &Image) -> Result<RgbaImage, MediaError> {
    RgbaImage::from_raw(image.width, image.height, image.pixels.clone()).ok_or_else(|| {
        MediaError::Encode(format!(
            "pixel buffer does not match {}x{}",
            image.width, image.height
        ))
    })
}

fn write_png(image: &Image, path: &Path) -> Result<(), MediaError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    to_buffer(image)?
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| MediaError::Encode(e.to_string()))
}

/// Intermediate images, stored as PNG files in the output directory.
#[derive(Debug, Clone)]
pub struct FsImageStore {
    output_dir: PathBuf,
}

impl FsImageStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl ImageStore for FsImageStore {
    fn load(&self, locator: &str) -> Result<Image, MediaError> {
        decode(locator)
    }

    fn save(&self, image: &Image) -> Result<String, MediaError> {
        let path = self
            .output_dir
            .join(format!("{OUTPUT_FILE_PREFIX}{}.png", Ulid::new()));
        write_png(image, &path)?;
        Ok(file_locator(&path))
    }
}

/// Blur by shrinking the image `level` times and scaling it back up.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaleBlur;

impl Blur for ScaleBlur {
    fn blur(&self, image: &Image, level: u32) -> Image {
        if level == 0 || image.width == 0 || image.height == 0 {
            return image.clone();
        }
        let buffer = match to_buffer(image) {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!(error = %e, level, "cannot blur malformed image, passing it through");
                return image.clone();
            }
        };

        let small_w = (image.width / level).max(1);
        let small_h = (image.height / level).max(1);
        let small = imageops::resize(&buffer, small_w, small_h, FilterType::Triangle);
        let restored = imageops::resize(&small, image.width, image.height, FilterType::Triangle);

        Image::new(image.width, image.height, restored.into_raw())
    }
}

#[derive(Serialize)]
struct GalleryEntry<'a> {
    title: &'a str,
    description: &'a str,
    file: &'a str,
}

/// Permanent storage: a gallery directory of PNGs, each with a JSON sidecar
/// carrying its title and description.
#[derive(Debug, Clone)]
pub struct FsMediaStore {
    gallery_dir: PathBuf,
}

impl FsMediaStore {
    pub fn new(gallery_dir: impl Into<PathBuf>) -> Self {
        Self {
            gallery_dir: gallery_dir.into(),
        }
    }
}

impl MediaStore for FsMediaStore {
    fn store(&self, image: &Image, title: &str, description: &str) -> Result<String, MediaError> {
        let file_name = format!("{}.png", Ulid::new());
        let path = self.gallery_dir.join(&file_name);
        write_png(image, &path)?;

        let entry = GalleryEntry {
            title,
            description,
            file: &file_name,
        };
        let sidecar = serde_json::to_vec_pretty(&entry)
            .map_err(|e| MediaError::Rejected(e.to_string()))?;
        std::fs::write(path.with_extension("json"), sidecar)?;

        Ok(file_locator(&path))
    }
}

#[derive(Debug, Clone)]
pub struct FsOutputDir {
    dir: PathBuf,
}

impl FsOutputDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl OutputDir for FsOutputDir {
    fn list_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn delete(&self, path: &Path) -> std::io::Result<()> {
        std::fs::remove_file(path)
    }
}
