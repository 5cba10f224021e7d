//! Known-face gallery: identity → reference descriptors, plus matching.
//!
//! A gallery is loaded once before a run and is read-only afterwards. The
//! on-disk form is a JSON object mapping each identity to a list of
//! descriptor arrays.

use crate::backend::{Detector, Embedder};
use crate::types::{FaceDescriptor, Identity, UNKNOWN_LABEL};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Margin (pixels) added around a detected face when cropping enrollment images.
const ENROLL_MARGIN: i32 = 10;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery not found: {0}")]
    NotFound(PathBuf),
    #[error("gallery is empty: {0}")]
    Empty(PathBuf),
    #[error("gallery io: {0}")]
    Io(#[from] std::io::Error),
    #[error("gallery parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("identity {0:?} is reserved")]
    ReservedIdentity(String),
    #[error("identity {identity:?} has a {actual}-dim descriptor, expected {expected}")]
    DimensionMismatch {
        identity: String,
        expected: usize,
        actual: usize,
    },
}

/// Immutable-per-run set of known identities and their reference descriptors.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: BTreeMap<String, Vec<FaceDescriptor>>,
    dimension: usize,
}

impl Gallery {
    /// Build a gallery, validating names and descriptor dimensionality.
    ///
    /// Identities with no descriptors are dropped.
    pub fn new(entries: BTreeMap<String, Vec<FaceDescriptor>>) -> Result<Self, GalleryError> {
        let mut dimension = 0usize;
        let mut kept = BTreeMap::new();

        for (identity, descriptors) in entries {
            if identity == UNKNOWN_LABEL {
                return Err(GalleryError::ReservedIdentity(identity));
            }
            if descriptors.is_empty() {
                tracing::warn!(identity = %identity, "identity has no descriptors; dropping");
                continue;
            }
            for d in &descriptors {
                if dimension == 0 {
                    dimension = d.dimension();
                } else if d.dimension() != dimension {
                    return Err(GalleryError::DimensionMismatch {
                        identity,
                        expected: dimension,
                        actual: d.dimension(),
                    });
                }
            }
            kept.insert(identity, descriptors);
        }

        Ok(Self {
            entries: kept,
            dimension,
        })
    }

    /// Load a gallery from a JSON file. Missing or empty galleries are errors.
    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        if !path.exists() {
            return Err(GalleryError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        let entries: BTreeMap<String, Vec<FaceDescriptor>> = serde_json::from_str(&raw)?;
        let gallery = Self::new(entries)?;
        if gallery.is_empty() {
            return Err(GalleryError::Empty(path.to_path_buf()));
        }

        tracing::info!(
            path = %path.display(),
            identities = gallery.len(),
            descriptors = gallery.descriptor_count(),
            dimension = gallery.dimension,
            "gallery loaded"
        );
        Ok(gallery)
    }

    /// Write the gallery as JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), GalleryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string(&self.entries)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Descriptor length shared by every entry (0 for an empty gallery).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn descriptor_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[FaceDescriptor])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Best gallery match for one probe descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub identity: Identity,
    /// Smallest cosine distance seen (infinite for an empty gallery).
    pub distance: f32,
    pub confidence: f32,
}

/// Strategy for comparing a probe descriptor against a gallery.
pub trait Matcher {
    fn best_match(&self, probe: &FaceDescriptor, gallery: &Gallery, threshold: f32) -> Match;
}

/// Minimum cosine distance over every reference descriptor of every identity.
///
/// A match requires the minimum distance to be strictly below the threshold.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(&self, probe: &FaceDescriptor, gallery: &Gallery, threshold: f32) -> Match {
        let mut best_distance = f32::INFINITY;
        let mut best_identity: Option<&str> = None;

        for (identity, descriptors) in gallery.iter() {
            for reference in descriptors {
                if reference.dimension() != probe.dimension() {
                    continue;
                }
                let distance = probe.cosine_distance(reference);
                if distance < best_distance {
                    best_distance = distance;
                    best_identity = Some(identity);
                }
            }
        }

        match best_identity {
            Some(name) if best_distance < threshold => Match {
                identity: Identity::Known(name.to_string()),
                distance: best_distance,
                confidence: (1.0 - best_distance).max(0.0),
            },
            _ => Match {
                identity: Identity::Unknown,
                distance: best_distance,
                confidence: 0.0,
            },
        }
    }
}

/// Build a gallery from a `known_faces/<identity>/<image>` directory tree.
///
/// Each image is run through the detector; the largest face (plus a small
/// margin) is embedded, or the whole image when no face is found. Images
/// that cannot be read or embedded are skipped with a warning.
pub fn enroll_directory(
    dir: &Path,
    detector: &mut dyn Detector,
    embedder: &mut dyn Embedder,
) -> Result<Gallery, GalleryError> {
    if !dir.is_dir() {
        return Err(GalleryError::NotFound(dir.to_path_buf()));
    }

    let mut entries: BTreeMap<String, Vec<FaceDescriptor>> = BTreeMap::new();

    for person in sorted_entries(dir)? {
        if !person.is_dir() {
            continue;
        }
        let Some(identity) = person.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        tracing::info!(identity = %identity, "enrolling");

        let mut descriptors = Vec::new();
        for image_path in sorted_entries(&person)? {
            if !is_image(&image_path) {
                continue;
            }
            match enroll_image(&image_path, detector, embedder) {
                Ok(d) => descriptors.push(d),
                Err(e) => {
                    tracing::warn!(path = %image_path.display(), error = %e, "skipping image");
                }
            }
        }
        tracing::debug!(identity = %identity, samples = descriptors.len(), "identity enrolled");
        entries.insert(identity, descriptors);
    }

    let gallery = Gallery::new(entries)?;
    if gallery.is_empty() {
        return Err(GalleryError::Empty(dir.to_path_buf()));
    }
    Ok(gallery)
}

fn enroll_image(
    path: &Path,
    detector: &mut dyn Detector,
    embedder: &mut dyn Embedder,
) -> Result<FaceDescriptor, String> {
    let img = image::open(path).map_err(|e| e.to_string())?.to_rgb8();
    let (width, height) = img.dimensions();

    let faces = detector
        .detect(img.as_raw(), width, height)
        .map_err(|e| e.to_string())?;
    let region = faces
        .iter()
        .filter_map(|b| b.face_region(ENROLL_MARGIN, width, height))
        .max_by_key(|b| b.area());

    match region {
        Some(b) => {
            let crop = image::imageops::crop_imm(
                &img,
                b.x1 as u32,
                b.y1 as u32,
                b.width() as u32,
                b.height() as u32,
            )
            .to_image();
            embedder
                .embed(crop.as_raw(), crop.width(), crop.height())
                .map_err(|e| e.to_string())
        }
        None => embedder
            .embed(img.as_raw(), width, height)
            .map_err(|e| e.to_string()),
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, GalleryError> {
    let mut paths = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
