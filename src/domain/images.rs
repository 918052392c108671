//! Per-run image results.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// A target image and the version found for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpdate {
    pub image: String,
    pub version: String,
}

/// Images with a new version in this run, in target-list order.
///
/// Serializes as a JSON object `{"image": "version", ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewImages {
    updates: Vec<ImageUpdate>,
}

impl NewImages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new version for an image, replacing an earlier entry for it
    pub fn insert(&mut self, image: impl Into<String>, version: impl Into<String>) {
        let image = image.into();
        let version = version.into();
        match self.updates.iter_mut().find(|u| u.image == image) {
            Some(existing) => existing.version = version,
            None => self.updates.push(ImageUpdate { image, version }),
        }
    }

    pub fn get(&self, image: &str) -> Option<&str> {
        self.updates
            .iter()
            .find(|u| u.image == image)
            .map(|u| u.version.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageUpdate> {
        self.updates.iter()
    }

    /// `image:version` pairs joined with commas, as the pipeline expects them
    pub fn to_pipeline_value(&self) -> String {
        self.updates
            .iter()
            .map(|u| format!("{}:{}", u.image, u.version))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for NewImages {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut images = Self::new();
        for (image, version) in iter {
            images.insert(image, version);
        }
        images
    }
}

impl Serialize for NewImages {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.updates.len()))?;
        for update in &self.updates {
            map.serialize_entry(&update.image, &update.version)?;
        }
        map.end()
    }
}

/// What happened to one target image during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    /// No default-config entry refers to the image
    Skipped,

    /// The registry had no strict version tag (or could not be reached)
    NoVersion,

    /// Latest registry tag was already processed
    UpToDate { version: String },

    /// A new version was found
    New {
        version: String,
        previous: Option<String>,
        /// Whether the checkpoint was written; `None` until it is attempted
        checkpointed: Option<bool>,
    },
}
