//! Model bundles and their on-disk store.
//!
//! Each engine persists one opaque blob: a MessagePack envelope carrying a
//! format version, the engine name, the feature schema version, a blake3
//! checksum and the encoded bundle. Any mismatch on load is a
//! `SerializationFailure`; a missing file is an untrained engine.

use crate::engines::ModelEngine;
use crate::error::{AnalyticsError, Result};
use crate::features::FEATURE_SCHEMA_VERSION;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const BUNDLE_FORMAT_VERSION: u32 = 2;

/// Fitted state of one engine plus an explicit fitted flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModelBundle<M> {
    pub fitted: bool,
    pub model: Option<M>,
    pub trained_at: Option<DateTime<Utc>>,
}

impl<M> Default for TrainedModelBundle<M> {
    fn default() -> Self {
        Self::untrained()
    }
}

impl<M> TrainedModelBundle<M> {
    pub fn untrained() -> Self {
        Self {
            fitted: false,
            model: None,
            trained_at: None,
        }
    }

    pub fn fitted(model: M) -> Self {
        Self {
            fitted: true,
            model: Some(model),
            trained_at: Some(Utc::now()),
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted && self.model.is_some()
    }

    /// Borrow the fitted model, rejecting unfitted bundles.
    pub fn model(&self, engine: &str) -> Result<&M> {
        if !self.fitted {
            return Err(AnalyticsError::not_trained(engine));
        }
        self.model
            .as_ref()
            .ok_or_else(|| AnalyticsError::not_trained(engine))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    engine: String,
    feature_schema: u32,
    checksum: String,
    #[serde(with = "serde_bytes")]
    payload: Vec<u8>,
}

/// Encode a bundle into an opaque, versioned blob.
pub fn encode<E: ModelEngine>(bundle: &TrainedModelBundle<E::Model>) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec_named(bundle)?;
    let envelope = Envelope {
        format_version: BUNDLE_FORMAT_VERSION,
        engine: E::NAME.to_string(),
        feature_schema: FEATURE_SCHEMA_VERSION,
        checksum: blake3::hash(&payload).to_hex().to_string(),
        payload,
    };
    Ok(rmp_serde::to_vec_named(&envelope)?)
}

/// Decode a blob produced by [`encode`] for the same engine.
pub fn decode<E: ModelEngine>(bytes: &[u8]) -> Result<TrainedModelBundle<E::Model>> {
    let envelope: Envelope = rmp_serde::from_slice(bytes)?;
    if envelope.format_version != BUNDLE_FORMAT_VERSION {
        return Err(AnalyticsError::SerializationFailure {
            message: format!(
                "bundle format version {} does not match expected {}",
                envelope.format_version, BUNDLE_FORMAT_VERSION
            ),
        });
    }
    if envelope.engine != E::NAME {
        return Err(AnalyticsError::SerializationFailure {
            message: format!(
                "bundle belongs to engine '{}', expected '{}'",
                envelope.engine,
                E::NAME
            ),
        });
    }
    if envelope.feature_schema != FEATURE_SCHEMA_VERSION {
        return Err(AnalyticsError::SerializationFailure {
            message: format!(
                "bundle feature schema {} does not match current {}",
                envelope.feature_schema, FEATURE_SCHEMA_VERSION
            ),
        });
    }
    let actual = blake3::hash(&envelope.payload).to_hex().to_string();
    if actual != envelope.checksum {
        return Err(AnalyticsError::SerializationFailure {
            message: format!("bundle checksum mismatch for engine '{}'", E::NAME),
        });
    }
    Ok(rmp_serde::from_slice(&envelope.payload)?)
}

/// Directory of `<engine>.bundle` files.
#[derive(Debug, Clone)]
pub struct BundleStore {
    dir: PathBuf,
}

impl BundleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, engine: &str) -> PathBuf {
        self.dir.join(format!("{engine}.bundle"))
    }

    /// Write atomically: encode, write a temp file, then rename over the target.
    pub fn save<E: ModelEngine>(&self, bundle: &TrainedModelBundle<E::Model>) -> Result<PathBuf> {
        let bytes = encode::<E>(bundle)?;
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(E::NAME);
        let tmp = self.dir.join(format!(".{}.bundle.tmp", E::NAME));
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &path)?;
        tracing::info!(
            "Saved {} bundle ({} bytes) to {}",
            E::NAME,
            bytes.len(),
            path.display()
        );
        Ok(path)
    }

    /// Load a bundle; a missing file yields an untrained bundle.
    pub fn load<E: ModelEngine>(&self) -> Result<TrainedModelBundle<E::Model>> {
        let path = self.path_for(E::NAME);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    "No {} bundle at {}, starting untrained",
                    E::NAME,
                    path.display()
                );
                return Ok(TrainedModelBundle::untrained());
            }
            Err(e) => return Err(e.into()),
        };
        decode::<E>(&bytes)
    }
}
