//! Normalized task model and the canonical status vocabulary.
//!
//! Tasks are never persisted here — they are rebuilt on every aggregation
//! cycle from each agent's native listing. Identity is the agent-scoped
//! torrent hash, which keeps ids stable across cycles.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical task states. Every native state string maps into this closed
/// set; anything unrecognized becomes [`TaskState::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Error,
    MissingFiles,
    Uploading,
    PausedUpload,
    StoppedUpload,
    QueuedUpload,
    StalledUpload,
    CheckingUpload,
    ForcedUpload,
    Allocating,
    Downloading,
    MetadataDownload,
    ForcedMetadataDownload,
    PausedDownload,
    StoppedDownload,
    QueuedDownload,
    ForcedDownload,
    StalledDownload,
    CheckingDownload,
    CheckingResumeData,
    Moving,
    Unknown,
}

/// Native qBittorrent state strings and their canonical mapping.
///
/// Data-driven on purpose: supporting another agent kind means adding a
/// table, not new control flow.
const NATIVE_STATES: &[(&str, TaskState)] = &[
    ("error", TaskState::Error),
    ("missingFiles", TaskState::MissingFiles),
    ("uploading", TaskState::Uploading),
    ("pausedUP", TaskState::PausedUpload),
    ("stoppedUP", TaskState::StoppedUpload),
    ("queuedUP", TaskState::QueuedUpload),
    ("stalledUP", TaskState::StalledUpload),
    ("checkingUP", TaskState::CheckingUpload),
    ("forcedUP", TaskState::ForcedUpload),
    ("allocating", TaskState::Allocating),
    ("downloading", TaskState::Downloading),
    ("metaDL", TaskState::MetadataDownload),
    ("forcedMetaDL", TaskState::ForcedMetadataDownload),
    ("pausedDL", TaskState::PausedDownload),
    ("stoppedDL", TaskState::StoppedDownload),
    ("queuedDL", TaskState::QueuedDownload),
    ("forcedDL", TaskState::ForcedDownload),
    ("stalledDL", TaskState::StalledDownload),
    ("checkingDL", TaskState::CheckingDownload),
    ("checkingResumeData", TaskState::CheckingResumeData),
    ("moving", TaskState::Moving),
    ("unknown", TaskState::Unknown),
];

impl TaskState {
    /// Map a native state string into the canonical vocabulary.
    ///
    /// Total: unrecognized strings normalize to `Unknown` rather than
    /// failing the aggregation.
    pub fn from_native(native: &str) -> Self {
        NATIVE_STATES
            .iter()
            .find(|(name, _)| *name == native)
            .map(|(_, state)| *state)
            .unwrap_or(TaskState::Unknown)
    }
}

/// Metadata parsed out of a magnet URI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MagnetLink {
    pub hash: String,
    pub display_name: String,
    pub trackers: Vec<String>,
    pub exact_length: String,
    pub exact_source: String,
}

/// Swarm counters for one task.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskPairs {
    pub swarm_seeders: i64,
    pub swarm_leechers: i64,
    pub seeders: i64,
    pub leechers: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskTransfer {
    pub speed: i64,
    pub amount: i64,
}

/// Transfer counters, split by direction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskNetwork {
    pub download: TaskTransfer,
    pub upload: TaskTransfer,
}

/// One torrent/job on a specific agent, in normalized form.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    /// Stable id: the agent's native torrent hash.
    pub id: String,
    /// The agent this task was fetched from.
    pub agent_id: Uuid,
    pub name: String,
    pub hash: String,
    pub state: TaskState,
    pub category: String,
    pub path: String,
    pub size: i64,
    pub priority: i64,
    pub ratio: f64,
    pub progress: f64,
    pub popularity: f64,
    pub magnet_uri: String,
    pub magnet_link: MagnetLink,
    pub pairs: TaskPairs,
    pub network: TaskNetwork,
    pub tags: Vec<String>,
}

/// Parse a magnet URI into its metadata fields.
///
/// Accepts the fields the dashboard displays: `xt` (btih hash), `dn`,
/// `tr` (repeatable), `xl`, `xs`.
pub fn parse_magnet_link(magnet_uri: &str) -> Result<MagnetLink, MagnetParseError> {
    let url = url::Url::parse(magnet_uri).map_err(|_| MagnetParseError::InvalidUri)?;
    if url.scheme() != "magnet" {
        return Err(MagnetParseError::NotMagnet);
    }

    let mut link = MagnetLink::default();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "xt" => {
                link.hash = value
                    .strip_prefix("urn:btih:")
                    .unwrap_or(&value)
                    .to_lowercase();
            }
            "dn" => link.display_name = value.into_owned(),
            "tr" => link.trackers.push(value.into_owned()),
            "xl" => link.exact_length = value.into_owned(),
            "xs" => link.exact_source = value.into_owned(),
            _ => {}
        }
    }

    if link.hash.is_empty() {
        return Err(MagnetParseError::MissingHash);
    }

    Ok(link)
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MagnetParseError {
    #[error("not a valid URI")]
    InvalidUri,

    #[error("not a magnet URI")]
    NotMagnet,

    #[error("magnet URI has no btih hash")]
    MissingHash,
}
