//! # Domain Models
//!
//! Canonical types shared by every collector.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SourceDescriptor`] | Caller-supplied description of a source |
//! | [`Platform`] | Target platform, inferred from URL when not given |
//! | [`ContentItem`] | Post, comment, utterance or page |
//! | [`AcquisitionResult`] | Items plus provenance and stats |
//! | [`CollectorOutput`] | Persisted artifact, result plus quality report |
//! | [`UtcDateTime`] | UTC timestamp |

mod content;
mod timestamp;

pub use content::{
    AcquisitionMetadata, AcquisitionResult, AcquisitionStats, CollectorOutput, ContentItem,
    ContentType, DiarizationHints, ItemKind, Platform, SourceDescriptor, StrategyKind,
    AUDIO_EXTENSIONS,
};
pub use timestamp::UtcDateTime;
