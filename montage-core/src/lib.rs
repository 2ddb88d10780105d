//! # Montage Core
//!
//! Content handling for Montage signage players: ordered sequences of
//! content, playback duration estimates and media ingestion.
//!
//! ## Overview
//!
//! - **Sequences**: dense member positions kept intact across inserts and
//!   removals ([`sequence`])
//! - **Durations**: side-effect free estimates over a loaded content graph
//!   ([`duration`])
//! - **Ingestion**: uploads accepted synchronously, then parsed, stored,
//!   thumbnailed and registered on a worker pool while a progress token
//!   reports each step ([`ingest`], [`progress`])
//! - **Publication**: moving ingested files to the publish bucket
//!   ([`publish`])
//!
//! Storage, object storage, media inspection, thumbnails, progress tokens and
//! access checks are traits with in-process adapters, wired together by
//! [`ContentService`].
//!
//! ## Feature Flags
//!
//! - `ffmpeg`: probes video files with FFmpeg for duration, dimensions and
//!   codecs
//!
//! ## Examples
//!
//! ```no_run
//! use montage_core::{ContentService, MediaConfig};
//! use montage_model::{DeclaredDuration, NewContent};
//!
//! async fn build_reel() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ContentService::builder(MediaConfig::default()).build()?;
//!     let reel = service.create_content(NewContent::sequence("lobby", 10_000)).await?;
//!     let clip = service.create_content(NewContent::media("intro")).await?;
//!     service
//!         .add_member(reel.id, clip.id, None, Some(DeclaredDuration(8_000)))
//!         .await?;
//!     println!("{:?}", service.estimate_duration(reel.id).await?);
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Capability checks
pub mod access;
/// Media configuration loading and validation
pub mod config;
/// Playback duration estimation
pub mod duration;
pub mod error;
pub mod ingest;
pub mod media;
/// Object store port and adapters
pub mod object_store;
pub mod progress;
/// Structured content providers
pub mod providers;
pub mod publish;
/// Sequence member positions
pub mod sequence;
pub mod service;
/// Content store port and the in-memory adapter
pub mod store;

pub use access::{AccessProbe, Action, AllowAll, RequireActor};
pub use config::{
    DurationConfig, MediaCategory, MediaConfig, MediaConfigSource,
    ThumbnailSize,
};
pub use duration::{ContentGraph, DurationEstimator};
pub use error::{ContentError, ErrorKind, Result};
pub use ingest::{
    IngestPorts, IngestService, IngestTicket, MEDIA_FORMAT_UPLOAD,
    UploadRequest,
};
pub use object_store::{
    InMemoryObjectStore, LocalObjectStore, ObjectStore, RemoteError,
};
pub use progress::{InMemoryProgressTokens, ProgressTokens};
pub use providers::{
    ContentProvider, PassthroughProvider, ProviderRegistry, StructuredPayload,
};
pub use publish::{PublishFailure, PublishReport, Publisher};
pub use sequence::{SequenceEditor, SequenceLayout};
pub use service::{
    ContentInfo, ContentService, ContentServiceBuilder, FormatInfo, MemberInfo,
};
pub use store::{ContentStore, InMemoryContentStore, MemberMove, SequenceChangeSet};
