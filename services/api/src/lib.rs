//! Research File Catalog API
//!
//! Ingestion and search service for research data files. The service accepts
//! file uploads together with a YAML metadata descriptor, stores the raw
//! bytes in an S3-compatible object store (MinIO in the documented
//! deployment), indexes descriptive metadata in PostgreSQL, and exposes
//! search and download endpoints over HTTP.
//!
//! ## Features
//!
//! - **File Ingestion**: single files or whole folders (uploaded as ZIP
//!   archives), with filename sanitization and object key collision handling
//! - **Metadata Catalog**: PostgreSQL-backed catalog with case-insensitive
//!   partial-match search over project, author, file type, experiment type,
//!   tags, and date ranges
//! - **Download Proxy**: streams objects back without buffering, plus
//!   presigned URLs for direct object store access
//!
//! ## Architecture
//!
//! ```text
//! HTTP API (8001)              Object Store               PostgreSQL
//! ┌──────────────┐            ┌──────────────┐           ┌──────────────────┐
//! │ /uploadfile/ │───────────▶│ raw-data/    │           │ file_index.      │
//! │ /upload_     │            │   {project}/ │           │ files_metadata_  │
//! │   folder/    │            │   {batch}/   │           │ catalog          │
//! └──────────────┘            └──────────────┘           └──────────────────┘
//!        │                           ▲                           ▲
//!        ▼                           │                           │
//! ┌──────────────┐            ┌──────────────┐           ┌──────────────┐
//! │ Ingestor     │───────────▶│ ObjectStore  │           │ Metadata     │
//! └──────────────┘            └──────────────┘           │ Store        │
//!        │                                               └──────────────┘
//!        └───────────────────────────────────────────────────────┘
//!
//! /search ──▶ MetadataStore        /download/{id} ──▶ catalog lookup + proxy
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metadata_store;
pub mod object_store;
pub mod util;

pub use api::{AppState, PresignedUrlResponse};
pub use config::Config;
pub use error::ApiError;
pub use ingest::{IngestOutcome, Ingestor, UploadDescriptor};
pub use metadata_store::{FileRecord, FileSearchQuery, MetadataStore};
pub use object_store::ObjectStore;
