use crate::error::ApiError;
use crate::metadata_store::{FileRecord, MetadataStore};
use crate::object_store::ObjectStore;
use crate::util::{file_extension, sanitize_filename, sanitize_project_id, DEFAULT_CONTENT_TYPE};
use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// User-supplied metadata descriptor, parsed from the uploaded YAML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadDescriptor {
    /// Research project the upload belongs to
    #[serde(alias = "project_id")]
    pub research_project_id: Option<String>,
    /// Author of the experiment
    pub author: Option<String>,
    /// Type of experiment
    pub experiment_type: Option<String>,
    /// Date the experiment was conducted (YYYY-MM-DD)
    pub date_conducted: Option<String>,
    /// Comma-separated keywords
    pub custom_tags: Option<String>,
}

impl UploadDescriptor {
    /// Parse the YAML metadata file. Anything that is not a mapping is
    /// rejected, matching the upload contract.
    pub fn parse(bytes: &[u8]) -> Result<Self, ApiError> {
        serde_yaml::from_slice(bytes).map_err(|e| ApiError::InvalidMetadata(e.to_string()))
    }

    /// Parse `date_conducted`. An unparsable value is stored as NULL rather
    /// than failing the whole upload.
    pub fn conducted_date(&self) -> Option<NaiveDate> {
        let raw = self.date_conducted.as_deref()?;
        match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                warn!(value = %raw, "Invalid date_conducted format, storing as null");
                None
            }
        }
    }
}

/// Result of ingesting a single file
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub status: String,
    pub original_filename: String,
    pub final_object_name: String,
    pub file_id: Uuid,
    pub message: String,
}

/// A regular file extracted from an uploaded archive
#[derive(Debug)]
struct ArchiveEntry {
    file_name: String,
    data: Vec<u8>,
}

/// Shared ingest pipeline for single-file and folder uploads
pub struct Ingestor {
    objects: Arc<ObjectStore>,
    catalog: Arc<MetadataStore>,
}

impl Ingestor {
    pub fn new(objects: Arc<ObjectStore>, catalog: Arc<MetadataStore>) -> Self {
        Self { objects, catalog }
    }

    /// Store one file: sanitize its name, resolve a free object key, upload
    /// the body, and insert the catalog row.
    ///
    /// `folder_prefix` is empty for single-file uploads, or a `name/` prefix
    /// for files extracted from an archive.
    #[instrument(skip(self, data, descriptor), fields(filename = %original_filename, size_bytes = data.len()))]
    pub async fn store_file(
        &self,
        original_filename: &str,
        content_type: Option<&str>,
        data: Bytes,
        descriptor: &UploadDescriptor,
        folder_prefix: &str,
    ) -> Result<IngestOutcome, ApiError> {
        let project_prefix = sanitize_project_id(
            descriptor.research_project_id.as_deref().unwrap_or(""),
        );
        let full_prefix = format!("{}{}", project_prefix, folder_prefix);
        let preferred_filename = sanitize_filename(original_filename);

        let object_key = self
            .objects
            .resolve_object_key(&full_prefix, &preferred_filename)
            .await
            .map_err(|e| ApiError::Storage(e.to_string()))?;

        let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);
        let size_bytes = data.len() as i64;

        let started = Instant::now();
        self.objects
            .put_object(&object_key, content_type, data)
            .await
            .map_err(|e| ApiError::Storage(e.to_string()))?;
        metrics::histogram!("catalog.upload.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let record = FileRecord {
            file_id: Uuid::new_v4(),
            project_id: descriptor.research_project_id.clone(),
            file_name: original_filename.to_string(),
            file_type: file_extension(original_filename),
            content_type: content_type.to_string(),
            experiment_type: descriptor.experiment_type.clone(),
            author: descriptor.author.clone(),
            date_conducted: descriptor.conducted_date(),
            size_bytes,
            minio_bucket_name: self.objects.bucket().to_string(),
            minio_object_path: object_key.clone(),
            upload_timestamp: Utc::now(),
            custom_tags: descriptor.custom_tags.clone(),
        };

        self.catalog.insert_file(&record).await?;

        metrics::counter!("catalog.files.uploaded").increment(1);
        metrics::counter!("catalog.bytes.uploaded").increment(size_bytes as u64);

        info!(
            file_id = %record.file_id,
            object_key = %object_key,
            "File ingested"
        );

        Ok(IngestOutcome {
            status: "success".to_string(),
            original_filename: original_filename.to_string(),
            final_object_name: object_key,
            file_id: record.file_id,
            message: "Metadata stored successfully.".to_string(),
        })
    }

    /// Ingest every regular file inside a ZIP archive. All entries land
    /// under a unique folder prefix derived from the archive name.
    #[instrument(skip(self, data, descriptor), fields(archive = %zip_filename, size_bytes = data.len()))]
    pub async fn store_archive(
        &self,
        zip_filename: &str,
        data: Bytes,
        descriptor: &UploadDescriptor,
        max_entry_bytes: u64,
    ) -> Result<Vec<IngestOutcome>, ApiError> {
        let folder_prefix = archive_folder_prefix(zip_filename);
        let entries = extract_entries(&data, max_entry_bytes)?;

        info!(
            folder_prefix = %folder_prefix,
            entry_count = entries.len(),
            "Ingesting archive"
        );

        let mut results = Vec::with_capacity(entries.len());

        // Entries are stored sequentially: collision resolution for one
        // entry must observe the keys claimed by the previous ones.
        for entry in entries {
            let outcome = self
                .store_file(
                    &entry.file_name,
                    None,
                    Bytes::from(entry.data),
                    descriptor,
                    &folder_prefix,
                )
                .await?;
            results.push(outcome);
        }

        Ok(results)
    }
}

/// Unique folder prefix for one archive upload batch, e.g. `session_3f2a91bc/`
fn archive_folder_prefix(zip_filename: &str) -> String {
    let (base, _) = crate::util::split_filename(zip_filename);
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}/", sanitize_filename(base), &suffix[..8])
}

/// Decompress the archive in memory, keeping only ingestable entries
fn extract_entries(data: &[u8], max_entry_bytes: u64) -> Result<Vec<ArchiveEntry>, ApiError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data))
        .map_err(|e| ApiError::InvalidArchive(e.to_string()))?;

    let mut entries = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ApiError::InvalidArchive(e.to_string()))?;

        if entry.is_dir() || !should_ingest_entry(entry.name()) {
            continue;
        }

        if entry.size() > max_entry_bytes {
            return Err(ApiError::InvalidArchive(format!(
                "entry '{}' exceeds {} bytes",
                entry.name(),
                max_entry_bytes
            )));
        }

        // Archive subdirectories are flattened: every entry is catalogued
        // by its file name under the batch folder.
        let file_name = entry
            .name()
            .rsplit('/')
            .next()
            .unwrap_or(entry.name())
            .to_string();

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .by_ref()
            .take(max_entry_bytes + 1)
            .read_to_end(&mut data)
            .map_err(|e| ApiError::InvalidArchive(e.to_string()))?;
        if data.len() as u64 > max_entry_bytes {
            return Err(ApiError::InvalidArchive(format!(
                "entry '{}' exceeds {} bytes",
                file_name, max_entry_bytes
            )));
        }

        entries.push(ArchiveEntry { file_name, data });
    }

    Ok(entries)
}

/// Filter out macOS resource forks and nested archives
fn should_ingest_entry(name: &str) -> bool {
    !name.contains("__MACOSX") && !name.to_lowercase().ends_with(".zip")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    #[test]
    fn test_parse_descriptor_full() {
        let yaml = b"research_project_id: PROJ-042\nauthor: M. Curie\nexperiment_type: spectroscopy\ndate_conducted: 2024-03-15\ncustom_tags: calibration,baseline\n";

        let descriptor = UploadDescriptor::parse(yaml).unwrap();
        assert_eq!(descriptor.research_project_id.as_deref(), Some("PROJ-042"));
        assert_eq!(descriptor.author.as_deref(), Some("M. Curie"));
        assert_eq!(
            descriptor.conducted_date(),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
    }

    #[test]
    fn test_parse_descriptor_project_id_alias() {
        let yaml = b"project_id: PROJ-7\n";
        let descriptor = UploadDescriptor::parse(yaml).unwrap();
        assert_eq!(descriptor.research_project_id.as_deref(), Some("PROJ-7"));
    }

    #[test]
    fn test_parse_descriptor_empty_mapping() {
        let descriptor = UploadDescriptor::parse(b"{}").unwrap();
        assert!(descriptor.research_project_id.is_none());
        assert!(descriptor.conducted_date().is_none());
    }

    #[test]
    fn test_parse_descriptor_rejects_non_mapping() {
        assert!(UploadDescriptor::parse(b"just a plain string").is_err());
        assert!(UploadDescriptor::parse(b"- a\n- list\n").is_err());
    }

    #[test]
    fn test_invalid_date_stored_as_null() {
        let descriptor = UploadDescriptor {
            date_conducted: Some("15/03/2024".to_string()),
            ..Default::default()
        };
        assert!(descriptor.conducted_date().is_none());
    }

    #[test]
    fn test_should_ingest_entry() {
        assert!(should_ingest_entry("results/run01.mat"));
        assert!(!should_ingest_entry("__MACOSX/results/._run01.mat"));
        assert!(!should_ingest_entry("nested/inner.zip"));
        assert!(!should_ingest_entry("inner.ZIP"));
    }

    #[test]
    fn test_archive_folder_prefix_format() {
        let prefix = archive_folder_prefix("session data.zip");
        assert!(prefix.starts_with("session_data_"));
        assert!(prefix.ends_with('/'));
        // base + '_' + 8 hex chars + '/'
        assert_eq!(prefix.len(), "session_data_".len() + 8 + 1);
    }

    fn build_test_zip() -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default();

        writer.add_directory("results/", options).unwrap();
        writer.start_file("results/run01.mat", options).unwrap();
        writer.write_all(b"matlab data").unwrap();
        writer.start_file("notes.txt", options).unwrap();
        writer.write_all(b"lab notes").unwrap();
        writer
            .start_file("__MACOSX/results/._run01.mat", options)
            .unwrap();
        writer.write_all(b"resource fork").unwrap();
        writer.start_file("nested.zip", options).unwrap();
        writer.write_all(b"inner archive").unwrap();
        writer.finish().unwrap();

        cursor.into_inner()
    }

    #[test]
    fn test_extract_entries_filters_and_flattens() {
        let zip_bytes = build_test_zip();
        let entries = extract_entries(&zip_bytes, 1024 * 1024).unwrap();

        let names: Vec<&str> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["run01.mat", "notes.txt"]);
        assert_eq!(entries[0].data, b"matlab data");
    }

    #[test]
    fn test_extract_entries_rejects_oversized_entry() {
        let zip_bytes = build_test_zip();
        let err = extract_entries(&zip_bytes, 4).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArchive(_)));
    }

    #[test]
    fn test_extract_entries_rejects_garbage() {
        let err = extract_entries(b"not a zip archive", 1024).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArchive(_)));
    }

    #[test]
    fn test_ingest_outcome_serialization() {
        let outcome = IngestOutcome {
            status: "success".to_string(),
            original_filename: "run01.mat".to_string(),
            final_object_name: "PROJ-042/run01.mat".to_string(),
            file_id: Uuid::nil(),
            message: "Metadata stored successfully.".to_string(),
        };

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["final_object_name"], "PROJ-042/run01.mat");
        assert!(json["file_id"].is_string());
    }
}
