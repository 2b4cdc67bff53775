use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Catalog row for a stored file
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FileRecord {
    /// Unique file ID
    pub file_id: Uuid,
    /// Research project the file belongs to
    pub project_id: Option<String>,
    /// Name of the file as uploaded
    pub file_name: String,
    /// Uppercased extension (PDF, MAT, ...)
    pub file_type: String,
    /// MIME type
    pub content_type: String,
    /// Type of experiment
    pub experiment_type: Option<String>,
    /// Author of the experiment
    pub author: Option<String>,
    /// Date the experiment was conducted
    pub date_conducted: Option<NaiveDate>,
    /// File size in bytes
    pub size_bytes: i64,
    /// Bucket holding the object
    pub minio_bucket_name: String,
    /// Final (collision-resolved) object key
    pub minio_object_path: String,
    /// When the file was ingested
    pub upload_timestamp: DateTime<Utc>,
    /// Comma-separated keywords
    pub custom_tags: Option<String>,
}

/// Object location resolved from the catalog for downloads
#[derive(Debug, Clone, FromRow)]
pub struct StorageLocation {
    pub minio_bucket_name: String,
    pub minio_object_path: String,
    pub file_name: String,
    pub content_type: String,
}

/// Filter parameters for catalog search
#[derive(Debug, Clone, Default)]
pub struct FileSearchQuery {
    /// Exact file ID match
    pub file_id: Option<Uuid>,
    /// Partial project id match (case-insensitive)
    pub project_id: Option<String>,
    /// Partial author match (case-insensitive)
    pub author: Option<String>,
    /// Partial file type match (case-insensitive)
    pub file_type: Option<String>,
    /// Partial experiment type match (case-insensitive)
    pub experiment_type: Option<String>,
    /// Keyword searched within custom_tags
    pub tags_contain: Option<String>,
    /// Files conducted on or after this date
    pub date_after: Option<NaiveDate>,
    /// Files conducted on or before this date
    pub date_before: Option<NaiveDate>,
    /// Maximum number of results
    pub limit: Option<i64>,
    /// Offset for pagination
    pub offset: Option<i64>,
}

const FILE_COLUMNS: &str = "file_id, project_id, file_name, file_type, content_type, \
     experiment_type, author, date_conducted, size_bytes, \
     minio_bucket_name, minio_object_path, upload_timestamp, custom_tags";

/// Metadata store for the file catalog in PostgreSQL
pub struct MetadataStore {
    pool: PgPool,
}

impl MetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url())
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Insert a catalog row for a newly stored file
    #[instrument(skip(self, record), fields(file_id = %record.file_id, object_path = %record.minio_object_path))]
    pub async fn insert_file(&self, record: &FileRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO file_index.files_metadata_catalog (
                file_id, project_id, file_name, file_type, content_type,
                experiment_type, author, date_conducted, size_bytes,
                minio_bucket_name, minio_object_path, upload_timestamp, custom_tags
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9,
                $10, $11, $12, $13
            )
            "#,
        )
        .bind(record.file_id)
        .bind(&record.project_id)
        .bind(&record.file_name)
        .bind(&record.file_type)
        .bind(&record.content_type)
        .bind(&record.experiment_type)
        .bind(&record.author)
        .bind(record.date_conducted)
        .bind(record.size_bytes)
        .bind(&record.minio_bucket_name)
        .bind(&record.minio_object_path)
        .bind(record.upload_timestamp)
        .bind(&record.custom_tags)
        .execute(&self.pool)
        .await?;

        debug!(file_id = %record.file_id, "File metadata stored");
        metrics::counter!("catalog.files.indexed").increment(1);

        Ok(())
    }

    /// Search catalog rows with filters
    #[instrument(skip(self))]
    pub async fn search_files(
        &self,
        query: &FileSearchQuery,
    ) -> Result<Vec<FileRecord>, sqlx::Error> {
        let sql = build_search_sql(query);

        let mut query_builder = sqlx::query_as::<_, FileRecord>(&sql);

        if let Some(file_id) = query.file_id {
            query_builder = query_builder.bind(file_id);
        }
        if let Some(ref project_id) = query.project_id {
            query_builder = query_builder.bind(format!("%{}%", project_id));
        }
        if let Some(ref author) = query.author {
            query_builder = query_builder.bind(format!("%{}%", author));
        }
        if let Some(ref file_type) = query.file_type {
            query_builder = query_builder.bind(format!("%{}%", file_type));
        }
        if let Some(ref experiment_type) = query.experiment_type {
            query_builder = query_builder.bind(format!("%{}%", experiment_type));
        }
        if let Some(ref tags_contain) = query.tags_contain {
            query_builder = query_builder.bind(format!("%{}%", tags_contain));
        }
        if let Some(date_after) = query.date_after {
            query_builder = query_builder.bind(date_after);
        }
        if let Some(date_before) = query.date_before {
            query_builder = query_builder.bind(date_before);
        }
        if let Some(limit) = query.limit {
            query_builder = query_builder.bind(limit);
        }
        if let Some(offset) = query.offset {
            query_builder = query_builder.bind(offset);
        }

        let records = query_builder.fetch_all(&self.pool).await?;

        metrics::counter!("catalog.searches").increment(1);

        Ok(records)
    }

    /// Get a catalog row by file ID
    pub async fn get_file(&self, file_id: Uuid) -> Result<Option<FileRecord>, sqlx::Error> {
        sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {} FROM file_index.files_metadata_catalog WHERE file_id = $1",
            FILE_COLUMNS
        ))
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Resolve the object location for a file ID
    pub async fn get_storage_location(
        &self,
        file_id: Uuid,
    ) -> Result<Option<StorageLocation>, sqlx::Error> {
        sqlx::query_as::<_, StorageLocation>(
            r#"
            SELECT minio_bucket_name, minio_object_path, file_name, content_type
            FROM file_index.files_metadata_catalog
            WHERE file_id = $1
            "#,
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Build the search SQL with positional parameters in bind order
fn build_search_sql(query: &FileSearchQuery) -> String {
    let mut sql = format!(
        "SELECT {} FROM file_index.files_metadata_catalog WHERE 1=1",
        FILE_COLUMNS
    );
    let mut param_count = 0;

    if query.file_id.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND file_id = ${}", param_count));
    }

    if query.project_id.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND project_id ILIKE ${}", param_count));
    }

    if query.author.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND author ILIKE ${}", param_count));
    }

    if query.file_type.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND file_type ILIKE ${}", param_count));
    }

    if query.experiment_type.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND experiment_type ILIKE ${}", param_count));
    }

    if query.tags_contain.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND custom_tags ILIKE ${}", param_count));
    }

    if query.date_after.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND date_conducted >= ${}", param_count));
    }

    if query.date_before.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND date_conducted <= ${}", param_count));
    }

    sql.push_str(" ORDER BY upload_timestamp DESC");

    if query.limit.is_some() {
        param_count += 1;
        sql.push_str(&format!(" LIMIT ${}", param_count));
    }

    if query.offset.is_some() {
        param_count += 1;
        sql.push_str(&format!(" OFFSET ${}", param_count));
    }

    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_sql_no_filters() {
        let sql = build_search_sql(&FileSearchQuery::default());
        assert!(sql.contains("WHERE 1=1"));
        assert!(sql.contains("ORDER BY upload_timestamp DESC"));
        assert!(!sql.contains("ILIKE"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn test_search_sql_text_filters_use_ilike() {
        let query = FileSearchQuery {
            author: Some("curie".to_string()),
            file_type: Some("mat".to_string()),
            ..Default::default()
        };

        let sql = build_search_sql(&query);
        assert!(sql.contains("author ILIKE $1"));
        assert!(sql.contains("file_type ILIKE $2"));
    }

    #[test]
    fn test_search_sql_parameter_numbering() {
        let query = FileSearchQuery {
            file_id: Some(Uuid::nil()),
            tags_contain: Some("calibration".to_string()),
            date_after: Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            limit: Some(100),
            offset: Some(10),
            ..Default::default()
        };

        let sql = build_search_sql(&query);
        assert!(sql.contains("file_id = $1"));
        assert!(sql.contains("custom_tags ILIKE $2"));
        assert!(sql.contains("date_conducted >= $3"));
        assert!(sql.contains("LIMIT $4"));
        assert!(sql.contains("OFFSET $5"));
    }

    #[test]
    fn test_search_sql_date_bounds_inclusive() {
        let query = FileSearchQuery {
            date_after: Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            date_before: Some(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()),
            ..Default::default()
        };

        let sql = build_search_sql(&query);
        assert!(sql.contains("date_conducted >= $1"));
        assert!(sql.contains("date_conducted <= $2"));
    }
}
