//! MongoDB structure collection: collections, indexes and document counts.

use super::classify_mongo_error;
use crate::Result;
use crate::models::{CollectionInfo, DatabaseStructure, DatabaseType, IndexInfo};
use futures::TryStreamExt;
use mongodb::Client;
use mongodb::bson::Document;

/// Main entry point for structure collection.
pub(crate) async fn collect_structure(client: &Client, database: &str) -> Result<DatabaseStructure> {
    let start_time = std::time::Instant::now();
    let db = client.database(database);

    let mut names = db
        .list_collection_names()
        .await
        .map_err(|e| classify_mongo_error("Failed to enumerate collections", e))?;
    names.retain(|name| !name.starts_with("system."));
    names.sort();

    let mut collections = Vec::with_capacity(names.len());
    for name in names {
        let collection = db.collection::<Document>(&name);

        let indexes = collect_indexes(&collection).await?;

        let document_count = match collection.estimated_document_count().await {
            Ok(count) => Some(count),
            Err(e) => {
                // Views reject count commands
                tracing::debug!("No document count for '{}.{}': {}", database, name, e);
                None
            }
        };

        collections.push(CollectionInfo {
            pure_name: name,
            indexes,
            document_count,
        });
    }

    tracing::debug!(
        "MongoDB structure of '{}' collected in {:.2}s: {} collections",
        database,
        start_time.elapsed().as_secs_f64(),
        collections.len()
    );

    Ok(DatabaseStructure {
        engine: DatabaseType::MongoDB,
        tables: Vec::new(),
        views: Vec::new(),
        collections,
    })
}

async fn collect_indexes(collection: &mongodb::Collection<Document>) -> Result<Vec<IndexInfo>> {
    let cursor = match collection.list_indexes().await {
        Ok(cursor) => cursor,
        Err(e) => {
            let error = classify_mongo_error("Failed to list indexes", e);
            if error.is_transport() {
                return Err(error);
            }
            // Views have no indexes
            tracing::debug!("No indexes for collection '{}': {}", collection.name(), error);
            return Ok(Vec::new());
        }
    };

    let models: Vec<mongodb::IndexModel> = cursor
        .try_collect()
        .await
        .map_err(|e| classify_mongo_error("Failed to iterate indexes", e))?;

    let mut indexes: Vec<IndexInfo> = models
        .into_iter()
        .map(|model| {
            let columns = model.keys.keys().cloned().collect();
            let (name, is_unique) = model
                .options
                .map(|o| (o.name.unwrap_or_default(), o.unique.unwrap_or(false)))
                .unwrap_or_default();
            IndexInfo {
                is_primary: name == "_id_",
                is_unique: is_unique || name == "_id_",
                name,
                columns,
            }
        })
        .collect();

    indexes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(indexes)
}
