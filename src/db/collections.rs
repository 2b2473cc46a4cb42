//! Collection CRUD.

use crate::db::{Collection, Database, now_timestamp, timestamp_to_datetime};
use crate::error::{AppError, Result, storage};
use rusqlite::{Connection, OptionalExtension, params};

/// Ownership and flags of a collection, read before mutating it.
#[derive(Debug, Clone)]
pub(crate) struct CollectionInfo {
    pub owner_id: String,
    pub editable: bool,
}

/// Look up a collection's owner and editability.
pub(crate) fn collection_info(conn: &Connection, id: &str) -> Result<Option<CollectionInfo>> {
    conn.query_row(
        "SELECT owner_id, editable FROM collection WHERE id = ?1",
        params![id],
        |row| {
            Ok(CollectionInfo {
                owner_id: row.get(0)?,
                editable: row.get(1)?,
            })
        },
    )
    .optional()
    .map_err(storage("Failed to get collection"))
}

/// Fail with `NotFound` unless `id` names a collection owned by `user_id`.
pub(crate) fn ensure_owned(conn: &Connection, id: &str, user_id: &str) -> Result<CollectionInfo> {
    match collection_info(conn, id)? {
        Some(info) if info.owner_id == user_id => Ok(info),
        _ => Err(AppError::NotFound(format!("Collection not found: {}", id))),
    }
}

impl Database {
    /// Create a user collection. User collections are always editable and
    /// never the read collection.
    pub fn create_collection(&self, owner_id: &str, name: &str, exclusive: bool) -> Result<Collection> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Collection name is required".to_string()));
        }

        let collection = Collection {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            creation_date: timestamp_to_datetime(now_timestamp()),
            owner_id: owner_id.to_string(),
            exclusive,
            read_col: false,
            editable: true,
            contained_books: 0,
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO collection (id, name, creation_date, owner_id, exclusive, read_col, editable)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 1)",
            params![
                collection.id,
                collection.name,
                collection.creation_date.timestamp(),
                collection.owner_id,
                collection.exclusive,
            ],
        )
        .map_err(storage("Failed to create collection"))?;

        Ok(collection)
    }

    /// Rename a collection and update its exclusivity flag.
    pub fn update_collection(&self, id: &str, owner_id: &str, name: &str, exclusive: bool) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Collection name is required".to_string()));
        }

        self.transaction(|tx| {
            let info = ensure_owned(tx, id, owner_id)?;
            if !info.editable {
                return Err(AppError::NotEditable);
            }

            tx.execute(
                "UPDATE collection SET name = ?1, exclusive = ?2 WHERE id = ?3",
                params![name, exclusive, id],
            )
            .map_err(storage("Failed to update collection"))?;
            Ok(())
        })
    }

    /// Collections of a user, newest first, with their book counts.
    pub fn collections_of(&self, owner_id: &str) -> Result<Vec<Collection>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.name, c.creation_date, c.owner_id, c.exclusive,
                        c.read_col, c.editable, COUNT(chb.id)
                 FROM collection c
                 LEFT JOIN collection_has_book chb ON chb.collection_id = c.id
                 WHERE c.owner_id = ?1
                 GROUP BY c.id
                 ORDER BY c.creation_date DESC, c.name ASC",
            )
            .map_err(storage("Failed to prepare query"))?;

        let collections = stmt
            .query_map(params![owner_id], |row| {
                Ok(Collection {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    creation_date: timestamp_to_datetime(row.get(2)?),
                    owner_id: row.get(3)?,
                    exclusive: row.get(4)?,
                    read_col: row.get(5)?,
                    editable: row.get(6)?,
                    contained_books: row.get(7)?,
                })
            })
            .map_err(storage("Failed to list collections"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage("Failed to collect collections"))?;

        Ok(collections)
    }

    /// Delete an editable collection and its associations.
    pub fn delete_collection(&self, id: &str, owner_id: &str) -> Result<()> {
        self.transaction(|tx| {
            let info = ensure_owned(tx, id, owner_id)?;
            if !info.editable {
                return Err(AppError::NotEditable);
            }

            tx.execute(
                "DELETE FROM collection_has_book WHERE collection_id = ?1",
                params![id],
            )
            .map_err(storage("Failed to delete collection books"))?;

            tx.execute("DELETE FROM collection WHERE id = ?1", params![id])
                .map_err(storage("Failed to delete collection"))?;
            Ok(())
        })
    }
}
