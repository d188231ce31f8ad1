//! Entity commits and filter queries.
//!
//! [`EntityOps`] is the thin layer that turns [`Entity`] records into commit
//! grids and filter expressions into decoded rows. Server-reported failures
//! inside a 200 response surface as [`ClientError::Commit`].

use std::sync::Arc;

use serde_json::Value as Json;
use tracing::{debug, error, info};

use crate::{
    auth::ABOUT_ENDPOINT,
    error::ClientError,
    session::SessionManager,
    zinc::{
        Dict,
        Grid,
        Ref,
        Value,
        decode_rows,
        encode_commit_add,
        encode_commit_remove,
        encode_commit_update,
        encode_read_by_filter,
        response_error,
    },
};

mod model;

pub use model::{Entity, EntityKind, PointKind};

/// Endpoint receiving commit grids.
pub const COMMIT_ENDPOINT: &str = "commit";
/// Endpoint receiving filter grids.
pub const READ_ENDPOINT: &str = "read";

fn id_filter(id: &Ref) -> String { format!("id=={id}") }

fn with_parent(mut filter: String, tag: &str, parent: Option<&Ref>) -> String {
    if let Some(parent_ref) = parent {
        filter.push_str(&format!(" and {tag}=={parent_ref}"));
    }
    filter
}

/// Entity and query operations over a [`SessionManager`].
#[derive(Clone, Debug)]
pub struct EntityOps {
    session: Arc<SessionManager>,
}

impl EntityOps {
    /// Operations sending through `session`.
    #[must_use]
    pub const fn new(session: Arc<SessionManager>) -> Self { Self { session } }

    async fn commit(&self, grid: &Grid) -> Result<Vec<Dict>, ClientError> {
        let response = self.session.post_grid(COMMIT_ENDPOINT, grid).await?;
        if let Some(message) = response_error(&response) {
            error!(error = %message, "commit rejected");
            return Err(ClientError::Commit(message));
        }
        Ok(decode_rows(&response))
    }

    /// Create `entities`, returning the rows the server stored.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] for an illegal tag name,
    /// [`ClientError::Commit`] when the server rejects the grid, and the
    /// session's errors otherwise.
    pub async fn create(&self, entities: &[Entity]) -> Result<Vec<Dict>, ClientError> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        info!(count = entities.len(), "creating entities");
        let rows = self.commit(&encode_commit_add(entities)?).await?;
        info!(count = rows.len(), "entities created");
        Ok(rows)
    }

    /// Overwrite tags on existing `entities`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] without sending anything if any
    /// entity lacks an id, and otherwise as for [`EntityOps::create`].
    pub async fn update(&self, entities: &[Entity]) -> Result<Vec<Dict>, ClientError> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let grid = encode_commit_update(entities)?;
        info!(count = entities.len(), "updating entities");
        let rows = self.commit(&grid).await?;
        info!(count = rows.len(), "entities updated");
        Ok(rows)
    }

    /// Delete one entity.
    ///
    /// The row is read first so its `mod` timestamp can be sent for the
    /// server's optimistic locking check.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::EntityNotFound`] if no row matches or the
    /// server reports the entity as missing, [`ClientError::Commit`] for
    /// other server-reported failures, and the session's errors otherwise.
    pub async fn delete_entity(&self, id: &Ref) -> Result<(), ClientError> {
        info!(%id, "deleting entity");
        let rows = self.read_by_filter(&id_filter(id)).await?;
        let row = rows
            .first()
            .ok_or_else(|| ClientError::EntityNotFound(id.to_string()))?;
        let modified = row.get("mod").and_then(Value::as_datetime).cloned();
        let grid = encode_commit_remove(&[(id.clone(), modified)]);
        match self.commit(&grid).await {
            Ok(_) => {
                info!(%id, "entity deleted");
                Ok(())
            }
            Err(ClientError::Commit(message)) if message.to_lowercase().contains("not found") => {
                Err(ClientError::EntityNotFound(id.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// Delete several entities without optimistic locking.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Commit`] when the server rejects the grid and
    /// the session's errors otherwise.
    pub async fn delete_entities(&self, ids: &[Ref]) -> Result<(), ClientError> {
        if ids.is_empty() {
            return Ok(());
        }
        info!(count = ids.len(), "deleting entities");
        let entries: Vec<(Ref, Option<_>)> = ids.iter().map(|id| (id.clone(), None)).collect();
        self.commit(&encode_commit_remove(&entries)).await?;
        Ok(())
    }

    /// Read every row matching a Haystack filter expression.
    ///
    /// # Errors
    ///
    /// Returns the session's errors.
    pub async fn read_by_filter(&self, filter: &str) -> Result<Vec<Dict>, ClientError> {
        debug!(filter, "reading by filter");
        let response = self
            .session
            .post_grid(READ_ENDPOINT, &encode_read_by_filter(filter))
            .await?;
        let rows = decode_rows(&response);
        debug!(count = rows.len(), "read complete");
        Ok(rows)
    }

    /// Read one row by id.
    ///
    /// # Errors
    ///
    /// Returns the session's errors.
    pub async fn read_by_id(&self, id: &Ref) -> Result<Option<Dict>, ClientError> {
        Ok(self.read_by_filter(&id_filter(id)).await?.into_iter().next())
    }

    /// Read the rows for `ids` in one request. No request is sent for an
    /// empty slice.
    ///
    /// # Errors
    ///
    /// Returns the session's errors.
    pub async fn read_by_ids(&self, ids: &[Ref]) -> Result<Vec<Dict>, ClientError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = ids.iter().map(id_filter).collect::<Vec<_>>().join(" or ");
        self.read_by_filter(&filter).await
    }

    /// Read all sites.
    ///
    /// # Errors
    ///
    /// Returns the session's errors.
    pub async fn read_sites(&self) -> Result<Vec<Dict>, ClientError> { self.read_by_filter("site").await }

    /// Read equipment, optionally restricted to one site.
    ///
    /// # Errors
    ///
    /// Returns the session's errors.
    pub async fn read_equipment(&self, site: Option<&Ref>) -> Result<Vec<Dict>, ClientError> {
        self.read_by_filter(&with_parent("equip".to_owned(), "siteRef", site))
            .await
    }

    /// Read points, optionally restricted to a site and an equip.
    ///
    /// # Errors
    ///
    /// Returns the session's errors.
    pub async fn read_points(&self, site: Option<&Ref>, equip: Option<&Ref>) -> Result<Vec<Dict>, ClientError> {
        let filter = with_parent(with_parent("point".to_owned(), "siteRef", site), "equipRef", equip);
        self.read_by_filter(&filter).await
    }

    /// Read points as [`Entity`] records.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] if a row is not a point, and the
    /// session's errors otherwise.
    pub async fn read_point_entities(
        &self,
        site: Option<&Ref>,
        equip: Option<&Ref>,
    ) -> Result<Vec<Entity>, ClientError> {
        self.read_points(site, equip)
            .await?
            .into_iter()
            .map(Entity::from_dict)
            .collect()
    }

    /// Fetch the project `about` record.
    ///
    /// # Errors
    ///
    /// Returns the session's errors.
    pub async fn about(&self) -> Result<Json, ClientError> { self.session.get_json(ABOUT_ENDPOINT, &[]).await }

    /// The project's time zone name, read from the `about` record.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] if the record carries no `tz`,
    /// and the session's errors otherwise.
    pub async fn project_timezone(&self) -> Result<String, ClientError> {
        let about = self.about().await?;
        let tz = about
            .get("rows")
            .and_then(Json::as_array)
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("tz"))
            .and_then(timezone_name)
            .ok_or_else(|| ClientError::validation("could not determine project time zone"))?;
        info!(tz, "project time zone");
        Ok(tz.to_owned())
    }
}

/// A `tz` cell may be a plain string or a dict holding the name in `val` or
/// `tz`.
fn timezone_name(cell: &Json) -> Option<&str> {
    let name = match cell {
        Json::String(s) => Some(s.as_str()),
        Json::Object(map) => map
            .get("val")
            .and_then(Json::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| map.get("tz").and_then(Json::as_str)),
        _ => None,
    };
    name.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case(json!("New_York"), Some("New_York"))]
    #[case(json!({"_kind": "dateTime", "val": "Chicago"}), Some("Chicago"))]
    #[case(json!({"val": "", "tz": "UTC"}), Some("UTC"))]
    #[case(json!(""), None)]
    #[case(json!(42), None)]
    fn extracts_timezone_name(#[case] cell: Json, #[case] expected: Option<&str>) {
        assert_eq!(timezone_name(&cell), expected);
    }

    #[rstest]
    fn builds_parent_filters() {
        let site = Ref::new("s1").expect("ref");
        let equip = Ref::new("e1").expect("ref");
        assert_eq!(
            with_parent(with_parent("point".to_owned(), "siteRef", Some(&site)), "equipRef", Some(&equip)),
            "point and siteRef==@s1 and equipRef==@e1"
        );
        assert_eq!(with_parent("equip".to_owned(), "siteRef", None), "equip");
    }
}
