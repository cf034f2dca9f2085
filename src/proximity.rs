//! # Proximity Queries
//!
//! "Find around a point" on top of [`DocumentAdapter`], built as a
//! three-stage aggregation:
//!
//! 1. Geo stage: spherical proximity filter around the supplied point,
//!    optionally bounded by distance and pre-filtered by activity,
//!    computing a `distance` field per candidate
//! 2. Sort stage: orders candidates by `distance` then `status`
//! 3. Group stage: collapses candidates sharing the configured group key,
//!    keeping the first document per key
//!
//! Grouping is what makes repeated location samples safe: an entity that
//! checked in five times inside the radius still comes back once.
//!
//! ## Example
//!
//! ```rust,ignore
//! let proximity = ProximityAdapter::new(
//!     DocumentAdapter::new(pool.clone(), CheckinSchema),
//!     DocumentAdapter::new(pool, CheckinLogSchema),
//!     ProximitySettings::new("userId"),
//! );
//!
//! let geo = GeoQuery::new(GeoPoint::new(-122.27, 37.80)).max_distance(500.0);
//! let nearby = proximity
//!     .find_many_around(&geo, Some(&ActivityFilter::new("hiking")))
//!     .await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bson::{Bson, Document, doc};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::IndexModel;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::adapter::{DocumentAdapter, UpsertOutcome};
use crate::error::{StoreError, StoreResult};
use crate::schema::EntitySchema;

/// Field the geo stage computes on every candidate.
const DISTANCE_FIELD: &str = "distance";
/// Secondary sort field.
const STATUS_FIELD: &str = "status";
/// Field the group stage stores the representative document under.
const GROUP_RECORD_KEY: &str = "record";
/// Timestamp stamped onto activity-log records.
const LOGGED_AT_FIELD: &str = "loggedAt";

/// A point on the globe, GeoJSON axis order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Degrees east, -180 to 180.
    pub longitude: f64,
    /// Degrees north, -90 to 90.
    pub latitude: f64,
}

impl GeoPoint {
    /// Create a point. Longitude first, as GeoJSON writes it.
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// GeoJSON geometry document for this point.
    pub fn to_geometry(&self) -> Document {
        doc! { "type": "Point", "coordinates": [self.longitude, self.latitude] }
    }
}

/// A proximity search: a center point and optional distance bounds in
/// meters.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoQuery {
    /// Center of the search.
    pub point: GeoPoint,
    /// Minimum distance from the center, in meters.
    pub min_distance: Option<f64>,
    /// Maximum distance from the center, in meters.
    pub max_distance: Option<f64>,
}

impl GeoQuery {
    /// Create an unbounded search around a point.
    pub fn new(point: GeoPoint) -> Self {
        Self {
            point,
            min_distance: None,
            max_distance: None,
        }
    }

    /// Set the minimum distance in meters.
    pub fn min_distance(mut self, meters: f64) -> Self {
        self.min_distance = Some(meters);
        self
    }

    /// Set the maximum distance in meters.
    pub fn max_distance(mut self, meters: f64) -> Self {
        self.max_distance = Some(meters);
        self
    }
}

/// Equality constraint merged into the geo stage's pre-filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityFilter {
    /// Value the activity field must equal.
    pub activity: Bson,
}

impl ActivityFilter {
    /// Create a filter on an activity value.
    pub fn new(activity: impl Into<Bson>) -> Self {
        Self {
            activity: activity.into(),
        }
    }
}

/// Field wiring for a proximity adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProximitySettings {
    /// Field holding the GeoJSON location, and the index target.
    pub location_field: String,
    /// Deduplication key; one result per distinct value.
    pub group_key: String,
    /// Field the activity pre-filter compares against.
    pub activity_field: String,
    /// Direction for the distance/status sort. Defaults to descending
    /// (`-1`); nearest-first callers should set `1`.
    pub sort_direction: i32,
}

impl ProximitySettings {
    /// Create settings with a deduplication key and default field names.
    pub fn new(group_key: impl Into<String>) -> Self {
        Self {
            location_field: "location".to_string(),
            group_key: group_key.into(),
            activity_field: "activity".to_string(),
            sort_direction: -1,
        }
    }

    /// Set the location field name.
    pub fn location_field(mut self, field: impl Into<String>) -> Self {
        self.location_field = field.into();
        self
    }

    /// Set the activity field name.
    pub fn activity_field(mut self, field: impl Into<String>) -> Self {
        self.activity_field = field.into();
        self
    }

    /// Set the sort direction for the distance/status sort.
    pub fn sort_direction(mut self, direction: i32) -> Self {
        self.sort_direction = direction;
        self
    }
}

/// Proximity search and logged writes for one entity schema, with a
/// sibling adapter receiving the activity log.
pub struct ProximityAdapter<S, L> {
    adapter: DocumentAdapter<S>,
    log_adapter: DocumentAdapter<L>,
    settings: ProximitySettings,
    geo_index_ready: Arc<AtomicBool>,
}

impl<S, L> Clone for ProximityAdapter<S, L> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            log_adapter: self.log_adapter.clone(),
            settings: self.settings.clone(),
            geo_index_ready: Arc::clone(&self.geo_index_ready),
        }
    }
}

impl<S, L> ProximityAdapter<S, L>
where
    S: EntitySchema,
    L: EntitySchema,
{
    /// Create a proximity adapter over a primary and a log adapter.
    pub fn new(
        adapter: DocumentAdapter<S>,
        log_adapter: DocumentAdapter<L>,
        settings: ProximitySettings,
    ) -> Self {
        Self {
            adapter,
            log_adapter,
            settings,
            geo_index_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The primary adapter, for plain CRUD against the same collection.
    pub fn adapter(&self) -> &DocumentAdapter<S> {
        &self.adapter
    }

    /// The adapter receiving activity-log records.
    pub fn log_adapter(&self) -> &DocumentAdapter<L> {
        &self.log_adapter
    }

    /// The field wiring in effect.
    pub fn settings(&self) -> &ProximitySettings {
        &self.settings
    }

    /// Build the three-stage pipeline for a search.
    pub fn proximity_pipeline(
        &self,
        geo: &GeoQuery,
        activity: Option<&ActivityFilter>,
    ) -> Vec<Document> {
        vec![
            self.geo_stage(geo, activity),
            self.sort_stage(),
            self.group_stage(),
        ]
    }

    fn geo_stage(&self, geo: &GeoQuery, activity: Option<&ActivityFilter>) -> Document {
        let mut near = doc! {
            "near": geo.point.to_geometry(),
            "distanceField": DISTANCE_FIELD,
            "spherical": true,
        };
        if let Some(min) = geo.min_distance {
            near.insert("minDistance", min);
        }
        if let Some(max) = geo.max_distance {
            near.insert("maxDistance", max);
        }
        if let Some(filter) = activity {
            let mut pre_filter = Document::new();
            pre_filter.insert(self.settings.activity_field.clone(), filter.activity.clone());
            near.insert("query", pre_filter);
        }
        doc! { "$geoNear": near }
    }

    fn sort_stage(&self) -> Document {
        let mut sort = Document::new();
        sort.insert(DISTANCE_FIELD, self.settings.sort_direction);
        sort.insert(STATUS_FIELD, self.settings.sort_direction);
        doc! { "$sort": sort }
    }

    fn group_stage(&self) -> Document {
        let mut group = doc! { "_id": format!("${}", self.settings.group_key) };
        group.insert(GROUP_RECORD_KEY, doc! { "$first": "$$ROOT" });
        doc! { "$group": group }
    }

    /// Find entities around a point, at most one per group key.
    pub async fn find_many_around(
        &self,
        geo: &GeoQuery,
        activity: Option<&ActivityFilter>,
    ) -> StoreResult<Vec<Document>> {
        let pipeline = self.proximity_pipeline(geo, activity);
        let groups = self.run_pipeline("find_many_around", pipeline).await?;
        Ok(groups.into_iter().filter_map(group_record).collect())
    }

    /// Find the single ranked-first entity around a point.
    pub async fn find_one_around(
        &self,
        geo: &GeoQuery,
        activity: Option<&ActivityFilter>,
    ) -> StoreResult<Option<Document>> {
        let pipeline = self.one_around_pipeline(geo, activity);
        let groups = self.run_pipeline("find_one_around", pipeline).await?;
        Ok(groups.into_iter().filter_map(group_record).next())
    }

    /// The search pipeline capped to one group.
    fn one_around_pipeline(
        &self,
        geo: &GeoQuery,
        activity: Option<&ActivityFilter>,
    ) -> Vec<Document> {
        let mut pipeline = self.proximity_pipeline(geo, activity);
        pipeline.push(doc! { "$limit": 1 });
        pipeline
    }

    async fn run_pipeline(
        &self,
        operation: &'static str,
        pipeline: Vec<Document>,
    ) -> StoreResult<Vec<Document>> {
        let collection = self.adapter.collection().await?;
        debug!(operation, collection = %self.adapter.schema().collection_name(), stages = pipeline.len(), "running proximity pipeline");
        let cursor = collection
            .aggregate(pipeline, None)
            .await
            .map_err(|e| self.pipeline_failure(operation, e))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| self.pipeline_failure(operation, e))
    }

    fn pipeline_failure(&self, operation: &'static str, err: mongodb::error::Error) -> StoreError {
        error!(operation, collection = %self.adapter.schema().collection_name(), error = %err, "proximity pipeline failed");
        StoreError::Driver(err)
    }

    /// Upsert through the primary adapter, plus two side effects that
    /// neither block nor fail the call: an activity-log insert and a
    /// lazily-created geospatial index on the location field.
    pub async fn upsert_one(&self, form: Document) -> StoreResult<UpsertOutcome> {
        self.record_activity(&form);
        self.ensure_geo_index();
        self.adapter.upsert_one(form).await
    }

    /// Queue an activity-log insert for a form, stamped with the current
    /// time.
    fn record_activity(&self, form: &Document) {
        let log_adapter = self.log_adapter.clone();
        let mut record = form.clone();
        record.insert(LOGGED_AT_FIELD, bson::DateTime::from_chrono(Utc::now()));
        spawn_side_write("record_activity", async move {
            log_adapter.insert_one(record).await.map(|_| ())
        });
    }

    /// Queue creation of the 2dsphere index backing the geo stage. Runs
    /// once per adapter lineage; clones share the marker.
    fn ensure_geo_index(&self) {
        if self.geo_index_ready.load(Ordering::Relaxed) {
            return;
        }
        let adapter = self.adapter.clone();
        let ready = Arc::clone(&self.geo_index_ready);
        let location_field = self.settings.location_field.clone();
        spawn_side_write("ensure_geo_index", async move {
            let collection = adapter.collection().await?;
            let mut keys = Document::new();
            keys.insert(location_field, "2dsphere");
            let model = IndexModel::builder().keys(keys).build();
            let result = collection.create_index(model, None).await?;
            debug!(index = %result.index_name, "geospatial index ensured");
            ready.store(true, Ordering::Relaxed);
            Ok(())
        });
    }
}

/// Fire-and-forget a store task; failures are logged and dropped.
fn spawn_side_write<F>(task_name: &'static str, task: F)
where
    F: std::future::Future<Output = StoreResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(error) = task.await {
            warn!(task = task_name, %error, "side write failed");
        }
    });
}

/// Pull the representative document out of a group envelope.
fn group_record(mut envelope: Document) -> Option<Document> {
    match envelope.remove(GROUP_RECORD_KEY) {
        Some(Bson::Document(record)) => Some(record),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::pool::ConnectionPool;
    use pretty_assertions::assert_eq;

    struct CheckinSchema;

    impl EntitySchema for CheckinSchema {
        fn collection_name(&self) -> &str {
            "checkins"
        }
    }

    struct CheckinLogSchema;

    impl EntitySchema for CheckinLogSchema {
        fn collection_name(&self) -> &str {
            "checkin_logs"
        }
    }

    fn proximity() -> ProximityAdapter<CheckinSchema, CheckinLogSchema> {
        let pool = ConnectionPool::single(StoreConfig::new(
            "mongodb://localhost:27017",
            "vicinity_test",
        ));
        ProximityAdapter::new(
            DocumentAdapter::new(pool.clone(), CheckinSchema),
            DocumentAdapter::new(pool, CheckinLogSchema),
            ProximitySettings::new("userId"),
        )
    }

    #[test]
    fn test_settings_defaults() {
        let settings = ProximitySettings::new("userId");
        assert_eq!(settings.location_field, "location");
        assert_eq!(settings.group_key, "userId");
        assert_eq!(settings.activity_field, "activity");
        assert_eq!(settings.sort_direction, -1);
    }

    #[test]
    fn test_geo_point_geometry_axis_order() {
        let geometry = GeoPoint::new(-122.27, 37.80).to_geometry();
        assert_eq!(
            geometry,
            doc! { "type": "Point", "coordinates": [-122.27, 37.80] }
        );
    }

    #[test]
    fn test_pipeline_stage_order() {
        let adapter = proximity();
        let geo = GeoQuery::new(GeoPoint::new(-122.27, 37.80));

        let pipeline = adapter.proximity_pipeline(&geo, None);
        assert_eq!(pipeline.len(), 3);
        assert!(pipeline[0].contains_key("$geoNear"));
        assert!(pipeline[1].contains_key("$sort"));
        assert!(pipeline[2].contains_key("$group"));
    }

    #[test]
    fn test_geo_stage_minimal() {
        let adapter = proximity();
        let geo = GeoQuery::new(GeoPoint::new(-122.27, 37.80));

        let stage = adapter.proximity_pipeline(&geo, None).remove(0);
        let near = stage.get_document("$geoNear").unwrap();

        assert_eq!(
            near.get_document("near").unwrap(),
            &doc! { "type": "Point", "coordinates": [-122.27, 37.80] }
        );
        assert_eq!(near.get_str("distanceField").unwrap(), "distance");
        assert!(near.get_bool("spherical").unwrap());
        assert!(!near.contains_key("minDistance"));
        assert!(!near.contains_key("maxDistance"));
        assert!(!near.contains_key("query"));
    }

    #[test]
    fn test_geo_stage_bounds_and_activity() {
        let adapter = proximity();
        let geo = GeoQuery::new(GeoPoint::new(-122.27, 37.80))
            .min_distance(10.0)
            .max_distance(500.0);
        let filter = ActivityFilter::new("hiking");

        let stage = adapter.proximity_pipeline(&geo, Some(&filter)).remove(0);
        let near = stage.get_document("$geoNear").unwrap();

        assert_eq!(near.get_f64("minDistance").unwrap(), 10.0);
        assert_eq!(near.get_f64("maxDistance").unwrap(), 500.0);
        assert_eq!(
            near.get_document("query").unwrap(),
            &doc! { "activity": "hiking" }
        );
    }

    #[test]
    fn test_sort_stage_default_direction() {
        let adapter = proximity();
        let geo = GeoQuery::new(GeoPoint::new(-122.27, 37.80));

        let stage = adapter.proximity_pipeline(&geo, None).remove(1);
        assert_eq!(
            stage.get_document("$sort").unwrap(),
            &doc! { "distance": -1, "status": -1 }
        );
    }

    #[test]
    fn test_sort_stage_direction_override() {
        let pool = ConnectionPool::single(StoreConfig::new(
            "mongodb://localhost:27017",
            "vicinity_test",
        ));
        let adapter = ProximityAdapter::new(
            DocumentAdapter::new(pool.clone(), CheckinSchema),
            DocumentAdapter::new(pool, CheckinLogSchema),
            ProximitySettings::new("userId").sort_direction(1),
        );
        let geo = GeoQuery::new(GeoPoint::new(-122.27, 37.80));

        let stage = adapter.proximity_pipeline(&geo, None).remove(1);
        assert_eq!(
            stage.get_document("$sort").unwrap(),
            &doc! { "distance": 1, "status": 1 }
        );
    }

    #[test]
    fn test_group_stage_dedup_key() {
        let adapter = proximity();
        let geo = GeoQuery::new(GeoPoint::new(-122.27, 37.80));

        let stage = adapter.proximity_pipeline(&geo, None).remove(2);
        assert_eq!(
            stage.get_document("$group").unwrap(),
            &doc! { "_id": "$userId", "record": { "$first": "$$ROOT" } }
        );
    }

    #[test]
    fn test_one_around_pipeline_appends_limit_after_group() {
        let adapter = proximity();
        let geo = GeoQuery::new(GeoPoint::new(-122.27, 37.80));

        let pipeline = adapter.one_around_pipeline(&geo, None);
        assert_eq!(pipeline.len(), 4);
        assert!(pipeline[2].contains_key("$group"));
        assert_eq!(pipeline[3], doc! { "$limit": 1 });
    }

    #[test]
    fn test_group_record_unwraps_representative() {
        let envelope = doc! {
            "_id": "u-100",
            "record": { "userId": "u-100", "distance": 42.0 },
        };
        let record = group_record(envelope).unwrap();
        assert_eq!(record.get_str("userId").unwrap(), "u-100");
    }

    #[test]
    fn test_group_record_skips_malformed_envelopes() {
        assert_eq!(group_record(doc! { "_id": "u-100" }), None);
        assert_eq!(group_record(doc! { "record": Bson::Null }), None);
    }
}
