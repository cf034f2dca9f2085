//! Integration tests for proximity search.
//!
//! These tests verify pipeline construction and the write-path contract
//! without a running store:
//! - Stage shapes for the geo, sort, and group stages
//! - Distance bounds and activity pre-filters
//! - Primary results staying decoupled from side writes

use vicinity_store::adapter::DocumentAdapter;
use vicinity_store::config::StoreConfig;
use vicinity_store::pool::ConnectionPool;
use vicinity_store::proximity::{
    ActivityFilter, GeoPoint, GeoQuery, ProximityAdapter, ProximitySettings,
};
use vicinity_store::schema::EntitySchema;
use vicinity_store::{Bson, doc};

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

fn offline_pool() -> ConnectionPool {
    ConnectionPool::single(StoreConfig::new(
        "mongodb://localhost:27017",
        "vicinity_test",
    ))
}

fn proximity_with(
    settings: ProximitySettings,
) -> ProximityAdapter<CheckinSchema, CheckinLogSchema> {
    let pool = offline_pool();
    ProximityAdapter::new(
        DocumentAdapter::new(pool.clone(), CheckinSchema),
        DocumentAdapter::new(pool, CheckinLogSchema),
        settings,
    )
}

/// The full pipeline: geo filter with bounds and activity pre-filter,
/// then a distance/status sort, then one representative per group key.
#[test]
fn test_pipeline_shape() {
    let proximity = proximity_with(ProximitySettings::new("userId"));
    let geo = GeoQuery::new(GeoPoint::new(-122.27, 37.80))
        .min_distance(10.0)
        .max_distance(500.0);
    let filter = ActivityFilter::new("hiking");

    let pipeline = proximity.proximity_pipeline(&geo, Some(&filter));
    assert_eq!(
        pipeline,
        vec![
            doc! {
                "$geoNear": {
                    "near": { "type": "Point", "coordinates": [-122.27, 37.80] },
                    "distanceField": "distance",
                    "spherical": true,
                    "minDistance": 10.0,
                    "maxDistance": 500.0,
                    "query": { "activity": "hiking" },
                }
            },
            doc! { "$sort": { "distance": -1, "status": -1 } },
            doc! { "$group": { "_id": "$userId", "record": { "$first": "$$ROOT" } } },
        ]
    );
}

/// Bounds and pre-filter are omitted when not requested.
#[test]
fn test_pipeline_minimal_geo_stage() {
    let proximity = proximity_with(ProximitySettings::new("userId"));
    let geo = GeoQuery::new(GeoPoint::new(2.35, 48.85));

    let pipeline = proximity.proximity_pipeline(&geo, None);
    assert_eq!(
        pipeline[0],
        doc! {
            "$geoNear": {
                "near": { "type": "Point", "coordinates": [2.35, 48.85] },
                "distanceField": "distance",
                "spherical": true,
            }
        }
    );
}

/// The group key is what deduplicates: one result per distinct value.
#[test]
fn test_dedup_key_configuration() {
    let proximity = proximity_with(ProximitySettings::new("deviceId"));
    let geo = GeoQuery::new(GeoPoint::new(-122.27, 37.80));

    let pipeline = proximity.proximity_pipeline(&geo, None);
    assert_eq!(
        pipeline[2],
        doc! { "$group": { "_id": "$deviceId", "record": { "$first": "$$ROOT" } } }
    );
}

/// Activity pre-filters follow the configured field name.
#[test]
fn test_activity_field_configuration() {
    let settings = ProximitySettings::new("userId")
        .activity_field("category")
        .location_field("lastKnownLocation");
    let proximity = proximity_with(settings);
    let geo = GeoQuery::new(GeoPoint::new(-122.27, 37.80));
    let filter = ActivityFilter::new(7);

    let pipeline = proximity.proximity_pipeline(&geo, Some(&filter));
    let near = pipeline[0].get_document("$geoNear").unwrap();
    assert_eq!(near.get_document("query").unwrap(), &doc! { "category": 7 });
    assert_eq!(proximity.settings().location_field, "lastKnownLocation");
}

#[test]
fn test_sort_direction_override() {
    let proximity = proximity_with(ProximitySettings::new("userId").sort_direction(1));
    let geo = GeoQuery::new(GeoPoint::new(-122.27, 37.80));

    let pipeline = proximity.proximity_pipeline(&geo, None);
    assert_eq!(pipeline[1], doc! { "$sort": { "distance": 1, "status": 1 } });
}

#[test]
fn test_geo_query_builders() {
    let geo = GeoQuery::new(GeoPoint::new(0.0, 0.0))
        .min_distance(1.0)
        .max_distance(2.0);
    assert_eq!(geo.min_distance, Some(1.0));
    assert_eq!(geo.max_distance, Some(2.0));

    let filter = ActivityFilter::new("running");
    assert_eq!(filter.activity, Bson::String("running".to_string()));
}

/// A failing primary upsert surfaces immediately; queued side writes
/// cannot mask or replace its result.
#[tokio::test]
async fn test_primary_result_decoupled_from_side_writes() {
    // CheckinSchema defines no upsert projection, so the primary call
    // fails before any I/O while the side writes are already queued.
    let proximity = proximity_with(ProximitySettings::new("userId"));

    let err = proximity
        .upsert_one(doc! { "userId": "u-100", "activity": "hiking" })
        .await
        .unwrap_err();
    assert!(err.is_unexpected());
}

/// Proximity adapters share one pool across primary and log collections.
#[test]
fn test_adapters_share_pool() {
    let proximity = proximity_with(ProximitySettings::new("userId"));
    assert_eq!(proximity.adapter().schema().collection_name(), "checkins");
    assert_eq!(
        proximity.log_adapter().schema().collection_name(),
        "checkin_logs"
    );
}
