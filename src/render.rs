use crate::types::{GeometryRecord, Indicator, JoinedRecord};
use geojson::{feature::Id, Feature, FeatureCollection, Geometry, Value};
use serde_json::{json, Map};

/// Build the choropleth payload: one feature per joined record, carrying
/// the full indicator set as properties. Color/palette choices belong to
/// the renderer on the other side of this boundary.
pub fn feature_collection(records: &[&JoinedRecord]) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: records.iter().map(|record| feature(record)).collect(),
        foreign_members: None,
    }
}

fn feature(record: &JoinedRecord) -> Feature {
    let mut properties = Map::new();
    properties.insert("code".into(), json!(record.row.code));
    properties.insert("name".into(), json!(record.row.name));
    properties.insert("uf".into(), json!(record.row.uf));
    for indicator in Indicator::ALL {
        properties.insert(indicator.key().into(), json!(record.row.value(indicator)));
    }

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::from(&record.geometry))),
        id: Some(Id::String(record.row.code.clone())),
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Contextual outline layer: bare state geometries, keyed by UF.
pub fn outline_collection(states: &[&GeometryRecord]) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: states
            .iter()
            .map(|state| {
                let mut properties = Map::new();
                properties.insert("uf".into(), json!(state.code));
                Feature {
                    bbox: None,
                    geometry: Some(Geometry::new(Value::from(&state.geometry))),
                    id: Some(Id::String(state.code.clone())),
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect(),
        foreign_members: None,
    }
}
