//! Payload schema for Qdrant points

use super::{VectorSearchHit, VectorUpsertItem};
use qdrant_client::qdrant::{PointId, PointStruct, ScoredPoint, Value as QdrantValue};
use serde_json::Value;
use std::collections::HashMap;

/// Payload keys, also used for payload indexes
pub const FIELD_TENANT_USER_ID: &str = "tenant_user_id";
pub const FIELD_KB_ID: &str = "kb_id";
pub const FIELD_SOURCE_TYPE: &str = "source_type";
pub const FIELD_SOURCE_KEY: &str = "source_key";
pub const FIELD_CHUNK_ID: &str = "chunk_id";
pub const FIELD_CONTENT: &str = "content";
pub const FIELD_METADATA: &str = "metadata";

impl VectorUpsertItem {
    /// Convert to qdrant-client PointStruct
    pub fn to_point_struct(self) -> PointStruct {
        let mut map = HashMap::new();
        map.insert(FIELD_TENANT_USER_ID.to_string(), string_to_qdrant(&self.tenant_user_id));
        map.insert(FIELD_KB_ID.to_string(), int_to_qdrant(self.kb_id));
        map.insert(FIELD_SOURCE_TYPE.to_string(), string_to_qdrant(&self.source_type));
        map.insert(FIELD_SOURCE_KEY.to_string(), string_to_qdrant(&self.source_key));
        map.insert(FIELD_CHUNK_ID.to_string(), int_to_qdrant(self.chunk_id));
        map.insert(FIELD_CONTENT.to_string(), string_to_qdrant(&self.content));
        map.insert(FIELD_METADATA.to_string(), string_to_qdrant(&self.metadata_json));

        PointStruct::new(self.id, self.vector, map)
    }
}

impl From<ScoredPoint> for VectorSearchHit {
    fn from(point: ScoredPoint) -> Self {
        let payload: HashMap<String, Value> = point
            .payload
            .into_iter()
            .map(|(k, v)| (k, json_from_qdrant_value(v)))
            .collect();

        let text = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let int = |key: &str| payload.get(key).and_then(Value::as_i64).unwrap_or_default();

        let metadata_json = match text(FIELD_METADATA) {
            m if m.is_empty() => "{}".to_string(),
            m => m,
        };

        VectorSearchHit {
            id: point_id_to_string(point.id),
            score: point.score,
            tenant_user_id: text(FIELD_TENANT_USER_ID),
            kb_id: int(FIELD_KB_ID),
            source_type: text(FIELD_SOURCE_TYPE),
            source_key: text(FIELD_SOURCE_KEY),
            chunk_id: int(FIELD_CHUNK_ID),
            content: text(FIELD_CONTENT),
            metadata_json,
        }
    }
}

fn string_to_qdrant(s: &str) -> QdrantValue {
    QdrantValue {
        kind: Some(qdrant_client::qdrant::value::Kind::StringValue(s.to_string())),
    }
}

fn int_to_qdrant(i: i64) -> QdrantValue {
    QdrantValue {
        kind: Some(qdrant_client::qdrant::value::Kind::IntegerValue(i)),
    }
}

/// Convert PointId to string
pub(crate) fn point_id_to_string(id: Option<PointId>) -> String {
    use qdrant_client::qdrant::point_id::PointIdOptions;

    match id.and_then(|p| p.point_id_options) {
        Some(PointIdOptions::Uuid(uuid)) => uuid,
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}

/// Convert Qdrant value to serde_json Value
fn json_from_qdrant_value(v: QdrantValue) -> Value {
    use qdrant_client::qdrant::value::Kind;

    match v.kind {
        Some(Kind::NullValue(_)) | None => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.into_iter().map(json_from_qdrant_value).collect())
        }
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect(),
        ),
    }
}
