use serde::{Deserialize, Serialize};

/// A by-reference link to another array resource.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Reference {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Space accounting for a volume or volume snapshot.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Space {
    /// Provisioned size in bytes.
    #[serde(default)]
    pub total_provisioned: u64,
}

/// A volume as reported by the array.
#[derive(Deserialize, Debug, Clone)]
pub struct Volume {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub space: Space,
}

/// A per-volume snapshot object, named `<group>.<suffix>.<volume>` and
/// possibly prefixed with the source array name on a replica.
#[derive(Deserialize, Debug, Clone)]
pub struct VolumeSnapshot {
    pub name: String,
    #[serde(default)]
    pub source: Reference,
    #[serde(default)]
    pub space: Space,
}

/// A protection group: a consistency unit of volumes snapshotted together.
#[derive(Deserialize, Debug, Clone)]
pub struct ProtectionGroup {
    pub name: String,
    /// Number of replication targets configured for the group.
    #[serde(default)]
    pub target_count: u32,
}

/// A point-in-time capture of a whole protection group.
#[derive(Deserialize, Debug, Clone)]
pub struct PgSnapshot {
    pub name: String,
    /// The user-supplied identifier distinguishing this capture.
    #[serde(default)]
    pub suffix: String,
}

/// A protection-group member volume.
#[derive(Deserialize, Debug, Clone)]
pub struct PgMember {
    pub member: Reference,
}

/// The array's own identity.
#[derive(Deserialize, Debug, Clone)]
pub struct ArrayInfo {
    pub name: String,
}

/// A key/value tag on a volume or snapshot. Tags are the only durable
/// state this tool relies on across runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The `items` envelope every list endpoint responds with.
#[derive(Deserialize, Debug)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// The `errors` envelope of a failed call.
#[derive(Deserialize, Debug, Default)]
pub struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<ApiErrorItem>,
}

#[derive(Deserialize, Debug)]
pub struct ApiErrorItem {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_snapshot_envelope_decodes() {
        let body = r#"{
            "items": [
                {
                    "name": "oradb-pg.gct1.oradb-data01",
                    "source": { "id": "vol-1111", "name": "oradb-data01" },
                    "space": { "total_provisioned": 107374182400 }
                }
            ]
        }"#;
        let parsed: ListResponse<VolumeSnapshot> = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.items.len(), 1);
        let snap = &parsed.items[0];
        assert_eq!(snap.name, "oradb-pg.gct1.oradb-data01");
        assert_eq!(snap.source.id.as_deref(), Some("vol-1111"));
        assert_eq!(snap.space.total_provisioned, 107374182400);
    }

    #[test]
    fn error_envelope_decodes() {
        let body = r#"{ "errors": [ { "message": "Volume does not exist." } ] }"#;
        let parsed: ErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.errors[0].message, "Volume does not exist.");
    }

    #[test]
    fn missing_items_defaults_to_empty() {
        let parsed: ListResponse<Volume> = serde_json::from_str("{}").unwrap();
        assert!(parsed.items.is_empty());
    }
}
