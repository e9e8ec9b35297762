use crate::Result;
use k8s_openapi::{api::core::v1::Secret, ByteString};
use serde::Serialize;
use std::collections::BTreeMap;

/// sha256 of the json form of any value
pub fn object_hash<T: Serialize>(obj: &T) -> Result<String> {
    Ok(sha256::digest(serde_json::to_string(obj)?))
}

/// Hash of the data of a Secret, independent of its metadata
pub fn secret_hash(secret: &Secret) -> Result<String> {
    let empty = BTreeMap::<String, ByteString>::new();
    object_hash(secret.data.as_ref().unwrap_or(&empty))
}

/// Combine the hashes of every input of a deployment into one
///
/// Keys are sorted so the result only depends on the content
pub fn hash_of_input_hashes(hashes: &BTreeMap<String, String>) -> Result<String> {
    object_hash(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn secret(password: &str, resource_version: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("osp-secret".to_string()),
                resource_version: Some(resource_version.to_string()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(
                "NovaPassword".to_string(),
                ByteString(password.as_bytes().to_vec()),
            )])),
            ..Secret::default()
        }
    }

    #[test]
    fn test_secret_hash_follows_data_only() {
        let a = secret_hash(&secret("12345678", "1")).unwrap();
        let b = secret_hash(&secret("12345678", "2")).unwrap();
        let c = secret_hash(&secret("87654321", "2")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_input_hash_changes_with_any_input() {
        let mut hashes = BTreeMap::from([
            ("osp-secret".to_string(), "aaa".to_string()),
            ("nova-api-config-data".to_string(), "bbb".to_string()),
        ]);
        let first = hash_of_input_hashes(&hashes).unwrap();
        assert_eq!(first, hash_of_input_hashes(&hashes.clone()).unwrap());
        hashes.insert("osp-secret".to_string(), "ccc".to_string());
        assert_ne!(first, hash_of_input_hashes(&hashes).unwrap());
    }
}
