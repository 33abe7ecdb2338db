//! The canonical user record and its storage/external projections.
//!
//! One in-memory shape, two explicit projections: [`User::to_record`]
//! produces the storage row including the hashed credential, and
//! [`User::to_profile`] produces the external representation, which has no
//! credential field at all. Nothing leaving the service boundary can carry
//! the credential, because the type it leaves in cannot express one.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical in-memory user, decoded from a replayed event payload.
///
/// The `credential` field is write-only: it arrives plain in the intent
/// payload, is hashed by the gateway before the first write, and never
/// appears in the external projection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    /// Store-assigned row identity, populated after the first write
    #[serde(default)]
    pub id: Option<i64>,

    /// Process-generated identity, assigned once by the gateway
    #[serde(default = "Uuid::nil")]
    pub uuid: Uuid,

    #[serde(default)]
    pub email: String,

    #[serde(default, alias = "firstName")]
    pub first_name: String,

    #[serde(default, alias = "lastName")]
    pub last_name: String,

    pub username: String,

    #[serde(rename = "password")]
    pub credential: String,

    #[serde(default)]
    pub role: String,

    /// Sequence position of the aggregate; authoritative from the event
    #[serde(default)]
    pub version: i64,
}

impl User {
    /// Storage projection: the durable row shape, hashed credential included.
    pub fn to_record(&self) -> UserRecord {
        UserRecord {
            id: self.id,
            uuid: self.uuid,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            username: self.username.clone(),
            password: self.credential.clone(),
            role: self.role.clone(),
            version: self.version,
        }
    }

    /// External projection: safe to place on an outcome message.
    pub fn to_profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            uuid: self.uuid,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            username: self.username.clone(),
            role: self.role.clone(),
            version: self.version,
        }
    }
}

/// Durable row shape of a user.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UserRecord {
    pub id: Option<i64>,
    pub uuid: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    /// Hashed credential; storage-only
    pub password: String,
    pub role: String,
    pub version: i64,
}

/// Sanitized user representation for external exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub uuid: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub role: String,
    pub version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: Some(7),
            uuid: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            first_name: "Alice".to_string(),
            last_name: "Smith".to_string(),
            username: "alice".to_string(),
            credential: "hashed-secret".to_string(),
            role: "user".to_string(),
            version: 5,
        }
    }

    #[test]
    fn test_decode_from_event_payload() {
        let user: User = serde_json::from_value(serde_json::json!({
            "username": "alice",
            "email": "a@x.com",
            "password": "secret",
            "firstName": "Alice",
        }))
        .unwrap();

        assert_eq!(user.username, "alice");
        assert_eq!(user.credential, "secret");
        assert_eq!(user.first_name, "Alice");
        assert_eq!(user.version, 0);
        assert!(user.id.is_none());
        assert!(user.uuid.is_nil());
    }

    #[test]
    fn test_payload_without_username_is_rejected() {
        let result = serde_json::from_value::<User>(serde_json::json!({
            "email": "a@x.com",
            "password": "secret",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_storage_projection_carries_credential() {
        let record = sample_user().to_record();
        assert_eq!(record.password, "hashed-secret");
        assert_eq!(record.version, 5);
    }

    #[test]
    fn test_external_projection_has_no_credential_field() {
        let profile = sample_user().to_profile();
        let value = serde_json::to_value(&profile).unwrap();

        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert!(!keys.iter().any(|k| k.contains("password") || k.contains("credential")));
        assert_eq!(value["username"], "alice");
        assert_eq!(value["version"], 5);
    }
}
