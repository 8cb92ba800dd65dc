use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String, // stored lowercased and trimmed
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // None for accounts provisioned via OAuth
    pub avatar_url: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Fields for a user about to be inserted. The repository assigns
/// `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub avatar_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_is_never_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            name: "Ann Lee".into(),
            email: "ann@example.com".into(),
            password_hash: Some("$argon2id$v=19$secret".into()),
            avatar_url: None,
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("argon2id"));
        assert!(json.contains("ann@example.com"));
    }
}
