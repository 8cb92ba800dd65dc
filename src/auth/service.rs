use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::auth::dto::{OauthIdentity, RegisterRequest};
use crate::auth::error::{AuthError, FieldError};
use crate::auth::password::PasswordHasher;
use crate::auth::repo::{CreateUserError, UserRepo};
use crate::auth::repo_types::{NewUser, User};

/// Lowercased and trimmed; the uniqueness key for every lookup and insert.
pub(crate) fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn validate_registration(name: &str, email: &str, password: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if name.chars().count() < 2 {
        errors.push(FieldError {
            field: "name",
            message: "Name must be at least 2 characters long",
        });
    }
    if !is_valid_email(email) {
        errors.push(FieldError {
            field: "email",
            message: "Please enter a valid email address",
        });
    }
    if password.chars().count() < 8 {
        errors.push(FieldError {
            field: "password",
            message: "Password must be at least 8 characters long",
        });
    }
    errors
}

/// Registration workflow: validate, normalize, hash, insert. All
/// validation happens before any write; the repository's uniqueness
/// guarantee decides races the pre-check cannot see.
pub async fn register(
    repo: &dyn UserRepo,
    hasher: &PasswordHasher,
    req: RegisterRequest,
) -> Result<User, AuthError> {
    let name = req.name.trim().to_string();
    let email = normalize_email(&req.email);

    let errors = validate_registration(&name, &email, &req.password);
    if !errors.is_empty() {
        warn!(fields = errors.len(), "registration rejected by validation");
        return Err(AuthError::Validation(errors));
    }

    if repo.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AuthError::EmailInUse);
    }

    let password_hash = hasher.hash(&req.password)?;

    let user = match repo
        .create(NewUser {
            name,
            email,
            password_hash: Some(password_hash),
            avatar_url: None,
        })
        .await
    {
        Ok(user) => user,
        // Lost the race between pre-check and insert.
        Err(CreateUserError::DuplicateEmail) => return Err(AuthError::EmailInUse),
        Err(CreateUserError::Other(e)) => return Err(AuthError::Internal(e)),
    };

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(user)
}

/// Credential authenticator. Unknown email, missing hash and wrong
/// password are logged apart but surfaced as one `InvalidCredentials`.
pub async fn authenticate(
    repo: &dyn UserRepo,
    hasher: &PasswordHasher,
    email: &str,
    password: &str,
) -> Result<User, AuthError> {
    let email = normalize_email(email);

    let user = match repo.find_by_email(&email).await? {
        Some(user) => user,
        None => {
            debug!(email = %email, "login with unknown email");
            return Err(AuthError::InvalidCredentials);
        }
    };

    let Some(hash) = user.password_hash.as_deref() else {
        debug!(user_id = %user.id, "password login against OAuth-only account");
        return Err(AuthError::InvalidCredentials);
    };

    if !hasher.verify(password, hash) {
        debug!(user_id = %user.id, "login with wrong password");
        return Err(AuthError::InvalidCredentials);
    }

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(user)
}

/// OAuth provisioner: find-or-create for a verified external identity.
/// Repeated sign-ins return the existing record untouched; any
/// repository failure denies the sign-in.
pub async fn provision(repo: &dyn UserRepo, identity: OauthIdentity) -> Result<User, AuthError> {
    let email = normalize_email(&identity.email);
    if !is_valid_email(&email) {
        warn!("oauth identity with unusable email");
        return Err(AuthError::Validation(vec![FieldError {
            field: "email",
            message: "Please enter a valid email address",
        }]));
    }

    if let Some(user) = repo.find_by_email(&email).await? {
        debug!(user_id = %user.id, "oauth sign-in for existing user");
        return Ok(user);
    }

    let name = match identity.name.trim() {
        "" => email.split('@').next().unwrap_or_default().to_string(),
        trimmed => trimmed.to_string(),
    };

    let user = match repo
        .create(NewUser {
            name,
            email: email.clone(),
            password_hash: None,
            avatar_url: identity.avatar_url,
        })
        .await
    {
        Ok(user) => user,
        // Concurrent first sign-in from the same identity; the record
        // the other request created is the one to return.
        Err(CreateUserError::DuplicateEmail) => repo
            .find_by_email(&email)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user vanished after duplicate create"))?,
        Err(CreateUserError::Other(e)) => return Err(AuthError::Internal(e)),
    };

    info!(user_id = %user.id, email = %user.email, "user provisioned via oauth");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::fast_hasher;
    use crate::auth::repo::MemoryUserRepo;
    use std::sync::Arc;

    fn register_request(name: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: name.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    fn identity(email: &str, name: &str, avatar: Option<&str>) -> OauthIdentity {
        OauthIdentity {
            email: email.into(),
            name: name.into(),
            avatar_url: avatar.map(Into::into),
        }
    }

    #[tokio::test]
    async fn register_then_authenticate_succeeds() {
        let repo = MemoryUserRepo::default();
        let hasher = fast_hasher();

        let created = register(
            &repo,
            &hasher,
            register_request("Ann Lee", " Ann@Example.com ", "longpass1"),
        )
        .await
        .expect("register");
        assert_eq!(created.email, "ann@example.com");
        assert_eq!(created.name, "Ann Lee");

        // Any casing variant of the email logs into the same account.
        let user = authenticate(&repo, &hasher, "ANN@EXAMPLE.COM", "longpass1")
            .await
            .expect("authenticate");
        assert_eq!(user.id, created.id);
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email_any_variant() {
        let repo = MemoryUserRepo::default();
        let hasher = fast_hasher();

        register(
            &repo,
            &hasher,
            register_request("Ann Lee", "ann@example.com", "longpass1"),
        )
        .await
        .expect("first register");

        let err = register(
            &repo,
            &hasher,
            register_request("Other Ann", "  ANN@Example.COM ", "otherpass2"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::EmailInUse));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_are_indistinguishable() {
        let repo = MemoryUserRepo::default();
        let hasher = fast_hasher();

        register(
            &repo,
            &hasher,
            register_request("Ann Lee", "ann@example.com", "longpass1"),
        )
        .await
        .expect("register");

        let wrong_password = authenticate(&repo, &hasher, "ann@example.com", "badpass99")
            .await
            .unwrap_err();
        let unknown_email = authenticate(&repo, &hasher, "ghost@example.com", "longpass1")
            .await
            .unwrap_err();
        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_email, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn oauth_only_account_cannot_password_login() {
        let repo = MemoryUserRepo::default();
        let hasher = fast_hasher();

        provision(
            &repo,
            identity("fed@example.com", "Fed User", Some("https://cdn/x.png")),
        )
        .await
        .expect("provision");

        let err = authenticate(&repo, &hasher, "fed@example.com", "whatever1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn validation_reports_every_bad_field_before_any_write() {
        let repo = MemoryUserRepo::default();
        let hasher = fast_hasher();

        let err = register(&repo, &hasher, register_request("A", "bad-email", "longpass1"))
            .await
            .unwrap_err();
        let AuthError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        let names: Vec<_> = fields.iter().map(|f| f.field).collect();
        assert_eq!(names, vec!["name", "email"]);

        assert!(repo.find_by_email("bad-email").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn short_password_is_rejected() {
        let repo = MemoryUserRepo::default();
        let hasher = fast_hasher();

        let err = register(
            &repo,
            &hasher,
            register_request("Ann Lee", "ann@example.com", "short"),
        )
        .await
        .unwrap_err();
        let AuthError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field, "password");
    }

    #[tokio::test]
    async fn provision_is_idempotent() {
        let repo = MemoryUserRepo::default();

        let first = provision(
            &repo,
            identity(" Fed@Example.com ", "Fed User", Some("https://cdn/x.png")),
        )
        .await
        .expect("first provision");
        let second = provision(
            &repo,
            identity("fed@example.com", "Fed User Renamed", None),
        )
        .await
        .expect("second provision");

        assert_eq!(first.id, second.id);
        assert_eq!(second.email, "fed@example.com");
        assert_eq!(second.name, "Fed User");
        assert_eq!(second.avatar_url.as_deref(), Some("https://cdn/x.png"));
    }

    #[tokio::test]
    async fn provision_never_touches_a_credential_account() {
        let repo = MemoryUserRepo::default();
        let hasher = fast_hasher();

        let created = register(
            &repo,
            &hasher,
            register_request("Ann Lee", "ann@example.com", "longpass1"),
        )
        .await
        .expect("register");

        let provisioned = provision(
            &repo,
            identity("ann@example.com", "Google Ann", Some("https://cdn/a.png")),
        )
        .await
        .expect("provision");
        assert_eq!(provisioned.id, created.id);

        // Credential login keeps working afterwards.
        let user = authenticate(&repo, &hasher, "ann@example.com", "longpass1")
            .await
            .expect("authenticate");
        assert!(user.password_hash.is_some());
    }

    #[tokio::test]
    async fn provision_falls_back_to_local_part_for_blank_name() {
        let repo = MemoryUserRepo::default();
        let user = provision(&repo, identity("fed@example.com", "   ", None))
            .await
            .expect("provision");
        assert_eq!(user.name, "fed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registration_has_one_winner() {
        let repo = Arc::new(MemoryUserRepo::default());
        let hasher = fast_hasher();

        let mut handles = Vec::new();
        for i in 0..4 {
            let repo = Arc::clone(&repo);
            let hasher = hasher.clone();
            handles.push(tokio::spawn(async move {
                register(
                    repo.as_ref(),
                    &hasher,
                    RegisterRequest {
                        name: format!("Racer {i}"),
                        email: "race@example.com".into(),
                        password: "longpass1".into(),
                    },
                )
                .await
            }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.expect("task") {
                Ok(_) => wins += 1,
                Err(AuthError::EmailInUse) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 3);
    }

    #[tokio::test]
    async fn oauth_account_later_registering_is_a_duplicate() {
        let repo = MemoryUserRepo::default();
        let hasher = fast_hasher();

        provision(&repo, identity("fed@example.com", "Fed User", None))
            .await
            .expect("provision");

        let err = register(
            &repo,
            &hasher,
            register_request("Fed User", "fed@example.com", "longpass1"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::EmailInUse));
    }
}
