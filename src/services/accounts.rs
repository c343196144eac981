// src/services/accounts.rs

use chrono::Utc;

use crate::error::AppError;
use crate::models::user::{Account, Principal, RegisterRequest, Role, UserProfile};
use crate::store::{DocumentStore, DocumentStoreExt, is_valid_segment, paths};
use crate::utils::hash::{hash_password, verify_password};
use crate::utils::html::clean_html;
use crate::utils::jwt::Claims;

/// Store key for an email address. `.` is not allowed in a path segment.
pub fn email_key(email: &str) -> Result<String, AppError> {
    let key = email.trim().to_lowercase().replace('.', ",");
    if !is_valid_segment(&key) {
        return Err(AppError::ValidationFailed(format!(
            "'{}' cannot be used as an account email",
            email
        )));
    }
    Ok(key)
}

pub async fn find_account(store: &dyn DocumentStore, email: &str) -> Result<Option<Account>, AppError> {
    let key = email_key(email)?;
    Ok(store.read_as(&paths::account(&key)).await?)
}

async fn save_account(store: &dyn DocumentStore, account: &Account) -> Result<(), AppError> {
    let key = email_key(&account.email)?;
    store.write_as(&paths::account(&key), account).await?;
    Ok(())
}

async fn create_account(
    store: &dyn DocumentStore,
    email: &str,
    password: &str,
) -> Result<Account, AppError> {
    let account = Account {
        uid: uuid::Uuid::new_v4().simple().to_string(),
        email: email.trim().to_lowercase(),
        password_hash: hash_password(password)?,
        admin: false,
        created_at: Some(Utc::now()),
    };
    save_account(store, &account).await?;
    Ok(account)
}

/// Creates an exam-taker account and its profile.
pub async fn register(store: &dyn DocumentStore, payload: &RegisterRequest) -> Result<Account, AppError> {
    if find_account(store, &payload.email).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "Email '{}' is already registered",
            payload.email
        )));
    }

    let account = create_account(store, &payload.email, &payload.password).await?;
    let profile = UserProfile {
        role: Role::ExamTaker,
        email: Some(account.email.clone()),
        name: payload
            .name
            .as_deref()
            .map(|n| clean_html(n.trim()))
            .filter(|n| !n.is_empty()),
    };
    store
        .write_as(&paths::user_profile(&account.uid), &profile)
        .await?;

    tracing::info!(uid = %account.uid, "Account registered");
    Ok(account)
}

/// Checks credentials. Unknown email and wrong password fail the same way.
pub async fn authenticate(
    store: &dyn DocumentStore,
    email: &str,
    password: &str,
) -> Result<Account, AppError> {
    let invalid = || AppError::Unauthenticated("Invalid email or password".to_string());

    let account = find_account(store, email).await?.ok_or_else(invalid)?;
    if !verify_password(password, &account.password_hash)? {
        return Err(invalid());
    }
    Ok(account)
}

/// Returns the account for `email`, creating it with `password` if absent.
pub async fn find_or_create(
    store: &dyn DocumentStore,
    email: &str,
    password: &str,
) -> Result<(Account, bool), AppError> {
    match find_account(store, email).await? {
        Some(account) => Ok((account, false)),
        None => Ok((create_account(store, email, password).await?, true)),
    }
}

/// Sets the admin claim on the account and mirrors the role to `users/{uid}`.
///
/// The profile write is best effort: the claim alone already grants access.
pub async fn grant_admin(store: &dyn DocumentStore, account: &mut Account) -> Result<(), AppError> {
    account.admin = true;
    save_account(store, account).await?;

    let profile = UserProfile {
        role: Role::Admin,
        email: Some(account.email.clone()),
        name: None,
    };
    if let Err(e) = store
        .write_as(&paths::user_profile(&account.uid), &profile)
        .await
    {
        tracing::warn!(uid = %account.uid, error = %e, "Failed to mirror admin role to profile");
    }
    Ok(())
}

/// Builds the caller's identity from verified token claims.
///
/// Admin if the token carries the admin role, or, failing that, if the
/// profile at `users/{uid}` says so.
pub async fn resolve_principal(store: &dyn DocumentStore, claims: &Claims) -> Result<Principal, AppError> {
    let mut is_admin = claims.role == Role::Admin.as_str();
    if !is_admin {
        let profile: Option<UserProfile> = store
            .read_as(&paths::user_profile(&claims.sub))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(uid = %claims.sub, error = %e, "Profile lookup failed, using token role");
                None
            });
        is_admin = profile.is_some_and(|p| p.role == Role::Admin);
    }

    Ok(Principal {
        uid: claims.sub.clone(),
        email: claims.email.clone(),
        is_admin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn request(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: "secret123".to_string(),
            name: Some("<b>Ada</b><script>x</script>".to_string()),
        }
    }

    #[test]
    fn email_key_replaces_dots() {
        assert_eq!(email_key(" Ada.L@Example.com ").unwrap(), "ada,l@example,com");
        assert!(email_key("bad#mail@x.y").is_err());
    }

    #[tokio::test]
    async fn register_then_authenticate() {
        let store = MemoryStore::new();
        let account = register(&store, &request("ada@example.com")).await.unwrap();

        let profile: UserProfile = store
            .read_as(&paths::user_profile(&account.uid))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.role, Role::ExamTaker);
        assert_eq!(profile.name.as_deref(), Some("<b>Ada</b>"));

        let again = authenticate(&store, "ADA@example.com", "secret123").await.unwrap();
        assert_eq!(again.uid, account.uid);
        assert!(matches!(
            authenticate(&store, "ada@example.com", "wrong").await,
            Err(AppError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let store = MemoryStore::new();
        register(&store, &request("ada@example.com")).await.unwrap();
        assert!(matches!(
            register(&store, &request("ada@example.com")).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn profile_role_grants_admin() {
        let store = MemoryStore::new();
        let (mut account, created) = find_or_create(&store, "boss@example.com", "secret123")
            .await
            .unwrap();
        assert!(created);
        grant_admin(&store, &mut account).await.unwrap();

        let claims = Claims {
            sub: account.uid.clone(),
            email: Some(account.email.clone()),
            role: Role::ExamTaker.as_str().to_string(),
            exp: 0,
        };
        let principal = resolve_principal(&store, &claims).await.unwrap();
        assert!(principal.is_admin);

        let (again, created) = find_or_create(&store, "boss@example.com", "other")
            .await
            .unwrap();
        assert!(!created);
        assert!(again.admin);
    }
}
