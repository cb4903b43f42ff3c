use crate::error::{AppError, AppResult, FieldErrors};

pub const MIN_PASSWORD_LENGTH: usize = 6;

pub fn hash_password(plain: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(plain, cost)
}

/// A missing hash is an unusable password: nothing verifies against it.
pub fn verify_password(plain: &str, hash: Option<&str>) -> bool {
    match hash {
        Some(hash) => bcrypt::verify(plain, hash).unwrap_or(false),
        None => false,
    }
}

/// bcrypt is deliberately slow; keep it off the async worker threads.
pub async fn hash_in_background(plain: String, cost: u32) -> AppResult<String> {
    tokio::task::spawn_blocking(move || hash_password(&plain, cost))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {}", e)))?
        .map_err(AppError::from)
}

pub async fn verify_in_background(plain: String, hash: Option<String>) -> AppResult<bool> {
    tokio::task::spawn_blocking(move || verify_password(&plain, hash.as_deref()))
        .await
        .map_err(|e| AppError::Internal(format!("verify task failed: {}", e)))
}

pub fn check_password_rules(errors: &mut FieldErrors, field: &str, plain: &str) {
    if plain.chars().count() < MIN_PASSWORD_LENGTH {
        errors.add(
            field,
            format!(
                "Ensure this field has at least {} characters.",
                MIN_PASSWORD_LENGTH
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("hunter22", 4).unwrap();
        assert_ne!(hash, "hunter22");
        assert!(verify_password("hunter22", Some(&hash)));
        assert!(!verify_password("hunter23", Some(&hash)));
    }

    #[test]
    fn unusable_password_never_verifies() {
        assert!(!verify_password("", None));
        assert!(!verify_password("anything", None));
    }

    #[test]
    fn garbage_hash_does_not_verify() {
        assert!(!verify_password("secret", Some("not-a-bcrypt-hash")));
    }

    #[tokio::test]
    async fn background_hashing_matches_verify() {
        let hash = hash_in_background("s3cret!".into(), 4).await.unwrap();
        assert!(verify_in_background("s3cret!".into(), Some(hash.clone())).await.unwrap());
        assert!(!verify_in_background("wrong".into(), Some(hash)).await.unwrap());
    }

    #[test]
    fn short_passwords_rejected() {
        let mut errors = FieldErrors::new();
        check_password_rules(&mut errors, "password", "12345");
        assert!(errors.contains("password"));

        let mut errors = FieldErrors::new();
        check_password_rules(&mut errors, "password", "123456");
        assert!(errors.is_empty());
    }
}
