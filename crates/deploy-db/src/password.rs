//! Password hashing for seeded credentials
//!
//! Seeded application users are consumed by a PHP `password_verify`
//! implementation, so hashes use cost factor 10 and the `$2y$` prefix
//! rather than Rust's native `$2b$`.

use bcrypt::{hash_with_result, Version};

use crate::error::{Error, Result};

/// Bcrypt cost matching PHP's `PASSWORD_DEFAULT`.
const COST: u32 = 10;

/// Hash a plaintext password into the `$2y$10$...` 60-character form.
pub fn hash_password(plain: &str) -> Result<String> {
    if plain.is_empty() {
        return Err(Error::Hash("password cannot be empty".to_string()));
    }

    let parts = hash_with_result(plain, COST).map_err(|e| Error::Hash(e.to_string()))?;
    Ok(parts.format_for_version(Version::TwoY))
}
