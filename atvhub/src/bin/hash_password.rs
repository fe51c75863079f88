//! Print an argon2 PHC string for `[auth.admin]` / `[auth.sales]` `password_hash`.

use anyhow::{anyhow, Context, Result};
use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;

fn main() -> Result<()> {
    let password = std::env::args()
        .nth(1)
        .context("Usage: hash_password <password>")?;

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {}", e))?
        .to_string();

    println!("{}", password_hash);
    Ok(())
}
