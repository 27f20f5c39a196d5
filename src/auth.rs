use std::fmt;

use async_trait::async_trait;
use pgwire::api::auth::sasl::scram::{gen_salted_password, SCRAM_ITERATIONS};
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use ulid::Ulid;

/// SCRAM-SHA-256 verifier for the single shared password. Usernames are not
/// checked. Only the salted password is kept; the plaintext never outlives
/// `new` and is never sent or compared on the wire.
pub struct StudiobookAuthSource {
    salt: Vec<u8>,
    salted_password: Vec<u8>,
}

impl StudiobookAuthSource {
    /// Iteration count the verifier was derived with. The SCRAM handler must
    /// advertise the same number.
    pub const ITERATIONS: usize = SCRAM_ITERATIONS;

    pub fn new(password: &str) -> Self {
        let salt = Ulid::new().to_bytes().to_vec();
        let salted_password = gen_salted_password(password, &salt, Self::ITERATIONS);
        Self {
            salt,
            salted_password,
        }
    }
}

impl fmt::Debug for StudiobookAuthSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StudiobookAuthSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthSource for StudiobookAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(
            Some(self.salt.clone()),
            self.salted_password.clone(),
        ))
    }
}
