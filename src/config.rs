use secrecy::{ExposeSecret, SecretBox};
use std::env;
use talk_protocol::protocol::CREDENTIAL_LEN;
use thiserror::Error;

pub const USER_ENV: &str = "CAMERA_USER";
pub const PASSWORD_ENV: &str = "CAMERA_PASSWORD";
pub const DEFAULT_USER: &str = "admin";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var} is {len} bytes, the camera accepts at most {max}")]
    TooLong { var: String, len: usize, max: usize },
    #[error("{0} is empty")]
    Empty(String),
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Camera login credentials
#[derive(Debug)]
pub struct Credentials {
    user: String,
    password: SecretBox<String>,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Result<Self, ConfigError> {
        let user = user.into();
        let password = password.into();

        if user.is_empty() {
            return Err(ConfigError::Empty(USER_ENV.to_string()));
        }
        Self::check_width(USER_ENV, &user)?;
        Self::check_width(PASSWORD_ENV, &password)?;

        Ok(Self {
            user,
            password: SecretBox::new(Box::new(password)),
        })
    }

    /// Load credentials from `CAMERA_USER` / `CAMERA_PASSWORD`.
    ///
    /// A `.env` file is read first if present. The user defaults to `admin`
    /// and the password to empty, which is how these cameras ship.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let user = Self::optional_var(USER_ENV)?.unwrap_or_else(|| DEFAULT_USER.to_string());
        let password = Self::optional_var(PASSWORD_ENV)?.unwrap_or_default();

        Self::new(user, password)
    }

    fn optional_var(name: &str) -> Result<Option<String>, ConfigError> {
        match env::var(name) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn check_width(var: &str, value: &str) -> Result<(), ConfigError> {
        if value.len() > CREDENTIAL_LEN {
            return Err(ConfigError::TooLong {
                var: var.to_string(),
                len: value.len(),
                max: CREDENTIAL_LEN,
            });
        }
        Ok(())
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Use only when building the verify request
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}
