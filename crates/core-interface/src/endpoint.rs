//! Connection parameters for one MySQL instance

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::fmt;

/// Default MySQL port used by the deployments this tool targets
pub const DEFAULT_PORT: u16 = 33306;

/// Host, port and credentials of a database instance.
///
/// The password is held as a [`SecretString`] and is redacted from `Debug`
/// output.
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub user: String,

    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub password: SecretString,
}

impl Endpoint {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// `host:port`, the form used by `clone_valid_donor_list`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            user: String::new(),
            password: empty_secret(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            write!(f, "{}:{}", self.host, self.port)
        } else {
            write!(f, "{}@{}:{}", self.user, self.host, self.port)
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(SecretString::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_and_display() {
        let ep = Endpoint::new("db-b.internal", 3306, "clone_admin", "pw");
        assert_eq!(ep.address(), "db-b.internal:3306");
        assert_eq!(ep.to_string(), "clone_admin@db-b.internal:3306");
        assert_eq!(ep.password(), "pw");
    }

    #[test]
    fn test_debug_redacts_password() {
        let ep = Endpoint::new("h", 1, "u", "hunter2");
        assert!(!format!("{:?}", ep).contains("hunter2"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let ep: Endpoint = toml::from_str(
            r#"
            host = "db-c"
            password = "s3cret"
            "#,
        )
        .unwrap();
        assert_eq!(ep.host, "db-c");
        assert_eq!(ep.port, DEFAULT_PORT);
        assert!(ep.user.is_empty());
        assert_eq!(ep.password(), "s3cret");
    }
}
