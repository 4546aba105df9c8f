//! SQL Server connection settings.

use table_io::{ConnectionConfig, Credentials, StorageError};
use tiberius::{AuthMethod, Config, EncryptionLevel};

/// Port of the local development server used by [`admin_config`].
pub const ADMIN_PORT: u16 = 1431;

/// Connection settings for one SQL Server session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsSqlConfig {
    connection: ConnectionConfig,
}

impl MsSqlConfig {
    pub fn new(connection: impl Into<ConnectionConfig>) -> Self {
        Self {
            connection: connection.into(),
        }
    }

    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    /// The initial database, when given as discrete credentials.
    pub fn database(&self) -> Option<&str> {
        match &self.connection {
            ConnectionConfig::Credentials(c) => Some(&c.database),
            ConnectionConfig::Url(_) => None,
        }
    }

    /// Same server and login, different initial database.
    pub fn with_database(&self, database: &str) -> Self {
        match &self.connection {
            ConnectionConfig::Credentials(c) => Self::new(Credentials {
                database: database.to_string(),
                ..c.clone()
            }),
            ConnectionConfig::Url(url) => Self::new(format!(
                "{};database={}",
                url.trim_end_matches(';'),
                database
            )),
        }
    }

    /// Build the tiberius configuration.
    pub fn to_tiberius(&self) -> Result<Config, StorageError> {
        match &self.connection {
            ConnectionConfig::Url(url) => {
                Config::from_ado_string(url).map_err(|e| StorageError::StorageError(e.to_string()))
            }
            ConnectionConfig::Credentials(c) => {
                let mut config = Config::new();
                config.host(&c.server);
                config.port(c.port);
                config.database(&c.database);
                config.authentication(AuthMethod::sql_server(&c.user, &c.password));
                if c.trust_server_certificate {
                    config.trust_cert();
                }
                config.encryption(if c.encrypt {
                    EncryptionLevel::Required
                } else {
                    EncryptionLevel::NotSupported
                });
                Ok(config)
            }
        }
    }
}

/// Administrator login of the local development server.
pub fn admin_credentials() -> Credentials {
    Credentials {
        server: "localhost".to_string(),
        port: ADMIN_PORT,
        user: "sa".to_string(),
        password: "Password123!".to_string(),
        database: "master".to_string(),
        encrypt: false,
        trust_server_certificate: true,
    }
}

/// Settings for provisioning against the local development server.
pub fn admin_config() -> MsSqlConfig {
    MsSqlConfig::new(admin_credentials())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_defaults() {
        let config = admin_config();
        assert_eq!(config.database(), Some("master"));
        let tiberius = config.to_tiberius().unwrap();
        assert_eq!(tiberius.get_addr(), "localhost:1431");
    }

    #[test]
    fn switch_database() {
        let config = admin_config().with_database("app");
        assert_eq!(config.database(), Some("app"));

        let url = MsSqlConfig::new("server=tcp:db,1433;user=sa").with_database("app");
        assert_eq!(
            url.connection(),
            &ConnectionConfig::Url("server=tcp:db,1433;user=sa;database=app".to_string())
        );
    }

    #[test]
    fn ado_string() {
        let config = MsSqlConfig::new(
            "server=tcp:myhost,1444;user=sa;password=x;TrustServerCertificate=true",
        );
        assert_eq!(config.database(), None);
        assert_eq!(config.to_tiberius().unwrap().get_addr(), "myhost:1444");
    }
}
