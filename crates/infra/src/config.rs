//! Storage configuration from the environment.

use std::env;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use aperture_core::LedgerError;

const DATABASE_URL_VAR: &str = "APERTURE_DATABASE_URL";
const MAX_CONNECTIONS_VAR: &str = "APERTURE_DB_MAX_CONNECTIONS";
const CLAIM_EXPIRY_VAR: &str = "APERTURE_CLAIM_EXPIRY_SECS";

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connection settings for the Postgres-backed stores.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// When set, a `processing` claim older than this may be taken over by
    /// a new caller. Unset means abandoned claims block their key.
    pub claim_expiry: Option<Duration>,
}

impl StorageConfig {
    /// Read configuration from the environment.
    ///
    /// The database URL is required: a store with nowhere to write must
    /// refuse to start rather than run degraded.
    pub fn from_env() -> Result<Self, LedgerError> {
        let database_url = env::var(DATABASE_URL_VAR)
            .map_err(|_| LedgerError::storage(format!("{DATABASE_URL_VAR} is not set")))?;

        let max_connections = match env::var(MAX_CONNECTIONS_VAR) {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(
                    value = %raw,
                    default = DEFAULT_MAX_CONNECTIONS,
                    "{MAX_CONNECTIONS_VAR} is not a valid u32, using default"
                );
                DEFAULT_MAX_CONNECTIONS
            }),
            Err(_) => DEFAULT_MAX_CONNECTIONS,
        };

        let claim_expiry = match env::var(CLAIM_EXPIRY_VAR) {
            Ok(raw) => match raw.parse::<u64>() {
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    tracing::warn!(
                        value = %raw,
                        "{CLAIM_EXPIRY_VAR} is not a valid u64, claims will not expire"
                    );
                    None
                }
            },
            Err(_) => None,
        };

        Ok(Self {
            database_url,
            max_connections,
            claim_expiry,
        })
    }

    /// Open the connection pool shared by all Postgres-backed stores.
    pub async fn connect(&self) -> Result<PgPool, LedgerError> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
            .map_err(|e| LedgerError::storage(format!("failed to connect to postgres: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment variables are process-global, so these tests only use
    // keys no other test touches.

    #[test]
    fn missing_database_url_fails_closed() {
        env::remove_var(DATABASE_URL_VAR);
        let err = StorageConfig::from_env().unwrap_err();
        assert_eq!(err.code(), "storage_unavailable");
    }
}
