use deadpool_postgres::{
    Config as PoolSettings, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime,
};
use tokio::sync::OnceCell;
use tokio_postgres::NoTls;

use crate::config::{POOL_MAX_SIZE, PgSettings};
use crate::error::PgMcpError;

/// Run on every connection before it is handed out again, so no transaction
/// or session state carries over from the previous caller.
const RESET_SESSION: &str = "ROLLBACK; CLOSE ALL; SET SESSION AUTHORIZATION DEFAULT; RESET ALL; \
     UNLISTEN *; SELECT pg_advisory_unlock_all(); DISCARD TEMP; DISCARD SEQUENCES;";

/// Owns the process-wide connection pool.
///
/// The pool is built on first use and then shared by every caller. Concurrent
/// first callers wait on the same initialization; a failed build is not
/// cached, so the next caller tries again.
pub struct PoolManager {
    settings: PgSettings,
    pool: OnceCell<Pool>,
}

impl PoolManager {
    pub fn new(settings: PgSettings) -> Self {
        Self {
            settings,
            pool: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &PgSettings {
        &self.settings
    }

    #[cfg(test)]
    pub fn is_initialized(&self) -> bool {
        self.pool.initialized()
    }

    /// Return the shared pool, building it on the first successful call.
    pub async fn acquire_pool(&self) -> Result<&Pool, PgMcpError> {
        self.pool.get_or_try_init(|| self.build_pool()).await
    }

    /// Check a connection out of the shared pool. It goes back when dropped.
    pub async fn connection(&self) -> Result<Object, PgMcpError> {
        let pool = self.acquire_pool().await?;
        Ok(pool.get().await?)
    }

    async fn build_pool(&self) -> Result<Pool, PgMcpError> {
        let s = &self.settings;
        tracing::info!(
            "Creating connection pool for {}@{}:{}/{}",
            s.user,
            s.host,
            s.port,
            s.database
        );

        let mut cfg = PoolSettings::new();
        cfg.host = Some(s.host.clone());
        cfg.port = Some(s.port);
        cfg.user = Some(s.user.clone());
        cfg.password = Some(s.password.clone());
        cfg.dbname = Some(s.database.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Custom(RESET_SESSION.to_string()),
        });
        cfg.pool = Some(PoolConfig::new(POOL_MAX_SIZE));

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;

        // Open the first connection now so bad credentials or an unreachable
        // host fail construction instead of being cached as a usable pool.
        drop(pool.get().await?);

        tracing::info!("Connection pool ready (max {} connections)", POOL_MAX_SIZE);
        Ok(pool)
    }
}
