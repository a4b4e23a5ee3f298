//! Local server discovery.
//!
//! Installed instances reported by the platform locator are all probed, each
//! recording its live database count or `-1` when unreachable. With no
//! installed instances a fixed fallback list is tried in order and the first
//! server that answers wins. Results are cached in the dialect's
//! `servers.json`.

use std::sync::Arc;
use std::time::Duration;

use common::models::{CachedServers, ConnectionConfig, Dialect, ServerInfo, UNKNOWN_COUNT};
use common::{AppError, AppResult};
use tokio_util::sync::CancellationToken;

use crate::cache::CacheManager;
use crate::driver::SqlDriver;
use crate::locator::{candidate_names, fallback_candidates, machine_name, PlatformServerLocator};
use crate::run_cancellable;

pub const SERVER_CACHE_FILE: &str = "servers.json";

/// Discovers reachable servers of one dialect on this machine.
pub struct ServerDiscovery {
    driver: Arc<dyn SqlDriver>,
    locator: Arc<dyn PlatformServerLocator>,
    cache: CacheManager,
    machine: String,
    probe_timeout: Duration,
}

impl ServerDiscovery {
    pub fn new(
        driver: Arc<dyn SqlDriver>,
        locator: Arc<dyn PlatformServerLocator>,
        cache: CacheManager,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            driver,
            locator,
            cache,
            machine: machine_name(),
            probe_timeout,
        }
    }

    /// Overrides the machine name used to build candidates.
    pub fn with_machine_name(mut self, machine: impl Into<String>) -> Self {
        self.machine = machine.into();
        self
    }

    fn dialect(&self) -> Dialect {
        self.driver.dialect()
    }

    /// Lists reachable servers.
    ///
    /// # Arguments
    /// * `force_refresh` - Skip the cached list.
    ///
    /// # Errors
    /// Only `AppError::Cancelled`. Every other failure is logged and yields
    /// an empty or partial list.
    pub async fn discover(&self, force_refresh: bool, ct: &CancellationToken) -> AppResult<Vec<ServerInfo>> {
        if !force_refresh {
            if let Some(cached) = self.cache.load::<CachedServers>(SERVER_CACHE_FILE).await {
                tracing::debug!(count = cached.servers.len(), "Server cache hit");
                return Ok(cached.servers);
            }
        }

        let servers = match self.scan(ct).await {
            Ok(servers) => servers,
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => {
                tracing::warn!(dialect = %self.dialect(), error = %e, "Server discovery failed");
                Vec::new()
            }
        };

        if servers.is_empty() {
            tracing::info!(dialect = %self.dialect(), "No servers discovered");
            return Ok(servers);
        }

        let document = CachedServers {
            timestamp_utc: self.cache.now(),
            servers: servers.clone(),
        };
        if let Err(e) = self.cache.save_and_replace(SERVER_CACHE_FILE, &document).await {
            tracing::warn!(error = %e, "Server cache write failed");
        }
        tracing::info!(dialect = %self.dialect(), count = servers.len(), "Servers discovered");
        Ok(servers)
    }

    async fn scan(&self, ct: &CancellationToken) -> AppResult<Vec<ServerInfo>> {
        let entries = match run_cancellable(ct, self.locator.installed_instances()).await {
            Ok(entries) => entries,
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "Instance enumeration failed, using fallback list");
                Vec::new()
            }
        };

        let candidates = candidate_names(&self.machine, self.dialect(), &entries);
        if candidates.is_empty() {
            return self.scan_fallback(ct).await;
        }

        let mut servers = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let count = match self.probe(&candidate, ct).await {
                Ok(count) => count,
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => {
                    tracing::debug!(server = %candidate, error = %e, "Probe failed");
                    UNKNOWN_COUNT
                }
            };
            servers.push(ServerInfo::new(candidate, self.dialect(), count));
        }
        Ok(servers)
    }

    async fn scan_fallback(&self, ct: &CancellationToken) -> AppResult<Vec<ServerInfo>> {
        for candidate in fallback_candidates(&self.machine, self.dialect()) {
            match self.probe(&candidate, ct).await {
                Ok(count) => {
                    tracing::info!(server = %candidate, "Fallback candidate answered");
                    return Ok(vec![ServerInfo::new(candidate, self.dialect(), count)]);
                }
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => tracing::debug!(server = %candidate, error = %e, "Fallback probe failed"),
            }
        }
        Ok(Vec::new())
    }

    /// Connects to `server`'s default catalog and counts its user databases.
    async fn probe(&self, server: &str, ct: &CancellationToken) -> AppResult<i64> {
        let config = ConnectionConfig::for_server(
            server,
            Some(self.dialect().default_catalog()),
            Some(self.probe_timeout),
        )?;
        run_cancellable(ct, self.driver.count_user_databases(&config)).await
    }
}
