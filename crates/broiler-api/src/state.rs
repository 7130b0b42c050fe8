//! Application state management
//!
//! Store handles are built once at process start and injected here; nothing
//! looks them up globally.
//!
//! Author: hephaex@gmail.com

use broiler_core::{AppConfig, CacheStore, Notifier, UserRepository};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::auth::password::CredentialService;
use crate::auth::service::AccountService;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Record store for users
    pub users: Arc<dyn UserRepository>,
    /// Cache store for one-time tokens and session records
    pub cache: Arc<dyn CacheStore>,
    /// Account lifecycle and session tokens
    pub accounts: AccountService,
    /// Server start time
    pub start_time: Instant,
    /// Ready status
    pub is_ready: AtomicBool,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        users: Arc<dyn UserRepository>,
        cache: Arc<dyn CacheStore>,
        notifier: Arc<dyn Notifier>,
        credentials: CredentialService,
    ) -> Self {
        let accounts = AccountService::new(
            &config,
            users.clone(),
            cache.clone(),
            notifier,
            credentials,
        );

        Self {
            config,
            users,
            cache,
            accounts,
            start_time: Instant::now(),
            is_ready: AtomicBool::new(true),
        }
    }

    /// Cookies carry `Secure` only in production
    pub fn secure_cookies(&self) -> bool {
        self.config.environment.is_production()
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Check if service is ready
    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::SeqCst)
    }

    /// Set ready status
    pub fn set_ready(&self, ready: bool) {
        self.is_ready.store(ready, Ordering::SeqCst);
    }
}
