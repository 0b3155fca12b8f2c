//! NNTP connection pool
//!
//! Long-lived sessions, created lazily and reused aggressively:
//!
//! - at most `max_connections` sessions exist at once (checked out plus
//!   idle)
//! - a session idle past the probe interval is health-probed on
//!   acquisition, so the probe is not paid on every checkout
//! - sessions past their idle timeout or max lifetime are closed and
//!   recreated on demand
//! - a session released after a failure is closed, never reused; the
//!   caller gets a fresh one on retry

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{NntpError, Result};
use crate::session::{NntpSession, SessionFactory};
use silo_core::config::PoolSettings;

/// Pool counters, mirrored from acquisition and release paths
#[derive(Clone, Debug, Default)]
pub struct PoolStats {
    pub connections_created: u64,
    pub connections_reused: u64,
    pub connections_closed: u64,
    pub failed_creates: u64,
    pub health_checks: u64,
    pub recycled: u64,
    pub peak_in_flight: usize,
}

struct IdleEntry {
    session: Box<dyn NntpSession>,
    created_at: Instant,
    idle_since: Instant,
}

/// A session checked out of the pool. Holding it holds one of the
/// pool's permits; hand it back with [`ConnectionPool::release`].
pub struct PooledSession {
    session: Box<dyn NntpSession>,
    created_at: Instant,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    pub fn session(&mut self) -> &mut dyn NntpSession {
        &mut *self.session
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// The managed session set shared by upload and download workers
pub struct ConnectionPool {
    factory: Arc<dyn SessionFactory>,
    settings: PoolSettings,
    idle: Mutex<VecDeque<IdleEntry>>,
    permits: Arc<Semaphore>,
    stats: Mutex<PoolStats>,
    in_flight: Mutex<usize>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn SessionFactory>, settings: PoolSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_connections));
        Self {
            factory,
            settings,
            idle: Mutex::new(VecDeque::new()),
            permits,
            stats: Mutex::new(PoolStats::default()),
            in_flight: Mutex::new(0),
        }
    }

    /// Counter snapshot
    pub fn stats(&self) -> PoolStats {
        self.stats.lock().clone()
    }

    /// Idle sessions currently parked
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Optionally pre-open `min_idle` sessions at startup. Everything
    /// else is created lazily on demand.
    pub async fn warm_up(&self) -> Result<()> {
        for _ in 0..self.settings.min_idle {
            let session = self.connect().await?;
            self.park(session, Instant::now());
        }
        Ok(())
    }

    /// Check out a session, preferring idle ones. Fails with
    /// [`NntpError::PoolExhausted`] when no permit frees up in time.
    pub async fn acquire(&self) -> Result<PooledSession> {
        let permit = tokio::time::timeout(
            self.settings.acquire_timeout(),
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| NntpError::PoolExhausted)?
        .map_err(|_| NntpError::PoolExhausted)?;

        loop {
            let entry = self.idle.lock().pop_front();
            let Some(mut entry) = entry else { break };
            let now = Instant::now();

            if now.duration_since(entry.created_at) >= self.settings.max_lifetime()
                || now.duration_since(entry.idle_since) >= self.settings.idle_timeout()
            {
                self.close(entry.session, true).await;
                continue;
            }

            if now.duration_since(entry.idle_since) >= self.settings.probe_interval() {
                self.stats.lock().health_checks += 1;
                if entry.session.ping().await.is_err() {
                    tracing::debug!("idle session failed health probe, closing");
                    self.close(entry.session, false).await;
                    continue;
                }
            }

            self.stats.lock().connections_reused += 1;
            return Ok(self.check_out(entry.session, entry.created_at, permit));
        }

        // no reusable idle session: open a fresh one under our permit
        let session = self.connect().await?;
        Ok(self.check_out(session, Instant::now(), permit))
    }

    /// Hand a session back. `ok = false` closes it instead of parking.
    pub async fn release(&self, pooled: PooledSession, ok: bool) {
        let PooledSession {
            session,
            created_at,
            _permit,
        } = pooled;
        *self.in_flight.lock() -= 1;

        if ok && Instant::now().duration_since(created_at) < self.settings.max_lifetime() {
            self.park(session, created_at);
        } else {
            self.close(session, ok).await;
        }
        // permit drops here, freeing a slot
    }

    /// Orderly shutdown of every idle session
    pub async fn drain(&self) {
        loop {
            let entry = self.idle.lock().pop_front();
            match entry {
                Some(entry) => self.close(entry.session, true).await,
                None => break,
            }
        }
    }

    async fn connect(&self) -> Result<Box<dyn NntpSession>> {
        match self.factory.connect().await {
            Ok(session) => {
                let mut stats = self.stats.lock();
                stats.connections_created += 1;
                tracing::debug!(total = stats.connections_created, "opened NNTP session");
                Ok(session)
            }
            Err(e) => {
                self.stats.lock().failed_creates += 1;
                Err(e)
            }
        }
    }

    fn check_out(
        &self,
        session: Box<dyn NntpSession>,
        created_at: Instant,
        permit: OwnedSemaphorePermit,
    ) -> PooledSession {
        let mut in_flight = self.in_flight.lock();
        *in_flight += 1;
        let mut stats = self.stats.lock();
        stats.peak_in_flight = stats.peak_in_flight.max(*in_flight);
        PooledSession {
            session,
            created_at,
            _permit: permit,
        }
    }

    fn park(&self, session: Box<dyn NntpSession>, created_at: Instant) {
        self.idle.lock().push_back(IdleEntry {
            session,
            created_at,
            idle_since: Instant::now(),
        });
    }

    async fn close(&self, mut session: Box<dyn NntpSession>, orderly: bool) {
        if orderly {
            let _ = session.quit().await;
        }
        let mut stats = self.stats.lock();
        stats.connections_closed += 1;
        stats.recycled += 1;
    }
}
