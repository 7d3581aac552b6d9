//! Reusable synchronous Redis connections.
//!
//! Each command checks a connection out, runs, and hands it back only if the
//! command succeeded. A failed or timed-out command may leave a reply in
//! flight on the socket, so that connection is dropped instead of reused.

use std::sync::Mutex;
use std::time::Duration;

use redis::ConnectionLike;

/// Idle connections kept per cache; more can be open while busy.
pub(crate) const DEFAULT_MAX_IDLE: usize = 32;

pub(crate) struct ConnectionCache {
    client: redis::Client,
    idle: Mutex<Vec<redis::Connection>>,
    max_idle: usize,
    connect_timeout: Duration,
}

impl std::fmt::Debug for ConnectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("idle", &self.idle_count())
            .field("max_idle", &self.max_idle)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectionCache {
    /// Parse `redis_url`; no connection is made until first use.
    pub(crate) fn open(
        redis_url: &str,
        connect_timeout: Duration,
        max_idle: usize,
    ) -> redis::RedisResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            idle: Mutex::new(Vec::new()),
            max_idle,
            connect_timeout,
        })
    }

    /// Run `f` on an idle connection, or a fresh one if none is idle.
    ///
    /// `read_timeout` bounds waiting for the reply; writes and connecting are
    /// bounded by the cache's connect timeout.
    pub(crate) fn with_connection<T>(
        &self,
        read_timeout: Duration,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> redis::RedisResult<T> {
        let mut conn = match self.take_idle() {
            Some(conn) => conn,
            None => self.client.get_connection_with_timeout(self.connect_timeout)?,
        };
        conn.set_read_timeout(Some(read_timeout))?;
        conn.set_write_timeout(Some(self.connect_timeout))?;

        let result = f(&mut conn);
        if result.is_ok() && conn.is_open() {
            self.put_idle(conn);
        }
        result
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn take_idle(&self) -> Option<redis::Connection> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop()
    }

    fn put_idle(&self, conn: redis::Connection) {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_url_is_rejected_up_front() {
        assert!(ConnectionCache::open("not a url", Duration::from_secs(1), 4).is_err());
    }

    #[test]
    fn refused_connection_is_an_error_and_caches_nothing() {
        // Port 1 is never a Redis server; the connect is refused immediately.
        let cache = ConnectionCache::open("redis://127.0.0.1:1", Duration::from_millis(200), 4).unwrap();
        let result: redis::RedisResult<String> =
            cache.with_connection(Duration::from_millis(200), |conn| redis::cmd("PING").query(conn));
        assert!(result.is_err());
        assert_eq!(cache.idle_count(), 0);
    }
}
