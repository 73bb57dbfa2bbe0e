use super::{ConnectionError, LoginDetails, RemoteSession};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Lease was handed out by a different connection pool")]
    ForeignLease,
}

/// A pooled session together with the login it was configured with.
pub struct Connection<S> {
    pub session: S,
    pub login: Option<LoginDetails>,
}

struct Slot<S> {
    in_use: AtomicBool,
    connection: Mutex<Connection<S>>,
}

/// Fixed-size set of reusable remote sessions handed out as exclusive leases.
///
/// [`acquire`](Self::acquire) blocks until some session is free; the first
/// free slot found wins, with no fairness between waiters. Dropping a
/// [`Lease`] marks its slot free and wakes waiters.
pub struct ConnectionPool<S: RemoteSession> {
    id: usize,
    slots: Vec<Slot<S>>,
    signal: Mutex<()>,
    freed: Condvar,
    server_key_hash: Mutex<Option<String>>,
}

/// Exclusive hold on one pooled connection.
pub struct Lease<'a, S: RemoteSession> {
    pool: &'a ConnectionPool<S>,
    index: usize,
    guard: Option<MutexGuard<'a, Connection<S>>>,
}

impl<S: RemoteSession> ConnectionPool<S> {
    /// Creates `size` sessions using `factory`. A pool always holds at least
    /// one session.
    pub fn new(size: usize, mut factory: impl FnMut() -> S) -> Self {
        let slots = (0..size.max(1))
            .map(|_| Slot {
                in_use: AtomicBool::new(false),
                connection: Mutex::new(Connection {
                    session: factory(),
                    login: None,
                }),
            })
            .collect();
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            slots,
            signal: Mutex::new(()),
            freed: Condvar::new(),
            server_key_hash: Mutex::new(None),
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently leased.
    pub fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.in_use.load(Ordering::Acquire))
            .count()
    }

    /// Blocks until a connection is free and leases it.
    pub fn acquire(&self) -> Lease<'_, S> {
        let mut signal = self.signal.lock();
        loop {
            if let Some(lease) = self.try_claim() {
                return lease;
            }
            self.freed.wait(&mut signal);
        }
    }

    /// Leases a free connection if there is one.
    pub fn try_acquire(&self) -> Option<Lease<'_, S>> {
        self.try_claim()
    }

    fn try_claim(&self) -> Option<Lease<'_, S>> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(Lease {
                    pool: self,
                    index,
                    guard: Some(slot.connection.lock()),
                });
            }
        }
        None
    }

    /// Returns a lease to the pool.
    ///
    /// Equivalent to dropping the lease. A lease from another pool is still
    /// returned to the pool that issued it, and `ForeignLease` is reported.
    pub fn release(&self, lease: Lease<'_, S>) -> Result<(), PoolError> {
        let foreign = lease.pool.id != self.id;
        drop(lease);
        if foreign {
            Err(PoolError::ForeignLease)
        } else {
            Ok(())
        }
    }

    fn mark_free(&self, index: usize) {
        self.slots[index].in_use.store(false, Ordering::Release);
        // Taking the signal lock orders this wakeup after any waiter's scan.
        let _signal = self.signal.lock();
        self.freed.notify_all();
    }

    /// Applies `login` to every connection and connects each of them.
    ///
    /// Stops at the first failure. An unknown host key is remembered and can
    /// be inspected with [`server_key_hash`](Self::server_key_hash).
    pub fn configure(&self, login: &LoginDetails) -> Result<(), ConnectionError> {
        for (index, slot) in self.slots.iter().enumerate() {
            let mut connection = slot.connection.lock();
            connection.session.disconnect();
            connection.login = Some(login.clone());
            match connection.session.connect(login) {
                Ok(()) => debug!(slot = index, host = %login.host, "Connection established."),
                Err(ConnectionError::UnknownHostKey { hash }) => {
                    warn!(host = %login.host, %hash, "Host key is not trusted.");
                    *self.server_key_hash.lock() = Some(hash.clone());
                    return Err(ConnectionError::UnknownHostKey { hash });
                }
                Err(e) => {
                    warn!(slot = index, host = %login.host, error = %e, "Connection failed.");
                    return Err(e);
                }
            }
        }
        info!(
            connections = self.slots.len(),
            host = %login.host,
            "All pooled connections established."
        );
        Ok(())
    }

    /// Fingerprint of the last untrusted host key seen by `configure`.
    pub fn server_key_hash(&self) -> Option<String> {
        self.server_key_hash.lock().clone()
    }

    /// Marks the host key with fingerprint `hash` as trusted.
    pub fn validate_server_key(
        &self,
        login: &LoginDetails,
        hash: &str,
    ) -> Result<(), ConnectionError> {
        let mut lease = self.acquire();
        lease.session.trust_host(login, hash)?;
        *self.server_key_hash.lock() = None;
        Ok(())
    }

    /// Blocks until no connection is leased.
    pub fn wait_until_idle(&self) {
        let mut signal = self.signal.lock();
        while self.in_use() > 0 {
            self.freed.wait(&mut signal);
        }
    }
}

impl<S: RemoteSession> Drop for ConnectionPool<S> {
    fn drop(&mut self) {
        self.wait_until_idle();
        for slot in &self.slots {
            slot.connection.lock().session.disconnect();
        }
    }
}

impl<S: RemoteSession> Lease<'_, S> {
    pub fn slot(&self) -> usize {
        self.index
    }
}

impl<S: RemoteSession> Deref for Lease<'_, S> {
    type Target = Connection<S>;

    fn deref(&self) -> &Self::Target {
        // The guard is only taken in `drop`.
        self.guard.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl<S: RemoteSession> DerefMut for Lease<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<S: RemoteSession> Drop for Lease<'_, S> {
    fn drop(&mut self) {
        self.guard.take();
        self.pool.mark_free(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{MockRemote, MockSession};
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn pool(size: usize) -> (ConnectionPool<MockSession>, Arc<MockRemote>) {
        let remote = Arc::new(MockRemote::default());
        let pool = ConnectionPool::new(size, || MockSession::new(&remote));
        (pool, remote)
    }

    #[test]
    fn leases_are_exclusive_and_freed_on_drop() {
        let (pool, _) = pool(2);
        let first = pool.acquire();
        let second = pool.acquire();
        assert_ne!(first.slot(), second.slot());
        assert_eq!(pool.in_use(), 2);
        assert!(pool.try_acquire().is_none());
        drop(first);
        assert_eq!(pool.in_use(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn third_acquire_blocks_until_a_release_and_only_one_waiter_proceeds() {
        let (pool, _) = pool(2);
        let first = pool.acquire();
        let second = pool.acquire();

        thread::scope(|scope| {
            let (acquired_tx, acquired_rx) = mpsc::channel();
            let (done_tx, done_rx) = mpsc::channel::<()>();
            let done_rx = Arc::new(std::sync::Mutex::new(done_rx));
            for waiter in 0..2 {
                let acquired_tx = acquired_tx.clone();
                let done_rx = Arc::clone(&done_rx);
                let pool = &pool;
                scope.spawn(move || {
                    let lease = pool.acquire();
                    acquired_tx.send(waiter).unwrap();
                    let _ = done_rx.lock().unwrap().recv();
                    drop(lease);
                });
            }

            assert!(acquired_rx.recv_timeout(Duration::from_millis(150)).is_err());

            drop(first);
            assert!(acquired_rx.recv_timeout(Duration::from_secs(5)).is_ok());
            assert!(acquired_rx.recv_timeout(Duration::from_millis(150)).is_err());

            drop(second);
            assert!(acquired_rx.recv_timeout(Duration::from_secs(5)).is_ok());

            done_tx.send(()).unwrap();
            done_tx.send(()).unwrap();
        });
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn releasing_a_foreign_lease_is_an_error_and_frees_the_owner() {
        let (owner, _) = pool(1);
        let (other, _) = pool(1);
        let lease = owner.acquire();
        assert_eq!(other.release(lease), Err(PoolError::ForeignLease));
        assert_eq!(owner.in_use(), 0);
        let own = owner.acquire();
        assert_eq!(owner.release(own), Ok(()));
    }

    #[test]
    fn configure_connects_every_slot() {
        let (pool, remote) = pool(3);
        let login = LoginDetails::new("host", "user", "", 22);
        pool.configure(&login).unwrap();
        assert_eq!(remote.logins.lock().len(), 3);
        let lease = pool.acquire();
        assert!(lease.session.is_connected());
        assert_eq!(lease.login.as_ref(), Some(&login));
    }

    #[test]
    fn configure_records_unknown_host_key() {
        let (pool, remote) = pool(2);
        remote
            .connect_results
            .lock()
            .push_back(Err(ConnectionError::UnknownHostKey {
                hash: "SHA256:abc".into(),
            }));
        let login = LoginDetails::new("host", "user", "", 22);
        let err = pool.configure(&login).unwrap_err();
        assert!(matches!(err, ConnectionError::UnknownHostKey { .. }));
        assert_eq!(pool.server_key_hash().as_deref(), Some("SHA256:abc"));

        pool.validate_server_key(&login, "SHA256:abc").unwrap();
        assert_eq!(remote.trusted.lock().as_slice(), ["SHA256:abc"]);
        assert_eq!(pool.server_key_hash(), None);
        pool.configure(&login).unwrap();
    }

    #[test]
    fn wait_until_idle_returns_after_last_release() {
        let (pool, _) = pool(1);
        thread::scope(|scope| {
            let lease = pool.acquire();
            let (tx, rx) = mpsc::channel();
            let pool = &pool;
            scope.spawn(move || {
                pool.wait_until_idle();
                tx.send(()).unwrap();
            });
            assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
            drop(lease);
            assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        });
    }
}
