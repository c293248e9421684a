//! Counting-semaphore pools for the three permit classes.
use tokio::sync::Semaphore;

use crate::error::{Error, Result};

/// Which of the three capacity budgets a permit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitClass {
    /// Short-lived UDP channels.
    Udp,
    /// Short-lived TCP channels.
    Tcp,
    /// Long-lived ("permanent") TCP channels.
    PermanentTcp,
}

/// The three fair, FIFO counting semaphores that back the reservation
/// manager's capacity budgets.
///
/// `tokio::sync::Semaphore` is itself fair and async-aware, and its
/// `acquire_many` is cancel-safe: if the returned future is dropped before
/// it resolves, no permits are taken. That cancel-safety is exactly what
/// lets a waiter task bail out of an in-progress `acquire` without having
/// to roll anything back.
#[derive(Debug)]
pub(crate) struct PermitPools {
    udp: Semaphore,
    tcp: Semaphore,
    permanent_tcp: Semaphore,
    max_udp: u32,
    max_tcp: u32,
    max_permanent_tcp: u32,
}

impl PermitPools {
    pub(crate) fn new(max_udp: u32, max_tcp: u32, max_permanent_tcp: u32) -> Self {
        Self {
            udp: Semaphore::new(max_udp as usize),
            tcp: Semaphore::new(max_tcp as usize),
            permanent_tcp: Semaphore::new(max_permanent_tcp as usize),
            max_udp,
            max_tcp,
            max_permanent_tcp,
        }
    }

    pub(crate) fn max(&self, class: PermitClass) -> u32 {
        match class {
            PermitClass::Udp => self.max_udp,
            PermitClass::Tcp => self.max_tcp,
            PermitClass::PermanentTcp => self.max_permanent_tcp,
        }
    }

    fn semaphore(&self, class: PermitClass) -> &Semaphore {
        match class {
            PermitClass::Udp => &self.udp,
            PermitClass::Tcp => &self.tcp,
            PermitClass::PermanentTcp => &self.permanent_tcp,
        }
    }

    /// Acquires `n` permits of `class`, waiting fairly (FIFO) until they
    /// become available. Cancel-safe: dropping the returned future before
    /// it completes acquires nothing.
    ///
    /// `n == 0` resolves immediately.
    pub(crate) async fn acquire(&self, class: PermitClass, n: u32) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        // The semaphore is only ever closed if `close()` is called, which
        // this pool never does, so `acquire_many` failing can only mean the
        // permit count overflowed `max`, i.e. a caller bug already ruled
        // out by the manager's precondition checks.
        self.semaphore(class)
            .acquire_many(n)
            .await
            .map_err(|_| Error::Interrupted)?
            .forget();
        Ok(())
    }

    /// Releases `n` permits of `class` back to the pool.
    pub(crate) fn release(&self, class: PermitClass, n: u32) {
        if n > 0 {
            self.semaphore(class).add_permits(n as usize);
        }
    }

    /// Available permits of `class` right now (best-effort; may be stale
    /// the instant it's observed under contention).
    #[cfg(test)]
    pub(crate) fn available(&self, class: PermitClass) -> u32 {
        self.semaphore(class).available_permits() as u32
    }

    /// Reacquires all `max` permits of `class`. Used only on the shutdown
    /// path as a proof of quiescence: it can only succeed once every permit
    /// ever handed out for this class has been returned. Not meant to be
    /// cancelled; the caller drives it to completion on a background task.
    ///
    /// The acquired guard is dropped (not `forget()`-ten) as soon as the
    /// acquisition succeeds, immediately handing the permits back. This
    /// proves the pool was momentarily fully idle; it is not a permanent
    /// withdrawal, so `available(class) == max` again once this returns.
    pub(crate) async fn reacquire_all(&self, class: PermitClass) {
        let max = self.max(class);
        if max == 0 {
            return;
        }
        let _guard = self
            .semaphore(class)
            .acquire_many(max)
            .await
            .expect("permit semaphore is never closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn acquire_and_release_round_trip() {
        let pools = PermitPools::new(2, 2, 0);
        pools.acquire(PermitClass::Udp, 2).await.unwrap();
        assert_eq!(pools.available(PermitClass::Udp), 0);
        pools.release(PermitClass::Udp, 2);
        assert_eq!(pools.available(PermitClass::Udp), 2);
    }

    #[tokio::test]
    async fn zero_permit_acquire_is_immediate() {
        let pools = PermitPools::new(0, 0, 0);
        pools.acquire(PermitClass::Udp, 0).await.unwrap();
    }

    #[tokio::test]
    async fn acquire_waits_until_capacity_available() {
        let pools = Arc::new(PermitPools::new(1, 0, 0));
        pools.acquire(PermitClass::Udp, 1).await.unwrap();

        let waiter = {
            let pools = pools.clone();
            tokio::spawn(async move { pools.acquire(PermitClass::Udp, 1).await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        pools.release(PermitClass::Udp, 1);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dropping_acquire_future_acquires_nothing() {
        let pools = Arc::new(PermitPools::new(1, 0, 0));
        {
            let pools = pools.clone();
            let fut = pools.acquire(PermitClass::Udp, 1);
            drop(fut); // cancelled before polling to completion
        }
        assert_eq!(pools.available(PermitClass::Udp), 1);
    }

    #[tokio::test]
    async fn reacquire_all_waits_for_full_capacity() {
        let pools = Arc::new(PermitPools::new(3, 0, 0));
        pools.acquire(PermitClass::Udp, 3).await.unwrap();

        let reacquired = {
            let pools = pools.clone();
            tokio::spawn(async move { pools.reacquire_all(PermitClass::Udp).await })
        };

        tokio::task::yield_now().await;
        assert!(!reacquired.is_finished());

        pools.release(PermitClass::Udp, 3);
        reacquired.await.unwrap();
        // The reacquisition proves quiescence, then hands the permits right
        // back. It does not withdraw them permanently.
        assert_eq!(pools.available(PermitClass::Udp), 3);
    }
}
