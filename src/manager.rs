//! The reservation manager: the public surface of the reservation core.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, instrument, warn};

use crate::cell::Cell;
use crate::channel_creator::{ChannelCreator, CreatorKind, EventLoopGroup};
use crate::config::{
    resolve_permit_split, ChannelClientConfig, ConnectionConfig, ManagerConfig, RequestConfig,
    RoutingConfig,
};
use crate::error::{Error, Result};
use crate::executor::WaiterExecutor;
use crate::gate::LifecycleGate;
use crate::permits::{PermitClass, PermitPools};

type CreatorResult<G> = std::result::Result<ChannelCreator<G>, Error>;

/// A pending or resolved reservation.
///
/// Does not implement [`std::future::Future`] itself. This codebase
/// exposes asynchronous results as `async fn wait(&self)` throughout (see
/// `Shutdown::recv` in the reference codebase) rather than hand-rolling a
/// `Future::poll` implementation. Cheap to clone; every clone observes the
/// same eventual result.
pub struct ReservationFuture<G> {
    cell: Arc<Cell<CreatorResult<G>>>,
}

// Hand-written for the same reason as `ChannelCreator`'s `Clone` impl:
// only the `Arc` needs duplicating, so deriving would wrongly demand
// `G: Clone`.
impl<G> Clone for ReservationFuture<G> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<G: EventLoopGroup> ReservationFuture<G> {
    fn pending() -> (Self, Arc<Cell<CreatorResult<G>>>) {
        let cell = Arc::new(Cell::new());
        (
            Self {
                cell: cell.clone(),
            },
            cell,
        )
    }

    fn already_failed(err: Error) -> Self {
        let cell = Arc::new(Cell::new());
        cell.complete(Err(err));
        Self { cell }
    }

    /// Waits for the reservation to resolve, successfully or not.
    pub async fn wait(&self) -> CreatorResult<G> {
        self.cell.wait().await
    }

    /// Registers a callback that fires exactly once, in registration
    /// order relative to other callbacks on this same future, once the
    /// reservation resolves. Fires immediately if it has already resolved.
    pub fn on_complete(&self, listener: impl FnOnce(&CreatorResult<G>) + Send + 'static) {
        self.cell.on_complete(listener);
    }
}

/// Signalled once `shutdown()` has fully drained: every issued channel
/// creator has shut down and every permit of every class has been
/// reacquired. Cloning two handles returned by two `shutdown()` calls
/// yields two observers of the *same* underlying completion.
#[derive(Clone)]
pub struct ReservationDoneFuture {
    cell: Arc<Cell<()>>,
}

impl ReservationDoneFuture {
    /// Waits for shutdown to fully drain.
    pub async fn wait(&self) {
        self.cell.wait().await;
    }
}

struct PendingWaiter<G> {
    done: Cell<()>,
    result: Arc<Cell<CreatorResult<G>>>,
}

/// Gates the creation of outbound network channels against fixed capacity
/// budgets, hands out reserved [`ChannelCreator`] handles asynchronously,
/// and coordinates a shutdown that drains in-flight reservations and
/// already-issued handles.
///
/// Always used behind an `Arc` (construction returns one directly): both
/// the internally spawned waiter executor and shutdown's per-creator
/// listeners need a `'static` handle back into the manager.
pub struct ReservationManager<G> {
    pools: PermitPools,
    gate: LifecycleGate,
    executor: WaiterExecutor,
    live: Mutex<HashMap<u64, ChannelCreator<G>>>,
    next_id: AtomicU64,
    reservation_done: Arc<Cell<()>>,
    worker_group: Arc<G>,
    client_config: ChannelClientConfig,
}

impl<G: EventLoopGroup> ReservationManager<G> {
    /// Constructs a manager with the given capacity budgets, holding a
    /// non-owning reference to `worker_group` (the manager never starts or
    /// shuts it down).
    pub fn new(worker_group: Arc<G>, config: ManagerConfig) -> Arc<Self> {
        info!(
            max_udp = config.max_udp,
            max_tcp = config.max_tcp,
            max_permanent_tcp = config.max_permanent_tcp,
            "constructing reservation manager"
        );
        Arc::new(Self {
            pools: PermitPools::new(config.max_udp, config.max_tcp, config.max_permanent_tcp),
            gate: LifecycleGate::new(),
            executor: WaiterExecutor::spawn(),
            live: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            reservation_done: Arc::new(Cell::new()),
            worker_group,
            client_config: config.client_config,
        })
    }

    /// Number of waiter jobs submitted to the executor but not yet
    /// dequeued by its single worker.
    pub fn pending_requests(&self) -> usize {
        self.executor.pending_requests()
    }

    /// Reserves `udp_permits` UDP permits and `tcp_permits` TCP permits for
    /// a short-lived channel.
    ///
    /// Fails synchronously (`Err`) if either count exceeds the configured
    /// maximum for its class. Such a request could never succeed, so this
    /// is treated as a caller bug rather than a runtime condition. A
    /// request made while shutting down instead succeeds in returning a
    /// future, one that is already resolved to `Err(Error::ShuttingDown)`.
    pub fn create(self: &Arc<Self>, udp_permits: u32, tcp_permits: u32) -> Result<ReservationFuture<G>> {
        if udp_permits > self.pools.max(PermitClass::Udp) {
            return Err(Error::ArgumentInvalid(format!(
                "udp_permits {udp_permits} exceeds max_udp {}",
                self.pools.max(PermitClass::Udp)
            )));
        }
        if tcp_permits > self.pools.max(PermitClass::Tcp) {
            return Err(Error::ArgumentInvalid(format!(
                "tcp_permits {tcp_permits} exceeds max_tcp {}",
                self.pools.max(PermitClass::Tcp)
            )));
        }

        // Read lock held only across this check-then-enqueue sequence,
        // never across the semaphore acquisitions the waiter job performs
        // later on the executor.
        let guard = self.gate.read();
        if *guard {
            drop(guard);
            debug!("create() observed shutdown, returning pre-failed future");
            return Ok(ReservationFuture::already_failed(Error::ShuttingDown));
        }

        let done = Cell::new();
        // Registered first, before the caller or anything else ever
        // observes this cell, so it is guaranteed to run before the
        // live-set removal listener the waiter job attaches once the
        // creator exists.
        let manager = self.clone();
        done.on_complete(move |_| {
            debug!(udp_permits, tcp_permits, "releasing permits on creator shutdown");
            manager.pools.release(PermitClass::Udp, udp_permits);
            manager.pools.release(PermitClass::Tcp, tcp_permits);
        });

        let (future, result) = ReservationFuture::pending();
        let waiter = PendingWaiter { done, result };

        let manager = self.clone();
        self.executor.submit(async move {
            manager.run_short_lived_waiter(udp_permits, tcp_permits, waiter).await;
        });
        drop(guard);

        Ok(future)
    }

    /// Reserves `permits` long-lived ("permanent") TCP permits. No
    /// partial-acquisition rollback is needed since only one semaphore is
    /// ever touched.
    pub fn create_permanent(self: &Arc<Self>, permits: u32) -> Result<ReservationFuture<G>> {
        if permits > self.pools.max(PermitClass::PermanentTcp) {
            return Err(Error::ArgumentInvalid(format!(
                "permits {permits} exceeds max_permanent_tcp {}",
                self.pools.max(PermitClass::PermanentTcp)
            )));
        }

        let guard = self.gate.read();
        if *guard {
            drop(guard);
            return Ok(ReservationFuture::already_failed(Error::ShuttingDown));
        }

        let done = Cell::new();
        let manager = self.clone();
        done.on_complete(move |_| {
            debug!(permits, "releasing permanent tcp permits on creator shutdown");
            manager.pools.release(PermitClass::PermanentTcp, permits);
        });

        let (future, result) = ReservationFuture::pending();
        let waiter = PendingWaiter { done, result };

        let manager = self.clone();
        self.executor.submit(async move {
            manager.run_permanent_waiter(permits, waiter).await;
        });
        drop(guard);

        Ok(future)
    }

    /// Convenience overload: resolves `(udp_needed, tcp_needed)` from
    /// routing/request/connection configuration and delegates to
    /// [`ReservationManager::create`]. Fails synchronously if both
    /// `routing_cfg` and `request_cfg` are absent.
    pub fn create_from_configs(
        self: &Arc<Self>,
        routing_cfg: Option<RoutingConfig>,
        request_cfg: Option<RequestConfig>,
        conn_cfg: ConnectionConfig,
    ) -> Result<ReservationFuture<G>> {
        let (udp_needed, tcp_needed) = resolve_permit_split(routing_cfg, request_cfg, conn_cfg)?;
        self.create(udp_needed, tcp_needed)
    }

    async fn run_short_lived_waiter(self: Arc<Self>, udp_permits: u32, tcp_permits: u32, waiter: PendingWaiter<G>) {
        if self.gate.is_shutdown() {
            waiter.result.complete(Err(Error::ShuttingDown));
            return;
        }

        if self.pools.acquire(PermitClass::Udp, udp_permits).await.is_err() {
            warn!("waiter interrupted acquiring udp permits");
            waiter.result.complete(Err(Error::Interrupted));
            return;
        }

        if self.pools.acquire(PermitClass::Tcp, tcp_permits).await.is_err() {
            warn!("waiter interrupted acquiring tcp permits, releasing udp permits already held");
            self.pools.release(PermitClass::Udp, udp_permits);
            waiter.result.complete(Err(Error::Interrupted));
            return;
        }

        let creator = ChannelCreator::new(
            self.worker_group.clone(),
            waiter.done,
            CreatorKind::ShortLived {
                udp_permits,
                tcp_permits,
            },
            self.client_config.clone(),
        );
        self.register_live(creator.clone());
        waiter.result.complete(Ok(creator));
    }

    async fn run_permanent_waiter(self: Arc<Self>, permits: u32, waiter: PendingWaiter<G>) {
        if self.gate.is_shutdown() {
            waiter.result.complete(Err(Error::ShuttingDown));
            return;
        }

        if self.pools.acquire(PermitClass::PermanentTcp, permits).await.is_err() {
            warn!("waiter interrupted acquiring permanent tcp permits");
            waiter.result.complete(Err(Error::Interrupted));
            return;
        }

        let creator = ChannelCreator::new(
            self.worker_group.clone(),
            waiter.done,
            CreatorKind::Permanent { permits },
            self.client_config.clone(),
        );
        self.register_live(creator.clone());
        waiter.result.complete(Ok(creator));
    }

    /// Adds `creator` to the live set and attaches the auto-unregister
    /// listener: once the creator shuts down, it removes itself unless
    /// global shutdown is already in progress, in which case the shutdown
    /// orchestrator owns removal instead (it is iterating a snapshot of
    /// the live set and must not see entries disappear underneath it).
    fn register_live(self: &Arc<Self>, creator: ChannelCreator<G>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().insert(id, creator.clone());

        let manager = self.clone();
        creator.on_shutdown_done(move || {
            let guard = manager.gate.read();
            if !*guard {
                drop(guard);
                manager.live.lock().unwrap().remove(&id);
            }
        });
    }

    /// Initiates shutdown: no further reservation succeeds after this
    /// call observes the flag. Returns the reservation-done future, which
    /// completes once every currently-live channel creator has shut down
    /// and every permit of every class has been reacquired.
    ///
    /// Calling this more than once is safe: every call after the first
    /// returns the same future without restarting the drain.
    #[instrument(skip(self))]
    pub async fn shutdown(self: &Arc<Self>) -> ReservationDoneFuture {
        if !self.gate.shut() {
            debug!("shutdown already in progress, returning existing reservation-done future");
            return ReservationDoneFuture {
                cell: self.reservation_done.clone(),
            };
        }

        info!("reservation manager shutting down");

        let snapshot: Vec<ChannelCreator<G>> = {
            let live = self.live.lock().unwrap();
            live.values().cloned().collect()
        };
        let total = snapshot.len();
        debug!(live_creators = total, "draining live channel creators");

        if total == 0 {
            let manager = self.clone();
            tokio::spawn(async move { manager.finish_shutdown().await });
        } else {
            let completed = Arc::new(AtomicUsize::new(0));
            for creator in snapshot {
                let manager = self.clone();
                let completed = completed.clone();
                // Registered after the release listener (attached back in
                // `create`/`create_permanent`), so the permits this
                // creator held are already back in their pool by the time
                // this listener observes completion.
                creator.on_shutdown_done(move || {
                    if completed.fetch_add(1, Ordering::SeqCst) + 1 == total {
                        let manager = manager.clone();
                        tokio::spawn(async move { manager.finish_shutdown().await });
                    }
                });
                creator.shutdown();
            }
        }

        ReservationDoneFuture {
            cell: self.reservation_done.clone(),
        }
    }

    /// Returns the same future [`ReservationManager::shutdown`] returns,
    /// without initiating shutdown. Useful for an observer that wants to
    /// await drain completion without being the one driving it.
    pub fn shutdown_future(&self) -> ReservationDoneFuture {
        ReservationDoneFuture {
            cell: self.reservation_done.clone(),
        }
    }

    /// Reacquires `max` permits of every class, the proof that every
    /// permit ever handed out has been returned, then completes the
    /// reservation-done future. Runs on the default background executor,
    /// since this may block until the slowest outstanding creator
    /// finishes releasing its permits.
    async fn finish_shutdown(self: Arc<Self>) {
        self.pools.reacquire_all(PermitClass::Udp).await;
        self.pools.reacquire_all(PermitClass::Tcp).await;
        self.pools.reacquire_all(PermitClass::PermanentTcp).await;
        self.reservation_done.complete(());
        info!("reservation manager shutdown complete, all permits reclaimed");
    }
}
