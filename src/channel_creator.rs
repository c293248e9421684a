//! The `ChannelCreator` collaborator handle.
//!
//! This core never opens a socket itself. It reserves capacity and hands
//! out an opaque, permit-carrying handle that some other part of the stack
//! (out of scope here) uses to actually build channels against the
//! supplied [`EventLoopGroup`]. What this core *does* own is the contract:
//! a creator is constructed already bound to successfully-acquired
//! permits, and its `shutdown_future()` is the single place those permits
//! get released.
use std::sync::Arc;

use crate::cell::Cell;
use crate::config::ChannelClientConfig;

/// An externally owned worker/event-loop pool.
///
/// The manager holds only a non-owning `Arc` to this; it never constructs,
/// starts, or shuts one down. This is a marker trait: the reservation core
/// has no use for the group's methods, only for keeping it alive and
/// threading it through to the collaborator that eventually performs
/// channel I/O.
pub trait EventLoopGroup: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> EventLoopGroup for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CreatorKind {
    ShortLived { udp_permits: u32, tcp_permits: u32 },
    Permanent { permits: u32 },
}

struct Inner<G> {
    kind: CreatorKind,
    done: Cell<()>,
    #[allow(dead_code)] // kept alive for the collaborator that builds real channels
    worker_group: Arc<G>,
    #[allow(dead_code)]
    client_config: ChannelClientConfig,
}

/// A reserved, permit-backed handle a caller uses to build an outbound
/// channel.
///
/// Cheap to clone (an `Arc` underneath). `shutdown()` completes the
/// handle's shutdown-done cell exactly once; every listener registered via
/// [`ChannelCreator::shutdown_future`] observes that single completion,
/// including the manager's internal permit-release and live-set
/// bookkeeping listeners registered before the caller ever saw this value.
pub struct ChannelCreator<G> {
    inner: Arc<Inner<G>>,
}

// Hand-written so cloning a handle never requires `G: Clone`. Only the
// `Arc` is duplicated, the same as cloning `Db` in the reference codebase.
impl<G> Clone for ChannelCreator<G> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<G> std::fmt::Debug for ChannelCreator<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCreator")
            .field("kind", &self.inner.kind)
            .finish()
    }
}

impl<G: EventLoopGroup> ChannelCreator<G> {
    pub(crate) fn new(
        worker_group: Arc<G>,
        done: Cell<()>,
        kind: CreatorKind,
        client_config: ChannelClientConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                done,
                worker_group,
                client_config,
            }),
        }
    }

    /// UDP permits owned by this handle (`0` for a permanent creator).
    pub fn udp_permits(&self) -> u32 {
        match self.inner.kind {
            CreatorKind::ShortLived { udp_permits, .. } => udp_permits,
            CreatorKind::Permanent { .. } => 0,
        }
    }

    /// TCP permits owned by this handle (the permanent-TCP count, for a
    /// permanent creator).
    pub fn tcp_permits(&self) -> u32 {
        match self.inner.kind {
            CreatorKind::ShortLived { tcp_permits, .. } => tcp_permits,
            CreatorKind::Permanent { permits } => permits,
        }
    }

    /// `true` if this handle was reserved via `create_permanent`.
    pub fn is_permanent(&self) -> bool {
        matches!(self.inner.kind, CreatorKind::Permanent { .. })
    }

    /// Initiates teardown, completing the shutdown-done cell and firing
    /// every registered listener in registration order. Idempotent: a
    /// second call is a no-op.
    pub fn shutdown(&self) {
        self.inner.done.complete(());
    }

    /// Waits for [`ChannelCreator::shutdown`] to have been called.
    pub async fn shutdown_future(&self) {
        self.inner.done.wait().await;
    }

    /// Registers a listener that fires once `shutdown()` completes, after
    /// every listener registered before it (in particular, after the
    /// permit-release listener the manager attaches at reservation time,
    /// before this handle is ever constructed).
    pub(crate) fn on_shutdown_done(&self, listener: impl FnOnce() + Send + 'static) {
        self.inner.done.on_complete(move |_| listener());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_completes_shutdown_future() {
        let creator = ChannelCreator::new(
            Arc::new(()),
            Cell::new(),
            CreatorKind::ShortLived {
                udp_permits: 1,
                tcp_permits: 2,
            },
            ChannelClientConfig::default(),
        );
        assert_eq!(creator.udp_permits(), 1);
        assert_eq!(creator.tcp_permits(), 2);
        assert!(!creator.is_permanent());

        let waiter = {
            let creator = creator.clone();
            tokio::spawn(async move { creator.shutdown_future().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        creator.shutdown();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn double_shutdown_is_idempotent() {
        let creator = ChannelCreator::new(
            Arc::new(()),
            Cell::new(),
            CreatorKind::Permanent { permits: 3 },
            ChannelClientConfig::default(),
        );
        assert!(creator.is_permanent());
        creator.shutdown();
        creator.shutdown();
        creator.shutdown_future().await;
    }
}
