//! Configuration records accepted by the reservation manager.
use crate::{Error, Result};

/// Capacity and pass-through configuration supplied to
/// [`crate::ReservationManager::new`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum concurrently reserved short-lived UDP permits.
    pub max_udp: u32,
    /// Maximum concurrently reserved short-lived TCP permits.
    pub max_tcp: u32,
    /// Maximum concurrently reserved long-lived ("permanent") TCP permits.
    pub max_permanent_tcp: u32,
    /// Opaque configuration forwarded verbatim to every `ChannelCreator`.
    pub client_config: ChannelClientConfig,
}

/// Opaque per-channel configuration forwarded verbatim into every newly
/// constructed `ChannelCreator`. The reservation core never inspects these
/// fields; they exist purely to be threaded through to the collaborator
/// that actually builds channels.
#[derive(Debug, Clone, Default)]
pub struct ChannelClientConfig {
    /// Upper bound a channel creator should honour when establishing the
    /// underlying socket, in milliseconds. Opaque to the reservation core.
    pub connect_timeout_millis: u64,
    /// Free-form label forwarded to the channel creator, e.g. for metrics.
    pub label: String,
}

/// Desired parallelism for routing-table maintenance traffic, used by the
/// `create(routing_cfg, request_cfg, conn_cfg)` convenience overload.
#[derive(Debug, Clone, Copy)]
pub struct RoutingConfig {
    /// Number of channels routing traffic wants to keep open in parallel.
    pub parallel: u32,
}

/// Desired parallelism for an application-level request, used by the
/// `create(routing_cfg, request_cfg, conn_cfg)` convenience overload.
#[derive(Debug, Clone, Copy)]
pub struct RequestConfig {
    /// Number of channels the request wants to keep open in parallel.
    pub parallel: u32,
}

/// Transport preferences that steer the convenience overload's UDP/TCP
/// split.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionConfig {
    /// Force `request_cfg`'s parallelism onto UDP instead of TCP.
    pub force_udp: bool,
    /// Force `routing_cfg`'s parallelism onto TCP instead of UDP.
    pub force_tcp: bool,
}

/// Resolves the `(udp_needed, tcp_needed)` split described in the
/// convenience-overload table: `request_cfg` picks UDP or TCP depending on
/// `force_udp`; `routing_cfg` picks the other side depending on `force_tcp`,
/// and is folded in with `max` rather than overwriting a value `request_cfg`
/// already set.
pub(crate) fn resolve_permit_split(
    routing_cfg: Option<RoutingConfig>,
    request_cfg: Option<RequestConfig>,
    conn_cfg: ConnectionConfig,
) -> Result<(u32, u32)> {
    if routing_cfg.is_none() && request_cfg.is_none() {
        return Err(Error::ArgumentInvalid(
            "at least one of routing_cfg or request_cfg must be present".to_string(),
        ));
    }

    let mut udp_needed = 0;
    let mut tcp_needed = 0;

    if let Some(request_cfg) = request_cfg {
        if conn_cfg.force_udp {
            udp_needed = request_cfg.parallel;
        } else {
            tcp_needed = request_cfg.parallel;
        }
    }

    if let Some(routing_cfg) = routing_cfg {
        if conn_cfg.force_tcp {
            tcp_needed = tcp_needed.max(routing_cfg.parallel);
        } else {
            udp_needed = udp_needed.max(routing_cfg.parallel);
        }
    }

    Ok((udp_needed, tcp_needed))
}
