//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Netlink-backed kernel FIB mirror and mutator.
//!
//! The agent mirrors kernel routes, links, addresses and neighbors into an
//! in-process cache, publishes change notifications to a subscriber, and
//! applies route and address mutations to the kernel on behalf of a routing
//! daemon. A single task owns every cache and both transport channels;
//! [`FibHandle`] enqueues work onto it from any task or thread.

pub mod address;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
mod fib;
pub mod link;
pub mod neighbor;
pub mod netlink;
pub mod route;
pub mod transport;

use fiblink_utils::task::Task;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::debug;

pub use crate::api::FibHandle;
use crate::api::ApiRequest;
use crate::cache::RouteCache;
pub use crate::config::Config;
use crate::events::{EventFlags, EventMsg, FibEvent};
use crate::link::Links;
use crate::neighbor::Neighbors;
use crate::transport::{FibChannel, ObjectCategory};

// Owner of every cache and both transport channels. Lives on the single
// agent task spawned by [`start`].
pub(crate) struct Master {
    // Request channel to the kernel.
    pub(crate) channel: Box<dyn FibChannel>,
    // Mirrored route state.
    pub(crate) routes: RouteCache,
    // Mirrored link state.
    pub(crate) links: Links,
    // Mirrored neighbor state.
    pub(crate) neighbors: Neighbors,
    // Subscription mask.
    pub(crate) event_flags: EventFlags,
    // Registered subscriber.
    pub(crate) event_handler: Option<UnboundedSender<FibEvent>>,
}

// ===== impl Master =====

impl Master {
    async fn run(
        &mut self,
        mut api_rx: UnboundedReceiver<ApiRequest>,
        mut monitor_rx: UnboundedReceiver<EventMsg>,
    ) {
        loop {
            tokio::select! {
                biased;
                msg = monitor_rx.recv() => match msg {
                    Some(msg) => events::process_event(self, msg, true),
                    // The transport reader is gone and the mirror cannot
                    // be kept consistent anymore.
                    None => return,
                },
                request = api_rx.recv() => match request {
                    Some(request) => self.process_request(request).await,
                    // Exit when the last handle is dropped.
                    None => return,
                },
            }
        }
    }

    async fn process_request(&mut self, request: ApiRequest) {
        match request {
            ApiRequest::AddRoute { route, tx } => {
                let _ = tx.send(self.add_route(route).await);
            }
            ApiRequest::DelRoute { route, tx } => {
                let _ = tx.send(self.del_route(route).await);
            }
            ApiRequest::AddLabelRoute { route, tx } => {
                let _ = tx.send(self.add_label_route(route).await);
            }
            ApiRequest::DelLabelRoute { route, tx } => {
                let _ = tx.send(self.del_label_route(route).await);
            }
            ApiRequest::SyncUnicastRoutes { protocol, routes, tx } => {
                let _ =
                    tx.send(self.sync_unicast_routes(protocol, routes).await);
            }
            ApiRequest::SyncLabelRoutes { protocol, routes, tx } => {
                let _ =
                    tx.send(self.sync_label_routes(protocol, routes).await);
            }
            ApiRequest::SyncLinkRoutes { protocol, routes, tx } => {
                let _ =
                    tx.send(self.sync_link_routes(protocol, routes).await);
            }
            ApiRequest::GetUnicastRoutes { protocol, tx } => {
                let routes = self
                    .routes
                    .unicast(protocol)
                    .cloned()
                    .unwrap_or_default();
                let _ = tx.send(Ok(routes));
            }
            ApiRequest::GetMulticastRoutes { protocol, tx } => {
                let routes = self
                    .routes
                    .multicast(protocol)
                    .cloned()
                    .unwrap_or_default();
                let _ = tx.send(Ok(routes));
            }
            ApiRequest::GetLinkRoutes { protocol, tx } => {
                let routes =
                    self.routes.link(protocol).cloned().unwrap_or_default();
                let _ = tx.send(Ok(routes));
            }
            ApiRequest::GetLabelRoutes { protocol, tx } => {
                let routes =
                    self.routes.label(protocol).cloned().unwrap_or_default();
                let _ = tx.send(Ok(routes));
            }
            ApiRequest::GetRouteCount { tx } => {
                let _ = tx.send(Ok(self.routes.route_count()));
            }
            ApiRequest::GetLabelRouteCount { tx } => {
                let _ = tx.send(Ok(self.routes.label_route_count()));
            }
            ApiRequest::AddAddress { addr, tx } => {
                let _ = tx.send(self.add_address(addr).await);
            }
            ApiRequest::DelAddress { addr, tx } => {
                let _ = tx.send(self.delete_address(addr).await);
            }
            ApiRequest::SyncAddresses {
                ifindex,
                addrs,
                family,
                scope,
                tx,
            } => {
                let _ = tx.send(
                    self.sync_addresses(ifindex, addrs, family, scope).await,
                );
            }
            ApiRequest::GetAddresses { ifindex, family, scope, tx } => {
                let _ = tx
                    .send(self.get_addresses(ifindex, family, scope).await);
            }
            ApiRequest::GetIfindexByName { name, tx } => {
                let _ = tx.send(Ok(self.links.ifindex_by_name(&name)));
            }
            ApiRequest::GetNameByIfindex { ifindex, tx } => {
                let name = self
                    .links
                    .name_by_ifindex(ifindex)
                    .map(str::to_owned);
                let _ = tx.send(Ok(name));
            }
            ApiRequest::GetLoopbackIfindex { tx } => {
                let _ = tx.send(Ok(self.links.loopback_ifindex()));
            }
            ApiRequest::GetLinks { tx } => {
                let _ = tx.send(self.get_all_links().await);
            }
            ApiRequest::GetNeighbors { tx } => {
                let _ = tx.send(self.get_all_reachable_neighbors().await);
            }
            ApiRequest::Subscribe { events } => {
                self.event_flags.insert(events);
            }
            ApiRequest::Unsubscribe { events } => {
                self.event_flags.remove(events);
            }
            ApiRequest::SetEventHandler { handler } => {
                self.event_handler = Some(handler);
            }
        }
    }
}

// ===== global functions =====

/// Starts the agent on top of the given transport and returns the handle
/// used to drive it.
///
/// The caches are primed from the kernel before the first request is
/// served; subscriber callbacks stay quiet during that initial refill.
pub fn start(
    channel: Box<dyn FibChannel>,
    monitor: UnboundedReceiver<EventMsg>,
) -> FibHandle {
    let (api_tx, api_rx) = mpsc::unbounded_channel();

    let mut task = Task::spawn(async move {
        let mut master = Master {
            channel,
            routes: Default::default(),
            links: Default::default(),
            neighbors: Default::default(),
            event_flags: EventFlags::empty(),
            event_handler: None,
        };

        // Prime the caches. Links and addresses go first so route events
        // can resolve interface names.
        for category in [
            ObjectCategory::Link,
            ObjectCategory::Address,
            ObjectCategory::Route,
        ] {
            if let Err(error) = master.refill(category).await {
                error.log();
            }
        }
        debug!("initial cache refill done");

        master.run(api_rx, monitor).await;
    });
    task.detach();

    FibHandle::new(api_tx)
}

/// Starts the agent against the kernel's netlink interface.
pub fn start_netlink(config: &Config) -> FibHandle {
    let (channel, monitor) = netlink::init(config);
    start(channel, monitor)
}
