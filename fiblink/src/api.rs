//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;

use fiblink_utils::ip::AddressFamily;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

use crate::address::IfAddress;
use crate::cache::{LabelRoutes, LinkRoutes, MulticastRoutes, UnicastRoutes};
use crate::error::Error;
use crate::events::{EventFlags, FibEvent};
use crate::link::Link;
use crate::neighbor::Neighbor;
use crate::route::{Route, RouteScope};

pub(crate) type ReplySender<T> = oneshot::Sender<Result<T, Error>>;

// Requests accepted by the agent task. Each carries the completion sender
// its caller is waiting on; subscription changes are fire and forget.
pub(crate) enum ApiRequest {
    AddRoute {
        route: Route,
        tx: ReplySender<()>,
    },
    DelRoute {
        route: Route,
        tx: ReplySender<()>,
    },
    AddLabelRoute {
        route: Route,
        tx: ReplySender<()>,
    },
    DelLabelRoute {
        route: Route,
        tx: ReplySender<()>,
    },
    SyncUnicastRoutes {
        protocol: u8,
        routes: UnicastRoutes,
        tx: ReplySender<()>,
    },
    SyncLabelRoutes {
        protocol: u8,
        routes: LabelRoutes,
        tx: ReplySender<()>,
    },
    SyncLinkRoutes {
        protocol: u8,
        routes: LinkRoutes,
        tx: ReplySender<()>,
    },
    GetUnicastRoutes {
        protocol: u8,
        tx: ReplySender<UnicastRoutes>,
    },
    GetMulticastRoutes {
        protocol: u8,
        tx: ReplySender<MulticastRoutes>,
    },
    GetLinkRoutes {
        protocol: u8,
        tx: ReplySender<LinkRoutes>,
    },
    GetLabelRoutes {
        protocol: u8,
        tx: ReplySender<LabelRoutes>,
    },
    GetRouteCount {
        tx: ReplySender<i64>,
    },
    GetLabelRouteCount {
        tx: ReplySender<i64>,
    },
    AddAddress {
        addr: IfAddress,
        tx: ReplySender<()>,
    },
    DelAddress {
        addr: IfAddress,
        tx: ReplySender<()>,
    },
    SyncAddresses {
        ifindex: u32,
        addrs: Vec<IfAddress>,
        family: Option<AddressFamily>,
        scope: Option<RouteScope>,
        tx: ReplySender<()>,
    },
    GetAddresses {
        ifindex: u32,
        family: Option<AddressFamily>,
        scope: Option<RouteScope>,
        tx: ReplySender<Vec<IfAddress>>,
    },
    GetIfindexByName {
        name: String,
        tx: ReplySender<Option<u32>>,
    },
    GetNameByIfindex {
        ifindex: u32,
        tx: ReplySender<Option<String>>,
    },
    GetLoopbackIfindex {
        tx: ReplySender<Option<u32>>,
    },
    GetLinks {
        tx: ReplySender<BTreeMap<String, Link>>,
    },
    GetNeighbors {
        tx: ReplySender<BTreeMap<(String, IpAddr), Neighbor>>,
    },
    Subscribe {
        events: EventFlags,
    },
    Unsubscribe {
        events: EventFlags,
    },
    SetEventHandler {
        handler: UnboundedSender<FibEvent>,
    },
}

/// Handle used to drive the agent from any task or thread.
///
/// Every method enqueues work onto the single agent task and resolves once
/// that task has run it to completion, so calls made from one handle are
/// applied in order. The handle is cheap to clone.
#[derive(Clone, Debug)]
pub struct FibHandle {
    tx: UnboundedSender<ApiRequest>,
}

// ===== impl FibHandle =====

impl FibHandle {
    pub(crate) fn new(tx: UnboundedSender<ApiRequest>) -> FibHandle {
        FibHandle { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(ReplySender<T>) -> ApiRequest,
    ) -> Result<T, Error> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(make(tx)).map_err(|_| Error::Terminated)?;
        rx.await.map_err(|_| Error::Terminated)?
    }

    /// Installs or updates a unicast, blackhole or multicast route.
    pub async fn add_route(&self, route: Route) -> Result<(), Error> {
        self.request(|tx| ApiRequest::AddRoute { route, tx }).await
    }

    /// Removes a unicast, blackhole or multicast route.
    pub async fn del_route(&self, route: Route) -> Result<(), Error> {
        self.request(|tx| ApiRequest::DelRoute { route, tx }).await
    }

    /// Installs or updates an MPLS label route.
    pub async fn add_label_route(&self, route: Route) -> Result<(), Error> {
        self.request(|tx| ApiRequest::AddLabelRoute { route, tx })
            .await
    }

    /// Removes an MPLS label route.
    pub async fn del_label_route(&self, route: Route) -> Result<(), Error> {
        self.request(|tx| ApiRequest::DelLabelRoute { route, tx })
            .await
    }

    /// Makes the kernel's unicast routes for one protocol equal to the
    /// given set, issuing the minimum add and delete deltas.
    pub async fn sync_unicast_routes(
        &self,
        protocol: u8,
        routes: UnicastRoutes,
    ) -> Result<(), Error> {
        self.request(|tx| ApiRequest::SyncUnicastRoutes {
            protocol,
            routes,
            tx,
        })
        .await
    }

    /// Makes the kernel's label routes for one protocol equal to the given
    /// set.
    pub async fn sync_label_routes(
        &self,
        protocol: u8,
        routes: LabelRoutes,
    ) -> Result<(), Error> {
        self.request(|tx| ApiRequest::SyncLabelRoutes {
            protocol,
            routes,
            tx,
        })
        .await
    }

    /// Makes the kernel's link scope routes for one protocol equal to the
    /// given set.
    pub async fn sync_link_routes(
        &self,
        protocol: u8,
        routes: LinkRoutes,
    ) -> Result<(), Error> {
        self.request(|tx| ApiRequest::SyncLinkRoutes {
            protocol,
            routes,
            tx,
        })
        .await
    }

    pub async fn unicast_routes(
        &self,
        protocol: u8,
    ) -> Result<UnicastRoutes, Error> {
        self.request(|tx| ApiRequest::GetUnicastRoutes { protocol, tx })
            .await
    }

    pub async fn multicast_routes(
        &self,
        protocol: u8,
    ) -> Result<MulticastRoutes, Error> {
        self.request(|tx| ApiRequest::GetMulticastRoutes { protocol, tx })
            .await
    }

    pub async fn link_routes(
        &self,
        protocol: u8,
    ) -> Result<LinkRoutes, Error> {
        self.request(|tx| ApiRequest::GetLinkRoutes { protocol, tx })
            .await
    }

    pub async fn label_routes(
        &self,
        protocol: u8,
    ) -> Result<LabelRoutes, Error> {
        self.request(|tx| ApiRequest::GetLabelRoutes { protocol, tx })
            .await
    }

    pub async fn route_count(&self) -> Result<i64, Error> {
        self.request(|tx| ApiRequest::GetRouteCount { tx }).await
    }

    pub async fn label_route_count(&self) -> Result<i64, Error> {
        self.request(|tx| ApiRequest::GetLabelRouteCount { tx })
            .await
    }

    /// Installs an interface address. Adding an address the interface
    /// already carries counts as success.
    pub async fn add_address(&self, addr: IfAddress) -> Result<(), Error> {
        self.request(|tx| ApiRequest::AddAddress { addr, tx }).await
    }

    /// Removes an interface address. Removing an address the interface
    /// does not carry counts as success.
    pub async fn del_address(&self, addr: IfAddress) -> Result<(), Error> {
        self.request(|tx| ApiRequest::DelAddress { addr, tx }).await
    }

    /// Makes the interface's addresses within the given family and scope
    /// equal to the given set, adding before deleting.
    pub async fn sync_addresses(
        &self,
        ifindex: u32,
        addrs: Vec<IfAddress>,
        family: Option<AddressFamily>,
        scope: Option<RouteScope>,
    ) -> Result<(), Error> {
        self.request(|tx| ApiRequest::SyncAddresses {
            ifindex,
            addrs,
            family,
            scope,
            tx,
        })
        .await
    }

    /// Reads the interface's current addresses from the kernel, optionally
    /// restricted by family and scope.
    pub async fn addresses(
        &self,
        ifindex: u32,
        family: Option<AddressFamily>,
        scope: Option<RouteScope>,
    ) -> Result<Vec<IfAddress>, Error> {
        self.request(|tx| ApiRequest::GetAddresses {
            ifindex,
            family,
            scope,
            tx,
        })
        .await
    }

    pub async fn ifindex_by_name(
        &self,
        name: &str,
    ) -> Result<Option<u32>, Error> {
        let name = name.to_owned();
        self.request(|tx| ApiRequest::GetIfindexByName { name, tx })
            .await
    }

    pub async fn name_by_ifindex(
        &self,
        ifindex: u32,
    ) -> Result<Option<String>, Error> {
        self.request(|tx| ApiRequest::GetNameByIfindex { ifindex, tx })
            .await
    }

    pub async fn loopback_ifindex(&self) -> Result<Option<u32>, Error> {
        self.request(|tx| ApiRequest::GetLoopbackIfindex { tx })
            .await
    }

    /// Refreshes and returns the link cache, addresses included.
    pub async fn links(&self) -> Result<BTreeMap<String, Link>, Error> {
        self.request(|tx| ApiRequest::GetLinks { tx }).await
    }

    /// Refreshes and returns the reachable neighbor cache.
    pub async fn reachable_neighbors(
        &self,
    ) -> Result<BTreeMap<(String, IpAddr), Neighbor>, Error> {
        self.request(|tx| ApiRequest::GetNeighbors { tx }).await
    }

    /// Enables subscriber delivery for the given event categories.
    pub fn subscribe(&self, events: EventFlags) {
        let _ = self.tx.send(ApiRequest::Subscribe { events });
    }

    /// Disables subscriber delivery for the given event categories.
    pub fn unsubscribe(&self, events: EventFlags) {
        let _ = self.tx.send(ApiRequest::Unsubscribe { events });
    }

    pub fn subscribe_all(&self) {
        self.subscribe(EventFlags::all());
    }

    pub fn unsubscribe_all(&self) {
        self.unsubscribe(EventFlags::all());
    }

    /// Registers the channel change notifications are delivered on.
    pub fn set_event_handler(&self, handler: UnboundedSender<FibEvent>) {
        let _ = self.tx.send(ApiRequest::SetEventHandler { handler });
    }
}
