//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use fiblink_utils::ip::{AddressFamily, IpAddrExt};
use ipnetwork::IpNetwork;
use tracing::{debug, warn};

use crate::address::IfAddress;
use crate::cache::{LabelRoutes, LinkRoutes, UnicastRoutes};
use crate::error::Error;
use crate::events;
use crate::link::Link;
use crate::neighbor::Neighbor;
use crate::route::{Route, RouteScope, RouteType};
use crate::transport::ObjectCategory;
use crate::Master;

// ===== impl Master =====

impl Master {
    // Routes an add request to the family-specific path.
    pub(crate) async fn add_route(&mut self, route: Route) -> Result<(), Error> {
        debug!(destination = %route.destination, "adding route");
        match route.route_type {
            RouteType::Unicast | RouteType::Blackhole => {
                self.add_update_unicast_route(route).await
            }
            RouteType::Multicast => self.add_multicast_route(route).await,
        }
    }

    // Routes a delete request to the family-specific path.
    pub(crate) async fn del_route(&mut self, route: Route) -> Result<(), Error> {
        debug!(destination = %route.destination, "deleting route");
        match route.route_type {
            RouteType::Unicast | RouteType::Blackhole => {
                self.delete_unicast_route(route).await
            }
            RouteType::Multicast => self.delete_multicast_route(route).await,
        }
    }

    pub(crate) async fn add_label_route(
        &mut self,
        route: Route,
    ) -> Result<(), Error> {
        debug!(destination = %route.destination, "adding label route");
        if route.route_type != RouteType::Unicast {
            return Err(Error::UnsupportedRouteType(route.route_type));
        }
        self.add_update_label_route(route).await
    }

    pub(crate) async fn del_label_route(
        &mut self,
        route: Route,
    ) -> Result<(), Error> {
        debug!(destination = %route.destination, "deleting label route");
        if route.route_type != RouteType::Unicast {
            return Err(Error::UnsupportedRouteType(route.route_type));
        }
        self.delete_label_route(route).await
    }

    async fn add_update_unicast_route(
        &mut self,
        route: Route,
    ) -> Result<(), Error> {
        let prefix = check_unicast_route(&route)?;

        // An identical cached entry means the kernel already agrees.
        let cached = self
            .routes
            .unicast(route.protocol)
            .and_then(|routes| routes.get(&prefix))
            .cloned();
        if cached.as_ref() == Some(&route) {
            return Ok(());
        }

        // The kernel does not reliably replace IPv6 routes in place, and
        // leftover entries with stale attributes can crash interface
        // teardown. Remove the old entry explicitly before adding the new
        // one, accepting that the kernel may have withdrawn it already.
        if prefix.is_ipv6() {
            if let Some(old) = &cached {
                if let Err(error) = self.channel.route_del(old).await {
                    if !error.is_not_found() {
                        return Err(Error::RouteUninstall(
                            old.destination,
                            error,
                        ));
                    }
                    debug!(%prefix, "stale route already gone");
                }
            }
        }
        self.routes.unicast_mut(route.protocol).remove(&prefix);

        let replace = prefix.is_ipv4();
        if let Err(error) = self.channel.route_add(&route, replace).await {
            return Err(Error::RouteInstall(route.destination, error));
        }
        self.routes.unicast_mut(route.protocol).insert(prefix, route);
        Ok(())
    }

    async fn delete_unicast_route(
        &mut self,
        route: Route,
    ) -> Result<(), Error> {
        let prefix = check_unicast_route(&route)?;

        if self
            .routes
            .unicast(route.protocol)
            .map_or(true, |routes| !routes.contains_key(&prefix))
        {
            warn!(%prefix, "delete for prefix not in cache");
            return Ok(());
        }

        if let Err(error) = self.channel.route_del(&route).await {
            if !error.is_not_found() {
                return Err(Error::RouteUninstall(route.destination, error));
            }
            debug!(%prefix, "route already gone");
        }
        self.routes.unicast_mut(route.protocol).remove(&prefix);
        Ok(())
    }

    async fn add_multicast_route(
        &mut self,
        route: Route,
    ) -> Result<(), Error> {
        let (prefix, ifname) = self.check_multicast_route(&route)?;

        let key = (prefix, ifname);
        if self
            .routes
            .multicast(route.protocol)
            .is_some_and(|routes| routes.contains_key(&key))
        {
            // Kernel-originated entries land in the cache too.
            warn!(%prefix, ifname = %key.1, "multicast route already exists");
            return Ok(());
        }

        if let Err(error) = self.channel.route_add(&route, false).await {
            return Err(Error::RouteInstall(route.destination, error));
        }
        self.routes.multicast_mut(route.protocol).insert(key, route);
        Ok(())
    }

    async fn delete_multicast_route(
        &mut self,
        route: Route,
    ) -> Result<(), Error> {
        let (prefix, ifname) = self.check_multicast_route(&route)?;

        let key = (prefix, ifname);
        if !self
            .routes
            .multicast(route.protocol)
            .is_some_and(|routes| routes.contains_key(&key))
        {
            warn!(%prefix, ifname = %key.1, "multicast route does not exist");
            return Ok(());
        }

        if let Err(error) = self.channel.route_del(&route).await {
            return Err(Error::RouteUninstall(route.destination, error));
        }
        self.routes.multicast_mut(route.protocol).remove(&key);
        Ok(())
    }

    async fn add_update_label_route(
        &mut self,
        route: Route,
    ) -> Result<(), Error> {
        if !self.channel.supports_label_routes() {
            warn!("transport does not support label programming");
            return Ok(());
        }
        let Some(label) = route.destination.as_label().copied() else {
            return Err(Error::RouteLabelMissing);
        };

        // An identical cached entry means the kernel already agrees.
        if self
            .routes
            .label(route.protocol)
            .and_then(|routes| routes.get(&label))
            == Some(&route)
        {
            return Ok(());
        }

        self.routes.label_mut(route.protocol).remove(&label);
        if let Err(error) = self.channel.label_route_add(&route).await {
            return Err(Error::RouteInstall(route.destination, error));
        }
        self.routes.label_mut(route.protocol).insert(label, route);
        Ok(())
    }

    async fn delete_label_route(
        &mut self,
        route: Route,
    ) -> Result<(), Error> {
        if !self.channel.supports_label_routes() {
            warn!("transport does not support label programming");
            return Ok(());
        }
        let Some(label) = route.destination.as_label().copied() else {
            return Err(Error::RouteLabelMissing);
        };

        if !self
            .routes
            .label(route.protocol)
            .is_some_and(|routes| routes.contains_key(&label))
        {
            warn!(%label, "delete for label not in cache");
            return Ok(());
        }

        if let Err(error) = self.channel.label_route_del(&route).await {
            if !error.is_not_found() {
                return Err(Error::RouteUninstall(route.destination, error));
            }
            debug!(%label, "label route already gone");
        }
        self.routes.label_mut(route.protocol).remove(&label);
        Ok(())
    }

    // Converges one protocol's unicast slice onto the desired route set.
    // Stale prefixes are deleted before the new set is applied; unchanged
    // entries short-circuit inside the add path.
    pub(crate) async fn sync_unicast_routes(
        &mut self,
        protocol: u8,
        routes: UnicastRoutes,
    ) -> Result<(), Error> {
        debug!(%protocol, count = routes.len(), "syncing unicast routes");

        let to_delete = self
            .routes
            .unicast(protocol)
            .map(|cached| {
                cached
                    .keys()
                    .filter(|prefix| !routes.contains_key(*prefix))
                    .copied()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        for prefix in to_delete {
            let Some(cached) = self
                .routes
                .unicast(protocol)
                .and_then(|routes| routes.get(&prefix))
                .cloned()
            else {
                continue;
            };
            self.delete_unicast_route(cached).await?;
        }

        for (_, route) in routes {
            self.add_update_unicast_route(route).await?;
        }
        Ok(())
    }

    // Converges one protocol's label slice onto the desired route set.
    pub(crate) async fn sync_label_routes(
        &mut self,
        protocol: u8,
        routes: LabelRoutes,
    ) -> Result<(), Error> {
        debug!(%protocol, count = routes.len(), "syncing label routes");

        let to_delete = self
            .routes
            .label(protocol)
            .map(|cached| {
                cached
                    .keys()
                    .filter(|label| !routes.contains_key(*label))
                    .copied()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        for label in to_delete {
            let Some(cached) = self
                .routes
                .label(protocol)
                .and_then(|routes| routes.get(&label))
                .cloned()
            else {
                continue;
            };
            self.delete_label_route(cached).await?;
        }

        for (_, route) in routes {
            self.add_update_label_route(route).await?;
        }
        Ok(())
    }

    // Converges one protocol's link scope slice onto the desired route set.
    //
    // Deletes and adds go straight to the transport and the cached slice is
    // swapped wholesale afterwards. A kernel failure aborts the remaining
    // work with the swap not yet applied, so the cache lags the partially
    // updated kernel until the caller retries the full sync.
    pub(crate) async fn sync_link_routes(
        &mut self,
        protocol: u8,
        routes: LinkRoutes,
    ) -> Result<(), Error> {
        debug!(%protocol, count = routes.len(), "syncing link routes");

        let to_delete = self
            .routes
            .link(protocol)
            .map(|cached| {
                cached
                    .keys()
                    .filter(|key| !routes.contains_key(*key))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        for key in to_delete {
            let Some(cached) = self
                .routes
                .link(protocol)
                .and_then(|routes| routes.get(&key))
                .cloned()
            else {
                continue;
            };
            if let Err(error) = self.channel.route_del(&cached).await {
                return Err(Error::RouteUninstall(cached.destination, error));
            }
        }

        for (key, route) in routes.iter() {
            if self
                .routes
                .link(protocol)
                .is_some_and(|cached| cached.contains_key(key))
            {
                continue;
            }
            if let Err(error) = self.channel.route_add(route, true).await {
                return Err(Error::RouteInstall(route.destination, error));
            }
        }

        *self.routes.link_mut(protocol) = routes;
        Ok(())
    }

    pub(crate) async fn add_address(
        &mut self,
        addr: IfAddress,
    ) -> Result<(), Error> {
        debug!(prefix = %addr.prefix, ifindex = %addr.ifindex, "adding interface address");
        match self.channel.addr_add(&addr).await {
            Ok(()) => Ok(()),
            // A duplicate add is as good as done.
            Err(error) if error.is_exist() => {
                debug!(prefix = %addr.prefix, "address already present");
                Ok(())
            }
            Err(error) => Err(Error::AddressInstall(addr.prefix, error)),
        }
    }

    pub(crate) async fn delete_address(
        &mut self,
        addr: IfAddress,
    ) -> Result<(), Error> {
        debug!(prefix = %addr.prefix, ifindex = %addr.ifindex, "deleting interface address");
        match self.channel.addr_del(&addr).await {
            Ok(()) => Ok(()),
            Err(error) if error.is_noaddr() => {
                debug!(prefix = %addr.prefix, "address was not present");
                Ok(())
            }
            Err(error) => Err(Error::AddressUninstall(addr.prefix, error)),
        }
    }

    // Converges the addresses of one interface, restricted to the given
    // family and scope, onto the desired set. Adds are applied before
    // deletes so the interface never passes through the zero-address state
    // that would take it down.
    pub(crate) async fn sync_addresses(
        &mut self,
        ifindex: u32,
        addrs: Vec<IfAddress>,
        family: Option<AddressFamily>,
        scope: Option<RouteScope>,
    ) -> Result<(), Error> {
        for addr in &addrs {
            if addr.ifindex != ifindex {
                return Err(Error::AddressIfindexMismatch {
                    expected: ifindex,
                    found: addr.ifindex,
                });
            }
        }

        let current = self.get_addresses(ifindex, family, scope).await?;
        let desired =
            addrs.iter().map(|addr| addr.prefix).collect::<BTreeSet<_>>();
        let to_delete = current
            .into_iter()
            .filter(|addr| !desired.contains(&addr.prefix))
            .collect::<Vec<_>>();

        for addr in addrs {
            self.add_address(addr).await?;
        }
        for addr in to_delete {
            self.delete_address(addr).await?;
        }
        Ok(())
    }

    // Reads the interface's current addresses from the kernel.
    pub(crate) async fn get_addresses(
        &mut self,
        ifindex: u32,
        family: Option<AddressFamily>,
        scope: Option<RouteScope>,
    ) -> Result<Vec<IfAddress>, Error> {
        let msgs = self
            .channel
            .dump(ObjectCategory::Address)
            .await
            .map_err(|error| {
                Error::CacheRefill(ObjectCategory::Address, error)
            })?;

        Ok(msgs
            .into_iter()
            .filter_map(|msg| msg.object.into_address().ok())
            .filter(|addr| addr.ifindex == ifindex)
            .filter(|addr| {
                family.map_or(true, |family| addr.family() == family)
            })
            .filter(|addr| scope.map_or(true, |scope| addr.scope == scope))
            .collect())
    }

    // Pulls one object category from the kernel and primes the caches with
    // it, without waking subscribers.
    pub(crate) async fn refill(
        &mut self,
        category: ObjectCategory,
    ) -> Result<(), Error> {
        let msgs = self
            .channel
            .dump(category)
            .await
            .map_err(|error| Error::CacheRefill(category, error))?;
        for msg in msgs {
            events::process_event(self, msg, false);
        }
        Ok(())
    }

    pub(crate) async fn get_all_links(
        &mut self,
    ) -> Result<BTreeMap<String, Link>, Error> {
        self.refill(ObjectCategory::Link).await?;
        self.refill(ObjectCategory::Address).await?;
        Ok(self.links.all())
    }

    pub(crate) async fn get_all_reachable_neighbors(
        &mut self,
    ) -> Result<BTreeMap<(String, IpAddr), Neighbor>, Error> {
        // Neighbor keys carry interface names, refresh the link cache
        // first.
        self.refill(ObjectCategory::Link).await?;
        self.refill(ObjectCategory::Address).await?;
        self.refill(ObjectCategory::Neighbor).await?;
        Ok(self.neighbors.all())
    }

    fn check_multicast_route(
        &self,
        route: &Route,
    ) -> Result<(IpNetwork, String), Error> {
        let Some(prefix) = route.destination.as_prefix() else {
            return Err(Error::RoutePrefixMissing);
        };
        if !prefix.ip().is_multicast() {
            return Err(Error::InvalidMulticastPrefix(*prefix));
        }
        let ifname = route
            .first_nexthop_ifindex()
            .and_then(|ifindex| self.links.name_by_ifindex(ifindex))
            .ok_or(Error::MulticastInterfaceMissing(*prefix))?;
        Ok((*prefix, ifname.to_owned()))
    }
}

// ===== helper functions =====

// Multicast and link-local destinations never go through the unicast path.
fn check_unicast_route(route: &Route) -> Result<IpNetwork, Error> {
    let Some(prefix) = route.destination.as_prefix() else {
        return Err(Error::RoutePrefixMissing);
    };
    if prefix.ip().is_multicast() || prefix.ip().is_link_local() {
        return Err(Error::InvalidUnicastPrefix(*prefix));
    }
    Ok(*prefix)
}
