//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use fiblink_utils::mpls::Label;
use ipnetwork::IpNetwork;

use crate::route::Route;

// One protocol's slice of each route category.
pub type UnicastRoutes = BTreeMap<IpNetwork, Route>;
pub type MulticastRoutes = BTreeMap<(IpNetwork, String), Route>;
pub type LinkRoutes = BTreeMap<(IpNetwork, String), Route>;
pub type LabelRoutes = BTreeMap<Label, Route>;

// Mirrored route state, partitioned per category because the identity of a
// route depends on it: unicast and blackhole routes are keyed by prefix,
// multicast and link-scope routes by prefix and egress interface, label
// routes by MPLS label. Each partition is subdivided by protocol tag so
// multiple control planes can share the kernel tables.
#[derive(Debug, Default)]
pub struct RouteCache {
    unicast: BTreeMap<u8, UnicastRoutes>,
    multicast: BTreeMap<u8, MulticastRoutes>,
    link: BTreeMap<u8, LinkRoutes>,
    label: BTreeMap<u8, LabelRoutes>,
}

// ===== impl RouteCache =====

impl RouteCache {
    pub(crate) fn unicast(&self, protocol: u8) -> Option<&UnicastRoutes> {
        self.unicast.get(&protocol)
    }

    pub(crate) fn unicast_mut(&mut self, protocol: u8) -> &mut UnicastRoutes {
        self.unicast.entry(protocol).or_default()
    }

    pub(crate) fn multicast(&self, protocol: u8) -> Option<&MulticastRoutes> {
        self.multicast.get(&protocol)
    }

    pub(crate) fn multicast_mut(
        &mut self,
        protocol: u8,
    ) -> &mut MulticastRoutes {
        self.multicast.entry(protocol).or_default()
    }

    pub(crate) fn link(&self, protocol: u8) -> Option<&LinkRoutes> {
        self.link.get(&protocol)
    }

    pub(crate) fn link_mut(&mut self, protocol: u8) -> &mut LinkRoutes {
        self.link.entry(protocol).or_default()
    }

    pub(crate) fn label(&self, protocol: u8) -> Option<&LabelRoutes> {
        self.label.get(&protocol)
    }

    pub(crate) fn label_mut(&mut self, protocol: u8) -> &mut LabelRoutes {
        self.label.entry(protocol).or_default()
    }

    // Number of cached unicast routes across all protocols.
    pub(crate) fn route_count(&self) -> i64 {
        self.unicast.values().map(|routes| routes.len() as i64).sum()
    }

    // Number of cached label routes across all protocols.
    pub(crate) fn label_route_count(&self) -> i64 {
        self.label.values().map(|routes| routes.len() as i64).sum()
    }
}
