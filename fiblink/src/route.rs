//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use enum_as_inner::EnumAsInner;
use fiblink_utils::ip::{AddressFamily, IpNetworkExt};
use fiblink_utils::mpls::Label;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::error::Error;

// Protocol tag attached to routes installed by this agent, as seen in the
// rtnetlink.h kernel header ("rtm_protocol").
pub const DEFAULT_PROTOCOL_ID: u8 = 99;

// Routing table identifiers as defined in the rtnetlink.h kernel header.
pub const RT_TABLE_MAIN: u8 = 254;

// Kernel flag marking routes cloned from another entry.
pub const RTM_F_CLONED: u32 = 0x200;

// Route types as defined in the rtnetlink.h kernel header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RouteType {
    Unicast,
    Multicast,
    Blackhole,
}

// Route scopes as defined in the rtnetlink.h kernel header.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum RouteScope {
    Universe,
    Site,
    Link,
    Host,
    Nowhere,
}

// Route destination.
//
// IP routes are keyed by destination prefix, label routes by their 20-bit
// MPLS label.
#[derive(Clone, Copy, Debug, EnumAsInner, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum RouteDestination {
    Prefix(IpNetwork),
    Label(Label),
}

// Route record.
//
// Immutable after construction through [`RouteBuilder`]. The `valid` flag is
// cleared on routes carried by delete notifications so subscribers see the
// pre-delete shape; it does not participate in equality.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct Route {
    pub destination: RouteDestination,
    pub route_type: RouteType,
    pub table: u8,
    pub protocol: u8,
    pub scope: RouteScope,
    pub flags: Option<u32>,
    pub priority: Option<u32>,
    pub tos: Option<u8>,
    pub nexthops: Vec<Nexthop>,
    pub valid: bool,
}

// Route nexthop.
//
// Carries at least one of egress interface and gateway address.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Nexthop {
    pub ifindex: Option<u32>,
    pub gateway: Option<IpAddr>,
    pub weight: Option<u8>,
}

// Route builder.
#[derive(Clone, Debug)]
pub struct RouteBuilder {
    destination: Option<RouteDestination>,
    route_type: RouteType,
    table: u8,
    protocol: u8,
    scope: RouteScope,
    flags: Option<u32>,
    priority: Option<u32>,
    tos: Option<u8>,
    nexthops: Vec<Nexthop>,
    valid: bool,
}

// Nexthop builder.
#[derive(Clone, Debug, Default)]
pub struct NexthopBuilder {
    ifindex: Option<u32>,
    gateway: Option<IpAddr>,
    weight: Option<u8>,
}

// ===== impl RouteType =====

impl RouteType {
    // Returns the corresponding RTN_* kernel code.
    pub(crate) fn to_rtn(self) -> u8 {
        match self {
            RouteType::Unicast => 1,
            RouteType::Multicast => 5,
            RouteType::Blackhole => 6,
        }
    }

    // Maps an RTN_* kernel code to a route type.
    pub(crate) fn from_rtn(rtn: u8) -> Option<RouteType> {
        match rtn {
            1 => Some(RouteType::Unicast),
            5 => Some(RouteType::Multicast),
            6 => Some(RouteType::Blackhole),
            _ => None,
        }
    }
}

impl std::fmt::Display for RouteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteType::Unicast => write!(f, "unicast"),
            RouteType::Multicast => write!(f, "multicast"),
            RouteType::Blackhole => write!(f, "blackhole"),
        }
    }
}

// ===== impl RouteScope =====

impl RouteScope {
    // Returns the corresponding RT_SCOPE_* kernel code.
    pub(crate) fn to_rt(self) -> u8 {
        match self {
            RouteScope::Universe => 0,
            RouteScope::Site => 200,
            RouteScope::Link => 253,
            RouteScope::Host => 254,
            RouteScope::Nowhere => 255,
        }
    }

    // Maps an RT_SCOPE_* kernel code to a route scope.
    pub(crate) fn from_rt(scope: u8) -> Option<RouteScope> {
        match scope {
            0 => Some(RouteScope::Universe),
            200 => Some(RouteScope::Site),
            253 => Some(RouteScope::Link),
            254 => Some(RouteScope::Host),
            255 => Some(RouteScope::Nowhere),
            _ => None,
        }
    }
}

impl std::fmt::Display for RouteScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteScope::Universe => write!(f, "universe"),
            RouteScope::Site => write!(f, "site"),
            RouteScope::Link => write!(f, "link"),
            RouteScope::Host => write!(f, "host"),
            RouteScope::Nowhere => write!(f, "nowhere"),
        }
    }
}

// ===== impl RouteDestination =====

impl std::fmt::Display for RouteDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteDestination::Prefix(prefix) => prefix.fmt(f),
            RouteDestination::Label(label) => label.fmt(f),
        }
    }
}

// ===== impl Route =====

impl Route {
    pub fn builder() -> RouteBuilder {
        RouteBuilder::default()
    }

    // Returns the address family of IP routes.
    pub fn family(&self) -> Option<AddressFamily> {
        self.destination
            .as_prefix()
            .map(|prefix| prefix.address_family())
    }

    // Returns the egress interface of the first nexthop.
    pub(crate) fn first_nexthop_ifindex(&self) -> Option<u32> {
        self.nexthops.first().and_then(|nexthop| nexthop.ifindex)
    }

    pub(crate) fn is_cloned(&self) -> bool {
        self.flags.unwrap_or(0) & RTM_F_CLONED != 0
    }
}

impl PartialEq for Route {
    // The `valid` flag tracks the event that carried the route, not the
    // route itself, and is left out of the comparison.
    fn eq(&self, other: &Route) -> bool {
        self.destination == other.destination
            && self.route_type == other.route_type
            && self.table == other.table
            && self.protocol == other.protocol
            && self.scope == other.scope
            && self.flags == other.flags
            && self.priority == other.priority
            && self.tos == other.tos
            && self.nexthops == other.nexthops
    }
}

impl Eq for Route {}

// ===== impl RouteBuilder =====

impl RouteBuilder {
    pub fn destination(mut self, prefix: IpNetwork) -> Self {
        self.destination = Some(RouteDestination::Prefix(prefix.apply_mask()));
        self
    }

    pub fn label(mut self, label: Label) -> Self {
        self.destination = Some(RouteDestination::Label(label));
        self
    }

    pub fn route_type(mut self, route_type: RouteType) -> Self {
        self.route_type = route_type;
        self
    }

    pub fn table(mut self, table: u8) -> Self {
        self.table = table;
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn scope(mut self, scope: RouteScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn tos(mut self, tos: u8) -> Self {
        self.tos = Some(tos);
        self
    }

    pub fn nexthop(mut self, nexthop: Nexthop) -> Self {
        self.nexthops.push(nexthop);
        self
    }

    pub fn valid(mut self, valid: bool) -> Self {
        self.valid = valid;
        self
    }

    pub fn build(self) -> Result<Route, Error> {
        let destination =
            self.destination.ok_or(Error::RouteDestinationMissing)?;

        Ok(Route {
            destination,
            route_type: self.route_type,
            table: self.table,
            protocol: self.protocol,
            scope: self.scope,
            flags: self.flags,
            priority: self.priority,
            tos: self.tos,
            nexthops: self.nexthops,
            valid: self.valid,
        })
    }
}

impl Default for RouteBuilder {
    fn default() -> RouteBuilder {
        RouteBuilder {
            destination: None,
            route_type: RouteType::Unicast,
            table: RT_TABLE_MAIN,
            protocol: DEFAULT_PROTOCOL_ID,
            scope: RouteScope::Universe,
            flags: None,
            priority: None,
            tos: None,
            nexthops: Vec::new(),
            valid: true,
        }
    }
}

// ===== impl Nexthop =====

impl Nexthop {
    pub fn builder() -> NexthopBuilder {
        NexthopBuilder::default()
    }
}

// ===== impl NexthopBuilder =====

impl NexthopBuilder {
    pub fn ifindex(mut self, ifindex: u32) -> Self {
        self.ifindex = Some(ifindex);
        self
    }

    pub fn gateway(mut self, gateway: IpAddr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn weight(mut self, weight: u8) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn build(self) -> Result<Nexthop, Error> {
        if self.ifindex.is_none() && self.gateway.is_none() {
            return Err(Error::RouteNexthopIncomplete);
        }

        Ok(Nexthop {
            ifindex: self.ifindex,
            gateway: self.gateway,
            weight: self.weight,
        })
    }
}

// ===== tests =====
