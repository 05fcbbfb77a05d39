//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::IpNetwork;
use tracing::{error, warn};

use crate::route::{RouteDestination, RouteType};
use crate::transport::{KernelError, ObjectCategory};

// Fiblink errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    // Record validation
    RouteDestinationMissing,
    RouteNexthopIncomplete,
    RoutePrefixMissing,
    RouteLabelMissing,
    UnsupportedRouteType(RouteType),
    InvalidUnicastPrefix(IpNetwork),
    InvalidMulticastPrefix(IpNetwork),
    MulticastInterfaceMissing(IpNetwork),
    AddressIfindexMissing,
    AddressPrefixMissing,
    AddressIfindexMismatch { expected: u32, found: u32 },
    NeighborIfindexMissing,
    NeighborDestinationMissing,
    // Kernel requests
    RouteInstall(RouteDestination, KernelError),
    RouteUninstall(RouteDestination, KernelError),
    AddressInstall(IpNetwork, KernelError),
    AddressUninstall(IpNetwork, KernelError),
    CacheRefill(ObjectCategory, KernelError),
    // The agent task is gone
    Terminated,
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::RouteDestinationMissing
            | Error::RouteNexthopIncomplete
            | Error::RoutePrefixMissing
            | Error::RouteLabelMissing
            | Error::AddressIfindexMissing
            | Error::AddressPrefixMissing
            | Error::NeighborIfindexMissing
            | Error::NeighborDestinationMissing => {
                warn!("{}", self);
            }
            Error::UnsupportedRouteType(route_type) => {
                warn!(%route_type, "{}", self);
            }
            Error::InvalidUnicastPrefix(prefix)
            | Error::InvalidMulticastPrefix(prefix)
            | Error::MulticastInterfaceMissing(prefix) => {
                warn!(%prefix, "{}", self);
            }
            Error::AddressIfindexMismatch { expected, found } => {
                warn!(%expected, %found, "{}", self);
            }
            Error::RouteInstall(destination, error)
            | Error::RouteUninstall(destination, error) => {
                error!(%destination, %error, "{}", self);
            }
            Error::AddressInstall(prefix, error)
            | Error::AddressUninstall(prefix, error) => {
                error!(%prefix, %error, "{}", self);
            }
            Error::CacheRefill(category, error) => {
                error!(%category, %error, "{}", self);
            }
            Error::Terminated => {
                warn!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::RouteDestinationMissing => {
                write!(f, "route destination must be set")
            }
            Error::RouteNexthopIncomplete => {
                write!(f, "nexthop needs an interface or a gateway")
            }
            Error::RoutePrefixMissing => {
                write!(f, "route carries no IP prefix")
            }
            Error::RouteLabelMissing => {
                write!(f, "route carries no MPLS label")
            }
            Error::UnsupportedRouteType(..) => {
                write!(f, "unsupported route type")
            }
            Error::InvalidUnicastPrefix(..) => {
                write!(f, "invalid prefix for unicast route")
            }
            Error::InvalidMulticastPrefix(..) => {
                write!(f, "invalid prefix for multicast route")
            }
            Error::MulticastInterfaceMissing(..) => {
                write!(f, "multicast route needs a known egress interface")
            }
            Error::AddressIfindexMissing => {
                write!(f, "address ifindex must be set")
            }
            Error::AddressPrefixMissing => {
                write!(f, "address prefix must be set")
            }
            Error::AddressIfindexMismatch { .. } => {
                write!(f, "address ifindex differs from the sync target")
            }
            Error::NeighborIfindexMissing => {
                write!(f, "neighbor ifindex must be set")
            }
            Error::NeighborDestinationMissing => {
                write!(f, "neighbor destination must be set")
            }
            Error::RouteInstall(..) => {
                write!(f, "failed to install route")
            }
            Error::RouteUninstall(..) => {
                write!(f, "failed to uninstall route")
            }
            Error::AddressInstall(..) => {
                write!(f, "failed to install interface address")
            }
            Error::AddressUninstall(..) => {
                write!(f, "failed to uninstall interface address")
            }
            Error::CacheRefill(..) => {
                write!(f, "failed to refill cache")
            }
            Error::Terminated => {
                write!(f, "agent task has terminated")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::RouteInstall(_, error)
            | Error::RouteUninstall(_, error)
            | Error::AddressInstall(_, error)
            | Error::AddressUninstall(_, error)
            | Error::CacheRefill(_, error) => Some(error),
            _ => None,
        }
    }
}
