//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};

// Address family.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

// Extension methods for IpAddr.
pub trait IpAddrExt {
    // Returns length of the IP address in bytes.
    fn length(&self) -> usize;

    // Returns vector of bytes that make up this address.
    fn bytes(&self) -> Vec<u8>;

    // Returns the address family of this address.
    fn address_family(&self) -> AddressFamily;

    // Returns true if this is a link-local address.
    fn is_link_local(&self) -> bool;
}

// Extension methods for IpNetwork.
pub trait IpNetworkExt {
    // Apply mask to prefix.
    #[must_use]
    fn apply_mask(&self) -> IpNetwork;

    // Returns the address family of this network.
    fn address_family(&self) -> AddressFamily;
}

// ===== impl AddressFamily =====

impl AddressFamily {
    // Returns the corresponding AF_* socket constant.
    pub fn to_af(self) -> u8 {
        match self {
            AddressFamily::Ipv4 => libc::AF_INET as u8,
            AddressFamily::Ipv6 => libc::AF_INET6 as u8,
        }
    }

    // Maps an AF_* socket constant to an address family.
    pub fn from_af(af: u8) -> Option<AddressFamily> {
        match af as i32 {
            libc::AF_INET => Some(AddressFamily::Ipv4),
            libc::AF_INET6 => Some(AddressFamily::Ipv6),
            _ => None,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6"),
        }
    }
}

// ===== impl IpAddr =====

impl IpAddrExt for IpAddr {
    fn length(&self) -> usize {
        match self {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 16,
        }
    }

    fn bytes(&self) -> Vec<u8> {
        match self {
            IpAddr::V4(addr) => addr.octets().to_vec(),
            IpAddr::V6(addr) => addr.octets().to_vec(),
        }
    }

    fn address_family(&self) -> AddressFamily {
        match self {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn is_link_local(&self) -> bool {
        match self {
            IpAddr::V4(addr) => addr.is_link_local(),
            // fe80::/10
            IpAddr::V6(addr) => (addr.segments()[0] & 0xffc0) == 0xfe80,
        }
    }
}

// ===== impl IpNetwork =====

impl IpNetworkExt for IpNetwork {
    fn apply_mask(&self) -> IpNetwork {
        match self {
            IpNetwork::V4(network) => {
                let network = Ipv4Network::new(
                    Ipv4Addr::from(
                        u32::from(network.ip()) & u32::from(network.mask()),
                    ),
                    network.prefix(),
                )
                .unwrap();
                IpNetwork::V4(network)
            }
            IpNetwork::V6(network) => {
                let network = Ipv6Network::new(
                    Ipv6Addr::from(
                        u128::from(network.ip()) & u128::from(network.mask()),
                    ),
                    network.prefix(),
                )
                .unwrap();
                IpNetwork::V6(network)
            }
        }
    }

    fn address_family(&self) -> AddressFamily {
        match self {
            IpNetwork::V4(_) => AddressFamily::Ipv4,
            IpNetwork::V6(_) => AddressFamily::Ipv6,
        }
    }
}
