//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// Neighbor reachability state (NUD_* kernel codes).
pub const NUD_REACHABLE: u16 = 0x02;

// Neighbor record.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Neighbor {
    pub ifindex: u32,
    pub destination: IpAddr,
    pub link_address: Option<[u8; 6]>,
    pub state: u16,
}

// Neighbor builder.
#[derive(Clone, Debug, Default)]
pub struct NeighborBuilder {
    ifindex: Option<u32>,
    destination: Option<IpAddr>,
    link_address: Option<[u8; 6]>,
    state: u16,
}

// Neighbor cache, keyed by interface name and destination address.
//
// Only reachable neighbors are retained.
#[derive(Debug, Default)]
pub struct Neighbors {
    entries: BTreeMap<(String, IpAddr), Neighbor>,
}

// ===== impl Neighbor =====

impl Neighbor {
    pub fn builder() -> NeighborBuilder {
        NeighborBuilder::default()
    }

    pub fn is_reachable(&self) -> bool {
        self.state & NUD_REACHABLE != 0
    }
}

// ===== impl NeighborBuilder =====

impl NeighborBuilder {
    pub fn ifindex(mut self, ifindex: u32) -> Self {
        self.ifindex = Some(ifindex);
        self
    }

    pub fn destination(mut self, destination: IpAddr) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn link_address(mut self, link_address: [u8; 6]) -> Self {
        self.link_address = Some(link_address);
        self
    }

    pub fn state(mut self, state: u16) -> Self {
        self.state = state;
        self
    }

    pub fn build(self) -> Result<Neighbor, Error> {
        let ifindex = self.ifindex.ok_or(Error::NeighborIfindexMissing)?;
        let destination =
            self.destination.ok_or(Error::NeighborDestinationMissing)?;

        Ok(Neighbor {
            ifindex,
            destination,
            link_address: self.link_address,
            state: self.state,
        })
    }
}

// ===== impl Neighbors =====

impl Neighbors {
    // Replaces the entry for the neighbor's key.
    pub(crate) fn update(&mut self, ifname: String, neighbor: Neighbor) {
        self.entries
            .insert((ifname, neighbor.destination), neighbor);
    }

    pub(crate) fn remove(&mut self, ifname: &str, destination: IpAddr) {
        self.entries.remove(&(ifname.to_owned(), destination));
    }

    // Drops every neighbor learned on the given interface.
    pub(crate) fn purge_interface(&mut self, ifname: &str) {
        self.entries.retain(|(name, _), _| name != ifname);
    }

    pub(crate) fn all(&self) -> BTreeMap<(String, IpAddr), Neighbor> {
        self.entries.clone()
    }
}
