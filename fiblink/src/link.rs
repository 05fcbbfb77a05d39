//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

// Link record.
//
// `addresses` holds the prefixes observed on the interface through address
// notifications and refills.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Link {
    pub name: String,
    pub ifindex: u32,
    pub up: bool,
    pub loopback: bool,
    pub addresses: BTreeSet<IpNetwork>,
}

// Link cache.
#[derive(Debug, Default)]
pub struct Links {
    // Link records keyed by name (1:1).
    entries: BTreeMap<String, Link>,
    // Name lookup by ifindex (1:1).
    names: HashMap<u32, String>,
    // Last seen loopback interface.
    loopback_ifindex: Option<u32>,
}

// ===== impl Links =====

impl Links {
    // Adds or updates a link, preserving the observed address set.
    pub(crate) fn update(&mut self, link: Link) -> &Link {
        if link.loopback {
            self.loopback_ifindex = Some(link.ifindex);
        }

        // An ifindex reassigned to a renamed interface leaves a stale name
        // entry behind; drop it.
        if let Some(old_name) = self.names.get(&link.ifindex) {
            if *old_name != link.name {
                let old_name = old_name.clone();
                self.entries.remove(&old_name);
            }
        }
        self.names.insert(link.ifindex, link.name.clone());

        let entry =
            self.entries.entry(link.name.clone()).or_insert_with(|| Link {
                name: link.name.clone(),
                ifindex: link.ifindex,
                up: link.up,
                loopback: link.loopback,
                addresses: Default::default(),
            });
        entry.ifindex = link.ifindex;
        entry.up = link.up;
        entry.loopback = link.loopback;
        entry
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Link> {
        let link = self.entries.remove(name)?;
        self.names.remove(&link.ifindex);
        if self.loopback_ifindex == Some(link.ifindex) {
            self.loopback_ifindex = None;
        }
        Some(link)
    }

    pub(crate) fn name_by_ifindex(&self, ifindex: u32) -> Option<&str> {
        self.names.get(&ifindex).map(|name| name.as_str())
    }

    pub(crate) fn ifindex_by_name(&self, name: &str) -> Option<u32> {
        self.entries.get(name).map(|link| link.ifindex)
    }

    pub(crate) fn loopback_ifindex(&self) -> Option<u32> {
        self.loopback_ifindex
    }

    // Records an address on its owning link, returning the link name.
    pub(crate) fn addr_add(
        &mut self,
        ifindex: u32,
        prefix: IpNetwork,
    ) -> Option<String> {
        let name = self.names.get(&ifindex)?.clone();
        if let Some(link) = self.entries.get_mut(&name) {
            link.addresses.insert(prefix);
        }
        Some(name)
    }

    // Removes an address from its owning link, returning the link name.
    pub(crate) fn addr_del(
        &mut self,
        ifindex: u32,
        prefix: IpNetwork,
    ) -> Option<String> {
        let name = self.names.get(&ifindex)?.clone();
        if let Some(link) = self.entries.get_mut(&name) {
            link.addresses.remove(&prefix);
        }
        Some(name)
    }

    pub(crate) fn all(&self) -> BTreeMap<String, Link> {
        self.entries.clone()
    }
}
