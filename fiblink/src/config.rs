//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::Deserialize;

use crate::netlink;

// Agent configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // Receive buffer size applied to both netlink sockets. Bulk route
    // events overflow the kernel default of 32 KiB.
    pub rcvbuf_size: usize,
    // rtnetlink multicast groups mirrored by the subscription socket.
    pub groups: Vec<u32>,
    // Whether MPLS label routes are programmed.
    pub label_routes: bool,
}

// ===== impl Config =====

impl Default for Config {
    fn default() -> Config {
        Config {
            rcvbuf_size: 2 * 1024 * 1024,
            groups: netlink::DEFAULT_GROUPS.to_vec(),
            label_routes: true,
        }
    }
}
