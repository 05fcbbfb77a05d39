//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::IfAddress;
use crate::events::EventMsg;
use crate::route::Route;

// Kernel object categories mirrored by the agent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ObjectCategory {
    Route,
    Link,
    Address,
    Neighbor,
}

// Errno carried by a failed kernel request.
//
// Stored as a positive errno value. Only the sentinels below are inspected
// by identity; every other code is surfaced to the caller as is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct KernelError(pub i32);

// Duplex channel to the kernel routing stack.
//
// The request methods map one to one onto RTM_NEW*/RTM_DEL* messages and
// return the kernel's acknowledgment. `dump` performs a full table walk of
// one object category and hands back parsed objects tagged with the `Get`
// action, ready to be fed through the event dispatcher.
#[async_trait]
pub trait FibChannel: Send {
    // Installs an IP route, with kernel replace semantics when requested.
    async fn route_add(
        &self,
        route: &Route,
        replace: bool,
    ) -> Result<(), KernelError>;

    // Removes an IP route.
    async fn route_del(&self, route: &Route) -> Result<(), KernelError>;

    // Installs or replaces an MPLS label route.
    async fn label_route_add(&self, route: &Route) -> Result<(), KernelError>;

    // Removes an MPLS label route.
    async fn label_route_del(&self, route: &Route) -> Result<(), KernelError>;

    // Installs an interface address.
    async fn addr_add(&self, addr: &IfAddress) -> Result<(), KernelError>;

    // Removes an interface address.
    async fn addr_del(&self, addr: &IfAddress) -> Result<(), KernelError>;

    // Dumps all kernel objects of the given category.
    async fn dump(
        &self,
        category: ObjectCategory,
    ) -> Result<Vec<EventMsg>, KernelError>;

    // Whether the channel can program MPLS label routes.
    fn supports_label_routes(&self) -> bool;
}

// ===== impl ObjectCategory =====

impl std::fmt::Display for ObjectCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectCategory::Route => write!(f, "route"),
            ObjectCategory::Link => write!(f, "link"),
            ObjectCategory::Address => write!(f, "address"),
            ObjectCategory::Neighbor => write!(f, "neighbor"),
        }
    }
}

// ===== impl KernelError =====

impl KernelError {
    // The kernel withdraws routes on its own when their egress interface
    // goes away, so deletes racing that cleanup report "no such object".
    pub fn is_not_found(&self) -> bool {
        self.0 == libc::ESRCH || self.0 == libc::ENOENT
    }

    // Duplicate address installation.
    pub fn is_exist(&self) -> bool {
        self.0 == libc::EEXIST
    }

    // Removal of an address the interface does not carry.
    pub fn is_noaddr(&self) -> bool {
        self.0 == libc::EADDRNOTAVAIL
    }
}

impl std::fmt::Display for KernelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", std::io::Error::from_raw_os_error(self.0))
    }
}

impl std::error::Error for KernelError {}
