//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

use fiblink_utils::ip::{AddressFamily, IpNetworkExt};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::route::RouteScope;

// Interface address record.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct IfAddress {
    pub ifindex: u32,
    pub prefix: IpNetwork,
    pub scope: RouteScope,
}

// Interface address builder.
#[derive(Clone, Debug, Default)]
pub struct IfAddressBuilder {
    ifindex: Option<u32>,
    prefix: Option<IpNetwork>,
    scope: Option<RouteScope>,
}

// ===== impl IfAddress =====

impl IfAddress {
    pub fn builder() -> IfAddressBuilder {
        IfAddressBuilder::default()
    }

    pub fn family(&self) -> AddressFamily {
        self.prefix.address_family()
    }
}

// ===== impl IfAddressBuilder =====

impl IfAddressBuilder {
    pub fn ifindex(mut self, ifindex: u32) -> Self {
        self.ifindex = Some(ifindex);
        self
    }

    pub fn prefix(mut self, prefix: IpNetwork) -> Self {
        self.prefix = Some(prefix);
        self
    }

    pub fn scope(mut self, scope: RouteScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn build(self) -> Result<IfAddress, Error> {
        let ifindex = self.ifindex.ok_or(Error::AddressIfindexMissing)?;
        let prefix = self.prefix.ok_or(Error::AddressPrefixMissing)?;

        Ok(IfAddress {
            ifindex,
            prefix,
            scope: self.scope.unwrap_or(RouteScope::Universe),
        })
    }
}
