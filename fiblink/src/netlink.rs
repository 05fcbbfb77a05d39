//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::single_match)]

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use capctl::caps::CapState;
use fiblink_utils::ip::IpAddrExt;
use fiblink_utils::mpls::Label;
use fiblink_utils::task::Task;
use futures::{StreamExt, TryStreamExt};
use ipnetwork::IpNetwork;
use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
use netlink_packet_route::constants::{
    AF_INET, AF_INET6, ARPHRD_LOOPBACK, IFF_RUNNING, RTNLGRP_IPV4_IFADDR,
    RTNLGRP_IPV4_ROUTE, RTNLGRP_IPV6_IFADDR, RTNLGRP_IPV6_ROUTE, RTNLGRP_LINK,
    RTNLGRP_NEIGH,
};
use netlink_packet_route::rtnl::RtnlMessage;
use netlink_packet_route::{
    AddressMessage, LinkMessage, NeighbourMessage, RouteMessage,
};
use netlink_sys::{AsyncSocket, SocketAddr};
use rtnetlink::{new_connection, Handle, IpVersion};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, error, trace};

use crate::address::IfAddress;
use crate::config::Config;
use crate::events::{EventAction, EventMsg, EventObject};
use crate::link::Link;
use crate::neighbor::Neighbor;
use crate::route::{Nexthop, Route, RouteDestination, RouteScope, RouteType};
use crate::transport::{FibChannel, KernelError, ObjectCategory};

// Multicast groups mirrored by default.
pub(crate) const DEFAULT_GROUPS: [u32; 6] = [
    RTNLGRP_LINK,
    RTNLGRP_IPV4_IFADDR,
    RTNLGRP_IPV6_IFADDR,
    RTNLGRP_IPV4_ROUTE,
    RTNLGRP_IPV6_ROUTE,
    RTNLGRP_NEIGH,
];

// Address family and message flags from the netlink.h and socket.h kernel
// headers.
const AF_MPLS: u16 = 28;
const NLM_F_REQUEST: u16 = 0x001;
const NLM_F_ACK: u16 = 0x004;
const NLM_F_REPLACE: u16 = 0x100;
const NLM_F_CREATE: u16 = 0x400;

// rtnetlink-backed transport: typed requests for IP routes, addresses and
// dumps, raw messages for MPLS label routes.
pub struct NetlinkChannel {
    handle: Handle,
    label_routes: bool,
}

// ===== impl NetlinkChannel =====

impl NetlinkChannel {
    async fn ip_route_add(
        &self,
        route: &Route,
        prefix: &IpNetwork,
        replace: bool,
    ) -> Result<(), KernelError> {
        // Create netlink request.
        let request = self.handle.route().add().protocol(route.protocol);

        match prefix {
            IpNetwork::V4(prefix) => {
                // Set destination prefix.
                let mut request = request
                    .v4()
                    .destination_prefix(prefix.ip(), prefix.prefix());
                if replace {
                    request = request.replace();
                }

                // Add nexthops.
                for nexthop in route.nexthops.iter() {
                    if let Some(IpAddr::V4(gateway)) = nexthop.gateway {
                        request = request.gateway(gateway);
                    }
                    if let Some(ifindex) = nexthop.ifindex {
                        request = request.output_interface(ifindex);
                    }
                }

                finish_route_message(request.message_mut(), route);

                // Execute request.
                request.execute().await.map_err(to_kernel_error)
            }
            IpNetwork::V6(prefix) => {
                // Set destination prefix.
                let mut request = request
                    .v6()
                    .destination_prefix(prefix.ip(), prefix.prefix());
                if replace {
                    request = request.replace();
                }

                // Add nexthops.
                for nexthop in route.nexthops.iter() {
                    if let Some(IpAddr::V6(gateway)) = nexthop.gateway {
                        request = request.gateway(gateway);
                    }
                    if let Some(ifindex) = nexthop.ifindex {
                        request = request.output_interface(ifindex);
                    }
                }

                finish_route_message(request.message_mut(), route);

                // Execute request.
                request.execute().await.map_err(to_kernel_error)
            }
        }
    }

    async fn ip_route_del(
        &self,
        route: &Route,
        prefix: &IpNetwork,
    ) -> Result<(), KernelError> {
        // Create netlink request.
        let request = self.handle.route().add().protocol(route.protocol);

        match prefix {
            IpNetwork::V4(prefix) => {
                // Set destination prefix.
                let mut request = request
                    .v4()
                    .destination_prefix(prefix.ip(), prefix.prefix());
                finish_route_message(request.message_mut(), route);

                // Execute request.
                let request =
                    self.handle.route().del(request.message_mut().clone());
                request.execute().await.map_err(to_kernel_error)
            }
            IpNetwork::V6(prefix) => {
                // Set destination prefix.
                let mut request = request
                    .v6()
                    .destination_prefix(prefix.ip(), prefix.prefix());
                finish_route_message(request.message_mut(), route);

                // Execute request.
                let request =
                    self.handle.route().del(request.message_mut().clone());
                request.execute().await.map_err(to_kernel_error)
            }
        }
    }

    // Label routes are not covered by the typed request builders; build
    // the AF_MPLS message by hand and push it through the raw channel.
    async fn mpls_request(
        &self,
        route: &Route,
        add: bool,
    ) -> Result<(), KernelError> {
        use netlink_packet_route::route::nlas::Nla;

        let Some(label) = route.destination.as_label().copied() else {
            return Err(KernelError(libc::EINVAL));
        };

        let mut message = RouteMessage::default();
        message.header.address_family = AF_MPLS as u8;
        message.header.destination_prefix_length = 20;
        message.header.table = route.table;
        message.header.protocol = route.protocol;
        message.header.scope = route.scope.to_rt();
        message.header.kind = route.route_type.to_rtn();
        message.nlas.push(Nla::Destination(mpls_label_bytes(label)));
        if add {
            for nexthop in route.nexthops.iter() {
                if let Some(ifindex) = nexthop.ifindex {
                    message.nlas.push(Nla::Oif(ifindex));
                }
                if let Some(gateway) = &nexthop.gateway {
                    message.nlas.push(Nla::Via(via_bytes(gateway)));
                }
            }
        }

        let mut request = if add {
            NetlinkMessage::from(RtnlMessage::NewRoute(message))
        } else {
            NetlinkMessage::from(RtnlMessage::DelRoute(message))
        };
        request.header.flags = if add {
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_REPLACE
        } else {
            NLM_F_REQUEST | NLM_F_ACK
        };
        request.finalize();

        let mut handle = self.handle.clone();
        let mut response = handle.request(request).map_err(to_kernel_error)?;
        while let Some(message) = response.next().await {
            if let NetlinkPayload::Error(err) = message.payload {
                if err.code != 0 {
                    return Err(KernelError(-err.code));
                }
            }
        }
        Ok(())
    }

    async fn dump_routes(&self) -> Result<Vec<EventMsg>, KernelError> {
        let mut entries = Vec::new();
        for ip_version in [IpVersion::V4, IpVersion::V6] {
            let mut routes = self.handle.route().get(ip_version).execute();
            while let Some(msg) =
                routes.try_next().await.map_err(to_kernel_error)?
            {
                if let Some(msg) = parse_route(msg, EventAction::Get) {
                    entries.push(msg);
                }
            }
        }
        Ok(entries)
    }

    async fn dump_links(&self) -> Result<Vec<EventMsg>, KernelError> {
        let mut entries = Vec::new();
        let mut links = self.handle.link().get().execute();
        while let Some(msg) = links.try_next().await.map_err(to_kernel_error)?
        {
            if let Some(msg) = parse_link(msg, EventAction::Get) {
                entries.push(msg);
            }
        }
        Ok(entries)
    }

    async fn dump_addresses(&self) -> Result<Vec<EventMsg>, KernelError> {
        let mut entries = Vec::new();
        let mut addresses = self.handle.address().get().execute();
        while let Some(msg) =
            addresses.try_next().await.map_err(to_kernel_error)?
        {
            if let Some(msg) = parse_addr(msg, EventAction::Get) {
                entries.push(msg);
            }
        }
        Ok(entries)
    }

    async fn dump_neighbors(&self) -> Result<Vec<EventMsg>, KernelError> {
        let mut entries = Vec::new();
        let mut neighbors = self.handle.neighbours().get().execute();
        while let Some(msg) =
            neighbors.try_next().await.map_err(to_kernel_error)?
        {
            if let Some(msg) = parse_neighbour(msg, EventAction::Get) {
                entries.push(msg);
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl FibChannel for NetlinkChannel {
    async fn route_add(
        &self,
        route: &Route,
        replace: bool,
    ) -> Result<(), KernelError> {
        match &route.destination {
            RouteDestination::Prefix(prefix) => {
                self.ip_route_add(route, prefix, replace).await
            }
            RouteDestination::Label(_) => self.mpls_request(route, true).await,
        }
    }

    async fn route_del(&self, route: &Route) -> Result<(), KernelError> {
        match &route.destination {
            RouteDestination::Prefix(prefix) => {
                self.ip_route_del(route, prefix).await
            }
            RouteDestination::Label(_) => {
                self.mpls_request(route, false).await
            }
        }
    }

    async fn label_route_add(
        &self,
        route: &Route,
    ) -> Result<(), KernelError> {
        self.mpls_request(route, true).await
    }

    async fn label_route_del(
        &self,
        route: &Route,
    ) -> Result<(), KernelError> {
        self.mpls_request(route, false).await
    }

    async fn addr_add(&self, addr: &IfAddress) -> Result<(), KernelError> {
        // Create netlink request.
        let mut request = self.handle.address().add(
            addr.ifindex,
            addr.prefix.ip(),
            addr.prefix.prefix(),
        );
        request.message_mut().header.scope = addr.scope.to_rt();

        // Execute request.
        request.execute().await.map_err(to_kernel_error)
    }

    async fn addr_del(&self, addr: &IfAddress) -> Result<(), KernelError> {
        // Create netlink request.
        let mut request = self.handle.address().add(
            addr.ifindex,
            addr.prefix.ip(),
            addr.prefix.prefix(),
        );
        request.message_mut().header.scope = addr.scope.to_rt();

        // Execute request.
        let request =
            self.handle.address().del(request.message_mut().clone());
        request.execute().await.map_err(to_kernel_error)
    }

    async fn dump(
        &self,
        category: ObjectCategory,
    ) -> Result<Vec<EventMsg>, KernelError> {
        match category {
            ObjectCategory::Route => self.dump_routes().await,
            ObjectCategory::Link => self.dump_links().await,
            ObjectCategory::Address => self.dump_addresses().await,
            ObjectCategory::Neighbor => self.dump_neighbors().await,
        }
    }

    fn supports_label_routes(&self) -> bool {
        self.label_routes
    }
}

// ===== helper functions =====

// Carries the route attributes the typed builders do not cover onto the
// outgoing message.
fn finish_route_message(message: &mut RouteMessage, route: &Route) {
    use netlink_packet_route::route::nlas::Nla;

    message.header.kind = route.route_type.to_rtn();
    message.header.table = route.table;
    message.header.scope = route.scope.to_rt();
    if let Some(tos) = route.tos {
        message.header.tos = tos;
    }
    if let Some(flags) = route.flags {
        message.header.flags = netlink_packet_route::route::RouteFlags::from_bits_truncate(flags);
    }
    if let Some(priority) = route.priority {
        message.nlas.push(Nla::Priority(priority));
    }
}

// mpls_label stack entry with the bottom-of-stack bit set.
fn mpls_label_bytes(label: Label) -> Vec<u8> {
    ((label.get() << 12) | 0x100).to_be_bytes().to_vec()
}

// RTA_VIA payload: address family in host order, then the raw address.
fn via_bytes(addr: &IpAddr) -> Vec<u8> {
    let family = match addr {
        IpAddr::V4(_) => AF_INET,
        IpAddr::V6(_) => AF_INET6,
    };
    let mut bytes = family.to_ne_bytes().to_vec();
    bytes.extend(addr.bytes());
    bytes
}

fn to_kernel_error(error: rtnetlink::Error) -> KernelError {
    match error {
        rtnetlink::Error::NetlinkError(message) => KernelError(-message.code),
        _ => KernelError(libc::EIO),
    }
}

fn parse_ip(family: u16, bytes: &[u8]) -> Option<IpAddr> {
    match family {
        AF_INET => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(Ipv4Addr::from(octets).into())
        }
        AF_INET6 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(Ipv6Addr::from(octets).into())
        }
        _ => None,
    }
}

// Label stack entries carry the label in the top 20 bits.
fn parse_mpls_label(bytes: &[u8]) -> Option<Label> {
    let bytes: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(Label::new(u32::from_be_bytes(bytes) >> 12))
}

fn parse_route(msg: RouteMessage, action: EventAction) -> Option<EventMsg> {
    use netlink_packet_route::route::nlas::Nla;

    trace!(?msg, "received route message");

    let route_type = RouteType::from_rtn(msg.header.kind)?;
    let scope = RouteScope::from_rt(msg.header.scope)?;

    let mut builder = Route::builder()
        .route_type(route_type)
        .table(msg.header.table)
        .protocol(msg.header.protocol)
        .scope(scope)
        .valid(action != EventAction::Delete);
    if !msg.header.flags.is_empty() {
        builder = builder.flags(msg.header.flags.bits());
    }
    if msg.header.tos != 0 {
        builder = builder.tos(msg.header.tos);
    }

    // Fetch route attributes.
    let family = msg.header.address_family as u16;
    let prefix_len = msg.header.destination_prefix_length;
    let mut destination = None;
    let mut gateway = None;
    let mut ifindex = None;
    for nla in msg.nlas.into_iter() {
        match nla {
            Nla::Destination(bytes) => destination = Some(bytes),
            Nla::Gateway(bytes) => gateway = Some(bytes),
            Nla::Oif(oif) => ifindex = Some(oif),
            Nla::Priority(priority) => builder = builder.priority(priority),
            Nla::MultiPath(_) => {
                debug!("multipath route attributes ignored");
            }
            _ => (),
        }
    }

    match family {
        AF_INET | AF_INET6 => {
            let addr = match destination {
                Some(bytes) => parse_ip(family, &bytes)?,
                // The default route carries no destination attribute.
                None => match family {
                    AF_INET => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    _ => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                },
            };
            let prefix = IpNetwork::new(addr, prefix_len).ok()?;
            builder = builder.destination(prefix);

            let gateway =
                gateway.and_then(|bytes| parse_ip(family, &bytes));
            if gateway.is_some() || ifindex.is_some() {
                let mut nexthop = Nexthop::builder();
                if let Some(ifindex) = ifindex {
                    nexthop = nexthop.ifindex(ifindex);
                }
                if let Some(gateway) = gateway {
                    nexthop = nexthop.gateway(gateway);
                }
                builder = builder.nexthop(nexthop.build().ok()?);
            }
        }
        AF_MPLS => {
            let label = parse_mpls_label(&destination?)?;
            builder = builder.label(label);
            if let Some(ifindex) = ifindex {
                builder = builder
                    .nexthop(Nexthop::builder().ifindex(ifindex).build().ok()?);
            }
        }
        _ => return None,
    }

    let route = builder.build().ok()?;
    Some(EventMsg::new(EventObject::Route(route), action))
}

fn parse_link(msg: LinkMessage, action: EventAction) -> Option<EventMsg> {
    use netlink_packet_route::link::nlas::Nla;

    trace!(?msg, "received link message");

    // Fetch link attributes.
    let ifindex = msg.header.index;
    let up = msg.header.flags & IFF_RUNNING != 0;
    let loopback = msg.header.link_layer_type == ARPHRD_LOOPBACK;
    let mut name = None;
    for nla in msg.nlas.into_iter() {
        match nla {
            Nla::IfName(ifname) => name = Some(ifname),
            _ => (),
        }
    }

    let link = Link {
        name: name?,
        ifindex,
        up,
        loopback,
        addresses: Default::default(),
    };
    Some(EventMsg::new(EventObject::Link(link), action))
}

fn parse_addr(msg: AddressMessage, action: EventAction) -> Option<EventMsg> {
    use netlink_packet_route::address::nlas::Nla;

    trace!(?msg, "received address message");

    // Fetch address attributes.
    let ifindex = msg.header.index;
    let scope = RouteScope::from_rt(msg.header.scope)?;
    let family = msg.header.family as u16;
    let prefix_len = msg.header.prefix_len;
    let mut addr = None;
    for nla in msg.nlas.into_iter() {
        match nla {
            Nla::Address(bytes) => addr = Some(bytes),
            _ => (),
        }
    }

    // Parse address.
    let addr = parse_ip(family, &addr?)?;
    let prefix = IpNetwork::new(addr, prefix_len).ok()?;

    let addr = IfAddress::builder()
        .ifindex(ifindex)
        .prefix(prefix)
        .scope(scope)
        .build()
        .ok()?;
    Some(EventMsg::new(EventObject::Address(addr), action))
}

fn parse_neighbour(
    msg: NeighbourMessage,
    action: EventAction,
) -> Option<EventMsg> {
    use netlink_packet_route::neighbour::nlas::Nla;

    trace!(?msg, "received neighbour message");

    let family = msg.header.family as u16;
    if family != AF_INET && family != AF_INET6 {
        return None;
    }

    // Fetch neighbour attributes.
    let ifindex = msg.header.ifindex;
    let state = msg.header.state;
    let mut destination = None;
    let mut link_address = None;
    for nla in msg.nlas.into_iter() {
        match nla {
            Nla::Destination(bytes) => {
                destination = parse_ip(family, &bytes);
            }
            Nla::LinkLocalAddress(bytes) => {
                link_address = bytes.try_into().ok();
            }
            _ => (),
        }
    }

    let mut builder = Neighbor::builder()
        .ifindex(ifindex)
        .destination(destination?)
        .state(state);
    if let Some(link_address) = link_address {
        builder = builder.link_address(link_address);
    }
    let neighbor = builder.build().ok()?;
    Some(EventMsg::new(EventObject::Neighbor(neighbor), action))
}

fn parse_message(
    message: NetlinkMessage<RtnlMessage>,
) -> Option<EventMsg> {
    let NetlinkPayload::InnerMessage(message) = message.payload else {
        return None;
    };
    match message {
        RtnlMessage::NewRoute(msg) => parse_route(msg, EventAction::Add),
        RtnlMessage::DelRoute(msg) => parse_route(msg, EventAction::Delete),
        RtnlMessage::NewLink(msg) => parse_link(msg, EventAction::Add),
        RtnlMessage::DelLink(msg) => parse_link(msg, EventAction::Delete),
        RtnlMessage::NewAddress(msg) => parse_addr(msg, EventAction::Add),
        RtnlMessage::DelAddress(msg) => parse_addr(msg, EventAction::Delete),
        RtnlMessage::NewNeighbour(msg) => {
            parse_neighbour(msg, EventAction::Add)
        }
        RtnlMessage::DelNeighbour(msg) => {
            parse_neighbour(msg, EventAction::Delete)
        }
        _ => None,
    }
}

// ===== global functions =====

// Opens the request and subscription connections and spawns the reader
// that parses kernel notifications for the event dispatcher. Construction
// failures here are unrecoverable.
pub fn init(
    config: &Config,
) -> (Box<dyn FibChannel>, UnboundedReceiver<EventMsg>) {
    // Create netlink socket used for mutations and dumps.
    let (mut conn, handle, _) =
        new_connection().expect("Failed to create netlink socket");
    conn.socket_mut()
        .socket_mut()
        .set_rx_buf_sz(config.rcvbuf_size)
        .expect("Failed to set netlink receive buffer size");

    // Spawn the netlink connection on a separate thread with permanent
    // elevated capabilities.
    std::thread::spawn(move || {
        // Raise capabilities.
        let mut caps = CapState::get_current().unwrap();
        caps.effective = caps.permitted;
        if let Err(error) = caps.set_current() {
            error!("failed to update current capabilities: {}", error);
        }

        // Serve requests initiated by the netlink handle.
        futures::executor::block_on(conn)
    });

    // Create the subscription socket. Bulk events need a roomy receive
    // buffer.
    let (mut conn, _, messages) =
        new_connection().expect("Failed to create netlink socket");
    let groups = config
        .groups
        .iter()
        .map(|group| 1 << (group - 1))
        .fold(0, std::ops::BitOr::bitor);
    let addr = SocketAddr::new(0, groups);
    conn.socket_mut()
        .socket_mut()
        .set_rx_buf_sz(config.rcvbuf_size)
        .expect("Failed to set netlink receive buffer size");
    conn.socket_mut()
        .socket_mut()
        .bind(&addr)
        .expect("Failed to bind netlink socket");
    tokio::spawn(conn);

    // Drain raw notifications into parsed deltas for the dispatcher.
    let (tx, rx) = mpsc::unbounded_channel();
    let mut reader = Task::spawn(async move {
        let mut messages = messages;
        while let Some((message, _)) = messages.next().await {
            if let Some(msg) = parse_message(message) {
                if tx.send(msg).is_err() {
                    break;
                }
            }
        }
    });
    reader.detach();

    let channel = NetlinkChannel {
        handle,
        label_routes: config.label_routes,
    };
    (Box::new(channel), rx)
}
