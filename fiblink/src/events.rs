//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bitflags::bitflags;
use derive_new::new;
use enum_as_inner::EnumAsInner;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::address::IfAddress;
use crate::link::Link;
use crate::neighbor::Neighbor;
use crate::route::{Route, RouteDestination, RouteScope, RT_TABLE_MAIN};
use crate::Master;

bitflags! {
    // Per-category subscription mask.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct EventFlags: u8 {
        const ROUTE = 0x01;
        const LINK = 0x02;
        const ADDR = 0x04;
        const NEIGHBOR = 0x08;
    }
}

// Kernel notification actions. `Get` is synthesized while walking a freshly
// refilled cache.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum EventAction {
    Add,
    Change,
    Delete,
    Get,
}

// Parsed kernel object carried by a notification.
#[derive(Clone, Debug, EnumAsInner)]
#[derive(Deserialize, Serialize)]
pub enum EventObject {
    Route(Route),
    Link(Link),
    Address(IfAddress),
    Neighbor(Neighbor),
}

// One parsed kernel notification.
#[derive(Clone, Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct EventMsg {
    pub object: EventObject,
    pub action: EventAction,
}

// Notification delivered to the registered subscriber. `ifname` is empty
// when the owning interface cannot be resolved.
#[derive(Clone, Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct FibEvent {
    pub ifname: String,
    pub action: EventAction,
    pub object: EventObject,
}

// ===== global functions =====

// Updates the caches from a parsed kernel notification, then fans it out to
// the subscriber. Refills pass `notify = false` to prime the caches
// silently.
pub(crate) fn process_event(
    master: &mut Master,
    msg: EventMsg,
    notify: bool,
) {
    match msg.object {
        EventObject::Route(route) => {
            process_route_event(master, route, msg.action, notify)
        }
        EventObject::Link(link) => {
            process_link_event(master, link, msg.action, notify)
        }
        EventObject::Address(addr) => {
            process_addr_event(master, addr, msg.action, notify)
        }
        EventObject::Neighbor(neighbor) => {
            process_neighbor_event(master, neighbor, msg.action, notify)
        }
    }
}

// ===== helper functions =====

fn process_route_event(
    master: &mut Master,
    mut route: Route,
    action: EventAction,
    notify: bool,
) {
    // Validity tracks the action that carried the route.
    route.valid = action != EventAction::Delete;

    // Skip cloned entries and any routes not in the main table.
    if route.table != RT_TABLE_MAIN || route.is_cloned() {
        return;
    }

    match route.destination {
        RouteDestination::Label(label) => {
            let routes = master.routes.label_mut(route.protocol);
            routes.remove(&label);
            if route.valid {
                routes.insert(label, route.clone());
            }
            notify_subscriber(
                master,
                String::new(),
                action,
                EventObject::Route(route),
                notify,
            );
        }
        RouteDestination::Prefix(prefix) => {
            // Multicast routes are keyed by prefix and egress interface.
            if prefix.ip().is_multicast() {
                let Some(ifname) =
                    singleton_nexthop_ifname(master, &route, &prefix)
                else {
                    return;
                };
                let key = (prefix, ifname.clone());
                let routes = master.routes.multicast_mut(route.protocol);
                routes.remove(&key);
                if route.valid {
                    routes.insert(key, route.clone());
                }
                notify_subscriber(
                    master,
                    ifname,
                    action,
                    EventObject::Route(route),
                    notify,
                );
                return;
            }

            // So are link scope routes.
            if route.scope == RouteScope::Link {
                let Some(ifname) =
                    singleton_nexthop_ifname(master, &route, &prefix)
                else {
                    return;
                };
                let key = (prefix, ifname.clone());
                let routes = master.routes.link_mut(route.protocol);
                routes.remove(&key);
                if route.valid {
                    routes.insert(key, route.clone());
                }
                notify_subscriber(
                    master,
                    ifname,
                    action,
                    EventObject::Route(route),
                    notify,
                );
                return;
            }

            // Unicast and blackhole routes are keyed by prefix alone.
            let routes = master.routes.unicast_mut(route.protocol);
            routes.remove(&prefix);
            if route.valid {
                routes.insert(prefix, route.clone());
            }
            let ifname = route
                .first_nexthop_ifindex()
                .and_then(|ifindex| master.links.name_by_ifindex(ifindex))
                .unwrap_or_default()
                .to_owned();
            notify_subscriber(
                master,
                ifname,
                action,
                EventObject::Route(route),
                notify,
            );
        }
    }
}

fn process_link_event(
    master: &mut Master,
    link: Link,
    action: EventAction,
    notify: bool,
) {
    let record = if action == EventAction::Delete {
        master.links.remove(&link.name).unwrap_or(link)
    } else {
        master.links.update(link).clone()
    };

    // A downed interface invalidates its neighbor entries.
    if action == EventAction::Delete || !record.up {
        master.neighbors.purge_interface(&record.name);
    }

    let ifname = record.name.clone();
    notify_subscriber(
        master,
        ifname,
        action,
        EventObject::Link(record),
        notify,
    );
}

fn process_addr_event(
    master: &mut Master,
    addr: IfAddress,
    action: EventAction,
    notify: bool,
) {
    let ifname = if action != EventAction::Delete {
        master.links.addr_add(addr.ifindex, addr.prefix)
    } else {
        master.links.addr_del(addr.ifindex, addr.prefix)
    };

    notify_subscriber(
        master,
        ifname.unwrap_or_default(),
        action,
        EventObject::Address(addr),
        notify,
    );
}

fn process_neighbor_event(
    master: &mut Master,
    neighbor: Neighbor,
    action: EventAction,
    notify: bool,
) {
    let Some(ifname) = master
        .links
        .name_by_ifindex(neighbor.ifindex)
        .map(str::to_owned)
    else {
        warn!(
            destination = %neighbor.destination,
            "neighbor event for unknown interface"
        );
        return;
    };

    // Only reachable neighbors are kept.
    master.neighbors.remove(&ifname, neighbor.destination);
    if action != EventAction::Delete && neighbor.is_reachable() {
        master.neighbors.update(ifname.clone(), neighbor.clone());
    }

    notify_subscriber(
        master,
        ifname,
        action,
        EventObject::Neighbor(neighbor),
        notify,
    );
}

// Returns the name of the single egress interface multicast and link scope
// routes are required to carry.
fn singleton_nexthop_ifname(
    master: &Master,
    route: &Route,
    prefix: &IpNetwork,
) -> Option<String> {
    if route.nexthops.len() != 1 {
        error!(%prefix, "unexpected nexthops for interface-keyed route");
        return None;
    }
    let Some(ifindex) = route.nexthops[0].ifindex else {
        error!(%prefix, "nexthop without an egress interface");
        return None;
    };
    let Some(ifname) = master.links.name_by_ifindex(ifindex) else {
        error!(%prefix, %ifindex, "nexthop on unknown interface");
        return None;
    };
    Some(ifname.to_owned())
}

fn notify_subscriber(
    master: &Master,
    ifname: String,
    action: EventAction,
    object: EventObject,
    notify: bool,
) {
    if !notify {
        return;
    }
    let Some(handler) = &master.event_handler else {
        return;
    };

    let flag = match &object {
        EventObject::Route(_) => EventFlags::ROUTE,
        EventObject::Link(_) => EventFlags::LINK,
        EventObject::Address(_) => EventFlags::ADDR,
        EventObject::Neighbor(_) => EventFlags::NEIGHBOR,
    };
    if !master.event_flags.contains(flag) {
        return;
    }

    let _ = handler.send(FibEvent::new(ifname, action, object));
}
