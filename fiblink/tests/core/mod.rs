//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod labels;
mod routes;
mod sync;

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fiblink::address::IfAddress;
use fiblink::events::{EventAction, EventMsg, EventObject};
use fiblink::link::Link;
use fiblink::neighbor::Neighbor;
use fiblink::route::{
    Nexthop, Route, RouteDestination, RouteScope, RouteType,
    DEFAULT_PROTOCOL_ID,
};
use fiblink::transport::{FibChannel, KernelError, ObjectCategory};
use fiblink::FibHandle;
use fiblink_utils::mpls::Label;
use ipnetwork::IpNetwork;
use tokio::sync::mpsc::{self, UnboundedSender};

// Kernel requests observed by the mock transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KernelCall {
    RouteAdd(RouteDestination, bool),
    RouteDel(RouteDestination),
    LabelAdd(Label),
    LabelDel(Label),
    AddrAdd(IpNetwork),
    AddrDel(IpNetwork),
}

// In-memory transport that records every request and answers with
// configurable results. Dumps return the configured address list and are
// otherwise empty.
#[derive(Clone)]
pub struct MockChannel {
    calls: Arc<Mutex<Vec<KernelCall>>>,
    route_add_result: Arc<Mutex<Result<(), KernelError>>>,
    route_del_result: Arc<Mutex<Result<(), KernelError>>>,
    addr_add_result: Arc<Mutex<Result<(), KernelError>>>,
    addr_del_result: Arc<Mutex<Result<(), KernelError>>>,
    addresses: Arc<Mutex<Vec<IfAddress>>>,
    label_routes: bool,
}

impl MockChannel {
    pub fn new() -> MockChannel {
        MockChannel {
            calls: Default::default(),
            route_add_result: Arc::new(Mutex::new(Ok(()))),
            route_del_result: Arc::new(Mutex::new(Ok(()))),
            addr_add_result: Arc::new(Mutex::new(Ok(()))),
            addr_del_result: Arc::new(Mutex::new(Ok(()))),
            addresses: Default::default(),
            label_routes: true,
        }
    }

    pub fn without_label_support() -> MockChannel {
        MockChannel {
            label_routes: false,
            ..MockChannel::new()
        }
    }

    pub fn calls(&self) -> Vec<KernelCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fail_route_add(&self, errno: i32) {
        *self.route_add_result.lock().unwrap() = Err(KernelError(errno));
    }

    pub fn fail_route_del(&self, errno: i32) {
        *self.route_del_result.lock().unwrap() = Err(KernelError(errno));
    }

    pub fn fail_addr_add(&self, errno: i32) {
        *self.addr_add_result.lock().unwrap() = Err(KernelError(errno));
    }

    pub fn fail_addr_del(&self, errno: i32) {
        *self.addr_del_result.lock().unwrap() = Err(KernelError(errno));
    }

    pub fn set_addresses(&self, addresses: Vec<IfAddress>) {
        *self.addresses.lock().unwrap() = addresses;
    }

    fn record(&self, call: KernelCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl FibChannel for MockChannel {
    async fn route_add(
        &self,
        route: &Route,
        replace: bool,
    ) -> Result<(), KernelError> {
        self.record(KernelCall::RouteAdd(route.destination, replace));
        *self.route_add_result.lock().unwrap()
    }

    async fn route_del(&self, route: &Route) -> Result<(), KernelError> {
        self.record(KernelCall::RouteDel(route.destination));
        *self.route_del_result.lock().unwrap()
    }

    async fn label_route_add(
        &self,
        route: &Route,
    ) -> Result<(), KernelError> {
        let label = *route.destination.as_label().unwrap();
        self.record(KernelCall::LabelAdd(label));
        *self.route_add_result.lock().unwrap()
    }

    async fn label_route_del(
        &self,
        route: &Route,
    ) -> Result<(), KernelError> {
        let label = *route.destination.as_label().unwrap();
        self.record(KernelCall::LabelDel(label));
        *self.route_del_result.lock().unwrap()
    }

    async fn addr_add(&self, addr: &IfAddress) -> Result<(), KernelError> {
        self.record(KernelCall::AddrAdd(addr.prefix));
        *self.addr_add_result.lock().unwrap()
    }

    async fn addr_del(&self, addr: &IfAddress) -> Result<(), KernelError> {
        self.record(KernelCall::AddrDel(addr.prefix));
        *self.addr_del_result.lock().unwrap()
    }

    async fn dump(
        &self,
        category: ObjectCategory,
    ) -> Result<Vec<EventMsg>, KernelError> {
        match category {
            ObjectCategory::Address => Ok(self
                .addresses
                .lock()
                .unwrap()
                .iter()
                .cloned()
                .map(|addr| {
                    EventMsg::new(
                        EventObject::Address(addr),
                        EventAction::Get,
                    )
                })
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    fn supports_label_routes(&self) -> bool {
        self.label_routes
    }
}

// Agent running against a mock transport. Kernel notifications are
// injected through `events_tx`; the agent drains them ahead of queued API
// requests, so a send followed by an API round trip is processed in order.
pub struct TestAgent {
    pub handle: FibHandle,
    pub channel: MockChannel,
    pub events_tx: UnboundedSender<EventMsg>,
}

pub fn setup() -> TestAgent {
    setup_with(MockChannel::new())
}

pub fn setup_with(channel: MockChannel) -> TestAgent {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let handle = fiblink::start(Box::new(channel.clone()), events_rx);
    TestAgent {
        handle,
        channel,
        events_tx,
    }
}

// ===== record helpers =====

pub fn nexthop_if(ifindex: u32) -> Nexthop {
    Nexthop::builder().ifindex(ifindex).build().unwrap()
}

pub fn nexthop(ifindex: u32, gateway: IpAddr) -> Nexthop {
    Nexthop::builder()
        .ifindex(ifindex)
        .gateway(gateway)
        .build()
        .unwrap()
}

pub fn unicast_route(prefix: IpNetwork, nexthop: Nexthop) -> Route {
    Route::builder()
        .destination(prefix)
        .nexthop(nexthop)
        .build()
        .unwrap()
}

pub fn multicast_route(prefix: IpNetwork, nexthop: Nexthop) -> Route {
    Route::builder()
        .destination(prefix)
        .route_type(RouteType::Multicast)
        .nexthop(nexthop)
        .build()
        .unwrap()
}

pub fn link_route(prefix: IpNetwork, nexthop: Nexthop) -> Route {
    Route::builder()
        .destination(prefix)
        .scope(RouteScope::Link)
        .nexthop(nexthop)
        .build()
        .unwrap()
}

pub fn label_route(label: u32, nexthop: Nexthop) -> Route {
    Route::builder()
        .label(Label::new(label))
        .nexthop(nexthop)
        .build()
        .unwrap()
}

pub fn if_address(
    ifindex: u32,
    prefix: IpNetwork,
    scope: RouteScope,
) -> IfAddress {
    IfAddress::builder()
        .ifindex(ifindex)
        .prefix(prefix)
        .scope(scope)
        .build()
        .unwrap()
}

// ===== event helpers =====

pub fn link_event(name: &str, ifindex: u32, up: bool) -> EventMsg {
    let link = Link {
        name: name.to_owned(),
        ifindex,
        up,
        loopback: false,
        addresses: Default::default(),
    };
    EventMsg::new(EventObject::Link(link), EventAction::Add)
}

pub fn route_event(route: Route, action: EventAction) -> EventMsg {
    EventMsg::new(EventObject::Route(route), action)
}

pub fn addr_event(
    ifindex: u32,
    prefix: IpNetwork,
    action: EventAction,
) -> EventMsg {
    let addr = if_address(ifindex, prefix, RouteScope::Universe);
    EventMsg::new(EventObject::Address(addr), action)
}

pub fn neighbor_event(
    ifindex: u32,
    destination: IpAddr,
    state: u16,
    action: EventAction,
) -> EventMsg {
    let neighbor = Neighbor::builder()
        .ifindex(ifindex)
        .destination(destination)
        .state(state)
        .build()
        .unwrap();
    EventMsg::new(EventObject::Neighbor(neighbor), action)
}
