//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use const_addrs::{ip, net};
use fiblink::error::Error;

use super::*;

#[tokio::test]
async fn sync_to_empty_removes_installed_routes() {
    let agent = setup();
    let prefix = net!("10.0.0.0/24");
    agent
        .handle
        .add_route(unicast_route(prefix, nexthop(3, ip!("10.0.0.1"))))
        .await
        .unwrap();
    agent.channel.clear_calls();

    agent
        .handle
        .sync_unicast_routes(DEFAULT_PROTOCOL_ID, BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(
        agent.channel.calls(),
        vec![KernelCall::RouteDel(RouteDestination::Prefix(prefix))]
    );
    assert!(agent
        .handle
        .unicast_routes(DEFAULT_PROTOCOL_ID)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn sync_applies_delta_in_delete_then_add_order() {
    let agent = setup();
    let stale = net!("10.0.0.0/24");
    let changed = net!("10.1.0.0/24");
    let added = net!("10.2.0.0/24");

    agent
        .handle
        .add_route(unicast_route(stale, nexthop(3, ip!("10.0.0.1"))))
        .await
        .unwrap();
    agent
        .handle
        .add_route(unicast_route(changed, nexthop(3, ip!("10.0.0.1"))))
        .await
        .unwrap();
    agent.channel.clear_calls();

    let mut desired = BTreeMap::new();
    desired.insert(changed, unicast_route(changed, nexthop(4, ip!("10.0.1.1"))));
    desired.insert(added, unicast_route(added, nexthop(3, ip!("10.0.0.1"))));
    agent
        .handle
        .sync_unicast_routes(DEFAULT_PROTOCOL_ID, desired.clone())
        .await
        .unwrap();

    assert_eq!(
        agent.channel.calls(),
        vec![
            KernelCall::RouteDel(RouteDestination::Prefix(stale)),
            KernelCall::RouteAdd(RouteDestination::Prefix(changed), true),
            KernelCall::RouteAdd(RouteDestination::Prefix(added), true),
        ]
    );
    let cached = agent.handle.unicast_routes(DEFAULT_PROTOCOL_ID).await.unwrap();
    assert_eq!(cached, desired);
}

#[tokio::test]
async fn sync_skips_unchanged_routes() {
    let agent = setup();
    let prefix = net!("10.0.0.0/24");
    let route = unicast_route(prefix, nexthop(3, ip!("10.0.0.1")));
    agent.handle.add_route(route.clone()).await.unwrap();
    agent.channel.clear_calls();

    let mut desired = BTreeMap::new();
    desired.insert(prefix, route);
    agent
        .handle
        .sync_unicast_routes(DEFAULT_PROTOCOL_ID, desired)
        .await
        .unwrap();

    assert!(agent.channel.calls().is_empty());
}

#[tokio::test]
async fn sync_leaves_other_protocols_alone() {
    let agent = setup();
    let foreign = net!("10.5.0.0/24");
    let foreign_route = Route::builder()
        .destination(foreign)
        .protocol(42)
        .nexthop(nexthop_if(3))
        .build()
        .unwrap();
    agent.handle.add_route(foreign_route.clone()).await.unwrap();
    agent
        .handle
        .add_route(unicast_route(net!("10.0.0.0/24"), nexthop_if(3)))
        .await
        .unwrap();
    agent.channel.clear_calls();

    agent
        .handle
        .sync_unicast_routes(DEFAULT_PROTOCOL_ID, BTreeMap::new())
        .await
        .unwrap();

    // Protocol 42's slice is untouched by a protocol 99 sync.
    let cached = agent.handle.unicast_routes(42).await.unwrap();
    assert_eq!(cached.get(&foreign), Some(&foreign_route));
    assert_eq!(
        agent.channel.calls(),
        vec![KernelCall::RouteDel(RouteDestination::Prefix(
            net!("10.0.0.0/24")
        ))]
    );
}

#[tokio::test]
async fn sync_aborts_on_kernel_failure() {
    let agent = setup();
    agent
        .handle
        .add_route(unicast_route(net!("10.0.0.0/24"), nexthop_if(3)))
        .await
        .unwrap();
    agent.channel.clear_calls();
    agent.channel.fail_route_del(libc::EPERM);

    let result = agent
        .handle
        .sync_unicast_routes(DEFAULT_PROTOCOL_ID, BTreeMap::new())
        .await;

    assert!(matches!(result, Err(Error::RouteUninstall(..))));
    // The failed delete leaves the cached entry in place.
    assert_eq!(
        agent
            .handle
            .unicast_routes(DEFAULT_PROTOCOL_ID)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn link_sync_swaps_the_cached_slice() {
    let agent = setup();
    let first = net!("10.9.0.0/24");
    let second = net!("10.9.1.0/24");

    let mut desired = BTreeMap::new();
    desired.insert(
        (first, "eth0".to_owned()),
        link_route(first, nexthop_if(3)),
    );
    agent
        .handle
        .sync_link_routes(DEFAULT_PROTOCOL_ID, desired)
        .await
        .unwrap();
    assert_eq!(
        agent.channel.calls(),
        vec![KernelCall::RouteAdd(RouteDestination::Prefix(first), true)]
    );
    agent.channel.clear_calls();

    let mut desired = BTreeMap::new();
    desired.insert(
        (second, "eth0".to_owned()),
        link_route(second, nexthop_if(3)),
    );
    agent
        .handle
        .sync_link_routes(DEFAULT_PROTOCOL_ID, desired.clone())
        .await
        .unwrap();

    assert_eq!(
        agent.channel.calls(),
        vec![
            KernelCall::RouteDel(RouteDestination::Prefix(first)),
            KernelCall::RouteAdd(RouteDestination::Prefix(second), true),
        ]
    );
    let cached = agent.handle.link_routes(DEFAULT_PROTOCOL_ID).await.unwrap();
    assert_eq!(cached, desired);
}

#[tokio::test]
async fn link_sync_aborts_and_keeps_old_slice_on_failure() {
    let agent = setup();
    let first = net!("10.9.0.0/24");

    let mut desired = BTreeMap::new();
    desired.insert(
        (first, "eth0".to_owned()),
        link_route(first, nexthop_if(3)),
    );
    agent
        .handle
        .sync_link_routes(DEFAULT_PROTOCOL_ID, desired.clone())
        .await
        .unwrap();
    agent.channel.clear_calls();
    agent.channel.fail_route_del(libc::EPERM);

    let second = net!("10.9.1.0/24");
    let mut replacement = BTreeMap::new();
    replacement.insert(
        (second, "eth0".to_owned()),
        link_route(second, nexthop_if(3)),
    );
    let result = agent
        .handle
        .sync_link_routes(DEFAULT_PROTOCOL_ID, replacement)
        .await;

    assert!(matches!(result, Err(Error::RouteUninstall(..))));
    // The slice swap never happened; the cache still holds the old set
    // while the kernel may have diverged.
    let cached = agent.handle.link_routes(DEFAULT_PROTOCOL_ID).await.unwrap();
    assert_eq!(cached, desired);
    assert_eq!(
        agent.channel.calls(),
        vec![KernelCall::RouteDel(RouteDestination::Prefix(first))]
    );
}
