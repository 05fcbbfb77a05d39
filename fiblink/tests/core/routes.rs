//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::{ip, net};
use fiblink::error::Error;

use super::*;

#[tokio::test]
async fn add_route_installs_and_caches() {
    let agent = setup();
    let prefix = net!("10.0.0.0/24");
    let route = unicast_route(prefix, nexthop(3, ip!("10.0.0.1")));

    agent.handle.add_route(route.clone()).await.unwrap();

    assert_eq!(
        agent.channel.calls(),
        vec![KernelCall::RouteAdd(RouteDestination::Prefix(prefix), true)]
    );
    let cached = agent.handle.unicast_routes(DEFAULT_PROTOCOL_ID).await.unwrap();
    assert_eq!(cached.get(&prefix), Some(&route));
    assert_eq!(agent.handle.route_count().await.unwrap(), 1);
}

#[tokio::test]
async fn add_route_is_idempotent() {
    let agent = setup();
    let route = unicast_route(net!("10.0.0.0/24"), nexthop(3, ip!("10.0.0.1")));

    agent.handle.add_route(route.clone()).await.unwrap();
    agent.handle.add_route(route).await.unwrap();

    // The second add matches the cache and never reaches the kernel.
    assert_eq!(agent.channel.calls().len(), 1);
}

#[tokio::test]
async fn unicast_path_rejects_multicast_prefix() {
    let agent = setup();
    let route = unicast_route(net!("224.0.0.5/32"), nexthop_if(3));

    let result = agent.handle.add_route(route).await;

    assert!(matches!(result, Err(Error::InvalidUnicastPrefix(_))));
    assert!(agent.channel.calls().is_empty());
    assert!(agent
        .handle
        .unicast_routes(DEFAULT_PROTOCOL_ID)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unicast_path_rejects_link_local_prefix() {
    let agent = setup();
    let route = unicast_route(net!("fe80::/64"), nexthop_if(3));

    let result = agent.handle.add_route(route).await;

    assert!(matches!(result, Err(Error::InvalidUnicastPrefix(_))));
    assert!(agent.channel.calls().is_empty());
}

#[tokio::test]
async fn delete_unknown_prefix_is_noop() {
    let agent = setup();
    let route = unicast_route(net!("10.0.0.0/24"), nexthop_if(3));

    agent.handle.del_route(route).await.unwrap();

    assert!(agent.channel.calls().is_empty());
}

#[tokio::test]
async fn delete_tolerates_kernel_withdrawal() {
    let agent = setup();
    let route = unicast_route(net!("10.0.0.0/24"), nexthop_if(3));
    agent.handle.add_route(route.clone()).await.unwrap();

    // The kernel withdraws routes on its own when the egress interface
    // goes away.
    agent.channel.fail_route_del(libc::ESRCH);
    agent.handle.del_route(route).await.unwrap();

    assert!(agent
        .handle
        .unicast_routes(DEFAULT_PROTOCOL_ID)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn failed_add_leaves_no_cache_entry() {
    let agent = setup();
    agent.channel.fail_route_add(libc::ENETUNREACH);
    let route = unicast_route(net!("10.0.0.0/24"), nexthop(3, ip!("10.0.0.1")));

    let result = agent.handle.add_route(route).await;

    assert!(matches!(result, Err(Error::RouteInstall(..))));
    assert_eq!(agent.handle.route_count().await.unwrap(), 0);
}

#[tokio::test]
async fn add_and_delete_restore_cache() {
    let agent = setup();
    let route = unicast_route(net!("10.0.0.0/24"), nexthop(3, ip!("10.0.0.1")));

    agent.handle.add_route(route.clone()).await.unwrap();
    agent.handle.del_route(route).await.unwrap();

    assert!(agent
        .handle
        .unicast_routes(DEFAULT_PROTOCOL_ID)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(agent.handle.route_count().await.unwrap(), 0);
}

#[tokio::test]
async fn ipv6_update_replaces_by_delete_then_add() {
    let agent = setup();
    let prefix = net!("2001:db8::/64");
    let destination = RouteDestination::Prefix(prefix);

    let old = unicast_route(prefix, nexthop(3, ip!("fe80::1")));
    agent.handle.add_route(old).await.unwrap();

    let new = unicast_route(prefix, nexthop(3, ip!("fe80::2")));
    agent.handle.add_route(new).await.unwrap();

    // The update removes the old entry explicitly instead of relying on
    // kernel replace semantics.
    assert_eq!(
        agent.channel.calls(),
        vec![
            KernelCall::RouteAdd(destination, false),
            KernelCall::RouteDel(destination),
            KernelCall::RouteAdd(destination, false),
        ]
    );
    let cached = agent.handle.unicast_routes(DEFAULT_PROTOCOL_ID).await.unwrap();
    assert_eq!(
        cached.get(&prefix).unwrap().nexthops[0].gateway,
        Some(ip!("fe80::2"))
    );
}

#[tokio::test]
async fn ipv6_update_tolerates_missing_old_route() {
    let agent = setup();
    let prefix = net!("2001:db8::/64");

    agent
        .handle
        .add_route(unicast_route(prefix, nexthop(3, ip!("fe80::1"))))
        .await
        .unwrap();

    agent.channel.fail_route_del(libc::ESRCH);
    agent.channel.clear_calls();
    agent
        .handle
        .add_route(unicast_route(prefix, nexthop(3, ip!("fe80::2"))))
        .await
        .unwrap();

    assert_eq!(
        agent.channel.calls(),
        vec![
            KernelCall::RouteDel(RouteDestination::Prefix(prefix)),
            KernelCall::RouteAdd(RouteDestination::Prefix(prefix), false),
        ]
    );
}

#[tokio::test]
async fn blackhole_routes_share_the_unicast_path() {
    let agent = setup();
    let prefix = net!("10.1.0.0/16");
    let route = Route::builder()
        .destination(prefix)
        .route_type(RouteType::Blackhole)
        .build()
        .unwrap();

    agent.handle.add_route(route.clone()).await.unwrap();

    let cached = agent.handle.unicast_routes(DEFAULT_PROTOCOL_ID).await.unwrap();
    assert_eq!(cached.get(&prefix), Some(&route));
}

#[tokio::test]
async fn multicast_add_requires_known_interface() {
    let agent = setup();
    let route = multicast_route(net!("224.0.0.5/32"), nexthop_if(3));

    let result = agent.handle.add_route(route).await;

    assert!(matches!(result, Err(Error::MulticastInterfaceMissing(_))));
    assert!(agent.channel.calls().is_empty());
}

#[tokio::test]
async fn multicast_routes_key_on_interface() {
    let agent = setup();
    agent.events_tx.send(link_event("eth0", 3, true)).unwrap();

    let prefix = net!("224.0.0.5/32");
    let route = multicast_route(prefix, nexthop_if(3));
    agent.handle.add_route(route.clone()).await.unwrap();

    let cached = agent
        .handle
        .multicast_routes(DEFAULT_PROTOCOL_ID)
        .await
        .unwrap();
    assert_eq!(cached.get(&(prefix, "eth0".to_owned())), Some(&route));

    // A second add for the same key is a warning, not a kernel call.
    agent.handle.add_route(route).await.unwrap();
    assert_eq!(agent.channel.calls().len(), 1);
}

#[tokio::test]
async fn multicast_delete_unknown_is_noop() {
    let agent = setup();
    agent.events_tx.send(link_event("eth0", 3, true)).unwrap();

    let route = multicast_route(net!("224.0.0.5/32"), nexthop_if(3));
    agent.handle.del_route(route).await.unwrap();

    assert!(agent.channel.calls().is_empty());
}

#[tokio::test]
async fn non_multicast_prefix_rejected_on_multicast_path() {
    let agent = setup();
    agent.events_tx.send(link_event("eth0", 3, true)).unwrap();

    let route = multicast_route(net!("10.0.0.0/24"), nexthop_if(3));
    let result = agent.handle.add_route(route).await;

    assert!(matches!(result, Err(Error::InvalidMulticastPrefix(_))));
}
