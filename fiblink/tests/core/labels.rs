//
// Copyright (c) The Fiblink Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use const_addrs::ip;
use fiblink::error::Error;

use super::*;

#[tokio::test]
async fn label_route_add_caches() {
    let agent = setup();
    let route = label_route(100, nexthop(3, ip!("10.0.0.1")));

    agent.handle.add_label_route(route.clone()).await.unwrap();

    assert_eq!(
        agent.channel.calls(),
        vec![KernelCall::LabelAdd(Label::new(100))]
    );
    let cached = agent.handle.label_routes(DEFAULT_PROTOCOL_ID).await.unwrap();
    assert_eq!(cached.get(&Label::new(100)), Some(&route));
    assert_eq!(agent.handle.label_route_count().await.unwrap(), 1);
}

#[tokio::test]
async fn label_route_add_is_idempotent() {
    let agent = setup();
    let route = label_route(100, nexthop(3, ip!("10.0.0.1")));

    agent.handle.add_label_route(route.clone()).await.unwrap();
    agent.handle.add_label_route(route).await.unwrap();

    assert_eq!(agent.channel.calls().len(), 1);
}

#[tokio::test]
async fn label_programming_requires_capability() {
    let agent = setup_with(MockChannel::without_label_support());
    let route = label_route(100, nexthop(3, ip!("10.0.0.1")));

    // Without transport support the mutation degrades to a logged no-op.
    agent.handle.add_label_route(route.clone()).await.unwrap();
    agent.handle.del_label_route(route).await.unwrap();

    assert!(agent.channel.calls().is_empty());
    assert!(agent
        .handle
        .label_routes(DEFAULT_PROTOCOL_ID)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn label_delete_unknown_is_noop() {
    let agent = setup();
    let route = label_route(100, nexthop_if(3));

    agent.handle.del_label_route(route).await.unwrap();

    assert!(agent.channel.calls().is_empty());
}

#[tokio::test]
async fn label_delete_tolerates_kernel_withdrawal() {
    let agent = setup();
    let route = label_route(100, nexthop_if(3));
    agent.handle.add_label_route(route.clone()).await.unwrap();

    agent.channel.fail_route_del(libc::ESRCH);
    agent.handle.del_label_route(route).await.unwrap();

    assert_eq!(agent.handle.label_route_count().await.unwrap(), 0);
}

#[tokio::test]
async fn label_path_rejects_non_unicast_types() {
    let agent = setup();
    let route = Route::builder()
        .label(Label::new(100))
        .route_type(RouteType::Blackhole)
        .build()
        .unwrap();

    let result = agent.handle.add_label_route(route).await;

    assert!(matches!(result, Err(Error::UnsupportedRouteType(_))));
    assert!(agent.channel.calls().is_empty());
}

#[tokio::test]
async fn sync_label_routes_applies_delta() {
    let agent = setup();
    agent
        .handle
        .add_label_route(label_route(100, nexthop_if(3)))
        .await
        .unwrap();
    agent
        .handle
        .add_label_route(label_route(200, nexthop_if(3)))
        .await
        .unwrap();
    agent.channel.clear_calls();

    // Label 100 disappears, 200 changes its nexthop, 300 is new.
    let mut desired = BTreeMap::new();
    desired.insert(Label::new(200), label_route(200, nexthop_if(4)));
    desired.insert(Label::new(300), label_route(300, nexthop_if(3)));
    agent
        .handle
        .sync_label_routes(DEFAULT_PROTOCOL_ID, desired.clone())
        .await
        .unwrap();

    assert_eq!(
        agent.channel.calls(),
        vec![
            KernelCall::LabelDel(Label::new(100)),
            KernelCall::LabelAdd(Label::new(200)),
            KernelCall::LabelAdd(Label::new(300)),
        ]
    );
    let cached = agent.handle.label_routes(DEFAULT_PROTOCOL_ID).await.unwrap();
    assert_eq!(cached, desired);
}

#[tokio::test]
async fn sync_label_routes_skips_unchanged_entries() {
    let agent = setup();
    let route = label_route(100, nexthop_if(3));
    agent.handle.add_label_route(route.clone()).await.unwrap();
    agent.channel.clear_calls();

    let mut desired = BTreeMap::new();
    desired.insert(Label::new(100), route);
    agent
        .handle
        .sync_label_routes(DEFAULT_PROTOCOL_ID, desired)
        .await
        .unwrap();

    assert!(agent.channel.calls().is_empty());
}
