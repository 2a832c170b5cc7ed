use anyhow::Result;

use peergrouper_core::models::{DesiredSpace, NodeAddress, PeerGroupConfig, Scope, SpaceInfo};
use peergrouper_core::PeerGroupError;

use crate::fixtures::{cloud_tracker, member, PORT};
use crate::planner::{plan, PRIMARY_PRIORITY, VOTER_PRIORITY};
use crate::tracker::ControllerTracker;

fn voter_nodes(config: &PeerGroupConfig) -> Vec<String> {
    config.voters().filter_map(|member| member.node_id.clone()).collect()
}

fn three_node_config() -> PeerGroupConfig {
    PeerGroupConfig::new(
        5,
        vec![member(1, 1, 1, PRIMARY_PRIORITY), member(2, 2, 1, VOTER_PRIORITY), member(3, 3, 1, VOTER_PRIORITY)],
    )
}

#[test]
fn plan_from_empty_store_yields_three_voters() -> Result<()> {
    let trackers = vec![cloud_tracker(1, true), cloud_tracker(2, true), cloud_tracker(3, true)];

    let outcome = plan(&PeerGroupConfig::default(), None, &trackers, &DesiredSpace::NoPreference, PORT, 7)?;

    assert!(outcome.changed, "expected plan against an empty store to report a change");
    assert!(outcome.target.version == 1, "expected target version 1 got {}", outcome.target.version);
    assert_eq!(voter_nodes(&outcome.target), vec!["1", "2", "3"]);
    let ids: Vec<_> = outcome.target.members.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![0, 1, 2], "expected lowest unused ids to be assigned");
    assert!(outcome.target.members.iter().all(|m| m.priority == VOTER_PRIORITY), "expected equal priorities without a primary");
    assert_eq!(outcome.target.members[0].address, "10.0.0.1:666");

    Ok(())
}

#[test]
fn plan_is_idempotent() -> Result<()> {
    let trackers = vec![cloud_tracker(1, true), cloud_tracker(2, true), cloud_tracker(3, true), cloud_tracker(4, false)];

    let first = plan(&PeerGroupConfig::default(), None, &trackers, &DesiredSpace::NoPreference, PORT, 7)?;
    let second = plan(&first.target, None, &trackers, &DesiredSpace::NoPreference, PORT, 7)?;

    assert!(first.changed, "expected first plan to report a change");
    assert!(!second.changed, "expected second plan with unchanged inputs to report no change");
    assert_eq!(first.target, second.target);

    Ok(())
}

#[test]
fn plan_matching_store_is_noop_and_favors_primary() -> Result<()> {
    let observed = three_node_config();
    let trackers = vec![cloud_tracker(1, true), cloud_tracker(2, true), cloud_tracker(3, true)];

    let outcome = plan(&observed, Some(1), &trackers, &DesiredSpace::NoPreference, PORT, 7)?;

    assert!(!outcome.changed, "expected no change, got target {:?}", outcome.target);
    assert!(outcome.target.version == 5, "expected unchanged version 5 got {}", outcome.target.version);
    let primary = outcome.target.member(1).map(|m| m.priority);
    assert_eq!(primary, Some(PRIMARY_PRIORITY), "expected primary to keep the highest priority");

    // Without a reported primary, the previously favored member keeps its priority.
    let outcome = plan(&observed, None, &trackers, &DesiredSpace::NoPreference, PORT, 7)?;
    assert!(!outcome.changed, "expected no change without a reported primary");

    Ok(())
}

#[test]
fn plan_defers_node_without_address_in_space() -> Result<()> {
    let observed = three_node_config();
    let node4 = ControllerTracker::new("4", vec![NodeAddress::new("127.0.0.1", Scope::MachineLocal)], true, 4);
    let trackers = vec![cloud_tracker(1, true), cloud_tracker(2, true), cloud_tracker(3, true), node4];
    let desired = DesiredSpace::Space(SpaceInfo {
        id: "ha".into(),
        name: "ha-space".into(),
    });

    let outcome = plan(&observed, Some(1), &trackers, &desired, PORT, 7)?;

    assert_eq!(
        outcome.deferred,
        vec![PeerGroupError::NoAddressInSpace {
            node_id: "4".into(),
            space: "ha-space".into()
        }]
    );
    assert_eq!(voter_nodes(&outcome.target), vec!["1", "2", "3"]);
    assert!(outcome.target.member_for_node("4").is_none(), "expected node 4 to be excluded");
    assert!(!outcome.changed, "expected remaining nodes to match the observed config");

    Ok(())
}

#[test]
fn plan_prefers_space_addresses() -> Result<()> {
    let trackers: Vec<_> = (1..=3)
        .map(|id| {
            let addrs = vec![
                NodeAddress::new(format!("10.0.0.{}", id), Scope::CloudLocal),
                NodeAddress::new(format!("192.168.0.{}", id), Scope::CloudLocal).in_space("ha"),
            ];
            ControllerTracker::new(id.to_string(), addrs, true, id as u64)
        })
        .collect();
    let desired = DesiredSpace::Space(SpaceInfo {
        id: "ha".into(),
        name: "ha-space".into(),
    });

    let outcome = plan(&PeerGroupConfig::default(), None, &trackers, &desired, PORT, 7)?;

    let addrs: Vec<_> = outcome.target.members.iter().map(|m| m.address.as_str()).collect();
    assert_eq!(addrs, vec!["192.168.0.1:666", "192.168.0.2:666", "192.168.0.3:666"]);
    assert!(outcome.deferred.is_empty(), "expected no deferred nodes got {:?}", outcome.deferred);

    Ok(())
}

#[test]
fn plan_drops_most_recent_eligible_node_for_odd_count() -> Result<()> {
    let trackers = vec![cloud_tracker(4, true), cloud_tracker(2, true), cloud_tracker(1, true), cloud_tracker(3, true)];

    let outcome = plan(&PeerGroupConfig::default(), None, &trackers, &DesiredSpace::NoPreference, PORT, 7)?;

    assert_eq!(voter_nodes(&outcome.target), vec!["1", "2", "3"]);
    let node4 = outcome.target.member_for_node("4").map(|m| (m.votes, m.priority));
    assert_eq!(node4, Some((0, 0.0)), "expected node 4 to be a non-voter");

    Ok(())
}

#[test]
fn plan_keeps_current_voters_over_new_nodes() -> Result<()> {
    let observed = three_node_config();
    let trackers = vec![cloud_tracker(1, true), cloud_tracker(2, true), cloud_tracker(3, true), ControllerTracker::new("0", vec![NodeAddress::new("10.0.0.9", Scope::CloudLocal)], true, 0)];

    let outcome = plan(&observed, Some(1), &trackers, &DesiredSpace::NoPreference, PORT, 7)?;

    assert_eq!(voter_nodes(&outcome.target), vec!["1", "2", "3"]);
    let node0 = outcome.target.member_for_node("0").map(|m| (m.id, m.votes));
    assert_eq!(node0, Some((0, 0)), "expected node 0 to join as non-voter with the lowest free id");

    Ok(())
}

#[test]
fn plan_respects_max_voters() -> Result<()> {
    let trackers: Vec<_> = (1..=9).map(|id| cloud_tracker(id, true)).collect();

    let outcome = plan(&PeerGroupConfig::default(), None, &trackers, &DesiredSpace::NoPreference, PORT, 7)?;
    assert!(outcome.target.voter_count() == 7, "expected 7 voters got {}", outcome.target.voter_count());

    let outcome = plan(&PeerGroupConfig::default(), None, &trackers, &DesiredSpace::NoPreference, PORT, 4)?;
    assert!(outcome.target.voter_count() == 3, "expected 3 voters got {}", outcome.target.voter_count());
    assert!(outcome.target.members.len() == 9, "expected all nodes as members got {}", outcome.target.members.len());

    Ok(())
}

#[test]
fn plan_voter_count_is_always_odd_and_bounded() -> Result<()> {
    for node_count in 1..=9u32 {
        for eligible_mask in [0u32, 0b1, 0b1010_1010, 0b1_1111_1111, 0b0_1101_0110] {
            for max_voters in 1..=8usize {
                let trackers: Vec<_> = (1..=node_count).map(|id| cloud_tracker(id, eligible_mask & (1 << (id - 1)) != 0)).collect();
                let outcome = plan(&PeerGroupConfig::default(), None, &trackers, &DesiredSpace::NoPreference, PORT, max_voters)?;
                let voters = outcome.target.voter_count();
                assert!(
                    voters % 2 == 1 && voters <= max_voters,
                    "expected odd voter count <= {} for {} nodes (mask {:b}), got {}",
                    max_voters,
                    node_count,
                    eligible_mask,
                    voters
                );
            }
        }
    }
    Ok(())
}

#[test]
fn plan_grants_last_resort_vote_to_ineligible_node() -> Result<()> {
    let trackers = vec![cloud_tracker(2, false), cloud_tracker(1, false)];

    let outcome = plan(&PeerGroupConfig::default(), None, &trackers, &DesiredSpace::NoPreference, PORT, 7)?;

    assert_eq!(voter_nodes(&outcome.target), vec!["1"]);

    Ok(())
}

#[test]
fn plan_does_not_reuse_ids_of_removed_members() -> Result<()> {
    let observed = PeerGroupConfig::new(2, vec![member(0, 1, 1, VOTER_PRIORITY), member(1, 2, 1, VOTER_PRIORITY)]);
    let trackers = vec![cloud_tracker(1, true), cloud_tracker(3, true)];

    let outcome = plan(&observed, None, &trackers, &DesiredSpace::NoPreference, PORT, 7)?;

    assert!(outcome.target.member_for_node("2").is_none(), "expected removed node 2 to be dropped");
    let node3 = outcome.target.member_for_node("3").map(|m| m.id);
    assert_eq!(node3, Some(2), "expected node 3 to skip the id freed this cycle");
    assert_eq!(voter_nodes(&outcome.target), vec!["1"]);

    Ok(())
}

#[test]
fn plan_retains_address_less_member_as_non_voter() -> Result<()> {
    let observed = PeerGroupConfig::new(
        3,
        vec![member(0, 1, 1, PRIMARY_PRIORITY), member(1, 2, 1, VOTER_PRIORITY), member(2, 3, 1, VOTER_PRIORITY)],
    );
    let trackers = vec![cloud_tracker(1, true), cloud_tracker(2, true), ControllerTracker::new("3", vec![], true, 3)];

    let outcome = plan(&observed, Some(0), &trackers, &DesiredSpace::NoPreference, PORT, 7)?;

    assert_eq!(outcome.deferred, vec![PeerGroupError::NoAddress { node_id: "3".into() }]);
    let node3 = outcome.target.member_for_node("3").cloned();
    assert!(
        matches!(&node3, Some(m) if m.id == 2 && m.votes == 0 && m.address == "10.0.0.3:666"),
        "expected node 3 retained as non-voter at its observed address, got {:?}",
        node3
    );
    assert_eq!(voter_nodes(&outcome.target), vec!["1"]);
    assert!(outcome.changed, "expected a change");

    Ok(())
}

#[test]
fn plan_without_resolvable_nodes_is_not_viable() {
    let res = plan(&PeerGroupConfig::default(), None, &[], &DesiredSpace::NoPreference, PORT, 7);
    assert!(matches!(res, Err(PeerGroupError::NoViableConfiguration { .. })), "expected NoViableConfiguration got {:?}", res);

    let trackers = vec![ControllerTracker::new("1", vec![], true, 1)];
    let res = plan(&PeerGroupConfig::default(), None, &trackers, &DesiredSpace::NoPreference, PORT, 7);
    assert!(matches!(res, Err(PeerGroupError::NoViableConfiguration { .. })), "expected NoViableConfiguration got {:?}", res);
}

#[test]
fn plan_rejects_unset_space() {
    let trackers = vec![cloud_tracker(1, true)];
    let desired = DesiredSpace::Space(SpaceInfo {
        id: "0".into(),
        name: "alpha".into(),
    });
    let res = plan(&PeerGroupConfig::default(), None, &trackers, &desired, PORT, 7);
    assert_eq!(res, Err(PeerGroupError::InvalidSpaceArgument { node_id: "1".into() }));
}

#[test]
fn plan_rejects_duplicate_observed_tags() {
    let observed = PeerGroupConfig::new(1, vec![member(0, 1, 1, VOTER_PRIORITY), member(1, 1, 0, 0.0)]);
    let trackers = vec![cloud_tracker(1, true)];
    let res = plan(&observed, None, &trackers, &DesiredSpace::NoPreference, PORT, 7);
    assert!(matches!(res, Err(PeerGroupError::InvalidObservedConfig(_))), "expected InvalidObservedConfig got {:?}", res);
}
