//! Integration tests for the identity coordinator
//!
//! Every capability is backed by one `FakeController`, so the journal shows
//! the exact order of advertising, scanning, pairing and HCI calls.

mod common;

use std::time::Duration;

use bleid_core::hci::opcode;
use bleid_core::testing::{CallMatcher, RadioEvent};
use bleid_core::{crypto, GatewayError, RadioTarget, RandomAddressKind};
use bleid_runtime::{
    AdvHandle, CoordinatorConfig, IdentityError, IdentityIndex, IdentityState, OperationKind,
    PrivacyConfig, RemovePolicy, RetryPolicy, RotationReason,
};
use common::{default_irk, peer, public_addr, Harness, DEFAULT};
use tokio::time::timeout;

fn requested() -> OperationKind {
    OperationKind::Rotate {
        reason: RotationReason::Requested,
    }
}

fn command(code: u16, params: Vec<u8>) -> RadioEvent {
    RadioEvent::Command {
        opcode: code,
        params,
    }
}

// ----------------------------------------------------------------------------
// Unpair
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_unpair_end_to_end() {
    let h = Harness::new();
    h.advertise(1, DEFAULT, true).await;

    let outcome = h.coordinator.unpair(DEFAULT).await.unwrap();
    let address = outcome.address.expect("unpair programs a new address");
    assert_eq!(address.random_kind(), RandomAddressKind::NonResolvable);
    assert!(outcome.is_fully_resumed());

    let mut adv_params = vec![1];
    adv_params.extend_from_slice(address.as_bytes());
    assert_eq!(
        h.fake.journal(),
        vec![
            RadioEvent::adv(1, false),
            command(opcode::LE_SET_RANDOM_ADDRESS, address.as_bytes().to_vec()),
            command(opcode::LE_SET_ADV_SET_RANDOM_ADDRESS, adv_params),
            RadioEvent::adv(1, true),
        ]
    );

    let identity = h.coordinator.identity(DEFAULT).await.unwrap();
    assert_eq!(identity.resolving_key, None);
    assert_eq!(identity.current_private_address, Some(address));
    assert_eq!(identity.state, IdentityState::Idle);
    assert!(h.set_enabled(1).await);
    assert_eq!(
        h.coordinator.current_address(DEFAULT).await.unwrap(),
        bleid_runtime::LeAddress::random(address)
    );
}

#[tokio::test]
async fn test_unpair_without_privacy_only_clears_key() {
    let config = CoordinatorConfig::testing().with_privacy(PrivacyConfig::new().with_privacy(false));
    let h = Harness::with_config(config);
    h.advertise(1, DEFAULT, true).await;

    let outcome = h.coordinator.unpair(DEFAULT).await.unwrap();
    assert_eq!(outcome.address, None);
    assert_eq!(
        h.fake.journal(),
        vec![RadioEvent::adv(1, false), RadioEvent::adv(1, true)]
    );
    let identity = h.coordinator.identity(DEFAULT).await.unwrap();
    assert_eq!(identity.resolving_key, None);
    assert_eq!(identity.rotation_deadline, None);
}

#[tokio::test]
async fn test_unknown_index_rejected() {
    let h = Harness::new();
    assert_eq!(
        h.coordinator.unpair(IdentityIndex::new(3)).await.unwrap_err(),
        IdentityError::InvalidIdentity {
            index: IdentityIndex::new(3)
        }
    );
    assert!(h.fake.journal().is_empty());
}

// ----------------------------------------------------------------------------
// Pause, Update and Resume Failures
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_pause_failure_leaves_store_unchanged() {
    let h = Harness::new();
    h.advertise(1, DEFAULT, true).await;
    h.advertise(2, DEFAULT, true).await;
    h.fake
        .fail(CallMatcher::adv(2, false), GatewayError::Rejected { status: 0x0c });

    let before = h.coordinator.identity(DEFAULT).await.unwrap();
    let err = h.coordinator.unpair(DEFAULT).await.unwrap_err();
    assert!(matches!(
        err,
        IdentityError::PauseFailed {
            target: RadioTarget::Advertising(handle),
            ..
        } if handle == AdvHandle::new(2)
    ));

    // Set 1 was paused and is resumed; set 2 never stopped
    assert_eq!(
        h.fake.journal(),
        vec![
            RadioEvent::adv(1, false),
            RadioEvent::adv(2, false),
            RadioEvent::adv(1, true),
        ]
    );
    assert!(h.set_enabled(1).await);
    assert!(h.set_enabled(2).await);
    assert_eq!(h.coordinator.identity(DEFAULT).await.unwrap(), before);
}

#[tokio::test]
async fn test_update_failure_rolls_back() {
    let h = Harness::new();
    h.advertise(1, DEFAULT, true).await;
    h.fake.fail(
        CallMatcher::Opcode(opcode::LE_SET_ADV_SET_RANDOM_ADDRESS),
        GatewayError::Rejected { status: 0x0c },
    );

    let err = h.coordinator.rotate_address_now(DEFAULT).await.unwrap_err();
    assert!(matches!(
        err,
        IdentityError::CommandFailed {
            opcode: opcode::LE_SET_ADV_SET_RANDOM_ADDRESS,
            ..
        }
    ));
    assert_eq!(h.fake.journal().last(), Some(&RadioEvent::adv(1, true)));

    let identity = h.coordinator.identity(DEFAULT).await.unwrap();
    assert_eq!(identity.current_private_address, None);
    assert_eq!(identity.state, IdentityState::Idle);
    assert!(h.set_enabled(1).await);
    assert_eq!(h.coordinator.stats().operations_failed, 1);
}

#[tokio::test]
async fn test_command_timeout_reported() {
    let h = Harness::new();
    let _gate = h.fake.hold(CallMatcher::Opcode(opcode::LE_SET_RANDOM_ADDRESS));

    let err = h.coordinator.rotate_address_now(DEFAULT).await.unwrap_err();
    assert_eq!(
        err,
        IdentityError::GatewayTimeout {
            opcode: opcode::LE_SET_RANDOM_ADDRESS,
            duration_ms: 200
        }
    );
}

#[tokio::test]
async fn test_resume_failure_reported_in_outcome() {
    let h = Harness::new();
    h.advertise(1, DEFAULT, true).await;
    h.fake
        .fail(CallMatcher::adv(1, true), GatewayError::Transport("link lost".into()));

    let outcome = h.coordinator.rotate_address_now(DEFAULT).await.unwrap();
    assert_eq!(outcome.resume_failures.len(), 1);
    assert_eq!(
        outcome.resume_failures[0].target,
        RadioTarget::Advertising(AdvHandle::new(1))
    );

    // The new address stays committed; the set stays disabled
    let identity = h.coordinator.identity(DEFAULT).await.unwrap();
    assert_eq!(identity.current_private_address, outcome.address);
    assert!(!h.set_enabled(1).await);
    assert_eq!(h.coordinator.stats().resume_failures, 1);
    assert!(matches!(
        outcome.into_result(),
        Err(IdentityError::ResumeFailed { .. })
    ));
}

#[tokio::test]
async fn test_disabled_set_untouched() {
    let h = Harness::new();
    h.advertise(1, DEFAULT, false).await;

    h.coordinator.rotate_address_now(DEFAULT).await.unwrap();

    let journal = h.fake.journal();
    assert!(journal
        .iter()
        .all(|event| !matches!(event, RadioEvent::AdvEnable { .. })));
    assert_eq!(
        h.fake.opcodes(),
        vec![
            opcode::LE_SET_RANDOM_ADDRESS,
            opcode::LE_SET_ADV_SET_RANDOM_ADDRESS
        ]
    );
    assert!(!h.set_enabled(1).await);
}

#[tokio::test]
async fn test_scanner_paused_with_its_identity() {
    let h = Harness::new();
    h.advertise(1, DEFAULT, true).await;
    h.coordinator.note_scan_enabled(true).await.unwrap();

    let outcome = h.coordinator.rotate_address_now(DEFAULT).await.unwrap();
    let address = outcome.address.unwrap();
    assert!(crypto::rpa_matches(&default_irk(), &address));

    let mut adv_params = vec![1];
    adv_params.extend_from_slice(address.as_bytes());
    assert_eq!(
        h.fake.journal(),
        vec![
            RadioEvent::adv(1, false),
            RadioEvent::scan(false),
            command(opcode::LE_SET_RANDOM_ADDRESS, address.as_bytes().to_vec()),
            command(opcode::LE_SET_ADV_SET_RANDOM_ADDRESS, adv_params),
            RadioEvent::scan(true),
            RadioEvent::adv(1, true),
        ]
    );
    assert!(h.coordinator.scan_instance().await.enabled);
}

#[tokio::test]
async fn test_other_identity_leaves_scanner_alone() {
    let h = Harness::new();
    let one = h.coordinator.add_identity(public_addr(1), None).await.unwrap();
    h.advertise(4, one, true).await;
    h.coordinator.note_scan_enabled(true).await.unwrap();

    let outcome = h.coordinator.rotate_address_now(one).await.unwrap();
    assert_eq!(
        outcome.address.unwrap().random_kind(),
        RandomAddressKind::NonResolvable
    );
    assert_eq!(
        h.fake.opcodes(),
        vec![opcode::LE_SET_ADV_SET_RANDOM_ADDRESS]
    );
    assert!(!h.fake.journal().contains(&RadioEvent::scan(false)));
}

#[tokio::test]
async fn test_default_rotation_pauses_scanner_bound_elsewhere() {
    let h = Harness::new();
    let one = h.coordinator.add_identity(public_addr(1), None).await.unwrap();
    h.coordinator.bind_scanner(one).await.unwrap();
    h.coordinator.note_scan_enabled(true).await.unwrap();

    // The device random address belongs to the default identity
    let outcome = h.coordinator.rotate_address_now(DEFAULT).await.unwrap();
    let address = outcome.address.unwrap();
    assert_eq!(
        h.fake.journal(),
        vec![
            RadioEvent::scan(false),
            command(opcode::LE_SET_RANDOM_ADDRESS, address.as_bytes().to_vec()),
            RadioEvent::scan(true),
        ]
    );
    let scan = h.coordinator.scan_instance().await;
    assert!(scan.enabled);
    assert!(scan.is_bound_to(one));
}

// ----------------------------------------------------------------------------
// Random Source Retry
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_transient_random_failure_retried() {
    let h = Harness::new();
    h.random.push_failures(2);

    let outcome = h.coordinator.rotate_address_now(DEFAULT).await.unwrap();
    assert!(outcome.address.is_some());
    assert_eq!(h.random.calls(), 3);
}

#[tokio::test]
async fn test_random_retry_exhausted() {
    let config = CoordinatorConfig::testing().with_random_retry(RetryPolicy::immediate(3));
    let h = Harness::with_config(config);
    h.advertise(1, DEFAULT, true).await;
    h.random.push_failures(3);

    let err = h.coordinator.rotate_address_now(DEFAULT).await.unwrap_err();
    assert_eq!(err, IdentityError::AddressGenerationFailed { attempts: 3 });
    assert_eq!(
        h.fake.journal(),
        vec![RadioEvent::adv(1, false), RadioEvent::adv(1, true)]
    );
    assert_eq!(
        h.coordinator
            .identity(DEFAULT)
            .await
            .unwrap()
            .current_private_address,
        None
    );
}

// ----------------------------------------------------------------------------
// Removal
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_remove_rejected_while_in_use() {
    let h = Harness::new();
    let one = h.coordinator.add_identity(public_addr(1), None).await.unwrap();
    h.advertise(3, one, true).await;

    let err = h
        .coordinator
        .remove_identity(one, RemovePolicy::Reject)
        .await
        .unwrap_err();
    assert_eq!(err, IdentityError::IdentityInUse { index: one });
    assert!(h.fake.journal().is_empty());
    assert!(h.coordinator.identity(one).await.is_ok());
}

#[tokio::test]
async fn test_remove_force_detach_never_reenables() {
    let h = Harness::new();
    let one = h.coordinator.add_identity(public_addr(1), None).await.unwrap();
    h.advertise(3, one, true).await;

    h.coordinator
        .remove_identity(one, RemovePolicy::ForceDetach)
        .await
        .unwrap();

    assert_eq!(
        h.fake.journal(),
        vec![
            RadioEvent::adv(3, false),
            RadioEvent::Unpair {
                index: one,
                peer: None
            },
        ]
    );
    let set = h
        .coordinator
        .advertising_set(AdvHandle::new(3))
        .await
        .unwrap();
    assert!(set.is_detached());
    assert!(!set.enabled);
    assert_eq!(
        h.coordinator.identity(one).await.unwrap_err(),
        IdentityError::InvalidIdentity { index: one }
    );

    // The index is free again once the removal has finished
    let again = h.coordinator.add_identity(public_addr(2), None).await.unwrap();
    assert_eq!(again, one);
}

#[tokio::test]
async fn test_remove_rebinds_scanner_to_default() {
    let h = Harness::new();
    let one = h.coordinator.add_identity(public_addr(1), None).await.unwrap();
    h.coordinator.bind_scanner(one).await.unwrap();
    h.coordinator.note_scan_enabled(true).await.unwrap();

    assert_eq!(
        h.coordinator
            .remove_identity(one, RemovePolicy::Reject)
            .await
            .unwrap_err(),
        IdentityError::IdentityInUse { index: one }
    );

    h.coordinator
        .remove_identity(one, RemovePolicy::ForceDetach)
        .await
        .unwrap();
    assert_eq!(
        h.fake.journal(),
        vec![
            RadioEvent::scan(false),
            RadioEvent::Unpair {
                index: one,
                peer: None
            },
            RadioEvent::scan(true),
        ]
    );
    let scan = h.coordinator.scan_instance().await;
    assert_eq!(scan.bound_identity, DEFAULT);
    assert!(scan.enabled);
}

#[tokio::test]
async fn test_default_identity_cannot_be_removed() {
    let h = Harness::new();
    assert_eq!(
        h.coordinator
            .remove_identity(DEFAULT, RemovePolicy::ForceDetach)
            .await
            .unwrap_err(),
        IdentityError::InvalidIdentity { index: DEFAULT }
    );
}

#[tokio::test]
async fn test_pairing_failure_aborts_removal() {
    let h = Harness::new();
    let one = h.coordinator.add_identity(public_addr(1), None).await.unwrap();
    h.advertise(2, one, true).await;
    h.fake
        .fail(CallMatcher::Unpair, GatewayError::Transport("bond store busy".into()));

    let err = h
        .coordinator
        .remove_identity(one, RemovePolicy::ForceDetach)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::PairingFailed { index, .. } if index == one));
    assert!(h.coordinator.identity(one).await.is_ok());
    assert!(h.set_enabled(2).await);
    assert_eq!(h.fake.journal().last(), Some(&RadioEvent::adv(2, true)));
}

// ----------------------------------------------------------------------------
// Adding Identities
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_add_identity_limits() {
    let config =
        CoordinatorConfig::testing().with_privacy(PrivacyConfig::new().with_max_identities(2));
    let h = Harness::with_config(config);

    assert_eq!(
        h.coordinator.add_identity(public_addr(0), None).await,
        Err(IdentityError::DuplicateAddress {
            address: public_addr(0)
        })
    );
    let one = h.coordinator.add_identity(public_addr(1), None).await.unwrap();
    assert_eq!(one, IdentityIndex::new(1));
    assert_eq!(
        h.coordinator.add_identity(public_addr(2), None).await,
        Err(IdentityError::CapacityExceeded { max: 2 })
    );

    // With privacy enabled the first rotation is due at once
    let identity = h.coordinator.identity(one).await.unwrap();
    assert_eq!(identity.rotation_deadline, Some(h_now(&h)));
    assert_eq!(h.coordinator.identities().await.len(), 2);
}

fn h_now(h: &Harness) -> bleid_core::Timestamp {
    use bleid_core::TimeSource;
    h.time.now()
}

#[tokio::test]
async fn test_create_identity_generates_static_address() {
    let h = Harness::new();
    let index = h.coordinator.create_identity(None, None).await.unwrap();
    let identity = h.coordinator.identity(index).await.unwrap();
    assert!(identity.address.is_static_random());
    assert!(!identity.supports_privacy());
    assert!(h.fake.journal().is_empty());
}

// ----------------------------------------------------------------------------
// Resolving List
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_resolving_entries_and_capacity() {
    let config =
        CoordinatorConfig::testing().with_privacy(PrivacyConfig::new().with_resolving_list_size(1));
    let h = Harness::with_config(config);
    let peer_irk = bleid_runtime::Irk::new([0x33; 16]);

    h.coordinator
        .add_resolving_entry(DEFAULT, peer(1), peer_irk)
        .await
        .unwrap();
    assert_eq!(
        h.fake.opcodes(),
        vec![
            opcode::LE_SET_ADDRESS_RESOLUTION_ENABLE,
            opcode::LE_ADD_DEVICE_TO_RESOLVING_LIST,
            opcode::LE_SET_ADDRESS_RESOLUTION_ENABLE,
        ]
    );
    let add_params = h
        .fake
        .journal()
        .into_iter()
        .find_map(|event| match event {
            RadioEvent::Command {
                opcode: code,
                params,
            } if code == opcode::LE_ADD_DEVICE_TO_RESOLVING_LIST => Some(params),
            _ => None,
        })
        .unwrap();
    assert_eq!(add_params.len(), 39);
    assert_eq!(&add_params[23..39], &default_irk().to_hci_bytes());

    h.fake.clear_journal();
    assert_eq!(
        h.coordinator
            .add_resolving_entry(DEFAULT, peer(2), peer_irk)
            .await
            .unwrap_err(),
        IdentityError::CapacityExceeded { max: 1 }
    );
    assert!(h.fake.journal().is_empty());

    h.coordinator
        .remove_resolving_entry(DEFAULT, peer(1))
        .await
        .unwrap();
    // Resolution stays off once the list is empty
    assert_eq!(
        h.fake.journal(),
        vec![
            command(opcode::LE_SET_ADDRESS_RESOLUTION_ENABLE, vec![0]),
            command(
                opcode::LE_REMOVE_DEVICE_FROM_RESOLVING_LIST,
                [&[0u8][..], &peer(1).addr.as_bytes()[..]].concat()
            ),
        ]
    );
    assert!(h.coordinator.resolving_entries().await.is_empty());

    assert_eq!(
        h.coordinator
            .remove_resolving_entry(DEFAULT, peer(1))
            .await
            .unwrap_err(),
        IdentityError::PeerNotFound {
            index: DEFAULT,
            peer: peer(1)
        }
    );
}

#[tokio::test]
async fn test_unpair_purges_resolving_entries() {
    let h = Harness::new();
    let one = h
        .coordinator
        .add_identity(public_addr(1), Some(bleid_runtime::Irk::new([0x44; 16])))
        .await
        .unwrap();
    let peer_irk = bleid_runtime::Irk::new([0x33; 16]);
    h.coordinator
        .add_resolving_entry(one, peer(1), peer_irk)
        .await
        .unwrap();
    h.coordinator
        .add_resolving_entry(DEFAULT, peer(2), peer_irk)
        .await
        .unwrap();
    h.fake.clear_journal();

    h.coordinator.unpair(one).await.unwrap();

    // The default identity's entry remains, so resolution comes back on
    assert_eq!(
        h.fake.opcodes(),
        vec![
            opcode::LE_SET_ADDRESS_RESOLUTION_ENABLE,
            opcode::LE_REMOVE_DEVICE_FROM_RESOLVING_LIST,
            opcode::LE_SET_ADDRESS_RESOLUTION_ENABLE,
        ]
    );
    let entries = h.coordinator.resolving_entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].identity, DEFAULT);
    assert_eq!(h.coordinator.identity(one).await.unwrap().resolving_key, None);
}

#[tokio::test]
async fn test_failed_unpair_keeps_resolving_entries() {
    let h = Harness::new();
    let peer_irk = bleid_runtime::Irk::new([0x33; 16]);
    h.coordinator
        .add_resolving_entry(DEFAULT, peer(1), peer_irk)
        .await
        .unwrap();
    h.fake.clear_journal();
    h.fake.fail(
        CallMatcher::Opcode(opcode::LE_SET_RANDOM_ADDRESS),
        GatewayError::Rejected { status: 0x0c },
    );

    let err = h.coordinator.unpair(DEFAULT).await.unwrap_err();
    assert!(matches!(
        err,
        IdentityError::CommandFailed {
            opcode: opcode::LE_SET_RANDOM_ADDRESS,
            ..
        }
    ));

    // The purged entry goes back into the controller list
    assert_eq!(
        h.fake.opcodes(),
        vec![
            opcode::LE_SET_ADDRESS_RESOLUTION_ENABLE,
            opcode::LE_REMOVE_DEVICE_FROM_RESOLVING_LIST,
            opcode::LE_SET_RANDOM_ADDRESS,
            opcode::LE_ADD_DEVICE_TO_RESOLVING_LIST,
            opcode::LE_SET_ADDRESS_RESOLUTION_ENABLE,
        ]
    );
    assert_eq!(
        h.fake.journal().last(),
        Some(&command(opcode::LE_SET_ADDRESS_RESOLUTION_ENABLE, vec![1]))
    );
    let identity = h.coordinator.identity(DEFAULT).await.unwrap();
    assert_eq!(identity.resolving_key, Some(default_irk()));
    assert_eq!(h.coordinator.resolving_entries().await.len(), 1);
}

#[tokio::test]
async fn test_failed_removal_keeps_resolving_entries() {
    let h = Harness::new();
    let one = h
        .coordinator
        .add_identity(public_addr(1), Some(bleid_runtime::Irk::new([0x44; 16])))
        .await
        .unwrap();
    h.coordinator
        .add_resolving_entry(one, peer(1), bleid_runtime::Irk::new([0x33; 16]))
        .await
        .unwrap();
    h.fake.clear_journal();
    h.fake
        .fail(CallMatcher::Unpair, GatewayError::Transport("bond store busy".into()));

    let err = h
        .coordinator
        .remove_identity(one, RemovePolicy::ForceDetach)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::PairingFailed { index, .. } if index == one));

    let opcodes = h.fake.opcodes();
    assert_eq!(
        &opcodes[opcodes.len() - 2..],
        &[
            opcode::LE_ADD_DEVICE_TO_RESOLVING_LIST,
            opcode::LE_SET_ADDRESS_RESOLUTION_ENABLE,
        ]
    );
    assert!(h.coordinator.identity(one).await.is_ok());
    let entries = h.coordinator.resolving_entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].identity, one);
}

// ----------------------------------------------------------------------------
// Serialization
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_same_index_operations_serialized() {
    let h = Harness::new();
    h.advertise(1, DEFAULT, true).await;
    let gate = h.fake.hold(CallMatcher::adv(1, false));

    let first = h.coordinator.submit(DEFAULT, requested()).await.unwrap();
    gate.arrived().await;
    let second = h
        .coordinator
        .submit(DEFAULT, OperationKind::Unpair)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.fake.journal(), vec![RadioEvent::adv(1, false)]);
    assert_eq!(h.coordinator.active_operation(DEFAULT).await, Some(first.id()));
    assert_eq!(h.coordinator.pending_operations(DEFAULT).await, 1);

    // Notes from the application wait until the identity is idle again
    assert_eq!(
        h.coordinator
            .note_advertising_enabled(AdvHandle::new(1), false)
            .await,
        Err(IdentityError::IdentityBusy { index: DEFAULT })
    );

    gate.release();
    let first = first.wait().await.unwrap();
    let second = second.wait().await.unwrap();
    assert!(first.id < second.id);

    let adv: Vec<RadioEvent> = h
        .fake
        .journal()
        .into_iter()
        .filter(|event| matches!(event, RadioEvent::AdvEnable { .. }))
        .collect();
    assert_eq!(
        adv,
        vec![
            RadioEvent::adv(1, false),
            RadioEvent::adv(1, true),
            RadioEvent::adv(1, false),
            RadioEvent::adv(1, true),
        ]
    );
    assert_eq!(h.fake.journal().len(), 8);
}

#[tokio::test]
async fn test_different_indices_interleave() {
    let h = Harness::new();
    let one = h.coordinator.add_identity(public_addr(1), None).await.unwrap();
    h.advertise(1, DEFAULT, true).await;
    h.advertise(2, one, true).await;
    let gate = h.fake.hold(CallMatcher::adv(1, false));

    let blocked = h.coordinator.submit(DEFAULT, requested()).await.unwrap();
    gate.arrived().await;

    let other = timeout(
        Duration::from_secs(1),
        h.coordinator.rotate_address_now(one),
    )
    .await
    .expect("index 1 must not wait for index 0")
    .unwrap();
    assert!(other.is_fully_resumed());

    let journal = h.fake.journal();
    assert!(journal.contains(&RadioEvent::adv(2, false)));
    assert!(journal.contains(&RadioEvent::adv(2, true)));
    assert!(!journal.contains(&RadioEvent::adv(1, true)));

    gate.release();
    blocked.wait().await.unwrap();
    assert!(h.set_enabled(1).await);
    assert!(h.set_enabled(2).await);
}

#[tokio::test]
async fn test_remove_cancels_queued_operations() {
    let h = Harness::new();
    let one = h.coordinator.add_identity(public_addr(1), None).await.unwrap();
    h.advertise(2, one, true).await;
    let gate = h.fake.hold(CallMatcher::adv(2, false));

    let active = h.coordinator.submit(one, requested()).await.unwrap();
    gate.arrived().await;
    let unpair = h.coordinator.submit(one, OperationKind::Unpair).await.unwrap();
    let rotate = h.coordinator.submit(one, requested()).await.unwrap();
    let remove = h
        .coordinator
        .submit(
            one,
            OperationKind::Remove {
                policy: RemovePolicy::ForceDetach,
            },
        )
        .await
        .unwrap();

    assert_eq!(
        unpair.wait().await,
        Err(IdentityError::OperationCancelled { index: one })
    );
    assert_eq!(
        rotate.wait().await,
        Err(IdentityError::OperationCancelled { index: one })
    );

    gate.release();
    assert!(active.wait().await.is_ok());
    assert!(remove.wait().await.is_ok());
    assert_eq!(h.coordinator.stats().operations_cancelled, 2);
    assert!(h.coordinator.identity(one).await.is_err());
}

#[tokio::test]
async fn test_cancelled_handle_never_runs() {
    let h = Harness::new();
    h.advertise(1, DEFAULT, true).await;
    let gate = h.fake.hold(CallMatcher::adv(1, false));

    let active = h.coordinator.submit(DEFAULT, requested()).await.unwrap();
    gate.arrived().await;
    let queued = h
        .coordinator
        .submit(DEFAULT, OperationKind::Unpair)
        .await
        .unwrap();
    queued.cancel();

    gate.release();
    active.wait().await.unwrap();
    assert_eq!(
        queued.wait().await,
        Err(IdentityError::OperationCancelled { index: DEFAULT })
    );
    assert!(h
        .coordinator
        .identity(DEFAULT)
        .await
        .unwrap()
        .supports_privacy());
    common::eventually(|| h.coordinator.is_quiescent()).await;
}

#[tokio::test]
async fn test_operations_queued_behind_removal_are_cancelled() {
    let h = Harness::new();
    let one = h.coordinator.add_identity(public_addr(1), None).await.unwrap();
    let gate = h.fake.hold(CallMatcher::Unpair);

    let remove = h
        .coordinator
        .submit(
            one,
            OperationKind::Remove {
                policy: RemovePolicy::ForceDetach,
            },
        )
        .await
        .unwrap();
    gate.arrived().await;
    let late = h.coordinator.submit(one, OperationKind::Unpair).await.unwrap();

    gate.release();
    remove.wait().await.unwrap();
    assert_eq!(
        late.wait().await,
        Err(IdentityError::OperationCancelled { index: one })
    );
    assert_eq!(h.coordinator.stats().operations_cancelled, 1);

    // The released index is reused and keeps its key
    let key = bleid_runtime::Irk::new([0x55; 16]);
    let reused = h
        .coordinator
        .add_identity(public_addr(2), Some(key))
        .await
        .unwrap();
    assert_eq!(reused, one);
    common::eventually(|| h.coordinator.is_quiescent()).await;
    assert_eq!(
        h.coordinator.identity(reused).await.unwrap().resolving_key,
        Some(key)
    );
    assert!(h.coordinator.submit(one, OperationKind::Unpair).await.is_ok());
}
