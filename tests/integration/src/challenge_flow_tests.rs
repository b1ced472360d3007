//! Challenge flow tests
//!
//! Peer publishes a signed challenge on the relay → holder verifies it,
//! prompts for presence and publishes the response, or purges the entry.

use crate::test_utils::{settle, TestHolder, TestPeer, UserBehaviour};
use keyward_core::encoding;
use keyward_crypto::verify_signature;
use keyward_stream::RemoteEventStore;
use tokio::time::Duration;

async fn paired_holder(behaviour: UserBehaviour) -> (TestHolder, TestPeer, Vec<u8>) {
    let holder = TestHolder::start(behaviour).await;
    let peer = TestPeer::new("ws-1");
    let paired = holder.pair(&peer).await.unwrap();
    let holder_key = paired.response.public_key_der().unwrap();
    (holder, peer, holder_key)
}

#[tokio::test(start_paused = true)]
async fn test_fresh_challenge_gets_signed_response() {
    let (holder, peer, holder_key) = paired_holder(UserBehaviour::Approve).await;
    let before = holder.store.load_device("ws-1").unwrap().unwrap().last_used;

    let key = holder.relay_challenge(&peer, -1_000, 1).await;
    settle().await;

    let challenge = holder.store.load_challenge(&key).unwrap().unwrap();
    let response = challenge.response.clone().expect("challenge answered");
    assert!(!challenge.canceled);
    assert_eq!(holder.remote_value(&peer, &key), Some(response.clone()));

    let message = encoding::decode(&key).unwrap();
    let signature = encoding::decode(&response).unwrap();
    assert!(verify_signature(&holder_key, &message, &signature).is_ok());

    let after = holder.store.load_device("ws-1").unwrap().unwrap().last_used;
    assert!(after >= before);
    assert!(after >= challenge.timestamp);
    assert_eq!(holder.user.prompts(), 1);

    // The expiry timer finds the challenge finalized and leaves the response alone.
    tokio::time::sleep(Duration::from_secs(50)).await;
    assert_eq!(holder.remote_value(&peer, &key), Some(response));
}

#[tokio::test(start_paused = true)]
async fn test_stale_challenge_is_purged_without_prompt() {
    let (holder, peer, _) = paired_holder(UserBehaviour::Approve).await;

    let key = holder.relay_challenge(&peer, -40_000, 1).await;
    settle().await;

    assert_eq!(holder.remote_value(&peer, &key), None);
    assert_eq!(holder.user.prompts(), 0);
    let challenge = holder.store.load_challenge(&key).unwrap().unwrap();
    assert!(challenge.response.is_none());
    assert!(!challenge.canceled);
}

#[tokio::test(start_paused = true)]
async fn test_future_challenge_is_purged_without_prompt() {
    let (holder, peer, _) = paired_holder(UserBehaviour::Approve).await;

    let key = holder.relay_challenge(&peer, 10_000, 1).await;
    settle().await;

    assert_eq!(holder.remote_value(&peer, &key), None);
    assert_eq!(holder.user.prompts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_challenge_signed_by_stranger_never_prompts() {
    let (holder, peer, _) = paired_holder(UserBehaviour::Approve).await;
    let stranger = TestPeer::new("intruder");

    let (bytes, key) = peer.challenge(0, 1);
    holder.relay(&peer, &key, &stranger.sign(&bytes)).await;
    holder.relay(&peer, "%%%", "not base64").await;
    settle().await;

    assert_eq!(holder.user.prompts(), 0);
    assert!(holder.store.load_challenge(&key).unwrap().unwrap().response.is_none());
    // Unverified challenges stay until the expiry timer removes them.
    assert!(holder.remote_value(&peer, &key).is_some());
    tokio::time::sleep(Duration::from_secs(46)).await;
    assert_eq!(holder.remote_value(&peer, &key), None);
}

#[tokio::test(start_paused = true)]
async fn test_redelivered_challenge_is_noop() {
    let (holder, peer, _) = paired_holder(UserBehaviour::Approve).await;
    let key = holder.relay_challenge(&peer, 0, 1).await;
    settle().await;
    let answered = holder.store.load_challenge(&key).unwrap().unwrap();

    // Relay redelivers the original entry after a reconnect.
    holder
        .remote
        .remove_value(&peer.namespace(), &key)
        .await
        .unwrap();
    holder
        .relay(&peer, &key, answered.signature.as_deref().unwrap())
        .await;
    settle().await;

    assert_eq!(holder.user.prompts(), 1);
    assert_eq!(holder.store.load_challenge(&key).unwrap().unwrap(), answered);
}

#[tokio::test(start_paused = true)]
async fn test_denied_prompt_cancels_challenge() {
    let (holder, peer, _) = paired_holder(UserBehaviour::Deny).await;
    let key = holder.relay_challenge(&peer, 0, 1).await;
    settle().await;

    let challenge = holder.store.load_challenge(&key).unwrap().unwrap();
    assert!(challenge.canceled);
    assert!(challenge.response.is_none());
    assert_eq!(holder.remote_value(&peer, &key), None);
}

#[tokio::test(start_paused = true)]
async fn test_peer_withdrawal_cancels_open_prompt() {
    let (holder, peer, _) = paired_holder(UserBehaviour::Ignore).await;
    let key = holder.relay_challenge(&peer, 0, 1).await;
    settle().await;
    assert_eq!(holder.user.prompts(), 1);

    holder
        .remote
        .remove_value(&peer.namespace(), &key)
        .await
        .unwrap();
    settle().await;

    let challenge = holder.store.load_challenge(&key).unwrap().unwrap();
    assert!(challenge.canceled);
    assert!(challenge.response.is_none());
    assert!(challenge.responded_at.is_some());
    assert_eq!(holder.user.prompts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ignored_prompt_expires() {
    let (holder, peer, _) = paired_holder(UserBehaviour::Ignore).await;
    let key = holder.relay_challenge(&peer, 0, 1).await;
    settle().await;

    tokio::time::sleep(Duration::from_secs(44)).await;
    assert!(holder.remote_value(&peer, &key).is_some());

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(holder.remote_value(&peer, &key), None);
    let challenge = holder.store.load_challenge(&key).unwrap().unwrap();
    assert!(challenge.canceled);
    assert!(challenge.response.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_platform_dismissal_is_retried() {
    let (holder, peer, _) = paired_holder(UserBehaviour::GlitchThenApprove).await;
    let key = holder.relay_challenge(&peer, 0, 1).await;
    settle().await;

    assert_eq!(holder.user.prompts(), 2);
    let challenge = holder.store.load_challenge(&key).unwrap().unwrap();
    assert!(challenge.response.is_some());
    assert!(!challenge.canceled);
}

#[tokio::test(start_paused = true)]
async fn test_challenges_of_two_peers_are_independent() {
    let (holder, first, _) = paired_holder(UserBehaviour::Approve).await;
    let second = TestPeer::new("ws-2");
    holder.pair(&second).await.unwrap();

    let a = holder.relay_challenge(&first, 0, 1).await;
    let b = holder.relay_challenge(&second, 0, 2).await;
    settle().await;

    assert!(holder.remote_value(&first, &a).is_some());
    assert!(holder.remote_value(&second, &b).is_some());
    assert_eq!(holder.remote_value(&first, &b), None);
    assert_eq!(holder.store.load_challenges("ws-1").unwrap().len(), 1);
    assert_eq!(holder.store.load_challenges("ws-2").unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_relay_outage_does_not_stop_processing() {
    let (holder, peer, _) = paired_holder(UserBehaviour::Approve).await;
    holder.remote.inject_error(&peer.namespace(), "socket closed");
    let key = holder.relay_challenge(&peer, 0, 1).await;
    settle().await;

    assert!(holder.store.load_challenge(&key).unwrap().unwrap().response.is_some());
}
