//! Pairing flow tests
//!
//! Scanned payload → device record + holder key → pairing response on the
//! relay → challenge namespace watched.

use crate::test_utils::{settle, TestHolder, TestPeer, UserBehaviour};
use keyward_crypto::{verify_pairing_proof, HardwareKeyStore};
use keyward_identity::{IdentityError, PairingResponse};
use keyward_stream::RemoteEventStore;

#[tokio::test(start_paused = true)]
async fn test_pairing_publishes_response_and_starts_watching() {
    let holder = TestHolder::start(UserBehaviour::Approve).await;
    let peer = TestPeer::new("ws-1");

    let paired = holder.pair(&peer).await.unwrap();

    let info = holder.remote.get_value("i", "ws-1").await.unwrap().unwrap();
    let response: PairingResponse = serde_json::from_str(&info).unwrap();
    assert_eq!(response, paired.response);

    let holder_key = response.public_key_der().unwrap();
    assert!(verify_pairing_proof(&peer.wrapping_key, &holder_key, &response.proof().unwrap()).is_ok());
    assert_eq!(
        holder.keystore.public_key(&paired.device.own_key_alias).unwrap(),
        holder_key
    );

    assert_eq!(holder.supervisor.watched().await, vec!["ws-1"]);
    assert_eq!(holder.remote.subscriber_count(&peer.namespace()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_payload_without_wrapping_key_is_rejected() {
    let holder = TestHolder::start(UserBehaviour::Approve).await;
    let peer = TestPeer::new("ws-1");
    let mut payload: serde_json::Value = serde_json::from_slice(&peer.qr_payload()).unwrap();
    payload.as_object_mut().unwrap().remove("wrappingKey");

    let result = holder.registry.pair(&serde_json::to_vec(&payload).unwrap());
    settle().await;

    assert!(matches!(result, Err(IdentityError::Validation(_))));
    assert!(holder.keystore.aliases().unwrap().is_empty());
    assert!(holder.store.load_devices().unwrap().is_empty());
    assert!(holder.supervisor.watched().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_second_pairing_of_same_peer_is_rejected() {
    let holder = TestHolder::start(UserBehaviour::Approve).await;
    let peer = TestPeer::new("ws-1");
    holder.pair(&peer).await.unwrap();

    assert!(matches!(
        holder.pair(&peer).await,
        Err(IdentityError::DevicePaired { .. })
    ));
    assert_eq!(holder.keystore.aliases().unwrap().len(), 1);
    assert_eq!(holder.remote.subscriber_count(&peer.namespace()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_forgotten_device_keeps_no_key() {
    let holder = TestHolder::start(UserBehaviour::Approve).await;
    let peer = TestPeer::new("ws-1");
    holder.pair(&peer).await.unwrap();
    let key = holder.relay_challenge(&peer, 0, 1).await;
    settle().await;
    assert!(holder.store.load_challenge(&key).unwrap().is_some());

    assert!(holder.supervisor.stop_device("ws-1").await);
    holder.registry.forget("ws-1").unwrap();

    assert!(holder.store.load_challenge(&key).unwrap().is_none());
    assert!(holder.keystore.aliases().unwrap().is_empty());
}
