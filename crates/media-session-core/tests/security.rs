// Key exchange sequencing across the media kinds of a call.

use std::time::Duration;

use media_session_core::{
    CallSessionEvent, CallState, Error, HandshakeEvent, MediaKind, SecurityInfoCode, SecuritySource, SecurityState,
    TransportEvent,
};

mod common;
use common::*;

fn secure_on() -> TransportEvent {
    TransportEvent::Handshake(HandshakeEvent::SecureOn {
        cipher: "AES-CM-128".to_string(),
        sas: Some("ab12".to_string()),
        sas_verified: false,
    })
}

fn info_codes(events: &[CallSessionEvent]) -> Vec<(Option<MediaKind>, SecurityInfoCode)> {
    events
        .iter()
        .filter_map(|e| match e {
            CallSessionEvent::SecurityInfo { media, code } => Some((*media, *code)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_slave_waits_for_master() {
    let h = Harness::new();
    let service = h.secure_service(true);
    let session = service.create_call_session().await;
    let mut events = session.take_event_receiver().unwrap();

    session
        .process_offer(&peer_offer("198.51.100.7", 6000, "0", Some("99")))
        .await
        .unwrap();
    session.on_call_state_changed(CallState::InProgress).await.unwrap();

    assert!(h.trace.contains("secure:init:audio:auto"));
    assert!(h.trace.contains("secure:init:video:manual"));
    assert!(h.trace.contains("secure:add_target:audio"));
    assert!(h.trace.contains("secure:add_target:video"));
    assert!(!h.trace.contains("secure:start:video"));
    assert_eq!(session.security_state().await, Some(SecurityState::MasterNegotiating));
    assert!(!session.wait_until_secure(Duration::from_millis(20)).await);

    // the slave reporting first changes nothing
    session.on_transport_event(MediaKind::Video, secure_on()).await.unwrap();
    assert!(!h.trace.contains("secure:start:video"));

    session.on_transport_event(MediaKind::Audio, secure_on()).await.unwrap();
    let apply = h.trace.position("secure:apply:video:18").expect("params applied");
    let start = h.trace.position("secure:start:video").expect("slave started");
    assert!(apply < start);
    assert_eq!(session.security_state().await, Some(SecurityState::AllStarted));
    assert!(session.wait_until_secure(Duration::from_millis(20)).await);

    let events = drain(&mut events);
    assert_eq!(info_codes(&events), vec![(Some(MediaKind::Audio), SecurityInfoCode::EnabledByDefault)]);
    let states: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            CallSessionEvent::SecurityStateChanged { state } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            SecurityState::MasterPending,
            SecurityState::MasterNegotiating,
            SecurityState::MasterSecure,
            SecurityState::AllStarted,
        ]
    );
}

#[tokio::test]
async fn test_init_failure_disables_security_but_not_the_call() {
    let h = Harness::new();
    h.secure.fail_init(MediaKind::Audio);
    let service = h.secure_service(true);
    let session = service.create_call_session().await;
    let mut events = session.take_event_receiver().unwrap();

    session
        .process_offer(&peer_offer("198.51.100.7", 6000, "0", Some("99")))
        .await
        .unwrap();
    session.on_call_state_changed(CallState::InProgress).await.unwrap();

    assert_eq!(session.security_state().await, Some(SecurityState::Disabled));
    assert!(!h.trace.contains("secure:init:video:manual"));
    assert!(h.trace.contains("send:start:audio:PCMU"));
    assert_eq!(
        info_codes(&drain(&mut events)),
        vec![(Some(MediaKind::Audio), SecurityInfoCode::EngineInitFailure)]
    );

    // a local toggle cannot bring it back
    session.set_security_enabled(true, SecuritySource::Local).await;
    assert_eq!(h.trace.count("secure:init:audio"), 1);
}

#[tokio::test]
async fn test_local_toggle_starts_master_handshake() {
    let h = Harness::new();
    let service = h.secure_service(false);
    let session = service.create_call_session().await;
    let mut events = session.take_event_receiver().unwrap();

    session
        .process_offer(&peer_offer("198.51.100.7", 6000, "0", Some("99")))
        .await
        .unwrap();
    assert_eq!(h.trace.count("secure:init"), 0);
    assert!(!session.is_security_enabled().await);
    assert_eq!(
        info_codes(&drain(&mut events)),
        vec![(Some(MediaKind::Audio), SecurityInfoCode::NotEnabledByUser)]
    );

    // a remote request only records the flag
    session.set_security_enabled(true, SecuritySource::Remote).await;
    assert!(session.is_security_enabled().await);
    assert_eq!(h.trace.count("secure:init"), 0);

    session.set_security_enabled(true, SecuritySource::Local).await;
    assert!(h.trace.contains("secure:init:audio:auto"));
    assert!(h.trace.contains("secure:init:video:manual"));
    assert!(!h.trace.contains("secure:start:video"));
    assert_eq!(session.security_state().await, Some(SecurityState::MasterNegotiating));

    // toggling on again does not restart a running handshake
    session.set_security_enabled(true, SecuritySource::Local).await;
    assert_eq!(h.trace.count("secure:init:audio"), 1);
}

#[tokio::test]
async fn test_toggle_off_before_secure_reverts() {
    let h = Harness::audio_only();
    let service = h.secure_service(true);
    let session = service.create_call_session().await;
    session.process_offer(&peer_offer("198.51.100.7", 6000, "0", None)).await.unwrap();

    session.set_security_enabled(false, SecuritySource::Local).await;
    assert_eq!(session.security_state().await, Some(SecurityState::Reverted));

    session.set_security_enabled(true, SecuritySource::Local).await;
    assert_eq!(session.security_state().await, Some(SecurityState::Reverted));
}

#[tokio::test]
async fn test_toggle_off_keeps_secure_session() {
    let h = Harness::audio_only();
    let service = h.secure_service(true);
    let session = service.create_call_session().await;
    session.process_offer(&peer_offer("198.51.100.7", 6000, "0", None)).await.unwrap();
    session.on_transport_event(MediaKind::Audio, secure_on()).await.unwrap();

    session.set_security_enabled(false, SecuritySource::Local).await;
    assert!(!session.is_security_enabled().await);
    assert!(session.security_state().await.unwrap().is_secure());
    assert!(!h.trace.contains("secure:stop:audio"));
}

#[tokio::test]
async fn test_sas_goes_to_master_only() {
    let h = Harness::new();
    let service = h.secure_service(true);
    let session = service.create_call_session().await;
    session
        .process_offer(&peer_offer("198.51.100.7", 6000, "0", Some("99")))
        .await
        .unwrap();

    session.verify_sas(true).await.unwrap();
    assert!(h.trace.contains("secure:sas:audio:true"));
    assert_eq!(h.trace.count("secure:sas:video"), 0);

    let plain = Harness::audio_only();
    let service = plain.service();
    let session = service.create_call_session().await;
    assert!(matches!(session.verify_sas(true).await, Err(Error::NoSecureMaster)));
    assert_eq!(session.security_state().await, None);
    assert!(!session.wait_until_secure(Duration::from_millis(1)).await);
}

#[tokio::test]
async fn test_call_end_tears_down_engines_first() {
    let h = Harness::audio_only();
    let service = h.secure_service(true);
    let session = service.create_call_session().await;
    let mut events = session.take_event_receiver().unwrap();
    session.process_offer(&peer_offer("198.51.100.7", 6000, "0", None)).await.unwrap();
    session.on_call_state_changed(CallState::InProgress).await.unwrap();
    drain(&mut events);

    session.end().await;

    let stop = h.trace.position("secure:stop:audio").expect("engine stopped");
    let cleanup = h.trace.position("secure:cleanup:audio").expect("engine cleaned");
    let dispose = h.trace.position("transport:dispose:audio:5000").expect("transport disposed");
    assert!(stop < cleanup && cleanup < dispose);
    assert_eq!(
        info_codes(&drain(&mut events)),
        vec![(Some(MediaKind::Audio), SecurityInfoCode::DisabledByCallEnd)]
    );
}

#[tokio::test]
async fn test_late_master_handshake_after_revert_stays_reverted() {
    let h = Harness::new();
    let service = h.secure_service(true);
    let session = service.create_call_session().await;
    session
        .process_offer(&peer_offer("198.51.100.7", 6000, "0", Some("99")))
        .await
        .unwrap();
    session.on_call_state_changed(CallState::InProgress).await.unwrap();

    session.set_security_enabled(false, SecuritySource::Local).await;
    assert_eq!(session.security_state().await, Some(SecurityState::Reverted));

    session.on_transport_event(MediaKind::Audio, secure_on()).await.unwrap();
    assert_eq!(session.security_state().await, Some(SecurityState::Reverted));
    assert!(!h.trace.contains("secure:apply:video:18"));
    assert!(!h.trace.contains("secure:start:video"));
    assert!(!session.wait_until_secure(Duration::from_millis(20)).await);
}
