//! End-to-end behavior of the consultation service over the in-memory store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use concierge_control::{
    CloseRequest, ConsultationControl, ConsultationService, ControlError,
    CreateConsultationRequest, RateRequest, SendMessageRequest, TransferRequest,
};
use concierge_core::{Identity, StaffId, StaffStatus, UserId};
use concierge_router::{ConnectionHandle, ServerEvent};
use concierge_store::{
    ConsultationStatus, MemoryStore, MessageStatus, MessageType, NewConsultation, NewMessage, Page,
    Staff, Store,
};
use tokio::sync::mpsc::UnboundedReceiver;

type Service = ConsultationService<MemoryStore>;

fn staff(id: u64, status: StaffStatus) -> Staff {
    Staff {
        id: StaffId::new(id),
        name: format!("agent-{id}"),
        status,
        updated_at: Utc::now(),
    }
}

fn service_with(members: Vec<Staff>) -> Arc<Service> {
    let store = Arc::new(MemoryStore::with_staff(members));
    Arc::new(ConsultationService::with_defaults(store))
}

async fn connect(
    service: &Service,
    identity: Identity,
) -> (ConnectionHandle, UnboundedReceiver<ServerEvent>) {
    let (handle, rx) = ConnectionHandle::new(identity);
    service.connect(handle.clone(), None).await.unwrap();
    (handle, rx)
}

fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn names(events: &[ServerEvent]) -> Vec<&'static str> {
    events.iter().map(ServerEvent::name).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn accept_race_has_exactly_one_winner() {
    let service = service_with(vec![]);
    let consultation = service
        .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
        .await
        .unwrap();
    assert_eq!(consultation.status, ConsultationStatus::Waiting);

    let mut tasks = Vec::new();
    for staff_id in [10u64, 20] {
        let service = Arc::clone(&service);
        let id = consultation.id;
        tasks.push(tokio::spawn(async move {
            (
                staff_id,
                service.accept_consultation(StaffId::new(staff_id), id).await,
            )
        }));
    }

    let mut winners = Vec::new();
    let mut losers = 0;
    for task in tasks {
        match task.await.unwrap() {
            (staff_id, Ok(_)) => winners.push(staff_id),
            (_, Err(ControlError::InvalidState(_))) => losers += 1,
            (_, Err(other)) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(losers, 1);

    let stored = service
        .store()
        .get_consultation(consultation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.staff_id, Some(StaffId::new(winners[0])));
    assert_eq!(stored.status, ConsultationStatus::Active);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_leave_one_open_consultation() {
    let service = service_with(vec![staff(1, StaffStatus::Online)]);
    let user = UserId::new(5);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move {
            service
                .create_consultation(user, CreateConsultationRequest::auto())
                .await
        }));
    }

    let mut created = Vec::new();
    let mut conflicts = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(consultation) => created.push(consultation.id),
            Err(ControlError::Conflict { existing }) => conflicts.push(existing.id),
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(created.len(), 1);
    assert_eq!(conflicts.len(), 7);
    assert!(conflicts.iter().all(|id| *id == created[0]));
}

#[tokio::test]
async fn recall_window_boundary() {
    let service = service_with(vec![staff(1, StaffStatus::Online)]);
    let user = Identity::User(UserId::new(1));
    let consultation = service
        .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
        .await
        .unwrap();

    let backdated = |seconds: i64| NewMessage {
        consultation_id: consultation.id,
        sender: Some(user),
        message_type: MessageType::Text,
        content: format!("sent {seconds}s ago"),
        extra: None,
        created_at: Utc::now() - Duration::seconds(seconds),
    };
    let recent = service.store().create_message(backdated(119)).await.unwrap();
    let stale = service.store().create_message(backdated(121)).await.unwrap();

    let recalled = service.recall_message(user, recent.id).await.unwrap();
    assert_eq!(recalled.status, MessageStatus::Recalled);

    let err = service.recall_message(user, stale.id).await.unwrap_err();
    assert!(matches!(err, ControlError::InvalidState(_)));

    // History keeps the recalled message, marked as such.
    let history = service
        .message_history(user, consultation.id, Page::default())
        .await
        .unwrap();
    let kept = history.messages.iter().find(|m| m.id == recent.id).unwrap();
    assert_eq!(kept.status, MessageStatus::Recalled);
}

#[tokio::test]
async fn only_the_sender_may_recall() {
    let service = service_with(vec![staff(1, StaffStatus::Online)]);
    let consultation = service
        .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
        .await
        .unwrap();
    let message = service
        .send_message(
            Identity::User(UserId::new(1)),
            SendMessageRequest::text(consultation.id, "hello"),
        )
        .await
        .unwrap();

    let err = service
        .recall_message(Identity::Staff(StaffId::new(1)), message.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Forbidden(_)));
}

#[tokio::test]
async fn least_busy_transfer_close_and_rate() {
    let service = service_with(vec![
        staff(1, StaffStatus::Online), // A
        staff(2, StaffStatus::Online), // B
        staff(3, StaffStatus::Online), // C
    ]);

    // A already holds two active consultations.
    for other_user in [100, 101] {
        service
            .store()
            .create_consultation(NewConsultation {
                user_id: UserId::new(other_user),
                staff_id: Some(StaffId::new(1)),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let user = UserId::new(7);
    let consultation = service
        .create_consultation(user, CreateConsultationRequest::auto())
        .await
        .unwrap();
    assert_eq!(consultation.status, ConsultationStatus::Active);
    assert_eq!(consultation.staff_id, Some(StaffId::new(2)));

    let transferred = service
        .transfer_consultation(
            Identity::Staff(StaffId::new(2)),
            consultation.id,
            TransferRequest {
                target_staff_id: StaffId::new(3),
                reason: "escalation".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(transferred.status, ConsultationStatus::Active);
    assert_eq!(transferred.staff_id, Some(StaffId::new(3)));
    assert_eq!(transferred.transfer_history.len(), 1);
    assert_eq!(transferred.transfer_history[0].reason, "escalation");
    assert_eq!(
        transferred.transfer_history[0].from_staff_id,
        Some(StaffId::new(2))
    );

    let closed = service
        .close_consultation(
            Identity::User(user),
            consultation.id,
            CloseRequest::with_reason("resolved"),
        )
        .await
        .unwrap();
    assert_eq!(closed.status, ConsultationStatus::Closed);
    assert_eq!(closed.close_reason.as_deref(), Some("resolved"));

    let rated = service
        .rate_consultation(
            user,
            consultation.id,
            RateRequest {
                rating: 5,
                feedback: Some("great".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(rated.rating, Some(5));

    // First rating wins.
    let err = service
        .rate_consultation(
            user,
            consultation.id,
            RateRequest {
                rating: 1,
                feedback: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::InvalidState(_)));
}

#[tokio::test]
async fn rating_rules() {
    let service = service_with(vec![staff(1, StaffStatus::Online)]);
    let user = UserId::new(1);
    let consultation = service
        .create_consultation(user, CreateConsultationRequest::auto())
        .await
        .unwrap();

    let err = service
        .rate_consultation(user, consultation.id, RateRequest { rating: 4, feedback: None })
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::InvalidState(_)));

    let err = service
        .rate_consultation(user, consultation.id, RateRequest { rating: 6, feedback: None })
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Validation(_)));

    // A rating given at close counts as the one rating.
    service
        .close_consultation(
            Identity::User(user),
            consultation.id,
            CloseRequest {
                reason: None,
                rating: Some(3),
                feedback: None,
            },
        )
        .await
        .unwrap();
    let err = service
        .rate_consultation(user, consultation.id, RateRequest { rating: 5, feedback: None })
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::InvalidState(_)));

    // Closing twice is a state error.
    let err = service
        .close_consultation(Identity::User(user), consultation.id, CloseRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::InvalidState(_)));
}

#[tokio::test]
async fn transfer_target_must_be_reachable() {
    let service = service_with(vec![
        staff(1, StaffStatus::Online),
        staff(2, StaffStatus::Offline),
    ]);
    let consultation = service
        .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
        .await
        .unwrap();

    let err = service
        .transfer_consultation(
            Identity::Staff(StaffId::new(1)),
            consultation.id,
            TransferRequest {
                target_staff_id: StaffId::new(2),
                reason: "shift over".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::InvalidTarget { .. }));
}

#[tokio::test]
async fn store_failure_prevents_fanout() {
    let service = service_with(vec![staff(1, StaffStatus::Online)]);
    let (_staff_conn, mut staff_rx) = connect(&service, Identity::Staff(StaffId::new(1))).await;
    let consultation = service
        .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
        .await
        .unwrap();
    assert_eq!(names(&drain(&mut staff_rx)), vec!["newConsultation"]);

    service.store().fail_message_writes(true);
    let err = service
        .send_message(
            Identity::User(UserId::new(1)),
            SendMessageRequest::text(consultation.id, "are you there?"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::ServiceUnavailable(_)));
    assert!(err.is_retriable());
    assert!(drain(&mut staff_rx).is_empty());

    service.store().fail_message_writes(false);
    let message = service
        .send_message(
            Identity::User(UserId::new(1)),
            SendMessageRequest::text(consultation.id, "are you there?"),
        )
        .await
        .unwrap();
    match drain(&mut staff_rx).as_slice() {
        [ServerEvent::NewMessage { message: delivered }] => assert_eq!(delivered.id, message.id),
        other => panic!("unexpected events: {other:?}"),
    }
}

#[tokio::test]
async fn typing_reaches_only_the_assigned_staff() {
    let service = service_with(vec![
        staff(1, StaffStatus::Online),
        staff(2, StaffStatus::Busy),
    ]);
    let user = Identity::User(UserId::new(1));
    let (assigned_conn, mut assigned_rx) =
        connect(&service, Identity::Staff(StaffId::new(1))).await;
    let (_other_conn, mut other_rx) = connect(&service, Identity::Staff(StaffId::new(2))).await;

    let consultation = service
        .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
        .await
        .unwrap();
    assert_eq!(consultation.staff_id, Some(StaffId::new(1)));
    drain(&mut assigned_rx);
    drain(&mut other_rx);

    service.set_typing(user, consultation.id, true).await.unwrap();
    assert_eq!(names(&drain(&mut assigned_rx)), vec!["userTyping"]);
    assert!(drain(&mut other_rx).is_empty());

    // Assigned staff goes away: the event is dropped, not rerouted.
    service.disconnect(&assigned_conn).await;
    drain(&mut other_rx);
    service.set_typing(user, consultation.id, false).await.unwrap();
    assert!(drain(&mut other_rx).is_empty());
}

#[tokio::test]
async fn offline_recipient_gets_no_replay() {
    let service = service_with(vec![staff(1, StaffStatus::Online)]);
    let user = Identity::User(UserId::new(1));
    let consultation = service
        .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
        .await
        .unwrap();

    service
        .send_message(user, SendMessageRequest::text(consultation.id, "hello?"))
        .await
        .unwrap();

    let (_conn, mut staff_rx) = connect(&service, Identity::Staff(StaffId::new(1))).await;
    tokio::task::yield_now().await;
    assert!(drain(&mut staff_rx).is_empty());

    // History is the only way back.
    let history = service
        .message_history(Identity::Staff(StaffId::new(1)), consultation.id, Page::default())
        .await
        .unwrap();
    assert!(history.messages.iter().any(|m| m.content == "hello?"));
}

#[tokio::test]
async fn room_events_arrive_in_publish_order_with_store_ids() {
    let service = service_with(vec![staff(1, StaffStatus::Online)]);
    let user = Identity::User(UserId::new(1));
    let (_conn, mut staff_rx) = connect(&service, Identity::Staff(StaffId::new(1))).await;
    let consultation = service
        .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
        .await
        .unwrap();
    drain(&mut staff_rx);

    let mut sent = Vec::new();
    for text in ["one", "two", "three"] {
        let message = service
            .send_message(user, SendMessageRequest::text(consultation.id, text))
            .await
            .unwrap();
        sent.push(message.id);
    }

    let received: Vec<_> = drain(&mut staff_rx)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::NewMessage { message } => Some(message.id),
            _ => None,
        })
        .collect();
    assert_eq!(received, sent);
}

#[tokio::test]
async fn transfer_notifies_both_staff_and_user() {
    let service = service_with(vec![
        staff(1, StaffStatus::Online),
        staff(2, StaffStatus::Online),
    ]);
    let user_id = UserId::new(1);
    let (_user_conn, mut user_rx) = connect(&service, Identity::User(user_id)).await;
    let (_old_conn, mut old_rx) = connect(&service, Identity::Staff(StaffId::new(1))).await;
    let (_new_conn, mut new_rx) = connect(&service, Identity::Staff(StaffId::new(2))).await;

    let consultation = service
        .create_consultation(user_id, CreateConsultationRequest::to_staff(StaffId::new(1)))
        .await
        .unwrap();
    drain(&mut user_rx);
    drain(&mut old_rx);
    drain(&mut new_rx);

    service
        .transfer_consultation(
            Identity::User(user_id),
            consultation.id,
            TransferRequest {
                target_staff_id: StaffId::new(2),
                reason: "billing question".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(names(&drain(&mut old_rx)), vec!["consultationTransferring"]);
    assert_eq!(names(&drain(&mut new_rx)), vec!["consultationTransferred"]);
    // The user initiated it and is not echoed.
    assert!(drain(&mut user_rx).is_empty());
}

#[tokio::test]
async fn read_receipts_go_to_the_counterpart() {
    let service = service_with(vec![staff(1, StaffStatus::Online)]);
    let user = Identity::User(UserId::new(1));
    let staff_identity = Identity::Staff(StaffId::new(1));
    let (_user_conn, mut user_rx) = connect(&service, user).await;

    let consultation = service
        .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
        .await
        .unwrap();
    let message = service
        .send_message(user, SendMessageRequest::text(consultation.id, "ping"))
        .await
        .unwrap();
    assert_eq!(service.unread_count(staff_identity, consultation.id).await.unwrap(), 1);
    drain(&mut user_rx);

    let changed = service
        .mark_read(staff_identity, consultation.id, None)
        .await
        .unwrap();
    assert_eq!(changed, vec![message.id]);
    assert_eq!(service.unread_count(staff_identity, consultation.id).await.unwrap(), 0);

    match drain(&mut user_rx).as_slice() {
        [ServerEvent::MessagesRead {
            reader,
            message_ids,
            ..
        }] => {
            assert_eq!(*reader, staff_identity);
            assert_eq!(message_ids, &vec![message.id]);
        }
        other => panic!("unexpected events: {other:?}"),
    }

    // Nothing left to mark, nothing published.
    assert!(service
        .mark_read(staff_identity, consultation.id, None)
        .await
        .unwrap()
        .is_empty());
    assert!(drain(&mut user_rx).is_empty());
}

#[tokio::test]
async fn waiting_consultations_are_announced_to_staff() {
    let service = service_with(vec![staff(1, StaffStatus::Busy)]);
    let (_conn, mut staff_rx) = connect(&service, Identity::Staff(StaffId::new(1))).await;

    let consultation = service
        .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
        .await
        .unwrap();
    assert_eq!(consultation.status, ConsultationStatus::Waiting);
    assert_eq!(names(&drain(&mut staff_rx)), vec!["consultationWaiting"]);

    let (_user_conn, mut user_rx) = connect(&service, Identity::User(UserId::new(1))).await;
    service
        .accept_consultation(StaffId::new(1), consultation.id)
        .await
        .unwrap();
    assert_eq!(names(&drain(&mut user_rx)), vec!["staffJoined"]);
}

#[tokio::test]
async fn join_and_leave_notify_the_room() {
    let service = service_with(vec![staff(1, StaffStatus::Online)]);
    let user = Identity::User(UserId::new(1));
    let (_staff_conn, mut staff_rx) = connect(&service, Identity::Staff(StaffId::new(1))).await;
    let consultation = service
        .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
        .await
        .unwrap();
    drain(&mut staff_rx);

    service.join_consultation(user, consultation.id).await.unwrap();
    // Joining twice does not announce twice.
    service.join_consultation(user, consultation.id).await.unwrap();
    service.leave_consultation(user, consultation.id).await.unwrap();

    assert_eq!(names(&drain(&mut staff_rx)), vec!["userJoined", "userLeft"]);
}

#[tokio::test]
async fn admin_broadcast_reaches_the_chosen_role() {
    use concierge_core::AdminId;
    use concierge_router::BroadcastTarget;

    let service = service_with(vec![staff(1, StaffStatus::Online)]);
    let (_s, mut staff_rx) = connect(&service, Identity::Staff(StaffId::new(1))).await;
    let (_u, mut user_rx) = connect(&service, Identity::User(UserId::new(1))).await;
    drain(&mut staff_rx);

    let report = service
        .broadcast(AdminId::new(1), "maintenance at noon".to_string(), BroadcastTarget::Users)
        .await
        .unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(names(&drain(&mut user_rx)), vec!["systemBroadcast"]);
    assert!(drain(&mut staff_rx).is_empty());

    let report = service
        .notify(
            AdminId::new(1),
            serde_json::json!({"title": "hi"}),
            BroadcastTarget::Staff,
            Some(1),
        )
        .await
        .unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(names(&drain(&mut staff_rx)), vec!["systemNotification"]);
}
