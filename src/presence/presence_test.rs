use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::*;
use crate::constants::*;
use crate::proto::Action;
use crate::proto::Flags;
use crate::proto::ProtocolMessage;
use crate::test_utils::*;
use crate::Channel;
use crate::ChannelOptions;

const CHANNEL: &str = "room";

fn setup() -> (Channel, Arc<RecordingTransport>) {
    let (ctx, transport) = test_context(test_config());
    (Channel::new(CHANNEL, ctx, ChannelOptions::default()), transport)
}

fn attach_with_presence(channel: &Channel) {
    channel.attach_with(false, Completion::none());
    channel.on_protocol_message(attached(CHANNEL, Flags::empty().with(Flags::HAS_PRESENCE), "serial-1:0"));
}

fn client_ids(members: &[PresenceMessage]) -> Vec<String> {
    let mut ids: Vec<_> = members.iter().filter_map(|m| m.client_id.clone()).collect();
    ids.sort();
    ids
}

/// # Case 1: `get` waits for the sync started by ATTACHED
///
/// ## Validation criteria
/// - the waiting call does not resolve before the final SYNC page
/// - it then returns the synced members, without polling
#[tokio::test(start_paused = true)]
async fn get_waits_for_sync_to_complete() {
    let (channel, _transport) = setup();
    attach_with_presence(&channel);
    let presence = channel.presence();
    assert!(!presence.sync_complete());

    let waiter = {
        let presence = presence.clone();
        tokio::spawn(async move { presence.get(GetParams::default()).await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    channel.on_protocol_message(sync(CHANNEL, "more", vec![member("c1", "alice", PresenceAction::Present, 1)]));
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    channel.on_protocol_message(sync(CHANNEL, "", vec![member("c2", "bob", PresenceAction::Present, 1)]));

    let members = waiter.await.unwrap().unwrap();
    assert_eq!(client_ids(&members), vec!["alice", "bob"]);
    assert!(presence.sync_complete());
}

#[tokio::test(start_paused = true)]
async fn get_without_wait_returns_partial_snapshot() {
    let (channel, _transport) = setup();
    attach_with_presence(&channel);
    channel.on_protocol_message(sync(CHANNEL, "more", vec![member("c1", "alice", PresenceAction::Present, 1)]));

    let members = channel
        .presence()
        .get(GetParams::default().with_wait_for_sync(false))
        .await
        .unwrap();

    assert_eq!(client_ids(&members), vec!["alice"]);
}

#[tokio::test(start_paused = true)]
async fn get_filters_by_client_and_connection() {
    let (channel, _transport) = setup();
    attach_with_presence(&channel);
    channel.on_protocol_message(sync(
        CHANNEL,
        "",
        vec![
            member("c1", "alice", PresenceAction::Present, 1),
            member("c2", "alice", PresenceAction::Present, 1),
            member("c2", "bob", PresenceAction::Present, 1),
        ],
    ));
    let presence = channel.presence();

    let alice = presence.get(GetParams::default().with_client_id("alice")).await.unwrap();
    let on_c2 = presence
        .get(GetParams::default().with_connection_id("c2"))
        .await
        .unwrap();

    assert_eq!(alice.len(), 2);
    assert_eq!(client_ids(&on_c2), vec!["alice", "bob"]);
}

#[tokio::test(start_paused = true)]
async fn get_on_suspended_channel_with_wait_is_out_of_sync() {
    let (channel, _transport) = setup();
    attach_with_presence(&channel);
    channel.on_connection_suspended(ErrorInfo::connection_suspended(), true);

    let error = channel.presence().get(GetParams::default()).await.unwrap_err();

    assert_eq!(error.code(), Some(PRESENCE_OUT_OF_SYNC));
}

#[tokio::test(start_paused = true)]
async fn get_on_suspended_channel_without_wait_keeps_members() {
    let (channel, _transport) = setup();
    attach_with_presence(&channel);
    channel.on_protocol_message(sync(CHANNEL, "", vec![member("c1", "alice", PresenceAction::Present, 1)]));
    channel.on_connection_suspended(ErrorInfo::connection_suspended(), true);

    let members = channel
        .presence()
        .get(GetParams::default().with_wait_for_sync(false))
        .await
        .unwrap();

    assert_eq!(client_ids(&members), vec!["alice"]);
}

#[tokio::test(start_paused = true)]
async fn get_on_initialized_channel_is_invalid() {
    let (channel, _transport) = setup();

    let error = channel.presence().get(GetParams::default()).await.unwrap_err();

    assert_eq!(error.code(), Some(INVALID_CHANNEL_STATE));
}

#[tokio::test(start_paused = true)]
async fn waiting_get_fails_when_channel_suspends() {
    let (channel, _transport) = setup();
    attach_with_presence(&channel);
    let waiter = {
        let presence = channel.presence();
        tokio::spawn(async move { presence.get(GetParams::default()).await })
    };
    tokio::task::yield_now().await;

    channel.on_connection_suspended(ErrorInfo::connection_suspended(), true);

    let error = waiter.await.unwrap().unwrap_err();
    assert_eq!(error.code(), Some(PRESENCE_OUT_OF_SYNC));
}

#[tokio::test(start_paused = true)]
async fn waiting_get_fails_when_channel_detaches() {
    let (channel, _transport) = setup();
    attach_with_presence(&channel);
    let waiter = {
        let presence = channel.presence();
        tokio::spawn(async move { presence.get(GetParams::default()).await })
    };
    tokio::task::yield_now().await;

    channel.on_connection_closed(ErrorInfo::connection_closed());

    let error = waiter.await.unwrap().unwrap_err();
    assert_eq!(error.code(), Some(INVALID_CHANNEL_STATE));
}

#[tokio::test(start_paused = true)]
async fn waiting_get_fails_when_channel_released() {
    let (channel, _transport) = setup();
    attach_with_presence(&channel);
    let waiter = {
        let presence = channel.presence();
        tokio::spawn(async move { presence.get(GetParams::default()).await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    channel.release();

    let error = waiter.await.unwrap().unwrap_err();
    assert_eq!(error.code(), Some(INVALID_CHANNEL_STATE));
}

#[tokio::test(start_paused = true)]
async fn dropped_get_leaves_sync_untouched() {
    let (channel, _transport) = setup();
    attach_with_presence(&channel);
    let waiter = {
        let presence = channel.presence();
        tokio::spawn(async move { presence.get(GetParams::default()).await })
    };
    tokio::task::yield_now().await;

    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());

    channel.on_protocol_message(sync(CHANNEL, "", vec![member("c1", "alice", PresenceAction::Present, 1)]));
    let members = channel.presence().get(GetParams::default()).await.unwrap();
    assert_eq!(client_ids(&members), vec!["alice"]);
}

#[tokio::test(start_paused = true)]
async fn enter_without_client_id_is_refused() {
    let (channel, transport) = setup();
    transport.set_client_id(None);

    let error = channel.presence().enter(None).await.unwrap_err();

    assert_eq!(error.code(), Some(PRESENCE_NEEDS_CLIENT_ID));
    assert!(transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn enter_on_initialized_channel_attaches_and_queues() {
    let (channel, transport) = setup();
    let presence = channel.presence();
    let entering = {
        let presence = presence.clone();
        tokio::spawn(async move { presence.enter(Some("hello".into())).await })
    };
    tokio::task::yield_now().await;

    assert_eq!(channel.state(), ChannelState::Attaching);
    assert_eq!(transport.sent_actions(), vec!["ATTACH"]);

    channel.on_protocol_message(attached(CHANNEL, Flags::empty(), "serial-1:0"));
    assert_eq!(transport.sent_actions(), vec!["ATTACH", "PRESENCE"]);
    transport.ack_all();

    entering.await.unwrap().unwrap();
}

/// # Case 2: presence updates queued while attaching
///
/// ## Validation criteria
/// - one PRESENCE envelope carries one record per client id
/// - the later update for a client replaces the earlier one in place
/// - every caller is notified when the batch is acknowledged
#[tokio::test(start_paused = true)]
async fn queued_updates_are_keyed_by_client_and_flushed_as_one_batch() {
    let (channel, transport) = setup();
    channel.attach_with(false, Completion::none());
    let presence = channel.presence();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let completion = || {
        let outcomes = outcomes.clone();
        Completion::from_fn(move |result| outcomes.lock().push(result))
    };

    presence.update_presence(PresenceMessage::new(PresenceAction::Enter, "a").with_data("first"), completion());
    presence.update_presence(PresenceMessage::new(PresenceAction::Enter, "b").with_data("only"), completion());
    presence.update_presence(PresenceMessage::new(PresenceAction::Update, "a").with_data("second"), completion());
    assert_eq!(transport.count("PRESENCE"), 0);

    channel.on_protocol_message(attached(CHANNEL, Flags::empty(), "serial-1:0"));

    let batches: Vec<_> = transport
        .sent()
        .into_iter()
        .filter_map(|m| match m.action {
            Action::Presence { presence } => Some(presence),
            _ => None,
        })
        .collect();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].client_id.as_deref(), Some("a"));
    assert_eq!(batch[0].action, PresenceAction::Update);
    assert_eq!(batch[0].data, Some("second".into()));
    assert_eq!(batch[1].client_id.as_deref(), Some("b"));

    transport.ack_all();
    assert_eq!(outcomes.lock().len(), 3);
    assert!(outcomes.lock().iter().all(|r| r.is_ok()));
}

#[tokio::test(start_paused = true)]
async fn queued_updates_fail_when_channel_suspends() {
    let (channel, _transport) = setup();
    channel.attach_with(false, Completion::none());
    let (completion, rx) = Completion::channel();
    channel
        .presence()
        .update_presence(PresenceMessage::new(PresenceAction::Enter, "a"), completion);

    tokio::time::sleep(Duration::from_millis(ATTACH_TIMEOUT_MS + 1)).await;

    let error = rx.await.unwrap().unwrap_err();
    assert_eq!(error.code, CHANNEL_OPERATION_TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn presence_update_on_failed_channel_is_refused() {
    let (channel, _transport) = setup();
    attach_with_presence(&channel);
    channel.on_protocol_message(server_error(CHANNEL, ErrorInfo::new(90000, 400, "boom")));

    let error = channel.presence().leave(None).await.unwrap_err();

    assert_eq!(error.code(), Some(PRESENCE_INVALID_STATE));
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_only_changes_for_their_action() {
    let (channel, _transport) = setup();
    attach_with_presence(&channel);
    let presence = channel.presence();
    let leaves = Arc::new(Mutex::new(Vec::new()));
    {
        let leaves = leaves.clone();
        presence.subscribe(Some(PresenceAction::Leave), move |m| {
            leaves.lock().push(m.clone());
            Ok(())
        });
    }

    channel.on_protocol_message(sync(CHANNEL, "", vec![member("c1", "alice", PresenceAction::Present, 5)]));
    // stale leave is discarded, not rebroadcast
    channel.on_protocol_message(ProtocolMessage::presence(
        CHANNEL,
        vec![member("c1", "alice", PresenceAction::Leave, 2)],
    ));
    channel.on_protocol_message(ProtocolMessage::presence(
        CHANNEL,
        vec![member("c1", "alice", PresenceAction::Leave, 6)],
    ));

    assert_eq!(leaves.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn sync_end_broadcasts_synthesized_leaves() {
    let (channel, _transport) = setup();
    attach_with_presence(&channel);
    channel.on_protocol_message(sync(CHANNEL, "", vec![member("c1", "alice", PresenceAction::Present, 1)]));
    let leaves = Arc::new(Mutex::new(Vec::new()));
    {
        let leaves = leaves.clone();
        channel.presence().subscribe(Some(PresenceAction::Leave), move |m| {
            leaves.lock().push(m.clone());
            Ok(())
        });
    }

    // reattach: the new sync no longer mentions alice
    channel.on_protocol_message(attached(CHANNEL, Flags::empty().with(Flags::HAS_PRESENCE), "serial-2:0"));
    channel.on_protocol_message(sync(CHANNEL, "", vec![member("c2", "bob", PresenceAction::Present, 1)]));

    let leaves = leaves.lock();
    assert_eq!(leaves.len(), 1);
    assert_eq!(leaves[0].client_id.as_deref(), Some("alice"));
    assert!(leaves[0].id.is_none());
}

#[tokio::test(start_paused = true)]
async fn detach_clears_members() {
    let (channel, _transport) = setup();
    attach_with_presence(&channel);
    channel.on_protocol_message(sync(CHANNEL, "", vec![member("c1", "alice", PresenceAction::Present, 1)]));

    channel.detach_with(Completion::none());
    channel.on_protocol_message(detached(CHANNEL, None));
    channel.attach_with(false, Completion::none());
    channel.on_protocol_message(attached(CHANNEL, Flags::empty(), "serial-2:0"));

    let members = channel.presence().get(GetParams::default()).await.unwrap();
    assert!(members.is_empty());
}

#[tokio::test(start_paused = true)]
async fn presence_history_uses_presence_resource() {
    let transport = Arc::new(RecordingTransport::default());
    let history = Arc::new(RecordingHistory::default());
    let ctx = crate::ChannelContext::new(
        transport,
        Arc::new(crate::PassthroughCodec),
        history.clone(),
        test_config(),
    )
    .unwrap();
    let channel = Channel::new(CHANNEL, ctx, ChannelOptions::default());

    let page = channel.presence().history(HistoryParams::default()).await.unwrap();

    assert!(page.items().is_empty());
    let requests = history.requests.lock();
    assert_eq!(requests[0].path, "/channels/room/presence/history");
}
