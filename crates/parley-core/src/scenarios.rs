//! Multi-device scenarios run over the in-memory network.

use std::collections::BTreeMap;

use parley_shared::protocol::{SettingField, SettingValue};
use parley_store::{Contact, Database};

use crate::testkit::{self, deliver, pair, Device, TestNet, START_MS};
use crate::transport::{Envelope, SentTarget, Transport};

/// Everything delivered to `device`, drained without handling it.
fn drain(device: &Device) -> Vec<Envelope> {
    let mut batches: Vec<_> = device.transport.retrieve_all().unwrap().into_iter().collect();
    batches.sort_by(|a, b| a.0.cmp(&b.0));
    batches.into_iter().flat_map(|(_, envelopes)| envelopes).collect()
}

type ChatView = (bool, String, Vec<String>);

fn synced_chats(device: &Device) -> BTreeMap<String, ChatView> {
    let me = device.user_id().to_hex();
    device
        .messenger
        .chats()
        .into_iter()
        .filter(|c| c.should_be_synced() && c.id != me)
        .map(|c| {
            let mut members: Vec<String> = c.members.iter().map(|m| m.id.clone()).collect();
            members.sort();
            (c.id, (c.active, c.name, members))
        })
        .collect()
}

fn synced_contacts(device: &Device) -> BTreeMap<String, (bool, bool, String, u64)> {
    device
        .messenger
        .contacts()
        .into_iter()
        .filter(Contact::has_non_default_flags)
        .map(|c| (c.id, (c.added, c.blocked, c.local_nickname, c.last_updated_locally)))
        .collect()
}

#[test]
fn test_one_to_one_send_is_recorded_for_the_recipient() {
    let net = TestNet::new();
    let alice = net.device("alice-phone");
    let bob = net.device("bob-phone");
    let bob_hex = bob.user_id().to_hex();

    alice.messenger.create_one_to_one_chat(&bob.user_id()).unwrap();
    let sent = alice.messenger.send_chat_message(&bob_hex, "hi", None).unwrap();
    let (id, message) = sent.messages.iter().next().unwrap();
    assert_eq!(message.text, "hi");
    assert!(message.clock > START_MS);

    let raw = alice.messenger.db().raw_message_by_id(id).unwrap();
    assert_eq!(raw.recipients, vec![bob_hex.clone()]);
    assert_eq!(raw.send_count, 1);
    assert!(alice
        .transport
        .sent()
        .iter()
        .any(|r| r.target == SentTarget::Private(bob.user_id())));

    let received = bob.messenger.retrieve_all().unwrap();
    assert_eq!(received.messages[id].text, "hi");
}

#[test]
fn test_block_sync_overrides_older_local_state() {
    let net = TestNet::new();
    let phone = net.device("alice-phone");
    let laptop = net.paired_device(&phone, "alice-laptop");
    let bob = net.device("bob-phone");
    let bob_hex = bob.user_id().to_hex();

    let mut known = Contact::new(&bob.user_id());
    known.added = true;
    known.last_updated_locally = 9;
    laptop.messenger.save_contact(known).unwrap();
    laptop
        .messenger
        .save_chat(parley_store::Chat::new_one_to_one(&bob.user_id(), START_MS))
        .unwrap();

    let mut blocked = Contact::new(&bob.user_id());
    blocked.blocked = true;
    blocked.last_updated_locally = 10;
    phone.messenger.sync_contact(&blocked).unwrap();

    let response = laptop.messenger.retrieve_all().unwrap();
    let contact = &response.contacts[&bob_hex];
    assert!(contact.blocked);
    assert!(!contact.added);
    assert_eq!(contact.last_updated_locally, 10);
    assert!(!laptop.messenger.chat(&bob_hex).unwrap().active);

    let mut stale = Contact::new(&bob.user_id());
    stale.added = true;
    stale.last_updated_locally = 8;
    phone.messenger.sync_contact(&stale).unwrap();
    laptop.messenger.retrieve_all().unwrap();
    assert!(laptop.messenger.contact(&bob_hex).unwrap().blocked);
}

#[test]
fn test_sync_devices_replicates_state_to_new_installation() {
    let net = TestNet::new();
    let mut config = testkit::config();
    config.sync_on_pairing = false;
    let phone = net.device_with_config("alice-phone", config.clone());
    let bob = net.device("bob-phone");
    let carol = net.device("carol-phone");
    let dave = net.device("dave-phone");
    let erin = net.device("erin-phone");

    phone.messenger.add_contact(&bob.user_id()).unwrap();
    phone.messenger.set_local_nickname(&bob.user_id(), "Bobby").unwrap();
    phone.messenger.join_public_chat("status").unwrap();
    phone
        .messenger
        .create_group_chat("friends", &[carol.user_id()])
        .unwrap();
    phone.messenger.block_contact(&dave.user_id()).unwrap();
    phone.messenger.set_display_name("Alice W").unwrap();
    phone.messenger.create_one_to_one_chat(&erin.user_id()).unwrap();

    let laptop = net.device_for_with_config(&phone.identity, "alice-laptop", config);
    pair(&phone, &laptop);
    assert!(laptop.messenger.contacts().is_empty());

    phone.messenger.sync_devices().unwrap();
    laptop.messenger.retrieve_all().unwrap();

    assert_eq!(synced_chats(&laptop), synced_chats(&phone));
    assert!(laptop
        .messenger
        .chat(&erin.user_id().to_hex())
        .is_some_and(|c| c.active));
    assert!(laptop.messenger.contact(&erin.user_id().to_hex()).is_none());
    assert_eq!(synced_contacts(&laptop), synced_contacts(&phone));
    assert_eq!(
        laptop.messenger.setting_value(SettingField::DisplayName).unwrap(),
        Some(SettingValue::Text("Alice W".into()))
    );
}

#[test]
fn test_clocks_keep_rising_when_time_stalls_or_rewinds() {
    let net = TestNet::new();
    let alice = net.device("alice-phone");
    let bob = net.device("bob-phone");
    let bob_hex = bob.user_id().to_hex();
    alice.messenger.create_one_to_one_chat(&bob.user_id()).unwrap();

    let mut last = 0;
    for text in ["one", "two", "three"] {
        let sent = alice.messenger.send_chat_message(&bob_hex, text, None).unwrap();
        let clock = sent.messages.values().next().unwrap().clock;
        assert!(clock > last);
        last = clock;
    }

    net.time.set(START_MS - 60_000);
    let sent = alice.messenger.send_chat_message(&bob_hex, "four", None).unwrap();
    let clock = sent.messages.values().next().unwrap().clock;
    assert!(clock > last);
    assert_eq!(alice.messenger.chat(&bob_hex).unwrap().last_clock_value, clock);
}

#[test]
fn test_replaying_a_batch_changes_nothing() {
    let net = TestNet::new();
    let alice = net.device("alice-phone");
    let bob = net.device("bob-phone");
    let bob_hex = bob.user_id().to_hex();
    alice.messenger.add_contact(&bob.user_id()).unwrap();
    alice.messenger.send_chat_message(&bob_hex, "hi", None).unwrap();

    let batches = bob.transport.retrieve_all().unwrap();
    let first = bob.messenger.handle_retrieved_messages(batches.clone()).unwrap();
    assert_eq!(first.messages.len(), 1);
    let chats = bob.messenger.chats();
    let contacts = bob.messenger.contacts();

    let second = bob.messenger.handle_retrieved_messages(batches).unwrap();
    assert!(second.is_empty());
    assert_eq!(bob.messenger.chats(), chats);
    assert_eq!(bob.messenger.contacts(), contacts);
}

#[test]
fn test_contact_syncs_converge_in_any_order() {
    let net = TestNet::new();
    let phone = net.device("alice-phone");
    let laptop = net.paired_device(&phone, "alice-laptop");
    let tablet = net.device_for(&phone.identity, "alice-tablet");
    let bob = net.device("bob-phone");
    let bob_hex = bob.user_id().to_hex();

    phone.messenger.add_contact(&bob.user_id()).unwrap();
    net.advance(1_000);
    phone.messenger.set_local_nickname(&bob.user_id(), "Bobby").unwrap();
    net.advance(1_000);
    phone.messenger.block_contact(&bob.user_id()).unwrap();

    for envelope in drain(&laptop) {
        deliver(&laptop, envelope);
    }
    for envelope in drain(&tablet).into_iter().rev() {
        deliver(&tablet, envelope);
    }

    let in_order = laptop.messenger.contact(&bob_hex).unwrap();
    let reversed = tablet.messenger.contact(&bob_hex).unwrap();
    assert!(in_order.blocked);
    assert_eq!(in_order.blocked, reversed.blocked);
    assert_eq!(in_order.added, reversed.added);
    assert_eq!(in_order.local_nickname, reversed.local_nickname);
    assert_eq!(in_order.last_updated_locally, reversed.last_updated_locally);
    for device in [&laptop, &tablet] {
        assert!(!device.messenger.chat(&bob_hex).is_some_and(|c| c.active));
    }
}

#[test]
fn test_messages_below_tombstone_are_ignored() {
    let net = TestNet::new();
    let alice = net.device("alice-phone");
    let bob = net.device("bob-phone");
    let alice_hex = alice.user_id().to_hex();

    alice.messenger.create_one_to_one_chat(&bob.user_id()).unwrap();
    bob.messenger.create_one_to_one_chat(&alice.user_id()).unwrap();
    alice
        .messenger
        .send_chat_message(&bob.user_id().to_hex(), "old news", None)
        .unwrap();

    net.advance(1_000);
    bob.messenger.clear_history(&alice_hex).unwrap();
    let response = bob.messenger.retrieve_all().unwrap();
    assert!(response.messages.is_empty());
    assert!(bob.messenger.chat(&alice_hex).unwrap().last_message.is_none());
}

#[test]
fn test_edit_before_message_is_replayed() {
    let net = TestNet::new();
    let alice = net.device("alice-phone");
    let bob = net.device("bob-phone");
    let bob_hex = bob.user_id().to_hex();
    alice.messenger.create_one_to_one_chat(&bob.user_id()).unwrap();
    bob.messenger.create_one_to_one_chat(&alice.user_id()).unwrap();

    let sent = alice.messenger.send_chat_message(&bob_hex, "helo", None).unwrap();
    let id = sent.messages.keys().next().unwrap().clone();
    net.advance(1_000);
    alice.messenger.edit_message(&id, "hello").unwrap();

    for envelope in drain(&bob).into_iter().rev() {
        deliver(&bob, envelope);
    }
    let message = bob.messenger.db().message_by_id(&id).unwrap();
    assert_eq!(message.text, "hello");
    assert!(message.edited_at > message.clock);
    assert!(bob.messenger.db().pending_edits_for(&id).unwrap().is_empty());
}

#[test]
fn test_contacts_only_policy_drops_strangers() {
    let net = TestNet::new();
    let bob = net.device("bob-phone");
    let carol = net.device("carol-phone");
    let bob_hex = bob.user_id().to_hex();

    bob.messenger
        .set_setting(SettingField::MessagesFromContactsOnly, SettingValue::Flag(true))
        .unwrap();

    carol.messenger.create_one_to_one_chat(&bob.user_id()).unwrap();
    carol.messenger.send_chat_message(&bob_hex, "hey", None).unwrap();
    let dropped = bob.messenger.retrieve_all().unwrap();
    assert!(dropped.messages.is_empty());
    assert!(bob.messenger.chat(&carol.user_id().to_hex()).is_none());

    bob.messenger.add_contact(&carol.user_id()).unwrap();
    net.advance(1_000);
    carol.messenger.send_chat_message(&bob_hex, "hey again", None).unwrap();
    let accepted = bob.messenger.retrieve_all().unwrap();
    assert_eq!(accepted.messages.len(), 1);
}

#[test]
fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("parley.db");
    let net = TestNet::new();
    let bob = net.device("bob-phone");

    let alice = net.device_on(
        &parley_shared::Identity::generate(),
        "alice-phone",
        Database::open_at(&path).unwrap(),
    );
    alice.messenger.join_public_chat("status").unwrap();
    alice.messenger.add_contact(&bob.user_id()).unwrap();
    let identity = alice.identity.clone();
    let active = |device: &Device| -> Vec<(String, bool)> {
        device.messenger.chats().into_iter().map(|c| (c.id, c.active)).collect()
    };
    let before = active(&alice);
    drop(alice);

    let restarted = net.device_on(&identity, "alice-phone", Database::open_at(&path).unwrap());
    assert_eq!(active(&restarted), before);
    assert!(restarted
        .messenger
        .contact(&bob.user_id().to_hex())
        .is_some_and(|c| c.added));
    assert!(restarted.transport.filters().contains(&"status".to_string()));
}
