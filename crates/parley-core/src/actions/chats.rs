//! Chat lifecycle: one-to-one and public chats, private groups, read
//! markers, history and mute.

use tracing::{debug, info};

use parley_shared::constants::PROFILE_CHAT_PREFIX;
use parley_shared::membership::{MembershipEventType, MembershipUpdateEvent};
use parley_shared::protocol::{ApplicationMessage, MembershipUpdate};
use parley_shared::types::group_chat_id;
use parley_shared::UserId;
use parley_store::{Chat, ChatType, RawMessage, ResendPolicy};

use crate::error::CoreError;
use crate::group::Group;
use crate::messenger::Messenger;
use crate::response::MessengerResponse;

impl Messenger {
    /// Open (or reopen) the one-to-one chat with `contact`.
    pub fn create_one_to_one_chat(&self, contact: &UserId) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        if *contact == self.user_id() {
            return Err(CoreError::Validation("cannot open a chat with ourselves".into()));
        }
        let (mut chat, opening) = match self.chat(&contact.to_hex()) {
            Some(chat) => {
                let opening = !chat.active || chat.joined == 0;
                (chat, opening)
            }
            None => (Chat::new_one_to_one(contact, self.now_ms()), true),
        };
        if opening {
            let (clock, _) = self.clock.next(chat.last_clock_value);
            chat.active = true;
            chat.joined = clock;
            chat.bump_clock(clock);
            self.join_chat_filter(&chat)?;
        }
        let chat = self.save_chat(chat)?;
        self.sync_one_to_one_chat(&chat)?;

        let mut response = MessengerResponse::default();
        response.add_chat(chat);
        Ok(response)
    }

    /// Join the public chat named `name` and tell our other installations.
    pub fn join_public_chat(&self, name: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let name = name.trim();
        if name.is_empty() || name.starts_with(PROFILE_CHAT_PREFIX) {
            return Err(CoreError::Validation(format!("invalid public chat name {name:?}")));
        }

        let (mut chat, opening) = match self.chat(name) {
            Some(chat) if chat.chat_type != ChatType::Public => {
                return Err(CoreError::Validation(format!(
                    "{name} is a {:?} chat",
                    chat.chat_type
                )));
            }
            Some(chat) => {
                let opening = !chat.active;
                (chat, opening)
            }
            None => (Chat::new_public(name, self.now_ms()), true),
        };
        if opening {
            let (clock, _) = self.clock.next(chat.last_clock_value);
            chat.active = true;
            chat.joined = clock;
            chat.bump_clock(clock);
            self.join_chat_filter(&chat)?;
            info!(chat_id = %chat.id, clock, "Joined public chat");
        }
        let chat = self.save_chat(chat)?;
        self.sync_public_chat(&chat)?;

        let mut response = MessengerResponse::default();
        response.add_chat(chat);
        Ok(response)
    }

    /// Create a private group owned by us with `members` invited.
    pub fn create_group_chat(
        &self,
        name: &str,
        members: &[UserId],
    ) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("group name is empty".into()));
        }

        let chat_id = group_chat_id(&self.user_id());
        let (clock, now) = self.clock.next(0);
        let mut events = vec![MembershipUpdateEvent::new_signed(
            self.identity(),
            &chat_id,
            clock,
            MembershipEventType::ChatCreated,
            Vec::new(),
            name.to_string(),
        )];
        let invited = self.other_keys(members);
        if !invited.is_empty() {
            events.push(MembershipUpdateEvent::new_signed(
                self.identity(),
                &chat_id,
                clock,
                MembershipEventType::MembersAdded,
                invited,
                String::new(),
            ));
        }

        let mut chat = Chat::new_private_group(&chat_id, name, now);
        chat.active = true;
        chat.joined = clock;
        let chat = self.apply_group_events(chat, events)?;
        self.join_chat_filter(&chat)?;
        info!(chat_id = %chat.id, members = chat.members.len(), "Created group chat");

        self.send_group_log(&chat, Vec::new())?;
        let mut response = MessengerResponse::default();
        response.add_chat(chat);
        Ok(response)
    }

    /// Invite `members` to a group we administer.
    pub fn add_members(
        &self,
        chat_id: &str,
        members: &[UserId],
    ) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let chat = self.require_admin_group(chat_id)?;
        let invited: Vec<String> = self
            .other_keys(members)
            .into_iter()
            .filter(|m| !chat.has_member(m))
            .collect();
        if invited.is_empty() {
            return Ok(response_with(chat));
        }
        self.change_group_locked(chat, MembershipEventType::MembersAdded, invited, String::new())
    }

    /// Promote existing members to admins.
    pub fn add_admins(
        &self,
        chat_id: &str,
        members: &[UserId],
    ) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let chat = self.require_admin_group(chat_id)?;
        let promoted: Vec<String> = members.iter().map(UserId::to_hex).collect();
        if let Some(stranger) = promoted.iter().find(|m| !chat.has_member(m)) {
            return Err(CoreError::Validation(format!(
                "{stranger} is not a member of {chat_id}"
            )));
        }
        self.change_group_locked(chat, MembershipEventType::AdminsAdded, promoted, String::new())
    }

    pub fn rename_group(&self, chat_id: &str, name: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let chat = self.require_admin_group(chat_id)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("group name is empty".into()));
        }
        self.change_group_locked(
            chat,
            MembershipEventType::NameChanged,
            Vec::new(),
            name.to_string(),
        )
    }

    /// Remove a non-admin member. The removed member is told as well.
    pub fn remove_member(
        &self,
        chat_id: &str,
        member: &UserId,
    ) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let chat = self.require_admin_group(chat_id)?;
        let member = member.to_hex();
        if !chat.has_member(&member) {
            return Err(CoreError::not_found("member", member));
        }
        if chat.is_admin(&member) {
            return Err(CoreError::Permission(format!("{member} is an admin of {chat_id}")));
        }
        self.change_group_locked(
            chat,
            MembershipEventType::MemberRemoved,
            vec![member],
            String::new(),
        )
    }

    /// Accept an invitation to a group.
    pub fn confirm_joining(&self, chat_id: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let chat = self.require_group(chat_id)?;
        let me = self.my_hex();
        if !chat.has_member(&me) {
            return Err(CoreError::Permission(format!("not invited to {chat_id}")));
        }
        if chat.members.iter().any(|m| m.id == me && m.joined) {
            return Ok(response_with(chat));
        }
        self.change_group_locked(chat, MembershipEventType::MemberJoined, vec![me], String::new())
    }

    /// Leave a group. With `remove` the chat is also tombstoned and the
    /// removal synced to our other installations.
    pub fn leave_group_chat(&self, chat_id: &str, remove: bool) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        self.leave_group_locked(chat_id, remove)
    }

    /// Hide a chat and tombstone its history.
    pub fn deactivate_chat(&self, chat_id: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        if self.is_me(chat_id) {
            return Err(CoreError::Validation("the self chat cannot be removed".into()));
        }
        let chat = self.require_chat(chat_id)?;
        if chat.is_private_group() && chat.has_member(&self.my_hex()) {
            return self.leave_group_locked(chat_id, true);
        }
        let chat = self.deactivate_locked(chat)?;
        Ok(response_with(chat))
    }

    /// Mark every message of the chat read and sync the read marker.
    pub fn mark_all_read(&self, chat_id: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let mut chat = self.require_chat(chat_id)?;
        let clock = chat.last_clock_value;
        if clock == 0 || clock <= chat.read_messages_at_clock_value {
            return Ok(response_with(chat));
        }
        let updated = self.db().mark_all_read(&chat.id, clock)?;
        chat.read_messages_at_clock_value = clock;
        chat.unviewed_messages_count = 0;
        if let Some(last) = chat.last_message.as_mut() {
            last.seen = true;
        }
        let chat = self.save_chat(chat)?;
        debug!(chat_id = %chat.id, clock, updated, "Marked chat read");
        self.sync_chat_messages_read(&chat.id, clock)?;
        Ok(response_with(chat))
    }

    /// Drop the chat's messages but keep the chat.
    pub fn clear_history(&self, chat_id: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let mut chat = self.require_chat(chat_id)?;
        let (clock, _) = self.clock.next(chat.last_clock_value);
        let removed = self.db().clear_history(&chat.id, clock)?;
        chat.deleted_at_clock_value = clock;
        chat.last_message = None;
        chat.unviewed_messages_count = 0;
        chat.bump_clock(clock);
        let chat = self.save_chat(chat)?;
        debug!(chat_id = %chat.id, clock, removed, "Cleared chat history");
        self.sync_clear_history(&chat.id, clock)?;
        Ok(response_with(chat))
    }

    /// Mute or unmute a chat. Muting a one-to-one chat is a contact edit and
    /// follows the contact to our other installations.
    pub fn mute_chat(&self, chat_id: &str, muted: bool) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let mut chat = self.require_chat(chat_id)?;
        let mut response = MessengerResponse::default();
        if chat.muted == muted {
            response.add_chat(chat);
            return Ok(response);
        }
        chat.muted = muted;
        let chat = self.save_chat(chat)?;

        if let Some(key) = chat.counterparty().filter(|k| *k != self.user_id()) {
            let contact = self.update_contact_locally(&key, |_, _| {})?;
            response.add_contact(contact);
        }
        response.add_chat(chat);
        Ok(response)
    }

    // -- helpers -------------------------------------------------------------

    fn other_keys(&self, members: &[UserId]) -> Vec<String> {
        let mut keys: Vec<String> = members
            .iter()
            .map(UserId::to_hex)
            .filter(|k| !self.is_me(k))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    fn require_group(&self, chat_id: &str) -> Result<Chat, CoreError> {
        let chat = self.require_chat(chat_id)?;
        if !chat.is_private_group() {
            return Err(CoreError::Validation(format!("{chat_id} is not a group chat")));
        }
        Ok(chat)
    }

    fn require_admin_group(&self, chat_id: &str) -> Result<Chat, CoreError> {
        let chat = self.require_group(chat_id)?;
        if !chat.is_admin(&self.my_hex()) {
            return Err(CoreError::Permission(format!("not an admin of {chat_id}")));
        }
        Ok(chat)
    }

    /// Fold `events` into `chat`, persist it and return the result.
    fn apply_group_events(
        &self,
        mut chat: Chat,
        events: Vec<MembershipUpdateEvent>,
    ) -> Result<Chat, CoreError> {
        let group = Group::merge(&chat.id, &chat.membership_updates, &events)?;
        chat.name = group.name.clone();
        chat.members = group.chat_members();
        chat.membership_updates = group.events.clone();
        chat.bump_clock(group.max_clock());
        self.save_chat(chat)
    }

    /// Sign one event, apply it and send the updated log to the members.
    fn change_group_locked(
        &self,
        chat: Chat,
        kind: MembershipEventType,
        members: Vec<String>,
        name: String,
    ) -> Result<MessengerResponse, CoreError> {
        let (clock, _) = self.clock.next(chat.last_clock_value);
        let event = MembershipUpdateEvent::new_signed(self.identity(), &chat.id, clock, kind, members, name);
        let recipients: Vec<String> = chat.members.iter().map(|m| m.id.clone()).collect();

        let chat = self.apply_group_events(chat, vec![event])?;
        self.join_chat_filter(&chat)?;
        debug!(chat_id = %chat.id, ?kind, clock, "Group changed");
        self.send_group_log(&chat, recipients)?;
        Ok(response_with(chat))
    }

    /// Send the chat's full membership log. `extra` are recipients beyond
    /// the current members, such as someone just removed.
    fn send_group_log(&self, chat: &Chat, extra: Vec<String>) -> Result<RawMessage, CoreError> {
        let message = ApplicationMessage::MembershipUpdate(MembershipUpdate {
            chat_id: chat.id.clone(),
            events: chat.membership_updates.clone(),
            wrapped: None,
        });
        let mut recipients: Vec<String> = chat.members.iter().map(|m| m.id.clone()).collect();
        recipients.extend(extra);
        let raw = RawMessage::new(&chat.id, message.payload_type(), message.encode()?)
            .with_resend(ResendPolicy::Automatic)
            .with_recipients(recipients);
        self.dispatch_message(raw)
    }

    fn leave_group_locked(&self, chat_id: &str, remove: bool) -> Result<MessengerResponse, CoreError> {
        let chat = self.require_group(chat_id)?;
        let me = self.my_hex();
        if !chat.has_member(&me) {
            return Err(CoreError::Validation(format!("not a member of {chat_id}")));
        }
        let mut response = self.change_group_locked(
            chat,
            MembershipEventType::MemberRemoved,
            vec![me],
            String::new(),
        )?;
        let mut chat = self.require_chat(chat_id)?;
        chat.active = false;
        let chat = if remove {
            self.deactivate_locked(chat)?
        } else {
            self.save_chat(chat)?
        };
        info!(chat_id = %chat.id, remove, "Left group chat");

        response.add_chat(chat);
        Ok(response)
    }

    /// Tombstone `chat` at its next clock, unsubscribe and sync the removal.
    fn deactivate_locked(&self, mut chat: Chat) -> Result<Chat, CoreError> {
        let (clock, _) = self.clock.next(chat.last_clock_value);
        chat.deactivate(clock);
        let chat = self.save_chat(chat)?;
        self.leave_chat_filter(&chat)?;
        info!(chat_id = %chat.id, clock, "Chat deactivated");
        self.sync_chat_removed(&chat.id, clock)?;
        Ok(chat)
    }
}

fn response_with(chat: Chat) -> MessengerResponse {
    let mut response = MessengerResponse::default();
    response.add_chat(chat);
    response
}
