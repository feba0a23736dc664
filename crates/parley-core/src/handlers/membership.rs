//! Private group membership updates and the payloads they carry.

use tracing::debug;

use parley_shared::protocol::{ApplicationMessage, MembershipUpdate, PayloadType};
use parley_store::Chat;

use crate::error::CoreError;
use crate::group::Group;
use crate::messenger::Messenger;
use crate::response::RawPayload;
use crate::state::ReceivedMessageState;

impl Messenger {
    pub(super) fn handle_membership_update(
        &self,
        state: &mut ReceivedMessageState<'_>,
        update: MembershipUpdate,
    ) -> Result<(), CoreError> {
        let current = state.current()?.clone();
        let me = self.my_hex();
        let existing = state.chat(&update.chat_id);
        if let Some(chat) = &existing {
            if !chat.is_private_group() {
                return Err(CoreError::Validation(format!(
                    "membership update for {:?} chat {}",
                    chat.chat_type, chat.id
                )));
            }
        }
        self.is_message_allowed_from(state, &current.sender_hex, existing.as_ref())?;

        let known_events = existing
            .as_ref()
            .map(|c| c.membership_updates.as_slice())
            .unwrap_or_default();
        let group = Group::merge(&update.chat_id, known_events, &update.events)?;

        let was_member = existing.as_ref().is_some_and(|c| c.has_member(&me));
        let sender_known = group.is_member(&current.sender_hex)
            || existing
                .as_ref()
                .is_some_and(|c| c.has_member(&current.sender_hex));
        if !sender_known {
            return Err(CoreError::Permission(format!(
                "{} is not a member of group {}",
                current.sender_hex, update.chat_id
            )));
        }
        if existing.is_none() && !group.is_member(&me) {
            return Err(CoreError::Validation(format!(
                "new group {} does not include us",
                update.chat_id
            )));
        }

        let mut chat = existing.unwrap_or_else(|| {
            let mut chat =
                Chat::new_private_group(&update.chat_id, &group.name, current.transport_timestamp);
            chat.joined = group.max_clock();
            chat
        });
        let members_before = chat.members.clone();
        let active_before = chat.active;

        chat.name = group.name.clone();
        chat.members = group.chat_members();
        chat.membership_updates = group.events.clone();
        chat.bump_clock(group.max_clock());

        let is_member = group.is_member(&me);
        if was_member && !is_member {
            debug!(chat_id = %chat.id, "Removed from group");
            chat.active = false;
        } else if !was_member && is_member && group.max_clock() > chat.deleted_at_clock_value {
            debug!(chat_id = %chat.id, "Added to group");
            chat.active = true;
            chat.joined = group.max_clock();
        }
        if chat.members != members_before || chat.active != active_before {
            state.settle_chats.insert(chat.id.clone());
        }
        state.put_chat(chat);

        let Some(wrapped) = update.wrapped else {
            return Ok(());
        };
        if wrapped.type_tag == PayloadType::MembershipUpdate.as_u16() {
            return Err(CoreError::Validation("nested membership update".into()));
        }
        match ApplicationMessage::decode(wrapped.type_tag, &wrapped.payload)? {
            Some(inner) => {
                if let Some(current) = state.current.as_mut() {
                    current.payload_type = inner.payload_type();
                }
                self.handle_application_message(state, inner)
            }
            None => {
                debug!(id = %current.id, tag = wrapped.type_tag, "Unknown wrapped payload, passing through");
                state.response.raw_payloads.insert(
                    current.id.clone(),
                    RawPayload {
                        id: current.id,
                        sender: current.sender_hex,
                        type_tag: wrapped.type_tag,
                        payload: wrapped.payload,
                    },
                );
                Ok(())
            }
        }
    }
}
