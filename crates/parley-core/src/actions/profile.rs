//! Own profile: synced settings, display name, bio, pictures and identity
//! publication on our profile topic.

use tracing::{debug, info};

use parley_shared::protocol::{
    ApplicationMessage, ChatIdentity, IdentityImage, ProfilePicturesVisibility, SettingField,
    SettingValue,
};
use parley_shared::UserId;
use parley_store::Chat;

use crate::error::CoreError;
use crate::handlers::validate_setting;
use crate::messenger::Messenger;
use crate::response::MessengerResponse;
use crate::sealer::encrypt_identity_images;

impl Messenger {
    /// Store a synced setting and replay it to our other installations.
    pub fn set_setting(&self, field: SettingField, value: SettingValue) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        self.set_setting_locked(field, value)
    }

    /// Change our display name and tell every added contact.
    pub fn set_display_name(&self, name: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let mut response =
            self.set_setting_locked(SettingField::DisplayName, SettingValue::Text(name.to_string()))?;

        let recipients: Vec<UserId> = self
            .contacts
            .filter(|c| c.added && !c.blocked)
            .iter()
            .filter_map(|c| c.user_id())
            .collect();
        for key in recipients {
            if self.chat(&key.to_hex()).is_none() {
                continue;
            }
            response.add_chat(self.send_contact_update_locked(&key)?);
        }
        Ok(response)
    }

    /// Change our bio and republish our identity.
    pub fn set_bio(&self, bio: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let mut response = self.set_setting_locked(SettingField::Bio, SettingValue::Text(bio.to_string()))?;
        response.merge(self.publish_identity_locked()?);
        Ok(response)
    }

    /// Replace the profile picture called `name`, sync it and republish our
    /// identity.
    pub fn set_profile_picture(&self, name: &str, payload: Vec<u8>) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        if name.is_empty() || payload.is_empty() {
            return Err(CoreError::Validation("profile picture needs a name and data".into()));
        }
        let last = self
            .db()
            .identity_images()?
            .into_iter()
            .find(|image| image.name == name)
            .map_or(0, |image| image.clock);
        let (clock, _) = self.clock.next(last);
        let image = IdentityImage::plain(name, payload, clock);
        self.db().save_identity_image(&image)?;
        self.sync_profile_pictures(vec![image.clone()])?;
        info!(name, clock, "Profile picture updated");

        let mut response = self.publish_identity_locked()?;
        response.identity_images.insert(image.name.clone(), image);
        Ok(response)
    }

    /// Broadcast our bio and pictures on our profile topic.
    pub fn publish_identity(&self) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        self.publish_identity_locked()
    }

    fn set_setting_locked(&self, field: SettingField, value: SettingValue) -> Result<MessengerResponse, CoreError> {
        let value = validate_setting(field, value)?;
        let clock = self.next_setting_clock(field)?;
        self.db().set_setting(field, &value, clock)?;
        self.sync_setting_with_clock(field, value.clone(), clock)?;
        debug!(field = field.key(), clock, "Setting stored");

        let mut response = MessengerResponse::default();
        response.settings.insert(field, value);
        Ok(response)
    }

    fn picture_visibility(&self) -> Result<ProfilePicturesVisibility, CoreError> {
        Ok(self
            .setting_value(SettingField::ProfilePicturesVisibility)?
            .and_then(|v| v.as_number())
            .and_then(ProfilePicturesVisibility::from_i64)
            .unwrap_or(ProfilePicturesVisibility::ContactsOnly))
    }

    fn publish_identity_locked(&self) -> Result<MessengerResponse, CoreError> {
        let profile_id = self.user_id().profile_chat_id();
        let mut chat = match self.chat(&profile_id) {
            Some(chat) => chat,
            None => {
                let mut chat = Chat::new_profile(&self.user_id(), self.now_ms());
                chat.active = false;
                self.save_chat(chat)?
            }
        };

        let bio = self
            .setting_value(SettingField::Bio)?
            .and_then(|v| v.as_text().map(str::to_string))
            .unwrap_or_default();
        let mut images = self.db().identity_images()?;
        match self.picture_visibility()? {
            ProfilePicturesVisibility::Everyone => {}
            ProfilePicturesVisibility::None => images.clear(),
            ProfilePicturesVisibility::ContactsOnly => {
                let recipients: Vec<UserId> = self
                    .contacts
                    .filter(|c| c.added && !c.blocked)
                    .iter()
                    .filter_map(|c| c.user_id())
                    .collect();
                if recipients.is_empty() {
                    images.clear();
                } else {
                    encrypt_identity_images(self.identity(), &mut images, &recipients)?;
                }
            }
        }

        let (clock, _) = self.clock.next(chat.last_clock_value);
        let identity = ApplicationMessage::ChatIdentity(ChatIdentity {
            clock,
            description: bio,
            images,
        });
        self.send_application_message(&chat.id, &identity)?;
        chat.bump_clock(clock);
        let chat = self.save_chat(chat)?;
        debug!(clock, "Identity published");

        let mut response = MessengerResponse::default();
        response.add_chat(chat);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use crate::testkit::TestNet;
    use parley_shared::protocol::{ProfilePicturesVisibility, SettingField, SettingValue};

    #[test]
    fn test_display_name_is_validated_and_sent_to_contacts() {
        let net = TestNet::new();
        let alice = net.device("alice-phone");
        let bob = net.device("bob-phone");
        alice.messenger.add_contact(&bob.user_id()).unwrap();
        bob.messenger.retrieve_all().unwrap();

        assert!(alice.messenger.set_display_name("al").is_err());
        assert!(alice.messenger.set_display_name("alice.eth").is_err());
        net.advance(1_000);
        let response = alice.messenger.set_display_name("  Alice W ").unwrap();
        assert_eq!(
            response.settings[&SettingField::DisplayName],
            SettingValue::Text("Alice W".into())
        );

        bob.messenger.retrieve_all().unwrap();
        let seen = bob.messenger.contact(&alice.user_id().to_hex()).unwrap();
        assert_eq!(seen.display_name, "Alice W");
    }

    #[test]
    fn test_identity_images_reach_contacts_only() {
        let net = TestNet::new();
        let alice = net.device("alice-phone");
        let bob = net.device("bob-phone");
        let carol = net.device("carol-phone");

        alice.messenger.add_contact(&bob.user_id()).unwrap();
        bob.messenger.add_contact(&alice.user_id()).unwrap();
        carol.messenger.add_contact(&alice.user_id()).unwrap();

        alice.messenger.set_bio("hello from alice").unwrap();
        alice
            .messenger
            .set_profile_picture("thumbnail", vec![0x89, b'P', b'N', b'G', 1, 2, 3])
            .unwrap();

        bob.messenger.retrieve_all().unwrap();
        carol.messenger.retrieve_all().unwrap();
        let alice_hex = alice.user_id().to_hex();

        let for_bob = bob.messenger.contact(&alice_hex).unwrap();
        assert_eq!(for_bob.bio, "hello from alice");
        let image = &for_bob.images["thumbnail"];
        assert!(!image.encrypted);
        assert_eq!(image.payload, vec![0x89, b'P', b'N', b'G', 1, 2, 3]);

        let for_carol = carol.messenger.contact(&alice_hex).unwrap();
        assert_eq!(for_carol.bio, "hello from alice");
        assert!(for_carol.images.is_empty());
    }

    #[test]
    fn test_visibility_everyone_sends_plain_images() {
        let net = TestNet::new();
        let alice = net.device("alice-phone");
        let carol = net.device("carol-phone");
        carol.messenger.add_contact(&alice.user_id()).unwrap();

        alice
            .messenger
            .set_setting(
                SettingField::ProfilePicturesVisibility,
                SettingValue::Number(ProfilePicturesVisibility::Everyone as i64),
            )
            .unwrap();
        alice
            .messenger
            .set_profile_picture("large", vec![0xFF, 0xD8, 7])
            .unwrap();

        carol.messenger.retrieve_all().unwrap();
        let seen = carol.messenger.contact(&alice.user_id().to_hex()).unwrap();
        assert_eq!(seen.images["large"].payload, vec![0xFF, 0xD8, 7]);

        assert!(alice
            .messenger
            .set_setting(SettingField::ProfilePicturesVisibility, SettingValue::Number(9))
            .is_err());
    }
}
