//! Installations of our own identity and the pairing handshake.

use tracing::info;

use parley_shared::protocol::{ApplicationMessage, PairInstallation};
use parley_store::{Installation, InstallationMetadata};

use crate::encryption::SignedEnvelopeCodec;
use crate::error::CoreError;
use crate::messenger::Messenger;
use crate::response::MessengerResponse;

impl Messenger {
    /// Every known installation of our identity, sorted by ID.
    pub fn installations(&self) -> Vec<Installation> {
        let mut installations = self.installations.values();
        installations.sort_by(|a, b| a.id.cmp(&b.id));
        installations
    }

    pub fn enable_installation(&self, installation_id: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        self.set_installation_enabled(installation_id, true)
    }

    pub fn disable_installation(&self, installation_id: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        if installation_id == self.installation_id() {
            return Err(CoreError::Validation("cannot disable our own installation".into()));
        }
        self.set_installation_enabled(installation_id, false)
    }

    pub fn set_installation_metadata(
        &self,
        installation_id: &str,
        metadata: InstallationMetadata,
    ) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let mut installation = self.require_installation(installation_id)?;
        self.encryption
            .set_installation_metadata(installation_id, metadata.clone())?;
        installation.metadata = Some(metadata);
        let installation = self.save_installation(installation)?;

        let mut response = MessengerResponse::default();
        response.add_installation(installation);
        Ok(response)
    }

    /// Announce this installation to the other installations of our
    /// identity so they can enable it.
    pub fn send_pair_installation(&self) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        self.send_pair_installation_locked()
    }

    /// Enable `installation_id` and answer with our own announcement.
    pub fn enable_installation_and_pair(
        &self,
        installation_id: &str,
    ) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let mut response = self.set_installation_enabled(installation_id, true)?;
        response.merge(self.send_pair_installation_locked()?);
        Ok(response)
    }

    // -- helpers -------------------------------------------------------------

    fn require_installation(&self, installation_id: &str) -> Result<Installation, CoreError> {
        self.installations
            .get(installation_id)
            .ok_or_else(|| CoreError::not_found("installation", installation_id))
    }

    fn set_installation_enabled(
        &self,
        installation_id: &str,
        enabled: bool,
    ) -> Result<MessengerResponse, CoreError> {
        let mut installation = self.require_installation(installation_id)?;
        if enabled {
            self.encryption.enable_installation(installation_id)?;
        } else {
            self.encryption.disable_installation(installation_id)?;
        }
        installation.enabled = enabled;
        let installation = self.save_installation(installation)?;
        info!(installation = %installation.id, enabled, "Installation updated");

        let mut response = MessengerResponse::default();
        response.add_installation(installation);
        Ok(response)
    }

    fn send_pair_installation_locked(&self) -> Result<MessengerResponse, CoreError> {
        let own = self.require_installation(self.installation_id())?;
        let metadata = own.metadata.clone().unwrap_or_else(|| InstallationMetadata {
            name: self.config().device_name.clone(),
            device_type: self.config().device_type.clone(),
        });
        let installation_id = self.installation_id().to_string();
        self.dispatch_pairing(|clock| {
            ApplicationMessage::PairInstallation(PairInstallation {
                clock,
                installation_id,
                name: metadata.name,
                device_type: metadata.device_type,
                version: SignedEnvelopeCodec::VERSION,
            })
        })?;

        let mut response = MessengerResponse::default();
        response.add_installation(own);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use crate::testkit::TestNet;
    use parley_store::InstallationMetadata;

    #[test]
    fn test_pairing_handshake_enables_both_sides() {
        let net = TestNet::new();
        let phone = net.device("alice-phone");
        let laptop = net.paired_device(&phone, "alice-laptop");

        assert!(phone
            .messenger
            .installations()
            .iter()
            .any(|i| i.id == "alice-laptop" && i.enabled));
        let on_laptop = laptop.messenger.installations();
        let phone_seen = on_laptop.iter().find(|i| i.id == "alice-phone").unwrap();
        assert!(phone_seen.enabled);
        assert_eq!(
            phone_seen.metadata.as_ref().map(|m| m.name.as_str()),
            Some("alice-phone")
        );
    }

    #[test]
    fn test_unknown_or_own_installation_is_rejected() {
        let net = TestNet::new();
        let phone = net.device("alice-phone");

        assert!(phone.messenger.enable_installation("ghost").is_err());
        assert!(phone.messenger.disable_installation("alice-phone").is_err());

        let renamed = phone
            .messenger
            .set_installation_metadata(
                "alice-phone",
                InstallationMetadata {
                    name: "work phone".into(),
                    device_type: "android".into(),
                },
            )
            .unwrap();
        assert_eq!(
            renamed.installations["alice-phone"]
                .metadata
                .as_ref()
                .map(|m| m.name.as_str()),
            Some("work phone")
        );
    }

    #[test]
    fn test_disabled_installation_stops_receiving_sync() {
        let net = TestNet::new();
        let phone = net.device("alice-phone");
        let laptop = net.paired_device(&phone, "alice-laptop");

        phone.messenger.disable_installation("alice-laptop").unwrap();
        phone.messenger.join_public_chat("status").unwrap();
        laptop.messenger.retrieve_all().unwrap();
        assert!(laptop.messenger.chat("status").is_none());
    }
}
