use tracing::{debug, info};

use parley_shared::protocol::PairInstallation;
use parley_store::{Installation, InstallationMetadata};

use super::validate;
use crate::error::CoreError;
use crate::messenger::Messenger;
use crate::state::ReceivedMessageState;

impl Messenger {
    /// Second half of the pairing handshake: record the other installation's
    /// metadata and, if paired installations are trusted, enable it.
    pub(super) fn handle_pair_installation(
        &self,
        state: &mut ReceivedMessageState<'_>,
        pair: PairInstallation,
    ) -> Result<(), CoreError> {
        validate::pair_installation(&pair)?;
        if pair.installation_id == self.installation_id() {
            return Ok(());
        }
        let transport_timestamp = state.current()?.transport_timestamp;

        let mut installation = state
            .installation(&pair.installation_id)
            .unwrap_or_else(|| Installation {
                id: pair.installation_id.clone(),
                identity: self.my_hex(),
                version: pair.version,
                enabled: false,
                timestamp: transport_timestamp,
                metadata: None,
            });
        let metadata = InstallationMetadata {
            name: pair.name,
            device_type: pair.device_type,
        };
        self.encryption
            .set_installation_metadata(&installation.id, metadata.clone())?;
        installation.metadata = Some(metadata);
        installation.version = pair.version;

        if self.config().trust_paired_installations && !installation.enabled {
            info!(installation = %installation.id, "Enabling paired installation");
            self.encryption.enable_installation(&installation.id)?;
            installation.enabled = true;
            state.installation_enabled = true;
        } else {
            debug!(installation = %installation.id, "Recorded paired installation");
        }
        state.put_installation(installation);
        Ok(())
    }
}
