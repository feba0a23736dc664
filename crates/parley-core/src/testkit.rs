//! Test devices wired to one in-memory network and one manual clock.

use std::collections::HashMap;
use std::sync::Arc;

use parley_shared::protocol::ApplicationMessage;
use parley_shared::{Identity, UserId};
use parley_store::Database;

use crate::clock::{ManualTimeSource, TimeSource};
use crate::config::MessengerConfig;
use crate::encryption::{EncryptionLayer, SignedEnvelopeCodec};
use crate::messenger::Messenger;
use crate::response::MessengerResponse;
use crate::transport::{Envelope, MemoryNetwork, MemoryTransport};

pub(crate) const START_MS: u64 = 1_700_000_000_000;

/// Test configuration: paired installations are trusted and no periodic
/// sync runs.
pub(crate) fn config() -> MessengerConfig {
    MessengerConfig {
        trust_paired_installations: true,
        periodic_sync_interval: None,
        ..MessengerConfig::default()
    }
}

pub(crate) struct TestNet {
    pub net: MemoryNetwork,
    pub time: ManualTimeSource,
}

pub(crate) struct Device {
    pub messenger: Arc<Messenger>,
    pub transport: Arc<MemoryTransport>,
    pub time: ManualTimeSource,
    pub identity: Identity,
}

impl Device {
    pub fn user_id(&self) -> UserId {
        self.identity.user_id()
    }

    pub fn installation_id(&self) -> &str {
        self.messenger.installation_id()
    }
}

impl TestNet {
    pub fn new() -> Self {
        Self {
            net: MemoryNetwork::new(),
            time: ManualTimeSource::new(START_MS),
        }
    }

    /// A device with a fresh identity. `name` is both the installation ID
    /// and the advertised device name.
    pub fn device(&self, name: &str) -> Device {
        self.device_with_config(name, config())
    }

    pub fn device_with_config(&self, name: &str, config: MessengerConfig) -> Device {
        self.build(Identity::generate(), name, config, Database::open_in_memory())
    }

    /// Another installation of `identity`, not yet paired.
    pub fn device_for(&self, identity: &Identity, name: &str) -> Device {
        self.device_for_with_config(identity, name, config())
    }

    pub fn device_for_with_config(&self, identity: &Identity, name: &str, config: MessengerConfig) -> Device {
        self.build(identity.clone(), name, config, Database::open_in_memory())
    }

    /// Another installation of `existing`'s identity, paired with it.
    pub fn paired_device(&self, existing: &Device, name: &str) -> Device {
        let device = self.device_for(&existing.identity, name);
        pair(existing, &device);
        device
    }

    /// A device on a caller-provided database, for restart scenarios.
    pub fn device_on(&self, identity: &Identity, name: &str, db: Database) -> Device {
        self.build(identity.clone(), name, config(), Ok(db))
    }

    pub fn advance(&self, ms: u64) {
        self.time.advance(ms);
    }

    fn build(
        &self,
        identity: Identity,
        name: &str,
        mut config: MessengerConfig,
        db: parley_store::Result<Database>,
    ) -> Device {
        config.device_name = name.to_string();
        config.device_type = "test".to_string();
        let time: Arc<ManualTimeSource> = Arc::new(self.time.clone());
        let transport = Arc::new(self.net.endpoint(identity.user_id(), time.clone()));
        let messenger = Messenger::with_signed_codec(
            identity.clone(),
            name,
            db.expect("open database"),
            transport.clone(),
            time,
            config,
        )
        .expect("start messenger");
        Device {
            messenger: Arc::new(messenger),
            transport,
            time: self.time.clone(),
            identity,
        }
    }
}

/// Run the pairing handshake between two installations of one identity and
/// drain the resulting full sync on both sides.
pub(crate) fn pair(a: &Device, b: &Device) {
    b.messenger.send_pair_installation().expect("announce b");
    a.messenger.retrieve_all().expect("a learns b");
    a.messenger
        .enable_installation_and_pair(b.installation_id())
        .expect("a enables b");
    b.messenger.retrieve_all().expect("b learns a");
    a.messenger.retrieve_all().expect("a drains b's sync");
}

/// Seal `message` as installation `installation_id` of `identity`, stamped
/// with the current test time.
pub(crate) fn envelope_from(
    identity: &Identity,
    installation_id: &str,
    time: &ManualTimeSource,
    message: &ApplicationMessage,
) -> Envelope {
    let codec = SignedEnvelopeCodec::new(identity.clone(), installation_id, Arc::new(time.clone()));
    let bytes = message.encode().expect("encode payload");
    let sealed = codec.seal(message.payload_type(), &bytes).expect("seal payload");
    Envelope {
        id: sealed.id,
        topic: identity.user_id().private_topic(),
        payload: sealed.bytes,
        timestamp: time.now_ms(),
    }
}

/// Hand one envelope to `device` as its own inbound pass.
pub(crate) fn deliver(device: &Device, envelope: Envelope) -> MessengerResponse {
    let mut batch = HashMap::new();
    batch.insert(envelope.topic.clone(), vec![envelope]);
    device
        .messenger
        .handle_retrieved_messages(batch)
        .expect("handle envelope")
}
