//! Startup orchestration: cloud login, device discovery and one poller per device.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::CloudClient;
use crate::config::{AccountConfig, AppConfig};
use crate::device::{AirPurifier, DeviceIdentity};
use crate::error::{AppError, Result};
use crate::poll::{PollCoordinator, PollSettings};
use crate::protocol::MacAddress;
use crate::sign::Signer;
use crate::transport::{Transport, UdpTransport};

/// Every purifier on the account, keyed by MAC address.
pub struct Hub<T = UdpTransport> {
    coordinators: BTreeMap<MacAddress, Arc<PollCoordinator<T>>>,
}

impl Hub<UdpTransport> {
    /// Log in, fetch the device list and set up a LAN poller for each device.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let client = login(&config.account).await?;
        let identities = client.device_list().await?;

        if identities.is_empty() {
            warn!("No devices on account {}", config.account.phone);
        }

        let settings = PollSettings::from_config(&config.network, &config.poll);
        Ok(Self::from_identities(identities, settings, |_| {
            UdpTransport::from_config(&config.network)
        }))
    }
}

impl<T: Transport> Hub<T> {
    /// Build a hub from known identities. A MAC listed twice keeps its first entry.
    pub fn from_identities<F>(identities: Vec<DeviceIdentity>, settings: PollSettings, mut transport: F) -> Self
    where
        F: FnMut(&DeviceIdentity) -> T,
    {
        let mut coordinators = BTreeMap::new();

        for identity in identities {
            let mac = identity.mac();
            if coordinators.contains_key(&mac) {
                warn!("Ignoring duplicate device {mac} ({})", identity.name);
                continue;
            }

            info!("Device {} ({mac}) type {:02X}", identity.name, identity.address.device_type);
            let device = Arc::new(AirPurifier::new(identity.clone(), transport(&identity)));
            coordinators.insert(mac, Arc::new(PollCoordinator::new(device, settings.clone())));
        }

        Self { coordinators }
    }

    pub fn len(&self) -> usize {
        self.coordinators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinators.is_empty()
    }

    /// Devices in MAC order.
    pub fn devices(&self) -> impl Iterator<Item = &Arc<AirPurifier<T>>> {
        self.coordinators.values().map(|c| c.device())
    }

    pub fn coordinators(&self) -> impl Iterator<Item = &Arc<PollCoordinator<T>>> {
        self.coordinators.values()
    }

    pub fn device(&self, mac: &MacAddress) -> Result<&Arc<AirPurifier<T>>> {
        self.coordinator(mac).map(|c| c.device())
    }

    pub fn coordinator(&self, mac: &MacAddress) -> Result<&Arc<PollCoordinator<T>>> {
        self.coordinators
            .get(mac)
            .ok_or_else(|| AppError::UnknownDevice(mac.to_string()))
    }
}

impl<T: Transport + 'static> Hub<T> {
    /// Run every coordinator on its own task until `shutdown` turns true.
    pub fn spawn_pollers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.coordinators
            .values()
            .map(|coordinator| {
                let coordinator = coordinator.clone();
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    coordinator
                        .run(async move {
                            // A dropped sender also stops the poller.
                            let _ = shutdown.wait_for(|stop| *stop).await;
                        })
                        .await;
                })
            })
            .collect()
    }
}

/// Check that the account can log in, without touching any device.
pub async fn validate_credentials(account: &AccountConfig) -> Result<()> {
    login(account).await.map(|_| ())
}

async fn login(account: &AccountConfig) -> Result<CloudClient> {
    let signer = Signer::from_hex(&account.sign_key)?;
    let mut client = CloudClient::new(&account.base_url, signer)?;
    client.login(&account.phone, &account.password).await?;
    Ok(client)
}
