use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::directory::Directory;
use crate::notify::{NotificationLoop, start_notifications};
use crate::record::{CONNECTED, DISCONNECTED};
use crate::relay::{LocalEvent, PeerLink, Relay};
use crate::sync::SyncEngine;
use crate::transport::{Cse, Transport};

/// Status changes of the wide-area link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Established,
    Lost,
}

/// Ties provisioning, local changes and the notification loop to the
/// state of the link
pub struct Session<T, R> {
    cse: Cse<T>,
    directory: Directory<T>,
    sync: Arc<SyncEngine<T>>,
    relay: R,
    connected: bool,
    notifications: Option<JoinHandle<()>>,
}

impl<T, R> Session<T, R>
where
    T: Transport + 'static,
    R: Relay + Clone + 'static,
{
    pub fn new(cse: Cse<T>, relay: R) -> Self {
        let directory = Directory::new(cse.clone());
        let sync = Arc::new(SyncEngine::new(cse.clone(), directory.subscribe()));
        Self {
            cse,
            directory,
            sync,
            relay,
            connected: false,
            notifications: None,
        }
    }

    pub fn directory(&self) -> &Directory<T> {
        &self.directory
    }

    pub fn sync(&self) -> &SyncEngine<T> {
        &self.sync
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn notifications_started(&self) -> bool {
        self.notifications.is_some()
    }

    fn is_ready(&self) -> bool {
        self.connected && self.directory.is_complete()
    }

    fn render(&self) {
        let record = self.sync.record();
        self.relay.relay(record.light1, record.light2);
    }

    /// Push the local record, keeping it buffered if that fails
    async fn push(&self) {
        if let Err(e) = self.sync.sync().await {
            warn!("local change kept for later: {e}");
        }
    }

    /// Provision the resource tree and, the first time it completes, start
    /// listening for notifications
    async fn provision(&mut self) {
        if let Err(e) = self.directory.provision().await {
            warn!("provisioning incomplete, will retry: {e}");
            return;
        }

        if self.notifications.is_none() {
            let notifications = NotificationLoop::new(
                self.cse.clone(),
                self.sync.clone(),
                self.directory.subscribe(),
                self.relay.clone(),
            );
            self.notifications = Some(start_notifications(notifications));
            info!("listening for notifications");
        }

        self.push().await;
        self.render();
    }

    #[instrument(skip(self))]
    pub async fn on_link(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Established => {
                info!("link established");
                self.connected = true;
                self.provision().await;
            }
            LinkEvent::Lost => {
                warn!("link lost, switching lights to red");
                self.connected = false;
                self.sync.fail_safe();
                self.render();
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn on_local(&mut self, event: LocalEvent) {
        let changed = match event {
            LocalEvent::Override { target, state } => self.sync.set_light(target, state),
            LocalEvent::Peer(PeerLink::Connected) => self.sync.set_connectivity(CONNECTED),
            LocalEvent::Peer(PeerLink::Disconnected) => self.sync.set_connectivity(DISCONNECTED),
        };
        if !changed {
            return;
        }

        if self.is_ready() {
            self.render();
            self.push().await;
        } else {
            debug!("not provisioned, keeping change for later");
        }
    }

    /// Retry provisioning if the link is up but the tree is incomplete
    pub async fn reprovision(&mut self) {
        if self.connected && !self.directory.is_complete() {
            debug!("retrying provisioning");
            self.provision().await;
        }
    }

    /// Stop the notification loop and forget every resource handle
    pub fn reset(&mut self) {
        self.stop();
        self.directory.reset();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.notifications.take() {
            handle.abort();
        }
    }
}

/// Drive `session` from link and local events until the link channel
/// closes
pub async fn start_session<T, R>(
    mut session: Session<T, R>,
    mut links: mpsc::Receiver<LinkEvent>,
    mut local: mpsc::Receiver<LocalEvent>,
) where
    T: Transport + 'static,
    R: Relay + Clone + 'static,
{
    let period = session.cse.config().request.reprovision_interval;
    let mut reprovision = time::interval_at(time::Instant::now() + period, period);
    reprovision.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut local_open = true;

    loop {
        tokio::select! {
            event = links.recv() => match event {
                Some(event) => session.on_link(event).await,
                None => break,
            },
            event = local.recv(), if local_open => match event {
                Some(event) => session.on_local(event).await,
                None => {
                    debug!("local events closed");
                    local_open = false;
                }
            },
            _ = reprovision.tick() => session.reprovision().await,
        }
    }

    info!("session ended");
    session.stop();
}
