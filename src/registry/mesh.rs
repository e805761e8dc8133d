//! # Registry mesh synchronizer.
//!
//! Registries talk only through bounded inbox channels; each registry drains
//! its inbox in a single listener task, so no registry ever waits on a
//! synchronous call into another.
//!
//! ## Joining
//! ```text
//! r1.register_with_registry(r2, forward = true)
//!   r1: add r2, advertise r1's components to r2
//!   r1 ──Join{r1, false}──► r2          r2: add r1, advertise r2's components to r1
//!   for every other peer p of r1:
//!     r1 ──Join{r2, false}──► p         p:  add r2, advertise to r2
//!     r1 ──Join{p,  false}──► r2        r2: add p,  advertise to p
//! ```
//! A `forward = false` join is never forwarded again (gossip-once).
//!
//! ## Propagation
//! Local registrations, deregistrations and state changes are sent to every
//! peer. Each send is bounded by the RPC timeout; a slow or gone peer yields a
//! `PropagationFailed` event and never stops the fan-out.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tracing::{debug, warn};

use crate::access::methods;
use crate::capability::Capability;
use crate::component::ComponentRef;
use crate::error::{MeshError, MeshResult};
use crate::events::{Bus, Event, EventKind};
use crate::identity::{ComponentId, ComponentInfo, ComponentState};
use crate::registry::Registry;
use crate::registry::table::{ComponentRecord, Origin};

/// Address of a registry's mesh inbox.
#[derive(Clone)]
pub struct PeerLink {
    name: Arc<str>,
    tx: mpsc::Sender<MeshMessage>,
}

impl PeerLink {
    /// Registry name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
impl PeerLink {
    /// A link whose inbox is already gone.
    pub(crate) fn closed(name: &str) -> Self {
        let (tx, _) = mpsc::channel(1);
        Self {
            name: Arc::from(name),
            tx,
        }
    }
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerLink").field(&self.name).finish()
    }
}

/// A component as advertised to peers.
#[derive(Clone)]
pub(crate) struct Advert {
    pub(crate) info: ComponentInfo,
    pub(crate) state: ComponentState,
    pub(crate) recovery_multiplier: u32,
    pub(crate) endpoint: ComponentRef,
}

/// Registry-to-registry message.
#[derive(Clone)]
pub(crate) enum MeshMessage {
    Join { peer: PeerLink, forward: bool },
    Advertise { from: String, advert: Advert },
    Withdraw { from: String, id: ComponentId },
    StateChanged { from: String, id: ComponentId, state: ComponentState },
    Connected { target: ComponentId, client: ComponentId },
    Leave { from: String },
}

impl MeshMessage {
    fn label(&self) -> &'static str {
        match self {
            MeshMessage::Join { .. } => "join",
            MeshMessage::Advertise { .. } => "advertise",
            MeshMessage::Withdraw { .. } => "withdraw",
            MeshMessage::StateChanged { .. } => "state_changed",
            MeshMessage::Connected { .. } => "connected",
            MeshMessage::Leave { .. } => "leave",
        }
    }
}

/// A sibling registry and the components it advertised to us.
struct RegistryPeer {
    link: PeerLink,
    advertised: BTreeSet<ComponentId>,
}

/// Peer table plus this registry's own inbox address.
pub(crate) struct Mesh {
    link: PeerLink,
    peers: RwLock<BTreeMap<String, RegistryPeer>>,
    timeout: Duration,
    bus: Bus,
}

impl Mesh {
    pub(crate) fn new(
        name: &str,
        capacity: usize,
        timeout: Duration,
        bus: Bus,
    ) -> (Self, mpsc::Receiver<MeshMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let mesh = Self {
            link: PeerLink {
                name: Arc::from(name),
                tx,
            },
            peers: RwLock::new(BTreeMap::new()),
            timeout,
            bus,
        };
        (mesh, rx)
    }

    pub(crate) fn link(&self) -> PeerLink {
        self.link.clone()
    }

    pub(crate) fn name(&self) -> &str {
        self.link.name()
    }

    /// Adds or refreshes a peer. Returns whether it was new and the other peers' links.
    async fn add_peer(&self, link: PeerLink) -> (bool, Vec<PeerLink>) {
        let mut peers = self.peers.write().await;
        let others = peers
            .values()
            .filter(|p| p.link.name() != link.name())
            .map(|p| p.link.clone())
            .collect();
        let fresh = match peers.get_mut(link.name()) {
            Some(p) => {
                p.link = link;
                false
            }
            None => {
                peers.insert(
                    link.name().to_string(),
                    RegistryPeer {
                        link,
                        advertised: BTreeSet::new(),
                    },
                );
                true
            }
        };
        (fresh, others)
    }

    async fn remove_peer(&self, name: &str) -> Option<BTreeSet<ComponentId>> {
        self.peers.write().await.remove(name).map(|p| p.advertised)
    }

    async fn note_advertised(&self, peer: &str, id: &ComponentId, present: bool) {
        if let Some(p) = self.peers.write().await.get_mut(peer) {
            if present {
                p.advertised.insert(id.clone());
            } else {
                p.advertised.remove(id);
            }
        }
    }

    /// Peer names and what each advertised.
    pub(crate) async fn view(&self) -> BTreeMap<String, BTreeSet<ComponentId>> {
        self.peers
            .read()
            .await
            .iter()
            .map(|(n, p)| (n.clone(), p.advertised.clone()))
            .collect()
    }

    /// Queues a message into this registry's own inbox.
    pub(crate) async fn enqueue_local(&self, msg: MeshMessage) -> MeshResult<()> {
        self.link
            .tx
            .send_timeout(msg, self.timeout)
            .await
            .map_err(|_| MeshError::unavailable(self.name(), self.timeout))
    }

    /// Bounded send; failures are reported, never propagated.
    async fn send(&self, link: &PeerLink, msg: MeshMessage) -> bool {
        let label = msg.label();
        match link.tx.send_timeout(msg, self.timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                self.failed(link.name(), format!("{label}: timed out after {:?}", self.timeout));
                false
            }
            Err(SendTimeoutError::Closed(_)) => {
                self.failed(link.name(), format!("{label}: peer inbox closed"));
                let gone = MeshMessage::Leave {
                    from: link.name().to_string(),
                };
                if let Err(TrySendError::Full(_)) = self.link.tx.try_send(gone) {
                    debug!(peer = link.name(), "inbox full; peer removal deferred");
                }
                false
            }
        }
    }

    fn failed(&self, peer: &str, reason: String) {
        warn!(peer, %reason, "mesh propagation failed");
        self.bus.publish(
            Event::new(EventKind::PropagationFailed)
                .with_peer(peer)
                .with_reason(reason),
        );
    }

    /// Sends to one named peer, if known.
    pub(crate) async fn send_to(&self, peer: &str, msg: MeshMessage) -> bool {
        let link = self.peers.read().await.get(peer).map(|p| p.link.clone());
        match link {
            Some(link) => self.send(&link, msg).await,
            None => false,
        }
    }

    /// Sends to every peer; a failing peer does not stop the others.
    pub(crate) async fn broadcast(&self, msg: MeshMessage) {
        let links: Vec<PeerLink> = self
            .peers
            .read()
            .await
            .values()
            .map(|p| p.link.clone())
            .collect();
        for link in links {
            self.send(&link, msg.clone()).await;
        }
    }
}

impl Registry {
    /// This registry's mesh address.
    pub fn link(&self) -> PeerLink {
        self.mesh.link()
    }

    /// Joins `peer` into this registry's mesh view.
    ///
    /// Requires a registry capability. With `forward = true` the newcomer is
    /// also introduced to every existing peer and vice versa.
    pub async fn register_with_registry(
        &self,
        creds: &Capability,
        peer: PeerLink,
        forward: bool,
    ) -> MeshResult<()> {
        self.guard(Some(creds), methods::REGISTER_WITH_REGISTRY)?;
        self.mesh
            .enqueue_local(MeshMessage::Join { peer, forward })
            .await
    }

    pub(crate) fn spawn_mesh_listener(self: &Arc<Self>, mut rx: mpsc::Receiver<MeshMessage>) {
        let me = Arc::clone(self);
        let token = self.token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(m) => me.on_mesh(m).await,
                        None => break,
                    }
                }
            }
        });
    }

    async fn on_mesh(&self, msg: MeshMessage) {
        match msg {
            MeshMessage::Join { peer, forward } => self.on_join(peer, forward).await,
            MeshMessage::Advertise { from, advert } => self.on_advertise(from, advert).await,
            MeshMessage::Withdraw { from, id } => {
                self.drop_replica(&from, &id, "withdrawn").await;
                self.mesh.note_advertised(&from, &id, false).await;
            }
            MeshMessage::StateChanged { from, id, state } => {
                if let Some(rec) = self.table.get(&id).await {
                    let mut r = rec.lock().await;
                    if r.origin == Origin::Peer(from.clone()) {
                        r.state = state;
                        drop(r);
                        self.publish(
                            Event::new(EventKind::StateChanged)
                                .with_component(&id)
                                .with_peer(from)
                                .with_state(state),
                        );
                    }
                }
            }
            MeshMessage::Connected { target, client } => {
                if let Some(rec) = self.table.get(&target).await {
                    let mut r = rec.lock().await;
                    if r.is_local() {
                        r.clients.insert(client);
                    }
                }
            }
            MeshMessage::Leave { from } => {
                if let Some(ids) = self.mesh.remove_peer(&from).await {
                    for id in ids {
                        self.drop_replica(&from, &id, "peer left").await;
                    }
                    self.publish(Event::new(EventKind::PeerLeft).with_peer(from));
                }
            }
        }
    }

    async fn on_join(&self, peer: PeerLink, forward: bool) {
        if peer.name() == self.name() {
            return;
        }
        let (fresh, others) = self.mesh.add_peer(peer.clone()).await;
        if fresh {
            self.publish(Event::new(EventKind::PeerJoined).with_peer(peer.name()));
        }

        for advert in self.local_adverts().await {
            let msg = MeshMessage::Advertise {
                from: self.name().to_string(),
                advert,
            };
            self.mesh.send(&peer, msg).await;
        }

        if forward {
            let me = MeshMessage::Join {
                peer: self.mesh.link(),
                forward: false,
            };
            self.mesh.send(&peer, me).await;
            for other in others {
                let intro_new = MeshMessage::Join {
                    peer: peer.clone(),
                    forward: false,
                };
                self.mesh.send(&other, intro_new).await;
                let intro_other = MeshMessage::Join {
                    peer: other.clone(),
                    forward: false,
                };
                self.mesh.send(&peer, intro_other).await;
            }
        }
    }

    async fn on_advertise(&self, from: String, advert: Advert) {
        let id = advert.info.id.clone();
        if let Some(rec) = self.table.get(&id).await {
            let mut r = rec.lock().await;
            let owner = r.origin.clone();
            match owner {
                Origin::Peer(p) if p == from => {
                    // re-registration at the owner (e.g. after a relaunch) brings a new endpoint
                    r.info = advert.info;
                    r.recovery_multiplier = advert.recovery_multiplier;
                    r.endpoint = advert.endpoint;
                    r.state = advert.state;
                    debug!(component = %id, peer = %from, "replica refreshed");
                    return;
                }
                Origin::Peer(p) => {
                    debug!(component = %id, owner = %p, from = %from, "advert for id owned by another peer ignored");
                    return;
                }
                Origin::Local => {
                    warn!(component = %id, peer = %from, "peer advertised a locally registered id");
                    return;
                }
            }
        }

        let mut record = ComponentRecord::new(
            advert.info,
            advert.recovery_multiplier,
            Origin::Peer(from.clone()),
            advert.endpoint,
            None,
        );
        record.state = advert.state;
        self.table.insert(record).await;
        self.mesh.note_advertised(&from, &id, true).await;
        self.publish(
            Event::new(EventKind::ComponentReplicated)
                .with_component(&id)
                .with_peer(from),
        );
    }

    async fn drop_replica(&self, from: &str, id: &ComponentId, why: &str) {
        let Some(rec) = self.table.get(id).await else {
            return;
        };
        if rec.lock().await.origin != Origin::Peer(from.to_string()) {
            return;
        }
        if self.table.remove_if_same(id, &rec).await {
            self.forget_references(id).await;
            self.publish(
                Event::new(EventKind::ComponentDeregistered)
                    .with_component(id)
                    .with_peer(from)
                    .with_reason(why),
            );
        }
    }

    /// Adverts for every local record that is not dead.
    pub(crate) async fn local_adverts(&self) -> Vec<Advert> {
        let mut out = Vec::new();
        for (_, rec) in self.table.snapshot().await {
            let r = rec.lock().await;
            if r.is_local() && r.state != ComponentState::Dead {
                out.push(Advert {
                    info: r.info.clone(),
                    state: r.state,
                    recovery_multiplier: r.recovery_multiplier,
                    endpoint: r.endpoint.clone(),
                });
            }
        }
        out
    }

    /// Tells every peer about a local state change.
    pub(crate) async fn propagate_state(&self, id: &ComponentId, state: ComponentState) {
        self.mesh
            .broadcast(MeshMessage::StateChanged {
                from: self.name().to_string(),
                id: id.clone(),
                state,
            })
            .await;
    }
}
