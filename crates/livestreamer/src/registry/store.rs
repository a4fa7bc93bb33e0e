//! Client registry implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use uuid::Uuid;

use shared::{DeletedClient, SanitizedClient, WsEnvelope};

use crate::events::{EventHub, SubscriptionId};
use crate::stats::Scheduler;

use super::client::Client;
use super::error::RegistryError;

/// Membership events, published in the order the changes happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    AddClient(SanitizedClient),
    DeleteClient(DeletedClient),
    /// Client count after an add or delete
    ClientCount(usize),
}

/// Authoritative set of connected clients, in insertion order.
///
/// No lock is held while calling the scheduler. Every membership change bumps
/// `generation` under the clients lock; after an empty/non-empty edge the
/// scheduler is re-synced until no change slipped in between.
pub struct ClientRegistry {
    clients: Mutex<Vec<Client>>,
    generation: AtomicU64,
    scheduler: Arc<dyn Scheduler>,
    events: EventHub<RegistryEvent>,
    me: Weak<ClientRegistry>,
}

impl ClientRegistry {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            clients: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            scheduler,
            events: EventHub::new(),
            me: me.clone(),
        })
    }

    /// Insert a client. Starts the scheduler when the registry was empty.
    pub fn add_client(&self, client: Client) -> Result<(), RegistryError> {
        let sanitized = client.sanitized();
        let count = {
            let mut clients = lock(&self.clients);
            if clients.iter().any(|c| c.uuid == client.uuid) {
                tracing::warn!(uuid = %client.uuid, "Duplicate client rejected");
                return Err(RegistryError::DuplicateClient(client.uuid));
            }
            clients.push(client);
            self.generation.fetch_add(1, Ordering::AcqRel);
            // Published under the lock so events keep membership order.
            self.events.publish(RegistryEvent::AddClient(sanitized.clone()));
            self.events.publish(RegistryEvent::ClientCount(clients.len()));
            clients.len()
        };

        tracing::debug!(uuid = %sanitized.uuid, username = %sanitized.username, clients = count, "Client added");
        if count == 1 {
            self.sync_scheduler();
        }
        Ok(())
    }

    /// Remove a client by UUID. Unknown UUIDs are ignored.
    pub fn delete_client(&self, uuid: &Uuid) -> Option<Client> {
        let (removed, count) = {
            let mut clients = lock(&self.clients);
            let pos = clients.iter().position(|c| c.uuid == *uuid)?;
            let removed = clients.remove(pos);
            self.generation.fetch_add(1, Ordering::AcqRel);
            self.events
                .publish(RegistryEvent::DeleteClient(removed.deleted()));
            self.events.publish(RegistryEvent::ClientCount(clients.len()));
            (removed, clients.len())
        };

        tracing::debug!(uuid = %uuid, username = %removed.username, clients = count, "Client deleted");
        if count == 0 {
            self.sync_scheduler();
        }
        Some(removed)
    }

    /// Bring the scheduler in line with the current membership.
    ///
    /// Loops until no add/delete happened during the scheduler call, so the
    /// last call made always matches the final membership.
    fn sync_scheduler(&self) {
        loop {
            let (generation, empty) = {
                let clients = lock(&self.clients);
                (self.generation.load(Ordering::Acquire), clients.is_empty())
            };
            if empty {
                self.scheduler.stop();
            } else {
                self.scheduler.start(self.me.clone());
            }
            if self.generation.load(Ordering::Acquire) == generation {
                break;
            }
        }
    }

    pub fn get_client(&self, uuid: &Uuid) -> Option<Client> {
        lock(&self.clients).iter().find(|c| c.uuid == *uuid).cloned()
    }

    pub fn clients(&self) -> Vec<Client> {
        lock(&self.clients).clone()
    }

    pub fn client_count(&self) -> usize {
        lock(&self.clients).len()
    }

    pub fn sanitized_clients(&self) -> Vec<SanitizedClient> {
        lock(&self.clients).iter().map(Client::sanitized).collect()
    }

    /// Queue `envelope` on every client's socket. Returns how many accepted it.
    pub fn broadcast(&self, envelope: &WsEnvelope) -> usize {
        let sockets: Vec<_> = lock(&self.clients)
            .iter()
            .map(|c| c.socket.clone())
            .collect();
        sockets
            .into_iter()
            .filter(|socket| socket.send(envelope.clone()))
            .count()
    }

    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<RegistryEvent>) {
        self.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.events.unsubscribe(id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
