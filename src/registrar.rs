// Jaskier Shared Pattern -- connection registrar
//! Event-stream connection registrar (spec §4.5), grounded in the Python
//! source's `ConnectionManager` (`connection_manager.py`): tracks live
//! streams under a single mutex, rejects admissions once shutdown has
//! begun, and coordinates a bounded drain.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::models::{ConnectionInfo, ShutdownNotice};

struct Registry {
    connections: HashMap<Uuid, ConnectionInfo>,
    shutting_down: bool,
}

#[derive(Debug, Serialize)]
pub struct RegistrarStats {
    pub total: usize,
    pub by_endpoint: HashMap<String, usize>,
    pub by_tenant: HashMap<Uuid, usize>,
    pub oldest_age_seconds: i64,
    pub is_shutting_down: bool,
}

pub struct ConnectionRegistrar {
    registry: std::sync::Mutex<Registry>,
    empty_notify: Notify,
    shutdown_tx: broadcast::Sender<ShutdownNotice>,
}

impl ConnectionRegistrar {
    pub fn new() -> Self {
        let (shutdown_tx, _rx) = broadcast::channel(64);
        Self {
            registry: std::sync::Mutex::new(Registry {
                connections: HashMap::new(),
                shutting_down: false,
            }),
            empty_notify: Notify::new(),
            shutdown_tx,
        }
    }

    pub fn register(&self, conn: ConnectionInfo) -> Result<broadcast::Receiver<ShutdownNotice>, OrchestratorError> {
        let mut guard = self.registry.lock().unwrap();
        if guard.shutting_down {
            return Err(OrchestratorError::Unavailable("shutdown in progress".to_string()));
        }
        let id = conn.connection_id;
        guard.connections.insert(id, conn);
        Ok(self.shutdown_tx.subscribe())
    }

    pub fn unregister(&self, connection_id: Uuid) {
        let mut guard = self.registry.lock().unwrap();
        guard.connections.remove(&connection_id);
        if guard.shutting_down && guard.connections.is_empty() {
            self.empty_notify.notify_waiters();
        }
    }

    /// Scoped acquisition: registers `conn` and returns a guard that
    /// unregisters it on every exit path, error or not (spec §4.5 `track`).
    /// The guard owns a cloned `Arc` rather than borrowing, so it can
    /// outlive the caller's local and be moved into a long-lived stream.
    pub fn track(
        self: &Arc<Self>,
        conn: ConnectionInfo,
    ) -> Result<(ConnectionGuard, broadcast::Receiver<ShutdownNotice>), OrchestratorError> {
        let connection_id = conn.connection_id;
        let rx = self.register(conn)?;
        Ok((
            ConnectionGuard {
                registrar: Arc::clone(self),
                connection_id,
            },
            rx,
        ))
    }

    /// Sets the shutdown flag, notifies every live connection, and waits
    /// up to `grace` for the registry to empty.
    pub async fn initiate_shutdown(&self, grace: std::time::Duration, message: &str) {
        {
            let mut guard = self.registry.lock().unwrap();
            if guard.shutting_down {
                return;
            }
            guard.shutting_down = true;
        }

        let notice = ShutdownNotice {
            message: message.to_string(),
            reconnect_delay_seconds: grace.as_secs(),
        };
        let _ = self.shutdown_tx.send(notice);
        tracing::warn!("registrar: shutdown initiated, grace={}s", grace.as_secs());

        let empty_now = self.registry.lock().unwrap().connections.is_empty();
        if empty_now {
            return;
        }

        let wait = self.empty_notify.notified();
        if tokio::time::timeout(grace, wait).await.is_err() {
            let remaining = self.registry.lock().unwrap().connections.len();
            tracing::warn!("registrar: shutdown grace window elapsed with {} connections still open", remaining);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.registry.lock().unwrap().shutting_down
    }

    pub fn stats(&self) -> RegistrarStats {
        let guard = self.registry.lock().unwrap();
        let mut by_endpoint: HashMap<String, usize> = HashMap::new();
        let mut by_tenant: HashMap<Uuid, usize> = HashMap::new();
        let mut oldest = Utc::now();

        for conn in guard.connections.values() {
            *by_endpoint.entry(conn.endpoint.clone()).or_insert(0) += 1;
            *by_tenant.entry(conn.tenant_id).or_insert(0) += 1;
            if conn.opened_at < oldest {
                oldest = conn.opened_at;
            }
        }

        let oldest_age_seconds = if guard.connections.is_empty() {
            0
        } else {
            (Utc::now() - oldest).num_seconds()
        };

        RegistrarStats {
            total: guard.connections.len(),
            by_endpoint,
            by_tenant,
            oldest_age_seconds,
            is_shutting_down: guard.shutting_down,
        }
    }
}

impl Default for ConnectionRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

/// Guaranteed-unregister guard returned by `ConnectionRegistrar::track`.
pub struct ConnectionGuard {
    registrar: Arc<ConnectionRegistrar>,
    connection_id: Uuid,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registrar.unregister(self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(tenant_id: Uuid) -> ConnectionInfo {
        ConnectionInfo {
            connection_id: Uuid::new_v4(),
            tenant_id,
            endpoint: "submit".to_string(),
            opened_at: Utc::now(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn register_rejects_after_shutdown_begins() {
        let registrar = ConnectionRegistrar::new();
        {
            let mut guard = registrar.registry.lock().unwrap();
            guard.shutting_down = true;
        }
        assert!(registrar.register(conn(Uuid::new_v4())).is_err());
    }

    #[test]
    fn track_guard_unregisters_on_drop() {
        let registrar = Arc::new(ConnectionRegistrar::new());
        let tenant = Uuid::new_v4();
        {
            let (_guard, _rx) = registrar.track(conn(tenant)).unwrap();
            assert_eq!(registrar.stats().total, 1);
        }
        assert_eq!(registrar.stats().total, 0);
    }

    #[tokio::test]
    async fn shutdown_completes_immediately_when_registry_already_empty() {
        let registrar = ConnectionRegistrar::new();
        registrar
            .initiate_shutdown(std::time::Duration::from_millis(50), "bye")
            .await;
        assert!(registrar.is_shutting_down());
    }

    #[tokio::test]
    async fn every_live_connection_receives_one_shutdown_notice() {
        let registrar = Arc::new(ConnectionRegistrar::new());
        let (_g1, mut rx1) = registrar.track(conn(Uuid::new_v4())).unwrap();
        let (_g2, mut rx2) = registrar.track(conn(Uuid::new_v4())).unwrap();

        let registrar_clone = registrar.clone();
        let shutdown = tokio::spawn(async move {
            registrar_clone
                .initiate_shutdown(std::time::Duration::from_millis(200), "bye")
                .await;
        });

        let notice1 = rx1.recv().await.unwrap();
        let notice2 = rx2.recv().await.unwrap();
        assert_eq!(notice1.message, "bye");
        assert_eq!(notice2.message, "bye");

        drop(_g1);
        drop(_g2);
        shutdown.await.unwrap();
    }
}
