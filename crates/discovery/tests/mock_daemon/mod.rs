//! In-memory discovery daemon for integration tests.
//!
//! Mimics the observable behavior of a real mDNS responder: register
//! defaults and uniquifies names, browse reports each service once per
//! interface with `more_coming` batching, resolve looks registrations
//! up by name and type.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lanlink_discovery::daemon::{
    BrowseEvent, BrowseReply, Daemon, DaemonConnection, RegisterEvent, RegisterReply, ReplyFlags,
    ResolveEvent, ResolveReply,
};

const DEFAULT_NAME: &str = "Untitled Service";
const DEFAULT_DOMAIN: &str = "local.";

/// Interfaces every service is "seen" on; browse reports one reply per
/// interface so tests exercise `more_coming` coalescing.
const INTERFACES: [u32; 2] = [1, 2];

struct Registration {
    name: String,
    regtype: String,
    domain: String,
    port: u16,
    txt: Vec<u8>,
}

struct Watcher {
    regtype: String,
    tx: mpsc::Sender<BrowseEvent>,
}

#[derive(Default)]
struct Registry {
    services: Vec<Registration>,
    watchers: Vec<Watcher>,
}

/// Shared in-memory daemon; clone the `Arc` into every handle under
/// test so they see each other's registrations.
#[derive(Default)]
pub struct MockDaemon {
    registry: Mutex<Registry>,
    /// Total connections ever opened, for leak assertions.
    pub connections_opened: AtomicUsize,
    /// Connections released by a pump dropping them.
    pub connections_released: Arc<AtomicUsize>,
}

impl MockDaemon {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn open_connection<E: Send + 'static>(
        &self,
        reply: Box<dyn FnMut(E) + Send>,
    ) -> (mpsc::Sender<E>, Box<dyn DaemonConnection>) {
        self.connections_opened.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        let connection = MockConnection {
            rx,
            pending: Mutex::new(None),
            reply,
            released: self.connections_released.clone(),
        };
        (tx, Box::new(connection))
    }

    fn unique_name(registry: &Registry, requested: &str, regtype: &str) -> String {
        let taken = |candidate: &str| {
            registry
                .services
                .iter()
                .any(|s| s.name == candidate && s.regtype == regtype)
        };
        if !taken(requested) {
            return requested.into();
        }
        let mut suffix = 2;
        loop {
            let candidate = format!("{requested} #{suffix}");
            if !taken(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    fn browse_events_for(name: &str, regtype: &str, domain: &str, last: bool) -> Vec<BrowseEvent> {
        INTERFACES
            .iter()
            .enumerate()
            .map(|(i, &interface_index)| {
                let final_reply = i + 1 == INTERFACES.len();
                BrowseEvent {
                    flags: ReplyFlags {
                        added: true,
                        more_coming: !(last && final_reply),
                    },
                    interface_index,
                    status: 0,
                    name: name.into(),
                    regtype: regtype.into(),
                    domain: domain.into(),
                }
            })
            .collect()
    }
}

impl Daemon for MockDaemon {
    fn browse(
        &self,
        _interface_index: u32,
        regtype: &str,
        _domain: Option<&str>,
        reply: BrowseReply,
    ) -> Result<Box<dyn DaemonConnection>, i32> {
        let (tx, connection) = self.open_connection(reply);
        let mut registry = self.registry.lock().unwrap();

        let matching: Vec<_> = registry
            .services
            .iter()
            .filter(|s| s.regtype == regtype)
            .map(|s| (s.name.clone(), s.domain.clone()))
            .collect();
        for (i, (name, domain)) in matching.iter().enumerate() {
            let last = i + 1 == matching.len();
            for event in Self::browse_events_for(name, regtype, domain, last) {
                let _ = tx.send(event);
            }
        }

        registry.watchers.push(Watcher {
            regtype: regtype.into(),
            tx,
        });
        Ok(connection)
    }

    fn resolve(
        &self,
        _interface_index: u32,
        name: &str,
        regtype: &str,
        _domain: &str,
        reply: ResolveReply,
    ) -> Result<Box<dyn DaemonConnection>, i32> {
        let (tx, connection) = self.open_connection(reply);
        let registry = self.registry.lock().unwrap();

        let event = match registry
            .services
            .iter()
            .find(|s| s.name == name && s.regtype == regtype)
        {
            Some(service) => ResolveEvent {
                status: 0,
                interface_index: 2,
                host_target: "127.0.0.1".into(),
                port_be: service.port.to_be(),
                txt: service.txt.clone(),
            },
            // kDNSServiceErr_NoSuchName
            None => ResolveEvent {
                status: -65538,
                interface_index: 0,
                host_target: String::new(),
                port_be: 0,
                txt: Vec::new(),
            },
        };
        let _ = tx.send(event);
        Ok(connection)
    }

    fn register(
        &self,
        name: Option<&str>,
        regtype: &str,
        domain: Option<&str>,
        port: u16,
        txt: &[u8],
        reply: RegisterReply,
    ) -> Result<Box<dyn DaemonConnection>, i32> {
        let (tx, connection) = self.open_connection(reply);
        let mut registry = self.registry.lock().unwrap();

        let requested = name.unwrap_or(DEFAULT_NAME);
        let name = Self::unique_name(&registry, requested, regtype);
        let domain = domain.unwrap_or(DEFAULT_DOMAIN).to_owned();

        registry.services.push(Registration {
            name: name.clone(),
            regtype: regtype.into(),
            domain: domain.clone(),
            port,
            txt: txt.to_vec(),
        });

        // Announce to live browsers of this type.
        registry.watchers.retain(|watcher| {
            if watcher.regtype != regtype {
                return true;
            }
            let mut alive = true;
            for event in Self::browse_events_for(&name, regtype, &domain, true) {
                if watcher.tx.send(event).is_err() {
                    alive = false;
                }
            }
            alive
        });

        let _ = tx.send(RegisterEvent {
            status: 0,
            name,
            regtype: regtype.into(),
            domain,
        });
        Ok(connection)
    }
}

struct MockConnection<E> {
    rx: mpsc::Receiver<E>,
    pending: Mutex<Option<E>>,
    reply: Box<dyn FnMut(E) + Send>,
    released: Arc<AtomicUsize>,
}

impl<E: Send> DaemonConnection for MockConnection<E> {
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut pending = self.pending.lock().unwrap();
        if pending.is_some() {
            return Ok(true);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(event) => {
                *pending = Some(event);
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(false),
        }
    }

    fn process_result(&mut self) {
        let event = self.pending.lock().unwrap().take();
        if let Some(event) = event {
            (self.reply)(event);
        }
    }
}

impl<E> Drop for MockConnection<E> {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
