//! Service handles: discovery, resolution and registration of one
//! named DNS-SD service, plus its post-resolve data plane.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use lanlink_data_channel::{Channel, TcpChannel, Transport, UdpChannel};

use crate::daemon::{BrowseEvent, Daemon, RegisterEvent, ResolveEvent};
use crate::error::{DiscoveryError, check_status, status_error};
use crate::pump::EventPump;
use crate::txt::TxtRecord;
use crate::types::{ResolvedEndpoint, TxtItem, transport_of, validate_service_type};

/// Result delivered to operation callbacks.
pub type OperationResult = Result<(), DiscoveryError>;

/// Callback shared between a reply closure and the synchronous failure
/// path of the operation that installed it.
type SharedCallback<F> = Arc<Mutex<F>>;

/// Identity and reply-updated state, shared between the handle and the
/// reply closures running on the pump's worker thread.
#[derive(Debug, Clone, Default)]
struct State {
    name: String,
    service_type: String,
    domain: String,
    interface_index: u32,
    txt: TxtRecord,
    endpoint: Option<ResolvedEndpoint>,
}

/// One named/typed/domained network service.
///
/// A handle is either the local side of a registration or a remote
/// service being discovered and resolved. Identity fields are set by
/// the caller before an operation, or adopted from daemon replies once
/// an operation succeeds — the daemon is authoritative from then on.
///
/// The async operations ([`discover`](Self::discover),
/// [`resolve`](Self::resolve), [`register`](Self::register)) return
/// immediately and deliver every outcome, including failure to start,
/// through their callback. Callbacks run on the pump's worker thread;
/// treat them as running on an arbitrary background thread. Mutating a
/// handle while one of its operations is in flight is unsupported.
pub struct Service {
    daemon: Arc<dyn Daemon>,
    state: Arc<Mutex<State>>,
    pump: Option<EventPump>,
    channel: Option<Channel>,
}

impl Service {
    /// Creates an untyped handle; set a type before discover/register.
    pub fn new(daemon: Arc<dyn Daemon>) -> Self {
        Self {
            daemon,
            state: Arc::new(Mutex::new(State::default())),
            pump: None,
            channel: None,
        }
    }

    /// Creates a typed handle.
    ///
    /// The type must start with `_` and carry a `._udp` or `._tcp`
    /// transport suffix (`_osc._udp`, `_http._tcp`).
    pub fn with_type(daemon: Arc<dyn Daemon>, service_type: &str) -> Result<Self, DiscoveryError> {
        validate_service_type(service_type)?;
        let service = Self::new(daemon);
        service.state.lock().unwrap().service_type = service_type.into();
        Ok(service)
    }

    /// Builds a handle for a service reported by a browse reply.
    fn from_reply(
        daemon: Arc<dyn Daemon>,
        name: &str,
        regtype: &str,
        domain: &str,
        interface_index: u32,
    ) -> Self {
        let service = Self::new(daemon);
        {
            let mut state = service.state.lock().unwrap();
            state.name = name.into();
            state.service_type = regtype.into();
            state.domain = domain.into();
            state.interface_index = interface_index;
        }
        service
    }

    // Identity ----------------------------------------------------------

    pub fn set_name(&mut self, name: &str) -> &mut Self {
        self.state.lock().unwrap().name = name.into();
        self
    }

    pub fn set_domain(&mut self, domain: &str) -> &mut Self {
        self.state.lock().unwrap().domain = domain.into();
        self
    }

    pub fn name(&self) -> String {
        self.state.lock().unwrap().name.clone()
    }

    pub fn service_type(&self) -> String {
        self.state.lock().unwrap().service_type.clone()
    }

    pub fn domain(&self) -> String {
        self.state.lock().unwrap().domain.clone()
    }

    pub fn is_udp(&self) -> bool {
        self.transport() == Some(Transport::Udp)
    }

    pub fn is_tcp(&self) -> bool {
        self.transport() == Some(Transport::Tcp)
    }

    fn transport(&self) -> Option<Transport> {
        transport_of(&self.state.lock().unwrap().service_type)
    }

    /// Interface index from the last browse/resolve reply (0 = any).
    pub fn interface_index(&self) -> u32 {
        self.state.lock().unwrap().interface_index
    }

    /// The endpoint recorded by a successful resolve.
    pub fn endpoint(&self) -> Option<ResolvedEndpoint> {
        self.state.lock().unwrap().endpoint.clone()
    }

    // Properties --------------------------------------------------------

    pub fn property(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().txt.get(key).map(str::to_owned)
    }

    pub fn set_property(&mut self, key: &str, value: &str) -> Result<(), DiscoveryError> {
        self.state.lock().unwrap().txt.set(key, value)
    }

    pub fn remove_property(&mut self, key: &str) -> Result<(), DiscoveryError> {
        self.state.lock().unwrap().txt.remove(key)
    }

    pub fn contains_property(&self, key: &str) -> bool {
        self.state.lock().unwrap().txt.contains_key(key)
    }

    pub fn num_properties(&self) -> usize {
        self.state.lock().unwrap().txt.len()
    }

    pub fn property_at(&self, index: usize) -> Result<TxtItem, DiscoveryError> {
        self.state
            .lock()
            .unwrap()
            .txt
            .item_at(index)
            .map(TxtItem::clone)
    }

    // Lifecycle ---------------------------------------------------------

    /// True while a discover/resolve/register pump is owned by this
    /// handle.
    pub fn has_active_operation(&self) -> bool {
        self.pump.is_some()
    }

    /// Derives a fresh handle with this identity, properties and
    /// endpoint, but no active operation and no data channel.
    ///
    /// Background operations and live sockets are exclusively owned by
    /// one handle and are never shared by copies.
    pub fn duplicate(&self) -> Service {
        view(&self.daemon, &self.state)
    }

    // Operations --------------------------------------------------------

    /// Starts browsing for all instances of this handle's service type
    /// (and domain, if set).
    ///
    /// `callback(service, is_added, is_more_coming, result)` fires once
    /// per daemon reply with a fresh handle for the reported peer;
    /// discovered handles carry no properties until resolved. A failure
    /// to start is delivered through the same callback, synchronously,
    /// with both flags false. Callers should wait for `is_more_coming`
    /// to go false before acting, to coalesce multi-interface
    /// announcements. Pass `interface_index` 0 to browse everywhere.
    pub fn discover<F>(&mut self, callback: F, interface_index: u32)
    where
        F: FnMut(Service, bool, bool, OperationResult) + Send + 'static,
    {
        let callback = Arc::new(Mutex::new(callback));
        let (regtype, domain) = {
            let state = self.state.lock().unwrap();
            (state.service_type.clone(), state.domain.clone())
        };

        if let Err(e) = validate_service_type(&regtype) {
            (callback.lock().unwrap())(self.duplicate(), false, false, Err(e));
            return;
        }

        // A new operation supersedes and cancels the previous one.
        self.pump = None;

        let reply_daemon = self.daemon.clone();
        let reply_callback = callback.clone();
        let reply = Box::new(move |event: BrowseEvent| {
            let discovered = Service::from_reply(
                reply_daemon.clone(),
                &event.name,
                &event.regtype,
                &event.domain,
                event.interface_index,
            );
            (reply_callback.lock().unwrap())(
                discovered,
                event.flags.added,
                event.flags.more_coming,
                check_status(event.status),
            );
        });

        debug!(service_type = %regtype, "starting browse");
        let domain_arg = (!domain.is_empty()).then_some(domain.as_str());
        match self.daemon.browse(interface_index, &regtype, domain_arg, reply) {
            Ok(connection) => match EventPump::spawn(connection) {
                Ok(pump) => self.pump = Some(pump),
                Err(e) => {
                    warn!("failed to spawn event pump: {e}");
                    (callback.lock().unwrap())(self.duplicate(), false, false, Err(e.into()));
                }
            },
            Err(status) => {
                warn!(status, service_type = %regtype, "browse failed to start");
                (callback.lock().unwrap())(self.duplicate(), false, false, Err(status_error(status)));
            }
        }
    }

    /// Resolves this handle's name/type/domain to a host and port.
    ///
    /// All three identity fields must be set (as produced by
    /// [`discover`](Self::discover), or manually). On the reply the
    /// handle records the interface index, host and port (host byte
    /// order) and replaces its property record with the one parsed from
    /// the reply's TXT bytes, then `callback(service, result)` fires
    /// with a snapshot of the resolved handle. The pump stops itself
    /// after the reply.
    pub fn resolve<F>(&mut self, callback: F)
    where
        F: FnMut(Service, OperationResult) + Send + 'static,
    {
        let callback = Arc::new(Mutex::new(callback));
        let (name, regtype, domain, interface_index) = {
            let state = self.state.lock().unwrap();
            (
                state.name.clone(),
                state.service_type.clone(),
                state.domain.clone(),
                state.interface_index,
            )
        };

        if name.is_empty() || regtype.is_empty() || domain.is_empty() {
            (callback.lock().unwrap())(
                self.duplicate(),
                Err(DiscoveryError::InvalidArgument(
                    "name, type and domain must all be set before resolve".into(),
                )),
            );
            return;
        }

        self.pump = None;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let reply_daemon = self.daemon.clone();
        let reply_state = self.state.clone();
        let reply_callback = callback.clone();
        let reply = Box::new(move |event: ResolveEvent| {
            // One reply is expected; stop the pump once it is handled.
            stop_flag.store(true, Ordering::Release);
            {
                let mut state = reply_state.lock().unwrap();
                state.interface_index = event.interface_index;
                state.txt = TxtRecord::copied_from_wire(&event.txt);
                state.endpoint = Some(ResolvedEndpoint {
                    interface_index: event.interface_index,
                    host: event.host_target.clone(),
                    port: u16::from_be(event.port_be),
                });
            }
            (reply_callback.lock().unwrap())(
                view(&reply_daemon, &reply_state),
                check_status(event.status),
            );
        });

        debug!(%name, service_type = %regtype, %domain, "starting resolve");
        match self
            .daemon
            .resolve(interface_index, &name, &regtype, &domain, reply)
        {
            Ok(connection) => match EventPump::spawn_with_stop(connection, stop) {
                Ok(pump) => self.pump = Some(pump),
                Err(e) => {
                    warn!("failed to spawn event pump: {e}");
                    (callback.lock().unwrap())(self.duplicate(), Err(e.into()));
                }
            },
            Err(status) => {
                warn!(status, %name, "resolve failed to start");
                (callback.lock().unwrap())(self.duplicate(), Err(status_error(status)));
            }
        }
    }

    /// Registers (advertises) this service on `port`.
    ///
    /// The type must be set; name and domain are optional (the daemon
    /// fills defaults and uniquifies conflicting names). The caller
    /// must already have a listening socket bound to `port` — the
    /// daemon advertises, it does not bind. The current properties are
    /// advertised as the TXT record. On the reply the handle adopts the
    /// daemon-authoritative name/type/domain, then
    /// `callback(service, result)` fires.
    pub fn register<F>(&mut self, callback: F, port: u16)
    where
        F: FnMut(Service, OperationResult) + Send + 'static,
    {
        self.register_impl(Arc::new(Mutex::new(callback)), port, None);
    }

    /// Registers using a pre-bound data channel.
    ///
    /// The advertised port is taken from the channel, and the channel
    /// is retained as this handle's data plane for subsequent
    /// [`read`](Self::read)/[`write`](Self::write) calls.
    pub fn register_with_channel<F>(&mut self, callback: F, channel: Channel)
    where
        F: FnMut(Service, OperationResult) + Send + 'static,
    {
        let callback = Arc::new(Mutex::new(callback));

        if self.transport() != Some(channel.transport()) {
            (callback.lock().unwrap())(
                self.duplicate(),
                Err(DiscoveryError::InvalidArgument(
                    "channel transport does not match the service type".into(),
                )),
            );
            return;
        }
        let Some(port) = channel.local_port() else {
            (callback.lock().unwrap())(
                self.duplicate(),
                Err(DiscoveryError::BindFailed(
                    "channel has no bound local port".into(),
                )),
            );
            return;
        };

        self.register_impl(callback, port, Some(channel));
    }

    fn register_impl<F>(&mut self, callback: SharedCallback<F>, port: u16, channel: Option<Channel>)
    where
        F: FnMut(Service, OperationResult) + Send + 'static,
    {
        let (name, regtype, domain, txt) = {
            let state = self.state.lock().unwrap();
            (
                state.name.clone(),
                state.service_type.clone(),
                state.domain.clone(),
                state.txt.to_wire(),
            )
        };

        if let Err(e) = validate_service_type(&regtype) {
            (callback.lock().unwrap())(self.duplicate(), Err(e));
            return;
        }
        if port == 0 {
            (callback.lock().unwrap())(
                self.duplicate(),
                Err(DiscoveryError::InvalidArgument(
                    "port must be nonzero; bind a listening socket before registering".into(),
                )),
            );
            return;
        }

        self.pump = None;

        let reply_daemon = self.daemon.clone();
        let reply_state = self.state.clone();
        let reply_callback = callback.clone();
        let reply = Box::new(move |event: RegisterEvent| {
            {
                let mut state = reply_state.lock().unwrap();
                state.name = event.name.clone();
                state.service_type = event.regtype.clone();
                state.domain = event.domain.clone();
            }
            (reply_callback.lock().unwrap())(
                view(&reply_daemon, &reply_state),
                check_status(event.status),
            );
        });

        debug!(%name, service_type = %regtype, port, "starting register");
        let name_arg = (!name.is_empty()).then_some(name.as_str());
        let domain_arg = (!domain.is_empty()).then_some(domain.as_str());
        match self
            .daemon
            .register(name_arg, &regtype, domain_arg, port, &txt, reply)
        {
            Ok(connection) => match EventPump::spawn(connection) {
                Ok(pump) => {
                    self.pump = Some(pump);
                    if channel.is_some() {
                        self.channel = channel;
                    }
                }
                Err(e) => {
                    warn!("failed to spawn event pump: {e}");
                    (callback.lock().unwrap())(self.duplicate(), Err(e.into()));
                }
            },
            Err(status) => {
                warn!(status, service_type = %regtype, "register failed to start");
                (callback.lock().unwrap())(self.duplicate(), Err(status_error(status)));
            }
        }
    }

    // Data plane --------------------------------------------------------

    /// Waits up to `timeout` for the data channel to become ready.
    ///
    /// Valid once this handle has been resolved or registered with a
    /// channel; a resolved handle materializes and connects its
    /// outbound channel on first use, so readiness can be queried
    /// before the first write.
    pub fn wait_until_ready(
        &mut self,
        for_reading: bool,
        timeout: Duration,
    ) -> Result<bool, DiscoveryError> {
        if self.transport().is_none() {
            return Err(DiscoveryError::NotReady(
                "service has no UDP or TCP transport".into(),
            ));
        }
        let channel = self.channel_for_io()?;
        Ok(channel.wait_until_ready(for_reading, timeout)?)
    }

    /// Reads payload data: one datagram for UDP; for TCP the next
    /// inbound connection is accepted first when listening.
    pub fn read(&mut self, buf: &mut [u8], block_until_full: bool) -> Result<usize, DiscoveryError> {
        if self.transport().is_none() {
            return Err(DiscoveryError::NotReady(
                "service has no UDP or TCP transport".into(),
            ));
        }
        let channel = self.channel_for_io()?;
        Ok(channel.read(buf, block_until_full)?)
    }

    /// Writes payload data to the resolved endpoint, connecting lazily
    /// on first use (UDP fixes the peer; TCP opens the stream).
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, DiscoveryError> {
        if self.endpoint().is_none() {
            return Err(DiscoveryError::NotReady(
                "service has not been resolved".into(),
            ));
        }
        let channel = self.channel_for_io()?;
        Ok(channel.write(buf)?)
    }

    /// Returns the handle's data channel, lazily creating the outbound
    /// one and connecting it to the resolved endpoint.
    ///
    /// Without a retained channel (registration) or a recorded endpoint
    /// (resolve) there is nothing to do I/O against.
    fn channel_for_io(&mut self) -> Result<&mut Channel, DiscoveryError> {
        let endpoint = self.endpoint();
        if self.channel.is_none() {
            if endpoint.is_none() {
                return Err(DiscoveryError::NotReady(
                    "no data channel; resolve first or register with a channel".into(),
                ));
            }
            let transport = self.transport().ok_or_else(|| {
                DiscoveryError::NotReady("service has no UDP or TCP transport".into())
            })?;
            self.channel = Some(match transport {
                Transport::Udp => Channel::Udp(UdpChannel::bind(0)?),
                Transport::Tcp => Channel::Tcp(TcpChannel::outbound()),
            });
        }
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| DiscoveryError::NotReady("no data channel".into()))?;
        if let Some(endpoint) = endpoint {
            if !channel.is_connected() {
                channel.connect(&endpoint.host, endpoint.port)?;
            }
        }
        Ok(channel)
    }
}

/// Builds a detached handle sharing nothing with `state` but its
/// current contents.
fn view(daemon: &Arc<dyn Daemon>, state: &Arc<Mutex<State>>) -> Service {
    let snapshot = state.lock().unwrap().clone();
    Service {
        daemon: daemon.clone(),
        state: Arc::new(Mutex::new(snapshot)),
        pump: None,
        channel: None,
    }
}

impl PartialEq for Service {
    /// Identity comparison: name, type and domain. Properties, pumps
    /// and sockets are live state and excluded.
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.state, &other.state) {
            return true;
        }
        let a = self.state.lock().unwrap();
        let b = other.state.lock().unwrap();
        a.name == b.name && a.service_type == b.service_type && a.domain == b.domain
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("Service")
            .field("name", &state.name)
            .field("type", &state.service_type)
            .field("domain", &state.domain)
            .field("endpoint", &state.endpoint)
            .field("active", &self.pump.is_some())
            .finish()
    }
}
