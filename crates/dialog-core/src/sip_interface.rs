//! # SIP interface
//!
//! [`SipInterface`] is the stack as the service layer sees it. It owns the
//! listening points, the transaction manager, the table of pending
//! [`SipTransactionContext`]s and the registered listeners.
//!
//! Outgoing requests get a client transaction and a context keyed by their
//! Call-ID; the caller then waits on the context. A reactor task consumes
//! the [`StackEvent`]s of the transaction layer:
//!
//! - an ACK resolves the context of the 2xx it acknowledges and is never
//!   shown to listeners;
//! - any other request is queued to every [`SipEventListener`];
//! - a final response resolves the pending context, a 180 Ringing is
//!   handed to the context's [`ProvisionalResponseHandler`];
//! - a client transaction timeout resolves the pending context with no
//!   message.
//!
//! The reactor never waits on application code.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rcs_sip_core::ids::generate_message_id;
use rcs_sip_core::{
    Header, HeaderName, Method, NameAddr, Request, SIP_INSTANCE_PARAM, SipMessageExt, StatusCode,
    Uri, Via, generate_branch,
};
#[cfg(feature = "tls")]
use rcs_sip_transport::TlsConfig;
use rcs_sip_transport::{TransportManager, TransportManagerConfig, TransportType};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::SipStackConfig;
use crate::dialog_path::SipDialogPath;
use crate::errors::{Result, SipError};
use crate::factory::{DefaultMessageFactory, MessageFactory};
use crate::keep_alive::{HeartbeatSender, KeepAliveManager};
use crate::listener::{ListenerId, ListenerRegistry, ProvisionalResponseHandler, SipEventListener};
use crate::message::{SipMessage, SipRequest, SipResponse};
use crate::trace::SipTrace;
use crate::transaction::{
    ClientTransaction, ServerTransaction, StackEvent, StackTransaction, TimerSettings,
    TransactionManager,
};
use crate::transaction_context::{SipTransactionContext, TransactionTable};

/// Requests within this many bytes of the MTU go over TCP (RFC 3261 18.1.1)
pub const MTU_MARGIN: usize = 200;

/// Capacity of the transport event channel
const TRANSPORT_EVENT_BUFFER: usize = 1000;

#[derive(Debug, Default, Clone)]
struct Addressing {
    public_gruu: Option<String>,
    temporary_gruu: Option<String>,
    instance_id: Option<String>,
}

/// Heartbeats to the outbound proxy over the default transport
struct ProxyHeartbeat {
    transport: Arc<TransportManager>,
    proxy: SocketAddr,
}

#[async_trait]
impl HeartbeatSender for ProxyHeartbeat {
    async fn send_heartbeat(&self) -> Result<()> {
        self.transport.send_keep_alive(self.proxy).await?;
        Ok(())
    }
}

/// The SIP stack used by the session and service logic
pub struct SipInterface {
    config: SipStackConfig,
    proxy: SocketAddr,
    listening_port: u16,
    transport: Arc<TransportManager>,
    transactions: TransactionManager,
    contexts: Arc<TransactionTable>,
    listeners: Arc<ListenerRegistry>,
    keep_alive: KeepAliveManager,
    factory: Arc<dyn MessageFactory>,
    addressing: RwLock<Addressing>,
    default_route_path: Vec<String>,
    service_route_path: RwLock<Vec<String>>,
    reactor: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SipInterface {
    /// Opens the listening points and starts the stack
    pub async fn initialize(config: SipStackConfig) -> Result<Self> {
        Self::initialize_with_factory(config, Arc::new(DefaultMessageFactory)).await
    }

    /// Like [`initialize`](Self::initialize), building ACK, BYE, CANCEL and
    /// UPDATE through `factory`.
    ///
    /// Any failure leaves nothing running and is reported as an
    /// initialization error.
    pub async fn initialize_with_factory(
        config: SipStackConfig,
        factory: Arc<dyn MessageFactory>,
    ) -> Result<Self> {
        config.validated()?;
        let proxy = resolve_proxy(&config)
            .await
            .map_err(|e| SipError::initialization_with("Can't resolve the outbound proxy", e))?;

        let trace = if config.sip_trace_enabled {
            let trace = SipTrace::create(&config.sip_trace_file)
                .map_err(|e| SipError::initialization_with("Can't create the SIP trace file", e))?;
            Some(Arc::new(trace))
        } else {
            None
        };

        let transport_config = TransportManagerConfig {
            bind_addr: SocketAddr::new(config.local_ip, config.listening_port),
            default_transport: config.default_protocol,
            tcp_fallback: config.tcp_fallback,
            #[cfg(feature = "tls")]
            tls: tls_config(&config),
            max_event_buffer: TRANSPORT_EVENT_BUFFER,
        };
        let (transport, transport_events) = TransportManager::new(transport_config)
            .await
            .map_err(|e| {
                error!("SIP stack initialization has failed: {}", e);
                SipError::initialization_with("Can't create the SIP stack", e)
            })?;
        let transport = Arc::new(transport);

        match Self::start(config, proxy, transport.clone(), transport_events, trace, factory) {
            Ok(interface) => Ok(interface),
            Err(e) => {
                error!("SIP stack initialization has failed: {}", e);
                if let Err(close_error) = transport.close().await {
                    warn!("Can't cleanup SIP stack correctly: {}", close_error);
                }
                Err(SipError::initialization_with("Can't create the SIP stack", e))
            }
        }
    }

    fn start(
        config: SipStackConfig,
        proxy: SocketAddr,
        transport: Arc<TransportManager>,
        transport_events: mpsc::Receiver<rcs_sip_transport::TransportEvent>,
        trace: Option<Arc<SipTrace>>,
        factory: Arc<dyn MessageFactory>,
    ) -> Result<Self> {
        let listening_port = transport.local_addr(config.default_protocol)?.port();
        let (transactions, stack_events) = TransactionManager::start(
            transport.clone(),
            transport_events,
            proxy,
            config.local_ip,
            config.timer_settings(),
            trace,
        )?;

        let contexts = Arc::new(TransactionTable::new());
        let listeners = Arc::new(ListenerRegistry::default());
        let reactor = tokio::spawn(run_reactor(
            stack_events,
            contexts.clone(),
            listeners.clone(),
        ));

        let keep_alive = KeepAliveManager::new(
            Arc::new(ProxyHeartbeat {
                transport: transport.clone(),
                proxy,
            }),
            config.keep_alive_period(),
            config.keep_alive_recovery(),
        );
        if config.keep_alive_enabled {
            keep_alive.start();
        }

        let default_route = format_default_route(
            &config.outbound_proxy_addr,
            config.outbound_proxy_port,
            config.default_protocol,
        );
        if config.default_protocol == TransportType::Udp {
            debug!("Default SIP provider is UDP (TCP fallback={})", config.tcp_fallback);
        } else {
            debug!("Default SIP provider is {}", config.default_protocol);
        }
        info!(
            "SIP stack started at {}:{}",
            config.local_ip, listening_port
        );

        Ok(Self {
            config,
            proxy,
            listening_port,
            transport,
            transactions,
            contexts,
            listeners,
            keep_alive,
            factory,
            addressing: RwLock::new(Addressing::default()),
            default_route_path: vec![default_route.clone()],
            service_route_path: RwLock::new(vec![default_route]),
            reactor: Mutex::new(Some(reactor)),
            closed: AtomicBool::new(false),
        })
    }

    /// Stops keep-alive, drops the listeners, releases every waiter and
    /// closes the listening points. Calling it again does nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.keep_alive.stop();
        self.listeners.clear();
        if let Some(reactor) = self.reactor.lock().take() {
            reactor.abort();
        }
        self.contexts.clear();
        self.transactions.close();
        if let Err(e) = self.transport.close().await {
            error!("Can't stop SIP stack correctly: {}", e);
        }
        info!("SIP stack closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(SipError::network("SIP stack is closed"))
        } else {
            Ok(())
        }
    }

    pub fn config(&self) -> &SipStackConfig {
        &self.config
    }

    pub fn local_ip_address(&self) -> IpAddr {
        self.config.local_ip
    }

    pub fn outbound_proxy_addr(&self) -> &str {
        &self.config.outbound_proxy_addr
    }

    pub fn outbound_proxy_port(&self) -> u16 {
        self.config.outbound_proxy_port
    }

    /// Resolved address requests are sent to
    pub fn outbound_proxy_socket(&self) -> SocketAddr {
        self.proxy
    }

    pub fn proxy_protocol(&self) -> TransportType {
        self.config.default_protocol
    }

    pub fn default_protocol(&self) -> TransportType {
        self.config.default_protocol
    }

    pub fn listening_port(&self) -> u16 {
        self.listening_port
    }

    pub fn is_tcp_fallback(&self) -> bool {
        self.config.tcp_fallback
    }

    pub fn mtu_size(&self) -> usize {
        self.config.mtu
    }

    pub fn timer_settings(&self) -> TimerSettings {
        self.transactions.timer_settings()
    }

    pub fn keep_alive_manager(&self) -> &KeepAliveManager {
        &self.keep_alive
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn transaction_table(&self) -> &TransactionTable {
        &self.contexts
    }

    pub fn message_factory(&self) -> &Arc<dyn MessageFactory> {
        &self.factory
    }

    pub fn public_gruu(&self) -> Option<String> {
        self.addressing.read().public_gruu.clone()
    }

    pub fn set_public_gruu(&self, gruu: Option<String>) {
        self.addressing.write().public_gruu = gruu;
    }

    pub fn temporary_gruu(&self) -> Option<String> {
        self.addressing.read().temporary_gruu.clone()
    }

    pub fn set_temporary_gruu(&self, gruu: Option<String>) {
        self.addressing.write().temporary_gruu = gruu;
    }

    pub fn instance_id(&self) -> Option<String> {
        self.addressing.read().instance_id.clone()
    }

    pub fn set_instance_id(&self, instance_id: Option<String>) {
        self.addressing.write().instance_id = instance_id;
    }

    fn local_host(&self) -> String {
        match self.config.local_ip {
            IpAddr::V6(ip) => format!("[{}]", ip),
            IpAddr::V4(ip) => ip.to_string(),
        }
    }

    /// Via for a new request: local address, default protocol, fresh branch
    pub fn via_headers(&self) -> Vec<Via> {
        let mut via = Via::new(
            &self.proxy_protocol().to_string(),
            self.local_host(),
            Some(self.listening_port),
            &generate_branch(),
        );
        via.set_rport();
        vec![via]
    }

    /// `<random-id>@<local-ip>` (RFC 3261 section 25.1)
    pub fn generate_call_id(&self) -> String {
        format!("{}@{}", generate_message_id(), self.config.local_ip)
    }

    /// `<sip:ip:port;transport=proto>`
    pub fn local_contact(&self) -> NameAddr {
        let mut uri = Uri::sip(self.local_host()).with_port(self.listening_port);
        uri.set_transport(self.config.default_protocol.as_param());
        NameAddr::new(uri)
    }

    /// Contact for outgoing requests: the public GRUU when one was
    /// assigned, else the local contact carrying the instance id when set
    pub fn contact(&self) -> Result<NameAddr> {
        let addressing = self.addressing.read().clone();
        if let Some(gruu) = addressing.public_gruu {
            let mut uri: Uri = gruu
                .parse()
                .map_err(|e| SipError::payload_with(format!("Invalid GRUU '{}'", gruu), e))?;
            uri.set_transport(self.config.default_protocol.as_param());
            return Ok(NameAddr::new(uri));
        }
        let mut contact = self.local_contact();
        if let Some(instance_id) = addressing.instance_id {
            contact.params.set(SIP_INSTANCE_PARAM, instance_id);
        }
        Ok(contact)
    }

    /// `<sip:proxy:port;transport=proto;lr>`, lower-cased
    pub fn default_route(&self) -> String {
        self.default_route_path[0].clone()
    }

    pub fn default_route_path(&self) -> Vec<String> {
        self.default_route_path.clone()
    }

    pub fn service_route_path(&self) -> Vec<String> {
        self.service_route_path.read().clone()
    }

    /// Replaces the service route with the default route followed by
    /// `routes`, lower-cased and without duplicates
    pub fn set_service_route_path<I, S>(&self, routes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut path = vec![self.default_route()];
        for route in routes {
            let route = route.as_ref().trim().to_lowercase();
            if !route.is_empty() && !path.contains(&route) {
                path.push(route);
            }
        }
        debug!("Service route path set to {:?}", path);
        *self.service_route_path.write() = path;
    }

    pub fn add_sip_event_listener(&self, listener: Arc<dyn SipEventListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_sip_event_listener(&self, id: ListenerId) -> bool {
        debug!(id = %id, "Remove a SIP listener");
        self.listeners.remove(id)
    }

    pub fn remove_sip_event_listeners(&self) {
        self.listeners.clear();
    }

    pub fn sip_event_listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn remove_transaction_context(&self, id: &str) {
        self.contexts.remove(id);
    }

    /// Rewrites the top Via and top Route of a UDP request that comes within
    /// [`MTU_MARGIN`] bytes of the MTU so that it goes over TCP.
    ///
    /// Returns whether the request now goes over TCP. A request already
    /// rewritten keeps the same headers.
    pub fn apply_tcp_fallback(&self, request: &mut Request) -> Result<bool> {
        if self.config.default_protocol != TransportType::Udp || !self.config.tcp_fallback {
            return Ok(false);
        }
        let size = request.to_bytes().len();
        if size <= self.config.mtu.saturating_sub(MTU_MARGIN) {
            return Ok(false);
        }
        debug!(
            "Transaction falls back to TCP as request size is {} and MTU size is {}",
            size, self.config.mtu
        );

        match request.top_via() {
            Some(mut via) => {
                via.set_transport("TCP");
                request.set_top_via(&via).map_err(|e| {
                    SipError::network_with("Can't update Via header for TCP fallback", e)
                })?;
            }
            None => {
                let via = Via::new(
                    "TCP",
                    self.local_host(),
                    Some(self.listening_port),
                    &generate_branch(),
                );
                request
                    .prepend_header(HeaderName::Via, via.to_string())
                    .map_err(|e| {
                        SipError::network_with("Can't add Via header for TCP fallback", e)
                    })?;
            }
        }

        let Some(index) = request
            .headers
            .iter()
            .position(|h| h.name == HeaderName::Route)
        else {
            return Ok(true);
        };
        let mut route: NameAddr = request.headers[index].value.parse().map_err(|e| {
            SipError::network_with("Update of route header due to TCP fallback failed", e)
        })?;
        if route.uri.is_sip() {
            route.uri.set_transport(TransportType::Tcp.as_param());
            request.headers[index] = Header::new(HeaderName::Route, route.to_string())?;
        } else {
            error!("Update of route header due to TCP fallback failed due to wrong address format!");
        }
        Ok(true)
    }

    /// Creates the client transaction for `request`, after TCP fallback,
    /// and binds it to the request
    pub fn create_new_transaction(&self, request: &mut SipRequest) -> Result<ClientTransaction> {
        self.ensure_open()?;
        self.apply_tcp_fallback(request.stack_message_mut())?;
        let transaction = self
            .transactions
            .create_client_transaction(request.stack_message().clone())?;
        request.set_transaction(transaction.clone().into());
        Ok(transaction)
    }

    fn register_context(
        &self,
        id: String,
        transaction: StackTransaction,
        callback: Option<Arc<dyn ProvisionalResponseHandler>>,
    ) -> Arc<SipTransactionContext> {
        let context = Arc::new(match callback {
            Some(callback) => SipTransactionContext::with_callback(id, Some(transaction), callback),
            None => SipTransactionContext::new(id, Some(transaction)),
        });
        debug!(id = %context.transaction_id(), "Create a transaction context");
        self.contexts.insert(context.clone());
        context
    }

    /// Removes `context` again when sending failed, unless it was replaced
    fn discard_context(&self, context: &Arc<SipTransactionContext>) {
        let id = context.transaction_id();
        if let Some(current) = self.contexts.get(id) {
            if Arc::ptr_eq(&current, context) {
                self.contexts.remove(id);
            }
        }
    }

    /// Sends a request or response and returns the context to wait on.
    ///
    /// A request reuses the client transaction it is bound to, or gets a new
    /// one that is bound to `message`. A response must be bound to a server
    /// transaction; its context receives the ACK of a 2xx.
    pub async fn send_sip_message_and_wait(
        &self,
        message: &mut SipMessage,
        callback: Option<Arc<dyn ProvisionalResponseHandler>>,
    ) -> Result<Arc<SipTransactionContext>> {
        self.ensure_open()?;
        match message {
            SipMessage::Request(request) => self.send_request_and_wait(request, callback).await,
            SipMessage::Response(response) => self.send_response_and_wait(response).await,
        }
    }

    async fn send_request_and_wait(
        &self,
        request: &mut SipRequest,
        callback: Option<Arc<dyn ProvisionalResponseHandler>>,
    ) -> Result<Arc<SipTransactionContext>> {
        let id = request
            .transaction_id()
            .ok_or_else(|| SipError::payload("Request has no Call-ID header"))?;
        let transaction = match request.transaction() {
            Some(StackTransaction::Client(tx)) => tx.clone(),
            Some(StackTransaction::Server(_)) => {
                return Err(SipError::payload(format!(
                    "{} request is bound to a server transaction",
                    request.method()
                )));
            }
            None => self.create_new_transaction(request)?,
        };

        let context = self.register_context(id.clone(), transaction.clone().into(), callback);
        debug!(call_id = %id, ">>> Send SIP {}", request.method());
        if let Err(e) = transaction.send_request().await {
            error!(call_id = %id, "Can't send SIP message: {}", e);
            self.discard_context(&context);
            return Err(e.context("Can't send SIP message"));
        }
        Ok(context)
    }

    async fn send_response_and_wait(
        &self,
        response: &SipResponse,
    ) -> Result<Arc<SipTransactionContext>> {
        let transaction = server_transaction_of(response)?;
        let id = response
            .transaction_id()
            .ok_or_else(|| SipError::payload("Response has no Call-ID header"))?;

        let context = self.register_context(id.clone(), transaction.clone().into(), None);
        debug!(call_id = %id, ">>> Send SIP {} response", response.status_code());
        if let Err(e) = transaction
            .send_response(response.stack_message().clone())
            .await
        {
            error!(call_id = %id, "Can't send SIP message: {}", e);
            self.discard_context(&context);
            return Err(e.context("Can't send SIP message"));
        }
        Ok(context)
    }

    /// Sends a response on its server transaction without waiting
    pub async fn send_sip_response(&self, response: &SipResponse) -> Result<()> {
        self.ensure_open()?;
        let transaction = server_transaction_of(response)?;
        debug!(
            call_id = ?response.call_id(),
            ">>> Send SIP {} response",
            response.status_code()
        );
        transaction
            .send_response(response.stack_message().clone())
            .await
            .map_err(|e| e.context("Can't send SIP message"))
    }

    /// Acknowledges the 2xx of the dialog's INVITE
    pub async fn send_sip_ack(&self, dialog: &SipDialogPath) -> Result<()> {
        self.ensure_open()?;
        let call_id = dialog.call_id();
        let ack = self.factory.create_ack(dialog)?;
        let stack_dialog = dialog.stack_dialog().ok_or_else(|| {
            SipError::payload(format!("No stack dialog for call {}", call_id))
        })?;
        debug!(call_id = %call_id, ">>> Send SIP ACK");
        stack_dialog
            .send_ack(ack.stack_message())
            .await
            .map_err(|e| e.context("Can't send SIP message"))
    }

    /// Cancels the dialog's pending INVITE; does nothing for an INVITE this
    /// side is answering
    pub async fn send_sip_cancel(&self, dialog: &SipDialogPath) -> Result<()> {
        self.ensure_open()?;
        let call_id = dialog.call_id();
        let invite = dialog
            .invite()
            .ok_or_else(|| SipError::payload(format!("No INVITE to cancel for call {}", call_id)))?;
        if invite.transaction().map(|tx| tx.is_server()).unwrap_or(false) {
            debug!(call_id = %call_id, "Server transaction can't send a CANCEL");
            return Ok(());
        }

        let mut cancel = self.factory.create_cancel(dialog)?;
        if let Some(agent) = dialog.authentication_agent() {
            agent.set_proxy_authorization_header(&mut cancel)?;
        }
        let transaction = self.create_new_transaction(&mut cancel)?;
        debug!(call_id = %call_id, ">>> Send SIP CANCEL");
        transaction
            .send_request()
            .await
            .map_err(|e| e.context("Can't send SIP message"))
    }

    /// Sends a BYE on the dialog without waiting for its response
    pub async fn send_sip_bye(&self, dialog: &SipDialogPath) -> Result<()> {
        self.ensure_open()?;
        let call_id = dialog.call_id();
        let mut bye = self.factory.create_bye(dialog)?;
        if let Some(agent) = dialog.authentication_agent() {
            agent.set_proxy_authorization_header(&mut bye)?;
        }
        let stack_dialog = dialog.stack_dialog().ok_or_else(|| {
            SipError::payload(format!("No stack dialog for call {}", call_id))
        })?;
        let transaction = self.create_new_transaction(&mut bye)?;
        debug!(call_id = %call_id, ">>> Send SIP BYE");
        stack_dialog
            .send_request(&transaction)
            .await
            .map_err(|e| e.context("Can't send SIP message"))
    }

    /// Sends a session refresh UPDATE and returns the context to wait on
    pub async fn send_sip_update(&self, dialog: &SipDialogPath) -> Result<Arc<SipTransactionContext>> {
        self.ensure_open()?;
        let mut update = self.factory.create_update(dialog)?;
        if let Some(agent) = dialog.authentication_agent() {
            agent.set_proxy_authorization_header(&mut update)?;
        }
        debug!(call_id = %dialog.call_id(), ">>> Send SIP UPDATE");
        self.send_in_dialog(dialog, &mut update).await
    }

    /// Sends a request built by the caller within the dialog and returns the
    /// context to wait on
    pub async fn send_subsequent_request(
        &self,
        dialog: &SipDialogPath,
        request: &mut SipRequest,
    ) -> Result<Arc<SipTransactionContext>> {
        self.ensure_open()?;
        if let Some(agent) = dialog.authentication_agent() {
            agent.set_proxy_authorization_header(request)?;
        }
        debug!(call_id = %dialog.call_id(), ">>> Send SIP {}", request.method());
        self.send_in_dialog(dialog, request).await
    }

    /// Registers the context before handing the request to the stack dialog
    /// so that a fast response always finds it
    async fn send_in_dialog(
        &self,
        dialog: &SipDialogPath,
        request: &mut SipRequest,
    ) -> Result<Arc<SipTransactionContext>> {
        let call_id = dialog.call_id();
        let stack_dialog = dialog.stack_dialog().ok_or_else(|| {
            SipError::payload(format!("No stack dialog for call {}", call_id))
        })?;
        let id = request
            .transaction_id()
            .ok_or_else(|| SipError::payload("Request has no Call-ID header"))?;
        let transaction = self.create_new_transaction(request)?;
        let context = self.register_context(id, transaction.clone().into(), None);
        if let Err(e) = stack_dialog.send_request(&transaction).await {
            error!(call_id = %call_id, "Can't send SIP message: {}", e);
            self.discard_context(&context);
            return Err(e.context("Can't send SIP message"));
        }
        Ok(context)
    }
}

impl Drop for SipInterface {
    fn drop(&mut self) {
        if let Some(reactor) = self.reactor.lock().take() {
            reactor.abort();
        }
    }
}

impl fmt::Debug for SipInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SipInterface")
            .field("local_ip", &self.config.local_ip)
            .field("listening_port", &self.listening_port)
            .field("proxy", &self.proxy)
            .field("default_protocol", &self.config.default_protocol)
            .field("pending_contexts", &self.contexts.len())
            .field("listeners", &self.listeners.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn server_transaction_of(response: &SipResponse) -> Result<ServerTransaction> {
    match response.transaction() {
        Some(StackTransaction::Server(tx)) => Ok(tx.clone()),
        _ => {
            warn!(
                call_id = ?response.call_id(),
                "No transaction exist: the response can't be sent"
            );
            Err(SipError::network("No transaction found"))
        }
    }
}

/// `<sip:HOST:PORT;transport=PROTO;lr>` with IPv6 hosts bracketed
pub fn format_default_route(addr: &str, port: u16, protocol: TransportType) -> String {
    let host = addr.trim_start_matches('[').trim_end_matches(']');
    let route = if host.parse::<Ipv6Addr>().is_ok() {
        format!("<sip:[{}]:{};transport={};lr>", host, port, protocol)
    } else {
        format!("<sip:{}:{};transport={};lr>", host, port, protocol)
    };
    route.to_lowercase()
}

/// Resolves the outbound proxy, preferring the local address family
async fn resolve_proxy(config: &SipStackConfig) -> std::io::Result<SocketAddr> {
    let host = config
        .outbound_proxy_addr
        .trim_start_matches('[')
        .trim_end_matches(']');
    let candidates: Vec<SocketAddr> =
        tokio::net::lookup_host((host, config.outbound_proxy_port))
            .await?
            .collect();
    candidates
        .iter()
        .find(|addr| addr.is_ipv6() == config.local_ip.is_ipv6())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no address for {}", config.outbound_proxy_addr),
            )
        })
}

#[cfg(feature = "tls")]
fn tls_config(config: &SipStackConfig) -> Option<TlsConfig> {
    let ca_file = config.tls.ca_file.clone()?;
    Some(TlsConfig {
        ca_file,
        cert_file: config.tls.cert_file.clone(),
        key_file: config.tls.key_file.clone(),
        server_name: config
            .tls
            .server_name
            .clone()
            .unwrap_or_else(|| config.outbound_proxy_addr.clone()),
    })
}

async fn run_reactor(
    mut events: mpsc::Receiver<StackEvent>,
    contexts: Arc<TransactionTable>,
    listeners: Arc<ListenerRegistry>,
) {
    while let Some(event) = events.recv().await {
        match event {
            StackEvent::Request {
                request,
                transaction,
                source,
            } => {
                let request = SipRequest::with_transaction(request, transaction.map(Into::into));
                process_request(&contexts, &listeners, request, source);
            }
            StackEvent::Response {
                response,
                transaction,
            } => {
                let response = SipResponse::with_transaction(response, Some(transaction.into()));
                process_response(&contexts, response);
            }
            StackEvent::Timeout { transaction } => process_timeout(&contexts, transaction),
        }
    }
    debug!("Stack event channel closed");
}

fn process_request(
    contexts: &TransactionTable,
    listeners: &ListenerRegistry,
    request: SipRequest,
    source: SocketAddr,
) {
    debug!(source = %source, "<<< Receive SIP {}", request.method());
    if request.method() == &Method::Ack {
        let Some(id) = request.transaction_id() else {
            warn!(source = %source, "ACK without Call-ID dropped");
            return;
        };
        let transaction = request.transaction().cloned();
        if contexts.resolve_transaction(&id, transaction.as_ref(), Some(request.into())) {
            debug!(id = %id, "Callback object found for transaction");
        } else {
            trace!(id = %id, "No context waiting for this ACK");
        }
        return;
    }
    if listeners.is_empty() {
        debug!("No SIP listener for {}", request.method());
    }
    listeners.dispatch(&request);
}

fn process_response(contexts: &TransactionTable, response: SipResponse) {
    let code = response.status_code();
    debug!("<<< Receive SIP {} response", code);
    let Some(id) = response.transaction_id() else {
        warn!("Response without Call-ID dropped");
        return;
    };
    // CANCEL shares the Call-ID of the INVITE whose context is pending
    if response.cseq_method() == Some(Method::Cancel) {
        trace!(id = %id, "Response to CANCEL by-passed");
        return;
    }

    if code >= StatusCode::OK.as_u16() {
        let transaction = response.transaction().cloned();
        if contexts.resolve_transaction(&id, transaction.as_ref(), Some(response.into())) {
            debug!(id = %id, "Callback object found for transaction");
        }
        return;
    }

    let Some(context) = contexts.get(&id) else {
        return;
    };
    match context.provisional_handler() {
        Some(handler) if code == StatusCode::RINGING.as_u16() => {
            debug!(id = %id, "Notify 180 Ringing");
            tokio::spawn(async move { handler.handle_180_ringing(response).await });
        }
        _ => trace!(id = %id, "By pass provisional response {}", code),
    }
}

fn process_timeout(contexts: &TransactionTable, transaction: StackTransaction) {
    debug!(id = %transaction.key(), "Transaction timeout");
    if transaction.is_server() {
        warn!(id = %transaction.key(), "Unexpected timeout for a server transaction");
        return;
    }
    let Some(id) = crate::message::transaction_id(transaction.request()) else {
        return;
    };
    contexts.resolve_transaction(&id, Some(&transaction), None);
}
