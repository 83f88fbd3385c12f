//! KNXnet/IP server discovery.
//!
//! Enumerates servers by multicasting (or unicasting) search requests and
//! collecting the responses until the configured window closes. Two
//! protocol generations coexist: CoreV1 sends the classic `SEARCH_REQUEST`,
//! CoreV2 sends `SEARCH_REQUEST_EXTENDED` with optional SRP filters; the
//! agent can run either or both in one cycle. Responses are deduplicated by
//! (control endpoint address, port, individual address), so a server that
//! answers both requests is reported once.
//!
//! ## Protocol Flow
//!
//! ```text
//! Client                          Servers
//!   |                                |
//!   |------- SEARCH_REQUEST -------->| (multicast 224.0.23.12:3671)
//!   |<------ SEARCH_RESPONSE --------|
//!   |<------ SEARCH_RESPONSE --------|  (until the timeout elapses)
//! ```
//!
//! With a non-zero frequency the whole cycle repeats periodically until
//! [`DiscoveryAgent::stop`].

use crate::bytes::MAX_FRAME_SIZE;
use crate::config::ConnectionConfig;
use crate::error::{KnxError, Result};
use crate::knx_log;
use crate::net::transport::MulticastTransport;
use crate::net::{IpEndpoint, Ipv4Addr, KNXNETIP_MULTICAST, KNXNETIP_PORT};
use crate::protocol::constants::ServiceType;
use crate::protocol::frame::FrameView;
use crate::protocol::services::{SearchRequest, SearchRequestExtended, SearchResponse, MAX_SRPS};
use crate::protocol::structures::{Hpai, Srp};
use embassy_time::{with_timeout, Duration, Instant, Timer};
use heapless::Vec;

/// Discovery TTL; discovery stays link-local.
const DISCOVERY_TTL: u8 = 4;

/// Servers remembered per cycle.
pub const MAX_SERVERS: usize = 8;

/// Which search generations to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryMode {
    /// Classic `SEARCH_REQUEST` only.
    #[default]
    CoreV1,
    /// `SEARCH_REQUEST_EXTENDED` only.
    CoreV2,
    /// Both requests per cycle.
    CoreV1V2,
}

impl DiscoveryMode {
    const fn sends_v1(self) -> bool {
        matches!(self, Self::CoreV1 | Self::CoreV1V2)
    }

    const fn sends_v2(self) -> bool {
        matches!(self, Self::CoreV2 | Self::CoreV1V2)
    }
}

/// One discovered server.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServerInfo {
    /// The parsed response (control endpoint, hardware, families, extras).
    pub response: SearchResponse,
    /// Where the response datagram came from.
    pub source: IpEndpoint,
}

impl ServerInfo {
    /// The endpoint to connect to.
    pub fn control_endpoint(&self) -> IpEndpoint {
        // NAT form in the response means "use the datagram source".
        if self.response.control_endpoint.is_nat() {
            self.source
        } else {
            self.response.control_endpoint.endpoint()
        }
    }

    /// The server's KNX individual address.
    pub fn individual_address(&self) -> u16 {
        self.response.device.individual_address
    }

    /// Friendly device name.
    pub fn name(&self) -> &[u8] {
        self.response.device.name()
    }

    fn dedup_key(&self) -> (Ipv4Addr, u16, u16) {
        let ep = self.control_endpoint();
        (ep.addr, ep.port, self.individual_address())
    }
}

/// Discovery configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveryConfig {
    /// Which request generations to send.
    pub mode: DiscoveryMode,
    /// SRP filters for the extended request.
    pub srps: Vec<Srp, MAX_SRPS>,
    /// Collection window per cycle.
    pub timeout: Duration,
    /// Unicast target instead of the multicast group, if set.
    pub unicast_target: Option<IpEndpoint>,
    /// Cycle repetition interval; zero means a single cycle.
    pub frequency: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::CoreV1,
            srps: Vec::new(),
            timeout: ConnectionConfig::new().search_timeout,
            unicast_target: None,
            frequency: Duration::from_ticks(0),
        }
    }
}

/// Search agent over a multicast-capable transport.
pub struct DiscoveryAgent<T: MulticastTransport> {
    transport: T,
    config: DiscoveryConfig,
    servers: Vec<ServerInfo, MAX_SERVERS>,
    running: bool,
    rx_buffer: [u8; MAX_FRAME_SIZE],
}

impl<T: MulticastTransport> DiscoveryAgent<T> {
    /// Agent with the default configuration (CoreV1, 3 s window).
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, DiscoveryConfig::default())
    }

    /// Agent with an explicit configuration.
    pub fn with_config(transport: T, config: DiscoveryConfig) -> Self {
        Self {
            transport,
            config,
            servers: Vec::new(),
            running: false,
            rx_buffer: [0u8; MAX_FRAME_SIZE],
        }
    }

    /// Reconfigure before the next cycle.
    pub fn configure(&mut self, config: DiscoveryConfig) {
        self.config = config;
    }

    /// Servers found in the most recent cycle.
    pub fn servers(&self) -> &[ServerInfo] {
        &self.servers
    }

    /// Stop a periodic scan after the current cycle.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Access the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one search cycle and return the deduplicated responses.
    pub async fn search(&mut self) -> Result<&[ServerInfo]> {
        self.servers.clear();
        self.transport.bind(0)?;

        if self.config.unicast_target.is_none() {
            self.transport.join(KNXNETIP_MULTICAST).await?;
        }

        self.emit_requests().await?;
        self.collect_responses().await?;
        knx_log!(info, "discovery cycle found {} server(s)", self.servers.len());
        Ok(&self.servers)
    }

    /// Run cycles at the configured frequency until [`stop`](Self::stop).
    ///
    /// Calls `on_discovered` for every new server of every cycle.
    pub async fn run(&mut self, mut on_discovered: impl FnMut(&ServerInfo)) -> Result<()> {
        self.running = true;
        while self.running {
            let started = Instant::now();
            self.search().await?;
            for server in &self.servers {
                on_discovered(server);
            }
            if self.config.frequency.as_ticks() == 0 {
                break;
            }
            let elapsed = Instant::now().duration_since(started);
            if self.config.frequency > elapsed {
                Timer::after(self.config.frequency - elapsed).await;
            }
        }
        self.running = false;
        Ok(())
    }

    async fn emit_requests(&mut self) -> Result<()> {
        // NAT form: servers answer to the datagram source.
        let hpai = Hpai::nat();

        if self.config.mode.sends_v1() {
            let frame = SearchRequest::new(hpai).build()?;
            self.send_request(frame.bytes()).await?;
        }
        if self.config.mode.sends_v2() {
            let mut request = SearchRequestExtended::new(hpai);
            for srp in &self.config.srps {
                request.srps.push(srp.clone()).map_err(|_| KnxError::out_of_resource())?;
            }
            let frame = request.build()?;
            self.send_request(frame.bytes()).await?;
        }
        Ok(())
    }

    async fn send_request(&mut self, bytes: &[u8]) -> Result<()> {
        match self.config.unicast_target {
            Some(target) => self.transport.send_to(bytes, target).await,
            None => {
                self.transport
                    .send_multicast(KNXNETIP_MULTICAST, KNXNETIP_PORT, DISCOVERY_TTL, bytes)
                    .await
            }
        }
    }

    async fn collect_responses(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.config.timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let window = deadline.duration_since(now);
            match with_timeout(window, self.transport.recv_from(&mut self.rx_buffer)).await {
                Ok(Ok((n, source))) => self.accept_response(n, source),
                Ok(Err(e)) if e.is_timeout() => return Ok(()),
                Ok(Err(e)) => return Err(e),
                Err(_) => return Ok(()),
            }
        }
    }

    fn accept_response(&mut self, n: usize, source: IpEndpoint) {
        let view = match FrameView::parse(&self.rx_buffer[..n]) {
            Ok(view) => view,
            Err(_) => {
                knx_log!(debug, "dropping malformed search response");
                return;
            }
        };
        if !matches!(
            view.service_type(),
            ServiceType::SearchResponse | ServiceType::SearchResponseExtended
        ) {
            return;
        }
        let response = match SearchResponse::parse(view.body()) {
            Ok(r) => r,
            Err(_) => return,
        };
        let info = ServerInfo { response, source };
        if self
            .servers
            .iter()
            .any(|known| known.dedup_key() == info.dedup_key())
        {
            return;
        }
        if self.servers.push(info).is_err() {
            knx_log!(warn, "discovery table full, ignoring further servers");
        }
    }
}
