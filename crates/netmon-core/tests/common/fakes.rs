//! Scripted collaborators for monitor and orchestrator tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use netmon_core::config::MonitorConfig;
use netmon_core::control::AbortToken;
use netmon_core::error::{DnsError, ProbeError};
use netmon_core::monitor::{MonitorDeps, NetworkMonitor};
use netmon_core::network::Capabilities;
use netmon_core::observer::{ChannelObserver, MonitorEvent};
use netmon_core::probe::{
    DnsResolver, FixedIndex, HttpRequest, HttpResponse, HttpTransport, RecordType,
};
use netmon_core::stall::TcpHealth;

pub const HTTP_URL: &str = "http://probe.test/generate_204";
pub const HTTPS_URL: &str = "https://probe.test/generate_204";
pub const FALLBACK_URL: &str = "http://fallback.test/gen_204";

#[derive(Clone)]
pub enum Reply {
    Respond(HttpResponse),
    /// Connection-level failure (refused, TLS handshake, timeout...).
    Fail,
    /// Wait, then reply; returns early as aborted when the cycle is cancelled.
    After(Duration, Box<Reply>),
}

impl Reply {
    pub fn status(code: u32) -> Self {
        Reply::Respond(HttpResponse::new(code))
    }

    pub fn redirect(location: &str) -> Self {
        Reply::Respond(HttpResponse::new(302).with_header("Location", location))
    }

    pub fn body(code: u32, body: &str) -> Self {
        Reply::Respond(
            HttpResponse::new(code)
                .with_header("Content-Type", "text/html; charset=utf-8")
                .with_body(body.as_bytes().to_vec()),
        )
    }

    pub fn json(body: &str) -> Self {
        Reply::Respond(
            HttpResponse::new(200)
                .with_header("Content-Type", "application/captive+json")
                .with_body(body.as_bytes().to_vec()),
        )
    }
}

/// HTTP transport answering from a per-URL script; unknown URLs fail.
#[derive(Default)]
pub struct FakeTransport {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, url: &str, reply: Reply) -> &Self {
        self.replies.lock().unwrap().insert(url.to_string(), reply);
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

fn play(reply: Reply, abort: &AbortToken) -> Result<HttpResponse, ProbeError> {
    match reply {
        Reply::Respond(resp) => Ok(resp),
        Reply::Fail => Err(ProbeError::Curl(curl::Error::new(7))),
        Reply::After(delay, next) => {
            let step = Duration::from_millis(5);
            let mut waited = Duration::ZERO;
            while waited < delay {
                if abort.is_aborted() {
                    return Err(ProbeError::Aborted);
                }
                std::thread::sleep(step);
                waited += step;
            }
            play(*next, abort)
        }
    }
}

impl HttpTransport for FakeTransport {
    fn fetch(&self, request: &HttpRequest, abort: &AbortToken) -> Result<HttpResponse, ProbeError> {
        let url = request.url.to_string();
        *self.calls.lock().unwrap().entry(url.clone()).or_insert(0) += 1;
        let reply = self.replies.lock().unwrap().get(&url).cloned();
        play(reply.unwrap_or(Reply::Fail), abort)
    }
}

#[derive(Clone)]
pub enum Answer {
    Addrs(Vec<IpAddr>),
    Error(DnsError),
    After(Duration, Box<Answer>),
    /// The resolver blows up mid-query.
    Panic,
}

/// Resolver: every host answers A 192.0.2.1 unless scripted; AAAA has no data.
#[derive(Default)]
pub struct FakeResolver {
    answers: Mutex<HashMap<String, Answer>>,
    private_down: AtomicBool,
    queries: Mutex<Vec<String>>,
    private_queries: AtomicUsize,
}

impl FakeResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer(&self, host: &str, answer: Answer) -> &Self {
        self.answers.lock().unwrap().insert(host.to_string(), answer);
        self
    }

    pub fn set_private_down(&self, down: bool) {
        self.private_down.store(down, Ordering::SeqCst);
    }

    pub fn queries_for(&self, host: &str) -> usize {
        self.queries.lock().unwrap().iter().filter(|h| *h == host).count()
    }

    pub fn private_queries(&self) -> usize {
        self.private_queries.load(Ordering::SeqCst)
    }
}

async fn answer(answer: Answer, record_type: RecordType) -> Result<Vec<IpAddr>, DnsError> {
    let mut answer = answer;
    loop {
        match answer {
            Answer::After(delay, next) => {
                tokio::time::sleep(delay).await;
                answer = *next;
            }
            Answer::Error(e) => return Err(e),
            Answer::Panic => panic!("resolver crashed"),
            Answer::Addrs(addrs) => {
                let matching: Vec<IpAddr> =
                    addrs.into_iter().filter(|ip| record_type.matches(ip)).collect();
                if matching.is_empty() {
                    return Err(DnsError::NoData(String::new()));
                }
                return Ok(matching);
            }
        }
    }
}

#[async_trait]
impl DnsResolver for FakeResolver {
    async fn query(&self, hostname: &str, record_type: RecordType) -> Result<Vec<IpAddr>, DnsError> {
        self.queries.lock().unwrap().push(hostname.to_string());
        let scripted = self.answers.lock().unwrap().get(hostname).cloned();
        let scripted =
            scripted.unwrap_or_else(|| Answer::Addrs(vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))]));
        answer(scripted, record_type).await
    }

    async fn query_private(&self, _hostname: &str, _record_type: RecordType) -> Result<Vec<IpAddr>, DnsError> {
        self.private_queries.fetch_add(1, Ordering::SeqCst);
        if self.private_down.load(Ordering::SeqCst) {
            return Err(DnsError::Timeout);
        }
        Ok(vec![IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1))])
    }
}

/// TCP health sampler driven by the test.
#[derive(Default)]
pub struct FakeTcp {
    pub received: AtomicI32,
    pub suspected: AtomicBool,
    pub polls: AtomicUsize,
    pub opportunistic: AtomicBool,
}

impl TcpHealth for FakeTcp {
    fn latest_received_count(&self) -> i32 {
        self.received.load(Ordering::SeqCst)
    }

    fn latest_packet_fail_percentage(&self) -> i32 {
        if self.suspected.load(Ordering::SeqCst) {
            100
        } else {
            0
        }
    }

    fn sent_since_last_recv(&self) -> i32 {
        10
    }

    fn is_stall_suspected(&self) -> bool {
        self.suspected.load(Ordering::SeqCst)
    }

    fn poll_sockets_info(&self) -> bool {
        self.polls.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn set_capabilities(&self, _capabilities: &Capabilities) {}

    fn set_opportunistic_mode(&self, enabled: bool) {
        self.opportunistic.store(enabled, Ordering::SeqCst);
    }
}

/// Config pointing at the fake URLs with short timers.
pub fn test_config() -> MonitorConfig {
    MonitorConfig {
        http_url: HTTP_URL.to_string(),
        https_url: HTTPS_URL.to_string(),
        fallback_urls: vec![FALLBACK_URL.to_string()],
        probe_timeout_ms: 2_000,
        dns_probe_timeout_ms: 500,
        private_dns_probe_timeout_ms: 500,
        initial_reevaluate_delay_ms: 60_000,
        max_reevaluate_delay_ms: 600_000,
        min_stall_evaluate_interval_ms: 0,
        tcp_polling_interval_ms: 50,
        ..MonitorConfig::default()
    }
}

pub struct Harness {
    pub monitor: NetworkMonitor,
    pub events: UnboundedReceiver<MonitorEvent>,
    pub transport: Arc<FakeTransport>,
    pub resolver: Arc<FakeResolver>,
    pub tcp: Arc<FakeTcp>,
}

pub fn spawn_monitor(config: MonitorConfig, transport: Arc<FakeTransport>) -> Harness {
    spawn_with(config, transport, FakeResolver::new(), 0)
}

pub fn spawn_with(
    config: MonitorConfig,
    transport: Arc<FakeTransport>,
    resolver: Arc<FakeResolver>,
    index: u32,
) -> Harness {
    let (observer, events) = ChannelObserver::new();
    let tcp = Arc::new(FakeTcp::default());
    let deps = MonitorDeps::new(Arc::new(observer))
        .with_transport(transport.clone())
        .with_resolver(resolver.clone())
        .with_tcp(tcp.clone())
        .with_index_source(Arc::new(FixedIndex(index)));
    Harness {
        monitor: NetworkMonitor::spawn(deps, config),
        events,
        transport,
        resolver,
        tcp,
    }
}

pub async fn next_event(rx: &mut UnboundedReceiver<MonitorEvent>) -> MonitorEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for monitor event")
        .expect("monitor event channel closed")
}

/// Collect events up to and including the next `NetworkTested`.
pub async fn until_tested(rx: &mut UnboundedReceiver<MonitorEvent>) -> Vec<MonitorEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = matches!(event, MonitorEvent::NetworkTested { .. });
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// The `NetworkTested` payload at the end of `events`.
pub fn tested(events: &[MonitorEvent]) -> (u32, u32, Option<String>) {
    match events.last() {
        Some(MonitorEvent::NetworkTested {
            result,
            probes_succeeded,
            redirect_url,
        }) => (*result, *probes_succeeded, redirect_url.clone()),
        other => panic!("expected NetworkTested, got {:?}", other),
    }
}

/// Events that arrive within `window`; for asserting that nothing else happens.
pub async fn drain_for(rx: &mut UnboundedReceiver<MonitorEvent>, window: Duration) -> Vec<MonitorEvent> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        seen.push(event);
    }
    seen
}
