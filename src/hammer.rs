//! Orchestrator: builds one hammer from the registry, runs every loop on its
//! own thread and tears everything down in dependency order.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::Receiver;
use uuid::Uuid;

use crate::config::HammerConfig;
use crate::error::HammerError;
use crate::generator::Generator;
use crate::handler::Handler;
use crate::registry::{ComponentContext, Registry};
use crate::shutdown::StopSignal;
use crate::sink::{
    error_channel, log_channel, run_error_reader, run_log_reader, ErrorSink, LogSink, Sinks,
};
use crate::stats::{Stats, StatsSnapshot};
use crate::transport::{PacketLink, Transport};

struct Components {
    transport: Arc<Transport>,
    stats: Arc<dyn Stats>,
    handler: Arc<dyn Handler>,
    generator: Arc<dyn Generator>,
}

/// Control surface for the signal watcher and the HTTP API.
#[derive(Clone)]
pub struct HammerHandle {
    run_id: Uuid,
    generator: Arc<dyn Generator>,
    stats: Arc<dyn Stats>,
}

impl HammerHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Ask the generator to finish; the running hammer then shuts down the
    /// rest. Blocks until the generator loop has returned.
    pub fn stop(&self) {
        self.generator.stop();
    }

    pub fn update(&self, update: &serde_json::Value) -> Result<(), HammerError> {
        self.generator.update(update)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stats_json(&self) -> serde_json::Value {
        serde_json::to_value(self.stats.snapshot()).unwrap_or(serde_json::Value::Null)
    }
}

pub struct Hammer {
    config: Arc<HammerConfig>,
    registry: Registry,
    run_id: Uuid,
    link: Option<Arc<dyn PacketLink>>,
    log_sink: LogSink,
    log_rx: Receiver<String>,
    error_sink: ErrorSink,
    error_rx: Receiver<HammerError>,
    components: Option<Components>,
}

impl Hammer {
    pub fn new(config: HammerConfig, registry: Registry) -> Self {
        let (log_sink, log_rx) = log_channel();
        let (error_sink, error_rx) = error_channel();
        Self {
            config: Arc::new(config),
            registry,
            run_id: Uuid::new_v4(),
            link: None,
            log_sink,
            log_rx,
            error_sink,
            error_rx,
            components: None,
        }
    }

    /// Run over an already open link instead of opening an AF_PACKET socket.
    pub fn with_link(config: HammerConfig, registry: Registry, link: Arc<dyn PacketLink>) -> Self {
        Self {
            link: Some(link),
            ..Self::new(config, registry)
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn transport(&self) -> Option<&Arc<Transport>> {
        self.components.as_ref().map(|c| &c.transport)
    }

    /// Available after [`init`](Self::init).
    pub fn handle(&self) -> Option<HammerHandle> {
        self.components.as_ref().map(|c| HammerHandle {
            run_id: self.run_id,
            generator: Arc::clone(&c.generator),
            stats: Arc::clone(&c.stats),
        })
    }

    /// Build and initialize transport, stats, handler and generator.
    ///
    /// # Errors
    /// Invalid configuration, an unknown hammer type, or any component's
    /// init failure. The socket is closed before returning an error.
    pub fn init(&mut self) -> Result<(), HammerError> {
        self.config.validate()?;
        let kind = self.config.hammer_type();

        let transport = Arc::new(match &self.link {
            Some(link) => Transport::with_link(
                Arc::clone(link),
                &self.config.transport,
                Arc::clone(&self.error_sink),
            ),
            None => Transport::init(
                &self.config.transport,
                self.registry.filter(kind),
                Arc::clone(&self.error_sink),
            )?,
        });

        match self.build(kind, &transport) {
            Ok(components) => {
                tracing::info!(
                    run_id = %self.run_id,
                    hammer = kind,
                    iface = %transport.interface().name,
                    gateway = %transport.gateway_mac(),
                    "hammer initialized"
                );
                self.components = Some(components);
                Ok(())
            }
            Err(e) => {
                if let Err(close) = transport.deinit() {
                    tracing::warn!(error = %close, "closing transport after failed init");
                }
                Err(e)
            }
        }
    }

    fn build(&self, kind: &str, transport: &Arc<Transport>) -> Result<Components, HammerError> {
        let mut ctx = ComponentContext {
            config: Arc::clone(&self.config),
            sinks: Sinks {
                log: Arc::clone(&self.log_sink),
                error: Arc::clone(&self.error_sink),
                stat: Arc::new(|_| false),
                payload: transport.payload_sink(),
            },
            interface: transport.interface().clone(),
            gateway_mac: transport.gateway_mac(),
            run_id: self.run_id,
        };

        let stats = self.registry.stats(kind, &ctx)?;
        stats.init()?;
        let stat_target = Arc::clone(&stats);
        ctx.sinks.stat = Arc::new(move |kind| stat_target.add_stat(kind));

        let handler = self.registry.handler(kind, &ctx)?;
        handler.init()?;
        let receiver = Arc::clone(&handler);
        transport.set_receiver(Arc::new(move |msg| receiver.receive_message(msg)));

        let generator = self.registry.generator(kind, &ctx)?;
        generator.init()?;

        Ok(Components {
            transport: Arc::clone(transport),
            stats,
            handler,
            generator,
        })
    }

    /// Run until the generator finishes (stop or max lifetime), then shut
    /// everything down and deinit.
    ///
    /// # Errors
    /// `NotInitialized` before [`init`](Self::init); otherwise the first
    /// listener failure or thread panic.
    pub fn run(mut self) -> Result<(), HammerError> {
        let c = self.components.take().ok_or(HammerError::NotInitialized)?;
        let log_signal = StopSignal::new();
        let error_signal = StopSignal::new();
        tracing::info!(run_id = %self.run_id, hammer = self.config.hammer_type(), "hammer running");

        let result = thread::scope(|s| {
            let log = s.spawn(|| run_log_reader(self.log_rx.clone(), &log_signal));
            let errors = s.spawn(|| run_error_reader(self.error_rx.clone(), &error_signal));
            let stats = s.spawn(|| c.stats.run());
            let writer = s.spawn(|| c.transport.run_writer());
            let handler = s.spawn(|| c.handler.run());
            let listener = s.spawn(|| {
                let r = c.transport.run_listener();
                if let Err(e) = &r {
                    tracing::error!(error = %e, "listener failed, stopping generator");
                    c.generator.stop();
                }
                r
            });
            let generator = s.spawn(|| c.generator.run());

            let mut result = generator.join().map_err(|_| HammerError::ThreadPanic("generator"));
            tracing::info!("generator finished, shutting down");
            ordered_shutdown(&c.transport, c.handler.as_ref(), c.stats.as_ref());

            let listener_result = match listener.join() {
                Ok(r) => r.map_err(HammerError::from),
                Err(_) => Err(HammerError::ThreadPanic("listener")),
            };
            result = result.and(listener_result);
            for (name, joined) in [
                ("handler", handler.join()),
                ("writer", writer.join()),
                ("stats", stats.join()),
            ] {
                if joined.is_err() {
                    result = result.and(Err(HammerError::ThreadPanic(name)));
                }
            }

            log_signal.stop();
            error_signal.stop();
            let _ = log.join();
            let _ = errors.join();
            result
        });

        deinit(&c);
        tracing::info!(run_id = %self.run_id, "hammer stopped");
        result
    }
}

/// Listener, then handler, then writer, then stats: no frame is dispatched
/// to a stopped handler and every handler reply is flushed before the queue
/// closes.
fn ordered_shutdown(transport: &Transport, handler: &dyn Handler, stats: &dyn Stats) {
    transport.stop_listener();
    tracing::debug!("listener stopped");
    handler.stop();
    tracing::debug!("handler stopped");
    transport.stop_writer();
    tracing::debug!("writer stopped");
    stats.stop();
}

fn deinit(c: &Components) {
    let steps: [(&str, Result<(), HammerError>); 4] = [
        ("generator", c.generator.deinit()),
        ("handler", c.handler.deinit()),
        ("transport", c.transport.deinit().map_err(HammerError::from)),
        ("stats", c.stats.deinit()),
    ];
    for (component, r) in steps {
        if let Err(e) = r {
            tracing::warn!(component, error = %e, "deinit failed");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DhcpV4Options, ProtocolOptions, RunOptions, TransportOptions};
    use crate::handler::MessageQueue;
    use crate::message::Message;
    use crate::packet::dhcp::{BOOTREPLY, OPT_MESSAGE_TYPE};
    use crate::packet::{
        udp_frame, DhcpMessage, DhcpMessageType, DhcpOption, EthernetHeader, Frame, Ipv4Header,
        MacAddr, UdpHeader,
    };
    use crate::stats::StatKind;
    use crate::transport::MockLink;
    use parking_lot::Mutex;
    use std::net::Ipv4Addr;
    use std::sync::OnceLock;
    use std::time::Duration;

    fn dhcp_config(mac_count: usize, rps: u64, lifetime: Duration) -> HammerConfig {
        HammerConfig {
            protocol: ProtocolOptions::Dhcpv4(DhcpV4Options {
                mac_count,
                ..Default::default()
            }),
            transport: TransportOptions {
                interface: "veth0".to_string(),
                gateway_mac: MacAddr([0x02, 0, 0, 0, 0, 0xfe]),
                promiscuous: false,
                send_queue_depth: 0,
            },
            run: RunOptions {
                rps,
                max_lifetime: lifetime,
                stats_interval: Duration::from_secs(1),
            },
        }
    }

    fn discovers(link: &MockLink) -> usize {
        link.sent()
            .into_iter()
            .filter_map(|raw| Frame::new(raw).dhcpv4())
            .filter(|m| m.message_type() == Some(DhcpMessageType::Discover))
            .count()
    }

    #[test]
    fn test_end_to_end_lifetime() {
        let link = Arc::new(MockLink::default());
        let mut hammer = Hammer::with_link(
            dhcp_config(3, 10, Duration::from_secs(1)),
            Registry::builtin().unwrap(),
            Arc::clone(&link) as Arc<dyn PacketLink>,
        );
        hammer.init().unwrap();
        let handle = hammer.handle().unwrap();
        hammer.run().unwrap();

        let sent = discovers(&link);
        assert!((1..=11).contains(&sent), "10 rps for 1 s, got {sent}");
        assert_eq!(handle.stats().value(StatKind::DiscoverSent), Some(sent as u64));
        assert!(link.is_closed());

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(discovers(&link), sent, "nothing is sent after completion");
        assert!(matches!(
            handle.update(&serde_json::json!({"rps": 5})),
            Err(HammerError::NotRunning)
        ));
    }

    #[test]
    fn test_offer_is_answered_through_transport() {
        let link = Arc::new(MockLink::default());
        let mut offer = DhcpMessage::request(0x0bad_cafe, MacAddr([0x02, 1, 2, 3, 4, 5]));
        offer.op = BOOTREPLY;
        offer.yiaddr = Ipv4Addr::new(10, 0, 0, 50);
        offer.push_option(DhcpOption::new(OPT_MESSAGE_TYPE, [DhcpMessageType::Offer as u8]));
        let eth = EthernetHeader {
            dst: MacAddr::BROADCAST,
            src: MacAddr([0x52, 0x54, 0, 0, 0, 1]),
            ethertype: crate::packet::ETHERTYPE_IPV4,
        };
        let ip = Ipv4Header::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::BROADCAST,
            crate::packet::IPPROTO_UDP,
        );
        let udp = UdpHeader {
            src_port: 67,
            dst_port: 68,
        };
        link.push_rx(udp_frame(&eth, &ip, &udp, &offer.encode().unwrap()), false);

        let mut hammer = Hammer::with_link(
            dhcp_config(1, 5, Duration::from_millis(400)),
            Registry::builtin().unwrap(),
            Arc::clone(&link) as Arc<dyn PacketLink>,
        );
        hammer.init().unwrap();
        let handle = hammer.handle().unwrap();
        hammer.run().unwrap();

        let requests: Vec<DhcpMessage> = link
            .sent()
            .into_iter()
            .filter_map(|raw| Frame::new(raw).dhcpv4())
            .filter(|m| m.message_type() == Some(DhcpMessageType::Request))
            .collect();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].xid, 0x0bad_cafe);
        assert_eq!(handle.stats().value(StatKind::OfferReceived), Some(1));
        assert_eq!(handle.stats().value(StatKind::RequestSent), Some(1));
    }

    #[test]
    fn test_stop_from_handle() {
        let link = Arc::new(MockLink::default());
        let mut hammer = Hammer::with_link(
            dhcp_config(1, 100, Duration::ZERO),
            Registry::builtin().unwrap(),
            Arc::clone(&link) as Arc<dyn PacketLink>,
        );
        hammer.init().unwrap();
        let handle = hammer.handle().unwrap();
        let runner = std::thread::spawn(move || hammer.run());

        std::thread::sleep(Duration::from_millis(100));
        handle.update(&serde_json::json!({"rps": 200})).unwrap();
        handle.stop();
        runner.join().unwrap().unwrap();
        assert!(link.is_closed());
    }

    #[test]
    fn test_listener_failure_stops_generator() {
        let link = Arc::new(MockLink::default());
        let mut hammer = Hammer::with_link(
            dhcp_config(1, 100, Duration::ZERO),
            Registry::builtin().unwrap(),
            Arc::clone(&link) as Arc<dyn PacketLink>,
        );
        hammer.init().unwrap();
        let runner = std::thread::spawn(move || hammer.run());

        std::thread::sleep(Duration::from_millis(100));
        link.close().unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            let _ = tx.send(runner.join().unwrap());
        });
        let result = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("hammer kept running after the listener failed");
        assert!(matches!(
            result,
            Err(HammerError::Transport(crate::transport::TransportError::Closed))
        ));
    }

    #[test]
    fn test_run_before_init() {
        let hammer = Hammer::new(dhcp_config(1, 1, Duration::ZERO), Registry::new());
        assert!(matches!(hammer.run(), Err(HammerError::NotInitialized)));
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let link = Arc::new(MockLink::default());
        let mut hammer = Hammer::with_link(
            dhcp_config(0, 1, Duration::ZERO),
            Registry::builtin().unwrap(),
            Arc::clone(&link) as Arc<dyn PacketLink>,
        );
        assert!(matches!(hammer.init(), Err(HammerError::Config(_))));
        assert!(hammer.handle().is_none());
    }

    #[test]
    fn test_unknown_kind_closes_link() {
        let link = Arc::new(MockLink::default());
        let mut hammer = Hammer::with_link(
            dhcp_config(1, 1, Duration::ZERO),
            Registry::new(),
            Arc::clone(&link) as Arc<dyn PacketLink>,
        );
        assert!(matches!(hammer.init(), Err(HammerError::UnknownHammerType(_))));
        assert!(link.is_closed());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shutdown ordering
    // ─────────────────────────────────────────────────────────────────────────

    type Events = Arc<Mutex<Vec<String>>>;

    /// Records the transport state at the moment it is stopped.
    struct RecordingHandler {
        events: Events,
        transport: OnceLock<Arc<Transport>>,
        queue: MessageQueue,
    }

    impl Handler for RecordingHandler {
        fn receive_message(&self, msg: Message) -> bool {
            self.queue.push(msg)
        }

        fn run(&self) {
            self.queue.run(|_| {});
        }

        fn stop(&self) {
            let t = self.transport.get().expect("transport set by test");
            self.events.lock().push(format!(
                "handler.stop listening={} accepting={}",
                t.is_listening(),
                t.is_accepting()
            ));
            self.queue.close();
        }
    }

    struct RecordingStats {
        events: Events,
        transport: Arc<OnceLock<Arc<Transport>>>,
        signal: StopSignal,
    }

    impl Stats for RecordingStats {
        fn add_stat(&self, _kind: StatKind) -> bool {
            true
        }

        fn run(&self) {
            let Some(_done) = self.signal.start() else {
                return;
            };
            let _ = self.signal.finish_receiver().recv();
        }

        fn stop(&self) {
            let t = self.transport.get().expect("transport set by test");
            self.events
                .lock()
                .push(format!("stats.stop accepting={}", t.is_accepting()));
            self.signal.stop();
        }

        fn snapshot(&self) -> StatsSnapshot {
            StatsSnapshot {
                run_id: Uuid::nil(),
                hammer_type: crate::DHCPV4.to_string(),
                timestamp: chrono::Utc::now(),
                stats: Vec::new(),
            }
        }
    }

    #[test]
    fn test_shutdown_order() {
        let events: Events = Arc::default();
        let handler = Arc::new(RecordingHandler {
            events: Arc::clone(&events),
            transport: OnceLock::new(),
            queue: MessageQueue::default(),
        });
        let stats_transport: Arc<OnceLock<Arc<Transport>>> = Arc::default();

        let mut registry = Registry::new();
        let h = Arc::clone(&handler);
        registry
            .register_handler(crate::DHCPV4, Box::new(move |_| Ok(Arc::clone(&h) as Arc<dyn Handler>)))
            .unwrap();
        let (ev, st) = (Arc::clone(&events), Arc::clone(&stats_transport));
        registry
            .register_stats(
                crate::DHCPV4,
                Box::new(move |_| {
                    Ok(Arc::new(RecordingStats {
                        events: Arc::clone(&ev),
                        transport: Arc::clone(&st),
                        signal: StopSignal::new(),
                    }) as Arc<dyn Stats>)
                }),
            )
            .unwrap();
        let builtin = Registry::builtin().unwrap();
        registry
            .register_generator(
                crate::DHCPV4,
                Box::new(move |ctx| builtin.generator(crate::DHCPV4, ctx)),
            )
            .unwrap();

        let link = Arc::new(MockLink::default());
        let mut hammer = Hammer::with_link(
            dhcp_config(1, 20, Duration::from_millis(150)),
            registry,
            Arc::clone(&link) as Arc<dyn PacketLink>,
        );
        hammer.init().unwrap();
        let transport = Arc::clone(hammer.transport().unwrap());
        let _ = handler.transport.set(Arc::clone(&transport));
        let _ = stats_transport.set(transport);
        hammer.run().unwrap();

        assert_eq!(
            *events.lock(),
            vec![
                "handler.stop listening=false accepting=true".to_string(),
                "stats.stop accepting=false".to_string(),
            ]
        );
    }
}
