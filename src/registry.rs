//! Hammer-type registry: maps a kind tag to the factories that build its
//! generator, handler, stats table and kernel filter.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::{DhcpV4Options, HammerConfig, ProtocolOptions, TcpConnOptions};
use crate::error::HammerError;
use crate::generator::{DhcpV4Generator, Generator, TcpConnGenerator};
use crate::handler::{DhcpV4Handler, Handler, TcpConnHandler};
use crate::packet::MacAddr;
use crate::sink::Sinks;
use crate::stats::{CounterStats, Stats, DHCPV4_STATS, TCPCONN_STATS};
use crate::transport::filter::{DHCPV4_FILTER, TCP_FILTER};
use crate::transport::{BpfInstruction, InterfaceInfo};

/// Everything a factory may need to build one component.
#[derive(Clone)]
pub struct ComponentContext {
    pub config: Arc<HammerConfig>,
    pub sinks: Sinks,
    pub interface: InterfaceInfo,
    pub gateway_mac: MacAddr,
    pub run_id: Uuid,
}

impl ComponentContext {
    fn dhcpv4(&self) -> Result<&DhcpV4Options, HammerError> {
        match &self.config.protocol {
            ProtocolOptions::Dhcpv4(o) => Ok(o),
            _ => Err(HammerError::ConfigMismatch {
                kind: crate::DHCPV4,
                actual: self.config.hammer_type().to_string(),
            }),
        }
    }

    fn tcpconn(&self) -> Result<&TcpConnOptions, HammerError> {
        match &self.config.protocol {
            ProtocolOptions::TcpConn(o) => Ok(o),
            _ => Err(HammerError::ConfigMismatch {
                kind: crate::TCPCONN,
                actual: self.config.hammer_type().to_string(),
            }),
        }
    }
}

pub type GeneratorFactory =
    Box<dyn Fn(&ComponentContext) -> Result<Arc<dyn Generator>, HammerError> + Send + Sync>;
pub type HandlerFactory =
    Box<dyn Fn(&ComponentContext) -> Result<Arc<dyn Handler>, HammerError> + Send + Sync>;
pub type StatsFactory =
    Box<dyn Fn(&ComponentContext) -> Result<Arc<dyn Stats>, HammerError> + Send + Sync>;

#[derive(Default)]
pub struct Registry {
    generators: HashMap<String, GeneratorFactory>,
    handlers: HashMap<String, HandlerFactory>,
    stats: HashMap<String, StatsFactory>,
    filters: HashMap<String, &'static [BpfInstruction]>,
}

fn insert_once<V>(
    map: &mut HashMap<String, V>,
    component: &'static str,
    kind: &str,
    value: V,
) -> Result<(), HammerError> {
    if map.contains_key(kind) {
        return Err(HammerError::DuplicateRegistration {
            component,
            kind: kind.to_string(),
        });
    }
    map.insert(kind.to_string(), value);
    Ok(())
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `dhcpv4` and `tcpconn` hammers.
    pub fn builtin() -> Result<Self, HammerError> {
        let mut r = Self::new();

        r.register_generator(
            crate::DHCPV4,
            Box::new(|ctx| {
                Ok(Arc::new(DhcpV4Generator::new(
                    ctx.dhcpv4()?.clone(),
                    &ctx.config.run,
                    ctx.interface.mac,
                    ctx.gateway_mac,
                    ctx.sinks.clone(),
                )) as Arc<dyn Generator>)
            }),
        )?;
        r.register_handler(
            crate::DHCPV4,
            Box::new(|ctx| {
                Ok(Arc::new(DhcpV4Handler::new(
                    ctx.dhcpv4()?.clone(),
                    ctx.interface.mac,
                    ctx.gateway_mac,
                    ctx.sinks.clone(),
                )) as Arc<dyn Handler>)
            }),
        )?;
        r.register_stats(
            crate::DHCPV4,
            Box::new(|ctx| {
                Ok(Arc::new(CounterStats::new(
                    crate::DHCPV4,
                    DHCPV4_STATS,
                    ctx.config.run.stats_interval,
                    ctx.run_id,
                )) as Arc<dyn Stats>)
            }),
        )?;
        r.register_filter(crate::DHCPV4, DHCPV4_FILTER)?;

        r.register_generator(
            crate::TCPCONN,
            Box::new(|ctx| {
                Ok(Arc::new(TcpConnGenerator::new(
                    ctx.tcpconn()?.clone(),
                    &ctx.config.run,
                    ctx.interface.mac,
                    ctx.gateway_mac,
                    ctx.sinks.clone(),
                )) as Arc<dyn Generator>)
            }),
        )?;
        r.register_handler(
            crate::TCPCONN,
            Box::new(|ctx| {
                Ok(Arc::new(TcpConnHandler::new(
                    ctx.tcpconn()?.clone(),
                    ctx.interface.mac,
                    ctx.sinks.clone(),
                )) as Arc<dyn Handler>)
            }),
        )?;
        r.register_stats(
            crate::TCPCONN,
            Box::new(|ctx| {
                Ok(Arc::new(CounterStats::new(
                    crate::TCPCONN,
                    TCPCONN_STATS,
                    ctx.config.run.stats_interval,
                    ctx.run_id,
                )) as Arc<dyn Stats>)
            }),
        )?;
        r.register_filter(crate::TCPCONN, TCP_FILTER)?;

        Ok(r)
    }

    pub fn register_generator(
        &mut self,
        kind: &str,
        factory: GeneratorFactory,
    ) -> Result<(), HammerError> {
        insert_once(&mut self.generators, "generator", kind, factory)
    }

    pub fn register_handler(
        &mut self,
        kind: &str,
        factory: HandlerFactory,
    ) -> Result<(), HammerError> {
        insert_once(&mut self.handlers, "handler", kind, factory)
    }

    pub fn register_stats(&mut self, kind: &str, factory: StatsFactory) -> Result<(), HammerError> {
        insert_once(&mut self.stats, "stats", kind, factory)
    }

    pub fn register_filter(
        &mut self,
        kind: &str,
        program: &'static [BpfInstruction],
    ) -> Result<(), HammerError> {
        insert_once(&mut self.filters, "filter", kind, program)
    }

    pub fn generator(&self, kind: &str, ctx: &ComponentContext) -> Result<Arc<dyn Generator>, HammerError> {
        let factory = self
            .generators
            .get(kind)
            .ok_or_else(|| HammerError::UnknownHammerType(kind.to_string()))?;
        factory(ctx)
    }

    pub fn handler(&self, kind: &str, ctx: &ComponentContext) -> Result<Arc<dyn Handler>, HammerError> {
        let factory = self
            .handlers
            .get(kind)
            .ok_or_else(|| HammerError::UnknownHammerType(kind.to_string()))?;
        factory(ctx)
    }

    pub fn stats(&self, kind: &str, ctx: &ComponentContext) -> Result<Arc<dyn Stats>, HammerError> {
        let factory = self
            .stats
            .get(kind)
            .ok_or_else(|| HammerError::UnknownHammerType(kind.to_string()))?;
        factory(ctx)
    }

    /// Kernel filter for `kind`; `None` means the socket sees everything.
    pub fn filter(&self, kind: &str) -> Option<&'static [BpfInstruction]> {
        self.filters.get(kind).copied()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.generators.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RunOptions, TransportOptions};
    use crate::sink::testing::Recorded;

    fn context(protocol: ProtocolOptions) -> ComponentContext {
        ComponentContext {
            config: Arc::new(HammerConfig {
                protocol,
                transport: TransportOptions {
                    interface: "mock0".to_string(),
                    gateway_mac: MacAddr::BROADCAST,
                    promiscuous: false,
                    send_queue_depth: 0,
                },
                run: RunOptions::default(),
            }),
            sinks: Recorded::default().sinks(),
            interface: InterfaceInfo {
                name: "mock0".to_string(),
                index: 1,
                mac: MacAddr([0x02, 0, 0, 0, 0, 1]),
            },
            gateway_mac: MacAddr::BROADCAST,
            run_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_builtin_kinds() {
        let r = Registry::builtin().unwrap();
        assert_eq!(r.kinds(), vec!["dhcpv4", "tcpconn"]);
        assert!(r.filter(crate::DHCPV4).is_some());
        assert!(r.filter("nope").is_none());
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        let mut r = Registry::builtin().unwrap();
        let err = r
            .register_filter(crate::DHCPV4, DHCPV4_FILTER)
            .unwrap_err();
        assert!(matches!(
            err,
            HammerError::DuplicateRegistration { component: "filter", .. }
        ));
    }

    #[test]
    fn test_unknown_kind() {
        let r = Registry::builtin().unwrap();
        let ctx = context(ProtocolOptions::Dhcpv4(Default::default()));
        assert!(matches!(
            r.generator("icmp", &ctx),
            Err(HammerError::UnknownHammerType(k)) if k == "icmp"
        ));
    }

    #[test]
    fn test_factories_check_config_kind() {
        let r = Registry::builtin().unwrap();
        let ctx = context(ProtocolOptions::Dhcpv4(Default::default()));
        assert!(r.generator(crate::DHCPV4, &ctx).is_ok());
        assert!(r.handler(crate::DHCPV4, &ctx).is_ok());
        assert!(r.stats(crate::DHCPV4, &ctx).is_ok());
        assert!(matches!(
            r.handler(crate::TCPCONN, &ctx),
            Err(HammerError::ConfigMismatch { kind: "tcpconn", .. })
        ));
    }
}
