//! Dependencies shared by every tribe service.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::notify::Notifier;

/// Borrowed time source, configuration and push transport.
#[derive(Clone, Copy)]
pub struct ServiceContext<'a> {
    pub clock: &'a dyn Clock,
    pub config: &'a EngineConfig,
    pub notifier: &'a dyn Notifier,
}

impl<'a> ServiceContext<'a> {
    pub fn new(clock: &'a dyn Clock, config: &'a EngineConfig, notifier: &'a dyn Notifier) -> Self {
        Self {
            clock,
            config,
            notifier,
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}
