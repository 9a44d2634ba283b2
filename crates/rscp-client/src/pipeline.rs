use device_models::{DeviceModel, RscpModel};
use rscp_codec::RscpValue;
use tracing::debug;

/// Ordered handler registry. Outbound requests are collected in registration
/// order; inbound values go to the first handler that claims them.
#[derive(Debug, Clone)]
pub struct HandlerPipeline<H = DeviceModel> {
    handlers: Vec<H>,
}

impl<H> Default for HandlerPipeline<H> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

impl<H: RscpModel> HandlerPipeline<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler`. Duplicates are not detected.
    pub fn add_handler(&mut self, handler: H) {
        self.handlers.push(handler);
    }

    pub fn handlers(&self) -> &[H] {
        &self.handlers
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Keeps only the handlers for which `keep` returns true.
    pub fn retain<F>(&mut self, keep: F)
    where
        F: FnMut(&H) -> bool,
    {
        self.handlers.retain(keep);
    }

    pub fn collect_tags(&self) -> Vec<RscpValue> {
        self.handlers.iter().flat_map(RscpModel::rscp_tags).collect()
    }

    pub fn collect_slow_tags(&self) -> Vec<RscpValue> {
        self.handlers
            .iter()
            .flat_map(RscpModel::rscp_tags_slow)
            .collect()
    }

    /// Dispatches every value; returns how many were claimed.
    pub fn process(&mut self, values: &[RscpValue]) -> usize {
        values
            .iter()
            .filter(|value| self.process_one(value))
            .count()
    }

    /// Offers `value` to the handlers in order and stops at the first one that claims it.
    pub fn process_one(&mut self, value: &RscpValue) -> bool {
        let claimed = self
            .handlers
            .iter_mut()
            .any(|handler| handler.handle_rscp_data(value));
        if !claimed {
            debug!(tag = %value.tag, value = %value, "unhandled rscp value");
            metrics::counter!("rscp_unhandled_values_total").increment(1);
        }
        claimed
    }
}
