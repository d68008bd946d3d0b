use super::{Alert, AlertStrategy};
use crate::vitals::{Measurement, PatientId, VitalKind};

/// Binds one detector and dispatches windows to it.
///
/// A context always holds a strategy: one must be supplied to [`new`](Self::new)
/// and [`set_strategy`](Self::set_strategy) only ever replaces it.
#[derive(Debug)]
pub struct AlertContext {
    strategy: Box<dyn AlertStrategy>,
}

impl AlertContext {
    pub fn new(strategy: impl AlertStrategy + 'static) -> Self {
        AlertContext {
            strategy: Box::new(strategy),
        }
    }

    pub fn set_strategy(&mut self, strategy: impl AlertStrategy + 'static) {
        self.strategy = Box::new(strategy);
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// The vital kind the bound strategy consumes.
    pub fn kind(&self) -> VitalKind {
        self.strategy.kind()
    }

    pub fn run(&self, patient_id: PatientId, window: &[Measurement]) -> Option<Alert> {
        self.strategy.evaluate(patient_id, window)
    }
}
