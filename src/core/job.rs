use std::fmt;
use std::time::Duration;

use crate::speed::Speed;
use crate::strategy::StrategyKind;

/// Identifies a scheduling request in logs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// How much time a job may spend before it suspends.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Budget {
    /// Suspend once the current turn has run for this long.
    Timed(Duration),
    /// Don't check the time between elements, only yield once per window.
    Continuous { window: Duration },
}

impl Budget {
    pub fn for_speed(speed: Speed) -> Self {
        if speed.is_continuous() {
            Budget::Continuous { window: speed.budget() }
        } else {
            Budget::Timed(speed.budget())
        }
    }

    pub fn duration(&self) -> Duration {
        match *self {
            Budget::Timed(budget) => budget,
            Budget::Continuous { window } => window,
        }
    }
}

/// The configuration of one scheduling request.
///
/// The input and the callback are owned by the job's strategy. The descriptor
/// carries what the scheduler loop needs to slice the work.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct JobDescriptor {
    pub id: JobId,
    pub kind: StrategyKind,
    pub speed: Speed,
    pub budget: Budget,
}

#[test]
fn budget_for_speed() {
    assert_eq!(Budget::for_speed(Speed::Doze), Budget::Timed(Duration::ZERO));
    assert_eq!(Budget::for_speed(Speed::Fast), Budget::Timed(Duration::from_millis(36)));
    assert_eq!(
        Budget::for_speed(Speed::Ninja),
        Budget::Continuous { window: Duration::from_millis(100) },
    );
    assert_eq!(Budget::for_speed(Speed::Ninja).duration(), crate::speed::NINJA_WINDOW);
    assert_eq!(JobId(7).to_string(), "job#7");
}
