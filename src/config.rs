//! Loosely typed job options.
//!
//! `Options` is what a host gets when the speed of a job comes from user settings or
//! a configuration file. Resolution is permissive by default: anything that doesn't
//! make sense is logged and replaced with the default. In strict mode the same
//! anomalies are reported as `Error::Configuration`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::job::Budget;
use crate::error::Error;
use crate::speed::Speed;
use crate::strategy::{Span, StrategyKind};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// One of `doze`, `slow`, `normal`, `fast`, `rapid` or `ninja`.
    pub speed: Option<String>,
    /// Time budget in milliseconds. Overrides the speed's budget.
    pub interval: Option<f64>,
    /// One of `indexed`, `keyed`, `counted` or `unbounded`.
    pub kind: Option<String>,
    /// Reject anomalies instead of falling back to defaults.
    pub strict: bool,
}

/// The outcome of resolving `Options`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Resolved {
    pub speed: Speed,
    pub budget: Budget,
    pub kind: Option<StrategyKind>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_speed(mut self, speed: impl Into<String>) -> Self {
        self.speed = Some(speed.into());
        self
    }

    pub fn with_interval(mut self, ms: f64) -> Self {
        self.interval = Some(ms);
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn resolve(&self) -> Result<Resolved, Error> {
        self.resolve_with(self.strict)
    }

    pub(crate) fn resolve_with(&self, strict: bool) -> Result<Resolved, Error> {
        let speed = match self.speed.as_deref() {
            None => Speed::default(),
            Some(name) => match name.parse::<Speed>() {
                Ok(speed) => speed,
                Err(err) => {
                    anomaly(strict, err.to_string())?;
                    Speed::default()
                }
            },
        };

        let budget = match self.interval {
            None => Budget::for_speed(speed),
            Some(ms) => match interval_from_ms(ms) {
                Some(interval) => Budget::Timed(interval),
                None => {
                    anomaly(strict, format!("interval must be a finite, non-negative number of milliseconds, got {}", ms))?;
                    Budget::for_speed(speed)
                }
            },
        };

        let kind = match self.kind.as_deref() {
            None => None,
            Some(name) => match StrategyKind::from_name(name) {
                Some(kind) => Some(kind),
                None => {
                    anomaly(strict, format!("unknown loop kind {:?}", name))?;
                    None
                }
            },
        };

        Ok(Resolved { speed, budget, kind })
    }
}

fn interval_from_ms(ms: f64) -> Option<Duration> {
    if !ms.is_finite() || ms < 0.0 {
        return None;
    }

    Duration::try_from_secs_f64(ms / 1000.0).ok()
}

/// Report a configuration anomaly, or log it and carry on with defaults.
pub(crate) fn anomaly(strict: bool, message: String) -> Result<(), Error> {
    if strict {
        return Err(Error::Configuration(message));
    }

    log::warn!("{}, falling back to the default", message);
    Ok(())
}

/// Counted loops need a positive step to make progress.
pub(crate) fn normalize_span(span: Span, strict: bool) -> Result<Span, Error> {
    if span.step > 0 {
        return Ok(span);
    }

    anomaly(strict, format!("loop step must be positive, got {}", span.step))?;
    Ok(Span { step: 1, ..span })
}

#[cfg(test)]
fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn defaults() {
    let resolved = Options::new().resolve().unwrap();
    assert_eq!(resolved, Resolved {
        speed: Speed::Normal,
        budget: Budget::Timed(Duration::from_millis(12)),
        kind: None,
    });
}

#[test]
fn interval_overrides_speed() {
    let resolved = Options::new().with_speed("ninja").with_interval(20.0).resolve().unwrap();
    assert_eq!(resolved.speed, Speed::Ninja);
    assert_eq!(resolved.budget, Budget::Timed(Duration::from_millis(20)));

    let resolved = Options::new().with_speed("rapid").with_interval(0.0).resolve().unwrap();
    assert_eq!(resolved.budget, Budget::Timed(Duration::ZERO));

    let resolved = Options::new().with_speed("ninja").resolve().unwrap();
    assert_eq!(resolved.budget, Budget::Continuous { window: Duration::from_millis(100) });
}

#[test]
fn permissive_fallbacks() {
    init_logger();

    let resolved = Options::new().with_speed("warp").with_interval(f64::NAN).with_kind("sideways").resolve().unwrap();
    assert_eq!(resolved, Resolved {
        speed: Speed::Normal,
        budget: Budget::Timed(Duration::from_millis(12)),
        kind: None,
    });

    // A bad interval falls back to the requested speed, not to Normal.
    let resolved = Options::new().with_speed("fast").with_interval(-3.0).resolve().unwrap();
    assert_eq!(resolved.budget, Budget::Timed(Duration::from_millis(36)));

    let resolved = Options::new().with_interval(f64::MAX).resolve().unwrap();
    assert_eq!(resolved.budget, Budget::Timed(Duration::from_millis(12)));
}

#[test]
fn strict_mode() {
    let err = Options::new().with_speed("warp").strict(true).resolve().unwrap_err();
    assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("warp")));

    assert!(Options::new().with_interval(f64::INFINITY).strict(true).resolve().is_err());
    assert!(Options::new().with_kind("sideways").strict(true).resolve().is_err());

    let resolved = Options::new().with_speed("Slow").with_kind("keyed").strict(true).resolve().unwrap();
    assert_eq!(resolved.speed, Speed::Slow);
    assert_eq!(resolved.kind, Some(StrategyKind::Keyed));
}

#[test]
fn load_from_json() {
    let options: Options = serde_json::from_str(r#"{ "speed": "rapid", "interval": 5 }"#).unwrap();
    assert_eq!(options, Options::new().with_speed("rapid").with_interval(5.0));
    assert_eq!(options.resolve().unwrap().budget, Budget::Timed(Duration::from_millis(5)));

    let options: Options = serde_json::from_str("{}").unwrap();
    assert_eq!(options, Options::default());
}

#[test]
fn spans() {
    init_logger();

    assert_eq!(normalize_span(Span::new(0, 5, 2), true).unwrap(), Span::new(0, 5, 2));
    assert_eq!(normalize_span(Span::new(0, 5, 0), false).unwrap(), Span::new(0, 5, 1));
    assert!(normalize_span(Span::new(5, 0, -1), true).is_err());
}
