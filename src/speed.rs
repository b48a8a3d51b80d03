//! Named responsiveness levels and their time budgets.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long `Ninja` may run before it yields to the host anyway.
pub const NINJA_WINDOW: Duration = Duration::from_millis(100);

/// A responsiveness level, from the most to the least cooperative.
///
/// Each level maps to the amount of time a job may keep the host busy before it
/// suspends. `Ninja` doesn't check the time between elements and only yields once
/// per `NINJA_WINDOW`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speed {
    Doze,
    Slow,
    #[default]
    Normal,
    Fast,
    Rapid,
    Ninja,
}

impl Speed {
    pub const ALL: [Speed; 6] = [
        Speed::Doze,
        Speed::Slow,
        Speed::Normal,
        Speed::Fast,
        Speed::Rapid,
        Speed::Ninja,
    ];

    #[inline]
    pub const fn budget_ms(self) -> u64 {
        match self {
            Speed::Doze => 0,
            Speed::Slow => 6,
            Speed::Normal => 12,
            Speed::Fast => 36,
            Speed::Rapid => 60,
            Speed::Ninja => 100,
        }
    }

    #[inline]
    pub const fn budget(self) -> Duration {
        Duration::from_millis(self.budget_ms())
    }

    /// Whether this level skips the per-element time check.
    #[inline]
    pub fn is_continuous(self) -> bool {
        self == Speed::Ninja
    }

    pub fn name(self) -> &'static str {
        match self {
            Speed::Doze => "doze",
            Speed::Slow => "slow",
            Speed::Normal => "normal",
            Speed::Fast => "fast",
            Speed::Rapid => "rapid",
            Speed::Ninja => "ninja",
        }
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownSpeed(pub String);

impl fmt::Display for UnknownSpeed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown speed {:?}", self.0)
    }
}

impl std::error::Error for UnknownSpeed {}

impl FromStr for Speed {
    type Err = UnknownSpeed;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Speed::ALL
            .into_iter()
            .find(|speed| speed.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownSpeed(s.to_string()))
    }
}

#[test]
fn budget_table() {
    let budgets: Vec<u64> = Speed::ALL.iter().map(|s| s.budget_ms()).collect();
    assert_eq!(budgets, vec![0, 6, 12, 36, 60, 100]);

    for pair in Speed::ALL.windows(2) {
        assert!(pair[0].budget() <= pair[1].budget());
        assert!(pair[0] < pair[1]);
    }

    assert_eq!(Speed::default(), Speed::Normal);
    assert!(Speed::Ninja.is_continuous());
    assert!(!Speed::Rapid.is_continuous());
}

#[test]
fn parse_speed() {
    assert_eq!("fast".parse::<Speed>(), Ok(Speed::Fast));
    assert_eq!(" Ninja ".parse::<Speed>(), Ok(Speed::Ninja));
    assert_eq!("DOZE".parse::<Speed>(), Ok(Speed::Doze));
    assert!("warp".parse::<Speed>().is_err());

    for speed in Speed::ALL {
        assert_eq!(speed.to_string().parse::<Speed>(), Ok(speed));
    }
}
