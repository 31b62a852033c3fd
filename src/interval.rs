use crate::error::{EResult, Error};
use log::warn;
use serde::{Deserialize, Deserializer};
use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// Fixed-cadence loop driver, sleeps until the next deadline
pub struct Loop {
    next_iter: Instant,
    interval: Duration,
    name: &'static str,
}

#[negative_impl::negative_impl]
impl !Send for Loop {}

impl Loop {
    pub fn prepare(name: &'static str, interval: Duration) -> Self {
        Loop {
            next_iter: Instant::now() + interval,
            interval,
            name,
        }
    }

    /// Returns false if the iteration overran the interval
    pub fn tick(&mut self) -> bool {
        let t = Instant::now();
        let result = match t.cmp(&self.next_iter) {
            Ordering::Greater => false,
            Ordering::Equal => true,
            Ordering::Less => {
                std::thread::sleep(self.next_iter - t);
                true
            }
        };
        if result {
            self.next_iter += self.interval;
        } else {
            warn!(
                "{} loop timeout ({:?} + {:?})",
                self.name,
                self.interval,
                t.duration_since(self.next_iter)
            );
            self.next_iter = Instant::now() + self.interval;
        }
        result
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

pub fn parse_interval(s: &str) -> EResult<Duration> {
    let s = s.trim();
    let nanos = if let Some(v) = s.strip_suffix("ms") {
        v.trim().parse::<u64>()? * 1_000_000
    } else if let Some(v) = s.strip_suffix("us") {
        v.trim().parse::<u64>()? * 1_000
    } else if let Some(v) = s.strip_suffix("ns") {
        v.trim().parse::<u64>()?
    } else if let Some(v) = s.strip_suffix('s') {
        v.trim().parse::<u64>()? * 1_000_000_000
    } else {
        s.parse::<u64>()? * 1_000_000_000
    };
    Ok(Duration::from_nanos(nanos))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntervalValue {
    Str(String),
    Secs(u64),
}

#[inline]
pub(crate) fn deserialize_interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match IntervalValue::deserialize(deserializer)? {
        IntervalValue::Str(s) => parse_interval(&s).map_err(serde::de::Error::custom),
        IntervalValue::Secs(v) => Ok(Duration::from_secs(v)),
    }
}

impl std::str::FromStr for crate::Interval {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_interval(s).map(crate::Interval)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_interval("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_interval("250us").unwrap(), Duration::from_micros(250));
        assert_eq!(parse_interval("10ns").unwrap(), Duration::from_nanos(10));
        assert_eq!(parse_interval("2").unwrap(), Duration::from_secs(2));
        assert!(parse_interval("fast").is_err());
        assert!(parse_interval("-1s").is_err());
    }

    #[test]
    fn test_loop_keeps_cadence() {
        let mut int = Loop::prepare("test", Duration::from_millis(20));
        let start = Instant::now();
        for _ in 0..3 {
            assert!(int.tick());
        }
        assert!(start.elapsed() >= Duration::from_millis(55));
    }

    #[test]
    fn test_loop_overrun() {
        let mut int = Loop::prepare("test", Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!int.tick());
        assert!(int.tick());
    }
}
