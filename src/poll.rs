use crate::dispatch::Dispatcher;
use crate::edge::{EdgeDetector, TriggerEvent};
use crate::error::{Error, ErrorKind};
use crate::interval::Loop;
use crate::io::TriggerSource;
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Collapses a streak of identical read failures into one error line
#[derive(Default)]
struct FailureStreak {
    count: u64,
    kind: Option<ErrorKind>,
}

impl FailureStreak {
    fn failed(&mut self, source: &str, e: &Error) {
        self.count += 1;
        if self.kind == Some(e.kind()) {
            debug!("{} read failed again ({} cycles): {}", source, self.count, e);
        } else {
            error!("{} read failed ({}): {}", source, e.kind(), e);
            self.kind = Some(e.kind());
        }
    }
    fn succeeded(&mut self, source: &str) {
        if self.count > 0 {
            info!("{} read restored after {} failed cycles", source, self.count);
            self.count = 0;
            self.kind = None;
        }
    }
}

/// Trigger loop: read a snapshot, detect edges, hand events to the dispatcher
pub struct PollLoop {
    source: Box<dyn TriggerSource>,
    detector: EdgeDetector,
    interval: Duration,
    failures: FailureStreak,
}

impl PollLoop {
    pub fn new(source: Box<dyn TriggerSource>, cooldown: Duration, interval: Duration) -> Self {
        let detector = EdgeDetector::new(source.inputs(), cooldown);
        Self {
            source,
            detector,
            interval,
            failures: <_>::default(),
        }
    }
    #[inline]
    pub fn detector(&self) -> &EdgeDetector {
        &self.detector
    }
    /// One poll cycle
    ///
    /// A failed read yields no events and leaves every input state as it
    /// was, it is not taken as an all-low snapshot.
    pub fn cycle(&mut self, now: Instant) -> Vec<TriggerEvent> {
        let kind = self.source.kind().to_string();
        let levels = match self.source.read() {
            Ok(v) => v,
            Err(e) => {
                self.failures.failed(&kind, &e);
                return Vec::new();
            }
        };
        self.failures.succeeded(&kind);
        match self.detector.feed(&levels, now) {
            Ok(events) => events,
            Err(e) => {
                self.failures.failed(&kind, &e);
                Vec::new()
            }
        }
    }
    /// Runs until `stop` is set or the source asks to quit, then releases
    /// the source
    pub fn run(&mut self, dispatcher: &Dispatcher, stop: &AtomicBool) {
        let inputs: Vec<String> = self
            .detector
            .inputs()
            .iter()
            .map(|i| format!("{}={}", i.address, i.name))
            .collect();
        info!(
            "{} loop started, interval {:?}, cooldown {:?}, inputs: {}",
            self.source.kind(),
            self.interval,
            self.detector.cooldown(),
            inputs.join(", ")
        );
        let mut int = Loop::prepare("poll", self.interval);
        while !stop.load(Ordering::SeqCst) {
            for event in self.cycle(Instant::now()) {
                dispatcher.dispatch(&event);
            }
            if self.source.quit_requested() {
                info!("quit requested by the {} source", self.source.kind());
                break;
            }
            int.tick();
        }
        info!("{} loop stopped", self.source.kind());
        self.source.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dispatch::test::{actions, Journal, Recorder};
    use crate::edge::Phase;
    use crate::error::EResult;
    use crate::io::{Input, Kind};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct Scripted {
        inputs: Vec<Input>,
        reads: VecDeque<EResult<Vec<bool>>>,
        closed: Arc<Mutex<bool>>,
        quit_after: Option<usize>,
        served: usize,
    }

    impl TriggerSource for Scripted {
        fn kind(&self) -> Kind {
            Kind::Modbus
        }
        fn inputs(&self) -> &[Input] {
            &self.inputs
        }
        fn read(&mut self) -> EResult<Vec<bool>> {
            self.served += 1;
            self.reads
                .pop_front()
                .unwrap_or_else(|| Ok(vec![false; self.inputs.len()]))
        }
        fn quit_requested(&self) -> bool {
            self.quit_after.map_or(false, |n| self.served >= n)
        }
        fn close(&mut self) {
            *self.closed.lock() = true;
        }
    }

    fn scripted(reads: Vec<EResult<Vec<bool>>>) -> (Box<dyn TriggerSource>, Arc<Mutex<bool>>) {
        let closed = Arc::new(Mutex::new(false));
        let inputs = ["Process_step_1", "Guide_steps", "Warning", "Process_step_2", "Stop"]
            .iter()
            .enumerate()
            .map(|(i, n)| Input::new(n, u16::try_from(i).unwrap()))
            .collect();
        (
            Box::new(Scripted {
                inputs,
                reads: reads.into(),
                closed: closed.clone(),
                quit_after: None,
                served: 0,
            }),
            closed,
        )
    }

    const LOW: [bool; 5] = [false; 5];

    #[test]
    fn test_read_failure_keeps_state() {
        let (source, _) = scripted(vec![
            Ok(LOW.to_vec()),
            Ok(vec![true, false, false, false, false]),
            Err(Error::connection("connection reset by peer")),
            Err(Error::protocol("unit id mismatch")),
            Ok(vec![true, false, false, false, false]),
            Ok(LOW.to_vec()),
            Ok(vec![true, false, false, false, false]),
        ]);
        let mut poll = PollLoop::new(source, Duration::from_secs(5), Duration::from_millis(100));
        let t0 = Instant::now();
        let at = |ms: u64| t0 + Duration::from_millis(ms);
        assert!(poll.cycle(at(0)).is_empty());
        assert_eq!(poll.cycle(at(100)).len(), 1);
        assert!(poll.cycle(at(200)).is_empty());
        assert!(poll.cycle(at(300)).is_empty());
        let state = poll.detector().state(0).unwrap();
        assert_eq!(state.phase(), Phase::ArmedHigh);
        assert_eq!(state.last_trigger(), Some(at(100)));
        // no spurious edge after reconnect: the coil is still high
        assert!(poll.cycle(at(400)).is_empty());
        assert!(poll.cycle(at(6_000)).is_empty());
        assert_eq!(poll.cycle(at(6_100)).len(), 1);
    }

    #[test]
    fn test_failure_on_first_cycle() {
        let (source, _) = scripted(vec![
            Err(Error::connection("refused")),
            Ok(vec![true, false, false, false, false]),
        ]);
        let mut poll = PollLoop::new(source, Duration::from_secs(5), Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(poll.cycle(t0).is_empty());
        assert_eq!(poll.detector().state(0).unwrap().phase(), Phase::Unknown);
        // the first successful read only primes
        assert!(poll.cycle(t0).is_empty());
    }

    #[test]
    fn test_multi_edge_order() {
        let (source, _) = scripted(vec![
            Ok(LOW.to_vec()),
            Ok(vec![false, false, true, true, false]),
        ]);
        let mut poll = PollLoop::new(source, Duration::from_secs(5), Duration::from_millis(100));
        let t0 = Instant::now();
        poll.cycle(t0);
        let names: Vec<String> = poll.cycle(t0).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Warning", "Process_step_2"]);
    }

    #[test]
    fn test_run_until_stopped() {
        let (source, closed) = scripted(vec![
            Ok(LOW.to_vec()),
            Ok(vec![false, false, false, true, false]),
            Ok(vec![false, false, false, true, false]),
            Ok(vec![true, false, false, false, false]),
        ]);
        let journal = Journal::default();
        let dispatcher =
            Dispatcher::start(actions(), Box::new(Recorder::new(&journal))).unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_c = stop.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            stop_c.store(true, Ordering::SeqCst);
        });
        let mut poll = PollLoop::new(source, Duration::from_secs(5), Duration::from_millis(10));
        poll.run(&dispatcher, &stop);
        stopper.join().unwrap();
        assert!(*closed.lock());
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        dispatcher.shutdown().unwrap();
        // Process_step_2 has no action in the table and is dropped
        assert_eq!(journal.entries(), vec!["play Process_step_1.mp4", "stop"]);
    }

    #[test]
    fn test_quit_from_source() {
        let closed = Arc::new(Mutex::new(false));
        let source = Box::new(Scripted {
            inputs: vec![Input::new("Warning", 2)],
            reads: vec![Ok(vec![false]), Ok(vec![true])].into(),
            closed: closed.clone(),
            quit_after: Some(3),
            served: 0,
        });
        let journal = Journal::default();
        let dispatcher =
            Dispatcher::start(actions(), Box::new(Recorder::new(&journal))).unwrap();
        let mut poll = PollLoop::new(source, Duration::from_secs(5), Duration::from_millis(5));
        // the stop flag is never set
        poll.run(&dispatcher, &AtomicBool::new(false));
        assert!(*closed.lock());
        assert!(dispatcher.wait_idle(Duration::from_secs(5)));
        assert_eq!(journal.entries(), vec!["play Warning.mp4"]);
    }
}
