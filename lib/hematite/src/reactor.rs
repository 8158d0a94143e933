//! Single-threaded event loop multiplexing socket readiness and timers.
//!
//! File events are registered per token with a readable and/or writable
//! handler; time events fire once their deadline passes and either
//! reschedule themselves or are dropped. One `process_events` call is one
//! tick: poll readiness (sleeping at most until the nearest timer when
//! timers are requested and blocking is allowed), dispatch the snapshotted
//! ready set, then run due timers.
//!
//! Handlers are plain functions over `(reactor, state, token, readiness)`
//! and run to completion; they may freely create and delete events,
//! including their own. A per-token generation counter makes readiness
//! snapshotted before dispatch harmless once the event it belonged to has
//! been deleted or replaced within the same tick.

use hashbrown::HashMap;
use mio::unix::UnixReady;
use mio::{Evented, Events, Poll, PollOpt, Ready, Token};
use std::io;
use std::time::{Duration, Instant};

pub const FILE_EVENTS: u32 = 1;
pub const TIME_EVENTS: u32 = 2;
pub const ALL_EVENTS: u32 = FILE_EVENTS | TIME_EVENTS;
/// Never sleep in the readiness wait.
pub const DONT_WAIT: u32 = 4;

/// Readable/writable handler: `(reactor, state, token, readiness)`.
pub type FileProc<S> = fn(&mut Reactor<S>, &mut S, usize, Ready);
/// Timer handler: `(reactor, state, id)`, deciding its own fate.
pub type TimeProc<S> = fn(&mut Reactor<S>, &mut S, u64) -> TimerAction;

/// What a fired timer wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Fire again after this many milliseconds.
    Rearm(u64),
    /// Drop the timer.
    NoMore,
}

struct FileEvent<S> {
    generation: u64,
    mask: Ready,
    read_proc: Option<FileProc<S>>,
    write_proc: Option<FileProc<S>>,
}

struct TimeEvent<S> {
    id: u64,
    when: Instant,
    proc: TimeProc<S>,
}

pub struct Reactor<S> {
    poll: Poll,
    events: Events,
    file_events: HashMap<usize, FileEvent<S>>,
    generation: u64,
    time_events: Vec<TimeEvent<S>>,
    next_time_id: u64,
    stop: bool,
}

impl<S> Reactor<S> {
    pub fn new() -> io::Result<Reactor<S>> {
        Ok(Reactor {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
            file_events: HashMap::new(),
            generation: 0,
            time_events: Vec::new(),
            next_time_id: 0,
            stop: false,
        })
    }

    /// Register interest for a token, or widen an existing registration.
    /// The same handler serves every interest bit in `mask`.
    pub fn create_file_event<E: Evented>(
        &mut self,
        io: &E,
        token: usize,
        mask: Ready,
        proc: FileProc<S>,
    ) -> io::Result<()> {
        match self.file_events.get_mut(&token) {
            Some(event) => {
                if mask.is_readable() {
                    event.read_proc = Some(proc);
                }
                if mask.is_writable() {
                    event.write_proc = Some(proc);
                }
                event.mask |= mask;
                let mask = event.mask;
                self.poll.reregister(io, Token(token), mask, PollOpt::level())
            }
            None => {
                self.generation += 1;
                self.poll.register(io, Token(token), mask, PollOpt::level())?;
                self.file_events.insert(
                    token,
                    FileEvent {
                        generation: self.generation,
                        mask,
                        read_proc: if mask.is_readable() { Some(proc) } else { None },
                        write_proc: if mask.is_writable() { Some(proc) } else { None },
                    },
                );
                Ok(())
            }
        }
    }

    /// Drop the given interest bits for a token. The registration goes away
    /// entirely once no interest remains; readiness already collected for
    /// it this tick will not be dispatched.
    pub fn delete_file_event<E: Evented>(&mut self, io: &E, token: usize, mask: Ready) {
        let remaining = match self.file_events.get_mut(&token) {
            Some(event) => {
                if mask.is_readable() {
                    event.read_proc = None;
                }
                if mask.is_writable() {
                    event.write_proc = None;
                }
                event.mask -= mask;
                event.mask
            }
            None => return,
        };
        if remaining.is_empty() {
            self.file_events.remove(&token);
            let _ = self.poll.deregister(io);
        } else {
            let _ = self.poll.reregister(io, Token(token), remaining, PollOpt::level());
        }
    }

    /// Schedule a timer `delay_ms` from now. Returns its id.
    pub fn create_time_event(&mut self, delay_ms: u64, proc: TimeProc<S>) -> u64 {
        let id = self.next_time_id;
        self.next_time_id += 1;
        self.time_events.push(TimeEvent {
            id,
            when: Instant::now() + Duration::from_millis(delay_ms),
            proc,
        });
        id
    }

    pub fn delete_time_event(&mut self, id: u64) -> bool {
        let before = self.time_events.len();
        self.time_events.retain(|event| event.id != id);
        self.time_events.len() != before
    }

    /// Ask the main loop to exit after the current tick.
    pub fn stop(&mut self) {
        self.stop = true;
    }

    /// Run one tick. Returns the number of handlers invoked.
    pub fn process_events(&mut self, state: &mut S, flags: u32) -> usize {
        let mut processed = 0;

        if flags & ALL_EVENTS == 0 {
            return 0;
        }

        let wait_for_timers = flags & TIME_EVENTS != 0 && flags & DONT_WAIT == 0;

        let has_files = flags & FILE_EVENTS != 0 && !self.file_events.is_empty();

        if has_files || wait_for_timers {
            let timeout = if wait_for_timers {
                // Sleep at most until the nearest deadline; block with no
                // timers pending.
                self.nearest_deadline()
                    .map(|when| when.saturating_duration_since(Instant::now()))
            } else {
                Some(Duration::from_millis(0))
            };

            if self.poll.poll(&mut self.events, timeout).is_ok() {
                let ready: Vec<(usize, Ready, u64)> = self
                    .events
                    .iter()
                    .filter_map(|event| {
                        let token = event.token().0;
                        let generation = self.file_events.get(&token)?.generation;
                        Some((token, event.readiness(), generation))
                    })
                    .collect();

                for (token, readiness, generation) in ready {
                    let unix = UnixReady::from(readiness);
                    // Hangup and error conditions surface through the read
                    // path, where the zero-length read reports them.
                    let readable = readiness.is_readable() || unix.is_hup() || unix.is_error();

                    if readable {
                        if let Some(proc) = self.live_proc(token, generation, Ready::readable()) {
                            proc(self, state, token, Ready::readable());
                            processed += 1;
                        }
                    }
                    if readiness.is_writable() {
                        if let Some(proc) = self.live_proc(token, generation, Ready::writable()) {
                            proc(self, state, token, Ready::writable());
                            processed += 1;
                        }
                    }
                }
            }
        }

        if flags & TIME_EVENTS != 0 {
            processed += self.process_time_events(state);
        }

        processed
    }

    /// Run until [`stop`](Reactor::stop) is called.
    pub fn run(&mut self, state: &mut S) {
        self.stop = false;
        while !self.stop {
            self.process_events(state, ALL_EVENTS);
        }
    }

    /// Handler for a token, provided the registration that was snapshotted
    /// is still the live one.
    fn live_proc(&self, token: usize, generation: u64, interest: Ready) -> Option<FileProc<S>> {
        let event = self.file_events.get(&token)?;
        if event.generation != generation {
            return None;
        }
        if interest.is_readable() {
            event.read_proc
        } else {
            event.write_proc
        }
    }

    fn nearest_deadline(&self) -> Option<Instant> {
        self.time_events.iter().map(|event| event.when).min()
    }

    fn process_time_events(&mut self, state: &mut S) -> usize {
        let mut processed = 0;
        // Timers registered by handlers fired below must wait for the next
        // tick.
        let max_id = self.next_time_id;
        let mut index = 0;

        while index < self.time_events.len() {
            let event = &self.time_events[index];
            if event.id >= max_id || Instant::now() < event.when {
                index += 1;
                continue;
            }

            let id = event.id;
            let proc = event.proc;
            match proc(self, state, id) {
                TimerAction::Rearm(delay_ms) => {
                    if let Some(event) = self.time_events.iter_mut().find(|event| event.id == id) {
                        event.when = Instant::now() + Duration::from_millis(delay_ms);
                    }
                }
                TimerAction::NoMore => {
                    self.delete_time_event(id);
                }
            }
            processed += 1;
            // The handler may have added or removed timers; restart the walk.
            index = 0;
        }

        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::{TcpListener, TcpStream};
    use std::io::Write;
    use std::net::SocketAddr;

    #[derive(Default)]
    struct Counters {
        ticks: u64,
        reads: u64,
        accepts: u64,
    }

    fn tick_once(_el: &mut Reactor<Counters>, state: &mut Counters, _id: u64) -> TimerAction {
        state.ticks += 1;
        TimerAction::NoMore
    }

    fn tick_twice(_el: &mut Reactor<Counters>, state: &mut Counters, _id: u64) -> TimerAction {
        state.ticks += 1;
        if state.ticks < 2 {
            TimerAction::Rearm(1)
        } else {
            TimerAction::NoMore
        }
    }

    fn spawning_tick(el: &mut Reactor<Counters>, state: &mut Counters, _id: u64) -> TimerAction {
        state.ticks += 1;
        // Must not run within this tick.
        el.create_time_event(0, tick_once);
        TimerAction::NoMore
    }

    fn drain(reactor: &mut Reactor<Counters>, state: &mut Counters, deadline_ms: u64) {
        let start = Instant::now();
        while Instant::now().duration_since(start) < Duration::from_millis(deadline_ms) {
            reactor.process_events(state, ALL_EVENTS | DONT_WAIT);
        }
    }

    #[test]
    fn test_one_shot_timer_fires_once() {
        let mut el: Reactor<Counters> = Reactor::new().unwrap();
        let mut state = Counters::default();
        el.create_time_event(0, tick_once);
        drain(&mut el, &mut state, 50);
        assert_eq!(state.ticks, 1);
        assert!(el.time_events.is_empty());
    }

    #[test]
    fn test_rearm_then_stop() {
        let mut el: Reactor<Counters> = Reactor::new().unwrap();
        let mut state = Counters::default();
        el.create_time_event(0, tick_twice);
        drain(&mut el, &mut state, 100);
        assert_eq!(state.ticks, 2);
        assert!(el.time_events.is_empty());
    }

    #[test]
    fn test_timer_created_by_handler_waits_a_tick() {
        let mut el: Reactor<Counters> = Reactor::new().unwrap();
        let mut state = Counters::default();
        el.create_time_event(0, spawning_tick);
        std::thread::sleep(Duration::from_millis(5));
        el.process_events(&mut state, TIME_EVENTS | DONT_WAIT);
        // Only the spawning timer ran; its child is due but ineligible.
        assert_eq!(state.ticks, 1);
        el.process_events(&mut state, TIME_EVENTS | DONT_WAIT);
        assert_eq!(state.ticks, 2);
    }

    #[test]
    fn test_delete_time_event() {
        let mut el: Reactor<Counters> = Reactor::new().unwrap();
        let mut state = Counters::default();
        let id = el.create_time_event(0, tick_once);
        assert!(el.delete_time_event(id));
        assert!(!el.delete_time_event(id));
        drain(&mut el, &mut state, 20);
        assert_eq!(state.ticks, 0);
    }

    fn on_accept(el: &mut Reactor<Counters>, state: &mut Counters, _token: usize, _mask: Ready) {
        state.accepts += 1;
        el.stop();
    }

    fn on_read(
        _el: &mut Reactor<Counters>,
        state: &mut Counters,
        _token: usize,
        _mask: Ready,
    ) {
        state.reads += 1;
    }

    #[test]
    fn test_file_event_dispatch() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(&addr).unwrap();
        let local = listener.local_addr().unwrap();

        let mut el: Reactor<Counters> = Reactor::new().unwrap();
        let mut state = Counters::default();
        el.create_file_event(&listener, 1, Ready::readable(), on_accept)
            .unwrap();

        let _client = std::net::TcpStream::connect(local).unwrap();
        // run() exits when the accept handler calls stop().
        el.run(&mut state);
        assert_eq!(state.accepts, 1);
    }

    #[test]
    fn test_deleted_event_is_not_dispatched() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(&addr).unwrap();
        let local = listener.local_addr().unwrap();

        let mut el: Reactor<Counters> = Reactor::new().unwrap();
        let mut state = Counters::default();

        let peer = std::net::TcpStream::connect(local).unwrap();
        let (accepted, _) = loop {
            match listener.accept() {
                Ok(pair) => break pair,
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1))
                }
                Err(e) => panic!("accept failed: {}", e),
            }
        };
        let mut writer = peer;
        writer.write_all(b"x").unwrap();

        el.create_file_event(&accepted, 2, Ready::readable(), on_read)
            .unwrap();
        drain(&mut el, &mut state, 30);
        assert!(state.reads >= 1);

        el.delete_file_event(&accepted, 2, Ready::readable());
        let reads = state.reads;
        drain(&mut el, &mut state, 30);
        assert_eq!(state.reads, reads);
    }

    #[test]
    fn test_stream_write_interest() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(&addr).unwrap();
        let local = listener.local_addr().unwrap();
        let stream = TcpStream::connect(&local).unwrap();

        let mut el: Reactor<Counters> = Reactor::new().unwrap();
        let mut state = Counters::default();
        el.create_file_event(&stream, 3, Ready::writable(), on_accept)
            .unwrap();
        el.run(&mut state);
        assert_eq!(state.accepts, 1);
    }
}
