// Timed Event Scheduler (spec.md C1): a process-wide facility for
// periodic, cancellable, restartable callbacks. One dedicated worker
// thread owns a `mio_extras::timer::Timer`, mirroring the source's
// single `ResourceEvent` thread that every `TimedEvent` in WLP.cpp
// registers against, rather than one OS timer per event -- built on the
// same mio 0.6 + mio-extras event loop the crate already uses elsewhere
// for scheduled wake-ups (`dds::statusevents` registers its
// `mio_extras::channel` the same way).
//
// Commands reach the worker over an `mio_extras::channel`, registered on
// the same `Poll` as the timer so one event loop drives both; queries
// for "how long until this fires" go through a small shared deadline
// map instead, so callers never block on the worker thread.

use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
  },
  thread,
  time::{Duration as StdDuration, Instant},
};

use mio_06::{Events, Poll, PollOpt, Ready, Token};
use mio_extras::{channel, timer};

use crate::structure::duration::Duration;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct EventHandle(u64);

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EventCode {
  Success,
  Abort,
}

type Callback = Box<dyn FnMut(EventCode) + Send>;

enum Command {
  Schedule {
    handle: EventHandle,
    delay: StdDuration,
    period: Option<StdDuration>,
    callback: Callback,
  },
  Restart {
    handle: EventHandle,
    delay: StdDuration,
  },
  UpdateInterval {
    handle: EventHandle,
    period: StdDuration,
  },
  Cancel {
    handle: EventHandle,
  },
  Shutdown,
}

struct ScheduledEvent {
  callback: Callback,
  period: Option<StdDuration>,
  timeout: timer::Timeout,
}

const CHANNEL_TOKEN: Token = Token(0);
const TIMER_TOKEN: Token = Token(1);

/// A dedicated background thread firing callbacks at their deadlines.
/// Dropping the scheduler cancels every pending event with `Abort` and
/// joins the worker before returning (spec.md §4.1 "Failure").
pub struct TimedEventScheduler {
  next_handle: AtomicU64,
  command_tx: channel::Sender<Command>,
  deadlines: Arc<Mutex<HashMap<EventHandle, Instant>>>,
  worker: Option<thread::JoinHandle<()>>,
}

impl TimedEventScheduler {
  pub fn new() -> Self {
    let (command_tx, command_rx) = channel::channel();
    let deadlines = Arc::new(Mutex::new(HashMap::new()));
    let worker_deadlines = Arc::clone(&deadlines);
    let worker = thread::Builder::new()
      .name("timed-event-scheduler".to_string())
      .spawn(move || run(command_rx, worker_deadlines))
      .expect("failed to spawn timed event scheduler thread");

    TimedEventScheduler {
      next_handle: AtomicU64::new(1),
      command_tx,
      deadlines,
      worker: Some(worker),
    }
  }

  fn alloc_handle(&self) -> EventHandle {
    EventHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
  }

  /// Schedules `callback` to fire once, `delay` from now.
  pub fn schedule<F>(&self, delay: Duration, callback: F) -> EventHandle
  where
    F: FnMut(EventCode) + Send + 'static,
  {
    self.schedule_inner(delay, None, callback)
  }

  /// Schedules `callback` to fire every `period`, starting one period
  /// from now. Used for the automatic/manual-by-participant bucket
  /// timers (spec.md §4.4.1) and for a Liveliness Manager's own
  /// earliest-deadline timer, restarted after each firing.
  pub fn schedule_periodic<F>(&self, period: Duration, callback: F) -> EventHandle
  where
    F: FnMut(EventCode) + Send + 'static,
  {
    self.schedule_inner(period, Some(period.as_std()), callback)
  }

  fn schedule_inner<F>(&self, delay: Duration, period: Option<StdDuration>, callback: F) -> EventHandle
  where
    F: FnMut(EventCode) + Send + 'static,
  {
    let handle = self.alloc_handle();
    let delay_std = delay.as_std();
    self.deadlines.lock().unwrap().insert(handle, Instant::now() + delay_std);
    let _ = self.command_tx.send(Command::Schedule {
      handle,
      delay: delay_std,
      period,
      callback: Box::new(callback),
    });
    handle
  }

  /// (Re)arms `handle` to fire `delay` from now, without changing its
  /// periodic interval if any (spec.md §4.1 `restart`).
  pub fn restart(&self, handle: EventHandle, delay: Duration) {
    let delay_std = delay.as_std();
    self.deadlines.lock().unwrap().insert(handle, Instant::now() + delay_std);
    let _ = self.command_tx.send(Command::Restart { handle, delay: delay_std });
  }

  /// Changes `handle`'s period; takes effect at the next arm (spec.md
  /// §4.1 `update_interval`).
  pub fn update_interval(&self, handle: EventHandle, period: Duration) {
    let _ = self.command_tx.send(Command::UpdateInterval {
      handle,
      period: period.as_std(),
    });
  }

  /// Cancels `handle`. Never blocks on the worker (spec.md §4.1 `cancel`).
  pub fn cancel(&self, handle: EventHandle) {
    self.deadlines.lock().unwrap().remove(&handle);
    let _ = self.command_tx.send(Command::Cancel { handle });
  }

  /// Advisory milliseconds until `handle` next fires, or `None` if it is
  /// unknown (one-shot already fired, or cancelled).
  pub fn remaining_ms(&self, handle: EventHandle) -> Option<u64> {
    let deadlines = self.deadlines.lock().unwrap();
    let deadline = *deadlines.get(&handle)?;
    Some(deadline.saturating_duration_since(Instant::now()).as_millis() as u64)
  }
}

impl Default for TimedEventScheduler {
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for TimedEventScheduler {
  fn drop(&mut self) {
    let _ = self.command_tx.send(Command::Shutdown);
    if let Some(worker) = self.worker.take() {
      let _ = worker.join();
    }
  }
}

/// The worker's single `mio_06::Poll` loop: the command channel and the
/// timer are registered side by side, the way `dds::statusevents`'s
/// listeners share one poll between an `mio_extras::channel` and their
/// other `Evented` sources.
fn run(command_rx: channel::Receiver<Command>, deadlines: Arc<Mutex<HashMap<EventHandle, Instant>>>) {
  let poll = Poll::new().expect("failed to create mio poll for timed event scheduler");
  let mut timer: timer::Timer<EventHandle> = timer::Builder::default().build();

  poll
    .register(&command_rx, CHANNEL_TOKEN, Ready::readable(), PollOpt::edge())
    .expect("failed to register timed event scheduler command channel");
  poll
    .register(&timer, TIMER_TOKEN, Ready::readable(), PollOpt::edge())
    .expect("failed to register timed event scheduler timer");

  let mut events = Events::with_capacity(16);
  let mut scheduled: HashMap<EventHandle, ScheduledEvent> = HashMap::new();

  loop {
    poll.poll(&mut events, None).expect("timed event scheduler poll failed");

    for event in events.iter() {
      match event.token() {
        CHANNEL_TOKEN => {
          while let Ok(command) = command_rx.try_recv() {
            match command {
              Command::Schedule {
                handle,
                delay,
                period,
                callback,
              } => {
                let timeout = timer.set_timeout(delay, handle).expect("timed event scheduler timer exhausted");
                scheduled.insert(
                  handle,
                  ScheduledEvent {
                    callback,
                    period,
                    timeout,
                  },
                );
              }
              Command::Restart { handle, delay } => {
                if let Some(event) = scheduled.get_mut(&handle) {
                  timer.cancel_timeout(&event.timeout);
                  event.timeout = timer.set_timeout(delay, handle).expect("timed event scheduler timer exhausted");
                }
              }
              Command::UpdateInterval { handle, period } => {
                if let Some(event) = scheduled.get_mut(&handle) {
                  event.period = Some(period);
                }
              }
              Command::Cancel { handle } => {
                if let Some(event) = scheduled.remove(&handle) {
                  timer.cancel_timeout(&event.timeout);
                }
                deadlines.lock().unwrap().remove(&handle);
              }
              Command::Shutdown => {
                for (_, mut event) in scheduled.drain() {
                  (event.callback)(EventCode::Abort);
                }
                return;
              }
            }
          }
        }
        TIMER_TOKEN => {
          while let Some(handle) = timer.poll() {
            let Some(mut scheduled_event) = scheduled.remove(&handle) else {
              continue;
            };
            (scheduled_event.callback)(EventCode::Success);
            match scheduled_event.period {
              Some(period) => {
                let next = Instant::now() + period;
                deadlines.lock().unwrap().insert(handle, next);
                scheduled_event.timeout = timer.set_timeout(period, handle).expect("timed event scheduler timer exhausted");
                scheduled.insert(handle, scheduled_event);
              }
              None => {
                deadlines.lock().unwrap().remove(&handle);
              }
            }
          }
        }
        _ => unreachable!("timed event scheduler poll produced an unknown token"),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::mpsc;

  use super::*;

  #[test]
  fn one_shot_fires_once() {
    let scheduler = TimedEventScheduler::new();
    let (tx, rx) = mpsc::channel();
    scheduler.schedule(Duration::from_millis(20), move |code| {
      let _ = tx.send(code);
    });
    let code = rx.recv_timeout(StdDuration::from_millis(500)).unwrap();
    assert_eq!(code, EventCode::Success);
    assert!(rx.recv_timeout(StdDuration::from_millis(100)).is_err());
  }

  #[test]
  fn periodic_fires_repeatedly() {
    let scheduler = TimedEventScheduler::new();
    let (tx, rx) = mpsc::channel();
    let _handle = scheduler.schedule_periodic(Duration::from_millis(15), move |code| {
      let _ = tx.send(code);
    });
    for _ in 0..3 {
      let code = rx.recv_timeout(StdDuration::from_millis(500)).unwrap();
      assert_eq!(code, EventCode::Success);
    }
  }

  #[test]
  fn cancel_prevents_firing() {
    let scheduler = TimedEventScheduler::new();
    let (tx, rx) = mpsc::channel();
    let handle = scheduler.schedule(Duration::from_millis(50), move |code| {
      let _ = tx.send(code);
    });
    scheduler.cancel(handle);
    assert!(rx.recv_timeout(StdDuration::from_millis(200)).is_err());
  }

  #[test]
  fn drop_delivers_abort_to_pending_events() {
    let scheduler = TimedEventScheduler::new();
    let (tx, rx) = mpsc::channel();
    scheduler.schedule(Duration::from_secs(60), move |code| {
      let _ = tx.send(code);
    });
    drop(scheduler);
    let code = rx.recv_timeout(StdDuration::from_millis(500)).unwrap();
    assert_eq!(code, EventCode::Abort);
  }
}
