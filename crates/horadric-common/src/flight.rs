//! Single-flight lazy initialisation.
//!
//! [`SingleFlight`] holds a value that is computed on first use. Callers that
//! arrive while the computation is running wait for it and observe the same
//! outcome instead of starting a second one. A successful value is cached for
//! the lifetime of the cell; a failure is handed to every caller of that
//! flight and the cell goes back to idle so a later call can retry.
//!
//! The state lock is only held for bookkeeping, never while the initialiser
//! runs, so slow I/O inside the initialiser does not block unrelated readers
//! of an already-initialised cell.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// A lazily initialised, coalesced and cached value.
///
/// # Example
///
/// ```
/// use horadric_common::SingleFlight;
///
/// let cell: SingleFlight<u32, String> = SingleFlight::new();
/// assert_eq!(cell.get_or_try_init(|| Ok(7)), Ok(7));
/// // Cached: the initialiser is not called again.
/// assert_eq!(cell.get_or_try_init(|| Err("unreachable".into())), Ok(7));
/// ```
pub struct SingleFlight<T, E> {
    state: Mutex<State<T, E>>,
}

enum State<T, E> {
    Idle,
    Loading(Arc<Flight<T, E>>),
    Ready(T),
}

enum Landing<T, E> {
    Pending,
    Landed(Result<T, E>),
    /// The initialiser panicked; waiters must try again themselves.
    Abandoned,
}

struct Flight<T, E> {
    landing: Mutex<Landing<T, E>>,
    landed: Condvar,
}

enum Role<T, E> {
    Leader(Arc<Flight<T, E>>),
    Follower(Arc<Flight<T, E>>),
}

impl<T, E> Flight<T, E> {
    fn new() -> Self {
        Self {
            landing: Mutex::new(Landing::Pending),
            landed: Condvar::new(),
        }
    }

    fn settle(&self, landing: Landing<T, E>) {
        *self.landing.lock() = landing;
        self.landed.notify_all();
    }
}

impl<T: Clone, E: Clone> Flight<T, E> {
    /// Block until the leader settles. `None` means the flight was abandoned.
    fn wait(&self) -> Option<Result<T, E>> {
        let mut landing = self.landing.lock();
        loop {
            match &*landing {
                Landing::Pending => self.landed.wait(&mut landing),
                Landing::Landed(outcome) => return Some(outcome.clone()),
                Landing::Abandoned => return None,
            }
        }
    }
}

/// Resets the cell if the initialiser unwinds before landing.
struct Pilot<'a, T, E> {
    cell: &'a SingleFlight<T, E>,
    flight: Arc<Flight<T, E>>,
    landed: bool,
}

impl<T, E> Drop for Pilot<'_, T, E> {
    fn drop(&mut self) {
        if !self.landed {
            *self.cell.state.lock() = State::Idle;
            self.flight.settle(Landing::Abandoned);
        }
    }
}

impl<T, E> SingleFlight<T, E> {
    /// Create an empty cell.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Idle),
        }
    }

    /// Check whether a value has been cached.
    pub fn is_ready(&self) -> bool {
        matches!(*self.state.lock(), State::Ready(_))
    }
}

impl<T: Clone, E: Clone> SingleFlight<T, E> {
    /// Return the cached value, if any, without initialising.
    pub fn get(&self) -> Option<T> {
        match &*self.state.lock() {
            State::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Return the cached value or run `init` to produce it.
    ///
    /// At most one `init` runs at a time per cell. Callers arriving while it
    /// runs block until it finishes and receive a clone of its outcome.
    pub fn get_or_try_init<F>(&self, init: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        loop {
            let role = {
                let mut state = self.state.lock();
                match &*state {
                    State::Ready(value) => return Ok(value.clone()),
                    State::Loading(flight) => Role::Follower(Arc::clone(flight)),
                    State::Idle => {
                        let flight = Arc::new(Flight::new());
                        *state = State::Loading(Arc::clone(&flight));
                        Role::Leader(flight)
                    }
                }
            };

            match role {
                Role::Follower(flight) => {
                    if let Some(outcome) = flight.wait() {
                        return outcome;
                    }
                }
                Role::Leader(flight) => {
                    let mut pilot = Pilot {
                        cell: self,
                        flight,
                        landed: false,
                    };
                    let outcome = init();
                    *self.state.lock() = match &outcome {
                        Ok(value) => State::Ready(value.clone()),
                        Err(_) => State::Idle,
                    };
                    pilot.flight.settle(Landing::Landed(outcome.clone()));
                    pilot.landed = true;
                    return outcome;
                }
            }
        }
    }
}

impl<T, E> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for SingleFlight<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            State::Idle => "idle",
            State::Loading(_) => "loading",
            State::Ready(_) => "ready",
        };
        f.debug_struct("SingleFlight")
            .field("state", &state)
            .finish()
    }
}
