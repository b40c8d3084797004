use crate::Error;

/// Observable state of a promise.
#[derive(Debug, Clone)]
pub enum State<T> {
    Pending,
    Resolved(T),
    Failed(Error),
}

impl<T> State<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, State::Pending)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            State::Resolved(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            State::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn into_result(self) -> Option<Result<T, Error>> {
        match self {
            State::Pending => None,
            State::Resolved(value) => Some(Ok(value)),
            State::Failed(error) => Some(Err(error)),
        }
    }
}

/// Single-assignment holder of a promise's outcome.
///
/// The cell moves from pending to resolved or failed once and stays there.
/// Late writes are ignored and reported through the `false` return. The cell
/// itself does no locking: its owner serializes access together with the
/// continuation queues so a transition and the draining of its listeners
/// are one atomic step.
#[derive(Debug)]
pub struct ResultCell<T> {
    state: State<T>,
}

impl<T> Default for ResultCell<T> {
    fn default() -> Self {
        Self {
            state: State::Pending,
        }
    }
}

impl<T: Clone> ResultCell<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff this call performed the pending to resolved transition.
    pub fn try_set(&mut self, value: T) -> bool {
        if !self.state.is_pending() {
            return false;
        }
        self.state = State::Resolved(value);
        true
    }

    /// Returns true iff this call performed the pending to failed transition.
    pub fn try_set_error(&mut self, error: Error) -> bool {
        if !self.state.is_pending() {
            return false;
        }
        self.state = State::Failed(error);
        true
    }

    pub fn state(&self) -> &State<T> {
        &self.state
    }

    pub fn snapshot(&self) -> State<T> {
        self.state.clone()
    }
}
