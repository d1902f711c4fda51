//! Guard against forgotten builder finalization.

use std::process;

use tracing::error;

/// A guard that aborts the process if dropped while still armed.
///
/// Builders hold one and defuse it in `finish`/`discard`; any code path
/// that drops a builder without draining its state trips the guard.
#[derive(Debug)]
pub struct Bomb {
    armed: bool,
    what: String,
}

impl Bomb {
    pub fn new(what: impl Into<String>) -> Self {
        Self {
            armed: true,
            what: what.into(),
        }
    }

    pub fn defuse(&mut self) {
        self.armed = false;
    }
}

impl Drop for Bomb {
    fn drop(&mut self) {
        // A panic in flight already reports the failure; aborting here
        // would mask it.
        if self.armed && !std::thread::panicking() {
            error!("dropped without finish() or discard(): {}", self.what);
            process::abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defused_bomb_drops_quietly() {
        let mut bomb = Bomb::new("test state");
        bomb.defuse();
        drop(bomb);
    }
}
