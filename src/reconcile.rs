//! State reconciliation: current + target -> paced one-step command runs.
//!
//! The fixture is write-only, so the store is advanced optimistically on
//! every accepted send -- "sent" is trusted to mean "applied", one step at
//! a time. A plan never overshoots: per channel it contains exactly the
//! absolute level difference, in the fixed white/red/green/blue order.

use std::time::{Duration, Instant};

use crate::ir::{self, Command, IrKey, Sink};
use crate::state::{Channel, Direction, Levels, StateStore};
use crate::{COMMAND_DELAY_MS, LIGHTNING_PULSES};

/// Ordered command sequence plus the delta table it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub commands: Vec<Command>,
    pub deltas: [(Channel, i32); 4],
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

/// Build the minimal plan from `current` to `target`. Boundary no-ops are
/// elided by construction: counts come from the clamped level difference.
pub fn plan(current: Levels, target: Levels) -> Plan {
    let mut commands = Vec::new();
    let mut deltas = [(Channel::White, 0i32); 4];

    for (slot, channel) in Channel::ORDER.into_iter().enumerate() {
        let delta = target.get(channel) as i32 - current.get(channel) as i32;
        deltas[slot] = (channel, delta);

        let direction = if delta > 0 {
            Direction::Up
        } else {
            Direction::Down
        };
        for _ in 0..delta.unsigned_abs() {
            commands.push(Command::new(channel, direction));
        }
    }

    Plan { commands, deltas }
}

/// How an execution run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Converged,
    Cancelled,
    Failed(ir::Error),
}

/// Result of one execution run: how far it got and how long it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub commands_sent: u32,
    pub elapsed: Duration,
    pub outcome: Outcome,
}

impl Report {
    pub fn converged(&self) -> bool {
        self.outcome == Outcome::Converged
    }
}

/// Drives plans through a sink while keeping the store in lockstep.
///
/// Strictly sequential: each send waits out the pacing delay before the
/// next, and the store is stepped once per accepted command. The cancel
/// probe runs between commands; a cancelled run leaves the store at
/// exactly the commands already issued.
pub struct Executor<'a> {
    pub sink: &'a mut dyn Sink,
    pub store: &'a mut StateStore,
    pub delay: Duration,
}

impl<'a> Executor<'a> {
    pub fn new(sink: &'a mut dyn Sink, store: &'a mut StateStore) -> Self {
        Self {
            sink,
            store,
            delay: Duration::from_millis(COMMAND_DELAY_MS),
        }
    }

    pub fn execute(&mut self, plan: &Plan, cancel: &mut dyn FnMut() -> bool) -> Report {
        let started = Instant::now();
        let mut sent = 0u32;

        for command in &plan.commands {
            if cancel() {
                return Report {
                    commands_sent: sent,
                    elapsed: started.elapsed(),
                    outcome: Outcome::Cancelled,
                };
            }
            if sent > 0 {
                std::thread::sleep(self.delay);
            }

            match self.sink.send(IrKey::Step(*command)) {
                Ok(()) => {
                    if let Err(e) = self.store.record_step(command.channel, command.direction) {
                        eprintln!("[warn] state checkpoint failed: {}", e);
                    }
                    sent += 1;
                }
                Err(e) => {
                    return Report {
                        commands_sent: sent,
                        elapsed: started.elapsed(),
                        outcome: Outcome::Failed(e),
                    };
                }
            }
        }

        Report {
            commands_sent: sent,
            elapsed: started.elapsed(),
            outcome: Outcome::Converged,
        }
    }

    /// Reconcile the remembered state to `target`.
    pub fn reconcile(&mut self, target: Levels, cancel: &mut dyn FnMut() -> bool) -> Report {
        let plan = plan(self.store.current(), target);
        self.execute(&plan, cancel)
    }

    /// Recovery from an untrusted physical state: drive every channel to
    /// zero (the one absorbing state reachable without feedback), then
    /// build up to `target`. The zero-drive counts down from the
    /// remembered vector -- the best available bound on reality.
    pub fn resync(&mut self, target: Levels, cancel: &mut dyn FnMut() -> bool) -> Report {
        let down = self.reconcile(Levels::zero(), cancel);
        if !down.converged() {
            return down;
        }
        let up = self.reconcile(target, cancel);
        Report {
            commands_sent: down.commands_sent + up.commands_sent,
            elapsed: down.elapsed + up.elapsed,
            outcome: up.outcome,
        }
    }

    /// The storm effect: a short burst of lightning flashes at the normal
    /// command pacing. Side effect only -- the store is never touched, and
    /// steady-state reconciliation resumes from whatever preceded it.
    pub fn lightning_burst(&mut self, cancel: &mut dyn FnMut() -> bool) -> Report {
        let started = Instant::now();
        let mut sent = 0u32;

        for _ in 0..LIGHTNING_PULSES {
            if cancel() {
                return Report {
                    commands_sent: sent,
                    elapsed: started.elapsed(),
                    outcome: Outcome::Cancelled,
                };
            }
            if sent > 0 {
                std::thread::sleep(self.delay);
            }
            match self.sink.send(IrKey::Lightning) {
                Ok(()) => sent += 1,
                Err(e) => {
                    return Report {
                        commands_sent: sent,
                        elapsed: started.elapsed(),
                        outcome: Outcome::Failed(e),
                    };
                }
            }
        }

        Report {
            commands_sent: sent,
            elapsed: started.elapsed(),
            outcome: Outcome::Converged,
        }
    }
}
