//! Locally computed mirror of every tracked store key.

use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
    catalog::{FRAC_KEY, HASH_KEY, RADIX_KEY, RANDOM_KEY},
    decimal::{Decimal, DecimalContext},
};

const REGISTER_COUNT: usize = 6;

/// A tracked store location and the register mirroring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    Radix,
    Frac,
    Random,
    HashRadix,
    HashFrac,
    HashRandom,
}

impl Register {
    pub const ALL: [Register; REGISTER_COUNT] = [
        Register::Radix,
        Register::Frac,
        Register::Random,
        Register::HashRadix,
        Register::HashFrac,
        Register::HashRandom,
    ];

    pub fn location(self) -> Location {
        match self {
            Register::Radix => Location::Key(RADIX_KEY),
            Register::Frac => Location::Key(FRAC_KEY),
            Register::Random => Location::Key(RANDOM_KEY),
            Register::HashRadix => Location::Field {
                group: HASH_KEY,
                field: RADIX_KEY,
            },
            Register::HashFrac => Location::Field {
                group: HASH_KEY,
                field: FRAC_KEY,
            },
            Register::HashRandom => Location::Field {
                group: HASH_KEY,
                field: RANDOM_KEY,
            },
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Key(&'static str),
    Field {
        group: &'static str,
        field: &'static str,
    },
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Key(key) => f.write_str(key),
            Location::Field { group, field } => write!(f, "{group}[{field}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incr,
    Decr,
}

/// A signed amount to fold into one register.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowUpdate {
    pub register: Register,
    pub direction: Direction,
    pub amount: Decimal,
}

/// All registers behind a single lock, so a snapshot never mixes values
/// from before and after a concurrent update.
#[derive(Debug)]
pub struct ShadowState {
    ctx: DecimalContext,
    registers: Mutex<[Decimal; REGISTER_COUNT]>,
}

impl ShadowState {
    pub fn new(ctx: DecimalContext) -> Self {
        Self::with_baseline(ctx, ctx.zero())
    }

    pub fn with_baseline(ctx: DecimalContext, baseline: Decimal) -> Self {
        Self {
            ctx,
            registers: Mutex::new(std::array::from_fn(|_| baseline.clone())),
        }
    }

    pub fn apply(&self, update: &ShadowUpdate) {
        let mut registers = self.lock();
        let slot = &mut registers[update.register.slot()];
        let next = match update.direction {
            Direction::Incr => self.ctx.add(slot, &update.amount),
            Direction::Decr => self.ctx.sub(slot, &update.amount),
        };
        *slot = next;
    }

    pub fn snapshot(&self) -> ShadowSnapshot {
        ShadowSnapshot {
            values: self.lock().clone(),
        }
    }

    /// Sets every register to `baseline`, as after the store's clear step.
    pub fn reset(&self, baseline: &Decimal) {
        let mut registers = self.lock();
        for slot in registers.iter_mut() {
            *slot = baseline.clone();
        }
    }

    // Updates never leave a register half-written, so a poisoned lock
    // still guards consistent values.
    fn lock(&self) -> MutexGuard<'_, [Decimal; REGISTER_COUNT]> {
        self.registers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone)]
pub struct ShadowSnapshot {
    values: [Decimal; REGISTER_COUNT],
}

impl ShadowSnapshot {
    pub fn get(&self, register: Register) -> &Decimal {
        &self.values[register.slot()]
    }
}
