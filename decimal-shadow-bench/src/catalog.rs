//! The fixed set of operations a worker can be bound to.
//!
//! Each [`Operation`] knows the exact command it sends and, for the
//! stateful ones, which shadow register it moves and by how much.

use std::{fmt, ops::Range, str::FromStr};

use rand::Rng;

use crate::{
    decimal::{Decimal, DecimalContext, DecimalError},
    shadow::{Direction, Register, ShadowUpdate},
};

pub const RADIX_KEY: &str = "bn:radix";
pub const FRAC_KEY: &str = "bn:frac";
pub const RANDOM_KEY: &str = "bn:random";
pub const HASH_KEY: &str = "bn:hash";
/// Glob matching every key the harness writes.
pub const KEY_PATTERN: &str = "bn:*";

pub const DELTA: &str = "0.00000000000000000000000000000001";
pub const TO_FIXED_VALUE: &str = "0.123456789";
pub const TO_FIXED_SCALE: &str = "2";
pub const RANDOM_RANGE: Range<f64> = -100.0..100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Add,
    Sub,
    Mul,
    Div,
    ToFixed,
    Incr,
    Decr,
    IncrBy,
    DecrBy,
    Random,
    HIncr,
    HDecr,
    HIncrBy,
    HDecrBy,
    HRandom,
}

impl Operation {
    pub const ALL: [Operation; 15] = [
        Operation::Add,
        Operation::Sub,
        Operation::Mul,
        Operation::Div,
        Operation::ToFixed,
        Operation::Incr,
        Operation::Decr,
        Operation::IncrBy,
        Operation::DecrBy,
        Operation::Random,
        Operation::HIncr,
        Operation::HDecr,
        Operation::HIncrBy,
        Operation::HDecrBy,
        Operation::HRandom,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Add => "OpADD",
            Operation::Sub => "OpSUB",
            Operation::Mul => "OpMUL",
            Operation::Div => "OpDIV",
            Operation::ToFixed => "OpTO_FIXED",
            Operation::Incr => "OpINCR",
            Operation::Decr => "OpDECR",
            Operation::IncrBy => "OpINCRBY",
            Operation::DecrBy => "OpDECRBY",
            Operation::Random => "OpRANDOM",
            Operation::HIncr => "OpHINCR",
            Operation::HDecr => "OpHDECR",
            Operation::HIncrBy => "OpHINCRBY",
            Operation::HDecrBy => "OpHDECRBY",
            Operation::HRandom => "OpHRANDOM",
        }
    }

    /// Picks uniformly from `choices`, falling back to the whole catalog
    /// when `choices` is empty.
    pub fn sample<R: Rng + ?Sized>(choices: &[Operation], rng: &mut R) -> Operation {
        if choices.is_empty() {
            return Self::ALL[rng.gen_range(0..Self::ALL.len())];
        }
        choices[rng.gen_range(0..choices.len())]
    }

    /// The register this operation moves, if any.
    pub fn register(self) -> Option<Register> {
        match self {
            Operation::Add
            | Operation::Sub
            | Operation::Mul
            | Operation::Div
            | Operation::ToFixed => None,
            Operation::Incr | Operation::Decr => Some(Register::Radix),
            Operation::IncrBy | Operation::DecrBy => Some(Register::Frac),
            Operation::Random => Some(Register::Random),
            Operation::HIncr | Operation::HDecr => Some(Register::HashRadix),
            Operation::HIncrBy | Operation::HDecrBy => Some(Register::HashFrac),
            Operation::HRandom => Some(Register::HashRandom),
        }
    }

    /// Builds the next command for this operation. Only the random
    /// operations consume `rng`.
    pub fn plan<R: Rng + ?Sized>(
        self,
        amounts: &Amounts,
        ctx: &DecimalContext,
        rng: &mut R,
    ) -> Result<Invocation, DecimalError> {
        let invocation = match self {
            Operation::Add => Invocation::check("bn.add", [DELTA, DELTA]),
            Operation::Sub => Invocation::check("bn.sub", [DELTA, DELTA]),
            Operation::Mul => Invocation::check("bn.mul", [DELTA, DELTA]),
            Operation::Div => Invocation::check("bn.div", [DELTA, DELTA]),
            Operation::ToFixed => {
                Invocation::check("bn.to_fixed", [TO_FIXED_VALUE, TO_FIXED_SCALE])
            }
            Operation::Incr => Invocation::tracked(
                Command::new("bn.incr", [RADIX_KEY]),
                Register::Radix,
                Direction::Incr,
                amounts.one.clone(),
            ),
            Operation::Decr => Invocation::tracked(
                Command::new("bn.decr", [RADIX_KEY]),
                Register::Radix,
                Direction::Decr,
                amounts.one.clone(),
            ),
            Operation::IncrBy => Invocation::tracked(
                Command::new("bn.incrby", [FRAC_KEY, DELTA]),
                Register::Frac,
                Direction::Incr,
                amounts.delta.clone(),
            ),
            Operation::DecrBy => Invocation::tracked(
                Command::new("bn.decrby", [FRAC_KEY, DELTA]),
                Register::Frac,
                Direction::Decr,
                amounts.delta.clone(),
            ),
            Operation::HIncr => Invocation::tracked(
                Command::new("bn.hincr", [HASH_KEY, RADIX_KEY]),
                Register::HashRadix,
                Direction::Incr,
                amounts.one.clone(),
            ),
            Operation::HDecr => Invocation::tracked(
                Command::new("bn.hdecr", [HASH_KEY, RADIX_KEY]),
                Register::HashRadix,
                Direction::Decr,
                amounts.one.clone(),
            ),
            Operation::HIncrBy => Invocation::tracked(
                Command::new("bn.hincrby", [HASH_KEY, FRAC_KEY, DELTA]),
                Register::HashFrac,
                Direction::Incr,
                amounts.delta.clone(),
            ),
            Operation::HDecrBy => Invocation::tracked(
                Command::new("bn.hdecrby", [HASH_KEY, FRAC_KEY, DELTA]),
                Register::HashFrac,
                Direction::Decr,
                amounts.delta.clone(),
            ),
            Operation::Random => {
                let step = RandomStep::sample(ctx, rng)?;
                let name = match step.direction {
                    Direction::Incr => "bn.incrby",
                    Direction::Decr => "bn.decrby",
                };
                Invocation::tracked(
                    Command::new(name, [RANDOM_KEY, step.text.as_str()]),
                    Register::Random,
                    step.direction,
                    step.amount,
                )
            }
            Operation::HRandom => {
                let step = RandomStep::sample(ctx, rng)?;
                let name = match step.direction {
                    Direction::Incr => "bn.hincrby",
                    Direction::Decr => "bn.hdecrby",
                };
                Invocation::tracked(
                    Command::new(name, [HASH_KEY, RANDOM_KEY, step.text.as_str()]),
                    Register::HashRandom,
                    step.direction,
                    step.amount,
                )
            }
        };
        Ok(invocation)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = String;

    /// Accepts either the display name (`OpHINCRBY`) or the bare command
    /// suffix (`hincrby`), ignoring case.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        Self::ALL
            .into_iter()
            .find(|op| {
                let name = op.name();
                name.eq_ignore_ascii_case(wanted)
                    || name
                        .strip_prefix("Op")
                        .is_some_and(|suffix| suffix.eq_ignore_ascii_case(wanted))
            })
            .ok_or_else(|| format!("unknown operation '{value}'"))
    }
}

/// Fixed step sizes, parsed once per worker instead of per command.
#[derive(Debug, Clone)]
pub struct Amounts {
    pub one: Decimal,
    pub delta: Decimal,
}

impl Amounts {
    pub fn new(ctx: &DecimalContext) -> Result<Self, DecimalError> {
        Ok(Self {
            one: ctx.one(),
            delta: ctx.parse(DELTA)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: &'static str,
    pub args: Vec<String>,
}

impl Command {
    fn new<const N: usize>(name: &'static str, args: [&str; N]) -> Self {
        Self {
            name,
            args: args.into_iter().map(str::to_string).collect(),
        }
    }
}

/// One planned call: what to send, and what to fold into the shadow state
/// once the store acknowledges it.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: Command,
    pub update: Option<ShadowUpdate>,
}

impl Invocation {
    fn check<const N: usize>(name: &'static str, args: [&str; N]) -> Self {
        Self {
            command: Command::new(name, args),
            update: None,
        }
    }

    fn tracked(command: Command, register: Register, direction: Direction, amount: Decimal) -> Self {
        Self {
            command,
            update: Some(ShadowUpdate {
                register,
                direction,
                amount,
            }),
        }
    }
}

struct RandomStep {
    direction: Direction,
    text: String,
    amount: Decimal,
}

impl RandomStep {
    // The text sent to the store is parsed back for the shadow, so both
    // sides see exactly the same value.
    fn sample<R: Rng + ?Sized>(ctx: &DecimalContext, rng: &mut R) -> Result<Self, DecimalError> {
        let magnitude: f64 = rng.gen_range(RANDOM_RANGE);
        let direction = if rng.gen_bool(0.5) {
            Direction::Incr
        } else {
            Direction::Decr
        };
        let text = magnitude.to_string();
        let amount = ctx.parse(&text)?;
        Ok(Self {
            direction,
            text,
            amount,
        })
    }
}
