//! Side-by-side comparison of store values and shadow registers.

use std::time::Duration;

use tracing::{info, warn};

use crate::{
    decimal::{Decimal, DecimalContext},
    shadow::{Location, Register, ShadowState},
    store::{Session, StoreError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Match,
    Divergence,
    /// Verification was turned off for this run.
    Unchecked,
}

#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub register: Register,
    /// Raw store text; `None` when the key or field does not exist.
    pub store: Option<String>,
    pub shadow: Decimal,
    pub verdict: Verdict,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub entries: Vec<ReportEntry>,
    pub completed: u64,
    pub elapsed: Duration,
}

impl Report {
    /// Reads every tracked location from the store and compares it with one
    /// consistent snapshot of the shadow state.
    pub async fn collect(
        session: &mut Session,
        shadow: &ShadowState,
        ctx: &DecimalContext,
        verify: bool,
        completed: u64,
        elapsed: Duration,
    ) -> Result<Self, StoreError> {
        let snapshot = shadow.snapshot();
        let mut entries = Vec::with_capacity(Register::ALL.len());

        for register in Register::ALL {
            let store = match register.location() {
                Location::Key(key) => session.get(key).await?,
                Location::Field { group, field } => session.hget(group, field).await?,
            };
            let shadow = snapshot.get(register).clone();
            let verdict = if verify {
                compare(ctx, store.as_deref(), &shadow)
            } else {
                Verdict::Unchecked
            };
            entries.push(ReportEntry {
                register,
                store,
                shadow,
                verdict,
            });
        }

        Ok(Self {
            entries,
            completed,
            elapsed,
        })
    }

    pub fn entry(&self, register: Register) -> Option<&ReportEntry> {
        self.entries.iter().find(|entry| entry.register == register)
    }

    pub fn divergences(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.verdict == Verdict::Divergence)
    }

    pub fn qps(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.completed as f64 / seconds
        } else {
            0.0
        }
    }

    pub fn log(&self) {
        for entry in &self.entries {
            let key = entry.register.location();
            let store = entry.store.as_deref().unwrap_or("(nil)");
            match entry.verdict {
                Verdict::Divergence => warn!(
                    %key,
                    store,
                    shadow = %entry.shadow,
                    "store diverged from shadow"
                ),
                verdict => info!(%key, store, shadow = %entry.shadow, ?verdict, "reconciled"),
            }
        }

        info!(
            count = self.completed,
            qps = %format!("{:.6}", self.qps()),
            elapsed = ?self.elapsed,
            divergences = self.divergences().count(),
            "run finished"
        );
    }
}

// A missing key reads as zero on the store side, matching how its
// increment commands treat one.
fn compare(ctx: &DecimalContext, store: Option<&str>, shadow: &Decimal) -> Verdict {
    let observed = match store {
        None => ctx.zero(),
        Some(text) => match ctx.parse(text) {
            Ok(value) => value,
            Err(_) => return Verdict::Divergence,
        },
    };

    if &observed == shadow {
        Verdict::Match
    } else {
        Verdict::Divergence
    }
}
