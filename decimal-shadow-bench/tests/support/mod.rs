//! In-process stand-in for the decimal store, speaking just enough RESP
//! for the harness.
#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    str::FromStr,
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Result, bail};
use bigdecimal::{BigDecimal, RoundingMode};
use decimal_shadow_bench::{
    decimal::{Decimal, DecimalContext},
    resp::{Frame, read_frame, write_frame},
    shutdown::Shutdown,
};
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    sync::Barrier,
    task::JoinHandle,
};

/// Holds every connection's first `bn.*` command until `parties`
/// connections have sent one, then asserts the armed shutdown before
/// replying.
///
/// Workers check for cancellation before each batch, so each of them runs
/// exactly one batch.
pub struct Gate {
    barrier: Barrier,
    shutdown: OnceLock<Shutdown>,
}

impl Gate {
    pub fn new(parties: usize) -> Self {
        Self {
            barrier: Barrier::new(parties),
            shutdown: OnceLock::new(),
        }
    }

    async fn pass(&self) {
        let shutdown = self
            .shutdown
            .get()
            .expect("gate must be armed before workers start");
        if self.barrier.wait().await.is_leader() {
            shutdown.trigger();
        }
        shutdown.cancelled().await;
    }
}

#[derive(Default)]
pub struct FakeOptions {
    pub gate: Option<Gate>,
    /// Reply with an error to every `bn.*` command after this many.
    pub fail_after: Option<u64>,
}

#[derive(Default)]
struct Data {
    strings: BTreeMap<String, String>,
    hashes: BTreeMap<String, BTreeMap<String, String>>,
}

struct StoreState {
    data: Mutex<Data>,
    ctx: DecimalContext,
    bn_commands: AtomicU64,
    admitted: AtomicU64,
    options: FakeOptions,
}

pub struct FakeStore {
    addr: SocketAddr,
    state: Arc<StoreState>,
    task: JoinHandle<()>,
}

impl FakeStore {
    pub async fn start() -> Result<Self> {
        Self::start_with(FakeOptions::default()).await
    }

    pub async fn start_with(options: FakeOptions) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(StoreState {
            data: Mutex::new(Data::default()),
            ctx: DecimalContext::decimal128(),
            bn_commands: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            options,
        });

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let _ = serve(stream, state).await;
                });
            }
        });

        Ok(Self { addr, state, task })
    }

    /// Points the gate at the run it should cancel.
    pub fn arm(&self, shutdown: Shutdown) {
        if let Some(gate) = &self.state.options.gate {
            let _ = gate.shutdown.set(shutdown);
        }
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// Number of `bn.*` commands answered successfully.
    pub fn bn_commands(&self) -> u64 {
        self.state.bn_commands.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().strings.get(key).cloned()
    }

    pub fn hget(&self, group: &str, field: &str) -> Option<String> {
        self.state
            .lock()
            .hashes
            .get(group)
            .and_then(|fields| fields.get(field).cloned())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.state
            .lock()
            .strings
            .insert(key.to_string(), value.to_string());
    }

    pub fn hset(&self, group: &str, field: &str, value: &str) {
        self.state
            .lock()
            .hashes
            .entry(group.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    /// Every key currently stored, strings and hashes alike, with hash
    /// fields flattened as `group[field]=value`.
    pub fn dump(&self) -> Vec<String> {
        let data = self.state.lock();
        let mut entries: Vec<String> = data
            .strings
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        for (group, fields) in &data.hashes {
            for (field, value) in fields {
                entries.push(format!("{group}[{field}]={value}"));
            }
        }
        entries
    }
}

impl Drop for FakeStore {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl StoreState {
    fn lock(&self) -> std::sync::MutexGuard<'_, Data> {
        self.data.lock().unwrap()
    }
}

async fn serve(stream: TcpStream, state: Arc<StoreState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut gated = state.options.gate.is_none();

    while let Some(frame) = read_frame(&mut reader).await? {
        let args = arguments(frame)?;
        let is_bn = args.first().is_some_and(|name| name.starts_with("bn."));

        if is_bn && !gated {
            if let Some(gate) = &state.options.gate {
                gate.pass().await;
            }
            gated = true;
        }

        let reply = if is_bn {
            bn_command(&state, &args)
        } else {
            plain_command(&state, &args)
        };
        write_frame(&mut writer, &reply).await?;
    }
    Ok(())
}

fn arguments(frame: Frame) -> Result<Vec<String>> {
    let Frame::Array(Some(items)) = frame else {
        bail!("expected a command array, got {frame:?}");
    };
    items
        .into_iter()
        .map(|item| match item {
            Frame::Bulk(Some(data)) => Ok(String::from_utf8(data)?),
            other => bail!("expected a bulk string argument, got {other:?}"),
        })
        .collect()
}

fn plain_command(state: &StoreState, args: &[String]) -> Frame {
    let mut data = state.lock();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["PING"] => Frame::Simple("PONG".into()),
        ["GET", key] => Frame::Bulk(data.strings.get(*key).map(|v| v.as_bytes().to_vec())),
        ["HGET", group, field] => Frame::Bulk(
            data.hashes
                .get(*group)
                .and_then(|fields| fields.get(*field))
                .map(|v| v.as_bytes().to_vec()),
        ),
        ["SET", key, value] => {
            data.strings.insert(key.to_string(), value.to_string());
            Frame::Simple("OK".into())
        }
        ["HSET", group, field, value] => {
            let fields = data.hashes.entry(group.to_string()).or_default();
            let created = fields.insert(field.to_string(), value.to_string()).is_none();
            Frame::Integer(i64::from(created))
        }
        ["KEYS", pattern] => {
            let prefix = pattern.trim_end_matches('*');
            let keys = data
                .strings
                .keys()
                .chain(data.hashes.keys())
                .filter(|key| key.starts_with(prefix))
                .map(|key| Frame::bulk(key))
                .collect();
            Frame::Array(Some(keys))
        }
        ["DEL", key] => {
            let removed =
                data.strings.remove(*key).is_some() || data.hashes.remove(*key).is_some();
            Frame::Integer(i64::from(removed))
        }
        _ => Frame::Error(format!("ERR unknown command {args:?}")),
    }
}

fn bn_command(state: &StoreState, args: &[String]) -> Frame {
    if let Some(limit) = state.options.fail_after {
        if state.admitted.fetch_add(1, Ordering::SeqCst) >= limit {
            return Frame::Error("ERR injected failure".into());
        }
    }

    match evaluate(state, args) {
        Ok(reply) => {
            state.bn_commands.fetch_add(1, Ordering::SeqCst);
            Frame::bulk(&reply)
        }
        Err(err) => Frame::Error(format!("ERR {err}")),
    }
}

fn evaluate(state: &StoreState, args: &[String]) -> Result<String> {
    let ctx = &state.ctx;
    let parse = |text: &str| -> Result<Decimal> { Ok(ctx.parse(text)?) };
    let one = ctx.one();

    let argv: Vec<&str> = args.iter().map(String::as_str).collect();
    let result = match argv.as_slice() {
        ["bn.add", a, b] => ctx.add(&parse(*a)?, &parse(*b)?).to_string(),
        ["bn.sub", a, b] => ctx.sub(&parse(*a)?, &parse(*b)?).to_string(),
        ["bn.mul", a, b] => (BigDecimal::from_str(*a)? * BigDecimal::from_str(*b)?).to_string(),
        ["bn.div", a, b] => {
            let divisor = BigDecimal::from_str(*b)?;
            if divisor == BigDecimal::from(0) {
                "NaN".to_string()
            } else {
                (BigDecimal::from_str(*a)? / divisor).to_string()
            }
        }
        ["bn.to_fixed", value, scale] => BigDecimal::from_str(*value)?
            .with_scale_round(scale.parse()?, RoundingMode::Down)
            .to_string(),
        ["bn.incr", key] => step_key(state, key, &one, true)?,
        ["bn.decr", key] => step_key(state, key, &one, false)?,
        ["bn.incrby", key, delta] => step_key(state, key, &parse(*delta)?, true)?,
        ["bn.decrby", key, delta] => step_key(state, key, &parse(*delta)?, false)?,
        ["bn.hincr", group, field] => step_field(state, group, field, &one, true)?,
        ["bn.hdecr", group, field] => step_field(state, group, field, &one, false)?,
        ["bn.hincrby", group, field, delta] => {
            step_field(state, group, field, &parse(*delta)?, true)?
        }
        ["bn.hdecrby", group, field, delta] => {
            step_field(state, group, field, &parse(*delta)?, false)?
        }
        _ => bail!("unsupported command {args:?}"),
    };
    Ok(result)
}

fn step(ctx: &DecimalContext, current: Option<&String>, delta: &Decimal, incr: bool) -> Result<String> {
    let current = match current {
        Some(text) => ctx.parse(text)?,
        None => ctx.zero(),
    };
    let next = if incr {
        ctx.add(&current, delta)
    } else {
        ctx.sub(&current, delta)
    };
    Ok(next.to_string())
}

fn step_key(state: &StoreState, key: &str, delta: &Decimal, incr: bool) -> Result<String> {
    let mut data = state.lock();
    let next = step(&state.ctx, data.strings.get(key), delta, incr)?;
    data.strings.insert(key.to_string(), next.clone());
    Ok(next)
}

fn step_field(
    state: &StoreState,
    group: &str,
    field: &str,
    delta: &Decimal,
    incr: bool,
) -> Result<String> {
    let mut data = state.lock();
    let fields = data.hashes.entry(group.to_string()).or_default();
    let next = step(&state.ctx, fields.get(field), delta, incr)?;
    fields.insert(field.to_string(), next.clone());
    Ok(next)
}
