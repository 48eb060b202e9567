//! Client side of the decimal store: one TCP session per caller.

use std::{io, sync::Arc};

use thiserror::Error;
use tokio::{
    io::BufReader,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{OwnedSemaphorePermit, Semaphore},
};
use tracing::debug;

use crate::resp::{Frame, read_frame, write_frame};

/// Failures talking to the store. Every variant is fatal for a run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: io::Error,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error: {0}")]
    Server(String),
}

impl StoreError {
    fn connection(message: impl Into<String>, source: io::Error) -> Self {
        StoreError::Connection {
            message: message.into(),
            source,
        }
    }

    fn from_read(source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::InvalidData => StoreError::Protocol(source.to_string()),
            _ => StoreError::connection("failed to read reply", source),
        }
    }
}

/// Hands out sessions to the store at `addr`.
///
/// With a non-zero `pool_size`, at most that many sessions are open at
/// once; further callers wait until a session is dropped.
#[derive(Clone, Debug)]
pub struct StorePool {
    addr: Arc<str>,
    limit: Option<Arc<Semaphore>>,
}

impl StorePool {
    pub fn new(addr: impl Into<String>, pool_size: usize) -> Self {
        let addr: String = addr.into();
        Self {
            addr: Arc::from(addr),
            limit: (pool_size > 0).then(|| Arc::new(Semaphore::new(pool_size))),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn session(&self) -> Result<Session, StoreError> {
        let permit = match &self.limit {
            Some(limit) => Some(Arc::clone(limit).acquire_owned().await.map_err(|_| {
                StoreError::connection(
                    "session pool closed",
                    io::Error::other("semaphore closed"),
                )
            })?),
            None => None,
        };

        let stream = TcpStream::connect(&*self.addr).await.map_err(|err| {
            StoreError::connection(format!("failed to connect to {}", self.addr), err)
        })?;
        stream
            .set_nodelay(true)
            .map_err(|err| StoreError::connection("failed to configure socket", err))?;

        debug!(addr = %self.addr, "store session opened");
        let (reader, writer) = stream.into_split();
        Ok(Session {
            reader: BufReader::new(reader),
            writer,
            _permit: permit,
        })
    }
}

/// A single connection to the store. Dropping it closes the socket and
/// returns its pool slot.
pub struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Session {
    /// Sends `name args...` and waits for the reply. Error replies become
    /// [`StoreError::Server`].
    pub async fn command<S>(&mut self, name: &str, args: &[S]) -> Result<Frame, StoreError>
    where
        S: AsRef<str>,
    {
        let request = Frame::command(
            std::iter::once(name).chain(args.iter().map(|arg| arg.as_ref())),
        );
        write_frame(&mut self.writer, &request)
            .await
            .map_err(|err| StoreError::connection(format!("failed to send {name}"), err))?;

        match read_frame(&mut self.reader).await {
            Ok(Some(Frame::Error(message))) => Err(StoreError::Server(message)),
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(StoreError::connection(
                format!("store closed the connection during {name}"),
                io::ErrorKind::UnexpectedEof.into(),
            )),
            Err(err) => Err(StoreError::from_read(err)),
        }
    }

    pub async fn ping(&mut self) -> Result<(), StoreError> {
        match self.command::<&str>("PING", &[]).await? {
            Frame::Simple(pong) if pong.eq_ignore_ascii_case("PONG") => Ok(()),
            Frame::Bulk(Some(pong)) if pong.eq_ignore_ascii_case(b"PONG") => Ok(()),
            other => Err(unexpected("PING", &other)),
        }
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        let reply = self.command("GET", &[key]).await?;
        optional_text("GET", reply)
    }

    pub async fn hget(&mut self, group: &str, field: &str) -> Result<Option<String>, StoreError> {
        let reply = self.command("HGET", &[group, field]).await?;
        optional_text("HGET", reply)
    }

    pub async fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        match self.command("SET", &[key, value]).await? {
            Frame::Simple(_) => Ok(()),
            other => Err(unexpected("SET", &other)),
        }
    }

    pub async fn hset(&mut self, group: &str, field: &str, value: &str) -> Result<(), StoreError> {
        match self.command("HSET", &[group, field, value]).await? {
            Frame::Integer(_) => Ok(()),
            other => Err(unexpected("HSET", &other)),
        }
    }

    pub async fn keys(&mut self, pattern: &str) -> Result<Vec<String>, StoreError> {
        match self.command("KEYS", &[pattern]).await? {
            Frame::Array(None) => Ok(Vec::new()),
            Frame::Array(Some(items)) => items
                .into_iter()
                .map(|item| match optional_text("KEYS", item)? {
                    Some(key) => Ok(key),
                    None => Err(StoreError::Protocol("KEYS returned a nil entry".into())),
                })
                .collect(),
            other => Err(unexpected("KEYS", &other)),
        }
    }

    /// Removes `key`, returning how many keys were deleted.
    pub async fn del(&mut self, key: &str) -> Result<i64, StoreError> {
        match self.command("DEL", &[key]).await? {
            Frame::Integer(removed) => Ok(removed),
            other => Err(unexpected("DEL", &other)),
        }
    }
}

fn optional_text(command: &str, reply: Frame) -> Result<Option<String>, StoreError> {
    match reply {
        Frame::Bulk(None) => Ok(None),
        Frame::Bulk(Some(data)) => String::from_utf8(data)
            .map(Some)
            .map_err(|_| StoreError::Protocol(format!("{command} returned non UTF-8 data"))),
        Frame::Simple(text) => Ok(Some(text)),
        other => Err(unexpected(command, &other)),
    }
}

fn unexpected(command: &str, reply: &Frame) -> StoreError {
    StoreError::Protocol(format!("unexpected reply to {command}: {reply:?}"))
}
