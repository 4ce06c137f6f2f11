//! Queue broker - holds the queues of one process and serves them over a
//! Unix socket to every process forked from it.
//!
//! # Wire format
//! One JSON object per line in both directions, one request in flight per
//! connection:
//!
//! ```text
//! -> {"op":"put","queue":3,"frame":"{\"kind\":\"stop_serving\"}"}
//! <- {"status":"done"}
//! -> {"op":"get","queue":3,"block":false}
//! <- {"status":"item","frame":null}
//! ```
//!
//! The broker runs on its own thread with a current-thread tokio runtime,
//! one task per connection. A blocking `get` parks its connection task on
//! the queue's `Notify` until a put or a close.
//!
//! A queue that is closed and drained is dropped from the broker. Ids are
//! never reused, so a request naming an id below the next one that is no
//! longer held is answered as for a closed, empty queue.

use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, warn};

use crate::domain::BackendError;
use crate::ports::RawQueue;

pub type QueueId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum Request {
    Create,
    Put { queue: QueueId, frame: String },
    Get { queue: QueueId, block: bool },
    IsEmpty { queue: QueueId },
    Close { queue: QueueId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub(crate) enum Response {
    Created { queue: QueueId },
    Done,
    Item { frame: Option<String> },
    Empty { empty: bool },
    Failed { message: String },
}

struct BrokerQueue {
    items: VecDeque<String>,
    closed: bool,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<QueueId, BrokerQueue>,
    next_queue: QueueId,
}

impl BrokerState {
    fn create(&mut self) -> QueueId {
        let id = self.next_queue;
        self.next_queue += 1;
        self.queues.insert(
            id,
            BrokerQueue {
                items: VecDeque::new(),
                closed: false,
                notify: Arc::new(Notify::new()),
            },
        );
        id
    }

    fn is_retired(&self, queue: QueueId) -> bool {
        queue < self.next_queue && !self.queues.contains_key(&queue)
    }

    fn retire_if_drained(&mut self, queue: QueueId) {
        if self
            .queues
            .get(&queue)
            .is_some_and(|q| q.closed && q.items.is_empty())
        {
            self.queues.remove(&queue);
            debug!(queue, "queue retired");
        }
    }
}

/// A running broker, owned by the process that started it.
#[derive(Debug)]
pub(crate) struct Broker {
    pid: u32,
    socket: PathBuf,
}

impl Broker {
    /// Bind `socket` and serve it from a dedicated thread.
    pub(crate) fn spawn(socket: PathBuf) -> Result<Self, BackendError> {
        let listener = std::os::unix::net::UnixListener::bind(&socket)?;
        listener.set_nonblocking(true)?;
        std::thread::Builder::new()
            .name("queue-broker".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(error = %e, "cannot build queue broker runtime");
                        return;
                    }
                };
                runtime.block_on(serve(listener));
            })?;
        debug!(socket = %socket.display(), "queue broker started");
        Ok(Self {
            pid: std::process::id(),
            socket,
        })
    }

    /// Whether this broker belongs to the calling process (and not to an
    /// ancestor the caller was forked from).
    pub(crate) fn is_local(&self) -> bool {
        self.pid == std::process::id()
    }

    pub(crate) fn create_queue(&self) -> Result<ProcessQueue, BackendError> {
        let mut connection = Connection::open(&self.socket)?;
        match connection.request(&Request::Create)? {
            Response::Created { queue } => Ok(ProcessQueue {
                socket: self.socket.clone(),
                id: queue,
                connection: StdMutex::new(Some(connection)),
            }),
            other => Err(unexpected(other)),
        }
    }
}

async fn serve(listener: std::os::unix::net::UnixListener) {
    let listener = match UnixListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "cannot register queue broker socket");
            return;
        }
    };
    let state = Arc::new(Mutex::new(BrokerState::default()));
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, state).await {
                        debug!(error = %e, "queue broker connection ended");
                    }
                });
            }
            Err(e) => warn!(error = %e, "queue broker accept failed"),
        }
    }
}

async fn serve_connection(
    stream: tokio::net::UnixStream,
    state: Arc<Mutex<BrokerState>>,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = tokio::io::BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle(&state, request).await,
            Err(e) => Response::Failed {
                message: format!("malformed request: {e}"),
            },
        };
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        write.write_all(out.as_bytes()).await?;
    }
    Ok(())
}

async fn handle(state: &Mutex<BrokerState>, request: Request) -> Response {
    match request {
        Request::Create => Response::Created {
            queue: state.lock().await.create(),
        },
        Request::Put { queue, frame } => {
            let mut guard = state.lock().await;
            if guard.is_retired(queue) {
                debug!(queue, "put on a retired queue dropped");
                return Response::Done;
            }
            let Some(q) = guard.queues.get_mut(&queue) else {
                return no_such_queue(queue);
            };
            q.items.push_back(frame);
            q.notify.notify_waiters();
            Response::Done
        }
        Request::Get { queue, block } => take(state, queue, block).await,
        Request::IsEmpty { queue } => {
            let guard = state.lock().await;
            match guard.queues.get(&queue) {
                Some(q) => Response::Empty {
                    empty: q.items.is_empty(),
                },
                None if guard.is_retired(queue) => Response::Empty { empty: true },
                None => no_such_queue(queue),
            }
        }
        Request::Close { queue } => {
            let mut guard = state.lock().await;
            if guard.is_retired(queue) {
                return Response::Done;
            }
            let Some(q) = guard.queues.get_mut(&queue) else {
                return no_such_queue(queue);
            };
            q.closed = true;
            q.notify.notify_waiters();
            guard.retire_if_drained(queue);
            Response::Done
        }
    }
}

async fn take(state: &Mutex<BrokerState>, queue: QueueId, block: bool) -> Response {
    loop {
        let notify = {
            let guard = state.lock().await;
            match guard.queues.get(&queue) {
                Some(q) => Arc::clone(&q.notify),
                None if guard.is_retired(queue) => return Response::Item { frame: None },
                None => return no_such_queue(queue),
            }
        };
        // Register interest before looking, so a put landing between the
        // check and the await still wakes us.
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        {
            let mut guard = state.lock().await;
            if guard.is_retired(queue) {
                return Response::Item { frame: None };
            }
            let Some(q) = guard.queues.get_mut(&queue) else {
                return no_such_queue(queue);
            };
            if let Some(frame) = q.items.pop_front() {
                guard.retire_if_drained(queue);
                return Response::Item { frame: Some(frame) };
            }
            if q.closed || !block {
                return Response::Item { frame: None };
            }
        }
        notified.await;
    }
}

fn no_such_queue(queue: QueueId) -> Response {
    Response::Failed {
        message: format!("no such queue {queue}"),
    }
}

fn unexpected(response: Response) -> BackendError {
    match response {
        Response::Failed { message } => BackendError::Protocol(message),
        other => BackendError::Protocol(format!("unexpected broker response {other:?}")),
    }
}

/// Client side of one broker connection. Tied to the process that opened
/// it: a forked child must not share the parent's socket.
struct Connection {
    pid: u32,
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl Connection {
    fn open(socket: &Path) -> Result<Self, BackendError> {
        let writer = UnixStream::connect(socket)?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(Self {
            pid: std::process::id(),
            reader,
            writer,
        })
    }

    fn request(&mut self, request: &Request) -> Result<Response, BackendError> {
        let mut line = serde_json::to_string(request).map_err(BackendError::Serialize)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        let mut reply = String::new();
        if self.reader.read_line(&mut reply)? == 0 {
            return Err(BackendError::Protocol("broker closed the connection".into()));
        }
        serde_json::from_str(&reply).map_err(BackendError::Deserialize)
    }
}

/// Handle on a broker queue. Cheap to copy across `fork`: only the socket
/// path and the queue id matter, connections are reopened per process.
pub struct ProcessQueue {
    socket: PathBuf,
    id: QueueId,
    connection: StdMutex<Option<Connection>>,
}

impl std::fmt::Debug for ProcessQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessQueue")
            .field("socket", &self.socket)
            .field("id", &self.id)
            .finish()
    }
}

impl ProcessQueue {
    fn request(&self, request: &Request) -> Result<Response, BackendError> {
        let mut guard = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let pid = std::process::id();
        if guard.as_ref().is_none_or(|c| c.pid != pid) {
            *guard = Some(Connection::open(&self.socket)?);
        }
        let Some(connection) = guard.as_mut() else {
            return Err(BackendError::Protocol("no broker connection".into()));
        };
        let result = connection.request(request);
        if result.is_err() {
            *guard = None;
        }
        result
    }

    fn item(response: Response) -> Result<Option<String>, BackendError> {
        match response {
            Response::Item { frame } => Ok(frame),
            other => Err(unexpected(other)),
        }
    }

    fn done(response: Response) -> Result<(), BackendError> {
        match response {
            Response::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

impl RawQueue for ProcessQueue {
    fn put(&self, frame: String) -> Result<(), BackendError> {
        Self::done(self.request(&Request::Put {
            queue: self.id,
            frame,
        })?)
    }

    fn get_nowait(&self) -> Result<Option<String>, BackendError> {
        Self::item(self.request(&Request::Get {
            queue: self.id,
            block: false,
        })?)
    }

    fn get(&self) -> Result<Option<String>, BackendError> {
        // A dedicated connection: the shared one must stay usable by other
        // threads of this process while we wait.
        let mut connection = Connection::open(&self.socket)?;
        Self::item(connection.request(&Request::Get {
            queue: self.id,
            block: true,
        })?)
    }

    fn is_empty(&self) -> Result<bool, BackendError> {
        match self.request(&Request::IsEmpty { queue: self.id })? {
            Response::Empty { empty } => Ok(empty),
            other => Err(unexpected(other)),
        }
    }

    fn close(&self) -> Result<(), BackendError> {
        Self::done(self.request(&Request::Close { queue: self.id })?)
    }
}
