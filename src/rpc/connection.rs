//! Bidirectional JSON-RPC connection to the engine process.
//!
//! `CoreConnection` spawns the engine, reads its stdout on a dedicated
//! reader thread and hands every inbound message to a single delivery
//! thread that owns the `RpcHandler`. Sends may originate from any thread.
//!
//! ```text
//!  engine stdout ──► reader thread ──► FrameBuffer ──► classify
//!                                                        │
//!            ┌──────────────── Response: pending.remove(id)
//!            ▼                 Request / Notification
//!     delivery thread ◄──────────────────┘
//!       handler.handle(..), response callbacks
//! ```
//!
//! There is no ordering guarantee between a notification and the response
//! to a concurrently outstanding blocking call: `send_request_sync` wakes on
//! its own thread, so a notification the engine wrote after the response may
//! reach the handler first.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

use crate::error::RpcError;
use crate::rpc::framing::{write_frame, FrameBuffer};
use crate::rpc::message::{
    Message, OutgoingNotification, OutgoingRequest, OutgoingResponse, RequestId, ResponseResult,
};

/// Read chunk size for the engine's stdout.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Completion callback for an outstanding request.
pub type ResponseCallback = Box<dyn FnOnce(ResponseResult) + Send + 'static>;

// =============================================================================
// Handler Trait
// =============================================================================

/// Receives requests and notifications initiated by the engine.
///
/// The handler is owned by the delivery thread and is only ever called from
/// there, so it may keep mutable state (line caches, style tables) without
/// further locking. The returned value is sent back as the `result` of a
/// request; for notifications it is ignored.
///
/// Errors and panics are caught at the dispatch boundary and logged.
pub trait RpcHandler: Send + 'static {
    fn handle(&mut self, method: &str, params: Value) -> anyhow::Result<Option<Value>>;
}

impl<F> RpcHandler for F
where
    F: FnMut(&str, Value) -> anyhow::Result<Option<Value>> + Send + 'static,
{
    fn handle(&mut self, method: &str, params: Value) -> anyhow::Result<Option<Value>> {
        self(method, params)
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// Work scheduled onto the delivery thread.
enum Delivery {
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Completion {
        callback: ResponseCallback,
        result: ResponseResult,
    },
}

/// Outstanding requests keyed by id.
///
/// `closed` lives under the same lock so that a request can never be
/// registered after the reader has drained the table on end of stream.
#[derive(Default)]
struct PendingTable {
    calls: HashMap<RequestId, ResponseCallback>,
    closed: bool,
}

struct Shared {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    pending: Mutex<PendingTable>,
    next_id: AtomicU64,
    delivery_thread: OnceLock<ThreadId>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
            pending: Mutex::new(PendingTable::default()),
            next_id: AtomicU64::new(0),
            delivery_thread: OnceLock::new(),
        }
    }

    fn write<T: Serialize>(&self, message: &T) -> Result<(), RpcError> {
        let mut guard = lock(&self.writer);
        let writer = guard.as_mut().ok_or(RpcError::Disconnected)?;
        write_frame(writer, message)?;
        Ok(())
    }

    /// Allocate an id and register its callback.
    fn register(&self, callback: ResponseCallback) -> Result<RequestId, RpcError> {
        let mut pending = lock(&self.pending);
        if pending.closed {
            return Err(RpcError::Disconnected);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        pending.calls.insert(id, callback);
        Ok(id)
    }

    fn take(&self, id: RequestId) -> Option<ResponseCallback> {
        lock(&self.pending).calls.remove(&id)
    }

    /// Mark the connection closed and hand back every unresolved callback.
    fn close(&self) -> Vec<(RequestId, ResponseCallback)> {
        let mut pending = lock(&self.pending);
        pending.closed = true;
        pending.calls.drain().collect()
    }

    fn is_closed(&self) -> bool {
        lock(&self.pending).closed
    }

    fn on_delivery_thread(&self) -> bool {
        self.delivery_thread.get() == Some(&thread::current().id())
    }
}

// =============================================================================
// Peer (send side)
// =============================================================================

/// Cloneable send half of a connection.
///
/// All send operations are available from any thread. Clones share the
/// same id counter and pending table.
#[derive(Clone)]
pub struct RpcPeer {
    shared: Arc<Shared>,
}

impl RpcPeer {
    /// Send a notification. Never waits for a reply.
    pub fn send_notification(&self, method: &str, params: Value) -> Result<(), RpcError> {
        trace!("-> notification {}", method);
        self.shared.write(&OutgoingNotification {
            method,
            params: &params,
        })
    }

    /// Send a request and return its id immediately.
    ///
    /// `on_complete` runs later on the delivery thread with the matched
    /// result. If the frame cannot be written the callback is discarded
    /// and the error is returned here instead.
    pub fn send_request_async<F>(
        &self,
        method: &str,
        params: Value,
        on_complete: F,
    ) -> Result<RequestId, RpcError>
    where
        F: FnOnce(ResponseResult) + Send + 'static,
    {
        let id = self.shared.register(Box::new(on_complete))?;
        trace!("-> request {} (id: {})", method, id);

        let written = self.shared.write(&OutgoingRequest {
            id,
            method,
            params: &params,
        });
        if let Err(e) = written {
            self.shared.take(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Send a request and block the calling thread until the response
    /// arrives.
    ///
    /// Returns `RpcError::WouldDeadlock` when called from the delivery
    /// thread, since that thread is the one that would have to deliver the
    /// response. Must not be called from inside an async runtime; use
    /// [`RpcPeer::request`] there. There is no timeout: if the engine stays
    /// alive but never answers, this blocks indefinitely.
    pub fn send_request_sync(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        if self.shared.on_delivery_thread() {
            return Err(RpcError::WouldDeadlock(method.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        self.send_request_async(method, params, move |result| {
            let _ = tx.send(result);
        })?;

        rx.blocking_recv().map_err(|_| RpcError::Disconnected)?
    }

    /// Send a request and await the response without blocking a thread.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let (tx, rx) = oneshot::channel();
        self.send_request_async(method, params, move |result| {
            let _ = tx.send(result);
        })?;

        rx.await.map_err(|_| RpcError::Disconnected)?
    }

    /// Whether the engine's output has reached end of stream.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        lock(&self.shared.pending).calls.len()
    }
}

// =============================================================================
// Connection
// =============================================================================

/// Connection to a running engine.
///
/// # Process Cleanup Safety
/// The connection owns the child process. On drop it closes the engine's
/// stdin, waits briefly for it to exit and kills it otherwise, so no
/// orphaned engine is left behind.
pub struct CoreConnection {
    peer: RpcPeer,
    child: Option<Child>,
}

impl CoreConnection {
    /// Spawn the engine at `path` and start the reader and delivery threads.
    ///
    /// The engine is launched with no arguments; stdin and stdout are piped
    /// and stderr is inherited.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Spawn` if the executable is missing or cannot be
    /// launched.
    pub fn spawn<H: RpcHandler>(path: impl AsRef<Path>, handler: H) -> Result<Self, RpcError> {
        let path = path.as_ref();
        info!("Starting engine: {}", path.display());

        let spawn_error = |source: std::io::Error| RpcError::Spawn {
            path: path.display().to_string(),
            source,
        };

        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(spawn_error)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("engine stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("engine stdout not captured")))?;

        match Self::start(stdout, stdin, handler) {
            Ok(mut connection) => {
                connection.child = Some(child);
                Ok(connection)
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    /// Run the connection over arbitrary byte streams instead of a child
    /// process.
    pub fn from_streams<R, W, H>(reader: R, writer: W, handler: H) -> Result<Self, RpcError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
        H: RpcHandler,
    {
        Self::start(reader, writer, handler)
    }

    fn start<R, W, H>(reader: R, writer: W, handler: H) -> Result<Self, RpcError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
        H: RpcHandler,
    {
        let shared = Arc::new(Shared::new(Box::new(writer)));
        let (delivery_tx, delivery_rx) = mpsc::channel();

        let delivery_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("xi-delivery".to_string())
            .spawn(move || delivery_loop(handler, delivery_shared, delivery_rx))?;

        let reader_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("xi-reader".to_string())
            .spawn(move || reader_loop(reader, reader_shared, delivery_tx))?;

        Ok(Self {
            peer: RpcPeer { shared },
            child: None,
        })
    }

    /// A cloneable send handle for use from other threads.
    pub fn peer(&self) -> RpcPeer {
        self.peer.clone()
    }

    pub fn send_notification(&self, method: &str, params: Value) -> Result<(), RpcError> {
        self.peer.send_notification(method, params)
    }

    pub fn send_request_async<F>(
        &self,
        method: &str,
        params: Value,
        on_complete: F,
    ) -> Result<RequestId, RpcError>
    where
        F: FnOnce(ResponseResult) + Send + 'static,
    {
        self.peer.send_request_async(method, params, on_complete)
    }

    pub fn send_request_sync(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.peer.send_request_sync(method, params)
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.peer.request(method, params).await
    }

    pub fn is_closed(&self) -> bool {
        self.peer.is_closed()
    }
}

impl Drop for CoreConnection {
    fn drop(&mut self) {
        // Closing stdin is the engine's signal to exit.
        lock(&self.peer.shared.writer).take();

        let Some(child) = self.child.as_mut() else {
            return;
        };

        for _ in 0..10 {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Engine exited: {}", status);
                    return;
                }
                Ok(None) => thread::sleep(Duration::from_millis(50)),
                Err(e) => {
                    warn!("Error waiting for engine: {}", e);
                    return;
                }
            }
        }

        warn!("Engine didn't exit after stdin closed, killing");
        let _ = child.kill();
        let _ = child.wait();
    }
}

// =============================================================================
// Threads
// =============================================================================

/// Reader thread: reassemble frames and route them.
fn reader_loop<R: Read>(mut reader: R, shared: Arc<Shared>, delivery_tx: Sender<Delivery>) {
    let mut frames = FrameBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => {
                info!("Engine closed its output");
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("Failed to read from engine: {}", e);
                break;
            }
        };

        for frame in frames.push(&chunk[..n]) {
            route_frame(&frame, &shared, &delivery_tx);
        }
    }

    let abandoned = shared.close();
    if !abandoned.is_empty() {
        warn!(
            "{} request(s) still pending at end of stream",
            abandoned.len()
        );
    }
    for (_, callback) in abandoned {
        let _ = delivery_tx.send(Delivery::Completion {
            callback,
            result: Err(RpcError::Disconnected),
        });
    }
}

/// Classify one frame and hand it to the delivery thread.
fn route_frame(frame: &[u8], shared: &Shared, delivery_tx: &Sender<Delivery>) {
    if frame.iter().all(u8::is_ascii_whitespace) {
        return;
    }

    let message = match Message::from_slice(frame) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                "Dropping frame from engine: {} ({})",
                e,
                String::from_utf8_lossy(frame)
            );
            return;
        }
    };

    let delivery = match message {
        Message::Response { id, result } => match shared.take(id) {
            Some(callback) => Delivery::Completion { callback, result },
            None => {
                warn!("Dropping response for unknown request id {}", id);
                return;
            }
        },
        Message::Request { id, method, params } => {
            trace!("<- request {} (id: {})", method, id);
            Delivery::Request { id, method, params }
        }
        Message::Notification { method, params } => {
            trace!("<- notification {}", method);
            Delivery::Notification { method, params }
        }
    };

    if delivery_tx.send(delivery).is_err() {
        error!("Delivery thread has stopped; dropping inbound message");
    }
}

/// Delivery thread: the only place the handler and callbacks run.
fn delivery_loop<H: RpcHandler>(mut handler: H, shared: Arc<Shared>, rx: Receiver<Delivery>) {
    let _ = shared.delivery_thread.set(thread::current().id());

    for delivery in rx {
        match delivery {
            Delivery::Completion { callback, result } => {
                if panic::catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                    error!("Response callback panicked");
                }
            }
            Delivery::Notification { method, params } => {
                dispatch(&mut handler, &method, params);
            }
            Delivery::Request { id, method, params } => {
                let result = dispatch(&mut handler, &method, params).unwrap_or(Value::Null);
                if let Err(e) = shared.write(&OutgoingResponse {
                    id,
                    result: &result,
                }) {
                    error!("Failed to answer engine request {} ({}): {}", id, method, e);
                }
            }
        }
    }

    debug!("Delivery thread exiting");
}

fn dispatch<H: RpcHandler>(handler: &mut H, method: &str, params: Value) -> Option<Value> {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(method, params))) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!("Handler failed for '{}': {:#}", method, e);
            None
        }
        Err(_) => {
            error!("Handler panicked while handling '{}'", method);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashSet;
    use std::io::{BufRead, BufReader};
    use std::os::unix::net::UnixStream;
    use std::sync::mpsc::RecvTimeoutError;

    /// Test timeout to prevent hanging tests.
    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Fake engine end of a socket pair: reads frames the client wrote and
    /// writes frames back.
    struct FakeEngine {
        reader: BufReader<UnixStream>,
        writer: UnixStream,
    }

    impl FakeEngine {
        fn recv(&mut self) -> Value {
            let mut line = String::new();
            self.reader.read_line(&mut line).expect("engine read failed");
            serde_json::from_str(&line).expect("client wrote invalid JSON")
        }

        fn send_raw(&mut self, bytes: &[u8]) {
            self.writer.write_all(bytes).expect("engine write failed");
            self.writer.flush().unwrap();
        }

        fn send(&mut self, value: Value) {
            let mut frame = serde_json::to_vec(&value).unwrap();
            frame.push(b'\n');
            self.send_raw(&frame);
        }
    }

    /// Connect a client to a fake engine. Every handler call is reported
    /// on the returned channel as `(method, params)`.
    fn connect<H: RpcHandler>(handler: H) -> (CoreConnection, FakeEngine) {
        let (client_side, engine_side) = UnixStream::pair().expect("socket pair");
        let client_read = client_side.try_clone().unwrap();
        let conn = CoreConnection::from_streams(client_read, client_side, handler)
            .expect("connection should start");
        let engine = FakeEngine {
            reader: BufReader::new(engine_side.try_clone().unwrap()),
            writer: engine_side,
        };
        (conn, engine)
    }

    fn recording_handler() -> (impl RpcHandler, Receiver<(String, Value)>) {
        let (tx, rx) = mpsc::channel();
        let handler = move |method: &str, params: Value| -> anyhow::Result<Option<Value>> {
            let _ = tx.send((method.to_string(), params));
            Ok(Some(json!("handled")))
        };
        (handler, rx)
    }

    #[test]
    fn test_notification_wire_shape() {
        let (handler, _rx) = recording_handler();
        let (conn, mut engine) = connect(handler);

        conn.send_notification("close_view", json!({"view_id": "view-id-1"}))
            .unwrap();

        assert_eq!(
            engine.recv(),
            json!({"method": "close_view", "params": {"view_id": "view-id-1"}})
        );
    }

    #[test]
    fn test_request_ids_start_at_zero_and_increase() {
        let (handler, _rx) = recording_handler();
        let (conn, mut engine) = connect(handler);

        for expected in 0..3u64 {
            let id = conn
                .send_request_async("new_view", json!({}), |_| {})
                .unwrap();
            assert_eq!(id, expected);
            let frame = engine.recv();
            assert_eq!(frame["id"], json!(expected));
            assert_eq!(frame["method"], "new_view");
        }
        assert_eq!(conn.peer().pending_requests(), 3);
    }

    #[test]
    fn test_async_callbacks_matched_by_id() {
        let (handler, _rx) = recording_handler();
        let (conn, mut engine) = connect(handler);
        let (done_tx, done_rx) = mpsc::channel();

        let count = 8u64;
        for i in 0..count {
            let done_tx = done_tx.clone();
            conn.send_request_async("echo", json!({"n": i}), move |result| {
                let _ = done_tx.send((i, result.unwrap()));
            })
            .unwrap();
        }

        let mut requests: Vec<Value> = (0..count).map(|_| engine.recv()).collect();
        // Answer in reverse order.
        requests.reverse();
        for req in requests {
            let n = req["params"]["n"].as_u64().unwrap();
            engine.send(json!({"id": req["id"], "result": n * 10}));
        }

        let mut seen = Vec::new();
        for _ in 0..count {
            let (i, result) = done_rx.recv_timeout(TEST_TIMEOUT).expect("callback missing");
            assert_eq!(result, json!(i * 10));
            seen.push(i);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..count).collect::<Vec<_>>());
        assert!(matches!(
            done_rx.recv_timeout(Duration::from_millis(100)),
            Err(RecvTimeoutError::Timeout)
        ));
        assert_eq!(conn.peer().pending_requests(), 0);
    }

    #[test]
    fn test_concurrent_async_requests_from_many_threads() {
        const THREADS: u64 = 8;
        const PER_THREAD: u64 = 16;
        let total = (THREADS * PER_THREAD) as usize;

        let (handler, _rx) = recording_handler();
        let (conn, mut engine) = connect(handler);
        let (done_tx, done_rx) = mpsc::channel();

        // Echo params back, answering the newest request first.
        let engine_thread = thread::spawn(move || {
            let mut requests: Vec<Value> = (0..total).map(|_| engine.recv()).collect();
            requests.reverse();
            for req in requests {
                engine.send(json!({"id": req["id"], "result": req["params"]}));
            }
            engine
        });

        let issuers: Vec<_> = (0..THREADS)
            .map(|t| {
                let peer = conn.peer();
                let done_tx = done_tx.clone();
                thread::spawn(move || {
                    (0..PER_THREAD)
                        .map(|s| {
                            let done_tx = done_tx.clone();
                            peer.send_request_async(
                                "echo",
                                json!({"thread": t, "seq": s}),
                                move |result| {
                                    let _ = done_tx.send(((t, s), result.unwrap()));
                                },
                            )
                            .unwrap()
                        })
                        .collect::<Vec<RequestId>>()
                })
            })
            .collect();

        let mut ids: Vec<RequestId> = issuers
            .into_iter()
            .flat_map(|issuer| issuer.join().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..total as u64).collect::<Vec<_>>());

        let mut seen = HashSet::new();
        for _ in 0..total {
            let ((t, s), result) = done_rx.recv_timeout(TEST_TIMEOUT).expect("callback missing");
            assert_eq!(result, json!({"thread": t, "seq": s}));
            assert!(seen.insert((t, s)), "callback for {:?} fired twice", (t, s));
        }
        assert!(matches!(
            done_rx.recv_timeout(Duration::from_millis(100)),
            Err(RecvTimeoutError::Timeout)
        ));
        assert_eq!(conn.peer().pending_requests(), 0);
        engine_thread.join().unwrap();
    }

    #[test]
    fn test_sync_request_returns_result() {
        let (handler, _rx) = recording_handler();
        let (conn, mut engine) = connect(handler);

        let engine_thread = thread::spawn(move || {
            let req = engine.recv();
            assert_eq!(req["method"], "new_view");
            engine.send(json!({"id": req["id"], "result": "view-id-1"}));
            engine
        });

        let result = conn.send_request_sync("new_view", json!({})).unwrap();
        assert_eq!(result, json!("view-id-1"));
        engine_thread.join().unwrap();
    }

    #[test]
    fn test_sync_request_surfaces_engine_error() {
        let (handler, _rx) = recording_handler();
        let (conn, mut engine) = connect(handler);

        let engine_thread = thread::spawn(move || {
            let req = engine.recv();
            engine.send(json!({
                "id": req["id"],
                "error": {"code": -32601, "message": "Method not found"}
            }));
            engine
        });

        let err = conn.send_request_sync("bogus", json!({})).unwrap_err();
        assert!(matches!(err, RpcError::Remote { code: -32601, .. }));
        engine_thread.join().unwrap();
    }

    #[test]
    fn test_sync_request_and_notification_both_delivered() {
        let (handler, rx) = recording_handler();
        let (conn, mut engine) = connect(handler);

        let engine_thread = thread::spawn(move || {
            let req = engine.recv();
            engine.send(json!({"id": req["id"], "result": 1}));
            engine.send(json!({"method": "alert", "params": {"msg": "after"}}));
            engine
        });

        let result = conn.send_request_sync("m", json!({})).unwrap();
        assert_eq!(result, json!(1));

        let (method, params) = rx.recv_timeout(TEST_TIMEOUT).expect("notification missing");
        assert_eq!(method, "alert");
        assert_eq!(params["msg"], "after");
        engine_thread.join().unwrap();
    }

    #[test]
    fn test_engine_request_is_answered_with_handler_result() {
        let (handler, rx) = recording_handler();
        let (_conn, mut engine) = connect(handler);

        engine.send(json!({"id": 42, "method": "measure_width", "params": []}));

        let (method, _) = rx.recv_timeout(TEST_TIMEOUT).unwrap();
        assert_eq!(method, "measure_width");
        assert_eq!(engine.recv(), json!({"id": 42, "result": "handled"}));
    }

    #[test]
    fn test_notification_never_answered() {
        let (handler, rx) = recording_handler();
        let (conn, mut engine) = connect(handler);

        engine.send(json!({"method": "scroll_to", "params": {"line": 1, "col": 0}}));
        rx.recv_timeout(TEST_TIMEOUT).unwrap();

        // The next frame the engine sees must be ours, not a reply.
        conn.send_notification("marker", Value::Null).unwrap();
        assert_eq!(engine.recv()["method"], "marker");
    }

    #[test]
    fn test_malformed_and_unmatched_frames_are_skipped() {
        let (handler, rx) = recording_handler();
        let (_conn, mut engine) = connect(handler);

        engine.send_raw(b"this is not json\n");
        engine.send_raw(b"\n");
        engine.send(json!({"id": 999, "result": "nobody asked"}));
        engine.send(json!([1, 2]));
        engine.send(json!({"method": "alert", "params": {"msg": "still alive"}}));

        let (method, params) = rx.recv_timeout(TEST_TIMEOUT).unwrap();
        assert_eq!(method, "alert");
        assert_eq!(params["msg"], "still alive");
    }

    #[test]
    fn test_frame_split_across_writes() {
        let (handler, rx) = recording_handler();
        let (_conn, mut engine) = connect(handler);

        let frame = br#"{"method":"def_style","params":{"id":2,"fg_color":4278190335}}
"#;
        engine.send_raw(&frame[..3]);
        thread::sleep(Duration::from_millis(20));
        engine.send_raw(&frame[3..30]);
        thread::sleep(Duration::from_millis(20));
        engine.send_raw(&frame[30..]);

        let (method, params) = rx.recv_timeout(TEST_TIMEOUT).unwrap();
        assert_eq!(method, "def_style");
        assert_eq!(params, json!({"id": 2, "fg_color": 4278190335u64}));
    }

    #[test]
    fn test_handler_error_and_panic_do_not_stop_delivery() {
        let (tx, rx) = mpsc::channel();
        let handler = move |method: &str, _params: Value| -> anyhow::Result<Option<Value>> {
            match method {
                "fail" => anyhow::bail!("handler failure"),
                "boom" => panic!("handler panic"),
                _ => {
                    let _ = tx.send(method.to_string());
                    Ok(None)
                }
            }
        };
        let (_conn, mut engine) = connect(handler);

        engine.send(json!({"method": "fail"}));
        engine.send(json!({"method": "boom"}));
        engine.send(json!({"method": "ok"}));

        assert_eq!(rx.recv_timeout(TEST_TIMEOUT).unwrap(), "ok");
    }

    #[test]
    fn test_request_answered_with_null_when_handler_fails() {
        let handler = |_: &str, _: Value| -> anyhow::Result<Option<Value>> {
            anyhow::bail!("nope")
        };
        let (_conn, mut engine) = connect(handler);

        engine.send(json!({"id": 5, "method": "anything"}));
        assert_eq!(engine.recv(), json!({"id": 5, "result": null}));
    }

    #[test]
    fn test_sync_call_from_delivery_thread_is_rejected() {
        let peer_slot: Arc<Mutex<Option<RpcPeer>>> = Arc::new(Mutex::new(None));
        let (tx, rx) = mpsc::channel();

        let slot = Arc::clone(&peer_slot);
        let handler = move |_: &str, _: Value| -> anyhow::Result<Option<Value>> {
            let peer = slot.lock().unwrap().clone().expect("peer set");
            let _ = tx.send(peer.send_request_sync("nested", Value::Null));
            Ok(None)
        };
        let (conn, mut engine) = connect(handler);
        *peer_slot.lock().unwrap() = Some(conn.peer());

        engine.send(json!({"method": "trigger"}));

        let result = rx.recv_timeout(TEST_TIMEOUT).expect("handler should not hang");
        assert!(matches!(result, Err(RpcError::WouldDeadlock(m)) if m == "nested"));
    }

    #[test]
    fn test_end_of_stream_fails_pending_and_later_sends() {
        let (handler, _rx) = recording_handler();
        let (conn, engine) = connect(handler);
        let (done_tx, done_rx) = mpsc::channel();

        conn.send_request_async("never_answered", json!({}), move |result| {
            let _ = done_tx.send(result);
        })
        .unwrap();

        engine
            .writer
            .shutdown(std::net::Shutdown::Write)
            .expect("shutdown");

        let result = done_rx.recv_timeout(TEST_TIMEOUT).unwrap();
        assert!(matches!(result, Err(RpcError::Disconnected)));
        assert!(conn.is_closed());
        assert!(matches!(
            conn.send_request_async("late", json!({}), |_| {}),
            Err(RpcError::Disconnected)
        ));
        drop(engine);
    }

    #[tokio::test]
    async fn test_async_request_awaits_response() {
        let (handler, _rx) = recording_handler();
        let (conn, mut engine) = connect(handler);

        let engine_thread = thread::spawn(move || {
            let req = engine.recv();
            engine.send(json!({"id": req["id"], "result": {"ok": true}}));
            engine
        });

        let result = conn.request("plugin_rpc", json!({})).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
        engine_thread.join().unwrap();
    }

    #[test]
    fn test_spawn_missing_executable_fails() {
        let (handler, _rx) = recording_handler();
        let result = CoreConnection::spawn("/nonexistent/path/to/xi-core", handler);
        match result {
            Err(RpcError::Spawn { path, .. }) => assert!(path.contains("xi-core")),
            Err(other) => panic!("Expected Spawn error, got: {}", other),
            Ok(_) => panic!("Spawn should fail for a missing executable"),
        }
    }
}
