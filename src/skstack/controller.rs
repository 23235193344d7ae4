// Serial command/response controller
// SPDX-License-Identifier: MPL-2.0
//
use crate::skstack::command::Command;
use crate::skstack::demux::{LineDemux, Output};
use crate::skstack::event::{Event, EventKind};
use crate::skstack::response::Response;
use serialport::{DataBits, StopBits};
use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub const BAUD_RATE: u32 = 115_200;

/// A watcher predicate gets this long to be satisfied before `send` gives
/// up on it. Missing the deadline is logged, never fatal.
pub const WATCH_TIMEOUT: Duration = Duration::from_secs(10);

// The module answers every command with exactly one terminal line; waiting
// longer than this on the writer side is worth a log line.
const ACK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum Error {
    #[error("serial port closed")]
    Closed,
    #[error("serial port: {0}")]
    Port(#[from] serialport::Error),
}

/// Transient per-command event predicate.
pub type Condition = Box<dyn Fn(&Event) -> bool + Send + 'static>;

type Handler = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

struct Shared {
    handlers: Mutex<HashMap<EventKind, Vec<Handler>>>,
    watchers: Mutex<HashMap<u64, mpsc::UnboundedSender<Event>>>,
    next_watcher: AtomicU64,
    // Terminal responses pair with callers by order alone; the reader pops
    // the front waiter for each terminal line.
    waiters: Mutex<VecDeque<oneshot::Sender<Response>>>,
}

/// Owns the serial link. One reader thread drives the line demultiplexer,
/// one writer task serialises outbound commands, one dispatcher task fans
/// events out to handlers and watchers.
pub struct Controller {
    shared: Arc<Shared>,
    cmd_tx: mpsc::Sender<(Command, oneshot::Sender<Response>)>,
    watch_timeout: Duration,
}

impl Controller {
    /// Open `tty` at 115200 8N1 and spawn the I/O tasks. Must be called
    /// from within a tokio runtime.
    pub fn open(tty: &str) -> Result<Self, Error> {
        let port = serialport::new(tty, BAUD_RATE)
            .stop_bits(StopBits::One)
            .data_bits(DataBits::Eight)
            .timeout(Duration::from_secs(1))
            .open()?;
        let reader = port.try_clone()?;
        Ok(Self::attach(reader, port))
    }

    /// Attach to an already-open pair of halves. The reader half runs on a
    /// dedicated thread, so its `read` may block; timeouts must surface as
    /// `io::ErrorKind::TimedOut`, which resume the read loop.
    pub fn attach<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self::attach_inner(reader, writer, WATCH_TIMEOUT)
    }

    fn attach_inner<R, W>(reader: R, writer: W, watch_timeout: Duration) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let shared = Arc::new(Shared {
            handlers: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            next_watcher: AtomicU64::new(0),
            waiters: Mutex::new(VecDeque::new()),
        });
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();

        let reader_shared = Arc::clone(&shared);
        std::thread::Builder::new()
            .name("skstack-reader".to_string())
            .spawn(move || read_loop(reader, reader_shared, event_tx, ack_tx))
            .expect("spawn reader thread");
        tokio::spawn(write_loop(writer, Arc::clone(&shared), cmd_rx, ack_rx));
        tokio::spawn(dispatch_loop(Arc::clone(&shared), event_rx));

        Self { shared, cmd_tx, watch_timeout }
    }

    /// Issue one command and wait for its terminal response.
    pub async fn send(&self, cmd: Command) -> Result<Response, Error> {
        self.send_watching(cmd, Vec::new()).await
    }

    /// Issue one command, waiting for the terminal response and for every
    /// condition to be satisfied by some arriving event (or to time out).
    /// Watchers are installed before the command is written, so events that
    /// race the response cannot be missed.
    pub async fn send_watching(
        &self,
        cmd: Command,
        conditions: Vec<Condition>,
    ) -> Result<Response, Error> {
        let mut watches = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let id = self.shared.next_watcher.fetch_add(1, Ordering::Relaxed);
            let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
            self.shared.watchers.lock().unwrap().insert(id, tx);
            let shared = Arc::clone(&self.shared);
            let deadline = tokio::time::Instant::now() + self.watch_timeout;
            watches.push(tokio::spawn(async move {
                loop {
                    match tokio::time::timeout_at(deadline, rx.recv()).await {
                        Ok(Some(event)) => {
                            if condition(&event) {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(_) => {
                            tracing::warn!("watcher expired unsatisfied");
                            break;
                        }
                    }
                }
                shared.watchers.lock().unwrap().remove(&id);
            }));
        }

        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx
            .send((cmd, resp_tx))
            .await
            .map_err(|_| Error::Closed)?;
        let response = resp_rx.await.map_err(|_| Error::Closed)?;

        for watch in watches {
            let _ = watch.await;
        }
        Ok(response)
    }

    /// Register a handler invoked for every arriving event of `kind`, for
    /// the lifetime of the process. Handlers run serially on the dispatcher
    /// task and must not block for long.
    pub fn register_handler<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared
            .handlers
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }
}

fn read_loop<R: Read>(
    reader: R,
    shared: Arc<Shared>,
    event_tx: mpsc::UnboundedSender<Event>,
    ack_tx: mpsc::UnboundedSender<()>,
) {
    let mut reader = BufReader::new(reader);
    let mut demux = LineDemux::new();
    let mut line = String::new();
    loop {
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                tracing::trace!(target: "<-Rx", "{}", line.escape_debug());
                for output in demux.feed(&line) {
                    match output {
                        Output::Event(event) => {
                            let _ = event_tx.send(event);
                        }
                        Output::Response(response) => {
                            match shared.waiters.lock().unwrap().pop_front() {
                                Some(waiter) => {
                                    let _ = waiter.send(response);
                                }
                                None => tracing::warn!("terminal response with no waiter"),
                            }
                            let _ = ack_tx.send(());
                        }
                    }
                }
                line.clear();
            }
            // Serial read timeouts just mean nothing arrived; whatever was
            // buffered so far stays in `line` for the next pass.
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!("serial read failed: {e}");
                break;
            }
        }
    }
    // Fatal: waking every queued waiter with a closed channel turns the
    // current `send` into Error::Closed, and dropping our channel ends the
    // writer and dispatcher too.
    shared.waiters.lock().unwrap().clear();
}

async fn write_loop<W: Write>(
    mut writer: W,
    shared: Arc<Shared>,
    mut cmd_rx: mpsc::Receiver<(Command, oneshot::Sender<Response>)>,
    mut ack_rx: mpsc::UnboundedReceiver<()>,
) {
    while let Some((cmd, resp_tx)) = cmd_rx.recv().await {
        shared.waiters.lock().unwrap().push_back(resp_tx);
        let mut bytes = cmd.to_bytes();
        bytes.extend_from_slice(b"\r\n");
        let printable: String = bytes.iter().map(|b| *b as char).filter(char::is_ascii).collect();
        tracing::trace!(target: "Tx->", "{}", printable.escape_debug());
        if let Err(e) = writer.write_all(&bytes).and_then(|_| writer.flush()) {
            tracing::error!("serial write failed: {e}");
            shared.waiters.lock().unwrap().clear();
            return;
        }
        match tokio::time::timeout(ACK_TIMEOUT, ack_rx.recv()).await {
            Ok(Some(())) => {}
            Ok(None) => return, // reader is gone
            // Log only; the caller keeps waiting on its own channel and a
            // late terminal still reaches it through the waiter queue.
            Err(_) => tracing::warn!("no terminal response within {:?}", ACK_TIMEOUT),
        }
    }
}

async fn dispatch_loop(shared: Arc<Shared>, mut event_rx: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = event_rx.recv().await {
        let handlers: Vec<Handler> = shared
            .handlers
            .lock()
            .unwrap()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(&event);
        }
        let watchers: Vec<mpsc::UnboundedSender<Event>> =
            shared.watchers.lock().unwrap().values().cloned().collect();
        for watcher in watchers {
            let _ = watcher.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skstack::event::Notification;
    use std::sync::Condvar;
    use std::time::Instant;

    struct Exchange {
        expect: &'static str,
        reply: &'static [&'static str],
    }

    #[derive(Default)]
    struct MockState {
        inbox: VecDeque<u8>,
        script: VecDeque<Exchange>,
        partial: Vec<u8>,
    }

    /// In-memory serial port: every scripted command line, once written,
    /// queues its reply lines for the read half. Reads time out like a real
    /// serial port when nothing is pending.
    #[derive(Clone)]
    struct MockPort(Arc<(Mutex<MockState>, Condvar)>);

    impl MockPort {
        fn script(script: Vec<Exchange>) -> Self {
            MockPort(Arc::new((
                Mutex::new(MockState { script: script.into(), ..Default::default() }),
                Condvar::new(),
            )))
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let (lock, cvar) = &*self.0;
            let mut state = lock.lock().unwrap();
            state.partial.extend_from_slice(buf);
            while let Some(pos) = state.partial.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = state.partial.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line).trim_end().to_string();
                let reply: Vec<&str> = match state.script.pop_front() {
                    Some(exchange) if exchange.expect == line => exchange.reply.to_vec(),
                    other => {
                        eprintln!("unscripted command {line:?} (expected {:?})",
                            other.map(|e| e.expect));
                        vec!["FAIL ER99"]
                    }
                };
                for r in reply {
                    state.inbox.extend(r.as_bytes());
                    state.inbox.extend(b"\r\n");
                }
                cvar.notify_all();
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let (lock, cvar) = &*self.0;
            let mut state = lock.lock().unwrap();
            if state.inbox.is_empty() {
                let (guard, _) = cvar
                    .wait_timeout(state, Duration::from_millis(20))
                    .unwrap();
                state = guard;
            }
            if state.inbox.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
            }
            let n = buf.len().min(state.inbox.len());
            for slot in buf.iter_mut().take(n) {
                *slot = state.inbox.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    fn controller(script: Vec<Exchange>) -> Controller {
        let port = MockPort::script(script);
        Controller::attach(port.clone(), port)
    }

    #[tokio::test]
    async fn send_returns_the_terminal_ok() {
        let ctrl = controller(vec![Exchange {
            expect: "SKJOIN FE80:0000:0000:0000:0000:0000:0000:0001",
            reply: &["SKJOIN FE80::1", "EVENT 25 FE80::1", "OK"],
        }]);
        let response = ctrl
            .send(Command::Join { ipaddr: "fe80::1".parse().unwrap() })
            .await
            .unwrap();
        assert_eq!(response, Response::Ok);
    }

    #[tokio::test]
    async fn send_surfaces_fail_code() {
        let ctrl = controller(vec![Exchange {
            expect: "SKSETRBID BOGUS",
            reply: &["SKSETRBID BOGUS", "FAIL ER04"],
        }]);
        let response = ctrl
            .send(Command::SetRbId { rbid: "BOGUS".to_string() })
            .await
            .unwrap();
        assert_eq!(response, Response::Fail("ER04".to_string()));
    }

    #[tokio::test]
    async fn send_returns_result_lines_verbatim() {
        let ctrl = controller(vec![Exchange {
            expect: "SKLL64 001D129012345678",
            reply: &["SKLL64 001D129012345678", "FE80:0000:0000:0000:021D:1290:1234:5678"],
        }]);
        let response = ctrl
            .send(Command::Ll64 { hwaddr: "001D129012345678".to_string() })
            .await
            .unwrap();
        assert_eq!(
            response,
            Response::Result("FE80:0000:0000:0000:021D:1290:1234:5678".to_string())
        );
    }

    #[tokio::test]
    async fn consecutive_sends_each_get_one_response() {
        let ctrl = controller(vec![
            Exchange { expect: "SKSREG S02 21", reply: &["SKSREG S02 21", "OK"] },
            Exchange { expect: "SKSREG S03 8888", reply: &["SKSREG S03 8888", "OK"] },
        ]);
        let first = ctrl
            .send(Command::Sreg { reg: 2, val: "21".to_string() })
            .await
            .unwrap();
        let second = ctrl
            .send(Command::Sreg { reg: 3, val: "8888".to_string() })
            .await
            .unwrap();
        assert_eq!((first, second), (Response::Ok, Response::Ok));
    }

    #[tokio::test]
    async fn watcher_sees_events_of_its_own_command() {
        let ctrl = controller(vec![Exchange {
            expect: "SKSCAN 2 FFFFFFFF 6",
            reply: &[
                "SKSCAN 2 FFFFFFFF 6",
                "OK",
                "EPANDESC",
                "  Channel:21",
                "  Channel Page:09",
                "  Pan ID:8888",
                "  Addr:001D129012345678",
                "  LQI:E1",
                "  PairID:01234567",
                "EVENT 22 FE80::1",
            ],
        }]);
        let found: Arc<Mutex<Option<crate::skstack::event::PanDesc>>> = Arc::default();
        let captured = Arc::clone(&found);
        let response = ctrl
            .send_watching(
                Command::Scan { mode: 2, mask: 0xffff_ffff, duration: 6 },
                vec![Box::new(move |event| match event {
                    Event::PanDesc(desc) => {
                        *captured.lock().unwrap() = Some(desc.clone());
                        false
                    }
                    Event::Notification(Notification { num, .. }) => *num == 0x22,
                    _ => false,
                })],
            )
            .await
            .unwrap();
        assert_eq!(response, Response::Ok);
        let desc = found.lock().unwrap().take().expect("PANDESC captured");
        assert_eq!(desc.channel, 0x21);
        assert_eq!(desc.pan_id, 0x8888);
    }

    #[tokio::test]
    async fn unsatisfied_watcher_times_out_without_losing_the_response() {
        let port = MockPort::script(vec![Exchange {
            expect: "SKVER",
            reply: &["SKVER", "EVER 1.2.8", "OK"],
        }]);
        let ctrl = Controller::attach_inner(port.clone(), port, Duration::from_millis(200));
        let started = Instant::now();
        let response = ctrl
            .send_watching(Command::Ver, vec![Box::new(|_| false)])
            .await
            .unwrap();
        assert_eq!(response, Response::Ok);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(ctrl.shared.watchers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn handlers_observe_events_in_arrival_order() {
        let ctrl = controller(vec![Exchange {
            expect: "SKJOIN FE80:0000:0000:0000:0000:0000:0000:0001",
            reply: &["SKJOIN FE80::1", "EVENT 21 FE80::1 00", "EVENT 25 FE80::1", "OK"],
        }]);
        let seen: Arc<Mutex<Vec<u8>>> = Arc::default();
        let sink = Arc::clone(&seen);
        ctrl.register_handler(EventKind::Notification, move |event| {
            if let Event::Notification(Notification { num, .. }) = event {
                sink.lock().unwrap().push(*num);
            }
        });
        ctrl.send(Command::Join { ipaddr: "fe80::1".parse().unwrap() })
            .await
            .unwrap();
        // Dispatch runs on its own task; give it a moment to drain.
        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            if *seen.lock().unwrap() == vec![0x21, 0x25] {
                break;
            }
            assert!(Instant::now() < deadline, "handler never saw both events");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
