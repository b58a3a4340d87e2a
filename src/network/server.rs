//! Dispatcher: satu thread pemilik readiness set
//!
//! Memegang listener, signal channel, timer list dan semua slot koneksi.
//! Worker hanya menyentuh connection yang sedang di-hand off ke mereka;
//! hasilnya kembali lewat completion channel + waker.
//!
//! mio selalu edge-triggered. Level-triggered di-emulasikan dengan
//! reregister setelah setiap event ditangani, yang melaporkan ulang socket
//! yang masih ready.

use crossbeam_channel::{unbounded, Receiver};
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::connection::{HttpConnection, Next, WriteOutcome};
use super::signal::{arm_alarm, ServerHandle, SignalChannel, SignalFlags};
use super::task::{Completion, Direction, Task, TaskRunner};
use super::worker_pool::{RejectReason, WorkerPool};
use crate::config::{ActorModel, ServerConfig, Trigger};
use crate::context::ServerContext;
use crate::core::{TimerId, TimerList};
use crate::error::{ServerError, ServerResult};
use crate::protocol::BUSY_RESPONSE;

const LISTENER: Token = Token(usize::MAX);
const SIGNAL: Token = Token(usize::MAX - 1);
const WAKER: Token = Token(usize::MAX - 2);

const EVENTS_CAPACITY: usize = 1024;
/// Poll timeout while rejected tasks wait for queue space
const DEFERRED_RETRY: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    /// owned by the dispatcher
    Live,
    /// owned by a worker (or parked in the deferred list)
    InFlight { evict: bool },
}

/// Satu slot per token; connection object di-reuse lintas accept
struct Slot {
    /// `None` while a worker holds the connection
    conn: Option<Box<HttpConnection>>,
    state: SlotState,
    timer: Option<TimerId>,
}

pub struct Server {
    config: ServerConfig,
    poll: Poll,
    listener: TcpListener,
    signals: SignalChannel,
    ctx: Arc<ServerContext>,

    slots: Vec<Slot>,
    free: Vec<usize>,
    live: usize,
    timers: TimerList<usize>,

    pool: WorkerPool<Task>,
    completions: Receiver<Completion>,
    deferred: Vec<Task>,

    /// SIGALRM drives sweeps; otherwise the poll timeout does
    alarm_installed: bool,
    next_sweep: Instant,
}

impl Server {
    /// Bind the listener and start the worker pool
    pub fn bind(config: ServerConfig, ctx: ServerContext) -> ServerResult<Self> {
        config.validate()?;
        let addr: SocketAddr = config
            .bind_addr()
            .parse()
            .map_err(|e| ServerError::Config(format!("bad bind address {}: {e}", config.bind_addr())))?;

        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr)?;
        if config.linger {
            set_linger(&listener)?;
        }
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        let mut signals = SignalChannel::new()?;
        poll.registry()
            .register(signals.receiver_mut(), SIGNAL, Interest::READABLE)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let (done_tx, done_rx) = unbounded();
        let ctx = Arc::new(ctx);
        let runner = TaskRunner::new(Arc::clone(&ctx), done_tx, waker);
        let pool = WorkerPool::new(config.worker_threads, config.queue_capacity, move |task: Task| {
            runner.run(task)
        })?;

        tracing::info!(
            addr = %listener.local_addr()?,
            actor = ?config.actor_model,
            trigger = ?config.trigger,
            "server bound"
        );

        let next_sweep = Instant::now() + config.timeslot;
        Ok(Self {
            config,
            poll,
            listener,
            signals,
            ctx,
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            timers: TimerList::new(),
            pool,
            completions: done_rx,
            deferred: Vec::new(),
            alarm_installed: false,
            next_sweep,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        self.signals.handle()
    }

    /// Live connections (dispatcher-owned and in flight)
    pub fn live_connections(&self) -> usize {
        self.live
    }

    /// Hook process signals into the loop and start the alarm
    pub fn install_signal_handlers(&mut self) -> ServerResult<()> {
        self.signals.install_process_handlers()?;
        arm_alarm(self.config.timeslot);
        self.alarm_installed = true;
        Ok(())
    }

    /// Event loop; returns after a stop request
    pub fn run(&mut self) -> ServerResult<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let mut flags = SignalFlags::default();

        loop {
            let timeout = self.poll_timeout();
            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!("epoll failure: {e}");
                self.shutdown();
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept(),
                    SIGNAL => self.signals.drain(&mut flags),
                    // completions are drained after every pass
                    WAKER => {}
                    token => self.on_connection_event(token, event),
                }
            }

            self.drain_completions();
            self.retry_deferred();

            if flags.stop {
                break;
            }
            if self.sweep_due(&mut flags) {
                self.sweep();
            }
        }

        self.shutdown();
        Ok(())
    }

    fn poll_timeout(&self) -> Option<Duration> {
        if !self.deferred.is_empty() {
            return Some(DEFERRED_RETRY);
        }
        if self.alarm_installed {
            return None;
        }
        Some(self.next_sweep.saturating_duration_since(Instant::now()))
    }

    fn sweep_due(&mut self, flags: &mut SignalFlags) -> bool {
        let now = Instant::now();
        let due = flags.sweep || (!self.alarm_installed && now >= self.next_sweep);
        flags.sweep = false;
        if due {
            self.next_sweep = now + self.config.timeslot;
        }
        due
    }

    /// Close every connection whose deadline passed, then re-arm the alarm
    fn sweep(&mut self) {
        let mut expired = Vec::new();
        let fired = self.timers.tick(Instant::now(), |_, idx| expired.push(idx));
        tracing::info!(expired = fired, "timer tick");
        for idx in expired {
            self.slots[idx].timer = None;
            self.close_slot(idx);
        }
        if self.alarm_installed {
            arm_alarm(self.config.timeslot);
        }
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    self.admit(stream, peer);
                    if self.config.trigger.listen == Trigger::Level {
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!("accept error: {e}");
                    break;
                }
            }
        }

        if self.config.trigger.listen == Trigger::Level {
            if let Err(e) =
                self.poll
                    .registry()
                    .reregister(&mut self.listener, LISTENER, Interest::READABLE)
            {
                tracing::error!("failed to rearm listener: {e}");
            }
        }
    }

    fn admit(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        if self.live >= self.config.max_connections {
            tracing::warn!(%peer, "Internal server busy");
            match stream.write(BUSY_RESPONSE) {
                Ok(n) if n == BUSY_RESPONSE.len() => {}
                Ok(n) => tracing::debug!(%peer, written = n, "short busy reply"),
                Err(e) => tracing::debug!(%peer, "busy reply failed: {e}"),
            }
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "set_nodelay failed: {e}");
        }

        let idx = self.alloc_slot();
        let token = Token(idx);
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
        {
            tracing::error!(%peer, "failed to register connection: {e}");
            self.free.push(idx);
            return;
        }

        let expire = Instant::now() + self.config.idle_timeout();
        let slot = &mut self.slots[idx];
        if let Some(conn) = slot.conn.as_mut() {
            conn.init(token, stream, peer, self.config.trigger.conn);
        }
        slot.state = SlotState::Live;
        slot.timer = Some(self.timers.add_timer(expire, idx));
        self.live += 1;
        tracing::info!(%peer, token = idx, live = self.live, "accepted connection");
    }

    fn alloc_slot(&mut self) -> usize {
        if let Some(idx) = self.free.pop() {
            return idx;
        }
        self.slots.push(Slot {
            conn: Some(Box::new(HttpConnection::new(self.config.read_buffer_size))),
            state: SlotState::Free,
            timer: None,
        });
        self.slots.len() - 1
    }

    fn on_connection_event(&mut self, token: Token, event: &Event) {
        let idx = token.0;
        match self.slots.get(idx).map(|slot| slot.state) {
            Some(SlotState::Live) => {}
            // stale event for a closed slot, or a worker owns the socket
            _ => return,
        }

        if event.is_error() || event.is_read_closed() || event.is_write_closed() {
            tracing::debug!(token = idx, "peer hung up");
            self.close_slot(idx);
            return;
        }

        if event.is_readable() {
            self.on_readable(idx);
        } else if event.is_writable() {
            self.on_writable(idx);
        }
    }

    fn on_readable(&mut self, idx: usize) {
        match self.config.actor_model {
            ActorModel::Reactor => {
                self.slide_timer(idx);
                self.hand_off(idx, |conn| Task::Io {
                    conn,
                    direction: Direction::Read,
                });
            }
            ActorModel::Proactor => {
                let read = match self.slots[idx].conn.as_mut() {
                    Some(conn) => {
                        let ok = conn.read_once();
                        if ok {
                            if let Some(peer) = conn.peer() {
                                tracing::info!(%peer, "deal with the client");
                            }
                        }
                        ok
                    }
                    None => false,
                };
                if read {
                    self.slide_timer(idx);
                    self.hand_off(idx, |conn| Task::Process { conn });
                } else {
                    self.close_slot(idx);
                }
            }
        }
    }

    fn on_writable(&mut self, idx: usize) {
        match self.config.actor_model {
            ActorModel::Reactor => {
                self.slide_timer(idx);
                self.hand_off(idx, |conn| Task::Io {
                    conn,
                    direction: Direction::Write,
                });
            }
            ActorModel::Proactor => {
                let outcome = match self.slots[idx].conn.as_mut() {
                    Some(conn) => conn.write(),
                    None => WriteOutcome::Failed,
                };
                match outcome {
                    WriteOutcome::Pending => {
                        self.slide_timer(idx);
                        self.rearm(idx, Interest::WRITABLE);
                    }
                    WriteOutcome::KeepAlive => {
                        self.slide_timer(idx);
                        self.rearm(idx, Interest::READABLE);
                    }
                    WriteOutcome::Close | WriteOutcome::Failed => self.close_slot(idx),
                }
            }
        }
    }

    /// Push the idle deadline of `idx` forward by one idle timeout
    fn slide_timer(&mut self, idx: usize) {
        if let Some(timer) = self.slots[idx].timer {
            let expire = Instant::now() + self.config.idle_timeout();
            if self.timers.adjust_timer(timer, expire) {
                tracing::debug!(token = idx, "adjust timer once");
            }
        }
    }

    /// Move the connection out of its slot into a worker task
    fn hand_off<F>(&mut self, idx: usize, make: F)
    where
        F: FnOnce(Box<HttpConnection>) -> Task,
    {
        let slot = &mut self.slots[idx];
        let conn = match slot.conn.take() {
            Some(conn) => conn,
            None => return,
        };
        slot.state = SlotState::InFlight { evict: false };
        self.dispatch(make(conn));
    }

    fn dispatch(&mut self, task: Task) {
        if let Err(rejected) = self.pool.submit(task) {
            match rejected.reason {
                RejectReason::QueueFull => {
                    tracing::debug!(token = rejected.task.token().0, "queue full, deferring task");
                    self.deferred.push(rejected.task);
                }
                RejectReason::Closed => {
                    let conn = rejected.task.into_conn();
                    let idx = conn.token().0;
                    self.settle(conn);
                    self.close_slot(idx);
                }
            }
        }
    }

    fn retry_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        for task in std::mem::take(&mut self.deferred) {
            let idx = task.token().0;
            if self.slots[idx].state == (SlotState::InFlight { evict: true }) {
                self.settle(task.into_conn());
                continue;
            }
            self.dispatch(task);
        }
    }

    fn drain_completions(&mut self) {
        while let Ok(done) = self.completions.try_recv() {
            self.complete(done);
        }
    }

    fn complete(&mut self, done: Completion) {
        let Completion { token, conn, next } = done;
        if !self.settle(conn) {
            return;
        }
        match next {
            Next::Read => self.rearm(token.0, Interest::READABLE),
            Next::Write => self.rearm(token.0, Interest::WRITABLE),
            Next::Close => self.close_slot(token.0),
        }
    }

    /// Put a connection back into its slot.
    ///
    /// Returns `false` if the slot was evicted while the connection was
    /// away; the connection is closed in that case.
    fn settle(&mut self, conn: Box<HttpConnection>) -> bool {
        let idx = conn.token().0;
        let slot = match self.slots.get_mut(idx) {
            Some(slot) => slot,
            None => return false,
        };
        let evict = match slot.state {
            SlotState::InFlight { evict } => evict,
            state => {
                tracing::warn!(token = idx, ?state, "completion for a slot not in flight");
                return false;
            }
        };
        slot.conn = Some(conn);
        slot.state = SlotState::Live;
        if evict {
            self.close_slot(idx);
            return false;
        }
        true
    }

    fn rearm(&mut self, idx: usize, interest: Interest) {
        let registry = self.poll.registry();
        let rearmed = match self.slots[idx].conn.as_mut().and_then(|conn| conn.stream_mut()) {
            Some(stream) => match registry.reregister(stream, Token(idx), interest) {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(token = idx, "reregister failed: {e}");
                    false
                }
            },
            None => false,
        };
        if !rearmed {
            self.close_slot(idx);
        }
    }

    /// Evict a connection. Idempotent; a connection held by a worker is
    /// closed when it comes back.
    fn close_slot(&mut self, idx: usize) {
        let slot = match self.slots.get_mut(idx) {
            Some(slot) => slot,
            None => return,
        };
        if let Some(timer) = slot.timer.take() {
            self.timers.del_timer(timer);
        }
        match slot.state {
            SlotState::Free => return,
            SlotState::InFlight { .. } => {
                slot.state = SlotState::InFlight { evict: true };
                return;
            }
            SlotState::Live => {}
        }

        if let Some(conn) = slot.conn.as_mut() {
            let peer = conn.peer();
            if let Some(mut stream) = conn.take_stream() {
                let _ = self.poll.registry().deregister(&mut stream);
            }
            match peer {
                Some(peer) => tracing::info!(%peer, token = idx, "close connection"),
                None => tracing::info!(token = idx, "close connection"),
            }
        }
        slot.state = SlotState::Free;
        self.free.push(idx);
        self.live -= 1;
    }

    fn shutdown(&mut self) {
        tracing::info!(live = self.live, "server stopping");
        for idx in 0..self.slots.len() {
            self.close_slot(idx);
        }

        // workers finish what is queued; everything they return is evicted
        self.pool.shutdown();
        for task in std::mem::take(&mut self.deferred) {
            self.settle(task.into_conn());
        }
        self.drain_completions();

        let destroyed = self.ctx.backend.destroy();
        tracing::info!(backend_handles = destroyed, "server stopped");
    }
}

/// SO_LINGER {on, 1s} so close flushes pending data
fn set_linger(listener: &TcpListener) -> io::Result<()> {
    let linger = libc::linger {
        l_onoff: 1,
        l_linger: 1,
    };
    let rc = unsafe {
        libc::setsockopt(
            listener.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &linger as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
