//! Units of work handed from the dispatcher to the worker pool
//!
//! Connection ownership travels with the task: the dispatcher gives up the
//! boxed connection on submit and gets it back through a [`Completion`].

use crossbeam_channel::Sender;
use mio::{Token, Waker};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::connection::{HttpConnection, Next, WriteOutcome};
use crate::context::ServerContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

pub enum Task {
    /// Reactor: worker melakukan I/O sendiri
    Io {
        conn: Box<HttpConnection>,
        direction: Direction,
    },
    /// Proactor: data sudah dibaca dispatcher, tinggal diproses
    Process { conn: Box<HttpConnection> },
}

impl Task {
    pub fn token(&self) -> Token {
        match self {
            Task::Io { conn, .. } | Task::Process { conn } => conn.token(),
        }
    }

    pub fn into_conn(self) -> Box<HttpConnection> {
        match self {
            Task::Io { conn, .. } | Task::Process { conn } => conn,
        }
    }
}

/// A connection returning to the dispatcher
pub struct Completion {
    pub token: Token,
    pub conn: Box<HttpConnection>,
    pub next: Next,
}

/// Worker-side task execution
pub struct TaskRunner {
    ctx: Arc<ServerContext>,
    done: Sender<Completion>,
    waker: Arc<Waker>,
}

impl TaskRunner {
    pub fn new(ctx: Arc<ServerContext>, done: Sender<Completion>, waker: Arc<Waker>) -> Self {
        Self { ctx, done, waker }
    }

    pub fn run(&self, task: Task) {
        let (mut conn, direction) = match task {
            Task::Io { conn, direction } => (conn, Some(direction)),
            Task::Process { conn } => (conn, None),
        };
        let token = conn.token();
        let next = contain_panic(token, || self.execute(&mut conn, direction));
        self.complete(token, conn, next);
    }

    fn execute(&self, conn: &mut HttpConnection, direction: Option<Direction>) -> Next {
        match direction {
            Some(Direction::Read) => {
                if conn.read_once() {
                    conn.process(&self.ctx)
                } else {
                    Next::Close
                }
            }
            Some(Direction::Write) => match conn.write() {
                WriteOutcome::Pending => Next::Write,
                WriteOutcome::KeepAlive => Next::Read,
                WriteOutcome::Close | WriteOutcome::Failed => Next::Close,
            },
            None => conn.process(&self.ctx),
        }
    }

    fn complete(&self, token: Token, conn: Box<HttpConnection>, next: Next) {
        if next == Next::Close {
            tracing::debug!(token = token.0, "worker requests close");
        }
        // dispatcher sudah berhenti: connection (dan socket-nya) di-drop di sini
        if self.done.send(Completion { token, conn, next }).is_err() {
            tracing::debug!(token = token.0, "dispatcher gone, dropping connection");
            return;
        }
        if let Err(e) = self.waker.wake() {
            tracing::error!("failed to wake dispatcher: {e}");
        }
    }
}

/// Run `step`; a panic turns into an eviction instead of a lost connection
fn contain_panic<F>(token: Token, step: F) -> Next
where
    F: FnOnce() -> Next,
{
    match panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(next) => next,
        Err(_) => {
            tracing::error!(token = token.0, "task panicked, evicting connection");
            Next::Close
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{backend_pool, CredentialStore};
    use crossbeam_channel::unbounded;
    use mio::Poll;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    const WAKE: Token = Token(7);

    fn runner(root: &std::path::Path) -> (TaskRunner, crossbeam_channel::Receiver<Completion>, Poll) {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), WAKE).unwrap());
        let backend = backend_pool(1, Arc::new(CredentialStore::in_memory())).unwrap();
        let ctx = Arc::new(ServerContext::new(root.to_path_buf(), backend));
        let (tx, rx) = unbounded();
        (TaskRunner::new(ctx, tx, waker), rx, poll)
    }

    #[test]
    fn test_process_task_stages_response_and_wakes() {
        let root = tempfile::tempdir().unwrap();
        let page = root.path().join("judge.html");
        fs::write(&page, "<p>judge</p>").unwrap();
        fs::set_permissions(&page, fs::Permissions::from_mode(0o644)).unwrap();
        let (runner, rx, mut poll) = runner(root.path());

        let mut conn = Box::new(HttpConnection::new(2048));
        conn.parser_mut().feed(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n");
        let task = Task::Process { conn };
        assert_eq!(task.token(), Token(0));
        runner.run(task);

        let done = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(done.next, Next::Write);
        assert_eq!(done.conn.response().unwrap().status(), 200);
        assert!(done.conn.real_file().ends_with("judge.html"));

        let mut events = mio::Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
        assert!(events.iter().any(|event| event.token() == WAKE));
    }

    #[test]
    fn test_incomplete_request_wants_more_input() {
        let root = tempfile::tempdir().unwrap();
        let (runner, rx, _poll) = runner(root.path());

        let mut conn = Box::new(HttpConnection::new(2048));
        conn.parser_mut().feed(b"GET / HTTP/1.1\r\nHo");
        runner.run(Task::Process { conn });
        assert_eq!(rx.recv().unwrap().next, Next::Read);
    }

    #[test]
    fn test_panicking_step_becomes_close() {
        assert_eq!(contain_panic(Token(3), || Next::Write), Next::Write);
        assert_eq!(contain_panic(Token(3), || panic!("handler blew up")), Next::Close);
    }

    #[test]
    fn test_reactor_read_without_socket_closes() {
        let root = tempfile::tempdir().unwrap();
        let (runner, rx, _poll) = runner(root.path());

        let conn = Box::new(HttpConnection::new(2048));
        runner.run(Task::Io {
            conn,
            direction: Direction::Read,
        });
        assert_eq!(rx.recv().unwrap().next, Next::Close);
    }
}
