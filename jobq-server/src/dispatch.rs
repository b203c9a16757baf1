//! The bounded FIFO of job ids between producers and the worker pool.
//!
//! The HTTP surface and the sweeper send with `try_send` only, so a full
//! channel sheds load instead of blocking a producer. The coordinator owns
//! the channel: it hands out sender clones and closes the channel by
//! dropping the last one after every producer and consumer has stopped.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

pub type JobSender = mpsc::Sender<Uuid>;

/// The consumer half, shared by all workers. The mutex is held only for
/// the duration of a single `recv`.
pub type JobReceiver = Arc<Mutex<mpsc::Receiver<Uuid>>>;

pub fn channel(capacity: usize) -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity);

    (tx, Arc::new(Mutex::new(rx)))
}
