//! Streaming primitives shared by background producers.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Cancellation handle that aborts the producing task. In-flight I/O may
/// complete, but nothing more is delivered.
#[derive(Debug)]
pub struct CancelHandle { task: JoinHandle<()> }

impl CancelHandle {
    pub fn new(task: JoinHandle<()>) -> Self { Self { task } }
    pub fn cancel(self) { self.task.abort(); }
}

/// Receiver plus the handle that stops its producer.
#[derive(Debug)]
pub struct StreamHandle<T> { pub rx: mpsc::Receiver<T>, pub cancel: CancelHandle }

impl<T> StreamHandle<T> {
    pub async fn recv(&mut self) -> Option<T> { self.rx.recv().await }
}
