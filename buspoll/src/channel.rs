use tokio::sync::mpsc::error::TryRecvError;

use crate::error::Shutdown;

/// wrap a Tokio receiver and only provide methods that return a Result<_, Shutdown>
/// that makes it harder to misuse.
pub(crate) struct Receiver<T>(tokio::sync::mpsc::Receiver<T>);

impl<T> From<tokio::sync::mpsc::Receiver<T>> for Receiver<T> {
    fn from(value: tokio::sync::mpsc::Receiver<T>) -> Self {
        Self(value)
    }
}

impl<T> Receiver<T> {
    pub(crate) async fn recv(&mut self) -> Result<T, Shutdown> {
        self.0.recv().await.ok_or(Shutdown)
    }

    /// returns Ok(None) when no message is waiting
    pub(crate) fn try_recv(&mut self) -> Result<Option<T>, Shutdown> {
        match self.0.try_recv() {
            Ok(x) => Ok(Some(x)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Shutdown),
        }
    }
}
