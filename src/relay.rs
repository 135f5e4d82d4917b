use crate::Socket;
use crate::error::{Error, Result};
use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// relay pumps bytes client -> target and target -> client until both
/// directions reach EOF, returning the byte count of each direction
pub async fn relay<C, T>(client: C, target: T) -> Result<(u64, u64)>
where
    C: Socket + 'static,
    T: Socket + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (target_read, target_write) = tokio::io::split(target);

    pump_pair(
        copy_half(client_read, target_write),
        copy_half(target_read, client_write),
    )
    .await
}

/// copy_half copies reader into writer until EOF or error, then closes
/// the writer for writing so the peer sees EOF on this direction only
pub async fn copy_half<R, W>(mut reader: R, mut writer: W) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = tokio::io::copy(&mut reader, &mut writer).await;

    if let Err(e) = writer.shutdown().await {
        debug!("half-close failed: {e}");
    }

    copied.map_err(Error::Relay)
}

/// pump_pair runs two copy loops as separate tasks. Each reports exactly
/// once into a two-slot channel; the first error aborts the other loop and
/// is returned, otherwise both byte counts are returned in argument order
pub async fn pump_pair<A, B>(forward: A, backward: B) -> Result<(u64, u64)>
where
    A: Future<Output = Result<u64>> + Send + 'static,
    B: Future<Output = Result<u64>> + Send + 'static,
{
    let (done_tx, mut done_rx) = mpsc::channel(2);

    let tasks = [
        spawn_reporting(0, forward, done_tx.clone()),
        spawn_reporting(1, backward, done_tx),
    ];

    let mut copied = [0u64; 2];
    for _ in 0..tasks.len() {
        match done_rx.recv().await {
            Some((slot, Ok(n))) => copied[slot] = n,
            Some((_, Err(e))) => {
                for task in &tasks {
                    task.abort();
                }
                return Err(e);
            }
            // Every reporter is gone without a word
            None => {
                return Err(Error::Relay(io::Error::other(
                    "copy loops ended without reporting",
                )));
            }
        }
    }

    Ok((copied[0], copied[1]))
}

fn spawn_reporting<F>(
    slot: usize,
    pump: F,
    done: mpsc::Sender<(usize, Result<u64>)>,
) -> JoinHandle<()>
where
    F: Future<Output = Result<u64>> + Send + 'static,
{
    tokio::spawn(async move {
        let report = Report {
            slot,
            done: Some(done),
        };
        let outcome = pump.await;
        report.send(outcome);
    })
}

/// Report delivers one copy loop's outcome. Dropped unsent (the loop
/// panicked or was aborted) it delivers an error instead
struct Report {
    slot: usize,
    done: Option<mpsc::Sender<(usize, Result<u64>)>>,
}

impl Report {
    fn send(mut self, outcome: Result<u64>) {
        if let Some(done) = self.done.take() {
            // One message per sender into a two-slot channel always fits
            let _ = done.try_send((self.slot, outcome));
        }
    }
}

impl Drop for Report {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.try_send((
                self.slot,
                Err(Error::Relay(io::Error::other("copy loop stopped before finishing"))),
            ));
        }
    }
}
