use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::conn::FrameRx;
use crate::conn::FrameTx;
use crate::packet::Packet;

/// Queue depths for one connection. Inbound depth is the TCP backpressure
/// point; outbound depth is the slow-consumer threshold.
#[derive(Clone, Copy, Debug)]
pub struct PumpConfig {
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 64,
            outbound_capacity: 64,
        }
    }
}

/// Clonable handle for queueing packets toward the wire.
///
/// `try_send` consumes the packet either way: into the queue on success,
/// dropped (and its buffer pooled) on failure. A `false` return is the
/// slow-consumer signal.
#[derive(Clone)]
pub struct PumpSender {
    tx: mpsc::Sender<Packet>,
}

impl PumpSender {
    pub fn try_send(&self, pkt: Packet) -> bool {
        self.tx.try_send(pkt).is_ok()
    }

    /// Queue a packet, waiting for space. Returns `false` when the pump
    /// has already shut down.
    pub async fn send(&self, pkt: Packet) -> bool {
        self.tx.send(pkt).await.is_ok()
    }
}

/// Both directions of one framed connection, pumped by two background
/// loops with bounded queues in between.
///
/// - inbound: receive loop -> queue -> [`ConnPump::try_recv`]. A full
///   queue blocks the receive loop, which stops reading the socket and
///   lets TCP push back on the peer.
/// - outbound: [`PumpSender`] -> queue -> send loop. Packets are dropped
///   (returning their buffers) right after the wire write, success or not.
pub struct ConnPump {
    inbound: mpsc::Receiver<Packet>,
    sender: PumpSender,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl ConnPump {
    /// Spawn the two loops over a split framed connection. `cancel` is
    /// this connection's token: cancelling it stops both loops and drops
    /// the connection halves.
    pub fn spawn<R, W>(
        mut rx: FrameRx<R>,
        mut tx: FrameTx<W>,
        cfg: PumpConfig,
        cancel: CancellationToken,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (inbound_tx, inbound_rx) = mpsc::channel(cfg.inbound_capacity.max(1));
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Packet>(cfg.outbound_capacity.max(1));
        let done = CancellationToken::new();

        let read_cancel = cancel.clone();
        let read_loop = tokio::spawn(async move {
            loop {
                let pkt = tokio::select! {
                    _ = read_cancel.cancelled() => break,
                    res = rx.read_packet() => match res {
                        Ok(Some(pkt)) => pkt,
                        Ok(None) => break,
                        Err(e) => {
                            debug!(err = %e, "receive loop ended");
                            break;
                        }
                    },
                };
                // A full inbound queue parks us here, which is exactly the
                // backpressure contract.
                if inbound_tx.send(pkt).await.is_err() {
                    break;
                }
            }
            read_cancel.cancel();
        });

        let write_cancel = cancel.clone();
        let write_loop = tokio::spawn(async move {
            loop {
                let pkt = tokio::select! {
                    _ = write_cancel.cancelled() => break,
                    pkt = outbound_rx.recv() => match pkt {
                        Some(pkt) => pkt,
                        None => break,
                    },
                };
                let res = tokio::select! {
                    _ = write_cancel.cancelled() => {
                        drop(pkt);
                        break;
                    }
                    res = tx.write_packet(&pkt) => res,
                };
                drop(pkt);
                if let Err(e) = res {
                    warn!(err = %e, "send loop ended");
                    break;
                }
            }
            write_cancel.cancel();
        });

        let completion = done.clone();
        tokio::spawn(async move {
            let _ = read_loop.await;
            let _ = write_loop.await;
            completion.cancel();
        });

        Self {
            inbound: inbound_rx,
            sender: PumpSender { tx: outbound_tx },
            cancel,
            done,
        }
    }

    /// Pop one inbound packet without waiting. The session drains this
    /// every tick.
    pub fn try_recv(&mut self) -> Option<Packet> {
        self.inbound.try_recv().ok()
    }

    /// Wait for the next inbound packet; `None` once the pump is done.
    pub async fn recv(&mut self) -> Option<Packet> {
        self.inbound.recv().await
    }

    pub fn sender(&self) -> PumpSender {
        self.sender.clone()
    }

    pub fn try_send(&self, pkt: Packet) -> bool {
        self.sender.try_send(pkt)
    }

    pub async fn send(&self, pkt: Packet) -> bool {
        self.sender.send(pkt).await
    }

    /// Stop both loops and drop the connection.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A future that resolves once both loops have exited. Cloneable via
    /// [`ConnPump::completion`]; any number of waiters may watch it.
    pub async fn done(&self) {
        self.done.cancelled().await;
    }

    pub fn completion(&self) -> PumpCompletion {
        PumpCompletion {
            done: self.done.clone(),
        }
    }
}

impl std::fmt::Debug for ConnPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConnPump")
    }
}

/// Detached handle on a pump's shutdown, usable after the pump itself has
/// moved into a session.
#[derive(Clone)]
pub struct PumpCompletion {
    done: CancellationToken,
}

impl PumpCompletion {
    pub async fn wait(&self) {
        self.done.cancelled().await;
    }
}
