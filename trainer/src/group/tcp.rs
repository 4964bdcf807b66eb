use std::{num::NonZeroUsize, time::Duration};

use comms::{
    FrameReceiver, FrameSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info, warn};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use super::{COORDINATOR, ProcessGroup, check_rank};
use crate::error::{Result, TrainErr};

type NetRx = FrameReceiver<OwnedReadHalf>;
type NetTx = FrameSender<OwnedWriteHalf>;

const RETRY_DELAY: Duration = Duration::from_millis(500);

enum Role {
    /// The coordinator, `peers[i]` is the channel to rank `i + 1`.
    Root { peers: Vec<(NetRx, NetTx)> },
    Peer { rx: NetRx, tx: NetTx },
}

/// Ranks in separate processes, connected in a star around the coordinator.
///
/// The coordinator listens, every other rank connects to it and introduces
/// itself with its rank and the iteration it resumes from. Reductions are summed on the coordinator in rank order and
/// forwarded to the destination when it isn't the coordinator.
pub struct TcpGroup {
    rank: usize,
    world_size: usize,
    role: Role,
    rx_buf: Vec<f32>,
    acc: Vec<f32>,
}

impl TcpGroup {
    /// Joins the group at `addr`, listening there if this is the coordinator.
    ///
    /// # Arguments
    /// * `addr` - The coordinator's address.
    /// * `rank` - This rank's id.
    /// * `world_size` - The total amount of ranks.
    /// * `start_iter` - The iteration this rank resumes from, every rank must agree on it.
    ///
    /// # Returns
    /// A group connected to every other rank.
    ///
    /// # Errors
    /// Returns `TrainErr` on I/O failures, handshake violations or an invalid rank.
    pub async fn connect(
        addr: &str,
        rank: usize,
        world_size: NonZeroUsize,
        start_iter: usize,
    ) -> Result<Self> {
        check_rank(rank, world_size.get())?;

        if rank == COORDINATOR {
            let list = TcpListener::bind(addr).await?;
            info!("listening at {addr}");
            Self::root(list, world_size, start_iter).await
        } else {
            Self::join(addr, rank, world_size, start_iter).await
        }
    }

    /// Accepts every other rank on an already bound listener.
    ///
    /// Once every peer said hello they are all welcomed, a peer that is
    /// rejected gets the reason as an error message instead.
    ///
    /// # Errors
    /// Returns `TrainErr` if a peer disagrees on the world size or the start
    /// iteration, claims an invalid or taken rank, or doesn't start with a hello.
    pub async fn root(list: TcpListener, world_size: NonZeroUsize, start_iter: usize) -> Result<Self> {
        let world_size = world_size.get();
        let mut slots: Vec<Option<(NetRx, NetTx)>> = (1..world_size).map(|_| None).collect();
        let mut rx_buf = Vec::new();

        while slots.iter().any(Option::is_none) {
            let (stream, addr) = list.accept().await?;
            stream.set_nodelay(true)?;
            let (rx, tx) = stream.into_split();
            let (mut rx, mut tx) = comms::channel(rx, tx);

            let (rank, theirs, their_start) = match rx.recv_into(&mut rx_buf).await? {
                Msg::Control(Command::Hello {
                    rank,
                    world_size: theirs,
                    start_iter: their_start,
                }) => (rank, theirs, their_start),
                other => {
                    return Err(TrainErr::UnexpectedMessage {
                        from: addr.to_string(),
                        got: other.kind(),
                    });
                }
            };

            let verdict = if theirs != world_size {
                Err(TrainErr::SizeMismatch {
                    what: "world size",
                    got: theirs,
                    expected: world_size,
                })
            } else if their_start != start_iter {
                Err(TrainErr::SizeMismatch {
                    what: "start iteration",
                    got: their_start,
                    expected: start_iter,
                })
            } else if rank == COORDINATOR {
                Err(TrainErr::InvalidRank { rank, world_size })
            } else if let Err(e) = check_rank(rank, world_size) {
                Err(e)
            } else if slots[rank - 1].is_some() {
                Err(TrainErr::InvalidConfig(format!("rank {rank} joined twice")))
            } else {
                Ok(())
            };

            if let Err(e) = verdict {
                warn!(rank = rank; "rejecting peer from {addr}: {e}");
                tx.send(&Msg::Err(e.to_string().into())).await?;
                return Err(e);
            }

            info!(rank = rank; "peer joined from {addr}");
            slots[rank - 1] = Some((rx, tx));
        }

        let mut peers: Vec<_> = slots.into_iter().flatten().collect();

        let welcome = Msg::Control(Command::Welcome);
        for (_, tx) in peers.iter_mut() {
            tx.send(&welcome).await?;
        }

        Ok(Self {
            rank: COORDINATOR,
            world_size,
            role: Role::Root { peers },
            rx_buf,
            acc: Vec::new(),
        })
    }

    async fn join(
        addr: &str,
        rank: usize,
        world_size: NonZeroUsize,
        start_iter: usize,
    ) -> Result<Self> {
        let stream = loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(e) => {
                    warn!("failed to reach coordinator at {addr}: {e}, retrying...");
                    time::sleep(RETRY_DELAY).await;
                }
            }
        };

        stream.set_nodelay(true)?;
        let (rx, tx) = stream.into_split();
        let (mut rx, mut tx) = comms::channel(rx, tx);

        let world_size = world_size.get();
        let hello = Msg::Control(Command::Hello {
            rank,
            world_size,
            start_iter,
        });
        tx.send(&hello).await?;

        let mut rx_buf = Vec::new();
        match rx.recv_into(&mut rx_buf).await? {
            Msg::Control(Command::Welcome) => {}
            Msg::Err(reason) => {
                return Err(TrainErr::InvalidConfig(format!(
                    "coordinator rejected rank {rank}: {reason}"
                )));
            }
            other => {
                return Err(TrainErr::UnexpectedMessage {
                    from: format!("rank {COORDINATOR}"),
                    got: other.kind(),
                });
            }
        }
        info!(rank = rank; "joined coordinator at {addr} from iteration {start_iter}");

        Ok(Self {
            rank,
            world_size,
            role: Role::Peer { rx, tx },
            rx_buf,
            acc: Vec::new(),
        })
    }

    /// Leaves the group, waiting for every rank to do the same.
    ///
    /// # Errors
    /// Returns `TrainErr` on I/O failures or protocol violations.
    pub async fn shutdown(mut self) -> Result<()> {
        let msg = Msg::Control(Command::Disconnect);

        match &mut self.role {
            Role::Root { peers } => {
                for (i, (rx, _)) in peers.iter_mut().enumerate() {
                    expect_control(rx, &mut self.rx_buf, i + 1, Command::Disconnect).await?;
                }

                for (_, tx) in peers.iter_mut() {
                    tx.send(&msg).await?;
                }
            }
            Role::Peer { rx, tx } => {
                tx.send(&msg).await?;
                expect_control(rx, &mut self.rx_buf, COORDINATOR, Command::Disconnect).await?;
            }
        }

        debug!(rank = self.rank; "left the process group");
        Ok(())
    }
}

impl ProcessGroup for TcpGroup {
    fn world_size(&self) -> usize {
        self.world_size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    async fn barrier(&mut self) -> Result<()> {
        match &mut self.role {
            Role::Root { peers } => {
                for (i, (rx, _)) in peers.iter_mut().enumerate() {
                    expect_control(rx, &mut self.rx_buf, i + 1, Command::Barrier).await?;
                }

                let msg = Msg::Control(Command::Release);
                for (_, tx) in peers.iter_mut() {
                    tx.send(&msg).await?;
                }
            }
            Role::Peer { rx, tx } => {
                tx.send(&Msg::Control(Command::Barrier)).await?;
                expect_control(rx, &mut self.rx_buf, COORDINATOR, Command::Release).await?;
            }
        }

        Ok(())
    }

    async fn reduce_sum(&mut self, buf: &mut [f32], dst: usize) -> Result<()> {
        check_rank(dst, self.world_size)?;

        let Self {
            rank,
            role,
            rx_buf,
            acc,
            ..
        } = self;

        match role {
            Role::Root { peers } => {
                acc.clear();
                acc.extend_from_slice(buf);

                for (i, (rx, _)) in peers.iter_mut().enumerate() {
                    let peer = i + 1;
                    let partial = expect_values(rx, rx_buf, peer, false).await?;

                    if partial.len() != acc.len() {
                        return Err(TrainErr::SizeMismatch {
                            what: "reduce buffer",
                            got: partial.len(),
                            expected: acc.len(),
                        });
                    }

                    for (a, v) in acc.iter_mut().zip(partial) {
                        *a += v;
                    }
                }

                if dst == COORDINATOR {
                    buf.copy_from_slice(acc.as_slice());
                } else {
                    let (_, tx) = &mut peers[dst - 1];
                    tx.send(&Msg::Data(Payload::Reduced(acc.as_slice()))).await?;
                }
            }
            Role::Peer { rx, tx } => {
                tx.send(&Msg::Data(Payload::Partial(&*buf))).await?;

                if *rank == dst {
                    let reduced = expect_values(rx, rx_buf, COORDINATOR, true).await?;

                    if reduced.len() != buf.len() {
                        return Err(TrainErr::SizeMismatch {
                            what: "reduce buffer",
                            got: reduced.len(),
                            expected: buf.len(),
                        });
                    }

                    buf.copy_from_slice(reduced);
                }
            }
        }

        Ok(())
    }
}

async fn expect_control(
    rx: &mut NetRx,
    rx_buf: &mut Vec<f32>,
    from: usize,
    expected: Command,
) -> Result<()> {
    match rx.recv_into(rx_buf).await? {
        Msg::Control(cmd) if cmd == expected => Ok(()),
        other => Err(TrainErr::UnexpectedMessage {
            from: format!("rank {from}"),
            got: other.kind(),
        }),
    }
}

async fn expect_values<'buf>(
    rx: &mut NetRx,
    rx_buf: &'buf mut Vec<f32>,
    from: usize,
    reduced: bool,
) -> Result<&'buf [f32]> {
    match rx.recv_into(rx_buf).await? {
        Msg::Data(Payload::Reduced(values)) if reduced => Ok(values),
        Msg::Data(Payload::Partial(values)) if !reduced => Ok(values),
        other => Err(TrainErr::UnexpectedMessage {
            from: format!("rank {from}"),
            got: other.kind(),
        }),
    }
}
