use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::types::Envelope;

const CHANNEL_CAPACITY: usize = 1024;
/// Envelope bytes per datagram, leaving room for the fragment header under the
/// 65,507-byte UDP payload limit.
pub const FRAGMENT_SIZE: usize = 60_000;
/// Largest envelope the transport will split. Anything bigger is refused up front.
pub const MAX_ENVELOPE_BYTES: usize = 16 * 1024 * 1024;
const REASSEMBLY_TTL: Duration = Duration::from_secs(30);

/// Moves envelopes between brokers on a partitioned stream.
///
/// Every subscriber of a partition sees every envelope sent to it, including the
/// sender's own.
#[async_trait]
pub trait Transport: Send + Sync {
    fn partitions(&self) -> u32;

    async fn send(&self, envelope: Envelope) -> Result<()>;

    fn subscribe(&self, partition: u32) -> Result<broadcast::Receiver<Envelope>>;
}

fn partition_channels(partitions: u32) -> Vec<broadcast::Sender<Envelope>> {
    (0..partitions.max(1))
        .map(|_| broadcast::channel(CHANNEL_CAPACITY).0)
        .collect()
}

fn deliver_local(channels: &[broadcast::Sender<Envelope>], envelope: Envelope) -> Result<()> {
    let partition = envelope.metadata.partition;
    let channel = channels
        .get(partition as usize)
        .ok_or_else(|| anyhow!("partition {} out of range", partition))?;
    // No receivers is not an error; nobody is listening yet
    let _ = channel.send(envelope);
    Ok(())
}

/// One datagram: a slice of a bincode-encoded envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub envelope_id: u64,
    pub index: u32,
    pub total: u32,
    pub bytes: Vec<u8>,
}

/// Splits an encoded envelope into datagram-sized fragments.
pub fn fragment(envelope_id: u64, encoded: &[u8]) -> Result<Vec<Fragment>> {
    if encoded.len() > MAX_ENVELOPE_BYTES {
        return Err(anyhow!(
            "envelope of {} bytes exceeds the {} byte limit",
            encoded.len(),
            MAX_ENVELOPE_BYTES
        ));
    }

    let chunks: Vec<&[u8]> = if encoded.is_empty() {
        vec![encoded]
    } else {
        encoded.chunks(FRAGMENT_SIZE).collect()
    };
    let total = chunks.len() as u32;
    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(index, bytes)| Fragment {
            envelope_id,
            index: index as u32,
            total,
            bytes: bytes.to_vec(),
        })
        .collect())
}

struct Partial {
    parts: Vec<Option<Vec<u8>>>,
    missing: usize,
    started: Instant,
}

/// Collects fragments per sender until an envelope is whole.
#[derive(Default)]
pub struct Reassembler {
    partials: HashMap<(SocketAddr, u64), Partial>,
}

impl Reassembler {
    /// Returns the full encoded envelope once its last fragment arrives.
    pub fn accept(&mut self, src: SocketAddr, fragment: Fragment) -> Option<Vec<u8>> {
        let max_fragments = MAX_ENVELOPE_BYTES.div_ceil(FRAGMENT_SIZE) as u32;
        if fragment.total == 0 || fragment.total > max_fragments || fragment.index >= fragment.total {
            warn!("Dropping malformed fragment from {}", src);
            return None;
        }
        if fragment.total == 1 {
            return Some(fragment.bytes);
        }

        self.evict_stale();
        let key = (src, fragment.envelope_id);
        let partial = self.partials.entry(key).or_insert_with(|| Partial {
            parts: vec![None; fragment.total as usize],
            missing: fragment.total as usize,
            started: Instant::now(),
        });
        if partial.parts.len() != fragment.total as usize {
            warn!("Fragment count changed mid-envelope from {}", src);
            self.partials.remove(&key);
            return None;
        }

        let slot = &mut partial.parts[fragment.index as usize];
        if slot.is_none() {
            *slot = Some(fragment.bytes);
            partial.missing -= 1;
        }
        if partial.missing > 0 {
            return None;
        }

        let partial = self.partials.remove(&key)?;
        Some(partial.parts.into_iter().flatten().flatten().collect())
    }

    pub fn pending(&self) -> usize {
        self.partials.len()
    }

    fn evict_stale(&mut self) {
        let before = self.partials.len();
        self.partials
            .retain(|_, partial| partial.started.elapsed() < REASSEMBLY_TTL);
        let dropped = before - self.partials.len();
        if dropped > 0 {
            debug!("Dropped {} incomplete envelope(s)", dropped);
        }
    }
}

/// In-process bus shared by every broker in a test or single-process deployment.
pub struct MemoryBus {
    channels: Vec<broadcast::Sender<Envelope>>,
}

impl MemoryBus {
    pub fn new(partitions: u32) -> Arc<Self> {
        Arc::new(Self {
            channels: partition_channels(partitions),
        })
    }
}

#[async_trait]
impl Transport for MemoryBus {
    fn partitions(&self) -> u32 {
        self.channels.len() as u32
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        deliver_local(&self.channels, envelope)
    }

    fn subscribe(&self, partition: u32) -> Result<broadcast::Receiver<Envelope>> {
        self.channels
            .get(partition as usize)
            .map(|c| c.subscribe())
            .ok_or_else(|| anyhow!("partition {} out of range", partition))
    }
}

/// UDP fan-out to a static peer list. Local subscribers are fed directly.
/// Envelopes larger than one datagram are sent as numbered [`Fragment`]s and
/// reassembled by the receiver. A lost fragment loses the whole envelope.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    peers: Vec<SocketAddr>,
    channels: Vec<broadcast::Sender<Envelope>>,
    next_envelope_id: AtomicU64,
}

impl UdpTransport {
    pub async fn bind(
        bind_addr: SocketAddr,
        peers: Vec<SocketAddr>,
        partitions: u32,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr).await?;
        info!(
            "System stream transport on {} with {} peer(s)",
            socket.local_addr()?,
            peers.len()
        );

        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            peers,
            channels: partition_channels(partitions),
            next_envelope_id: AtomicU64::new(rand::random()),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            self.receive_loop().await;
        });
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];
        let mut reassembler = Reassembler::default();

        loop {
            let (len, src) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let fragment = match bincode::deserialize::<Fragment>(&buf[..len]) {
                Ok(fragment) => fragment,
                Err(e) => {
                    warn!("Failed to deserialize fragment from {}: {}", src, e);
                    continue;
                }
            };
            let Some(encoded) = reassembler.accept(src, fragment) else {
                continue;
            };

            match bincode::deserialize::<Envelope>(&encoded) {
                Ok(envelope) => {
                    if let Err(e) = deliver_local(&self.channels, envelope) {
                        warn!("Dropping envelope from {}: {}", src, e);
                    }
                }
                Err(e) => warn!("Failed to deserialize envelope from {}: {}", src, e),
            }
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn partitions(&self) -> u32 {
        self.channels.len() as u32
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        let encoded = bincode::serialize(&envelope)?;
        let envelope_id = self.next_envelope_id.fetch_add(1, Ordering::Relaxed);
        let datagrams = fragment(envelope_id, &encoded)?
            .iter()
            .map(bincode::serialize)
            .collect::<Result<Vec<_>, _>>()?;

        deliver_local(&self.channels, envelope)?;

        for peer in &self.peers {
            for datagram in &datagrams {
                if let Err(e) = self.socket.send_to(datagram, peer).await {
                    warn!("Failed to send envelope to {}: {}", peer, e);
                    break;
                }
                if datagrams.len() > 1 {
                    // Give receivers a chance to drain before the next fragment
                    tokio::task::yield_now().await;
                }
            }
        }

        Ok(())
    }

    fn subscribe(&self, partition: u32) -> Result<broadcast::Receiver<Envelope>> {
        self.channels
            .get(partition as usize)
            .map(|c| c.subscribe())
            .ok_or_else(|| anyhow!("partition {} out of range", partition))
    }
}
