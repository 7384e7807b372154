use {
    audio::AudioSample,
    futures_core::Stream,
    std::{
        pin::Pin,
        sync::Arc,
        task::{Context, Poll},
    },
    tokio::sync::mpsc,
    uuid::Uuid,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketStatus {
    Ok,
    Failed,
}

/// One streamed piece of a synthesis result.
#[derive(Clone, Debug, PartialEq)]
pub struct DataPacket {
    pub request_id: Uuid,
    pub status: PacketStatus,
    pub is_final: bool,
    pub audio: AudioSample,
    pub actor: String,
    pub languages: Vec<String>,
    pub chunk_index: Option<usize>,
    /// Marker trigger offsets in samples; only the first audio packet carries them.
    pub markers: Vec<usize>,
}

impl DataPacket {
    pub fn failed(request_id: Uuid, actor: impl Into<String>, sample_rate: usize) -> Self {
        Self {
            request_id,
            status: PacketStatus::Failed,
            is_final: false,
            audio: AudioSample::empty(sample_rate),
            actor: actor.into(),
            languages: Vec::new(),
            chunk_index: None,
            markers: Vec::new(),
        }
    }

    /// True for the packet that ends the request.
    pub fn is_terminal(&self) -> bool {
        self.is_final || self.status == PacketStatus::Failed
    }
}

pub type PacketCallback = Arc<dyn Fn(DataPacket) + Send + Sync>;

/// Raw audio consumer fed through the jitter buffer.
///
/// The flag marks the last block of a request. A request that fails gets an
/// empty last block.
pub type AudioCallback = Arc<dyn Fn(AudioSample, bool) + Send + Sync>;

/// Receiving end of `packet_channel`.
pub struct PacketListener {
    rx: mpsc::UnboundedReceiver<DataPacket>,
}

/// A callback that forwards every packet into a listener.
pub fn packet_channel() -> (PacketCallback, PacketListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: PacketCallback = Arc::new(move |packet| {
        if tx.send(packet).is_err() {
            log::debug!("Packet listener dropped, discarding packet");
        }
    });
    (callback, PacketListener { rx })
}

impl PacketListener {
    pub async fn recv(&mut self) -> Option<DataPacket> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<DataPacket> {
        self.rx.try_recv().ok()
    }

    /// Everything received so far.
    pub fn drain(&mut self) -> Vec<DataPacket> {
        let mut packets = Vec::new();
        while let Some(packet) = self.try_recv() {
            packets.push(packet);
        }
        packets
    }
}

impl Stream for PacketListener {
    type Item = DataPacket;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<DataPacket>> {
        self.rx.poll_recv(cx)
    }
}
