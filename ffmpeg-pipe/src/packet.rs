//! Encoded packets moving between the demuxer, the codecs and the muxer.

use ffmpeg_next::{codec::packet::Packet, Rational};

/// An encoded packet and the time base its timestamps are expressed in.
pub struct RawPacket {
    packet: Packet,
    time_base: Rational,
}

impl RawPacket {
    pub fn new(packet: Packet, time_base: Rational) -> Self {
        Self { packet, time_base }
    }

    /// Stream index assigned by the container that produced the packet.
    pub fn index(&self) -> usize {
        self.packet.stream()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// The packet with its timestamps moved into `time_base`.
    pub fn rescaled(mut self, time_base: Rational) -> Packet {
        self.packet.rescale_ts(self.time_base, time_base);
        self.packet
    }
}
