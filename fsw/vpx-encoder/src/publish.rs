use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use frame_shm::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{FourCc, PublishError};

/// Message type id of an image reading on the bus.
pub const IMAGE_READING_ID: i32 = 1055;
/// Port every conference on the bus shares.
pub const BUS_PORT: u16 = 12175;
/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;
/// Envelope bytes carried per datagram, leaving room for the fragment header.
pub const FRAGMENT_PAYLOAD: usize = MAX_DATAGRAM - 32;

/// One compressed frame on its way to the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputFrame {
    pub fourcc: FourCc,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub sample_time: Timestamp,
    pub sender_id: u32,
}

pub trait Publisher {
    /// `false` once the channel has stopped operating.
    fn is_running(&self) -> bool;

    fn publish(&mut self, frame: OutputFrame) -> Result<(), PublishError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReading {
    pub fourcc: String,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Bus framing around a serialized message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub data_type: i32,
    pub serialized_data: Vec<u8>,
    pub sent: Timestamp,
    pub sample_time: Timestamp,
    pub sender_stamp: u32,
}

impl Envelope {
    pub fn image_reading(frame: OutputFrame) -> Result<Self, PublishError> {
        let reading = ImageReading {
            fourcc: frame.fourcc.as_str().to_string(),
            width: frame.width,
            height: frame.height,
            data: frame.data,
        };
        Ok(Envelope {
            data_type: IMAGE_READING_ID,
            serialized_data: postcard::to_allocvec(&reading)?,
            sent: Timestamp::now(),
            sample_time: frame.sample_time,
            sender_stamp: frame.sender_id,
        })
    }
}

/// One datagram on the wire. An encoded [`Envelope`] is split into `count` fragments
/// sharing a `message_id`; small envelopes travel as a single fragment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub message_id: u32,
    pub index: u16,
    pub count: u16,
    pub payload: Vec<u8>,
}

/// Multicast group of conference `cid`; `225.0.0.cid` for ids below 256.
pub fn group_addr(cid: u16) -> Ipv4Addr {
    let [hi, lo] = cid.to_be_bytes();
    Ipv4Addr::new(225, 0, hi, lo)
}

/// Publishes envelopes as UDP datagrams, by default to a conference's multicast group.
pub struct UdpPublisher {
    socket: UdpSocket,
    target: SocketAddr,
    running: bool,
    next_message_id: u32,
}

impl UdpPublisher {
    pub fn connect(cid: u16) -> Result<Self, PublishError> {
        Self::with_target(SocketAddrV4::new(group_addr(cid), BUS_PORT).into())
    }

    pub fn with_target(target: SocketAddr) -> Result<Self, PublishError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        if target.ip().is_multicast() {
            socket.set_multicast_loop_v4(true)?;
            socket.set_multicast_ttl_v4(1)?;
        }
        debug!(?target, local = ?socket.local_addr()?, "publisher ready");
        Ok(Self {
            socket,
            target,
            running: true,
            next_message_id: 0,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    fn send(&mut self, datagram: &[u8]) -> Result<(), PublishError> {
        if let Err(err) = self.socket.send_to(datagram, self.target) {
            let err = PublishError::from(err);
            if err.is_channel_closed() {
                self.running = false;
            }
            return Err(err);
        }
        Ok(())
    }
}

impl Publisher for UdpPublisher {
    fn is_running(&self) -> bool {
        self.running
    }

    fn publish(&mut self, frame: OutputFrame) -> Result<(), PublishError> {
        let envelope = Envelope::image_reading(frame)?;
        let buf = postcard::to_allocvec(&envelope)?;
        let count = u16::try_from(buf.len().div_ceil(FRAGMENT_PAYLOAD)).map_err(|_| {
            PublishError::TooLarge {
                len: buf.len(),
                max: FRAGMENT_PAYLOAD * u16::MAX as usize,
            }
        })?;
        let message_id = self.next_message_id;
        self.next_message_id = message_id.wrapping_add(1);

        for (index, payload) in buf.chunks(FRAGMENT_PAYLOAD).enumerate() {
            let fragment = Fragment {
                message_id,
                index: index as u16,
                count,
                payload: payload.to_vec(),
            };
            self.send(&postcard::to_allocvec(&fragment)?)?;
        }
        if count > 1 {
            debug!(message_id, count, len = buf.len(), "split envelope");
        }
        Ok(())
    }
}
