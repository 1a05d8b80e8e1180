//! Wire format for group messages
//!
//! Application message:
//! ```text
//! [header_len: u32]
//! [header_bytes]
//! [payload_bytes]      (rest of the buffer)
//! ```
//!
//! Origin, destination and delivery guarantee are not encoded; they come from
//! the transport's delivery metadata.
//!
//! State exchange messages use the same framing with `STATE_EXCHANGE_TAG` as
//! header and a member state as payload:
//! ```text
//! [fixed_part: u64]
//! [monotonic_part: i64]
//! [data_bytes]         (rest of the buffer, absent when empty)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use proven_group_transport::ServiceType;

use crate::error::CodecError;
use crate::ids::{GroupId, MemberId, ViewId};

/// Header that marks protocol-internal state exchange traffic.
pub const STATE_EXCHANGE_TAG: &[u8] = b"\0proven-view-sync/state\0";

const LENGTH_PREFIX: usize = 4;
const MEMBER_STATE_PREFIX: usize = 16;

/// Ordering/durability requested for a send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeliveryGuarantee {
    /// No ordering between senders
    NoOrder,
    /// Same total order at every member
    #[default]
    TotalOrder,
    /// Total order, delivered once every member has it
    Uniform,
}

impl From<DeliveryGuarantee> for ServiceType {
    fn from(guarantee: DeliveryGuarantee) -> Self {
        match guarantee {
            DeliveryGuarantee::NoOrder => Self::Unordered,
            DeliveryGuarantee::TotalOrder => Self::Agreed,
            DeliveryGuarantee::Uniform => Self::Safe,
        }
    }
}

impl From<ServiceType> for DeliveryGuarantee {
    fn from(service: ServiceType) -> Self {
        match service {
            ServiceType::Unordered => Self::NoOrder,
            ServiceType::Agreed => Self::TotalOrder,
            ServiceType::Safe => Self::Uniform,
        }
    }
}

/// A message exchanged within a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    origin: Option<MemberId>,
    destination: GroupId,
    delivery_guarantee: DeliveryGuarantee,
    header: Bytes,
    payload: Bytes,
}

impl Message {
    /// Create an outbound message; the origin is filled in on delivery.
    pub fn new(
        destination: impl Into<GroupId>,
        delivery_guarantee: DeliveryGuarantee,
        header: impl Into<Bytes>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            origin: None,
            destination: destination.into(),
            delivery_guarantee,
            header: header.into(),
            payload: payload.into(),
        }
    }

    /// Sender, known only for delivered messages
    #[must_use]
    pub const fn origin(&self) -> Option<&MemberId> {
        self.origin.as_ref()
    }

    /// Target group
    #[must_use]
    pub const fn destination(&self) -> &GroupId {
        &self.destination
    }

    /// Requested guarantee
    #[must_use]
    pub const fn delivery_guarantee(&self) -> DeliveryGuarantee {
        self.delivery_guarantee
    }

    /// Header bytes
    #[must_use]
    pub const fn header(&self) -> &Bytes {
        &self.header
    }

    /// Payload bytes
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Encoded size in bytes
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        LENGTH_PREFIX + self.header.len() + self.payload.len()
    }

    /// Serialize header and payload.
    ///
    /// # Errors
    /// Fails if the header is longer than a u32 prefix can describe.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let header_len = u32::try_from(self.header.len())
            .map_err(|_| CodecError::HeaderOverflow(self.header.len()))?;

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u32(header_len);
        buf.put_slice(&self.header);
        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }

    /// Deserialize a delivered buffer.
    ///
    /// # Errors
    /// Fails if the buffer is shorter than the length prefix or the declared
    /// header length runs past the end of the buffer.
    pub fn decode(
        mut data: Bytes,
        origin: MemberId,
        destination: GroupId,
        delivery_guarantee: DeliveryGuarantee,
    ) -> Result<Self, CodecError> {
        if data.len() < LENGTH_PREFIX {
            return Err(CodecError::BufferTooSmall {
                needed: LENGTH_PREFIX,
                available: data.len(),
            });
        }

        let declared = data.get_u32() as usize;
        if declared > data.len() {
            return Err(CodecError::HeaderTooLong {
                declared,
                available: data.len(),
            });
        }

        let header = data.split_to(declared);

        Ok(Self {
            origin: Some(origin),
            destination,
            delivery_guarantee,
            header,
            payload: data,
        })
    }

    /// Whether this message carries a state exchange report
    #[must_use]
    pub fn is_state_exchange(&self) -> bool {
        self.header.as_ref() == STATE_EXCHANGE_TAG
    }
}

/// A member's report during a view exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberState {
    /// Last view id the member knows of
    pub view_id: ViewId,
    /// Opaque application data exchanged alongside membership
    pub data: Option<Bytes>,
}

impl MemberState {
    /// Create a report
    #[must_use]
    pub const fn new(view_id: ViewId, data: Option<Bytes>) -> Self {
        Self { view_id, data }
    }

    /// Serialize as a state exchange payload
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let data_len = self.data.as_ref().map_or(0, Bytes::len);
        let mut buf = BytesMut::with_capacity(MEMBER_STATE_PREFIX + data_len);
        buf.put_u64(self.view_id.fixed_part());
        buf.put_i64(self.view_id.monotonic_part());
        if let Some(data) = &self.data {
            buf.put_slice(data);
        }
        buf.freeze()
    }

    /// Deserialize a state exchange payload
    ///
    /// # Errors
    /// Fails if the payload is shorter than the two view id fields.
    pub fn decode(mut payload: Bytes) -> Result<Self, CodecError> {
        if payload.len() < MEMBER_STATE_PREFIX {
            return Err(CodecError::StateTooShort(payload.len()));
        }

        let fixed = payload.get_u64();
        let monotonic = payload.get_i64();
        let data = if payload.is_empty() {
            None
        } else {
            Some(payload)
        };

        Ok(Self {
            view_id: ViewId::new(fixed, monotonic),
            data,
        })
    }

    /// Wrap the report in a message for `group`
    #[must_use]
    pub fn into_message(self, group: GroupId) -> Message {
        Message::new(
            group,
            DeliveryGuarantee::TotalOrder,
            Bytes::from_static(STATE_EXCHANGE_TAG),
            self.encode(),
        )
    }
}

/// A delivered message, classified by its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Protocol-internal state exchange report
    StateExchange {
        /// Reporting member
        origin: Option<MemberId>,
        /// The report
        state: MemberState,
    },
    /// Application traffic
    Application(Message),
}

impl Envelope {
    /// Classify a delivered message
    ///
    /// # Errors
    /// Fails if a state exchange payload is malformed.
    pub fn classify(message: Message) -> Result<Self, CodecError> {
        if message.is_state_exchange() {
            let state = MemberState::decode(message.payload)?;
            Ok(Self::StateExchange {
                origin: message.origin,
                state,
            })
        } else {
            Ok(Self::Application(message))
        }
    }
}
