//! Media vocabulary: stream kinds, pairing rules and negotiation payloads.

mod kind;
mod types;

pub use kind::{admit_pairing, EncodingPolicy, MediaKind, StreamKind};
pub use types::{
    AppData, CapabilitySet, CaptureId, DtlsParameters, LeaseId, ProduceOffer, RtpParameters,
    SessionIdentity, TransportDescriptor,
};
