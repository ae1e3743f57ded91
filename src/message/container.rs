//! Message Container
//!
//! Binary envelope for moving a payload between cache tiers or peers.
//!
//! # Wire Layout (big-endian)
//!
//! ```text
//! ┌─────┬───────┬─────┬────────────┬─────┬──────────────┬─────────┬─────────┬────────────┐
//! │ tag │ flags │ tag │ sender     │ tag │ receiver     │ len u32 │ payload │ integrity  │
//! │ u8  │ u8    │ u8  │ digest     │ u8  │ digest       │         │         │ digest     │
//! └─────┴───────┴─────┴────────────┴─────┴──────────────┴─────────┴─────────┴────────────┘
//! ```
//!
//! The first tag names the integrity provider; the trailing digest is computed
//! with it over every preceding byte. All lengths follow from the three tags
//! and the payload length, so the total size is known before serializing.

use bytes::{BufMut, Bytes, BytesMut};
use once_cell::sync::OnceCell;
use std::fmt;
use tracing::debug;

use crate::digest::{encoding, DigestId, DigestProvider};
use crate::error::{Error, Result};

/// Encrypted payload flag
const FLAG_ENCRYPTED: u8 = 0b0000_0001;

/// Every flag bit this version understands
const KNOWN_FLAGS: u8 = FLAG_ENCRYPTED;

/// Length of the big-endian stream frame prefix
pub const FRAME_PREFIX_LEN: usize = 4;

/// Lifecycle of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Built locally; payload may still change
    Unsealed,
    /// Integrity digest computed and embedded
    Serialized,
    /// Parsed from the wire and the digest matched
    Verified,
    /// Parsed from the wire without checking the digest
    Unverified,
}

#[derive(Clone)]
pub struct MessageContainer {
    sender: DigestId,
    receiver: DigestId,
    provider: DigestProvider,
    encrypted: bool,
    payload: Bytes,
    integrity: OnceCell<DigestId>,
    state: ContainerState,
}

impl MessageContainer {
    /// New container with an empty payload
    pub fn new(sender: DigestId, receiver: DigestId, provider: DigestProvider) -> Self {
        Self {
            sender,
            receiver,
            provider,
            encrypted: false,
            payload: Bytes::new(),
            integrity: OnceCell::new(),
            state: ContainerState::Unsealed,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.set_payload(payload);
        self
    }

    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.set_encrypted(encrypted);
        self
    }

    pub fn sender(&self) -> &DigestId {
        &self.sender
    }

    pub fn receiver(&self) -> &DigestId {
        &self.receiver
    }

    /// Integrity provider
    pub fn provider(&self) -> DigestProvider {
        self.provider
    }

    pub fn encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Replace the payload, discarding any computed digest
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
        self.unseal();
    }

    pub fn set_encrypted(&mut self, encrypted: bool) {
        self.encrypted = encrypted;
        self.unseal();
    }

    fn unseal(&mut self) {
        self.integrity = OnceCell::new();
        self.state = ContainerState::Unsealed;
    }

    fn flags(&self) -> u8 {
        if self.encrypted {
            FLAG_ENCRYPTED
        } else {
            0
        }
    }

    fn header_len(&self) -> usize {
        2 + 1 + self.sender.len() + 1 + self.receiver.len() + 4
    }

    /// Exact length of [`to_binary`](Self::to_binary), plus the stream frame
    /// prefix when `include_frame_prefix` is set
    pub fn byte_length(&self, include_frame_prefix: bool) -> usize {
        let body = self.header_len() + self.payload.len() + self.provider.digest_len();
        if include_frame_prefix {
            body + FRAME_PREFIX_LEN
        } else {
            body
        }
    }

    /// Header and payload; the bytes every integrity digest covers
    fn write_body(&self, buf: &mut BytesMut) -> Result<()> {
        for (role, id) in [("sender", &self.sender), ("receiver", &self.receiver)] {
            if !id.is_valid() {
                return Err(Error::Framing(format!(
                    "{} identifier of empty content cannot be encoded",
                    role
                )));
            }
        }

        let payload_len = u32::try_from(self.payload.len()).map_err(|_| {
            Error::Framing(format!(
                "payload of {} bytes exceeds the u32 length field",
                self.payload.len()
            ))
        })?;

        buf.put_u8(self.provider.tag());
        buf.put_u8(self.flags());
        buf.put_u8(self.sender.provider().tag());
        buf.put_slice(self.sender.as_bytes());
        buf.put_u8(self.receiver.provider().tag());
        buf.put_slice(self.receiver.as_bytes());
        buf.put_u32(payload_len);
        buf.put_slice(&self.payload);
        Ok(())
    }

    fn body(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.byte_length(false));
        self.write_body(&mut buf)?;
        Ok(buf)
    }

    /// Digest of header and payload under any provider
    pub fn digest(&self, provider: DigestProvider) -> Result<DigestId> {
        Ok(DigestId::compute(&self.body()?, provider))
    }

    /// Integrity digest under the container's own provider, computed once
    pub fn integrity_digest(&self) -> Result<DigestId> {
        self.integrity
            .get_or_try_init(|| self.digest(self.provider))
            .copied()
    }

    /// Serialize to the wire layout
    pub fn to_binary(&self) -> Result<Bytes> {
        let mut buf = self.body()?;
        let integrity = self
            .integrity
            .get_or_try_init(|| Ok::<_, Error>(DigestId::compute(&buf, self.provider)))?;
        buf.put_slice(integrity.as_bytes());
        Ok(buf.freeze())
    }

    /// Compute the integrity digest and freeze the container for transport
    pub fn seal(&mut self) -> Result<Bytes> {
        let binary = self.to_binary()?;
        self.state = ContainerState::Serialized;
        Ok(binary)
    }

    /// Parse the wire layout
    ///
    /// Any disagreement between declared and actual lengths is a framing
    /// error. With `verify`, a trailing digest that does not match the
    /// received bytes is a tamper error.
    pub fn from_binary(bytes: &[u8], verify: bool) -> Result<Self> {
        let mut reader = Reader::new(bytes);

        let provider = reader.provider()?;
        let flags = reader.u8()?;
        if flags & !KNOWN_FLAGS != 0 {
            return Err(Error::Framing(format!("unknown flag bits {:#04x}", flags)));
        }
        let sender = reader.identifier()?;
        let receiver = reader.identifier()?;
        let payload_len = reader.u32()? as usize;
        let payload = reader.take(payload_len)?;
        let body_len = reader.position();
        let trailing = reader.take(provider.digest_len())?;
        if reader.remaining() != 0 {
            return Err(Error::Framing(format!(
                "{} bytes after the integrity digest",
                reader.remaining()
            )));
        }

        let embedded = DigestId::from_binary(trailing, provider, None)?;
        let state = if verify {
            let recomputed = DigestId::compute(&bytes[..body_len], provider);
            if recomputed != embedded {
                debug!(%provider, "Rejected container with mismatched digest");
                return Err(Error::Tamper {
                    provider: provider.name().to_string(),
                });
            }
            ContainerState::Verified
        } else {
            ContainerState::Unverified
        };

        Ok(Self {
            sender,
            receiver,
            provider,
            encrypted: flags & FLAG_ENCRYPTED != 0,
            payload: Bytes::copy_from_slice(payload),
            integrity: OnceCell::with_value(embedded),
            state,
        })
    }

    /// Binary form prefixed with its big-endian `u32` length
    pub fn to_framed(&self) -> Result<Bytes> {
        let binary = self.to_binary()?;
        let mut buf = BytesMut::with_capacity(FRAME_PREFIX_LEN + binary.len());
        buf.put_u32(binary.len() as u32);
        buf.put_slice(&binary);
        Ok(buf.freeze())
    }

    /// Parse a frame produced by [`to_framed`](Self::to_framed)
    pub fn from_framed(bytes: &[u8], verify: bool) -> Result<Self> {
        if bytes.len() < FRAME_PREFIX_LEN {
            return Err(Error::Framing("truncated frame prefix".to_string()));
        }
        let (prefix, body) = bytes.split_at(FRAME_PREFIX_LEN);
        let declared = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if declared != body.len() {
            return Err(Error::Framing(format!(
                "frame declares {} bytes, received {}",
                declared,
                body.len()
            )));
        }
        Self::from_binary(body, verify)
    }

    /// Transport base64 of the binary form
    pub fn to_base64(&self) -> Result<String> {
        Ok(encoding::encode(&self.to_binary()?))
    }

    /// Parse base64 in either alphabet
    pub fn from_base64(text: &str, verify: bool) -> Result<Self> {
        Self::from_binary(&encoding::decode_any(text)?, verify)
    }
}

impl PartialEq for MessageContainer {
    fn eq(&self, other: &Self) -> bool {
        self.provider == other.provider
            && self.encrypted == other.encrypted
            && self.sender == other.sender
            && self.receiver == other.receiver
            && self.payload == other.payload
    }
}

impl Eq for MessageContainer {}

impl fmt::Debug for MessageContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContainer")
            .field("sender", &self.sender)
            .field("receiver", &self.receiver)
            .field("provider", &self.provider)
            .field("encrypted", &self.encrypted)
            .field("payload_len", &self.payload.len())
            .field("state", &self.state)
            .finish()
    }
}

/// Bounds-checked cursor over received bytes
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::Framing(format!(
                "truncated: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn provider(&mut self) -> Result<DigestProvider> {
        let tag = self.u8()?;
        DigestProvider::from_tag(tag)
            .map_err(|_| Error::Framing(format!("unknown provider tag {} at offset {}", tag, self.pos - 1)))
    }

    fn identifier(&mut self) -> Result<DigestId> {
        let provider = self.provider()?;
        let bytes = self.take(provider.digest_len())?;
        DigestId::from_binary(bytes, provider, None)
    }
}

// =============================================================================
// Tests
// =============================================================================
