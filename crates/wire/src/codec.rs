//! Datagram encoding and decoding.
//!
//! The encoder writes into a `BytesMut` and enforces the datagram budget;
//! the decoder consumes a `&[u8]` cursor and must account for every byte.
//! Both sides agree field-for-field with the protocol table; there is no
//! schema negotiation.

use bytes::{Buf, BufMut, BytesMut};
use fabriq_fixed::{Q31, QVector};

use crate::message::{Message, NodeId, Role};
use crate::{Result, WireError};

/// Maximum datagram size in bytes (mesh-safe under typical 802.11s MTU).
pub const MAX_DATAGRAM: usize = 1200;

/// Encodes a message into a fresh buffer.
///
/// Returns [`WireError::Oversize`] if the encoding would exceed
/// [`MAX_DATAGRAM`].
pub fn encode(msg: &Message) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(128);
    buf.put_u8(msg.tag());
    match msg {
        Message::Task { cycle, block_id, seed, x } => {
            buf.put_u64_le(*cycle);
            buf.put_u32_le(*block_id);
            buf.put_u64_le(*seed);
            put_vector(&mut buf, x);
        }
        Message::Result { cycle, block_id, seed, y, saturated } => {
            buf.put_u64_le(*cycle);
            buf.put_u32_le(*block_id);
            buf.put_u64_le(*seed);
            buf.put_i32_le(y.to_bits());
            buf.put_u8(u8::from(*saturated));
        }
        Message::Heartbeat { cycle, committed_epoch, role, sender_id } => {
            buf.put_u64_le(*cycle);
            buf.put_u64_le(*committed_epoch);
            buf.put_u8(role.to_wire());
            buf.put_u64_le(sender_id.0);
        }
        Message::ClaimPrimary { cycle, committed_epoch, node_id } => {
            buf.put_u64_le(*cycle);
            buf.put_u64_le(*committed_epoch);
            buf.put_u64_le(node_id.0);
        }
        Message::CommitToken { state_hash, sequence, verify_key, signature } => {
            buf.put_slice(state_hash);
            buf.put_u64_le(*sequence);
            buf.put_slice(verify_key);
            buf.put_slice(signature);
        }
        Message::Resync { cycle, committed_epoch, x, signature } => {
            buf.put_u64_le(*cycle);
            buf.put_u64_le(*committed_epoch);
            put_vector(&mut buf, x);
            buf.put_slice(signature);
        }
        Message::Proposal { sequence, payload } => {
            buf.put_u64_le(*sequence);
            buf.put_u16_le(payload.len() as u16);
            buf.put_slice(payload);
        }
        Message::ResyncRequest { cycle, committed_epoch, digest, node_id } => {
            buf.put_u64_le(*cycle);
            buf.put_u64_le(*committed_epoch);
            buf.put_slice(digest);
            buf.put_u64_le(node_id.0);
        }
    }
    if buf.len() > MAX_DATAGRAM {
        return Err(WireError::Oversize { len: buf.len() });
    }
    Ok(buf.to_vec())
}

/// Decodes one message from a datagram.
///
/// The datagram must contain exactly one message; trailing bytes are an
/// error rather than a second record.
pub fn decode(datagram: &[u8]) -> Result<Message> {
    if datagram.len() > MAX_DATAGRAM {
        return Err(WireError::Oversize { len: datagram.len() });
    }
    let mut buf = datagram;
    let tag = get_u8(&mut buf)?;
    let msg = match tag {
        0x01 => Message::Task {
            cycle: get_u64(&mut buf)?,
            block_id: get_u32(&mut buf)?,
            seed: get_u64(&mut buf)?,
            x: get_vector(&mut buf)?,
        },
        0x02 => Message::Result {
            cycle: get_u64(&mut buf)?,
            block_id: get_u32(&mut buf)?,
            seed: get_u64(&mut buf)?,
            y: Q31::from_bits(get_i32(&mut buf)?),
            saturated: get_u8(&mut buf)? != 0,
        },
        0x03 => Message::Heartbeat {
            cycle: get_u64(&mut buf)?,
            committed_epoch: get_u64(&mut buf)?,
            role: Role::from_wire(get_u8(&mut buf)?)?,
            sender_id: NodeId(get_u64(&mut buf)?),
        },
        0x04 => Message::ClaimPrimary {
            cycle: get_u64(&mut buf)?,
            committed_epoch: get_u64(&mut buf)?,
            node_id: NodeId(get_u64(&mut buf)?),
        },
        0x05 => Message::CommitToken {
            state_hash: get_array::<32>(&mut buf)?,
            sequence: get_u64(&mut buf)?,
            verify_key: get_array::<32>(&mut buf)?,
            signature: get_array::<64>(&mut buf)?,
        },
        0x06 => Message::Resync {
            cycle: get_u64(&mut buf)?,
            committed_epoch: get_u64(&mut buf)?,
            x: get_vector(&mut buf)?,
            signature: get_array::<64>(&mut buf)?,
        },
        0x07 => {
            let sequence = get_u64(&mut buf)?;
            let len = get_u16(&mut buf)? as usize;
            if buf.remaining() < len {
                return Err(WireError::Truncated { needed: len - buf.remaining() });
            }
            let payload = buf[..len].to_vec();
            buf.advance(len);
            Message::Proposal { sequence, payload }
        }
        0x08 => Message::ResyncRequest {
            cycle: get_u64(&mut buf)?,
            committed_epoch: get_u64(&mut buf)?,
            digest: get_array::<32>(&mut buf)?,
            node_id: NodeId(get_u64(&mut buf)?),
        },
        other => return Err(WireError::UnknownTag(other)),
    };
    if buf.has_remaining() {
        return Err(WireError::TrailingBytes(buf.remaining()));
    }
    Ok(msg)
}

fn put_vector(buf: &mut BytesMut, x: &QVector) {
    buf.put_u16_le(x.len() as u16);
    for q in x.iter() {
        buf.put_i32_le(q.to_bits());
    }
}

fn get_vector(buf: &mut &[u8]) -> Result<QVector> {
    let len = get_u16(buf)? as usize;
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(Q31::from_bits(get_i32(buf)?));
    }
    Ok(QVector::new(values))
}

fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut &[u8]) -> Result<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16_le())
}

fn get_u32(buf: &mut &[u8]) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32_le())
}

fn get_i32(buf: &mut &[u8]) -> Result<i32> {
    ensure(buf, 4)?;
    Ok(buf.get_i32_le())
}

fn get_u64(buf: &mut &[u8]) -> Result<u64> {
    ensure(buf, 8)?;
    Ok(buf.get_u64_le())
}

fn get_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N]> {
    ensure(buf, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[..N]);
    buf.advance(N);
    Ok(out)
}

fn ensure(buf: &&[u8], needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        Err(WireError::Truncated { needed: needed - buf.remaining() })
    } else {
        Ok(())
    }
}
