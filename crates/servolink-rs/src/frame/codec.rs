//! Bit-exact encode/decode between `Frame` and the wire octet stream
//! (spec §4.1 "Frame Codec", §6).
//!
//! Payload bytes are packed seven bits per wire octet, MSB-first, the same
//! scheme system-exclusive MIDI streams use to keep the top bit of every
//! wire octet clear for use as the start-of-packet marker.

use super::{Frame, FrameHeader, MAX_PAYLOAD_BYTES};
use crate::error::DriverError;
use alloc::vec::Vec;

/// Packs `bytes` into 7-bit wire septets (high bit always clear).
pub fn pack_septets(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity((bytes.len() * 8).div_ceil(7));
    let mut acc: u32 = 0;
    let mut acc_bits: u32 = 0;
    for &b in bytes {
        acc = (acc << 8) | b as u32;
        acc_bits += 8;
        while acc_bits >= 7 {
            acc_bits -= 7;
            out.push(((acc >> acc_bits) & 0x7F) as u8);
        }
    }
    if acc_bits > 0 {
        out.push(((acc << (7 - acc_bits)) & 0x7F) as u8);
    }
    out
}

/// Inverse of [`pack_septets`]. Trailing bits that don't add up to a full
/// byte are padding and are dropped, which is exactly what the encoder
/// produced them from.
pub fn unpack_septets(septets: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(septets.len() * 7 / 8);
    let mut acc: u32 = 0;
    let mut acc_bits: u32 = 0;
    for &s in septets {
        acc = (acc << 7) | (s as u32 & 0x7F);
        acc_bits += 7;
        if acc_bits >= 8 {
            acc_bits -= 8;
            out.push(((acc >> acc_bits) & 0xFF) as u8);
        }
    }
    out
}

/// `sum(header octets, payload septets) mod 128` (spec §4.1 "Checksum").
/// A correctly appended checksum octet makes the sum of every octet up to
/// and including it congruent to 0 mod 128.
fn checksum(header: [u8; 2], septets: &[u8]) -> u8 {
    let mut sum: u32 = header[0] as u32 + header[1] as u32;
    for &s in septets {
        sum += s as u32;
    }
    ((128 - (sum % 128)) % 128) as u8
}

/// Serializes a frame to the wire octet sequence: header, payload septets,
/// and (for flow-controlled packet types) a trailing checksum octet.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, DriverError> {
    if frame.payload.len() > MAX_PAYLOAD_BYTES {
        return Err(DriverError::PayloadTooLarge);
    }
    let septets = pack_septets(&frame.payload);
    let mut header = frame.header;
    header.septet_len = septets.len() as u8;
    let header_octets = header.encode();

    let mut out = Vec::with_capacity(2 + septets.len() + 1);
    out.extend_from_slice(&header_octets);
    out.extend_from_slice(&septets);
    if header.packet_type.is_flow_controlled() {
        out.push(checksum(header_octets, &septets));
    }
    Ok(out)
}

/// Decodes a complete wire octet sequence (as delimited by the Packet
/// Classifier) into a `Frame`, validating the checksum when present.
pub fn decode(octets: &[u8]) -> Result<Frame, DriverError> {
    if octets.len() < 2 {
        return Err(DriverError::Fragment);
    }
    let header = FrameHeader::decode([octets[0], octets[1]])?;
    let septet_count = header.septet_len as usize;
    let flow_controlled = header.packet_type.is_flow_controlled();
    let expected_len = 2 + septet_count + usize::from(flow_controlled);
    if octets.len() != expected_len {
        return Err(DriverError::Fragment);
    }

    let septets = &octets[2..2 + septet_count];
    if flow_controlled {
        let received = octets[2 + septet_count];
        let expected = checksum([octets[0], octets[1]], septets);
        if received != expected {
            return Err(DriverError::BadChecksum);
        }
    }

    Ok(Frame::new(header, unpack_septets(septets)))
}

/// Total wire length (header + septets + optional checksum) a frame with
/// `header.septet_len` will occupy. Used by the classifier to know how many
/// octets to accumulate once the header has been read.
pub fn wire_len(header: &FrameHeader) -> usize {
    2 + header.septet_len as usize + usize::from(header.packet_type.is_flow_controlled())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PacketType;

    fn sample(payload: &[u8], packet_type: PacketType) -> Frame {
        Frame::new(
            FrameHeader {
                address: 5,
                packet_type,
                septet_len: 0,
                mode: false,
                from_node: false,
            },
            payload.to_vec(),
        )
    }

    #[test]
    fn septet_pack_unpack_round_trips() {
        for len in 0..=MAX_PAYLOAD_BYTES {
            let bytes: Vec<u8> = (0..len as u8).collect();
            let packed = pack_septets(&bytes);
            assert_eq!(unpack_septets(&packed), bytes);
        }
    }

    #[test]
    fn encode_decode_round_trips_for_command() {
        let frame = sample(&[1, 2, 3, 4, 5], PacketType::Command);
        let wire = encode(&frame).expect("encodes");
        let decoded = decode(&wire).expect("decodes");
        assert_eq!(decoded.payload, frame.payload);
        assert_eq!(decoded.header.address, frame.header.address);
        assert_eq!(decoded.header.packet_type, PacketType::Command);
    }

    #[test]
    fn max_payload_encodes_one_more_fails() {
        let max = vec![0xAAu8; MAX_PAYLOAD_BYTES];
        assert!(encode(&sample(&max, PacketType::Command)).is_ok());

        let too_big = vec![0xAAu8; MAX_PAYLOAD_BYTES + 1];
        assert_eq!(
            encode(&sample(&too_big, PacketType::Command)),
            Err(DriverError::PayloadTooLarge)
        );
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let frame = sample(&[9, 8, 7], PacketType::Response);
        let mut wire = encode(&frame).expect("encodes");
        *wire.last_mut().unwrap() ^= 0x01;
        assert_eq!(decode(&wire), Err(DriverError::BadChecksum));
    }

    #[test]
    fn non_flow_controlled_packet_has_no_checksum_octet() {
        let frame = sample(&[1, 2], PacketType::Trigger);
        let wire = encode(&frame).expect("encodes");
        // header (2) + 2 septets for 2 payload bytes, no checksum octet.
        assert_eq!(wire.len(), 2 + pack_septets(&[1, 2]).len());
    }

    #[test]
    fn valid_frame_checksum_sum_is_zero_mod_128() {
        let frame = sample(&[1, 2, 3], PacketType::Error);
        let wire = encode(&frame).expect("encodes");
        let sum: u32 = wire.iter().map(|&b| b as u32).sum();
        assert_eq!(sum % 128, 0);
    }
}
