//! Katapult jump-to-application over raw CAN.
//!
//! No vendor tool exposes this path, so the two frames are crafted here and
//! written straight to the kernel CAN socket bound to the device's
//! interface. The UUID and interface name are only ever handled as values;
//! nothing is interpolated into command or script text.
//!
//! Sequence (Katapult admin protocol):
//!   1. admin id 0x3f0 <- 0x11 | uuid[6] | 0x80     assigns node id 0x200
//!   2. (100 ms)
//!   3. node id 0x200 <- 01 88 15 00 crc_lo crc_hi 99 03
//! where the CRC is CRC-16/MCRF4XX over the command body [0x15, 0x00] —
//! the COMPLETE command that jumps to the application.

use std::time::Duration;

use crc::{Crc, CRC_16_MCRF4XX};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Socket, StandardId};
use tracing::info;

use crate::error::TransportError;

/// Katapult admin (broadcast) arbitration id
pub const KATAPULT_ADMIN_ID: u16 = 0x3f0;
/// Node id assigned by the set-id frame below
pub const KATAPULT_NODE_ID: u16 = 0x200;

/// Node-id index byte carried by the assign frame (index 128 -> id 0x200)
const NODE_ID_INDEX: u8 = 0x80;
/// Katapult COMPLETE command byte
const CMD_COMPLETE: u8 = 0x15;

const KATAPULT_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MCRF4XX);

/// CRC-16/MCRF4XX as used by the Katapult packet framing
pub fn crc16(data: &[u8]) -> u16 {
    KATAPULT_CRC.checksum(data)
}

/// Parse a 12-hex-character CAN UUID into its 6 raw bytes
pub fn parse_uuid(uuid: &str) -> Result<[u8; 6], TransportError> {
    let uuid = uuid.trim();
    if uuid.len() != 12 || !uuid.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TransportError::InvalidUuid(uuid.to_string()));
    }
    let mut bytes = [0u8; 6];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = u8::from_str_radix(&uuid[i * 2..i * 2 + 2], 16)
            .map_err(|_| TransportError::InvalidUuid(uuid.to_string()))?;
    }
    Ok(bytes)
}

/// Frame 1: assign node id 0x200 to the node with this UUID
pub fn assign_id_payload(uuid: &[u8; 6]) -> [u8; 8] {
    let mut payload = [0u8; 8];
    payload[0] = 0x11;
    payload[1..7].copy_from_slice(uuid);
    payload[7] = NODE_ID_INDEX;
    payload
}

/// Frame 2: the framed COMPLETE command
pub fn complete_payload() -> [u8; 8] {
    let body = [CMD_COMPLETE, 0x00];
    let crc = crc16(&body);
    [
        0x01,
        0x88,
        body[0],
        body[1],
        (crc & 0xff) as u8,
        (crc >> 8) as u8,
        0x99,
        0x03,
    ]
}

fn write_std_frame(socket: &CanSocket, id: u16, payload: &[u8; 8]) -> Result<(), TransportError> {
    let id = StandardId::new(id)
        .ok_or_else(|| TransportError::CanError(format!("invalid CAN id: {id:#x}")))?;
    let frame = CanFrame::new(id, payload)
        .ok_or_else(|| TransportError::CanError("failed to build CAN frame".to_string()))?;
    socket
        .write_frame(&frame)
        .map_err(|e| TransportError::CanError(e.to_string()))?;
    Ok(())
}

/// Send the jump-to-application sequence to one node.
///
/// The socket work is blocking, so it runs on the blocking pool.
pub async fn send_jump_to_application(interface: &str, uuid: &str) -> Result<(), TransportError> {
    let uuid_bytes = parse_uuid(uuid)?;
    let interface = interface.to_string();
    let uuid = uuid.to_string();

    tokio::task::spawn_blocking(move || {
        let socket = CanSocket::open(&interface).map_err(|e| {
            TransportError::CanError(format!("failed to open {interface}: {e}"))
        })?;

        write_std_frame(&socket, KATAPULT_ADMIN_ID, &assign_id_payload(&uuid_bytes))?;
        std::thread::sleep(Duration::from_millis(100));
        write_std_frame(&socket, KATAPULT_NODE_ID, &complete_payload())?;

        info!("jump-to-application sent to {uuid} on {interface}");
        Ok(())
    })
    .await
    .map_err(|e| TransportError::CanError(format!("sender task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_matches_katapult_reference() {
        // Reference value from the Katapult COMPLETE command body
        assert_eq!(crc16(&[0x15, 0x00]), 0x1b91);
    }

    #[test]
    fn assign_frame_bytes() {
        let uuid = parse_uuid("11223344aabb").unwrap();
        assert_eq!(
            assign_id_payload(&uuid),
            [0x11, 0x11, 0x22, 0x33, 0x44, 0xaa, 0xbb, 0x80]
        );
    }

    #[test]
    fn complete_frame_bytes() {
        assert_eq!(
            complete_payload(),
            [0x01, 0x88, 0x15, 0x00, 0x91, 0x1b, 0x99, 0x03]
        );
    }

    #[test]
    fn uuid_validation() {
        assert!(parse_uuid("11223344aabb").is_ok());
        assert!(parse_uuid("11223344aab").is_err());
        assert!(parse_uuid("11223344aabg").is_err());
        assert!(parse_uuid("").is_err());
    }
}
