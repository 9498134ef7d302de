//! Request packet encoders.

use super::{padded_str, read_i16, read_u32, require, DecodeError, HEADER_LEN};

/// Size of every fixed request packet.
pub const COMMAND_LEN: usize = 40;

/// Size of a HISTORY_DATA request (header plus request fields).
pub const HISTORY_DATA_REQUEST_LEN: usize = 48;

/// Sender id this driver identifies itself with.
pub const SENDER_ID: &str = "PC2000";

const SENDER_LEN: usize = 8;
const COMMAND_FIELD_LEN: usize = 8;
const ARGUMENT_LEN: usize = 12;

/// Requests understood by the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Discovery broadcast.
    Search,
    /// Unit configuration.
    Setup,
    /// Current readings.
    NowRecord,
    /// Per-year archive record counts.
    HistoryIndex,
    /// `count` archive records of `year` starting at record `start`.
    HistoryData { year: u16, count: u16, start: u32 },
}

impl Command {
    /// Encode the request exactly as the station expects it on the wire.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Command::Search => encode_command(SENDER_ID, "SEARCH", "").to_vec(),
            Command::Setup => encode_command(SENDER_ID, "READ", "SETUP").to_vec(),
            Command::NowRecord => encode_command(SENDER_ID, "READ", "NOWRECORD").to_vec(),
            Command::HistoryIndex => {
                let mut packet = encode_command(SENDER_ID, "READ", "HISTORY_FILE");
                packet[32..36].copy_from_slice(&(COMMAND_LEN as i32).to_le_bytes());
                packet.to_vec()
            }
            Command::HistoryData { year, count, start } => {
                let header = encode_command(SENDER_ID, "READ", "HISTORY_DATA");
                let reply_len = count as i32 * super::ARCHIVE_RECORD_LEN as i32
                    + super::ARCHIVE_RECORDS_OFFSET as i32;

                let mut packet = Vec::with_capacity(HISTORY_DATA_REQUEST_LEN);
                packet.extend_from_slice(&header[..HEADER_LEN]);
                packet.extend_from_slice(&(HISTORY_DATA_REQUEST_LEN as i32).to_le_bytes());
                packet.extend_from_slice(&reply_len.to_le_bytes());
                packet.extend_from_slice(&(year as i16).to_le_bytes());
                packet.extend_from_slice(&(count as i16).to_le_bytes());
                packet.extend_from_slice(&(start as i32).to_le_bytes());
                packet
            }
        }
    }
}

/// Build a 40-byte command packet.
///
/// Layout: 8-byte sender id, 8-byte command, 12-byte argument, zero fill. Strings are null
/// padded and truncated to their field.
pub fn encode_command(sender: &str, command: &str, argument: &str) -> [u8; COMMAND_LEN] {
    let mut packet = [0u8; COMMAND_LEN];
    put_padded(&mut packet[0..SENDER_LEN], sender);
    put_padded(
        &mut packet[SENDER_LEN..SENDER_LEN + COMMAND_FIELD_LEN],
        command,
    );
    let arg_at = SENDER_LEN + COMMAND_FIELD_LEN;
    put_padded(&mut packet[arg_at..arg_at + ARGUMENT_LEN], argument);
    packet
}

/// The three strings of a packet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub sender: String,
    pub command: String,
    pub argument: String,
}

/// Decode the sender/command/argument of any packet.
pub fn decode_header(buf: &[u8]) -> Result<PacketHeader, DecodeError> {
    require("header", buf, HEADER_LEN)?;
    Ok(PacketHeader {
        sender: padded_str(&buf[0..8]),
        command: padded_str(&buf[8..16]),
        argument: padded_str(&buf[16..32]),
    })
}

/// Parse a request packet back into a [`Command`].
pub fn decode_command(buf: &[u8]) -> Result<Command, DecodeError> {
    let header = decode_header(buf)?;
    match (header.command.as_str(), header.argument.as_str()) {
        ("SEARCH", _) => Ok(Command::Search),
        ("READ", "SETUP") => Ok(Command::Setup),
        ("READ", "NOWRECORD") => Ok(Command::NowRecord),
        ("READ", "HISTORY_FILE") => Ok(Command::HistoryIndex),
        ("READ", "HISTORY_DATA") => {
            require("history data request", buf, HISTORY_DATA_REQUEST_LEN)?;
            Ok(Command::HistoryData {
                year: read_i16(buf, 40) as u16,
                count: read_i16(buf, 42) as u16,
                start: read_u32(buf, 44),
            })
        }
        _ => Err(DecodeError::UnknownCommand {
            command: header.command,
            argument: header.argument,
        }),
    }
}

/// Check that `reply` answers `request`.
///
/// The station answers with command `WRITE` (some firmware echoes `READ`) and the request's
/// argument at the start of the argument field. Bytes after the argument's terminating null
/// are echo noise and are not compared.
pub fn check_reply(request: &[u8], reply: &[u8]) -> Result<(), DecodeError> {
    let expected = decode_header(request)?.argument;
    require("reply header", reply, HEADER_LEN)?;

    let command = padded_str(&reply[8..16]);
    let field = &reply[16..HEADER_LEN];
    let answers = matches!(command.as_str(), "WRITE" | "READ")
        && field.starts_with(expected.as_bytes())
        && field.get(expected.len()).map_or(true, |&b| b == 0);
    if answers {
        return Ok(());
    }

    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    Err(DecodeError::UnexpectedReply {
        expected,
        command,
        argument: String::from_utf8_lossy(&field[..end]).into_owned(),
    })
}

fn put_padded(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(field.len());
    field[..n].copy_from_slice(&bytes[..n]);
}
