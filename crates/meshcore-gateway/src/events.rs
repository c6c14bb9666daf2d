//! Packet event log
//!
//! Every frame crossing the gateway can be reported on stdout, one line per
//! event, as human-readable text or JSON. This output is separate from the
//! `tracing` diagnostics, which go to stderr.

use serde::Serialize;
use std::io::{self, Write};
use tracing::warn;

use crate::config::{EventFormat, EventLogConfig, EventLogLevel};
use crate::decoder::{self, DecodedFields, Direction};

/// Names of commands sent to the radio
const COMMAND_NAMES: &[(u8, &str)] = &[
    (0x01, "CMD_APPSTART"),
    (0x02, "CMD_SEND_MSG"),
    (0x03, "CMD_SEND_CHAN_MSG"),
    (0x04, "CMD_GET_CONTACTS"),
    (0x05, "CMD_GET_TIME"),
    (0x06, "CMD_SET_TIME"),
    (0x07, "CMD_SEND_ADVERT"),
    (0x08, "CMD_SET_NAME"),
    (0x09, "CMD_UPDATE_CONTACT"),
    (0x0A, "CMD_GET_MSG"),
    (0x0B, "CMD_SET_RADIO"),
    (0x0C, "CMD_SET_TX_POWER"),
    (0x0D, "CMD_RESET_PATH"),
    (0x0E, "CMD_SET_COORDS"),
    (0x0F, "CMD_REMOVE_CONTACT"),
    (0x10, "CMD_SHARE_CONTACT"),
    (0x11, "CMD_EXPORT_CONTACT"),
    (0x12, "CMD_IMPORT_CONTACT"),
    (0x13, "CMD_REBOOT"),
    (0x14, "CMD_GET_BATTERY"),
    (0x15, "CMD_SET_TUNING"),
    (0x16, "CMD_DEVICE_QUERY"),
    (0x17, "CMD_EXPORT_PRIVATE_KEY"),
    (0x18, "CMD_IMPORT_PRIVATE_KEY"),
    (0x1A, "CMD_SEND_LOGIN"),
    (0x1B, "CMD_SEND_STATUS_REQ"),
    (0x1D, "CMD_SEND_LOGOUT"),
    (0x1F, "CMD_GET_CHANNEL"),
    (0x20, "CMD_SET_CHANNEL"),
    (0x21, "CMD_SIGN_START"),
    (0x22, "CMD_SIGN_DATA"),
    (0x23, "CMD_SIGN_FINISH"),
    (0x24, "CMD_SEND_TRACE"),
    (0x25, "CMD_SET_DEVICE_PIN"),
    (0x26, "CMD_SET_OTHER_PARAMS"),
    (0x27, "CMD_GET_TELEMETRY"),
    (0x28, "CMD_GET_CUSTOM_VARS"),
    (0x29, "CMD_SET_CUSTOM_VAR"),
    (0x32, "CMD_BINARY_REQ"),
    (0x33, "CMD_FACTORY_RESET"),
    (0x34, "CMD_PATH_DISCOVERY"),
    (0x36, "CMD_SET_FLOOD_SCOPE"),
    (0x37, "CMD_SEND_CONTROL_DATA"),
    (0x38, "CMD_GET_STATS"),
    (0x39, "CMD_REQUEST_ADVERT"),
];

/// Names of responses and push notifications from the radio
const RESPONSE_NAMES: &[(u8, &str)] = &[
    (0x00, "OK"),
    (0x01, "ERROR"),
    (0x02, "CONTACT_START"),
    (0x03, "CONTACT"),
    (0x04, "CONTACT_END"),
    (0x05, "SELF_INFO"),
    (0x06, "MSG_SENT"),
    (0x07, "CONTACT_MSG_RECV"),
    (0x08, "CHANNEL_MSG_RECV"),
    (0x09, "CURRENT_TIME"),
    (0x0A, "NO_MORE_MSGS"),
    (0x0B, "CONTACT_URI"),
    (0x0C, "BATTERY"),
    (0x0D, "DEVICE_INFO"),
    (0x0E, "PRIVATE_KEY"),
    (0x0F, "DISABLED"),
    (0x10, "CONTACT_MSG_RECV_V3"),
    (0x11, "CHANNEL_MSG_RECV_V3"),
    (0x12, "CHANNEL_INFO"),
    (0x13, "SIGN_START"),
    (0x14, "SIGNATURE"),
    (0x15, "CUSTOM_VARS"),
    (0x18, "STATS"),
    (0x80, "ADVERTISEMENT"),
    (0x81, "PATH_UPDATE"),
    (0x82, "ACK"),
    (0x83, "MESSAGES_WAITING"),
    (0x84, "RAW_DATA"),
    (0x85, "LOGIN_SUCCESS"),
    (0x86, "LOGIN_FAILED"),
    (0x87, "STATUS_RESPONSE"),
    (0x88, "LOG_DATA"),
    (0x89, "TRACE_DATA"),
    (0x8A, "NEW_ADVERT"),
    (0x8B, "TELEMETRY_RESPONSE"),
    (0x8C, "BINARY_RESPONSE"),
    (0x8D, "PATH_DISCOVERY_RESPONSE"),
    (0x8E, "CONTROL_DATA"),
];

/// Human-readable name of a packet type
pub fn packet_type_name(direction: Direction, packet_type: u8) -> String {
    let (table, prefix) = match direction {
        Direction::ToRadio => (COMMAND_NAMES, "CMD_UNKNOWN"),
        Direction::FromRadio => (RESPONSE_NAMES, "RESP_UNKNOWN"),
    };
    table
        .iter()
        .find(|(tag, _)| *tag == packet_type)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| format!("{}(0x{:02x})", prefix, packet_type))
}

/// One JSON event line
#[derive(Debug, Serialize)]
struct JsonEvent<'a> {
    direction: &'static str,
    packet_type: &'a str,
    packet_type_raw: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    decoded: Option<&'a DecodedFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_len: Option<usize>,
}

/// Renders packet events according to an [`EventLogConfig`]
#[derive(Debug, Clone, Copy, Default)]
pub struct EventLogger {
    config: EventLogConfig,
}

impl EventLogger {
    /// Create a logger
    pub fn new(config: EventLogConfig) -> Self {
        Self { config }
    }

    /// True when events produce output
    pub fn is_enabled(&self) -> bool {
        self.config.level != EventLogLevel::Off
    }

    /// Render one event into output lines
    ///
    /// The packet type is the first payload byte, or 0 for an empty payload.
    pub fn render(&self, direction: Direction, payload: &[u8]) -> Vec<String> {
        if !self.is_enabled() {
            return Vec::new();
        }

        let packet_type = payload.first().copied().unwrap_or(0);
        let name = packet_type_name(direction, packet_type);
        let decoded = decoder::decode(direction, packet_type, payload).filter(|d| !d.is_empty());
        let verbose = self.config.level == EventLogLevel::Verbose;

        match self.config.format {
            EventFormat::Json => {
                let event = JsonEvent {
                    direction: direction.as_str(),
                    packet_type: &name,
                    packet_type_raw: packet_type,
                    decoded: decoded.as_ref(),
                    payload_hex: verbose.then(|| hex::encode(payload)),
                    payload_len: verbose.then_some(payload.len()),
                };
                match serde_json::to_string(&event) {
                    Ok(line) => vec![line],
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize packet event");
                        Vec::new()
                    }
                }
            }
            EventFormat::Text => {
                let arrow = direction.arrow();
                let summary = decoded.map(|d| d.to_summary()).filter(|s| !s.is_empty());
                match (summary, verbose) {
                    (Some(summary), false) => vec![format!("{} {}: {}", arrow, name, summary)],
                    (Some(summary), true) => vec![
                        format!("{} {}: {}", arrow, name, summary),
                        format!("   [{} bytes]: {}", payload.len(), hex::encode(payload)),
                    ],
                    (None, false) => vec![format!("{} {}", arrow, name)],
                    (None, true) => vec![format!(
                        "{} {} [{} bytes]: {}",
                        arrow,
                        name,
                        payload.len(),
                        hex::encode(payload)
                    )],
                }
            }
        }
    }

    /// Write one event to stdout
    pub fn log(&self, direction: Direction, payload: &[u8]) {
        let lines = self.render(direction, payload);
        if lines.is_empty() {
            return;
        }

        let stdout = io::stdout();
        let mut out = stdout.lock();
        for line in &lines {
            if let Err(e) = writeln!(out, "{}", line) {
                warn!(error = %e, "Failed to write packet event");
                return;
            }
        }
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger(level: EventLogLevel, format: EventFormat) -> EventLogger {
        EventLogger::new(EventLogConfig { level, format })
    }

    const SET_NAME: &[u8] = &[0x08, b'A', b'l', b'i', b'c', b'e'];

    #[test]
    fn test_type_names() {
        assert_eq!(packet_type_name(Direction::ToRadio, 0x08), "CMD_SET_NAME");
        assert_eq!(packet_type_name(Direction::FromRadio, 0x08), "CHANNEL_MSG_RECV");
        assert_eq!(packet_type_name(Direction::ToRadio, 0xAB), "CMD_UNKNOWN(0xab)");
        assert_eq!(packet_type_name(Direction::FromRadio, 0x7F), "RESP_UNKNOWN(0x7f)");
    }

    #[test]
    fn test_off_renders_nothing() {
        let logger = logger(EventLogLevel::Off, EventFormat::Text);
        assert!(!logger.is_enabled());
        assert!(logger.render(Direction::ToRadio, SET_NAME).is_empty());
    }

    #[test]
    fn test_text_summary() {
        let logger = logger(EventLogLevel::Summary, EventFormat::Text);
        assert_eq!(
            logger.render(Direction::ToRadio, SET_NAME),
            vec!["-> CMD_SET_NAME: name=Alice"]
        );
        assert_eq!(
            logger.render(Direction::FromRadio, &[0x83]),
            vec!["<- MESSAGES_WAITING: messages_waiting"]
        );
        // Undecoded packets show only the name
        assert_eq!(logger.render(Direction::ToRadio, &[0x13]), vec!["-> CMD_REBOOT"]);
    }

    #[test]
    fn test_text_verbose() {
        let logger = logger(EventLogLevel::Verbose, EventFormat::Text);
        assert_eq!(
            logger.render(Direction::ToRadio, SET_NAME),
            vec!["-> CMD_SET_NAME: name=Alice", "   [6 bytes]: 08416c696365"]
        );
        assert_eq!(
            logger.render(Direction::FromRadio, &[0x84, 0x01, 0x02]),
            vec!["<- RAW_DATA [3 bytes]: 840102"]
        );
    }

    #[test]
    fn test_empty_decoding_counts_as_none() {
        // GET_CONTACTS without lastmod decodes to an empty mapping
        let text = logger(EventLogLevel::Summary, EventFormat::Text);
        assert_eq!(text.render(Direction::ToRadio, &[0x04]), vec!["-> CMD_GET_CONTACTS"]);

        let json = logger(EventLogLevel::Summary, EventFormat::Json);
        let line = &json.render(Direction::ToRadio, &[0x04])[0];
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(value.get("decoded").is_none());
    }

    #[test]
    fn test_json_summary() {
        let logger = logger(EventLogLevel::Summary, EventFormat::Json);
        let lines = logger.render(Direction::ToRadio, SET_NAME);
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0],
            r#"{"direction":"TO_RADIO","packet_type":"CMD_SET_NAME","packet_type_raw":8,"decoded":{"name":"Alice"}}"#
        );
    }

    #[test]
    fn test_json_verbose() {
        let logger = logger(EventLogLevel::Verbose, EventFormat::Json);
        let lines = logger.render(Direction::FromRadio, &[0x00, 0x78, 0x56, 0x34, 0x12]);
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();

        assert_eq!(value["direction"], "FROM_RADIO");
        assert_eq!(value["packet_type"], "OK");
        assert_eq!(value["packet_type_raw"], 0);
        assert_eq!(value["decoded"]["status"], "OK");
        assert_eq!(value["decoded"]["value"], 0x1234_5678);
        assert_eq!(value["payload_hex"], "0078563412");
        assert_eq!(value["payload_len"], 5);
    }

    #[test]
    fn test_empty_payload() {
        let logger = logger(EventLogLevel::Verbose, EventFormat::Text);
        assert_eq!(
            logger.render(Direction::FromRadio, &[]),
            vec!["<- OK [0 bytes]: "]
        );
    }
}
