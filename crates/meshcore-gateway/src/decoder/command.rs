//! Commands sent from TCP clients to the radio

use super::reader::{lossy_text, preview, PayloadReader};
use super::{label, DecodedFields};

/// Characters of outgoing message text kept in the log
const TEXT_PREVIEW: usize = 50;

const STATS_TYPES: &[(u8, &str)] = &[(0, "core"), (1, "radio"), (2, "packets")];

pub(super) fn decode_command(packet_type: u8, payload: &[u8]) -> Option<DecodedFields> {
    let mut buf = PayloadReader::new(&payload[1..]);

    let fields = match packet_type {
        // APPSTART
        0x01 => {
            if payload.len() < 3 {
                return None;
            }
            let app = lossy_text(&payload[2..]);
            DecodedFields::new()
                .with("version", payload[1])
                .with("app", app.trim())
        }
        // SEND_MSG
        0x02 => {
            let msg_type = buf.u8()?;
            let attempt = buf.u8()?;
            let timestamp = buf.uint_le(4);
            let to = buf.hex(6);
            let text = lossy_text(buf.rest());
            DecodedFields::new()
                .with("type", if msg_type == 1 { "command" } else { "message" })
                .with("attempt", attempt)
                .with("timestamp", timestamp)
                .with("to", to)
                .with("text", preview(&text, TEXT_PREVIEW))
        }
        // SEND_CHAN_MSG
        0x03 => {
            buf.skip(1); // flags
            let channel = buf.u8()?;
            let timestamp = buf.uint_le(4);
            let text = lossy_text(buf.rest());
            DecodedFields::new()
                .with("channel", channel)
                .with("timestamp", timestamp)
                .with("text", preview(&text, TEXT_PREVIEW))
        }
        // GET_CONTACTS
        0x04 => {
            let mut fields = DecodedFields::new();
            if payload.len() > 1 {
                fields.push("lastmod", buf.uint_le(4));
            }
            fields
        }
        // SET_TIME
        0x06 => DecodedFields::new().with("time", buf.uint_le(4)),
        // SET_NAME
        0x08 => DecodedFields::new().with("name", lossy_text(buf.rest())),
        // SET_RADIO
        0x0B => {
            let freq = buf.uint_le(4) as f64 / 1000.0;
            let bw = buf.uint_le(4) as f64 / 1000.0;
            let sf = buf.u8()?;
            let cr = buf.u8()?;
            DecodedFields::new()
                .with("freq_mhz", freq)
                .with("bw_khz", bw)
                .with("sf", sf)
                .with("cr", cr)
        }
        // SET_TX_POWER
        0x0C => DecodedFields::new().with("tx_power", buf.uint_le(4)),
        // SET_COORDS
        0x0E => {
            let lat = buf.int_le(4) as f64 / 1e6;
            let lon = buf.int_le(4) as f64 / 1e6;
            DecodedFields::new().with("lat", lat).with("lon", lon)
        }
        // DEVICE_QUERY
        0x16 => DecodedFields::new().with("query", "device_info"),
        // SEND_LOGIN: never log the password
        0x1A => {
            let to = buf.hex(32);
            let prefix: String = to.chars().take(12).collect();
            DecodedFields::new()
                .with("to", format!("{}...", prefix))
                .with("password", "***")
        }
        // GET_CHANNEL
        0x1F => DecodedFields::new().with("channel_idx", buf.u8()?),
        // SET_CHANNEL
        0x20 => {
            let idx = buf.u8()?;
            let name = buf.text(32);
            DecodedFields::new()
                .with("channel_idx", idx)
                .with("name", name.trim_end_matches('\0'))
        }
        // SET_DEVICE_PIN
        0x25 => DecodedFields::new().with("pin", buf.uint_le(4)),
        // GET_TELEMETRY
        0x27 => {
            buf.skip(3); // reserved
            if payload.len() > 4 {
                DecodedFields::new().with("target", buf.hex(6))
            } else {
                DecodedFields::new().with("target", "self")
            }
        }
        // PATH_DISCOVERY
        0x34 => {
            buf.skip(1); // reserved
            let target: String = buf.hex(32).chars().take(12).collect();
            DecodedFields::new().with("target", format!("{}...", target))
        }
        // GET_STATS
        0x38 => DecodedFields::new().with("stats_type", label(STATS_TYPES, buf.u8()?)),
        _ => return None,
    };

    Some(fields)
}
