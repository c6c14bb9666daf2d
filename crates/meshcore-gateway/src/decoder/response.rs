//! Responses and push notifications sent by the radio

use super::reader::{le_signed, le_unsigned, lossy_text, preview, PayloadReader};
use super::{coordinate, label, DecodedFields, FieldValue};

/// Characters of received message text kept in the log
const TEXT_PREVIEW: usize = 100;

const CONTACT_TYPES: &[(u8, &str)] = &[(0, "node"), (1, "repeater"), (2, "room")];
const ADVERT_TYPES: &[(u8, &str)] = &[(0, "node"), (1, "client"), (2, "repeater"), (3, "room")];
const CONTACT_TEXT_TYPES: &[(u8, &str)] = &[(0, "text"), (1, "command"), (2, "signed")];
const CHANNEL_TEXT_TYPES: &[(u8, &str)] = &[(0, "text"), (1, "command")];

/// Text type carrying a 4-byte signature before the text
const TXT_TYPE_SIGNED: u8 = 2;

pub(super) fn decode_response(packet_type: u8, payload: &[u8]) -> Option<DecodedFields> {
    let mut buf = PayloadReader::new(&payload[1..]);

    let fields = match packet_type {
        // OK
        0x00 => {
            let mut fields = DecodedFields::new().with("status", "OK");
            if payload.len() == 5 {
                fields.push("value", le_unsigned(&payload[1..5]));
            }
            fields
        }
        // ERROR
        0x01 => {
            let mut fields = DecodedFields::new().with("status", "ERROR");
            if let Some(&code) = payload.get(1) {
                fields.push("error_code", code);
            }
            fields
        }
        // CONTACT_START
        0x02 => DecodedFields::new().with("contact_count", buf.uint_le(4)),
        // CONTACT, NEW_ADVERT
        0x03 | 0x8A => contact(&mut buf)?,
        // CONTACT_END
        0x04 => DecodedFields::new().with("lastmod", buf.uint_le(4)),
        // SELF_INFO
        0x05 => self_info(&mut buf)?,
        // MSG_SENT
        0x06 => {
            let msg_type = buf.u8()?;
            DecodedFields::new()
                .with("msg_type", msg_type)
                .with("expected_ack", buf.hex(4))
                .with("timeout_ms", buf.uint_le(4))
        }
        // CONTACT_MSG_RECV
        0x07 => contact_msg(&mut buf, None)?,
        // CHANNEL_MSG_RECV
        0x08 => channel_msg(&mut buf, None)?,
        // CURRENT_TIME
        0x09 => DecodedFields::new().with("time", buf.uint_le(4)),
        // NO_MORE_MSGS
        0x0A => DecodedFields::new().with("messages_available", false),
        // CONTACT_URI
        0x0B => DecodedFields::new().with("uri", format!("meshcore://{}", hex::encode(buf.rest()))),
        // BATTERY
        0x0C => {
            let mut fields = DecodedFields::new().with("level_mv", buf.uint_le(2));
            if payload.len() > 3 {
                fields.push("used_kb", buf.uint_le(4));
                fields.push("total_kb", buf.uint_le(4));
            }
            fields
        }
        // DEVICE_INFO
        0x0D => device_info(&mut buf, payload)?,
        // CONTACT_MSG_RECV_V3
        0x10 => {
            let snr = snr(&mut buf)?;
            contact_msg(&mut buf, Some(snr))?
        }
        // CHANNEL_MSG_RECV_V3
        0x11 => {
            let snr = snr(&mut buf)?;
            channel_msg(&mut buf, Some(snr))?
        }
        // CHANNEL_INFO
        0x12 => {
            let idx = buf.u8()?;
            let name_bytes = buf.take(32);
            let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
            DecodedFields::new()
                .with("channel_idx", idx)
                .with("name", lossy_text(&name_bytes[..end]))
        }
        // CUSTOM_VARS
        0x15 => {
            let raw = lossy_text(buf.rest());
            let pairs = raw
                .split(',')
                .filter_map(|pair| pair.split_once(':'))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            DecodedFields::new().with("vars", FieldValue::Pairs(pairs))
        }
        // STATS
        0x18 => stats(payload),
        // ADVERTISEMENT, PATH_UPDATE
        0x80 | 0x81 => DecodedFields::new().with("public_key", buf.hex(32)),
        // ACK
        0x82 => {
            if payload.len() >= 5 {
                DecodedFields::new().with("ack_code", buf.hex(4))
            } else {
                DecodedFields::new().with("ack", true)
            }
        }
        // MESSAGES_WAITING
        0x83 => DecodedFields::new().with("messages_waiting", true),
        // LOGIN_SUCCESS
        0x85 => {
            let mut fields = DecodedFields::new().with("login", "success");
            if payload.len() > 1 {
                let perms = buf.u8()?;
                fields.push("is_admin", perms & 1 == 1);
                fields.push("pubkey_prefix", buf.hex(6));
            }
            fields
        }
        // LOGIN_FAILED
        0x86 => DecodedFields::new().with("login", "failed"),
        // STATUS_RESPONSE
        0x87 => DecodedFields::new()
            .with("status_response", true)
            .with("data_len", (payload.len() - 1) as u64),
        // TELEMETRY_RESPONSE
        0x8B => {
            buf.skip(1); // reserved
            DecodedFields::new()
                .with("pubkey_prefix", buf.hex(6))
                .with("telemetry_len", payload.len() as i64 - 8)
        }
        // BINARY_RESPONSE
        0x8C => {
            buf.skip(1); // reserved
            DecodedFields::new()
                .with("tag", buf.hex(4))
                .with("data_len", payload.len() as i64 - 6)
        }
        _ => return None,
    };

    Some(fields)
}

/// Contact record shared by CONTACT and NEW_ADVERT
fn contact(buf: &mut PayloadReader<'_>) -> Option<DecodedFields> {
    let public_key = buf.hex(32);
    let contact_type = buf.u8()?;
    let _flags = buf.u8()?;
    let path_len = le_signed(buf.take(1));
    buf.skip(64); // path
    let name = buf.text(32).replace('\0', "");
    let last_advert = buf.uint_le(4);
    let lat = buf.int_le(4);
    let lon = buf.int_le(4);

    Some(
        DecodedFields::new()
            .with("name", name)
            .with("public_key", key_prefix(&public_key))
            .with("type", label(CONTACT_TYPES, contact_type))
            .with("path_len", path_len)
            .with("last_advert", last_advert)
            .with("lat", coordinate(lat))
            .with("lon", coordinate(lon)),
    )
}

fn self_info(buf: &mut PayloadReader<'_>) -> Option<DecodedFields> {
    let adv_type = buf.u8()?;
    let tx_power = buf.u8()?;
    let _max_tx_power = buf.u8()?;
    let public_key = buf.hex(32);
    let lat = buf.int_le(4);
    let lon = buf.int_le(4);
    // multi_acks, adv_loc_policy, telemetry_mode, manual_add_contacts
    buf.skip(4);
    let freq = buf.uint_le(4) as f64 / 1000.0;
    let bw = buf.uint_le(4) as f64 / 1000.0;
    let sf = buf.u8()?;
    let cr = buf.u8()?;
    let name = lossy_text(buf.rest());

    Some(
        DecodedFields::new()
            .with("name", name)
            .with("type", label(ADVERT_TYPES, adv_type))
            .with("public_key", key_prefix(&public_key))
            .with("tx_power", tx_power)
            .with("freq_mhz", freq)
            .with("bw_khz", bw)
            .with("sf", sf)
            .with("cr", cr)
            .with("lat", coordinate(lat))
            .with("lon", coordinate(lon)),
    )
}

fn device_info(buf: &mut PayloadReader<'_>, payload: &[u8]) -> Option<DecodedFields> {
    let fw_version = buf.u8()?;
    let mut fields = DecodedFields::new().with("fw_version", fw_version);

    if fw_version >= 3 && payload.len() > 60 {
        fields.push("max_contacts", u64::from(buf.u8()?) * 2);
        fields.push("max_channels", buf.u8()?);
        buf.skip(4); // ble_pin
        fields.push("fw_build", buf.text(12).replace('\0', ""));
        fields.push("model", buf.text(40).replace('\0', ""));
        fields.push("version", buf.text(20).replace('\0', ""));
    }

    Some(fields)
}

/// SNR byte and two reserved bytes leading the v3 message layouts
fn snr(buf: &mut PayloadReader<'_>) -> Option<f64> {
    let raw = buf.u8()? as i8;
    buf.skip(2);
    Some(f64::from(raw) / 4.0)
}

fn contact_msg(buf: &mut PayloadReader<'_>, snr: Option<f64>) -> Option<DecodedFields> {
    let from = buf.hex(6);
    let path_len = buf.u8()?;
    let txt_type = buf.u8()?;
    let timestamp = buf.uint_le(4);

    let mut fields = DecodedFields::new()
        .with("from", from)
        .with("path_len", path_len)
        .with("timestamp", timestamp);
    if let Some(snr) = snr {
        fields.push("snr", snr);
    }
    if txt_type == TXT_TYPE_SIGNED {
        fields.push("signature", buf.hex(4));
    }
    let text = lossy_text(buf.rest());
    fields.push("text", preview(&text, TEXT_PREVIEW));
    fields.push("type", label(CONTACT_TEXT_TYPES, txt_type));
    Some(fields)
}

fn channel_msg(buf: &mut PayloadReader<'_>, snr: Option<f64>) -> Option<DecodedFields> {
    let channel = buf.u8()?;
    let path_len = buf.u8()?;
    let txt_type = buf.u8()?;
    let timestamp = buf.uint_le(4);
    let text = lossy_text(buf.rest());

    let mut fields = DecodedFields::new()
        .with("channel", channel)
        .with("path_len", path_len)
        .with("timestamp", timestamp);
    if let Some(snr) = snr {
        fields.push("snr", snr);
    }
    fields.push("text", preview(&text, TEXT_PREVIEW));
    fields.push("type", label(CHANNEL_TEXT_TYPES, txt_type));
    Some(fields)
}

/// STATS payloads: sub-type byte followed by a fixed struct
fn stats(payload: &[u8]) -> DecodedFields {
    let Some(&stats_type) = payload.get(1) else {
        return DecodedFields::new();
    };
    let body = &payload[2..];
    let u16_at = |at: usize| u64::from(u16::from_le_bytes([body[at], body[at + 1]]));
    let u32_at =
        |at: usize| u64::from(u32::from_le_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]]));

    match stats_type {
        0 if body.len() >= 9 => DecodedFields::new()
            .with("stats_type", "core")
            .with("battery_mv", u16_at(0))
            .with("uptime_secs", u32_at(2))
            .with("errors", u16_at(6))
            .with("queue_len", body[8]),
        1 if body.len() >= 12 => DecodedFields::new()
            .with("stats_type", "radio")
            .with("noise_floor", i64::from(i16::from_le_bytes([body[0], body[1]])))
            .with("last_rssi", i64::from(body[2] as i8))
            .with("last_snr", f64::from(body[3] as i8) / 4.0)
            .with("tx_air_secs", u32_at(4))
            .with("rx_air_secs", u32_at(8)),
        2 if body.len() >= 24 => DecodedFields::new()
            .with("stats_type", "packets")
            .with("recv", u32_at(0))
            .with("sent", u32_at(4))
            .with("flood_tx", u32_at(8))
            .with("direct_tx", u32_at(12))
            .with("flood_rx", u32_at(16))
            .with("direct_rx", u32_at(20)),
        other => DecodedFields::new().with("stats_type", format!("unknown({})", other)),
    }
}

/// First 12 hex digits of a public key
fn key_prefix(public_key: &str) -> String {
    let prefix: String = public_key.chars().take(12).collect();
    format!("{}...", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact_payload(tag: u8, name: &str, lat: i32, lon: i32) -> Vec<u8> {
        let mut payload = vec![tag];
        payload.extend_from_slice(&[0xAB; 32]); // public key
        payload.push(1); // repeater
        payload.push(0); // flags
        payload.push(0xFF); // path_len = -1 (flood)
        payload.extend_from_slice(&[0; 64]);
        let mut name_field = [0u8; 32];
        name_field[..name.len()].copy_from_slice(name.as_bytes());
        payload.extend_from_slice(&name_field);
        payload.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        payload.extend_from_slice(&lat.to_le_bytes());
        payload.extend_from_slice(&lon.to_le_bytes());
        payload
    }

    #[test]
    fn test_ok_with_value() {
        let payload = [0x00, 0x78, 0x56, 0x34, 0x12];
        let fields = decode_response(0x00, &payload).unwrap();
        assert_eq!(
            fields,
            DecodedFields::new()
                .with("status", "OK")
                .with("value", 0x1234_5678u64)
        );
    }

    #[test]
    fn test_ok_without_value() {
        let fields = decode_response(0x00, &[0x00]).unwrap();
        assert_eq!(fields, DecodedFields::new().with("status", "OK"));
        let fields = decode_response(0x00, &[0x00, 1, 2]).unwrap();
        assert!(fields.get("value").is_none());
    }

    #[test]
    fn test_error_code() {
        let fields = decode_response(0x01, &[0x01, 0x02]).unwrap();
        assert_eq!(fields.to_summary(), "status=ERROR | error_code=2");
    }

    #[test]
    fn test_battery_short_payload() {
        let fields = decode_response(0x0C, &[0x0C, 0x04, 0x10]).unwrap();
        assert_eq!(fields, DecodedFields::new().with("level_mv", 4100u64));
    }

    #[test]
    fn test_battery_with_storage() {
        let mut payload = vec![0x0C];
        payload.extend_from_slice(&3900u16.to_le_bytes());
        payload.extend_from_slice(&128u32.to_le_bytes());
        payload.extend_from_slice(&1024u32.to_le_bytes());
        let fields = decode_response(0x0C, &payload).unwrap();
        assert_eq!(
            fields.to_summary(),
            "level_mv=3900 | used_kb=128 | total_kb=1024"
        );
    }

    #[test]
    fn test_contact_record() {
        let payload = contact_payload(0x03, "Base Camp", 47_123_456, 0);
        let fields = decode_response(0x03, &payload).unwrap();
        assert_eq!(fields.get("name"), Some(&FieldValue::Text("Base Camp".into())));
        assert_eq!(
            fields.get("public_key"),
            Some(&FieldValue::Text("abababababab...".into()))
        );
        assert_eq!(fields.get("type"), Some(&FieldValue::Text("repeater".into())));
        assert_eq!(fields.get("path_len"), Some(&FieldValue::Int(-1)));
        assert_eq!(fields.get("lat"), Some(&FieldValue::Float(47.123456)));
        assert_eq!(fields.get("lon"), Some(&FieldValue::Missing));

        // NEW_ADVERT shares the layout
        let advert = contact_payload(0x8A, "Peak", 0, 0);
        assert!(decode_response(0x8A, &advert).is_some());
    }

    #[test]
    fn test_truncated_contact_has_no_decoding() {
        let payload = contact_payload(0x03, "x", 0, 0);
        assert!(decode_response(0x03, &payload[..20]).is_none());
        // Truncation after the required bytes still decodes
        assert!(decode_response(0x03, &payload[..40]).is_some());
    }

    #[test]
    fn test_contact_message_signed() {
        let mut payload = vec![0x07];
        payload.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        payload.push(2); // path_len
        payload.push(TXT_TYPE_SIGNED);
        payload.extend_from_slice(&42u32.to_le_bytes());
        payload.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        payload.extend_from_slice(b"hello");

        let fields = decode_response(0x07, &payload).unwrap();
        assert_eq!(
            fields.to_summary(),
            "from=010203040506 | path_len=2 | timestamp=42 | signature=deadbeef | text=hello | type=signed"
        );
    }

    #[test]
    fn test_channel_message_v3_snr() {
        let mut payload = vec![0x11, (-10i8) as u8, 0, 0];
        payload.push(0); // channel
        payload.push(3); // path_len
        payload.push(0); // text
        payload.extend_from_slice(&7u32.to_le_bytes());
        payload.extend_from_slice("z".repeat(120).as_bytes());

        let fields = decode_response(0x11, &payload).unwrap();
        assert_eq!(fields.get("snr"), Some(&FieldValue::Float(-2.5)));
        assert_eq!(
            fields.get("text"),
            Some(&FieldValue::Text(format!("{}...", "z".repeat(100))))
        );
    }

    #[test]
    fn test_device_info_extended() {
        let mut payload = vec![0x0D, 8, 50, 8];
        payload.extend_from_slice(&123456u32.to_le_bytes());
        let mut build = [0u8; 12];
        build[..11].copy_from_slice(b"13 Jan 2026");
        payload.extend_from_slice(&build);
        let mut model = [0u8; 40];
        model[..10].copy_from_slice(b"Heltec V3 ");
        payload.extend_from_slice(&model);
        let mut version = [0u8; 20];
        version[..6].copy_from_slice(b"v1.9.0");
        payload.extend_from_slice(&version);

        let fields = decode_response(0x0D, &payload).unwrap();
        assert_eq!(fields.get("max_contacts"), Some(&FieldValue::Int(100)));
        assert_eq!(fields.get("fw_build"), Some(&FieldValue::Text("13 Jan 2026".into())));
        assert_eq!(fields.get("version"), Some(&FieldValue::Text("v1.9.0".into())));

        let old = decode_response(0x0D, &[0x0D, 2]).unwrap();
        assert_eq!(old, DecodedFields::new().with("fw_version", 2u8));
    }

    #[test]
    fn test_channel_info_stops_at_nul() {
        let mut payload = vec![0x12, 1];
        let mut name = [0u8; 32];
        name[..5].copy_from_slice(b"#test");
        name[6] = b'x';
        payload.extend_from_slice(&name);
        let fields = decode_response(0x12, &payload).unwrap();
        assert_eq!(fields.get("name"), Some(&FieldValue::Text("#test".into())));
    }

    #[test]
    fn test_custom_vars() {
        let mut payload = vec![0x15];
        payload.extend_from_slice(b"gps:1,bad,mode:a:b");
        let fields = decode_response(0x15, &payload).unwrap();
        assert_eq!(fields.to_summary(), "vars={gps=1, mode=a:b}");

        let empty = decode_response(0x15, &[0x15]).unwrap();
        assert_eq!(empty.get("vars"), Some(&FieldValue::Pairs(Vec::new())));
    }

    #[test]
    fn test_stats_variants() {
        let mut core = vec![0x18, 0x00];
        core.extend_from_slice(&4000u16.to_le_bytes());
        core.extend_from_slice(&3600u32.to_le_bytes());
        core.extend_from_slice(&2u16.to_le_bytes());
        core.push(5);
        assert_eq!(
            decode_response(0x18, &core).unwrap().to_summary(),
            "stats_type=core | battery_mv=4000 | uptime_secs=3600 | errors=2 | queue_len=5"
        );

        let mut radio = vec![0x18, 0x01];
        radio.extend_from_slice(&(-120i16).to_le_bytes());
        radio.push((-90i8) as u8);
        radio.push(22);
        radio.extend_from_slice(&10u32.to_le_bytes());
        radio.extend_from_slice(&20u32.to_le_bytes());
        assert_eq!(
            decode_response(0x18, &radio).unwrap().to_summary(),
            "stats_type=radio | noise_floor=-120 | last_rssi=-90 | last_snr=5.50 | tx_air_secs=10 | rx_air_secs=20"
        );

        // Short radio stats fall back to the type label
        let fields = decode_response(0x18, &radio[..6]).unwrap();
        assert_eq!(fields.to_summary(), "stats_type=unknown(1)");

        assert!(decode_response(0x18, &[0x18]).unwrap().is_empty());
    }

    #[test]
    fn test_push_notifications() {
        assert_eq!(
            decode_response(0x82, &[0x82, 1, 2, 3, 4]).unwrap().to_summary(),
            "ack_code=01020304"
        );
        assert_eq!(decode_response(0x82, &[0x82]).unwrap().to_summary(), "ack");
        assert_eq!(
            decode_response(0x83, &[0x83]).unwrap().to_summary(),
            "messages_waiting"
        );
        assert_eq!(
            decode_response(0x0A, &[0x0A]).unwrap().to_summary(),
            ""
        );
        assert_eq!(
            decode_response(0x85, &[0x85, 1, 9, 8, 7, 6, 5, 4]).unwrap().to_summary(),
            "login=success | is_admin | pubkey_prefix=090807060504"
        );
    }

    #[test]
    fn test_length_derived_fields_on_short_payloads() {
        let fields = decode_response(0x8B, &[0x8B]).unwrap();
        assert_eq!(fields.get("telemetry_len"), Some(&FieldValue::Int(-7)));
        let fields = decode_response(0x8C, &[0x8C, 0, 1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(fields.to_summary(), "tag=01020304 | data_len=2");
    }

    #[test]
    fn test_unknown_response() {
        assert!(decode_response(0x16, &[0x16]).is_none());
        assert!(decode_response(0xFE, &[0xFE, 0]).is_none());
    }
}
