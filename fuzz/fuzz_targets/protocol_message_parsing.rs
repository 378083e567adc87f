#![no_main]
use libfuzzer_sys::fuzz_target;
use pastel_mininode::network::protocol::{
    NetworkKind, ProtocolMessage, ProtocolParser, ALLOWED_COMMANDS, MAX_PROTOCOL_MESSAGE_LENGTH,
};

fuzz_target!(|data: &[u8]| {
    let magic = NetworkKind::Regtest.magic();

    // Framing must never panic, with or without the checksum field
    for with_checksum in [true, false] {
        let mut rest = data;
        while let Ok(Some((frame, used))) =
            ProtocolParser::parse_frame(magic, rest, with_checksum, MAX_PROTOCOL_MESSAGE_LENGTH)
        {
            let _ = ProtocolMessage::decode(&frame.command, &frame.payload, false);
            rest = &rest[used..];
        }
    }

    // Every catalog body decoder on raw input; decoded messages re-frame cleanly
    for command in ALLOWED_COMMANDS {
        for legacy_ping in [false, true] {
            if let Ok(message) = ProtocolMessage::decode(command, data, legacy_ping) {
                let framed = ProtocolParser::serialize_message(magic, &message, true);
                let parsed = ProtocolParser::parse_frame(
                    magic,
                    &framed,
                    true,
                    MAX_PROTOCOL_MESSAGE_LENGTH,
                );
                assert!(matches!(parsed, Ok(Some(_))));
            }
        }
    }
});
