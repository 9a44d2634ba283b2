use rscp_codec::{
    decode_values, encode_values, frame_length, pack_frame, pack_frame_at, unpack_frame,
    CodecError, DataType, RscpValue, Tag, Value, CRC_LEN, FRAME_HEADER_LEN,
};

fn sample_values() -> Vec<RscpValue> {
    vec![
        RscpValue::new(Tag::EMS_POWER_PV, Value::Int32(4_210)),
        RscpValue::new(Tag::EMS_BAT_SOC, Value::UChar8(85)),
        RscpValue::new(Tag::INFO_SERIAL_NUMBER, Value::CString("S10-123456789".to_string())),
        RscpValue::container(
            Tag::WB_DATA,
            vec![
                RscpValue::new(Tag::WB_INDEX, Value::UChar8(1)),
                RscpValue::new(Tag::WB_PM_POWER_L1, Value::Double64(1_380.5)),
                RscpValue::new(Tag::WB_EXTERN_DATA, Value::ByteArray(vec![0, 0, 0x88, 16, 0, 0])),
                RscpValue::container(
                    Tag::WB_DEVICE_STATE,
                    vec![RscpValue::new(Tag::WB_DEVICE_WORKING, Value::Bool(true))],
                ),
            ],
        ),
        RscpValue::request(Tag::EMS_REQ_POWER_GRID),
        RscpValue::new(Tag(0x7F00_0001), Value::Timestamp { seconds: 1_700_000_000, nanos: 5 }),
    ]
}

#[test]
fn frame_round_trip_preserves_structure_and_values() {
    let values = sample_values();
    let frame = pack_frame_at(&values, 1_700_000_000, 42).expect("pack");

    let decoded = unpack_frame(&frame).expect("unpack");
    assert_eq!(decoded.seconds, 1_700_000_000);
    assert_eq!(decoded.nanos, 42);
    assert_eq!(decoded.values, values);
}

#[test]
fn frame_length_matches_packed_size() {
    let values = sample_values();
    let frame = pack_frame(&values).expect("pack");
    let body: usize = values.iter().map(RscpValue::encoded_len).sum();

    assert_eq!(frame_length(&frame), Some(frame.len()));
    assert_eq!(frame.len(), FRAME_HEADER_LEN + body + CRC_LEN);
    assert_eq!(frame_length(&frame[..FRAME_HEADER_LEN - 1]), None);
}

#[test]
fn truncated_frame_is_incomplete_not_malformed() {
    let frame = pack_frame(&sample_values()).expect("pack");
    let declared = frame_length(&frame).expect("header");
    let truncated = &frame[..declared - 3];

    assert_eq!(frame_length(truncated), Some(declared));
    assert!(matches!(
        unpack_frame(truncated),
        Err(CodecError::Incomplete { needed, available }) if needed == declared && available == declared - 3
    ));
}

#[test]
fn trailing_padding_after_frame_is_ignored() {
    let values = sample_values();
    let mut frame = pack_frame(&values).expect("pack");
    frame.extend_from_slice(&[0u8; 13]);

    let decoded = unpack_frame(&frame).expect("unpack");
    assert_eq!(decoded.values, values);
}

#[test]
fn corrupted_payload_fails_checksum() {
    let mut frame = pack_frame(&sample_values()).expect("pack");
    frame[FRAME_HEADER_LEN + 8] ^= 0x01;

    assert!(matches!(
        unpack_frame(&frame),
        Err(CodecError::ChecksumMismatch { .. })
    ));
}

#[test]
fn wrong_magic_is_rejected() {
    let mut frame = pack_frame(&sample_values()).expect("pack");
    frame[0] = 0x00;

    assert!(matches!(unpack_frame(&frame), Err(CodecError::InvalidMagic(_))));
}

#[test]
fn type_disagreeing_with_tag_namespace_is_rejected() {
    // EMS_POWER_PV is declared Int32; encode it as Uint16 by hand.
    let mut raw = Vec::new();
    raw.extend_from_slice(&Tag::EMS_POWER_PV.code().to_le_bytes());
    raw.push(DataType::Uint16.code());
    raw.extend_from_slice(&2u16.to_le_bytes());
    raw.extend_from_slice(&7u16.to_le_bytes());

    match decode_values(&raw) {
        Err(CodecError::TypeMismatch {
            tag,
            expected,
            actual,
        }) => {
            assert_eq!(tag, Tag::EMS_POWER_PV);
            assert_eq!(expected, DataType::Int32);
            assert_eq!(actual, DataType::Uint16);
        }
        other => panic!("expected type mismatch, got {other:?}"),
    }
}

#[test]
fn encoding_rejects_values_of_the_wrong_type() {
    let nested = RscpValue::container(
        Tag::WB_DATA,
        vec![RscpValue::new(Tag::WB_PM_POWER_L1, Value::Int32(1_400))],
    );

    assert!(matches!(
        pack_frame(&[RscpValue::new(Tag::EMS_POWER_PV, Value::Uint16(1))]),
        Err(CodecError::TypeMismatch {
            tag: Tag::EMS_POWER_PV,
            expected: DataType::Int32,
            actual: DataType::Uint16,
        })
    ));
    assert!(matches!(
        encode_values(&[nested]),
        Err(CodecError::TypeMismatch { tag: Tag::WB_PM_POWER_L1, .. })
    ));
    assert!(pack_frame(&[RscpValue::new(Tag::EMS_POWER_PV, Value::Error(6))]).is_ok());
}

#[test]
fn error_nodes_are_accepted_for_any_tag() {
    let values = vec![RscpValue::new(Tag::WB_DEVICE_NAME, Value::Error(0x06))];
    let encoded = encode_values(&values).expect("encode");

    let decoded = decode_values(&encoded).expect("decode");
    assert_eq!(decoded, values);
    assert!(decoded[0].value.is_error());
}

#[test]
fn fixed_width_length_mismatch_is_rejected() {
    let mut raw = Vec::new();
    raw.extend_from_slice(&Tag::EMS_BAT_SOC.code().to_le_bytes());
    raw.push(DataType::UChar8.code());
    raw.extend_from_slice(&2u16.to_le_bytes());
    raw.extend_from_slice(&[1, 2]);

    assert!(matches!(
        decode_values(&raw),
        Err(CodecError::InvalidLength { length: 2, .. })
    ));
}

#[test]
fn unknown_tags_decode_without_type_check() {
    let values = vec![RscpValue::new(Tag(0x7F80_0042), Value::Uint16(3))];
    let decoded = decode_values(&encode_values(&values).expect("encode")).expect("decode");

    assert_eq!(decoded, values);
    assert!(!decoded[0].tag.is_known());
    assert_eq!(decoded[0].tag.to_string(), "0x7f800042");
}

#[test]
fn container_lookup_by_child_and_path() {
    let values = sample_values();
    let wallbox = &values[3];

    assert_eq!(
        wallbox.child(Tag::WB_INDEX).map(|v| v.value.clone()),
        Some(Value::UChar8(1))
    );
    let working = RscpValue::find_by_path(
        &values,
        &[Tag::WB_DATA, Tag::WB_DEVICE_STATE, Tag::WB_DEVICE_WORKING],
    )
    .expect("path");
    assert_eq!(working.value.as_bool(), Some(true));
    assert!(RscpValue::find_by_path(&values, &[Tag::WB_DATA, Tag::SGR_STATE]).is_none());
}

#[test]
fn display_names_known_tags() {
    let value = RscpValue::container(
        Tag::SGR_DATA,
        vec![
            RscpValue::new(Tag::SGR_INDEX, Value::UChar8(0xFF)),
            RscpValue::new(Tag::SGR_STATE, Value::UChar8(2)),
        ],
    );

    assert_eq!(
        value.to_string(),
        "TAG_SGR_DATA { TAG_SGR_INDEX: UChar8(255), TAG_SGR_STATE: UChar8(2) }"
    );
    assert_eq!(Tag::EMS_REQ_POWER_PV.response(), Tag::EMS_POWER_PV);
    assert!(Tag::EMS_POWER_PV.is_response());
}
