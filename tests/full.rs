use ctf_writer::*;
use pretty_assertions::assert_eq;
use test_log::test;

const PACKET_RESIZE_TEST_LENGTH: usize = 100_000;
const SEQUENCE_TEST_LENGTH: usize = 10;
const ARRAY_TEST_LENGTH: usize = 5;

#[test]
fn packet_resize_and_discarded_events() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Writer::new(dir.path().join("trace")).unwrap();
    let trace = writer.trace();
    trace.set_byte_order(ByteOrder::LittleEndian).unwrap();

    let clock = Clock::new("spam_clock").unwrap();
    writer.add_clock(&clock).unwrap();

    let stream_class = StreamClass::new("spam").unwrap();
    stream_class.set_clock(&clock).unwrap();

    // Custom packet context: the size bookkeeping plus an
    // automatically filled discarded counter and one caller-owned
    // member
    let packet_context = FieldType::structure();
    packet_context
        .add_field(&FieldType::integer(32).unwrap(), "content_size")
        .unwrap();
    packet_context
        .add_field(&FieldType::integer(32).unwrap(), "packet_size")
        .unwrap();
    packet_context
        .add_field(&FieldType::integer(64).unwrap(), "events_discarded")
        .unwrap();
    packet_context
        .add_field(
            &FieldType::integer(64).unwrap(),
            "custom_packet_context_field",
        )
        .unwrap();
    stream_class.set_packet_context_type(&packet_context).unwrap();

    // Stream event context shared by every appended event
    let event_context = FieldType::structure();
    event_context
        .add_field(&FieldType::integer(8).unwrap(), "common_event_context")
        .unwrap();
    stream_class.set_event_context_type(&event_context).unwrap();

    let stream = writer.create_stream(&stream_class).unwrap();

    // Declaring a new event class against a live stream stays legal
    let event_class = EventClass::new("Spammy_Event").unwrap();
    event_class
        .add_field(&FieldType::integer(17).unwrap(), "field_1")
        .unwrap();
    event_class
        .add_field(&FieldType::string(), "a_string")
        .unwrap();
    stream_class.add_event_class(&event_class).unwrap();

    let stream_context = stream.event_context().unwrap();
    for i in 0..PACKET_RESIZE_TEST_LENGTH {
        let event = Event::new(&event_class).unwrap();
        clock.set_time(i as u64 + 1).unwrap();
        event
            .field("field_1")
            .unwrap()
            .set_unsigned(i as u64)
            .unwrap();
        event
            .field("a_string")
            .unwrap()
            .set_string("This is a test")
            .unwrap();
        stream_context
            .structure_field("common_event_context")
            .unwrap()
            .set_unsigned((i % 42) as u64)
            .unwrap();
        stream.append_event(&event).unwrap();
    }
    assert_eq!(stream.event_count(), PACKET_RESIZE_TEST_LENGTH);

    assert_eq!(stream.discarded_events_count(), 0);
    stream.append_discarded_events(1000);
    assert_eq!(stream.discarded_events_count(), 1000);

    // The caller-owned context member is still unset: the flush fails
    // and the packet stays buffered for retry
    assert!(matches!(stream.flush(), Err(Error::Unset(_))));
    assert_eq!(stream.event_count(), PACKET_RESIZE_TEST_LENGTH);

    stream
        .packet_context()
        .structure_field("custom_packet_context_field")
        .unwrap()
        .set_unsigned(2)
        .unwrap();
    stream.flush().unwrap();
    assert_eq!(stream.discarded_events_count(), 1000);
    assert_eq!(stream.event_count(), 0);

    let bytes = std::fs::read(writer.path().join("stream_0")).unwrap();
    // 48 byte header + context section, then 31 bytes per event
    let expected_len = 48 + PACKET_RESIZE_TEST_LENGTH * 31;
    assert_eq!(bytes.len(), expected_len);

    assert_eq!(&bytes[0..4], &CTF_MAGIC_NUMBER.to_le_bytes());
    let size_bits = (expected_len * 8) as u32;
    assert_eq!(&bytes[24..28], &size_bits.to_le_bytes());
    assert_eq!(&bytes[28..32], &size_bits.to_le_bytes());
    assert_eq!(&bytes[32..40], &1000_u64.to_le_bytes());
    assert_eq!(&bytes[40..48], &2_u64.to_le_bytes());

    // First event: id 0, timestamp 1, context 0, field_1 == 0, string
    assert_eq!(&bytes[48..52], &0_u32.to_le_bytes());
    assert_eq!(&bytes[52..60], &1_u64.to_le_bytes());
    assert_eq!(bytes[60], 0);
    assert_eq!(&bytes[64..79], b"This is a test\0");

    // Second event: timestamp 2, context 1, field_1 == 1
    assert_eq!(&bytes[83..91], &2_u64.to_le_bytes());
    assert_eq!(bytes[91], 1);
    assert_eq!(bytes[92], 1);
}

#[test]
fn nested_variant_and_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Writer::new(dir.path().join("trace")).unwrap();
    writer.trace().set_byte_order(ByteOrder::BigEndian).unwrap();

    let clock = Clock::new("nested_clock").unwrap();
    writer.add_clock(&clock).unwrap();

    let stream_class = StreamClass::new("nested").unwrap();
    stream_class.set_clock(&clock).unwrap();

    let int_16 = FieldType::integer(16).unwrap();
    int_16.set_signed(true).unwrap();
    let uint_3 = FieldType::integer(3).unwrap();
    let uint_35 = FieldType::integer(35).unwrap();

    let selector = FieldType::enumeration(&uint_3).unwrap();
    selector.add_mapping_unsigned("UINT3_TYPE", 0, 0).unwrap();
    selector.add_mapping_unsigned("INT16_TYPE", 1, 1).unwrap();
    selector.add_mapping_unsigned("UINT35_TYPE", 2, 7).unwrap();

    let variant = FieldType::variant(&selector, "variant_selector").unwrap();
    variant.add_variant_field(&uint_3, "UINT3_TYPE").unwrap();
    variant.add_variant_field(&int_16, "INT16_TYPE").unwrap();
    variant.add_variant_field(&uint_35, "UINT35_TYPE").unwrap();

    let inner = FieldType::structure();
    inner.add_field(&uint_35, "seq_len").unwrap();
    inner
        .add_field(&FieldType::sequence(&int_16, "seq_len").unwrap(), "a_sequence")
        .unwrap();
    inner
        .add_field(
            &FieldType::array(&int_16, ARRAY_TEST_LENGTH).unwrap(),
            "an_array",
        )
        .unwrap();

    let event_class = EventClass::new("Complex Test Event").unwrap();
    event_class.add_field(&selector, "variant_selector").unwrap();
    event_class.add_field(&FieldType::string(), "a_string").unwrap();
    event_class.add_field(&variant, "variant_value").unwrap();
    event_class.add_field(&inner, "inner_structure").unwrap();
    stream_class.add_event_class(&event_class).unwrap();

    let stream = writer.create_stream(&stream_class).unwrap();

    let event = Event::new(&event_class).unwrap();
    let tag = event.field("variant_selector").unwrap();
    tag.container().unwrap().set_unsigned(1).unwrap();

    let string_field = event.field("a_string").unwrap();
    string_field.set_string("Test string ").unwrap();
    string_field.append_string("abcde").unwrap();
    string_field.append_bytes(&b"abcdefg"[..4]).unwrap();
    assert_eq!(string_field.string().unwrap(), "Test string abcdeabcd");

    let variant_field = event.field("variant_value").unwrap();
    let int_16_field = variant_field.variant_field(&tag).unwrap();
    int_16_field.set_signed(-200).unwrap();
    assert!(variant_field
        .variant_current_field()
        .unwrap()
        .ptr_eq(&int_16_field));

    let inner_field = event.field("inner_structure").unwrap();
    let seq_len = inner_field.structure_field("seq_len").unwrap();
    seq_len.set_unsigned(SEQUENCE_TEST_LENGTH as u64).unwrap();
    let sequence = inner_field.structure_field("a_sequence").unwrap();
    sequence.sequence_set_length(&seq_len).unwrap();
    assert_eq!(sequence.sequence_length().unwrap(), 10);
    for i in 0..SEQUENCE_TEST_LENGTH {
        sequence
            .sequence_field(i)
            .unwrap()
            .set_signed(4 - i as i64)
            .unwrap();
    }
    assert!(sequence.sequence_field(SEQUENCE_TEST_LENGTH).is_err());

    let array = inner_field.structure_field("an_array").unwrap();
    for i in 0..ARRAY_TEST_LENGTH {
        array.array_field(i).unwrap().set_signed(i as i64).unwrap();
    }
    assert!(array.array_field(ARRAY_TEST_LENGTH).is_err());

    clock.set_time(7).unwrap();
    stream.append_event(&event).unwrap();
    stream.flush().unwrap();

    let bytes = std::fs::read(writer.path().join("stream_0")).unwrap();
    assert_eq!(bytes.len(), 104);
    assert_eq!(&bytes[0..4], &CTF_MAGIC_NUMBER.to_be_bytes());
    assert_eq!(&bytes[24..28], &832_u32.to_be_bytes());
    assert_eq!(&bytes[28..32], &832_u32.to_be_bytes());

    // 3-bit selector value 1, big endian bit packing
    assert_eq!(bytes[44], 0b0010_0000);
    assert_eq!(&bytes[45..67], b"Test string abcdeabcd\0");
    assert_eq!(&bytes[67..69], &(-200_i16).to_be_bytes());
    // 35-bit sequence length of 10 straddles the byte boundary
    assert_eq!(bytes[72], 0x01);
    assert_eq!(bytes[73], 0x40);
    assert_eq!(&bytes[74..76], &4_i16.to_be_bytes());
    assert_eq!(&bytes[84..86], &(-1_i16).to_be_bytes());
    assert_eq!(&bytes[94..96], &0_i16.to_be_bytes());
    assert_eq!(&bytes[102..104], &4_i16.to_be_bytes());
}

#[test]
fn deep_copy_identity() {
    let label_container = FieldType::integer(8).unwrap();
    let labels = FieldType::enumeration(&label_container).unwrap();
    labels.add_mapping_unsigned("LABEL1", 0, 0).unwrap();
    labels.add_mapping_unsigned("LABEL2", 1, 1).unwrap();

    let seq_elem = FieldType::integer(32).unwrap();
    let variant = FieldType::variant(&labels, "selector").unwrap();
    variant
        .add_variant_field(&FieldType::integer(8).unwrap(), "LABEL1")
        .unwrap();
    variant
        .add_variant_field(
            &FieldType::sequence(&seq_elem, "seq_len").unwrap(),
            "LABEL2",
        )
        .unwrap();

    let root_ty = FieldType::structure();
    root_ty
        .add_field(&FieldType::integer(16).unwrap(), "scalar")
        .unwrap();
    root_ty.add_field(&FieldType::floating_point(), "ratio").unwrap();
    root_ty.add_field(&labels, "selector").unwrap();
    root_ty
        .add_field(&FieldType::integer(8).unwrap(), "seq_len")
        .unwrap();
    root_ty.add_field(&variant, "value").unwrap();
    root_ty
        .add_field(
            &FieldType::array(&FieldType::string(), ARRAY_TEST_LENGTH).unwrap(),
            "names",
        )
        .unwrap();

    let root = Field::new(&root_ty).unwrap();
    root.structure_field("scalar").unwrap().set_unsigned(99).unwrap();
    root.structure_field("ratio").unwrap().set_float(0.5).unwrap();
    let selector = root.structure_field("selector").unwrap();
    selector.container().unwrap().set_unsigned(1).unwrap();
    let seq_len = root.structure_field("seq_len").unwrap();
    seq_len.set_unsigned(7).unwrap();
    let value = root.structure_field("value").unwrap();
    let sequence = value.variant_field(&selector).unwrap();
    sequence.sequence_set_length(&seq_len).unwrap();
    for i in 0..7 {
        sequence
            .sequence_field(i)
            .unwrap()
            .set_unsigned(i as u64 * 10)
            .unwrap();
    }
    let names = root.structure_field("names").unwrap();
    for i in 0..ARRAY_TEST_LENGTH {
        names
            .array_field(i)
            .unwrap()
            .set_string(&format!("name_{i}"))
            .unwrap();
    }
    assert!(root.is_set());

    let copy = root.copy();
    assert!(!copy.ptr_eq(&root));
    assert_eq!(copy.field_type(), root.field_type());
    assert!(copy.is_set());

    let copy_scalar = copy.structure_field("scalar").unwrap();
    assert!(!copy_scalar.ptr_eq(&root.structure_field("scalar").unwrap()));
    assert_eq!(copy_scalar.unsigned().unwrap(), 99);
    assert_eq!(copy.structure_field("ratio").unwrap().float().unwrap(), 0.5);
    assert_eq!(
        copy.structure_field("selector")
            .unwrap()
            .mapping_name()
            .unwrap()
            .as_str(),
        "LABEL2"
    );

    let copy_seq = copy
        .structure_field("value")
        .unwrap()
        .variant_current_field()
        .unwrap();
    assert!(!copy_seq.ptr_eq(&sequence));
    assert_eq!(copy_seq.field_type(), sequence.field_type());
    assert_eq!(copy_seq.sequence_length().unwrap(), 7);
    for i in 0..7 {
        assert_eq!(
            copy_seq.sequence_field(i).unwrap().unsigned().unwrap(),
            i as u64 * 10
        );
    }
    assert!(copy_seq.sequence_field(7).is_err());

    for i in 0..ARRAY_TEST_LENGTH {
        let original = names.array_field(i).unwrap();
        let copied = copy
            .structure_field("names")
            .unwrap()
            .array_field(i)
            .unwrap();
        assert!(!copied.ptr_eq(&original));
        assert_eq!(copied.string().unwrap(), format!("name_{i}"));
    }
}

#[test]
fn empty_flush_writes_a_well_formed_packet() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Writer::new(dir.path().join("trace")).unwrap();
    writer.trace().set_byte_order(ByteOrder::BigEndian).unwrap();

    let stream_class = StreamClass::new("empty_stream").unwrap();
    let stream = writer.create_stream(&stream_class).unwrap();

    stream.flush().unwrap();
    stream.flush().unwrap();
    assert_eq!(stream.packet_sequence_number(), 2);

    let bytes = std::fs::read(writer.path().join("stream_0")).unwrap();
    // Two header-only packets: 24 byte header + 8 byte context each
    assert_eq!(bytes.len(), 64);
    for packet in bytes.chunks(32) {
        assert_eq!(&packet[0..4], &CTF_MAGIC_NUMBER.to_be_bytes());
        assert_eq!(&packet[24..28], &256_u32.to_be_bytes());
        assert_eq!(&packet[28..32], &256_u32.to_be_bytes());
    }
}

#[test]
fn failed_append_leaves_the_packet_intact() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Writer::new(dir.path().join("trace")).unwrap();
    writer.trace().set_byte_order(ByteOrder::BigEndian).unwrap();

    let stream_class = StreamClass::new("atomic").unwrap();
    let event_class = EventClass::new("pair").unwrap();
    event_class
        .add_field(&FieldType::integer(32).unwrap(), "n")
        .unwrap();
    event_class
        .add_field(&FieldType::string(), "s")
        .unwrap();
    stream_class.add_event_class(&event_class).unwrap();
    let stream = writer.create_stream(&stream_class).unwrap();

    // The integer serializes before the unset string is discovered;
    // the buffer must roll back to the previous event boundary
    let partial = Event::new(&event_class).unwrap();
    partial.field("n").unwrap().set_unsigned(7).unwrap();
    assert!(matches!(
        stream.append_event(&partial),
        Err(Error::Unset(_))
    ));
    assert_eq!(stream.event_count(), 0);

    let complete = Event::new(&event_class).unwrap();
    complete.field("n").unwrap().set_unsigned(9).unwrap();
    complete.field("s").unwrap().set_string("ok").unwrap();
    stream.append_event(&complete).unwrap();
    stream.flush().unwrap();

    let bytes = std::fs::read(writer.path().join("stream_0")).unwrap();
    // 32 byte head + one 19 byte event, no trace of the failed append
    assert_eq!(bytes.len(), 51);
    assert_eq!(&bytes[24..28], &408_u32.to_be_bytes());
    assert_eq!(&bytes[44..48], &9_u32.to_be_bytes());
    assert_eq!(&bytes[48..51], b"ok\0");
}

#[test]
fn multiple_packets_per_stream() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Writer::new(dir.path().join("trace")).unwrap();
    writer.trace().set_byte_order(ByteOrder::BigEndian).unwrap();

    let stream_class = StreamClass::new("chunked").unwrap();
    let event_class = EventClass::new("tick").unwrap();
    event_class
        .add_field(&FieldType::integer(32).unwrap(), "n")
        .unwrap();
    stream_class.add_event_class(&event_class).unwrap();

    let stream = writer.create_stream(&stream_class).unwrap();
    for packet in 0..3_u32 {
        for i in 0..4_u32 {
            let event = Event::new(&event_class).unwrap();
            event
                .field("n")
                .unwrap()
                .set_unsigned(u64::from(packet * 4 + i))
                .unwrap();
            stream.append_event(&event).unwrap();
        }
        stream.flush().unwrap();
    }
    assert_eq!(stream.packet_sequence_number(), 3);

    let bytes = std::fs::read(writer.path().join("stream_0")).unwrap();
    // Each packet: 32 byte head + 4 events of (4 + 8 + 4) bytes
    assert_eq!(bytes.len(), 3 * (32 + 4 * 16));
    for (index, packet) in bytes.chunks(32 + 4 * 16).enumerate() {
        assert_eq!(&packet[0..4], &CTF_MAGIC_NUMBER.to_be_bytes());
        let first_value = u32::from_be_bytes(packet[44..48].try_into().unwrap());
        assert_eq!(first_value, index as u32 * 4);
    }
}
