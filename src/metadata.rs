use crate::{
    error::Error,
    schema::{FieldType, MappingRange, TypeId},
    trace::Trace,
    types::{ByteOrder, Value},
};
use itertools::Itertools;

/// Render a trace's TSDL metadata document.
///
/// Output is deterministic for a given trace: blocks appear in the
/// order trace, env, clocks, then one stream and its events per stream
/// class, all in insertion order.
pub fn render_metadata(trace: &Trace) -> Result<String, Error> {
    let renderer = Renderer {
        trace_byte_order: trace.byte_order().resolve(host_byte_order()),
    };
    renderer.render(trace)
}

fn host_byte_order() -> ByteOrder {
    if cfg!(target_endian = "big") {
        ByteOrder::BigEndian
    } else {
        ByteOrder::LittleEndian
    }
}

fn tabs(n: usize) -> String {
    "\t".repeat(n)
}

fn quoted(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}

struct Renderer {
    trace_byte_order: ByteOrder,
}

impl Renderer {
    fn render(&self, trace: &Trace) -> Result<String, Error> {
        let mut out = String::from("/* CTF 1.8 */\n\n");

        out.push_str("trace {\n");
        out.push_str("\tmajor = 1;\n");
        out.push_str("\tminor = 8;\n");
        out.push_str(&format!("\tuuid = \"{}\";\n", trace.uuid()));
        out.push_str(&format!("\tbyte_order = {};\n", self.trace_byte_order));
        out.push_str(&format!(
            "\tpacket.header := {};\n",
            self.type_text(&trace.packet_header_type(), 1)?
        ));
        out.push_str("};\n\n");

        out.push_str("env {\n");
        for index in 0..trace.environment_field_count() {
            let (name, value) = match (
                trace.environment_field_name(index),
                trace.environment_field_value(index),
            ) {
                (Some(n), Some(v)) => (n, v),
                _ => continue,
            };
            match value {
                Value::Integer(v) => out.push_str(&format!("\t{name} = {v};\n")),
                Value::String(v) => out.push_str(&format!("\t{name} = {};\n", quoted(&v))),
            }
        }
        out.push_str("};\n\n");

        for index in 0..trace.clock_count() {
            let clock = match trace.clock(index) {
                Some(c) => c,
                None => continue,
            };
            out.push_str("clock {\n");
            out.push_str(&format!("\tname = {};\n", clock.name()));
            out.push_str(&format!("\tuuid = \"{}\";\n", clock.uuid()));
            if let Some(description) = clock.description() {
                out.push_str(&format!("\tdescription = {};\n", quoted(&description)));
            }
            out.push_str(&format!("\tfreq = {};\n", clock.frequency()));
            out.push_str(&format!("\tprecision = {};\n", clock.precision()));
            out.push_str(&format!("\toffset_s = {};\n", clock.offset_seconds()));
            out.push_str(&format!("\toffset = {};\n", clock.offset()));
            out.push_str(&format!(
                "\tabsolute = {};\n",
                if clock.is_absolute() { "TRUE" } else { "FALSE" }
            ));
            out.push_str("};\n\n");
        }

        for index in 0..trace.stream_class_count() {
            let stream_class = match trace.stream_class(index) {
                Some(sc) => sc,
                None => continue,
            };
            let stream_id = stream_class.id().unwrap_or_default();

            out.push_str("stream {\n");
            out.push_str(&format!("\tid = {stream_id};\n"));
            out.push_str(&format!(
                "\tevent.header := {};\n",
                self.type_text(&stream_class.event_header_type(), 1)?
            ));
            out.push_str(&format!(
                "\tpacket.context := {};\n",
                self.type_text(&stream_class.packet_context_type(), 1)?
            ));
            if let Some(context) = stream_class.event_context_type() {
                out.push_str(&format!(
                    "\tevent.context := {};\n",
                    self.type_text(&context, 1)?
                ));
            }
            out.push_str("};\n\n");

            for ec_index in 0..stream_class.event_class_count() {
                let event_class = match stream_class.event_class(ec_index) {
                    Some(ec) => ec,
                    None => continue,
                };
                out.push_str("event {\n");
                out.push_str(&format!("\tname = {};\n", quoted(&event_class.name())));
                out.push_str(&format!(
                    "\tid = {};\n",
                    event_class.id().unwrap_or_default()
                ));
                out.push_str(&format!("\tstream_id = {stream_id};\n"));
                if let Some(Value::Integer(level)) = event_class.attribute_by_name("loglevel") {
                    out.push_str(&format!("\tloglevel = {level};\n"));
                }
                if let Some(Value::String(uri)) = event_class.attribute_by_name("model.emf.uri") {
                    out.push_str(&format!("\tmodel.emf.uri = {};\n", quoted(&uri)));
                }
                if let Some(context) = event_class.context_type() {
                    out.push_str(&format!(
                        "\tcontext := {};\n",
                        self.type_text(&context, 1)?
                    ));
                }
                out.push_str(&format!(
                    "\tfields := {};\n",
                    self.type_text(&event_class.payload_type(), 1)?
                ));
                out.push_str("};\n\n");
            }
        }

        Ok(out)
    }

    /// The TSDL expression of a type, without a field name. Multi-line
    /// for structures and variants, single-line otherwise.
    fn type_text(&self, ty: &FieldType, indent: usize) -> Result<String, Error> {
        Ok(match ty.type_id() {
            TypeId::Integer => {
                let byte_order = ty.byte_order().resolve(self.trace_byte_order);
                format!(
                    "integer {{ size = {}; align = {}; signed = {}; encoding = {}; base = {}; byte_order = {}; }}",
                    ty.integer_size()?,
                    ty.alignment(),
                    u8::from(ty.is_signed()?),
                    ty.encoding()?,
                    ty.base()?.radix(),
                    byte_order,
                )
            }
            TypeId::FloatingPoint => {
                let byte_order = ty.byte_order().resolve(self.trace_byte_order);
                format!(
                    "floating_point {{ exp_dig = {}; mant_dig = {}; byte_order = {}; align = {}; }}",
                    ty.exponent_digits()?,
                    ty.mantissa_digits()?,
                    byte_order,
                    ty.alignment(),
                )
            }
            TypeId::String => format!("string {{ encoding = {}; }}", ty.encoding()?),
            TypeId::Enumeration => {
                let mappings = (0..ty.mapping_count()?)
                    .map(|i| {
                        let mapping = ty.mapping(i)?;
                        let label = quoted(&mapping.label);
                        Ok(match mapping.range {
                            MappingRange::Unsigned(start, end) if start == end => {
                                format!("{label} = {start}")
                            }
                            MappingRange::Unsigned(start, end) => {
                                format!("{label} = {start} ... {end}")
                            }
                            MappingRange::Signed(start, end) if start == end => {
                                format!("{label} = {start}")
                            }
                            MappingRange::Signed(start, end) => {
                                format!("{label} = {start} ... {end}")
                            }
                        })
                    })
                    .collect::<Result<Vec<_>, Error>>()?
                    .iter()
                    .join(", ");
                format!(
                    "enum : {} {{ {} }}",
                    self.type_text(&ty.container()?, indent)?,
                    mappings
                )
            }
            TypeId::Structure => {
                let mut text = String::from("struct {\n");
                for i in 0..ty.field_count()? {
                    let (name, member) = ty.field(i)?;
                    text.push_str(&self.member_decl(&member, &name, indent + 1)?);
                }
                text.push_str(&format!("{}}} align({})", tabs(indent), ty.alignment()));
                text
            }
            TypeId::Variant => {
                let mut text = format!("variant <{}> {{\n", ty.tag_name()?);
                for i in 0..ty.field_count()? {
                    let (label, member) = ty.field(i)?;
                    text.push_str(&self.member_decl(&member, &label, indent + 1)?);
                }
                text.push_str(&format!("{}}}", tabs(indent)));
                text
            }
            TypeId::Array | TypeId::Sequence => {
                return Err(Error::invalid_argument(
                    "array and sequence types render as named members",
                ));
            }
        })
    }

    /// One `type name;` member declaration line, with `[...]` suffixes
    /// for arrays and sequences.
    fn member_decl(&self, ty: &FieldType, name: &str, indent: usize) -> Result<String, Error> {
        let mut suffix = String::new();
        let mut base = ty.clone();
        loop {
            match base.type_id() {
                TypeId::Array => {
                    suffix.push_str(&format!("[{}]", base.array_length()?));
                    base = base.element_type()?;
                }
                TypeId::Sequence => {
                    suffix.push_str(&format!("[{}]", base.length_field_name()?));
                    base = base.element_type()?;
                }
                _ => break,
            }
        }
        Ok(format!(
            "{}{} {}{};\n",
            tabs(indent),
            self.type_text(&base, indent)?,
            name,
            suffix
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::event::EventClass;
    use crate::stream::StreamClass;

    #[test]
    fn renders_the_preamble_and_trace_block() {
        let trace = Trace::new().unwrap();
        trace.set_byte_order(ByteOrder::BigEndian).unwrap();
        let text = render_metadata(&trace).unwrap();
        assert!(text.starts_with("/* CTF 1.8 */\n"));
        assert!(text.contains("major = 1;"));
        assert!(text.contains("minor = 8;"));
        assert!(text.contains("byte_order = be;"));
        assert!(text.contains(&format!("uuid = \"{}\";", trace.uuid())));
        // Default packet header members
        assert!(text.contains("} magic;"));
        assert!(text.contains("} uuid[16];"));
        assert!(text.contains("} stream_id;"));
    }

    #[test]
    fn renders_enum_mappings_and_single_points() {
        let container = FieldType::integer(64).unwrap();
        container.set_signed(true).unwrap();
        let e = FieldType::enumeration(&container).unwrap();
        e.add_mapping("neg", -12345, 0).unwrap();
        e.add_mapping("ok", 42, 42).unwrap();

        let ec = EventClass::new("with_enum").unwrap();
        ec.add_field(&e, "enum_field").unwrap();
        let sc = StreamClass::new("chan").unwrap();
        sc.add_event_class(&ec).unwrap();
        let trace = Trace::new().unwrap();
        trace.add_stream_class(&sc).unwrap();

        let text = render_metadata(&trace).unwrap();
        assert!(text.contains("enum : integer {"));
        assert!(text.contains("\"neg\" = -12345 ... 0, \"ok\" = 42"));
        assert!(text.contains("} enum_field;"));
    }

    #[test]
    fn renders_stream_and_event_blocks() {
        let ec = EventClass::new("Simple Event").unwrap();
        ec.add_field(&FieldType::integer(12).unwrap(), "integer_field")
            .unwrap();
        ec.set_attribute("loglevel", 5_i64).unwrap();
        ec.set_attribute("model.emf.uri", "uri:x").unwrap();

        let sc = StreamClass::new("chan").unwrap();
        sc.add_event_class(&ec).unwrap();
        let trace = Trace::new().unwrap();
        trace.add_stream_class(&sc).unwrap();

        let text = render_metadata(&trace).unwrap();
        assert!(text.contains("stream {\n\tid = 0;"));
        assert!(text.contains("event.header := struct {"));
        assert!(text.contains("packet.context := struct {"));
        assert!(text.contains("name = \"Simple Event\";"));
        assert!(text.contains("loglevel = 5;"));
        assert!(text.contains("model.emf.uri = \"uri:x\";"));
        assert!(text.contains("size = 12; align = 1; signed = 0;"));
        // Two renders are byte-identical
        assert_eq!(text, render_metadata(&trace).unwrap());
    }

    #[test]
    fn renders_variants_and_sequences_by_reference() {
        let tag_container = FieldType::integer(3).unwrap();
        let tag = FieldType::enumeration(&tag_container).unwrap();
        tag.add_mapping_unsigned("A", 0, 0).unwrap();
        let variant = FieldType::variant(&tag, "variant_selector").unwrap();
        variant
            .add_variant_field(&FieldType::integer(3).unwrap(), "A")
            .unwrap();

        let seq_elem = {
            let t = FieldType::integer(16).unwrap();
            t.set_signed(true).unwrap();
            t
        };
        let seq = FieldType::sequence(&seq_elem, "seq_len").unwrap();

        let ec = EventClass::new("nested").unwrap();
        ec.add_field(&tag, "variant_selector").unwrap();
        ec.add_field(&variant, "variant_value").unwrap();
        ec.add_field(&FieldType::integer(35).unwrap(), "seq_len")
            .unwrap();
        ec.add_field(&seq, "a_sequence").unwrap();

        let sc = StreamClass::new("chan").unwrap();
        sc.add_event_class(&ec).unwrap();
        let trace = Trace::new().unwrap();
        trace.add_stream_class(&sc).unwrap();

        let text = render_metadata(&trace).unwrap();
        assert!(text.contains("variant <variant_selector> {"));
        assert!(text.contains("} a_sequence[seq_len];"));
    }
}
