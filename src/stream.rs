use crate::{
    buffer::BitWriter,
    error::Error,
    event::{Event, EventClass},
    field::Field,
    schema::{FieldType, TypeId},
    trace::{Clock, Trace, TraceInner},
    types::{
        validate_identifier, EventCount, EventId, SequenceNumber, StreamId, Timestamp,
        CTF_MAGIC_NUMBER,
    },
};
use fxhash::FxHashMap;
use internment::Intern;
use std::{
    cell::{Cell, RefCell},
    fs::File,
    io::Write,
    rc::{Rc, Weak},
};
use tracing::debug;

/// Default capacity of a stream's packet buffer (bytes).
const DEFAULT_PACKET_CAPACITY: usize = 4096;

/// A container of event classes plus the per-stream schema types
/// (packet context, event header, stream event context) and an
/// optional clock.
///
/// Producing a stream freezes the class: the schema types, the clock
/// binding, and the ID become immutable. New event classes may still
/// be added afterwards.
#[derive(Clone, Debug)]
pub struct StreamClass {
    inner: Rc<StreamClassInner>,
}

#[derive(Debug)]
pub(crate) struct StreamClassInner {
    name: Intern<String>,
    id: Cell<Option<StreamId>>,
    clock: RefCell<Option<Clock>>,
    packet_context_type: RefCell<FieldType>,
    event_header_type: RefCell<FieldType>,
    event_context_type: RefCell<Option<FieldType>>,
    event_classes: RefCell<Vec<EventClass>>,
    event_ids: RefCell<FxHashMap<EventId, usize>>,
    event_names: RefCell<FxHashMap<Intern<String>, usize>>,
    next_event_id: Cell<EventId>,
    trace: RefCell<Option<Weak<TraceInner>>>,
    frozen: Cell<bool>,
}

fn default_packet_context_type() -> Result<FieldType, Error> {
    let context = FieldType::structure();
    context.add_field(&FieldType::integer(32)?, "content_size")?;
    context.add_field(&FieldType::integer(32)?, "packet_size")?;
    Ok(context)
}

fn default_event_header_type() -> Result<FieldType, Error> {
    let header = FieldType::structure();
    header.add_field(&FieldType::integer(32)?, "id")?;
    header.add_field(&FieldType::integer(64)?, "timestamp")?;
    Ok(header)
}

impl StreamClass {
    pub fn new(name: &str) -> Result<Self, Error> {
        validate_identifier(name)?;
        Ok(Self {
            inner: Rc::new(StreamClassInner {
                name: Intern::new(name.to_owned()),
                id: Cell::new(None),
                clock: RefCell::new(None),
                packet_context_type: RefCell::new(default_packet_context_type()?),
                event_header_type: RefCell::new(default_event_header_type()?),
                event_context_type: RefCell::new(None),
                event_classes: RefCell::new(Vec::new()),
                event_ids: RefCell::new(FxHashMap::default()),
                event_names: RefCell::new(FxHashMap::default()),
                next_event_id: Cell::new(0),
                trace: RefCell::new(None),
                frozen: Cell::new(false),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Rc<StreamClassInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<StreamClassInner> {
        Rc::downgrade(&self.inner)
    }

    pub fn name(&self) -> Intern<String> {
        self.inner.name
    }

    /// The class ID, assigned explicitly or by the trace on add.
    pub fn id(&self) -> Option<StreamId> {
        self.inner.id.get()
    }

    pub fn set_id(&self, id: StreamId) -> Result<(), Error> {
        if self.inner.frozen.get() {
            return Err(Error::Frozen);
        }
        self.inner.id.set(Some(id));
        Ok(())
    }

    pub(crate) fn assign_id(&self, id: StreamId) {
        self.inner.id.set(Some(id));
    }

    pub fn clock(&self) -> Option<Clock> {
        self.inner.clock.borrow().clone()
    }

    pub fn set_clock(&self, clock: &Clock) -> Result<(), Error> {
        if self.inner.frozen.get() {
            return Err(Error::Frozen);
        }
        *self.inner.clock.borrow_mut() = Some(clock.clone());
        Ok(())
    }

    pub fn packet_context_type(&self) -> FieldType {
        self.inner.packet_context_type.borrow().clone()
    }

    /// Replace the packet context type. Must be a structure; custom
    /// members join the `content_size`/`packet_size` bookkeeping.
    pub fn set_packet_context_type(&self, context: &FieldType) -> Result<(), Error> {
        self.set_schema_type(&self.inner.packet_context_type, context)
    }

    pub fn event_header_type(&self) -> FieldType {
        self.inner.event_header_type.borrow().clone()
    }

    pub fn set_event_header_type(&self, header: &FieldType) -> Result<(), Error> {
        self.set_schema_type(&self.inner.event_header_type, header)
    }

    pub fn event_context_type(&self) -> Option<FieldType> {
        self.inner.event_context_type.borrow().clone()
    }

    /// Set the stream event context type, serialized once per event
    /// between the header and the event's own context.
    pub fn set_event_context_type(&self, context: &FieldType) -> Result<(), Error> {
        if self.inner.frozen.get() {
            return Err(Error::Frozen);
        }
        if context.type_id() != TypeId::Structure {
            return Err(Error::invalid_argument(
                "stream event context must be a structure type",
            ));
        }
        *self.inner.event_context_type.borrow_mut() = Some(context.clone());
        Ok(())
    }

    fn set_schema_type(&self, slot: &RefCell<FieldType>, ty: &FieldType) -> Result<(), Error> {
        if self.inner.frozen.get() {
            return Err(Error::Frozen);
        }
        if ty.type_id() != TypeId::Structure {
            return Err(Error::invalid_argument("expected a structure type"));
        }
        *slot.borrow_mut() = ty.clone();
        Ok(())
    }

    /// Add an event class, rejecting duplicate names and IDs within
    /// this stream class and assigning the next free ID when the class
    /// carries none. Freezes the class and its types.
    ///
    /// Adding event classes stays legal after the stream class itself
    /// froze, so new events can be declared against live streams.
    pub fn add_event_class(&self, event_class: &EventClass) -> Result<(), Error> {
        if event_class.stream_class()?.is_some() {
            return Err(Error::invalid_argument(
                "event class already belongs to a stream class",
            ));
        }
        let mut ids = self.inner.event_ids.borrow_mut();
        let mut names = self.inner.event_names.borrow_mut();
        let name = event_class.name();
        if names.contains_key(&name) {
            return Err(Error::Duplicate(name.to_string()));
        }
        let id = match event_class.id() {
            Some(id) => {
                if ids.contains_key(&id) {
                    return Err(Error::Duplicate(format!("event class id {id}")));
                }
                id
            }
            None => {
                let mut id = self.inner.next_event_id.get();
                while ids.contains_key(&id) {
                    id += 1;
                }
                self.inner.next_event_id.set(id + 1);
                event_class.assign_id(id);
                id
            }
        };

        let mut classes = self.inner.event_classes.borrow_mut();
        ids.insert(id, classes.len());
        names.insert(name, classes.len());
        classes.push(event_class.clone());
        event_class.attach(Rc::downgrade(&self.inner));
        event_class.freeze();
        Ok(())
    }

    pub fn event_class_count(&self) -> usize {
        self.inner.event_classes.borrow().len()
    }

    pub fn event_class(&self, index: usize) -> Option<EventClass> {
        self.inner.event_classes.borrow().get(index).cloned()
    }

    pub fn event_class_by_name(&self, name: &str) -> Option<EventClass> {
        let name = Intern::new(name.to_owned());
        let names = self.inner.event_names.borrow();
        names
            .get(&name)
            .map(|i| self.inner.event_classes.borrow()[*i].clone())
    }

    pub fn event_class_by_id(&self, id: EventId) -> Option<EventClass> {
        let ids = self.inner.event_ids.borrow();
        ids.get(&id)
            .map(|i| self.inner.event_classes.borrow()[*i].clone())
    }

    /// The owning trace. `None` when the class was never added to one,
    /// [`Error::ParentGone`] when the trace was dropped.
    pub fn trace(&self) -> Result<Option<Trace>, Error> {
        match &*self.inner.trace.borrow() {
            None => Ok(None),
            Some(weak) => weak
                .upgrade()
                .map(|inner| Some(Trace::from_inner(inner)))
                .ok_or(Error::ParentGone),
        }
    }

    pub(crate) fn attach(&self, trace: Weak<TraceInner>) {
        *self.inner.trace.borrow_mut() = Some(trace);
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.get()
    }

    /// Freeze the class: schema types, clock binding, and every event
    /// class. Idempotent.
    pub(crate) fn freeze(&self) {
        if self.inner.frozen.replace(true) {
            return;
        }
        self.inner.packet_context_type.borrow().freeze();
        self.inner.event_header_type.borrow().freeze();
        if let Some(context) = &*self.inner.event_context_type.borrow() {
            context.freeze();
        }
        if let Some(clock) = &*self.inner.clock.borrow() {
            clock.freeze();
        }
        for event_class in self.inner.event_classes.borrow().iter() {
            event_class.freeze();
        }
    }

    pub(crate) fn ptr_eq(&self, other: &StreamClass) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for StreamClass {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for StreamClass {}

/// A runtime instance of a [`StreamClass`] bound to one output file.
///
/// Appended events serialize into a growable packet buffer;
/// [`Stream::flush`] prepends the packet header and context and writes
/// one complete packet to the file.
#[derive(Clone, Debug)]
pub struct Stream {
    inner: Rc<StreamInner>,
}

#[derive(Debug)]
pub(crate) struct StreamInner {
    class: StreamClass,
    trace: Weak<TraceInner>,
    file: RefCell<File>,
    buffer: RefCell<BitWriter>,
    events: RefCell<Vec<Event>>,
    packet_header: RefCell<Field>,
    packet_context: RefCell<Field>,
    event_context: RefCell<Option<Field>>,
    discarded_events: Cell<EventCount>,
    sequence_number: Cell<SequenceNumber>,
    ts_begin: Cell<Option<Timestamp>>,
    ts_end: Cell<Option<Timestamp>>,
}

impl Stream {
    pub(crate) fn from_inner(inner: Rc<StreamInner>) -> Self {
        Self { inner }
    }

    /// Instantiate a stream: freezes the class, seeds the packet
    /// header instance, and sets up the packet buffer.
    pub(crate) fn create(class: &StreamClass, trace: &Trace, file: File) -> Result<Self, Error> {
        class.freeze();

        let packet_header = Field::new(&trace.packet_header_type())?;
        let header_type = packet_header.field_type();
        if header_type.field_index_by_name("magic").is_ok() {
            packet_header
                .structure_field("magic")?
                .set_unsigned(u64::from(CTF_MAGIC_NUMBER))?;
        }
        if header_type.field_index_by_name("uuid").is_ok() {
            let uuid_field = packet_header.structure_field("uuid")?;
            for (i, b) in trace.uuid().as_bytes().iter().enumerate() {
                uuid_field.array_field(i)?.set_unsigned(u64::from(*b))?;
            }
        }
        if header_type.field_index_by_name("stream_id").is_ok() {
            let id = class
                .id()
                .ok_or_else(|| Error::invalid_argument("stream class has no id"))?;
            packet_header
                .structure_field("stream_id")?
                .set_unsigned(id)?;
        }

        let packet_context = Field::new(&class.packet_context_type())?;
        let event_context = class
            .event_context_type()
            .as_ref()
            .map(Field::new)
            .transpose()?;

        Ok(Self {
            inner: Rc::new(StreamInner {
                class: class.clone(),
                trace: trace.downgrade(),
                file: RefCell::new(file),
                buffer: RefCell::new(BitWriter::with_capacity(DEFAULT_PACKET_CAPACITY)),
                events: RefCell::new(Vec::new()),
                packet_header: RefCell::new(packet_header),
                packet_context: RefCell::new(packet_context),
                event_context: RefCell::new(event_context),
                discarded_events: Cell::new(0),
                sequence_number: Cell::new(0),
                ts_begin: Cell::new(None),
                ts_end: Cell::new(None),
            }),
        })
    }

    pub fn stream_class(&self) -> StreamClass {
        self.inner.class.clone()
    }

    /// The stream's packet header field instance, seeded with `magic`,
    /// `uuid`, and `stream_id` at creation.
    pub fn packet_header(&self) -> Field {
        self.inner.packet_header.borrow().clone()
    }

    /// Replace the packet header instance with one of the same type.
    pub fn set_packet_header(&self, header: &Field) -> Result<(), Error> {
        let current = self.inner.packet_header.borrow().field_type();
        if header.field_type() != current {
            return Err(Error::invalid_argument(
                "header field does not instantiate the trace packet header type",
            ));
        }
        *self.inner.packet_header.borrow_mut() = header.clone();
        Ok(())
    }

    /// The stream's packet context field instance. `content_size` and
    /// `packet_size` are computed at flush; custom members are the
    /// caller's to set.
    pub fn packet_context(&self) -> Field {
        self.inner.packet_context.borrow().clone()
    }

    pub fn set_packet_context(&self, context: &Field) -> Result<(), Error> {
        if context.field_type() != self.inner.class.packet_context_type() {
            return Err(Error::invalid_argument(
                "context field does not instantiate the packet context type",
            ));
        }
        *self.inner.packet_context.borrow_mut() = context.clone();
        Ok(())
    }

    /// The stream event context instance shared by every appended
    /// event, when the stream class declares one.
    pub fn event_context(&self) -> Option<Field> {
        self.inner.event_context.borrow().clone()
    }

    pub fn set_event_context(&self, context: &Field) -> Result<(), Error> {
        match self.inner.class.event_context_type() {
            Some(ty) if ty == context.field_type() => {
                *self.inner.event_context.borrow_mut() = Some(context.clone());
                Ok(())
            }
            _ => Err(Error::invalid_argument(
                "context field does not instantiate the stream event context type",
            )),
        }
    }

    /// Number of events appended and not yet flushed.
    pub fn event_count(&self) -> usize {
        self.inner.events.borrow().len()
    }

    /// Add to the per-stream discarded events counter.
    pub fn append_discarded_events(&self, count: EventCount) {
        self.inner
            .discarded_events
            .set(self.inner.discarded_events.get().saturating_add(count));
    }

    pub fn discarded_events_count(&self) -> EventCount {
        self.inner.discarded_events.get()
    }

    /// Per-stream count of flushed packets.
    pub fn packet_sequence_number(&self) -> SequenceNumber {
        self.inner.sequence_number.get()
    }

    /// Serialize one event into the packet buffer: header, stream
    /// event context, event context, then payload, each at its type's
    /// alignment. A failed serialization leaves the buffer at the
    /// previous event boundary.
    pub fn append_event(&self, event: &Event) -> Result<(), Error> {
        let owner = event
            .class()
            .stream_class()?
            .ok_or_else(|| Error::invalid_argument("event class is not part of a stream class"))?;
        if !owner.ptr_eq(&self.inner.class) {
            return Err(Error::invalid_argument(
                "event class belongs to a different stream class",
            ));
        }
        let id = event
            .class()
            .id()
            .ok_or_else(|| Error::invalid_argument("event class has no id"))?;

        let trace = self.trace()?;
        let native = trace.byte_order().endianness(byteordered::Endianness::native());

        let clock = self.inner.class.clock();
        let timestamp = clock.as_ref().map(|c| c.time()).unwrap_or(0);
        event.prepare_header(&self.inner.class.event_header_type(), id, timestamp)?;

        let mut buffer = self.inner.buffer.borrow_mut();
        let checkpoint = buffer.checkpoint();
        let result = (|| {
            let (header, context, payload) = event.serialize_parts();
            if let Some(header) = header {
                header.serialize(&mut buffer, native)?;
            }
            if let Some(stream_context) = &*self.inner.event_context.borrow() {
                stream_context.serialize(&mut buffer, native)?;
            }
            if let Some(context) = context {
                context.serialize(&mut buffer, native)?;
            }
            payload.serialize(&mut buffer, native)
        })();
        if let Err(e) = result {
            buffer.restore(checkpoint);
            return Err(e);
        }
        drop(buffer);

        if clock.is_some() {
            if self.inner.ts_begin.get().is_none() {
                self.inner.ts_begin.set(Some(timestamp));
            }
            self.inner.ts_end.set(Some(timestamp));
        }
        event.set_stream(Rc::downgrade(&self.inner));
        self.inner.events.borrow_mut().push(event.clone());
        Ok(())
    }

    /// Write one complete packet: header, context, buffered events,
    /// and zero padding up to `packet_size`. Resets the packet buffer;
    /// the discarded events counter is preserved.
    ///
    /// Flushing an empty stream writes a header-only packet.
    pub fn flush(&self) -> Result<(), Error> {
        let trace = self.trace()?;
        let native = trace.byte_order().endianness(byteordered::Endianness::native());

        let context = self.inner.packet_context.borrow();
        let context_type = context.field_type();
        self.set_context_member(&context, &context_type, "content_size", 0)?;
        self.set_context_member(&context, &context_type, "packet_size", 0)?;
        self.set_context_member(
            &context,
            &context_type,
            "events_discarded",
            self.inner.discarded_events.get(),
        )?;
        self.set_context_member(
            &context,
            &context_type,
            "timestamp_begin",
            self.inner.ts_begin.get().unwrap_or(0),
        )?;
        self.set_context_member(
            &context,
            &context_type,
            "timestamp_end",
            self.inner.ts_end.get().unwrap_or(0),
        )?;
        self.set_context_member(
            &context,
            &context_type,
            "packet_seq_num",
            self.inner.sequence_number.get(),
        )?;

        // Trial pass to learn the bit length of the header + context
        // section; integer members are fixed-width so the real pass
        // below has the same length.
        let mut head = BitWriter::with_capacity(64);
        let header = self.inner.packet_header.borrow();
        header.serialize(&mut head, native)?;
        context.serialize(&mut head, native)?;
        head.align_to(8);
        let head_bits = head.cursor_bits();

        let buffer = self.inner.buffer.borrow();
        let content_bits = head_bits + buffer.cursor_bits();
        let packet_bits = (content_bits + 7) & !7;
        self.set_context_member(&context, &context_type, "content_size", content_bits as u64)?;
        self.set_context_member(&context, &context_type, "packet_size", packet_bits as u64)?;

        head.clear();
        header.serialize(&mut head, native)?;
        context.serialize(&mut head, native)?;
        head.align_to(8);
        debug_assert_eq!(head.cursor_bits(), head_bits);

        let mut file = self.inner.file.borrow_mut();
        file.write_all(head.bytes())?;
        file.write_all(buffer.bytes())?;
        let written = head.bytes().len() + buffer.bytes().len();
        let padding = (packet_bits >> 3).saturating_sub(written);
        if padding > 0 {
            file.write_all(&vec![0_u8; padding])?;
        }
        file.flush()?;
        drop(file);
        drop(buffer);

        debug!(
            stream_class = %self.inner.class.name(),
            events = self.inner.events.borrow().len(),
            content_size = content_bits,
            packet_size = packet_bits,
            sequence_number = self.inner.sequence_number.get(),
            "Flushed packet"
        );

        self.inner.buffer.borrow_mut().clear();
        self.inner.events.borrow_mut().clear();
        self.inner.ts_begin.set(None);
        self.inner.ts_end.set(None);
        self.inner
            .sequence_number
            .set(self.inner.sequence_number.get() + 1);
        Ok(())
    }

    /// Set a well-known packet context member when the context type
    /// declares it.
    fn set_context_member(
        &self,
        context: &Field,
        context_type: &FieldType,
        name: &str,
        value: u64,
    ) -> Result<(), Error> {
        if context_type.field_index_by_name(name).is_ok() {
            context.structure_field(name)?.set_unsigned(value)?;
        }
        Ok(())
    }

    fn trace(&self) -> Result<Trace, Error> {
        self.inner
            .trace
            .upgrade()
            .map(Trace::from_inner)
            .ok_or(Error::ParentGone)
    }
}
