use crate::{
    error::Error,
    schema::{FieldType, TypeId},
    stream::{Stream, StreamClass},
    types::{validate_identifier, ByteOrder, StreamId, Timestamp, Value},
};
use internment::Intern;
use std::{
    cell::{Cell, RefCell},
    fs::File,
    rc::{Rc, Weak},
};
use uuid::Uuid;

/// A data stream clock: name, frequency, offsets, and a monotonic
/// current time in ticks used to stamp event headers.
///
/// Everything but the current time freezes together with the first
/// stream class the clock is bound to.
#[derive(Clone, Debug)]
pub struct Clock {
    inner: Rc<ClockInner>,
}

#[derive(Debug)]
struct ClockInner {
    name: Intern<String>,
    description: RefCell<Option<String>>,
    frequency: Cell<u64>,
    precision: Cell<u64>,
    offset_s: Cell<u64>,
    offset: Cell<u64>,
    absolute: Cell<bool>,
    time: Cell<Timestamp>,
    uuid: Uuid,
    frozen: Cell<bool>,
}

impl Clock {
    /// Create a clock: 1 GHz, precision 1, zero offsets, not absolute,
    /// fresh v4 UUID.
    pub fn new(name: &str) -> Result<Self, Error> {
        validate_identifier(name)?;
        Ok(Self {
            inner: Rc::new(ClockInner {
                name: Intern::new(name.to_owned()),
                description: RefCell::new(None),
                frequency: Cell::new(1_000_000_000),
                precision: Cell::new(1),
                offset_s: Cell::new(0),
                offset: Cell::new(0),
                absolute: Cell::new(false),
                time: Cell::new(0),
                uuid: Uuid::new_v4(),
                frozen: Cell::new(false),
            }),
        })
    }

    pub fn name(&self) -> Intern<String> {
        self.inner.name
    }

    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    pub fn description(&self) -> Option<String> {
        self.inner.description.borrow().clone()
    }

    pub fn set_description(&self, description: &str) -> Result<(), Error> {
        self.check_not_frozen()?;
        *self.inner.description.borrow_mut() = Some(description.to_owned());
        Ok(())
    }

    /// Frequency in Hz.
    pub fn frequency(&self) -> u64 {
        self.inner.frequency.get()
    }

    pub fn set_frequency(&self, frequency: u64) -> Result<(), Error> {
        self.check_not_frozen()?;
        if frequency == 0 {
            return Err(Error::invalid_argument("zero clock frequency"));
        }
        self.inner.frequency.set(frequency);
        Ok(())
    }

    /// Precision in clock ticks.
    pub fn precision(&self) -> u64 {
        self.inner.precision.get()
    }

    pub fn set_precision(&self, precision: u64) -> Result<(), Error> {
        self.check_not_frozen()?;
        self.inner.precision.set(precision);
        Ok(())
    }

    /// Offset in seconds since the Epoch.
    pub fn offset_seconds(&self) -> u64 {
        self.inner.offset_s.get()
    }

    pub fn set_offset_seconds(&self, offset_s: u64) -> Result<(), Error> {
        self.check_not_frozen()?;
        self.inner.offset_s.set(offset_s);
        Ok(())
    }

    /// Offset in clock ticks.
    pub fn offset(&self) -> u64 {
        self.inner.offset.get()
    }

    pub fn set_offset(&self, offset: u64) -> Result<(), Error> {
        self.check_not_frozen()?;
        self.inner.offset.set(offset);
        Ok(())
    }

    pub fn is_absolute(&self) -> bool {
        self.inner.absolute.get()
    }

    pub fn set_absolute(&self, absolute: bool) -> Result<(), Error> {
        self.check_not_frozen()?;
        self.inner.absolute.set(absolute);
        Ok(())
    }

    /// Current time in ticks since the clock origin.
    pub fn time(&self) -> Timestamp {
        self.inner.time.get()
    }

    /// Update the current time. The clock never goes backwards; this
    /// stays legal on a frozen clock.
    pub fn set_time(&self, time: Timestamp) -> Result<(), Error> {
        if time < self.inner.time.get() {
            return Err(Error::out_of_range("clock time going backwards"));
        }
        self.inner.time.set(time);
        Ok(())
    }

    fn check_not_frozen(&self) -> Result<(), Error> {
        if self.inner.frozen.get() {
            Err(Error::Frozen)
        } else {
            Ok(())
        }
    }

    pub(crate) fn freeze(&self) {
        self.inner.frozen.set(true);
    }
}

impl PartialEq for Clock {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Clock {}

/// The root of a trace's schema: packet header type, clocks, stream
/// classes, and the environment map rendered into metadata.
#[derive(Clone, Debug)]
pub struct Trace {
    inner: Rc<TraceInner>,
}

#[derive(Debug)]
pub(crate) struct TraceInner {
    byte_order: Cell<ByteOrder>,
    uuid: Cell<Uuid>,
    packet_header_type: RefCell<FieldType>,
    clocks: RefCell<Vec<Clock>>,
    stream_classes: RefCell<Vec<StreamClass>>,
    environment: RefCell<Vec<(Intern<String>, Value)>>,
    next_stream_id: Cell<StreamId>,
    frozen: Cell<bool>,
}

fn default_packet_header_type() -> Result<FieldType, Error> {
    let header = FieldType::structure();
    header.add_field(&FieldType::integer(32)?, "magic")?;
    let byte = FieldType::integer(8)?;
    header.add_field(&FieldType::array(&byte, 16)?, "uuid")?;
    header.add_field(&FieldType::integer(32)?, "stream_id")?;
    Ok(header)
}

impl Trace {
    /// Create a trace with the default packet header type
    /// (`magic`, `uuid`, `stream_id`), native byte order, and a fresh
    /// v4 UUID.
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            inner: Rc::new(TraceInner {
                byte_order: Cell::new(ByteOrder::Native),
                uuid: Cell::new(Uuid::new_v4()),
                packet_header_type: RefCell::new(default_packet_header_type()?),
                clocks: RefCell::new(Vec::new()),
                stream_classes: RefCell::new(Vec::new()),
                environment: RefCell::new(Vec::new()),
                next_stream_id: Cell::new(0),
                frozen: Cell::new(false),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Rc<TraceInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<TraceInner> {
        Rc::downgrade(&self.inner)
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.inner.byte_order.get()
    }

    /// Set the trace byte order, resolving every `Native` field type
    /// declaration. Frozen once the first stream exists.
    pub fn set_byte_order(&self, byte_order: ByteOrder) -> Result<(), Error> {
        if self.inner.frozen.get() {
            return Err(Error::Frozen);
        }
        self.inner.byte_order.set(byte_order);
        Ok(())
    }

    pub fn uuid(&self) -> Uuid {
        self.inner.uuid.get()
    }

    pub fn set_uuid(&self, uuid: Uuid) -> Result<(), Error> {
        if self.inner.frozen.get() {
            return Err(Error::Frozen);
        }
        self.inner.uuid.set(uuid);
        Ok(())
    }

    pub fn packet_header_type(&self) -> FieldType {
        self.inner.packet_header_type.borrow().clone()
    }

    pub fn set_packet_header_type(&self, header: &FieldType) -> Result<(), Error> {
        if self.inner.frozen.get() {
            return Err(Error::Frozen);
        }
        if header.type_id() != TypeId::Structure {
            return Err(Error::invalid_argument(
                "packet header must be a structure type",
            ));
        }
        *self.inner.packet_header_type.borrow_mut() = header.clone();
        Ok(())
    }

    pub fn add_clock(&self, clock: &Clock) -> Result<(), Error> {
        let mut clocks = self.inner.clocks.borrow_mut();
        if clocks.iter().any(|c| c.name() == clock.name()) {
            return Err(Error::Duplicate(clock.name().to_string()));
        }
        clocks.push(clock.clone());
        Ok(())
    }

    pub fn clock_count(&self) -> usize {
        self.inner.clocks.borrow().len()
    }

    pub fn clock(&self, index: usize) -> Option<Clock> {
        self.inner.clocks.borrow().get(index).cloned()
    }

    pub fn clock_by_name(&self, name: &str) -> Option<Clock> {
        self.inner
            .clocks
            .borrow()
            .iter()
            .find(|c| c.name().as_str() == name)
            .cloned()
    }

    /// Set an environment entry. Insertion-ordered; setting an
    /// existing key overwrites in place.
    pub fn set_environment_field(
        &self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), Error> {
        validate_identifier(name)?;
        let name = Intern::new(name.to_owned());
        let value = value.into();
        let mut environment = self.inner.environment.borrow_mut();
        match environment.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => environment.push((name, value)),
        }
        Ok(())
    }

    pub fn environment_field_count(&self) -> usize {
        self.inner.environment.borrow().len()
    }

    pub fn environment_field_name(&self, index: usize) -> Option<Intern<String>> {
        self.inner.environment.borrow().get(index).map(|(n, _)| *n)
    }

    pub fn environment_field_value(&self, index: usize) -> Option<Value> {
        self.inner
            .environment
            .borrow()
            .get(index)
            .map(|(_, v)| v.clone())
    }

    pub fn environment_field_value_by_name(&self, name: &str) -> Option<Value> {
        self.inner
            .environment
            .borrow()
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, v)| v.clone())
    }

    /// Register a stream class, assigning the next free ID when the
    /// class carries none.
    pub fn add_stream_class(&self, stream_class: &StreamClass) -> Result<(), Error> {
        if stream_class.trace()?.is_some() {
            return Err(Error::invalid_argument(
                "stream class already belongs to a trace",
            ));
        }
        let mut classes = self.inner.stream_classes.borrow_mut();
        if classes.iter().any(|sc| sc.name() == stream_class.name()) {
            return Err(Error::Duplicate(stream_class.name().to_string()));
        }
        match stream_class.id() {
            Some(id) => {
                if classes.iter().any(|sc| sc.id() == Some(id)) {
                    return Err(Error::Duplicate(format!("stream class id {id}")));
                }
            }
            None => {
                let mut id = self.inner.next_stream_id.get();
                while classes.iter().any(|sc| sc.id() == Some(id)) {
                    id += 1;
                }
                self.inner.next_stream_id.set(id + 1);
                stream_class.assign_id(id);
            }
        }
        stream_class.attach(self.downgrade());
        classes.push(stream_class.clone());
        Ok(())
    }

    pub fn stream_class_count(&self) -> usize {
        self.inner.stream_classes.borrow().len()
    }

    pub fn stream_class(&self, index: usize) -> Option<StreamClass> {
        self.inner.stream_classes.borrow().get(index).cloned()
    }

    /// Produce a stream writing to `file`. Adds the stream class to
    /// this trace when it isn't attached yet, then freezes the trace
    /// schema and the stream class.
    pub(crate) fn create_stream(
        &self,
        stream_class: &StreamClass,
        file: File,
    ) -> Result<Stream, Error> {
        match stream_class.trace()? {
            None => self.add_stream_class(stream_class)?,
            Some(trace) if trace.ptr_eq(self) => {}
            Some(_) => {
                return Err(Error::invalid_argument(
                    "stream class belongs to a different trace",
                ));
            }
        }
        self.freeze();
        Stream::create(stream_class, self, file)
    }

    /// Freeze the trace-wide schema: byte order, UUID, and the packet
    /// header type. The environment stays mutable.
    pub(crate) fn freeze(&self) {
        if self.inner.frozen.replace(true) {
            return;
        }
        self.inner.packet_header_type.borrow().freeze();
    }

    pub(crate) fn ptr_eq(&self, other: &Trace) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Trace {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Trace {}
