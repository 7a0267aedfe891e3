use crate::{
    error::Error,
    field::Field,
    schema::{FieldType, TypeId},
    stream::{Stream, StreamClass, StreamClassInner, StreamInner},
    types::{validate_identifier, EventId, LogLevel, Value},
};
use internment::Intern;
use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

/// A named, IDed event template: payload structure type, optional
/// per-event context type, and an attribute bag.
///
/// The class freezes when it joins a stream class or when the first
/// event is instantiated from it.
#[derive(Clone, Debug)]
pub struct EventClass {
    inner: Rc<EventClassInner>,
}

#[derive(Debug)]
pub(crate) struct EventClassInner {
    name: RefCell<Intern<String>>,
    id: Cell<Option<EventId>>,
    payload: FieldType,
    context: RefCell<Option<FieldType>>,
    attributes: RefCell<Vec<(Intern<String>, Value)>>,
    stream_class: RefCell<Option<Weak<StreamClassInner>>>,
    frozen: Cell<bool>,
}

impl EventClass {
    pub fn new(name: &str) -> Result<Self, Error> {
        validate_identifier(name)?;
        Ok(Self {
            inner: Rc::new(EventClassInner {
                name: RefCell::new(Intern::new(name.to_owned())),
                id: Cell::new(None),
                payload: FieldType::structure(),
                context: RefCell::new(None),
                attributes: RefCell::new(Vec::new()),
                stream_class: RefCell::new(None),
                frozen: Cell::new(false),
            }),
        })
    }

    pub fn name(&self) -> Intern<String> {
        *self.inner.name.borrow()
    }

    /// The class ID, assigned explicitly or by the owning stream class.
    pub fn id(&self) -> Option<EventId> {
        self.inner.id.get()
    }

    pub fn set_id(&self, id: EventId) -> Result<(), Error> {
        if self.inner.frozen.get() {
            return Err(Error::Frozen);
        }
        self.inner.id.set(Some(id));
        Ok(())
    }

    /// The payload structure type; fields added through
    /// [`EventClass::add_field`].
    pub fn payload_type(&self) -> FieldType {
        self.inner.payload.clone()
    }

    /// Append a named field to the event payload.
    pub fn add_field(&self, field_type: &FieldType, name: &str) -> Result<(), Error> {
        if self.inner.frozen.get() {
            return Err(Error::Frozen);
        }
        self.inner.payload.add_field(field_type, name)
    }

    pub fn field_count(&self) -> usize {
        self.inner.payload.field_count().unwrap_or(0)
    }

    pub fn field(&self, index: usize) -> Result<(Intern<String>, FieldType), Error> {
        self.inner.payload.field(index)
    }

    pub fn field_type_by_name(&self, name: &str) -> Result<FieldType, Error> {
        self.inner.payload.field_type_by_name(name)
    }

    pub fn context_type(&self) -> Option<FieldType> {
        self.inner.context.borrow().clone()
    }

    /// Set the per-event context structure type.
    pub fn set_context_type(&self, context: &FieldType) -> Result<(), Error> {
        if self.inner.frozen.get() {
            return Err(Error::Frozen);
        }
        if context.type_id() != TypeId::Structure {
            return Err(Error::invalid_argument(
                "event context must be a structure type",
            ));
        }
        *self.inner.context.borrow_mut() = Some(context.clone());
        Ok(())
    }

    /// Set a recognized attribute: `id` (non-negative integer), `name`
    /// (string), `loglevel` (integer), `model.emf.uri` (string).
    pub fn set_attribute(&self, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        if self.inner.frozen.get() {
            return Err(Error::Frozen);
        }
        let value = value.into();
        match (name, &value) {
            ("id", Value::Integer(id)) => {
                if *id < 0 {
                    return Err(Error::out_of_range("negative event class id"));
                }
                self.inner.id.set(Some(*id as EventId));
            }
            ("name", Value::String(new_name)) => {
                validate_identifier(new_name)?;
                *self.inner.name.borrow_mut() = Intern::new(new_name.clone());
            }
            ("loglevel", Value::Integer(_)) => {}
            ("model.emf.uri", Value::String(_)) => {}
            ("id" | "name" | "loglevel" | "model.emf.uri", _) => {
                return Err(Error::invalid_argument(format!(
                    "wrong value kind for attribute '{name}'"
                )));
            }
            _ => {
                return Err(Error::invalid_argument(format!(
                    "unknown attribute '{name}'"
                )));
            }
        }
        let name = Intern::new(name.to_owned());
        let mut attributes = self.inner.attributes.borrow_mut();
        match attributes.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => attributes.push((name, value)),
        }
        Ok(())
    }

    pub fn attribute_count(&self) -> usize {
        self.inner.attributes.borrow().len()
    }

    pub fn attribute_name(&self, index: usize) -> Option<Intern<String>> {
        self.inner.attributes.borrow().get(index).map(|(n, _)| *n)
    }

    pub fn attribute(&self, index: usize) -> Option<Value> {
        self.inner
            .attributes
            .borrow()
            .get(index)
            .map(|(_, v)| v.clone())
    }

    pub fn attribute_by_name(&self, name: &str) -> Option<Value> {
        self.inner
            .attributes
            .borrow()
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, v)| v.clone())
    }

    /// The `loglevel` attribute, when set.
    pub fn log_level(&self) -> Option<LogLevel> {
        self.attribute_by_name("loglevel")
            .and_then(|v| v.as_integer())
            .map(|v| LogLevel::from(v as i32))
    }

    /// The owning stream class. `None` when the class was never added
    /// to one, [`Error::ParentGone`] when the owner was dropped.
    pub fn stream_class(&self) -> Result<Option<StreamClass>, Error> {
        match &*self.inner.stream_class.borrow() {
            None => Ok(None),
            Some(weak) => weak
                .upgrade()
                .map(|inner| Some(StreamClass::from_inner(inner)))
                .ok_or(Error::ParentGone),
        }
    }

    /// Freeze the class and its types. Idempotent.
    pub(crate) fn freeze(&self) {
        self.inner.frozen.set(true);
        self.inner.payload.freeze();
        if let Some(context) = &*self.inner.context.borrow() {
            context.freeze();
        }
    }

    pub(crate) fn assign_id(&self, id: EventId) {
        self.inner.id.set(Some(id));
    }

    pub(crate) fn attach(&self, stream_class: Weak<StreamClassInner>) {
        *self.inner.stream_class.borrow_mut() = Some(stream_class);
    }

    pub(crate) fn ptr_eq(&self, other: &EventClass) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for EventClass {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for EventClass {}

/// One event record under construction: header, optional context, and
/// payload field instances bound to an [`EventClass`].
#[derive(Clone, Debug)]
pub struct Event {
    inner: Rc<EventInner>,
}

#[derive(Debug)]
struct EventInner {
    class: EventClass,
    header: RefCell<Option<Field>>,
    context: RefCell<Option<Field>>,
    payload: Field,
    stream: RefCell<Option<Weak<StreamInner>>>,
}

impl Event {
    /// Instantiate an event, freezing the class and its types.
    pub fn new(class: &EventClass) -> Result<Self, Error> {
        class.freeze();
        let payload = Field::new(&class.payload_type())?;
        let context = class
            .context_type()
            .as_ref()
            .map(Field::new)
            .transpose()?;
        Ok(Self {
            inner: Rc::new(EventInner {
                class: class.clone(),
                header: RefCell::new(None),
                context: RefCell::new(context),
                payload,
                stream: RefCell::new(None),
            }),
        })
    }

    pub fn class(&self) -> EventClass {
        self.inner.class.clone()
    }

    /// The payload structure field.
    pub fn payload(&self) -> Field {
        self.inner.payload.clone()
    }

    /// A payload member by name.
    pub fn field(&self, name: &str) -> Result<Field, Error> {
        self.inner.payload.structure_field(name)
    }

    pub fn field_by_index(&self, index: usize) -> Result<Field, Error> {
        self.inner.payload.structure_field_by_index(index)
    }

    /// Replace a payload member with a caller-built field of the same
    /// type.
    pub fn set_field(&self, name: &str, field: &Field) -> Result<(), Error> {
        self.inner.payload.replace_structure_field(name, field)
    }

    pub fn context(&self) -> Option<Field> {
        self.inner.context.borrow().clone()
    }

    pub fn set_context(&self, context: &Field) -> Result<(), Error> {
        match self.inner.class.context_type() {
            Some(ty) if ty == context.field_type() => {
                *self.inner.context.borrow_mut() = Some(context.clone());
                Ok(())
            }
            _ => Err(Error::invalid_argument(
                "context field does not instantiate the class context type",
            )),
        }
    }

    pub fn header(&self) -> Option<Field> {
        self.inner.header.borrow().clone()
    }

    pub fn set_header(&self, header: &Field) -> Result<(), Error> {
        if header.field_type().type_id() != TypeId::Structure {
            return Err(Error::invalid_argument(
                "event header must be a structure field",
            ));
        }
        *self.inner.header.borrow_mut() = Some(header.clone());
        Ok(())
    }

    /// The stream this event was appended to. `None` before the first
    /// append, [`Error::ParentGone`] when the stream was dropped.
    pub fn stream(&self) -> Result<Option<Stream>, Error> {
        match &*self.inner.stream.borrow() {
            None => Ok(None),
            Some(weak) => weak
                .upgrade()
                .map(|inner| Some(Stream::from_inner(inner)))
                .ok_or(Error::ParentGone),
        }
    }

    pub(crate) fn set_stream(&self, stream: Weak<StreamInner>) {
        *self.inner.stream.borrow_mut() = Some(stream);
    }

    /// Make sure a header instance of `header_type` exists, stamping
    /// `id` and `timestamp` members that are still unset.
    pub(crate) fn prepare_header(
        &self,
        header_type: &FieldType,
        id: EventId,
        timestamp: u64,
    ) -> Result<(), Error> {
        let mut slot = self.inner.header.borrow_mut();
        let header = match &*slot {
            Some(header) => {
                if header.field_type() != *header_type {
                    return Err(Error::invalid_argument(
                        "event header does not instantiate the stream class header type",
                    ));
                }
                header.clone()
            }
            None => {
                let header = Field::new(header_type)?;
                *slot = Some(header.clone());
                header
            }
        };
        drop(slot);

        if header_type.field_index_by_name("id").is_ok() {
            let id_field = header.structure_field("id")?;
            if !id_field.is_set() {
                id_field.set_unsigned(id)?;
            }
        }
        if header_type.field_index_by_name("timestamp").is_ok() {
            let ts_field = header.structure_field("timestamp")?;
            if !ts_field.is_set() {
                ts_field.set_unsigned(timestamp)?;
            }
        }
        Ok(())
    }

    pub(crate) fn serialize_parts(&self) -> (Option<Field>, Option<Field>, Field) {
        (
            self.inner.header.borrow().clone(),
            self.inner.context.borrow().clone(),
            self.inner.payload.clone(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reserved_event_class_names_rejected() {
        assert!(EventClass::new("clock").is_err());
        assert!(EventClass::new("Simple Event").is_ok());
    }

    #[test]
    fn attribute_semantics() {
        let ec = EventClass::new("attrs").unwrap();
        ec.set_attribute("id", 42_i64).unwrap();
        assert_eq!(ec.id(), Some(42));
        assert!(matches!(
            ec.set_attribute("id", -1_i64),
            Err(Error::OutOfRange(_))
        ));
        assert!(ec.set_attribute("id", "nope").is_err());

        ec.set_attribute("loglevel", 5_i64).unwrap();
        assert_eq!(ec.log_level(), Some(LogLevel::Notice));
        ec.set_attribute("model.emf.uri", "http://example.com/path")
            .unwrap();
        assert!(ec.set_attribute("model.emf.uri", 8_i64).is_err());
        assert!(ec.set_attribute("mystery", 1_i64).is_err());

        ec.set_attribute("name", "renamed").unwrap();
        assert_eq!(ec.name().as_str(), "renamed");

        // Overwrites keep insertion order and count
        ec.set_attribute("loglevel", 6_i64).unwrap();
        assert_eq!(ec.attribute_count(), 4);
        assert_eq!(ec.attribute_name(1).unwrap().as_str(), "loglevel");
        assert_eq!(ec.attribute(1), Some(Value::Integer(6)));
        assert_eq!(
            ec.attribute_by_name("model.emf.uri"),
            Some(Value::String("http://example.com/path".to_owned()))
        );
    }

    #[test]
    fn instantiation_freezes_the_class() {
        let ec = EventClass::new("freeze_me").unwrap();
        let int8 = FieldType::integer(8).unwrap();
        ec.add_field(&int8, "a").unwrap();
        let ev = Event::new(&ec).unwrap();
        assert!(matches!(ec.add_field(&int8, "b"), Err(Error::Frozen)));
        assert!(matches!(ec.set_id(7), Err(Error::Frozen)));
        assert!(matches!(
            ec.set_attribute("loglevel", 1_i64),
            Err(Error::Frozen)
        ));
        assert!(ec.payload_type().is_frozen());
        assert!(ev.stream().unwrap().is_none());
    }

    #[test]
    fn payload_member_access_and_replacement() {
        let ec = EventClass::new("payloads").unwrap();
        let int16 = {
            let t = FieldType::integer(16).unwrap();
            t.set_signed(true).unwrap();
            t
        };
        ec.add_field(&int16, "value").unwrap();

        let ev = Event::new(&ec).unwrap();
        ev.field("value").unwrap().set_signed(-7).unwrap();
        assert_eq!(ev.field_by_index(0).unwrap().signed().unwrap(), -7);

        let replacement = Field::new(&int16).unwrap();
        replacement.set_signed(9).unwrap();
        ev.set_field("value", &replacement).unwrap();
        assert_eq!(ev.field("value").unwrap().signed().unwrap(), 9);

        let other_ty = FieldType::integer(16).unwrap();
        let wrong = Field::new(&other_ty).unwrap();
        assert!(ev.set_field("value", &wrong).is_err());
    }
}
