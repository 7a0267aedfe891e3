use crate::{
    buffer::BitWriter,
    error::Error,
    schema::{FieldType, TypeId},
};
use byteordered::Endianness;
use internment::Intern;
use ordered_float::OrderedFloat;
use std::{cell::RefCell, rc::Rc};

/// A typed value instance bound to a [`FieldType`].
///
/// Handles are cheap clones of a shared value cell; the field keeps its
/// type alive. Composite children are constructed lazily on first
/// access. Scalars start unset and serialization of an unset scalar
/// fails with [`Error::Unset`].
#[derive(Clone, Debug)]
pub struct Field {
    inner: Rc<FieldInner>,
}

#[derive(Debug)]
struct FieldInner {
    ty: FieldType,
    value: RefCell<FieldValue>,
}

#[derive(Debug)]
enum FieldValue {
    UnsignedInteger(Option<u64>),
    SignedInteger(Option<i64>),
    FloatingPoint(Option<OrderedFloat<f64>>),
    String(Option<Vec<u8>>),
    Enumeration {
        container: Field,
    },
    Structure {
        members: Vec<Option<Field>>,
    },
    Variant {
        selected: Option<(Intern<String>, Field)>,
    },
    Array {
        elements: Vec<Option<Field>>,
    },
    Sequence {
        length: Option<Field>,
        elements: Vec<Option<Field>>,
    },
}

impl Field {
    /// Instantiate a value for `field_type`, freezing it.
    pub fn new(field_type: &FieldType) -> Result<Self, Error> {
        field_type.freeze();
        let value = match field_type.type_id() {
            TypeId::Integer => {
                if field_type.is_signed()? {
                    FieldValue::SignedInteger(None)
                } else {
                    FieldValue::UnsignedInteger(None)
                }
            }
            TypeId::FloatingPoint => FieldValue::FloatingPoint(None),
            TypeId::String => FieldValue::String(None),
            TypeId::Enumeration => FieldValue::Enumeration {
                container: Field::new(&field_type.container()?)?,
            },
            TypeId::Structure => FieldValue::Structure {
                members: vec![None; field_type.field_count()?],
            },
            TypeId::Variant => FieldValue::Variant { selected: None },
            TypeId::Array => FieldValue::Array {
                elements: vec![None; field_type.array_length()?],
            },
            TypeId::Sequence => FieldValue::Sequence {
                length: None,
                elements: Vec::new(),
            },
        };
        Ok(Self {
            inner: Rc::new(FieldInner {
                ty: field_type.clone(),
                value: RefCell::new(value),
            }),
        })
    }

    pub fn field_type(&self) -> FieldType {
        self.inner.ty.clone()
    }

    /// Identity comparison: true when both handles share the same
    /// value cell.
    pub fn ptr_eq(&self, other: &Field) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// A field is set when it holds a value; composites are set when
    /// every required child is set.
    pub fn is_set(&self) -> bool {
        match &*self.inner.value.borrow() {
            FieldValue::UnsignedInteger(v) => v.is_some(),
            FieldValue::SignedInteger(v) => v.is_some(),
            FieldValue::FloatingPoint(v) => v.is_some(),
            FieldValue::String(v) => v.is_some(),
            FieldValue::Enumeration { container } => container.is_set(),
            FieldValue::Structure { members } | FieldValue::Array { elements: members } => members
                .iter()
                .all(|m| m.as_ref().is_some_and(|f| f.is_set())),
            FieldValue::Variant { selected } => {
                selected.as_ref().is_some_and(|(_, f)| f.is_set())
            }
            FieldValue::Sequence { length, elements } => {
                length.as_ref().is_some_and(|l| l.is_set())
                    && elements
                        .iter()
                        .all(|m| m.as_ref().is_some_and(|f| f.is_set()))
            }
        }
    }

    pub fn set_unsigned(&self, value: u64) -> Result<(), Error> {
        match &mut *self.inner.value.borrow_mut() {
            FieldValue::UnsignedInteger(cell) => {
                let size = self.inner.ty.integer_size()?;
                if size < 64 && value >= (1 << size) {
                    return Err(Error::out_of_range(format!(
                        "{value} does not fit in {size} unsigned bits"
                    )));
                }
                *cell = Some(value);
                Ok(())
            }
            FieldValue::SignedInteger(_) => Err(Error::out_of_range(
                "unsigned value on a signed integer field".to_owned(),
            )),
            _ => Err(Error::invalid_argument("not an integer field")),
        }
    }

    pub fn unsigned(&self) -> Result<u64, Error> {
        match &*self.inner.value.borrow() {
            FieldValue::UnsignedInteger(cell) => cell.ok_or(Error::Unset("integer")),
            FieldValue::SignedInteger(_) => Err(Error::invalid_argument(
                "signed integer field read as unsigned",
            )),
            _ => Err(Error::invalid_argument("not an integer field")),
        }
    }

    pub fn set_signed(&self, value: i64) -> Result<(), Error> {
        match &mut *self.inner.value.borrow_mut() {
            FieldValue::SignedInteger(cell) => {
                let size = self.inner.ty.integer_size()?;
                if size < 64 {
                    let min = -(1_i64 << (size - 1));
                    let max = (1_i64 << (size - 1)) - 1;
                    if value < min || value > max {
                        return Err(Error::out_of_range(format!(
                            "{value} does not fit in {size} signed bits"
                        )));
                    }
                }
                *cell = Some(value);
                Ok(())
            }
            FieldValue::UnsignedInteger(_) => Err(Error::out_of_range(
                "signed value on an unsigned integer field".to_owned(),
            )),
            _ => Err(Error::invalid_argument("not an integer field")),
        }
    }

    pub fn signed(&self) -> Result<i64, Error> {
        match &*self.inner.value.borrow() {
            FieldValue::SignedInteger(cell) => cell.ok_or(Error::Unset("integer")),
            FieldValue::UnsignedInteger(_) => Err(Error::invalid_argument(
                "unsigned integer field read as signed",
            )),
            _ => Err(Error::invalid_argument("not an integer field")),
        }
    }

    pub fn set_float(&self, value: f64) -> Result<(), Error> {
        match &mut *self.inner.value.borrow_mut() {
            FieldValue::FloatingPoint(cell) => {
                *cell = Some(OrderedFloat(value));
                Ok(())
            }
            _ => Err(Error::invalid_argument("not a floating point field")),
        }
    }

    pub fn float(&self) -> Result<f64, Error> {
        match &*self.inner.value.borrow() {
            FieldValue::FloatingPoint(cell) => {
                cell.map(|v| v.0).ok_or(Error::Unset("floating point"))
            }
            _ => Err(Error::invalid_argument("not a floating point field")),
        }
    }

    /// Replace the string contents.
    pub fn set_string(&self, value: &str) -> Result<(), Error> {
        match &mut *self.inner.value.borrow_mut() {
            FieldValue::String(cell) => {
                *cell = Some(value.as_bytes().to_vec());
                Ok(())
            }
            _ => Err(Error::invalid_argument("not a string field")),
        }
    }

    /// Append to the string contents, setting them when unset.
    pub fn append_string(&self, value: &str) -> Result<(), Error> {
        self.append_bytes(value.as_bytes())
    }

    /// Append raw bytes to the string contents. Embedded NUL bytes are
    /// preserved in the in-memory value and skipped on the wire.
    pub fn append_bytes(&self, value: &[u8]) -> Result<(), Error> {
        match &mut *self.inner.value.borrow_mut() {
            FieldValue::String(cell) => {
                cell.get_or_insert_with(Vec::new).extend_from_slice(value);
                Ok(())
            }
            _ => Err(Error::invalid_argument("not a string field")),
        }
    }

    /// The string contents, with invalid UTF-8 replaced.
    pub fn string(&self) -> Result<String, Error> {
        match &*self.inner.value.borrow() {
            FieldValue::String(cell) => cell
                .as_ref()
                .map(|bytes| String::from_utf8_lossy(bytes).to_string())
                .ok_or(Error::Unset("string")),
            _ => Err(Error::invalid_argument("not a string field")),
        }
    }

    /// The integer field backing an enumeration field.
    pub fn container(&self) -> Result<Field, Error> {
        match &*self.inner.value.borrow() {
            FieldValue::Enumeration { container } => Ok(container.clone()),
            _ => Err(Error::invalid_argument("not an enumeration field")),
        }
    }

    /// Label of the mapping covering the container's current value.
    pub fn mapping_name(&self) -> Result<Intern<String>, Error> {
        match &*self.inner.value.borrow() {
            FieldValue::Enumeration { container } => {
                let mapping = if container.field_type().is_signed()? {
                    let v = container.signed()?;
                    self.inner
                        .ty
                        .mapping_for_signed(v)?
                        .ok_or(Error::InvalidTag(v))?
                } else {
                    let v = container.unsigned()?;
                    self.inner
                        .ty
                        .mapping_for_unsigned(v)?
                        .ok_or(Error::InvalidTag(v as i64))?
                };
                Ok(mapping.label)
            }
            _ => Err(Error::invalid_argument("not an enumeration field")),
        }
    }

    /// Member of a structure field, constructed on first access.
    pub fn structure_field(&self, name: &str) -> Result<Field, Error> {
        let index = self.inner.ty.field_index_by_name(name)?;
        self.structure_field_by_index(index)
    }

    pub fn structure_field_by_index(&self, index: usize) -> Result<Field, Error> {
        match &mut *self.inner.value.borrow_mut() {
            FieldValue::Structure { members } => {
                let slot = members.get_mut(index).ok_or_else(|| {
                    Error::invalid_argument(format!("member index {index} out of bounds"))
                })?;
                if let Some(f) = slot {
                    return Ok(f.clone());
                }
                let (_, member_ty) = self.inner.ty.field(index)?;
                let f = Field::new(&member_ty)?;
                *slot = Some(f.clone());
                Ok(f)
            }
            _ => Err(Error::invalid_argument("not a structure field")),
        }
    }

    /// Replace a structure member with a caller-built field of the
    /// identical type.
    pub(crate) fn replace_structure_field(&self, name: &str, field: &Field) -> Result<(), Error> {
        let index = self.inner.ty.field_index_by_name(name)?;
        let (_, member_ty) = self.inner.ty.field(index)?;
        if member_ty != field.field_type() {
            return Err(Error::invalid_argument(format!(
                "field type mismatch for member '{name}'"
            )));
        }
        match &mut *self.inner.value.borrow_mut() {
            FieldValue::Structure { members } => {
                members[index] = Some(field.clone());
                Ok(())
            }
            _ => Err(Error::invalid_argument("not a structure field")),
        }
    }

    /// Select and return the variant branch matching the tag's current
    /// value. Repeated calls with an unchanged tag value return the
    /// same child; a new value constructs a fresh child.
    pub fn variant_field(&self, tag: &Field) -> Result<Field, Error> {
        let (label, child_ty) = resolve_variant_tag(&self.inner.ty, tag)?;
        match &mut *self.inner.value.borrow_mut() {
            FieldValue::Variant { selected } => {
                if let Some((current, field)) = selected {
                    if *current == label {
                        return Ok(field.clone());
                    }
                }
                let f = Field::new(&child_ty)?;
                *selected = Some((label, f.clone()));
                Ok(f)
            }
            _ => Err(Error::invalid_argument("not a variant field")),
        }
    }

    /// The currently selected variant branch.
    pub fn variant_current_field(&self) -> Result<Field, Error> {
        match &*self.inner.value.borrow() {
            FieldValue::Variant { selected } => selected
                .as_ref()
                .map(|(_, f)| f.clone())
                .ok_or(Error::Unset("variant")),
            _ => Err(Error::invalid_argument("not a variant field")),
        }
    }

    /// Element of an array field, constructed on first access.
    pub fn array_field(&self, index: usize) -> Result<Field, Error> {
        match &mut *self.inner.value.borrow_mut() {
            FieldValue::Array { elements } => {
                let slot = elements.get_mut(index).ok_or_else(|| {
                    Error::invalid_argument(format!("array index {index} out of bounds"))
                })?;
                if let Some(f) = slot {
                    return Ok(f.clone());
                }
                let f = Field::new(&self.inner.ty.element_type()?)?;
                *slot = Some(f.clone());
                Ok(f)
            }
            _ => Err(Error::invalid_argument("not an array field")),
        }
    }

    /// Bind the sequence's length field and size the element vector to
    /// its current value.
    pub fn sequence_set_length(&self, length: &Field) -> Result<(), Error> {
        let n = length.unsigned()?;
        match &mut *self.inner.value.borrow_mut() {
            FieldValue::Sequence {
                length: bound,
                elements,
            } => {
                *bound = Some(length.clone());
                elements.resize(n as usize, None);
                Ok(())
            }
            _ => Err(Error::invalid_argument("not a sequence field")),
        }
    }

    /// The bound length, when a length field has been attached.
    pub fn sequence_length(&self) -> Result<u64, Error> {
        match &*self.inner.value.borrow() {
            FieldValue::Sequence { length, .. } => length
                .as_ref()
                .ok_or(Error::Unset("sequence length"))?
                .unsigned(),
            _ => Err(Error::invalid_argument("not a sequence field")),
        }
    }

    /// Element of a sequence field; elements past the bound length are
    /// inaccessible.
    pub fn sequence_field(&self, index: usize) -> Result<Field, Error> {
        match &mut *self.inner.value.borrow_mut() {
            FieldValue::Sequence { elements, .. } => {
                let slot = elements.get_mut(index).ok_or_else(|| {
                    Error::invalid_argument(format!("sequence index {index} out of bounds"))
                })?;
                if let Some(f) = slot {
                    return Ok(f.clone());
                }
                let f = Field::new(&self.inner.ty.element_type()?)?;
                *slot = Some(f.clone());
                Ok(f)
            }
            _ => Err(Error::invalid_argument("not a sequence field")),
        }
    }

    /// Deep copy: fresh value cells throughout, sharing the same field
    /// types. Variants copy only the selected branch.
    pub fn copy(&self) -> Field {
        let value = match &*self.inner.value.borrow() {
            FieldValue::UnsignedInteger(v) => FieldValue::UnsignedInteger(*v),
            FieldValue::SignedInteger(v) => FieldValue::SignedInteger(*v),
            FieldValue::FloatingPoint(v) => FieldValue::FloatingPoint(*v),
            FieldValue::String(v) => FieldValue::String(v.clone()),
            FieldValue::Enumeration { container } => FieldValue::Enumeration {
                container: container.copy(),
            },
            FieldValue::Structure { members } => FieldValue::Structure {
                members: members
                    .iter()
                    .map(|m| m.as_ref().map(|f| f.copy()))
                    .collect(),
            },
            FieldValue::Variant { selected } => FieldValue::Variant {
                selected: selected.as_ref().map(|(l, f)| (*l, f.copy())),
            },
            FieldValue::Array { elements } => FieldValue::Array {
                elements: elements
                    .iter()
                    .map(|m| m.as_ref().map(|f| f.copy()))
                    .collect(),
            },
            FieldValue::Sequence { length, elements } => FieldValue::Sequence {
                length: length.as_ref().map(|f| f.copy()),
                elements: elements
                    .iter()
                    .map(|m| m.as_ref().map(|f| f.copy()))
                    .collect(),
            },
        };
        Field {
            inner: Rc::new(FieldInner {
                ty: self.inner.ty.clone(),
                value: RefCell::new(value),
            }),
        }
    }

    /// Serialize this field at its type's alignment. `native` resolves
    /// `ByteOrder::Native` declarations.
    pub(crate) fn serialize(&self, w: &mut BitWriter, native: Endianness) -> Result<(), Error> {
        w.align_to(self.inner.ty.alignment());
        let endianness = self.inner.ty.byte_order().endianness(native);
        match &*self.inner.value.borrow() {
            FieldValue::UnsignedInteger(cell) => {
                let v = cell.ok_or(Error::Unset("integer"))?;
                w.write_uint(v, self.inner.ty.integer_size()?, endianness);
            }
            FieldValue::SignedInteger(cell) => {
                let v = cell.ok_or(Error::Unset("integer"))?;
                w.write_sint(v, self.inner.ty.integer_size()?, endianness);
            }
            FieldValue::FloatingPoint(cell) => {
                let v = cell.ok_or(Error::Unset("floating point"))?.0;
                let bits =
                    self.inner.ty.exponent_digits()? + self.inner.ty.mantissa_digits()?;
                if bits == 32 {
                    w.write_f32(v as f32, endianness);
                } else {
                    w.write_f64(v, endianness);
                }
            }
            FieldValue::String(cell) => {
                let bytes = cell.as_ref().ok_or(Error::Unset("string"))?;
                w.write_string(bytes);
            }
            FieldValue::Enumeration { container } => container.serialize(w, native)?,
            FieldValue::Structure { members } => {
                for member in members {
                    member
                        .as_ref()
                        .ok_or(Error::Unset("structure member"))?
                        .serialize(w, native)?;
                }
            }
            FieldValue::Variant { selected } => {
                selected
                    .as_ref()
                    .ok_or(Error::Unset("variant"))?
                    .1
                    .serialize(w, native)?;
            }
            FieldValue::Array { elements } => {
                for element in elements {
                    element
                        .as_ref()
                        .ok_or(Error::Unset("array element"))?
                        .serialize(w, native)?;
                }
            }
            FieldValue::Sequence { length, elements } => {
                length.as_ref().ok_or(Error::Unset("sequence length"))?;
                for element in elements {
                    element
                        .as_ref()
                        .ok_or(Error::Unset("sequence element"))?
                        .serialize(w, native)?;
                }
            }
        }
        Ok(())
    }
}

impl FieldType {
    /// The variant branch type selected by `tag`'s current value.
    pub fn field_type_from_tag(&self, tag: &Field) -> Result<FieldType, Error> {
        resolve_variant_tag(self, tag).map(|(_, ty)| ty)
    }
}

/// Read the tag enumeration's container and resolve the variant branch
/// it selects. A value with no covering mapping, or a mapping with no
/// registered branch, is [`Error::InvalidTag`].
fn resolve_variant_tag(
    variant: &FieldType,
    tag: &Field,
) -> Result<(Intern<String>, FieldType), Error> {
    if variant.type_id() != TypeId::Variant {
        return Err(Error::invalid_argument("not a variant type"));
    }
    if tag.field_type() != variant.tag_type()? {
        return Err(Error::invalid_argument(
            "tag field does not instantiate the variant's tag type",
        ));
    }
    let container = tag.container()?;
    let (mapping, raw) = if container.field_type().is_signed()? {
        let v = container.signed()?;
        (tag.field_type().mapping_for_signed(v)?, v)
    } else {
        let v = container.unsigned()?;
        (tag.field_type().mapping_for_unsigned(v)?, v as i64)
    };
    let label = mapping.ok_or(Error::InvalidTag(raw))?.label;
    let child = variant
        .field_type_by_name(label.as_str())
        .map_err(|_| Error::InvalidTag(raw))?;
    Ok((label, child))
}

#[cfg(test)]
mod test {
    use super::*;

    fn u(bits: usize) -> FieldType {
        FieldType::integer(bits).unwrap()
    }

    fn s(bits: usize) -> FieldType {
        let t = FieldType::integer(bits).unwrap();
        t.set_signed(true).unwrap();
        t
    }

    #[test]
    fn integer_range_enforcement() {
        let f = Field::new(&u(12)).unwrap();
        assert!(!f.is_set());
        f.set_unsigned(4095).unwrap();
        assert_eq!(f.unsigned().unwrap(), 4095);
        assert!(matches!(f.set_unsigned(4096), Err(Error::OutOfRange(_))));
        assert!(matches!(f.set_signed(1), Err(Error::OutOfRange(_))));

        let f = Field::new(&s(8)).unwrap();
        f.set_signed(-128).unwrap();
        f.set_signed(127).unwrap();
        assert!(matches!(f.set_signed(128), Err(Error::OutOfRange(_))));
        assert!(matches!(f.set_signed(-129), Err(Error::OutOfRange(_))));
        assert_eq!(f.signed().unwrap(), 127);
    }

    #[test]
    fn instantiation_freezes_the_type() {
        let t = u(8);
        assert!(!t.is_frozen());
        let _f = Field::new(&t).unwrap();
        assert!(t.is_frozen());
        assert!(matches!(t.set_signed(true), Err(Error::Frozen)));
    }

    #[test]
    fn string_append_preserves_nuls_in_memory() {
        let f = Field::new(&FieldType::string()).unwrap();
        f.set_string("Test string ").unwrap();
        f.append_string("abcde").unwrap();
        f.append_bytes(b"abcd\0efg\0").unwrap();
        assert_eq!(f.string().unwrap(), "Test string abcdeabcd\0efg\0");

        let mut w = BitWriter::with_capacity(64);
        f.serialize(&mut w, Endianness::Big).unwrap();
        assert_eq!(w.bytes(), b"Test string abcdeabcdefg\0");
    }

    #[test]
    fn enumeration_mapping_name() {
        let container = s(64);
        let e = FieldType::enumeration(&container).unwrap();
        e.add_mapping("neg", -12345, 0).unwrap();
        e.add_mapping("ok", 42, 42).unwrap();

        let f = Field::new(&e).unwrap();
        f.container().unwrap().set_signed(-42).unwrap();
        assert_eq!(f.mapping_name().unwrap().as_str(), "neg");
        f.container().unwrap().set_signed(42).unwrap();
        assert_eq!(f.mapping_name().unwrap().as_str(), "ok");
        f.container().unwrap().set_signed(1).unwrap();
        assert!(matches!(f.mapping_name(), Err(Error::InvalidTag(1))));
    }

    #[test]
    fn structure_members_are_lazy_and_stable() {
        let st = FieldType::structure();
        st.add_field(&u(8), "a").unwrap();
        st.add_field(&FieldType::string(), "b").unwrap();

        let f = Field::new(&st).unwrap();
        let a0 = f.structure_field("a").unwrap();
        let a1 = f.structure_field_by_index(0).unwrap();
        assert!(a0.ptr_eq(&a1));
        assert!(f.structure_field("missing").is_err());
        assert!(f.structure_field_by_index(2).is_err());

        assert!(!f.is_set());
        a0.set_unsigned(1).unwrap();
        f.structure_field("b").unwrap().set_string("x").unwrap();
        assert!(f.is_set());
    }

    #[test]
    fn variant_selection_tracks_the_tag() {
        let tag_container = u(3);
        let tag_ty = FieldType::enumeration(&tag_container).unwrap();
        tag_ty.add_mapping_unsigned("UINT3", 0, 0).unwrap();
        tag_ty.add_mapping_unsigned("INT16", 1, 1).unwrap();
        let var_ty = FieldType::variant(&tag_ty, "selector").unwrap();
        var_ty.add_variant_field(&u(3), "UINT3").unwrap();
        var_ty.add_variant_field(&s(16), "INT16").unwrap();

        let tag = Field::new(&tag_ty).unwrap();
        let var = Field::new(&var_ty).unwrap();
        assert!(matches!(
            var.variant_current_field(),
            Err(Error::Unset("variant"))
        ));

        tag.container().unwrap().set_unsigned(1).unwrap();
        let first = var.variant_field(&tag).unwrap();
        let again = var.variant_field(&tag).unwrap();
        assert!(first.ptr_eq(&again));

        tag.container().unwrap().set_unsigned(0).unwrap();
        let other = var.variant_field(&tag).unwrap();
        assert!(!other.ptr_eq(&first));
        assert!(other.ptr_eq(&var.variant_current_field().unwrap()));

        tag.container().unwrap().set_unsigned(5).unwrap();
        assert!(matches!(var.variant_field(&tag), Err(Error::InvalidTag(5))));
    }

    #[test]
    fn sequence_length_bounds_access() {
        let seq_ty = FieldType::sequence(&s(16), "seq_len").unwrap();
        let len_ty = u(35);
        let len = Field::new(&len_ty).unwrap();
        len.set_unsigned(3).unwrap();

        let seq = Field::new(&seq_ty).unwrap();
        assert!(seq.sequence_field(0).is_err());
        seq.sequence_set_length(&len).unwrap();
        assert_eq!(seq.sequence_length().unwrap(), 3);
        seq.sequence_field(2).unwrap().set_signed(-1).unwrap();
        assert!(seq.sequence_field(3).is_err());
    }

    #[test]
    fn copy_yields_distinct_identity_and_equal_values() {
        let st = FieldType::structure();
        st.add_field(&u(12), "n").unwrap();
        st.add_field(&FieldType::string(), "s").unwrap();
        let f = Field::new(&st).unwrap();
        f.structure_field("n").unwrap().set_unsigned(42).unwrap();
        f.structure_field("s").unwrap().set_string("hi").unwrap();

        let c = f.copy();
        assert!(!c.ptr_eq(&f));
        assert_eq!(c.field_type(), f.field_type());
        let cn = c.structure_field("n").unwrap();
        assert!(!cn.ptr_eq(&f.structure_field("n").unwrap()));
        assert_eq!(cn.unsigned().unwrap(), 42);
        assert_eq!(c.structure_field("s").unwrap().string().unwrap(), "hi");

        // Mutating the copy leaves the original untouched
        cn.set_unsigned(7).unwrap();
        assert_eq!(f.structure_field("n").unwrap().unsigned().unwrap(), 42);
    }

    #[test]
    fn serialize_refuses_unset_scalars() {
        let f = Field::new(&u(8)).unwrap();
        let mut w = BitWriter::with_capacity(8);
        assert!(matches!(
            f.serialize(&mut w, Endianness::Big),
            Err(Error::Unset("integer"))
        ));
    }

    #[test]
    fn scalar_round_trip_via_declared_width() {
        let f = Field::new(&u(12)).unwrap();
        f.set_unsigned(0xABC).unwrap();
        let mut w = BitWriter::with_capacity(8);
        f.serialize(&mut w, Endianness::Big).unwrap();
        // 12 bits, MSB first: 1010_1011_1100
        assert_eq!(w.bytes(), &[0xAB, 0xC0]);

        let f = Field::new(&s(16)).unwrap();
        f.set_signed(-200).unwrap();
        let mut w = BitWriter::with_capacity(8);
        f.serialize(&mut w, Endianness::Little).unwrap();
        assert_eq!(w.bytes(), &(-200_i16).to_le_bytes());
    }
}
