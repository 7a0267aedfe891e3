use crate::{
    error::Error,
    types::{validate_identifier, ByteOrder, DisplayBase, StringEncoding},
};
use fxhash::FxHashMap;
use internment::Intern;
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

/// Discriminant of a [`FieldType`]'s kind.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum TypeId {
    Integer,
    FloatingPoint,
    String,
    Enumeration,
    Structure,
    Variant,
    Array,
    Sequence,
}

/// A schema node describing the wire layout of one data field.
///
/// Field types form a tree: composites (structures, variants, arrays,
/// sequences, enumerations) own their child types. Handles are cheap
/// clones of a shared node; equality is node identity.
///
/// A field type freezes the first time a field is instantiated from it,
/// when it joins a frozen composite, or when its stream class produces
/// a stream. Frozen nodes reject every mutator with [`Error::Frozen`].
#[derive(Clone, Debug)]
pub struct FieldType {
    inner: Rc<TypeInner>,
}

#[derive(Debug)]
struct TypeInner {
    frozen: Cell<bool>,
    byte_order: Cell<ByteOrder>,
    alignment: Cell<usize>,
    spec: RefCell<TypeSpec>,
}

#[derive(Debug)]
enum TypeSpec {
    Integer(IntegerSpec),
    FloatingPoint(FloatSpec),
    String(StringSpec),
    Enumeration(EnumSpec),
    Structure(StructSpec),
    Variant(VariantSpec),
    Array(ArraySpec),
    Sequence(SequenceSpec),
}

#[derive(Debug)]
struct IntegerSpec {
    size: usize,
    signed: bool,
    base: DisplayBase,
    encoding: StringEncoding,
}

#[derive(Debug)]
struct FloatSpec {
    precision: FloatPrecision,
}

/// IEEE-754 shape of a floating point type. The exponent and mantissa
/// widths come in fixed pairs: 8+24 (single precision) or 11+53
/// (double), with the sign bit counted in the mantissa.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum FloatPrecision {
    Single,
    Double,
}

impl FloatPrecision {
    fn exponent_digits(self) -> usize {
        match self {
            Self::Single => 8,
            Self::Double => 11,
        }
    }

    fn mantissa_digits(self) -> usize {
        match self {
            Self::Single => 24,
            Self::Double => 53,
        }
    }
}

#[derive(Debug)]
struct StringSpec {
    encoding: StringEncoding,
}

#[derive(Debug)]
struct EnumSpec {
    container: FieldType,
    mappings: Vec<Mapping>,
}

#[derive(Debug)]
struct StructSpec {
    members: Vec<(Intern<String>, FieldType)>,
    index: FxHashMap<Intern<String>, usize>,
}

#[derive(Debug)]
struct VariantSpec {
    tag: FieldType,
    tag_name: Intern<String>,
    choices: Vec<(Intern<String>, FieldType)>,
    index: FxHashMap<Intern<String>, usize>,
}

#[derive(Debug)]
struct ArraySpec {
    element: FieldType,
    length: usize,
}

#[derive(Debug)]
struct SequenceSpec {
    element: FieldType,
    length_name: Intern<String>,
}

/// One enumeration mapping: a label covering an inclusive value range.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Mapping {
    pub label: Intern<String>,
    pub range: MappingRange,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum MappingRange {
    Unsigned(u64, u64),
    Signed(i64, i64),
}

impl MappingRange {
    pub fn contains_unsigned(&self, value: u64) -> bool {
        match self {
            MappingRange::Unsigned(start, end) => (*start..=*end).contains(&value),
            MappingRange::Signed(..) => false,
        }
    }

    pub fn contains_signed(&self, value: i64) -> bool {
        match self {
            MappingRange::Unsigned(..) => false,
            MappingRange::Signed(start, end) => (*start..=*end).contains(&value),
        }
    }

    fn overlaps(&self, other: &MappingRange) -> bool {
        match (self, other) {
            (MappingRange::Unsigned(a0, a1), MappingRange::Unsigned(b0, b1)) => {
                a0 <= b1 && b0 <= a1
            }
            (MappingRange::Signed(a0, a1), MappingRange::Signed(b0, b1)) => a0 <= b1 && b0 <= a1,
            _ => false,
        }
    }
}

const VALID_ALIGNMENTS: &[usize] = &[1, 2, 4, 8, 16, 32, 64];

impl FieldType {
    fn from_spec(spec: TypeSpec, byte_order: ByteOrder, alignment: usize) -> Self {
        Self {
            inner: Rc::new(TypeInner {
                frozen: Cell::new(false),
                byte_order: Cell::new(byte_order),
                alignment: Cell::new(alignment),
                spec: RefCell::new(spec),
            }),
        }
    }

    /// Create an unsigned integer type of `size` bits, decimal base,
    /// native byte order. Alignment is 8 for whole-byte sizes, 1
    /// otherwise.
    pub fn integer(size: usize) -> Result<Self, Error> {
        if !(1..=64).contains(&size) {
            return Err(Error::out_of_range(format!(
                "integer size {size} not in 1..=64"
            )));
        }
        let alignment = if size % 8 == 0 { 8 } else { 1 };
        Ok(Self::from_spec(
            TypeSpec::Integer(IntegerSpec {
                size,
                signed: false,
                base: DisplayBase::default(),
                encoding: StringEncoding::None,
            }),
            ByteOrder::Native,
            alignment,
        ))
    }

    /// Create a floating point type, IEEE-754 single precision by
    /// default (8 exponent bits, 24 mantissa bits including the sign).
    pub fn floating_point() -> Self {
        Self::from_spec(
            TypeSpec::FloatingPoint(FloatSpec {
                precision: FloatPrecision::Single,
            }),
            ByteOrder::Native,
            8,
        )
    }

    /// Create a UTF-8, NUL-terminated string type.
    pub fn string() -> Self {
        Self::from_spec(
            TypeSpec::String(StringSpec {
                encoding: StringEncoding::Utf8,
            }),
            ByteOrder::Native,
            8,
        )
    }

    /// Create an enumeration over an integer container type.
    pub fn enumeration(container: &FieldType) -> Result<Self, Error> {
        if container.type_id() != TypeId::Integer {
            return Err(Error::invalid_argument(
                "enumeration container must be an integer type",
            ));
        }
        container.check_embeddable()?;
        Ok(Self::from_spec(
            TypeSpec::Enumeration(EnumSpec {
                container: container.clone(),
                mappings: Vec::new(),
            }),
            ByteOrder::Native,
            1,
        ))
    }

    /// Create an empty structure type.
    pub fn structure() -> Self {
        Self::from_spec(
            TypeSpec::Structure(StructSpec {
                members: Vec::new(),
                index: FxHashMap::default(),
            }),
            ByteOrder::Native,
            1,
        )
    }

    /// Create a variant type selected by the enumeration `tag`.
    /// `tag_name` is the path of the tag field in the enclosing scope.
    pub fn variant(tag: &FieldType, tag_name: &str) -> Result<Self, Error> {
        if tag.type_id() != TypeId::Enumeration {
            return Err(Error::invalid_argument(
                "variant tag must be an enumeration type",
            ));
        }
        if tag_name.is_empty() {
            return Err(Error::invalid_argument("empty variant tag name"));
        }
        Ok(Self::from_spec(
            TypeSpec::Variant(VariantSpec {
                tag: tag.clone(),
                tag_name: Intern::new(tag_name.to_owned()),
                choices: Vec::new(),
                index: FxHashMap::default(),
            }),
            ByteOrder::Native,
            1,
        ))
    }

    /// Create a fixed-length array type.
    pub fn array(element: &FieldType, length: usize) -> Result<Self, Error> {
        element.check_embeddable()?;
        Ok(Self::from_spec(
            TypeSpec::Array(ArraySpec {
                element: element.clone(),
                length,
            }),
            ByteOrder::Native,
            1,
        ))
    }

    /// Create a sequence type whose length is carried by the integer
    /// field named `length_name` in the enclosing scope.
    pub fn sequence(element: &FieldType, length_name: &str) -> Result<Self, Error> {
        element.check_embeddable()?;
        if length_name.is_empty() {
            return Err(Error::invalid_argument("empty sequence length name"));
        }
        Ok(Self::from_spec(
            TypeSpec::Sequence(SequenceSpec {
                element: element.clone(),
                length_name: Intern::new(length_name.to_owned()),
            }),
            ByteOrder::Native,
            1,
        ))
    }

    pub fn type_id(&self) -> TypeId {
        match &*self.inner.spec.borrow() {
            TypeSpec::Integer(_) => TypeId::Integer,
            TypeSpec::FloatingPoint(_) => TypeId::FloatingPoint,
            TypeSpec::String(_) => TypeId::String,
            TypeSpec::Enumeration(_) => TypeId::Enumeration,
            TypeSpec::Structure(_) => TypeId::Structure,
            TypeSpec::Variant(_) => TypeId::Variant,
            TypeSpec::Array(_) => TypeId::Array,
            TypeSpec::Sequence(_) => TypeId::Sequence,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.get()
    }

    /// Freeze this type and every type reachable from it. Idempotent.
    pub fn freeze(&self) {
        if self.inner.frozen.replace(true) {
            return;
        }
        match &*self.inner.spec.borrow() {
            TypeSpec::Enumeration(e) => e.container.freeze(),
            TypeSpec::Structure(s) => s.members.iter().for_each(|(_, t)| t.freeze()),
            TypeSpec::Variant(v) => {
                v.tag.freeze();
                v.choices.iter().for_each(|(_, t)| t.freeze());
            }
            TypeSpec::Array(a) => a.element.freeze(),
            TypeSpec::Sequence(s) => s.element.freeze(),
            _ => {}
        }
    }

    fn check_not_frozen(&self) -> Result<(), Error> {
        if self.is_frozen() {
            Err(Error::Frozen)
        } else {
            Ok(())
        }
    }

    /// Enumerations may only be embedded once they carry at least one
    /// mapping; a 1-bit integer must still be 1-bit aligned.
    fn check_embeddable(&self) -> Result<(), Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Enumeration(e) => {
                if e.mappings.is_empty() {
                    return Err(Error::invalid_argument(
                        "enumeration without mappings cannot be embedded",
                    ));
                }
            }
            TypeSpec::Integer(i) => {
                if i.size == 1 && self.inner.alignment.get() != 1 {
                    return Err(Error::invalid_argument(
                        "a 1-bit integer is 1-bit aligned",
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Alignment of the first bit of this type's instances (bits).
    /// Structures report the largest alignment among their members,
    /// enumerations their container's, arrays and sequences their
    /// element's.
    pub fn alignment(&self) -> usize {
        match &*self.inner.spec.borrow() {
            TypeSpec::Enumeration(e) => e.container.alignment(),
            TypeSpec::Structure(s) => s
                .members
                .iter()
                .map(|(_, t)| t.alignment())
                .max()
                .unwrap_or(1)
                .max(self.inner.alignment.get()),
            // A variant's instances align on the selected branch
            TypeSpec::Variant(_) => 1,
            TypeSpec::Array(a) => a.element.alignment(),
            TypeSpec::Sequence(s) => s.element.alignment(),
            _ => self.inner.alignment.get(),
        }
    }

    /// Set the alignment (bits) of this type's instances. Structures
    /// treat this as a minimum alignment; strings are fixed to 8.
    pub fn set_alignment(&self, alignment: usize) -> Result<(), Error> {
        self.check_not_frozen()?;
        if !VALID_ALIGNMENTS.contains(&alignment) {
            return Err(Error::invalid_argument(format!(
                "alignment {alignment} is not a power of two in 1..=64"
            )));
        }
        match &*self.inner.spec.borrow() {
            TypeSpec::Integer(i) if i.size == 1 && alignment != 1 => {
                return Err(Error::invalid_argument(
                    "a 1-bit integer is 1-bit aligned",
                ));
            }
            TypeSpec::String(_) if alignment != 8 => {
                return Err(Error::invalid_argument("string alignment is fixed to 8"));
            }
            TypeSpec::Enumeration(e) => return e.container.set_alignment(alignment),
            TypeSpec::Array(_) | TypeSpec::Sequence(_) | TypeSpec::Variant(_) => {
                return Err(Error::invalid_argument(
                    "alignment is carried by the element types",
                ));
            }
            _ => {}
        }
        self.inner.alignment.set(alignment);
        Ok(())
    }

    pub fn byte_order(&self) -> ByteOrder {
        match &*self.inner.spec.borrow() {
            TypeSpec::Enumeration(e) => e.container.byte_order(),
            _ => self.inner.byte_order.get(),
        }
    }

    pub fn set_byte_order(&self, byte_order: ByteOrder) -> Result<(), Error> {
        self.check_not_frozen()?;
        match &*self.inner.spec.borrow() {
            TypeSpec::Integer(_) | TypeSpec::FloatingPoint(_) => {}
            TypeSpec::Enumeration(e) => return e.container.set_byte_order(byte_order),
            _ => {
                return Err(Error::invalid_argument(
                    "byte order applies to integer and floating point types",
                ));
            }
        }
        self.inner.byte_order.set(byte_order);
        Ok(())
    }

    fn with_integer<T>(&self, f: impl FnOnce(&IntegerSpec) -> T) -> Result<T, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Integer(i) => Ok(f(i)),
            _ => Err(Error::invalid_argument("not an integer type")),
        }
    }

    fn with_integer_mut<T>(&self, f: impl FnOnce(&mut IntegerSpec) -> T) -> Result<T, Error> {
        self.check_not_frozen()?;
        match &mut *self.inner.spec.borrow_mut() {
            TypeSpec::Integer(i) => Ok(f(i)),
            _ => Err(Error::invalid_argument("not an integer type")),
        }
    }

    /// Size of an integer type's instances (bits).
    pub fn integer_size(&self) -> Result<usize, Error> {
        self.with_integer(|i| i.size)
    }

    pub fn is_signed(&self) -> Result<bool, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Integer(i) => Ok(i.signed),
            TypeSpec::Enumeration(e) => e.container.is_signed(),
            _ => Err(Error::invalid_argument("not an integer type")),
        }
    }

    pub fn set_signed(&self, signed: bool) -> Result<(), Error> {
        self.with_integer_mut(|i| i.signed = signed)
    }

    pub fn base(&self) -> Result<DisplayBase, Error> {
        self.with_integer(|i| i.base)
    }

    pub fn set_base(&self, base: DisplayBase) -> Result<(), Error> {
        self.with_integer_mut(|i| i.base = base)
    }

    /// Encoding of a string type, or the encoding hint of an integer
    /// type.
    pub fn encoding(&self) -> Result<StringEncoding, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Integer(i) => Ok(i.encoding),
            TypeSpec::String(s) => Ok(s.encoding),
            _ => Err(Error::invalid_argument("type carries no encoding")),
        }
    }

    pub fn set_encoding(&self, encoding: StringEncoding) -> Result<(), Error> {
        self.check_not_frozen()?;
        match &mut *self.inner.spec.borrow_mut() {
            TypeSpec::Integer(i) => i.encoding = encoding,
            TypeSpec::String(s) => {
                if encoding == StringEncoding::None {
                    return Err(Error::invalid_argument("string encoding cannot be none"));
                }
                s.encoding = encoding;
            }
            _ => return Err(Error::invalid_argument("type carries no encoding")),
        }
        Ok(())
    }

    pub fn exponent_digits(&self) -> Result<usize, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::FloatingPoint(f) => Ok(f.precision.exponent_digits()),
            _ => Err(Error::invalid_argument("not a floating point type")),
        }
    }

    pub fn mantissa_digits(&self) -> Result<usize, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::FloatingPoint(f) => Ok(f.precision.mantissa_digits()),
            _ => Err(Error::invalid_argument("not a floating point type")),
        }
    }

    /// Exponent width in bits. The widths pair up per IEEE-754: 8
    /// selects single precision (24 mantissa bits), 11 double (53).
    pub fn set_exponent_digits(&self, digits: usize) -> Result<(), Error> {
        self.check_not_frozen()?;
        match &mut *self.inner.spec.borrow_mut() {
            TypeSpec::FloatingPoint(f) => {
                f.precision = match digits {
                    8 => FloatPrecision::Single,
                    11 => FloatPrecision::Double,
                    _ => {
                        return Err(Error::out_of_range(format!(
                            "unsupported exponent digit count {digits}"
                        )));
                    }
                };
                Ok(())
            }
            _ => Err(Error::invalid_argument("not a floating point type")),
        }
    }

    /// Mantissa width in bits, sign bit included. The widths pair up
    /// per IEEE-754: 24 selects single precision (8 exponent bits),
    /// 53 double (11).
    pub fn set_mantissa_digits(&self, digits: usize) -> Result<(), Error> {
        self.check_not_frozen()?;
        match &mut *self.inner.spec.borrow_mut() {
            TypeSpec::FloatingPoint(f) => {
                f.precision = match digits {
                    24 => FloatPrecision::Single,
                    53 => FloatPrecision::Double,
                    _ => {
                        return Err(Error::out_of_range(format!(
                            "unsupported mantissa digit count {digits}"
                        )));
                    }
                };
                Ok(())
            }
            _ => Err(Error::invalid_argument("not a floating point type")),
        }
    }

    pub fn container(&self) -> Result<FieldType, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Enumeration(e) => Ok(e.container.clone()),
            _ => Err(Error::invalid_argument("not an enumeration type")),
        }
    }

    /// Add a signed mapping to an enumeration over a signed container.
    pub fn add_mapping(&self, label: &str, start: i64, end: i64) -> Result<(), Error> {
        if self.is_signed()? {
            self.add_mapping_range(label, MappingRange::Signed(start, end))
        } else {
            Err(Error::invalid_argument(
                "signed mapping on an unsigned container",
            ))
        }
    }

    /// Add an unsigned mapping to an enumeration over an unsigned
    /// container.
    pub fn add_mapping_unsigned(&self, label: &str, start: u64, end: u64) -> Result<(), Error> {
        if self.is_signed()? {
            Err(Error::invalid_argument(
                "unsigned mapping on a signed container",
            ))
        } else {
            self.add_mapping_range(label, MappingRange::Unsigned(start, end))
        }
    }

    fn add_mapping_range(&self, label: &str, range: MappingRange) -> Result<(), Error> {
        self.check_not_frozen()?;
        validate_identifier(label)?;
        let valid = match range {
            MappingRange::Unsigned(start, end) => start <= end,
            MappingRange::Signed(start, end) => start <= end,
        };
        if !valid {
            return Err(Error::out_of_range(format!(
                "mapping '{label}' ends before it starts"
            )));
        }
        match &mut *self.inner.spec.borrow_mut() {
            TypeSpec::Enumeration(e) => {
                let label = Intern::new(label.to_owned());
                if e.mappings.iter().any(|m| m.label == label) {
                    return Err(Error::Duplicate(label.to_string()));
                }
                if e.mappings.iter().any(|m| m.range.overlaps(&range)) {
                    return Err(Error::Overlap(label.to_string()));
                }
                e.mappings.push(Mapping { label, range });
                Ok(())
            }
            _ => Err(Error::invalid_argument("not an enumeration type")),
        }
    }

    pub fn mapping_count(&self) -> Result<usize, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Enumeration(e) => Ok(e.mappings.len()),
            _ => Err(Error::invalid_argument("not an enumeration type")),
        }
    }

    pub fn mapping(&self, index: usize) -> Result<Mapping, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Enumeration(e) => e.mappings.get(index).cloned().ok_or_else(|| {
                Error::invalid_argument(format!("mapping index {index} out of bounds"))
            }),
            _ => Err(Error::invalid_argument("not an enumeration type")),
        }
    }

    pub fn mapping_index_by_label(&self, label: &str) -> Result<usize, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Enumeration(e) => e
                .mappings
                .iter()
                .position(|m| m.label.as_str() == label)
                .ok_or_else(|| Error::invalid_argument(format!("unknown mapping label '{label}'"))),
            _ => Err(Error::invalid_argument("not an enumeration type")),
        }
    }

    /// First mapping whose range covers the unsigned `value`.
    pub fn mapping_for_unsigned(&self, value: u64) -> Result<Option<Mapping>, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Enumeration(e) => Ok(e
                .mappings
                .iter()
                .find(|m| m.range.contains_unsigned(value))
                .cloned()),
            _ => Err(Error::invalid_argument("not an enumeration type")),
        }
    }

    /// First mapping whose range covers the signed `value`.
    pub fn mapping_for_signed(&self, value: i64) -> Result<Option<Mapping>, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Enumeration(e) => Ok(e
                .mappings
                .iter()
                .find(|m| m.range.contains_signed(value))
                .cloned()),
            _ => Err(Error::invalid_argument("not an enumeration type")),
        }
    }

    /// Append a named member to a structure type.
    pub fn add_field(&self, field_type: &FieldType, name: &str) -> Result<(), Error> {
        self.check_not_frozen()?;
        validate_identifier(name)?;
        field_type.check_embeddable()?;
        match &mut *self.inner.spec.borrow_mut() {
            TypeSpec::Structure(s) => {
                let name = Intern::new(name.to_owned());
                if s.index.contains_key(&name) {
                    return Err(Error::Duplicate(name.to_string()));
                }
                s.index.insert(name, s.members.len());
                s.members.push((name, field_type.clone()));
                Ok(())
            }
            _ => Err(Error::invalid_argument("not a structure type")),
        }
    }

    pub fn field_count(&self) -> Result<usize, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Structure(s) => Ok(s.members.len()),
            TypeSpec::Variant(v) => Ok(v.choices.len()),
            _ => Err(Error::invalid_argument("not a structure or variant type")),
        }
    }

    /// Name and type of the member at `index` of a structure or
    /// variant.
    pub fn field(&self, index: usize) -> Result<(Intern<String>, FieldType), Error> {
        let member = match &*self.inner.spec.borrow() {
            TypeSpec::Structure(s) => s.members.get(index).cloned(),
            TypeSpec::Variant(v) => v.choices.get(index).cloned(),
            _ => return Err(Error::invalid_argument("not a structure or variant type")),
        };
        member.ok_or_else(|| Error::invalid_argument(format!("field index {index} out of bounds")))
    }

    pub fn field_type_by_name(&self, name: &str) -> Result<FieldType, Error> {
        let name = Intern::new(name.to_owned());
        match &*self.inner.spec.borrow() {
            TypeSpec::Structure(s) => s
                .index
                .get(&name)
                .map(|i| s.members[*i].1.clone())
                .ok_or_else(|| Error::invalid_argument(format!("unknown field '{name}'"))),
            TypeSpec::Variant(v) => v
                .index
                .get(&name)
                .map(|i| v.choices[*i].1.clone())
                .ok_or_else(|| Error::invalid_argument(format!("unknown label '{name}'"))),
            _ => Err(Error::invalid_argument("not a structure or variant type")),
        }
    }

    pub(crate) fn field_index_by_name(&self, name: &str) -> Result<usize, Error> {
        let name = Intern::new(name.to_owned());
        match &*self.inner.spec.borrow() {
            TypeSpec::Structure(s) => s
                .index
                .get(&name)
                .copied()
                .ok_or_else(|| Error::invalid_argument(format!("unknown field '{name}'"))),
            _ => Err(Error::invalid_argument("not a structure type")),
        }
    }

    pub fn tag_name(&self) -> Result<Intern<String>, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Variant(v) => Ok(v.tag_name),
            _ => Err(Error::invalid_argument("not a variant type")),
        }
    }

    pub fn tag_type(&self) -> Result<FieldType, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Variant(v) => Ok(v.tag.clone()),
            _ => Err(Error::invalid_argument("not a variant type")),
        }
    }

    /// Register the child type serialized when the tag selects `label`.
    /// The label must exist in the tag enumeration.
    pub fn add_variant_field(&self, field_type: &FieldType, label: &str) -> Result<(), Error> {
        self.check_not_frozen()?;
        field_type.check_embeddable()?;
        match &mut *self.inner.spec.borrow_mut() {
            TypeSpec::Variant(v) => {
                v.tag.mapping_index_by_label(label)?;
                let label = Intern::new(label.to_owned());
                if v.index.contains_key(&label) {
                    return Err(Error::Duplicate(label.to_string()));
                }
                v.index.insert(label, v.choices.len());
                v.choices.push((label, field_type.clone()));
                Ok(())
            }
            _ => Err(Error::invalid_argument("not a variant type")),
        }
    }

    pub fn element_type(&self) -> Result<FieldType, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Array(a) => Ok(a.element.clone()),
            TypeSpec::Sequence(s) => Ok(s.element.clone()),
            _ => Err(Error::invalid_argument("not an array or sequence type")),
        }
    }

    pub fn array_length(&self) -> Result<usize, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Array(a) => Ok(a.length),
            _ => Err(Error::invalid_argument("not an array type")),
        }
    }

    pub fn length_field_name(&self) -> Result<Intern<String>, Error> {
        match &*self.inner.spec.borrow() {
            TypeSpec::Sequence(s) => Ok(s.length_name),
            _ => Err(Error::invalid_argument("not a sequence type")),
        }
    }
}

impl PartialEq for FieldType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for FieldType {}
