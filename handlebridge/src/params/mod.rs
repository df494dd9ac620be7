//! Descriptor-driven parameter marshalling.
//!
//! Native libraries describe a parameter struct at runtime with a list of `(name, type, offset,
//! size)` descriptors. [`read`] decodes such a block into a [`ParamMap`] and [`write`] encodes a
//! map back into the block.

use std::ffi::{c_char, c_int, CStr, CString};
use std::fmt;
use std::{mem, ptr, slice};

mod errors;
pub use self::errors::{InvalidKeyError, ParamError, ParamResult};

mod value;
pub use self::value::{ParamValue, Value, ValueType};

mod map;
pub use self::map::ParamMap;


/// The type tag terminating a native descriptor array.
pub const PARAM_TYPE_LAST: c_int = 0;

const PTR_SIZE: usize = mem::size_of::<*const c_char>();

/// The type of one field of a parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// Native `int` of the field's size
    Int,
    /// `double`, or `float` for 4 byte fields
    Double,
    /// Fixed size character buffer
    Char,
    /// Pointer to a NUL terminated string
    String,
    /// Pointer to a NULL terminated array of string pointers
    StringList,
    /// `int` where nonzero means true
    Bool,
    /// A tag this crate doesn't understand.
    Unknown(c_int),
}

impl From<c_int> for ParamType {
    fn from(value: c_int) -> Self {
        match value {
            1 => ParamType::Int,
            2 => ParamType::Double,
            3 => ParamType::Char,
            4 => ParamType::String,
            5 => ParamType::StringList,
            6 => ParamType::Bool,
            x => ParamType::Unknown(x),
        }
    }
}

impl From<ParamType> for c_int {
    fn from(value: ParamType) -> Self {
        match value {
            ParamType::Int => 1,
            ParamType::Double => 2,
            ParamType::Char => 3,
            ParamType::String => 4,
            ParamType::StringList => 5,
            ParamType::Bool => 6,
            ParamType::Unknown(x) => x,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Int => f.write_str("int"),
            ParamType::Double => f.write_str("double"),
            ParamType::Char => f.write_str("char"),
            ParamType::String => f.write_str("string"),
            ParamType::StringList => f.write_str("string list"),
            ParamType::Bool => f.write_str("bool"),
            ParamType::Unknown(x) => write!(f, "unknown({})", x),
        }
    }
}

/// The native layout of one parameter descriptor.
///
/// Arrays of these are terminated by an entry whose `type_` is [`PARAM_TYPE_LAST`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawParamDescriptor {
    pub type_: c_int,
    pub name: *const c_char,
    pub size: c_int,
    pub offset: c_int,
    pub enum_values: *const *const c_char,
    pub range_min: f64,
    pub range_max: f64,
    pub readonly: c_int,
    pub description: *const c_char,
}

/// Describes one field of a native parameter block.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDescriptor {
    pub name: String,
    pub param_type: ParamType,
    pub offset: usize,
    pub size: usize,
    pub readonly: bool,
    pub description: Option<String>,
}

impl ParamDescriptor {
    pub fn new(name: &str, param_type: ParamType, offset: usize, size: usize) -> Self {
        Self {
            name: name.to_owned(),
            param_type,
            offset,
            size,
            readonly: false,
            description: None,
        }
    }

    /// Marks the field as read only, `write` leaves it untouched.
    #[must_use]
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Converts a native descriptor.
    ///
    /// # Safety
    /// `raw.name` and `raw.description` must be null or point to NUL terminated strings.
    pub unsafe fn from_raw(raw: &RawParamDescriptor) -> ParamResult<Self> {
        let name = lossy(raw.name).unwrap_or_default();
        let offset = usize::try_from(raw.offset)
            .map_err(|_| ParamError::InvalidLayout { name: name.clone() })?;
        let size = usize::try_from(raw.size)
            .map_err(|_| ParamError::InvalidLayout { name: name.clone() })?;

        Ok(Self {
            param_type: ParamType::from(raw.type_),
            offset,
            size,
            readonly: raw.readonly != 0,
            description: lossy(raw.description),
            name,
        })
    }
}

/// Collects the descriptors of a native array, stopping at the sentinel entry.
///
/// A null `ptr` yields an empty list.
///
/// # Safety
/// `ptr` must be null or point to an array of valid descriptors terminated by an entry whose type
/// is [`PARAM_TYPE_LAST`].
pub unsafe fn descriptors_from_raw(
    mut ptr: *const RawParamDescriptor,
) -> ParamResult<Vec<ParamDescriptor>> {
    let mut descriptors = Vec::new();
    if ptr.is_null() {
        return Ok(descriptors);
    }

    while (*ptr).type_ != PARAM_TYPE_LAST {
        descriptors.push(ParamDescriptor::from_raw(&*ptr)?);
        ptr = ptr.add(1);
    }
    Ok(descriptors)
}

unsafe fn lossy(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

/// Text storage created by [`write`].
///
/// The pointers written into a block point here, so the storage must outlive every reader of
/// those pointers. A collaborator that keeps the pointers takes this with
/// [`ParamBlock::take_allocations`].
#[derive(Debug, Default)]
pub struct Allocations {
    strings: Vec<CString>,
    lists: Vec<Box<[*const c_char]>>,
}

unsafe impl Send for Allocations {}
unsafe impl Sync for Allocations {}

impl Allocations {
    fn push_string(&mut self, string: CString) -> *const c_char {
        let ptr = string.as_ptr();
        self.strings.push(string);
        ptr
    }

    fn push_list(&mut self, list: Vec<CString>) -> *const *const c_char {
        let array: Box<[*const c_char]> = list
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(ptr::null()))
            .collect();
        self.strings.extend(list);
        let ptr = array.as_ptr();
        self.lists.push(array);
        ptr
    }

    /// Number of separate allocations held.
    pub fn len(&self) -> usize {
        self.strings.len() + self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A host-side copy of a native parameter block.
#[derive(Debug)]
pub struct ParamBlock {
    data: Vec<u8>,
    allocations: Allocations,
}

impl ParamBlock {
    /// Creates a block of `len` zero bytes. Every pointer field starts out null.
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: vec![0; len],
            allocations: Allocations::default(),
        }
    }

    /// Wraps bytes copied out of a native block.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            allocations: Allocations::default(),
        }
    }

    /// Copies `len` bytes of a native block.
    ///
    /// # Safety
    /// `ptr` must be valid for reads of `len` bytes.
    pub unsafe fn from_raw(ptr: *const u8, len: usize) -> Self {
        let data = if len == 0 {
            Vec::new()
        } else {
            slice::from_raw_parts(ptr, len).to_vec()
        };
        Self {
            data,
            allocations: Allocations::default(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    /// Mutable access to the raw bytes, for collaborators filling the block natively.
    ///
    /// # Safety
    /// Pointer fields must be left null or pointing to data matching their descriptor, and that
    /// data must stay valid while the block is read.
    #[inline]
    pub unsafe fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Hands over the text storage created by `write`.
    pub fn take_allocations(&mut self) -> Allocations {
        mem::take(&mut self.allocations)
    }

    fn field(&self, desc: &ParamDescriptor) -> ParamResult<&[u8]> {
        let range = self.range(desc)?;
        Ok(&self.data[range])
    }

    fn range(&self, desc: &ParamDescriptor) -> ParamResult<std::ops::Range<usize>> {
        match desc.offset.checked_add(desc.size) {
            Some(end) if end <= self.data.len() => Ok(desc.offset..end),
            _ => Err(ParamError::OutOfBounds {
                name: desc.name.clone(),
                offset: desc.offset,
                size: desc.size,
                len: self.data.len(),
            }),
        }
    }

    fn write_ptr(&mut self, offset: usize, ptr: usize) {
        self.data[offset..offset + PTR_SIZE].copy_from_slice(&ptr.to_ne_bytes());
    }
}

fn array<const N: usize>(bytes: &[u8], desc: &ParamDescriptor) -> ParamResult<[u8; N]> {
    <[u8; N]>::try_from(bytes).map_err(|_| ParamError::InvalidLayout {
        name: desc.name.clone(),
    })
}

fn decode_int(bytes: &[u8], desc: &ParamDescriptor) -> ParamResult<i64> {
    Ok(match bytes.len() {
        1 => i64::from(i8::from_ne_bytes(array(bytes, desc)?)),
        2 => i64::from(i16::from_ne_bytes(array(bytes, desc)?)),
        4 => i64::from(i32::from_ne_bytes(array(bytes, desc)?)),
        8 => i64::from_ne_bytes(array(bytes, desc)?),
        _ => {
            return Err(ParamError::InvalidLayout {
                name: desc.name.clone(),
            })
        }
    })
}

fn decode_double(bytes: &[u8], desc: &ParamDescriptor) -> ParamResult<f64> {
    Ok(match bytes.len() {
        4 => f64::from(f32::from_ne_bytes(array(bytes, desc)?)),
        8 => f64::from_ne_bytes(array(bytes, desc)?),
        _ => {
            return Err(ParamError::InvalidLayout {
                name: desc.name.clone(),
            })
        }
    })
}

fn decode_chars(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn decode_ptr(bytes: &[u8], desc: &ParamDescriptor) -> ParamResult<usize> {
    Ok(usize::from_ne_bytes(array(bytes, desc)?))
}

/// Decodes `block` into a map, one entry per descriptor.
///
/// Fields with an unknown type tag are skipped, so newer descriptor lists still decode. A
/// `String` field holding a null pointer produces no entry.
///
/// # Safety
/// Every `String` and `StringList` field of `block` must hold null or a pointer to valid data of
/// that shape.
pub unsafe fn read(block: &ParamBlock, descriptors: &[ParamDescriptor]) -> ParamResult<ParamMap> {
    let mut map = ParamMap::new();

    for desc in descriptors {
        let value = match desc.param_type {
            ParamType::Unknown(tag) => {
                log::debug!("skipping field '{}' with unknown type tag {}", desc.name, tag);
                continue;
            }
            ParamType::Int => ParamValue::Int(decode_int(block.field(desc)?, desc)?),
            ParamType::Double => ParamValue::Double(decode_double(block.field(desc)?, desc)?),
            ParamType::Char => ParamValue::Text(decode_chars(block.field(desc)?)),
            ParamType::Bool => ParamValue::Bool(decode_int(block.field(desc)?, desc)? != 0),
            ParamType::String => {
                let ptr = decode_ptr(block.field(desc)?, desc)? as *const c_char;
                match lossy(ptr) {
                    Some(text) => ParamValue::Text(text),
                    None => continue,
                }
            }
            ParamType::StringList => {
                let mut cursor = decode_ptr(block.field(desc)?, desc)? as *const *const c_char;
                let mut list = Vec::new();
                if !cursor.is_null() {
                    while !(*cursor).is_null() {
                        list.extend(lossy(*cursor));
                        cursor = cursor.add(1);
                    }
                }
                ParamValue::TextList(list)
            }
        };

        map.insert(&desc.name, value);
    }

    Ok(map)
}

enum Encoded {
    Raw(Vec<u8>),
    Text(CString),
    TextList(Vec<CString>),
}

fn encode_int(value: i64, desc: &ParamDescriptor) -> ParamResult<Vec<u8>> {
    let out_of_range = || ParamError::OutOfRange {
        name: desc.name.clone(),
    };
    Ok(match desc.size {
        1 => i8::try_from(value).map_err(|_| out_of_range())?.to_ne_bytes().to_vec(),
        2 => i16::try_from(value).map_err(|_| out_of_range())?.to_ne_bytes().to_vec(),
        4 => i32::try_from(value).map_err(|_| out_of_range())?.to_ne_bytes().to_vec(),
        8 => value.to_ne_bytes().to_vec(),
        _ => {
            return Err(ParamError::InvalidLayout {
                name: desc.name.clone(),
            })
        }
    })
}

fn encode(desc: &ParamDescriptor, value: &ParamValue) -> ParamResult<Encoded> {
    let mismatch = || ParamError::TypeMismatch {
        name: desc.name.clone(),
        expected: desc.param_type,
        found: value.value_type(),
    };
    let invalid_layout = || ParamError::InvalidLayout {
        name: desc.name.clone(),
    };

    Ok(match (desc.param_type, value) {
        (ParamType::Unknown(tag), _) => {
            return Err(ParamError::UnsupportedType {
                name: desc.name.clone(),
                tag,
            })
        }
        (ParamType::Int, ParamValue::Int(x)) => Encoded::Raw(encode_int(*x, desc)?),
        (ParamType::Int, ParamValue::Bool(x)) => Encoded::Raw(encode_int(i64::from(*x), desc)?),
        (ParamType::Bool, ParamValue::Bool(x)) => Encoded::Raw(encode_int(i64::from(*x), desc)?),
        (ParamType::Bool, ParamValue::Int(x)) => {
            Encoded::Raw(encode_int(i64::from(*x != 0), desc)?)
        }
        (ParamType::Double, ParamValue::Double(_) | ParamValue::Int(_)) => {
            let x = match value {
                ParamValue::Double(x) => *x,
                ParamValue::Int(x) => *x as f64,
                _ => return Err(mismatch()),
            };
            match desc.size {
                4 => Encoded::Raw((x as f32).to_ne_bytes().to_vec()),
                8 => Encoded::Raw(x.to_ne_bytes().to_vec()),
                _ => return Err(invalid_layout()),
            }
        }
        (ParamType::Char, ParamValue::Text(text)) => {
            if desc.size == 0 {
                return Err(invalid_layout());
            }
            let text = CString::new(text.as_str())?;
            let bytes = text.as_bytes();
            // Always leave room for the terminator.
            let n = bytes.len().min(desc.size - 1);
            let mut buf = vec![0; desc.size];
            buf[..n].copy_from_slice(&bytes[..n]);
            Encoded::Raw(buf)
        }
        (ParamType::String, ParamValue::Text(text)) => {
            if desc.size != PTR_SIZE {
                return Err(invalid_layout());
            }
            Encoded::Text(CString::new(text.as_str())?)
        }
        (ParamType::StringList, ParamValue::TextList(list)) => {
            if desc.size != PTR_SIZE {
                return Err(invalid_layout());
            }
            let list = list
                .iter()
                .map(|s| CString::new(s.as_str()))
                .collect::<Result<Vec<_>, _>>()?;
            Encoded::TextList(list)
        }
        _ => return Err(mismatch()),
    })
}

/// Encodes the entries of `map` into `block`.
///
/// Only descriptors whose name appears in `map` are touched, and values for read only fields
/// are ignored. Either every supplied value is written or, on error, none is. Text is copied
/// into storage owned by the block; previous pointers are overwritten but never freed.
pub fn write(
    block: &mut ParamBlock,
    descriptors: &[ParamDescriptor],
    map: &ParamMap,
) -> ParamResult<()> {
    let mut pending = Vec::new();

    for desc in descriptors {
        let Ok(value) = map.get_value(&desc.name) else {
            continue;
        };
        if desc.readonly {
            log::debug!("ignoring value for read only field '{}'", desc.name);
            continue;
        }
        let encoded = encode(desc, value)?;
        block.range(desc)?;
        pending.push((desc.offset, encoded));
    }

    for (offset, encoded) in pending {
        match encoded {
            Encoded::Raw(bytes) => {
                block.data[offset..offset + bytes.len()].copy_from_slice(&bytes);
            }
            Encoded::Text(text) => {
                let ptr = block.allocations.push_string(text);
                block.write_ptr(offset, ptr as usize);
            }
            Encoded::TextList(list) => {
                let ptr = block.allocations.push_list(list);
                block.write_ptr(offset, ptr as usize);
            }
        }
    }

    Ok(())
}
