// crates/climate-eval-catalog/src/netcdf.rs
// ============================================================================
// Module: netCDF Classic Header Reader
// Description: Minimal parser for the netCDF classic (CDF-1/CDF-2) header.
// Purpose: Read global attributes and variable names without C bindings.
// Dependencies: (standard library only; format is fixed big-endian)
// ============================================================================

//! ## Overview
//! The `complete` CMIP6 parser reads global attributes straight from the file
//! instead of trusting the path layout. Only the classic on-disk format is
//! handled here; netCDF-4 (HDF5) files are reported as [`NetcdfError::NotClassic`]
//! and the caller falls back to path parsing. The header layout is:
//! magic `CDF<version>`, record count, dimension list, global attribute
//! list, then the variable list. All lists are tagged and big-endian, with
//! names padded to four bytes. Parsing stops after the information the catalog needs; variable
//! data is never touched.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// List tag for dimensions.
const TAG_DIMENSION: u32 = 0x0A;
/// List tag for variables.
const TAG_VARIABLE: u32 = 0x0B;
/// List tag for attributes.
const TAG_ATTRIBUTE: u32 = 0x0C;
/// Largest header this parser will read, as a hard safety bound.
const MAX_HEADER_ELEMENTS: u32 = 65_536;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// netCDF header parsing errors.
///
/// # Invariants
/// - `NotClassic` is recoverable; callers fall back to path parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetcdfError {
    /// The file does not start with a classic-format magic.
    #[error("not a netcdf classic file")]
    NotClassic,
    /// The header ended before a declared element.
    #[error("netcdf header truncated at byte {offset}")]
    Truncated {
        /// Byte offset where the read failed.
        offset: usize,
    },
    /// The header declared an impossible structure.
    #[error("netcdf header malformed: {0}")]
    Malformed(String),
}

// ============================================================================
// SECTION: Header Model
// ============================================================================

/// Parsed classic-format header content relevant to the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetcdfHeader {
    /// Global attributes rendered as strings.
    pub global_attributes: BTreeMap<String, String>,
    /// Declared variable names in declaration order.
    pub variable_names: Vec<String>,
}

impl NetcdfHeader {
    /// Returns a global attribute value.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.global_attributes.get(name).map(String::as_str)
    }
}

// ============================================================================
// SECTION: Cursor
// ============================================================================

/// Byte cursor over the header with bounds-checked big-endian reads.
struct Cursor<'a> {
    /// Underlying bytes.
    bytes: &'a [u8],
    /// Current read offset.
    offset: usize,
}

impl<'a> Cursor<'a> {
    /// Creates a cursor at the start of the bytes.
    const fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: 0,
        }
    }

    /// Reads `count` raw bytes.
    fn take(&mut self, count: usize) -> Result<&'a [u8], NetcdfError> {
        let end = self.offset.checked_add(count).ok_or(NetcdfError::Truncated {
            offset: self.offset,
        })?;
        let slice = self.bytes.get(self.offset..end).ok_or(NetcdfError::Truncated {
            offset: self.offset,
        })?;
        self.offset = end;
        Ok(slice)
    }

    /// Reads one big-endian u32.
    fn read_u32(&mut self) -> Result<u32, NetcdfError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Skips padding to the next four-byte boundary after `length` bytes.
    fn skip_padding(&mut self, length: usize) -> Result<(), NetcdfError> {
        let remainder = length % 4;
        if remainder != 0 {
            self.take(4 - remainder)?;
        }
        Ok(())
    }

    /// Reads a name: u32 length, bytes, padding.
    fn read_name(&mut self) -> Result<String, NetcdfError> {
        let length = self.read_u32()?;
        if length > MAX_HEADER_ELEMENTS {
            return Err(NetcdfError::Malformed(format!("name length {length} exceeds bound")));
        }
        let bytes = self.take(length as usize)?;
        let name = String::from_utf8(bytes.to_vec())
            .map_err(|_| NetcdfError::Malformed("name is not utf-8".to_string()))?;
        self.skip_padding(length as usize)?;
        Ok(name)
    }
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses the classic header from file bytes.
///
/// # Errors
///
/// Returns [`NetcdfError::NotClassic`] for non-classic files and
/// [`NetcdfError::Truncated`]/[`NetcdfError::Malformed`] for corrupt headers.
pub fn parse_header(bytes: &[u8]) -> Result<NetcdfHeader, NetcdfError> {
    let mut cursor = Cursor::new(bytes);
    let magic = cursor.take(4).map_err(|_| NetcdfError::NotClassic)?;
    if &magic[0..3] != b"CDF" || !matches!(magic[3], 1 | 2) {
        return Err(NetcdfError::NotClassic);
    }
    let offset_width: usize = if magic[3] == 2 { 8 } else { 4 };

    // numrecs (or STREAMING marker); the value is irrelevant to the catalog.
    cursor.read_u32()?;

    skip_dimension_list(&mut cursor)?;
    let global_attributes = parse_attribute_list(&mut cursor)?;
    let variable_names = parse_variable_names(&mut cursor, offset_width)?;

    Ok(NetcdfHeader {
        global_attributes,
        variable_names,
    })
}

/// Reads a list header, returning the element count (zero for ABSENT).
fn read_list_header(cursor: &mut Cursor<'_>, expected_tag: u32) -> Result<u32, NetcdfError> {
    let tag = cursor.read_u32()?;
    let count = cursor.read_u32()?;
    if tag == 0 && count == 0 {
        return Ok(0);
    }
    if tag != expected_tag {
        return Err(NetcdfError::Malformed(format!(
            "expected list tag {expected_tag:#x}, found {tag:#x}"
        )));
    }
    if count > MAX_HEADER_ELEMENTS {
        return Err(NetcdfError::Malformed(format!("list of {count} elements exceeds bound")));
    }
    Ok(count)
}

/// Skips the dimension list.
fn skip_dimension_list(cursor: &mut Cursor<'_>) -> Result<(), NetcdfError> {
    let count = read_list_header(cursor, TAG_DIMENSION)?;
    for _ in 0..count {
        cursor.read_name()?;
        cursor.read_u32()?;
    }
    Ok(())
}

/// Parses an attribute list into rendered string values.
fn parse_attribute_list(
    cursor: &mut Cursor<'_>,
) -> Result<BTreeMap<String, String>, NetcdfError> {
    let count = read_list_header(cursor, TAG_ATTRIBUTE)?;
    let mut attributes = BTreeMap::new();
    for _ in 0..count {
        let name = cursor.read_name()?;
        let value = parse_attribute_value(cursor)?;
        attributes.insert(name, value);
    }
    Ok(attributes)
}

/// Parses one attribute value, rendering it as a string.
fn parse_attribute_value(cursor: &mut Cursor<'_>) -> Result<String, NetcdfError> {
    let nc_type = cursor.read_u32()?;
    let nelems = cursor.read_u32()?;
    if nelems > MAX_HEADER_ELEMENTS {
        return Err(NetcdfError::Malformed(format!("attribute of {nelems} values exceeds bound")));
    }
    let element_size: usize = match nc_type {
        1 | 2 => 1,
        3 => 2,
        4 | 5 => 4,
        6 => 8,
        other => {
            return Err(NetcdfError::Malformed(format!("unknown attribute type {other}")));
        }
    };
    let payload_length = (nelems as usize).saturating_mul(element_size);
    let payload = cursor.take(payload_length)?;
    cursor.skip_padding(payload_length)?;

    if nc_type == 2 {
        // NC_CHAR: render as text, trimming trailing NULs.
        let text: String = payload
            .iter()
            .copied()
            .take_while(|byte| *byte != 0)
            .map(char::from)
            .collect();
        return Ok(text);
    }
    let rendered: Vec<String> = payload
        .chunks_exact(element_size)
        .map(|chunk| render_numeric(nc_type, chunk))
        .collect();
    Ok(rendered.join(","))
}

/// Renders one numeric attribute element.
fn render_numeric(nc_type: u32, chunk: &[u8]) -> String {
    match nc_type {
        1 => i8::from_be_bytes([chunk[0]]).to_string(),
        3 => i16::from_be_bytes([chunk[0], chunk[1]]).to_string(),
        4 => i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]).to_string(),
        5 => f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]).to_string(),
        _ => f64::from_be_bytes([
            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
        ])
        .to_string(),
    }
}

/// Parses the variable list, keeping names and skipping everything else.
fn parse_variable_names(
    cursor: &mut Cursor<'_>,
    offset_width: usize,
) -> Result<Vec<String>, NetcdfError> {
    let count = read_list_header(cursor, TAG_VARIABLE)?;
    let mut names = Vec::new();
    for _ in 0..count {
        let name = cursor.read_name()?;
        let ndims = cursor.read_u32()?;
        if ndims > MAX_HEADER_ELEMENTS {
            return Err(NetcdfError::Malformed(format!("variable of {ndims} dims exceeds bound")));
        }
        for _ in 0..ndims {
            cursor.read_u32()?;
        }
        parse_attribute_list(cursor)?;
        cursor.read_u32()?;
        cursor.read_u32()?;
        cursor.take(offset_width)?;
        names.push(name);
    }
    Ok(names)
}

// ============================================================================
// SECTION: Test Builder
// ============================================================================

/// Serializes a minimal classic header, used by tests and fixtures.
#[must_use]
pub fn build_classic_header(
    global_attributes: &[(&str, &str)],
    variable_names: &[&str],
) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"CDF\x01");
    bytes.extend_from_slice(&0u32.to_be_bytes());
    // ABSENT dimension list.
    bytes.extend_from_slice(&0u32.to_be_bytes());
    bytes.extend_from_slice(&0u32.to_be_bytes());
    // Global attribute list.
    write_attribute_list(&mut bytes, global_attributes);
    // Variable list with no dimensions or attributes.
    if variable_names.is_empty() {
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
    } else {
        bytes.extend_from_slice(&TAG_VARIABLE.to_be_bytes());
        bytes.extend_from_slice(&u32::try_from(variable_names.len()).unwrap_or(0).to_be_bytes());
        for name in variable_names {
            write_name(&mut bytes, name);
            bytes.extend_from_slice(&0u32.to_be_bytes());
            bytes.extend_from_slice(&0u32.to_be_bytes());
            bytes.extend_from_slice(&0u32.to_be_bytes());
            bytes.extend_from_slice(&5u32.to_be_bytes());
            bytes.extend_from_slice(&0u32.to_be_bytes());
            bytes.extend_from_slice(&0u32.to_be_bytes());
        }
    }
    bytes
}

/// Writes an attribute list of NC_CHAR attributes.
fn write_attribute_list(bytes: &mut Vec<u8>, attributes: &[(&str, &str)]) {
    if attributes.is_empty() {
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        return;
    }
    bytes.extend_from_slice(&TAG_ATTRIBUTE.to_be_bytes());
    bytes.extend_from_slice(&u32::try_from(attributes.len()).unwrap_or(0).to_be_bytes());
    for (name, value) in attributes {
        write_name(bytes, name);
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&u32::try_from(value.len()).unwrap_or(0).to_be_bytes());
        bytes.extend_from_slice(value.as_bytes());
        let remainder = value.len() % 4;
        if remainder != 0 {
            bytes.extend(std::iter::repeat_n(0u8, 4 - remainder));
        }
    }
}

/// Writes a padded name.
fn write_name(bytes: &mut Vec<u8>, name: &str) {
    bytes.extend_from_slice(&u32::try_from(name.len()).unwrap_or(0).to_be_bytes());
    bytes.extend_from_slice(name.as_bytes());
    let remainder = name.len() % 4;
    if remainder != 0 {
        bytes.extend(std::iter::repeat_n(0u8, 4 - remainder));
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
