//! NUL-terminated UTF-16 strings for firmware calls.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::call::Ref;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WideError {
    /// The text contains a NUL, which would truncate it on the firmware side.
    InteriorNul(usize),
}

impl fmt::Display for WideError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InteriorNul(at) => write!(f, "interior NUL at code unit {}", at),
        }
    }
}

/// Owned UTF-16 string that always ends in exactly one NUL.
#[derive(Clone, PartialEq, Eq)]
pub struct WideString {
    units: Vec<u16>,
}

impl WideString {
    pub fn new(text: &str) -> Result<Self, WideError> {
        let mut units: Vec<u16> = Vec::with_capacity(text.len() + 1);
        for (i, unit) in text.encode_utf16().enumerate() {
            if unit == 0 {
                return Err(WideError::InteriorNul(i));
            }
            units.push(unit);
        }
        units.push(0);
        Ok(Self { units })
    }

    /// Firmware file path: `/` separators become `\`.
    pub fn path(path: &str) -> Result<Self, WideError> {
        let mut wide = Self::new(path)?;
        for unit in wide.units.iter_mut() {
            if *unit == b'/' as u16 {
                *unit = b'\\' as u16;
            }
        }
        Ok(wide)
    }

    /// Code units, terminator excluded.
    pub fn len(&self) -> usize {
        self.units.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes as firmware length fields count it, terminator excluded.
    pub fn byte_len(&self) -> usize {
        self.len() * 2
    }

    /// Code units including the terminator.
    pub fn as_slice_with_nul(&self) -> &[u16] {
        &self.units
    }

    pub fn as_ptr(&self) -> *const u16 {
        self.units.as_ptr()
    }

    /// Decode firmware UTF-16, stopping at the first NUL. Unpaired
    /// surrogates become U+FFFD.
    pub fn decode(units: &[u16]) -> String {
        let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
        char::decode_utf16(units[..end].iter().copied())
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }
}

impl fmt::Debug for WideString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", Self::decode(&self.units))
    }
}

impl fmt::Display for WideString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Self::decode(&self.units))
    }
}

impl<'a> From<&'a WideString> for Ref<'a> {
    fn from(w: &'a WideString) -> Self {
        Ref::Wide(&w.units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminator_excluded_from_length() {
        let w = WideString::new("console=ttyS0").unwrap();
        assert_eq!(w.len(), 13);
        assert_eq!(w.byte_len(), 26);
        assert_eq!(w.as_slice_with_nul().len(), 14);
        assert_eq!(*w.as_slice_with_nul().last().unwrap(), 0);
    }

    #[test]
    fn test_empty() {
        let w = WideString::new("").unwrap();
        assert!(w.is_empty());
        assert_eq!(w.byte_len(), 0);
        assert_eq!(w.as_slice_with_nul(), &[0]);
    }

    #[test]
    fn test_interior_nul_rejected() {
        assert_eq!(WideString::new("a\0b"), Err(WideError::InteriorNul(1)));
    }

    #[test]
    fn test_path_separators() {
        let w = WideString::path("/EFI/linux/kernel.efi").unwrap();
        assert_eq!(w.to_string(), "\\EFI\\linux\\kernel.efi");
    }

    #[test]
    fn test_decode_stops_at_nul() {
        let units = [b'o' as u16, b'k' as u16, 0, b'x' as u16];
        assert_eq!(WideString::decode(&units), "ok");
    }

    #[test]
    fn test_non_ascii_counts_code_units() {
        // U+1F600 needs a surrogate pair
        let w = WideString::new("\u{1F600}").unwrap();
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn test_bridge_accepts_wide_string() {
        let w = WideString::new("x").unwrap();
        assert_eq!(crate::call::addr(&w).0, w.as_ptr() as usize);
    }
}
