//! Runtime services: variables and platform reset.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::convert::Infallible;
use core::fmt;

use crate::call::{addr, issue, Word};
use crate::guid::Guid;
use crate::status::{EfiError, ErrorKind, Result, Status};
use crate::table::RuntimeServices;
use crate::wide::WideString;

/// How many times a variable read is re-issued after `BUFFER_TOO_SMALL`.
/// A variable can grow between the size query and the read.
const MAX_REISSUE: usize = 4;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetType {
    Cold = 0,
    Warm = 1,
    Shutdown = 2,
    PlatformSpecific = 3,
}

impl ResetType {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "cold" => Some(Self::Cold),
            "warm" => Some(Self::Warm),
            "shutdown" | "off" => Some(Self::Shutdown),
            _ => None,
        }
    }
}

impl fmt::Display for ResetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cold => write!(f, "cold"),
            Self::Warm => write!(f, "warm"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::PlatformSpecific => write!(f, "platform-specific"),
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VariableAttributes: u32 {
        const NON_VOLATILE = 0x01;
        const BOOTSERVICE_ACCESS = 0x02;
        const RUNTIME_ACCESS = 0x04;
        const HARDWARE_ERROR_RECORD = 0x08;
        const AUTHENTICATED_WRITE_ACCESS = 0x10;
        const TIME_BASED_AUTHENTICATED_WRITE_ACCESS = 0x20;
        const APPEND_WRITE = 0x40;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub attributes: VariableAttributes,
    pub data: Vec<u8>,
}

/// A variable's name and vendor namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableKey {
    pub name: String,
    pub vendor: Guid,
}

impl RuntimeServices {
    /// Reset the platform. Only returns if firmware refuses.
    pub fn reset_system(&self, kind: ResetType, status: Status) -> Result<Infallible> {
        log::info!("requesting {} reset", kind);
        let returned = unsafe {
            issue(
                self.reset_system,
                [Word::from(kind as u32), Word::from(status), Word(0), Word::NULL],
            )
        };
        returned.to_result()?;
        Err(EfiError::new(Status::ABORTED))
    }

    /// Read a variable, re-issuing with the firmware-reported size when the
    /// buffer is too small.
    pub fn get_variable(&self, name: &WideString, vendor: &Guid) -> Result<Variable> {
        let mut data: Vec<u8> = vec![0u8; 64];
        for _ in 0..MAX_REISSUE {
            let mut attributes = 0u32;
            let mut size = data.len();
            let status = unsafe {
                issue(
                    self.get_variable,
                    [
                        addr(name),
                        addr(vendor),
                        addr(&mut attributes),
                        addr(&mut size),
                        addr(data.as_mut_slice()),
                    ],
                )
            };
            match status.to_result() {
                Ok(()) => {
                    data.truncate(size);
                    return Ok(Variable {
                        attributes: VariableAttributes::from_bits_retain(attributes),
                        data,
                    });
                }
                Err(err) if err.kind() == ErrorKind::BufferTooSmall && size > data.len() => {
                    data.resize(size, 0);
                }
                Err(err) => return Err(err),
            }
        }
        Err(EfiError::new(Status::BUFFER_TOO_SMALL))
    }

    /// Enumerate every variable name firmware exposes.
    pub fn variable_names(&self) -> VariableNames<'_> {
        VariableNames {
            rt: self,
            name: vec![0u16; 64],
            vendor: Guid::from_bytes([0; 16]),
            done: false,
        }
    }
}

/// Iterator over `GetNextVariableName`.
pub struct VariableNames<'a> {
    rt: &'a RuntimeServices,
    name: Vec<u16>,
    vendor: Guid,
    done: bool,
}

impl VariableNames<'_> {
    fn advance(&mut self) -> Result<Option<VariableKey>> {
        for _ in 0..MAX_REISSUE {
            let mut size = self.name.len() * 2;
            let status = unsafe {
                issue(
                    self.rt.get_next_variable_name,
                    [
                        addr(&mut size),
                        addr(&mut self.name[..]),
                        crate::call::Ref::layout_mut(&mut self.vendor).word(),
                    ],
                )
            };
            match status.to_result() {
                Ok(()) => {
                    return Ok(Some(VariableKey {
                        name: WideString::decode(&self.name),
                        vendor: self.vendor,
                    }));
                }
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
                Err(err) if err.kind() == ErrorKind::BufferTooSmall => {
                    // Grow but keep the previous name as the cursor
                    let units = size.div_ceil(2).max(self.name.len() + 1);
                    self.name.resize(units, 0);
                }
                Err(err) => return Err(err),
            }
        }
        Err(EfiError::new(Status::BUFFER_TOO_SMALL))
    }
}

impl Iterator for VariableNames<'_> {
    type Item = Result<VariableKey>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(key)) => Some(Ok(key)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid::GLOBAL_VARIABLE;
    use crate::testing::FakeFirmware;

    #[test]
    fn test_get_variable_small() {
        let fw = FakeFirmware::new();
        fw.set_variable("SecureBoot", GLOBAL_VARIABLE, &[1]);
        let name = WideString::new("SecureBoot").unwrap();
        let var = fw.runtime_services().get_variable(&name, &GLOBAL_VARIABLE).unwrap();
        assert_eq!(var.data, [1]);
        assert!(var.attributes.contains(VariableAttributes::BOOTSERVICE_ACCESS));
    }

    #[test]
    fn test_get_variable_reissues_when_too_small() {
        let fw = FakeFirmware::new();
        let big = vec![0xabu8; 300];
        fw.set_variable("db", GLOBAL_VARIABLE, &big);
        let name = WideString::new("db").unwrap();
        let var = fw.runtime_services().get_variable(&name, &GLOBAL_VARIABLE).unwrap();
        assert_eq!(var.data, big);
        assert_eq!(fw.calls_named("get_variable"), 2);
    }

    #[test]
    fn test_missing_variable() {
        let fw = FakeFirmware::new();
        let name = WideString::new("SetupMode").unwrap();
        let err = fw
            .runtime_services()
            .get_variable(&name, &GLOBAL_VARIABLE)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_variable_names() {
        let fw = FakeFirmware::new();
        fw.set_variable("SecureBoot", GLOBAL_VARIABLE, &[1]);
        fw.set_variable("AVeryLongVariableNameThatDoesNotFitInSixtyFourUnitsOfBufferSpaceAtAll", GLOBAL_VARIABLE, &[0]);
        let names: Vec<String> = fw
            .runtime_services()
            .variable_names()
            .map(|k| k.unwrap().name)
            .collect();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0], "SecureBoot");
        assert!(names[1].starts_with("AVeryLong"));
    }

    #[test]
    fn test_reset_returning_is_an_error() {
        let fw = FakeFirmware::new();
        let result = fw.runtime_services().reset_system(ResetType::Shutdown, Status::SUCCESS);
        assert!(result.is_err());
        assert_eq!(fw.resets(), vec![ResetType::Shutdown as u32]);
    }

    #[test]
    fn test_reset_type_parse() {
        assert_eq!(ResetType::parse("warm"), Some(ResetType::Warm));
        assert_eq!(ResetType::parse("off"), Some(ResetType::Shutdown));
        assert_eq!(ResetType::parse("hard"), None);
    }
}
