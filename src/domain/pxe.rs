//! PXE-specific domain models.

use std::fmt;

/// Client system architecture types from the IANA "Processor Architecture
/// Types" registry (DHCP option 93).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientArch {
    IntelX86Pc,
    NecPc98,
    EfiItanium,
    DecAlpha,
    ArcX86,
    IntelLeanClient,
    EfiIa32,
    EfiBc,
    EfiXscale,
    EfiX8664,
    EfiArm32,
    EfiArm64,
    EfiX86Http,
    EfiX8664Http,
    EfiArm32Http,
    EfiArm64Http,
    ArmRpiboot,
    Unknown(u16),
}

impl ClientArch {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::IntelX86Pc,
            1 => Self::NecPc98,
            2 => Self::EfiItanium,
            3 => Self::DecAlpha,
            4 => Self::ArcX86,
            5 => Self::IntelLeanClient,
            6 => Self::EfiIa32,
            7 => Self::EfiBc,
            8 => Self::EfiXscale,
            9 => Self::EfiX8664,
            10 => Self::EfiArm32,
            11 => Self::EfiArm64,
            15 => Self::EfiX86Http,
            16 => Self::EfiX8664Http,
            18 => Self::EfiArm32Http,
            19 => Self::EfiArm64Http,
            41 => Self::ArmRpiboot,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            Self::IntelX86Pc => 0,
            Self::NecPc98 => 1,
            Self::EfiItanium => 2,
            Self::DecAlpha => 3,
            Self::ArcX86 => 4,
            Self::IntelLeanClient => 5,
            Self::EfiIa32 => 6,
            Self::EfiBc => 7,
            Self::EfiXscale => 8,
            Self::EfiX8664 => 9,
            Self::EfiArm32 => 10,
            Self::EfiArm64 => 11,
            Self::EfiX86Http => 15,
            Self::EfiX8664Http => 16,
            Self::EfiArm32Http => 18,
            Self::EfiArm64Http => 19,
            Self::ArmRpiboot => 41,
            Self::Unknown(code) => *code,
        }
    }

    /// The iPXE binary this architecture chainloads, or `None` if unsupported.
    pub fn boot_binary(&self) -> Option<&'static str> {
        match self {
            Self::IntelX86Pc
            | Self::NecPc98
            | Self::EfiItanium
            | Self::DecAlpha
            | Self::ArcX86
            | Self::IntelLeanClient => Some("undionly.kpxe"),
            Self::EfiIa32
            | Self::EfiBc
            | Self::EfiXscale
            | Self::EfiX8664
            | Self::EfiX86Http
            | Self::EfiX8664Http => Some("ipxe.efi"),
            Self::EfiArm32
            | Self::EfiArm64
            | Self::EfiArm32Http
            | Self::EfiArm64Http
            | Self::ArmRpiboot => Some("snp.efi"),
            Self::Unknown(_) => None,
        }
    }
}

impl fmt::Display for ClientArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntelX86Pc => write!(f, "x86 BIOS"),
            Self::NecPc98 => write!(f, "NEC/PC98"),
            Self::EfiItanium => write!(f, "EFI Itanium"),
            Self::DecAlpha => write!(f, "DEC Alpha"),
            Self::ArcX86 => write!(f, "Arc x86"),
            Self::IntelLeanClient => write!(f, "Intel Lean Client"),
            Self::EfiIa32 => write!(f, "EFI IA32"),
            Self::EfiBc => write!(f, "EFI BC"),
            Self::EfiXscale => write!(f, "EFI Xscale"),
            Self::EfiX8664 => write!(f, "EFI x86-64"),
            Self::EfiArm32 => write!(f, "EFI ARM32"),
            Self::EfiArm64 => write!(f, "EFI ARM64"),
            Self::EfiX86Http => write!(f, "EFI x86 HTTP"),
            Self::EfiX8664Http => write!(f, "EFI x86-64 HTTP"),
            Self::EfiArm32Http => write!(f, "EFI ARM32 HTTP"),
            Self::EfiArm64Http => write!(f, "EFI ARM64 HTTP"),
            Self::ArmRpiboot => write!(f, "ARM rpiboot"),
            Self::Unknown(code) => write!(f, "Unknown({code})"),
        }
    }
}

/// Client type announced in option 60.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    Pxe,
    Http,
}

impl ClientType {
    pub fn from_vendor_class(vendor_class: &str) -> Option<Self> {
        if vendor_class.starts_with("PXEClient") {
            Some(Self::Pxe)
        } else if vendor_class.starts_with("HTTPClient") {
            Some(Self::Http)
        } else {
            None
        }
    }

    /// Value echoed back in option 60.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pxe => "PXEClient",
            Self::Http => "HTTPClient",
        }
    }
}

/// User class iPXE sends in option 77 once it is running.
pub const IPXE_USER_CLASS: &str = "iPXE";

/// Default user class of iPXE builds that embed a script pointing back here.
pub const DEFAULT_CUSTOM_USER_CLASS: &str = "Tinkerbell";

#[cfg(test)]
mod tests {
    use super::*;

    mod client_arch_tests {
        use super::*;

        #[test]
        fn test_from_u16_round_trips() {
            for code in [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 15, 16, 18, 19, 41] {
                assert_eq!(ClientArch::from_u16(code).as_u16(), code);
            }
            assert_eq!(ClientArch::from_u16(12), ClientArch::Unknown(12));
            assert_eq!(ClientArch::Unknown(12).as_u16(), 12);
        }

        #[test]
        fn test_bios_family_gets_undionly() {
            for code in 0..=5 {
                assert_eq!(
                    ClientArch::from_u16(code).boot_binary(),
                    Some("undionly.kpxe")
                );
            }
        }

        #[test]
        fn test_x86_efi_gets_ipxe_efi() {
            for code in [6, 7, 8, 9, 15, 16] {
                assert_eq!(ClientArch::from_u16(code).boot_binary(), Some("ipxe.efi"));
            }
        }

        #[test]
        fn test_arm_gets_snp_efi() {
            for code in [10, 11, 18, 19, 41] {
                assert_eq!(ClientArch::from_u16(code).boot_binary(), Some("snp.efi"));
            }
        }

        #[test]
        fn test_unknown_is_unsupported() {
            for code in [12, 13, 14, 17, 20, 40, 0xffff] {
                assert_eq!(ClientArch::from_u16(code).boot_binary(), None);
            }
        }

        #[test]
        fn test_display() {
            assert_eq!(ClientArch::EfiX8664.to_string(), "EFI x86-64");
            assert_eq!(ClientArch::Unknown(99).to_string(), "Unknown(99)");
        }
    }

    mod client_type_tests {
        use super::*;

        #[test]
        fn test_from_vendor_class() {
            assert_eq!(
                ClientType::from_vendor_class("PXEClient:Arch:00007:UNDI:003016"),
                Some(ClientType::Pxe)
            );
            assert_eq!(
                ClientType::from_vendor_class("HTTPClient:Arch:00016:UNDI:003001"),
                Some(ClientType::Http)
            );
            assert_eq!(ClientType::from_vendor_class("MSFT 5.0"), None);
            assert_eq!(ClientType::from_vendor_class(""), None);
        }

        #[test]
        fn test_as_str() {
            assert_eq!(ClientType::Pxe.as_str(), "PXEClient");
            assert_eq!(ClientType::Http.as_str(), "HTTPClient");
        }
    }
}
