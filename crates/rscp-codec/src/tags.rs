use std::fmt;

use crate::DataType;

/// A 32 bit RSCP tag identifier.
///
/// The upper byte selects the namespace (EMS, PVI, BAT, ...). Answers from the
/// device set bit `0x0080_0000` on the corresponding request tag. Index tags
/// inside data containers are shared between request and response.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u32);

const RESPONSE_BIT: u32 = 0x0080_0000;

impl Tag {
    pub const fn code(self) -> u32 {
        self.0
    }

    pub const fn is_response(self) -> bool {
        self.0 & RESPONSE_BIT != 0
    }

    /// The tag the device answers a request with.
    pub const fn response(self) -> Tag {
        Tag(self.0 | RESPONSE_BIT)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "TAG_{name}"),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({self})")
    }
}

macro_rules! expected_type {
    (Any) => {
        None
    };
    ($ty:ident) => {
        Some(DataType::$ty)
    };
}

macro_rules! rscp_tags {
    ($( $name:ident = $code:literal => $ty:ident; )*) => {
        impl Tag {
            $( pub const $name: Tag = Tag($code); )*

            /// Symbolic name of a known tag.
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $( $code => Some(stringify!($name)), )*
                    _ => None,
                }
            }

            /// Data type the namespace declares for this tag. `None` for tags
            /// outside the namespace and for tags whose payload type varies.
            pub fn expected_type(&self) -> Option<DataType> {
                match self.0 {
                    $( $code => expected_type!($ty), )*
                    _ => None,
                }
            }

            pub fn is_known(&self) -> bool {
                self.name().is_some()
            }
        }
    };
}

rscp_tags! {
    RSCP_REQ_AUTHENTICATION = 0x0000_0001 => Container;
    RSCP_AUTHENTICATION_USER = 0x0000_0002 => CString;
    RSCP_AUTHENTICATION_PASSWORD = 0x0000_0003 => CString;
    RSCP_AUTHENTICATION = 0x0080_0001 => UChar8;
    RSCP_GENERAL_ERROR = 0x00FF_FFFF => Error;

    EMS_REQ_POWER_PV = 0x0100_0001 => None;
    EMS_REQ_POWER_BAT = 0x0100_0002 => None;
    EMS_REQ_POWER_HOME = 0x0100_0003 => None;
    EMS_REQ_POWER_GRID = 0x0100_0004 => None;
    EMS_REQ_POWER_ADD = 0x0100_0005 => None;
    EMS_REQ_BAT_SOC = 0x0100_0008 => None;
    EMS_REQ_POWER_WB_ALL = 0x0100_0017 => None;
    EMS_REQ_POWER_WB_SOLAR = 0x0100_0018 => None;
    EMS_REQ_EMERGENCY_POWER_STATUS = 0x0100_0027 => None;
    EMS_POWER_PV = 0x0180_0001 => Int32;
    EMS_POWER_BAT = 0x0180_0002 => Int32;
    EMS_POWER_HOME = 0x0180_0003 => Int32;
    EMS_POWER_GRID = 0x0180_0004 => Int32;
    EMS_POWER_ADD = 0x0180_0005 => Int32;
    EMS_BAT_SOC = 0x0180_0008 => UChar8;
    EMS_POWER_WB_ALL = 0x0180_0017 => Int32;
    EMS_POWER_WB_SOLAR = 0x0180_0018 => Int32;
    EMS_EMERGENCY_POWER_STATUS = 0x0180_0027 => UChar8;

    PVI_REQ_DATA = 0x0204_0000 => Container;
    PVI_DATA = 0x0284_0000 => Container;
    PVI_INDEX = 0x0204_0001 => Uint16;
    PVI_VALUE = 0x0204_0005 => Float32;
    PVI_REQ_DC_POWER = 0x0200_0082 => Uint16;
    PVI_DC_POWER = 0x0280_0082 => Container;
    PVI_REQ_DEVICE_STATE = 0x0206_0000 => None;
    PVI_DEVICE_STATE = 0x0286_0000 => Container;
    PVI_DEVICE_CONNECTED = 0x0286_0001 => Bool;
    PVI_DEVICE_WORKING = 0x0286_0002 => Bool;
    PVI_DEVICE_IN_SERVICE = 0x0286_0003 => Bool;

    BAT_REQ_DATA = 0x0304_0000 => Container;
    BAT_DATA = 0x0384_0000 => Container;
    BAT_INDEX = 0x0304_0001 => Uint16;
    BAT_REQ_DEVICE_STATE = 0x0306_0000 => None;
    BAT_DEVICE_STATE = 0x0386_0000 => Container;
    BAT_DEVICE_CONNECTED = 0x0386_0001 => Bool;
    BAT_DEVICE_WORKING = 0x0386_0002 => Bool;
    BAT_DEVICE_IN_SERVICE = 0x0386_0003 => Bool;

    PM_REQ_DATA = 0x0504_0000 => Container;
    PM_DATA = 0x0584_0000 => Container;
    PM_INDEX = 0x0504_0001 => UChar8;
    PM_REQ_DEVICE_STATE = 0x0506_0000 => None;
    PM_DEVICE_STATE = 0x0586_0000 => Container;
    PM_DEVICE_CONNECTED = 0x0586_0001 => Bool;
    PM_DEVICE_WORKING = 0x0586_0002 => Bool;
    PM_DEVICE_IN_SERVICE = 0x0586_0003 => Bool;

    INFO_REQ_SERIAL_NUMBER = 0x0A00_0001 => None;
    INFO_REQ_PRODUCTION_DATE = 0x0A00_0002 => None;
    INFO_REQ_A35_SERIAL_NUMBER = 0x0A00_0007 => None;
    INFO_REQ_MAC_ADDRESS = 0x0A00_000A => None;
    INFO_REQ_SW_RELEASE = 0x0A00_0013 => None;
    INFO_SERIAL_NUMBER = 0x0A80_0001 => CString;
    INFO_PRODUCTION_DATE = 0x0A80_0002 => CString;
    INFO_A35_SERIAL_NUMBER = 0x0A80_0007 => CString;
    INFO_MAC_ADDRESS = 0x0A80_000A => CString;
    INFO_SW_RELEASE = 0x0A80_0013 => CString;

    WB_REQ_DATA = 0x0E04_0000 => Container;
    WB_DATA = 0x0E84_0000 => Container;
    WB_INDEX = 0x0E04_0001 => UChar8;
    WB_REQ_DEVICE_NAME = 0x0E00_0013 => None;
    WB_REQ_SERIAL_NUMBER = 0x0E00_0014 => None;
    WB_REQ_FIRMWARE_VERSION = 0x0E00_0015 => None;
    WB_REQ_SUN_MODE_ACTIVE = 0x0E00_0030 => None;
    WB_REQ_ASSIGNED_POWER = 0x0E00_0031 => None;
    WB_REQ_CP_STATE = 0x0E00_0032 => None;
    WB_REQ_PM_POWER_L1 = 0x0E04_000D => None;
    WB_REQ_PM_POWER_L2 = 0x0E04_000E => None;
    WB_REQ_PM_POWER_L3 = 0x0E04_000F => None;
    WB_DEVICE_NAME = 0x0E80_0013 => CString;
    WB_SERIAL_NUMBER = 0x0E80_0014 => CString;
    WB_FIRMWARE_VERSION = 0x0E80_0015 => CString;
    WB_SUN_MODE_ACTIVE = 0x0E80_0030 => Bool;
    WB_ASSIGNED_POWER = 0x0E80_0031 => Int32;
    WB_CP_STATE = 0x0E80_0032 => Char8;
    WB_PM_POWER_L1 = 0x0E84_000D => Double64;
    WB_PM_POWER_L2 = 0x0E84_000E => Double64;
    WB_PM_POWER_L3 = 0x0E84_000F => Double64;
    WB_REQ_DEVICE_STATE = 0x0E06_0000 => None;
    WB_DEVICE_STATE = 0x0E86_0000 => Container;
    WB_DEVICE_CONNECTED = 0x0E86_0001 => Bool;
    WB_DEVICE_WORKING = 0x0E86_0002 => Bool;
    WB_DEVICE_IN_SERVICE = 0x0E86_0003 => Bool;
    WB_REQ_EXTERN_DATA_ALG = 0x0E04_1020 => None;
    WB_EXTERN_DATA_ALG = 0x0E84_1020 => Container;
    WB_EXTERN_DATA = 0x0E04_1014 => ByteArray;
    WB_EXTERN_DATA_LEN = 0x0E04_1015 => UChar8;
    WB_REQ_SET_EXTERN = 0x0E04_1010 => Container;
    WB_SET_EXTERN = 0x0E84_1010 => Any;

    SGR_REQ_DATA = 0x2404_0000 => Container;
    SGR_DATA = 0x2484_0000 => Container;
    SGR_INDEX = 0x2404_0001 => UChar8;
    SGR_REQ_STATE = 0x2400_0004 => None;
    SGR_STATE = 0x2480_0004 => UChar8;
}
