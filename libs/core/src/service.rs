use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a logical service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(Uuid);

impl ServiceId {
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ServiceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for ServiceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Well-known service identifiers
pub mod services {
    use super::ServiceId;

    pub const DIRECTORY: ServiceId = ServiceId::from_u128(0xaf4a1d66_e6f7_43c4_8a67_0fa3be2b1cf9);
    pub const CONFIGDB: ServiceId = ServiceId::from_u128(0xaf15f175_78a0_4e05_97c0_2a0bb82b9f3b);
    pub const AUTHENTICATION: ServiceId =
        ServiceId::from_u128(0xcab2642a_f7d9_42e5_8845_8f35affe1fd4);
    pub const COMMAND_ESCALATION: ServiceId =
        ServiceId::from_u128(0x78ea7071_24ac_4916_8351_aa3e549d8ccd);
    pub const MQTT: ServiceId = ServiceId::from_u128(0xfeb27ba3_bd2c_4916_9269_79a61ebc4a47);
}
